//! 并发测试
//!
//! 多个任务同时访问同一资源，锁保证读-改-写串行。

use crate::common::*;
use futures::future::join_all;
use std::sync::Arc;
use tripgate::{config::ResourceConfig, state::CounterState, token::Outcome};

/// N个并发准入、阈值K的QPS资源恰好放行 min(N, K) 个
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_qps_admits_exactly_threshold() {
    const N: usize = 60;
    const K: usize = 25;

    let governor = Arc::new(create_test_governor());
    governor
        .register("search", &ResourceConfig::qps(K as f64, 60))
        .await
        .unwrap();

    let handles = (0..N).map(|_| {
        let governor = governor.clone();
        tokio::spawn(async move { admit_retrying(&governor, "search").await.unwrap().allowed })
    });

    let allowed = join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .filter(|allowed| *allowed)
        .count();

    assert_eq!(allowed, N.min(K));
    assert_eq!(
        governor.state("search").await.unwrap().counter.unwrap().total,
        K as u64
    );
}

/// 请求数小于阈值时全部放行
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_qps_below_threshold() {
    const N: usize = 10;

    let governor = Arc::new(create_test_governor());
    governor
        .register("search", &ResourceConfig::qps(100.0, 60))
        .await
        .unwrap();

    let handles = (0..N).map(|_| {
        let governor = governor.clone();
        tokio::spawn(async move { admit_retrying(&governor, "search").await.unwrap().allowed })
    });

    let allowed = join_all(handles)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(true)))
        .count();
    assert_eq!(allowed, N);
}

/// 并发反馈不丢失计数
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_feedback_is_serialized() {
    const N: u64 = 40;

    let governor = Arc::new(create_test_governor());
    governor
        .register(
            "payment",
            &abnormal_ratio_rule().min_samples(1_000),
        )
        .await
        .unwrap();

    let handles = (0..N).map(|_| {
        let governor = governor.clone();
        tokio::spawn(async move {
            let token = admit_retrying(&governor, "payment")
                .await
                .unwrap()
                .token
                .unwrap();
            loop {
                match governor.resolve(&token, Outcome::Failure).await {
                    Err(tripgate::error::TripGateError::LockTimeout { .. }) => {
                        tokio::task::yield_now().await
                    }
                    other => return other,
                }
            }
        })
    });

    for result in join_all(handles).await {
        result.unwrap().unwrap();
    }

    assert_eq!(
        governor.state("payment").await.unwrap().counter,
        Some(CounterState::closed(N, N))
    );
}

/// 并发探测不超过探测配额
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_probes_respect_quota() {
    let storage = create_memory_storage();
    let governor = Arc::new(create_governor(storage.clone()));
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    // 直接进入半开集合，跳过熔断期
    use tripgate::storage::Storage;
    let schema = governor.key_schema();
    storage
        .sadd(&schema.half_open_set_key(), "payment")
        .await
        .unwrap();

    let handles = (0..20).map(|_| {
        let governor = governor.clone();
        tokio::spawn(async move { admit_retrying(&governor, "payment").await.unwrap().allowed })
    });

    let allowed = join_all(handles)
        .await
        .into_iter()
        .filter(|result| matches!(result, Ok(true)))
        .count();
    assert_eq!(allowed, 5);
}
