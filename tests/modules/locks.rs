//! 分布式锁测试

use crate::common::*;
use std::sync::Arc;
use std::time::Duration;
use tripgate::{
    config::ResourceConfig,
    error::TripGateError,
    governor::Governor,
    storage::Storage,
    token::Outcome,
};

/// 反馈锁被持有时准入让步直至超时
#[tokio::test(start_paused = true)]
async fn test_admission_defers_to_feedback_lock() {
    let storage = create_memory_storage();
    let governor = Governor::new(impatient_config(), storage.clone()).unwrap();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    let feedback_lock = governor.key_schema().feedback_lock_key("payment");
    storage
        .set(&feedback_lock, "someone", Some(Duration::from_secs(60)))
        .await
        .unwrap();

    match governor.admit("payment").await {
        Err(TripGateError::LockTimeout {
            resource, attempts, ..
        }) => {
            assert_eq!(resource, "payment");
            assert_eq!(attempts, 5);
        }
        other => panic!("应当返回LockTimeout, 实际: {:?}", other),
    }

    storage.delete(&feedback_lock).await.unwrap();
    assert!(governor.admit("payment").await.unwrap().allowed);
}

/// 准入锁被持有时直到TTL过期才能获取
#[tokio::test(start_paused = true)]
async fn test_admission_waits_for_crashed_holder() {
    let storage = create_memory_storage();
    let governor = create_governor(storage.clone());
    governor
        .register("search", &ResourceConfig::qps(10.0, 60))
        .await
        .unwrap();

    let admission_lock = governor.key_schema().admission_lock_key("search");
    storage
        .set(&admission_lock, "crashed", Some(Duration::from_millis(30)))
        .await
        .unwrap();

    assert!(governor.admit("search").await.unwrap().allowed);
    assert!(!storage.exists(&admission_lock).await.unwrap());
}

/// 反馈锁超时时令牌保持未使用，可以重试
#[tokio::test(start_paused = true)]
async fn test_feedback_timeout_allows_retry() {
    let storage = create_memory_storage();
    let governor = Governor::new(impatient_config(), storage.clone()).unwrap();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();
    let token = governor.admit("payment").await.unwrap().token.unwrap();

    let feedback_lock = governor.key_schema().feedback_lock_key("payment");
    storage
        .set(&feedback_lock, "someone", Some(Duration::from_secs(60)))
        .await
        .unwrap();

    assert!(matches!(
        governor.resolve(&token, Outcome::Failure).await,
        Err(TripGateError::LockTimeout { .. })
    ));
    assert!(!token.is_consumed());

    storage.delete(&feedback_lock).await.unwrap();
    governor.resolve(&token, Outcome::Failure).await.unwrap();
    assert!(token.is_consumed());
}

/// 操作完成后不遗留锁
#[tokio::test]
async fn test_no_locks_left_behind() {
    let storage = create_memory_storage();
    let governor = Arc::new(create_governor(storage.clone()));
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    for _ in 0..5 {
        call(&governor, "payment", Outcome::Failure).await.unwrap();
    }

    let schema = governor.key_schema();
    assert!(!storage
        .exists(&schema.admission_lock_key("payment"))
        .await
        .unwrap());
    assert!(!storage
        .exists(&schema.feedback_lock_key("payment"))
        .await
        .unwrap());
}
