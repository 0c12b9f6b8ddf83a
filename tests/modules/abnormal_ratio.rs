//! 异常比例规则测试

use crate::common::*;
use std::time::Duration;
use tripgate::{error::CircuitState, state::CounterState, token::Outcome};

/// 3个样本全部失败，第三次失败时熔断
#[tokio::test(start_paused = true)]
async fn test_trips_on_third_failure() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    assert!(call(&governor, "payment", Outcome::Failure).await.unwrap());
    assert!(call(&governor, "payment", Outcome::Failure).await.unwrap());
    assert_eq!(
        governor.state("payment").await.unwrap().counter,
        Some(CounterState::closed(2, 2))
    );

    assert!(call(&governor, "payment", Outcome::Failure).await.unwrap());
    let snapshot = governor.state("payment").await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Open);
    assert_eq!(snapshot.counter, Some(CounterState::open(2, 2)));
    assert!(snapshot.open_remaining.unwrap() <= Duration::from_secs(5));
    assert!(governor.is_half_open("payment").await.unwrap());
}

/// 熔断期间拒绝，熔断结束后进入半开探测
#[tokio::test(start_paused = true)]
async fn test_rejects_until_open_elapses() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    for _ in 0..3 {
        call(&governor, "payment", Outcome::Failure).await.unwrap();
    }

    for _ in 0..3 {
        let admission = governor.admit("payment").await.unwrap();
        assert!(!admission.allowed);
        assert!(admission.token.is_none());
    }

    tokio::time::advance(Duration::from_secs(3)).await;
    assert!(!governor.admit("payment").await.unwrap().allowed);

    tokio::time::advance(Duration::from_millis(2001)).await;
    let admission = governor.admit("payment").await.unwrap();
    assert!(admission.allowed);
    assert!(admission.token.is_some());

    let snapshot = governor.state("payment").await.unwrap();
    assert_eq!(snapshot.state, CircuitState::HalfOpen);
    assert_eq!(snapshot.probe.unwrap().probes, 1);
}

/// 失败比例不超过阈值时不熔断
#[tokio::test]
async fn test_ratio_at_threshold_does_not_trip() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    for outcome in [
        Outcome::Success,
        Outcome::Success,
        Outcome::Failure,
        Outcome::Failure,
    ] {
        call(&governor, "payment", outcome).await.unwrap();
    }

    // 第四次为失败：(1 + 1) / (3 + 1) = 0.5，不大于0.5
    let snapshot = governor.state("payment").await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.counter, Some(CounterState::closed(4, 2)));

    // (2 + 1) / (4 + 1) = 0.6 > 0.5
    call(&governor, "payment", Outcome::Failure).await.unwrap();
    assert_eq!(
        governor.state("payment").await.unwrap().state,
        CircuitState::Open
    );
}

/// 样本不足时只计数
#[tokio::test]
async fn test_warm_up_only_counts() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule().min_samples(10))
        .await
        .unwrap();

    for _ in 0..9 {
        call(&governor, "payment", Outcome::Failure).await.unwrap();
    }
    let snapshot = governor.state("payment").await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.counter, Some(CounterState::closed(9, 9)));

    call(&governor, "payment", Outcome::Failure).await.unwrap();
    assert_eq!(
        governor.state("payment").await.unwrap().state,
        CircuitState::Open
    );
}

/// 关闭状态下的准入不修改计数
#[tokio::test]
async fn test_closed_admission_is_read_only() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    let admission = governor.admit("payment").await.unwrap();
    assert!(admission.allowed);
    assert!(governor.state("payment").await.unwrap().counter.is_none());
}
