//! 完整生命周期：关闭 → 熔断 → 半开 → 重新熔断 → 半开 → 恢复

use crate::common::*;
use std::time::Duration;
use tripgate::{error::CircuitState, token::Outcome};

#[tokio::test(start_paused = true)]
async fn test_full_breaker_lifecycle() {
    let governor = create_test_governor();
    governor
        .register("checkout", &continuous_error_rule())
        .await
        .unwrap();

    // 关闭状态：成功不影响后续请求
    for _ in 0..5 {
        assert!(call(&governor, "checkout", Outcome::Success).await.unwrap());
    }

    // 连续失败直到熔断
    for _ in 0..4 {
        assert!(call(&governor, "checkout", Outcome::Failure).await.unwrap());
    }
    assert_eq!(
        governor.state("checkout").await.unwrap().state,
        CircuitState::Open
    );
    assert!(!call(&governor, "checkout", Outcome::Success).await.unwrap());

    // 熔断结束，探测失败三次后重新熔断
    tokio::time::advance(Duration::from_millis(5001)).await;
    for _ in 0..3 {
        assert!(call(&governor, "checkout", Outcome::Failure).await.unwrap());
    }
    assert_eq!(
        governor.state("checkout").await.unwrap().state,
        CircuitState::Open
    );

    // 再次等待，探测成功三次后恢复
    tokio::time::advance(Duration::from_millis(5001)).await;
    for _ in 0..3 {
        assert!(call(&governor, "checkout", Outcome::Success).await.unwrap());
    }
    let snapshot = governor.state("checkout").await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert!(!governor.is_half_open("checkout").await.unwrap());

    // 恢复后重新开始统计
    for _ in 0..3 {
        assert!(call(&governor, "checkout", Outcome::Failure).await.unwrap());
    }
    assert_eq!(
        governor.state("checkout").await.unwrap().state,
        CircuitState::Closed
    );
}

/// 混合探测结果：一次失败两次成功，第四个探测成功后恢复
#[tokio::test(start_paused = true)]
async fn test_mixed_probe_outcomes() {
    let governor = create_test_governor();
    governor
        .register("checkout", &abnormal_ratio_rule())
        .await
        .unwrap();
    for _ in 0..3 {
        call(&governor, "checkout", Outcome::Failure).await.unwrap();
    }
    tokio::time::advance(Duration::from_millis(5001)).await;

    for outcome in [Outcome::Failure, Outcome::Success, Outcome::Success] {
        assert!(call(&governor, "checkout", outcome).await.unwrap());
    }
    assert_eq!(
        governor.state("checkout").await.unwrap().state,
        CircuitState::HalfOpen
    );

    assert!(call(&governor, "checkout", Outcome::Success).await.unwrap());
    assert_eq!(
        governor.state("checkout").await.unwrap().state,
        CircuitState::Closed
    );
}
