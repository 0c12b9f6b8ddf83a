//! 反馈测试

use crate::common::*;
use tripgate::{
    config::ResourceConfig,
    error::{CircuitState, TripGateError},
    state::CounterState,
    token::Outcome,
};

/// 重复反馈返回错误且不修改状态
#[tokio::test]
async fn test_duplicate_feedback_rejected() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    let token = governor.admit("payment").await.unwrap().token.unwrap();
    governor.resolve(&token, Outcome::Failure).await.unwrap();
    assert!(token.is_consumed());
    let before = governor.state("payment").await.unwrap();

    let result = governor.resolve(&token, Outcome::Failure).await;
    match result {
        Err(TripGateError::DuplicateFeedback(id)) => assert_eq!(id, token.correlation_id()),
        other => panic!("应当返回DuplicateFeedback, 实际: {:?}", other),
    }
    assert_eq!(governor.state("payment").await.unwrap(), before);

    // 换一种结果同样拒绝
    assert!(matches!(
        governor.resolve(&token, Outcome::Success).await,
        Err(TripGateError::DuplicateFeedback(_))
    ));
}

/// 每个令牌带唯一关联ID
#[tokio::test]
async fn test_tokens_have_distinct_correlation_ids() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    let a = governor.admit("payment").await.unwrap();
    let b = governor.admit("payment").await.unwrap();
    assert_ne!(a.correlation_id, b.correlation_id);
    assert_eq!(a.token.unwrap().correlation_id(), a.correlation_id);
}

/// Outcome 可以从 bool 转换
#[tokio::test]
async fn test_resolve_with_bool_outcome() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();

    let token = governor.admit("payment").await.unwrap().token.unwrap();
    governor.resolve(&token, false.into()).await.unwrap();
    let token = governor.admit("payment").await.unwrap().token.unwrap();
    governor.resolve(&token, true.into()).await.unwrap();

    assert_eq!(
        governor.state("payment").await.unwrap().counter,
        Some(CounterState::closed(2, 1))
    );
}

/// 资源被重新注册为其他规则后，旧令牌按新配置处理
#[tokio::test]
async fn test_resolve_after_reregistration() {
    let governor = create_test_governor();
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();
    let token = governor.admit("payment").await.unwrap().token.unwrap();

    governor
        .register("payment", &continuous_error_rule())
        .await
        .unwrap();
    governor.resolve(&token, Outcome::Failure).await.unwrap();
    assert_eq!(
        governor.state("payment").await.unwrap().counter,
        Some(CounterState::closed(1, 1))
    );
}

/// 资源改为QPS规则后，未完成的熔断令牌不会让它进入半开集合
#[tokio::test]
async fn test_resolve_after_switch_to_qps() {
    let governor = create_test_governor();
    governor
        .register("payment", &continuous_error_rule())
        .await
        .unwrap();
    let first = governor.admit("payment").await.unwrap().token.unwrap();
    let second = governor.admit("payment").await.unwrap().token.unwrap();

    governor
        .register("payment", &ResourceConfig::qps(0.0, 10))
        .await
        .unwrap();
    assert!(governor.admit("payment").await.unwrap().allowed);

    governor.resolve(&first, Outcome::Failure).await.unwrap();
    governor.resolve(&second, Outcome::Failure).await.unwrap();
    assert!(first.is_consumed());

    let snapshot = governor.state("payment").await.unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.counter, Some(CounterState::closed(1, 0)));
    assert!(!governor.is_half_open("payment").await.unwrap());
}

/// 配置被删除时反馈返回ConfigMissing，令牌仍被标记为已使用
#[tokio::test]
async fn test_resolve_config_missing() {
    let storage = create_memory_storage();
    let governor = create_governor(storage.clone());
    governor
        .register("payment", &abnormal_ratio_rule())
        .await
        .unwrap();
    let token = governor.admit("payment").await.unwrap().token.unwrap();

    use tripgate::storage::Storage;
    storage
        .delete(&governor.key_schema().config_key("payment"))
        .await
        .unwrap();

    assert!(matches!(
        governor.resolve(&token, Outcome::Success).await,
        Err(TripGateError::ConfigMissing(_))
    ));
    assert!(token.is_consumed());
}
