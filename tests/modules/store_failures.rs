//! 存储故障测试
//!
//! 存储不可用时错误原样返回给调用方，不重试也不吞掉。

use crate::common::*;
use std::sync::Arc;
use tripgate::{
    config::ResourceConfig,
    error::{StorageError, TripGateError},
};

fn is_store_unavailable<T: std::fmt::Debug>(result: Result<T, TripGateError>) -> bool {
    matches!(
        result,
        Err(TripGateError::StoreUnavailable(StorageError::ConnectionError(_)))
    )
}

#[tokio::test]
async fn test_register_reports_store_unavailable() {
    let governor = create_governor(Arc::new(FailingStorage));
    assert!(is_store_unavailable(
        governor
            .register("search", &ResourceConfig::qps(10.0, 1))
            .await
    ));
    assert!(is_store_unavailable(governor.is_configured("search").await));
}

#[tokio::test]
async fn test_admit_reports_store_unavailable() {
    let governor = create_governor(Arc::new(FailingStorage));
    assert!(is_store_unavailable(governor.admit("search").await));
}

#[tokio::test]
async fn test_inspection_reports_store_unavailable() {
    let governor = create_governor(Arc::new(FailingStorage));
    assert!(is_store_unavailable(governor.state("search").await));
    assert!(is_store_unavailable(governor.is_half_open("search").await));
    assert!(is_store_unavailable(
        governor.half_open_batch(&["search"]).await
    ));
}

/// 资源标识校验先于存储访问
#[tokio::test]
async fn test_invalid_resource_checked_before_store() {
    let governor = create_governor(Arc::new(FailingStorage));
    assert!(matches!(
        governor.admit("bad:id").await,
        Err(TripGateError::InvalidResourceId(_))
    ));
}
