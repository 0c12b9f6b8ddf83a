//! Redis集成测试
//!
//! 需要本地Redis服务器运行：`cargo test --features redis -- --ignored`

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tripgate::{
    config::{GovernorConfig, ResourceConfig},
    error::CircuitState,
    governor::Governor,
    redis_storage::{RedisConfig, RedisStorage},
    storage::{LockAttempt, Storage},
    token::Outcome,
};

const REDIS_URL: &str = "redis://127.0.0.1:6379";

async fn storage() -> RedisStorage {
    RedisStorage::new(RedisConfig::new(REDIS_URL)).await.unwrap()
}

fn unique(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// 测试Redis连接
#[tokio::test]
#[ignore] // 需要Redis服务器运行
async fn test_redis_connection() {
    let storage = storage().await;
    assert!(storage.ping().await.is_ok());
}

/// 整条写入带TTL，自增不复活过期记录
#[tokio::test]
#[ignore]
async fn test_redis_hash_primitives() {
    let storage = storage().await;
    let key = unique("tripgate_test_hash");

    storage
        .hset_all(
            &key,
            &[("total", "1".to_string()), ("errors", "0".to_string())],
            Some(Duration::from_millis(300)),
        )
        .await
        .unwrap();
    assert_eq!(storage.hincr_by(&key, "total", 1).await.unwrap(), Some(2));
    assert!(storage
        .hset_if_exists(&key, &[("errors", "0".to_string())])
        .await
        .unwrap());
    assert!(storage.ttl(&key).await.unwrap().is_some());

    sleep(Duration::from_millis(400)).await;

    assert_eq!(storage.hincr_by(&key, "total", 1).await.unwrap(), None);
    assert!(!storage
        .hset_if_exists(&key, &[("errors", "0".to_string())])
        .await
        .unwrap());
    assert!(storage.hget_all(&key).await.unwrap().is_empty());
}

/// 带避让的加锁与比较后删除
#[tokio::test]
#[ignore]
async fn test_redis_lock_primitives() {
    let storage = storage().await;
    let lock = unique("tripgate_test_lock");
    let blocker = unique("tripgate_test_blocker");
    let ttl = Duration::from_secs(5);

    assert!(storage.set_nx(&blocker, "feedback", ttl).await.unwrap());
    assert_eq!(
        storage.set_nx_unless(&lock, "a", ttl, &blocker).await.unwrap(),
        LockAttempt::Deferred
    );
    assert!(!storage.exists(&lock).await.unwrap());

    assert!(storage.compare_and_delete(&blocker, "feedback").await.unwrap());
    assert_eq!(
        storage.set_nx_unless(&lock, "a", ttl, &blocker).await.unwrap(),
        LockAttempt::Acquired
    );
    assert_eq!(
        storage.set_nx_unless(&lock, "b", ttl, &blocker).await.unwrap(),
        LockAttempt::Busy
    );

    assert!(!storage.compare_and_delete(&lock, "b").await.unwrap());
    assert!(storage.compare_and_delete(&lock, "a").await.unwrap());
}

/// 批量成员检查
#[tokio::test]
#[ignore]
async fn test_redis_set_membership() {
    let storage = storage().await;
    let key = unique("tripgate_test_set");

    assert!(storage.sadd(&key, "a").await.unwrap());
    assert!(storage.sadd(&key, "c").await.unwrap());
    assert_eq!(
        storage.smismember(&key, &["a", "b", "c"]).await.unwrap(),
        vec![true, false, true]
    );
    assert!(storage.srem(&key, "a").await.unwrap());
    assert!(!storage.sismember(&key, "a").await.unwrap());
    storage.delete(&key).await.unwrap();
}

/// 两个Governor通过Redis共享熔断状态
#[tokio::test]
#[ignore]
async fn test_redis_shared_breaker() {
    let namespace = unique("tg");
    let a = Governor::new(
        GovernorConfig::with_namespace(namespace.as_str()),
        Arc::new(storage().await),
    )
    .unwrap();
    let b = Governor::new(
        GovernorConfig::with_namespace(namespace.as_str()),
        Arc::new(storage().await),
    )
    .unwrap();

    a.register(
        "payment",
        &ResourceConfig::continuous_error(1.0, 10, 1)
            .max_probes(2)
            .recover_ratio(0.5),
    )
    .await
    .unwrap();

    for governor in [&a, &b, &a] {
        let token = governor.admit("payment").await.unwrap().token.unwrap();
        governor.resolve(&token, Outcome::Failure).await.unwrap();
    }
    assert_eq!(b.state("payment").await.unwrap().state, CircuitState::Open);
    assert!(!b.admit("payment").await.unwrap().allowed);

    sleep(Duration::from_millis(1100)).await;
    assert!(a.half_open_batch(&["payment"]).await.unwrap()[0]);
    let token = b.admit("payment").await.unwrap().token.unwrap();
    a.resolve(&token, Outcome::Success).await.unwrap();
    assert_eq!(
        a.state("payment").await.unwrap().state,
        CircuitState::Closed
    );
}
