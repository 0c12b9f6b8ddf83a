//! 并发一致性检查
//!
//! 多个任务同时访问同一组资源，检查放行数量与熔断状态是否符合配置。
//! 运行: `cargo run --bin concurrency_check`

use std::sync::Arc;

use anyhow::{ensure, Context};
use tripgate::prelude::*;

const TASKS: usize = 64;
const QPS_THRESHOLD: f64 = 20.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    #[cfg(feature = "telemetry")]
    tripgate::telemetry::init_tracing("tripgate=info")?;

    println!("=== 并发一致性检查 ===");

    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
    let governor = Arc::new(Governor::new(GovernorConfig::default(), storage)?);

    check_qps(&governor).await?;
    check_breaker(&governor).await?;

    Ok(())
}

async fn admit_retrying(governor: &Governor, resource: &str) -> anyhow::Result<Admission> {
    loop {
        match governor.admit(resource).await {
            Err(TripGateError::LockTimeout { .. }) => tokio::task::yield_now().await,
            other => return other.with_context(|| format!("准入失败: {}", resource)),
        }
    }
}

async fn check_qps(governor: &Arc<Governor>) -> anyhow::Result<()> {
    println!("\n--- QPS资源并发准入 ---");
    governor
        .register("search", &ResourceConfig::qps(QPS_THRESHOLD, 60))
        .await?;

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let governor = governor.clone();
            tokio::spawn(async move { admit_retrying(&governor, "search").await })
        })
        .collect();

    let mut allowed = 0;
    for handle in handles {
        if handle.await??.allowed {
            allowed += 1;
        }
    }

    println!("请求数: {}, 放行数: {}", TASKS, allowed);
    ensure!(
        allowed == QPS_THRESHOLD as usize,
        "放行数 {} 与阈值 {} 不一致",
        allowed,
        QPS_THRESHOLD
    );

    let snapshot = governor.state("search").await?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn check_breaker(governor: &Arc<Governor>) -> anyhow::Result<()> {
    println!("\n--- 异常比例熔断 ---");
    governor
        .register("payment", &ResourceConfig::abnormal_ratio(0.5, 10, 60, 30))
        .await?;

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let governor = governor.clone();
            tokio::spawn(async move {
                let admission = admit_retrying(&governor, "payment").await?;
                let Some(token) = admission.token else {
                    return Ok::<_, anyhow::Error>(false);
                };
                loop {
                    match governor.resolve(&token, Outcome::Failure).await {
                        Err(TripGateError::LockTimeout { .. }) => tokio::task::yield_now().await,
                        other => {
                            other?;
                            return Ok(true);
                        }
                    }
                }
            })
        })
        .collect();

    let mut resolved = 0;
    for handle in handles {
        if handle.await?? {
            resolved += 1;
        }
    }

    let snapshot = governor.state("payment").await?;
    println!("上报失败数: {}", resolved);
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    ensure!(
        snapshot.state == CircuitState::Open,
        "全部失败后应当处于熔断状态, 实际: {}",
        snapshot.state
    );
    ensure!(
        !governor.admit("payment").await?.allowed,
        "熔断期间不应放行"
    );

    println!("\n检查通过");
    Ok(())
}
