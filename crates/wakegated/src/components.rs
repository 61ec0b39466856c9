//! Builds the shared subsystems from configuration.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use wakegate_coordinator::{WakeCoordinator, WakePolicy};
use wakegate_core::WakegateConfig;
use wakegate_core::config::{OrchestratorKind, StoreBackend, StoreConfig};
use wakegate_metrics::WakeMetrics;
use wakegate_orchestrator::{KubeScaleClient, MemoryOrchestrator, Orchestrator};
use wakegate_scaler::{SleepTrigger, WorkloadScaler};
use wakegate_state::{EmbeddedStore, RedisStore, StateStore};

/// Handles every subcommand shares.
pub struct Components {
    pub config: WakegateConfig,
    pub store: Arc<dyn StateStore>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub metrics: Arc<WakeMetrics>,
}

impl Components {
    pub async fn build(config: WakegateConfig) -> anyhow::Result<Self> {
        let store = open_store(&config.store).await?;

        let orchestrator: Arc<dyn Orchestrator> = match config.orchestrator.kind {
            OrchestratorKind::Kubernetes => {
                let client = KubeScaleClient::from_config(&config.orchestrator)
                    .context("orchestrator setup")?;
                info!(
                    api_url = %config.orchestrator.api_url,
                    resource = %config.orchestrator.resource,
                    "kubernetes orchestrator ready"
                );
                Arc::new(client)
            }
            OrchestratorKind::Memory => {
                warn!("memory orchestrator: replica changes are recorded, not applied");
                Arc::new(MemoryOrchestrator::new())
            }
        };

        Ok(Self {
            config,
            store,
            orchestrator,
            metrics: Arc::new(WakeMetrics::new()),
        })
    }

    pub fn coordinator(&self) -> anyhow::Result<Arc<WakeCoordinator>> {
        let policy = WakePolicy::from_settings(&self.config.wake)?;
        info!(
            poll_interval_ms = policy.poll_interval.as_millis() as u64,
            ceiling_secs = policy.ceiling_timeout.as_secs(),
            "wake coordinator ready"
        );
        Ok(Arc::new(WakeCoordinator::new(
            self.store.clone(),
            policy,
            self.metrics.clone(),
        )))
    }

    pub fn scaler(&self) -> WorkloadScaler {
        WorkloadScaler::new(
            self.store.clone(),
            self.orchestrator.clone(),
            self.config.orchestrator.running_replicas,
            self.metrics.clone(),
        )
        .with_max_concurrent(self.config.orchestrator.max_concurrent)
    }

    pub fn sleeper(&self) -> SleepTrigger {
        SleepTrigger::new(
            self.store.clone(),
            self.orchestrator.clone(),
            self.metrics.clone(),
        )
    }
}

async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn StateStore>> {
    let layout = config.layout();
    match config.backend {
        StoreBackend::Redis => {
            let op_timeout = config.op_timeout()?;
            let store = RedisStore::connect(&config.url, config.pool_size, op_timeout, layout)
                .await
                .with_context(|| format!("connecting to redis at {}", config.url))?;
            info!(url = %config.url, pool_size = config.pool_size, "redis state store connected");
            Ok(Arc::new(store))
        }
        StoreBackend::Embedded => match &config.path {
            Some(path) => {
                if let Some(dir) = path.parent()
                    && !dir.as_os_str().is_empty()
                {
                    std::fs::create_dir_all(dir)?;
                }
                let store = EmbeddedStore::open(path, layout)?;
                info!(path = ?path, "embedded state store opened");
                Ok(Arc::new(store))
            }
            None => {
                warn!("embedded state store is in memory; lifecycle records are lost on exit");
                Ok(Arc::new(EmbeddedStore::open_in_memory(layout)?))
            }
        },
    }
}
