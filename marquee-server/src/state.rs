use std::sync::Arc;

use anyhow::Context;
use marquee_core::sources::{SourceProbe, SourceScraper};
use marquee_core::{JobKind, JobRegistry, Spawner, WorkerPool, fetch};

use crate::config::ServerConfig;
use crate::ledger::SeenLedger;

/// Shared handles the route adapter needs: the pool for repeatable jobs, the
/// spawner for one-offs, and the in-flight ledger.
#[derive(Clone, Debug)]
pub struct AppState {
    pub pool: Arc<WorkerPool>,
    pub spawner: Arc<Spawner>,
    pub ledger: SeenLedger,
}

impl AppState {
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let client = fetch::http_client().context("build upstream HTTP client")?;

        let registry = JobRegistry::builder()
            .register(
                JobKind::StreamSources,
                Arc::new(SourceScraper::new(
                    client.clone(),
                    config.core.fetch,
                    &config.core.upstreams,
                )),
            )
            .register(
                JobKind::SourceProbe,
                Arc::new(SourceProbe::new(client, config.core.fetch)),
            )
            .build()
            .context("register job runners")?;

        let pool = WorkerPool::new(
            config.core.pool.clone(),
            registry.runner_for(JobKind::StreamSources),
        );
        let spawner = Spawner::new(registry, config.core.pool.task_deadline());

        Ok(Self {
            pool: Arc::new(pool),
            spawner: Arc::new(spawner),
            ledger: SeenLedger::default(),
        })
    }
}
