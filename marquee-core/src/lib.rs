//! # marquee-core
//!
//! Task-execution core of the Marquee movie catalog.
//!
//! The catalog's routes stay thin: they build a payload, hand it to this
//! crate, and format whatever comes back. Everything that needs concurrency
//! coordination lives here:
//!
//! - [`WorkerPool`]: a fixed roster of isolated worker units with a FIFO
//!   backlog, per-task deadlines enforced by forced termination, and
//!   automatic replacement of crashed units.
//! - [`Spawner`]: a one-shot variant that starts a fresh unit per call and
//!   guarantees exactly one terminal outcome.
//! - [`fetch`]: the timeout/retry discipline scraping runners apply to
//!   unreliable upstream hosts.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use marquee_core::{CoreConfig, JobKind, JobRegistry, WorkerPool, Spawner};
//! use marquee_core::sources::{SourceProbe, SourceScraper};
//!
//! let config = CoreConfig::default();
//! let client = marquee_core::fetch::http_client()?;
//! let registry = JobRegistry::builder()
//!     .register(
//!         JobKind::StreamSources,
//!         Arc::new(SourceScraper::new(client.clone(), config.fetch, &config.upstreams)),
//!     )
//!     .register(JobKind::SourceProbe, Arc::new(SourceProbe::new(client, config.fetch)))
//!     .build()?;
//!
//! let pool = WorkerPool::new(
//!     config.pool.clone(),
//!     registry.runner_for(JobKind::StreamSources),
//! );
//! let spawner = Spawner::new(registry, config.pool.task_deadline());
//!
//! let sources = pool.run_task(serde_json::json!({"tmdb_id": 603})).await?;
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod job;
pub mod pool;
pub mod sources;
pub mod spawner;

pub use config::{CoreConfig, FetchPolicy, PoolConfig, UpstreamConfig};
pub use error::{TaskError, TaskResult};
pub use fetch::{FetchError, FetchResult};
pub use job::{JobKind, JobRegistry, JobRunner, TaskId};
pub use pool::{PoolSnapshot, WorkerPool};
pub use spawner::Spawner;
