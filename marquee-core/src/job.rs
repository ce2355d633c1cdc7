use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier attached to every submitted task, used for log
/// correlation.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Closed set of scraping jobs the system knows how to run.
///
/// Workers are selected by kind through a [`JobRegistry`], so an unknown job
/// is unrepresentable rather than a runtime path-resolution failure.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Collect streaming-source links for one title across upstream hosts.
    StreamSources,
    /// Check a single upstream host for reachability.
    SourceProbe,
}

impl JobKind {
    pub const ALL: [JobKind; 2] = [JobKind::StreamSources, JobKind::SourceProbe];
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::StreamSources => write!(f, "sources"),
            JobKind::SourceProbe => write!(f, "probe"),
        }
    }
}

/// Entry point a worker unit executes for a job.
///
/// A runner receives the opaque payload (construction-time data in spawn
/// mode, a runtime message in pool mode) and must produce exactly one result
/// value on success. An `Err` (or a panic) is interpreted by the supervisor
/// as a task failure; the payload schema is a contract between the route
/// adapter and the runner, never inspected by the pool.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, payload: Value) -> anyhow::Result<Value>;
}

/// Maps each [`JobKind`] to its registered runner.
///
/// Built once at startup; [`JobRegistryBuilder::build`] fails if any kind is
/// missing, so resolution at dispatch time is infallible.
#[derive(Clone)]
pub struct JobRegistry {
    runners: Arc<HashMap<JobKind, Arc<dyn JobRunner>>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("kinds", &self.runners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder {
            runners: HashMap::new(),
        }
    }

    pub fn runner_for(&self, kind: JobKind) -> Arc<dyn JobRunner> {
        // The builder guarantees every kind is present.
        Arc::clone(&self.runners[&kind])
    }
}

#[derive(Default)]
pub struct JobRegistryBuilder {
    runners: HashMap<JobKind, Arc<dyn JobRunner>>,
}

impl fmt::Debug for JobRegistryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistryBuilder")
            .field("kinds", &self.runners.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl JobRegistryBuilder {
    pub fn register(mut self, kind: JobKind, runner: Arc<dyn JobRunner>) -> Self {
        self.runners.insert(kind, runner);
        self
    }

    /// Finish the registry, rejecting incomplete registrations up front.
    pub fn build(self) -> Result<JobRegistry, MissingRunner> {
        for kind in JobKind::ALL {
            if !self.runners.contains_key(&kind) {
                return Err(MissingRunner(kind));
            }
        }
        Ok(JobRegistry {
            runners: Arc::new(self.runners),
        })
    }
}

/// A [`JobKind`] had no runner registered at construction time.
#[derive(Debug, thiserror::Error)]
#[error("no runner registered for job kind '{0}'")]
pub struct MissingRunner(pub JobKind);

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopRunner;

    #[async_trait]
    impl JobRunner for NoopRunner {
        async fn run(&self, payload: Value) -> anyhow::Result<Value> {
            Ok(payload)
        }
    }

    #[test]
    fn registry_requires_every_kind() {
        let err = JobRegistry::builder()
            .register(JobKind::StreamSources, Arc::new(NoopRunner))
            .build()
            .unwrap_err();
        assert_eq!(err.0, JobKind::SourceProbe);
    }

    #[test]
    fn complete_registry_resolves_all_kinds() {
        let registry = JobRegistry::builder()
            .register(JobKind::StreamSources, Arc::new(NoopRunner))
            .register(JobKind::SourceProbe, Arc::new(NoopRunner))
            .build()
            .expect("complete registry");
        for kind in JobKind::ALL {
            let _ = registry.runner_for(kind);
        }
    }
}
