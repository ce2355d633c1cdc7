//! One-shot worker spawner for fire-and-forget jobs.
//!
//! Unlike the pool, each call starts a fresh worker unit seeded with the
//! job's initial data and discards it after settlement. The caller receives
//! exactly one terminal outcome no matter which of the unit's terminal
//! events (result message, error, exit) fires first.

use std::fmt;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{TaskError, TaskResult};
use crate::job::{JobKind, JobRegistry, TaskId};

pub struct Spawner {
    registry: JobRegistry,
    deadline: Duration,
}

impl fmt::Debug for Spawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawner")
            .field("registry", &self.registry)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Spawner {
    pub fn new(registry: JobRegistry, deadline: Duration) -> Self {
        Self { registry, deadline }
    }

    /// Run one job on a fresh, never-reused worker unit.
    ///
    /// The unit is expected to message exactly once before exiting; an exit
    /// without a message settles as a failure, and expiry of the deadline
    /// forcibly terminates the unit.
    pub async fn spawn(&self, kind: JobKind, initial: Value) -> TaskResult<Value> {
        let task_id = TaskId::new();
        trace!(task = %task_id, %kind, "spawning one-shot worker");

        let runner = self.registry.runner_for(kind);
        let (events_tx, events_rx) = mpsc::channel(1);
        let unit = tokio::spawn(async move {
            let outcome = runner.run(initial).await;
            let _ = events_tx.send(outcome).await;
        });

        let result = await_outcome(events_rx, unit, self.deadline).await;
        match &result {
            Ok(_) => trace!(task = %task_id, %kind, "one-shot worker settled"),
            Err(err) => debug!(task = %task_id, %kind, error = %err, "one-shot worker failed"),
        }
        result
    }
}

/// Race the unit's terminal events and settle exactly once.
///
/// First event wins: a result message or error message settles directly; the
/// event channel closing without a message means the unit exited, classified
/// by how it stopped; deadline expiry terminates the unit. Everything after
/// the first settlement is discarded along with the unit.
async fn await_outcome(
    mut events: mpsc::Receiver<anyhow::Result<Value>>,
    unit: JoinHandle<()>,
    deadline: Duration,
) -> TaskResult<Value> {
    let result = tokio::select! {
        event = events.recv() => match event {
            Some(Ok(value)) => Ok(value),
            Some(Err(err)) => Err(TaskError::Runner(format!("{err:#}"))),
            None => {
                return match unit.await {
                    Ok(()) => Err(TaskError::Runner(
                        "worker exited without reporting a result".into(),
                    )),
                    Err(err) if err.is_panic() => {
                        Err(TaskError::WorkerCrashed("worker panicked".into()))
                    }
                    Err(_) => Err(TaskError::WorkerCrashed("worker was cancelled".into())),
                };
            }
        },
        _ = tokio::time::sleep(deadline) => Err(TaskError::DeadlineExceeded(deadline)),
    };
    unit.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobRunner, JobRegistry};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::time::sleep;

    struct EchoRunner;

    #[async_trait]
    impl JobRunner for EchoRunner {
        async fn run(&self, payload: Value) -> anyhow::Result<Value> {
            match payload.get("op").and_then(Value::as_str) {
                Some("fail") => Err(anyhow::anyhow!("scripted failure")),
                Some("boom") => panic!("scripted panic"),
                Some("hang") => {
                    sleep(Duration::from_secs(60)).await;
                    Ok(Value::Null)
                }
                _ => Ok(payload),
            }
        }
    }

    fn spawner(deadline: Duration) -> Spawner {
        let registry = JobRegistry::builder()
            .register(JobKind::StreamSources, Arc::new(EchoRunner))
            .register(JobKind::SourceProbe, Arc::new(EchoRunner))
            .build()
            .expect("complete registry");
        Spawner::new(registry, deadline)
    }

    #[tokio::test]
    async fn settles_with_the_result_message() {
        let spawner = spawner(Duration::from_secs(5));
        let value = spawner
            .spawn(JobKind::SourceProbe, json!({"tag": "one"}))
            .await
            .expect("job succeeds");
        assert_eq!(value["tag"], "one");
    }

    #[tokio::test]
    async fn runner_error_settles_as_failure() {
        let spawner = spawner(Duration::from_secs(5));
        let error = spawner
            .spawn(JobKind::SourceProbe, json!({"op": "fail"}))
            .await
            .expect_err("runner error surfaces");
        assert!(matches!(error, TaskError::Runner(_)));
    }

    #[tokio::test]
    async fn panicking_worker_settles_as_crash() {
        let spawner = spawner(Duration::from_secs(5));
        let error = spawner
            .spawn(JobKind::SourceProbe, json!({"op": "boom"}))
            .await
            .expect_err("panic surfaces as crash");
        assert!(matches!(error, TaskError::WorkerCrashed(_)));
    }

    #[tokio::test]
    async fn hung_worker_is_terminated_at_the_deadline() {
        let spawner = spawner(Duration::from_millis(80));
        let error = spawner
            .spawn(JobKind::SourceProbe, json!({"op": "hang"}))
            .await
            .expect_err("deadline fires");
        assert!(matches!(error, TaskError::DeadlineExceeded(_)));
    }

    // The buggy-worker cases below drive `await_outcome` directly with
    // hand-built units so all three terminal events can be made to fire.

    #[tokio::test]
    async fn message_then_panic_settles_exactly_once_with_the_message() {
        let (tx, rx) = mpsc::channel(1);
        let unit = tokio::spawn(async move {
            tx.send(Ok(json!({"winner": true}))).await.expect("send");
            panic!("buggy worker panics after messaging");
        });

        let value = await_outcome(rx, unit, Duration::from_secs(5))
            .await
            .expect("first event wins");
        assert_eq!(value["winner"], true);
    }

    #[tokio::test]
    async fn clean_exit_without_message_is_a_generic_failure() {
        let (tx, rx) = mpsc::channel::<anyhow::Result<Value>>(1);
        let unit = tokio::spawn(async move {
            drop(tx);
        });

        let error = await_outcome(rx, unit, Duration::from_secs(5))
            .await
            .expect_err("silent exit is a failure");
        assert!(
            matches!(&error, TaskError::Runner(msg) if msg.contains("without reporting")),
            "unexpected error: {error:?}"
        );
    }

    #[tokio::test]
    async fn double_message_settles_with_the_first() {
        let (tx, rx) = mpsc::channel(1);
        let unit = tokio::spawn(async move {
            tx.send(Ok(json!({"n": 1}))).await.expect("first send");
            let _ = tx.send(Ok(json!({"n": 2}))).await;
        });

        let value = await_outcome(rx, unit, Duration::from_secs(5))
            .await
            .expect("settles once");
        assert_eq!(value["n"], 1);
    }
}
