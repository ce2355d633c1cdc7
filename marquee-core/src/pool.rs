//! Persistent scraping worker pool.
//!
//! A fixed roster of N isolated worker units executes one task at a time
//! each, with a FIFO backlog for overflow, a per-task deadline enforced by
//! forced termination, and unconditional replacement of crashed or
//! terminated units. All bookkeeping (busy flags, backlog, roster) is owned
//! by a single supervisor task and mutated only there; commands and worker
//! outcomes arrive as messages, so none of this state needs a lock.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace, warn};

use crate::config::PoolConfig;
use crate::error::{TaskError, TaskResult};
use crate::job::{JobRunner, TaskId};

/// Handle to the pool. Cheap to clone via `Arc`; dropping every handle shuts
/// the supervisor down.
pub struct WorkerPool {
    commands: mpsc::Sender<PoolCommand>,
    shutdown: CancellationToken,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("closed", &self.commands.is_closed())
            .field("shutdown_cancelled", &self.shutdown.is_cancelled())
            .finish()
    }
}

/// Point-in-time view of pool health, served by `/health` and used in tests.
#[derive(Clone, Debug, Serialize)]
pub struct PoolSnapshot {
    pub size: usize,
    pub busy: usize,
    pub queued: usize,
    pub completed: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub crashed: u64,
    pub respawned: u64,
    pub started_at: DateTime<Utc>,
}

enum PoolCommand {
    Run(Task),
    Snapshot(oneshot::Sender<PoolSnapshot>),
}

struct Task {
    id: TaskId,
    payload: Value,
    reply: oneshot::Sender<TaskResult<Value>>,
}

struct QueuedTask {
    task: Task,
    wait_watchdog: Option<AbortHandle>,
}

struct WorkerJob {
    seq: u64,
    task_id: TaskId,
    payload: Value,
}

enum WorkerEvent {
    Finished {
        worker: usize,
        seq: u64,
        outcome: anyhow::Result<Value>,
    },
    DeadlineExpired {
        worker: usize,
        seq: u64,
    },
    QueueWaitExpired {
        task_id: TaskId,
    },
    Exited {
        worker: usize,
        generation: u64,
        panicked: bool,
    },
}

/// Terminal outcome of an assigned task, funneled through one settle path so
/// the post-terminal backlog drain can never be skipped for an outcome arm.
enum TaskOutcome {
    Completed(Value),
    Failed(String),
    TimedOut,
}

struct ActiveTask {
    seq: u64,
    id: TaskId,
    reply: oneshot::Sender<TaskResult<Value>>,
    watchdog: AbortHandle,
}

struct WorkerSlot {
    generation: u64,
    jobs: mpsc::Sender<WorkerJob>,
    abort: AbortHandle,
    active: Option<ActiveTask>,
}

impl WorkerPool {
    /// Spawn N worker units eagerly and start the supervisor.
    pub fn new(config: PoolConfig, runner: Arc<dyn JobRunner>) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(1024);
        let (events_tx, events_rx) = mpsc::channel(1024);
        let shutdown = CancellationToken::new();

        let size = config.size.max(1);
        let mut slots = Vec::with_capacity(size);
        for id in 0..size {
            let generation = id as u64;
            let (jobs, abort) = spawn_worker(id, generation, Arc::clone(&runner), &events_tx);
            slots.push(WorkerSlot {
                generation,
                jobs,
                abort,
                active: None,
            });
        }
        info!(size, "started scraping worker pool");

        let supervisor = Supervisor {
            config,
            runner,
            slots,
            backlog: VecDeque::new(),
            events_tx,
            next_seq: 0,
            next_generation: size as u64,
            counters: Counters::default(),
            started_at: Utc::now(),
        };
        let handle = tokio::spawn(supervisor.run(commands_rx, events_rx, shutdown.clone()));

        Self {
            commands: commands_tx,
            shutdown,
            supervisor: Mutex::new(Some(handle)),
        }
    }

    /// Submit a task and suspend until it settles.
    ///
    /// Dispatches immediately when a unit is idle, otherwise queues; the
    /// returned future settles with exactly one terminal outcome.
    pub async fn run_task(&self, payload: Value) -> TaskResult<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let task = Task {
            id: TaskId::new(),
            payload,
            reply: reply_tx,
        };
        self.commands
            .send(PoolCommand::Run(task))
            .await
            .map_err(|_| TaskError::PoolClosed)?;
        reply_rx.await.map_err(|_| TaskError::PoolClosed)?
    }

    pub async fn snapshot(&self) -> TaskResult<PoolSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(PoolCommand::Snapshot(tx))
            .await
            .map_err(|_| TaskError::PoolClosed)?;
        rx.await.map_err(|_| TaskError::PoolClosed)
    }

    /// Stop accepting work, settle every pending task as [`TaskError::PoolClosed`],
    /// and terminate the worker units.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let handle = self.supervisor.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                warn!("pool supervisor ended abnormally during shutdown: {err}");
            }
        }
    }
}

fn spawn_worker(
    id: usize,
    generation: u64,
    runner: Arc<dyn JobRunner>,
    events_tx: &mpsc::Sender<WorkerEvent>,
) -> (mpsc::Sender<WorkerJob>, AbortHandle) {
    // Capacity 1: the supervisor only hands jobs to idle units, so at most
    // one message is ever in flight per worker.
    let (jobs_tx, mut jobs_rx) = mpsc::channel::<WorkerJob>(1);

    let events = events_tx.clone();
    let join = tokio::spawn(async move {
        while let Some(job) = jobs_rx.recv().await {
            trace!(worker = id, task = %job.task_id, "worker picked up task");
            let outcome = runner.run(job.payload).await;
            if events
                .send(WorkerEvent::Finished {
                    worker: id,
                    seq: job.seq,
                    outcome,
                })
                .await
                .is_err()
            {
                break;
            }
        }
    });
    let abort = join.abort_handle();

    // Exit monitor: turns the unit's termination into an event the
    // supervisor can classify. Deliberate terminations are filtered out by
    // generation.
    let monitor_events = events_tx.clone();
    tokio::spawn(async move {
        let panicked = match join.await {
            Ok(()) => false,
            Err(err) => err.is_panic(),
        };
        let _ = monitor_events
            .send(WorkerEvent::Exited {
                worker: id,
                generation,
                panicked,
            })
            .await;
    });

    (jobs_tx, abort)
}

#[derive(Default)]
struct Counters {
    completed: u64,
    failed: u64,
    timed_out: u64,
    crashed: u64,
    respawned: u64,
}

struct Supervisor {
    config: PoolConfig,
    runner: Arc<dyn JobRunner>,
    slots: Vec<WorkerSlot>,
    backlog: VecDeque<QueuedTask>,
    events_tx: mpsc::Sender<WorkerEvent>,
    next_seq: u64,
    next_generation: u64,
    counters: Counters,
    started_at: DateTime<Utc>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<PoolCommand>,
        mut events: mpsc::Receiver<WorkerEvent>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                // The supervisor holds an events sender for watchdogs, so
                // this channel can never yield `None` here.
                Some(event) = events.recv() => self.handle_event(event),
                command = commands.recv() => match command {
                    Some(PoolCommand::Run(task)) => self.submit(task),
                    Some(PoolCommand::Snapshot(reply)) => {
                        let _ = reply.send(self.snapshot());
                    }
                    None => break,
                },
            }
        }
        self.settle_all_closed();
    }

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::Finished {
                worker,
                seq,
                outcome,
            } => {
                let outcome = match outcome {
                    Ok(value) => TaskOutcome::Completed(value),
                    Err(err) => TaskOutcome::Failed(format!("{err:#}")),
                };
                self.settle(worker, seq, outcome);
            }
            WorkerEvent::DeadlineExpired { worker, seq } => {
                self.settle(worker, seq, TaskOutcome::TimedOut);
            }
            WorkerEvent::QueueWaitExpired { task_id } => self.expire_queued(task_id),
            WorkerEvent::Exited {
                worker,
                generation,
                panicked,
            } => self.handle_exit(worker, generation, panicked),
        }
    }

    fn submit(&mut self, task: Task) {
        match self.idle_worker() {
            Some(worker) => self.assign(worker, task),
            None => {
                let wait_watchdog = self.config.max_queue_wait().map(|wait| {
                    let events = self.events_tx.clone();
                    let task_id = task.id;
                    tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        let _ = events.send(WorkerEvent::QueueWaitExpired { task_id }).await;
                    })
                    .abort_handle()
                });
                trace!(task = %task.id, depth = self.backlog.len() + 1, "no idle worker, task queued");
                self.backlog.push_back(QueuedTask {
                    task,
                    wait_watchdog,
                });
            }
        }
    }

    /// First idle unit wins; no ordering is promised among idle units.
    fn idle_worker(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.active.is_none())
    }

    fn assign(&mut self, worker: usize, task: Task) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let permit = match self.slots[worker].jobs.try_reserve() {
            Ok(permit) => permit,
            Err(_) => {
                // The unit is mid-replacement; keep FIFO order and retry on
                // the next drain.
                self.backlog.push_front(QueuedTask {
                    task,
                    wait_watchdog: None,
                });
                return;
            }
        };

        // The deadline clock starts now, at dispatch, not at enqueue.
        let deadline = self.config.task_deadline();
        let events = self.events_tx.clone();
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = events.send(WorkerEvent::DeadlineExpired { worker, seq }).await;
        })
        .abort_handle();

        trace!(worker, task = %task.id, "task assigned");
        permit.send(WorkerJob {
            seq,
            task_id: task.id,
            payload: task.payload,
        });
        self.slots[worker].active = Some(ActiveTask {
            seq,
            id: task.id,
            reply: task.reply,
            watchdog,
        });
    }

    /// Settle the task bound to `worker` and then, unconditionally, hand the
    /// unit the next queued task. Runs for every terminal outcome; skipping
    /// the drain for any arm would starve queued callers forever.
    fn settle(&mut self, worker: usize, seq: u64, outcome: TaskOutcome) {
        let Some(active) = self.slots[worker].active.take() else {
            return;
        };
        if active.seq != seq {
            // Stale timer or a late message from a replaced unit.
            self.slots[worker].active = Some(active);
            return;
        }
        active.watchdog.abort();

        let result = match outcome {
            TaskOutcome::Completed(value) => {
                self.counters.completed += 1;
                trace!(worker, task = %active.id, "task completed");
                Ok(value)
            }
            TaskOutcome::Failed(message) => {
                self.counters.failed += 1;
                trace!(worker, task = %active.id, error = %message, "task failed");
                Err(TaskError::Runner(message))
            }
            TaskOutcome::TimedOut => {
                self.counters.timed_out += 1;
                warn!(worker, task = %active.id, "task deadline expired, terminating worker");
                self.replace_worker(worker);
                Err(TaskError::DeadlineExceeded(self.config.task_deadline()))
            }
        };
        if active.reply.send(result).is_err() {
            trace!(task = %active.id, "caller dropped before settlement");
        }

        self.drain(worker);
    }

    /// Forcibly terminate the unit in `worker`'s slot and spawn a fresh one.
    fn replace_worker(&mut self, worker: usize) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.counters.respawned += 1;

        let (jobs, abort) = spawn_worker(
            worker,
            generation,
            Arc::clone(&self.runner),
            &self.events_tx,
        );
        let slot = &mut self.slots[worker];
        // New generation first: the old unit's exit event must read as stale.
        slot.generation = generation;
        slot.abort.abort();
        slot.jobs = jobs;
        slot.abort = abort;
    }

    fn handle_exit(&mut self, worker: usize, generation: u64, panicked: bool) {
        if self.slots[worker].generation != generation {
            // Deliberate termination; the slot was already replaced.
            return;
        }
        warn!(worker, panicked, "worker exited unexpectedly, respawning");
        if let Some(active) = self.slots[worker].active.take() {
            active.watchdog.abort();
            self.counters.crashed += 1;
            let message = if panicked {
                "worker panicked"
            } else {
                "worker stopped unexpectedly"
            };
            if active
                .reply
                .send(Err(TaskError::WorkerCrashed(message.into())))
                .is_err()
            {
                trace!(task = %active.id, "caller dropped before settlement");
            }
        }
        self.replace_worker(worker);
        self.drain(worker);
    }

    fn drain(&mut self, worker: usize) {
        if self.slots[worker].active.is_some() {
            return;
        }
        if let Some(queued) = self.backlog.pop_front() {
            if let Some(watchdog) = queued.wait_watchdog {
                watchdog.abort();
            }
            self.assign(worker, queued.task);
        }
    }

    /// A task outlived the configured backlog bound without ever being
    /// dispatched.
    fn expire_queued(&mut self, task_id: TaskId) {
        let Some(wait) = self.config.max_queue_wait() else {
            return;
        };
        if let Some(position) = self.backlog.iter().position(|queued| queued.task.id == task_id)
            && let Some(queued) = self.backlog.remove(position)
        {
            self.counters.timed_out += 1;
            warn!(task = %task_id, "task expired in backlog");
            let _ = queued.task.reply.send(Err(TaskError::DeadlineExceeded(wait)));
        }
    }

    fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            size: self.slots.len(),
            busy: self
                .slots
                .iter()
                .filter(|slot| slot.active.is_some())
                .count(),
            queued: self.backlog.len(),
            completed: self.counters.completed,
            failed: self.counters.failed,
            timed_out: self.counters.timed_out,
            crashed: self.counters.crashed,
            respawned: self.counters.respawned,
            started_at: self.started_at,
        }
    }

    fn settle_all_closed(&mut self) {
        info!(
            queued = self.backlog.len(),
            "worker pool shutting down"
        );
        while let Some(queued) = self.backlog.pop_front() {
            if let Some(watchdog) = queued.wait_watchdog {
                watchdog.abort();
            }
            let _ = queued.task.reply.send(Err(TaskError::PoolClosed));
        }
        for slot in &mut self.slots {
            if let Some(active) = slot.active.take() {
                active.watchdog.abort();
                let _ = active.reply.send(Err(TaskError::PoolClosed));
            }
            slot.abort.abort();
        }
    }
}
