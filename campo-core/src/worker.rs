//! Sync worker.
//!
//! Replays queued mutations against the remote store, one per tick, oldest
//! first. A tick does nothing while offline, without an active workspace, or
//! when the queue is empty. Every tick goes through the drain gate, so timer
//! ticks and manual drains never overlap.

use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::events::SyncEvent;
use crate::repository::{Engine, SyncRepository};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Another drain holds the gate.
    Busy,
    Offline,
    NoContext,
    /// The queue is empty.
    Idle,
    /// The head is backing off after a retryable failure.
    Waiting,
    Replayed,
    Deferred,
    Dropped,
}

/// Totals of a [`SyncRepository::drain`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub replayed: usize,
    pub dropped: usize,
    pub deferred: usize,
    pub remaining: usize,
}

enum WorkerCommand {
    Wake,
    Stop,
}

/// Handle to a running worker task. Dropping it stops the worker.
pub struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    /// Runs a tick now instead of waiting for the timer.
    pub fn wake(&self) {
        // A full channel already has a wake-up pending.
        let _ = self.commands.try_send(WorkerCommand::Wake);
    }

    /// Stops the worker and waits for the current tick to finish.
    pub async fn stop(self) {
        let _ = self.commands.send(WorkerCommand::Stop).await;
        let _ = self.task.await;
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl SyncRepository {
    /// Replays at most one queued mutation.
    pub async fn drain_once(&self) -> Result<TickOutcome, EngineError> {
        let engine = &self.inner;
        let Ok(_gate) = engine.drain_gate.try_lock() else {
            return Ok(TickOutcome::Busy);
        };
        if !engine.connectivity.is_online() {
            return Ok(TickOutcome::Offline);
        }
        if engine.context.current().is_none() {
            return Ok(TickOutcome::NoContext);
        }

        let head = engine.queue.lock().await.peek_head().cloned();
        let Some(head) = head else {
            return Ok(TickOutcome::Idle);
        };
        if head.not_before.is_some_and(|at| at > Utc::now()) {
            return Ok(TickOutcome::Waiting);
        }

        let payload = engine
            .resolve_payload(&head.workspace, &head.table, &head.payload)
            .await;
        let attempts = head.attempts.saturating_add(1);
        match engine.dispatch(&head.workspace, &head.table, &payload).await {
            Ok(stored) => {
                let pending = engine.dequeue(head.id).await?;
                engine
                    .confirm(&head.workspace, &head.table, &head.id_field, &payload, stored, None)
                    .await?;
                info!(mutation_id = %head.id, mutation = %head, pending, "Replayed queued mutation");
                engine.emit(SyncEvent::Replayed {
                    mutation_id: head.id,
                    table: head.table.clone(),
                    action: head.action(),
                });
                Ok(TickOutcome::Replayed)
            }
            Err(err) => match engine.config.retry.next_delay(attempts, &err) {
                Some(delay) => {
                    let retry_at = engine.config.retry.retry_at(Utc::now(), delay);
                    engine
                        .queue
                        .lock()
                        .await
                        .defer_head(head.id, attempts, retry_at)
                        .await?;
                    warn!(
                        mutation_id = %head.id,
                        mutation = %head,
                        attempts,
                        retry_at = %retry_at,
                        error = %err,
                        "Replay failed, will retry"
                    );
                    engine.emit(SyncEvent::ReplayDeferred {
                        mutation_id: head.id,
                        table: head.table.clone(),
                        attempts,
                        retry_at,
                        error: err.to_string(),
                    });
                    Ok(TickOutcome::Deferred)
                }
                None => {
                    engine.dequeue(head.id).await?;
                    warn!(
                        mutation_id = %head.id,
                        mutation = %head,
                        attempts,
                        error = %err,
                        "Dropping queued mutation after failed replay"
                    );
                    engine.emit(SyncEvent::ReplayDropped {
                        mutation: head,
                        error: err.to_string(),
                    });
                    Ok(TickOutcome::Dropped)
                }
            },
        }
    }

    /// Replays queued mutations until the queue is empty or a tick cannot
    /// make progress.
    pub async fn drain(&self) -> Result<DrainReport, EngineError> {
        let mut report = DrainReport::default();
        loop {
            match self.drain_once().await? {
                TickOutcome::Replayed => report.replayed += 1,
                TickOutcome::Dropped => report.dropped += 1,
                TickOutcome::Deferred => {
                    report.deferred += 1;
                    break;
                }
                _ => break,
            }
        }
        report.remaining = self.pending_count().await;
        Ok(report)
    }

    /// Starts the background worker.
    ///
    /// It ticks every `drain_interval`, and immediately when connectivity
    /// comes back. Only one worker may run per repository.
    pub fn start_worker(&self) -> Result<WorkerHandle, EngineError> {
        if self.inner.worker_running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::WorkerAlreadyRunning);
        }
        let (tx, rx) = mpsc::channel(8);
        let repo = self.clone();
        let task = tokio::spawn(async move {
            let _running = RunningGuard(repo.inner.clone());
            run(repo, rx).await;
        });
        Ok(WorkerHandle { commands: tx, task })
    }

    async fn tick(&self) {
        match self.drain_once().await {
            Ok(outcome) => debug!(?outcome, "Sync tick"),
            Err(e) => error!(error = %e, "Sync tick failed"),
        }
    }
}

impl Engine {
    async fn dequeue(&self, mutation_id: uuid::Uuid) -> Result<usize, EngineError> {
        let pending = {
            let mut queue = self.queue.lock().await;
            queue.dequeue_if(mutation_id).await?;
            queue.len()
        };
        self.emit(SyncEvent::QueueChanged { pending });
        Ok(pending)
    }
}

struct RunningGuard(Arc<Engine>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.worker_running.store(false, Ordering::SeqCst);
    }
}

async fn run(repo: SyncRepository, mut commands: mpsc::Receiver<WorkerCommand>) {
    let mut ticker = tokio::time::interval(repo.inner.config.drain_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut online = repo.inner.connectivity.subscribe();
    info!(
        interval_ms = repo.inner.config.drain_interval.as_millis() as u64,
        "Sync worker started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => repo.tick().await,
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                let is_online = *online.borrow_and_update();
                repo.inner.emit(SyncEvent::ConnectivityChanged { online: is_online });
                if is_online {
                    repo.tick().await;
                    ticker.reset();
                }
            }
            command = commands.recv() => match command {
                Some(WorkerCommand::Wake) => repo.tick().await,
                Some(WorkerCommand::Stop) | None => break,
            },
        }
    }
    info!("Sync worker stopped");
}
