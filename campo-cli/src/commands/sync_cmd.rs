//! Sync CLI command for replaying queued mutations.

use campo_core::{EngineError, SyncEvent, SyncRepository};
use clap::Args;
use tokio::sync::broadcast::error::RecvError;

use crate::engine::Session;

/// Replay queued mutations against the remote store
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Keep running the sync worker until interrupted (Ctrl-C)
    #[arg(long, short)]
    watch: bool,
}

impl SyncCommand {
    pub async fn run(&self, session: &Session) -> Result<(), SyncCommandError> {
        if self.watch {
            self.watch(session).await
        } else {
            self.drain(&session.repo).await
        }
    }

    async fn drain(&self, repo: &SyncRepository) -> Result<(), SyncCommandError> {
        let pending = repo.pending_count().await;
        if pending == 0 {
            println!("Nothing to sync.");
            return Ok(());
        }
        if !repo.is_online() {
            println!("Offline: {} mutation(s) pending.", pending);
            return Ok(());
        }

        println!("Syncing {} pending mutation(s)...", pending);
        let mut events = repo.subscribe();
        let report = repo.drain().await?;
        print_events(&mut events);

        println!();
        println!(
            "Replayed: {}, dropped: {}, still pending: {}",
            report.replayed, report.dropped, report.remaining
        );
        Ok(())
    }

    async fn watch(&self, session: &Session) -> Result<(), SyncCommandError> {
        let repo = &session.repo;
        let _probe = if session.offline {
            None
        } else {
            Some(
                repo.connectivity()
                    .spawn_probe(session.gateway.clone(), repo.config().probe_interval),
            )
        };

        let mut events = repo.subscribe();
        let worker = repo.start_worker()?;
        println!(
            "Sync worker running every {}s ({} pending). Press Ctrl-C to stop.",
            repo.config().drain_interval.as_secs(),
            repo.pending_count().await
        );

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        loop {
            tokio::select! {
                _ = &mut ctrl_c => break,
                event = events.recv() => match event {
                    Ok(event) => print_event(&event),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
            }
        }

        worker.stop().await;
        println!("Stopped. {} mutation(s) pending.", repo.pending_count().await);
        Ok(())
    }
}

fn print_events(events: &mut tokio::sync::broadcast::Receiver<SyncEvent>) {
    while let Ok(event) = events.try_recv() {
        print_event(&event);
    }
}

fn print_event(event: &SyncEvent) {
    match event {
        SyncEvent::Replayed {
            mutation_id,
            table,
            action,
        } => println!("  ✓ {} {} ({})", action, table, mutation_id),
        SyncEvent::ReplayDeferred {
            table,
            attempts,
            retry_at,
            error,
            ..
        } => println!(
            "  … {} attempt {} failed, retrying at {}: {}",
            table,
            attempts,
            retry_at.format("%H:%M:%S"),
            error
        ),
        SyncEvent::ReplayDropped { mutation, error } => {
            println!("  ✗ {} dropped: {}", mutation, error)
        }
        SyncEvent::ConnectivityChanged { online } => {
            println!("  {}", if *online { "online" } else { "offline" })
        }
        SyncEvent::TableChanged { .. } | SyncEvent::QueueChanged { .. } => {}
    }
}

/// Errors from sync commands
#[derive(Debug)]
pub enum SyncCommandError {
    Engine(EngineError),
}

impl std::fmt::Display for SyncCommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncCommandError::Engine(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SyncCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncCommandError::Engine(e) => Some(e),
        }
    }
}

impl From<EngineError> for SyncCommandError {
    fn from(e: EngineError) -> Self {
        SyncCommandError::Engine(e)
    }
}
