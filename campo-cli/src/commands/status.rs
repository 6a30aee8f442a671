use campo_core::{MutationRecord, SyncRepository};
use clap::Args;
use serde::Serialize;

use super::OutputFormat;
use crate::config::Config;

/// Show connectivity, workspace and pending mutations
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    online: bool,
    server_url: Option<&'a str>,
    workspace: Option<String>,
    pending: usize,
    queue: Vec<MutationRecord>,
}

impl StatusCommand {
    pub async fn run(
        &self,
        repo: &SyncRepository,
        config: &Config,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let queue = repo.pending().await;
        let report = StatusReport {
            online: repo.is_online(),
            server_url: config.sync.server_url.as_deref(),
            workspace: repo.workspace().map(|ws| ws.to_string()),
            pending: queue.len(),
            queue,
        };

        match self.format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
            OutputFormat::Text => {
                println!("Sync Status");
                println!("===========");
                println!();
                println!(
                    "Server:    {}",
                    report.server_url.unwrap_or("(not configured)")
                );
                println!(
                    "Status:    {}",
                    if report.online { "online" } else { "offline" }
                );
                println!(
                    "Workspace: {}",
                    report.workspace.as_deref().unwrap_or("(none)")
                );
                println!("Pending:   {}", report.pending);

                if !report.queue.is_empty() {
                    println!();
                    for mutation in &report.queue {
                        let retry = match mutation.not_before {
                            Some(at) => format!(
                                " (attempt {}, retry after {})",
                                mutation.attempts,
                                at.format("%Y-%m-%d %H:%M:%S")
                            ),
                            None => String::new(),
                        };
                        println!(
                            "  {}  {}  queued {}{}",
                            mutation.id,
                            mutation,
                            mutation.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
                            retry
                        );
                    }
                }
            }
        }
        Ok(())
    }
}
