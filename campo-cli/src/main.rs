use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod db;
mod engine;

use commands::{
    ConfigCommand, DeleteCommand, FetchCommand, SaveCommand, StatusCommand, SyncCommand,
    UpdateCommand,
};
use config::Config;
use engine::OpenOptions;

#[derive(Parser)]
#[command(name = "campo")]
#[command(version)]
#[command(about = "Offline-first record entry for farm operations", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Do not contact the sync server; queue every write
    #[arg(long, global = true)]
    offline: bool,

    /// Workspace (farm) to operate on, overriding the config
    #[arg(long, short, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a record
    Save(SaveCommand),

    /// Change fields of a record
    Update(UpdateCommand),

    /// Delete a record
    Delete(DeleteCommand),

    /// List the records of a table
    Fetch(FetchCommand),

    /// Show connectivity and pending mutations
    Status(StatusCommand),

    /// Replay pending mutations
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "campo_core=warn,campo_cli=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.clone())?;

    let command = match &cli.command {
        Some(Commands::Config(cmd)) => return cmd.run(&config),
        Some(command) => command,
        None => {
            println!("Use --help to see available commands");
            return Ok(());
        }
    };

    let options = OpenOptions {
        offline: cli.offline,
        workspace: cli.workspace.clone(),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let session = engine::open(&config, &options).await?;
        let repo = &session.repo;
        match command {
            Commands::Save(cmd) => cmd.run(repo).await?,
            Commands::Update(cmd) => cmd.run(repo).await?,
            Commands::Delete(cmd) => cmd.run(repo).await?,
            Commands::Fetch(cmd) => cmd.run(repo).await?,
            Commands::Status(cmd) => cmd.run(repo, &config).await?,
            Commands::Sync(cmd) => cmd.run(&session).await?,
            Commands::Config(_) => {}
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
