mod config_cmd;
mod record;
mod status;
mod sync_cmd;

use clap::ValueEnum;

pub use config_cmd::ConfigCommand;
pub use record::{DeleteCommand, FetchCommand, SaveCommand, UpdateCommand};
pub use status::StatusCommand;
pub use sync_cmd::SyncCommand;

#[derive(Debug, Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
