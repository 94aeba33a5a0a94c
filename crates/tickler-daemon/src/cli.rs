use clap::{Parser, Subcommand};
use serde_json::Value;
use tickler_core::TicklerError;

#[derive(Debug, Parser)]
#[command(name = "tickler")]
#[command(about = "Persistent date-ordered job scheduler", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: $TICKLER_CONFIG, then ~/.tickler/tickler.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the scheduler until Ctrl-C
    Run,
    /// Schedule a job
    Add {
        /// Handler name
        #[arg(long)]
        name: String,
        /// Due date: RFC 3339 or milliseconds since the Unix epoch
        #[arg(long)]
        at: String,
        /// JSON payload handed to the handler
        #[arg(long)]
        data: Option<String>,
    },
    /// Delete pending jobs
    Cancel {
        /// Handler name
        #[arg(long)]
        name: String,
        /// Only jobs whose payload contains these JSON fields
        #[arg(long)]
        data: Option<String>,
    },
    /// Show pending jobs in due order
    List {
        /// Handler name
        #[arg(long)]
        name: Option<String>,
    },
}

/// Parse a `--data` argument; absent means JSON `null`.
pub fn parse_data(raw: Option<&str>) -> Result<Value, TicklerError> {
    match raw {
        None => Ok(Value::Null),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| TicklerError::InvalidArgument(format!("--data is not JSON: {e}"))),
    }
}
