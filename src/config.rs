//! Configuration and CLI argument handling

use std::{num::NonZeroU32, path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::client::ControlAction;

/// CLI argument parsing structure
#[derive(Parser, Debug)]
#[command(name = "timer-sync")]
#[command(about = "Authoritative shared countdown/count-up timers for live overlays")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Config {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Server options, used when no subcommand is given
    #[command(flatten)]
    pub serve: ServeArgs,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the timer server (default)
    Serve(ServeArgs),
    /// Render a channel's timer in the terminal
    Watch(WatchArgs),
    /// Send one control operation to a channel
    Control(ControlArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the server to
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// SQLite database file
    #[arg(long, env = "DB_PATH", default_value = "data/timer.db")]
    pub db_path: PathBuf,

    /// Interval between sync broadcasts of a running timer, in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(10..))]
    pub sync_interval_ms: u64,

    /// Days a stopped, untouched timer is kept before the cleanup deletes it
    #[arg(long, env = "TIMER_MAX_AGE_DAYS", default_value_t = 30)]
    pub retention_days: u64,

    /// Hours between stale timer sweeps
    #[arg(long, default_value_t = 24, value_parser = clap::value_parser!(u64).range(1..))]
    pub cleanup_interval_hours: u64,

    /// Control events per second, per event kind, per session
    #[arg(long, default_value = "10")]
    pub rate_limit: NonZeroU32,

    /// Allowed CORS origins, comma separated (permissive when empty)
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// WebSocket endpoint of the server
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    pub url: String,

    /// Channel to watch
    #[arg(short, long)]
    pub channel: String,

    /// Frame interval in milliseconds
    #[arg(long, default_value_t = 16, value_parser = clap::value_parser!(u64).range(1..))]
    pub frame_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ControlArgs {
    /// WebSocket endpoint of the server
    #[arg(long, default_value = "ws://127.0.0.1:3000/ws")]
    pub url: String,

    /// Channel to operate on
    #[arg(short, long)]
    pub channel: String,

    #[command(subcommand)]
    pub action: ControlAction,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// The command to run, `serve` when none was given
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Serve(self.serve.clone()))
    }

    /// Get the appropriate log level based on verbose flag
    pub fn log_level(&self) -> &'static str {
        if self.verbose { "debug" } else { "info" }
    }
}

impl ServeArgs {
    /// Get the server address as a formatted string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 86_400)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_hours * 3_600)
    }
}

impl WatchArgs {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_ms)
    }
}
