//! Command-line interface for hun.
use clap::{Parser, Subcommand};
use std::str::FromStr;
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels by name.
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let level = match value.trim().to_ascii_lowercase().as_str() {
            "off" => LevelFilter::OFF,
            "error" => LevelFilter::ERROR,
            "warn" | "warning" => LevelFilter::WARN,
            "info" => LevelFilter::INFO,
            "debug" => LevelFilter::DEBUG,
            "trace" => LevelFilter::TRACE,
            other => return Err(format!("invalid log level '{other}'")),
        };
        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for hun.
#[derive(Parser)]
#[command(name = "hun", version, author)]
#[command(about = "A developer workstation service supervisor", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for hun.
#[derive(Subcommand)]
pub enum Commands {
    /// Register the project in the current directory.
    Init,

    /// Register the project at the given path.
    Add {
        /// Directory containing a `.hun.yml` manifest.
        path: String,
    },

    /// Remove a project from the registry.
    Remove {
        /// Registered project name.
        name: String,
    },

    /// List registered projects.
    List,

    /// Start a project alongside whatever else is running.
    Run {
        /// Registered project name.
        project: String,
    },

    /// Start a project exclusively on its base ports, stopping others.
    Switch {
        /// Registered project name.
        project: String,
    },

    /// Stop a project, or everything.
    Stop {
        /// Registered project name; omit with --all to stop everything.
        project: Option<String>,

        /// Stop all running projects.
        #[arg(long)]
        all: bool,
    },

    /// Restart a project or a single service.
    Restart {
        /// Target as `project` or `project:service`.
        target: String,
    },

    /// Show the status of running services.
    Status,

    /// Show the ports bound by running services.
    Ports,

    /// Show recent log lines for one service.
    Logs {
        /// Target as `project:service`.
        target: String,

        /// Number of lines to show.
        #[arg(short = 'n', long, default_value = "500")]
        lines: usize,
    },

    /// Stream live log lines for one service or a whole project.
    Tail {
        /// Target as `project` or `project:service`.
        target: String,
    },

    /// Print (and try to open) the local URL of a running service.
    Open {
        /// Service name within the active project.
        service: Option<String>,
    },

    /// Run advisory health checks.
    Doctor,

    /// Print the version.
    Version,

    /// Run the resident supervisor in the foreground.
    #[command(hide = true)]
    Daemon,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}

/// Splits a `project[:service]` target into its parts.
pub fn split_target(target: &str) -> (&str, &str) {
    match target.split_once(':') {
        Some((project, service)) => (project, service),
        None => (target, ""),
    }
}
