//! Helpers for resolving the supervisor's on-disk layout.
//!
//! Everything the supervisor persists lives under `<hunDir>` = `$HOME/.hun`:
//! the control socket, the PID anchor, the state document, the global config,
//! and the per-service log tree. `HOME` is consulted on every call so tests
//! can repoint the layout by swapping the environment variable.

use std::{env, path::PathBuf};

/// Name of the project manifest expected inside each project directory.
pub const MANIFEST_FILE: &str = ".hun.yml";

/// Returns the root directory for all supervisor state.
pub fn hun_dir() -> PathBuf {
    let home = env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"));
    home.join(".hun")
}

/// Returns the path of the local stream socket the supervisor listens on.
pub fn socket_path() -> PathBuf {
    hun_dir().join("daemon.sock")
}

/// Returns the path where the supervisor PID is anchored.
pub fn pid_path() -> PathBuf {
    hun_dir().join("daemon.pid")
}

/// Returns the path of the persisted state document.
pub fn state_path() -> PathBuf {
    hun_dir().join("state.json")
}

/// Returns the path of the optional global configuration file.
pub fn global_config_path() -> PathBuf {
    hun_dir().join("config.yml")
}

/// Returns the root of the log tree.
pub fn log_dir() -> PathBuf {
    hun_dir().join("logs")
}

/// Returns the log directory for one project.
pub fn project_log_dir(project: &str) -> PathBuf {
    log_dir().join(project)
}

/// Returns the rotating log file path for one service.
pub fn service_log_path(project: &str, service: &str) -> PathBuf {
    project_log_dir(project).join(format!("{service}.log"))
}

/// Returns the shell used to run service commands and hooks: `$SHELL`,
/// falling back to `/bin/sh` when unset or empty.
pub fn login_shell() -> String {
    match env::var("SHELL") {
        Ok(shell) if !shell.trim().is_empty() => shell,
        _ => "/bin/sh".to_string(),
    }
}
