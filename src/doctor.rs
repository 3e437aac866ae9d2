//! Advisory health checks for the local installation.
//!
//! `hun doctor` verifies that the supervisor socket answers, the state
//! document parses, every registered manifest still validates, and the
//! global config carries no unsupported legacy keys. Output is advisory;
//! nothing here mutates state.

use std::path::Path;

use crate::{
    config::{self, GlobalConfig},
    ipc::{self, PROTOCOL_VERSION, Request},
    runtime,
    state::StateStore,
};

/// Outcome of one doctor check.
#[derive(Debug, Clone)]
pub struct CheckReport {
    /// Short check name.
    pub name: String,
    /// Whether the check passed.
    pub ok: bool,
    /// Human-readable detail line.
    pub detail: String,
}

impl CheckReport {
    fn pass(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail,
        }
    }

    fn fail(name: &str, detail: String) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail,
        }
    }
}

/// Runs every check and returns the reports in display order.
pub fn run_checks() -> Vec<CheckReport> {
    let mut reports = Vec::new();
    reports.push(check_home());
    reports.push(check_daemon());
    reports.push(check_state());
    reports.extend(check_registry());
    reports.extend(check_global_config());
    reports
}

fn check_home() -> CheckReport {
    let dir = runtime::hun_dir();
    if dir.is_dir() {
        CheckReport::pass("home", format!("{} exists", dir.display()))
    } else {
        CheckReport::fail(
            "home",
            format!("{} missing (created on first daemon start)", dir.display()),
        )
    }
}

fn check_daemon() -> CheckReport {
    match ipc::send_request(&Request::new("ping")) {
        Ok(response) if response.ok => {
            let protocol = response
                .data
                .as_ref()
                .and_then(|data| data.get("protocol"))
                .and_then(|value| value.as_u64())
                .unwrap_or(0);
            if protocol == u64::from(PROTOCOL_VERSION) {
                CheckReport::pass("daemon", format!("reachable, protocol {protocol}"))
            } else {
                CheckReport::fail(
                    "daemon",
                    format!(
                        "reachable but speaks protocol {protocol} (expected {PROTOCOL_VERSION})"
                    ),
                )
            }
        }
        Ok(response) => {
            CheckReport::fail("daemon", format!("ping rejected: {}", response.error))
        }
        Err(_) => CheckReport::fail(
            "daemon",
            "not running (will start on demand)".to_string(),
        ),
    }
}

fn check_state() -> CheckReport {
    let path = runtime::state_path();
    if !path.exists() {
        return CheckReport::pass("state", "no state file yet".to_string());
    }
    match StateStore::open() {
        Ok(store) => {
            let doc = store.snapshot();
            CheckReport::pass(
                "state",
                format!(
                    "schema {} with {} registered project(s)",
                    doc.schema_version,
                    doc.registry.len()
                ),
            )
        }
        Err(err) => CheckReport::fail("state", err.to_string()),
    }
}

fn check_registry() -> Vec<CheckReport> {
    let Ok(store) = StateStore::open() else {
        return Vec::new();
    };
    let doc = store.snapshot();
    let mut names: Vec<&String> = doc.registry.keys().collect();
    names.sort();

    names
        .into_iter()
        .map(|name| {
            let path = &doc.registry[name];
            let check_name = format!("manifest:{name}");
            let dir = Path::new(path);
            if !dir.is_dir() {
                return CheckReport::fail(
                    &check_name,
                    format!("directory {path} missing"),
                );
            }
            match config::load_manifest(dir) {
                Ok(manifest) => CheckReport::pass(
                    &check_name,
                    format!("{} service(s)", manifest.services.len()),
                ),
                Err(err) => CheckReport::fail(&check_name, err.to_string()),
            }
        })
        .collect()
}

fn check_global_config() -> Vec<CheckReport> {
    let path = runtime::global_config_path();
    if !path.exists() {
        return vec![CheckReport::pass("config", "no global config".to_string())];
    }
    match GlobalConfig::load() {
        Ok(config) => {
            let mut reports = vec![CheckReport::pass(
                "config",
                format!("offset step {}", config.offset_step()),
            )];
            for key in config.unsupported_keys() {
                reports.push(CheckReport::fail(
                    "config",
                    format!("legacy key '{key}' is unsupported"),
                ));
            }
            reports
        }
        Err(err) => vec![CheckReport::fail("config", err.to_string())],
    }
}
