//! Developer-workstation service supervisor.

#![warn(unused_crate_dependencies)]
// These dependencies are only used in the binary (src/bin/main.rs)
// Test dependencies are only used in test code
#[cfg(test)]
use assert_cmd as _;
#[cfg(test)]
use predicates as _;
use strum as _;
#[cfg(test)]
use sysinfo as _;
#[cfg(test)]
use tempfile as _;
use tracing_subscriber as _;

/// CLI parsing.
pub mod cli;

/// Manifest and global config.
pub mod config;

/// Health checks.
pub mod doctor;

/// Errors.
pub mod error;

/// Runtime port inference.
pub mod infer;

/// Wire protocol and client.
pub mod ipc;

/// Log pipeline.
pub mod logs;

/// Project orchestration.
pub mod manager;

/// Port-offset allocation.
pub mod ports;

/// Service child processes.
pub mod process;

/// Runtime paths.
pub mod runtime;

/// Persisted state.
pub mod state;

/// Supervisor daemon.
pub mod supervisor;

/// Test utils.
#[doc(hidden)]
pub mod test_utils;
