#[path = "common/mod.rs"]
mod common;

use common::HomeEnvGuard;
use hun::process::{Callbacks, MAX_LINE_BYTES, Process, ProcessSpec};
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use std::{fs, thread};
use tempfile::tempdir;

fn spec(cmd: &str, dir: &std::path::Path) -> ProcessSpec {
    ProcessSpec {
        project: "itest".to_string(),
        name: "svc".to_string(),
        cmd: cmd.to_string(),
        dir: dir.to_path_buf(),
        env: HashMap::new(),
        port: 0,
        port_env: None,
        ready_pattern: None,
    }
}

fn quiet() -> Callbacks {
    Callbacks {
        on_output: Arc::new(|_, _| {}),
        on_exit: Arc::new(|_, _| {}),
        on_ready: Arc::new(|| {}),
    }
}

#[test]
fn stop_kills_the_whole_process_group() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let child_pid_path = temp.path().join("child.pid");
    let cmd = format!(
        "(echo $$ > {} && exec sleep 60) & exec sleep 60",
        child_pid_path.display()
    );
    let process = Arc::new(Process::new(spec(&cmd, temp.path()), quiet()));
    process.start().unwrap();

    common::wait_for_path(&child_pid_path);
    let child_pid: u32 = fs::read_to_string(&child_pid_path)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!(common::is_process_alive(child_pid));

    process.stop().unwrap();
    common::wait_for_process_exit(child_pid);
}

#[test]
fn oversized_lines_are_truncated_not_fatal() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let (done_tx, done_rx) = mpsc::channel();
    let callbacks = Callbacks {
        on_output: Arc::new(move |line: &str, _| {
            sink.lock().unwrap().push(line.to_string());
        }),
        on_exit: Arc::new(move |_, _| {
            let _ = done_tx.send(());
        }),
        on_ready: Arc::new(|| {}),
    };

    // One line twice the scanner cap, then a small trailer line.
    let cmd = "head -c 131072 /dev/zero | tr '\\0' x; echo; echo trailer";
    let process = Arc::new(Process::new(spec(cmd, temp.path()), callbacks));
    process.start().unwrap();
    done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    // Give the scanner a moment to drain after exit.
    thread::sleep(Duration::from_millis(200));

    let captured = lines.lock().unwrap().clone();
    assert!(
        captured.iter().any(|line| line == "trailer"),
        "small line must arrive intact"
    );
    let big = captured
        .iter()
        .find(|line| line.starts_with('x'))
        .expect("big line must be delivered");
    assert!(big.len() <= MAX_LINE_BYTES, "line length {}", big.len());
    assert!(big.chars().all(|c| c == 'x'));
}

#[test]
fn ready_pattern_matches_on_stderr() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let mut service_spec = spec("echo 'listening now' >&2 && sleep 5", temp.path());
    service_spec.ready_pattern = Some("listening".to_string());
    let process = Arc::new(Process::new(service_spec, quiet()));
    process.start().unwrap();

    assert!(common::wait_until(Duration::from_secs(3), || process
        .is_ready()));
    process.stop().unwrap();
}

#[test]
fn spawn_failure_surfaces_as_start_error() {
    let temp = tempdir().unwrap();
    let home = temp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let _home = HomeEnvGuard::set(&home);

    let missing = temp.path().join("does-not-exist");
    let process = Arc::new(Process::new(spec("echo hi", &missing), quiet()));
    let err = process.start().unwrap_err();
    assert!(err.to_string().contains("Failed to start"), "{err}");
    assert!(!process.is_running());
}
