//! Lifecycle of a single service child process.
//!
//! Each service runs as one shell command in its own process group so the
//! whole subtree can be signalled together. Output is captured line by line
//! on both streams, readiness is detected via a substring match or a grace
//! timer, and exits are observed by a dedicated waiter that distinguishes
//! intentional stops from crashes.

use nix::{
    errno::Errno,
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use std::{
    collections::HashMap,
    io::{BufRead, BufReader, Read},
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Child, Command, Stdio},
    sync::{Arc, Condvar, Mutex},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::error::ManagerError;
use crate::runtime;

/// Maximum bytes of one output line delivered intact; longer lines are
/// truncated at this boundary.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Grace period after which a service without a ready pattern is considered
/// ready if still running.
pub const READY_GRACE: Duration = Duration::from_secs(1);

/// How long to wait for an exit after SIGTERM before escalating.
pub const TERM_WAIT: Duration = Duration::from_secs(5);

/// How long to wait for an exit after SIGKILL before giving up.
pub const KILL_WAIT: Duration = Duration::from_secs(2);

/// Callback invoked for every captured output line.
pub type OutputFn = Arc<dyn Fn(&str, bool) + Send + Sync>;

/// Callback invoked when the child exits; receives the exit code (if any)
/// and whether the exit was requested via `stop`.
pub type ExitFn = Arc<dyn Fn(Option<i32>, bool) + Send + Sync>;

/// Callback invoked exactly once per run when the service becomes ready.
pub type ReadyFn = Arc<dyn Fn() + Send + Sync>;

/// The three callbacks wired into a process at construction.
pub struct Callbacks {
    /// Output line callback.
    pub on_output: OutputFn,
    /// Exit callback.
    pub on_exit: ExitFn,
    /// Readiness callback.
    pub on_ready: ReadyFn,
}

/// Static description of the child to launch.
pub struct ProcessSpec {
    /// Owning project name.
    pub project: String,
    /// Service name.
    pub name: String,
    /// Shell command line.
    pub cmd: String,
    /// Working directory.
    pub dir: PathBuf,
    /// Extra environment overlaid on the supervisor's.
    pub env: HashMap<String, String>,
    /// Actual port the service should bind; 0 for none.
    pub port: u16,
    /// Environment variable through which the port is exposed.
    pub port_env: Option<String>,
    /// Substring marking readiness, if any.
    pub ready_pattern: Option<String>,
}

/// Single-shot completion event signalled when the child exits.
struct ExitEvent {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl ExitEvent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: Mutex::new(false),
            cond: Condvar::new(),
        })
    }

    fn signal(&self) {
        let mut fired = self.fired.lock().unwrap_or_else(|e| e.into_inner());
        *fired = true;
        self.cond.notify_all();
    }

    /// Waits up to `timeout` for the event; returns whether it fired.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.fired.lock().unwrap_or_else(|e| e.into_inner());
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cond
                .wait_timeout(fired, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            fired = guard;
        }
        true
    }
}

struct ProcessState {
    running: bool,
    ready: bool,
    stopping: bool,
    pid: u32,
    port: u16,
    started_at: Option<Instant>,
    exited: Arc<ExitEvent>,
}

/// One supervised child process.
pub struct Process {
    project: String,
    name: String,
    cmd: String,
    dir: PathBuf,
    env: HashMap<String, String>,
    port_env: Option<String>,
    ready_pattern: Option<String>,
    state: Mutex<ProcessState>,
    callbacks: Callbacks,
}

impl Process {
    /// Creates a process in the `new` state; nothing is launched yet.
    pub fn new(spec: ProcessSpec, callbacks: Callbacks) -> Self {
        Self {
            project: spec.project,
            name: spec.name,
            cmd: spec.cmd,
            dir: spec.dir,
            env: spec.env,
            port_env: spec.port_env,
            ready_pattern: spec.ready_pattern.filter(|p| !p.is_empty()),
            state: Mutex::new(ProcessState {
                running: false,
                ready: false,
                stopping: false,
                pid: 0,
                port: spec.port,
                started_at: None,
                exited: ExitEvent::new(),
            }),
            callbacks,
        }
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the child is currently running.
    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Whether the service reached readiness in this run.
    pub fn is_ready(&self) -> bool {
        self.lock_state().ready
    }

    /// PID of the current (or last) child.
    pub fn pid(&self) -> u32 {
        self.lock_state().pid
    }

    /// Actual port the service is assigned.
    pub fn port(&self) -> u16 {
        self.lock_state().port
    }

    /// Replaces the assigned port (runtime inference).
    pub fn set_port(&self, port: u16) {
        self.lock_state().port = port;
    }

    /// Instant of the last successful start.
    pub fn started_at(&self) -> Option<Instant> {
        self.lock_state().started_at
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ProcessState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Launches the child. Fails if already running or if the shell cannot
    /// be spawned.
    pub fn start(self: &Arc<Self>) -> Result<(), ManagerError> {
        let mut state = self.lock_state();
        if state.running {
            return Err(ManagerError::ServiceAlreadyRunning {
                service: self.name.clone(),
            });
        }

        let shell = runtime::login_shell();
        let mut command = Command::new(&shell);
        command
            .arg("-c")
            .arg(&self.cmd)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(port_env) = &self.port_env
            && state.port > 0
        {
            command.env(port_env, state.port.to_string());
        }

        let mut child =
            command
                .spawn()
                .map_err(|source| ManagerError::ServiceStartError {
                    service: self.name.clone(),
                    source,
                })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let exited = ExitEvent::new();

        state.running = true;
        state.ready = false;
        state.stopping = false;
        state.pid = child.id();
        state.started_at = Some(Instant::now());
        state.exited = Arc::clone(&exited);
        drop(state);

        debug!("[{}:{}] started pid {}", self.project, self.name, child.id());

        if let Some(stdout) = stdout {
            self.spawn_scanner(stdout, false);
        }
        if let Some(stderr) = stderr {
            self.spawn_scanner(stderr, true);
        }
        self.spawn_exit_waiter(child, Arc::clone(&exited));
        if self.ready_pattern.is_none() {
            self.spawn_grace_timer(exited);
        }

        Ok(())
    }

    /// Reads one stream line by line and feeds the output callback. Lines
    /// longer than [`MAX_LINE_BYTES`] are truncated at the boundary.
    fn spawn_scanner(self: &Arc<Self>, stream: impl Read + Send + 'static, is_err: bool) {
        let process = Arc::clone(self);
        thread::spawn(move || {
            let mut reader = BufReader::with_capacity(MAX_LINE_BYTES, stream);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(err) => {
                        debug!(
                            "[{}:{}] stream read error: {err}",
                            process.project, process.name
                        );
                        break;
                    }
                }
                while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
                    buf.pop();
                }
                if buf.len() > MAX_LINE_BYTES {
                    buf.truncate(MAX_LINE_BYTES);
                }
                let text = String::from_utf8_lossy(&buf).into_owned();
                (process.callbacks.on_output)(&text, is_err);

                if let Some(pattern) = &process.ready_pattern {
                    let became_ready = {
                        let mut state = process.lock_state();
                        if !state.ready && text.contains(pattern.as_str()) {
                            state.ready = true;
                            true
                        } else {
                            false
                        }
                    };
                    if became_ready {
                        (process.callbacks.on_ready)();
                    }
                }
            }
        });
    }

    /// Marks a pattern-less service ready after the grace period if the same
    /// run is still alive.
    fn spawn_grace_timer(self: &Arc<Self>, run_token: Arc<ExitEvent>) {
        let process = Arc::clone(self);
        thread::spawn(move || {
            thread::sleep(READY_GRACE);
            let became_ready = {
                let mut state = process.lock_state();
                if state.running
                    && !state.ready
                    && Arc::ptr_eq(&state.exited, &run_token)
                {
                    state.ready = true;
                    true
                } else {
                    false
                }
            };
            if became_ready {
                (process.callbacks.on_ready)();
            }
        });
    }

    /// Reaps the child, records whether the exit was intentional, signals
    /// the exit event exactly once, and invokes the exit callback.
    fn spawn_exit_waiter(self: &Arc<Self>, mut child: Child, exited: Arc<ExitEvent>) {
        let process = Arc::clone(self);
        thread::spawn(move || {
            let status = child.wait();
            let intentional = {
                let mut state = process.lock_state();
                state.running = false;
                let intentional = state.stopping;
                state.stopping = false;
                intentional
            };
            exited.signal();

            let code = status.as_ref().ok().and_then(|status| status.code());
            if let Err(err) = &status {
                warn!(
                    "[{}:{}] wait failed: {err}",
                    process.project, process.name
                );
            }
            (process.callbacks.on_exit)(code, intentional);
        });
    }

    /// Stops the child's whole process group: SIGTERM, a bounded wait, then
    /// SIGKILL with a final bounded wait. Idempotent; missing processes are
    /// not an error.
    pub fn stop(&self) -> Result<(), ManagerError> {
        let (pid, exited) = {
            let mut state = self.lock_state();
            if !state.running {
                return Ok(());
            }
            state.stopping = true;
            (state.pid, Arc::clone(&state.exited))
        };

        let group = Pid::from_raw(-(pid as i32));
        match kill(group, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => debug!("[{}:{}] SIGTERM failed: {err}", self.project, self.name),
        }
        if exited.wait_timeout(TERM_WAIT) {
            return Ok(());
        }

        warn!(
            "[{}:{}] did not exit after SIGTERM; escalating",
            self.project, self.name
        );
        match kill(group, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => debug!("[{}:{}] SIGKILL failed: {err}", self.project, self.name),
        }
        if exited.wait_timeout(KILL_WAIT) {
            return Ok(());
        }

        Err(ManagerError::ServiceStopError {
            service: self.name.clone(),
            reason: "process did not exit after SIGKILL".to_string(),
        })
    }
}
