//! Wire protocol and client helpers for the supervisor socket.
//!
//! Requests and responses travel as newline-delimited JSON over the local
//! stream socket at `<hunDir>/daemon.sock`. The same binary acts as client
//! and server: client invocations ensure the daemon is up (spawning a
//! detached copy of the current executable when it is not) and then speak
//! the protocol.

use nix::sys::signal;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    os::unix::process::CommandExt,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, warn};

use crate::error::ControlError;
use crate::runtime;

/// Current protocol version announced by `ping`.
pub const PROTOCOL_VERSION: u32 = 2;

/// Read buffer capacity for one request line.
pub const MAX_LINE_BUFFER: usize = 1024 * 1024;

/// How long `ensure_daemon` waits for a freshly spawned daemon.
const DAEMON_SPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Poll interval while waiting for the daemon socket to respond.
const DAEMON_SPAWN_POLL: Duration = Duration::from_millis(100);

fn is_empty(value: &str) -> bool {
    value.is_empty()
}

/// One request line sent to the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Request {
    /// Operation name; see the dispatch table in the supervisor.
    pub action: String,
    /// Target project, where applicable.
    #[serde(default, skip_serializing_if = "is_empty")]
    pub project: String,
    /// Target service, where applicable.
    #[serde(default, skip_serializing_if = "is_empty")]
    pub service: String,
    /// Start/focus mode: `exclusive` or `parallel`.
    #[serde(default, skip_serializing_if = "is_empty")]
    pub mode: String,
    /// Line count for log queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<usize>,
    /// Opaque note attached to the target project.
    #[serde(default, skip_serializing_if = "is_empty")]
    pub note: String,
}

impl Request {
    /// Creates a request carrying only an action.
    pub fn new(action: &str) -> Self {
        Self {
            action: action.to_string(),
            ..Default::default()
        }
    }

    /// Sets the target project.
    pub fn project(mut self, project: &str) -> Self {
        self.project = project.to_string();
        self
    }

    /// Sets the target service.
    pub fn service(mut self, service: &str) -> Self {
        self.service = service.to_string();
        self
    }

    /// Sets the mode.
    pub fn mode(mut self, mode: &str) -> Self {
        self.mode = mode.to_string();
        self
    }
}

/// One response line written by the supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Error description when `ok` is false.
    #[serde(default, skip_serializing_if = "is_empty")]
    pub error: String,
    /// Opaque payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    /// Builds a success response with a serialized payload.
    pub fn success(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self {
                ok: true,
                error: String::new(),
                data: Some(value),
            },
            Err(err) => Self::failure(&format!("failed to encode response: {err}")),
        }
    }

    /// Builds an error response.
    pub fn failure(message: &str) -> Self {
        Self {
            ok: false,
            error: message.to_string(),
            data: None,
        }
    }
}

/// Sends one request to a running supervisor and reads the response line.
pub fn send_request(request: &Request) -> Result<Response, ControlError> {
    let path = runtime::socket_path();
    if !path.exists() {
        return Err(ControlError::NotAvailable);
    }

    let mut stream = UnixStream::connect(path).map_err(|_| ControlError::NotAvailable)?;
    let payload = serde_json::to_vec(request)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::with_capacity(MAX_LINE_BUFFER, stream);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    if line.trim().is_empty() {
        return Err(ControlError::NotAvailable);
    }

    Ok(serde_json::from_str(line.trim())?)
}

/// Whether a supervisor answers `ping` with the expected payload.
pub fn ping_ok() -> bool {
    match send_request(&Request::new("ping")) {
        Ok(response) if response.ok => response
            .data
            .as_ref()
            .and_then(|data| data.get("status"))
            .and_then(|status| status.as_str())
            == Some("pong"),
        _ => false,
    }
}

/// Makes sure a supervisor is reachable, spawning a detached `hun daemon`
/// and polling for up to 5 seconds when it is not.
pub fn ensure_daemon() -> Result<(), ControlError> {
    if ping_ok() {
        return Ok(());
    }

    let exe = std::env::current_exe()?;
    debug!("Spawning supervisor: {:?} daemon", exe);
    Command::new(exe)
        .arg("daemon")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()?;

    let deadline = Instant::now() + DAEMON_SPAWN_TIMEOUT;
    while Instant::now() < deadline {
        if ping_ok() {
            return Ok(());
        }
        thread::sleep(DAEMON_SPAWN_POLL);
    }
    Err(ControlError::DaemonStartTimeout(
        DAEMON_SPAWN_TIMEOUT.as_secs(),
    ))
}

/// Ensures the daemon is up, then sends the request. An `ok: false`
/// response is surfaced as a server error.
pub fn request(request: &Request) -> Result<Response, ControlError> {
    ensure_daemon()?;
    let response = send_request(request)?;
    if !response.ok {
        return Err(ControlError::Server(response.error));
    }
    Ok(response)
}

/// Persists the supervisor PID anchor.
pub fn write_supervisor_pid(pid: libc::pid_t) -> Result<(), ControlError> {
    let path = runtime::pid_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, pid.to_string())?;
    Ok(())
}

/// Reads the supervisor PID anchor if present.
pub fn read_supervisor_pid() -> Result<Option<libc::pid_t>, ControlError> {
    let path = runtime::pid_path();
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path)?;
    match contents.trim().parse::<libc::pid_t>() {
        Ok(pid) => Ok(Some(pid)),
        Err(_) => Ok(None),
    }
}

/// Whether a supervisor process is alive according to the PID anchor.
/// Stale anchors and sockets are cleaned up along the way.
pub fn supervisor_running() -> bool {
    match read_supervisor_pid() {
        Ok(Some(pid)) => match signal::kill(Pid::from_raw(pid), None) {
            Ok(()) => true,
            Err(nix::errno::Errno::ESRCH) => {
                let _ = cleanup_runtime();
                false
            }
            Err(err) => {
                warn!("Failed to query supervisor pid {pid}: {err}");
                false
            }
        },
        Ok(None) | Err(_) => {
            let socket = runtime::socket_path();
            if socket.exists() {
                warn!("Found stale socket without PID anchor, cleaning up");
                let _ = cleanup_runtime();
            }
            false
        }
    }
}

/// Removes the socket and PID anchor files.
pub fn cleanup_runtime() -> Result<(), ControlError> {
    let socket = runtime::socket_path();
    if socket.exists() {
        let _ = fs::remove_file(socket);
    }
    let pid = runtime::pid_path();
    if pid.exists() {
        let _ = fs::remove_file(pid);
    }
    Ok(())
}
