//! Supervisor lifecycle and endpoint server.
//!
//! The supervisor is the single resident instance per user: it binds the
//! local socket, anchors its PID, recovers previously running projects in
//! the background, and services each connection on its own thread. Wire
//! framing is newline-delimited JSON; a `subscribe` request upgrades the
//! connection to a one-way log stream.

use std::{
    fs, io,
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    os::unix::net::UnixListener,
    sync::Arc,
    thread,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{self, GlobalConfig},
    error::SupervisorError,
    ipc::{self, MAX_LINE_BUFFER, PROTOCOL_VERSION, Request, Response},
    manager::Manager,
    runtime,
    state::{Mode, StateStore},
};

/// The resident supervisor process.
pub struct Supervisor {
    manager: Arc<Manager>,
}

impl Supervisor {
    /// Creates a supervisor with freshly loaded state and global config.
    pub fn new() -> Result<Self, SupervisorError> {
        let state = Arc::new(StateStore::open()?);
        let step = match GlobalConfig::load() {
            Ok(config) => config.offset_step(),
            Err(err) => {
                warn!("Failed to load global config, using defaults: {err}");
                1
            }
        };
        Ok(Self {
            manager: Manager::new(state, step),
        })
    }

    /// The manager driven by this supervisor.
    pub fn manager(&self) -> &Arc<Manager> {
        &self.manager
    }

    /// Runs the accept loop until the process is terminated.
    ///
    /// Binds the socket, writes the PID anchor, installs the termination
    /// handler, and kicks off state recovery concurrently with accepting
    /// connections.
    pub fn run(&self) -> Result<(), SupervisorError> {
        fs::create_dir_all(runtime::hun_dir())?;

        if let Ok(Some(pid)) = ipc::read_supervisor_pid()
            && nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_ok()
            && pid != unsafe { libc::getpid() }
        {
            return Err(SupervisorError::AlreadyRunning { pid });
        }

        let socket_path = runtime::socket_path();
        if socket_path.exists() {
            fs::remove_file(&socket_path)?;
        }
        let listener = UnixListener::bind(&socket_path)?;
        ipc::write_supervisor_pid(unsafe { libc::getpid() })?;

        let manager = Arc::clone(&self.manager);
        ctrlc::set_handler(move || {
            info!("hun supervisor shutting down");
            manager.stop_all();
            manager.pipeline().close();
            let _ = ipc::cleanup_runtime();
            std::process::exit(0);
        })
        .map_err(|err| io::Error::other(err.to_string()))?;

        // Recovery must not block the accept loop.
        let manager = Arc::clone(&self.manager);
        thread::spawn(move || manager.recover());

        info!("hun supervisor listening on {:?}", socket_path);
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let manager = Arc::clone(&self.manager);
                    thread::spawn(move || handle_connection(stream, manager));
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("Supervisor listener error: {err}");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Services one connection: a stream of request lines, each answered with
/// one response line, until the client disconnects or subscribes.
fn handle_connection(stream: UnixStream, manager: Arc<Manager>) {
    let read_half = match stream.try_clone() {
        Ok(half) => half,
        Err(err) => {
            warn!("Failed to clone connection stream: {err}");
            return;
        }
    };
    let mut reader = BufReader::with_capacity(MAX_LINE_BUFFER, read_half);
    let mut writer = stream;
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                debug!("Connection read error: {err}");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Request = match serde_json::from_str(trimmed) {
            Ok(request) => request,
            Err(err) => {
                let response = Response::failure(&format!("invalid request: {err}"));
                if write_response(&mut writer, &response).is_err() {
                    break;
                }
                continue;
            }
        };
        debug!("Request: {}", request.action);

        if request.action == "subscribe" {
            stream_logs(writer, manager, request);
            return;
        }

        let response = dispatch(&manager, &request);
        if write_response(&mut writer, &response).is_err() {
            break;
        }
    }
}

fn write_response(stream: &mut UnixStream, response: &Response) -> io::Result<()> {
    let payload = serde_json::to_vec(response)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()
}

/// Routes one request to the matching manager operation.
fn dispatch(manager: &Arc<Manager>, request: &Request) -> Response {
    match request.action.as_str() {
        "ping" => Response::success(serde_json::json!({
            "status": "pong",
            "protocol": PROTOCOL_VERSION,
        })),
        "start" => handle_start(manager, request),
        "stop" => handle_stop(manager, request),
        "stop_service" => {
            if request.project.is_empty() || request.service.is_empty() {
                return Response::failure("project and service are required");
            }
            match manager.stop_service(&request.project, &request.service) {
                Ok(()) => Response::success(serde_json::json!({"status": "stopped"})),
                Err(err) => Response::failure(&err.to_string()),
            }
        }
        "restart" => handle_restart(manager, request),
        "status" => Response::success(manager.status()),
        "logs" => {
            if request.project.is_empty() || request.service.is_empty() {
                return Response::failure("project and service are required");
            }
            let lines = request.lines.unwrap_or(500);
            Response::success(manager.logs(&request.project, &request.service, lines))
        }
        "ports" => Response::success(manager.ports()),
        "focus" => handle_focus(manager, request),
        _ => Response::failure("unknown action"),
    }
}

fn handle_start(manager: &Arc<Manager>, request: &Request) -> Response {
    if request.project.is_empty() {
        return Response::failure("project is required");
    }
    let project = request.project.as_str();
    let exclusive = request.mode != "parallel";

    if manager.is_running(project) {
        return Response::success(serde_json::json!({"status": "already_running"}));
    }

    let Some(path) = manager.project_path(project) else {
        return Response::failure(&format!("Unknown project '{project}'"));
    };
    let manifest = match config::load_manifest(&path) {
        Ok(manifest) => manifest,
        Err(err) => return Response::failure(&err.to_string()),
    };

    if exclusive {
        // Focus takeover: remember where the evicted projects were, then
        // stop them before the target claims offset 0.
        for other in manager.running_projects() {
            if other != project {
                manager.save_git_branch(&other);
                if let Err(err) = manager.stop_project(&other) {
                    warn!("[{other}] stop before focus switch failed: {err}");
                }
            }
        }
    }

    match manager.start_project(project, manifest, &path, exclusive) {
        Ok(()) => {
            if !request.note.is_empty() {
                let note = request.note.clone();
                let _ = manager.state().update(|doc| {
                    doc.projects.entry(project.to_string()).or_default().last_note =
                        note;
                });
            }
            Response::success(serde_json::json!({"status": "started"}))
        }
        Err(err) => Response::failure(&err.to_string()),
    }
}

fn handle_stop(manager: &Arc<Manager>, request: &Request) -> Response {
    if request.project.is_empty() {
        manager.stop_all();
        return Response::success(serde_json::json!({"status": "stopped_all"}));
    }
    if !request.service.is_empty() {
        return match manager.stop_service(&request.project, &request.service) {
            Ok(()) => Response::success(serde_json::json!({"status": "stopped"})),
            Err(err) => Response::failure(&err.to_string()),
        };
    }

    manager.save_git_branch(&request.project);
    if !request.note.is_empty() {
        let project = request.project.clone();
        let note = request.note.clone();
        let _ = manager.state().update(|doc| {
            doc.projects.entry(project).or_default().last_note = note;
        });
    }
    match manager.stop_project(&request.project) {
        Ok(()) => Response::success(serde_json::json!({"status": "stopped"})),
        Err(err) => Response::failure(&err.to_string()),
    }
}

fn handle_restart(manager: &Arc<Manager>, request: &Request) -> Response {
    if request.project.is_empty() {
        return Response::failure("project is required");
    }
    let result = if request.service.is_empty() {
        manager.restart_project(&request.project)
    } else {
        manager.restart_service(&request.project, &request.service)
    };
    match result {
        Ok(()) => Response::success(serde_json::json!({"status": "restarted"})),
        Err(err) => Response::failure(&err.to_string()),
    }
}

fn handle_focus(manager: &Arc<Manager>, request: &Request) -> Response {
    let mode = match request.mode.as_str() {
        "" => None,
        "focus" | "exclusive" => Some(Mode::Focus),
        "multitask" | "parallel" => Some(Mode::Multitask),
        other => {
            return Response::failure(&format!(
                "Invalid mode '{other}' (expected focus or multitask)"
            ));
        }
    };
    let project = if request.project.is_empty() {
        None
    } else {
        Some(request.project.as_str())
    };
    match manager.set_focus(project, mode) {
        Ok(()) => Response::success(serde_json::json!({"status": "ok"})),
        Err(err) => Response::failure(&err.to_string()),
    }
}

/// Dedicates the connection to a log stream: one JSON `LogLine` per line
/// until the client disconnects or the subscriber channel closes.
fn stream_logs(mut writer: UnixStream, manager: Arc<Manager>, request: Request) {
    let (id, rx) = manager.subscribe(&request.project, &request.service);
    let ack = Response::success(serde_json::json!({"status": "subscribed"}));
    if write_response(&mut writer, &ack).is_err() {
        manager.unsubscribe(id);
        return;
    }

    while let Ok(line) = rx.recv() {
        let payload = match serde_json::to_vec(&line) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to encode log line: {err}");
                continue;
            }
        };
        if writer.write_all(&payload).is_err()
            || writer.write_all(b"\n").is_err()
            || writer.flush().is_err()
        {
            break;
        }
    }
    manager.unsubscribe(id);
    debug!("Subscriber {id} disconnected");
}
