//! Orchestration of whole projects and their services.
//!
//! The manager owns the process table and the port allocator, wires every
//! process to the log pipeline and the runtime port inferrer, runs lifecycle
//! hooks, and keeps the persisted state document in step with reality.

use chrono::Utc;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    process::Command,
    sync::{Arc, Mutex, Weak},
    thread,
    time::{Duration, Instant},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    config::{self, Manifest, ServiceSpec},
    error::ManagerError,
    infer::{self, PortSignals},
    logs::{LogLine, LogPipeline, RotationSettings},
    ports::PortAllocator,
    process::{Callbacks, Process, ProcessSpec},
    state::{Mode, ProjectStatus, ServiceRecord, ServiceStatus, StateStore},
};

/// Maximum time to wait for a declared ready pattern before moving on.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Pause after starting a pattern-less service so it can bind its port
/// before dependents start.
pub const POST_START_GRACE: Duration = Duration::from_secs(1);

/// Pause between stop and start during a whole-project restart, letting the
/// old processes' ports free up.
pub const RESTART_PAUSE: Duration = Duration::from_millis(500);

/// Delay before a crashed service with `restart: on_failure` is relaunched.
pub const AUTO_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Polling interval while waiting for readiness.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Read-only snapshot of one service, as reported by status queries.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceInfo {
    /// PID of the child process; 0 when not running.
    pub pid: u32,
    /// Actual port the service is assigned; 0 for none.
    pub port: u16,
    /// Whether the child is currently running.
    pub running: bool,
    /// Whether the service reached readiness.
    pub ready: bool,
}

struct ProjectEntry {
    manifest: Manifest,
    path: PathBuf,
}

struct ManagerInner {
    processes: HashMap<String, HashMap<String, Arc<Process>>>,
    configs: HashMap<String, ProjectEntry>,
}

/// Supervises every running project.
pub struct Manager {
    inner: Mutex<ManagerInner>,
    allocator: PortAllocator,
    pipeline: Arc<LogPipeline>,
    signals: PortSignals,
    state: Arc<StateStore>,
}

impl Manager {
    /// Creates a manager bound to the persisted state store.
    pub fn new(state: Arc<StateStore>, offset_step: u16) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ManagerInner {
                processes: HashMap::new(),
                configs: HashMap::new(),
            }),
            allocator: PortAllocator::new(offset_step),
            pipeline: Arc::new(LogPipeline::new()),
            signals: PortSignals::new(),
            state,
        })
    }

    /// The log pipeline owned by this manager.
    pub fn pipeline(&self) -> &LogPipeline {
        &self.pipeline
    }

    /// The persisted state store.
    pub fn state(&self) -> &StateStore {
        &self.state
    }

    // ------------------------------------------------------------------
    // Project start
    // ------------------------------------------------------------------

    /// Starts every service of a project in dependency order.
    ///
    /// On any service start failure the whole start is rolled back: already
    /// started siblings are stopped, the offset is released, log state is
    /// evicted, and the project is marked stopped.
    pub fn start_project(
        self: &Arc<Self>,
        project: &str,
        manifest: Manifest,
        path: &Path,
        exclusive: bool,
    ) -> Result<(), ManagerError> {
        {
            let mut inner = self.inner.lock()?;
            if inner.processes.contains_key(project) {
                return Err(ManagerError::AlreadyRunning {
                    project: project.to_string(),
                });
            }
            // Register first so status queries observe startup progress.
            inner.processes.insert(project.to_string(), HashMap::new());
            inner.configs.insert(
                project.to_string(),
                ProjectEntry {
                    manifest: manifest.clone(),
                    path: path.to_path_buf(),
                },
            );
        }

        if let Some(hooks) = &manifest.hooks
            && let Some(hook) = &hooks.pre_start
            && !hook.trim().is_empty()
            && let Err(reason) = run_hook(hook, path)
        {
            self.unregister(project);
            return Err(ManagerError::HookFailed {
                hook: "pre_start".to_string(),
                project: project.to_string(),
                reason,
            });
        }

        self.pipeline
            .configure_rotation(project, RotationSettings::from_spec(manifest.logs.as_ref()));
        let offset = self.allocator.assign(project, exclusive);

        let order = match config::start_order(&manifest) {
            Ok(order) => order,
            Err(err) => {
                self.rollback_start(project, &[]);
                return Err(err.into());
            }
        };

        let overrides = self
            .state
            .snapshot()
            .projects
            .get(project)
            .map(|record| record.port_overrides.clone())
            .unwrap_or_default();

        let mut started: Vec<(String, Arc<Process>)> = Vec::new();
        for service_name in order {
            let spec = match manifest.services.get(&service_name) {
                Some(spec) => spec,
                None => continue,
            };
            let base = overrides.get(&service_name).copied().unwrap_or(spec.port);
            let actual = if base == 0 {
                0
            } else {
                base.saturating_add(offset)
            };

            let process = self.build_process(project, &service_name, spec, path, actual);
            if let Err(err) = process.start() {
                error!("[{project}:{service_name}] start failed: {err}");
                self.rollback_start(project, &started);
                return Err(err);
            }

            {
                let mut inner = self.inner.lock()?;
                if let Some(services) = inner.processes.get_mut(project) {
                    services.insert(service_name.clone(), Arc::clone(&process));
                }
            }
            started.push((service_name.clone(), Arc::clone(&process)));

            let pid = process.pid();
            if let Err(err) = self.state.update(|doc| {
                let record = doc.projects.entry(project.to_string()).or_default();
                record.services.insert(
                    service_name.clone(),
                    ServiceRecord {
                        pid,
                        port: actual,
                        status: ServiceStatus::Running,
                    },
                );
            }) {
                self.rollback_start(project, &started);
                return Err(err.into());
            }

            let has_pattern = spec
                .ready
                .as_deref()
                .map(|pattern| !pattern.is_empty())
                .unwrap_or(false);
            if has_pattern {
                let deadline = Instant::now() + READY_TIMEOUT;
                while Instant::now() < deadline {
                    if process.is_ready() || !process.is_running() {
                        break;
                    }
                    thread::sleep(READY_POLL_INTERVAL);
                }
                if !process.is_ready() {
                    warn!(
                        "[{project}:{service_name}] not ready after {}s; continuing",
                        READY_TIMEOUT.as_secs()
                    );
                }
            } else {
                thread::sleep(POST_START_GRACE);
            }
        }

        if let Err(err) = self.state.update(|doc| {
            let record = doc.projects.entry(project.to_string()).or_default();
            record.status = ProjectStatus::Running;
            record.offset = offset;
            record.path = path.display().to_string();
            record.started_at = Utc::now().to_rfc3339();
            doc.active_project = project.to_string();
            doc.mode = if exclusive {
                Mode::Focus
            } else {
                Mode::Multitask
            };
        }) {
            self.rollback_start(project, &started);
            return Err(err.into());
        }

        info!("[{project}] started with offset {offset}");
        Ok(())
    }

    fn unregister(&self, project: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.processes.remove(project);
        inner.configs.remove(project);
    }

    /// Unwinds a partial start: stop started siblings, release resources,
    /// mark the project stopped.
    fn rollback_start(&self, project: &str, started: &[(String, Arc<Process>)]) {
        for (name, process) in started {
            if let Err(err) = process.stop() {
                warn!("[{project}:{name}] rollback stop failed: {err}");
            }
        }
        self.allocator.release(project);
        self.pipeline.clean_project(project);
        self.signals.clear_project(project);
        self.unregister(project);
        let _ = self.state.update(|doc| {
            let record = doc.projects.entry(project.to_string()).or_default();
            record.status = ProjectStatus::Stopped;
            record.services.clear();
            record.offset = 0;
        });
    }

    // ------------------------------------------------------------------
    // Stop
    // ------------------------------------------------------------------

    /// Stops every service of a project in parallel, runs the post-stop
    /// hook best-effort, and releases all project resources. Stopping a
    /// project that is not running is not an error.
    pub fn stop_project(&self, project: &str) -> Result<(), ManagerError> {
        let services: Vec<(String, Arc<Process>)> = {
            let inner = self.inner.lock()?;
            match inner.processes.get(project) {
                Some(map) => map
                    .iter()
                    .map(|(name, process)| (name.clone(), Arc::clone(process)))
                    .collect(),
                None => return Ok(()),
            }
        };

        let mut handles = Vec::with_capacity(services.len());
        for (name, process) in services {
            handles.push(thread::spawn(move || {
                let result = process.stop();
                (name, result)
            }));
        }
        let mut first_err = None;
        for handle in handles {
            if let Ok((name, Err(err))) = handle.join() {
                warn!("[{project}:{name}] stop failed: {err}");
                first_err.get_or_insert(err);
            }
        }

        let entry = {
            let mut inner = self.inner.lock()?;
            inner.processes.remove(project);
            inner.configs.remove(project)
        };
        if let Some(entry) = entry
            && let Some(hooks) = &entry.manifest.hooks
            && let Some(hook) = &hooks.post_stop
            && !hook.trim().is_empty()
            && let Err(reason) = run_hook(hook, &entry.path)
        {
            warn!("[{project}] post_stop hook failed: {reason}");
        }

        self.allocator.release(project);
        self.pipeline.clean_project(project);
        self.signals.clear_project(project);

        let remaining = self.running_projects();
        self.state.update(|doc| {
            let record = doc.projects.entry(project.to_string()).or_default();
            record.status = ProjectStatus::Stopped;
            record.services.clear();
            record.offset = 0;
            if doc.active_project == project {
                doc.active_project = remaining.first().cloned().unwrap_or_default();
            }
        })?;

        info!("[{project}] stopped");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stops one service, leaving its siblings running.
    pub fn stop_service(&self, project: &str, service: &str) -> Result<(), ManagerError> {
        let process = self.lookup(project, service)?;
        process.stop()?;
        self.state.update(|doc| {
            if let Some(record) = doc.projects.get_mut(project)
                && let Some(row) = record.services.get_mut(service)
            {
                row.pid = 0;
                row.status = ServiceStatus::Stopped;
            }
        })?;
        Ok(())
    }

    /// Stops every running project, fanning out one stop per project.
    pub fn stop_all(&self) {
        let projects = self.running_projects();
        for project in &projects {
            self.save_git_branch(project);
        }
        thread::scope(|scope| {
            for project in &projects {
                scope.spawn(move || {
                    if let Err(err) = self.stop_project(project) {
                        warn!("[{project}] stop failed during shutdown: {err}");
                    }
                });
            }
        });
    }

    // ------------------------------------------------------------------
    // Restart
    // ------------------------------------------------------------------

    /// Restarts a whole project, preserving its exclusive/parallel
    /// interpretation (offset 0 means exclusive).
    pub fn restart_project(self: &Arc<Self>, project: &str) -> Result<(), ManagerError> {
        let prior_offset = if self.is_running(project) {
            self.allocator.get(project)
        } else {
            self.state
                .snapshot()
                .projects
                .get(project)
                .map(|record| record.offset)
                .unwrap_or(0)
        };
        let exclusive = prior_offset == 0;

        let path = self
            .project_path(project)
            .ok_or_else(|| ManagerError::UnknownProject {
                project: project.to_string(),
            })?;

        self.stop_project(project)?;
        thread::sleep(RESTART_PAUSE);

        let manifest = config::load_manifest(&path)?;
        self.start_project(project, manifest, &path, exclusive)
    }

    /// Restarts one service in place, clearing its stale log history and
    /// runtime port signal.
    pub fn restart_service(
        self: &Arc<Self>,
        project: &str,
        service: &str,
    ) -> Result<(), ManagerError> {
        let process = self.lookup(project, service)?;
        process.stop()?;
        self.signals.clear(project, service);
        self.pipeline.reset_service(project, service);

        match process.start() {
            Ok(()) => {
                let pid = process.pid();
                let port = process.port();
                self.state.update(|doc| {
                    let record = doc.projects.entry(project.to_string()).or_default();
                    record.services.insert(
                        service.to_string(),
                        ServiceRecord {
                            pid,
                            port,
                            status: ServiceStatus::Running,
                        },
                    );
                })?;
                Ok(())
            }
            Err(err) => {
                let _ = self.state.update(|doc| {
                    if let Some(record) = doc.projects.get_mut(project)
                        && let Some(row) = record.services.get_mut(service)
                    {
                        row.pid = 0;
                        row.status = ServiceStatus::Crashed;
                    }
                });
                Err(err)
            }
        }
    }

    // ------------------------------------------------------------------
    // Focus / mode
    // ------------------------------------------------------------------

    /// Updates the active project and/or mode without touching processes.
    pub fn set_focus(
        &self,
        project: Option<&str>,
        mode: Option<Mode>,
    ) -> Result<(), ManagerError> {
        self.state.update(|doc| {
            if let Some(project) = project {
                doc.active_project = project.to_string();
            }
            if let Some(mode) = mode {
                doc.mode = mode;
            }
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Restarts every project recorded as running, in ascending offset
    /// order. Best-effort: failures are logged and skipped.
    pub fn recover(self: &Arc<Self>) {
        let doc = self.state.snapshot();
        let mut candidates: Vec<(String, u16, String)> = doc
            .projects
            .iter()
            .filter(|(_, record)| record.status == ProjectStatus::Running)
            .map(|(name, record)| {
                let path = if record.path.is_empty() {
                    doc.registry.get(name).cloned().unwrap_or_default()
                } else {
                    record.path.clone()
                };
                (name.clone(), record.offset, path)
            })
            .collect();
        candidates.sort_by_key(|(_, offset, _)| *offset);

        if candidates.is_empty() {
            return;
        }
        info!("Recovering {} project(s)", candidates.len());
        let exclusive = doc.mode == Mode::Focus && candidates.len() == 1;

        for (name, offset, path) in candidates {
            if path.is_empty() {
                warn!("[{name}] no recorded path; skipping recovery");
                continue;
            }
            let path = PathBuf::from(path);
            let manifest = match config::load_manifest(&path) {
                Ok(manifest) => manifest,
                Err(err) => {
                    warn!("[{name}] manifest load failed during recovery: {err}");
                    continue;
                }
            };
            self.allocator.set(&name, offset);
            if let Err(err) = self.start_project(&name, manifest, &path, exclusive) {
                warn!("[{name}] recovery start failed: {err}");
            }
        }

        let active = if doc.active_project.is_empty() {
            None
        } else {
            Some(doc.active_project.as_str())
        };
        if let Err(err) = self.set_focus(active, Some(doc.mode)) {
            warn!("Failed to restore focus after recovery: {err}");
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Point-in-time snapshot of the process table.
    pub fn status(&self) -> HashMap<String, HashMap<String, ServiceInfo>> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .processes
            .iter()
            .map(|(project, services)| {
                let rows = services
                    .iter()
                    .map(|(name, process)| {
                        (
                            name.clone(),
                            ServiceInfo {
                                pid: process.pid(),
                                port: process.port(),
                                running: process.is_running(),
                                ready: process.is_ready(),
                            },
                        )
                    })
                    .collect();
                (project.clone(), rows)
            })
            .collect()
    }

    /// Like [`Manager::status`], restricted to nonzero ports.
    pub fn ports(&self) -> HashMap<String, HashMap<String, u16>> {
        self.status()
            .into_iter()
            .map(|(project, services)| {
                let ports = services
                    .into_iter()
                    .filter(|(_, info)| info.port != 0)
                    .map(|(name, info)| (name, info.port))
                    .collect();
                (project, ports)
            })
            .collect()
    }

    /// Last `n` log lines for one service.
    pub fn logs(&self, project: &str, service: &str, n: usize) -> Vec<LogLine> {
        self.pipeline.tail(project, service, n)
    }

    /// Registers a live log subscriber.
    pub fn subscribe(
        &self,
        project: &str,
        service: &str,
    ) -> (u64, std::sync::mpsc::Receiver<LogLine>) {
        self.pipeline.subscribe(project, service)
    }

    /// Removes a live log subscriber.
    pub fn unsubscribe(&self, id: u64) {
        self.pipeline.unsubscribe(id);
    }

    /// Whether a project is present in the process table.
    pub fn is_running(&self, project: &str) -> bool {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.processes.contains_key(project)
    }

    /// Names of all projects currently in the process table.
    pub fn running_projects(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut projects: Vec<String> = inner.processes.keys().cloned().collect();
        projects.sort();
        projects
    }

    /// Resolves a project's directory from live config, the registry, or
    /// its runtime record.
    pub fn project_path(&self, project: &str) -> Option<PathBuf> {
        {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = inner.configs.get(project) {
                return Some(entry.path.clone());
            }
        }
        let doc = self.state.snapshot();
        if let Some(path) = doc.registry.get(project)
            && !path.is_empty()
        {
            return Some(PathBuf::from(path));
        }
        doc.projects
            .get(project)
            .filter(|record| !record.path.is_empty())
            .map(|record| PathBuf::from(&record.path))
    }

    /// Captures the project's current git branch into its runtime record.
    /// Best-effort; failures are ignored.
    pub fn save_git_branch(&self, project: &str) {
        let Some(path) = self.project_path(project) else {
            return;
        };
        let output = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(&path)
            .output();
        if let Ok(output) = output
            && output.status.success()
        {
            let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if !branch.is_empty() {
                let _ = self.state.update(|doc| {
                    doc.projects
                        .entry(project.to_string())
                        .or_default()
                        .git_branch = branch;
                });
            }
        }
    }

    fn lookup(&self, project: &str, service: &str) -> Result<Arc<Process>, ManagerError> {
        let inner = self.inner.lock()?;
        let services =
            inner
                .processes
                .get(project)
                .ok_or_else(|| ManagerError::UnknownProject {
                    project: project.to_string(),
                })?;
        services
            .get(service)
            .cloned()
            .ok_or_else(|| ManagerError::ServiceNotFound {
                project: project.to_string(),
                service: service.to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Process wiring
    // ------------------------------------------------------------------

    fn build_process(
        self: &Arc<Self>,
        project: &str,
        service: &str,
        spec: &ServiceSpec,
        project_path: &Path,
        port: u16,
    ) -> Arc<Process> {
        let weak = Arc::downgrade(self);

        let on_output = {
            let weak = Weak::clone(&weak);
            let project = project.to_string();
            let service = service.to_string();
            Arc::new(move |line: &str, is_err: bool| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_output(&project, &service, line, is_err);
                }
            }) as crate::process::OutputFn
        };

        let on_exit = {
            let weak = Weak::clone(&weak);
            let project = project.to_string();
            let service = service.to_string();
            Arc::new(move |code: Option<i32>, intentional: bool| {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_exit(&project, &service, code, intentional);
                }
            }) as crate::process::ExitFn
        };

        let on_ready = {
            let project = project.to_string();
            let service = service.to_string();
            Arc::new(move || {
                debug!("[{project}:{service}] ready");
            }) as crate::process::ReadyFn
        };

        Arc::new(Process::new(
            ProcessSpec {
                project: project.to_string(),
                name: service.to_string(),
                cmd: spec.cmd.clone(),
                dir: config::service_dir(project_path, spec),
                env: spec.env.clone().unwrap_or_default(),
                port,
                port_env: spec.port_env.clone(),
                ready_pattern: spec.ready.clone(),
            },
            Callbacks {
                on_output,
                on_exit,
                on_ready,
            },
        ))
    }

    /// Fans one output line into the log pipeline and feeds the runtime
    /// port inferrer.
    fn handle_output(&self, project: &str, service: &str, text: &str, is_err: bool) {
        let line = LogLine::new(project, service, text.to_string(), is_err);
        let skip_inference = line.is_note();
        self.pipeline.write(line);
        if skip_inference {
            return;
        }

        let Some(detected) = infer::extract_port(text) else {
            return;
        };
        let process = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            inner
                .processes
                .get(project)
                .and_then(|services| services.get(service))
                .cloned()
        };
        let Some(process) = process else {
            return;
        };

        let current = process.port();
        if !self.signals.observe(project, service, detected, current) {
            return;
        }

        let offset = self.allocator.get(project);
        // The override stores the pre-offset base port, clamped so it never
        // reaches zero.
        let base = if detected > offset {
            detected - offset
        } else {
            detected
        };

        process.set_port(detected);
        self.pipeline.write(LogLine::note(
            project,
            service,
            &format!("detected runtime port {detected} (base {base}, offset {offset})"),
        ));

        let pid = process.pid();
        let _ = self.state.update(|doc| {
            let record = doc.projects.entry(project.to_string()).or_default();
            record.port_overrides.insert(service.to_string(), base);
            record.services.insert(
                service.to_string(),
                ServiceRecord {
                    pid,
                    port: detected,
                    status: ServiceStatus::Running,
                },
            );
        });
        info!("[{project}:{service}] runtime port {detected} adopted (base {base})");
    }

    /// Labels an exit as stop or crash, persists the service row, and
    /// applies the `on_failure` restart policy.
    fn handle_exit(
        self: &Arc<Self>,
        project: &str,
        service: &str,
        code: Option<i32>,
        intentional: bool,
    ) {
        if intentional {
            debug!("[{project}:{service}] stopped");
            return;
        }
        warn!(
            "[{project}:{service}] crashed (exit code {})",
            code.map(|c| c.to_string()).unwrap_or_else(|| "?".into())
        );

        let _ = self.state.update(|doc| {
            if let Some(record) = doc.projects.get_mut(project)
                && let Some(row) = record.services.get_mut(service)
            {
                row.pid = 0;
                row.status = ServiceStatus::Crashed;
            }
        });

        let (policy, process) = {
            let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            let policy = inner
                .configs
                .get(project)
                .and_then(|entry| entry.manifest.services.get(service))
                .map(|spec| spec.restarts_on_failure())
                .unwrap_or(false);
            let process = inner
                .processes
                .get(project)
                .and_then(|services| services.get(service))
                .cloned();
            (policy, process)
        };

        if policy && let Some(process) = process {
            let manager = Arc::clone(self);
            let project = project.to_string();
            let service = service.to_string();
            thread::spawn(move || {
                thread::sleep(AUTO_RESTART_DELAY);
                // The project may have been stopped while we slept.
                let still_tracked = {
                    let inner =
                        manager.inner.lock().unwrap_or_else(|e| e.into_inner());
                    inner
                        .processes
                        .get(&project)
                        .and_then(|services| services.get(&service))
                        .map(|tracked| Arc::ptr_eq(tracked, &process))
                        .unwrap_or(false)
                };
                if !still_tracked {
                    debug!("[{project}:{service}] crash restart cancelled");
                    return;
                }
                manager.pipeline.reset_service(&project, &service);
                match process.start() {
                    Ok(()) => {
                        let pid = process.pid();
                        let port = process.port();
                        info!("[{project}:{service}] restarted after crash (pid {pid})");
                        let _ = manager.state.update(|doc| {
                            let record =
                                doc.projects.entry(project.clone()).or_default();
                            record.services.insert(
                                service.clone(),
                                ServiceRecord {
                                    pid,
                                    port,
                                    status: ServiceStatus::Running,
                                },
                            );
                        });
                    }
                    Err(err) => {
                        error!("[{project}:{service}] restart after crash failed: {err}");
                    }
                }
            });
        } else {
            // No restart policy: if nothing in the project is left running,
            // the whole project is considered crashed.
            let all_dead = {
                let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                inner
                    .processes
                    .get(project)
                    .map(|services| {
                        !services.is_empty()
                            && services.values().all(|process| !process.is_running())
                    })
                    .unwrap_or(false)
            };
            if all_dead {
                warn!("[{project}] all services exited unexpectedly");
                let _ = self.state.update(|doc| {
                    if let Some(record) = doc.projects.get_mut(project) {
                        record.status = ProjectStatus::Crashed;
                    }
                });
            }
        }
    }
}

/// Runs a hook command: space-split tokens, first token is the executable,
/// executed in the project directory.
fn run_hook(command: &str, dir: &Path) -> Result<(), String> {
    let tokens: Vec<&str> = command.split_whitespace().collect();
    let Some((program, args)) = tokens.split_first() else {
        return Ok(());
    };
    match Command::new(program).args(args).current_dir(dir).status() {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(format!("exited with {status}")),
        Err(err) => Err(err.to_string()),
    }
}
