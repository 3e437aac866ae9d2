use chrono::Local;
use std::{
    collections::HashMap,
    error::Error,
    fs,
    io::{BufRead, BufReader, Write},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    process,
};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use hun::{
    cli::{Cli, Commands, parse_args, split_target},
    config,
    doctor,
    error::ManagerError,
    ipc::{self, Request},
    logs::LogLine,
    manager::ServiceInfo,
    runtime,
    state::StateStore,
    supervisor::Supervisor,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    let is_daemon = matches!(args.command, Commands::Daemon);
    init_logging(&args, is_daemon);

    match args.command {
        Commands::Daemon => {
            let supervisor = Supervisor::new()?;
            supervisor.run()?;
        }
        Commands::Init => {
            let cwd = std::env::current_dir()?;
            let name = register_project(&cwd)?;
            println!("Registered '{name}' at {}", cwd.display());
        }
        Commands::Add { path } => {
            let dir = PathBuf::from(&path);
            let dir = dir.canonicalize().unwrap_or(dir);
            let name = register_project(&dir)?;
            println!("Registered '{name}' at {}", dir.display());
        }
        Commands::Remove { name } => {
            let store = StateStore::open()?;
            let known = store.snapshot().registry.contains_key(&name);
            if !known {
                return Err(Box::new(ManagerError::UnknownProject { project: name }));
            }
            store.update(|doc| {
                doc.registry.remove(&name);
                doc.projects.remove(&name);
            })?;
            println!("Removed '{name}'");
        }
        Commands::List => {
            let doc = StateStore::open()?.snapshot();
            if doc.registry.is_empty() {
                println!("No projects registered. Use `hun add <path>` to add one.");
                return Ok(());
            }
            let mut names: Vec<&String> = doc.registry.keys().collect();
            names.sort();
            for name in names {
                let status = doc
                    .projects
                    .get(name)
                    .map(|record| record.status.to_string())
                    .unwrap_or_else(|| "stopped".to_string());
                let marker = if doc.active_project == *name { "*" } else { " " };
                println!("{marker} {name:<20} {status:<8} {}", doc.registry[name]);
            }
        }
        Commands::Run { project } => {
            start_project(&project, "parallel")?;
        }
        Commands::Switch { project } => {
            start_project(&project, "exclusive")?;
        }
        Commands::Stop { project, all } => {
            if all {
                ipc::request(&Request::new("stop"))?;
                println!("Stopped all projects");
            } else {
                let target = match project {
                    Some(project) => project,
                    None => {
                        let doc = StateStore::open()?.snapshot();
                        if doc.active_project.is_empty() {
                            println!("Nothing to stop (no active project)");
                            return Ok(());
                        }
                        doc.active_project
                    }
                };
                ipc::request(&Request::new("stop").project(&target))?;
                println!("Stopped '{target}'");
            }
        }
        Commands::Restart { target } => {
            let (project, service) = split_target(&target);
            let mut request = Request::new("restart").project(project);
            if !service.is_empty() {
                request = request.service(service);
            }
            ipc::request(&request)?;
            println!("Restarted '{target}'");
        }
        Commands::Status => {
            let response = ipc::request(&Request::new("status"))?;
            let status: HashMap<String, HashMap<String, ServiceInfo>> =
                serde_json::from_value(response.data.unwrap_or_default())?;
            render_status(&status);
        }
        Commands::Ports => {
            let response = ipc::request(&Request::new("ports"))?;
            let ports: HashMap<String, HashMap<String, u16>> =
                serde_json::from_value(response.data.unwrap_or_default())?;
            render_ports(&ports);
        }
        Commands::Logs { target, lines } => {
            let (project, service) = split_target(&target);
            if service.is_empty() {
                return Err("logs target must be <project>:<service>".into());
            }
            let mut request = Request::new("logs").project(project).service(service);
            request.lines = Some(lines);
            let response = ipc::request(&request)?;
            let lines: Vec<LogLine> =
                serde_json::from_value(response.data.unwrap_or_default())?;
            for line in lines {
                print_log_line(&line);
            }
        }
        Commands::Tail { target } => {
            let (project, service) = split_target(&target);
            tail_logs(project, service)?;
        }
        Commands::Open { service } => {
            open_service(service.as_deref())?;
        }
        Commands::Doctor => {
            let reports = doctor::run_checks();
            for report in &reports {
                let marker = if report.ok { "ok " } else { "warn" };
                println!("[{marker}] {:<16} {}", report.name, report.detail);
            }
        }
        Commands::Version => {
            println!("hun {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn init_logging(args: &Cli, is_daemon: bool) {
    let default_level = if is_daemon { "info" } else { "warn" };
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    if !is_daemon {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return;
    }

    // The daemon keeps its own log file under the hun home.
    let log_dir = runtime::log_dir();
    if let Err(err) = fs::create_dir_all(&log_dir) {
        eprintln!("Failed to create log directory {:?}: {}", log_dir, err);
    }
    let log_path = log_dir.join("supervisor.log");
    let file = match fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open supervisor log file {:?}: {}", log_path, err);
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
            return;
        }
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(move || file.try_clone().expect("clone log file handle"))
        .with_ansi(false)
        .try_init();
}

/// Validates the manifest at `dir` and records the project in the registry.
fn register_project(dir: &Path) -> Result<String, Box<dyn Error>> {
    let manifest = config::load_manifest(dir)?;
    let name = manifest.name.clone();
    let path = dir.display().to_string();

    let store = StateStore::open()?;
    let doc = store.snapshot();
    if let Some(existing) = doc.registry.get(&name)
        && existing != &path
    {
        return Err(Box::new(ManagerError::AlreadyRegistered {
            project: name,
            path: existing.clone(),
        }));
    }

    store.update(|doc| {
        doc.registry.insert(name.clone(), path.clone());
    })?;
    Ok(name)
}

fn start_project(project: &str, mode: &str) -> Result<(), Box<dyn Error>> {
    let response = ipc::request(&Request::new("start").project(project).mode(mode))?;
    let status = response
        .data
        .as_ref()
        .and_then(|data| data.get("status"))
        .and_then(|status| status.as_str())
        .unwrap_or("");
    if status == "already_running" {
        println!("'{project}' is already running");
    } else {
        println!("Started '{project}'");
    }
    Ok(())
}

fn render_status(status: &HashMap<String, HashMap<String, ServiceInfo>>) {
    if status.is_empty() {
        println!("No projects running");
        return;
    }
    println!("{:<16} {:<16} {:>8} {:>6}  STATE", "PROJECT", "SERVICE", "PID", "PORT");
    let mut projects: Vec<&String> = status.keys().collect();
    projects.sort();
    for project in projects {
        let services = &status[project];
        let mut names: Vec<&String> = services.keys().collect();
        names.sort();
        for name in names {
            let info = &services[name];
            let state = if !info.running {
                "stopped"
            } else if info.ready {
                "ready"
            } else {
                "starting"
            };
            let port = if info.port == 0 {
                "-".to_string()
            } else {
                info.port.to_string()
            };
            println!(
                "{:<16} {:<16} {:>8} {:>6}  {state}",
                project, name, info.pid, port
            );
        }
    }
}

fn render_ports(ports: &HashMap<String, HashMap<String, u16>>) {
    let mut projects: Vec<&String> = ports.keys().collect();
    projects.sort();
    let mut any = false;
    for project in projects {
        let services = &ports[project];
        let mut names: Vec<&String> = services.keys().collect();
        names.sort();
        for name in names {
            println!("{project}:{name} {}", services[name]);
            any = true;
        }
    }
    if !any {
        println!("No bound ports");
    }
}

fn print_log_line(line: &LogLine) {
    let stamp = line.ts.with_timezone(&Local).format("%H:%M:%S");
    let stream = if line.is_err { "err" } else { "out" };
    println!("[{stamp}] [{stream}] {}", line.text);
}

/// Streams live log lines over a dedicated connection until interrupted.
fn tail_logs(project: &str, service: &str) -> Result<(), Box<dyn Error>> {
    ipc::ensure_daemon()?;

    let mut stream = UnixStream::connect(runtime::socket_path())?;
    let mut request = Request::new("subscribe").project(project);
    if !service.is_empty() {
        request = request.service(service);
    }
    let payload = serde_json::to_vec(&request)?;
    stream.write_all(&payload)?;
    stream.write_all(b"\n")?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    // First line is the subscription acknowledgement.
    reader.read_line(&mut line)?;
    let ack: ipc::Response = serde_json::from_str(line.trim())?;
    if !ack.ok {
        return Err(ack.error.into());
    }

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            debug!("Subscription stream closed");
            return Ok(());
        }
        match serde_json::from_str::<LogLine>(line.trim()) {
            Ok(log_line) => print_log_line(&log_line),
            Err(err) => warn!("Skipping malformed stream line: {err}"),
        }
    }
}

/// Prints the URL of a running service and tries to open it in a browser.
fn open_service(service: Option<&str>) -> Result<(), Box<dyn Error>> {
    let doc = StateStore::open()?.snapshot();
    let project = if doc.active_project.is_empty() {
        return Err("no active project; start one with `hun run <project>`".into());
    } else {
        doc.active_project.clone()
    };

    let response = ipc::request(&Request::new("ports"))?;
    let ports: HashMap<String, HashMap<String, u16>> =
        serde_json::from_value(response.data.unwrap_or_default())?;
    let services = ports.get(&project).cloned().unwrap_or_default();

    let port = match service {
        Some(name) => services.get(name).copied().ok_or_else(|| {
            format!("service '{name}' of '{project}' has no bound port")
        })?,
        None => {
            let mut names: Vec<&String> = services.keys().collect();
            names.sort();
            match names.first() {
                Some(name) => services[name.as_str()],
                None => return Err(format!("'{project}' has no bound ports").into()),
            }
        }
    };

    let url = format!("http://localhost:{port}");
    println!("{url}");

    let opener = if cfg!(target_os = "macos") {
        "open"
    } else {
        "xdg-open"
    };
    let _ = process::Command::new(opener)
        .arg(&url)
        .stdout(process::Stdio::null())
        .stderr(process::Stdio::null())
        .spawn();
    Ok(())
}
