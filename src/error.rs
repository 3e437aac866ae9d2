//! Error handling for hun.
use thiserror::Error;

/// Errors raised while loading or validating a project manifest or the
/// global configuration file.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Error reading a manifest or config file from disk.
    #[error("Failed to read manifest: {0}")]
    ReadError(#[from] std::io::Error),

    /// Error parsing YAML.
    #[error("Invalid YAML format: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// The manifest declares no project name.
    #[error("Manifest has an empty project name")]
    MissingName,

    /// The manifest declares no services.
    #[error("Project '{project}' defines no services")]
    NoServices {
        /// The project missing services.
        project: String,
    },

    /// A service declares an empty command.
    #[error("Service '{service}' has an empty cmd")]
    EmptyCommand {
        /// The offending service.
        service: String,
    },

    /// A service declares an unsupported restart policy.
    #[error("Service '{service}' has invalid restart policy '{policy}'")]
    InvalidRestartPolicy {
        /// The offending service.
        service: String,
        /// The rejected policy value.
        policy: String,
    },

    /// A `depends_on` entry references an undefined sibling.
    #[error("Service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency {
        /// The service with the dangling reference.
        service: String,
        /// The missing dependency name.
        dependency: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {cycle}")]
    DependencyCycle {
        /// Human-readable cycle description (e.g. `a -> b -> a`).
        cycle: String,
    },

    /// Detection metadata names an unknown profile.
    #[error("Unknown detect profile '{profile}' (expected local, compose, or hybrid)")]
    InvalidProfile {
        /// The rejected profile value.
        profile: String,
    },
}

/// Errors raised by the persisted state store.
#[derive(Debug, Error)]
pub enum StateError {
    /// Error reading or writing the state document.
    #[error("State file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing or serializing the JSON document.
    #[error("Invalid state document: {0}")]
    Parse(#[from] serde_json::Error),

    /// The document carries a schema version newer than this build supports.
    #[error("Unsupported state schema version {0}")]
    UnsupportedSchema(u32),
}

/// Errors raised by the manager and the per-service process machinery.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Manifest loading or validation failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Persisted state read or write failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// A start was requested for a project that is already running.
    #[error("Project '{project}' is already running")]
    AlreadyRunning {
        /// The conflicting project.
        project: String,
    },

    /// A project name is not registered or not running.
    #[error("Unknown project '{project}'")]
    UnknownProject {
        /// The missing project.
        project: String,
    },

    /// A service name does not exist within a project.
    #[error("Service '{service}' not found in project '{project}'")]
    ServiceNotFound {
        /// The project searched.
        project: String,
        /// The missing service.
        service: String,
    },

    /// A service process is already running.
    #[error("Service '{service}' is already running")]
    ServiceAlreadyRunning {
        /// The conflicting service.
        service: String,
    },

    /// Error spawning a service process.
    #[error("Failed to start service '{service}': {source}")]
    ServiceStartError {
        /// The service that failed to start.
        service: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A service process could not be brought down.
    #[error("Failed to stop service '{service}': {reason}")]
    ServiceStopError {
        /// The service that failed to stop.
        service: String,
        /// Description of the failure.
        reason: String,
    },

    /// A lifecycle hook failed to run or exited non-zero.
    #[error("Hook '{hook}' for project '{project}' failed: {reason}")]
    HookFailed {
        /// The hook stage (`pre_start` or `post_stop`).
        hook: String,
        /// The project the hook belongs to.
        project: String,
        /// Description of the failure.
        reason: String,
    },

    /// A registry entry conflicts with an existing one.
    #[error("Project '{project}' is already registered at {path}")]
    AlreadyRegistered {
        /// The conflicting project name.
        project: String,
        /// The path it is registered under.
        path: String,
    },

    /// An unsupported mode value was supplied to a focus update.
    #[error("Invalid mode '{mode}' (expected focus or multitask)")]
    InvalidMode {
        /// The rejected mode value.
        mode: String,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),
}

impl<T> From<std::sync::PoisonError<T>> for ManagerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ManagerError::MutexPoisonError(err.to_string())
    }
}

/// Errors raised by the control channel helpers.
#[derive(Debug, Error)]
pub enum ControlError {
    /// Control socket I/O error.
    #[error("control socket I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Error serializing or deserializing wire messages.
    #[error("failed to serialise control message: {0}")]
    Serde(#[from] serde_json::Error),

    /// Supervisor reported an error.
    #[error("supervisor reported error: {0}")]
    Server(String),

    /// Control socket not available or supervisor not running.
    #[error("control socket not available")]
    NotAvailable,

    /// The daemon failed to come up within the spawn deadline.
    #[error("daemon did not become responsive within {0} seconds")]
    DaemonStartTimeout(u64),
}

/// Supervisor errors.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Manager error.
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// Control channel error.
    #[error(transparent)]
    Control(#[from] ControlError),

    /// Persisted state error.
    #[error(transparent)]
    State(#[from] StateError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Another supervisor instance owns the socket.
    #[error("supervisor already running with pid {pid}")]
    AlreadyRunning {
        /// PID recorded in the anchor file.
        pid: i32,
    },
}
