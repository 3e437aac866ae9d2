//! Manifest and global configuration for hun.
//!
//! A project manifest lives at `<projectDir>/.hun.yml` and describes a named
//! bundle of services. The optional global config at `<hunDir>/config.yml`
//! carries supervisor-wide settings such as the port-offset step.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::error::ManifestError;
use crate::runtime;

/// Restart policy accepted by the manifest besides the empty default.
pub const RESTART_ON_FAILURE: &str = "on_failure";

/// Detection profiles accepted in `detect.profile`.
pub const DETECT_PROFILES: [&str; 3] = ["local", "compose", "hybrid"];

/// Represents the structure of a project manifest.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Manifest {
    /// Project name, unique across the registry.
    #[serde(default)]
    pub name: String,
    /// Map of service names to their specifications, in declaration order.
    #[serde(default)]
    pub services: IndexMap<String, ServiceSpec>,
    /// Optional lifecycle hook commands.
    #[serde(default)]
    pub hooks: Option<HooksSpec>,
    /// Optional log rotation settings for the project.
    #[serde(default)]
    pub logs: Option<LogRotationSpec>,
    /// Detection metadata recorded by the project detector; not used at runtime.
    #[serde(default)]
    pub detect: Option<DetectMeta>,
}

/// Specification of a single service.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct ServiceSpec {
    /// Shell command used to start the service.
    #[serde(default)]
    pub cmd: String,
    /// Working directory relative to the project root.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Declared base port; 0 means the service binds no well-known port.
    #[serde(default)]
    pub port: u16,
    /// Environment variable through which the actual port is exposed.
    #[serde(default)]
    pub port_env: Option<String>,
    /// Substring whose appearance on any output stream marks the service ready.
    #[serde(default)]
    pub ready: Option<String>,
    /// Extra environment variables for the child.
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,
    /// Names of sibling services that must start first.
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
    /// Restart policy: `on_failure` or unset.
    #[serde(default)]
    pub restart: Option<String>,
}

impl ServiceSpec {
    /// Whether a crash of this service should trigger an automatic restart.
    pub fn restarts_on_failure(&self) -> bool {
        self.restart.as_deref() == Some(RESTART_ON_FAILURE)
    }
}

/// Pre-start and post-stop hook commands.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct HooksSpec {
    /// Command run in the project directory before any service starts.
    #[serde(default)]
    pub pre_start: Option<String>,
    /// Command run best-effort after the project stops.
    #[serde(default)]
    pub post_stop: Option<String>,
}

/// Log rotation settings declared in the manifest.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct LogRotationSpec {
    /// Maximum active file size in megabytes before rotation.
    #[serde(default)]
    pub max_size_mb: Option<u64>,
    /// Number of rotated backups to keep.
    #[serde(default)]
    pub max_files: Option<usize>,
    /// Days to retain rotated backups.
    #[serde(default)]
    pub retention_days: Option<u64>,
}

/// Detection metadata captured when the manifest was generated.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct DetectMeta {
    /// Detection profile: `local`, `compose`, or `hybrid`.
    #[serde(default)]
    pub profile: Option<String>,
    /// Manifest schema version stamped by the detector.
    #[serde(default)]
    pub schema: Option<u32>,
}

/// Loads and validates the manifest inside `dir`.
pub fn load_manifest(dir: &Path) -> Result<Manifest, ManifestError> {
    let path = dir.join(runtime::MANIFEST_FILE);
    let raw = fs::read_to_string(&path)?;
    let manifest: Manifest = serde_yaml::from_str(&raw)?;
    validate(&manifest)?;
    Ok(manifest)
}

/// Validates manifest invariants: naming, commands, restart policies,
/// dependency resolution, and graph acyclicity.
pub fn validate(manifest: &Manifest) -> Result<(), ManifestError> {
    if manifest.name.trim().is_empty() {
        return Err(ManifestError::MissingName);
    }
    if manifest.services.is_empty() {
        return Err(ManifestError::NoServices {
            project: manifest.name.clone(),
        });
    }

    for (name, service) in &manifest.services {
        if service.cmd.trim().is_empty() {
            return Err(ManifestError::EmptyCommand {
                service: name.clone(),
            });
        }
        if let Some(policy) = &service.restart
            && !policy.is_empty()
            && policy != RESTART_ON_FAILURE
        {
            return Err(ManifestError::InvalidRestartPolicy {
                service: name.clone(),
                policy: policy.clone(),
            });
        }
        for dep in service.depends_on.iter().flatten() {
            if !manifest.services.contains_key(dep) {
                return Err(ManifestError::UnknownDependency {
                    service: name.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }

    if let Some(detect) = &manifest.detect
        && let Some(profile) = &detect.profile
        && !DETECT_PROFILES.contains(&profile.as_str())
    {
        return Err(ManifestError::InvalidProfile {
            profile: profile.clone(),
        });
    }

    // Validation also proves acyclicity.
    start_order(manifest)?;
    Ok(())
}

#[derive(Clone, Copy, PartialEq)]
enum VisitColor {
    Unvisited,
    InProgress,
    Done,
}

/// Returns the service names in a valid dependency start order.
///
/// Dependencies start before their dependents. Ties are broken by
/// encounter order during the DFS: roots are visited as declared in the
/// manifest, and dependencies in the order they are listed.
pub fn start_order(manifest: &Manifest) -> Result<Vec<String>, ManifestError> {
    let mut colors: HashMap<&str, VisitColor> = manifest
        .services
        .keys()
        .map(|name| (name.as_str(), VisitColor::Unvisited))
        .collect();
    let mut order = Vec::with_capacity(manifest.services.len());
    let mut trail: Vec<&str> = Vec::new();

    for root in manifest.services.keys() {
        visit(manifest, root, &mut colors, &mut trail, &mut order)?;
    }
    Ok(order)
}

fn visit<'a>(
    manifest: &'a Manifest,
    name: &'a str,
    colors: &mut HashMap<&'a str, VisitColor>,
    trail: &mut Vec<&'a str>,
    order: &mut Vec<String>,
) -> Result<(), ManifestError> {
    match colors.get(name) {
        Some(VisitColor::Done) => return Ok(()),
        Some(VisitColor::InProgress) => {
            let mut cycle: Vec<&str> = trail
                .iter()
                .skip_while(|entry| **entry != name)
                .copied()
                .collect();
            cycle.push(name);
            return Err(ManifestError::DependencyCycle {
                cycle: cycle.join(" -> "),
            });
        }
        _ => {}
    }

    colors.insert(name, VisitColor::InProgress);
    trail.push(name);

    if let Some(spec) = manifest.services.get(name) {
        for dep in spec.depends_on.iter().flatten() {
            visit(manifest, dep, colors, trail, order)?;
        }
    }

    trail.pop();
    colors.insert(name, VisitColor::Done);
    order.push(name.to_string());
    Ok(())
}

/// Global supervisor configuration from `<hunDir>/config.yml`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct GlobalConfig {
    /// Port-related settings.
    #[serde(default)]
    pub ports: Option<PortsConfig>,
    /// Legacy key kept for backward compatibility; reported as unsupported.
    #[serde(default)]
    pub defaults: Option<serde_yaml::Value>,
    /// Legacy key kept for backward compatibility; reported as unsupported.
    #[serde(default)]
    pub scan_dirs: Option<serde_yaml::Value>,
    /// Legacy key kept for backward compatibility; reported as unsupported.
    #[serde(default)]
    pub hotkeys: Option<serde_yaml::Value>,
}

/// Port allocation settings.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct PortsConfig {
    /// Step between consecutive project offsets.
    #[serde(default)]
    pub default_offset: Option<u16>,
}

impl GlobalConfig {
    /// Loads the global config, returning defaults when the file is absent.
    pub fn load() -> Result<Self, ManifestError> {
        let path = runtime::global_config_path();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Returns the offset step, never less than 1.
    pub fn offset_step(&self) -> u16 {
        self.ports
            .as_ref()
            .and_then(|ports| ports.default_offset)
            .unwrap_or(1)
            .max(1)
    }

    /// Returns the names of legacy keys present in the file.
    pub fn unsupported_keys(&self) -> Vec<&'static str> {
        let mut keys = Vec::new();
        if self.defaults.is_some() {
            keys.push("defaults");
        }
        if self.scan_dirs.is_some() {
            keys.push("scan_dirs");
        }
        if self.hotkeys.is_some() {
            keys.push("hotkeys");
        }
        keys
    }
}

/// Resolves a service working directory against the project root.
pub fn service_dir(project_path: &Path, spec: &ServiceSpec) -> PathBuf {
    match &spec.cwd {
        Some(cwd) if !cwd.is_empty() => project_path.join(cwd),
        _ => project_path.to_path_buf(),
    }
}
