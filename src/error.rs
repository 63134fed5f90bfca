// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings - the fields ARE used
// in the Display impl but rustc's lint pass doesn't see this.
#![allow(unused_assignments)]

use crate::docker::DockerError;
use miette::Diagnostic;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Why a `wait_healthy` call gave up.
#[derive(Error, Debug)]
pub enum HealthcheckError {
    #[error("{container} container is unhealthy, log={log}")]
    Unhealthy {
        container: String,
        log: String,
        suggestion: String,
    },

    #[error("{container} container exited, log={log}")]
    Exited {
        container: String,
        log: String,
        suggestion: String,
    },

    #[error("health check timed out after {}s: labels {labels} resulted in {}",
        .waited.as_secs(),
        pending_summary(.pending)
    )]
    Timeout {
        labels: String,
        waited: Duration,
        pending: Vec<PendingContainer>,
    },
}

/// A container that had not reached `healthy` when the wait ran out.
#[derive(Debug, Clone)]
pub struct PendingContainer {
    pub container: String,
    pub status: String,
    /// Last healthcheck output, empty when the container has no healthcheck.
    pub log: String,
    pub suggestion: String,
}

fn pending_summary(pending: &[PendingContainer]) -> String {
    pending
        .iter()
        .map(|p| {
            if p.log.is_empty() {
                format!("{} ({})", p.container, p.status)
            } else {
                format!("{} ({}), log={}", p.container, p.status, p.log.trim_end())
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

impl HealthcheckError {
    pub fn suggestion(&self) -> String {
        match self {
            HealthcheckError::Unhealthy { suggestion, .. }
            | HealthcheckError::Exited { suggestion, .. } => suggestion.clone(),
            HealthcheckError::Timeout { pending, .. } => pending
                .iter()
                .map(|p| p.suggestion.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(ddev::config::validation),
        help("Fix the value in .ddev/config.yaml or rerun `ddev config`")
    )]
    Validation(String),

    #[error("'{key}' is no longer supported in {}", .path.display())]
    #[diagnostic(code(ddev::config::legacy_key))]
    LegacyConfigKey {
        key: String,
        path: PathBuf,
        migration: String,
    },

    #[error("No project found: {0}")]
    #[diagnostic(
        code(ddev::project::not_found),
        help("Run `ddev config` in the project root, or `ddev list` to see known projects")
    )]
    ProjectNotFound(String),

    #[error("Unsupported environment: {message}")]
    #[diagnostic(code(ddev::host::environment))]
    Environment { message: String, hint: String },

    #[error("Unable to probe the container engine: {0}")]
    #[diagnostic(
        code(ddev::host::probe),
        help("Check that the container engine is running with `docker info`")
    )]
    Probe(String),

    #[error("{message} (image '{image}')")]
    #[diagnostic(code(ddev::image::tag))]
    ImageTag { image: String, message: String },

    #[error("Failed to pull image '{image}': {reason}")]
    #[diagnostic(
        code(ddev::image::pull),
        help("Check your network connection and that the image exists with `docker pull {image}`")
    )]
    ImagePull { image: String, reason: String },

    #[error(transparent)]
    #[diagnostic(code(ddev::health))]
    Healthcheck(#[from] HealthcheckError),

    #[error("Port {port} is in use{}",
        .process_name.as_ref()
            .zip(.pid.as_ref())
            .map(|(name, pid)| format!(" by process '{}' (PID {})", name, pid))
            .unwrap_or_default()
    )]
    #[diagnostic(
        code(ddev::port::conflict),
        help("Find what's using the port with: lsof -i :{port} (macOS/Linux) or netstat -ano | findstr :{port} (Windows)")
    )]
    PortConflict {
        port: u16,
        pid: Option<u32>,
        process_name: Option<String>,
        command: Option<String>,
        owner: Option<String>,
    },

    #[error("Timed out after {}s waiting for lock {}{}",
        .waited.as_secs(),
        .path.display(),
        .holder_pid.map(|p| format!(" (held by PID {})", p)).unwrap_or_default()
    )]
    #[diagnostic(code(ddev::lock::contended))]
    LockContended {
        path: PathBuf,
        holder_pid: Option<u32>,
        waited: Duration,
    },

    #[error("Service '{service}' of project '{project}' is not running (state: {state})")]
    #[diagnostic(code(ddev::project::not_running))]
    NotRunning {
        project: String,
        service: String,
        state: String,
    },

    #[error("{} exists and does not carry the #ddev-generated signature; refusing to overwrite it", .path.display())]
    #[diagnostic(
        code(ddev::config::signature),
        help("Remove the file, or delete it so it can be regenerated")
    )]
    ConfigFileSignature { path: PathBuf },

    #[error("Docker error: {0}")]
    #[diagnostic(
        code(ddev::docker::error),
        help("Check that Docker is running with `docker ps`")
    )]
    Docker(DockerError),

    #[error("docker-compose failed: {0}")]
    #[diagnostic(code(ddev::docker::compose))]
    Compose(String),

    #[error("{phase} hook failed: {task}: {reason}")]
    #[diagnostic(code(ddev::hooks::failed))]
    Hook {
        phase: String,
        task: String,
        reason: String,
    },

    #[error("Download of {url} failed: {reason}")]
    #[diagnostic(code(ddev::download))]
    Download { url: String, reason: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation aborted by user")]
    Aborted,

    #[error("Filesystem error: {0}")]
    #[diagnostic(code(ddev::filesystem::error))]
    Filesystem(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<DockerError> for Error {
    fn from(e: DockerError) -> Self {
        match e {
            DockerError::Cancelled { .. } => Error::Cancelled,
            other => Error::Docker(other),
        }
    }
}

impl Error {
    /// Returns a helpful suggestion for resolving this error, if available.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Error::LegacyConfigKey { migration, .. } => Some(migration.clone()),
            Error::Environment { hint, .. } => Some(hint.clone()),
            Error::Healthcheck(e) => Some(e.suggestion()),
            Error::PortConflict {
                port,
                pid,
                process_name,
                command,
                owner,
            } => {
                if let Some(project) = owner {
                    return Some(format!(
                        "Port {} is reserved by project '{}'. Stop it with `ddev stop {}` or pick another port.",
                        port, project, project
                    ));
                }
                let who = match (pid, process_name, command) {
                    (Some(p), _, Some(cmd)) => format!("'{}' (PID {})", cmd, p),
                    (Some(p), Some(name), None) => format!("'{}' (PID {})", name, p),
                    (Some(p), None, None) => format!("PID {}", p),
                    _ => "the process listening on it".to_string(),
                };
                Some(format!(
                    "Stop {} or configure a different port, e.g. `ddev config global --router-http-port=8080 --router-https-port=8443`.",
                    who
                ))
            }
            Error::LockContended { path, holder_pid, .. } => Some(match holder_pid {
                Some(pid) => format!(
                    "Another ddev process (PID {}) is working on this project. Wait for it, or remove {} if that process is gone.",
                    pid,
                    path.display()
                ),
                None => format!(
                    "Another ddev process is working on this project. Remove {} if no other ddev is running.",
                    path.display()
                ),
            }),
            Error::NotRunning {
                project, service, ..
            } => Some(format!(
                "Start the project with `ddev start {}`, or check the container with `ddev logs -s {}`",
                project, service
            )),
            Error::Docker(DockerError::DaemonUnavailable) | Error::Probe(_) => {
                Some("Check that Docker is running: docker ps".to_string())
            }
            Error::Validation(_) => {
                Some("Review .ddev/config.yaml, or regenerate it with `ddev config`".to_string())
            }
            Error::ProjectNotFound(_) => Some(
                "Run `ddev config` in the project root, or pass a project name (see `ddev list`)"
                    .to_string(),
            ),
            _ => None,
        }
    }

    /// Formats the error with its suggestion (if any) for user-friendly display.
    pub fn with_suggestion(&self) -> String {
        match self.suggestion() {
            Some(suggestion) => format!("{}\n\nHint: {}", self, suggestion),
            None => self.to_string(),
        }
    }

    /// Process exit code for this error.
    ///
    /// 2 for configuration problems, 3 when a lock could not be taken,
    /// 4 when the engine cannot be reached, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Validation(_) | Error::LegacyConfigKey { .. } | Error::ProjectNotFound(_) => 2,
            Error::LockContended { .. } => 3,
            Error::Probe(_) | Error::Docker(DockerError::DaemonUnavailable) => 4,
            Error::Docker(DockerError::ExecFailed { .. }) => 4,
            _ => 1,
        }
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub(crate) fn environment(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::Environment {
            message: message.into(),
            hint: hint.into(),
        }
    }
}
