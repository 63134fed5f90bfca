use std::fmt;
use std::time::Duration;

/// Structured error type for container engine CLI operations.
#[derive(Debug)]
pub enum DockerError {
    /// Engine command timed out.
    Timeout { command: String, timeout: Duration },

    /// Engine command ran but returned non-zero exit.
    CommandFailed {
        command: String,
        stderr: String,
        exit_code: Option<i32>,
    },

    /// Engine binary couldn't be executed (not in PATH, permission denied).
    ExecFailed {
        command: String,
        source: std::io::Error,
    },

    /// Container doesn't exist (parsed from "No such container" stderr).
    ContainerNotFound { container: String },

    /// Volume removal refused because containers still mount it.
    VolumeInUse {
        volume: String,
        containers: Vec<String>,
    },

    /// Engine daemon not responding.
    DaemonUnavailable,

    /// The caller's cancellation token fired while the command ran.
    Cancelled { command: String },
}

impl DockerError {
    /// Create a timeout error.
    pub fn timeout(cmd: impl Into<String>, dur: Duration) -> Self {
        DockerError::Timeout {
            command: cmd.into(),
            timeout: dur,
        }
    }

    /// Create a command-failed error from an `std::process::Output`.
    ///
    /// Stderr mentioning an unreachable daemon maps to `DaemonUnavailable`.
    pub fn failed(cmd: impl Into<String>, output: &std::process::Output) -> Self {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if is_daemon_unreachable(&stderr) {
            return DockerError::DaemonUnavailable;
        }
        DockerError::CommandFailed {
            command: cmd.into(),
            stderr,
            exit_code: output.status.code(),
        }
    }

    /// Create a command-failed error from a stderr string and optional exit code.
    pub fn cmd_failed(
        cmd: impl Into<String>,
        stderr: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        DockerError::CommandFailed {
            command: cmd.into(),
            stderr: stderr.into(),
            exit_code,
        }
    }

    /// Create an exec-failed error (binary not found / permission denied).
    pub fn exec_failed(cmd: impl Into<String>, err: std::io::Error) -> Self {
        DockerError::ExecFailed {
            command: cmd.into(),
            source: err,
        }
    }

    /// True when stderr says the object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            DockerError::ContainerNotFound { .. } => true,
            DockerError::CommandFailed { stderr, .. } => {
                stderr.contains("No such") || stderr.contains("no such")
            }
            _ => false,
        }
    }
}

fn is_daemon_unreachable(stderr: &str) -> bool {
    stderr.contains("Cannot connect to the Docker daemon")
        || stderr.contains("Is the docker daemon running")
        || stderr.contains("error during connect")
}

impl fmt::Display for DockerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DockerError::Timeout { command, timeout } => {
                write!(
                    f,
                    "Timed out running '{}' (exceeded {} seconds)",
                    command,
                    timeout.as_secs()
                )
            }
            DockerError::CommandFailed {
                command,
                stderr,
                exit_code,
            } => {
                if let Some(code) = exit_code {
                    write!(f, "'{}' failed (exit code {}): {}", command, code, stderr)
                } else {
                    write!(f, "'{}' failed: {}", command, stderr)
                }
            }
            DockerError::ExecFailed { command, source } => {
                write!(f, "Failed to execute '{}': {}", command, source)
            }
            DockerError::ContainerNotFound { container } => {
                write!(f, "No such container: {}", container)
            }
            DockerError::VolumeInUse { volume, containers } => write!(
                f,
                "docker volume '{}' is in use by one or more containers and cannot be removed. Use 'docker rm -f {}' to remove them",
                volume,
                containers.join(" ")
            ),
            DockerError::DaemonUnavailable => {
                write!(f, "Docker daemon is not responding")
            }
            DockerError::Cancelled { command } => write!(f, "'{}' was cancelled", command),
        }
    }
}

impl std::error::Error for DockerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DockerError::ExecFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_in_use_message_lists_containers() {
        let err = DockerError::VolumeInUse {
            volume: "blog-mariadb".into(),
            containers: vec!["ddev-blog-db".into(), "adminer".into()],
        };
        assert_eq!(
            err.to_string(),
            "docker volume 'blog-mariadb' is in use by one or more containers and cannot be removed. Use 'docker rm -f ddev-blog-db adminer' to remove them"
        );
    }

    #[test]
    fn not_found_detection() {
        assert!(DockerError::cmd_failed("docker inspect x", "Error: No such object: x", Some(1))
            .is_not_found());
        assert!(!DockerError::cmd_failed("docker inspect x", "permission denied", Some(1))
            .is_not_found());
    }
}
