//! What kind of machine and container engine ddev is running against.
//!
//! [`probe`] gathers a [`HostProfile`] once per process; the profile drives
//! decisions elsewhere: the `host.docker.internal` mapping, which performance
//! modes are allowed, and whether helper containers need a user namespace.

pub mod docker_internal;
pub mod probe;

pub use docker_internal::{resolve_host_docker_internal, HostDockerInternal};
pub use probe::probe;

use crate::error::{Error, Result};
use crate::project::PerformanceMode;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OsFlavor {
    #[default]
    Linux,
    Darwin,
    Windows,
    Wsl2,
    Wsl2Mirrored,
    Codespaces,
}

impl OsFlavor {
    pub fn is_wsl2(&self) -> bool {
        matches!(self, OsFlavor::Wsl2 | OsFlavor::Wsl2Mirrored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OsFlavor::Linux => "linux",
            OsFlavor::Darwin => "darwin",
            OsFlavor::Windows => "windows",
            OsFlavor::Wsl2 => "wsl2",
            OsFlavor::Wsl2Mirrored => "wsl2-mirrored",
            OsFlavor::Codespaces => "codespaces",
        }
    }
}

impl fmt::Display for OsFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Provider {
    #[default]
    DockerCe,
    DockerDesktop,
    Colima,
    Lima,
    OrbStack,
    RancherDesktop,
    DockerRootless,
    Podman,
    PodmanRootless,
}

impl Provider {
    pub fn is_rootless(&self) -> bool {
        matches!(self, Provider::DockerRootless | Provider::PodmanRootless)
    }

    pub fn is_podman(&self) -> bool {
        matches!(self, Provider::Podman | Provider::PodmanRootless)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::DockerCe => "docker-ce",
            Provider::DockerDesktop => "docker-desktop",
            Provider::Colima => "colima",
            Provider::Lima => "lima",
            Provider::OrbStack => "orbstack",
            Provider::RancherDesktop => "rancher-desktop",
            Provider::DockerRootless => "docker-rootless",
            Provider::Podman => "podman",
            Provider::PodmanRootless => "podman-rootless",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable facts about the host and engine, computed once per process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostProfile {
    pub os: OsFlavor,
    pub provider: Provider,
    pub engine_api_version: String,
    pub server_version: String,
    pub is_remote_docker: bool,
    /// Address at which published ports are reachable from the host.
    pub docker_ip: String,
    pub host_docker_internal: HostDockerInternal,
}

impl HostProfile {
    /// `mutagen` where bind mounts are slow (macOS, Windows), `none` elsewhere.
    pub fn default_performance_mode(&self) -> PerformanceMode {
        match self.os {
            OsFlavor::Darwin | OsFlavor::Windows => PerformanceMode::Mutagen,
            _ => PerformanceMode::None,
        }
    }

    /// Resolve a project's performance mode against the global setting.
    ///
    /// `global` (or unset) defers to the global config; a global `global`
    /// (or unset) defers to the host default.
    pub fn effective_performance_mode(
        &self,
        project: Option<PerformanceMode>,
        global: Option<PerformanceMode>,
    ) -> PerformanceMode {
        match project {
            Some(mode) if mode != PerformanceMode::Global => mode,
            _ => match global {
                Some(mode) if mode != PerformanceMode::Global => mode,
                _ => self.default_performance_mode(),
            },
        }
    }

    /// Refuse performance modes the host cannot provide.
    pub fn check_performance_mode(&self, mode: PerformanceMode) -> Result<()> {
        match mode {
            PerformanceMode::Mutagen if self.provider.is_rootless() => Err(Error::environment(
                format!("performance_mode 'mutagen' is not supported with {}", self.provider),
                "Use `ddev config --performance-mode=none`",
            )),
            PerformanceMode::Nfs
                if self.os.is_wsl2() || self.os == OsFlavor::Codespaces =>
            {
                Err(Error::environment(
                    format!("performance_mode 'nfs' is not supported on {}", self.os),
                    "Use `ddev config --performance-mode=none`; projects inside the WSL2 filesystem are already fast",
                ))
            }
            _ => Ok(()),
        }
    }
}

/// Host uid and gid as the strings containers are given.
#[cfg(unix)]
pub fn container_ids() -> (String, String) {
    (
        nix::unistd::getuid().as_raw().to_string(),
        nix::unistd::getgid().as_raw().to_string(),
    )
}

#[cfg(not(unix))]
pub fn container_ids() -> (String, String) {
    ("1000".to_string(), "1000".to_string())
}
