//! Resolution of the address containers use to reach the host.

use super::{OsFlavor, Provider};
use crate::docker::ContainerEngine;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const HOST_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// How containers reach the host.
///
/// `extra_host` is the value for `host.docker.internal:<extra_host>` in
/// `extra_hosts`; empty means no mapping is added.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostDockerInternal {
    pub ip: Option<String>,
    pub extra_host: String,
    pub rationale: String,
}

/// Which rule applies, before any host command runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// `xdebug_ide_location` is an IP literal.
    Literal(String),
    /// The IDE runs inside the web container.
    Loopback,
    Colima,
    Rootless,
    Codespaces,
    Wsl2DockerDesktop,
    Wsl2IdeInWsl,
    Wsl2Mirrored,
    Wsl2Nat,
    LinuxBridge,
    /// The provider maps `host.docker.internal` itself.
    Native,
}

/// Pick the rule for this host. Earlier rules win.
pub fn choose_resolution(os: OsFlavor, provider: Provider, ide_location: &str) -> Resolution {
    let ide_location = ide_location.trim();
    if ide_location.parse::<IpAddr>().is_ok() {
        return Resolution::Literal(ide_location.to_string());
    }
    if ide_location == "container" {
        return Resolution::Loopback;
    }
    if provider == Provider::Colima {
        return Resolution::Colima;
    }
    if provider.is_rootless() {
        return Resolution::Rootless;
    }
    if os == OsFlavor::Codespaces {
        return Resolution::Codespaces;
    }
    if os.is_wsl2() {
        if provider == Provider::DockerDesktop {
            return Resolution::Wsl2DockerDesktop;
        }
        if ide_location == "wsl2" {
            return Resolution::Wsl2IdeInWsl;
        }
        if os == OsFlavor::Wsl2Mirrored {
            return Resolution::Wsl2Mirrored;
        }
        return Resolution::Wsl2Nat;
    }
    if os == OsFlavor::Linux {
        return Resolution::LinuxBridge;
    }
    Resolution::Native
}

fn with_ip(ip: impl Into<String>, rationale: &str) -> HostDockerInternal {
    let ip = ip.into();
    HostDockerInternal {
        extra_host: ip.clone(),
        ip: Some(ip),
        rationale: rationale.to_string(),
    }
}

fn host_gateway(ip: Option<String>, rationale: &str) -> HostDockerInternal {
    HostDockerInternal {
        ip,
        extra_host: "host-gateway".to_string(),
        rationale: rationale.to_string(),
    }
}

fn unmapped(rationale: &str) -> HostDockerInternal {
    HostDockerInternal {
        ip: None,
        extra_host: String::new(),
        rationale: rationale.to_string(),
    }
}

/// Resolve `host.docker.internal` for this host.
///
/// Only the WSL2 and native-Linux rules run commands; their failures degrade
/// to "no mapping" with a warning rather than failing the probe.
pub async fn resolve_host_docker_internal(
    engine: &dyn ContainerEngine,
    os: OsFlavor,
    provider: Provider,
    ide_location: &str,
    cancel: &CancellationToken,
) -> HostDockerInternal {
    let resolution = choose_resolution(os, provider, ide_location);
    tracing::debug!(?resolution, %os, %provider, "resolving host.docker.internal");

    match resolution {
        Resolution::Literal(ip) => with_ip(ip, "xdebug_ide_location is an IP address"),
        Resolution::Loopback => with_ip("127.0.0.1", "IDE runs inside the web container"),
        Resolution::Colima => with_ip("192.168.5.2", "colima host address"),
        Resolution::Rootless => with_ip("10.0.2.2", "rootless engine slirp gateway"),
        Resolution::Codespaces => host_gateway(None, "codespaces"),
        Resolution::Wsl2DockerDesktop => {
            unmapped("Docker Desktop provides host.docker.internal on WSL2")
        }
        Resolution::Wsl2IdeInWsl => host_gateway(None, "IDE runs inside WSL2"),
        Resolution::Wsl2Mirrored => match windows_host_ip().await {
            Some(ip) => with_ip(ip, "WSL2 mirrored networking: Windows interface address"),
            None => {
                tracing::warn!("unable to determine the Windows host address for WSL2 mirrored networking");
                unmapped("WSL2 mirrored networking: address lookup failed")
            }
        },
        Resolution::Wsl2Nat => match wsl2_default_gateway().await {
            Some(ip) => with_ip(ip, "WSL2 NAT networking: default route gateway"),
            None => {
                tracing::warn!("unable to determine the WSL2 default gateway");
                unmapped("WSL2 NAT networking: default route lookup failed")
            }
        },
        Resolution::LinuxBridge => {
            let gateway = match engine.network_gateway("bridge", cancel).await {
                Ok(gw) => gw,
                Err(e) => {
                    tracing::debug!("unable to inspect the bridge network: {}", e);
                    None
                }
            };
            host_gateway(gateway, "native Linux: bridge network gateway")
        }
        Resolution::Native => unmapped("provider maps host.docker.internal natively"),
    }
}

async fn host_command(program: &str, args: &[&str]) -> Option<String> {
    let result = tokio::time::timeout(
        HOST_COMMAND_TIMEOUT,
        tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output(),
    )
    .await;
    match result {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).into_owned())
        }
        Ok(Ok(output)) => {
            tracing::debug!(
                program,
                "host command failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            None
        }
        Ok(Err(e)) => {
            tracing::debug!(program, "unable to run host command: {}", e);
            None
        }
        Err(_) => {
            tracing::debug!(program, "host command timed out");
            None
        }
    }
}

async fn wsl2_default_gateway() -> Option<String> {
    let out = host_command("ip", &["-4", "route", "show", "default"]).await?;
    parse_default_route(&out).map(|ip| ip.to_string())
}

async fn windows_host_ip() -> Option<String> {
    let script = r#"Get-NetIPAddress -AddressFamily IPv4 | Where-Object {$_.IPAddress -notlike "169.254*" -and $_.IPAddress -ne "127.0.0.1"} | Sort-Object InterfaceMetric | Select-Object -First 1 -ExpandProperty IPAddress"#;
    let out = host_command("powershell.exe", &["-NoProfile", "-Command", script]).await?;
    let candidate = out.trim();
    candidate
        .parse::<Ipv4Addr>()
        .ok()
        .map(|ip| ip.to_string())
}

/// Gateway from `ip -4 route show default` (`default via <gw> dev eth0 ...`).
pub fn parse_default_route(out: &str) -> Option<Ipv4Addr> {
    let line = out.lines().find(|l| l.trim_start().starts_with("default"))?;
    let parts: Vec<&str> = line.split_whitespace().collect();
    parts.get(2)?.parse().ok()
}
