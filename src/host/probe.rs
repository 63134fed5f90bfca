use super::{resolve_host_docker_internal, HostProfile, OsFlavor, Provider};
use crate::docker::{ContainerEngine, DockerError, EngineInfo};
use crate::error::{Error, Result};
use std::net::IpAddr;
use tokio_util::sync::CancellationToken;

/// Oldest engine API accepted (Docker 20.10).
const MIN_API_VERSION: (u32, u32) = (1, 41);

/// Gather the [`HostProfile`].
///
/// Fails with [`Error::Probe`] when the engine cannot be reached and with
/// [`Error::Environment`] when it is too old to use.
pub async fn probe(
    engine: &dyn ContainerEngine,
    xdebug_ide_location: &str,
    cancel: &CancellationToken,
) -> Result<HostProfile> {
    let info = engine.info(cancel).await.map_err(|e| match e {
        DockerError::Cancelled { .. } => Error::Cancelled,
        other => Error::Probe(other.to_string()),
    })?;

    check_api_version(&info.api_version)?;

    let os = detect_os().await;
    let provider = detect_provider(&info);
    let docker_host = std::env::var("DOCKER_HOST").ok();
    let (is_remote_docker, remote_host) = parse_docker_host(docker_host.as_deref());
    let docker_ip = match remote_host {
        Some(host) => resolve_docker_ip(&host).await,
        None => "127.0.0.1".to_string(),
    };

    let host_docker_internal =
        resolve_host_docker_internal(engine, os, provider, xdebug_ide_location, cancel).await;

    let profile = HostProfile {
        os,
        provider,
        engine_api_version: info.api_version.clone(),
        server_version: info.server_version.clone(),
        is_remote_docker,
        docker_ip,
        host_docker_internal,
    };
    tracing::debug!(?profile, "host probed");
    Ok(profile)
}

fn check_api_version(api_version: &str) -> Result<()> {
    // Some engines (older podman) leave the field empty; nothing to judge then.
    if api_version.is_empty() {
        return Ok(());
    }
    let mut parts = api_version.split('.').map(|p| p.parse::<u32>());
    let version = match (parts.next(), parts.next()) {
        (Some(Ok(major)), Some(Ok(minor))) => (major, minor),
        _ => {
            tracing::warn!(api_version, "unparseable engine API version");
            return Ok(());
        }
    };
    if version < MIN_API_VERSION {
        return Err(Error::environment(
            format!(
                "container engine API version {} is too old; {}.{} or newer is required",
                api_version, MIN_API_VERSION.0, MIN_API_VERSION.1
            ),
            "Upgrade Docker to 20.10 or newer",
        ));
    }
    Ok(())
}

async fn detect_os() -> OsFlavor {
    if std::env::var("CODESPACES").map(|v| v == "true").unwrap_or(false) {
        return OsFlavor::Codespaces;
    }
    match std::env::consts::OS {
        "macos" => OsFlavor::Darwin,
        "windows" => OsFlavor::Windows,
        _ => {
            let kernel = std::fs::read_to_string("/proc/sys/kernel/osrelease").unwrap_or_default();
            let wsl_env = std::env::var_os("WSL_DISTRO_NAME").is_some()
                || std::env::var_os("WSL_INTEROP").is_some();
            if !is_wsl2(wsl_env, &kernel) {
                return OsFlavor::Linux;
            }
            if wsl2_networking_mode().await.as_deref() == Some("mirrored") {
                OsFlavor::Wsl2Mirrored
            } else {
                OsFlavor::Wsl2
            }
        }
    }
}

fn is_wsl2(wsl_env: bool, kernel_release: &str) -> bool {
    wsl_env || kernel_release.to_lowercase().contains("microsoft")
}

async fn wsl2_networking_mode() -> Option<String> {
    let output = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        tokio::process::Command::new("wslinfo")
            .arg("--networking-mode")
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Classify the engine from `docker info` / `docker version` facts.
pub fn detect_provider(info: &EngineInfo) -> Provider {
    let rootless = info
        .security_options
        .iter()
        .any(|o| o.split(',').any(|kv| kv == "name=rootless"));

    if info.components.iter().any(|c| c == "Podman Engine") {
        return if rootless {
            Provider::PodmanRootless
        } else {
            Provider::Podman
        };
    }
    if info.operating_system == "Docker Desktop" {
        return Provider::DockerDesktop;
    }
    let name = info.name.as_str();
    if name.starts_with("colima") {
        return Provider::Colima;
    }
    if name.starts_with("lima-rancher-desktop") {
        return Provider::RancherDesktop;
    }
    if name.starts_with("lima") {
        return Provider::Lima;
    }
    if name.starts_with("orbstack") {
        return Provider::OrbStack;
    }
    if rootless {
        return Provider::DockerRootless;
    }
    Provider::DockerCe
}

/// Split `DOCKER_HOST` into (is_remote, host) for `tcp://` and `ssh://` endpoints.
pub fn parse_docker_host(docker_host: Option<&str>) -> (bool, Option<String>) {
    let Some(value) = docker_host.map(str::trim).filter(|v| !v.is_empty()) else {
        return (false, None);
    };
    let Some((scheme, rest)) = value.split_once("://") else {
        return (false, None);
    };
    if scheme != "tcp" && scheme != "ssh" {
        return (false, None);
    }
    let authority = rest.split('/').next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = if let Some(stripped) = host_port.strip_prefix('[') {
        stripped.split(']').next().unwrap_or_default()
    } else {
        host_port.split(':').next().unwrap_or_default()
    };
    if host.is_empty() {
        return (false, None);
    }
    let local = matches!(host, "localhost" | "127.0.0.1" | "::1");
    (!local, Some(host.to_string()))
}

async fn resolve_docker_ip(host: &str) -> String {
    if host.parse::<IpAddr>().is_ok() {
        return host.to_string();
    }
    match tokio::net::lookup_host((host, 0)).await {
        Ok(mut addrs) => addrs
            .find(|a| a.is_ipv4())
            .map(|a| a.ip().to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string()),
        Err(e) => {
            tracing::warn!(host, "unable to resolve DOCKER_HOST: {}", e);
            "127.0.0.1".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(name: &str, os: &str, options: &[&str], components: &[&str]) -> EngineInfo {
        EngineInfo {
            name: name.into(),
            operating_system: os.into(),
            security_options: options.iter().map(|s| s.to_string()).collect(),
            components: components.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn providers() {
        assert_eq!(detect_provider(&info("docker-desktop", "Docker Desktop", &[], &[])), Provider::DockerDesktop);
        assert_eq!(detect_provider(&info("colima-default", "Ubuntu", &[], &[])), Provider::Colima);
        assert_eq!(detect_provider(&info("lima-rancher-desktop", "Alpine", &[], &[])), Provider::RancherDesktop);
        assert_eq!(detect_provider(&info("lima-default", "Ubuntu", &[], &[])), Provider::Lima);
        assert_eq!(detect_provider(&info("orbstack", "OrbStack", &[], &[])), Provider::OrbStack);
        assert_eq!(
            detect_provider(&info("host", "Ubuntu", &["name=seccomp,profile=builtin", "name=rootless"], &[])),
            Provider::DockerRootless
        );
        assert_eq!(
            detect_provider(&info("host", "fedora", &["name=rootless"], &["Podman Engine"])),
            Provider::PodmanRootless
        );
        assert_eq!(detect_provider(&info("host", "Ubuntu", &[], &["Engine"])), Provider::DockerCe);
    }

    #[test]
    fn docker_host_parsing() {
        assert_eq!(parse_docker_host(None), (false, None));
        assert_eq!(parse_docker_host(Some("unix:///var/run/docker.sock")), (false, None));
        assert_eq!(
            parse_docker_host(Some("tcp://192.168.1.20:2376")),
            (true, Some("192.168.1.20".into()))
        );
        assert_eq!(
            parse_docker_host(Some("ssh://me@build-box")),
            (true, Some("build-box".into()))
        );
        assert_eq!(
            parse_docker_host(Some("tcp://127.0.0.1:2375")),
            (false, Some("127.0.0.1".into()))
        );
    }

    #[test]
    fn wsl_detection() {
        assert!(is_wsl2(true, "6.6.0"));
        assert!(is_wsl2(false, "5.15.153.1-microsoft-standard-WSL2"));
        assert!(!is_wsl2(false, "6.8.0-45-generic"));
    }

    #[test]
    fn api_version_gate() {
        assert!(check_api_version("1.45").is_ok());
        assert!(check_api_version("1.41").is_ok());
        assert!(check_api_version("").is_ok());
        assert!(matches!(check_api_version("1.40"), Err(Error::Environment { .. })));
    }
}
