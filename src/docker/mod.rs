//! Container engine access.
//!
//! Everything ddev asks of the engine goes through the [`ContainerEngine`]
//! trait. [`DockerClient`] implements it on top of the `docker` CLI; tests
//! substitute an in-memory engine. Higher-level helpers built on the trait
//! live in [`health`] (waiting for healthy containers) and [`ephemeral`]
//! (one-shot helper containers).

pub mod archive;
pub mod client;
pub mod ephemeral;
pub mod error;
pub mod health;
pub mod images;

pub use client::DockerClient;
pub use ephemeral::{run_ephemeral, EphemeralRun};
pub use error::DockerError;
pub use health::{container_health, wait_healthy, wait_healthy_all, ContainerHealth};

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Label carried by every project-owned container, volume and network.
pub const SITE_NAME_LABEL: &str = "com.ddev.site-name";
/// Label marking engine objects created by ddev itself.
pub const PLATFORM_LABEL: &str = "com.ddev.platform";
/// Label holding the user-namespace mode for helper containers on rootless engines.
pub const USERNS_LABEL: &str = "com.ddev.userns";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
pub const COMPOSE_ONEOFF_LABEL: &str = "com.docker.compose.oneoff";

/// Label selector used by container queries.
///
/// `value: None` matches any container that carries the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub key: String,
    pub value: Option<String>,
}

impl LabelFilter {
    pub fn eq(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn has(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    /// The `--filter` argument for this selector.
    pub fn to_arg(&self) -> String {
        match &self.value {
            Some(v) => format!("label={}={}", self.key, v),
            None => format!("label={}", self.key),
        }
    }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        match (&self.value, labels.get(&self.key)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(want), Some(have)) => want == have,
        }
    }
}

/// Human-readable rendering of a label selector list, used in errors.
pub fn describe_labels(filters: &[LabelFilter]) -> String {
    filters
        .iter()
        .map(|f| match &f.value {
            Some(v) => format!("{}={}", f.key, v),
            None => f.key.clone(),
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Selector for the containers of one project, excluding `compose run` one-offs.
pub fn project_filters(project: &str) -> Vec<LabelFilter> {
    vec![
        LabelFilter::eq(SITE_NAME_LABEL, project),
        LabelFilter::eq(COMPOSE_ONEOFF_LABEL, "False"),
    ]
}

/// Facts reported by `docker info` and `docker version`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineInfo {
    pub name: String,
    pub operating_system: String,
    pub server_version: String,
    pub api_version: String,
    pub security_options: Vec<String>,
    pub components: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthState {
    pub status: String,
    pub last_output: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerState {
    pub status: String,
    pub running: bool,
    pub health: Option<HealthState>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// Container side, e.g. `80/tcp`.
    pub container_port: String,
    pub host_ip: String,
    pub host_port: u16,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub labels: BTreeMap<String, String>,
    pub env: Vec<String>,
    pub ports: Vec<PortBinding>,
}

impl ContainerInfo {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Compose service name, when the container belongs to a compose project.
    pub fn service(&self) -> Option<&str> {
        self.label(COMPOSE_SERVICE_LABEL)
    }

    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|kv| {
            kv.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VolumeSpec {
    pub name: String,
    pub driver: Option<String>,
    pub driver_opts: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

/// Arguments for creating a (usually short-lived) container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: Option<String>,
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// `volume:/path` or `/host:/path` mounts.
    pub binds: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub user: Option<String>,
    pub workdir: Option<String>,
    /// `[ip:]host:container` publish specs.
    pub port_bindings: Vec<String>,
    /// `name:address` entries.
    pub extra_hosts: Vec<String>,
    pub network: Option<String>,
    pub userns: Option<String>,
    /// Shell command for `--health-cmd`.
    pub health_cmd: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecSpec {
    pub cmd: Vec<String>,
    pub user: Option<String>,
    pub workdir: Option<String>,
    pub env: Vec<String>,
    /// Hand the caller's stdin, stdout and stderr to the command instead of
    /// capturing output. Bytes pass through unmodified as they are produced.
    pub attach: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, as a terminal would show them.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogOptions {
    pub tail: Option<String>,
    pub follow: bool,
    pub timestamps: bool,
}

/// Capability set ddev needs from a container engine.
///
/// Every call honors the cancellation token: when it fires, in-flight engine
/// commands are killed and the call returns [`DockerError::Cancelled`].
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn info(&self, cancel: &CancellationToken) -> Result<EngineInfo, DockerError>;

    /// Gateway address of a network's first IPAM config, if any.
    async fn network_gateway(
        &self,
        network: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, DockerError>;

    /// Inspect one container by name or id. Missing containers yield
    /// [`DockerError::ContainerNotFound`].
    async fn inspect_container(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ContainerInfo, DockerError>;

    async fn find_containers(
        &self,
        filters: &[LabelFilter],
        include_stopped: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContainerInfo>, DockerError>;

    async fn image_exists(&self, image: &str, cancel: &CancellationToken)
        -> Result<bool, DockerError>;

    async fn pull_image(&self, image: &str, cancel: &CancellationToken) -> Result<(), DockerError>;

    /// Create a container without starting it; returns its id.
    async fn create_container(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<String, DockerError>;

    /// Start a created container. With `attach`, waits for it to exit and
    /// returns its exit code and output.
    async fn start_container(
        &self,
        id: &str,
        attach: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<ExecOutput>, DockerError>;

    /// Force-remove a container. Missing containers are not an error.
    async fn remove_container(&self, name: &str, cancel: &CancellationToken)
        -> Result<(), DockerError>;

    async fn exec(
        &self,
        container: &str,
        spec: &ExecSpec,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, DockerError>;

    /// Copy a host file or directory's contents into `dst` inside the
    /// container. Paths starting with `exclusion` (relative to `src`) are skipped.
    async fn copy_into(
        &self,
        container: &str,
        src: &Path,
        dst: &str,
        exclusion: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError>;

    /// Copy a file or directory's contents out of the container into `dst`.
    async fn copy_from(
        &self,
        container: &str,
        src: &str,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError>;

    /// Stream logs to the caller's stdout/stderr.
    async fn logs(
        &self,
        container: &str,
        options: &LogOptions,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError>;

    async fn list_networks(&self, cancel: &CancellationToken)
        -> Result<Vec<NetworkInfo>, DockerError>;

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError>;

    async fn remove_network(&self, id: &str, cancel: &CancellationToken) -> Result<(), DockerError>;

    async fn create_volume(&self, spec: &VolumeSpec, cancel: &CancellationToken)
        -> Result<(), DockerError>;

    /// Remove a volume. Missing volumes are not an error; volumes still
    /// mounted yield [`DockerError::VolumeInUse`].
    async fn remove_volume(&self, name: &str, cancel: &CancellationToken) -> Result<(), DockerError>;

    async fn volume_exists(&self, name: &str, cancel: &CancellationToken)
        -> Result<bool, DockerError>;

    async fn volume_labels(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, DockerError>;

    async fn list_volumes(
        &self,
        filters: &[LabelFilter],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DockerError>;

    /// Bytes used by a volume; 0 when the engine cannot account for it.
    async fn volume_size(&self, name: &str, cancel: &CancellationToken) -> Result<u64, DockerError>;

    /// Names of containers (running or not) that mount the volume.
    async fn containers_using_volume(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DockerError>;
}

/// Create `name` when missing and drop duplicate networks of the same name.
///
/// Concurrent `network create` calls can leave several networks with one name;
/// everything but the first is removed.
pub async fn ensure_network(
    engine: &dyn ContainerEngine,
    name: &str,
    labels: &BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> Result<(), DockerError> {
    let matching: Vec<NetworkInfo> = engine
        .list_networks(cancel)
        .await?
        .into_iter()
        .filter(|n| n.name == name)
        .collect();

    if matching.is_empty() {
        tracing::debug!(network = name, "creating network");
        return match engine.create_network(name, labels, cancel).await {
            Ok(()) => Ok(()),
            // Another process won the race.
            Err(DockerError::CommandFailed { stderr, .. }) if stderr.contains("already exists") => {
                Ok(())
            }
            Err(e) => Err(e),
        };
    }

    for dup in matching.iter().skip(1) {
        tracing::warn!(network = name, id = %dup.id, "removing duplicate network");
        if let Err(e) = engine.remove_network(&dup.id, cancel).await {
            tracing::warn!(network = name, id = %dup.id, "failed to remove duplicate network: {}", e);
        }
    }
    Ok(())
}

/// Create the named volume unless it exists.
pub async fn ensure_volume(
    engine: &dyn ContainerEngine,
    name: &str,
    labels: &BTreeMap<String, String>,
    cancel: &CancellationToken,
) -> Result<(), DockerError> {
    if engine.volume_exists(name, cancel).await? {
        return Ok(());
    }
    tracing::debug!(volume = name, "creating volume");
    let spec = VolumeSpec {
        name: name.to_string(),
        labels: labels.clone(),
        ..Default::default()
    };
    match engine.create_volume(&spec, cancel).await {
        Err(DockerError::CommandFailed { stderr, .. }) if stderr.contains("already exists") => Ok(()),
        other => other,
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawInfo {
    #[serde(default)]
    name: String,
    #[serde(default)]
    operating_system: String,
    #[serde(default)]
    server_version: String,
    #[serde(default)]
    security_options: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawVersion {
    server: Option<RawServerVersion>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawServerVersion {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    components: Option<Vec<RawComponent>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawComponent {
    name: String,
}

/// Combine `docker info --format '{{json .}}'` and `docker version --format '{{json .}}'`.
pub(crate) fn parse_engine_info(info_json: &str, version_json: &str) -> serde_json::Result<EngineInfo> {
    let info: RawInfo = serde_json::from_str(info_json.trim())?;
    // `docker version` exits non-zero but still prints JSON when only the
    // server half fails; tolerate an unparseable document.
    let server = serde_json::from_str::<RawVersion>(version_json.trim())
        .ok()
        .and_then(|v| v.server);
    let (api_version, components) = match server {
        Some(s) => (
            s.api_version,
            s.components
                .unwrap_or_default()
                .into_iter()
                .map(|c| c.name)
                .collect(),
        ),
        None => (String::new(), Vec::new()),
    };
    Ok(EngineInfo {
        name: info.name,
        operating_system: info.operating_system,
        server_version: info.server_version,
        api_version,
        security_options: info.security_options.unwrap_or_default(),
        components,
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawContainer {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: RawState,
    #[serde(default)]
    config: RawConfig,
    #[serde(default)]
    network_settings: RawNetworkSettings,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    #[serde(default)]
    status: String,
    #[serde(default)]
    running: bool,
    #[serde(default, alias = "Healthcheck")]
    health: Option<RawHealth>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawHealth {
    #[serde(default)]
    status: String,
    #[serde(default)]
    log: Option<Vec<RawHealthLog>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawHealthLog {
    #[serde(default)]
    output: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    #[serde(default)]
    image: String,
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
    #[serde(default)]
    env: Option<Vec<String>>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct RawNetworkSettings {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<RawBinding>>>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawBinding {
    #[serde(default)]
    host_ip: String,
    #[serde(default)]
    host_port: String,
}

/// Parse the JSON array printed by `docker inspect`.
pub(crate) fn parse_inspect(json: &str) -> serde_json::Result<Vec<ContainerInfo>> {
    let raw: Vec<RawContainer> = serde_json::from_str(json.trim())?;
    Ok(raw.into_iter().map(ContainerInfo::from).collect())
}

impl From<RawContainer> for ContainerInfo {
    fn from(raw: RawContainer) -> Self {
        let health = raw.state.health.and_then(|h| {
            // Podman reports an empty health object for containers without a check.
            if h.status.is_empty() {
                return None;
            }
            let last_output = h
                .log
                .as_ref()
                .and_then(|log| log.last())
                .map(|l| l.output.trim().to_string())
                .unwrap_or_default();
            Some(HealthState {
                status: h.status,
                last_output,
            })
        });

        let mut ports = Vec::new();
        for (container_port, bindings) in raw.network_settings.ports.unwrap_or_default() {
            for binding in bindings.unwrap_or_default() {
                if let Ok(host_port) = binding.host_port.parse::<u16>() {
                    ports.push(PortBinding {
                        container_port: container_port.clone(),
                        host_ip: binding.host_ip,
                        host_port,
                    });
                }
            }
        }

        ContainerInfo {
            id: raw.id,
            name: raw.name.trim_start_matches('/').to_string(),
            image: raw.config.image,
            state: ContainerState {
                status: raw.state.status,
                running: raw.state.running,
                health,
            },
            labels: raw.config.labels.unwrap_or_default(),
            env: raw.config.env.unwrap_or_default(),
            ports,
        }
    }
}

/// Parse one `docker network ls --format '{{json .}}'` line per network.
pub(crate) fn parse_network_lines(out: &str) -> serde_json::Result<Vec<NetworkInfo>> {
    #[derive(Deserialize)]
    #[serde(rename_all = "PascalCase")]
    struct RawNetwork {
        #[serde(rename = "ID")]
        id: String,
        name: String,
        #[serde(default)]
        labels: String,
    }

    let mut networks = Vec::new();
    for line in out.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let raw: RawNetwork = serde_json::from_str(line)?;
        let labels = raw
            .labels
            .split(',')
            .filter_map(|kv| kv.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        networks.push(NetworkInfo {
            id: raw.id,
            name: raw.name,
            labels,
        });
    }
    Ok(networks)
}

/// Find a volume's size in `docker system df -v --format '{{json .}}'` output.
pub(crate) fn parse_volume_size(df_json: &str, volume: &str) -> Option<u64> {
    let doc: serde_json::Value = serde_json::from_str(df_json.trim()).ok()?;
    let entry = doc
        .get("Volumes")?
        .as_array()?
        .iter()
        .find(|v| v.get("Name").and_then(|n| n.as_str()) == Some(volume))?;
    match entry.get("Size")? {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => parse_human_size(s),
        _ => None,
    }
}

/// Parse sizes like `0B`, `12.3kB`, `1.05GB` (decimal units, as the engine prints them).
pub fn parse_human_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num.parse().ok()?;
    let multiplier: f64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" | "k" => 1e3,
        "mb" | "m" => 1e6,
        "gb" | "g" => 1e9,
        "tb" | "t" => 1e12,
        _ => return None,
    };
    Some((value * multiplier).round() as u64)
}

/// Render a byte count the way the engine does (`1.2GB`, `340kB`).
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }
    if unit == 0 {
        return format!("{}B", bytes);
    }
    let rendered = format!("{:.3}", value);
    let rendered = if value >= 100.0 {
        format!("{:.0}", value)
    } else if value >= 10.0 {
        format!("{:.1}", value)
    } else {
        rendered[..rendered.len().min(4)].to_string()
    };
    let rendered = if rendered.contains('.') {
        rendered.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        rendered
    };
    format!("{}{}", rendered, UNITS[unit])
}
