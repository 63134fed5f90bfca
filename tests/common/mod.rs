//! In-memory engine and compose runner for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use ddev::compose::{ComposeOutput, ComposeRequest, ComposeRunner};
use ddev::docker::{
    ContainerEngine, ContainerInfo, ContainerSpec, ContainerState, DockerError, EngineInfo,
    ExecOutput, ExecSpec, HealthState, LabelFilter, LogOptions, NetworkInfo, PortBinding,
    VolumeSpec, COMPOSE_ONEOFF_LABEL, COMPOSE_SERVICE_LABEL,
};
use ddev::global::GlobalState;
use ddev::host::{HostProfile, OsFlavor};
use ddev::project::{ProjectConfig, ProjectType};
use ddev::{Context, Project};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
const HELPER_MOUNT: &str = "/mnt/v";

#[derive(Default)]
struct Volume {
    labels: BTreeMap<String, String>,
    /// Path relative to the volume root -> contents.
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    containers: Vec<ContainerInfo>,
    /// Helper container id -> mounted volume.
    helper_volumes: BTreeMap<String, String>,
    /// Helper container id -> its `sh -c` script.
    helper_scripts: BTreeMap<String, String>,
    volumes: BTreeMap<String, Volume>,
    networks: Vec<NetworkInfo>,
    execs: Vec<(String, ExecSpec)>,
    exec_exit_codes: BTreeMap<String, i32>,
    copied: Vec<(String, String)>,
    fail_starts: bool,
    next_id: u64,
}

/// Container engine that keeps containers, volumes and networks in memory.
///
/// Helper containers understand the handful of shell scripts volume
/// transfers use (list, `rm -f`, `find -delete`), so files copied into a
/// volume can be listed and removed again.
#[derive(Default)]
pub struct FakeEngine {
    inner: Mutex<Inner>,
}

fn unquote(s: &str) -> &str {
    s.trim_matches('\'')
}

fn volume_path(path: &str) -> String {
    let path = unquote(path);
    path.strip_prefix(HELPER_MOUNT)
        .unwrap_or(path)
        .trim_matches('/')
        .to_string()
}

fn read_tree(src: &Path, prefix: &str, out: &mut BTreeMap<String, Vec<u8>>) {
    if src.is_file() {
        let name = src.file_name().unwrap().to_string_lossy();
        out.insert(join(prefix, &name), std::fs::read(src).unwrap());
        return;
    }
    for entry in std::fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            read_tree(&path, &join(prefix, &name), out);
        } else {
            out.insert(join(prefix, &name), std::fs::read(&path).unwrap());
        }
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_container(&self, info: ContainerInfo) {
        self.inner.lock().unwrap().containers.push(info);
    }

    /// Make every `start_container` fail after the container was created.
    pub fn fail_starts(&self) {
        self.inner.lock().unwrap().fail_starts = true;
    }

    pub fn container_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .containers
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.inner
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Make execs in `container` exit with `code`.
    pub fn set_exec_exit_code(&self, container: &str, code: i32) {
        self.inner
            .lock()
            .unwrap()
            .exec_exit_codes
            .insert(container.to_string(), code);
    }

    /// Commands run in project (non-helper) containers, as `(container, cmd)`.
    pub fn execs(&self) -> Vec<(String, Vec<String>)> {
        let inner = self.inner.lock().unwrap();
        inner
            .execs
            .iter()
            .filter(|(c, _)| !inner.helper_volumes.contains_key(c))
            .map(|(c, spec)| (c.clone(), spec.cmd.clone()))
            .collect()
    }

    pub fn exec_specs(&self) -> Vec<(String, ExecSpec)> {
        let inner = self.inner.lock().unwrap();
        inner
            .execs
            .iter()
            .filter(|(c, _)| !inner.helper_volumes.contains_key(c))
            .cloned()
            .collect()
    }

    /// `(container, destination)` of copies into project containers.
    pub fn copied(&self) -> Vec<(String, String)> {
        self.inner.lock().unwrap().copied.clone()
    }

    pub fn add_volume(&self, name: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.inner.lock().unwrap().volumes.insert(
            name.to_string(),
            Volume {
                labels,
                ..Default::default()
            },
        );
    }

    pub fn volume_names(&self) -> Vec<String> {
        self.inner.lock().unwrap().volumes.keys().cloned().collect()
    }

    /// Files directly under `subdir` of a volume.
    pub fn volume_files(&self, volume: &str, subdir: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let Some(vol) = inner.volumes.get(volume) else {
            return Vec::new();
        };
        list_dir(vol, subdir)
    }

    pub fn write_volume_file(&self, volume: &str, path: &str, contents: &str) {
        self.inner
            .lock()
            .unwrap()
            .volumes
            .entry(volume.to_string())
            .or_default()
            .files
            .insert(path.to_string(), contents.as_bytes().to_vec());
    }

    pub fn volume_file(&self, volume: &str, path: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .volumes
            .get(volume)?
            .files
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    fn run_helper_script(inner: &mut Inner, container: &str, script: &str) -> ExecOutput {
        let Some(volume) = inner.helper_volumes.get(container).cloned() else {
            return ExecOutput::default();
        };
        let vol = inner.volumes.entry(volume).or_default();

        if script.contains("for f in") {
            let dir = script
                .split("[ -d ")
                .nth(1)
                .and_then(|rest| rest.split(" ]").next())
                .map(volume_path)
                .unwrap_or_default();
            return ExecOutput {
                stdout: list_dir(vol, &dir).join("\n"),
                ..Default::default()
            };
        }
        if let Some(rest) = script.strip_prefix("rm -f ") {
            for path in rest.split_whitespace() {
                vol.files.remove(&volume_path(path));
            }
            return ExecOutput::default();
        }
        if script.contains("-delete") || script.contains("rm -rf") {
            for step in script.split("&&") {
                let step = step.trim();
                let target = if let Some(rest) = step.strip_prefix("find ") {
                    rest.split_whitespace().next()
                } else if let Some(rest) = step.strip_prefix("rm -rf ") {
                    rest.split_whitespace().next().map(|p| p.trim_end_matches("/*"))
                } else {
                    None
                };
                if let Some(dir) = target.map(volume_path) {
                    vol.files
                        .retain(|path, _| !(dir.is_empty() || path.starts_with(&format!("{}/", dir))));
                }
            }
        }
        ExecOutput::default()
    }
}

fn list_dir(vol: &Volume, subdir: &str) -> Vec<String> {
    let prefix = if subdir.is_empty() {
        String::new()
    } else {
        format!("{}/", subdir.trim_matches('/'))
    };
    vol.files
        .keys()
        .filter_map(|path| path.strip_prefix(&prefix))
        .filter(|rest| !rest.contains('/'))
        .map(String::from)
        .collect()
}

fn not_found(name: &str) -> DockerError {
    DockerError::ContainerNotFound {
        container: name.to_string(),
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn info(&self, _cancel: &CancellationToken) -> Result<EngineInfo, DockerError> {
        Ok(EngineInfo {
            name: "fake".into(),
            operating_system: "Fake Linux".into(),
            server_version: "27.0.0".into(),
            api_version: "1.46".into(),
            ..Default::default()
        })
    }

    async fn network_gateway(
        &self,
        _network: &str,
        _cancel: &CancellationToken,
    ) -> Result<Option<String>, DockerError> {
        Ok(None)
    }

    async fn inspect_container(
        &self,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<ContainerInfo, DockerError> {
        self.inner
            .lock()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == name || c.id == name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn find_containers(
        &self,
        filters: &[LabelFilter],
        include_stopped: bool,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ContainerInfo>, DockerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .containers
            .iter()
            .filter(|c| include_stopped || c.state.running)
            .filter(|c| filters.iter().all(|f| f.matches(&c.labels)))
            .cloned()
            .collect())
    }

    async fn image_exists(&self, _image: &str, _cancel: &CancellationToken) -> Result<bool, DockerError> {
        Ok(true)
    }

    async fn pull_image(&self, _image: &str, _cancel: &CancellationToken) -> Result<(), DockerError> {
        Ok(())
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
        _cancel: &CancellationToken,
    ) -> Result<String, DockerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = format!("fake{:04}", inner.next_id);
        if let Some(volume) = spec
            .binds
            .iter()
            .find_map(|b| b.strip_suffix(&format!(":{}", HELPER_MOUNT)))
        {
            inner.helper_volumes.insert(id.clone(), volume.to_string());
        }
        if let [sh, flag, script] = spec.cmd.as_slice() {
            if sh == "sh" && flag == "-c" {
                inner.helper_scripts.insert(id.clone(), script.clone());
            }
        }
        inner.containers.push(ContainerInfo {
            id: id.clone(),
            name: spec.name.clone().unwrap_or_else(|| id.clone()),
            image: spec.image.clone(),
            state: ContainerState {
                status: "created".into(),
                running: false,
                health: None,
            },
            labels: spec.labels.clone(),
            env: spec.env.clone(),
            ports: Vec::new(),
        });
        Ok(id)
    }

    async fn start_container(
        &self,
        id: &str,
        attach: bool,
        _cancel: &CancellationToken,
    ) -> Result<Option<ExecOutput>, DockerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_starts {
            return Err(DockerError::CommandFailed {
                command: format!("docker start {}", id),
                stderr: "OCI runtime create failed".into(),
                exit_code: Some(127),
            });
        }
        let c = inner
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| not_found(id))?;
        c.state.running = !attach;
        c.state.status = if attach { "exited" } else { "running" }.into();
        if !attach {
            return Ok(None);
        }
        let output = match inner.helper_scripts.get(id).cloned() {
            Some(script) => Self::run_helper_script(&mut inner, id, &script),
            None => ExecOutput::default(),
        };
        Ok(Some(output))
    }

    async fn remove_container(&self, name: &str, _cancel: &CancellationToken) -> Result<(), DockerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.containers.retain(|c| c.name != name && c.id != name);
        Ok(())
    }

    async fn exec(
        &self,
        container: &str,
        spec: &ExecSpec,
        _cancel: &CancellationToken,
    ) -> Result<ExecOutput, DockerError> {
        let mut inner = self.inner.lock().unwrap();
        let found = inner
            .containers
            .iter()
            .any(|c| (c.name == container || c.id == container) && c.state.running);
        if !found {
            return Err(not_found(container));
        }
        inner.execs.push((container.to_string(), spec.clone()));
        if inner.helper_volumes.contains_key(container) {
            if let Some(script) = spec.cmd.get(2).cloned() {
                return Ok(Self::run_helper_script(&mut inner, container, &script));
            }
            return Ok(ExecOutput::default());
        }
        let exit_code = inner.exec_exit_codes.get(container).copied().unwrap_or(0);
        Ok(ExecOutput {
            exit_code,
            stdout: String::new(),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                "command failed\n".into()
            },
        })
    }

    async fn copy_into(
        &self,
        container: &str,
        src: &Path,
        dst: &str,
        _exclusion: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.helper_volumes.get(container).cloned() {
            Some(volume) => {
                let mut files = BTreeMap::new();
                read_tree(src, &volume_path(dst), &mut files);
                inner.volumes.entry(volume).or_default().files.extend(files);
            }
            None => inner.copied.push((container.to_string(), dst.to_string())),
        }
        Ok(())
    }

    async fn copy_from(
        &self,
        container: &str,
        src: &str,
        dst: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let inner = self.inner.lock().unwrap();
        let Some(volume) = inner.helper_volumes.get(container) else {
            return Ok(());
        };
        let Some(vol) = inner.volumes.get(volume) else {
            return Ok(());
        };
        let dir = volume_path(src);
        let prefix = if dir.is_empty() { String::new() } else { format!("{}/", dir) };
        for (path, contents) in &vol.files {
            if let Some(rest) = path.strip_prefix(&prefix) {
                let target = dst.join(rest);
                std::fs::create_dir_all(target.parent().unwrap()).unwrap();
                std::fs::write(target, contents).unwrap();
            }
        }
        Ok(())
    }

    async fn logs(
        &self,
        container: &str,
        _options: &LogOptions,
        _cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let inner = self.inner.lock().unwrap();
        if inner.containers.iter().any(|c| c.name == container) {
            Ok(())
        } else {
            Err(not_found(container))
        }
    }

    async fn list_networks(&self, _cancel: &CancellationToken) -> Result<Vec<NetworkInfo>, DockerError> {
        Ok(self.inner.lock().unwrap().networks.clone())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        _cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let mut inner = self.inner.lock().unwrap();
        let id = format!("net-{}", name);
        inner.networks.push(NetworkInfo {
            id,
            name: name.to_string(),
            labels: labels.clone(),
        });
        Ok(())
    }

    async fn remove_network(&self, id: &str, _cancel: &CancellationToken) -> Result<(), DockerError> {
        self.inner.lock().unwrap().networks.retain(|n| n.id != id);
        Ok(())
    }

    async fn create_volume(&self, spec: &VolumeSpec, _cancel: &CancellationToken) -> Result<(), DockerError> {
        self.inner
            .lock()
            .unwrap()
            .volumes
            .entry(spec.name.clone())
            .or_default()
            .labels
            .extend(spec.labels.clone());
        Ok(())
    }

    async fn remove_volume(&self, name: &str, _cancel: &CancellationToken) -> Result<(), DockerError> {
        self.inner.lock().unwrap().volumes.remove(name);
        Ok(())
    }

    async fn volume_exists(&self, name: &str, _cancel: &CancellationToken) -> Result<bool, DockerError> {
        Ok(self.inner.lock().unwrap().volumes.contains_key(name))
    }

    async fn volume_labels(
        &self,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, DockerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .volumes
            .get(name)
            .map(|v| v.labels.clone())
            .unwrap_or_default())
    }

    async fn list_volumes(
        &self,
        filters: &[LabelFilter],
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, DockerError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .volumes
            .iter()
            .filter(|(_, v)| filters.iter().all(|f| f.matches(&v.labels)))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn volume_size(&self, _name: &str, _cancel: &CancellationToken) -> Result<u64, DockerError> {
        Ok(0)
    }

    async fn containers_using_volume(
        &self,
        _name: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>, DockerError> {
        Ok(Vec::new())
    }
}

/// Compose runner that turns `up`, `stop` and `down` into container changes
/// on a [`FakeEngine`].
pub struct FakeCompose {
    engine: Arc<FakeEngine>,
    requests: Mutex<Vec<(String, Vec<String>)>>,
    unhealthy: Mutex<BTreeSet<String>>,
    up_error: Mutex<Option<String>>,
}

fn port_binding(spec: &serde_yaml::Value) -> Option<PortBinding> {
    let spec = spec.as_str()?;
    let parts: Vec<&str> = spec.split(':').collect();
    let (host_ip, host_port, container) = match parts.as_slice() {
        [ip, host, container] => (ip.to_string(), host.parse().unwrap_or(0), *container),
        [host, container] => (String::new(), host.parse().unwrap_or(0), *container),
        _ => return None,
    };
    Some(PortBinding {
        container_port: format!("{}/tcp", container),
        host_ip,
        host_port,
    })
}

impl FakeCompose {
    pub fn new(engine: Arc<FakeEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            requests: Mutex::new(Vec::new()),
            unhealthy: Mutex::new(BTreeSet::new()),
            up_error: Mutex::new(None),
        })
    }

    pub fn clear_up_failure(&self) {
        *self.up_error.lock().unwrap() = None;
    }

    /// Every `up` fails with `message` before creating anything.
    pub fn fail_up(&self, message: &str) {
        *self.up_error.lock().unwrap() = Some(message.to_string());
    }

    /// Containers of `service` come up unhealthy.
    pub fn make_unhealthy(&self, service: &str) {
        self.unhealthy.lock().unwrap().insert(service.to_string());
    }

    /// `(compose project, action)` of every request so far.
    pub fn requests(&self) -> Vec<(String, Vec<String>)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn ups(&self, project: &str) -> usize {
        self.requests()
            .iter()
            .filter(|(p, a)| p == project && a.first().map(String::as_str) == Some("up"))
            .count()
    }
}

#[async_trait]
impl ComposeRunner for FakeCompose {
    async fn run(&self, req: &ComposeRequest, cancel: &CancellationToken) -> ddev::Result<ComposeOutput> {
        if cancel.is_cancelled() {
            return Err(ddev::Error::Cancelled);
        }
        self.requests
            .lock()
            .unwrap()
            .push((req.project_name.clone(), req.action.clone()));
        let mut inner = self.engine.inner.lock().unwrap();
        let in_project =
            |c: &ContainerInfo| c.label(COMPOSE_PROJECT_LABEL) == Some(req.project_name.as_str());

        match req.action.first().map(String::as_str) {
            Some("up") => {
                if let Some(message) = self.up_error.lock().unwrap().clone() {
                    return Err(ddev::Error::Compose(message));
                }
                let Some(doc) = &req.doc else {
                    return Err(ddev::Error::Compose("up needs a document".into()));
                };
                let unhealthy = self.unhealthy.lock().unwrap().clone();
                for (service, def) in &doc.services {
                    let name = def
                        .container_name
                        .clone()
                        .unwrap_or_else(|| format!("{}-{}-1", req.project_name, service));
                    inner.containers.retain(|c| c.name != name);
                    let mut labels = def.labels.clone();
                    labels.insert(COMPOSE_SERVICE_LABEL.into(), service.clone());
                    labels.insert(COMPOSE_ONEOFF_LABEL.into(), "False".into());
                    labels.insert(COMPOSE_PROJECT_LABEL.into(), req.project_name.clone());
                    let health = def.healthcheck.as_ref().map(|_| HealthState {
                        status: if unhealthy.contains(service) {
                            "unhealthy".into()
                        } else {
                            "healthy".into()
                        },
                        last_output: if unhealthy.contains(service) {
                            "nginx: [emerg] unexpected end of file".into()
                        } else {
                            String::new()
                        },
                    });
                    inner.next_id += 1;
                    let id = format!("fake{:04}", inner.next_id);
                    inner.containers.push(ContainerInfo {
                        id,
                        name,
                        image: def.image.clone().unwrap_or_default(),
                        state: ContainerState {
                            status: "running".into(),
                            running: true,
                            health,
                        },
                        labels,
                        env: def
                            .environment
                            .iter()
                            .map(|(k, v)| format!("{}={}", k, v))
                            .collect(),
                        ports: def.ports.iter().filter_map(port_binding).collect(),
                    });
                }
            }
            Some("stop") => {
                for c in inner.containers.iter_mut().filter(|c| in_project(c)) {
                    c.state.running = false;
                    c.state.status = "exited".into();
                }
            }
            Some("down") => inner.containers.retain(|c| !in_project(c)),
            _ => {}
        }
        Ok(ComposeOutput::default())
    }
}

/// A context over fresh fakes and a scratch user-config directory.
pub struct Harness {
    pub engine: Arc<FakeEngine>,
    pub compose: Arc<FakeCompose>,
    pub ctx: Context,
    pub home: TempDir,
}

pub fn host_profile() -> HostProfile {
    HostProfile {
        os: OsFlavor::Linux,
        docker_ip: "127.0.0.1".into(),
        engine_api_version: "1.46".into(),
        ..Default::default()
    }
}

pub fn harness() -> Harness {
    let home = TempDir::new().unwrap();
    let engine = FakeEngine::new();
    let compose = FakeCompose::new(engine.clone());
    let state = GlobalState::new(home.path().join("ddev"));

    // Router ports nothing on this machine listens on.
    let ports: Vec<u32> = (0..4)
        .map(|_| ddev::port::get_free_port().unwrap() as u32)
        .collect();
    state
        .update(|g| {
            g.router_http_port = Some(ports[0]);
            g.router_https_port = Some(ports[1]);
            g.mailpit_http_port = Some(ports[2]);
            g.mailpit_https_port = Some(ports[3]);
            Ok(())
        })
        .unwrap();

    let ctx = Context::new(engine.clone(), compose.clone(), state).with_host(host_profile());
    Harness {
        engine,
        compose,
        ctx,
        home,
    }
}

/// Write a minimal php project named `name` under `parent` and return it.
pub fn php_project(parent: &Path, name: &str) -> Project {
    let approot = parent.join(name);
    std::fs::create_dir_all(&approot).unwrap();
    let mut config = ProjectConfig::new(name, ProjectType::Php);
    config.docroot = String::new();
    let project = Project::new(&approot, config);
    project.save().unwrap();
    Project::load(&approot).unwrap()
}

pub fn site_labels(project: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("com.ddev.site-name".to_string(), project.to_string()),
        (COMPOSE_ONEOFF_LABEL.to_string(), "False".to_string()),
    ])
}

/// Whether a real docker daemon answers.
pub async fn docker_available() -> bool {
    tokio::process::Command::new("docker")
        .args(["info", "--format", "{{.ServerVersion}}"])
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}
