//! The shared TLS-terminating router.
//!
//! One `ddev-router` container serves every running project. Each project
//! contributes a dynamic config file and a cert pair; all of them live in the
//! `traefik/` tree of the shared cache volume, which the router watches.
//! Registration and deregistration hold `router.lock` so concurrent starts
//! never lose each other's files.

pub mod certs;
pub mod config;

pub use certs::{ensure_cert, CertOutcome};
pub use config::{routing_table, Route};

use crate::compose::render::{GLOBAL_CACHE_VOLUME, SHARED_NETWORK};
use crate::compose::{ComposeProject, ComposeRequest, ServiceDef};
use crate::context::Context;
use crate::docker::images::ROUTER_IMAGE;
use crate::docker::{
    ensure_network, ensure_volume, wait_healthy, ContainerInfo, LabelFilter,
    COMPOSE_SERVICE_LABEL, PLATFORM_LABEL, SITE_NAME_LABEL,
};
use crate::error::{Error, Result};
use crate::global::GlobalConfig;
use crate::host::{HostProfile, OsFlavor};
use crate::lock::FileLock;
use crate::markers;
use crate::port::PortConflict;
use crate::project::Project;
use crate::volume::VolumeXfer;
use config::{CACHE_MOUNT, CERTS_SUBDIR, CONFIG_SUBDIR};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

pub const ROUTER_CONTAINER: &str = "ddev-router";
pub const ROUTER_PROJECT: &str = "ddev-router";
const ROUTER_HEALTH_TIMEOUT: Duration = Duration::from_secs(60);
const ROUTER_LOCK_TIMEOUT: Duration = Duration::from_secs(120);
const STATIC_CONFIG: &str = "static_config.yaml";

/// What `ddev describe` and `ddev list` show for the router.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterStatus {
    Disabled,
    Absent,
    /// Health status as reported by the engine.
    Present(String),
}

impl std::fmt::Display for RouterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouterStatus::Disabled => f.write_str("disabled"),
            RouterStatus::Absent => f.write_str("not running"),
            RouterStatus::Present(s) => f.write_str(s),
        }
    }
}

pub struct Router<'a> {
    ctx: &'a Context,
    host: &'a HostProfile,
}

fn platform_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(PLATFORM_LABEL.to_string(), "ddev".to_string())])
}

/// `.ddev/traefik`, the project-side staging tree copied into the volume.
pub fn staging_dir(project: &Project) -> PathBuf {
    project.ddev_dir().join("traefik")
}

fn files_in(dir: &Path) -> Result<BTreeSet<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(String::from))
        .collect())
}

/// Host ports the router container currently publishes.
pub fn bound_ports(router: &ContainerInfo) -> BTreeSet<u16> {
    router
        .ports
        .iter()
        .map(|p| p.host_port)
        .filter(|p| *p != 0)
        .collect()
}

/// External ports asked for by a running container's `*_EXPOSE` variables.
fn exposed_ports(container: &ContainerInfo) -> BTreeSet<u16> {
    let service = container.service().unwrap_or_default();
    let mut routes = Vec::new();
    if let Some(spec) = container.env_value("HTTP_EXPOSE") {
        routes.extend(config::parse_expose(service, spec, false));
    }
    if let Some(spec) = container.env_value("HTTPS_EXPOSE") {
        routes.extend(config::parse_expose(service, spec, true));
    }
    config::external_ports(&routes)
}

/// The compose document for the router itself.
pub fn router_doc(ports: &BTreeSet<u16>, bind_ip: &str) -> ComposeProject {
    let mut svc = ServiceDef {
        container_name: Some(ROUTER_CONTAINER.to_string()),
        image: Some(ROUTER_IMAGE.to_string()),
        command: Some(Value::Sequence(vec![Value::String(format!(
            "--configFile={}/traefik/{}",
            CACHE_MOUNT, STATIC_CONFIG
        ))])),
        labels: platform_labels(),
        ports: ports
            .iter()
            .map(|p| Value::String(format!("{}:{}:{}", bind_ip, p, p)))
            .collect(),
        volumes: vec![Value::String(format!("{}:{}", GLOBAL_CACHE_VOLUME, CACHE_MOUNT))],
        restart: Some("unless-stopped".to_string()),
        networks: Some(Value::Sequence(vec![Value::String(SHARED_NETWORK.to_string())])),
        ..Default::default()
    };
    let mut health = Mapping::new();
    health.insert(
        "test".into(),
        Value::Sequence(vec![
            "CMD".into(),
            "traefik".into(),
            "healthcheck".into(),
            "--ping".into(),
            format!("--configFile={}/traefik/{}", CACHE_MOUNT, STATIC_CONFIG).into(),
        ]),
    );
    health.insert("interval".into(), "1s".into());
    health.insert("retries".into(), Value::Number(60.into()));
    health.insert("start_period".into(), "60s".into());
    svc.healthcheck = Some(Value::Mapping(health));

    let external = |name: &str| {
        let mut m = Mapping::new();
        m.insert("name".into(), name.into());
        m.insert("external".into(), Value::Bool(true));
        Value::Mapping(m)
    };

    let mut doc = ComposeProject {
        name: ROUTER_PROJECT.to_string(),
        ..Default::default()
    };
    doc.services.insert(ROUTER_CONTAINER.to_string(), svc);
    doc.networks.insert(SHARED_NETWORK.to_string(), external(SHARED_NETWORK));
    doc.volumes
        .insert(GLOBAL_CACHE_VOLUME.to_string(), external(GLOBAL_CACHE_VOLUME));
    doc
}

/// Whether the router is switched off for this project or host.
pub fn is_disabled(project: Option<&Project>, global: &GlobalConfig, host: &HostProfile) -> bool {
    host.os == OsFlavor::Codespaces
        || global.omit_containers.iter().any(|s| s == ROUTER_CONTAINER)
        || project
            .map(|p| p.config.omit_containers.iter().any(|s| s == ROUTER_CONTAINER))
            .unwrap_or(false)
}

impl<'a> Router<'a> {
    pub fn new(ctx: &'a Context, host: &'a HostProfile) -> Self {
        Self { ctx, host }
    }

    fn xfer(&self) -> VolumeXfer<'_> {
        VolumeXfer::new(self.ctx.engine(), self.host)
    }

    async fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(
            &self.ctx.state().router_lock_path(),
            ROUTER_LOCK_TIMEOUT,
            self.ctx.cancel(),
        )
        .await
    }

    /// Install the project's routes and cert, prune stale files and make
    /// sure the router listens on every port now in use.
    pub async fn register(&self, project: &Project, doc: &ComposeProject) -> Result<()> {
        let global = self.ctx.state().load()?;
        if is_disabled(Some(project), &global, self.host) {
            debug!(project = project.name(), "router disabled, skipping registration");
            return Ok(());
        }
        let _lock = self.lock().await?;
        let cancel = self.ctx.cancel();

        let tld = project.tld(global.project_tld.as_deref());
        let hostnames = project.hostnames(tld);
        let staging = staging_dir(project);
        let certs_dir = staging.join("certs");
        let config_dir = staging.join("config");

        let cert = ensure_cert(project.name(), &hostnames, &certs_dir, cancel).await?;
        let routes = routing_table(doc);
        let entry = config::render_entry(
            project.name(),
            &project.compose_project_name(),
            &hostnames,
            &routes,
            cert.has_cert(),
        )?;
        fs::create_dir_all(&config_dir).map_err(|e| {
            Error::Filesystem(format!("Cannot create '{}': {}", config_dir.display(), e))
        })?;
        let entry_path = config_dir.join(config::entry_file_name(project.name()));
        match markers::write_generated(&entry_path, &entry) {
            Ok(_) => {}
            Err(Error::ConfigFileSignature { path }) => {
                warn!("{} has no #ddev-generated signature; using it as it is", path.display());
            }
            Err(e) => return Err(e),
        }

        ensure_volume(self.ctx.engine(), GLOBAL_CACHE_VOLUME, &platform_labels(), cancel).await?;
        let (uid, _) = crate::host::container_ids();
        self.xfer()
            .copy_into(&staging, GLOBAL_CACHE_VOLUME, "traefik", &uid, None, false, cancel)
            .await?;

        let known = self.known_projects(project)?;
        for (subdir, local) in [(CONFIG_SUBDIR, &config_dir), (CERTS_SUBDIR, &certs_dir)] {
            let desired = files_in(local)?;
            self.prune(subdir, &desired, project.name(), &known).await?;
        }

        let ports = self.desired_ports(&config::external_ports(&routes)).await?;
        self.ensure_running(&global, &ports).await
    }

    /// Drop the project's files from the volume. A missing volume means
    /// there is nothing to remove.
    pub async fn deregister(&self, project: &Project) -> Result<()> {
        let cancel = self.ctx.cancel();
        if !self.ctx.engine().volume_exists(GLOBAL_CACHE_VOLUME, cancel).await? {
            return Ok(());
        }
        let _lock = self.lock().await?;
        let known = self.known_projects(project)?;
        for subdir in [CONFIG_SUBDIR, CERTS_SUBDIR] {
            self.prune(subdir, &BTreeSet::new(), project.name(), &known)
                .await?;
        }
        Ok(())
    }

    fn known_projects(&self, project: &Project) -> Result<BTreeSet<String>> {
        let mut known: BTreeSet<String> = self
            .ctx
            .state()
            .projects()?
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        known.insert(project.name().to_string());
        Ok(known)
    }

    async fn prune(
        &self,
        subdir: &str,
        desired: &BTreeSet<String>,
        project: &str,
        known: &BTreeSet<String>,
    ) -> Result<()> {
        let cancel = self.ctx.cancel();
        let present = self.xfer().list(GLOBAL_CACHE_VOLUME, subdir, cancel).await?;
        let obsolete = config::obsolete_files(&present, desired, project, known);
        if !obsolete.is_empty() {
            debug!(subdir, ?obsolete, "pruning router files");
            self.xfer()
                .remove_files(GLOBAL_CACHE_VOLUME, subdir, &obsolete, cancel)
                .await?;
        }
        Ok(())
    }

    /// `extra` plus every external port a running project container asks for.
    pub async fn desired_ports(&self, extra: &BTreeSet<u16>) -> Result<BTreeSet<u16>> {
        let running = self
            .ctx
            .engine()
            .find_containers(&[LabelFilter::has(SITE_NAME_LABEL)], false, self.ctx.cancel())
            .await?;
        let mut ports = extra.clone();
        for c in running
            .iter()
            .filter(|c| c.label(SITE_NAME_LABEL).is_some_and(|n| !n.is_empty()))
        {
            ports.extend(exposed_ports(c));
        }
        Ok(ports)
    }

    pub async fn find(&self) -> Result<Option<ContainerInfo>> {
        let found = self
            .ctx
            .engine()
            .find_containers(
                &[LabelFilter::eq(COMPOSE_SERVICE_LABEL, ROUTER_CONTAINER)],
                true,
                self.ctx.cancel(),
            )
            .await?;
        Ok(found.into_iter().next())
    }

    /// Fail when a port the project's routes need is held by something other
    /// than the running router.
    pub async fn check_ports(&self, project: &Project, doc: &ComposeProject) -> Result<()> {
        let global = self.ctx.state().load()?;
        if is_disabled(Some(project), &global, self.host) {
            return Ok(());
        }
        let wanted = config::external_ports(&routing_table(doc));
        let bound = self
            .find()
            .await?
            .filter(|c| c.state.running)
            .map(|c| bound_ports(&c))
            .unwrap_or_default();
        for &port in wanted.difference(&bound) {
            if let Some(conflict) = PortConflict::check(&self.host.docker_ip, port).await {
                return Err(conflict.into_error());
            }
        }
        Ok(())
    }

    /// Start or recreate the router so it publishes exactly `ports`.
    async fn ensure_running(&self, global: &GlobalConfig, ports: &BTreeSet<u16>) -> Result<()> {
        let cancel = self.ctx.cancel();
        let existing = self.find().await?;
        let already_bound = existing
            .as_ref()
            .filter(|c| c.state.running)
            .map(bound_ports)
            .unwrap_or_default();

        if existing.as_ref().is_some_and(|c| c.state.running) && &already_bound == ports {
            debug!(?ports, "router already publishes the needed ports");
            return Ok(());
        }

        for &port in ports.difference(&already_bound) {
            if let Some(conflict) = PortConflict::check(&self.host.docker_ip, port).await {
                return Err(conflict.into_error());
            }
        }

        let static_path = self.ctx.state().dir().join("traefik").join(STATIC_CONFIG);
        if let Some(parent) = static_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Filesystem(format!("Cannot create '{}': {}", parent.display(), e))
            })?;
        }
        markers::atomic_write(&static_path, config::render_static(ports).as_bytes())?;
        let (uid, _) = crate::host::container_ids();
        self.xfer()
            .copy_into(&static_path, GLOBAL_CACHE_VOLUME, "traefik", &uid, None, false, cancel)
            .await?;

        ensure_network(self.ctx.engine(), SHARED_NETWORK, &platform_labels(), cancel).await?;

        if existing.is_some() {
            info!(?ports, "recreating router");
            self.ctx
                .engine()
                .remove_container(ROUTER_CONTAINER, cancel)
                .await?;
        }

        let bind_ip = if global.router_bind_all_interfaces {
            "0.0.0.0"
        } else {
            self.host.docker_ip.as_str()
        };
        let doc = router_doc(ports, bind_ip);
        self.ctx
            .compose()
            .run(&ComposeRequest::new(ROUTER_PROJECT, Some(doc), &["up", "-d"]), cancel)
            .await?;

        wait_healthy(
            self.ctx.engine(),
            &[LabelFilter::eq(COMPOSE_SERVICE_LABEL, ROUTER_CONTAINER)],
            ROUTER_HEALTH_TIMEOUT,
            cancel,
        )
        .await?;
        Ok(())
    }

    /// Remove the router when no project container is running.
    pub async fn remove_if_idle(&self) -> Result<bool> {
        let running = self
            .ctx
            .engine()
            .find_containers(&[LabelFilter::has(SITE_NAME_LABEL)], false, self.ctx.cancel())
            .await?;
        if running
            .iter()
            .any(|c| c.label(SITE_NAME_LABEL).is_some_and(|n| !n.is_empty()))
        {
            return Ok(false);
        }
        if self.find().await?.is_none() {
            return Ok(false);
        }
        self.remove().await?;
        Ok(true)
    }

    pub async fn remove(&self) -> Result<()> {
        debug!("removing router");
        self.ctx
            .engine()
            .remove_container(ROUTER_CONTAINER, self.ctx.cancel())
            .await?;
        Ok(())
    }

    pub async fn status(&self, project: Option<&Project>) -> Result<RouterStatus> {
        let global = self.ctx.state().load()?;
        if is_disabled(project, &global, self.host) {
            return Ok(RouterStatus::Disabled);
        }
        Ok(match self.find().await? {
            None => RouterStatus::Absent,
            Some(c) => RouterStatus::Present(crate::docker::container_health(&c).0.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{ContainerState, PortBinding};
    use crate::project::{ProjectConfig, ProjectType};

    #[test]
    fn router_doc_publishes_each_port() {
        let ports: BTreeSet<u16> = [80, 443, 8025].into_iter().collect();
        let doc = router_doc(&ports, "127.0.0.1");
        let svc = &doc.services[ROUTER_CONTAINER];
        assert_eq!(svc.ports.len(), 3);
        assert_eq!(svc.ports[0], Value::String("127.0.0.1:80:80".into()));
        assert_eq!(svc.labels.get(PLATFORM_LABEL).map(String::as_str), Some("ddev"));
        assert!(!svc.labels.contains_key(SITE_NAME_LABEL));
        assert_eq!(doc.owned_volume_names(), Vec::<String>::new());
    }

    #[test]
    fn bound_ports_ignore_unpublished() {
        let c = ContainerInfo {
            state: ContainerState {
                running: true,
                ..Default::default()
            },
            ports: vec![
                PortBinding {
                    container_port: "80/tcp".into(),
                    host_ip: "127.0.0.1".into(),
                    host_port: 80,
                },
                PortBinding {
                    container_port: "8080/tcp".into(),
                    host_ip: String::new(),
                    host_port: 0,
                },
            ],
            ..Default::default()
        };
        assert_eq!(bound_ports(&c).into_iter().collect::<Vec<_>>(), vec![80]);
    }

    #[test]
    fn exposed_ports_come_from_env() {
        let c = ContainerInfo {
            env: vec![
                "HTTP_EXPOSE=8080:80,8025:8025".into(),
                "HTTPS_EXPOSE=8443:80".into(),
                "PATH=/usr/bin".into(),
            ],
            ..Default::default()
        };
        assert_eq!(
            exposed_ports(&c).into_iter().collect::<Vec<_>>(),
            vec![8025, 8080, 8443]
        );
    }

    #[test]
    fn omit_and_codespaces_disable_the_router() {
        let host = HostProfile::default();
        let mut global = GlobalConfig::default();
        let mut cfg = ProjectConfig::new("a", ProjectType::Php);
        assert!(!is_disabled(Some(&Project::new("/srv/a", cfg.clone())), &global, &host));

        cfg.omit_containers = vec!["ddev-router".into()];
        assert!(is_disabled(Some(&Project::new("/srv/a", cfg)), &global, &host));

        global.omit_containers = vec!["ddev-router".into()];
        assert!(is_disabled(None, &global, &host));

        let codespaces = HostProfile {
            os: OsFlavor::Codespaces,
            ..Default::default()
        };
        assert!(is_disabled(None, &GlobalConfig::default(), &codespaces));
    }
}
