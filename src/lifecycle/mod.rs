//! Project lifecycle: configure, start, stop, pause, delete and the
//! read-only views on a project.
//!
//! Nothing about a project's state is stored. [`Lifecycle::status`] derives
//! it on every call from the engine's labelled containers and the global
//! registry, so a crashed `ddev` process never leaves stale state behind.
//!
//! Transitions:
//!
//! ```text
//! absent --configure--> configured --start--> starting --healthy--> running
//! running --stop--> stopped      running --pause--> paused
//! stopped|paused --start--> starting
//! stopped|running --delete--> absent
//! ```

mod hooks;

use crate::compose::render::{self, RenderContext, GLOBAL_CACHE_VOLUME, SHARED_NETWORK, SSH_AGENT_VOLUME};
use crate::compose::{pull_images, ComposeProject, ComposeRequest};
use crate::context::Context;
use crate::docker::{
    container_health, ensure_network, ensure_volume, project_filters, wait_healthy_all,
    ContainerHealth, ContainerInfo, DockerError, ExecSpec, LabelFilter, LogOptions, PLATFORM_LABEL,
    SITE_NAME_LABEL,
};
use crate::error::{Error, Result};
use crate::global::{GlobalConfig, RouterPorts};
use crate::host::HostProfile;
use crate::lock::{self, FileLock};
use crate::markers;
use crate::project::{
    name_from_dir, DatabaseSpec, PerformanceMode, Project, ProjectConfig, ProjectType,
    WebserverType, CONFIG_DIR, CONFIG_FILE,
};
use crate::router::{self, Router, RouterStatus};
use crate::ssh_agent;
use hooks::HookRunner;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

const CODE_DIR: &str = "/var/www/html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectState {
    /// No `.ddev/config.yaml`.
    Absent,
    /// Configured but never started, or unlisted.
    Configured,
    Starting,
    Running,
    Stopped,
    Paused,
    /// Some containers exited or report unhealthy.
    Unhealthy,
}

impl ProjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectState::Absent => "absent",
            ProjectState::Configured => "configured",
            ProjectState::Starting => "starting",
            ProjectState::Running => "running",
            ProjectState::Stopped => "stopped",
            ProjectState::Paused => "paused",
            ProjectState::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive a configured project's state from its containers.
///
/// `listed` is whether the global registry knows the project; it separates
/// `stopped` (started before, containers removed) from `configured`.
pub fn derive_state(listed: bool, containers: &[ContainerInfo]) -> ProjectState {
    if containers.is_empty() {
        return if listed {
            ProjectState::Stopped
        } else {
            ProjectState::Configured
        };
    }
    if containers.iter().all(|c| !c.state.running) {
        return ProjectState::Paused;
    }
    let health: Vec<ContainerHealth> = containers.iter().map(|c| container_health(c).0).collect();
    if health.iter().all(|h| *h == ContainerHealth::Healthy) {
        ProjectState::Running
    } else if health
        .iter()
        .any(|h| matches!(h, ContainerHealth::Unhealthy | ContainerHealth::Exited))
    {
        ProjectState::Unhealthy
    } else {
        ProjectState::Starting
    }
}

/// Changes `ddev config` applies on top of the existing (or default) document.
#[derive(Debug, Clone, Default)]
pub struct ConfigureOptions {
    pub name: Option<String>,
    pub project_type: Option<ProjectType>,
    pub docroot: Option<String>,
    pub php_version: Option<String>,
    pub webserver_type: Option<WebserverType>,
    pub database: Option<DatabaseSpec>,
    pub performance_mode: Option<PerformanceMode>,
    pub additional_hostnames: Option<Vec<String>>,
    pub additional_fqdns: Option<Vec<String>>,
    pub project_tld: Option<String>,
    pub router_http_port: Option<u32>,
    pub router_https_port: Option<u32>,
    pub host_db_port: Option<u32>,
    pub host_webserver_port: Option<u32>,
    pub host_https_port: Option<u32>,
    pub omit_containers: Option<Vec<String>>,
    pub default_container_timeout: Option<u64>,
    pub disable_settings_management: Option<bool>,
    pub mailpit_enabled: Option<bool>,
}

impl ConfigureOptions {
    fn apply(self, cfg: &mut ProjectConfig) {
        if let Some(name) = self.name {
            cfg.name = name;
        }
        if let Some(t) = self.project_type {
            cfg.project_type = t;
        }
        if let Some(docroot) = self.docroot {
            cfg.docroot = docroot;
        }
        if let Some(v) = self.php_version {
            cfg.php_version = v;
        }
        if let Some(w) = self.webserver_type {
            cfg.webserver_type = w;
        }
        if let Some(db) = self.database {
            cfg.database = db;
        }
        if let Some(mode) = self.performance_mode {
            cfg.performance_mode = Some(mode);
        }
        if let Some(h) = self.additional_hostnames {
            cfg.additional_hostnames = h;
        }
        if let Some(f) = self.additional_fqdns {
            cfg.additional_fqdns = f;
        }
        if let Some(tld) = self.project_tld {
            cfg.project_tld = Some(tld).filter(|t| !t.is_empty());
        }
        let ports = [
            (&mut cfg.router_http_port, self.router_http_port),
            (&mut cfg.router_https_port, self.router_https_port),
            (&mut cfg.host_db_port, self.host_db_port),
            (&mut cfg.host_webserver_port, self.host_webserver_port),
            (&mut cfg.host_https_port, self.host_https_port),
        ];
        for (slot, value) in ports {
            if let Some(p) = value {
                *slot = Some(p);
            }
        }
        if let Some(omit) = self.omit_containers {
            cfg.omit_containers = omit;
        }
        if let Some(t) = self.default_container_timeout {
            cfg.default_container_timeout = Some(t.to_string());
        }
        if let Some(d) = self.disable_settings_management {
            cfg.disable_settings_management = d;
        }
        if let Some(m) = self.mailpit_enabled {
            cfg.mailpit_enabled = m;
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StopOptions {
    /// Also remove the project's volumes; implies `unlist`.
    pub remove_data: bool,
    /// Forget the project in the global registry.
    pub unlist: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { url: String },
    AlreadyRunning { url: String },
}

#[derive(Debug, Clone, Default)]
pub struct ExecRequest {
    pub service: String,
    pub cmd: Vec<String>,
    pub workdir: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceStatus {
    pub service: String,
    pub container: String,
    pub status: String,
    /// `host_ip:host_port->container_port`.
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Description {
    pub name: String,
    pub approot: PathBuf,
    pub state: ProjectState,
    pub project_type: String,
    pub php_version: String,
    pub webserver_type: String,
    pub docroot: String,
    pub database: String,
    pub performance_mode: PerformanceMode,
    pub primary_url: String,
    pub urls: Vec<String>,
    pub mailpit_url: Option<String>,
    pub services: Vec<ServiceStatus>,
    pub router: RouterStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListEntry {
    pub name: String,
    pub state: ProjectState,
    pub approot: Option<PathBuf>,
    pub url: Option<String>,
}

fn platform_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(PLATFORM_LABEL.to_string(), "ddev".to_string())])
}

/// Host ports the project publishes directly.
fn host_ports(project: &Project) -> Vec<u16> {
    let cfg = &project.config;
    [
        cfg.host_db_port,
        cfg.host_webserver_port,
        cfg.host_https_port,
        cfg.host_mailpit_port,
    ]
    .into_iter()
    .flatten()
    .filter_map(|p| u16::try_from(p).ok())
    .collect()
}

pub struct Lifecycle<'a> {
    ctx: &'a Context,
}

impl<'a> Lifecycle<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    fn hooks<'p>(&self, project: &'p Project, global: &GlobalConfig) -> HookRunner<'p>
    where
        'a: 'p,
    {
        HookRunner::new(self.ctx, project, global.fail_on_hook_fail)
    }

    /// Create or update `.ddev/config.yaml` in `approot`.
    ///
    /// The result is validated before anything is written, and a name
    /// already bound to another approot is refused.
    pub fn configure(&self, approot: &Path, opts: ConfigureOptions) -> Result<Project> {
        let mut project = match Project::load_unvalidated(approot) {
            Ok(p) => p,
            Err(Error::ProjectNotFound(_)) if approot.is_dir() => {
                let project_type = opts.project_type.unwrap_or(ProjectType::Php);
                Project::new(
                    approot,
                    ProjectConfig::new(name_from_dir(approot), project_type),
                )
            }
            Err(e) => return Err(e),
        };
        let type_changed = opts
            .project_type
            .is_some_and(|t| t != project.config.project_type);
        let docroot_given = opts.docroot.is_some();
        opts.apply(&mut project.config);
        if type_changed && !docroot_given && project.config.docroot.is_empty() {
            project.config.docroot = project.config.project_type.default_docroot().to_string();
        }
        project.config.validate(&project.approot)?;

        let global = self.ctx.state().load()?;
        if let Some(existing) = global.project_list.get(project.name()) {
            if existing.approot != project.approot && existing.approot.exists() {
                return Err(Error::validation(format!(
                    "a project named '{}' already exists at {}; project names must be unique",
                    project.name(),
                    existing.approot.display()
                )));
            }
        }
        project.save()?;
        info!(project = project.name(), "configuration written to {}", project.config_path().display());
        Ok(project)
    }

    async fn containers(&self, name: &str) -> Result<Vec<ContainerInfo>> {
        Ok(self
            .ctx
            .engine()
            .find_containers(&project_filters(name), true, self.ctx.cancel())
            .await?)
    }

    /// The project's current state.
    pub async fn status(&self, project: &Project) -> Result<ProjectState> {
        if !project.config_path().is_file() {
            return Ok(ProjectState::Absent);
        }
        let listed = self
            .ctx
            .state()
            .load()?
            .project_list
            .contains_key(project.name());
        let containers = self.containers(project.name()).await?;
        Ok(derive_state(listed, &containers))
    }

    /// Take `start.lock`. When another invocation holds it, wait for that
    /// one to finish and report the contention instead of starting twice.
    async fn start_lock(&self, project: &Project) -> Result<FileLock> {
        let path = project.start_lock_path();
        if let Some(lock) = FileLock::try_acquire(&path)? {
            return Ok(lock);
        }
        let holder_pid = lock::holder_pid(&path);
        info!(project = project.name(), ?holder_pid, "another ddev is starting this project; waiting");
        let started = Instant::now();
        let _released = FileLock::acquire(&path, project.container_timeout(), self.ctx.cancel()).await?;
        Err(Error::LockContended {
            path,
            holder_pid,
            waited: started.elapsed(),
        })
    }

    fn primary_url(&self, project: &Project, global: &GlobalConfig) -> String {
        let tld = project.tld(global.project_tld.as_deref());
        let ports = RouterPorts::resolve(&project.config, global);
        project.primary_url(tld, ports.https)
    }

    /// Render the compose document and write its inspection copy.
    fn render(
        &self,
        project: &Project,
        host: &HostProfile,
        global: &GlobalConfig,
    ) -> Result<(ComposeProject, bool)> {
        let rctx = RenderContext::new(host, global, project);
        let doc = render::render_with_overlays(project, &rctx)?;
        match render::write_full(project, &doc) {
            Ok(_) => {}
            Err(Error::ConfigFileSignature { path }) => {
                warn!("not updating {}: it has no #ddev-generated signature", path.display())
            }
            Err(e) => return Err(e),
        }
        Ok((doc, rctx.binds_code()))
    }

    /// Bring the project up and wait until every container is healthy.
    ///
    /// Containers that fail to become healthy are left in place so their
    /// logs can be inspected.
    pub async fn start(&self, project: &Project) -> Result<StartOutcome> {
        project.config.validate(&project.approot)?;
        let host = self.ctx.host().await?;
        let global = self.ctx.state().load()?;
        let mode = host
            .effective_performance_mode(project.config.performance_mode, global.performance_mode);
        host.check_performance_mode(mode)?;
        let url = self.primary_url(project, &global);
        let cancel = self.ctx.cancel();

        let _lock = self.start_lock(project).await?;
        if self.status(project).await? == ProjectState::Running {
            info!(project = project.name(), "already running");
            return Ok(StartOutcome::AlreadyRunning { url });
        }

        info!(project = project.name(), "starting");
        self.hooks(project, &global).run("pre-start").await?;

        ensure_network(self.ctx.engine(), SHARED_NETWORK, &platform_labels(), cancel).await?;
        let use_agent = !ssh_agent::is_omitted(project, &global);
        ensure_volume(self.ctx.engine(), GLOBAL_CACHE_VOLUME, &platform_labels(), cancel).await?;
        if use_agent {
            ensure_volume(self.ctx.engine(), SSH_AGENT_VOLUME, &platform_labels(), cancel).await?;
        }

        let (doc, binds_code) = self.render(project, host, &global)?;

        let router = Router::new(self.ctx, host);
        router.check_ports(project, &doc).await?;
        let previous = global.project_list.get(project.name()).cloned();
        self.ctx
            .state()
            .reserve_ports(project, &host_ports(project), &host.docker_ip)
            .await?;

        let timeout = project.container_timeout();
        let brought_up = async {
            pull_images(self.ctx.compose(), self.ctx.engine(), &doc.images(), false, cancel).await?;
            let up = ComposeRequest::new(project.compose_project_name(), Some(doc.clone()), &["up", "-d"])
                .with_timeout(timeout)
                .with_progress(!self.ctx.flags().noninteractive);
            self.ctx.compose().run(&up, cancel).await
        }
        .await;
        if let Err(e) = brought_up {
            debug!(project = project.name(), "start failed before containers came up; releasing ports");
            self.ctx.state().restore_entry(project.name(), previous)?;
            return Err(e);
        }

        wait_healthy_all(self.ctx.engine(), &project_filters(project.name()), timeout, cancel).await?;
        debug!(project = project.name(), "all containers healthy");
        if use_agent {
            ssh_agent::ensure_running(self.ctx).await?;
        }

        self.inject_settings(project, &url, binds_code).await?;
        router.register(project, &doc).await?;
        self.ctx.state().record(project)?;

        self.hooks(project, &global).run("post-start").await?;
        info!(project = project.name(), %url, "started");
        Ok(StartOutcome::Started { url })
    }

    /// Write CMS settings files the project does not manage itself.
    ///
    /// Marker-less targets are skipped with a warning. When code is not
    /// bind-mounted the files are also copied into the web container.
    async fn inject_settings(&self, project: &Project, url: &str, binds_code: bool) -> Result<()> {
        if project.config.disable_settings_management {
            return Ok(());
        }
        let web = project.container_name("web");
        for file in self.ctx.settings().render(project, url) {
            let path = project.approot.join(&file.path);
            match markers::write_generated(&path, &file.contents) {
                Ok(written) => debug!(path = %path.display(), written, "settings file"),
                Err(Error::ConfigFileSignature { path }) => {
                    warn!(
                        "{} lacks the #ddev-generated signature; not managing it",
                        path.display()
                    );
                    continue;
                }
                Err(e) => return Err(e),
            }
            if binds_code {
                continue;
            }
            let dst = match file.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                Some(parent) => format!("{}/{}", CODE_DIR, parent.to_string_lossy()),
                None => CODE_DIR.to_string(),
            };
            self.ctx
                .engine()
                .copy_into(&web, &path, &dst, None, self.ctx.cancel())
                .await?;
        }
        Ok(())
    }

    /// Stop and remove the project's containers, keeping its volumes unless
    /// `remove_data` is set.
    pub async fn stop(&self, project: &Project, opts: StopOptions) -> Result<()> {
        let global = self.ctx.state().load()?;
        let cancel = self.ctx.cancel();
        let containers = self.containers(project.name()).await?;
        let hooks = self.hooks(project, &global);

        if !containers.is_empty() {
            info!(project = project.name(), "stopping");
            hooks.run("pre-stop").await?;
            let timeout = project.container_timeout();
            for action in [["stop"].as_slice(), ["down"].as_slice()] {
                let req = ComposeRequest::new(project.compose_project_name(), None, action)
                    .with_timeout(timeout);
                self.ctx.compose().run(&req, cancel).await?;
            }
        }

        let host = self.ctx.host().await?;
        let router = Router::new(self.ctx, host);
        if !router::is_disabled(Some(project), &global, host) {
            router.deregister(project).await?;
        }

        if opts.remove_data {
            self.remove_volumes(project, host, &global).await?;
        }
        if opts.remove_data || opts.unlist {
            self.ctx.state().remove_project(project.name())?;
        }
        if !containers.is_empty() {
            hooks.run("post-stop").await?;
        }
        router.remove_if_idle().await?;
        Ok(())
    }

    async fn remove_volumes(
        &self,
        project: &Project,
        host: &HostProfile,
        global: &GlobalConfig,
    ) -> Result<()> {
        let cancel = self.ctx.cancel();
        let mode = host
            .effective_performance_mode(project.config.performance_mode, global.performance_mode);
        let mut volumes: BTreeSet<String> = project
            .volume_names(mode, &global.omit_containers)
            .into_iter()
            .collect();
        let rctx = RenderContext::new(host, global, project);
        if let Ok(doc) = render::render_with_overlays(project, &rctx) {
            volumes.extend(doc.owned_volume_names());
        }
        volumes.extend(
            self.ctx
                .engine()
                .list_volumes(&[LabelFilter::eq(SITE_NAME_LABEL, project.name())], cancel)
                .await?,
        );
        for volume in &volumes {
            debug!(project = project.name(), volume, "removing volume");
            self.ctx.engine().remove_volume(volume, cancel).await?;
        }
        Ok(())
    }

    /// Stop containers without removing them.
    pub async fn pause(&self, project: &Project) -> Result<()> {
        let global = self.ctx.state().load()?;
        let hooks = self.hooks(project, &global);
        hooks.run("pre-pause").await?;
        let req = ComposeRequest::new(project.compose_project_name(), None, &["stop"])
            .with_timeout(project.container_timeout());
        self.ctx.compose().run(&req, self.ctx.cancel()).await?;
        hooks.run("post-pause").await?;
        let host = self.ctx.host().await?;
        Router::new(self.ctx, host).remove_if_idle().await?;
        info!(project = project.name(), "paused");
        Ok(())
    }

    pub async fn restart(&self, project: &Project) -> Result<StartOutcome> {
        let global = self.ctx.state().load()?;
        let hooks = self.hooks(project, &global);
        hooks.run("pre-restart").await?;
        self.stop(project, StopOptions::default()).await?;
        let outcome = self.start(project).await?;
        hooks.run("post-restart").await?;
        Ok(outcome)
    }

    /// Stop every project the engine knows about, then remove the router
    /// and leftover helpers.
    pub async fn poweroff(&self) -> Result<()> {
        let cancel = self.ctx.cancel();
        let labelled = self
            .ctx
            .engine()
            .find_containers(&[LabelFilter::has(SITE_NAME_LABEL)], true, cancel)
            .await?;
        let names: BTreeSet<String> = labelled
            .iter()
            .filter_map(|c| c.label(SITE_NAME_LABEL))
            .filter(|n| !n.is_empty())
            .map(String::from)
            .collect();
        let known: BTreeMap<String, PathBuf> = self.ctx.state().projects()?.into_iter().collect();

        for name in &names {
            let loaded = known.get(name).and_then(|root| Project::load_unvalidated(root).ok());
            match loaded {
                Some(project) => self.stop(&project, StopOptions::default()).await?,
                None => {
                    info!(project = %name, "removing containers of unknown project");
                    let req = ComposeRequest::new(format!("ddev-{}", name), None, &["down"]);
                    self.ctx.compose().run(&req, cancel).await?;
                }
            }
        }

        let host = self.ctx.host().await?;
        Router::new(self.ctx, host).remove().await?;
        ssh_agent::remove(self.ctx).await?;
        for leftover in self
            .ctx
            .engine()
            .find_containers(&[LabelFilter::has(SITE_NAME_LABEL)], true, cancel)
            .await?
        {
            debug!(container = %leftover.name, "removing leftover container");
            self.ctx.engine().remove_container(&leftover.id, cancel).await?;
        }
        Ok(())
    }

    /// Remove containers, volumes, router files and the registry entry.
    /// The project's own files stay.
    pub async fn delete(&self, project: &Project) -> Result<()> {
        let global = self.ctx.state().load()?;
        let hooks = self.hooks(project, &global);
        hooks.run("pre-delete").await?;
        self.stop(
            project,
            StopOptions {
                remove_data: true,
                unlist: true,
            },
        )
        .await?;

        let staging = router::staging_dir(project);
        let mut staged = vec![staging
            .join("config")
            .join(router::config::entry_file_name(project.name()))];
        for cert in router::config::cert_file_names(project.name()) {
            staged.push(staging.join("certs").join(cert));
        }
        for path in staged {
            markers::remove_generated(&path)?;
        }
        markers::remove_generated(&project.ddev_dir().join(render::FULL_COMPOSE_FILE))?;

        hooks.run("post-delete").await?;
        info!(project = project.name(), "deleted");
        Ok(())
    }

    async fn running_container(&self, project: &Project, service: &str) -> Result<ContainerInfo> {
        let name = project.container_name(service);
        let not_running = |state: &str| Error::NotRunning {
            project: project.name().to_string(),
            service: service.to_string(),
            state: state.to_string(),
        };
        match self.ctx.engine().inspect_container(&name, self.ctx.cancel()).await {
            Ok(c) if c.state.running => Ok(c),
            Ok(c) => Err(not_running(&c.state.status)),
            Err(DockerError::ContainerNotFound { .. }) => Err(not_running("absent")),
            Err(e) => Err(e.into()),
        }
    }

    /// Run a command in a service container with the caller's stdio attached;
    /// returns its exit code.
    pub async fn exec(&self, project: &Project, req: ExecRequest) -> Result<i32> {
        let container = self.running_container(project, &req.service).await?;
        let (uid, _) = crate::host::container_ids();
        let cmd = if req.cmd.is_empty() {
            vec!["bash".to_string()]
        } else {
            req.cmd
        };
        let spec = ExecSpec {
            cmd,
            user: Some(req.user.unwrap_or(uid)),
            workdir: req
                .workdir
                .or_else(|| (req.service == "web").then(|| CODE_DIR.to_string())),
            env: Vec::new(),
            attach: true,
        };
        let output = self
            .ctx
            .engine()
            .exec(&container.name, &spec, self.ctx.cancel())
            .await?;
        Ok(output.exit_code)
    }

    /// Stream a service container's logs.
    pub async fn logs(&self, project: &Project, service: &str, options: &LogOptions) -> Result<()> {
        let name = project.container_name(service);
        match self.ctx.engine().logs(&name, options, self.ctx.cancel()).await {
            Ok(()) => Ok(()),
            Err(DockerError::ContainerNotFound { .. }) => Err(Error::NotRunning {
                project: project.name().to_string(),
                service: service.to_string(),
                state: "absent".to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn describe(&self, project: &Project) -> Result<Description> {
        let host = self.ctx.host().await?;
        let global = self.ctx.state().load()?;
        let tld = project.tld(global.project_tld.as_deref());
        let ports = RouterPorts::resolve(&project.config, &global);
        let containers = self.containers(project.name()).await?;
        let listed = global.project_list.contains_key(project.name());

        let urls = project
            .hostnames(tld)
            .iter()
            .flat_map(|h| {
                let https = if ports.https == 443 {
                    format!("https://{}", h)
                } else {
                    format!("https://{}:{}", h, ports.https)
                };
                let http = if ports.http == 80 {
                    format!("http://{}", h)
                } else {
                    format!("http://{}:{}", h, ports.http)
                };
                [https, http]
            })
            .collect();

        let mut services: Vec<ServiceStatus> = containers
            .iter()
            .map(|c| ServiceStatus {
                service: c.service().unwrap_or(&c.name).to_string(),
                container: c.name.clone(),
                status: container_health(c).0.to_string(),
                ports: c
                    .ports
                    .iter()
                    .filter(|p| p.host_port != 0)
                    .map(|p| format!("{}:{}->{}", p.host_ip, p.host_port, p.container_port))
                    .collect(),
            })
            .collect();
        services.sort_by(|a, b| a.service.cmp(&b.service));

        Ok(Description {
            name: project.name().to_string(),
            approot: project.approot.clone(),
            state: derive_state(listed, &containers),
            project_type: project.config.project_type.to_string(),
            php_version: project.config.php_version.clone(),
            webserver_type: project.config.webserver_type.as_str().to_string(),
            docroot: project.config.docroot.clone(),
            database: format!(
                "{}:{}",
                project.config.database.kind, project.config.database.version
            ),
            performance_mode: host
                .effective_performance_mode(project.config.performance_mode, global.performance_mode),
            primary_url: project.primary_url(tld, ports.https),
            urls,
            mailpit_url: project
                .config
                .mailpit_enabled
                .then(|| format!("https://{}.{}:{}", project.name(), tld, ports.mailpit_https)),
            services,
            router: Router::new(self.ctx, host).status(Some(project)).await?,
        })
    }

    /// Every registered project plus projects that only exist as containers.
    pub async fn list(&self) -> Result<Vec<ListEntry>> {
        let global = self.ctx.state().load()?;
        let labelled = self
            .ctx
            .engine()
            .find_containers(&[LabelFilter::has(SITE_NAME_LABEL)], true, self.ctx.cancel())
            .await?;
        let mut by_project: BTreeMap<String, Vec<ContainerInfo>> = BTreeMap::new();
        for c in labelled {
            let Some(name) = c.label(SITE_NAME_LABEL).filter(|n| !n.is_empty()) else {
                continue;
            };
            if c.label(crate::docker::COMPOSE_ONEOFF_LABEL) == Some("True") {
                continue;
            }
            by_project.entry(name.to_string()).or_default().push(c);
        }

        let mut names: BTreeSet<String> = global.project_list.keys().cloned().collect();
        names.extend(by_project.keys().cloned());

        let mut entries = Vec::new();
        for name in names {
            let containers = by_project.remove(&name).unwrap_or_default();
            let approot = global.project_list.get(&name).map(|e| e.approot.clone());
            let configured = approot
                .as_ref()
                .is_some_and(|root| root.join(CONFIG_DIR).join(CONFIG_FILE).is_file());
            let state = if !configured && containers.is_empty() {
                ProjectState::Absent
            } else {
                derive_state(global.project_list.contains_key(&name), &containers)
            };
            let url = approot
                .as_ref()
                .and_then(|root| Project::load_unvalidated(root).ok())
                .map(|p| self.primary_url(&p, &global));
            entries.push(ListEntry {
                name,
                state,
                approot,
                url,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{ContainerState, HealthState};

    fn container(status: &str, running: bool, health: Option<&str>) -> ContainerInfo {
        ContainerInfo {
            name: "ddev-a-web".into(),
            state: ContainerState {
                status: status.into(),
                running,
                health: health.map(|h| HealthState {
                    status: h.into(),
                    last_output: String::new(),
                }),
            },
            ..Default::default()
        }
    }

    #[test]
    fn state_without_containers_depends_on_registry() {
        assert_eq!(derive_state(false, &[]), ProjectState::Configured);
        assert_eq!(derive_state(true, &[]), ProjectState::Stopped);
    }

    #[test]
    fn state_from_health() {
        let healthy = container("running", true, Some("healthy"));
        let starting = container("running", true, Some("starting"));
        let exited = container("exited", false, Some("healthy"));
        let no_check = container("running", true, None);

        assert_eq!(derive_state(true, &[healthy.clone(), no_check]), ProjectState::Running);
        assert_eq!(derive_state(true, &[healthy.clone(), starting]), ProjectState::Starting);
        assert_eq!(derive_state(true, &[healthy, exited.clone()]), ProjectState::Unhealthy);
        assert_eq!(derive_state(true, &[exited.clone(), exited]), ProjectState::Paused);
    }

    #[test]
    fn configure_options_only_touch_given_fields() {
        let mut cfg = ProjectConfig::new("a", ProjectType::Php);
        cfg.php_version = "8.1".into();
        ConfigureOptions {
            docroot: Some("public".into()),
            router_https_port: Some(8443),
            default_container_timeout: Some(240),
            ..Default::default()
        }
        .apply(&mut cfg);
        assert_eq!(cfg.php_version, "8.1");
        assert_eq!(cfg.docroot, "public");
        assert_eq!(cfg.router_https_port, Some(8443));
        assert_eq!(cfg.default_container_timeout.as_deref(), Some("240"));
    }

    #[test]
    fn only_configured_host_ports_are_reserved() {
        let mut cfg = ProjectConfig::new("a", ProjectType::Php);
        cfg.host_db_port = Some(33061);
        cfg.host_https_port = Some(8443);
        assert_eq!(host_ports(&Project::new("/srv/a", cfg)), vec![33061, 8443]);
    }
}
