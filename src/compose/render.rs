//! Rendering a project into its compose document.

use super::merge::merge_values;
use super::{ComposeProject, ServiceDef};
use crate::docker::images::{db_image, MAILPIT_IMAGE, WEB_IMAGE};
use crate::docker::{PLATFORM_LABEL, SITE_NAME_LABEL};
use crate::error::{Error, Result};
use crate::global::{GlobalConfig, RouterPorts};
use crate::host::HostProfile;
use crate::markers::{self, GENERATED_MARKER};
use crate::project::{DatabaseKind, PerformanceMode, Project};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Shared network every project and the router join.
pub const SHARED_NETWORK: &str = "ddev_default";
pub const GLOBAL_CACHE_VOLUME: &str = "ddev-global-cache";
pub const SSH_AGENT_VOLUME: &str = "ddev-ssh-agent-socket";
pub const FULL_COMPOSE_FILE: &str = ".ddev-docker-compose-full.yaml";
pub const APPROOT_LABEL: &str = "com.ddev.approot";

const CODE_DIR: &str = "/var/www/html";

/// Everything besides the project that shapes its compose document.
#[derive(Debug, Clone)]
pub struct RenderContext<'a> {
    pub host: &'a HostProfile,
    pub global: &'a GlobalConfig,
    pub performance_mode: PerformanceMode,
    pub router_ports: RouterPorts,
    pub uid: String,
    pub gid: String,
    /// Web containers mount the shared ssh-agent socket.
    pub ssh_agent: bool,
}

impl<'a> RenderContext<'a> {
    pub fn new(host: &'a HostProfile, global: &'a GlobalConfig, project: &Project) -> Self {
        let performance_mode =
            host.effective_performance_mode(project.config.performance_mode, global.performance_mode);
        let (uid, gid) = crate::host::container_ids();
        Self {
            host,
            global,
            performance_mode,
            router_ports: RouterPorts::resolve(&project.config, global),
            uid,
            gid,
            ssh_agent: !crate::ssh_agent::is_omitted(project, global),
        }
    }

    /// Code is bind-mounted from the host only in plain `none` mode.
    pub fn binds_code(&self) -> bool {
        self.performance_mode == PerformanceMode::None && !self.global.no_bind_mounts
    }
}

fn s(v: impl Into<String>) -> Value {
    Value::String(v.into())
}

fn mapping<const N: usize>(pairs: [(&str, Value); N]) -> Value {
    let mut m = Mapping::new();
    for (k, v) in pairs {
        m.insert(s(k), v);
    }
    Value::Mapping(m)
}

fn seq<I: IntoIterator<Item = Value>>(items: I) -> Value {
    Value::Sequence(items.into_iter().collect())
}

fn owner_labels(project: &Project) -> BTreeMap<String, String> {
    BTreeMap::from([
        (SITE_NAME_LABEL.to_string(), project.name().to_string()),
        (PLATFORM_LABEL.to_string(), "ddev".to_string()),
    ])
}

fn labels_value(labels: &BTreeMap<String, String>) -> Value {
    let mut m = Mapping::new();
    for (k, v) in labels {
        m.insert(s(k.as_str()), s(v.as_str()));
    }
    Value::Mapping(m)
}

/// `127.0.0.1:<host>:<container>`; an unset host port lets the engine pick one.
fn publish(host_port: Option<u32>, container_port: u16) -> Value {
    match host_port {
        Some(p) => s(format!("127.0.0.1:{}:{}", p, container_port)),
        None => s(format!("127.0.0.1::{}", container_port)),
    }
}

fn service_networks() -> Option<Value> {
    Some(seq([s(SHARED_NETWORK), s("default")]))
}

fn healthcheck(test: Value, timeout: u64) -> Option<Value> {
    Some(mapping([
        ("test", test),
        ("interval", s("1s")),
        ("retries", Value::Number(timeout.into())),
        ("start_period", s(format!("{}s", timeout))),
        ("timeout", s(format!("{}s", timeout))),
    ]))
}

fn web_service(project: &Project, ctx: &RenderContext<'_>) -> ServiceDef {
    let cfg = &project.config;
    let tld = project.tld(ctx.global.project_tld.as_deref());
    let hostnames = project.hostnames(tld);
    let timeout = project.container_timeout().as_secs();

    let mut env = BTreeMap::from([
        ("DDEV_PROJECT".to_string(), project.name().to_string()),
        ("DDEV_PROJECT_TYPE".to_string(), cfg.project_type.as_str().to_string()),
        ("DDEV_DOCROOT".to_string(), cfg.docroot.clone()),
        ("DDEV_PHP_VERSION".to_string(), cfg.php_version.clone()),
        ("DDEV_WEBSERVER_TYPE".to_string(), cfg.webserver_type.as_str().to_string()),
        (
            "DDEV_DATABASE".to_string(),
            format!("{}:{}", cfg.database.kind, cfg.database.version),
        ),
        ("DDEV_HOSTNAME".to_string(), hostnames.join(",")),
        ("VIRTUAL_HOST".to_string(), hostnames.join(",")),
        (
            "DDEV_PRIMARY_URL".to_string(),
            project.primary_url(tld, ctx.router_ports.https),
        ),
        ("DDEV_TLD".to_string(), tld.to_string()),
        ("DDEV_ROUTER_HTTP_PORT".to_string(), ctx.router_ports.http.to_string()),
        ("DDEV_ROUTER_HTTPS_PORT".to_string(), ctx.router_ports.https.to_string()),
        ("DDEV_PERFORMANCE_MODE".to_string(), ctx.performance_mode.to_string()),
        ("DDEV_XDEBUG_ENABLED".to_string(), cfg.xdebug_enabled.to_string()),
        ("DDEV_UID".to_string(), ctx.uid.clone()),
        ("DDEV_GID".to_string(), ctx.gid.clone()),
        ("HTTP_EXPOSE".to_string(), format!("{}:80", ctx.router_ports.http)),
        ("HTTPS_EXPOSE".to_string(), format!("{}:80", ctx.router_ports.https)),
        (
            "DDEV_WEB_ENTRYPOINT".to_string(),
            format!("{}/.ddev/web-entrypoint.d", CODE_DIR),
        ),
    ]);
    if let Some(ip) = &ctx.host.host_docker_internal.ip {
        env.insert("HOST_DOCKER_INTERNAL_IP".into(), ip.clone());
    }
    if let Some(node) = &cfg.nodejs_version {
        env.insert("DDEV_NODEJS_VERSION".into(), node.clone());
    }
    for kv in &cfg.web_environment {
        if let Some((k, v)) = kv.split_once('=') {
            env.insert(k.to_string(), v.to_string());
        }
    }

    let mut volumes = vec![s(format!("{}:/mnt/ddev-global-cache", GLOBAL_CACHE_VOLUME))];
    if ctx.ssh_agent {
        volumes.push(s(format!("{}:{}", SSH_AGENT_VOLUME, crate::ssh_agent::SOCKET_DIR)));
        env.insert(
            "SSH_AUTH_SOCK".into(),
            format!("{}/socket", crate::ssh_agent::SOCKET_DIR),
        );
    }
    match ctx.performance_mode {
        PerformanceMode::Nfs => volumes.insert(0, s(format!("nfsmount:{}", CODE_DIR))),
        _ if ctx.binds_code() => {
            volumes.insert(
                0,
                mapping([
                    ("type", s("bind")),
                    ("source", s(project.approot.to_string_lossy())),
                    ("target", s(CODE_DIR)),
                    ("consistency", s("cached")),
                ]),
            );
            volumes.push(s(format!(
                "{}:/mnt/ddev_config:ro",
                project.ddev_dir().to_string_lossy()
            )));
        }
        _ => volumes.insert(0, s(format!("project_mutagen:{}", CODE_DIR))),
    }

    let mut labels = owner_labels(project);
    labels.insert(APPROOT_LABEL.into(), project.approot.to_string_lossy().into_owned());

    let mut extra_hosts = Vec::new();
    if !ctx.host.host_docker_internal.extra_host.is_empty() {
        extra_hosts.push(format!(
            "host.docker.internal:{}",
            ctx.host.host_docker_internal.extra_host
        ));
    }

    ServiceDef {
        container_name: Some(project.container_name("web")),
        image: Some(WEB_IMAGE.to_string()),
        environment: env,
        labels,
        ports: vec![
            publish(cfg.host_webserver_port, 80),
            publish(cfg.host_https_port, 443),
        ],
        volumes,
        extra_hosts,
        working_dir: Some(CODE_DIR.to_string()),
        restart: Some("no".to_string()),
        healthcheck: healthcheck(seq([s("CMD"), s("/healthcheck.sh")]), timeout),
        networks: service_networks(),
        ..Default::default()
    }
}

fn db_service(project: &Project) -> ServiceDef {
    let cfg = &project.config;
    let timeout = project.container_timeout().as_secs();
    let (data_dir, port, env, test) = match cfg.database.kind {
        DatabaseKind::Postgres => (
            "/var/lib/postgresql/data",
            5432,
            BTreeMap::from([
                ("POSTGRES_DB".to_string(), "db".to_string()),
                ("POSTGRES_USER".to_string(), "db".to_string()),
                ("POSTGRES_PASSWORD".to_string(), "db".to_string()),
            ]),
            seq([s("CMD-SHELL"), s("pg_isready -U db -d db")]),
        ),
        _ => (
            "/var/lib/mysql",
            3306,
            BTreeMap::from([
                ("MYSQL_ROOT_PASSWORD".to_string(), "root".to_string()),
                ("MYSQL_DATABASE".to_string(), "db".to_string()),
                ("MYSQL_USER".to_string(), "db".to_string()),
                ("MYSQL_PASSWORD".to_string(), "db".to_string()),
            ]),
            seq([s("CMD"), s("/healthcheck.sh")]),
        ),
    };
    let mut env = env;
    env.insert("DDEV_PROJECT".into(), project.name().to_string());

    ServiceDef {
        container_name: Some(project.container_name("db")),
        image: Some(db_image(cfg.database.kind.as_str(), &cfg.database.version)),
        environment: env,
        labels: owner_labels(project),
        ports: vec![publish(cfg.host_db_port, port)],
        volumes: vec![s(format!("database:{}", data_dir))],
        restart: Some("no".to_string()),
        healthcheck: healthcheck(test, timeout),
        networks: service_networks(),
        ..Default::default()
    }
}

fn mailpit_service(project: &Project, ctx: &RenderContext<'_>) -> ServiceDef {
    let mut ports = Vec::new();
    if project.config.host_mailpit_port.is_some() {
        ports.push(publish(project.config.host_mailpit_port, 8025));
    }
    ServiceDef {
        container_name: Some(project.container_name("mailpit")),
        image: Some(MAILPIT_IMAGE.to_string()),
        environment: BTreeMap::from([
            ("HTTP_EXPOSE".to_string(), format!("{}:8025", ctx.router_ports.mailpit_http)),
            ("HTTPS_EXPOSE".to_string(), format!("{}:8025", ctx.router_ports.mailpit_https)),
            ("MP_SMTP_AUTH_ACCEPT_ANY".to_string(), "1".to_string()),
            ("MP_SMTP_AUTH_ALLOW_INSECURE".to_string(), "1".to_string()),
        ]),
        labels: owner_labels(project),
        ports,
        restart: Some("no".to_string()),
        healthcheck: healthcheck(seq([s("CMD"), s("/mailpit"), s("readyz")]), 60),
        networks: service_networks(),
        ..Default::default()
    }
}

/// The built-in services, networks and volumes of a project.
pub fn render(project: &Project, ctx: &RenderContext<'_>) -> ComposeProject {
    let mut doc = ComposeProject {
        name: project.compose_project_name(),
        ..Default::default()
    };
    let omits = &ctx.global.omit_containers;
    let labels = labels_value(&owner_labels(project));

    for service in project.services(omits) {
        let def = match service {
            "web" => web_service(project, ctx),
            "db" => db_service(project),
            "mailpit" => mailpit_service(project, ctx),
            _ => continue,
        };
        doc.services.insert(service.to_string(), def);
    }

    doc.networks.insert(
        SHARED_NETWORK.to_string(),
        mapping([("name", s(SHARED_NETWORK)), ("external", Value::Bool(true))]),
    );
    doc.networks.insert(
        "default".to_string(),
        mapping([
            ("name", s(format!("{}_default", project.compose_project_name()))),
            ("labels", labels.clone()),
        ]),
    );

    let externals: &[&str] = if ctx.ssh_agent {
        &[GLOBAL_CACHE_VOLUME, SSH_AGENT_VOLUME]
    } else {
        &[GLOBAL_CACHE_VOLUME]
    };
    for &external in externals {
        doc.volumes.insert(
            external.to_string(),
            mapping([("name", s(external)), ("external", Value::Bool(true))]),
        );
    }
    if doc.services.contains_key("db") {
        doc.volumes.insert(
            "database".to_string(),
            mapping([("name", s(project.db_volume_name())), ("labels", labels.clone())]),
        );
    }
    match ctx.performance_mode {
        PerformanceMode::Nfs => {
            let addr = match ctx.host.host_docker_internal.ip.as_deref() {
                Some(ip) => ip.to_string(),
                None => "host.docker.internal".to_string(),
            };
            doc.volumes.insert(
                "nfsmount".to_string(),
                mapping([
                    ("name", s(project.nfs_volume_name())),
                    ("driver", s("local")),
                    (
                        "driver_opts",
                        mapping([
                            ("type", s("nfs")),
                            ("o", s(format!("addr={},hard,nolock,rw", addr))),
                            ("device", s(format!(":{}", project.approot.to_string_lossy()))),
                        ]),
                    ),
                    ("labels", labels),
                ]),
            );
        }
        _ if ctx.binds_code() => {}
        _ => {
            doc.volumes.insert(
                "project_mutagen".to_string(),
                mapping([("name", s(project.mutagen_volume_name())), ("labels", labels)]),
            );
        }
    }
    doc
}

/// `.ddev/docker-compose.*.yaml`, lexical order with the override file last.
pub fn overlay_files(ddev_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(ddev_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| {
                    n.starts_with("docker-compose.") && (n.ends_with(".yaml") || n.ends_with(".yml"))
                })
                .unwrap_or(false)
        })
        .collect();
    files.sort_by_key(|p| {
        let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        (name.starts_with("docker-compose.override."), name)
    });
    Ok(files)
}

/// Render and merge the project's overlay files on top.
///
/// Services an overlay adds get the ownership labels, a `ddev-<project>-<svc>`
/// container name and both networks unless they set their own.
pub fn render_with_overlays(project: &Project, ctx: &RenderContext<'_>) -> Result<ComposeProject> {
    let base = render(project, ctx);
    let overlays = overlay_files(&project.ddev_dir())?;
    if overlays.is_empty() {
        return Ok(base);
    }

    let mut merged = serde_yaml::to_value(&base)?;
    for path in &overlays {
        tracing::debug!("merging compose overlay {}", path.display());
        let contents = fs::read_to_string(path)?;
        if contents.trim().is_empty() {
            continue;
        }
        let overlay: Value = serde_yaml::from_str(&contents)
            .map_err(|e| Error::validation(format!("{}: {}", path.display(), e)))?;
        merge_values(&mut merged, overlay);
    }
    let mut doc: ComposeProject = serde_yaml::from_value(merged)
        .map_err(|e| Error::validation(format!("compose overlays in {}: {}", project.ddev_dir().display(), e)))?;
    doc.name = project.compose_project_name();

    for (name, svc) in doc.services.iter_mut() {
        if base.services.contains_key(name) {
            continue;
        }
        for (k, v) in owner_labels(project) {
            svc.labels.entry(k).or_insert(v);
        }
        if svc.container_name.is_none() {
            svc.container_name = Some(project.container_name(name));
        }
        if svc.networks.is_none() {
            svc.networks = service_networks();
        }
    }
    Ok(doc)
}

/// Write the effective document to `.ddev/.ddev-docker-compose-full.yaml`.
pub fn write_full(project: &Project, doc: &ComposeProject) -> Result<PathBuf> {
    let path = project.ddev_dir().join(FULL_COMPOSE_FILE);
    let contents = format!("{}\n{}", GENERATED_MARKER, serde_yaml::to_string(doc)?);
    markers::write_generated(&path, &contents)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostDockerInternal, OsFlavor};
    use crate::project::{ProjectConfig, ProjectType};
    use tempfile::TempDir;

    fn setup(dir: &Path) -> Project {
        fs::create_dir_all(dir.join(".ddev")).unwrap();
        let mut cfg = ProjectConfig::new("shop", ProjectType::Php);
        cfg.docroot = String::new();
        cfg.host_db_port = Some(33061);
        Project::new(dir, cfg)
    }

    fn linux_host() -> HostProfile {
        HostProfile {
            os: OsFlavor::Linux,
            docker_ip: "127.0.0.1".into(),
            host_docker_internal: HostDockerInternal {
                ip: Some("172.17.0.1".into()),
                extra_host: "host-gateway".into(),
                rationale: String::new(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn base_services_and_wiring() {
        let tmp = TempDir::new().unwrap();
        let project = setup(tmp.path());
        let host = linux_host();
        let global = GlobalConfig::default();
        let ctx = RenderContext::new(&host, &global, &project);
        let doc = render(&project, &ctx);

        assert_eq!(doc.name, "ddev-shop");
        assert_eq!(doc.services.keys().collect::<Vec<_>>(), vec!["db", "mailpit", "web"]);

        let web = &doc.services["web"];
        assert_eq!(web.container_name.as_deref(), Some("ddev-shop-web"));
        assert_eq!(web.env("HTTP_EXPOSE"), Some("80:80"));
        assert_eq!(web.env("HTTPS_EXPOSE"), Some("443:80"));
        assert_eq!(web.env("DDEV_HOSTNAME"), Some("shop.ddev.site"));
        assert_eq!(web.labels[SITE_NAME_LABEL], "shop");
        assert_eq!(web.extra_hosts, vec!["host.docker.internal:host-gateway"]);

        let db = &doc.services["db"];
        assert_eq!(db.ports, vec![s("127.0.0.1:33061:3306")]);
        assert_eq!(doc.volumes["database"]["name"], s("shop-mariadb"));
        assert_eq!(doc.networks[SHARED_NETWORK]["external"], Value::Bool(true));
        assert!(doc.owned_volume_names().contains(&"shop-mariadb".to_string()));
    }

    #[test]
    fn omitted_db_and_mutagen_volume() {
        let tmp = TempDir::new().unwrap();
        let mut project = setup(tmp.path());
        project.config.omit_containers = vec!["db".into()];
        project.config.performance_mode = Some(PerformanceMode::Mutagen);
        let host = linux_host();
        let global = GlobalConfig::default();
        let ctx = RenderContext::new(&host, &global, &project);
        let doc = render(&project, &ctx);
        assert!(!doc.services.contains_key("db"));
        assert!(!doc.volumes.contains_key("database"));
        assert_eq!(doc.volumes["project_mutagen"]["name"], s("shop_project_mutagen"));
        assert_eq!(doc.services["web"].volumes[0], s("project_mutagen:/var/www/html"));
    }

    #[test]
    fn overlays_merge_and_override_goes_last() {
        let tmp = TempDir::new().unwrap();
        let project = setup(tmp.path());
        let ddev = project.ddev_dir();
        fs::write(
            ddev.join("docker-compose.override.yaml"),
            "services:\n  redis:\n    image: redis:7\n",
        )
        .unwrap();
        fs::write(
            ddev.join("docker-compose.redis.yaml"),
            "services:\n  redis:\n    image: redis:6\n  web:\n    environment:\n      EXTRA: \"1\"\n",
        )
        .unwrap();

        let files = overlay_files(&ddev).unwrap();
        assert!(files.last().unwrap().ends_with("docker-compose.override.yaml"));

        let host = linux_host();
        let global = GlobalConfig::default();
        let ctx = RenderContext::new(&host, &global, &project);
        let doc = render_with_overlays(&project, &ctx).unwrap();
        let redis = &doc.services["redis"];
        assert_eq!(redis.image.as_deref(), Some("redis:7"));
        assert_eq!(redis.container_name.as_deref(), Some("ddev-shop-redis"));
        assert_eq!(redis.labels[SITE_NAME_LABEL], "shop");
        assert_eq!(doc.services["web"].env("EXTRA"), Some("1"));
        assert_eq!(doc.services["web"].env("HTTP_EXPOSE"), Some("80:80"));
    }

    #[test]
    fn overlay_without_marker_is_untouched() {
        let tmp = TempDir::new().unwrap();
        let project = setup(tmp.path());
        let path = project.ddev_dir().join("docker-compose.mine.yaml");
        let original = "services:\n  web:\n    environment:\n      MINE: yes\n";
        fs::write(&path, original).unwrap();

        let host = linux_host();
        let global = GlobalConfig::default();
        let ctx = RenderContext::new(&host, &global, &project);
        let doc = render_with_overlays(&project, &ctx).unwrap();
        write_full(&project, &doc).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
        let full = fs::read_to_string(project.ddev_dir().join(FULL_COMPOSE_FILE)).unwrap();
        assert!(full.starts_with(GENERATED_MARKER));
    }
}
