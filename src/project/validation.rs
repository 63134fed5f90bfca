use super::types::{DatabaseKind, HookAction, ProjectConfig, WebserverType, HOOK_PHASES};
use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

pub const PHP_VERSIONS: &[&str] = &[
    "5.6", "7.0", "7.1", "7.2", "7.3", "7.4", "8.0", "8.1", "8.2", "8.3", "8.4",
];

pub const MARIADB_VERSIONS: &[&str] = &[
    "5.5", "10.0", "10.1", "10.2", "10.3", "10.4", "10.5", "10.6", "10.7", "10.8", "10.11", "11.4",
    "11.8",
];

pub const MYSQL_VERSIONS: &[&str] = &["5.5", "5.6", "5.7", "8.0", "8.4"];

pub const POSTGRES_VERSIONS: &[&str] = &[
    "9", "10", "11", "12", "13", "14", "15", "16", "17",
];

pub const NODEJS_VERSIONS: &[&str] = &["16", "18", "20", "22", "23", "24", "auto"];

/// Services that may be listed in `omit_containers`.
pub const OMITTABLE_CONTAINERS: &[&str] = &["db", "ddev-router", "ddev-ssh-agent"];

pub const MAX_NAME_LEN: usize = 63;

fn name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9-]*$").expect("static regex"))
}

fn hostname_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?$").expect("static regex")
    })
}

pub fn database_versions(kind: DatabaseKind) -> &'static [&'static str] {
    match kind {
        DatabaseKind::Mariadb => MARIADB_VERSIONS,
        DatabaseKind::Mysql => MYSQL_VERSIONS,
        DatabaseKind::Postgres => POSTGRES_VERSIONS,
    }
}

/// Check a project name: 1 to 63 characters of `[a-z0-9-]`, not starting with `-`.
pub fn validate_project_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::validation(format!(
            "project name '{}' must be between 1 and {} characters",
            name, MAX_NAME_LEN
        )));
    }
    if !name_regex().is_match(name) {
        return Err(Error::validation(format!(
            "project name '{}' may only contain lowercase letters, digits and hyphens, and must start with a letter or digit",
            name
        )));
    }
    Ok(())
}

/// Check a DNS name. A leading `*.` wildcard label is allowed.
pub fn validate_hostname(hostname: &str) -> Result<()> {
    let name = hostname.strip_prefix("*.").unwrap_or(hostname);
    let valid = !name.is_empty()
        && name.len() <= 253
        && name
            .split('.')
            .all(|label| label.len() <= 63 && hostname_label_regex().is_match(label));
    if !valid {
        return Err(Error::validation(format!(
            "'{}' is not a valid hostname",
            hostname
        )));
    }
    Ok(())
}

/// Compare dotted versions numerically ("8.10" > "8.9").
fn version_key(v: &str) -> Vec<u32> {
    v.split('.').map(|p| p.parse().unwrap_or(0)).collect()
}

/// Lexically resolve `rel` under `root`, refusing anything that climbs out.
pub(crate) fn resolve_inside(root: &Path, rel: &str) -> Option<PathBuf> {
    let rel = Path::new(rel);
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

impl ProjectConfig {
    /// Validate the document against the rules a project must satisfy
    /// before any container is touched.
    pub fn validate(&self, approot: &Path) -> Result<()> {
        validate_project_name(&self.name)?;
        self.validate_docroot(approot)?;
        self.validate_php()?;
        self.validate_database()?;
        self.validate_webserver()?;
        self.validate_nodejs()?;
        self.validate_hostnames()?;
        self.validate_ports()?;
        self.validate_omit_containers()?;
        self.validate_hooks()?;
        self.validate_misc()?;
        Ok(())
    }

    fn validate_docroot(&self, approot: &Path) -> Result<()> {
        let Some(resolved) = resolve_inside(approot, &self.docroot) else {
            return Err(Error::validation(format!(
                "docroot '{}' must be a relative path inside the project root",
                self.docroot
            )));
        };

        // A symlinked docroot must still land inside the project.
        if let (Ok(real_root), Ok(real_docroot)) =
            (approot.canonicalize(), resolved.canonicalize())
        {
            if !real_docroot.starts_with(&real_root) {
                return Err(Error::validation(format!(
                    "docroot '{}' resolves to {} which is outside the project root",
                    self.docroot,
                    real_docroot.display()
                )));
            }
        }
        Ok(())
    }

    fn validate_php(&self) -> Result<()> {
        if self.project_type.is_python() {
            return Ok(());
        }
        if !PHP_VERSIONS.contains(&self.php_version.as_str()) {
            return Err(Error::validation(format!(
                "unsupported php_version '{}'; supported versions: {}",
                self.php_version,
                PHP_VERSIONS.join(", ")
            )));
        }
        let min = self.project_type.min_php_version();
        if version_key(&self.php_version) < version_key(min) {
            return Err(Error::validation(format!(
                "project type '{}' requires php_version {} or newer (got {})",
                self.project_type, min, self.php_version
            )));
        }
        Ok(())
    }

    fn validate_database(&self) -> Result<()> {
        let allowed = database_versions(self.database.kind);
        if !allowed.contains(&self.database.version.as_str()) {
            return Err(Error::validation(format!(
                "database version '{}' is not supported for {}; supported versions: {}",
                self.database.version,
                self.database.kind,
                allowed.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_webserver(&self) -> Result<()> {
        if self.webserver_type == WebserverType::NginxGunicorn && !self.project_type.is_python() {
            return Err(Error::validation(format!(
                "webserver_type nginx-gunicorn is only supported for python and django4 projects, not '{}'",
                self.project_type
            )));
        }
        Ok(())
    }

    fn validate_nodejs(&self) -> Result<()> {
        let Some(version) = &self.nodejs_version else {
            return Ok(());
        };
        // Full versions ("20.11.1") are accepted when their major is supported.
        let major = version.split('.').next().unwrap_or_default();
        if !NODEJS_VERSIONS.contains(&version.as_str()) && !NODEJS_VERSIONS.contains(&major) {
            return Err(Error::validation(format!(
                "unsupported nodejs_version '{}'; supported versions: {}",
                version,
                NODEJS_VERSIONS.join(", ")
            )));
        }
        Ok(())
    }

    fn validate_hostnames(&self) -> Result<()> {
        for name in &self.additional_hostnames {
            validate_hostname(name)?;
        }
        for fqdn in &self.additional_fqdns {
            validate_hostname(fqdn)?;
        }
        if let Some(tld) = &self.project_tld {
            validate_hostname(tld)?;
        }
        Ok(())
    }

    fn validate_ports(&self) -> Result<()> {
        let named = [
            ("router_http_port", self.router_http_port),
            ("router_https_port", self.router_https_port),
            ("mailpit_http_port", self.mailpit_http_port),
            ("mailpit_https_port", self.mailpit_https_port),
            ("host_db_port", self.host_db_port),
            ("host_webserver_port", self.host_webserver_port),
            ("host_https_port", self.host_https_port),
            ("host_mailpit_port", self.host_mailpit_port),
        ];
        for (key, port) in named {
            if let Some(port) = port {
                if !(1..=65535).contains(&port) {
                    return Err(Error::validation(format!(
                        "{} {} is out of range (1-65535)",
                        key, port
                    )));
                }
            }
        }

        let mut seen: HashSet<u32> = HashSet::new();
        for (key, port) in named {
            if let Some(port) = port {
                if !seen.insert(port) {
                    return Err(Error::validation(format!(
                        "{} {} is already used by another port setting of this project",
                        key, port
                    )));
                }
            }
        }
        Ok(())
    }

    fn validate_omit_containers(&self) -> Result<()> {
        for name in &self.omit_containers {
            if !OMITTABLE_CONTAINERS.contains(&name.as_str()) {
                return Err(Error::validation(format!(
                    "omit_containers may only contain {}; '{}' is not allowed",
                    OMITTABLE_CONTAINERS.join(", "),
                    name
                )));
            }
        }
        Ok(())
    }

    fn validate_hooks(&self) -> Result<()> {
        for (phase, tasks) in &self.hooks {
            if !HOOK_PHASES.contains(&phase.as_str()) {
                return Err(Error::validation(format!(
                    "unknown hook phase '{}'; valid phases: {}",
                    phase,
                    HOOK_PHASES.join(", ")
                )));
            }
            for (i, task) in tasks.iter().enumerate() {
                match task.action() {
                    None => {
                        return Err(Error::validation(format!(
                            "{} hook #{} must have exactly one of exec, exec-host or composer",
                            phase,
                            i + 1
                        )))
                    }
                    Some(HookAction::ExecHost(_)) => {}
                    Some(_) if phase == "pre-start" => {
                        return Err(Error::validation(format!(
                            "pre-start hook #{} runs before containers exist; only exec-host is allowed",
                            i + 1
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    fn validate_misc(&self) -> Result<()> {
        if let Some(timeout) = &self.default_container_timeout {
            match timeout.parse::<u64>() {
                Ok(secs) if secs > 0 => {}
                _ => {
                    return Err(Error::validation(format!(
                        "default_container_timeout '{}' must be a positive number of seconds",
                        timeout
                    )))
                }
            }
        }
        for entry in &self.web_environment {
            match entry.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => {
                    return Err(Error::validation(format!(
                        "web_environment entry '{}' must have the form KEY=VALUE",
                        entry
                    )))
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::types::{HookTask, ProjectType};
    use tempfile::TempDir;

    fn config(name: &str) -> ProjectConfig {
        ProjectConfig::new(name, ProjectType::Php)
    }

    #[test]
    fn name_length_boundaries() {
        assert!(validate_project_name("a").is_ok());
        assert!(validate_project_name(&"a".repeat(63)).is_ok());
        assert!(validate_project_name("").is_err());
        assert!(validate_project_name(&"a".repeat(64)).is_err());
        assert!(validate_project_name("-a").is_err());
        assert!(validate_project_name("My_Site").is_err());
    }

    #[test]
    fn hostnames() {
        assert!(validate_hostname("example.com").is_ok());
        assert!(validate_hostname("*.shop").is_ok());
        assert!(validate_hostname("bad_name").is_err());
        assert!(validate_hostname("-lead.example").is_err());
        assert!(validate_hostname("double..dot").is_err());
    }

    #[test]
    fn docroot_must_stay_inside() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("a");
        cfg.docroot = "web".into();
        assert!(cfg.validate(dir.path()).is_ok());
        cfg.docroot = "web/../public".into();
        assert!(cfg.validate(dir.path()).is_ok());
        cfg.docroot = "../elsewhere".into();
        assert!(matches!(cfg.validate(dir.path()), Err(Error::Validation(_))));
        cfg.docroot = "/var/www".into();
        assert!(cfg.validate(dir.path()).is_err());
    }

    #[test]
    fn php_version_constrained_by_type() {
        let dir = TempDir::new().unwrap();
        let mut cfg = ProjectConfig::new("d", ProjectType::Drupal11);
        cfg.php_version = "8.1".into();
        let err = cfg.validate(dir.path()).unwrap_err();
        assert!(err.to_string().contains("requires php_version 8.3"));
        cfg.php_version = "8.3".into();
        assert!(cfg.validate(dir.path()).is_ok());
        cfg.php_version = "9.0".into();
        assert!(cfg.validate(dir.path()).is_err());
    }

    #[test]
    fn database_version_must_match_kind() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("a");
        cfg.database.kind = DatabaseKind::Postgres;
        cfg.database.version = "10.11".into();
        assert!(cfg.validate(dir.path()).is_err());
        cfg.database.version = "16".into();
        assert!(cfg.validate(dir.path()).is_ok());
    }

    #[test]
    fn ports_range_and_uniqueness() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("a");
        cfg.host_db_port = Some(70000);
        assert!(cfg.validate(dir.path()).is_err());
        cfg.host_db_port = Some(0);
        assert!(cfg.validate(dir.path()).is_err());
        cfg.host_db_port = Some(33060);
        cfg.host_webserver_port = Some(33060);
        assert!(cfg.validate(dir.path()).is_err());
        cfg.host_webserver_port = Some(8080);
        assert!(cfg.validate(dir.path()).is_ok());
    }

    #[test]
    fn gunicorn_only_for_python() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("a");
        cfg.webserver_type = WebserverType::NginxGunicorn;
        assert!(cfg.validate(dir.path()).is_err());
        cfg.project_type = ProjectType::Django4;
        assert!(cfg.validate(dir.path()).is_ok());
    }

    #[test]
    fn omit_containers_subset() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("a");
        cfg.omit_containers = vec!["db".into(), "ddev-ssh-agent".into()];
        assert!(cfg.validate(dir.path()).is_ok());
        cfg.omit_containers.push("web".into());
        assert!(cfg.validate(dir.path()).is_err());
    }

    #[test]
    fn pre_start_hooks_run_on_the_host_only() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("a");
        cfg.hooks.insert(
            "pre-start".into(),
            vec![HookTask {
                exec: Some("drush cr".into()),
                ..Default::default()
            }],
        );
        assert!(cfg.validate(dir.path()).is_err());
        cfg.hooks.insert(
            "pre-start".into(),
            vec![HookTask {
                exec_host: Some("echo hi".into()),
                ..Default::default()
            }],
        );
        assert!(cfg.validate(dir.path()).is_ok());
        cfg.hooks.insert("before-start".into(), vec![]);
        assert!(cfg.validate(dir.path()).is_err());
    }

    #[test]
    fn timeouts_and_environment() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config("a");
        cfg.default_container_timeout = Some("soon".into());
        assert!(cfg.validate(dir.path()).is_err());
        cfg.default_container_timeout = Some("240".into());
        cfg.web_environment = vec!["=x".into()];
        assert!(cfg.validate(dir.path()).is_err());
        cfg.web_environment = vec!["APP_ENV=dev".into()];
        assert!(cfg.validate(dir.path()).is_ok());
    }

    #[test]
    fn resolve_inside_walks_lexically() {
        let root = Path::new("/srv/a");
        assert_eq!(resolve_inside(root, ""), Some(PathBuf::from("/srv/a")));
        assert_eq!(resolve_inside(root, "./web"), Some(PathBuf::from("/srv/a/web")));
        assert_eq!(resolve_inside(root, "web/.."), Some(PathBuf::from("/srv/a")));
        assert_eq!(resolve_inside(root, ".."), None);
    }
}
