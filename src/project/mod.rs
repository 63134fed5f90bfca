//! The per-project record backed by `<approot>/.ddev/config.yaml`.
//!
//! A [`Project`] is read from disk at the start of every operation and never
//! cached between invocations.

pub mod settings;
pub mod types;
pub mod validation;

pub use types::{
    DatabaseKind, DatabaseSpec, HookAction, HookTask, PerformanceMode, ProjectConfig, ProjectType,
    WebserverType, XhprofMode, HOOK_PHASES,
};
pub use validation::{validate_hostname, validate_project_name};

use crate::compose::merge::merge_values;
use crate::error::{Error, Result};
use crate::markers;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".ddev";
pub const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_TLD: &str = "ddev.site";
pub const DEFAULT_CONTAINER_TIMEOUT: Duration = Duration::from_secs(120);

/// Keys from older releases that are refused rather than translated.
const LEGACY_KEYS: &[&str] = &["performance_strategy"];

#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub approot: PathBuf,
    pub config: ProjectConfig,
}

impl Project {
    pub fn new(approot: impl Into<PathBuf>, config: ProjectConfig) -> Self {
        Self {
            approot: approot.into(),
            config,
        }
    }

    /// Walk up from `dir` to the first directory holding `.ddev/config.yaml`.
    pub fn find_approot(dir: &Path) -> Result<PathBuf> {
        if dir.join(CONFIG_DIR).join(CONFIG_FILE).is_file() {
            return Ok(dir.to_path_buf());
        }
        if let Some(parent) = dir.parent() {
            return Self::find_approot(parent);
        }
        Err(Error::ProjectNotFound(
            "no .ddev/config.yaml in the current directory or any parent".to_string(),
        ))
    }

    /// Load, merge overrides and validate.
    pub fn load(approot: &Path) -> Result<Self> {
        let project = Self::load_unvalidated(approot)?;
        project.config.validate(&project.approot)?;
        Ok(project)
    }

    /// Load and merge overrides without validating; used by `ddev config`
    /// to repair a broken file.
    pub fn load_unvalidated(approot: &Path) -> Result<Self> {
        if !approot.is_dir() {
            return Err(Error::ProjectNotFound(format!(
                "{} is not a directory",
                approot.display()
            )));
        }
        let ddev_dir = approot.join(CONFIG_DIR);
        let base_path = ddev_dir.join(CONFIG_FILE);
        let mut merged = read_yaml(&base_path).map_err(|e| match e {
            Error::Io(io) if io.kind() == std::io::ErrorKind::NotFound => Error::ProjectNotFound(
                format!("{} does not exist", base_path.display()),
            ),
            other => other,
        })?;
        check_legacy_keys(&merged, &base_path)?;

        for override_path in override_files(&ddev_dir)? {
            tracing::debug!("merging {}", override_path.display());
            let overlay = read_yaml(&override_path)?;
            check_legacy_keys(&overlay, &override_path)?;
            merge_values(&mut merged, overlay);
        }

        let mut config: ProjectConfig = serde_yaml::from_value(merged)
            .map_err(|e| Error::validation(format!("{}: {}", base_path.display(), e)))?;
        if config.name.is_empty() {
            config.name = name_from_dir(approot);
        }

        Ok(Self {
            approot: approot.to_path_buf(),
            config,
        })
    }

    /// Write `.ddev/config.yaml`. Override files are left as they are.
    pub fn save(&self) -> Result<()> {
        let dir = self.ddev_dir();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::Filesystem(format!("Cannot create '{}': {}", dir.display(), e)))?;
        let yaml = serde_yaml::to_string(&self.config)?;
        markers::atomic_write(&self.config_path(), yaml.as_bytes())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn ddev_dir(&self) -> PathBuf {
        self.approot.join(CONFIG_DIR)
    }

    pub fn config_path(&self) -> PathBuf {
        self.ddev_dir().join(CONFIG_FILE)
    }

    pub fn start_lock_path(&self) -> PathBuf {
        self.ddev_dir().join("start.lock")
    }

    pub fn docroot_path(&self) -> PathBuf {
        validation::resolve_inside(&self.approot, &self.config.docroot)
            .unwrap_or_else(|| self.approot.clone())
    }

    /// `ddev-<project>-<service>`.
    pub fn container_name(&self, service: &str) -> String {
        format!("ddev-{}-{}", self.name(), service)
    }

    /// `ddev-<project>`, the compose project name.
    pub fn compose_project_name(&self) -> String {
        format!("ddev-{}", self.name())
    }

    pub fn tld<'a>(&'a self, global_tld: Option<&'a str>) -> &'a str {
        self.config
            .project_tld
            .as_deref()
            .or(global_tld)
            .unwrap_or(DEFAULT_TLD)
    }

    /// `<name>.<tld>`, then each additional hostname under the TLD, then the
    /// additional FQDNs as written. Duplicates are dropped.
    pub fn hostnames(&self, tld: &str) -> Vec<String> {
        let mut names = vec![format!("{}.{}", self.name(), tld)];
        for extra in &self.config.additional_hostnames {
            names.push(format!("{}.{}", extra, tld));
        }
        names.extend(self.config.additional_fqdns.iter().cloned());
        let mut seen = std::collections::HashSet::new();
        names.retain(|n| seen.insert(n.clone()));
        names
    }

    pub fn primary_url(&self, tld: &str, router_https_port: u16) -> String {
        let host = format!("{}.{}", self.name(), tld);
        if router_https_port == 443 {
            format!("https://{}", host)
        } else {
            format!("https://{}:{}", host, router_https_port)
        }
    }

    pub fn container_timeout(&self) -> Duration {
        self.config
            .default_container_timeout
            .as_deref()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONTAINER_TIMEOUT)
    }

    pub fn is_omitted(&self, service: &str, global_omits: &[String]) -> bool {
        self.config.omit_containers.iter().any(|s| s == service)
            || global_omits.iter().any(|s| s == service)
    }

    /// Compose services this project runs.
    pub fn services(&self, global_omits: &[String]) -> Vec<&'static str> {
        let mut services = vec!["web"];
        if !self.is_omitted("db", global_omits) {
            services.push("db");
        }
        if self.config.mailpit_enabled {
            services.push("mailpit");
        }
        services
    }

    /// `<project>-<dbkind>`.
    pub fn db_volume_name(&self) -> String {
        format!("{}-{}", self.name(), self.config.database.kind)
    }

    pub fn mutagen_volume_name(&self) -> String {
        format!("{}_project_mutagen", self.name())
    }

    pub fn nfs_volume_name(&self) -> String {
        format!("{}-nfsmount", self.name())
    }

    /// Named volumes owned by this project, given its effective performance mode.
    pub fn volume_names(&self, mode: PerformanceMode, global_omits: &[String]) -> Vec<String> {
        let mut volumes = Vec::new();
        if !self.is_omitted("db", global_omits) {
            volumes.push(self.db_volume_name());
        }
        match mode {
            PerformanceMode::Mutagen => volumes.push(self.mutagen_volume_name()),
            PerformanceMode::Nfs => volumes.push(self.nfs_volume_name()),
            _ => {}
        }
        volumes
    }
}

fn read_yaml(path: &Path) -> Result<Value> {
    let contents = fs::read_to_string(path)?;
    if contents.trim().is_empty() {
        return Ok(Value::Mapping(Default::default()));
    }
    serde_yaml::from_str(&contents)
        .map_err(|e| Error::validation(format!("{}: {}", path.display(), e)))
}

/// `.ddev/config.*.yaml` in lexical order.
fn override_files(ddev_dir: &Path) -> Result<Vec<PathBuf>> {
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
                .map(|n| n.starts_with("config.") && n.ends_with(".yaml") && n != CONFIG_FILE)
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn check_legacy_keys(doc: &Value, path: &Path) -> Result<()> {
    let Value::Mapping(map) = doc else {
        return Ok(());
    };
    for key in LEGACY_KEYS {
        if let Some(value) = map.get(*key) {
            let old = value.as_str().unwrap_or_default();
            let new = match old {
                "default" | "" => "global",
                other => other,
            };
            return Err(Error::LegacyConfigKey {
                key: key.to_string(),
                path: path.to_path_buf(),
                migration: format!(
                    "Replace '{}: {}' with 'performance_mode: {}', e.g. `ddev config --performance-mode={}`",
                    key, old, new, new
                ),
            });
        }
    }
    Ok(())
}

/// Derive a valid project name from a directory name.
pub fn name_from_dir(dir: &Path) -> String {
    let raw = dir
        .file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    let mut name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    name = name.trim_matches('-').to_string();
    name.truncate(validation::MAX_NAME_LEN);
    name
}
