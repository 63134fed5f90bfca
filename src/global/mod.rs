//! Per-user registry: known projects, their reserved host ports, and the
//! user's preferences.
//!
//! Every change is a read-modify-write of `global_config.yaml` under an
//! exclusive lock on `.global_config.lock`, so concurrent `ddev`
//! invocations never lose each other's updates.

pub mod config;

pub use config::{GlobalConfig, ProjectEntry, RouterPorts};

use crate::error::{Error, Result};
use crate::lock::FileLock;
use crate::markers;
use crate::port::PortConflict;
use crate::project::Project;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const GLOBAL_CONFIG_FILE: &str = "global_config.yaml";

#[derive(Debug, Clone)]
pub struct GlobalState {
    dir: PathBuf,
}

impl GlobalState {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_CONFIG_HOME/ddev` when set, otherwise `~/.ddev`.
    pub fn from_env() -> Result<Self> {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            return Ok(Self::new(PathBuf::from(xdg).join("ddev")));
        }
        let home = dirs::home_dir().ok_or_else(|| {
            Error::environment(
                "could not determine the home directory",
                "Set HOME or XDG_CONFIG_HOME",
            )
        })?;
        Ok(Self::new(home.join(".ddev")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(GLOBAL_CONFIG_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(".global_config.lock")
    }

    pub fn router_lock_path(&self) -> PathBuf {
        self.dir.join("router.lock")
    }

    pub fn bin_dir(&self) -> PathBuf {
        self.dir.join("bin")
    }

    /// Read the current document. A missing file is the default config.
    pub fn load(&self) -> Result<GlobalConfig> {
        read_config(&self.config_path())
    }

    /// Apply `f` to the document under the global lock and persist the result.
    ///
    /// Nothing is written when `f` fails.
    pub fn update<T>(&self, f: impl FnOnce(&mut GlobalConfig) -> Result<T>) -> Result<T> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Filesystem(format!("Cannot create '{}': {}", self.dir.display(), e))
        })?;
        let _lock = FileLock::acquire_blocking(&self.lock_path())?;
        let path = self.config_path();
        let mut config = read_config(&path)?;
        let result = f(&mut config)?;
        let yaml = serde_yaml::to_string(&config)?;
        markers::atomic_write(&path, yaml.as_bytes())?;
        Ok(result)
    }

    /// Register the project. A name bound to a different approot is refused.
    pub fn record(&self, project: &Project) -> Result<()> {
        self.update(|cfg| register(cfg, project).map(|_| ()))
    }

    /// Reserve host ports for `project`.
    ///
    /// A port is refused when another project owns it, or when something
    /// already answers on `docker_ip:port` and this project does not own it.
    /// The project's list is rewritten deduplicated.
    pub async fn reserve_ports(&self, project: &Project, ports: &[u16], docker_ip: &str) -> Result<()> {
        let snapshot = self.load()?;
        let owned: Vec<u16> = snapshot
            .project_list
            .get(project.name())
            .map(|e| e.used_host_ports.clone())
            .unwrap_or_default();

        for &port in ports {
            if let Some(owner) = snapshot.port_owner(port).filter(|o| *o != project.name()) {
                return Err(owned_by(port, owner));
            }
            if owned.contains(&port) {
                continue;
            }
            if let Some(conflict) = PortConflict::check(docker_ip, port).await {
                return Err(conflict.into_error());
            }
        }

        // The global lock may be held by another process; wait off the runtime.
        let state = self.clone();
        let project = project.clone();
        let ports = ports.to_vec();
        tokio::task::spawn_blocking(move || {
            state.update(|cfg| {
                for &port in &ports {
                    if let Some(owner) = cfg.port_owner(port).filter(|o| *o != project.name()) {
                        return Err(owned_by(port, owner));
                    }
                }
                let entry = register(cfg, &project)?;
                for &port in &ports {
                    if !entry.used_host_ports.contains(&port) {
                        entry.used_host_ports.push(port);
                    }
                }
                debug!(project = project.name(), ports = ?entry.used_host_ports, "host ports reserved");
                Ok(())
            })
        })
        .await
        .map_err(|e| Error::Filesystem(format!("port reservation task failed: {}", e)))?
    }

    /// Put the project's registry entry back to `previous`, dropping it when
    /// there was none. Undoes a reservation for a start that never ran.
    pub fn restore_entry(&self, name: &str, previous: Option<ProjectEntry>) -> Result<()> {
        self.update(|cfg| {
            match previous {
                Some(entry) => {
                    cfg.project_list.insert(name.to_string(), entry);
                }
                None => {
                    cfg.project_list.remove(name);
                }
            }
            Ok(())
        })
    }

    /// Drop the project from the registry, releasing its ports.
    pub fn remove_project(&self, name: &str) -> Result<bool> {
        self.update(|cfg| Ok(cfg.project_list.remove(name).is_some()))
    }

    /// Known projects as `(name, approot)`.
    pub fn projects(&self) -> Result<Vec<(String, PathBuf)>> {
        Ok(self
            .load()?
            .project_list
            .into_iter()
            .map(|(name, entry)| (name, entry.approot))
            .collect())
    }
}

fn read_config(path: &Path) -> Result<GlobalConfig> {
    match fs::read_to_string(path) {
        Ok(contents) if contents.trim().is_empty() => Ok(GlobalConfig::default()),
        Ok(contents) => serde_yaml::from_str(&contents)
            .map_err(|e| Error::validation(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(GlobalConfig::default()),
        Err(e) => Err(e.into()),
    }
}

fn register<'a>(cfg: &'a mut GlobalConfig, project: &Project) -> Result<&'a mut ProjectEntry> {
    if let Some(existing) = cfg.project_list.get(project.name()) {
        if existing.approot != project.approot && existing.approot.exists() {
            return Err(Error::validation(format!(
                "a project named '{}' already exists at {}; project names must be unique",
                project.name(),
                existing.approot.display()
            )));
        }
    }
    let entry = cfg
        .project_list
        .entry(project.name().to_string())
        .or_default();
    entry.approot = project.approot.clone();
    Ok(entry)
}

fn owned_by(port: u16, owner: &str) -> Error {
    Error::PortConflict {
        port,
        pid: None,
        process_name: None,
        command: None,
        owner: Some(owner.to_string()),
    }
}
