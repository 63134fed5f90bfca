use crate::project::types::{opt_performance_mode, opt_port};
use crate::project::{PerformanceMode, DEFAULT_TLD};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub const DEFAULT_ROUTER_HTTP_PORT: u16 = 80;
pub const DEFAULT_ROUTER_HTTPS_PORT: u16 = 443;
pub const DEFAULT_MAILPIT_HTTP_PORT: u16 = 8025;
pub const DEFAULT_MAILPIT_HTTPS_PORT: u16 = 8026;
pub const DEFAULT_COMPOSE_VERSION: &str = "v2.36.0";

/// `<user-config>/global_config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GlobalConfig {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub project_list: BTreeMap<String, ProjectEntry>,

    #[serde(
        default,
        deserialize_with = "opt_performance_mode",
        skip_serializing_if = "Option::is_none"
    )]
    pub performance_mode: Option<PerformanceMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_tld: Option<String>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub router_http_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub router_https_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub mailpit_http_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub mailpit_https_port: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_docker_compose_version: Option<String>,

    #[serde(default)]
    pub use_docker_compose_from_path: bool,

    #[serde(default)]
    pub router_bind_all_interfaces: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omit_containers: Vec<String>,

    #[serde(default)]
    pub fail_on_hook_fail: bool,

    #[serde(default)]
    pub instrumentation_opt_in: bool,

    #[serde(default)]
    pub simple_formatting: bool,

    #[serde(default)]
    pub no_bind_mounts: bool,

    #[serde(default)]
    pub xdebug_ide_location: String,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ProjectEntry {
    pub approot: PathBuf,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub used_host_ports: Vec<u16>,
}

fn port_or(value: Option<u32>, default: u16) -> u16 {
    value
        .and_then(|p| u16::try_from(p).ok())
        .filter(|p| *p != 0)
        .unwrap_or(default)
}

impl GlobalConfig {
    pub fn tld(&self) -> &str {
        self.project_tld.as_deref().unwrap_or(DEFAULT_TLD)
    }

    pub fn router_http_port(&self) -> u16 {
        port_or(self.router_http_port, DEFAULT_ROUTER_HTTP_PORT)
    }

    pub fn router_https_port(&self) -> u16 {
        port_or(self.router_https_port, DEFAULT_ROUTER_HTTPS_PORT)
    }

    pub fn mailpit_http_port(&self) -> u16 {
        port_or(self.mailpit_http_port, DEFAULT_MAILPIT_HTTP_PORT)
    }

    pub fn mailpit_https_port(&self) -> u16 {
        port_or(self.mailpit_https_port, DEFAULT_MAILPIT_HTTPS_PORT)
    }

    pub fn required_compose_version(&self) -> &str {
        self.required_docker_compose_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_COMPOSE_VERSION)
    }

    /// The project that has `port` in its `used_host_ports`, if any.
    pub fn port_owner(&self, port: u16) -> Option<&str> {
        self.project_list
            .iter()
            .find(|(_, entry)| entry.used_host_ports.contains(&port))
            .map(|(name, _)| name.as_str())
    }
}

/// The effective router/mailpit ports for a project: project setting, then
/// global setting, then default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterPorts {
    pub http: u16,
    pub https: u16,
    pub mailpit_http: u16,
    pub mailpit_https: u16,
}

impl RouterPorts {
    pub fn resolve(project: &crate::project::ProjectConfig, global: &GlobalConfig) -> Self {
        Self {
            http: port_or(project.router_http_port, global.router_http_port()),
            https: port_or(project.router_https_port, global.router_https_port()),
            mailpit_http: port_or(project.mailpit_http_port, global.mailpit_http_port()),
            mailpit_https: port_or(project.mailpit_https_port, global.mailpit_https_port()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ProjectConfig, ProjectType};

    #[test]
    fn defaults() {
        let cfg = GlobalConfig::default();
        assert_eq!(cfg.tld(), "ddev.site");
        assert_eq!(cfg.router_http_port(), 80);
        assert_eq!(cfg.router_https_port(), 443);
        assert_eq!(cfg.required_compose_version(), DEFAULT_COMPOSE_VERSION);
    }

    #[test]
    fn parses_and_keeps_unknown_keys() {
        let cfg: GlobalConfig = serde_yaml::from_str(
            "project_list:\n  a:\n    approot: /srv/a\n    used_host_ports: [33060]\nrouter_https_port: \"8443\"\nperformance_mode: \"\"\nmessages:\n  ticker_interval: 20\n",
        )
        .unwrap();
        assert_eq!(cfg.router_https_port(), 8443);
        assert_eq!(cfg.performance_mode, None);
        assert!(cfg.extra.contains_key("messages"));
        assert_eq!(cfg.port_owner(33060), Some("a"));
        assert_eq!(cfg.port_owner(33061), None);
    }

    #[test]
    fn project_ports_override_global() {
        let global = GlobalConfig {
            router_https_port: Some(8443),
            ..Default::default()
        };
        let mut project = ProjectConfig::new("a", ProjectType::Php);
        let ports = RouterPorts::resolve(&project, &global);
        assert_eq!((ports.http, ports.https), (80, 8443));
        project.router_http_port = Some(8080);
        assert_eq!(RouterPorts::resolve(&project, &global).http, 8080);
    }
}
