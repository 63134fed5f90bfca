//! The `.ddev/config.yaml` document.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Per-project configuration as stored in `.ddev/config.yaml`.
///
/// Keys this version does not know about are kept in `extra` and written
/// back unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "type", default)]
    pub project_type: ProjectType,

    #[serde(default)]
    pub docroot: String,

    #[serde(
        default = "default_php_version",
        deserialize_with = "string_or_number"
    )]
    pub php_version: String,

    #[serde(default)]
    pub webserver_type: WebserverType,

    #[serde(default)]
    pub database: DatabaseSpec,

    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub nodejs_version: Option<String>,

    #[serde(
        default,
        deserialize_with = "opt_performance_mode",
        skip_serializing_if = "Option::is_none"
    )]
    pub performance_mode: Option<PerformanceMode>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_hostnames: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_fqdns: Vec<String>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub router_http_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub router_https_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub mailpit_http_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub mailpit_https_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub host_db_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub host_webserver_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub host_https_port: Option<u32>,

    #[serde(default, deserialize_with = "opt_port", skip_serializing_if = "Option::is_none")]
    pub host_mailpit_port: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omit_containers: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, Vec<HookTask>>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub xdebug_enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xhprof_mode: Option<XhprofMode>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub disable_settings_management: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub fail_on_hook_fail: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub web_environment: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_tld: Option<String>,

    #[serde(
        default,
        deserialize_with = "opt_string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub default_container_timeout: Option<String>,

    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub mailpit_enabled: bool,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ProjectConfig {
    /// A config with the defaults `ddev config` writes.
    pub fn new(name: impl Into<String>, project_type: ProjectType) -> Self {
        Self {
            name: name.into(),
            project_type,
            docroot: project_type.default_docroot().to_string(),
            php_version: default_php_version(),
            mailpit_enabled: true,
            ..Default::default()
        }
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_true(b: &bool) -> bool {
    *b
}

fn default_true() -> bool {
    true
}

pub const DEFAULT_PHP_VERSION: &str = "8.3";

fn default_php_version() -> String {
    DEFAULT_PHP_VERSION.to_string()
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProjectType {
    #[default]
    Php,
    Drupal,
    Drupal6,
    Drupal7,
    Drupal8,
    Drupal9,
    Drupal10,
    Drupal11,
    Backdrop,
    Wordpress,
    Typo3,
    Laravel,
    Symfony,
    Cakephp,
    Codeigniter,
    Craftcms,
    Silverstripe,
    Magento,
    Magento2,
    Shopware6,
    Python,
    Django4,
    Generic,
}

impl ProjectType {
    pub const ALL: [ProjectType; 23] = [
        ProjectType::Php,
        ProjectType::Drupal,
        ProjectType::Drupal6,
        ProjectType::Drupal7,
        ProjectType::Drupal8,
        ProjectType::Drupal9,
        ProjectType::Drupal10,
        ProjectType::Drupal11,
        ProjectType::Backdrop,
        ProjectType::Wordpress,
        ProjectType::Typo3,
        ProjectType::Laravel,
        ProjectType::Symfony,
        ProjectType::Cakephp,
        ProjectType::Codeigniter,
        ProjectType::Craftcms,
        ProjectType::Silverstripe,
        ProjectType::Magento,
        ProjectType::Magento2,
        ProjectType::Shopware6,
        ProjectType::Python,
        ProjectType::Django4,
        ProjectType::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Php => "php",
            ProjectType::Drupal => "drupal",
            ProjectType::Drupal6 => "drupal6",
            ProjectType::Drupal7 => "drupal7",
            ProjectType::Drupal8 => "drupal8",
            ProjectType::Drupal9 => "drupal9",
            ProjectType::Drupal10 => "drupal10",
            ProjectType::Drupal11 => "drupal11",
            ProjectType::Backdrop => "backdrop",
            ProjectType::Wordpress => "wordpress",
            ProjectType::Typo3 => "typo3",
            ProjectType::Laravel => "laravel",
            ProjectType::Symfony => "symfony",
            ProjectType::Cakephp => "cakephp",
            ProjectType::Codeigniter => "codeigniter",
            ProjectType::Craftcms => "craftcms",
            ProjectType::Silverstripe => "silverstripe",
            ProjectType::Magento => "magento",
            ProjectType::Magento2 => "magento2",
            ProjectType::Shopware6 => "shopware6",
            ProjectType::Python => "python",
            ProjectType::Django4 => "django4",
            ProjectType::Generic => "generic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == s)
    }

    pub fn is_drupal(&self) -> bool {
        matches!(
            self,
            ProjectType::Drupal
                | ProjectType::Drupal6
                | ProjectType::Drupal7
                | ProjectType::Drupal8
                | ProjectType::Drupal9
                | ProjectType::Drupal10
                | ProjectType::Drupal11
        )
    }

    pub fn is_python(&self) -> bool {
        matches!(self, ProjectType::Python | ProjectType::Django4)
    }

    pub fn default_docroot(&self) -> &'static str {
        match self {
            ProjectType::Drupal
            | ProjectType::Drupal8
            | ProjectType::Drupal9
            | ProjectType::Drupal10
            | ProjectType::Drupal11
            | ProjectType::Craftcms => "web",
            ProjectType::Laravel
            | ProjectType::Symfony
            | ProjectType::Typo3
            | ProjectType::Silverstripe
            | ProjectType::Shopware6
            | ProjectType::Codeigniter => "public",
            ProjectType::Magento2 => "pub",
            ProjectType::Cakephp => "webroot",
            _ => "",
        }
    }

    /// Oldest PHP version the project type runs on.
    pub fn min_php_version(&self) -> &'static str {
        match self {
            ProjectType::Drupal11 => "8.3",
            ProjectType::Drupal | ProjectType::Drupal10 => "8.1",
            ProjectType::Drupal9 => "7.3",
            ProjectType::Drupal8 => "7.0",
            ProjectType::Laravel | ProjectType::Magento2 | ProjectType::Shopware6 => "8.1",
            ProjectType::Craftcms | ProjectType::Symfony => "8.0",
            ProjectType::Typo3 => "7.4",
            _ => "5.6",
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum WebserverType {
    #[default]
    #[serde(rename = "nginx-fpm")]
    NginxFpm,
    #[serde(rename = "apache-fpm")]
    ApacheFpm,
    #[serde(rename = "nginx-gunicorn")]
    NginxGunicorn,
    #[serde(rename = "generic")]
    Generic,
}

impl WebserverType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebserverType::NginxFpm => "nginx-fpm",
            WebserverType::ApacheFpm => "apache-fpm",
            WebserverType::NginxGunicorn => "nginx-gunicorn",
            WebserverType::Generic => "generic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            WebserverType::NginxFpm,
            WebserverType::ApacheFpm,
            WebserverType::NginxGunicorn,
            WebserverType::Generic,
        ]
        .into_iter()
        .find(|w| w.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    #[default]
    Mariadb,
    Mysql,
    Postgres,
}

impl DatabaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseKind::Mariadb => "mariadb",
            DatabaseKind::Mysql => "mysql",
            DatabaseKind::Postgres => "postgres",
        }
    }
}

impl fmt::Display for DatabaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseSpec {
    #[serde(rename = "type", default)]
    pub kind: DatabaseKind,
    #[serde(default = "default_db_version", deserialize_with = "string_or_number")]
    pub version: String,
}

pub const DEFAULT_MARIADB_VERSION: &str = "10.11";

fn default_db_version() -> String {
    DEFAULT_MARIADB_VERSION.to_string()
}

impl Default for DatabaseSpec {
    fn default() -> Self {
        Self {
            kind: DatabaseKind::Mariadb,
            version: default_db_version(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PerformanceMode {
    Global,
    None,
    Mutagen,
    Nfs,
}

impl PerformanceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerformanceMode::Global => "global",
            PerformanceMode::None => "none",
            PerformanceMode::Mutagen => "mutagen",
            PerformanceMode::Nfs => "nfs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(PerformanceMode::Global),
            "none" => Some(PerformanceMode::None),
            "mutagen" => Some(PerformanceMode::Mutagen),
            "nfs" => Some(PerformanceMode::Nfs),
            _ => None,
        }
    }
}

impl fmt::Display for PerformanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum XhprofMode {
    Prepend,
    Xhgui,
    Global,
}

/// One hook task. Exactly one of `exec`, `exec-host` or `composer` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HookTask {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<String>,
    #[serde(rename = "exec-host", default, skip_serializing_if = "Option::is_none")]
    pub exec_host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composer: Option<String>,
    /// Container service for `exec` tasks (default `web`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction<'a> {
    Exec { service: &'a str, command: &'a str },
    ExecHost(&'a str),
    Composer(&'a str),
}

impl HookTask {
    /// The task's action, or `None` when zero or several kinds are set.
    pub fn action(&self) -> Option<HookAction<'_>> {
        match (&self.exec, &self.exec_host, &self.composer) {
            (Some(cmd), None, None) => Some(HookAction::Exec {
                service: self.service.as_deref().unwrap_or("web"),
                command: cmd,
            }),
            (None, Some(cmd), None) => Some(HookAction::ExecHost(cmd)),
            (None, None, Some(args)) => Some(HookAction::Composer(args)),
            _ => None,
        }
    }
}

impl fmt::Display for HookTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.action() {
            Some(HookAction::Exec { service, command }) => {
                write!(f, "exec [{}]: {}", service, command)
            }
            Some(HookAction::ExecHost(cmd)) => write!(f, "exec-host: {}", cmd),
            Some(HookAction::Composer(args)) => write!(f, "composer: {}", args),
            None => f.write_str("invalid task"),
        }
    }
}

/// Hook phases in the order a lifecycle walks them.
pub const HOOK_PHASES: [&str; 10] = [
    "pre-start",
    "post-start",
    "pre-stop",
    "post-stop",
    "pre-pause",
    "post-pause",
    "pre-restart",
    "post-restart",
    "pre-delete",
    "post-delete",
];

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Str(String),
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Str(s) => s,
            Scalar::Int(i) => i.to_string(),
            // YAML `8.0` arrives as a float; keep the `.0`.
            Scalar::Float(f) if f.fract() == 0.0 => format!("{:.1}", f),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

/// Accept `php_version: 8.3` as well as `php_version: "8.3"`.
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Scalar::deserialize(deserializer)?.into_string())
}

pub(crate) fn opt_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?
        .map(Scalar::into_string)
        .filter(|s| !s.is_empty()))
}

/// Ports are written as numbers or quoted strings; range checks happen in validation.
pub(crate) fn opt_port<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    match Option::<Scalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Scalar::Int(i)) => u32::try_from(i)
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid port number {}", i))),
        Some(Scalar::Str(s)) if s.trim().is_empty() => Ok(None),
        Some(Scalar::Str(s)) => s
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("invalid port number '{}'", s))),
        Some(Scalar::Float(f)) => Err(D::Error::custom(format!("invalid port number {}", f))),
    }
}

/// An empty `performance_mode` means "use the global setting".
pub(crate) fn opt_performance_mode<'de, D>(deserializer: D) -> Result<Option<PerformanceMode>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error as _;
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => PerformanceMode::parse(&s)
            .map(Some)
            .ok_or_else(|| D::Error::custom(format!("unknown performance_mode '{}'", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: ProjectConfig =
            serde_yaml::from_str("name: a\ntype: php\ndocroot: web\nphp_version: \"8.3\"\n").unwrap();
        assert_eq!(cfg.name, "a");
        assert_eq!(cfg.project_type, ProjectType::Php);
        assert_eq!(cfg.database, DatabaseSpec::default());
        assert_eq!(cfg.webserver_type, WebserverType::NginxFpm);
        assert!(cfg.mailpit_enabled);
        assert!(cfg.extra.is_empty());
    }

    #[test]
    fn numbers_are_accepted_where_strings_are_expected() {
        let cfg: ProjectConfig = serde_yaml::from_str(
            "name: a\nphp_version: 8.0\ndatabase:\n  type: mysql\n  version: 8.0\nrouter_https_port: \"8443\"\nhost_db_port: 33060\ndefault_container_timeout: 240\n",
        )
        .unwrap();
        assert_eq!(cfg.php_version, "8.0");
        assert_eq!(cfg.database.kind, DatabaseKind::Mysql);
        assert_eq!(cfg.database.version, "8.0");
        assert_eq!(cfg.router_https_port, Some(8443));
        assert_eq!(cfg.host_db_port, Some(33060));
        assert_eq!(cfg.default_container_timeout.as_deref(), Some("240"));
    }

    #[test]
    fn unknown_keys_survive_a_rewrite() {
        let yaml = "name: a\nupload_dirs:\n  - sites/default/files\ncorepack_enable: true\n";
        let cfg: ProjectConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.extra.contains_key("upload_dirs"));
        let out = serde_yaml::to_string(&cfg).unwrap();
        let again: ProjectConfig = serde_yaml::from_str(&out).unwrap();
        assert_eq!(cfg, again);
        assert!(out.contains("corepack_enable: true"));
    }

    #[test]
    fn empty_performance_mode_is_unset() {
        let cfg: ProjectConfig = serde_yaml::from_str("name: a\nperformance_mode: \"\"\n").unwrap();
        assert_eq!(cfg.performance_mode, None);
        let cfg: ProjectConfig = serde_yaml::from_str("name: a\nperformance_mode: nfs\n").unwrap();
        assert_eq!(cfg.performance_mode, Some(PerformanceMode::Nfs));
        assert!(serde_yaml::from_str::<ProjectConfig>("name: a\nperformance_mode: turbo\n").is_err());
    }

    #[test]
    fn hook_actions() {
        let cfg: ProjectConfig = serde_yaml::from_str(
            "name: a\nhooks:\n  post-start:\n    - exec: drush cr\n    - exec-host: echo done\n    - composer: install\n    - exec: psql\n      service: db\n",
        )
        .unwrap();
        let tasks = &cfg.hooks["post-start"];
        assert_eq!(
            tasks[0].action(),
            Some(HookAction::Exec { service: "web", command: "drush cr" })
        );
        assert_eq!(tasks[1].action(), Some(HookAction::ExecHost("echo done")));
        assert_eq!(tasks[2].action(), Some(HookAction::Composer("install")));
        assert_eq!(
            tasks[3].action(),
            Some(HookAction::Exec { service: "db", command: "psql" })
        );
        let both = HookTask {
            exec: Some("a".into()),
            exec_host: Some("b".into()),
            ..Default::default()
        };
        assert_eq!(both.action(), None);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_yaml::from_str::<ProjectConfig>("name: a\ntype: joomla\n").is_err());
        assert_eq!(ProjectType::parse("drupal10"), Some(ProjectType::Drupal10));
    }
}
