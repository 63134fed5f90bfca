//! Compose project documents and the `docker-compose` driver.
//!
//! [`render`] turns a [`crate::project::Project`] into a [`ComposeProject`];
//! a [`ComposeRunner`] pipes documents to the compose tool on stdin.

pub mod driver;
pub mod merge;
pub mod render;
pub mod version;

pub use driver::{pull_images, sanitize_service_name, ComposeDriver, ComposeOutput, ComposeRequest, ComposeRunner};
pub use render::{render, RenderContext};

use serde::{Deserialize, Deserializer, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// A compose-spec document.
///
/// Only the parts ddev reads are typed; everything else an overlay adds is
/// carried in the `extra` maps and written back out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ComposeProject {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default)]
    pub services: BTreeMap<String, ServiceDef>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub networks: BTreeMap<String, Value>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, Value>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ServiceDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Value>,

    #[serde(default, deserialize_with = "string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,

    #[serde(default, deserialize_with = "string_map", skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_hosts: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Value>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ServiceDef {
    pub fn env(&self, key: &str) -> Option<&str> {
        self.environment.get(key).map(String::as_str)
    }
}

impl ComposeProject {
    /// Images of all services, deduplicated, in service order.
    pub fn images(&self) -> Vec<String> {
        let mut images: Vec<String> = Vec::new();
        for svc in self.services.values() {
            if let Some(image) = &svc.image {
                if !images.contains(image) {
                    images.push(image.clone());
                }
            }
        }
        images
    }

    /// Named volumes declared at top level that compose will create (not
    /// `external`).
    pub fn owned_volume_names(&self) -> Vec<String> {
        self.volumes
            .iter()
            .filter(|(_, def)| {
                !def.get("external")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .map(|(key, def)| {
                def.get("name")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| format!("{}_{}", self.name, key))
            })
            .collect()
    }

    /// YAML with `$` doubled so compose does not interpolate it.
    pub fn to_compose_yaml(&self) -> Result<String, serde_yaml::Error> {
        Ok(escape_dollars(&serde_yaml::to_string(self)?))
    }
}

pub fn escape_dollars(yaml: &str) -> String {
    yaml.replace('$', "$$")
}

/// Accept both `KEY: value` maps and `["KEY=value"]` lists.
fn string_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Form {
        Map(BTreeMap<String, Option<Value>>),
        List(Vec<String>),
    }

    fn scalar(v: Option<Value>) -> String {
        match v {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => serde_yaml::to_string(&other)
                .map(|s| s.trim().to_string())
                .unwrap_or_default(),
        }
    }

    Ok(match Option::<Form>::deserialize(deserializer)? {
        None => BTreeMap::new(),
        Some(Form::Map(map)) => map.into_iter().map(|(k, v)| (k, scalar(v))).collect(),
        Some(Form::List(items)) => items
            .into_iter()
            .map(|item| match item.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (item, String::new()),
            })
            .collect(),
    })
}
