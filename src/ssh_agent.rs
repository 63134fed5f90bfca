//! The shared `ddev-ssh-agent` container.
//!
//! One agent serves every project: it owns the socket in the
//! `ddev-ssh-agent-socket` volume that web containers mount. Projects (or the
//! global config) can leave it out with `omit_containers: [ddev-ssh-agent]`.

use crate::compose::render::{SHARED_NETWORK, SSH_AGENT_VOLUME};
use crate::compose::{ComposeProject, ComposeRequest, ServiceDef};
use crate::context::Context;
use crate::docker::images::SSH_AGENT_IMAGE;
use crate::docker::{
    ensure_network, ensure_volume, wait_healthy, DockerError, LabelFilter, COMPOSE_SERVICE_LABEL,
    PLATFORM_LABEL,
};
use crate::error::Result;
use crate::global::GlobalConfig;
use crate::project::Project;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

pub const SSH_AGENT_CONTAINER: &str = "ddev-ssh-agent";
pub const SSH_AGENT_PROJECT: &str = "ddev-ssh-agent";
/// Where the socket volume is mounted, in the agent and in web containers.
pub const SOCKET_DIR: &str = "/home/.ssh-agent";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(60);

fn platform_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(PLATFORM_LABEL.to_string(), "ddev".to_string())])
}

/// Whether `project` runs without an agent.
pub fn is_omitted(project: &Project, global: &GlobalConfig) -> bool {
    project.is_omitted(SSH_AGENT_CONTAINER, &global.omit_containers)
}

/// The compose document for the agent.
pub fn agent_doc(uid: &str, gid: &str) -> ComposeProject {
    let svc = ServiceDef {
        container_name: Some(SSH_AGENT_CONTAINER.to_string()),
        image: Some(SSH_AGENT_IMAGE.to_string()),
        user: Some(format!("{}:{}", uid, gid)),
        labels: platform_labels(),
        environment: BTreeMap::from([
            ("HOST_UID".to_string(), uid.to_string()),
            ("HOST_GID".to_string(), gid.to_string()),
        ]),
        volumes: vec![Value::String(format!("{}:{}", SSH_AGENT_VOLUME, SOCKET_DIR))],
        restart: Some("unless-stopped".to_string()),
        networks: Some(Value::Sequence(vec![Value::String(SHARED_NETWORK.to_string())])),
        ..Default::default()
    };

    let external = |name: &str| {
        let mut m = Mapping::new();
        m.insert("name".into(), name.into());
        m.insert("external".into(), Value::Bool(true));
        Value::Mapping(m)
    };

    let mut doc = ComposeProject {
        name: SSH_AGENT_PROJECT.to_string(),
        ..Default::default()
    };
    doc.services.insert(SSH_AGENT_CONTAINER.to_string(), svc);
    doc.networks.insert(SHARED_NETWORK.to_string(), external(SHARED_NETWORK));
    doc.volumes
        .insert(SSH_AGENT_VOLUME.to_string(), external(SSH_AGENT_VOLUME));
    doc
}

/// Start the agent unless it is already running.
pub async fn ensure_running(ctx: &Context) -> Result<()> {
    let cancel = ctx.cancel();
    match ctx.engine().inspect_container(SSH_AGENT_CONTAINER, cancel).await {
        Ok(c) if c.state.running => {
            debug!("ssh agent already running");
            return Ok(());
        }
        Ok(_) => {
            ctx.engine()
                .remove_container(SSH_AGENT_CONTAINER, cancel)
                .await?;
        }
        Err(DockerError::ContainerNotFound { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    ensure_network(ctx.engine(), SHARED_NETWORK, &platform_labels(), cancel).await?;
    ensure_volume(ctx.engine(), SSH_AGENT_VOLUME, &platform_labels(), cancel).await?;

    let (uid, gid) = crate::host::container_ids();
    let up = ComposeRequest::new(SSH_AGENT_PROJECT, Some(agent_doc(&uid, &gid)), &["up", "-d"]);
    ctx.compose().run(&up, cancel).await?;

    wait_healthy(
        ctx.engine(),
        &[LabelFilter::eq(COMPOSE_SERVICE_LABEL, SSH_AGENT_CONTAINER)],
        HEALTH_TIMEOUT,
        cancel,
    )
    .await?;
    info!("ssh agent started; add keys with `ssh-add` inside it to use them from web containers");
    Ok(())
}

/// Remove the agent container. Keys loaded into it are lost.
pub async fn remove(ctx: &Context) -> Result<()> {
    match ctx
        .engine()
        .remove_container(SSH_AGENT_CONTAINER, ctx.cancel())
        .await
    {
        Ok(()) | Err(DockerError::ContainerNotFound { .. }) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{ProjectConfig, ProjectType};

    #[test]
    fn agent_doc_mounts_the_socket_volume() {
        let doc = agent_doc("1000", "1000");
        let svc = &doc.services[SSH_AGENT_CONTAINER];
        assert_eq!(svc.container_name.as_deref(), Some("ddev-ssh-agent"));
        assert_eq!(
            svc.volumes,
            vec![Value::String("ddev-ssh-agent-socket:/home/.ssh-agent".into())]
        );
        assert!(doc.volumes.contains_key(SSH_AGENT_VOLUME));
        assert_eq!(svc.labels.get(PLATFORM_LABEL).map(String::as_str), Some("ddev"));
    }

    #[test]
    fn omitted_per_project_or_globally() {
        let mut cfg = ProjectConfig::new("a", ProjectType::Php);
        let global = GlobalConfig::default();
        assert!(!is_omitted(&Project::new("/srv/a", cfg.clone()), &global));

        cfg.omit_containers = vec!["ddev-ssh-agent".into()];
        assert!(is_omitted(&Project::new("/srv/a", cfg), &global));

        let global = GlobalConfig {
            omit_containers: vec!["ddev-ssh-agent".into()],
            ..Default::default()
        };
        let cfg = ProjectConfig::new("a", ProjectType::Php);
        assert!(is_omitted(&Project::new("/srv/a", cfg), &global));
    }
}
