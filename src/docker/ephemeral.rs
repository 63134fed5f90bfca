//! One-shot helper containers.

use super::images::split_tag;
use super::{ContainerEngine, ContainerSpec, ExecOutput, SITE_NAME_LABEL, USERNS_LABEL};
use crate::error::{Error, Result};
use crate::host::HostProfile;
use tokio_util::sync::CancellationToken;

/// A helper container request.
#[derive(Debug, Clone, Default)]
pub struct EphemeralRun {
    pub spec: ContainerSpec,
    /// Start without attaching and return immediately.
    pub detach: bool,
    /// Remove the container once it exits (ignored when detached).
    pub remove_after: bool,
}

/// `<purpose>_<random12>`, unique enough for concurrent helpers.
pub fn helper_name(purpose: &str) -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..12)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{}_{}", purpose, suffix)
}

/// Check that an image reference carries a non-empty tag.
pub fn validate_image_tag(image: &str) -> Result<()> {
    match split_tag(image) {
        None => Err(Error::ImageTag {
            image: image.to_string(),
            message: "image name must specify tag".into(),
        }),
        Some((_, "")) => Err(Error::ImageTag {
            image: image.to_string(),
            message: "malformed tag provided".into(),
        }),
        Some(_) => Ok(()),
    }
}

/// Fill in the defaults every helper container gets.
///
/// User `0`, an empty `com.ddev.site-name` label so `poweroff` can find
/// leftovers, the `host.docker.internal` mapping, and on podman the user
/// namespace mode.
pub(crate) fn prepare_spec(spec: &mut ContainerSpec, host: &HostProfile) {
    let user = spec.user.get_or_insert_with(|| "0".to_string()).clone();

    spec.labels
        .entry(SITE_NAME_LABEL.to_string())
        .or_default();

    let extra_host = &host.host_docker_internal.extra_host;
    if !extra_host.is_empty() {
        let entry = format!("host.docker.internal:{}", extra_host);
        if !spec.extra_hosts.iter().any(|h| h == &entry) {
            spec.extra_hosts.push(entry);
        }
    }

    if host.provider.is_podman() && spec.userns.is_none() {
        if user == "0" {
            if let Some(mode) = spec.labels.get(USERNS_LABEL) {
                spec.userns = Some(mode.clone());
            }
        } else {
            spec.userns = Some("keep-id".to_string());
        }
    }
}

/// Run a helper container and return its id and, when attached, its output.
///
/// The image must carry a tag and is pulled when not present locally. A
/// non-zero exit is reported through the returned output, not as an error.
pub async fn run_ephemeral(
    engine: &dyn ContainerEngine,
    host: &HostProfile,
    mut run: EphemeralRun,
    cancel: &CancellationToken,
) -> Result<(String, ExecOutput)> {
    validate_image_tag(&run.spec.image)?;

    if !engine.image_exists(&run.spec.image, cancel).await? {
        tracing::debug!(image = %run.spec.image, "pulling helper image");
        engine
            .pull_image(&run.spec.image, cancel)
            .await
            .map_err(|e| match e {
                super::DockerError::Cancelled { .. } => Error::Cancelled,
                other => Error::ImagePull {
                    image: run.spec.image.clone(),
                    reason: other.to_string(),
                },
            })?;
    }

    prepare_spec(&mut run.spec, host);

    let id = engine.create_container(&run.spec, cancel).await?;
    let started = engine.start_container(&id, !run.detach, cancel).await;

    // A detached helper that never started is of no use to the caller either.
    if started.is_err() || (run.remove_after && !run.detach) {
        // Best effort; a cancelled run still gets cleaned up on a fresh token.
        let cleanup = CancellationToken::new();
        if let Err(e) = engine.remove_container(&id, &cleanup).await {
            tracing::warn!(container = %id, "failed to remove helper container: {}", e);
        }
    }

    let output = started?.unwrap_or_default();
    Ok((id, output))
}
