//! Waiting for containers to become healthy.

use super::{describe_labels, ContainerEngine, ContainerInfo, DockerError, LabelFilter};
use crate::error::{Error, HealthcheckError, PendingContainer, Result};
use std::fmt;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Polling cadence for health waits.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
/// Minimum spacing of "still waiting" debug lines.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerHealth {
    Healthy,
    Starting,
    Unhealthy,
    Exited,
    Restarting,
}

impl ContainerHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContainerHealth::Healthy => "healthy",
            ContainerHealth::Starting => "starting",
            ContainerHealth::Unhealthy => "unhealthy",
            ContainerHealth::Exited => "exited",
            ContainerHealth::Restarting => "restarting",
        }
    }
}

impl fmt::Display for ContainerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a container and return the last healthcheck output, if any.
///
/// A container only counts as healthy while it is running: a stopped
/// container whose last recorded check passed is reported `unhealthy`.
/// Containers without a healthcheck are healthy as soon as they run.
pub fn container_health(container: &ContainerInfo) -> (ContainerHealth, String) {
    let state = &container.state;
    let log = state
        .health
        .as_ref()
        .map(|h| h.last_output.clone())
        .unwrap_or_default();

    match state.status.as_str() {
        "exited" | "dead" => return (ContainerHealth::Exited, log),
        "restarting" => return (ContainerHealth::Restarting, log),
        _ => {}
    }

    match &state.health {
        Some(health) => {
            if !state.running {
                return (ContainerHealth::Unhealthy, log);
            }
            let status = match health.status.as_str() {
                "healthy" => ContainerHealth::Healthy,
                "unhealthy" => ContainerHealth::Unhealthy,
                _ => ContainerHealth::Starting,
            };
            (status, log)
        }
        None if state.running => (ContainerHealth::Healthy, log),
        None => (ContainerHealth::Starting, log),
    }
}

fn short_name(container: &ContainerInfo) -> String {
    container
        .service()
        .map(str::to_string)
        .unwrap_or_else(|| container.name.clone())
}

/// Commands that help diagnose a container that did not become healthy.
///
/// With a timeout, also suggests doubling `default_container_timeout`.
pub fn troubleshooting_hint(container: &ContainerInfo, timeout: Option<Duration>) -> String {
    let mut hint = String::from("Troubleshoot this with these commands:\n");
    let service = short_name(container);
    if service != "ddev-router" && service != "ddev-ssh-agent" {
        hint.push_str(&format!("ddev logs -s {}\n", service));
    }
    hint.push_str(&format!("docker logs {}\n", container.name));
    hint.push_str(&format!(
        "docker inspect --format \"{{{{ json .State.Health }}}}\" {} | docker run -i --rm ddev/ddev-utilities jq -r",
        container.name
    ));
    if let Some(timeout) = timeout.filter(|t| !t.is_zero()) {
        hint.push_str(&format!(
            "\nIf your internet connection is slow, consider increasing the timeout by running this:\nddev config --default-container-timeout={} && ddev restart",
            timeout.as_secs() * 2
        ));
    }
    hint
}

async fn tick(cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        _ = tokio::time::sleep(POLL_INTERVAL) => Ok(()),
    }
}

/// Wait for the first container matching `filters` to report healthy.
///
/// Returns its last healthcheck output. Fails immediately when no container
/// matches, or when it turns unhealthy or exits.
pub async fn wait_healthy(
    engine: &dyn ContainerEngine,
    filters: &[LabelFilter],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String> {
    let started = Instant::now();
    let labels = describe_labels(filters);
    let mut last_status: Option<ContainerHealth> = None;
    let mut last_logged = started;

    loop {
        let containers = engine.find_containers(filters, true, cancel).await?;
        let container = containers.first().ok_or_else(|| {
            Error::Docker(DockerError::ContainerNotFound {
                container: format!("labels {}", labels),
            })
        })?;
        let (status, log) = container_health(container);

        if last_status != Some(status) || last_logged.elapsed() >= PROGRESS_LOG_INTERVAL {
            tracing::debug!(container = %container.name, %status, elapsed = ?started.elapsed(), "waiting for container");
            last_status = Some(status);
            last_logged = Instant::now();
        }

        match status {
            ContainerHealth::Healthy => return Ok(log),
            ContainerHealth::Unhealthy => {
                return Err(HealthcheckError::Unhealthy {
                    container: short_name(container),
                    log,
                    suggestion: troubleshooting_hint(container, None),
                }
                .into())
            }
            ContainerHealth::Exited => {
                return Err(HealthcheckError::Exited {
                    container: short_name(container),
                    log,
                    suggestion: troubleshooting_hint(container, None),
                }
                .into())
            }
            ContainerHealth::Starting | ContainerHealth::Restarting => {}
        }

        if started.elapsed() >= timeout {
            return Err(HealthcheckError::Timeout {
                labels,
                waited: timeout,
                pending: vec![PendingContainer {
                    container: container.name.clone(),
                    status: status.to_string(),
                    log,
                    suggestion: troubleshooting_hint(container, Some(timeout)),
                }],
            }
            .into());
        }
        tick(cancel).await?;
    }
}

/// Wait until every container matching `filters` is healthy.
///
/// Zero matches means "not yet"; the wait continues until containers appear.
/// Any container turning unhealthy or exiting fails the wait at once.
pub async fn wait_healthy_all(
    engine: &dyn ContainerEngine,
    filters: &[LabelFilter],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    let labels = describe_labels(filters);
    let mut last_summary = String::new();
    let mut last_logged = started;

    loop {
        let containers = engine.find_containers(filters, true, cancel).await?;
        let mut pending = Vec::new();

        for container in &containers {
            let (status, log) = container_health(container);
            match status {
                ContainerHealth::Healthy => {}
                ContainerHealth::Unhealthy => {
                    return Err(HealthcheckError::Unhealthy {
                        container: short_name(container),
                        log,
                        suggestion: troubleshooting_hint(container, None),
                    }
                    .into())
                }
                ContainerHealth::Exited => {
                    return Err(HealthcheckError::Exited {
                        container: short_name(container),
                        log,
                        suggestion: troubleshooting_hint(container, None),
                    }
                    .into())
                }
                ContainerHealth::Starting | ContainerHealth::Restarting => {
                    pending.push((container, status, log))
                }
            }
        }

        if !containers.is_empty() && pending.is_empty() {
            tracing::debug!(%labels, count = containers.len(), elapsed = ?started.elapsed(), "all containers healthy");
            return Ok(());
        }

        let summary = pending
            .iter()
            .map(|(c, s, _)| format!("{}={}", c.name, s))
            .collect::<Vec<_>>()
            .join(" ");
        if summary != last_summary || last_logged.elapsed() >= PROGRESS_LOG_INTERVAL {
            tracing::debug!(%labels, waiting_on = %summary, elapsed = ?started.elapsed(), "waiting for containers");
            last_summary = summary;
            last_logged = Instant::now();
        }

        if started.elapsed() >= timeout {
            return Err(HealthcheckError::Timeout {
                labels,
                waited: timeout,
                pending: pending
                    .into_iter()
                    .map(|(c, s, log)| PendingContainer {
                        container: c.name.clone(),
                        status: s.to_string(),
                        log,
                        suggestion: troubleshooting_hint(c, Some(timeout)),
                    })
                    .collect(),
            }
            .into());
        }
        tick(cancel).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{ContainerState, HealthState};

    fn container(status: &str, running: bool, health: Option<&str>) -> ContainerInfo {
        let mut c = ContainerInfo {
            name: "ddev-blog-db".into(),
            state: ContainerState {
                status: status.into(),
                running,
                health: health.map(|h| HealthState {
                    status: h.into(),
                    last_output: "mysqld is alive".into(),
                }),
            },
            ..Default::default()
        };
        c.labels.insert("com.docker.compose.service".into(), "db".into());
        c
    }

    #[test]
    fn classification() {
        assert_eq!(container_health(&container("running", true, Some("healthy"))).0, ContainerHealth::Healthy);
        assert_eq!(container_health(&container("running", true, Some("starting"))).0, ContainerHealth::Starting);
        assert_eq!(container_health(&container("running", true, Some("unhealthy"))).0, ContainerHealth::Unhealthy);
        assert_eq!(container_health(&container("running", true, None)).0, ContainerHealth::Healthy);
        assert_eq!(container_health(&container("exited", false, Some("healthy"))).0, ContainerHealth::Exited);
        assert_eq!(container_health(&container("restarting", false, None)).0, ContainerHealth::Restarting);
        assert_eq!(container_health(&container("created", false, None)).0, ContainerHealth::Starting);
    }

    #[test]
    fn cached_healthy_status_of_stopped_container_is_unhealthy() {
        let (status, log) = container_health(&container("paused", false, Some("healthy")));
        assert_eq!(status, ContainerHealth::Unhealthy);
        assert_eq!(log, "mysqld is alive");
    }

    #[test]
    fn hints_name_the_service_and_timeout() {
        let c = container("running", true, Some("starting"));
        let hint = troubleshooting_hint(&c, Some(Duration::from_secs(120)));
        assert!(hint.contains("ddev logs -s db"));
        assert!(hint.contains("docker logs ddev-blog-db"));
        assert!(hint.contains("{{ json .State.Health }}"));
        assert!(hint.contains("--default-container-timeout=240"));

        let mut router = c.clone();
        router.name = "ddev-router".into();
        router.labels.insert("com.docker.compose.service".into(), "ddev-router".into());
        let hint = troubleshooting_hint(&router, None);
        assert!(!hint.contains("ddev logs -s"));
        assert!(!hint.contains("default-container-timeout"));
    }
}
