//! Tests against a real engine. Each one returns early when `docker info`
//! does not answer.

mod common;

use ddev::docker::{ContainerEngine, LabelFilter, VolumeSpec, SITE_NAME_LABEL};
use ddev::DockerClient;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn probe_reports_engine_versions() {
    if !common::docker_available().await {
        eprintln!("docker not available, skipping");
        return;
    }
    let client = DockerClient::new();
    let cancel = CancellationToken::new();

    let profile = ddev::host::probe(&client, "", &cancel).await.unwrap();

    assert!(!profile.server_version.is_empty());
    assert!(!profile.docker_ip.is_empty());
}

#[tokio::test]
async fn labelled_volume_lifecycle() {
    if !common::docker_available().await {
        eprintln!("docker not available, skipping");
        return;
    }
    let client = DockerClient::new();
    let cancel = CancellationToken::new();
    let name = format!("ddev-test-{}-vol", std::process::id());
    let site = format!("ddev-test-{}", std::process::id());

    client
        .create_volume(
            &VolumeSpec {
                name: name.clone(),
                labels: BTreeMap::from([(SITE_NAME_LABEL.to_string(), site.clone())]),
                ..Default::default()
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(client.volume_exists(&name, &cancel).await.unwrap());

    let listed = client
        .list_volumes(&[LabelFilter::eq(SITE_NAME_LABEL, &site)], &cancel)
        .await
        .unwrap();
    assert_eq!(listed, vec![name.clone()]);

    client.remove_volume(&name, &cancel).await.unwrap();
    assert!(!client.volume_exists(&name, &cancel).await.unwrap());
    // Removing a missing volume is not an error.
    client.remove_volume(&name, &cancel).await.unwrap();
}

#[tokio::test]
async fn inspecting_a_missing_container_is_not_found() {
    if !common::docker_available().await {
        eprintln!("docker not available, skipping");
        return;
    }
    let client = DockerClient::new();
    let cancel = CancellationToken::new();

    let err = client
        .inspect_container("ddev-test-no-such-container", &cancel)
        .await
        .unwrap_err();

    assert!(
        matches!(err, ddev::DockerError::ContainerNotFound { .. }),
        "got {:?}",
        err
    );
}
