mod common;

use common::{host_profile, FakeEngine};
use ddev::VolumeXfer;
use std::fs;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn tree(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, contents) in files {
        let path = dir.path().join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
    dir
}

#[tokio::test]
async fn copied_files_can_be_listed_and_removed() {
    let engine = FakeEngine::new();
    let host = host_profile();
    let xfer = VolumeXfer::new(&*engine, &host);
    let cancel = CancellationToken::new();
    let src = tree(&[("one.yaml", "1"), ("two.yaml", "2"), ("nested/three.yaml", "3")]);

    xfer.copy_into(src.path(), "cache", "conf", "1000", None, false, &cancel)
        .await
        .unwrap();

    assert_eq!(xfer.list("cache", "conf", &cancel).await.unwrap(), ["one.yaml", "two.yaml"]);
    assert_eq!(engine.volume_file("cache", "conf/nested/three.yaml").as_deref(), Some("3"));

    xfer.remove_files("cache", "conf", &["one.yaml".to_string()], &cancel)
        .await
        .unwrap();
    assert_eq!(xfer.list("cache", "conf", &cancel).await.unwrap(), ["two.yaml"]);

    // Helpers never outlive the call.
    assert!(engine.container_names().is_empty());
}

#[tokio::test]
async fn listing_a_missing_subdir_is_empty() {
    let engine = FakeEngine::new();
    let host = host_profile();
    let xfer = VolumeXfer::new(&*engine, &host);

    let files = xfer
        .list("cache", "nothing/here", &CancellationToken::new())
        .await
        .unwrap();

    assert!(files.is_empty());
}

#[tokio::test]
async fn destroy_existing_replaces_the_subdir_contents() {
    let engine = FakeEngine::new();
    let host = host_profile();
    let xfer = VolumeXfer::new(&*engine, &host);
    let cancel = CancellationToken::new();

    let old = tree(&[("stale.yaml", "old")]);
    xfer.copy_into(old.path(), "cache", "conf", "1000", None, false, &cancel)
        .await
        .unwrap();
    let new = tree(&[("fresh.yaml", "new")]);
    xfer.copy_into(new.path(), "cache", "conf", "1000", None, true, &cancel)
        .await
        .unwrap();

    assert_eq!(xfer.list("cache", "conf", &cancel).await.unwrap(), ["fresh.yaml"]);
}

#[tokio::test]
async fn purge_empties_only_the_named_subdirs() {
    let engine = FakeEngine::new();
    let host = host_profile();
    let xfer = VolumeXfer::new(&*engine, &host);
    let cancel = CancellationToken::new();
    let src = tree(&[("a/x", "1"), ("b/y", "2")]);
    xfer.copy_into(src.path(), "cache", "", "1000", None, false, &cancel)
        .await
        .unwrap();

    xfer.purge_contents("cache", &["a"], "1000", &cancel)
        .await
        .unwrap();

    assert!(xfer.list("cache", "a", &cancel).await.unwrap().is_empty());
    assert_eq!(xfer.list("cache", "b", &cancel).await.unwrap(), ["y"]);
}

#[tokio::test]
async fn removing_nothing_starts_no_helper() {
    let engine = FakeEngine::new();
    let host = host_profile();
    let xfer = VolumeXfer::new(&*engine, &host);

    xfer.remove_files("cache", "conf", &[], &CancellationToken::new())
        .await
        .unwrap();

    assert!(engine.volume_names().is_empty());
    let (bytes, _) = xfer.get_size("cache", &CancellationToken::new()).await.unwrap();
    assert_eq!(bytes, 0);
}

#[tokio::test]
async fn volume_contents_copy_back_to_the_host() {
    let engine = FakeEngine::new();
    let host = host_profile();
    let xfer = VolumeXfer::new(&*engine, &host);
    let cancel = CancellationToken::new();
    let src = tree(&[("db.sql", "dump"), ("nested/x.txt", "x")]);
    xfer.copy_into(src.path(), "snapshots", "latest", "1000", None, false, &cancel)
        .await
        .unwrap();

    let dst = TempDir::new().unwrap();
    let out = dst.path().join("restore");
    xfer.copy_from("snapshots", "latest", &out, &cancel)
        .await
        .unwrap();

    assert_eq!(fs::read_to_string(out.join("db.sql")).unwrap(), "dump");
    assert_eq!(fs::read_to_string(out.join("nested/x.txt")).unwrap(), "x");
    assert!(engine.container_names().is_empty());
}

#[tokio::test]
async fn helper_that_fails_to_start_is_removed() {
    let engine = FakeEngine::new();
    let host = host_profile();
    let xfer = VolumeXfer::new(&*engine, &host);
    let src = tree(&[("one.yaml", "1")]);
    engine.fail_starts();

    let err = xfer
        .copy_into(src.path(), "cache", "conf", "1000", None, false, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.to_string().contains("OCI runtime create failed"), "got {}", err);
    assert!(engine.container_names().is_empty());
}
