//! Concurrent writers of the global config, as separate ddev processes
//! would be.

use ddev::global::GlobalState;
use ddev::project::{ProjectConfig, ProjectType};
use ddev::{Error, Project};
use std::path::Path;
use std::thread;
use tempfile::TempDir;

fn project(root: &Path, name: &str) -> Project {
    Project::new(root.join(name), ProjectConfig::new(name, ProjectType::Php))
}

#[test]
fn concurrent_records_are_not_lost() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join("ddev");

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let dir = dir.clone();
            let root = home.path().to_path_buf();
            thread::spawn(move || {
                let state = GlobalState::new(dir);
                state.record(&project(&root, &format!("p{}", i))).unwrap();
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let names: Vec<String> = GlobalState::new(&dir)
        .projects()
        .unwrap()
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert_eq!(names.len(), 8, "registered: {:?}", names);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_host_port_is_reserved_by_one_project_only() {
    let home = TempDir::new().unwrap();
    let dir = home.path().join("ddev");
    let port = ddev::port::get_free_port().unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let dir = dir.clone();
            let root = home.path().to_path_buf();
            tokio::spawn(async move {
                let state = GlobalState::new(dir);
                let p = project(&root, &format!("p{}", i));
                state.reserve_ports(&p, &[port], "127.0.0.1").await
            })
        })
        .collect();

    let mut won = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(()) => won += 1,
            Err(Error::PortConflict { owner, .. }) => assert!(owner.is_some()),
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }
    assert_eq!(won, 1);

    let global = GlobalState::new(&dir).load().unwrap();
    let owners: Vec<&String> = global
        .project_list
        .iter()
        .filter(|(_, e)| e.used_host_ports.contains(&port))
        .map(|(name, _)| name)
        .collect();
    assert_eq!(owners.len(), 1);
}

#[test]
fn removing_a_project_releases_its_ports() {
    let home = TempDir::new().unwrap();
    let state = GlobalState::new(home.path().join("ddev"));
    let a = project(home.path(), "a");
    let b = project(home.path(), "b");
    let port = ddev::port::get_free_port().unwrap();

    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(state.reserve_ports(&a, &[port], "127.0.0.1")).unwrap();
    assert!(rt.block_on(state.reserve_ports(&b, &[port], "127.0.0.1")).is_err());

    assert!(state.remove_project("a").unwrap());
    rt.block_on(state.reserve_ports(&b, &[port], "127.0.0.1")).unwrap();
    assert_eq!(state.load().unwrap().port_owner(port), Some("b"));
}

#[test]
fn same_name_at_another_root_is_refused() {
    let home = TempDir::new().unwrap();
    let state = GlobalState::new(home.path().join("ddev"));
    let first = project(home.path(), "a");
    std::fs::create_dir_all(&first.approot).unwrap();
    state.record(&first).unwrap();

    let moved = Project::new(
        home.path().join("elsewhere"),
        ProjectConfig::new("a", ProjectType::Php),
    );
    let err = state.record(&moved).unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "got {:?}", err);

    // Once the old root is gone the name can move.
    std::fs::remove_dir_all(&first.approot).unwrap();
    state.record(&moved).unwrap();
}

#[tokio::test]
async fn reservation_waits_for_the_lock_without_stalling_the_runtime() {
    use fs2::FileExt;
    use std::time::Duration;

    let home = TempDir::new().unwrap();
    let dir = home.path().join("ddev");
    std::fs::create_dir_all(&dir).unwrap();
    let held = std::fs::File::create(dir.join(".global_config.lock")).unwrap();
    held.lock_exclusive().unwrap();

    let state = GlobalState::new(&dir);
    let p = project(home.path(), "a");
    let port = ddev::port::get_free_port().unwrap();
    let task = tokio::spawn(async move { state.reserve_ports(&p, &[port], "127.0.0.1").await });

    // Timers still fire on this single-threaded runtime while the task waits.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished());

    held.unlock().unwrap();
    task.await.unwrap().unwrap();
    let global = GlobalState::new(&dir).load().unwrap();
    assert_eq!(global.port_owner(port), Some("a"));
}
