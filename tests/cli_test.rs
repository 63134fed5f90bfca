//! Smoke tests for the `ddev` binary that need no container engine.

use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn ddev_binary() -> String {
    env!("CARGO_BIN_EXE_ddev").to_string()
}

/// Run `ddev` in `dir` with its user config inside `home`.
fn run(home: &TempDir, dir: &std::path::Path, args: &[&str]) -> Output {
    Command::new(ddev_binary())
        .args(args)
        .current_dir(dir)
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("DDEV_NONINTERACTIVE", "true")
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to run ddev")
}

#[test]
fn help_lists_commands() {
    let home = TempDir::new().unwrap();
    let output = run(&home, home.path(), &["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for cmd in ["config", "start", "stop", "pause", "poweroff", "delete", "exec", "logs", "list", "describe"] {
        assert!(stdout.contains(cmd), "{} missing from help:\n{}", cmd, stdout);
    }
}

#[test]
fn config_writes_project_file() {
    let home = TempDir::new().unwrap();
    let site = home.path().join("my-site");
    fs::create_dir_all(&site).unwrap();

    let output = run(
        &home,
        &site,
        &["config", "--project-type", "drupal10", "--php-version", "8.3", "--docroot", "web"],
    );
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let yaml = fs::read_to_string(site.join(".ddev/config.yaml")).unwrap();
    assert!(yaml.contains("name: my-site"), "{}", yaml);
    assert!(yaml.contains("drupal10"), "{}", yaml);
    assert!(yaml.contains("docroot: web"), "{}", yaml);
}

#[test]
fn invalid_config_value_exits_with_2() {
    let home = TempDir::new().unwrap();
    let site = home.path().join("site");
    fs::create_dir_all(&site).unwrap();

    let output = run(&home, &site, &["config", "--database", "oracle:19"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("oracle"));
    assert!(!site.join(".ddev").exists());
}

#[test]
fn describe_outside_a_project_exits_with_2() {
    let home = TempDir::new().unwrap();

    let output = run(&home, home.path(), &["describe"]);

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Hint:"));
}

#[test]
fn all_skips_projects_whose_config_is_gone() {
    let home = TempDir::new().unwrap();
    let config_dir = home.path().join("config").join("ddev");
    fs::create_dir_all(&config_dir).unwrap();
    let gone = home.path().join("gone");
    fs::write(
        config_dir.join("global_config.yaml"),
        format!("project_list:\n  gone:\n    approot: {}\n", gone.display()),
    )
    .unwrap();

    let output = run(&home, home.path(), &["stop", "--all"]);

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("Skipping gone:"));
}
