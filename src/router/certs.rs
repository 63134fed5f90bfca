//! Per-project TLS material from the local `mkcert` CA.

use super::config::cert_file_names;
use crate::error::{Error, Result};
use crate::markers::{self, GENERATED_MARKER};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MKCERT_TIMEOUT: Duration = Duration::from_secs(60);
const HOSTS_PREFIX: &str = "#hosts: ";

/// Names every cert covers besides the project's own hostnames.
const COMMON_NAMES: &[&str] = &[
    "127.0.0.1",
    "localhost",
    "ddev-router",
    "ddev-router.ddev",
    "ddev-router.ddev_default",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertOutcome {
    /// Existing generated files already cover the hostnames.
    Reused,
    Generated,
    /// The files lack the marker; they were left as they are.
    UserManaged,
    /// mkcert is not installed; the router falls back to its default cert.
    Unavailable,
}

impl CertOutcome {
    pub fn has_cert(&self) -> bool {
        !matches!(self, CertOutcome::Unavailable)
    }
}

fn hosts_line(hostnames: &[String]) -> String {
    format!("{}{}", HOSTS_PREFIX, hostnames.join(","))
}

/// Hostnames recorded in a generated cert file.
fn recorded_hosts(contents: &str) -> Option<&str> {
    contents
        .lines()
        .take(3)
        .find_map(|l| l.strip_prefix(HOSTS_PREFIX))
}

/// Make sure `<certs_dir>/<project>.{crt,key}` exist and cover `hostnames`.
///
/// Generated files are kept as long as their recorded hostnames match, so
/// the fingerprint survives stop/start.
pub async fn ensure_cert(
    project: &str,
    hostnames: &[String],
    certs_dir: &Path,
    cancel: &CancellationToken,
) -> Result<CertOutcome> {
    let [crt_name, key_name] = cert_file_names(project);
    let crt = certs_dir.join(&crt_name);
    let key = certs_dir.join(&key_name);

    if crt.exists() || key.exists() {
        if !markers::is_overwritable(&crt)? || !markers::is_overwritable(&key)? {
            tracing::debug!(project, "leaving user-managed certificate alone");
            return Ok(CertOutcome::UserManaged);
        }
        if crt.exists() && key.exists() {
            let contents = fs::read_to_string(&crt)?;
            if recorded_hosts(&contents) == Some(hostnames.join(",").as_str()) {
                return Ok(CertOutcome::Reused);
            }
        }
    }

    let Ok(mkcert) = which::which("mkcert") else {
        tracing::warn!("mkcert is not installed; HTTPS for {} will use an untrusted certificate", project);
        return Ok(CertOutcome::Unavailable);
    };

    fs::create_dir_all(certs_dir)
        .map_err(|e| Error::Filesystem(format!("Cannot create '{}': {}", certs_dir.display(), e)))?;

    let mut args = vec![
        "--cert-file".to_string(),
        crt.to_string_lossy().into_owned(),
        "--key-file".to_string(),
        key.to_string_lossy().into_owned(),
    ];
    args.extend(COMMON_NAMES.iter().map(|s| s.to_string()));
    args.extend(hostnames.iter().cloned());

    tracing::debug!(project, ?hostnames, "generating certificate");
    let run = tokio::process::Command::new(&mkcert)
        .args(&args)
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        res = tokio::time::timeout(MKCERT_TIMEOUT, run) => match res {
            Ok(out) => out?,
            Err(_) => return Err(Error::Filesystem("mkcert timed out".into())),
        },
    };
    if !output.status.success() {
        return Err(Error::environment(
            format!(
                "mkcert failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            "Run `mkcert -install` once, then try again",
        ));
    }

    let header = format!("{}\n{}\n", GENERATED_MARKER, hosts_line(hostnames));
    for path in [&crt, &key] {
        let pem = fs::read_to_string(path)?;
        markers::atomic_write(path, format!("{}{}", header, pem).as_bytes())?;
    }
    Ok(CertOutcome::Generated)
}
