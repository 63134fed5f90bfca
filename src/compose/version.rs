//! Locating, version-checking and installing the `docker-compose` binary.

use crate::error::{Error, Result};
use crate::markers;
use semver::Version;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

/// Oldest compose that understands everything ddev renders.
pub const MIN_COMPOSE_VERSION: &str = "2.24.3-pre";

const DOWNLOAD_BASE: &str = "https://github.com/docker/compose/releases/download";
const DOWNLOAD_RETRIES: u32 = 2;
const VERSION_TIMEOUT: Duration = Duration::from_secs(30);

/// The compose binary ddev uses, resolved (and downloaded if needed) on
/// first use and then cached for the rest of the process.
#[derive(Debug)]
pub struct ComposeBinary {
    bin_dir: PathBuf,
    use_path: bool,
    required: String,
    resolved: OnceCell<(PathBuf, Version)>,
}

impl ComposeBinary {
    pub fn new(bin_dir: impl Into<PathBuf>, use_path: bool, required: impl Into<String>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            use_path,
            required: required.into(),
            resolved: OnceCell::new(),
        }
    }

    /// A binary that is used as-is, without version gate or download.
    pub fn fixed(path: impl Into<PathBuf>, version: Version) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set((path.into(), version));
        Self {
            bin_dir: PathBuf::new(),
            use_path: true,
            required: String::new(),
            resolved: cell,
        }
    }

    pub fn managed_path(&self) -> PathBuf {
        self.bin_dir.join(binary_file_name())
    }

    pub async fn path(&self, cancel: &CancellationToken) -> Result<PathBuf> {
        Ok(self.resolve(cancel).await?.0.clone())
    }

    pub async fn version(&self, cancel: &CancellationToken) -> Result<Version> {
        Ok(self.resolve(cancel).await?.1.clone())
    }

    async fn resolve(&self, cancel: &CancellationToken) -> Result<&(PathBuf, Version)> {
        self.resolved
            .get_or_try_init(|| async {
                let (path, version) = if self.use_path {
                    let path = which::which("docker-compose").map_err(|_| {
                        Error::environment(
                            "use_docker_compose_from_path is set but docker-compose is not in PATH",
                            "Install docker-compose or unset use_docker_compose_from_path in global_config.yaml",
                        )
                    })?;
                    let version = query_version(&path, cancel).await?;
                    (path, version)
                } else {
                    self.ensure_managed(cancel).await?
                };
                check_minimum(&path, &version)?;
                tracing::debug!(path = %path.display(), %version, "using docker-compose");
                Ok((path, version))
            })
            .await
    }

    /// Download the required version into the bin dir unless it is already there.
    async fn ensure_managed(&self, cancel: &CancellationToken) -> Result<(PathBuf, Version)> {
        let path = self.managed_path();
        let required = parse_version(&self.required).ok_or_else(|| {
            Error::validation(format!(
                "required_docker_compose_version '{}' is not a version",
                self.required
            ))
        })?;
        if path.exists() {
            match query_version(&path, cancel).await {
                Ok(current) if current == required => return Ok((path, current)),
                Ok(current) => {
                    tracing::info!(%current, %required, "replacing docker-compose");
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => tracing::warn!("existing docker-compose is unusable: {}", e),
            }
        }

        let tag = if self.required.starts_with('v') {
            self.required.clone()
        } else {
            format!("v{}", self.required)
        };
        download(&tag, &path, cancel).await?;
        let version = query_version(&path, cancel).await?;
        Ok((path, version))
    }
}

fn check_minimum(path: &Path, version: &Version) -> Result<()> {
    let min = parse_version(MIN_COMPOSE_VERSION).ok_or_else(|| Error::Compose("bad minimum version".into()))?;
    if *version < min {
        return Err(Error::environment(
            format!(
                "{} is version {}; docker-compose {} or newer is required",
                path.display(),
                version,
                MIN_COMPOSE_VERSION
            ),
            "Unset use_docker_compose_from_path so ddev manages docker-compose, or upgrade it",
        ));
    }
    Ok(())
}

/// Parse `v2.36.0`, `2.36.0` or `2.36.0-desktop.1`.
pub fn parse_version(s: &str) -> Option<Version> {
    Version::parse(s.trim().trim_start_matches('v')).ok()
}

/// `docker-compose version --short`.
pub async fn query_version(path: &Path, cancel: &CancellationToken) -> Result<Version> {
    let child = tokio::process::Command::new(path)
        .args(["version", "--short"])
        .stdin(std::process::Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Error::Cancelled),
        res = tokio::time::timeout(VERSION_TIMEOUT, child) => match res {
            Ok(out) => out.map_err(|e| Error::Compose(format!("cannot run {}: {}", path.display(), e)))?,
            Err(_) => return Err(Error::Compose(format!("{} version timed out", path.display()))),
        },
    };
    if !output.status.success() {
        return Err(Error::Compose(format!(
            "{} version: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    parse_version(&text).ok_or_else(|| {
        Error::Compose(format!(
            "unrecognised docker-compose version '{}'",
            text.trim()
        ))
    })
}

fn binary_file_name() -> &'static str {
    if cfg!(windows) {
        "docker-compose.exe"
    } else {
        "docker-compose"
    }
}

/// `(binary url, checksums url)` for the running platform.
pub fn download_urls(tag: &str, os: &str, arch: &str) -> Result<(String, String)> {
    let arch = match arch {
        "x86_64" | "amd64" => "x86_64",
        "aarch64" | "arm64" => "aarch64",
        other => {
            return Err(Error::environment(
                format!("docker-compose is only available for amd64 and arm64, not {}", other),
                "Install docker-compose yourself and set use_docker_compose_from_path: true",
            ))
        }
    };
    let os = match os {
        "macos" => "darwin",
        other => other,
    };
    let ext = if os == "windows" { ".exe" } else { "" };
    Ok((
        format!("{}/{}/docker-compose-{}-{}{}", DOWNLOAD_BASE, tag, os, arch, ext),
        format!("{}/{}/checksums.txt", DOWNLOAD_BASE, tag),
    ))
}

/// Find the SHA-256 for `file_name` in a `sha256sum`-style listing.
pub fn find_checksum<'a>(listing: &'a str, file_name: &str) -> Option<&'a str> {
    listing.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let (sum, name) = (fields.next()?, fields.next()?);
        if fields.next().is_some() {
            return None;
        }
        (name.trim_start_matches('*') == file_name).then_some(sum)
    })
}

/// Verify `bytes` against the listing entry for `file_name`.
pub fn verify_checksum(bytes: &[u8], listing: &str, file_name: &str) -> std::result::Result<(), String> {
    let expected = find_checksum(listing, file_name)
        .ok_or_else(|| format!("no SHA256 for {} in checksums file", file_name))?;
    let actual = hex::encode(Sha256::digest(bytes));
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(format!("SHA256 mismatch: expected {}, got {}", expected, actual));
    }
    Ok(())
}

async fn fetch(client: &reqwest::Client, url: &str) -> std::result::Result<Vec<u8>, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    let status = resp.status();
    if !status.is_success() {
        return Err(format!("HTTP {}", status));
    }
    Ok(resp.bytes().await.map_err(|e| e.to_string())?.to_vec())
}

async fn download(tag: &str, dest: &Path, cancel: &CancellationToken) -> Result<()> {
    let (url, sums_url) = download_urls(tag, std::env::consts::OS, std::env::consts::ARCH)?;
    let file_name = url.rsplit('/').next().unwrap_or_default().to_string();
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()?;

    tracing::info!(%url, dest = %dest.display(), "downloading docker-compose");
    let mut attempt = 0;
    let bytes = loop {
        let result = async {
            let sums = fetch(&client, &sums_url).await?;
            let bytes = fetch(&client, &url).await?;
            verify_checksum(&bytes, &String::from_utf8_lossy(&sums), &file_name)?;
            Ok::<_, String>(bytes)
        };
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = result => r,
        };
        match result {
            Ok(bytes) => break bytes,
            // A bad checksum will not fix itself.
            Err(reason) if reason.starts_with("SHA256") || reason.starts_with("no SHA256") => {
                return Err(Error::Download { url, reason })
            }
            Err(reason) if attempt >= DOWNLOAD_RETRIES => return Err(Error::Download { url, reason }),
            Err(reason) => {
                attempt += 1;
                let wait = Duration::from_secs(1 << attempt);
                tracing::warn!(attempt, ?wait, "docker-compose download failed, retrying: {}", reason);
                tokio::time::sleep(wait).await;
            }
        }
    };

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    markers::atomic_write(dest, &bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755))?;
    }
    tracing::info!("docker-compose download complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_parse_with_or_without_prefix() {
        assert_eq!(parse_version("v2.36.0\n"), Some(Version::new(2, 36, 0)));
        assert_eq!(parse_version("2.24.3"), Some(Version::new(2, 24, 3)));
        assert!(parse_version("2.29.1-desktop.1").is_some());
        assert_eq!(parse_version("not a version"), None);
    }

    #[test]
    fn minimum_gate() {
        let p = Path::new("/usr/bin/docker-compose");
        assert!(check_minimum(p, &Version::new(2, 24, 3)).is_ok());
        assert!(check_minimum(p, &Version::new(2, 36, 0)).is_ok());
        assert!(check_minimum(p, &Version::new(2, 20, 0)).is_err());
        assert!(check_minimum(p, &Version::new(1, 29, 2)).is_err());
    }

    #[test]
    fn urls_per_platform() {
        let (bin, sums) = download_urls("v2.36.0", "linux", "x86_64").unwrap();
        assert_eq!(
            bin,
            "https://github.com/docker/compose/releases/download/v2.36.0/docker-compose-linux-x86_64"
        );
        assert_eq!(
            sums,
            "https://github.com/docker/compose/releases/download/v2.36.0/checksums.txt"
        );
        let (bin, _) = download_urls("v2.36.0", "macos", "aarch64").unwrap();
        assert!(bin.ends_with("docker-compose-darwin-aarch64"));
        let (bin, _) = download_urls("v2.36.0", "windows", "x86_64").unwrap();
        assert!(bin.ends_with("docker-compose-windows-x86_64.exe"));
        assert!(download_urls("v2.36.0", "linux", "riscv64").is_err());
    }

    #[test]
    fn checksums_are_matched_by_name() {
        let data = b"compose";
        let sum = hex::encode(Sha256::digest(data));
        let listing = format!(
            "deadbeef *docker-compose-darwin-x86_64\n{} *docker-compose-linux-x86_64\n",
            sum
        );
        assert!(verify_checksum(data, &listing, "docker-compose-linux-x86_64").is_ok());
        assert!(verify_checksum(data, &listing, "docker-compose-darwin-x86_64")
            .unwrap_err()
            .starts_with("SHA256 mismatch"));
        assert!(verify_checksum(data, &listing, "docker-compose-linux-aarch64").is_err());
    }
}
