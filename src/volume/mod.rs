//! File transfer with named volumes through short-lived helper containers.
//!
//! Nothing here touches a volume's host-side mountpoint; every read and write
//! goes through a container of the utilities image with the volume mounted,
//! which behaves the same on rootless, remote and WSL2 engines.

use crate::docker::ephemeral::helper_name;
use crate::docker::images::UTILITIES_IMAGE;
use crate::docker::{
    human_size, run_ephemeral, ContainerEngine, ContainerSpec, DockerError, EphemeralRun,
    ExecOutput, ExecSpec, USERNS_LABEL,
};
use crate::error::{Error, Result};
use crate::host::HostProfile;
use crate::shell;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where helpers mount the volume.
const MOUNT: &str = "/mnt/v";

pub struct VolumeXfer<'a> {
    engine: &'a dyn ContainerEngine,
    host: &'a HostProfile,
}

fn target_dir(subdir: &str) -> String {
    let subdir = subdir.trim_matches('/');
    if subdir.is_empty() {
        MOUNT.to_string()
    } else {
        format!("{}/{}", MOUNT, subdir)
    }
}

impl<'a> VolumeXfer<'a> {
    pub fn new(engine: &'a dyn ContainerEngine, host: &'a HostProfile) -> Self {
        Self { engine, host }
    }

    fn helper_spec(&self, volume: &str, purpose: &str, cmd: Vec<String>) -> ContainerSpec {
        let mut spec = ContainerSpec {
            name: Some(helper_name(purpose)),
            image: UTILITIES_IMAGE.to_string(),
            cmd,
            binds: vec![format!("{}:{}", volume, MOUNT)],
            ..Default::default()
        };
        if self.host.provider.is_rootless() {
            spec.labels
                .insert(USERNS_LABEL.to_string(), "keep-id".to_string());
        }
        spec
    }

    /// Run `script` under `sh -c` in a helper with `volume` mounted and
    /// return its combined output. A non-zero exit is an error.
    pub async fn run_utility_container(
        &self,
        volume: &str,
        purpose: &str,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let spec = self.helper_spec(
            volume,
            purpose,
            vec!["sh".into(), "-c".into(), script.to_string()],
        );
        let run = EphemeralRun {
            spec,
            detach: false,
            remove_after: true,
        };
        let (_, output) = run_ephemeral(self.engine, self.host, run, cancel).await?;
        check(purpose, &output)?;
        Ok(output.combined())
    }

    /// Copy `src` (file or directory contents) into `volume/subdir`, then
    /// chown the result to `uid`.
    ///
    /// With `destroy_existing`, the subdir's current contents are removed
    /// first; the subdir itself is kept. The helper is always removed.
    #[allow(clippy::too_many_arguments)]
    pub async fn copy_into(
        &self,
        src: &Path,
        volume: &str,
        subdir: &str,
        uid: &str,
        exclusion: Option<&str>,
        destroy_existing: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let id = self.start_idle_helper(volume, "copy_into_volume", cancel).await?;
        let result = self
            .copy_with_helper(&id, src, subdir, uid, exclusion, destroy_existing, cancel)
            .await;
        self.remove_helper(&id).await;
        result
    }

    /// Copy the contents of `volume/subdir` into the host directory `dst`,
    /// creating it when missing. The helper is always removed.
    pub async fn copy_from(
        &self,
        volume: &str,
        subdir: &str,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        std::fs::create_dir_all(dst).map_err(|e| {
            Error::Filesystem(format!("Cannot create '{}': {}", dst.display(), e))
        })?;
        let id = self.start_idle_helper(volume, "copy_from_volume", cancel).await?;
        debug!(src = %target_dir(subdir), dst = %dst.display(), "copying out of volume");
        let result = self
            .engine
            .copy_from(&id, &target_dir(subdir), dst, cancel)
            .await
            .map_err(Error::from);
        self.remove_helper(&id).await;
        result
    }

    /// A detached helper that keeps `volume` mounted until removed.
    async fn start_idle_helper(
        &self,
        volume: &str,
        purpose: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let spec = self.helper_spec(volume, purpose, vec!["sleep".into(), "infinity".into()]);
        let run = EphemeralRun {
            spec,
            detach: true,
            remove_after: false,
        };
        let (id, _) = run_ephemeral(self.engine, self.host, run, cancel).await?;
        Ok(id)
    }

    async fn remove_helper(&self, id: &str) {
        let cleanup = CancellationToken::new();
        if let Err(e) = self.engine.remove_container(id, &cleanup).await {
            tracing::warn!(container = %id, "failed to remove helper container: {}", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn copy_with_helper(
        &self,
        helper: &str,
        src: &Path,
        subdir: &str,
        uid: &str,
        exclusion: Option<&str>,
        destroy_existing: bool,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let dir = shell::quote(&target_dir(subdir));
        let mut prepare = format!("mkdir -p {}", dir);
        if destroy_existing {
            prepare = format!("{} && find {} -mindepth 1 -delete", prepare, dir);
        }
        self.helper_exec(helper, "prepare volume", &prepare, cancel)
            .await?;

        debug!(src = %src.display(), dst = %target_dir(subdir), "copying into volume");
        self.engine
            .copy_into(helper, src, &target_dir(subdir), exclusion, cancel)
            .await?;

        let chown = format!("chown -R {} {}", shell::quote(uid), dir);
        self.helper_exec(helper, "chown volume contents", &chown, cancel)
            .await
    }

    async fn helper_exec(
        &self,
        helper: &str,
        what: &str,
        script: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let spec = ExecSpec {
            cmd: vec!["sh".into(), "-c".into(), script.to_string()],
            user: Some("0".into()),
            ..Default::default()
        };
        let output = self.engine.exec(helper, &spec, cancel).await?;
        check(what, &output)
    }

    /// Regular files directly under `volume/subdir`. A missing subdir is an
    /// empty list.
    pub async fn list(
        &self,
        volume: &str,
        subdir: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let dir = shell::quote(&target_dir(subdir));
        let script = format!(
            "if [ -d {dir} ]; then cd {dir} && for f in * .[!.]*; do [ -f \"$f\" ] && echo \"$f\"; done; fi; true",
            dir = dir
        );
        let out = match self
            .run_utility_container(volume, "list_volume", &script, cancel)
            .await
        {
            Ok(out) => out,
            Err(Error::Docker(DockerError::CommandFailed { stderr, .. })) => {
                tracing::warn!(volume, subdir, "unable to list volume: {}", stderr);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };
        let mut files: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        files.sort();
        Ok(files)
    }

    /// Empty each subdir, keeping the directories so inotify watches on
    /// them survive.
    pub async fn purge_contents(
        &self,
        volume: &str,
        subdirs: &[&str],
        uid: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if subdirs.is_empty() {
            return Ok(());
        }
        let steps: Vec<String> = subdirs
            .iter()
            .map(|s| {
                let dir = shell::quote(&target_dir(s));
                format!("mkdir -p {dir} && rm -rf {dir}/* && chown {} {dir}", shell::quote(uid), dir = dir)
            })
            .collect();
        self.run_utility_container(volume, "purge_volume", &steps.join(" && "), cancel)
            .await?;
        Ok(())
    }

    /// `rm -f` the named files in `volume/subdir`. An empty list does nothing.
    pub async fn remove_files(
        &self,
        volume: &str,
        subdir: &str,
        files: &[String],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if files.is_empty() {
            return Ok(());
        }
        let dir = target_dir(subdir);
        let paths: Vec<String> = files
            .iter()
            .filter(|f| !f.contains('/') && f.as_str() != ".." && f.as_str() != ".")
            .map(|f| format!("{}/{}", dir, f))
            .collect();
        let mut args = vec!["rm".to_string(), "-f".to_string()];
        args.extend(paths);
        debug!(volume, subdir, ?files, "removing files from volume");
        self.run_utility_container(volume, "remove_volume_files", &shell::join(&args), cancel)
            .await?;
        Ok(())
    }

    /// `(bytes, human readable)`; `(0, "0B")` when the engine cannot tell.
    pub async fn get_size(&self, volume: &str, cancel: &CancellationToken) -> Result<(u64, String)> {
        let bytes = self.engine.volume_size(volume, cancel).await?;
        Ok((bytes, human_size(bytes)))
    }
}

fn check(what: &str, output: &ExecOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    Err(DockerError::cmd_failed(what, output.combined().trim(), Some(output.exit_code)).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_dirs() {
        assert_eq!(target_dir(""), "/mnt/v");
        assert_eq!(target_dir("/traefik/config/"), "/mnt/v/traefik/config");
    }

    #[test]
    fn failing_output_is_an_error() {
        let ok = ExecOutput {
            exit_code: 0,
            ..Default::default()
        };
        assert!(check("x", &ok).is_ok());
        let bad = ExecOutput {
            exit_code: 2,
            stdout: String::new(),
            stderr: "chown: invalid user".into(),
        };
        let err = check("chown", &bad).unwrap_err();
        assert!(err.to_string().contains("chown: invalid user"));
    }
}
