//! Container engine backed by the `docker` CLI.
//!
//! All engine subprocesses are constructed here, with consistent timeout
//! handling, cancellation, and error mapping to [`DockerError`].

use super::{
    archive, parse_engine_info, parse_inspect, parse_network_lines, parse_volume_size,
    ContainerEngine, ContainerInfo, ContainerSpec, DockerError, EngineInfo, ExecOutput, ExecSpec,
    LabelFilter, LogOptions, NetworkInfo, VolumeSpec,
};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Timeout for quick queries (`inspect`, `ps`, `volume ls`).
const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for image pulls.
const PULL_TIMEOUT: Duration = Duration::from_secs(600);
/// Timeout for `docker cp` streams.
const COPY_TIMEOUT: Duration = Duration::from_secs(600);
/// Upper bound for attached helper containers and captured execs.
const RUN_TIMEOUT: Duration = Duration::from_secs(3600);

/// Engine client driving the `docker` CLI.
///
/// Zero-sized; construct once and share behind an `Arc<dyn ContainerEngine>`.
#[derive(Debug, Clone, Default)]
pub struct DockerClient;

impl DockerClient {
    pub fn new() -> Self {
        DockerClient
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Run a docker command with a timeout, returning raw Output.
    async fn run(
        &self,
        args: &[&str],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Output, DockerError> {
        self.run_with_input(args, None, timeout, cancel).await
    }

    /// Run a docker command, feeding `input` on stdin when given.
    ///
    /// The child is killed when the timeout elapses or `cancel` fires.
    async fn run_with_input(
        &self,
        args: &[&str],
        input: Option<Vec<u8>>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Output, DockerError> {
        let cmd_str = format!("docker {}", args.join(" "));
        tracing::debug!(command = %cmd_str, "running engine command");

        let mut command = tokio::process::Command::new("docker");
        command
            .args(args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| DockerError::exec_failed(&cmd_str, e))?;

        if let (Some(bytes), Some(mut stdin)) = (input, child.stdin.take()) {
            // Write on a separate task so a full stdout pipe can't deadlock us.
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&bytes).await {
                    tracing::debug!("failed writing engine stdin: {}", e);
                }
            });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DockerError::Cancelled { command: cmd_str }),
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => Ok(output),
                Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
                Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
            },
        }
    }

    /// Run a docker command with a timeout, returning Output only if exit 0.
    async fn run_success(
        &self,
        args: &[&str],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Output, DockerError> {
        let output = self.run(args, timeout, cancel).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let cmd_str = format!("docker {}", args.join(" "));
            Err(DockerError::failed(&cmd_str, &output))
        }
    }

    /// Run with the caller's terminal attached; returns the exit code.
    async fn run_inherited(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<i32, DockerError> {
        let cmd_str = format!("docker {}", args.join(" "));
        tracing::debug!(command = %cmd_str, "running attached engine command");
        let mut child = tokio::process::Command::new("docker")
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockerError::exec_failed(&cmd_str, e))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DockerError::Cancelled { command: cmd_str }),
            status = child.wait() => {
                let status = status.map_err(|e| DockerError::exec_failed(&cmd_str, e))?;
                Ok(status.code().unwrap_or(-1))
            }
        }
    }

    fn stdout(output: &Output) -> String {
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    fn lines(output: &Output) -> Vec<String> {
        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    async fn inspect_many(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<ContainerInfo>, DockerError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["inspect", "--type", "container"];
        args.extend(ids.iter().map(String::as_str));
        let output = self.run(&args, QUERY_TIMEOUT, cancel).await?;
        if output.status.success() {
            return parse_inspect(&Self::stdout(&output))
                .map_err(|e| DockerError::cmd_failed("docker inspect", e.to_string(), None));
        }

        // A container vanished between `ps` and `inspect`; fall back to one at a time.
        let mut found = Vec::new();
        for id in ids {
            match self.inspect_container(id, cancel).await {
                Ok(info) => found.push(info),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(found)
    }

    fn create_args(spec: &ContainerSpec) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        if let Some(name) = &spec.name {
            args.push("--name".into());
            args.push(name.clone());
        }
        if let Some(user) = &spec.user {
            args.push("--user".into());
            args.push(user.clone());
        }
        if let Some(workdir) = &spec.workdir {
            args.push("--workdir".into());
            args.push(workdir.clone());
        }
        if let Some(network) = &spec.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        if let Some(userns) = &spec.userns {
            args.push(format!("--userns={}", userns));
        }
        for (k, v) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{}={}", k, v));
        }
        for e in &spec.env {
            args.push("--env".into());
            args.push(e.clone());
        }
        for b in &spec.binds {
            args.push("--volume".into());
            args.push(b.clone());
        }
        for p in &spec.port_bindings {
            args.push("--publish".into());
            args.push(p.clone());
        }
        for h in &spec.extra_hosts {
            args.push("--add-host".into());
            args.push(h.clone());
        }
        if let Some(health_cmd) = &spec.health_cmd {
            args.push("--health-cmd".into());
            args.push(health_cmd.clone());
            args.push("--health-interval".into());
            args.push("1s".into());
        }
        args.push(spec.image.clone());
        args.extend(spec.cmd.iter().cloned());
        args
    }

    fn exec_args(container: &str, spec: &ExecSpec) -> Vec<String> {
        let mut args = vec!["exec".to_string()];
        if spec.attach {
            args.push("-i".into());
            if std::io::stdin().is_terminal() && std::io::stdout().is_terminal() {
                args.push("-t".into());
            }
        }
        if let Some(user) = &spec.user {
            args.push("--user".into());
            args.push(user.clone());
        }
        if let Some(workdir) = &spec.workdir {
            args.push("--workdir".into());
            args.push(workdir.clone());
        }
        for e in &spec.env {
            args.push("--env".into());
            args.push(e.clone());
        }
        args.push(container.to_string());
        args.extend(spec.cmd.iter().cloned());
        args
    }
}

#[async_trait]
impl ContainerEngine for DockerClient {
    // ========================================================================
    // Daemon
    // ========================================================================

    async fn info(&self, cancel: &CancellationToken) -> Result<EngineInfo, DockerError> {
        let info = self
            .run_success(&["info", "--format", "{{json .}}"], QUERY_TIMEOUT, cancel)
            .await?;
        // Only the server half matters; tolerate a failing client half.
        let version = self
            .run(&["version", "--format", "{{json .}}"], QUERY_TIMEOUT, cancel)
            .await?;
        parse_engine_info(&Self::stdout(&info), &Self::stdout(&version))
            .map_err(|e| DockerError::cmd_failed("docker info", e.to_string(), None))
    }

    async fn network_gateway(
        &self,
        network: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, DockerError> {
        let output = self
            .run(
                &[
                    "network",
                    "inspect",
                    network,
                    "--format",
                    "{{range .IPAM.Config}}{{.Gateway}} {{end}}",
                ],
                QUERY_TIMEOUT,
                cancel,
            )
            .await?;
        if !output.status.success() {
            return Ok(None);
        }
        Ok(Self::stdout(&output)
            .split_whitespace()
            .find(|g| g.parse::<std::net::Ipv4Addr>().is_ok())
            .map(str::to_string))
    }

    // ========================================================================
    // Containers
    // ========================================================================

    async fn inspect_container(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<ContainerInfo, DockerError> {
        let output = self
            .run(&["inspect", "--type", "container", name], QUERY_TIMEOUT, cancel)
            .await?;
        if !output.status.success() {
            let err = DockerError::failed(format!("docker inspect {}", name), &output);
            if err.is_not_found() {
                return Err(DockerError::ContainerNotFound {
                    container: name.to_string(),
                });
            }
            return Err(err);
        }
        parse_inspect(&Self::stdout(&output))
            .map_err(|e| DockerError::cmd_failed("docker inspect", e.to_string(), None))?
            .into_iter()
            .next()
            .ok_or_else(|| DockerError::ContainerNotFound {
                container: name.to_string(),
            })
    }

    async fn find_containers(
        &self,
        filters: &[LabelFilter],
        include_stopped: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<ContainerInfo>, DockerError> {
        let filter_args: Vec<String> = filters.iter().map(LabelFilter::to_arg).collect();
        let mut args = vec!["ps", "-q", "--no-trunc"];
        if include_stopped {
            args.push("-a");
        }
        for f in &filter_args {
            args.push("--filter");
            args.push(f);
        }
        let output = self.run_success(&args, QUERY_TIMEOUT, cancel).await?;
        let ids = Self::lines(&output);
        self.inspect_many(&ids, cancel).await
    }

    async fn image_exists(
        &self,
        image: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, DockerError> {
        match self
            .run_success(&["image", "inspect", image], QUERY_TIMEOUT, cancel)
            .await
        {
            Ok(_) => Ok(true),
            Err(DockerError::CommandFailed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn pull_image(&self, image: &str, cancel: &CancellationToken) -> Result<(), DockerError> {
        self.run_success(&["pull", image], PULL_TIMEOUT, cancel)
            .await
            .map(|_| ())
    }

    async fn create_container(
        &self,
        spec: &ContainerSpec,
        cancel: &CancellationToken,
    ) -> Result<String, DockerError> {
        let args = Self::create_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_success(&arg_refs, QUERY_TIMEOUT, cancel).await?;
        Ok(Self::stdout(&output).trim().to_string())
    }

    async fn start_container(
        &self,
        id: &str,
        attach: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<ExecOutput>, DockerError> {
        if !attach {
            self.run_success(&["start", id], QUERY_TIMEOUT, cancel).await?;
            return Ok(None);
        }
        let output = self.run(&["start", "-a", id], RUN_TIMEOUT, cancel).await?;
        Ok(Some(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: Self::stdout(&output),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }))
    }

    /// Force-remove a container. Returns `Ok(())` if container doesn't exist.
    async fn remove_container(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let output = self.run(&["rm", "-f", "-v", name], QUERY_TIMEOUT, cancel).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }
        Err(DockerError::failed("docker rm -f", &output))
    }

    // ========================================================================
    // Exec / copy / logs
    // ========================================================================

    async fn exec(
        &self,
        container: &str,
        spec: &ExecSpec,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput, DockerError> {
        let args = Self::exec_args(container, spec);
        if spec.attach {
            let exit_code = self.run_inherited(&args, cancel).await?;
            return Ok(ExecOutput {
                exit_code,
                ..Default::default()
            });
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run(&arg_refs, RUN_TIMEOUT, cancel).await?;
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() && stderr.contains("No such container") {
            return Err(DockerError::ContainerNotFound {
                container: container.to_string(),
            });
        }
        Ok(ExecOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: Self::stdout(&output),
            stderr,
        })
    }

    async fn copy_into(
        &self,
        container: &str,
        src: &Path,
        dst: &str,
        exclusion: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let src_owned = src.to_path_buf();
        let exclusion_owned = exclusion.map(str::to_string);
        let bytes = tokio::task::spawn_blocking(move || {
            archive::pack(&src_owned, exclusion_owned.as_deref())
        })
        .await
        .map_err(|e| DockerError::cmd_failed("tar", e.to_string(), None))?
        .map_err(|e| DockerError::exec_failed(format!("tar {}", src.display()), e))?;

        let target = format!("{}:{}", container, dst);
        self.run_success_with_input(&["cp", "-", &target], bytes, cancel)
            .await
            .map(|_| ())
    }

    async fn copy_from(
        &self,
        container: &str,
        src: &str,
        dst: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let source = format!("{}:{}", container, src);
        let output = self
            .run_success(&["cp", &source, "-"], COPY_TIMEOUT, cancel)
            .await?;
        let dst_owned = dst.to_path_buf();
        tokio::task::spawn_blocking(move || archive::unpack(&output.stdout, &dst_owned))
            .await
            .map_err(|e| DockerError::cmd_failed("tar", e.to_string(), None))?
            .map_err(|e| DockerError::exec_failed(format!("untar into {}", dst.display()), e))
    }

    async fn logs(
        &self,
        container: &str,
        options: &LogOptions,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let mut args = vec!["logs".to_string()];
        if let Some(tail) = &options.tail {
            args.push("--tail".into());
            args.push(tail.clone());
        }
        if options.follow {
            args.push("--follow".into());
        }
        if options.timestamps {
            args.push("--timestamps".into());
        }
        args.push(container.to_string());
        let code = self.run_inherited(&args, cancel).await?;
        if code == 0 {
            Ok(())
        } else {
            Err(DockerError::cmd_failed(
                format!("docker {}", args.join(" ")),
                "logs failed",
                Some(code),
            ))
        }
    }

    // ========================================================================
    // Networks
    // ========================================================================

    async fn list_networks(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<NetworkInfo>, DockerError> {
        let output = self
            .run_success(
                &["network", "ls", "--no-trunc", "--format", "{{json .}}"],
                QUERY_TIMEOUT,
                cancel,
            )
            .await?;
        parse_network_lines(&Self::stdout(&output))
            .map_err(|e| DockerError::cmd_failed("docker network ls", e.to_string(), None))
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let label_args: Vec<String> = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let mut args = vec!["network", "create"];
        for l in &label_args {
            args.push("--label");
            args.push(l);
        }
        args.push(name);
        self.run_success(&args, QUERY_TIMEOUT, cancel).await.map(|_| ())
    }

    async fn remove_network(&self, id: &str, cancel: &CancellationToken) -> Result<(), DockerError> {
        match self
            .run_success(&["network", "rm", id], QUERY_TIMEOUT, cancel)
            .await
        {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.map(|_| ()),
        }
    }

    // ========================================================================
    // Volume management
    // ========================================================================

    async fn create_volume(
        &self,
        spec: &VolumeSpec,
        cancel: &CancellationToken,
    ) -> Result<(), DockerError> {
        let mut args: Vec<String> = vec!["volume".into(), "create".into()];
        if let Some(driver) = &spec.driver {
            args.push("--driver".into());
            args.push(driver.clone());
        }
        for (k, v) in &spec.driver_opts {
            args.push("--opt".into());
            args.push(format!("{}={}", k, v));
        }
        for (k, v) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{}={}", k, v));
        }
        args.push(spec.name.clone());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_success(&arg_refs, QUERY_TIMEOUT, cancel).await.map(|_| ())
    }

    async fn remove_volume(&self, name: &str, cancel: &CancellationToken) -> Result<(), DockerError> {
        let output = self.run(&["volume", "rm", name], QUERY_TIMEOUT, cancel).await?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no such volume") || stderr.contains("No such volume") {
            return Ok(());
        }
        if stderr.contains("volume is in use") || stderr.contains("being used") {
            let containers = self.containers_using_volume(name, cancel).await?;
            return Err(DockerError::VolumeInUse {
                volume: name.to_string(),
                containers,
            });
        }
        Err(DockerError::failed(format!("docker volume rm {}", name), &output))
    }

    async fn volume_exists(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, DockerError> {
        let output = self
            .run(&["volume", "inspect", name], QUERY_TIMEOUT, cancel)
            .await?;
        Ok(output.status.success())
    }

    async fn volume_labels(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>, DockerError> {
        let output = self
            .run_success(
                &["volume", "inspect", "--format", "{{json .Labels}}", name],
                QUERY_TIMEOUT,
                cancel,
            )
            .await?;
        let raw = Self::stdout(&output);
        let raw = raw.trim();
        if raw.is_empty() || raw == "null" {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(raw)
            .map_err(|e| DockerError::cmd_failed("docker volume inspect", e.to_string(), None))
    }

    async fn list_volumes(
        &self,
        filters: &[LabelFilter],
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DockerError> {
        let filter_args: Vec<String> = filters.iter().map(LabelFilter::to_arg).collect();
        let mut args = vec!["volume", "ls", "-q"];
        for f in &filter_args {
            args.push("--filter");
            args.push(f);
        }
        let output = self.run_success(&args, QUERY_TIMEOUT, cancel).await?;
        Ok(Self::lines(&output))
    }

    async fn volume_size(&self, name: &str, cancel: &CancellationToken) -> Result<u64, DockerError> {
        let output = self
            .run(
                &["system", "df", "-v", "--format", "{{json .}}"],
                QUERY_TIMEOUT,
                cancel,
            )
            .await?;
        if !output.status.success() {
            tracing::debug!(
                volume = name,
                "engine does not report volume sizes: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return Ok(0);
        }
        Ok(parse_volume_size(&Self::stdout(&output), name).unwrap_or(0))
    }

    async fn containers_using_volume(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DockerError> {
        let filter = format!("volume={}", name);
        let output = self
            .run_success(
                &["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"],
                QUERY_TIMEOUT,
                cancel,
            )
            .await?;
        Ok(Self::lines(&output))
    }
}

impl DockerClient {
    async fn run_success_with_input(
        &self,
        args: &[&str],
        input: Vec<u8>,
        cancel: &CancellationToken,
    ) -> Result<Output, DockerError> {
        let output = self
            .run_with_input(args, Some(input), COPY_TIMEOUT, cancel)
            .await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(DockerError::failed(format!("docker {}", args.join(" ")), &output))
        }
    }
}
