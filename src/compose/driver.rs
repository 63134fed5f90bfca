//! Running `docker-compose` against in-memory documents.

use super::version::ComposeBinary;
use super::{ComposeProject, ServiceDef};
use crate::docker::ContainerEngine;
use crate::error::{Error, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::io::Write as _;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

const PULL_PROJECT: &str = "compose-yaml-pull";
const PULL_RETRIES: u32 = 2;
const PULL_BACKOFF: Duration = Duration::from_secs(1);

/// One compose invocation.
#[derive(Debug, Clone, Default)]
pub struct ComposeRequest {
    /// `-p` value.
    pub project_name: String,
    /// Piped on stdin via `-f -`. `None` runs without a file (e.g. `down`
    /// for a project whose config is gone).
    pub doc: Option<ComposeProject>,
    /// Subcommand and its arguments, e.g. `["up", "-d"]`.
    pub action: Vec<String>,
    pub timeout: Option<Duration>,
    /// Print a dot to stderr every second while the command runs.
    pub progress: bool,
    pub env: BTreeMap<String, String>,
}

impl ComposeRequest {
    pub fn new(project_name: impl Into<String>, doc: Option<ComposeProject>, action: &[&str]) -> Self {
        Self {
            project_name: project_name.into(),
            doc,
            action: action.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComposeOutput {
    pub stdout: String,
    /// stderr after routine progress lines were filtered out.
    pub stderr: String,
}

/// Something that can execute compose requests.
#[async_trait]
pub trait ComposeRunner: Send + Sync {
    async fn run(&self, req: &ComposeRequest, cancel: &CancellationToken) -> Result<ComposeOutput>;
}

/// [`ComposeRunner`] backed by the `docker-compose` binary.
pub struct ComposeDriver {
    binary: ComposeBinary,
}

impl ComposeDriver {
    pub fn new(binary: ComposeBinary) -> Self {
        Self { binary }
    }

    pub fn binary(&self) -> &ComposeBinary {
        &self.binary
    }
}

/// Routine compose chatter that is hidden from the user.
fn noise() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(^ *(Network|Container|Volume|Service) .* (Creat|Start|Stopp|Remov|Build|Buil|Runn|Wait|Pull|Kill)(ing|ed|t)$|.* Built$|^ *[\w.-]+ (Pulling|Pulled)$|Warning: No resource found to remove|Pulling fs layer|Waiting|Downloading|Extracting|Verifying Checksum|Download complete|Pull complete)",
        )
        .expect("static regex")
    })
}

/// Drop routine progress lines; everything else passes through verbatim.
pub fn filter_stderr(stderr: &str) -> String {
    let mut out = String::new();
    for line in stderr.lines() {
        if noise().is_match(line.trim_end()) {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[async_trait]
impl ComposeRunner for ComposeDriver {
    async fn run(&self, req: &ComposeRequest, cancel: &CancellationToken) -> Result<ComposeOutput> {
        let path = self.binary.path(cancel).await?;

        let mut args: Vec<String> = Vec::new();
        if !req.project_name.is_empty() {
            args.push("-p".into());
            args.push(req.project_name.clone());
        }
        let input = match &req.doc {
            Some(doc) => {
                args.push("-f".into());
                args.push("-".into());
                Some(doc.to_compose_yaml()?)
            }
            None => None,
        };
        args.extend(req.action.iter().cloned());

        let cmd_str = format!("{} {}", path.display(), args.join(" "));
        tracing::debug!(command = %cmd_str, "running compose");

        let mut child = tokio::process::Command::new(&path)
            .args(&args)
            .envs(&req.env)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Compose(format!("cannot run {}: {}", path.display(), e)))?;

        if let (Some(yaml), Some(mut stdin)) = (input, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(yaml.as_bytes()).await {
                    tracing::debug!("failed writing compose stdin: {}", e);
                }
            });
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let read_stdout = async move {
            let mut buf = String::new();
            if let Some(mut out) = stdout {
                let _ = out.read_to_string(&mut buf).await;
            }
            buf
        };
        // stderr is read line by line so warnings show up while compose runs.
        let read_stderr = async move {
            let mut kept = String::new();
            if let Some(err) = stderr {
                let mut lines = BufReader::new(err).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if noise().is_match(line.trim_end()) {
                        continue;
                    }
                    tracing::debug!(target: "ddev::compose", "{}", line);
                    kept.push_str(&line);
                    kept.push('\n');
                }
            }
            kept
        };

        let dots = CancellationToken::new();
        if req.progress {
            let dots = dots.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(1));
                interval.tick().await;
                loop {
                    tokio::select! {
                        _ = dots.cancelled() => break,
                        _ = interval.tick() => {
                            eprint!(".");
                            let _ = std::io::stderr().flush();
                        }
                    }
                }
            });
        }
        let _stop_dots = dots.clone().drop_guard();

        let work = async {
            let (out, err, status) = tokio::join!(read_stdout, read_stderr, child.wait());
            (out, err, status)
        };
        let timeout = req.timeout.unwrap_or(Duration::from_secs(24 * 3600));

        let (stdout, stderr, status) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = tokio::time::timeout(timeout, work) => match res {
                Ok(r) => r,
                Err(_) => {
                    return Err(Error::Compose(format!(
                        "{} timed out after {}s",
                        req.action.join(" "),
                        timeout.as_secs()
                    )))
                }
            },
        };

        let status = status.map_err(|e| Error::Compose(format!("{}: {}", cmd_str, e)))?;
        if !status.success() {
            let detail = stderr.trim();
            return Err(Error::Compose(format!(
                "{} failed ({}): {}",
                req.action.join(" "),
                status
                    .code()
                    .map(|c| format!("exit code {}", c))
                    .unwrap_or_else(|| "killed".into()),
                if detail.is_empty() { stdout.trim() } else { detail }
            )));
        }
        Ok(ComposeOutput { stdout, stderr })
    }
}

/// Compose service names allow only `[a-zA-Z0-9._-]`.
pub fn sanitize_service_name(name: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^a-zA-Z0-9._-]+").expect("static regex"));
    let replaced = re.replace_all(name, "-");
    let mut out = String::with_capacity(replaced.len());
    for c in replaced.chars() {
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }
    out.trim_matches('-').to_string()
}

fn pull_document(images: &[String]) -> ComposeProject {
    let mut doc = ComposeProject {
        name: PULL_PROJECT.to_string(),
        ..Default::default()
    };
    for image in images {
        doc.services.insert(
            sanitize_service_name(image),
            ServiceDef {
                image: Some(image.clone()),
                ..Default::default()
            },
        );
    }
    doc
}

fn is_permanent_pull_failure(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("manifest unknown")
        || msg.contains("manifest for")
        || msg.contains("not found")
        || msg.contains("pull access denied")
}

/// Pull `images` that are not present locally (all of them with `force`).
///
/// Transient failures are retried twice with exponential backoff; a missing
/// manifest fails at once.
pub async fn pull_images(
    runner: &dyn ComposeRunner,
    engine: &dyn ContainerEngine,
    images: &[String],
    force: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut wanted = Vec::new();
    for image in images {
        if image.is_empty() || wanted.contains(image) {
            continue;
        }
        if force || !engine.image_exists(image, cancel).await? {
            wanted.push(image.clone());
        }
    }
    if wanted.is_empty() {
        return Ok(());
    }

    tracing::info!(images = ?wanted, "pulling images");
    pull_with_retry(runner, &wanted, PULL_BACKOFF, cancel).await
}

async fn pull_with_retry(
    runner: &dyn ComposeRunner,
    wanted: &[String],
    backoff: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut req = ComposeRequest::new(PULL_PROJECT, Some(pull_document(wanted)), &["pull"]);
    req.env
        .insert("COMPOSE_DISABLE_ENV_FILE".into(), "1".into());

    let mut attempt = 0;
    loop {
        match runner.run(&req, cancel).await {
            Ok(_) => return Ok(()),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => {
                let reason = e.to_string();
                if attempt >= PULL_RETRIES || is_permanent_pull_failure(&reason) {
                    return Err(Error::ImagePull {
                        image: wanted.join(", "),
                        reason,
                    });
                }
                let wait = backoff * 2u32.pow(attempt);
                tracing::warn!(attempt = attempt + 1, ?wait, "image pull failed, retrying: {}", reason);
                attempt += 1;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }
}
