//! Hook execution for lifecycle phases.

use crate::context::Context;
use crate::docker::ExecSpec;
use crate::error::{Error, Result};
use crate::project::{HookAction, HookTask, Project};
use std::process::Stdio;
use tracing::{debug, info, warn};

const CODE_DIR: &str = "/var/www/html";

enum TaskError {
    Cancelled,
    Failed(String),
}

impl From<Error> for TaskError {
    fn from(e: Error) -> Self {
        match e {
            Error::Cancelled => TaskError::Cancelled,
            other => TaskError::Failed(other.to_string()),
        }
    }
}

type TaskResult = std::result::Result<(), TaskError>;

/// Short-lived runner for one project's hooks.
pub(super) struct HookRunner<'a> {
    ctx: &'a Context,
    project: &'a Project,
    fail_on_hook_fail: bool,
}

impl<'a> HookRunner<'a> {
    pub fn new(ctx: &'a Context, project: &'a Project, global_fail_on_hook_fail: bool) -> Self {
        Self {
            ctx,
            project,
            fail_on_hook_fail: project.config.fail_on_hook_fail || global_fail_on_hook_fail,
        }
    }

    /// Run the tasks of `phase` in order.
    ///
    /// A failing task aborts the phase when `fail_on_hook_fail` is set;
    /// otherwise it is reported and the next task runs.
    pub async fn run(&self, phase: &str) -> Result<()> {
        let Some(tasks) = self.project.config.hooks.get(phase) else {
            return Ok(());
        };
        for (idx, task) in tasks.iter().enumerate() {
            info!(project = self.project.name(), phase, "running task: {}", task);
            match self.run_task(task).await {
                Ok(()) => {}
                Err(TaskError::Cancelled) => return Err(Error::Cancelled),
                Err(TaskError::Failed(reason)) if self.fail_on_hook_fail => {
                    return Err(Error::Hook {
                        phase: phase.to_string(),
                        task: task.to_string(),
                        reason,
                    })
                }
                Err(TaskError::Failed(e)) => warn!(
                    project = self.project.name(),
                    phase,
                    "task #{} failed: {}: {}",
                    idx,
                    task,
                    e
                ),
            }
        }
        Ok(())
    }

    async fn run_task(&self, task: &HookTask) -> TaskResult {
        match task.action() {
            Some(HookAction::Exec { service, command }) => {
                let cmd = vec![
                    "bash".to_string(),
                    "-c".to_string(),
                    format!("set -eu && ( {} )", command),
                ];
                self.exec_in(service, cmd).await
            }
            Some(HookAction::Composer(args)) => {
                let mut cmd = vec!["composer".to_string()];
                cmd.extend(args.split_whitespace().map(String::from));
                self.exec_in("web", cmd).await
            }
            Some(HookAction::ExecHost(command)) => self.exec_host(command).await,
            None => Err(TaskError::Failed("task must set exactly one of exec, exec-host or composer".into())),
        }
    }

    async fn exec_in(&self, service: &str, cmd: Vec<String>) -> TaskResult {
        let (uid, _) = crate::host::container_ids();
        let spec = ExecSpec {
            cmd,
            user: Some(uid),
            workdir: Some(CODE_DIR.to_string()),
            ..Default::default()
        };
        let container = self.project.container_name(service);
        let output = self
            .ctx
            .engine()
            .exec(&container, &spec, self.ctx.cancel())
            .await
            .map_err(|e| TaskError::from(Error::from(e)))?;
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
        if output.success() {
            Ok(())
        } else {
            Err(TaskError::Failed(format!(
                "exit status {} in {}",
                output.exit_code, container
            )))
        }
    }

    async fn exec_host(&self, command: &str) -> TaskResult {
        debug!(command, dir = %self.project.approot.display(), "running host command");
        let mut child = tokio::process::Command::new("sh")
            .args(["-c", command])
            .current_dir(&self.project.approot)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TaskError::Failed(format!("cannot run sh: {}", e)))?;
        let status = tokio::select! {
            biased;
            _ = self.ctx.cancel().cancelled() => return Err(TaskError::Cancelled),
            status = child.wait() => status.map_err(|e| TaskError::Failed(e.to_string()))?,
        };
        if status.success() {
            Ok(())
        } else {
            Err(TaskError::Failed(format!(
                "exit status {}",
                status.code().unwrap_or(-1)
            )))
        }
    }
}
