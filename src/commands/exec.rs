use ddev::lifecycle::{ExecRequest, Lifecycle};
use ddev::{Context, Project};

/// Returns the command's exit code.
pub async fn run_exec(
    ctx: &Context,
    project: &Project,
    service: String,
    workdir: Option<String>,
    user: Option<String>,
    cmd: Vec<String>,
) -> anyhow::Result<i32> {
    // clap keeps a leading "--" when it separates the command
    let cmd: Vec<String> = cmd.into_iter().skip_while(|a| a == "--").collect();
    let req = ExecRequest {
        service,
        cmd,
        workdir,
        user,
    };
    Ok(Lifecycle::new(ctx).exec(project, req).await?)
}
