use ddev::docker::LogOptions;
use ddev::lifecycle::Lifecycle;
use ddev::{Context, Project};

pub async fn run_logs(
    ctx: &Context,
    project: &Project,
    service: &str,
    follow: bool,
    tail: Option<String>,
    timestamps: bool,
) -> anyhow::Result<()> {
    let options = LogOptions {
        tail,
        follow,
        timestamps,
    };
    match Lifecycle::new(ctx).logs(project, service, &options).await {
        // Ctrl-C while following is the normal way out.
        Err(ddev::Error::Cancelled) if follow => Ok(()),
        other => Ok(other?),
    }
}
