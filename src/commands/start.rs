use crate::output::UserOutput;
use ddev::lifecycle::{Lifecycle, StartOutcome};
use ddev::{Context, Project};

fn report(name: &str, outcome: StartOutcome, out: &dyn UserOutput) {
    match outcome {
        StartOutcome::Started { url } => {
            out.success(&format!("Successfully started {}", name));
            out.status(&format!("Project can be reached at {}", url));
        }
        StartOutcome::AlreadyRunning { url } => {
            out.status(&format!("{} is already running at {}", name, url));
        }
    }
}

pub async fn run_start(ctx: &Context, projects: &[Project], out: &dyn UserOutput) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new(ctx);
    for project in projects {
        out.status(&format!("Starting {}...", project.name()));
        let outcome = lifecycle.start(project).await?;
        report(project.name(), outcome, out);
    }
    Ok(())
}

pub async fn run_restart(ctx: &Context, projects: &[Project], out: &dyn UserOutput) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new(ctx);
    for project in projects {
        out.status(&format!("Restarting {}...", project.name()));
        let outcome = lifecycle.restart(project).await?;
        report(project.name(), outcome, out);
    }
    Ok(())
}
