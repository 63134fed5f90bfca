use super::confirm;
use crate::output::UserOutput;
use ddev::lifecycle::{Lifecycle, StopOptions};
use ddev::{Context, Error, Project};

pub async fn run_stop(
    ctx: &Context,
    projects: &[Project],
    opts: StopOptions,
    yes: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    if opts.remove_data {
        let names: Vec<&str> = projects.iter().map(|p| p.name()).collect();
        let question = format!(
            "This removes all data, including the database, of: {}. Continue?",
            names.join(", ")
        );
        if !confirm(ctx, &question, yes, out)? {
            return Err(Error::Aborted.into());
        }
    }
    let lifecycle = Lifecycle::new(ctx);
    for project in projects {
        out.status(&format!("Stopping {}...", project.name()));
        lifecycle.stop(project, opts).await?;
        let detail = if opts.remove_data {
            " and removed its data"
        } else if opts.unlist {
            " and removed it from the project list"
        } else {
            ""
        };
        out.success(&format!("Stopped {}{}", project.name(), detail));
    }
    Ok(())
}

pub async fn run_pause(ctx: &Context, projects: &[Project], out: &dyn UserOutput) -> anyhow::Result<()> {
    let lifecycle = Lifecycle::new(ctx);
    for project in projects {
        lifecycle.pause(project).await?;
        out.success(&format!("Paused {}", project.name()));
    }
    Ok(())
}

pub async fn run_poweroff(ctx: &Context, out: &dyn UserOutput) -> anyhow::Result<()> {
    out.status("Stopping all projects and the router...");
    Lifecycle::new(ctx).poweroff().await?;
    out.success("All ddev containers have been removed");
    Ok(())
}

pub async fn run_delete(
    ctx: &Context,
    project: &Project,
    yes: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let question = format!(
        "Delete {} at {}? Containers, volumes and the database are removed; project files stay.",
        project.name(),
        project.approot.display()
    );
    if !confirm(ctx, &question, yes, out)? {
        return Err(Error::Aborted.into());
    }
    Lifecycle::new(ctx).delete(project).await?;
    out.success(&format!("Deleted {}", project.name()));
    Ok(())
}
