mod config;
mod exec;
mod list;
mod logs;
mod start;
mod stop;

pub use config::run_config;
pub use exec::run_exec;
pub use list::{run_describe, run_list};
pub use logs::run_logs;
pub use start::{run_restart, run_start};
pub use stop::{run_delete, run_pause, run_poweroff, run_stop};

use crate::output::UserOutput;
use ddev::{Context, Error, Project};
use std::path::{Path, PathBuf};

/// The directory commands without a project name act on.
pub fn working_dir(project_dir: Option<&Path>) -> ddev::Result<PathBuf> {
    match project_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(std::env::current_dir()?),
    }
}

pub fn current_project(project_dir: Option<&Path>) -> ddev::Result<Project> {
    let root = Project::find_approot(&working_dir(project_dir)?)?;
    Project::load(&root)
}

fn by_name(ctx: &Context, name: &str) -> ddev::Result<Project> {
    let global = ctx.state().load()?;
    let entry = global
        .project_list
        .get(name)
        .ok_or_else(|| Error::ProjectNotFound(format!("no project named '{}'", name)))?;
    Project::load(&entry.approot)
}

/// The named project, or the current one when no name is given.
pub fn named_or_current(
    ctx: &Context,
    project_dir: Option<&Path>,
    name: Option<&str>,
) -> ddev::Result<Project> {
    match name {
        Some(name) => by_name(ctx, name),
        None => current_project(project_dir),
    }
}

/// Projects a multi-project command acts on.
pub fn select_projects(
    ctx: &Context,
    project_dir: Option<&Path>,
    names: &[String],
    all: bool,
    out: &dyn UserOutput,
) -> ddev::Result<Vec<Project>> {
    if all {
        let mut projects = Vec::new();
        for (name, root) in ctx.state().projects()? {
            match Project::load(&root) {
                Ok(p) => projects.push(p),
                Err(e) => out.warning(&format!("Skipping {}: {}", name, e)),
            }
        }
        return Ok(projects);
    }
    if names.is_empty() {
        return Ok(vec![current_project(project_dir)?]);
    }
    names.iter().map(|name| by_name(ctx, name)).collect()
}

/// Ask a yes/no question; `--yes` and `DDEV_NONINTERACTIVE` answer yes.
pub fn confirm(ctx: &Context, question: &str, yes: bool, out: &dyn UserOutput) -> anyhow::Result<bool> {
    if yes || ctx.flags().noninteractive {
        return Ok(true);
    }
    out.progress(&format!("{} [y/N] ", question));
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y") || input.trim().eq_ignore_ascii_case("yes"))
}
