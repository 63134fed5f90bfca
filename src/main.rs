mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use ddev::context::EnvFlags;
use ddev::lifecycle::StopOptions;
use ddev::{Context, Error as DdevError};
use output::{CliOutput, UserOutput};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    match run().await {
        Ok(0) => {}
        // `ddev exec` passes the command's exit code through.
        Ok(code) => std::process::exit(code),
        Err(e) => {
            let out = CliOutput {
                plain: EnvFlags::from_env().no_color,
            };
            if let Some(ddev_error) = e.downcast_ref::<DdevError>() {
                out.error(&format!("Error: {}", ddev_error));
                if let Some(suggestion) = ddev_error.suggestion() {
                    out.warning(&format!("\nHint: {}", suggestion));
                }
                std::process::exit(ddev_error.exit_code());
            }
            out.error(&format!("Error: {:#}", e));
            std::process::exit(1);
        }
    }
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let ctx = Context::from_env()?.with_cancel(cancel.clone());
    let flags = ctx.flags();
    let global = ctx.state().load()?;
    let plain = flags.no_color || global.simple_formatting;
    init_tracing(flags, plain);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupted; cancelling");
            cancel.cancel();
        }
    });

    let out = CliOutput { plain };
    let dir = cli.project_dir.as_deref();

    match cli.command {
        Commands::Config(args) => commands::run_config(&ctx, dir, args, &out)?,
        Commands::Start { projects, all } => {
            let projects = commands::select_projects(&ctx, dir, &projects, all, &out)?;
            commands::run_start(&ctx, &projects, &out).await?;
        }
        Commands::Stop {
            projects,
            all,
            remove_data,
            unlist,
            yes,
        } => {
            let projects = commands::select_projects(&ctx, dir, &projects, all, &out)?;
            let opts = StopOptions {
                remove_data,
                unlist,
            };
            commands::run_stop(&ctx, &projects, opts, yes, &out).await?;
        }
        Commands::Restart { projects, all } => {
            let projects = commands::select_projects(&ctx, dir, &projects, all, &out)?;
            commands::run_restart(&ctx, &projects, &out).await?;
        }
        Commands::Pause { projects, all } => {
            let projects = commands::select_projects(&ctx, dir, &projects, all, &out)?;
            commands::run_pause(&ctx, &projects, &out).await?;
        }
        Commands::Poweroff => commands::run_poweroff(&ctx, &out).await?,
        Commands::Delete { project, yes } => {
            let project = commands::named_or_current(&ctx, dir, project.as_deref())?;
            commands::run_delete(&ctx, &project, yes, &out).await?;
        }
        Commands::Exec {
            service,
            dir: workdir,
            user,
            cmd,
        } => {
            let project = commands::current_project(dir)?;
            return commands::run_exec(&ctx, &project, service, workdir, user, cmd).await;
        }
        Commands::Logs {
            service,
            follow,
            tail,
            timestamps,
        } => {
            let project = commands::current_project(dir)?;
            commands::run_logs(&ctx, &project, &service, follow, tail, timestamps).await?;
        }
        Commands::List { json } => commands::run_list(&ctx, json, &out).await?,
        Commands::Describe { project, json } => {
            let project = commands::named_or_current(&ctx, dir, project.as_deref())?;
            commands::run_describe(&ctx, &project, json, &out).await?;
        }
    }

    Ok(0)
}

/// `RUST_LOG` wins; otherwise `DDEV_VERBOSE` → trace, `DDEV_DEBUG` → debug,
/// else warn.
fn init_tracing(flags: EnvFlags, plain: bool) {
    let default = if flags.verbose {
        "trace"
    } else if flags.debug {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(!plain)
        .init();
}
