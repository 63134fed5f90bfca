use crate::output::UserOutput;
use ddev::lifecycle::Lifecycle;
use ddev::{Context, Project};
use serde_json::json;

pub async fn run_list(ctx: &Context, as_json: bool, out: &dyn UserOutput) -> anyhow::Result<()> {
    let entries = Lifecycle::new(ctx).list().await?;

    if as_json {
        let list: Vec<_> = entries
            .iter()
            .map(|e| {
                json!({
                    "name": e.name,
                    "status": e.state.as_str(),
                    "approot": e.approot,
                    "url": e.url,
                })
            })
            .collect();
        out.status(&serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    if entries.is_empty() {
        out.status("No ddev projects were found.");
        return Ok(());
    }
    out.status(&format!("{:<24} {:<12} {:<40} {}", "NAME", "STATUS", "LOCATION", "URL"));
    for e in entries {
        let location = e
            .approot
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".into());
        out.status(&format!(
            "{:<24} {:<12} {:<40} {}",
            e.name,
            e.state,
            location,
            e.url.unwrap_or_default()
        ));
    }
    Ok(())
}

pub async fn run_describe(
    ctx: &Context,
    project: &Project,
    as_json: bool,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let d = Lifecycle::new(ctx).describe(project).await?;

    if as_json {
        let services: Vec<_> = d
            .services
            .iter()
            .map(|s| {
                json!({
                    "service": s.service,
                    "container": s.container,
                    "status": s.status,
                    "ports": s.ports,
                })
            })
            .collect();
        let doc = json!({
            "name": d.name,
            "approot": d.approot,
            "status": d.state.as_str(),
            "type": d.project_type,
            "php_version": d.php_version,
            "webserver_type": d.webserver_type,
            "docroot": d.docroot,
            "database": d.database,
            "performance_mode": d.performance_mode.as_str(),
            "primary_url": d.primary_url,
            "urls": d.urls,
            "mailpit_url": d.mailpit_url,
            "services": services,
            "router": d.router.to_string(),
        });
        out.status(&serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    out.status(&format!("Project: {} {} {}", d.name, d.approot.display(), d.state));
    out.status(&format!(
        "Type: {}  PHP: {}  Webserver: {}  Docroot: {}",
        d.project_type, d.php_version, d.webserver_type, d.docroot
    ));
    out.status(&format!("Database: {}  Performance mode: {}", d.database, d.performance_mode));
    out.blank();
    out.status(&format!("{:<12} {:<32} {:<12} PORTS", "SERVICE", "CONTAINER", "STATUS"));
    for s in &d.services {
        out.status(&format!(
            "{:<12} {:<32} {:<12} {}",
            s.service,
            s.container,
            s.status,
            s.ports.join(", ")
        ));
    }
    out.blank();
    out.status("URLs:");
    for url in &d.urls {
        out.status(&format!("  {}", url));
    }
    if let Some(mailpit) = &d.mailpit_url {
        out.status(&format!("Mailpit: {}", mailpit));
    }
    out.status(&format!("Router: {}", d.router));
    Ok(())
}
