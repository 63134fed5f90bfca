use super::working_dir;
use crate::cli::ConfigArgs;
use crate::output::UserOutput;
use ddev::lifecycle::{ConfigureOptions, Lifecycle};
use ddev::project::{DatabaseKind, DatabaseSpec, PerformanceMode, ProjectType, WebserverType};
use ddev::{Context, Error, Project};
use std::path::Path;

fn invalid(what: &str, value: &str, allowed: &str) -> Error {
    Error::Validation(format!("invalid {} '{}'; expected {}", what, value, allowed))
}

fn parse_database(s: &str) -> ddev::Result<DatabaseSpec> {
    let (kind, version) = s
        .split_once(':')
        .ok_or_else(|| invalid("database", s, "TYPE:VERSION"))?;
    let kind = match kind {
        "mariadb" => DatabaseKind::Mariadb,
        "mysql" => DatabaseKind::Mysql,
        "postgres" => DatabaseKind::Postgres,
        _ => return Err(invalid("database type", kind, "mariadb, mysql or postgres")),
    };
    Ok(DatabaseSpec {
        kind,
        version: version.to_string(),
    })
}

/// Turn command-line flags into configuration changes.
pub fn options_from_args(args: ConfigArgs) -> ddev::Result<ConfigureOptions> {
    let project_type = args
        .project_type
        .map(|t| {
            ProjectType::parse(&t).ok_or_else(|| {
                let all: Vec<&str> = ProjectType::ALL.iter().map(|t| t.as_str()).collect();
                invalid("project type", &t, &all.join(", "))
            })
        })
        .transpose()?;
    let webserver_type = args
        .webserver_type
        .map(|w| {
            WebserverType::parse(&w).ok_or_else(|| {
                invalid("webserver type", &w, "nginx-fpm, apache-fpm, nginx-gunicorn or generic")
            })
        })
        .transpose()?;
    let performance_mode = args
        .performance_mode
        .map(|m| {
            PerformanceMode::parse(&m)
                .ok_or_else(|| invalid("performance mode", &m, "global, none, mutagen or nfs"))
        })
        .transpose()?;
    let database = args.database.as_deref().map(parse_database).transpose()?;

    Ok(ConfigureOptions {
        name: args.project_name,
        project_type,
        docroot: args.docroot,
        php_version: args.php_version,
        webserver_type,
        database,
        performance_mode,
        additional_hostnames: args.additional_hostnames,
        additional_fqdns: args.additional_fqdns,
        project_tld: args.project_tld,
        router_http_port: args.router_http_port,
        router_https_port: args.router_https_port,
        host_db_port: args.host_db_port,
        host_webserver_port: args.host_webserver_port,
        host_https_port: args.host_https_port,
        omit_containers: args.omit_containers,
        default_container_timeout: args.default_container_timeout,
        disable_settings_management: args.disable_settings_management,
        mailpit_enabled: args.mailpit_enabled,
    })
}

pub fn run_config(
    ctx: &Context,
    project_dir: Option<&Path>,
    args: ConfigArgs,
    out: &dyn UserOutput,
) -> anyhow::Result<()> {
    let dir = working_dir(project_dir)?;
    let approot = Project::find_approot(&dir).unwrap_or(dir);
    let project = Lifecycle::new(ctx).configure(&approot, options_from_args(args)?)?;
    out.success(&format!(
        "Configuration complete. You may now run 'ddev start' in {}",
        project.approot.display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_needs_type_and_version() {
        let db = parse_database("postgres:16").unwrap();
        assert_eq!(db.kind, DatabaseKind::Postgres);
        assert_eq!(db.version, "16");
        assert!(parse_database("mariadb").is_err());
        assert!(parse_database("oracle:19").is_err());
    }

    #[test]
    fn unknown_project_type_is_a_validation_error() {
        let args = ConfigArgs {
            project_type: Some("joomla".into()),
            ..Default::default()
        };
        assert!(matches!(options_from_args(args), Err(Error::Validation(_))));
    }
}
