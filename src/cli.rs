use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ddev")]
#[command(about = "Local web development environments in containers")]
pub struct Cli {
    /// Project root (defaults to the nearest directory with .ddev/config.yaml)
    #[arg(long, global = true, value_name = "DIR")]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update .ddev/config.yaml
    Config(ConfigArgs),
    /// Start projects
    Start {
        /// Project names (defaults to the current project)
        projects: Vec<String>,
        /// Start every registered project
        #[arg(short, long, conflicts_with = "projects")]
        all: bool,
    },
    /// Stop projects and remove their containers
    Stop {
        /// Project names (defaults to the current project)
        projects: Vec<String>,
        /// Stop every registered project
        #[arg(short, long, conflicts_with = "projects")]
        all: bool,
        /// Also remove the project's volumes, including the database
        #[arg(long)]
        remove_data: bool,
        /// Remove the project from the global project list
        #[arg(long)]
        unlist: bool,
        /// Skip confirmation prompts
        #[arg(short, long)]
        yes: bool,
    },
    /// Stop and start projects
    Restart {
        projects: Vec<String>,
        #[arg(short, long, conflicts_with = "projects")]
        all: bool,
    },
    /// Stop containers without removing them
    Pause {
        projects: Vec<String>,
        #[arg(short, long, conflicts_with = "projects")]
        all: bool,
    },
    /// Stop all projects and the router
    Poweroff,
    /// Remove a project's containers, volumes and router entries
    Delete {
        /// Project name (defaults to the current project)
        project: Option<String>,
        /// Skip confirmation prompts
        #[arg(short, long)]
        yes: bool,
    },
    /// Run a command in a service container
    Exec {
        /// Service to run in
        #[arg(short, long, default_value = "web")]
        service: String,
        /// Working directory inside the container
        #[arg(short = 'd', long = "dir")]
        dir: Option<String>,
        /// User inside the container (defaults to your uid)
        #[arg(short, long)]
        user: Option<String>,
        /// Command and arguments (defaults to an interactive shell)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Show a service container's logs
    Logs {
        #[arg(short, long, default_value = "web")]
        service: String,
        /// Follow log output
        #[arg(short, long)]
        follow: bool,
        /// Number of lines to show from the end
        #[arg(long, value_name = "N")]
        tail: Option<String>,
        /// Show timestamps
        #[arg(short, long)]
        timestamps: bool,
    },
    /// List projects
    #[command(alias = "ls")]
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show details of a project
    Describe {
        /// Project name (defaults to the current project)
        project: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Default)]
pub struct ConfigArgs {
    /// Project name (defaults to the directory name)
    #[arg(long)]
    pub project_name: Option<String>,
    /// Project type, e.g. php, drupal10, wordpress
    #[arg(long)]
    pub project_type: Option<String>,
    /// Document root relative to the project root
    #[arg(long)]
    pub docroot: Option<String>,
    #[arg(long)]
    pub php_version: Option<String>,
    /// nginx-fpm, apache-fpm, nginx-gunicorn or generic
    #[arg(long)]
    pub webserver_type: Option<String>,
    /// Database as TYPE:VERSION, e.g. mariadb:10.11
    #[arg(long)]
    pub database: Option<String>,
    /// global, none, mutagen or nfs
    #[arg(long)]
    pub performance_mode: Option<String>,
    /// Comma-separated hostnames under the project TLD
    #[arg(long, value_delimiter = ',')]
    pub additional_hostnames: Option<Vec<String>>,
    /// Comma-separated fully qualified hostnames
    #[arg(long, value_delimiter = ',')]
    pub additional_fqdns: Option<Vec<String>>,
    #[arg(long)]
    pub project_tld: Option<String>,
    #[arg(long)]
    pub router_http_port: Option<u32>,
    #[arg(long)]
    pub router_https_port: Option<u32>,
    #[arg(long)]
    pub host_db_port: Option<u32>,
    #[arg(long)]
    pub host_webserver_port: Option<u32>,
    #[arg(long)]
    pub host_https_port: Option<u32>,
    /// Comma-separated: db, ddev-router, ddev-ssh-agent
    #[arg(long, value_delimiter = ',')]
    pub omit_containers: Option<Vec<String>>,
    /// Seconds to wait for containers to become healthy
    #[arg(long)]
    pub default_container_timeout: Option<u64>,
    #[arg(long)]
    pub disable_settings_management: Option<bool>,
    #[arg(long)]
    pub mailpit_enabled: Option<bool>,
}
