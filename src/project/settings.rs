//! CMS settings files.
//!
//! Renderers are opaque: they turn a project into `(path, contents)` pairs
//! relative to the approot. Whether a file may be written is decided by the
//! caller through [`crate::markers`].

use super::{DatabaseKind, Project, ProjectType};
use crate::markers::GENERATED_MARKER;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettingsFile {
    /// Relative to the approot.
    pub path: PathBuf,
    pub contents: String,
}

pub trait SettingsRenderer: Send + Sync {
    fn render(&self, project: &Project, primary_url: &str) -> Vec<SettingsFile>;
}

/// Database coordinates as seen from the web container.
struct DbParams {
    driver: &'static str,
    port: u16,
}

fn db_params(kind: DatabaseKind) -> DbParams {
    match kind {
        DatabaseKind::Postgres => DbParams {
            driver: "pgsql",
            port: 5432,
        },
        _ => DbParams {
            driver: "mysql",
            port: 3306,
        },
    }
}

/// The built-in renderers, keyed by project type.
pub struct CmsSettings;

impl SettingsRenderer for CmsSettings {
    fn render(&self, project: &Project, primary_url: &str) -> Vec<SettingsFile> {
        let docroot = PathBuf::from(&project.config.docroot);
        let db = db_params(project.config.database.kind);
        match project.config.project_type {
            t if t.is_drupal() => vec![SettingsFile {
                path: docroot.join("sites/default/settings.ddev.php"),
                contents: drupal_settings(t, &db),
            }],
            ProjectType::Backdrop => vec![SettingsFile {
                path: docroot.join("settings.ddev.php"),
                contents: backdrop_settings(&db),
            }],
            ProjectType::Wordpress => vec![SettingsFile {
                path: docroot.join("wp-config-ddev.php"),
                contents: wordpress_settings(primary_url),
            }],
            ProjectType::Craftcms => vec![SettingsFile {
                path: PathBuf::from(".env.ddev"),
                contents: craft_env(primary_url, &db),
            }],
            _ => Vec::new(),
        }
    }
}

fn drupal_settings(project_type: ProjectType, db: &DbParams) -> String {
    let databases = if project_type == ProjectType::Drupal6 {
        format!(
            "$db_url = '{}://db:db@db:{}/db';\n",
            if db.driver == "pgsql" { "pgsql" } else { "mysqli" },
            db.port
        )
    } else {
        format!(
            "$databases['default']['default'] = [\n  'database' => 'db',\n  'username' => 'db',\n  'password' => 'db',\n  'host' => 'db',\n  'driver' => '{}',\n  'port' => {},\n  'prefix' => '',\n];\n",
            db.driver, db.port
        )
    };
    format!(
        "<?php\n\n/**\n * @file\n * {} Automatically generated Drupal settings file.\n * ddev manages this file and may delete or overwrite it unless this comment is removed.\n */\n\n$host = \"db\";\n$port = {};\n\n{}\n$settings['hash_salt'] = '{}';\n$settings['trusted_host_patterns'] = ['.*'];\n$settings['file_private_path'] = '../private';\n",
        GENERATED_MARKER,
        db.port,
        databases,
        "ddev-local-development-only"
    )
}

fn backdrop_settings(db: &DbParams) -> String {
    format!(
        "<?php\n/**\n * {} Automatically generated Backdrop settings.ddev.php file.\n */\n$database = '{}://db:db@db:{}/db';\n$database_prefix = '';\n$settings['trusted_host_patterns'] = array('.*');\n",
        GENERATED_MARKER, db.driver, db.port
    )
}

fn wordpress_settings(primary_url: &str) -> String {
    format!(
        "<?php\n/**\n * {} Automatically generated WordPress settings file.\n */\n\nif ( ! defined( 'DB_NAME' ) ) {{\n\tdefine( 'DB_NAME', 'db' );\n}}\ndefine( 'DB_USER', 'db' );\ndefine( 'DB_PASSWORD', 'db' );\ndefine( 'DB_HOST', 'db' );\ndefine( 'WP_HOME', '{}' );\ndefine( 'WP_SITEURL', WP_HOME );\ndefine( 'WP_DEBUG', true );\n",
        GENERATED_MARKER, primary_url
    )
}

fn craft_env(primary_url: &str, db: &DbParams) -> String {
    format!(
        "{}\nCRAFT_DB_DRIVER={}\nCRAFT_DB_SERVER=db\nCRAFT_DB_PORT={}\nCRAFT_DB_DATABASE=db\nCRAFT_DB_USER=db\nCRAFT_DB_PASSWORD=db\nPRIMARY_SITE_URL={}\n",
        GENERATED_MARKER, db.driver, db.port, primary_url
    )
}
