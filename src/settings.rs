// Installer settings
//
// Layered with the `config` crate: built-in defaults, then an optional `installer.toml`
// next to the application, then `APP_INSTALLER__*` environment variables
// (e.g. `APP_INSTALLER__DATABASE__DRIVER=pgsql`).

use crate::error::Result;
use config::{Config, Environment, File, FileFormat};
use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE_NAME: &str = "installer.toml";
pub const ENV_PREFIX: &str = "APP_INSTALLER";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallerSettings {
    /// Active configuration file, relative to the base path.
    pub env_file: String,
    /// Template renamed to `env_file` on first run.
    pub env_template: String,
    pub robots_dist: String,
    pub robots_file: String,
    /// PHP binary used for the runtime probe; resolved through `PATH`.
    pub php_binary: String,
    /// Locale used when the caller has no session locale.
    pub default_locale: String,
    /// Overrides the resolved log folder.
    pub log_dir: Option<PathBuf>,
    pub console: ConsoleSettings,
    pub database: DatabaseSettings,
    pub jobs: JobSettings,
}

/// How to reach the application's console (`php artisan`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsoleSettings {
    pub program: String,
    pub args: Vec<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Name of the application's default connection profile.
    pub default_connection: String,
    /// Driver of the default connection (`mysql` or `pgsql`).
    pub driver: String,
    pub connect_timeout_secs: u64,
    pub max_connections: u32,
    /// Time budget for migrations + seeding.
    pub provision_budget_secs: u64,
    pub seed_class: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub company_command: String,
    pub user_command: String,
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            env_file: ".env".to_string(),
            env_template: ".env.example".to_string(),
            robots_dist: "robots.txt.dist".to_string(),
            robots_file: "robots.txt".to_string(),
            php_binary: "php".to_string(),
            default_locale: "en-GB".to_string(),
            log_dir: None,
            console: ConsoleSettings::default(),
            database: DatabaseSettings::default(),
            jobs: JobSettings::default(),
        }
    }
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            program: "php".to_string(),
            args: vec!["artisan".to_string()],
            timeout_secs: 120,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            default_connection: "mysql".to_string(),
            driver: "mysql".to_string(),
            connect_timeout_secs: 20,
            max_connections: 5,
            provision_budget_secs: 300,
            seed_class: "Database\\Seeds\\Permissions".to_string(),
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            company_command: "installer:create-company".to_string(),
            user_command: "installer:create-user".to_string(),
        }
    }
}

impl ConsoleSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DatabaseSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn provision_budget(&self) -> Duration {
        Duration::from_secs(self.provision_budget_secs)
    }
}

impl InstallerSettings {
    /// Load settings for an application rooted at `base_path`.
    ///
    /// `explicit` replaces the default `<base_path>/installer.toml` and must exist when given.
    pub fn load(base_path: &Path, explicit: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match explicit {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml).required(true)),
            None => builder.add_source(
                File::from(base_path.join(SETTINGS_FILE_NAME))
                    .format(FileFormat::Toml)
                    .required(false),
            ),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(" ")
                .with_list_parse_key("console.args")
                .try_parsing(true),
        );

        let settings: InstallerSettings = builder.build()?.try_deserialize()?;
        info!(
            "[PHASE: initialization] [STEP: settings] Settings loaded (env_file={}, driver={}, console={} {})",
            settings.env_file,
            settings.database.driver,
            settings.console.program,
            settings.console.args.join(" ")
        );
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_application_layout() {
        let s = InstallerSettings::default();
        assert_eq!(s.env_file, ".env");
        assert_eq!(s.env_template, ".env.example");
        assert_eq!(s.console.program, "php");
        assert_eq!(s.console.args, vec!["artisan".to_string()]);
        assert_eq!(s.database.provision_budget(), Duration::from_secs(300));
        assert_eq!(s.database.seed_class, "Database\\Seeds\\Permissions");
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let s = InstallerSettings::load(dir.path(), None).unwrap();
        assert_eq!(s.database.default_connection, "mysql");
        assert_eq!(s.robots_dist, "robots.txt.dist");
    }

    #[test]
    fn load_reads_partial_toml_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(SETTINGS_FILE_NAME),
            "default_locale = \"de-DE\"\n[database]\ndriver = \"pgsql\"\nprovision_budget_secs = 600\n",
        )
        .unwrap();

        let s = InstallerSettings::load(dir.path(), None).unwrap();
        assert_eq!(s.default_locale, "de-DE");
        assert_eq!(s.database.driver, "pgsql");
        assert_eq!(s.database.provision_budget_secs, 600);
        // Untouched sections keep their defaults
        assert_eq!(s.database.connect_timeout_secs, 20);
        assert_eq!(s.console.program, "php");
    }

    #[test]
    fn load_with_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(InstallerSettings::load(dir.path(), Some(&missing)).is_err());
    }
}
