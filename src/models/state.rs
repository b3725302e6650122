// Install context
//
// Everything the installer operations share: where the application lives, its settings, the
// `.env` handle, the live connection registry and the caller's request data (locale, base URL).

use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use url::Url;

use crate::database::connection::{ConnectionProfile, Driver};
use crate::database::registry::ConnectionRegistry;
use crate::error::Result;
use crate::installation::env_file::EnvFile;
use crate::settings::InstallerSettings;

/// Steps of a full install, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallPhase {
    Unchecked,
    EnvChecked,
    ConfigSeeded,
    DbValidated,
    DbPersisted,
    SchemaProvisioned,
    TenantCreated,
    UserCreated,
    Finalized,
}

impl InstallPhase {
    /// Phase that normally has to be reached before `self` is entered.
    pub fn predecessor(self) -> Option<InstallPhase> {
        use InstallPhase::*;
        match self {
            Unchecked => None,
            EnvChecked => Some(Unchecked),
            ConfigSeeded => Some(EnvChecked),
            DbValidated => Some(ConfigSeeded),
            DbPersisted => Some(DbValidated),
            SchemaProvisioned => Some(DbPersisted),
            TenantCreated => Some(SchemaProvisioned),
            UserCreated => Some(TenantCreated),
            Finalized => Some(UserCreated),
        }
    }
}

impl fmt::Display for InstallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstallPhase::Unchecked => "unchecked",
            InstallPhase::EnvChecked => "env_checked",
            InstallPhase::ConfigSeeded => "config_seeded",
            InstallPhase::DbValidated => "db_validated",
            InstallPhase::DbPersisted => "db_persisted",
            InstallPhase::SchemaProvisioned => "schema_provisioned",
            InstallPhase::TenantCreated => "tenant_created",
            InstallPhase::UserCreated => "user_created",
            InstallPhase::Finalized => "finalized",
        };
        f.write_str(s)
    }
}

pub struct InstallContext {
    pub base_path: PathBuf,
    pub settings: InstallerSettings,
    pub env: EnvFile,
    pub registry: Arc<ConnectionRegistry>,
    /// Session locale written as `APP_LOCALE`.
    pub locale: String,
    /// Base URL of the inbound request, if the installer is serving one.
    pub base_url: Option<Url>,
    phase: Mutex<InstallPhase>,
}

impl InstallContext {
    /// Build a context around an existing registry.
    pub fn new(
        base_path: &Path,
        settings: InstallerSettings,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        let env = EnvFile::new(base_path.join(&settings.env_file));
        let locale = settings.default_locale.clone();
        Self {
            base_path: base_path.to_path_buf(),
            settings,
            env,
            registry,
            locale,
            base_url: None,
            phase: Mutex::new(InstallPhase::Unchecked),
        }
    }

    /// Build a context whose default connection profile comes from the current `.env`.
    ///
    /// `DB_CONNECTION` names both the default profile and its driver; without it the configured
    /// driver and connection name apply. Missing keys fall back to the driver defaults and a
    /// missing `.env` yields an empty profile.
    pub async fn load(base_path: &Path, settings: InstallerSettings) -> Result<Self> {
        let env = EnvFile::new(base_path.join(&settings.env_file));
        let env_exists = env.exists().await;
        let app_connection = if env_exists {
            env.get("DB_CONNECTION")
                .await?
                .map(|c| unquote(c.trim()).to_string())
                .filter(|c| !c.is_empty())
        } else {
            None
        };
        let (default_name, driver) = match app_connection {
            Some(name) => {
                let driver: Driver = name.parse()?;
                (name, driver)
            }
            None => (
                settings.database.default_connection.clone(),
                settings.database.driver.parse()?,
            ),
        };

        let profile = if env_exists {
            profile_from_env(&env, driver).await?
        } else {
            ConnectionProfile::new(driver, "127.0.0.1", driver.default_port(), "", "", "")
        };

        info!(
            "[PHASE: initialization] [STEP: context] Default connection '{}' ({})",
            default_name,
            profile.masked()
        );
        let registry = ConnectionRegistry::new(default_name, profile);
        Ok(Self::new(base_path, settings, registry))
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.base_path.join(relative)
    }

    pub fn phase(&self) -> InstallPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record that `next` has been reached. Out-of-order steps are allowed but logged.
    pub fn advance(&self, next: InstallPhase) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(expected) = next.predecessor() {
            if *phase < expected {
                warn!(
                    "[PHASE: {}] [STEP: state] Entered before '{}' was reached (current={})",
                    next, expected, *phase
                );
            }
        }
        if next > *phase {
            *phase = next;
        }
    }
}

async fn profile_from_env(env: &EnvFile, driver: Driver) -> Result<ConnectionProfile> {
    let host = env.get("DB_HOST").await?.unwrap_or_else(|| "127.0.0.1".to_string());
    let port = env
        .get("DB_PORT")
        .await?
        .and_then(|p| p.trim().parse::<u16>().ok())
        .unwrap_or_else(|| driver.default_port());
    let database = env.get("DB_DATABASE").await?.unwrap_or_default();
    let username = env.get("DB_USERNAME").await?.unwrap_or_default();
    let password = env
        .get("DB_PASSWORD")
        .await?
        .map(|p| unquote(&p).to_string())
        .unwrap_or_default();

    let mut profile = ConnectionProfile::new(driver, host, port, database, username, password);
    profile.prefix = env.get("DB_PREFIX").await?.unwrap_or_default();
    Ok(profile)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phases_are_ordered() {
        assert!(InstallPhase::Unchecked < InstallPhase::Finalized);
        assert_eq!(
            InstallPhase::DbPersisted.predecessor(),
            Some(InstallPhase::DbValidated)
        );
        assert_eq!(InstallPhase::Unchecked.predecessor(), None);
    }

    #[tokio::test]
    async fn advance_never_moves_backwards() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = InstallContext::load(dir.path(), InstallerSettings::default())
            .await
            .unwrap();
        assert_eq!(ctx.phase(), InstallPhase::Unchecked);

        ctx.advance(InstallPhase::DbValidated);
        assert_eq!(ctx.phase(), InstallPhase::DbValidated);
        ctx.advance(InstallPhase::EnvChecked);
        assert_eq!(ctx.phase(), InstallPhase::DbValidated);
    }

    #[tokio::test]
    async fn load_reads_default_profile_from_env_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "APP_NAME=Shop\nDB_HOST=db.internal\nDB_PORT=3307\nDB_DATABASE=shop\nDB_USERNAME=shop\nDB_PASSWORD=\"p@ss word\"\nDB_PREFIX=ab1_\n",
        )
        .unwrap();

        let ctx = InstallContext::load(dir.path(), InstallerSettings::default())
            .await
            .unwrap();
        let profile = ctx.registry.default_profile().unwrap();
        assert_eq!(profile.host, "db.internal");
        assert_eq!(profile.port, 3307);
        assert_eq!(profile.database, "shop");
        assert_eq!(profile.password, "p@ss word");
        assert_eq!(profile.prefix, "ab1_");
        assert_eq!(profile.charset, "utf8mb4");
        assert_eq!(ctx.registry.default_name(), "mysql");
    }

    #[tokio::test]
    async fn load_takes_driver_and_profile_name_from_db_connection() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".env"),
            "DB_CONNECTION=pgsql\nDB_HOST=pg.internal\nDB_DATABASE=books\nDB_USERNAME=books\n",
        )
        .unwrap();

        let ctx = InstallContext::load(dir.path(), InstallerSettings::default())
            .await
            .unwrap();
        let profile = ctx.registry.default_profile().unwrap();
        assert_eq!(ctx.registry.default_name(), "pgsql");
        assert_eq!(profile.driver, Driver::Postgres);
        assert_eq!(profile.port, 5432);
        assert_eq!(profile.charset, "utf8");
        assert_eq!(profile.host, "pg.internal");
    }

    #[tokio::test]
    async fn empty_db_connection_falls_back_to_settings() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "DB_CONNECTION=\nDB_DATABASE=shop\n").unwrap();
        let mut settings = InstallerSettings::default();
        settings.database.driver = "pgsql".to_string();
        settings.database.default_connection = "main".to_string();

        let ctx = InstallContext::load(dir.path(), settings).await.unwrap();
        assert_eq!(ctx.registry.default_name(), "main");
        assert_eq!(ctx.registry.default_profile().unwrap().driver, Driver::Postgres);
    }

    #[tokio::test]
    async fn unsupported_db_connection_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "DB_CONNECTION=sqlsrv\n").unwrap();
        assert!(InstallContext::load(dir.path(), InstallerSettings::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn load_without_env_file_uses_driver_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = InstallerSettings::default();
        settings.database.driver = "pgsql".to_string();
        let ctx = InstallContext::load(dir.path(), settings).await.unwrap();
        let profile = ctx.registry.default_profile().unwrap();
        assert_eq!(profile.driver, Driver::Postgres);
        assert_eq!(profile.port, 5432);
        assert_eq!(ctx.locale, "en-GB");
    }

    #[tokio::test]
    async fn unsupported_driver_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = InstallerSettings::default();
        settings.database.driver = "sqlsrv".to_string();
        assert!(InstallContext::load(dir.path(), settings).await.is_err());
    }

    #[test]
    fn unquote_strips_one_pair_of_quotes() {
        assert_eq!(unquote("\"abc\""), "abc");
        assert_eq!(unquote("abc"), "abc");
        assert_eq!(unquote("\"abc"), "\"abc");
    }
}
