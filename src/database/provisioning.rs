// Database validation, persistence and schema provisioning

use log::{error, info, warn};
use tokio::time::timeout;

use crate::database::connection::{connect_with_timeout, ConnectionProfile, DbConnector};
use crate::database::migrations::MigrationRunner;
use crate::error::{InstallerError, Result};
use crate::installation::env_file::ConfigUpdate;
use crate::models::requests::DbCredentials;
use crate::models::responses::{DbValidation, ProvisionOutcome};
use crate::models::state::{InstallContext, InstallPhase};
use crate::security::crypto::generate_table_prefix;
use crate::utils::validation::{validate_db_host, validate_db_name};

/// Profile name used while testing candidate settings.
pub const TEMPORARY_PROFILE: &str = "install_test";

/// Try to open a connection with `creds` under a temporary profile.
///
/// Never fails: every problem is reported as [`DbValidation::Invalid`]. The temporary profile
/// and the connection are released before this returns.
pub async fn validate_database_connection(
    ctx: &InstallContext,
    connector: &dyn DbConnector,
    creds: &DbCredentials,
) -> DbValidation {
    if let Err(reason) = validate_db_host(&creds.host).and_then(|_| validate_db_name(&creds.database)) {
        info!("[PHASE: database] [STEP: validate] Rejected before connecting: {}", reason);
        return DbValidation::Invalid { reason };
    }

    let driver = match ctx.registry.default_profile() {
        Ok(p) => p.driver,
        Err(e) => {
            return DbValidation::Invalid {
                reason: e.to_string(),
            }
        }
    };

    let profile = ConnectionProfile::new(
        driver,
        creds.host.trim(),
        creds.port,
        creds.database.as_str(),
        creds.username.as_str(),
        creds.password.as_str(),
    );

    let guard = match ctx.registry.register_temporary(TEMPORARY_PROFILE, profile) {
        Ok(g) => g,
        Err(e) => {
            warn!("[PHASE: database] [STEP: validate] {}", e);
            return DbValidation::Invalid {
                reason: e.to_string(),
            };
        }
    };

    info!(
        "[PHASE: database] [STEP: validate] Testing connection ({})",
        guard.profile().masked()
    );

    let result = match connect_with_timeout(connector, guard.profile()).await {
        Ok(conn) => {
            conn.close().await;
            info!("[PHASE: database] [STEP: validate] Connection succeeded");
            DbValidation::Valid
        }
        Err(e) => {
            warn!(
                "[PHASE: database] [STEP: validate] Connection failed: {}",
                e.internal_details
            );
            DbValidation::Invalid {
                reason: e.user_message,
            }
        }
    };

    drop(guard);
    if result.is_valid() {
        ctx.advance(InstallPhase::DbValidated);
    }
    result
}

/// Write the database settings to `.env`, point the default profile at them and reconnect.
///
/// Returns the table prefix in use, generated when none was supplied.
pub async fn persist_database_settings(
    ctx: &InstallContext,
    connector: &dyn DbConnector,
    creds: &DbCredentials,
) -> Result<String> {
    let prefix = match creds.explicit_prefix() {
        Some(p) => p.to_string(),
        None => generate_table_prefix()?,
    };

    let entries = [
        ("DB_HOST", creds.host.clone()),
        ("DB_PORT", creds.port.to_string()),
        ("DB_DATABASE", creds.database.clone()),
        ("DB_USERNAME", creds.username.clone()),
        ("DB_PASSWORD", format!("\"{}\"", creds.password)),
        ("DB_PREFIX", prefix.clone()),
    ];
    match ctx.env.update(entries).await? {
        ConfigUpdate::Applied { .. } => {}
        ConfigUpdate::MissingFile => warn!(
            "[PHASE: database] [STEP: persist] {:?} is missing; settings kept for this process only",
            ctx.env.path()
        ),
    }

    let default_name = ctx.registry.default_name().to_string();
    ctx.registry.update_profile(&default_name, |p| {
        p.host = creds.host.clone();
        p.port = creds.port;
        p.database = creds.database.clone();
        p.username = creds.username.clone();
        p.password = creds.password.clone();
        p.prefix = prefix.clone();
    })?;

    ctx.registry.purge(&default_name).await;
    ctx.registry.reconnect(&default_name, connector).await?;

    info!(
        "[PHASE: database] [STEP: persist] Database settings persisted (prefix={})",
        prefix
    );
    ctx.advance(InstallPhase::DbPersisted);
    Ok(prefix)
}

/// Validate, persist, then migrate and seed within the provisioning budget.
///
/// Invalid settings give [`ProvisionOutcome::Rejected`] with nothing written. Once persisted,
/// a migration or seed failure (or running out of time) is an error; nothing is rolled back.
pub async fn provision_schema(
    ctx: &InstallContext,
    connector: &dyn DbConnector,
    runner: &dyn MigrationRunner,
    creds: &DbCredentials,
) -> Result<ProvisionOutcome> {
    if let DbValidation::Invalid { reason } = validate_database_connection(ctx, connector, creds).await {
        return Ok(ProvisionOutcome::Rejected { reason });
    }

    let prefix = persist_database_settings(ctx, connector, creds).await?;

    let budget = ctx.settings.database.provision_budget();
    let seed_class = ctx.settings.database.seed_class.as_str();
    let work = async {
        runner.migrate().await?;
        runner.seed(seed_class).await
    };

    match timeout(budget, work).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("[PHASE: database] [STEP: provision] {}", e);
            return Err(e);
        }
        Err(_) => {
            error!(
                "[PHASE: database] [STEP: provision] Time budget of {}s exhausted",
                budget.as_secs()
            );
            return Err(InstallerError::BudgetExceeded(budget.as_secs()));
        }
    }

    info!(
        "[PHASE: database] [STEP: provision] Schema provisioned (prefix={})",
        prefix
    );
    ctx.advance(InstallPhase::SchemaProvisioned);
    Ok(ProvisionOutcome::Provisioned { prefix })
}
