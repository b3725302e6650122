// Installer orchestration
//
// Each operation is one step of the install; `run` chains them in order for unattended
// installs and reports progress between steps.

use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use url::Url;

use crate::database::connection::{DbConnector, RealDbConnector};
use crate::database::migrations::{ConsoleMigrationRunner, MigrationRunner};
use crate::database::provisioning;
use crate::error::{InstallerError, Result};
use crate::installation::console::Console;
use crate::installation::env_file::ConfigUpdate;
use crate::installation::files::best_effort_rename;
use crate::installation::finalize::apply_final_touches;
use crate::installation::requirements::{self, PhpRuntimeProbe, RequirementIssue, RuntimeProbe};
use crate::jobs::{ConsoleJobDispatcher, JobDispatcher};
use crate::models::requests::{CompanyRequest, DbCredentials, InstallPlan, UserRequest};
use crate::models::responses::{DbValidation, InstallReport, ProgressPayload, ProvisionOutcome};
use crate::models::state::{InstallContext, InstallPhase};
use crate::security::crypto::{generate_app_key, secret_fingerprint};
use crate::settings::InstallerSettings;

pub type ProgressEmitter = Arc<dyn Fn(ProgressPayload) + Send + Sync>;

pub struct Installer {
    ctx: InstallContext,
    probe: Arc<dyn RuntimeProbe>,
    connector: Arc<dyn DbConnector>,
    migrations: Arc<dyn MigrationRunner>,
    jobs: Arc<dyn JobDispatcher>,
}

impl Installer {
    pub fn new(
        ctx: InstallContext,
        probe: Arc<dyn RuntimeProbe>,
        connector: Arc<dyn DbConnector>,
        migrations: Arc<dyn MigrationRunner>,
        jobs: Arc<dyn JobDispatcher>,
    ) -> Self {
        Self {
            ctx,
            probe,
            connector,
            migrations,
            jobs,
        }
    }

    /// Wire the production collaborators for the application at `base_path`.
    pub async fn from_settings(base_path: &Path, settings: InstallerSettings) -> Result<Self> {
        let console = Console::from_settings(&settings.console, base_path);
        let probe = PhpRuntimeProbe::new(settings.php_binary.clone(), console.clone());
        let connector = RealDbConnector::new(
            settings.database.connect_timeout(),
            settings.database.max_connections,
        );
        // Migrations may legitimately use the whole provisioning budget.
        let migrations =
            ConsoleMigrationRunner::new(console.clone().with_timeout(settings.database.provision_budget()));
        let jobs = ConsoleJobDispatcher::new(console, &settings.jobs);

        let ctx = InstallContext::load(base_path, settings).await?;
        Ok(Self::new(
            ctx,
            Arc::new(probe),
            Arc::new(connector),
            Arc::new(migrations),
            Arc::new(jobs),
        ))
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.ctx = self.ctx.with_locale(locale);
        self
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.ctx = self.ctx.with_base_url(base_url);
        self
    }

    pub fn context(&self) -> &InstallContext {
        &self.ctx
    }

    /// Server requirement checklist; an empty list means the environment passes.
    pub async fn check_environment(&self) -> Vec<RequirementIssue> {
        let issues = requirements::check_environment(self.probe.as_ref(), &self.ctx.base_path).await;
        if issues.is_empty() {
            self.ctx.advance(InstallPhase::EnvChecked);
        }
        issues
    }

    /// Seed `.env` from its template on first run, then give the application a fresh key.
    pub async fn ensure_config_file(&self) -> Result<ConfigUpdate> {
        let settings = &self.ctx.settings;
        if !self.ctx.env.exists().await {
            best_effort_rename(
                &self.ctx.path(&settings.env_template),
                self.ctx.env.path(),
                "env_template",
            )
            .await;
        }

        let key = generate_app_key()?;
        let outcome = self.ctx.env.update([("APP_KEY", key.as_str())]).await?;
        info!(
            "[PHASE: config] [STEP: app_key] Application key generated (fingerprint={}, applied={})",
            secret_fingerprint(&key),
            outcome.is_applied()
        );
        if outcome.is_applied() {
            self.ctx.advance(InstallPhase::ConfigSeeded);
        }
        Ok(outcome)
    }

    /// Set `.env` keys; reports [`ConfigUpdate::MissingFile`] when there is no file to update.
    pub async fn update_config<I, K, V>(&self, entries: I) -> Result<ConfigUpdate>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.ctx.env.update(entries).await
    }

    pub async fn validate_database_connection(&self, creds: &DbCredentials) -> DbValidation {
        provisioning::validate_database_connection(&self.ctx, self.connector.as_ref(), creds).await
    }

    /// Returns the table prefix in use.
    pub async fn persist_database_settings(&self, creds: &DbCredentials) -> Result<String> {
        provisioning::persist_database_settings(&self.ctx, self.connector.as_ref(), creds).await
    }

    pub async fn provision_schema(&self, creds: &DbCredentials) -> Result<ProvisionOutcome> {
        provisioning::provision_schema(
            &self.ctx,
            self.connector.as_ref(),
            self.migrations.as_ref(),
            creds,
        )
        .await
    }

    pub async fn create_company(&self, name: &str, email: &str, locale: &str) -> Result<()> {
        self.jobs
            .dispatch_company(&CompanyRequest::new(name, email, locale))
            .await?;
        self.ctx.advance(InstallPhase::TenantCreated);
        Ok(())
    }

    pub async fn create_user(&self, email: &str, password: &str, locale: &str) -> Result<()> {
        self.jobs
            .dispatch_user(&UserRequest::new(email, password, locale))
            .await?;
        self.ctx.advance(InstallPhase::UserCreated);
        Ok(())
    }

    /// Mark the install complete and publish `robots.txt`.
    pub async fn finalize(&self) -> Result<ConfigUpdate> {
        let settings = &self.ctx.settings;
        let outcome = apply_final_touches(
            &self.ctx.env,
            &self.ctx.base_path,
            &settings.robots_dist,
            &settings.robots_file,
            &self.ctx.locale,
            self.ctx.base_url.as_ref(),
        )
        .await?;
        self.ctx.advance(InstallPhase::Finalized);
        Ok(outcome)
    }

    /// Full unattended install, stopping at the first step that fails.
    pub async fn run(&self, plan: &InstallPlan, progress: Option<ProgressEmitter>) -> Result<InstallReport> {
        let started = Instant::now();
        let emit = |phase: InstallPhase, step: &str, percent: i32, message: String| {
            if let Some(p) = progress.as_ref() {
                p(ProgressPayload {
                    phase,
                    step: step.to_string(),
                    percent,
                    message,
                    elapsed_ms: Some(started.elapsed().as_millis()),
                });
            }
        };

        info!("[PHASE: install] [STEP: start] Unattended install started");

        let issues = self.check_environment().await;
        if !issues.is_empty() {
            for issue in &issues {
                error!("[PHASE: preflight] [STEP: requirements] {}", issue);
            }
            return Err(InstallerError::RequirementsNotMet(issues.len()));
        }
        emit(InstallPhase::EnvChecked, "requirements", 10, "Server requirements met".to_string());

        if let ConfigUpdate::MissingFile = self.ensure_config_file().await? {
            warn!(
                "[PHASE: config] [STEP: seed] No {} or {} found; continuing without a configuration file",
                self.ctx.settings.env_file, self.ctx.settings.env_template
            );
        }
        emit(InstallPhase::ConfigSeeded, "config", 20, "Configuration file ready".to_string());

        let prefix = match self.provision_schema(&plan.database).await? {
            ProvisionOutcome::Provisioned { prefix } => prefix,
            ProvisionOutcome::Rejected { reason } => {
                return Err(InstallerError::DatabaseRejected(reason));
            }
        };
        emit(
            InstallPhase::SchemaProvisioned,
            "schema",
            70,
            format!("Database schema provisioned (prefix={})", prefix),
        );

        let locale = self.ctx.locale.clone();
        self.create_company(&plan.company_name, &plan.company_email, &locale)
            .await?;
        emit(InstallPhase::TenantCreated, "company", 80, "Company created".to_string());

        self.create_user(&plan.admin_email, plan.admin_password.expose(), &locale)
            .await?;
        emit(InstallPhase::UserCreated, "user", 90, "Administrator created".to_string());

        self.finalize().await?;
        emit(InstallPhase::Finalized, "finalize", 100, "Installation complete".to_string());

        let report = InstallReport {
            table_prefix: prefix,
            phase: self.ctx.phase(),
            duration_ms: started.elapsed().as_millis(),
        };
        info!(
            "[PHASE: install] [STEP: complete] Unattended install finished (duration_ms={})",
            report.duration_ms
        );
        Ok(report)
    }
}
