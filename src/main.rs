use anyhow::{Context, Result};
use app_installer::models::requests::{DbCredentials, InstallPlan, Secret};
use app_installer::models::responses::{
    DbValidation, ProgressPayload, ProvisionOutcome, RequirementsReport,
};
use app_installer::utils::path_resolver::{resolve_base_path, resolve_log_folder};
use app_installer::{init_logging, Installer, InstallerSettings, ProgressEmitter};
use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use url::Url;

#[derive(Parser)]
#[command(name = "app-installer", version, about = "Install a self-hosted application instance")]
struct Cli {
    /// Application root (defaults to the current directory)
    #[arg(long, global = true, value_name = "PATH")]
    base_path: Option<PathBuf>,

    /// Installer settings file (defaults to <base-path>/installer.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Locale written as APP_LOCALE and used for the company and administrator
    #[arg(long, global = true)]
    locale: Option<String>,

    /// Public base URL of the application, written as APP_URL
    #[arg(long, global = true, value_name = "URL")]
    url: Option<Url>,

    /// Also log debug output to the console
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Check server requirements
    Check {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Create .env from its template (first run) and generate APP_KEY
    InitEnv,
    /// Set configuration values
    Set {
        #[arg(required = true, value_name = "KEY=VALUE", value_parser = parse_key_value)]
        pairs: Vec<(String, String)>,
    },
    /// Test database settings without saving them
    DbCheck(DbArgs),
    /// Save database settings, run migrations and seed
    DbProvision(DbArgs),
    /// Create the first company
    CreateCompany {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
    },
    /// Create the administrator account
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long, env = "APP_INSTALLER_ADMIN_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Mark the installation complete
    Finalize,
    /// Run every step in order
    Install {
        #[command(flatten)]
        db: DbArgs,
        #[arg(long)]
        company_name: String,
        #[arg(long)]
        company_email: String,
        #[arg(long)]
        admin_email: String,
        #[arg(long, env = "APP_INSTALLER_ADMIN_PASSWORD", hide_env_values = true)]
        admin_password: String,
    },
}

#[derive(Args)]
struct DbArgs {
    #[arg(long, default_value = "127.0.0.1")]
    db_host: String,
    /// Defaults to the standard port of the application's database driver
    #[arg(long)]
    db_port: Option<u16>,
    #[arg(long)]
    db_database: String,
    #[arg(long)]
    db_username: String,
    #[arg(long, env = "APP_INSTALLER_DB_PASSWORD", hide_env_values = true, default_value = "")]
    db_password: String,
    /// Table prefix; generated when omitted
    #[arg(long)]
    db_prefix: Option<String>,
}

impl DbArgs {
    fn credentials(&self, default_port: u16) -> DbCredentials {
        let creds = DbCredentials::new(
            &self.db_host,
            self.db_port.unwrap_or(default_port),
            &self.db_database,
            &self.db_username,
            &self.db_password,
        );
        match &self.db_prefix {
            Some(prefix) => creds.with_prefix(prefix),
            None => creds,
        }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", s))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let base_path = resolve_base_path(cli.base_path.as_deref())?;
    let settings = InstallerSettings::load(&base_path, cli.config.as_deref())
        .context("Failed to load installer settings")?;

    let log_dir = resolve_log_folder(&base_path, settings.log_dir.as_deref())?;
    let console_level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    if let Err(e) = init_logging(&log_dir, true, console_level) {
        eprintln!("Failed to initialize logging: {:#}", e);
    }
    info!(
        "[PHASE: initialization] Installer {} starting (base_path={:?})",
        env!("CARGO_PKG_VERSION"),
        base_path
    );

    let mut installer = Installer::from_settings(&base_path, settings).await?;
    if let Some(locale) = cli.locale {
        installer = installer.with_locale(locale);
    }
    if let Some(url) = cli.url {
        installer = installer.with_base_url(url);
    }

    let result = run(&installer, cli.cmd).await;
    if let Err(e) = &result {
        error!("[PHASE: install] [STEP: abort] {:#}", e);
    }
    result
}

async fn run(installer: &Installer, cmd: Cmd) -> Result<ExitCode> {
    let locale = installer.context().locale.clone();

    match cmd {
        Cmd::Check { json } => {
            let report = RequirementsReport::from_issues(installer.check_environment().await);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if report.passed {
                println!("All requirements met.");
            } else {
                for message in &report.messages {
                    println!("{}", message);
                }
            }
            Ok(exit_code(report.passed))
        }
        Cmd::InitEnv => {
            let outcome = installer.ensure_config_file().await?;
            if !outcome.is_applied() {
                println!(
                    "No configuration file at {:?}; APP_KEY not written.",
                    installer.context().env.path()
                );
            }
            Ok(exit_code(outcome.is_applied()))
        }
        Cmd::Set { pairs } => {
            let outcome = installer.update_config(pairs).await?;
            Ok(exit_code(outcome.is_applied()))
        }
        Cmd::DbCheck(db) => {
            let creds = db.credentials(default_db_port(installer)?);
            match installer.validate_database_connection(&creds).await {
                DbValidation::Valid => {
                    println!("Connection successful.");
                    Ok(ExitCode::SUCCESS)
                }
                DbValidation::Invalid { reason } => {
                    println!("{}", reason);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Cmd::DbProvision(db) => {
            let creds = db.credentials(default_db_port(installer)?);
            match installer.provision_schema(&creds).await? {
                ProvisionOutcome::Provisioned { prefix } => {
                    println!("Database ready (table prefix {}).", prefix);
                    Ok(ExitCode::SUCCESS)
                }
                ProvisionOutcome::Rejected { reason } => {
                    println!("{}", reason);
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Cmd::CreateCompany { name, email } => {
            installer.create_company(&name, &email, &locale).await?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::CreateUser { email, password } => {
            installer.create_user(&email, &password, &locale).await?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Finalize => {
            installer.finalize().await?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Install {
            db,
            company_name,
            company_email,
            admin_email,
            admin_password,
        } => {
            let plan = InstallPlan {
                database: db.credentials(default_db_port(installer)?),
                company_name,
                company_email,
                admin_email,
                admin_password: Secret::new(admin_password),
            };
            let progress: ProgressEmitter = Arc::new(|p: ProgressPayload| {
                println!("[{:>3}%] {}", p.percent, p.message);
            });
            let report = installer.run(&plan, Some(progress)).await?;
            println!(
                "Installation complete in {}ms (table prefix {}).",
                report.duration_ms, report.table_prefix
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Standard port of the driver behind the application's default connection.
fn default_db_port(installer: &Installer) -> Result<u16> {
    let profile = installer.context().registry.default_profile()?;
    Ok(profile.driver.default_port())
}

fn exit_code(ok: bool) -> ExitCode {
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_splits_on_first_equals() {
        assert_eq!(
            parse_key_value("APP_NAME=Shop").unwrap(),
            ("APP_NAME".to_string(), "Shop".to_string())
        );
        assert_eq!(
            parse_key_value("DB_PASSWORD=a=b==").unwrap(),
            ("DB_PASSWORD".to_string(), "a=b==".to_string())
        );
        assert_eq!(
            parse_key_value("MAIL_HOST=").unwrap(),
            ("MAIL_HOST".to_string(), String::new())
        );
    }

    #[test]
    fn key_value_without_equals_is_rejected() {
        let err = parse_key_value("APP_NAME").unwrap_err();
        assert!(err.contains("KEY=VALUE"));
    }

    #[test]
    fn set_rejects_pair_without_equals() {
        assert!(Cli::try_parse_from(["app-installer", "set", "APP_NAME"]).is_err());
    }

    fn db_args(extra: &[&str]) -> DbArgs {
        let mut argv = vec![
            "app-installer",
            "db-check",
            "--db-database",
            "books",
            "--db-username",
            "books",
        ];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().cmd {
            Cmd::DbCheck(db) => db,
            _ => panic!("expected db-check"),
        }
    }

    #[test]
    fn db_port_falls_back_to_driver_default() {
        let creds = db_args(&[]).credentials(5432);
        assert_eq!(creds.port, 5432);
        assert_eq!(creds.host, "127.0.0.1");
        assert_eq!(creds.prefix, None);
    }

    #[test]
    fn explicit_db_port_wins() {
        let creds = db_args(&["--db-port", "3307", "--db-prefix", "ab1_"]).credentials(5432);
        assert_eq!(creds.port, 3307);
        assert_eq!(creds.prefix.as_deref(), Some("ab1_"));
    }
}
