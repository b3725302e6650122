// Schema migrations and seeding
//
// The application owns its migrations; the installer only asks its console to run them.

use async_trait::async_trait;
use log::info;

use crate::error::{InstallerError, Result};
use crate::installation::console::Console;

#[async_trait]
pub trait MigrationRunner: Send + Sync {
    /// Apply every pending migration.
    async fn migrate(&self) -> Result<()>;

    /// Run the seeder `class`.
    async fn seed(&self, class: &str) -> Result<()>;
}

/// Runs `migrate --force` and `db:seed --class=<class> --force` through the console.
pub struct ConsoleMigrationRunner {
    console: Console,
}

impl ConsoleMigrationRunner {
    pub fn new(console: Console) -> Self {
        Self { console }
    }
}

#[async_trait]
impl MigrationRunner for ConsoleMigrationRunner {
    async fn migrate(&self) -> Result<()> {
        info!("[PHASE: database] [STEP: migrate] Running migrations");
        let out = self
            .console
            .run_checked("migrate", &["--force".to_string()])
            .await
            .map_err(|e| InstallerError::Command {
                operation: "migrate".to_string(),
                message: format!("{:#}", e),
            })?;
        info!(
            "[PHASE: database] [STEP: migrate] Migrations complete (duration_ms={})",
            out.duration_ms
        );
        Ok(())
    }

    async fn seed(&self, class: &str) -> Result<()> {
        info!("[PHASE: database] [STEP: seed] Seeding {}", class);
        let args = vec![format!("--class={}", class), "--force".to_string()];
        let out = self
            .console
            .run_checked("db:seed", &args)
            .await
            .map_err(|e| InstallerError::Command {
                operation: "db:seed".to_string(),
                message: format!("{:#}", e),
            })?;
        info!(
            "[PHASE: database] [STEP: seed] Seed {} complete (duration_ms={})",
            class, out.duration_ms
        );
        Ok(())
    }
}
