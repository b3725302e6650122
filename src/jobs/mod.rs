// Tenant and administrator creation
//
// The application creates its own records; the installer hands it a JSON payload through the
// environment of a console command and waits for it to finish.

use async_trait::async_trait;
use log::{error, info};
use serde::Serialize;

use crate::error::{InstallerError, Result};
use crate::installation::console::Console;
use crate::models::requests::{CompanyRequest, UserRequest};
use crate::settings::JobSettings;

/// Environment variable carrying the JSON payload.
pub const PAYLOAD_ENV: &str = "APP_INSTALLER_PAYLOAD";

#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch_company(&self, request: &CompanyRequest) -> Result<()>;

    async fn dispatch_user(&self, request: &UserRequest) -> Result<()>;
}

pub struct ConsoleJobDispatcher {
    console: Console,
    company_command: String,
    user_command: String,
}

impl ConsoleJobDispatcher {
    pub fn new(console: Console, jobs: &JobSettings) -> Self {
        Self {
            console,
            company_command: jobs.company_command.clone(),
            user_command: jobs.user_command.clone(),
        }
    }

    async fn dispatch<T: Serialize + Sync>(&self, command: &str, payload: &T) -> Result<()> {
        let job_error = |message: String| InstallerError::Job {
            job: command.to_string(),
            message,
        };

        let json = serde_json::to_string(payload).map_err(|e| job_error(e.to_string()))?;
        let envs = vec![(PAYLOAD_ENV.to_string(), json)];

        match self.console.run_checked_with_env(command, &[], &envs).await {
            Ok(out) => {
                info!(
                    "[PHASE: tenant] [STEP: dispatch] Job '{}' finished (duration_ms={})",
                    command, out.duration_ms
                );
                Ok(())
            }
            Err(e) => {
                error!("[PHASE: tenant] [STEP: dispatch] Job '{}' failed: {:#}", command, e);
                Err(job_error(format!("{:#}", e)))
            }
        }
    }
}

#[async_trait]
impl JobDispatcher for ConsoleJobDispatcher {
    async fn dispatch_company(&self, request: &CompanyRequest) -> Result<()> {
        info!(
            "[PHASE: tenant] [STEP: company] Creating company '{}' (locale={})",
            request.name, request.locale
        );
        self.dispatch(&self.company_command, request).await
    }

    async fn dispatch_user(&self, request: &UserRequest) -> Result<()> {
        info!(
            "[PHASE: tenant] [STEP: user] Creating administrator (locale={})",
            request.locale
        );
        self.dispatch(&self.user_command, request).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StubJobDispatcher {
        pub fail_user: bool,
        pub companies: Mutex<Vec<CompanyRequest>>,
        pub users: Mutex<Vec<UserRequest>>,
    }

    #[async_trait]
    impl JobDispatcher for StubJobDispatcher {
        async fn dispatch_company(&self, request: &CompanyRequest) -> Result<()> {
            self.companies.lock().unwrap().push(request.clone());
            Ok(())
        }

        async fn dispatch_user(&self, request: &UserRequest) -> Result<()> {
            if self.fail_user {
                return Err(InstallerError::Job {
                    job: "user".to_string(),
                    message: "email already taken".to_string(),
                });
            }
            self.users.lock().unwrap().push(request.clone());
            Ok(())
        }
    }

    #[cfg(unix)]
    fn capturing_console(dir: &std::path::Path) -> Console {
        // Writes the payload to `<command>.json`; fails for any command named `broken`.
        Console::new(
            "sh",
            vec![
                "-c".to_string(),
                "[ \"$1\" != broken ] || { echo 'boom' >&2; exit 1; }; printf '%s' \"$APP_INSTALLER_PAYLOAD\" > \"$1.json\"".to_string(),
                "sh".to_string(),
            ],
            dir,
        )
        .with_timeout(std::time::Duration::from_secs(5))
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn company_payload_travels_through_environment() {
        let dir = tempfile::tempdir().unwrap();
        let jobs = JobSettings {
            company_command: "company".to_string(),
            user_command: "user".to_string(),
        };
        let dispatcher = ConsoleJobDispatcher::new(capturing_console(dir.path()), &jobs);

        dispatcher
            .dispatch_company(&CompanyRequest::new("Acme", "ops@acme.test", "en-GB"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("company.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["name"], "Acme");
        assert_eq!(v["currency"], "USD");
        assert_eq!(v["enabled"], "1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn user_payload_includes_company_and_role_links() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = ConsoleJobDispatcher::new(
            capturing_console(dir.path()),
            &JobSettings {
                company_command: "company".to_string(),
                user_command: "user".to_string(),
            },
        );

        dispatcher
            .dispatch_user(&UserRequest::new("admin@acme.test", "hunter22", "en-GB"))
            .await
            .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("user.json")).unwrap();
        let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["companies"], serde_json::json!(["1"]));
        assert_eq!(v["roles"], serde_json::json!(["1"]));
        assert_eq!(v["password"], "hunter22");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_job_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = ConsoleJobDispatcher::new(
            capturing_console(dir.path()),
            &JobSettings {
                company_command: "broken".to_string(),
                user_command: "user".to_string(),
            },
        );

        let err = dispatcher
            .dispatch_company(&CompanyRequest::new("Acme", "ops@acme.test", "en-GB"))
            .await
            .unwrap_err();

        match err {
            InstallerError::Job { job, message } => {
                assert_eq!(job, "broken");
                assert!(message.contains("boom"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
