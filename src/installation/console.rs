// Application console (`php artisan ...`)
//
// The migration runner, the job dispatcher and the helper-command probe all go through here.

use crate::installation::{run_cmd_with_timeout, CommandOutput};
use crate::settings::ConsoleSettings;
use anyhow::Result;
use log::debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Console {
    program: PathBuf,
    base_args: Vec<String>,
    working_dir: PathBuf,
    timeout: Duration,
}

impl Console {
    pub fn new(program: impl Into<PathBuf>, base_args: Vec<String>, working_dir: &Path) -> Self {
        Self {
            program: program.into(),
            base_args,
            working_dir: working_dir.to_path_buf(),
            timeout: Duration::from_secs(120),
        }
    }

    pub fn from_settings(settings: &ConsoleSettings, working_dir: &Path) -> Self {
        Self::new(&settings.program, settings.args.clone(), working_dir).with_timeout(settings.timeout())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run a console command and capture its output; a non-zero exit is not an error here.
    pub async fn run(&self, command: &str, args: &[String]) -> Result<CommandOutput> {
        self.run_with_env(command, args, &[]).await
    }

    /// Like [`Console::run`], with extra environment variables for the child.
    pub async fn run_with_env(
        &self,
        command: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> Result<CommandOutput> {
        let mut full_args = self.base_args.clone();
        full_args.push(command.to_string());
        full_args.extend(args.iter().cloned());

        run_cmd_with_timeout(
            &self.program,
            &full_args,
            envs,
            Some(&self.working_dir),
            self.timeout,
            &format!("console_{}", command),
        )
        .await
    }

    /// Run a console command and require a zero exit status.
    pub async fn run_checked(&self, command: &str, args: &[String]) -> Result<CommandOutput> {
        self.run_checked_with_env(command, args, &[]).await
    }

    pub async fn run_checked_with_env(
        &self,
        command: &str,
        args: &[String],
        envs: &[(String, String)],
    ) -> Result<CommandOutput> {
        let out = self.run_with_env(command, args, envs).await?;
        if !out.success() {
            let detail = last_line(&out.stderr).or_else(|| last_line(&out.stdout));
            anyhow::bail!(
                "console command '{}' exited with {:?}{}",
                command,
                out.exit_code,
                detail.map(|d| format!(": {}", d)).unwrap_or_default()
            );
        }
        Ok(out)
    }

    /// `true` when the command can be spawned and reports success.
    pub async fn succeeds(&self, command: &str) -> bool {
        match self.run(command, &[]).await {
            Ok(out) => {
                debug!(
                    "[PHASE: preflight] [STEP: console] '{}' exit_code={:?}",
                    command, out.exit_code
                );
                out.success()
            }
            Err(e) => {
                debug!(
                    "[PHASE: preflight] [STEP: console] '{}' could not run: {:#}",
                    command, e
                );
                false
            }
        }
    }
}

fn last_line(s: &str) -> Option<String> {
    s.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh_console(dir: &Path) -> Console {
        // `sh -c <command>` stands in for `php artisan <command>`
        Console::new("sh", vec!["-c".to_string()], dir).with_timeout(Duration::from_secs(5))
    }

    #[tokio::test]
    async fn succeeds_reflects_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let console = sh_console(dir.path());
        assert!(console.succeeds("exit 0").await);
        assert!(!console.succeeds("exit 1").await);
    }

    #[tokio::test]
    async fn missing_program_never_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let console = Console::new("no-such-console-binary-91c2", vec![], dir.path());
        assert!(!console.succeeds("help").await);
    }

    #[tokio::test]
    async fn run_checked_surfaces_last_error_line() {
        let dir = tempfile::tempdir().unwrap();
        let console = sh_console(dir.path());
        let err = console
            .run_checked("echo first >&2; echo 'Migration table not found' >&2; exit 2", &[])
            .await
            .unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("Migration table not found"), "{}", msg);
        assert!(msg.contains("Some(2)"), "{}", msg);
    }

    #[tokio::test]
    async fn run_passes_extra_args_after_command() {
        let dir = tempfile::tempdir().unwrap();
        let console = sh_console(dir.path());
        // sh -c 'echo "$0 $1"' a b
        let out = console
            .run("echo \"$0 $1\"", &["first".to_string(), "second".to_string()])
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "first second");
    }
}
