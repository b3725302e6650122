// Installation logic
//
// Environment probing, `.env` mutation and final touches, plus the one place external programs
// (the application console, the PHP binary) are spawned.
//
// Secrets given to a child travel in its environment, never in argv, and never reach the logs.

pub mod console;
pub mod env_file;
pub mod files;
pub mod finalize;
pub mod requirements;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

/// Grace period for reaping a child after it has been killed.
const REAP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u128,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Owned description of one invocation, so a retry can rebuild it from scratch.
#[derive(Debug, Clone)]
struct Invocation {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: Option<PathBuf>,
    limit: Duration,
    operation: String,
}

impl Invocation {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn args_for_log(&self) -> String {
        self.args
            .iter()
            .map(|a| mask_arg_for_log(a))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn mask_arg_for_log(arg: &str) -> String {
    let lower = arg.to_ascii_lowercase();
    let looks_secret = ["password", "pwd=", "secret", "token", "app_key"]
        .iter()
        .any(|needle| lower.contains(needle));
    if looks_secret {
        return "***".to_string();
    }

    // Sub-commands and flags stay readable; long blobs (scripts, payloads) are shortened.
    if arg.len() <= 32 {
        arg.to_string()
    } else {
        crate::utils::logging::mask_sensitive(arg)
    }
}

fn is_transient_exec_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    [
        "temporarily",
        "temporary",
        "resource busy",
        "text file busy",
        "too many open files",
    ]
    .iter()
    .any(|needle| msg.contains(needle))
}

fn drain<R>(mut reader: R) -> JoinHandle<std::io::Result<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    })
}

async fn collect(handle: JoinHandle<std::io::Result<String>>, stream: &str) -> Result<String> {
    handle
        .await
        .with_context(|| format!("{} reader task failed", stream))?
        .with_context(|| format!("failed to read {}", stream))
}

async fn execute(inv: &Invocation) -> Result<CommandOutput> {
    let started = Instant::now();
    debug!(
        "[PHASE: installation] [STEP: cmd] spawn {} (program={:?}, args=[{}], env_vars={}, limit_ms={})",
        inv.operation,
        inv.program,
        inv.args_for_log(),
        inv.envs.len(),
        inv.limit.as_millis()
    );

    let mut child = inv
        .command()
        .spawn()
        .with_context(|| format!("could not start {:?} for {}", inv.program, inv.operation))?;

    let stdout = child
        .stdout
        .take()
        .context("child stdout was not piped")?;
    let stderr = child
        .stderr
        .take()
        .context("child stderr was not piped")?;
    let stdout = drain(stdout);
    let stderr = drain(stderr);

    let status = match timeout(inv.limit, child.wait()).await {
        Ok(waited) => waited
            .with_context(|| format!("waiting for {:?} ({}) failed", inv.program, inv.operation))?,
        Err(_) => {
            warn!(
                "[PHASE: installation] [STEP: cmd] {} exceeded {}ms; killing {:?}",
                inv.operation,
                inv.limit.as_millis(),
                inv.program
            );
            if let Err(e) = child.kill().await {
                warn!(
                    "[PHASE: installation] [STEP: cmd] kill of {} failed: {}",
                    inv.operation, e
                );
            }
            let _ = timeout(REAP_GRACE, child.wait()).await;
            anyhow::bail!(
                "{} timed out after {}ms ({:?})",
                inv.operation,
                inv.limit.as_millis(),
                inv.program
            );
        }
    };

    let out = CommandOutput {
        exit_code: status.code(),
        stdout: collect(stdout, "stdout").await?,
        stderr: collect(stderr, "stderr").await?,
        duration_ms: started.elapsed().as_millis(),
    };
    debug!(
        "[PHASE: installation] [STEP: cmd] {} exited (exit_code={:?}, duration_ms={}, stdout_bytes={}, stderr_bytes={})",
        inv.operation,
        out.exit_code,
        out.duration_ms,
        out.stdout.len(),
        out.stderr.len()
    );
    Ok(out)
}

/// Run an external program with a time limit, retrying up to 3 times when spawning fails for a
/// transient reason.
///
/// `envs` are added to the child's environment. A non-zero exit is not an error here; the
/// captured output is returned and the caller decides.
pub async fn run_cmd_with_timeout(
    program: &Path,
    args: &[String],
    envs: &[(String, String)],
    cwd: Option<&Path>,
    timeout_dur: Duration,
    operation: &str,
) -> Result<CommandOutput> {
    let started = Instant::now();
    let inv = Invocation {
        program: program.to_path_buf(),
        args: args.to_vec(),
        envs: envs.to_vec(),
        cwd: cwd.map(Path::to_path_buf),
        limit: timeout_dur,
        operation: operation.to_string(),
    };
    info!(
        "[PHASE: installation] [STEP: cmd] {} started (program={:?}, args={})",
        operation,
        program,
        args.len()
    );

    let backoff = ExponentialBackoff::from_millis(200)
        .factor(2)
        .max_delay(Duration::from_secs(2))
        .take(3)
        .map(jitter);

    let result = RetryIf::spawn(
        backoff,
        || {
            let inv = inv.clone();
            async move { execute(&inv).await }
        },
        |e: &anyhow::Error| {
            let retry = is_transient_exec_error(e);
            if retry {
                warn!(
                    "[PHASE: installation] [STEP: cmd] {} hit a transient failure, retrying: {:#}",
                    operation, e
                );
            }
            retry
        },
    )
    .await;

    match &result {
        Ok(out) => info!(
            "[PHASE: installation] [STEP: cmd] {} finished (exit_code={:?}, duration_ms={})",
            operation,
            out.exit_code,
            started.elapsed().as_millis()
        ),
        Err(e) => error!(
            "[PHASE: installation] [STEP: cmd] {} failed after {}ms: {:#}",
            operation,
            started.elapsed().as_millis(),
            e
        ),
    }
    result
}
