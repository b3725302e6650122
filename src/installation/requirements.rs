// Server requirement checks
//
// The checklist is fixed and evaluated in order, so the resulting issue list is stable:
//   1. legacy runtime settings that must be off
//   2. settings/functions that must be on
//   3. the PDO database driver
//   4. required extensions
//   5. writable storage directories
//   6. the application console responds to `help`
//
// Nothing here returns an error: an unanswerable probe counts as a failed check.

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::installation::console::Console;
use crate::installation::run_cmd_with_timeout;

/// Runtime settings that must be switched off, with their display names.
pub const DISABLED_SETTINGS: &[(&str, &str)] = &[
    ("safe_mode", "Safe Mode"),
    ("register_globals", "Register Globals"),
    ("magic_quotes_gpc", "Magic Quotes"),
];

/// Runtime settings that must be switched on.
pub const ENABLED_SETTINGS: &[(&str, &str)] = &[("file_uploads", "File Uploads")];

/// Functions needed to spawn and reap subprocesses.
pub const REQUIRED_FUNCTIONS: &[&str] = &["proc_open", "proc_close"];

pub const DATABASE_DRIVER_CLASS: &str = "PDO";
pub const DATABASE_DRIVER_LABEL: &str = "MySQL PDO";

pub const REQUIRED_EXTENSIONS: &[&str] = &[
    "bcmath", "ctype", "curl", "dom", "fileinfo", "intl", "gd", "json", "mbstring", "openssl",
    "tokenizer", "xml", "zip",
];

pub const WRITABLE_DIRECTORIES: &[&str] = &[
    "storage/app",
    "storage/app/uploads",
    "storage/framework",
    "storage/logs",
];

pub const HELPER_COMMAND: &str = "help";
pub const MINIMUM_RUNTIME_VERSION: &str = "8.1";

/// One unmet prerequisite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequirementIssue {
    Disabled { feature: String },
    Enabled { feature: String },
    Extension { extension: String },
    Directory { directory: String },
    RuntimeVersion { version: String },
}

impl fmt::Display for RequirementIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequirementIssue::Disabled { feature } => {
                write!(f, "{} needs to be disabled!", feature)
            }
            RequirementIssue::Enabled { feature } => write!(f, "{} needs to be enabled!", feature),
            RequirementIssue::Extension { extension } => {
                write!(f, "{} extension needs to be installed and loaded!", extension)
            }
            RequirementIssue::Directory { directory } => {
                write!(f, "{} directory needs to be writable!", directory)
            }
            RequirementIssue::RuntimeVersion { version } => write!(
                f,
                "Error: Ask your hosting provider to use PHP {} or higher for both HTTP and CLI.",
                version
            ),
        }
    }
}

/// What the PHP runtime reports about itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuntimeSnapshot {
    #[serde(default)]
    pub ini: HashMap<String, bool>,
    #[serde(default)]
    pub functions: HashMap<String, bool>,
    #[serde(default)]
    pub classes: HashMap<String, bool>,
    #[serde(default)]
    pub extensions: Vec<String>,
}

impl RuntimeSnapshot {
    pub fn setting_enabled(&self, name: &str) -> bool {
        self.ini.get(name).copied().unwrap_or(false)
    }

    pub fn function_exists(&self, name: &str) -> bool {
        self.functions.get(name).copied().unwrap_or(false)
    }

    pub fn class_exists(&self, name: &str) -> bool {
        self.classes.get(name).copied().unwrap_or(false)
    }

    pub fn extension_loaded(&self, name: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(name))
    }
}

/// Source of environment facts.
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    /// `None` when the runtime cannot be queried at all.
    async fn runtime(&self) -> Option<RuntimeSnapshot>;

    async fn is_writable(&self, path: &Path) -> bool;

    /// Whether the helper console command can be invoked and reports success.
    async fn helper_command_succeeds(&self) -> bool;
}

/// Run the full checklist against `base_path`.
pub async fn check_environment(probe: &dyn RuntimeProbe, base_path: &Path) -> Vec<RequirementIssue> {
    info!("[PHASE: preflight] [STEP: requirements] Checking server requirements");

    let snapshot = match probe.runtime().await {
        Some(s) => s,
        None => {
            warn!("[PHASE: preflight] [STEP: requirements] Runtime could not be queried; treating every runtime check as failed");
            RuntimeSnapshot::default()
        }
    };

    let mut issues = Vec::new();

    for (setting, label) in DISABLED_SETTINGS {
        if snapshot.setting_enabled(setting) {
            issues.push(RequirementIssue::Disabled {
                feature: label.to_string(),
            });
        }
    }

    for (setting, label) in ENABLED_SETTINGS {
        if !snapshot.setting_enabled(setting) {
            issues.push(RequirementIssue::Enabled {
                feature: label.to_string(),
            });
        }
    }

    for function in REQUIRED_FUNCTIONS {
        if !snapshot.function_exists(function) {
            issues.push(RequirementIssue::Enabled {
                feature: function.to_string(),
            });
        }
    }

    if !snapshot.class_exists(DATABASE_DRIVER_CLASS) {
        issues.push(RequirementIssue::Extension {
            extension: DATABASE_DRIVER_LABEL.to_string(),
        });
    }

    for ext in REQUIRED_EXTENSIONS {
        if !snapshot.extension_loaded(ext) {
            issues.push(RequirementIssue::Extension {
                extension: ext.to_uppercase(),
            });
        }
    }

    for dir in WRITABLE_DIRECTORIES {
        if !probe.is_writable(&base_path.join(dir)).await {
            issues.push(RequirementIssue::Directory {
                directory: dir.to_string(),
            });
        }
    }

    if !probe.helper_command_succeeds().await {
        issues.push(RequirementIssue::RuntimeVersion {
            version: MINIMUM_RUNTIME_VERSION.to_string(),
        });
    }

    for issue in &issues {
        debug!("[PHASE: preflight] [STEP: requirements] {}", issue);
    }
    info!(
        "[PHASE: preflight] [STEP: requirements] Requirement check complete (issues={})",
        issues.len()
    );
    issues
}

const SNAPSHOT_SCRIPT: &str = r#"$r=['ini'=>[],'functions'=>[],'classes'=>[],'extensions'=>array_map('strtolower',get_loaded_extensions())];
foreach(['safe_mode','register_globals','magic_quotes_gpc','file_uploads'] as $k){$r['ini'][$k]=(bool)ini_get($k);}
foreach(['proc_open','proc_close'] as $f){$r['functions'][$f]=function_exists($f);}
foreach(['PDO'] as $c){$r['classes'][$c]=class_exists($c);}
echo json_encode($r);"#;

/// Probe backed by the host's `php` binary and filesystem.
pub struct PhpRuntimeProbe {
    php_binary: String,
    console: Console,
    timeout: Duration,
}

impl PhpRuntimeProbe {
    pub fn new(php_binary: impl Into<String>, console: Console) -> Self {
        Self {
            php_binary: php_binary.into(),
            console,
            timeout: Duration::from_secs(30),
        }
    }

    fn resolve_php(&self) -> Option<PathBuf> {
        match which::which(&self.php_binary) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!(
                    "[PHASE: preflight] [STEP: runtime] PHP binary '{}' not found: {}",
                    self.php_binary, e
                );
                None
            }
        }
    }
}

#[async_trait]
impl RuntimeProbe for PhpRuntimeProbe {
    async fn runtime(&self) -> Option<RuntimeSnapshot> {
        let php = self.resolve_php()?;
        let args = vec!["-r".to_string(), SNAPSHOT_SCRIPT.to_string()];
        let out = match run_cmd_with_timeout(&php, &args, &[], None, self.timeout, "php_snapshot").await {
            Ok(out) if out.success() => out,
            Ok(out) => {
                warn!(
                    "[PHASE: preflight] [STEP: runtime] PHP snapshot exited with {:?}",
                    out.exit_code
                );
                return None;
            }
            Err(e) => {
                warn!("[PHASE: preflight] [STEP: runtime] PHP snapshot failed: {:#}", e);
                return None;
            }
        };
        parse_snapshot(&out.stdout)
    }

    async fn is_writable(&self, path: &Path) -> bool {
        is_writable_path(path)
    }

    async fn helper_command_succeeds(&self) -> bool {
        self.console.succeeds(HELPER_COMMAND).await
    }
}

pub fn parse_snapshot(stdout: &str) -> Option<RuntimeSnapshot> {
    // PHP notices may precede the JSON document.
    let start = stdout.find('{')?;
    match serde_json::from_str(stdout[start..].trim()) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!("[PHASE: preflight] [STEP: runtime] Unparseable PHP snapshot: {}", e);
            None
        }
    }
}

#[cfg(unix)]
pub fn is_writable_path(path: &Path) -> bool {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return false;
    };
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 }
}

#[cfg(not(unix))]
pub fn is_writable_path(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| !m.permissions().readonly())
        .unwrap_or(false)
}
