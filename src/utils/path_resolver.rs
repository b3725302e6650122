use anyhow::Result;
use std::path::{Path, PathBuf};

/// Resolve the application's base path (absolute).
///
/// An explicit path wins; otherwise the current working directory is used, since the installer
/// is normally launched from the application checkout.
pub fn resolve_base_path(explicit: Option<&Path>) -> Result<PathBuf> {
    let base = match explicit {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    base.canonicalize()
        .map_err(|e| anyhow::anyhow!("Application base path {:?} is not accessible: {}", base, e))
}

/// Resolve log folder (absolute path)
pub fn resolve_log_folder(base_path: &Path, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            base_path.join(dir)
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", dir, e))?;
        return Ok(dir);
    }

    // Prefer the application's own log directory when it exists.
    let app_logs = base_path.join("storage").join("logs");
    if app_logs.is_dir() {
        let dir = app_logs.join("installer");
        if std::fs::create_dir_all(&dir).is_ok() {
            return Ok(dir);
        }
    }

    // Fallback: next to the executable (best-effort).
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| base_path.to_path_buf());
    let dir = exe_dir.join("installer-logs");
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("Failed to create log folder {:?}: {}", dir, e))?;
    Ok(dir)
}
