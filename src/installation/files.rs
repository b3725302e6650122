//! File helpers for the installer.
//!
//! Cosmetic moves (template seeding, `robots.txt`) are best-effort: they log and never fail the
//! install. Anything that must succeed returns a `Result` instead.

use log::{debug, info};
use std::path::Path;

/// Outcome of a best-effort rename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed,
    /// Nothing to do (source missing or destination already present).
    Skipped,
    /// Attempted and failed; the error has been logged.
    Failed,
}

/// Rename `from` to `to`, swallowing and logging any failure.
///
/// The destination is never overwritten.
pub async fn best_effort_rename(from: &Path, to: &Path, label: &str) -> RenameOutcome {
    if !is_file(from).await {
        debug!(
            "[PHASE: installation] [STEP: files] {} skipped: {:?} not present",
            label, from
        );
        return RenameOutcome::Skipped;
    }
    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        debug!(
            "[PHASE: installation] [STEP: files] {} skipped: {:?} already exists",
            label, to
        );
        return RenameOutcome::Skipped;
    }

    match tokio::fs::rename(from, to).await {
        Ok(()) => {
            info!(
                "[PHASE: installation] [STEP: files] {}: {:?} -> {:?}",
                label, from, to
            );
            RenameOutcome::Renamed
        }
        Err(e) => {
            debug!(
                "[PHASE: installation] [STEP: files] {} failed (ignored): {:?} -> {:?}: {}",
                label, from, to, e
            );
            RenameOutcome::Failed
        }
    }
}

pub async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn renames_when_source_present() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("robots.txt.dist");
        let to = dir.path().join("robots.txt");
        std::fs::write(&from, "User-agent: *").unwrap();

        assert_eq!(best_effort_rename(&from, &to, "robots").await, RenameOutcome::Renamed);
        assert!(!from.exists());
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "User-agent: *");
    }

    #[tokio::test]
    async fn missing_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = best_effort_rename(
            &dir.path().join("nope.dist"),
            &dir.path().join("nope"),
            "robots",
        )
        .await;
        assert_eq!(outcome, RenameOutcome::Skipped);
    }

    #[tokio::test]
    async fn existing_destination_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join(".env.example");
        let to = dir.path().join(".env");
        std::fs::write(&from, "TEMPLATE=1").unwrap();
        std::fs::write(&to, "LIVE=1").unwrap();

        assert_eq!(best_effort_rename(&from, &to, "env_template").await, RenameOutcome::Skipped);
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "LIVE=1");
        assert!(from.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failure_is_reported_not_raised() {
        // Renaming a file into a directory that does not exist fails with ENOENT.
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("robots.txt.dist");
        std::fs::write(&from, "x").unwrap();
        let to = dir.path().join("missing-dir").join("robots.txt");

        assert_eq!(best_effort_rename(&from, &to, "robots").await, RenameOutcome::Failed);
        assert!(from.exists());
    }
}
