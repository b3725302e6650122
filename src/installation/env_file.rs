//! `.env` configuration file.
//!
//! Flat `KEY=value` lines. Updates overwrite every line that starts with `KEY=` in place and
//! append unknown keys at the end in the order given, so re-applying the same batch is a no-op.
//! Lines are split on `\n` and re-joined with `\n`; nothing else about the file is normalised.

use crate::error::{InstallerError, Result};
use crate::utils::logging::mask_env_pair;
use crate::utils::validation::{is_valid_env_key, is_valid_env_value};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

/// Result of an update pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigUpdate {
    /// File rewritten; counts are lines overwritten in place and lines appended.
    Applied { replaced: usize, appended: usize },
    /// No configuration file to update; nothing written.
    MissingFile,
}

impl ConfigUpdate {
    pub fn is_applied(&self) -> bool {
        matches!(self, ConfigUpdate::Applied { .. })
    }
}

#[derive(Debug, Clone)]
pub struct EnvFile {
    path: PathBuf,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        tokio::fs::metadata(&self.path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    /// Set each key to its value, in order.
    ///
    /// Keys and values are checked before the file is touched; an invalid entry aborts the whole
    /// batch without writing.
    pub async fn update<I, K, V>(&self, entries: I) -> Result<ConfigUpdate>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let entries: Vec<(String, String)> = entries
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
            .collect();

        for (key, value) in &entries {
            if !is_valid_env_key(key) {
                return Err(InstallerError::InvalidConfigKey(key.clone()));
            }
            if !is_valid_env_value(value) {
                return Err(InstallerError::InvalidConfigValue(key.clone()));
            }
        }

        if !self.exists().await {
            warn!(
                "[PHASE: config] [STEP: update_env] Configuration file {:?} not found; {} key(s) not written",
                self.path,
                entries.len()
            );
            return Ok(ConfigUpdate::MissingFile);
        }

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| InstallerError::io(&self.path, e))?;

        let (updated, replaced, appended) = apply_updates(&content, &entries);

        tokio::fs::write(&self.path, updated)
            .await
            .map_err(|e| InstallerError::io(&self.path, e))?;

        for (key, value) in &entries {
            debug!(
                "[PHASE: config] [STEP: update_env] {}",
                mask_env_pair(key, value)
            );
        }
        info!(
            "[PHASE: config] [STEP: update_env] Updated {:?} (keys={}, replaced={}, appended={})",
            self.path,
            entries.len(),
            replaced,
            appended
        );

        Ok(ConfigUpdate::Applied { replaced, appended })
    }

    /// Value of the first `KEY=` line, if any.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| InstallerError::io(&self.path, e))?;
        let needle = format!("{}=", key);
        Ok(content
            .split('\n')
            .find_map(|line| line.strip_prefix(needle.as_str()).map(str::to_string)))
    }
}

/// Apply `entries` to `content`, returning the new content and the replaced/appended counts.
pub fn apply_updates(content: &str, entries: &[(String, String)]) -> (String, usize, usize) {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let mut replaced = 0;
    let mut appended = 0;

    for (key, value) in entries {
        let needle = format!("{}=", key);
        let replacement = format!("{}={}", key, value);
        let mut found = false;

        for line in lines.iter_mut() {
            if line.starts_with(&needle) {
                *line = replacement.clone();
                found = true;
                replaced += 1;
            }
        }

        if !found {
            lines.push(replacement);
            appended += 1;
        }
    }

    (lines.join("\n"), replaced, appended)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(list: &[(&str, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn present_key_is_rewritten_in_place() {
        let (out, replaced, appended) =
            apply_updates("APP_NAME=Demo\nAPP_DEBUG=true\nDB_HOST=127.0.0.1", &pairs(&[("APP_DEBUG", "false")]));
        assert_eq!(out, "APP_NAME=Demo\nAPP_DEBUG=false\nDB_HOST=127.0.0.1");
        assert_eq!((replaced, appended), (1, 0));
        assert_eq!(out.split('\n').count(), 3);
    }

    #[test]
    fn absent_key_appends_exactly_one_line() {
        let (out, replaced, appended) = apply_updates("APP_NAME=Demo", &pairs(&[("APP_INSTALLED", "true")]));
        assert_eq!(out, "APP_NAME=Demo\nAPP_INSTALLED=true");
        assert_eq!((replaced, appended), (0, 1));
    }

    #[test]
    fn every_duplicate_line_is_overwritten_in_position() {
        let (out, replaced, _) = apply_updates("A=1\nB=2\nA=3", &pairs(&[("A", "9")]));
        assert_eq!(out, "A=9\nB=2\nA=9");
        assert_eq!(replaced, 2);
    }

    #[test]
    fn prefix_keys_do_not_collide() {
        // DB_HOST must not match DB_HOST_READ
        let (out, _, _) = apply_updates("DB_HOST_READ=replica\nDB_HOST=old", &pairs(&[("DB_HOST", "new")]));
        assert_eq!(out, "DB_HOST_READ=replica\nDB_HOST=new");
    }

    #[test]
    fn appended_keys_keep_input_order() {
        let (out, _, appended) = apply_updates("X=1", &pairs(&[("B", "2"), ("A", "1"), ("C", "3")]));
        assert_eq!(out, "X=1\nB=2\nA=1\nC=3");
        assert_eq!(appended, 3);
    }

    #[test]
    fn trailing_newline_is_preserved_as_a_blank_line() {
        let (out, _, _) = apply_updates("A=1\n", &pairs(&[("B", "2")]));
        assert_eq!(out, "A=1\n\nB=2");
    }

    #[test]
    fn applying_twice_is_identical_to_once() {
        let batch = pairs(&[
            ("APP_KEY", "base64:abc"),
            ("DB_PASSWORD", "\"p@ss=word\""),
            ("NEW_KEY", "value"),
        ]);
        let content = "APP_NAME=Demo\nAPP_KEY=\n\n# comment\nDB_PASSWORD=";
        let (once, _, _) = apply_updates(content, &batch);
        let (twice, replaced, appended) = apply_updates(&once, &batch);
        assert_eq!(once, twice);
        assert_eq!((replaced, appended), (3, 0));
    }

    #[tokio::test]
    async fn update_writes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "APP_NAME=Demo\nAPP_ENV=local").unwrap();
        let env = EnvFile::new(&path);

        let batch = [("APP_ENV", "production"), ("APP_INSTALLED", "true")];
        let first = env.update(batch).await.unwrap();
        assert_eq!(first, ConfigUpdate::Applied { replaced: 1, appended: 1 });
        let after_once = std::fs::read_to_string(&path).unwrap();

        env.update(batch).await.unwrap();
        let after_twice = std::fs::read_to_string(&path).unwrap();

        assert_eq!(after_once, "APP_NAME=Demo\nAPP_ENV=production\nAPP_INSTALLED=true");
        assert_eq!(after_once, after_twice);
    }

    #[tokio::test]
    async fn update_on_missing_file_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let env = EnvFile::new(&path);

        let outcome = env.update([("APP_KEY", "x")]).await.unwrap();
        assert_eq!(outcome, ConfigUpdate::MissingFile);
        assert!(!outcome.is_applied());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn invalid_key_aborts_batch_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "A=1").unwrap();
        let env = EnvFile::new(&path);

        let err = env.update([("B", "2"), ("BAD KEY", "3")]).await.unwrap_err();
        assert!(matches!(err, InstallerError::InvalidConfigKey(k) if k == "BAD KEY"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=1");

        let err = env.update([("C", "multi\nline")]).await.unwrap_err();
        assert!(matches!(err, InstallerError::InvalidConfigValue(k) if k == "C"));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "A=1");
    }

    #[tokio::test]
    async fn get_reads_first_matching_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "DB_HOST_READ=r\nDB_HOST=primary\nDB_HOST=second").unwrap();
        let env = EnvFile::new(&path);
        assert_eq!(env.get("DB_HOST").await.unwrap().as_deref(), Some("primary"));
        assert_eq!(env.get("MISSING").await.unwrap(), None);
    }
}
