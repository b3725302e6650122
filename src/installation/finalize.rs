// Final touches: mark the install complete and publish robots.txt

use crate::error::Result;
use crate::installation::env_file::{ConfigUpdate, EnvFile};
use crate::installation::files::{best_effort_rename, RenameOutcome};
use log::info;
use std::path::Path;
use url::Url;

/// The externally visible root URL, as the application expects it in `APP_URL`
/// (no query, no fragment, no trailing slash).
pub fn normalize_base_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.as_str().trim_end_matches('/').to_string()
}

/// Configuration batch written once the install has succeeded.
pub fn final_env_entries(locale: &str, base_url: Option<&Url>) -> Vec<(String, String)> {
    let mut entries = vec![
        ("APP_LOCALE".to_string(), locale.to_string()),
        ("APP_INSTALLED".to_string(), "true".to_string()),
        ("APP_DEBUG".to_string(), "false".to_string()),
        ("FIREWALL_ENABLED".to_string(), "true".to_string()),
        ("MODEL_CACHE_ENABLED".to_string(), "true".to_string()),
    ];

    if let Some(url) = base_url {
        entries.push(("APP_URL".to_string(), normalize_base_url(url)));
    }

    entries
}

pub async fn apply_final_touches(
    env: &EnvFile,
    base_path: &Path,
    robots_dist: &str,
    robots_file: &str,
    locale: &str,
    base_url: Option<&Url>,
) -> Result<ConfigUpdate> {
    let outcome = env.update(final_env_entries(locale, base_url)).await?;

    let robots = best_effort_rename(
        &base_path.join(robots_dist),
        &base_path.join(robots_file),
        "robots",
    )
    .await;

    info!(
        "[PHASE: finalize] [STEP: final_touches] Final configuration written (applied={}, robots={:?})",
        outcome.is_applied(),
        robots
    );
    if robots == RenameOutcome::Failed {
        info!("[PHASE: finalize] [STEP: final_touches] robots.txt was not published; continuing");
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_without_request_context_omit_app_url() {
        let entries = final_env_entries("en-GB", None);
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "APP_LOCALE",
                "APP_INSTALLED",
                "APP_DEBUG",
                "FIREWALL_ENABLED",
                "MODEL_CACHE_ENABLED"
            ]
        );
        assert_eq!(entries[0].1, "en-GB");
        assert_eq!(entries[2].1, "false");
    }

    #[test]
    fn app_url_is_normalized() {
        let url = Url::parse("https://books.example.com/erp/?step=3#top").unwrap();
        let entries = final_env_entries("fr-FR", Some(&url));
        assert_eq!(
            entries.last().unwrap(),
            &("APP_URL".to_string(), "https://books.example.com/erp".to_string())
        );

        let root = Url::parse("http://localhost:8000").unwrap();
        assert_eq!(normalize_base_url(&root), "http://localhost:8000");
    }

    #[tokio::test]
    async fn final_touches_write_config_and_publish_robots() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "APP_DEBUG=true\nAPP_INSTALLED=false").unwrap();
        std::fs::write(dir.path().join("robots.txt.dist"), "User-agent: *").unwrap();

        let env = EnvFile::new(&env_path);
        let url = Url::parse("https://example.org/").unwrap();
        let outcome = apply_final_touches(
            &env,
            dir.path(),
            "robots.txt.dist",
            "robots.txt",
            "en-GB",
            Some(&url),
        )
        .await
        .unwrap();

        assert!(outcome.is_applied());
        assert_eq!(
            std::fs::read_to_string(&env_path).unwrap(),
            "APP_DEBUG=false\nAPP_INSTALLED=true\nAPP_LOCALE=en-GB\nFIREWALL_ENABLED=true\nMODEL_CACHE_ENABLED=true\nAPP_URL=https://example.org"
        );
        assert!(dir.path().join("robots.txt").exists());
    }

    #[tokio::test]
    async fn missing_robots_dist_does_not_fail() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "").unwrap();

        let env = EnvFile::new(&env_path);
        let outcome = apply_final_touches(&env, dir.path(), "robots.txt.dist", "robots.txt", "en-GB", None)
            .await
            .unwrap();
        assert!(outcome.is_applied());
        assert!(!dir.path().join("robots.txt").exists());
    }
}
