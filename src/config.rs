use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime settings, built once in `main` and handed to each workflow.
///
/// Every field can be overridden with a `COLLEGE_`-prefixed environment
/// variable, e.g. `COLLEGE_DB_PATH` or `COLLEGE_RATE_LIMIT_DELAY_MS`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub source_collection: String,
    pub target_collection: String,
    pub transform_batch_size: usize,
    pub enrich_batch_size: usize,
    pub assign_batch_size: usize,
    pub request_timeout_ms: u64,
    pub rate_limit_delay_ms: u64,
    pub max_body_bytes: usize,
    pub user_agent: String,
    pub enrichment_file: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/studentsignal.sqlite"),
            source_collection: "colleges".into(),
            target_collection: "colleges_ui".into(),
            transform_batch_size: 1000,
            enrich_batch_size: 50,
            assign_batch_size: 500,
            request_timeout_ms: 5000,
            rate_limit_delay_ms: 100,
            max_body_bytes: 1024 * 1024,
            user_agent: "StudentSignal/1.0 (Image Enrichment Bot)".into(),
            enrichment_file: PathBuf::from("scholarship_manual_enrichment.json"),
        }
    }
}

impl Settings {
    pub fn load() -> Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::Environment::with_prefix("COLLEGE").try_parsing(true))
            .build()
            .context("Failed to read COLLEGE_* environment")?
            .try_deserialize()
            .context("Invalid COLLEGE_* setting")?;
        settings.check()?;
        Ok(settings)
    }

    /// Collection names end up inside SQL, so they must be plain identifiers.
    fn check(&self) -> Result<()> {
        for name in [&self.source_collection, &self.target_collection] {
            anyhow::ensure!(
                is_identifier(name),
                "collection name {:?} must be [A-Za-z_][A-Za-z0-9_]*",
                name
            );
        }
        anyhow::ensure!(self.transform_batch_size > 0, "transform_batch_size must be > 0");
        anyhow::ensure!(self.enrich_batch_size > 0, "enrich_batch_size must be > 0");
        anyhow::ensure!(self.assign_batch_size > 0, "assign_batch_size must be > 0");
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_collection_names_that_are_not_identifiers() {
        let mut s = Settings::default();
        assert!(s.check().is_ok());
        s.target_collection = "colleges_ui; DROP TABLE colleges".into();
        assert!(s.check().is_err());
        s.target_collection = "1colleges".into();
        assert!(s.check().is_err());
    }

    #[test]
    fn defaults_match_batch_policy() {
        let s = Settings::default();
        assert_eq!(s.transform_batch_size, 1000);
        assert_eq!(s.enrich_batch_size, 50);
        assert_eq!(s.request_timeout(), Duration::from_secs(5));
        assert_eq!(s.rate_limit_delay(), Duration::from_millis(100));
        assert_eq!(s.max_body_bytes, 1_048_576);
    }

    #[test]
    fn empty_source_falls_back_to_defaults() {
        let s: Settings = config::Config::builder()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(s.target_collection, "colleges_ui");
        assert_eq!(s.db_path, PathBuf::from("data/studentsignal.sqlite"));
    }
}
