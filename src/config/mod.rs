use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TABLE: &str = "calfire_zone_risk";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
const PLACEHOLDER_URL: &str = "your_supabase_url_here";

/// Connection settings for the remote table store.
///
/// Loaded from an optional YAML file overlaid with `SUPABASE_*` environment
/// variables (`SUPABASE_URL`, `SUPABASE_KEY`, `SUPABASE_TABLE`,
/// `SUPABASE_TIMEOUT_SECS`).
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub url: String,
    pub key: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl StoreConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("SUPABASE").try_parsing(true))
            .build()
            .context("Config: Failed to read store settings")?;

        let config: StoreConfig = settings
            .try_deserialize()
            .context("Config: SUPABASE_URL and SUPABASE_KEY must be set")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() || self.url.contains(PLACEHOLDER_URL) {
            bail!("Config: Store URL is not configured; set SUPABASE_URL");
        }
        if self.key.trim().is_empty() {
            bail!("Config: Store access key is not configured; set SUPABASE_KEY");
        }
        if self.table.trim().is_empty() {
            bail!("Config: Table name must not be empty");
        }
        Ok(())
    }
}

/// Per-run parameters supplied by the caller.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub source_root: PathBuf,
    pub output_root: PathBuf,
    pub extension: String,
    pub table: String,
    pub chunk_size: NonZeroUsize,
    /// Fixed pause between batches.
    pub pause: Duration,
    pub provenance: bool,
    /// Normalize and export only; nothing is sent to the store.
    pub dry_run: bool,
}

impl RunConfig {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(source_root: P, output_root: Q) -> Self {
        Self {
            source_root: source_root.into(),
            output_root: output_root.into(),
            extension: "shp".to_string(),
            table: DEFAULT_TABLE.to_string(),
            chunk_size: NonZeroUsize::new(DEFAULT_CHUNK_SIZE).unwrap_or(NonZeroUsize::MIN),
            pause: Duration::ZERO,
            provenance: false,
            dry_run: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(url: &str, key: &str) -> StoreConfig {
        StoreConfig {
            url: url.to_string(),
            key: key.to_string(),
            table: default_table(),
            timeout_secs: default_timeout_secs(),
        }
    }

    #[test]
    fn loads_yaml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.yaml");
        std::fs::write(
            &path,
            "url: https://abc.supabase.co\nkey: anon-key\ntimeout_secs: 12\n",
        )
        .unwrap();

        let config = StoreConfig::load(Some(&path)).unwrap();
        assert_eq!(config.url, "https://abc.supabase.co");
        assert_eq!(config.key, "anon-key");
        assert_eq!(config.table, DEFAULT_TABLE);
        assert_eq!(config.timeout_secs, 12);
    }

    #[test]
    fn placeholder_and_blank_settings_are_rejected() {
        assert!(store("https://your_supabase_url_here", "k").validate().is_err());
        assert!(store("", "k").validate().is_err());
        assert!(store("https://abc.supabase.co", " ").validate().is_err());
        assert!(store("https://abc.supabase.co", "k").validate().is_ok());
    }

    #[test]
    fn run_config_defaults() {
        let run = RunConfig::new("unzipped", "fire_hazard_zones");
        assert_eq!(run.chunk_size.get(), 1000);
        assert_eq!(run.table, "calfire_zone_risk");
        assert_eq!(run.extension, "shp");
        assert!(!run.dry_run);
        assert_eq!(run.pause, Duration::ZERO);
    }
}
