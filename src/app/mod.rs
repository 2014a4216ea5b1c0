use anyhow::{Context, Result};
use clap::Parser;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DEFAULT_CHUNK_SIZE, RunConfig, StoreConfig};
use crate::sinks::{PostgrestSink, TableSink};
use crate::source::{FsCatalog, ShapefileReader};
use crate::walker::{DatasetWalker, RunSummary};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory with one subdirectory per dataset
    #[arg(short, long)]
    pub input: PathBuf,

    /// Directory for the cleaned CSV exports
    #[arg(short, long)]
    pub output: PathBuf,

    /// Records per insert request
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,

    /// Store settings file (YAML); SUPABASE_* environment variables override it
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target table (overrides the configured table)
    #[arg(long)]
    pub table: Option<String>,

    /// Geometry file extension to pick up in each dataset folder
    #[arg(long, default_value = "shp")]
    pub extension: String,

    /// Pause between batches in milliseconds
    #[arg(long, default_value_t = 0)]
    pub pause_ms: u64,

    /// Add source_folder and source_file columns to every record
    #[arg(long)]
    pub provenance: bool,

    /// Normalize and export only; do not contact the store
    #[arg(long)]
    pub dry_run: bool,

    /// Check that the store and table are reachable, then exit
    #[arg(long)]
    pub check: bool,

    /// Exit with an error if any file or batch failed
    #[arg(long)]
    pub fail_on_error: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn run_config(&self, store: Option<&StoreConfig>) -> Result<RunConfig> {
        let chunk_size = NonZeroUsize::new(self.chunk_size)
            .context("CLI: --chunk-size must be a positive integer")?;

        let mut config = RunConfig::new(&self.input, &self.output);
        config.extension = self.extension.clone();
        config.chunk_size = chunk_size;
        config.pause = Duration::from_millis(self.pause_ms);
        config.provenance = self.provenance;
        config.dry_run = self.dry_run;
        if let Some(store) = store {
            config.table = store.table.clone();
        }
        if let Some(table) = &self.table {
            config.table = table.clone();
        }
        Ok(config)
    }

    fn store_config(&self) -> Result<StoreConfig> {
        let mut store = StoreConfig::load(self.config.as_deref())?;
        if let Some(table) = &self.table {
            store.table = table.clone();
        }
        Ok(store)
    }
}

/// Builds the remote sink, or `None` for a dry run.
pub fn init_sink(cli: &Cli) -> Result<(Option<StoreConfig>, Option<Box<dyn TableSink>>)> {
    if cli.dry_run {
        tracing::info!("Dry run: records are exported but not loaded");
        return Ok((None, None));
    }

    let store = cli.store_config()?;
    let sink: Box<dyn TableSink> = Box::new(PostgrestSink::new(&store)?);
    tracing::info!("Sink: {} -> table {}", store.url, store.table);
    Ok((Some(store), Some(sink)))
}

/// Verifies the configured table can be read.
pub fn check_connection(cli: &Cli) -> Result<()> {
    let store = cli.store_config()?;
    let sink = PostgrestSink::new(&store)?;
    sink.check(&store.table)?;
    tracing::info!("Store reachable, table {} readable", store.table);
    Ok(())
}

pub fn run(cli: &Cli) -> Result<RunSummary> {
    let (store, sink) = init_sink(cli)?;
    let config = cli.run_config(store.as_ref())?;

    tracing::info!(
        "Processing {:?} -> {:?} (chunk size {}, table {})",
        config.source_root,
        config.output_root,
        config.chunk_size,
        config.table
    );

    let catalog = FsCatalog::new(&config.source_root, &config.extension);
    let reader = ShapefileReader;
    let mut walker = DatasetWalker::new(&catalog, &reader, sink, config);
    walker.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_run() {
        let cli = Cli::parse_from(["zoneload", "-i", "unzipped", "-o", "fire_hazard_zones"]);
        let config = cli.run_config(None).unwrap();
        assert_eq!(config.chunk_size.get(), 1000);
        assert_eq!(config.table, "calfire_zone_risk");
        assert_eq!(config.extension, "shp");
        assert_eq!(config.source_root, PathBuf::from("unzipped"));
        assert!(!config.dry_run);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let cli = Cli::parse_from(["zoneload", "-i", "a", "-o", "b", "--chunk-size", "0"]);
        assert!(cli.run_config(None).is_err());
    }

    #[test]
    fn table_flag_overrides_store_setting() {
        let store = StoreConfig {
            url: "https://abc.supabase.co".to_string(),
            key: "k".to_string(),
            table: "from_config".to_string(),
            timeout_secs: 30,
        };
        let cli = Cli::parse_from(["zoneload", "-i", "a", "-o", "b"]);
        assert_eq!(cli.run_config(Some(&store)).unwrap().table, "from_config");

        let cli = Cli::parse_from(["zoneload", "-i", "a", "-o", "b", "--table", "staging"]);
        assert_eq!(cli.run_config(Some(&store)).unwrap().table, "staging");
    }

    #[test]
    fn dry_run_needs_no_store() {
        let cli = Cli::parse_from(["zoneload", "-i", "a", "-o", "b", "--dry-run"]);
        let (store, sink) = init_sink(&cli).unwrap();
        assert!(store.is_none());
        assert!(sink.is_none());
    }
}
