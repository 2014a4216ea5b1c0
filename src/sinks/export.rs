use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::pipeline::{Record, Table};
use crate::source::AttributeValue;

/// Writes the cleaned copy of a dataset as `<folder>_clean.csv`.
pub struct CsvExport {
    output_root: PathBuf,
}

impl CsvExport {
    pub fn new<P: Into<PathBuf>>(output_root: P) -> Self {
        Self {
            output_root: output_root.into(),
        }
    }

    pub fn path_for(&self, folder: &str) -> PathBuf {
        self.output_root.join(format!("{folder}_clean.csv"))
    }

    /// Writes `table` and returns the file path. The header is always
    /// written, so a table without records still yields one line.
    pub fn write(&self, folder: &str, table: &Table) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_root).with_context(|| {
            format!("Export: Failed to create output directory {:?}", self.output_root)
        })?;

        let path = self.path_for(folder);
        write_csv(&path, table)
            .with_context(|| format!("Export: Failed to write {:?}", path))?;
        Ok(path)
    }
}

fn write_csv(path: &Path, table: &Table) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;

    writer.write_record(&table.columns)?;
    for record in &table.records {
        writer.write_record(row(&table.columns, record))?;
    }

    writer.flush()?;
    Ok(())
}

fn row<'a>(columns: &'a [String], record: &'a Record) -> impl Iterator<Item = String> + 'a {
    columns
        .iter()
        .map(|column| record.get(column).map_or_else(String::new, AttributeValue::to_cell))
}
