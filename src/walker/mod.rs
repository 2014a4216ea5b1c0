//! Drives the whole run: every dataset file is read, normalized, projected,
//! exported and loaded independently of the others.

use anyhow::{Result, anyhow};
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::geometry::{NormalizeStats, normalize};
use crate::loader::{LoadOptions, LoadSummary, load};
use crate::pipeline::{Provenance, project};
use crate::sinks::{CsvExport, TableSink};
use crate::source::{CollectionReader, DatasetCatalog};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileStatus {
    Processed {
        normalize: NormalizeStats,
        records: usize,
        export: PathBuf,
        load: Option<LoadSummary>,
    },
    Failed {
        error: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileReport {
    pub folder: String,
    pub file: String,
    pub status: FileStatus,
}

impl FileReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.status, FileStatus::Failed { .. })
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub files: Vec<FileReport>,
}

impl RunSummary {
    pub fn failed_files(&self) -> usize {
        self.files.iter().filter(|f| f.is_failed()).count()
    }

    pub fn load_totals(&self) -> LoadSummary {
        let mut total = LoadSummary::default();
        for report in &self.files {
            if let FileStatus::Processed {
                load: Some(load), ..
            } = &report.status
            {
                total.merge(load);
            }
        }
        total
    }

    /// True when any file failed or any batch was rejected.
    pub fn has_failures(&self) -> bool {
        self.failed_files() > 0 || self.load_totals().failed > 0
    }

    pub fn log(&self) {
        let mut records = 0;
        let mut dropped = 0;
        let mut exports = Vec::new();
        for report in &self.files {
            if let FileStatus::Processed {
                normalize,
                records: count,
                export,
                ..
            } = &report.status
            {
                records += count;
                dropped += normalize.dropped();
                if !exports.contains(export) {
                    exports.push(export.clone());
                }
            }
        }
        tracing::info!(
            "Exported {} records to {} files, dropped {} features",
            records,
            exports.len(),
            dropped
        );

        let totals = self.load_totals();
        let rows = totals.rows_inserted + totals.rows_failed;
        let rate = if rows == 0 {
            100.0
        } else {
            totals.rows_inserted as f64 * 100.0 / rows as f64
        };
        tracing::info!(
            "Run complete: {} files ({} failed), {} batches ({} ok, {} failed), {} rows inserted, {} rows failed, {:.1}% success",
            self.files.len(),
            self.failed_files(),
            totals.attempted,
            totals.succeeded,
            totals.failed,
            totals.rows_inserted,
            totals.rows_failed,
            rate
        );
    }
}

/// Sequential walker over a catalog of dataset folders.
///
/// The sink is supplied by the caller; `None` is only valid for dry runs.
pub struct DatasetWalker<'a> {
    catalog: &'a dyn DatasetCatalog,
    reader: &'a dyn CollectionReader,
    sink: Option<Box<dyn TableSink + 'a>>,
    export: CsvExport,
    config: RunConfig,
}

impl<'a> DatasetWalker<'a> {
    pub fn new(
        catalog: &'a dyn DatasetCatalog,
        reader: &'a dyn CollectionReader,
        sink: Option<Box<dyn TableSink + 'a>>,
        config: RunConfig,
    ) -> Self {
        Self {
            catalog,
            reader,
            sink,
            export: CsvExport::new(&config.output_root),
            config,
        }
    }

    /// Processes every file. Only a failure to list the catalog itself is
    /// returned as an error; everything else is reported per file.
    pub fn run(&mut self) -> Result<RunSummary> {
        let folders = self.catalog.datasets()?;
        tracing::info!("Found {} dataset folders", folders.len());

        let mut summary = RunSummary::default();
        for (folder_index, folder) in folders.into_iter().enumerate() {
            let files = match folder.files {
                Ok(files) => files,
                Err(error) => {
                    tracing::error!(
                        "Exception listing folder {} ({}): {}",
                        folder_index,
                        folder.name,
                        error
                    );
                    summary.files.push(FileReport {
                        folder: folder.name,
                        file: String::new(),
                        status: FileStatus::Failed { error },
                    });
                    continue;
                }
            };

            if files.is_empty() {
                tracing::warn!("No geometry files found in {}", folder.name);
            }

            for (file_index, path) in files.iter().enumerate() {
                let file = file_name(path);
                let context = format!(
                    "file {} ({}) in folder {} ({})",
                    file_index, file, folder_index, folder.name
                );

                let status = match self.process_file(&folder.name, path, &context) {
                    Ok(status) => status,
                    Err(err) => {
                        tracing::error!("Exception processing {}: {:#}", context, err);
                        FileStatus::Failed {
                            error: format!("{err:#}"),
                        }
                    }
                };

                summary.files.push(FileReport {
                    folder: folder.name.clone(),
                    file,
                    status,
                });
            }
        }

        Ok(summary)
    }

    fn process_file(&mut self, folder: &str, path: &Path, context: &str) -> Result<FileStatus> {
        tracing::info!("Processing {}", context);

        let collection = self.reader.read(path)?;
        let normalized = normalize(collection)?;
        let stats = normalized.stats;
        if normalized.is_empty() {
            tracing::warn!("No usable features in {}", context);
        }
        if stats.repaired > 0 {
            tracing::info!("Repaired {} geometries for {}", stats.repaired, context);
        }
        if stats.dropped() > 0 {
            tracing::info!(
                "Dropped {} of {} features for {} (missing {}, unprojectable {}, empty {}, invalid {})",
                stats.dropped(),
                stats.input,
                context,
                stats.dropped_missing,
                stats.dropped_unprojectable,
                stats.dropped_empty,
                stats.dropped_invalid
            );
        }

        let provenance = self.config.provenance.then(|| Provenance {
            folder: folder.to_string(),
            file: file_name(path),
        });
        let table = project(&normalized, provenance.as_ref())?;
        let records = &table.records;

        let export = self.export.write(folder, &table)?;
        tracing::info!("Exported {} records to {:?}", records.len(), export);

        if self.config.dry_run {
            return Ok(FileStatus::Processed {
                normalize: stats,
                records: records.len(),
                export,
                load: None,
            });
        }

        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| anyhow!("Load: No table sink configured for {}", context))?;
        let options = LoadOptions {
            table: self.config.table.clone(),
            chunk_size: self.config.chunk_size,
            pause: self.config.pause,
        };
        let outcomes = load(records, &options, sink, context);
        let load_summary = LoadSummary::from_outcomes(&outcomes);
        tracing::info!(
            "Loaded {}: {} batches attempted, {} succeeded, {} failed",
            context,
            load_summary.attempted,
            load_summary.succeeded,
            load_summary.failed
        );

        Ok(FileStatus::Processed {
            normalize: stats,
            records: records.len(),
            export,
            load: Some(load_summary),
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::testing::RecordingSink;
    use crate::pipeline::Record;
    use crate::sinks::InsertOutcome;
    use crate::source::{AttributeValue, DatasetFolder, Feature, FeatureCollection};
    use anyhow::bail;
    use geo_types::{Geometry, polygon};
    use std::cell::RefCell;
    use std::num::NonZeroUsize;
    use std::rc::Rc;

    struct StaticCatalog {
        folders: Vec<(&'static str, Result<Vec<&'static str>, &'static str>)>,
    }

    impl DatasetCatalog for StaticCatalog {
        fn datasets(&self) -> Result<Vec<DatasetFolder>> {
            Ok(self
                .folders
                .iter()
                .map(|(name, files)| DatasetFolder {
                    name: name.to_string(),
                    files: files
                        .clone()
                        .map(|files| files.iter().map(|f| PathBuf::from(name).join(f)).collect())
                        .map_err(|e| e.to_string()),
                })
                .collect())
        }
    }

    struct BrokenCatalog;

    impl DatasetCatalog for BrokenCatalog {
        fn datasets(&self) -> Result<Vec<DatasetFolder>> {
            bail!("Catalog: Failed to list source root")
        }
    }

    /// Serves `count` unit squares per file; files whose folder is listed in
    /// `broken` fail to read.
    struct FakeReader {
        count: usize,
        broken: Vec<&'static str>,
    }

    impl CollectionReader for FakeReader {
        fn read(&self, path: &Path) -> Result<FeatureCollection> {
            let folder = path
                .parent()
                .and_then(|p| p.to_str())
                .unwrap_or_default();
            if self.broken.contains(&folder) {
                bail!("Reader: Failed to open shapefile {:?}", path);
            }
            let features = (0..self.count)
                .map(|i| Feature {
                    attributes: [("OBJECTID".to_string(), AttributeValue::Integer(i as i64))]
                        .into_iter()
                        .collect(),
                    geometry: Some(Geometry::Polygon(polygon![
                        (x: 0.0, y: 0.0),
                        (x: 1.0, y: 0.0),
                        (x: 1.0, y: 1.0),
                        (x: 0.0, y: 1.0),
                        (x: 0.0, y: 0.0),
                    ])),
                })
                .collect();
            Ok(FeatureCollection {
                crs: Some("EPSG:4326".to_string()),
                fields: vec!["OBJECTID".to_string()],
                features,
            })
        }
    }

    /// Lets a test inspect batches after the walker has consumed the sink.
    struct SharedSink(Rc<RefCell<RecordingSink>>);

    impl TableSink for SharedSink {
        fn insert(&mut self, table: &str, records: &[Record]) -> InsertOutcome {
            self.0.borrow_mut().insert(table, records)
        }
    }

    fn run_config(output: &Path, chunk_size: usize) -> RunConfig {
        let mut config = RunConfig::new("unused", output);
        config.chunk_size = NonZeroUsize::new(chunk_size).unwrap();
        config
    }

    #[test]
    fn failing_folder_is_isolated() {
        let out = tempfile::tempdir().unwrap();
        let catalog = StaticCatalog {
            folders: vec![
                ("alameda", Ok(vec!["a.shp"])),
                ("butte", Ok(vec!["b.shp"])),
                ("colusa", Ok(vec!["c.shp"])),
            ],
        };
        let reader = FakeReader {
            count: 3,
            broken: vec!["butte"],
        };
        let recorder = Rc::new(RefCell::new(RecordingSink::default()));
        let sink: Box<dyn TableSink> = Box::new(SharedSink(Rc::clone(&recorder)));

        let mut walker = DatasetWalker::new(&catalog, &reader, Some(sink), run_config(out.path(), 2));
        let summary = walker.run().unwrap();

        let folders: Vec<(&str, bool)> = summary
            .files
            .iter()
            .map(|f| (f.folder.as_str(), f.is_failed()))
            .collect();
        assert_eq!(
            folders,
            vec![("alameda", false), ("butte", true), ("colusa", false)]
        );
        assert!(out.path().join("alameda_clean.csv").exists());
        assert!(!out.path().join("butte_clean.csv").exists());
        assert!(out.path().join("colusa_clean.csv").exists());

        // Two files of three records in chunks of two
        assert_eq!(recorder.borrow().batches.len(), 4);
        let totals = summary.load_totals();
        assert_eq!(totals.attempted, 4);
        assert_eq!(totals.rows_inserted, 6);
        assert!(summary.has_failures());
    }

    #[test]
    fn rejected_batches_are_counted_per_file() {
        let out = tempfile::tempdir().unwrap();
        let catalog = StaticCatalog {
            folders: vec![("placer", Ok(vec!["zones.shp"]))],
        };
        let reader = FakeReader {
            count: 2500,
            broken: vec![],
        };
        let sink: Box<dyn TableSink> = Box::new(RecordingSink::failing_on(&[1]));

        let mut walker =
            DatasetWalker::new(&catalog, &reader, Some(sink), run_config(out.path(), 1000));
        let summary = walker.run().unwrap();

        let FileStatus::Processed { records, load, .. } = &summary.files[0].status else {
            panic!("file failed: {:?}", summary.files[0]);
        };
        assert_eq!(*records, 2500);
        let load = load.unwrap();
        assert_eq!((load.attempted, load.succeeded, load.failed), (3, 2, 1));
        assert_eq!(load.rows_inserted, 1500);
        assert_eq!(load.rows_failed, 1000);

        let csv = std::fs::read_to_string(out.path().join("placer_clean.csv")).unwrap();
        assert_eq!(csv.lines().count(), 2501);
    }

    #[test]
    fn unlistable_folder_is_reported_and_skipped() {
        let out = tempfile::tempdir().unwrap();
        let catalog = StaticCatalog {
            folders: vec![
                ("locked", Err("permission denied")),
                ("open", Ok(vec!["z.shp"])),
            ],
        };
        let reader = FakeReader {
            count: 1,
            broken: vec![],
        };
        let mut config = run_config(out.path(), 10);
        config.dry_run = true;

        let mut walker = DatasetWalker::new(&catalog, &reader, None, config);
        let summary = walker.run().unwrap();

        assert_eq!(summary.files.len(), 2);
        assert_eq!(
            summary.files[0].status,
            FileStatus::Failed {
                error: "permission denied".to_string()
            }
        );
        assert!(!summary.files[1].is_failed());
    }

    #[test]
    fn dry_run_exports_without_loading() {
        let out = tempfile::tempdir().unwrap();
        let catalog = StaticCatalog {
            folders: vec![("sierra", Ok(vec!["s.shp"]))],
        };
        let reader = FakeReader {
            count: 5,
            broken: vec![],
        };
        let mut config = run_config(out.path(), 2);
        config.dry_run = true;
        config.provenance = true;

        let mut walker = DatasetWalker::new(&catalog, &reader, None, config);
        let summary = walker.run().unwrap();

        let FileStatus::Processed { load, records, .. } = &summary.files[0].status else {
            panic!("file failed: {:?}", summary.files[0]);
        };
        assert_eq!(*records, 5);
        assert!(load.is_none());
        assert!(!summary.has_failures());

        let mut reader = csv::Reader::from_path(out.path().join("sierra_clean.csv")).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, vec!["geometry", "objectid", "source_file", "source_folder"]);
        let first = reader.records().next().unwrap().unwrap();
        assert_eq!(&first[2], "s.shp");
        assert_eq!(&first[3], "sierra");
    }

    #[test]
    fn featureless_file_exports_header_only() {
        let out = tempfile::tempdir().unwrap();
        let catalog = StaticCatalog {
            folders: vec![("modoc", Ok(vec!["m.shp"]))],
        };
        let reader = FakeReader {
            count: 0,
            broken: vec![],
        };
        let mut config = run_config(out.path(), 2);
        config.dry_run = true;

        let mut walker = DatasetWalker::new(&catalog, &reader, None, config);
        let summary = walker.run().unwrap();
        assert!(!summary.has_failures());

        let contents = std::fs::read_to_string(out.path().join("modoc_clean.csv")).unwrap();
        assert_eq!(contents.lines().collect::<Vec<_>>(), vec!["geometry,objectid"]);
    }

    #[test]
    fn missing_sink_fails_each_file_when_loading() {
        let out = tempfile::tempdir().unwrap();
        let catalog = StaticCatalog {
            folders: vec![("a", Ok(vec!["a.shp"])), ("b", Ok(vec!["b.shp"]))],
        };
        let reader = FakeReader {
            count: 1,
            broken: vec![],
        };
        let mut walker = DatasetWalker::new(&catalog, &reader, None, run_config(out.path(), 10));
        let summary = walker.run().unwrap();
        assert_eq!(summary.failed_files(), 2);
    }

    #[test]
    fn catalog_failure_is_the_only_fatal_error() {
        let out = tempfile::tempdir().unwrap();
        let reader = FakeReader {
            count: 1,
            broken: vec![],
        };
        let mut walker = DatasetWalker::new(&BrokenCatalog, &reader, None, run_config(out.path(), 10));
        assert!(walker.run().is_err());
    }
}
