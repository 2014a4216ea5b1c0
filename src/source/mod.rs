//! Input side of the pipeline: which files to process and how to read them.
//!
//! The walker only talks to [`DatasetCatalog`] and [`CollectionReader`], so a
//! run can be driven entirely from memory in tests.

use anyhow::{Context, Result};
use geo_types::Geometry;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

mod shp;

pub use shp::ShapefileReader;

/// A single attribute value read from a dataset.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl AttributeValue {
    /// Cell text for delimited exports. `Null` becomes an empty cell.
    pub fn to_cell(&self) -> String {
        match self {
            AttributeValue::Null => String::new(),
            AttributeValue::Text(val) => val.clone(),
            AttributeValue::Integer(val) => val.to_string(),
            AttributeValue::Float(val) => val.to_string(),
            AttributeValue::Boolean(val) => val.to_string(),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Feature {
    pub attributes: BTreeMap<String, AttributeValue>,
    /// `None` for null shapes or shapes that could not be decoded.
    pub geometry: Option<Geometry<f64>>,
}

/// Raw contents of one geometry file, in its source CRS.
#[derive(Clone, Debug, Default)]
pub struct FeatureCollection {
    /// CRS definition as declared by the file (WKT, PROJ string or `EPSG:n`).
    pub crs: Option<String>,
    /// Attribute names in file order, known even when there are no features.
    pub fields: Vec<String>,
    pub features: Vec<Feature>,
}

/// One dataset folder and the geometry files found in it.
#[derive(Debug)]
pub struct DatasetFolder {
    pub name: String,
    pub files: Result<Vec<PathBuf>, String>,
}

pub trait DatasetCatalog {
    fn datasets(&self) -> Result<Vec<DatasetFolder>>;
}

pub trait CollectionReader {
    fn read(&self, path: &Path) -> Result<FeatureCollection>;
}

/// Lists immediate subdirectories of `root` and the files in each that carry
/// `extension`.
pub struct FsCatalog {
    pub root: PathBuf,
    pub extension: String,
}

impl FsCatalog {
    pub fn new<P: Into<PathBuf>>(root: P, extension: &str) -> Self {
        Self {
            root: root.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    fn list_files(&self, folder: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(folder)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension));
            if matches {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

impl DatasetCatalog for FsCatalog {
    fn datasets(&self) -> Result<Vec<DatasetFolder>> {
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Catalog: Failed to list source root {:?}", self.root))?;

        let mut folders = Vec::new();
        for entry in entries {
            let path = entry
                .with_context(|| format!("Catalog: Failed to read entry in {:?}", self.root))?
                .path();
            if !path.is_dir() {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let files = self.list_files(&path).map_err(|err| format!("{err:#}"));
            folders.push(DatasetFolder { name, files });
        }

        folders.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(folders)
    }
}
