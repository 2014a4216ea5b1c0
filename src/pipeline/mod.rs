use anyhow::{Context, Result, bail};
use geozero::ToWkt;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::geometry::NormalizedCollection;
use crate::source::AttributeValue;

pub const GEOMETRY_COLUMN: &str = "geometry";
pub const SOURCE_FOLDER_COLUMN: &str = "source_folder";
pub const SOURCE_FILE_COLUMN: &str = "source_file";

/// A flat row ready for export and insertion. Keys are lower-case and sorted;
/// the geometry is WKT text under [`GEOMETRY_COLUMN`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, AttributeValue>,
}

impl Record {
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.fields.get(key)
    }
}

impl<K: Into<String>> FromIterator<(K, AttributeValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, AttributeValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Projected records plus the sorted column set they share. The columns are
/// known even when no record survived normalization.
#[derive(Clone, Debug, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub records: Vec<Record>,
}

/// Where a dataset came from; written into each record when provenance
/// columns are enabled.
#[derive(Clone, Debug)]
pub struct Provenance {
    pub folder: String,
    pub file: String,
}

/// Flattens a normalized collection into records, preserving feature order.
///
/// Attribute names are lower-cased. Two names that lower-case to the same
/// key, or a name that clashes with a reserved column, fail the whole
/// collection rather than silently overwriting one another.
pub fn project(collection: &NormalizedCollection, provenance: Option<&Provenance>) -> Result<Table> {
    let with_provenance = provenance.is_some();

    let mut columns = BTreeSet::new();
    let mut origins = BTreeMap::new();
    for name in &collection.fields {
        columns.insert(column_for(name, &mut origins, with_provenance)?);
    }
    columns.insert(GEOMETRY_COLUMN.to_string());
    if with_provenance {
        columns.insert(SOURCE_FOLDER_COLUMN.to_string());
        columns.insert(SOURCE_FILE_COLUMN.to_string());
    }

    let mut records = Vec::with_capacity(collection.len());
    for (index, feature) in collection.features.iter().enumerate() {
        let mut fields = BTreeMap::new();
        let mut origins = BTreeMap::new();
        for (name, value) in &feature.attributes {
            let key = column_for(name, &mut origins, with_provenance)?;
            if !columns.contains(&key) {
                columns.insert(key.clone());
            }
            fields.insert(key, value.clone());
        }

        let wkt = feature
            .geometry
            .to_wkt()
            .with_context(|| format!("Project: Failed to encode geometry of feature {}", index))?;
        fields.insert(GEOMETRY_COLUMN.to_string(), AttributeValue::Text(wkt));

        if let Some(provenance) = provenance {
            fields.insert(
                SOURCE_FOLDER_COLUMN.to_string(),
                AttributeValue::Text(provenance.folder.clone()),
            );
            fields.insert(
                SOURCE_FILE_COLUMN.to_string(),
                AttributeValue::Text(provenance.file.clone()),
            );
        }

        records.push(Record { fields });
    }

    Ok(Table {
        columns: columns.into_iter().collect(),
        records,
    })
}

/// Lower-cases `name`, failing on reserved names and on names already seen
/// under another spelling.
fn column_for<'a>(
    name: &'a str,
    origins: &mut BTreeMap<String, &'a str>,
    with_provenance: bool,
) -> Result<String> {
    let key = name.to_lowercase();
    if is_reserved(&key, with_provenance) {
        bail!(
            "Project: Attribute {:?} collides with reserved column {:?}",
            name,
            key
        );
    }
    if let Some(previous) = origins.get(&key) {
        bail!(
            "Project: Attributes {:?} and {:?} both map to column {:?}",
            previous,
            name,
            key
        );
    }
    origins.insert(key.clone(), name);
    Ok(key)
}

fn is_reserved(key: &str, with_provenance: bool) -> bool {
    key == GEOMETRY_COLUMN
        || (with_provenance && (key == SOURCE_FOLDER_COLUMN || key == SOURCE_FILE_COLUMN))
}
