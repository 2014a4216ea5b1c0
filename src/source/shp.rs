use super::{AttributeValue, CollectionReader, Feature, FeatureCollection};
use anyhow::{Context, Result};
use geo_types::Geometry;
use shapefile::dbase::FieldValue;
use shapefile::Shape;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Reads ESRI shapefiles. The CRS is taken from the `.prj` sidecar next to
/// the `.shp`; attributes come from the `.dbf`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapefileReader;

impl CollectionReader for ShapefileReader {
    fn read(&self, path: &Path) -> Result<FeatureCollection> {
        let crs = read_prj(path)?;
        let fields = read_field_names(path)?;

        let mut reader = shapefile::Reader::from_path(path)
            .with_context(|| format!("Reader: Failed to open shapefile {:?}", path))?;

        let mut features = Vec::new();
        for (index, result) in reader.iter_shapes_and_records().enumerate() {
            let (shape, record) = result
                .with_context(|| format!("Reader: Failed to read record {} of {:?}", index, path))?;

            let attributes: BTreeMap<String, AttributeValue> = HashMap::from(record)
                .into_iter()
                .map(|(name, value)| (name, convert_field(value)))
                .collect();

            features.push(Feature {
                attributes,
                geometry: convert_shape(shape, index),
            });
        }

        tracing::debug!("Read {} features from {:?}", features.len(), path);
        Ok(FeatureCollection {
            crs,
            fields,
            features,
        })
    }
}

/// Returns the projection definition next to `shp_path`, or `None` when the
/// sidecar is missing or blank.
fn read_prj(shp_path: &Path) -> Result<Option<String>> {
    let prj_path = shp_path.with_extension("prj");
    if !prj_path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(&prj_path)
        .with_context(|| format!("Reader: Failed to read projection file {:?}", prj_path))?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

/// dBase reports its record deletion marker alongside the real fields.
const DELETION_FLAG: &str = "DeletionFlag";

/// Attribute names from the `.dbf` header, so the schema survives a file
/// with no records.
fn read_field_names(shp_path: &Path) -> Result<Vec<String>> {
    let dbf_path = shp_path.with_extension("dbf");
    let reader = shapefile::dbase::Reader::from_path(&dbf_path)
        .with_context(|| format!("Reader: Failed to open attribute table {:?}", dbf_path))?;
    Ok(reader
        .fields()
        .iter()
        .map(|field| field.name().to_string())
        .filter(|name| name != DELETION_FLAG)
        .collect())
}

fn convert_shape(shape: Shape, index: usize) -> Option<Geometry<f64>> {
    if matches!(shape, Shape::NullShape) {
        return None;
    }
    match Geometry::<f64>::try_from(shape) {
        Ok(geometry) => Some(geometry),
        Err(err) => {
            tracing::debug!("Skipping undecodable shape {}: {}", index, err);
            None
        }
    }
}

fn convert_field(value: FieldValue) -> AttributeValue {
    match value {
        FieldValue::Character(val) => val.map_or(AttributeValue::Null, AttributeValue::Text),
        FieldValue::Memo(val) => AttributeValue::Text(val),
        FieldValue::Numeric(val) => val.map_or(AttributeValue::Null, AttributeValue::Float),
        FieldValue::Float(val) => val.map_or(AttributeValue::Null, |v| {
            AttributeValue::Float(f64::from(v))
        }),
        FieldValue::Double(val) | FieldValue::Currency(val) => AttributeValue::Float(val),
        FieldValue::Integer(val) => AttributeValue::Integer(i64::from(val)),
        FieldValue::Logical(val) => val.map_or(AttributeValue::Null, AttributeValue::Boolean),
        FieldValue::Date(val) => val.map_or(AttributeValue::Null, |d| {
            AttributeValue::Text(format!("{:04}-{:02}-{:02}", d.year(), d.month(), d.day()))
        }),
        FieldValue::DateTime(val) => {
            let (date, time) = (val.date(), val.time());
            AttributeValue::Text(format!(
                "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}",
                date.year(),
                date.month(),
                date.day(),
                time.hours(),
                time.minutes(),
                time.seconds()
            ))
        }
    }
}
