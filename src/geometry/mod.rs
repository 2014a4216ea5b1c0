//! Geometry normalization: reprojection to WGS84, validity repair and
//! filtering of empty or unrecoverable geometries.

mod repair;
mod reproject;

pub use repair::repair_geometry;
pub use reproject::Reprojector;

use anyhow::{Result, bail};
use geo::{HasDimensions, Validation};
use geo_types::Geometry;
use std::collections::BTreeMap;

use crate::source::{AttributeValue, Feature, FeatureCollection};

/// Counters describing what the normalizer kept and dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NormalizeStats {
    pub input: usize,
    pub repaired: usize,
    pub dropped_missing: usize,
    pub dropped_unprojectable: usize,
    pub dropped_empty: usize,
    pub dropped_invalid: usize,
}

impl NormalizeStats {
    pub fn dropped(&self) -> usize {
        self.dropped_missing + self.dropped_unprojectable + self.dropped_empty + self.dropped_invalid
    }
}

/// Features in EPSG:4326, each with a non-empty, valid geometry.
#[derive(Clone, Debug, Default)]
pub struct NormalizedCollection {
    /// Attribute names of the source file, whether or not any feature survived.
    pub fields: Vec<String>,
    pub features: Vec<NormalizedFeature>,
    pub stats: NormalizeStats,
}

#[derive(Clone, Debug)]
pub struct NormalizedFeature {
    pub attributes: BTreeMap<String, AttributeValue>,
    pub geometry: Geometry<f64>,
}

impl NormalizedCollection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Reprojects, repairs and filters a collection.
///
/// Fails only when the collection is non-empty and its CRS is missing or
/// cannot be understood by PROJ. Individual geometries that cannot be
/// transformed, are empty, or stay invalid after repair are dropped.
pub fn normalize(collection: FeatureCollection) -> Result<NormalizedCollection> {
    let FeatureCollection {
        crs,
        fields,
        features: source,
    } = collection;
    let mut stats = NormalizeStats {
        input: source.len(),
        ..Default::default()
    };

    if source.is_empty() {
        return Ok(NormalizedCollection {
            fields,
            features: Vec::new(),
            stats,
        });
    }

    let Some(crs) = crs.as_deref() else {
        bail!("Normalize: Source CRS is not declared");
    };
    let reprojector = Reprojector::to_wgs84(crs)?;

    let mut features = Vec::with_capacity(source.len());
    for Feature {
        attributes,
        geometry,
    } in source
    {
        let Some(mut geometry) = geometry else {
            stats.dropped_missing += 1;
            continue;
        };

        if let Err(err) = reprojector.reproject(&mut geometry) {
            tracing::debug!("Dropping geometry that failed to reproject: {:#}", err);
            stats.dropped_unprojectable += 1;
            continue;
        }

        let was_valid = geometry.is_valid();
        let geometry = if was_valid {
            geometry
        } else {
            stats.repaired += 1;
            repair_geometry(geometry)
        };

        if geometry.is_empty() {
            stats.dropped_empty += 1;
            continue;
        }
        if !geometry.is_valid() {
            stats.dropped_invalid += 1;
            continue;
        }

        features.push(NormalizedFeature {
            attributes,
            geometry,
        });
    }

    Ok(NormalizedCollection {
        fields,
        features,
        stats,
    })
}
