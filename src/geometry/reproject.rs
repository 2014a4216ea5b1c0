use anyhow::{Context, Result, anyhow};
use geo::MapCoordsInPlace;
use geo_types::{Coord, Geometry};
use proj::Proj;

/// Every normalized geometry is expressed in this CRS.
pub const TARGET_CRS: &str = "EPSG:4326";

/// Coordinate transformer from a dataset's declared CRS to WGS84.
///
/// PROJ normalizes the output axis order for visualization, so coordinates
/// come out as (lon, lat).
pub struct Reprojector {
    proj: Proj,
}

impl Reprojector {
    pub fn to_wgs84(source_crs: &str) -> Result<Self> {
        let proj = Proj::new_known_crs(source_crs, TARGET_CRS, None).with_context(|| {
            format!(
                "Normalize: Unreadable source CRS {:?}",
                abbreviate(source_crs)
            )
        })?;
        Ok(Self { proj })
    }

    /// Transforms `geometry` in place. On error the geometry may be partially
    /// transformed and should be discarded.
    pub fn reproject(&self, geometry: &mut Geometry<f64>) -> Result<()> {
        geometry.try_map_coords_in_place(|coord| {
            let (x, y) = self
                .proj
                .convert((coord.x, coord.y))
                .map_err(|err| anyhow!("({}, {}): {}", coord.x, coord.y, err))?;
            if !x.is_finite() || !y.is_finite() {
                return Err(anyhow!("({}, {}) has no finite image", coord.x, coord.y));
            }
            Ok(Coord { x, y })
        })
    }
}

fn abbreviate(crs: &str) -> String {
    const MAX: usize = 80;
    if crs.chars().count() <= MAX {
        crs.to_string()
    } else {
        let head: String = crs.chars().take(MAX).collect();
        format!("{head}...")
    }
}
