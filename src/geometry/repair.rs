use geo::{BooleanOps, Validation};
use geo_types::{Geometry, MultiPolygon, Polygon};

/// Coerces an invalid geometry into a valid one where possible.
///
/// Polygonal geometries are rebuilt by a boolean union against nothing,
/// which splits self-intersections into separate rings and fixes ring
/// orientation. The union uses the even-odd fill rule: where two parts of
/// the input overlap, the overlap is removed, not merged. This matches
/// a linework-based `make_valid`; it is not a dissolve.
/// A polygon that comes back as exactly one polygon stays a `Polygon`.
/// Already-valid geometries and non-polygonal types are returned unchanged;
/// callers still need to check the result for validity and emptiness.
pub fn repair_geometry(geometry: Geometry<f64>) -> Geometry<f64> {
    if geometry.is_valid() {
        return geometry;
    }

    match geometry {
        Geometry::Polygon(polygon) => {
            collapse(rebuild(&MultiPolygon::new(vec![polygon])))
        }
        Geometry::MultiPolygon(multi) => Geometry::MultiPolygon(rebuild(&multi)),
        Geometry::Rect(rect) => Geometry::Polygon(rect.to_polygon()),
        Geometry::Triangle(triangle) => {
            repair_geometry(Geometry::Polygon(triangle.to_polygon()))
        }
        other => other,
    }
}

fn collapse(mut multi: MultiPolygon<f64>) -> Geometry<f64> {
    if multi.0.len() == 1 {
        Geometry::Polygon(multi.0.remove(0))
    } else {
        Geometry::MultiPolygon(multi)
    }
}

fn rebuild(multi: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    let polygons: Vec<Polygon<f64>> = multi
        .0
        .iter()
        .filter(|polygon| polygon.exterior().0.len() >= 3)
        .cloned()
        .collect();
    MultiPolygon::new(polygons).union(&MultiPolygon::new(vec![]))
}
