//! Geometry utilities: GeoJSON conversion, polygon union and repair,
//! bounding envelopes and geodesic area.

use std::panic::{AssertUnwindSafe, catch_unwind};

use geo::{Area, BooleanOps, BoundingRect, Coord, GeodesicArea, Geometry, LineString, MultiPolygon, Polygon};
use geojson::{Feature, FeatureCollection};
use landreport_shared::{Bounds, Envelope, LandReportError, Result};
use tracing::{debug, warn};

/// Square metres per hectare.
const M2_PER_HA: f64 = 10_000.0;

// ---------------------------------------------------------------------------
// GeoJSON conversion
// ---------------------------------------------------------------------------

/// Convert a feature's GeoJSON geometry, if present and well-formed.
pub fn feature_geometry(feature: &Feature) -> Option<Geometry<f64>> {
    let raw = feature.geometry.as_ref()?;
    match Geometry::<f64>::try_from(raw.clone()) {
        Ok(geometry) => Some(geometry),
        Err(e) => {
            debug!(error = %e, "skipping unconvertible geometry");
            None
        }
    }
}

/// Convert back to a GeoJSON geometry.
pub fn to_geojson(geometry: &Geometry<f64>) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(geometry))
}

// ---------------------------------------------------------------------------
// Classification helpers
// ---------------------------------------------------------------------------

/// Polygonal parts of a geometry; non-areal members contribute nothing.
pub fn polygon_parts(geometry: &Geometry<f64>) -> Vec<Polygon<f64>> {
    match geometry {
        Geometry::Polygon(p) => vec![p.clone()],
        Geometry::MultiPolygon(mp) => mp.0.clone(),
        Geometry::Rect(r) => vec![r.to_polygon()],
        Geometry::Triangle(t) => vec![t.to_polygon()],
        Geometry::GeometryCollection(gc) => gc.iter().flat_map(polygon_parts).collect(),
        _ => Vec::new(),
    }
}

/// `true` for polygons and anything containing one.
pub fn is_areal(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_) => {
            true
        }
        Geometry::GeometryCollection(gc) => gc.iter().any(is_areal),
        _ => false,
    }
}

/// `true` when the geometry has no coordinates at all.
pub fn is_empty(geometry: &Geometry<f64>) -> bool {
    match geometry {
        Geometry::Point(_) | Geometry::Line(_) | Geometry::Rect(_) | Geometry::Triangle(_) => false,
        Geometry::LineString(ls) => ls.0.is_empty(),
        Geometry::Polygon(p) => p.exterior().0.is_empty(),
        Geometry::MultiPoint(mp) => mp.0.is_empty(),
        Geometry::MultiLineString(mls) => mls.iter().all(|ls| ls.0.is_empty()),
        Geometry::MultiPolygon(mp) => mp.iter().all(|p| p.exterior().0.is_empty()),
        Geometry::GeometryCollection(gc) => gc.iter().all(is_empty),
    }
}

/// Geodesic area in hectares. Zero for points and lines.
pub fn area_hectares(geometry: &Geometry<f64>) -> f64 {
    geometry.geodesic_area_unsigned() / M2_PER_HA
}

// ---------------------------------------------------------------------------
// Bounds and envelopes
// ---------------------------------------------------------------------------

/// WGS84 bounding box of one geometry.
pub fn geometry_bounds(geometry: &Geometry<f64>) -> Option<Bounds> {
    let rect = geometry.bounding_rect()?;
    Some(Bounds {
        west: rect.min().x,
        south: rect.min().y,
        east: rect.max().x,
        north: rect.max().y,
    })
}

/// WGS84 bounding box of every geometry yielded.
pub fn combined_bounds<'a>(geometries: impl IntoIterator<Item = &'a Geometry<f64>>) -> Option<Bounds> {
    geometries
        .into_iter()
        .filter_map(geometry_bounds)
        .reduce(|mut acc, b| {
            acc.expand(&b);
            acc
        })
}

/// Web Mercator query envelope of a geometry.
pub fn bounding_envelope(geometry: &Geometry<f64>) -> Option<Envelope> {
    geometry_bounds(geometry).map(|b| Envelope::from_bounds(&b))
}

// ---------------------------------------------------------------------------
// Union and repair
// ---------------------------------------------------------------------------

/// Run a boolean operation, turning a panic inside the overlay engine into
/// [`LandReportError::GeometryRepair`].
pub(crate) fn guarded<T>(op: &str, f: impl FnOnce() -> T) -> Result<T> {
    catch_unwind(AssertUnwindSafe(f))
        .map_err(|_| LandReportError::GeometryRepair(format!("{op} failed on degenerate input")))
}

/// Union of every polygonal feature in a collection, or `None` when the
/// collection holds no polygon.
pub fn union_geometry(collection: &FeatureCollection) -> Option<MultiPolygon<f64>> {
    let polygons: Vec<Polygon<f64>> = collection
        .features
        .iter()
        .filter_map(feature_geometry)
        .flat_map(|g| polygon_parts(&g))
        .collect();
    union_polygons(polygons)
}

/// Dissolve polygons into one multipolygon. Overlaps merge; invalid rings
/// are cleaned first.
pub fn union_polygons(polygons: Vec<Polygon<f64>>) -> Option<MultiPolygon<f64>> {
    if polygons.is_empty() {
        return None;
    }
    let raw = MultiPolygon::new(polygons);
    let merged = match make_valid(&raw) {
        Ok(mp) => mp,
        Err(e) => {
            warn!(error = %e, "parcel union failed, using cleaned parts as-is");
            clean_multipolygon(&raw)
        }
    };
    if merged.0.is_empty() { None } else { Some(merged) }
}

/// Repair a multipolygon: drop non-finite and repeated coordinates, close
/// rings, discard degenerate rings, then resolve self-intersections and
/// overlaps with a self-union.
pub fn make_valid(mp: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
    let cleaned = clean_multipolygon(mp);
    if cleaned.0.is_empty() {
        return Ok(cleaned);
    }
    guarded("self-union", || cleaned.union(&MultiPolygon::new(Vec::new())))
}

fn clean_multipolygon(mp: &MultiPolygon<f64>) -> MultiPolygon<f64> {
    MultiPolygon::new(mp.iter().filter_map(clean_polygon).collect())
}

fn clean_polygon(polygon: &Polygon<f64>) -> Option<Polygon<f64>> {
    let exterior = clean_ring(polygon.exterior())?;
    let interiors = polygon.interiors().iter().filter_map(clean_ring).collect();
    Some(Polygon::new(exterior, interiors))
}

fn clean_ring(ring: &LineString<f64>) -> Option<LineString<f64>> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.0.len() + 1);
    for c in ring.coords() {
        if !(c.x.is_finite() && c.y.is_finite()) {
            continue;
        }
        if coords.last() != Some(c) {
            coords.push(*c);
        }
    }
    if let (Some(first), Some(last)) = (coords.first().copied(), coords.last().copied()) {
        if first != last {
            coords.push(first);
        }
    }
    if coords.len() < 4 {
        return None;
    }
    let ring = LineString::new(coords);
    if Polygon::new(ring.clone(), Vec::new()).unsigned_area() == 0.0 {
        return None;
    }
    Some(ring)
}
