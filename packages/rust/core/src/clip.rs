//! Clip & aggregate engine.
//!
//! Candidates from one thematic source are intersected with the parcel
//! union. Areal intersections go through an ordered list of
//! [`RepairStrategy`]s; when every strategy fails the candidate is kept
//! unclipped and marked [`ClipOutcome::PassThrough`] instead of being lost.

use geo::{
    BooleanOps, Geometry, GeometryCollection, Intersects, MultiLineString, MultiPoint, MultiPolygon,
    SimplifyVwPreserve, Validation,
};
use landreport_shared::{ClassifiedShape, ClipOutcome, LandReportError, Result};
use tracing::{debug, info, instrument, warn};

use crate::geometry::{area_hectares, guarded, is_areal, is_empty, make_valid, polygon_parts};

/// A raw thematic feature awaiting clipping.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub geometry: Geometry<f64>,
    pub code: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Repair strategies
// ---------------------------------------------------------------------------

/// One attempt at intersecting a polygonal candidate with the parcel union.
pub trait RepairStrategy: Send + Sync {
    /// Intersect, or fail with [`LandReportError::GeometryRepair`].
    fn intersect(
        &self,
        candidate: &MultiPolygon<f64>,
        boundary: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>>;

    /// Strategy name for tracing.
    fn name(&self) -> &'static str;
}

/// Plain intersection; refuses invalid inputs.
pub struct DirectIntersection;

impl RepairStrategy for DirectIntersection {
    fn intersect(
        &self,
        candidate: &MultiPolygon<f64>,
        boundary: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>> {
        if !candidate.is_valid() || !boundary.is_valid() {
            return Err(LandReportError::GeometryRepair("invalid input topology".into()));
        }
        guarded("intersection", || candidate.intersection(boundary))
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

/// Repair the candidate, then intersect.
pub struct RepairCandidate;

impl RepairStrategy for RepairCandidate {
    fn intersect(
        &self,
        candidate: &MultiPolygon<f64>,
        boundary: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>> {
        let repaired = make_valid(candidate)?;
        guarded("intersection", || repaired.intersection(boundary))
    }

    fn name(&self) -> &'static str {
        "repair-candidate"
    }
}

/// Repair both sides, then intersect.
pub struct RepairBoth;

impl RepairStrategy for RepairBoth {
    fn intersect(
        &self,
        candidate: &MultiPolygon<f64>,
        boundary: &MultiPolygon<f64>,
    ) -> Result<MultiPolygon<f64>> {
        let candidate = make_valid(candidate)?;
        let boundary = make_valid(boundary)?;
        guarded("intersection", || candidate.intersection(&boundary))
    }

    fn name(&self) -> &'static str {
        "repair-both"
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Holds repair strategies in the order they are tried.
pub struct ClipEngine {
    strategies: Vec<Box<dyn RepairStrategy>>,
}

impl ClipEngine {
    /// Engine with a custom strategy chain.
    pub fn new(strategies: Vec<Box<dyn RepairStrategy>>) -> Self {
        Self { strategies }
    }

    /// Clip one geometry against the parcel union.
    ///
    /// Returns `None` when the geometry is empty, misses the boundary, or
    /// clips away to nothing.
    pub fn clip(
        &self,
        geometry: &Geometry<f64>,
        boundary: Option<&MultiPolygon<f64>>,
    ) -> Option<(Geometry<f64>, ClipOutcome)> {
        if is_empty(geometry) {
            return None;
        }
        let boundary = match boundary {
            Some(b) if !b.0.is_empty() => b,
            _ => return Some((geometry.clone(), ClipOutcome::Unbounded)),
        };
        if !geometry.intersects(boundary) {
            return None;
        }

        let clipped = match geometry {
            Geometry::Point(p) => Some((Geometry::Point(*p), ClipOutcome::Clipped)),
            Geometry::MultiPoint(mp) => {
                let inside: Vec<_> = mp.iter().filter(|p| p.intersects(boundary)).copied().collect();
                Some((Geometry::MultiPoint(MultiPoint::new(inside)), ClipOutcome::Clipped))
            }
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(self.clip_lines(geometry, boundary))
            }
            Geometry::GeometryCollection(gc) => self.clip_collection(gc, boundary),
            _ => Some(self.clip_areal(geometry, boundary)),
        }?;

        if is_empty(&clipped.0) { None } else { Some(clipped) }
    }

    fn clip_areal(
        &self,
        geometry: &Geometry<f64>,
        boundary: &MultiPolygon<f64>,
    ) -> (Geometry<f64>, ClipOutcome) {
        let candidate = MultiPolygon::new(polygon_parts(geometry));
        for strategy in &self.strategies {
            match strategy.intersect(&candidate, boundary) {
                Ok(result) => {
                    debug!(strategy = strategy.name(), parts = result.0.len(), "clipped");
                    return (collapse_multipolygon(result), ClipOutcome::Clipped);
                }
                Err(e) => debug!(strategy = strategy.name(), error = %e, "clip strategy failed"),
            }
        }
        warn!(
            strategies = self.strategies.len(),
            "every clip strategy failed, keeping unclipped geometry"
        );
        (geometry.clone(), ClipOutcome::PassThrough)
    }

    fn clip_lines(
        &self,
        geometry: &Geometry<f64>,
        boundary: &MultiPolygon<f64>,
    ) -> (Geometry<f64>, ClipOutcome) {
        let lines = match geometry {
            Geometry::Line(l) => MultiLineString::new(vec![geo::LineString::from(vec![l.start, l.end])]),
            Geometry::LineString(ls) => MultiLineString::new(vec![ls.clone()]),
            Geometry::MultiLineString(mls) => mls.clone(),
            _ => return (geometry.clone(), ClipOutcome::Clipped),
        };
        match guarded("line clip", || boundary.clip(&lines, false)) {
            Ok(clipped) => {
                let geometry = if clipped.0.len() == 1 {
                    Geometry::LineString(clipped.0[0].clone())
                } else {
                    Geometry::MultiLineString(clipped)
                };
                (geometry, ClipOutcome::Clipped)
            }
            Err(e) => {
                warn!(error = %e, "line clip failed, keeping unclipped geometry");
                (geometry.clone(), ClipOutcome::PassThrough)
            }
        }
    }

    fn clip_collection(
        &self,
        collection: &GeometryCollection<f64>,
        boundary: &MultiPolygon<f64>,
    ) -> Option<(Geometry<f64>, ClipOutcome)> {
        let mut outcome = ClipOutcome::Clipped;
        let mut parts = Vec::new();
        for member in collection.iter() {
            if let Some((clipped, member_outcome)) = self.clip(member, Some(boundary)) {
                if member_outcome == ClipOutcome::PassThrough {
                    outcome = ClipOutcome::PassThrough;
                }
                parts.push(clipped);
            }
        }
        if parts.is_empty() {
            return None;
        }
        Some((Geometry::GeometryCollection(GeometryCollection(parts)), outcome))
    }
}

impl Default for ClipEngine {
    /// Direct intersection, then candidate repair, then repair of both sides.
    fn default() -> Self {
        Self::new(vec![
            Box::new(DirectIntersection),
            Box::new(RepairCandidate),
            Box::new(RepairBoth),
        ])
    }
}

fn collapse_multipolygon(mp: MultiPolygon<f64>) -> Geometry<f64> {
    if mp.0.len() == 1 {
        let mut parts = mp.0;
        Geometry::Polygon(parts.remove(0))
    } else {
        Geometry::MultiPolygon(mp)
    }
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Clip one candidate and compute its area from the result.
///
/// `None` when the result is empty or an areal result has zero area.
pub fn clip_candidate(
    engine: &ClipEngine,
    candidate: Candidate,
    boundary: Option<&MultiPolygon<f64>>,
) -> Option<ClassifiedShape> {
    let Some((geometry, clip)) = engine.clip(&candidate.geometry, boundary) else {
        debug!(code = %candidate.code, "candidate outside parcel");
        return None;
    };
    let area_ha = area_hectares(&geometry);
    if is_areal(&geometry) && area_ha <= 0.0 {
        debug!(code = %candidate.code, "zero-area clip result dropped");
        return None;
    }
    if clip == ClipOutcome::PassThrough {
        warn!(code = %candidate.code, "shape kept unclipped and may extend outside the parcel");
    }
    Some(ClassifiedShape {
        geometry,
        code: candidate.code,
        name: candidate.name,
        area_ha,
        clip,
    })
}

/// Clip every candidate, dropping the ones that leave nothing behind.
#[instrument(skip_all, fields(candidates = candidates.len(), bounded = boundary.is_some()))]
pub fn prepare_clipped_shapes(
    engine: &ClipEngine,
    candidates: Vec<Candidate>,
    boundary: Option<&MultiPolygon<f64>>,
) -> Vec<ClassifiedShape> {
    let total = candidates.len();
    let shapes: Vec<ClassifiedShape> = candidates
        .into_iter()
        .filter_map(|candidate| clip_candidate(engine, candidate, boundary))
        .collect();
    info!(kept = shapes.len(), total, "candidates clipped");
    shapes
}

/// Topology-preserving simplification with the given tolerance in degrees.
///
/// A shape that simplifies away to nothing keeps its unsimplified geometry.
pub fn simplify_shapes(shapes: Vec<ClassifiedShape>, tolerance: f64) -> Vec<ClassifiedShape> {
    if tolerance <= 0.0 {
        return shapes;
    }
    // Visvalingam works on triangle areas, so square the linear tolerance.
    let epsilon = tolerance * tolerance;

    shapes
        .into_iter()
        .map(|shape| {
            let simplified = simplify_geometry(&shape.geometry, epsilon);
            let area_ha = area_hectares(&simplified);
            if is_empty(&simplified) || (is_areal(&shape.geometry) && area_ha <= 0.0) {
                debug!(code = %shape.code, "simplification emptied shape, keeping original");
                return shape;
            }
            ClassifiedShape {
                geometry: simplified,
                area_ha,
                ..shape
            }
        })
        .collect()
}

fn simplify_geometry(geometry: &Geometry<f64>, epsilon: f64) -> Geometry<f64> {
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify_vw_preserve(&epsilon)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify_vw_preserve(&epsilon)),
        Geometry::Polygon(p) => Geometry::Polygon(p.simplify_vw_preserve(&epsilon)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify_vw_preserve(&epsilon)),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(GeometryCollection(
            gc.iter().map(|g| simplify_geometry(g, epsilon)).collect(),
        )),
        other => other.clone(),
    }
}
