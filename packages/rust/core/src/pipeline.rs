//! Single-parcel report pipeline: fetch → normalize → clip → assemble → serialize.
//!
//! Phases run sequentially. Upstream failures propagate immediately and are
//! never retried; a parcel that fetches but yields nothing is reported as
//! [`LandReportError::NoIntersectingFeatures`].

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::time::Instant;

use geo::{Geometry, MultiPolygon};
use geojson::FeatureCollection;
use landreport_kml::{render_kml, write_kmz};
use landreport_shared::{
    ClassifiedShape, ClipOutcome, Envelope, IconAssets, LandReportError, ParcelId, ReportDocument,
    ReportOptions, Result, VegetationParams,
};
use landreport_sources::LayerSource;
use tracing::{debug, info, instrument};

use crate::assembler::{
    EasementShape, ReportLayers, build_flat_document, build_nested_document, easement_summary,
};
use crate::bores::{IconCatalog, inline_icon_hrefs, prepare_bore_placemarks};
use crate::clip::{Candidate, ClipEngine, clip_candidate, prepare_clipped_shapes, simplify_shapes};
use crate::geometry::{
    area_hectares, bounding_envelope, combined_bounds, feature_geometry, is_areal, polygon_parts,
    union_geometry, union_polygons,
};
use crate::identity::EasementKey;
use crate::normalize::{
    EasementRecord, UNKNOWN_CODE, landtype_classification, normalize_easement, vegetation_classification,
};
use crate::water::prepare_water_layers;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase for a parcel.
    fn phase(&self, parcel: &ParcelId, name: &str);
    /// Called before each parcel of a batch.
    fn parcel_started(&self, parcel: &ParcelId, current: usize, total: usize);
    /// Called when a batch or single export has been written.
    fn done(&self, artifact: &str, bytes: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _parcel: &ParcelId, _name: &str) {}
    fn parcel_started(&self, _parcel: &ParcelId, _current: usize, _total: usize) {}
    fn done(&self, _artifact: &str, _bytes: usize) {}
}

// ---------------------------------------------------------------------------
// Context and results
// ---------------------------------------------------------------------------

/// Collaborators and options shared by every parcel of one export call.
pub struct ReportContext<'a, S: LayerSource> {
    pub source: &'a S,
    pub icons: &'a dyn IconCatalog,
    pub engine: ClipEngine,
    pub options: ReportOptions,
}

impl<'a, S: LayerSource> ReportContext<'a, S> {
    /// Context with the default clip strategy chain.
    pub fn new(source: &'a S, icons: &'a dyn IconCatalog, options: ReportOptions) -> Self {
        Self {
            source,
            icons,
            engine: ClipEngine::default(),
            options,
        }
    }
}

/// A built single-parcel report.
#[derive(Debug, Clone)]
pub struct PropertyReport {
    pub parcel_id: ParcelId,
    /// `Property Report – <id>.kmz`
    pub filename: String,
    pub document: ReportDocument,
    pub kml: String,
    pub kmz: Vec<u8>,
    /// Per-category results, reused by bulk exports.
    pub layers: ReportLayers,
}

/// A flat KML export of land types, vegetation and bores.
#[derive(Debug, Clone, PartialEq)]
pub struct ParcelKml {
    pub parcel_id: ParcelId,
    /// `<id>_landtypes[_veg].kml`
    pub filename: String,
    pub kml: String,
}

/// Parcel id as a single path segment: `2/5/DP12345` becomes `2_5_DP12345`.
pub fn parcel_file_stem(parcel_id: &ParcelId) -> String {
    parcel_id.as_str().replace(['/', '\\'], "_")
}

/// `Property Report – <id>.kmz`
pub fn report_filename(parcel_id: &ParcelId) -> String {
    format!("Property Report – {}.kmz", parcel_file_stem(parcel_id))
}

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

struct ParcelBoundary {
    features: FeatureCollection,
    union: Option<MultiPolygon<f64>>,
    envelope: Envelope,
}

#[instrument(skip_all, fields(parcel = %id))]
async fn fetch_boundary<S: LayerSource>(source: &S, id: &ParcelId) -> Result<ParcelBoundary> {
    let parcel = source.fetch_parcel(id).await?;
    let union = union_geometry(&parcel);

    let envelope = match &union {
        Some(mp) => bounding_envelope(&Geometry::MultiPolygon(mp.clone())),
        None => {
            let geometries: Vec<Geometry<f64>> = parcel.features.iter().filter_map(feature_geometry).collect();
            combined_bounds(&geometries).map(|b| Envelope::from_bounds(&b))
        }
    }
    .ok_or_else(|| LandReportError::no_features(format!("parcel {id} (no geometry)")))?;

    debug!(
        parts = union.as_ref().map_or(0, |mp| mp.0.len()),
        "parcel boundary resolved"
    );
    Ok(ParcelBoundary {
        features: parcel,
        union,
        envelope,
    })
}

fn landtype_candidates(collection: &FeatureCollection) -> Vec<Candidate> {
    collection
        .features
        .iter()
        .filter_map(|feature| {
            let geometry = feature_geometry(feature)?;
            let (code, name) = feature
                .properties
                .as_ref()
                .map(landtype_classification)
                .unwrap_or_else(|| (UNKNOWN_CODE.to_string(), UNKNOWN_CODE.to_string()));
            Some(Candidate { geometry, code, name })
        })
        .collect()
}

fn vegetation_candidates(collection: &FeatureCollection, params: &VegetationParams) -> Vec<Candidate> {
    let empty = geojson::JsonObject::new();
    collection
        .features
        .iter()
        .filter_map(|feature| {
            let geometry = feature_geometry(feature)?;
            let props = feature.properties.as_ref().unwrap_or(&empty);
            let (code, name) = vegetation_classification(props, params);
            Some(Candidate { geometry, code, name })
        })
        .collect()
}

async fn clip_landtypes<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    boundary: &ParcelBoundary,
) -> Result<Vec<ClassifiedShape>> {
    let raw = ctx.source.fetch_landtypes(&boundary.envelope).await?;
    let shapes = prepare_clipped_shapes(&ctx.engine, landtype_candidates(&raw), boundary.union.as_ref());
    Ok(simplify_shapes(shapes, ctx.options.simplify_tolerance))
}

async fn clip_vegetation<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    boundary: &ParcelBoundary,
) -> Result<Vec<ClassifiedShape>> {
    let Some(params) = &ctx.options.vegetation else {
        debug!("no vegetation service configured");
        return Ok(Vec::new());
    };
    let raw = ctx.source.fetch_vegetation(&boundary.envelope, params).await?;
    let shapes = prepare_clipped_shapes(
        &ctx.engine,
        vegetation_candidates(&raw, params),
        boundary.union.as_ref(),
    );
    Ok(simplify_shapes(shapes, ctx.options.simplify_tolerance))
}

/// Clip easements one by one, merge those sharing an identity, then
/// simplify and label them.
fn prepare_easements(
    engine: &ClipEngine,
    collection: &FeatureCollection,
    boundary: Option<&MultiPolygon<f64>>,
    id: &ParcelId,
    tolerance: f64,
) -> Vec<EasementShape> {
    let mut order: Vec<EasementKey> = Vec::new();
    let mut merged: HashMap<EasementKey, (EasementRecord, Vec<ClassifiedShape>)> = HashMap::new();

    for feature in &collection.features {
        let Some(geometry) = feature_geometry(feature) else {
            continue;
        };
        let record = match &feature.properties {
            Some(props) => normalize_easement(props, id),
            None => normalize_easement(&geojson::JsonObject::new(), id),
        };
        let key = EasementKey::from(&record);
        let name = record
            .name
            .clone()
            .or_else(|| record.alias.clone())
            .unwrap_or_else(|| "Easement".to_string());
        let candidate = Candidate {
            geometry,
            code: key.to_string(),
            name,
        };
        let Some(shape) = clip_candidate(engine, candidate, boundary) else {
            continue;
        };
        match merged.get_mut(&key) {
            Some((_, shapes)) => shapes.push(shape),
            None => {
                order.push(key.clone());
                merged.insert(key, (record, vec![shape]));
            }
        }
    }

    let mut keys = Vec::with_capacity(order.len());
    let mut records = Vec::with_capacity(order.len());
    let mut shapes = Vec::with_capacity(order.len());
    for key in order {
        let Some((record, parts)) = merged.remove(&key) else {
            continue;
        };
        shapes.push(merge_shapes(parts));
        records.push(record);
        keys.push(key);
    }

    let shapes = simplify_shapes(shapes, tolerance);
    keys.into_iter()
        .zip(records)
        .zip(shapes)
        .map(|((key, record), mut shape)| {
            shape.code = easement_summary(&record, shape.area_ha);
            EasementShape { shape, record, key }
        })
        .collect()
}

/// Combine clipped parts of one identity into a single shape.
fn merge_shapes(mut parts: Vec<ClassifiedShape>) -> ClassifiedShape {
    if parts.len() == 1 {
        return parts.remove(0);
    }
    let clip = if parts.iter().any(|p| p.clip == ClipOutcome::PassThrough) {
        ClipOutcome::PassThrough
    } else {
        parts[0].clip
    };
    let geometry = if parts.iter().all(|p| is_areal(&p.geometry)) {
        let polygons = parts.iter().flat_map(|p| polygon_parts(&p.geometry)).collect();
        union_polygons(polygons).map(Geometry::MultiPolygon)
    } else {
        None
    }
    .unwrap_or_else(|| {
        Geometry::GeometryCollection(geo::GeometryCollection(
            parts.iter().map(|p| p.geometry.clone()).collect(),
        ))
    });

    let first = parts.remove(0);
    ClassifiedShape {
        area_ha: area_hectares(&geometry),
        geometry,
        clip,
        ..first
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Fetch and prepare every category for one parcel.
///
/// Order: parcel, land types, bores, water, vegetation, easements.
#[instrument(skip_all, fields(parcel = %id))]
pub async fn collect_layers<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    id: &ParcelId,
    progress: &dyn ProgressReporter,
) -> Result<ReportLayers> {
    let start = Instant::now();

    progress.phase(id, "Fetching parcel");
    let mut boundary = fetch_boundary(ctx.source, id).await?;
    let parcel = std::mem::replace(&mut boundary.features, landreport_sources::empty_collection());
    let union = boundary.union.as_ref();

    progress.phase(id, "Land types");
    let landtypes = clip_landtypes(ctx, &boundary).await?;

    progress.phase(id, "Groundwater bores");
    let raw_bores = ctx.source.fetch_bores(&boundary.envelope).await?;
    let bores = prepare_bore_placemarks(&raw_bores, union, ctx.icons);

    progress.phase(id, "Water layers");
    let raw_water = ctx.source.fetch_water_layers(&boundary.envelope).await?;
    let water = prepare_water_layers(&ctx.engine, union, raw_water, Some(id));

    progress.phase(id, "Vegetation");
    let vegetation = clip_vegetation(ctx, &boundary).await?;

    progress.phase(id, "Easements");
    let raw_easements = ctx.source.fetch_easements(&boundary.envelope).await?;
    let easements = prepare_easements(
        &ctx.engine,
        &raw_easements,
        union,
        id,
        ctx.options.simplify_tolerance,
    );

    let layers = ReportLayers {
        parcel_id: id.clone(),
        parcel,
        landtypes,
        vegetation,
        easements,
        bores,
        water,
    };

    info!(
        landtypes = layers.landtypes.len(),
        vegetation = layers.vegetation.len(),
        easements = layers.easements.len(),
        bores = layers.bores.placemarks.len(),
        water_layers = layers.water.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "parcel layers collected"
    );
    Ok(layers)
}

/// Build the nested property report for one parcel, with KML and KMZ.
#[instrument(skip_all, fields(parcel = %id))]
pub async fn build_property_report<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    id: &ParcelId,
    progress: &dyn ProgressReporter,
) -> Result<PropertyReport> {
    let layers = collect_layers(ctx, id, progress).await?;
    if layers.is_empty() {
        return Err(LandReportError::no_features(format!("parcel {id}")));
    }
    report_from_layers(layers, progress)
}

/// Serialize already collected layers into a report.
fn report_from_layers(layers: ReportLayers, progress: &dyn ProgressReporter) -> Result<PropertyReport> {
    progress.phase(&layers.parcel_id, "Writing KMZ");
    let document = build_nested_document(&layers);
    let kml = render_kml(&document);
    let kmz = compose_kmz(&kml, &document.assets)?;

    info!(
        shapes = document.folders.iter().map(|f| f.shape_count()).sum::<usize>(),
        points = document.folders.iter().map(|f| f.point_count()).sum::<usize>(),
        kmz_bytes = kmz.len(),
        "property report built"
    );
    Ok(PropertyReport {
        filename: report_filename(&layers.parcel_id),
        parcel_id: layers.parcel_id.clone(),
        document,
        kml,
        kmz,
        layers,
    })
}

/// Flat KML of land types (required), vegetation and bores with inlined icons.
#[instrument(skip_all, fields(parcel = %id))]
pub async fn build_parcel_kml<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    id: &ParcelId,
    progress: &dyn ProgressReporter,
) -> Result<ParcelKml> {
    progress.phase(id, "Fetching parcel");
    let boundary = fetch_boundary(ctx.source, id).await?;

    progress.phase(id, "Land types");
    let landtypes = clip_landtypes(ctx, &boundary).await?;
    if landtypes.is_empty() {
        return Err(LandReportError::no_features(format!("land types of parcel {id}")));
    }

    progress.phase(id, "Groundwater bores");
    let raw_bores = ctx.source.fetch_bores(&boundary.envelope).await?;
    let mut bores = prepare_bore_placemarks(&raw_bores, boundary.union.as_ref(), ctx.icons);
    bores.placemarks = inline_icon_hrefs(bores.placemarks, &bores.assets);
    bores.assets.clear();

    progress.phase(id, "Vegetation");
    let vegetation = clip_vegetation(ctx, &boundary).await?;

    let stem = parcel_file_stem(id);
    let filename = if vegetation.is_empty() {
        format!("{stem}_landtypes.kml")
    } else {
        format!("{stem}_landtypes_veg.kml")
    };
    let layers = ReportLayers {
        landtypes,
        vegetation,
        bores,
        ..ReportLayers::empty(id.clone())
    };
    let document = build_flat_document(format!("Land Types – {id}"), &layers);
    let kml = render_kml(&document);

    info!(%filename, bytes = kml.len(), "parcel kml built");
    Ok(ParcelKml {
        parcel_id: id.clone(),
        filename,
        kml,
    })
}

/// Package KML and icons as KMZ bytes, staged in a temporary directory that
/// is removed on every path.
pub(crate) fn compose_kmz(kml: &str, assets: &IconAssets) -> Result<Vec<u8>> {
    compose_kmz_in(&std::env::temp_dir(), kml, assets)
}

/// [`compose_kmz`] staging under `root`.
fn compose_kmz_in(root: &Path, kml: &str, assets: &IconAssets) -> Result<Vec<u8>> {
    let dir = tempfile::Builder::new()
        .prefix("landreport-kmz-")
        .tempdir_in(root)
        .map_err(|e| LandReportError::io(root, e))?;
    let path = dir.path().join("report.kmz");

    let file = File::create(&path).map_err(|e| LandReportError::io(&path, e))?;
    write_kmz(file, kml, assets)?;
    let bytes = std::fs::read(&path).map_err(|e| LandReportError::io(&path, e))?;

    dir.close().map_err(|e| LandReportError::io(&path, e))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bores::{InMemoryIconCatalog, NoIcons};
    use geojson::{Feature, JsonObject};
    use landreport_kml::read_entries;
    use landreport_sources::{FixtureSource, WaterLayerRaw};
    use serde_json::{Value, json};

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn feature(geometry: geojson::Value, props: Value) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geometry)),
            id: None,
            properties: Some(object(props)),
            foreign_members: None,
        }
    }

    fn square(x0: f64, y0: f64, size: f64) -> geojson::Value {
        geojson::Value::Polygon(vec![vec![
            vec![x0, y0],
            vec![x0 + size, y0],
            vec![x0 + size, y0 + size],
            vec![x0, y0 + size],
            vec![x0, y0],
        ]])
    }

    fn fc(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }

    fn parcel_fc() -> FeatureCollection {
        fc(vec![feature(square(150.0, -27.0, 0.01), json!({"lotplan": "1TEST"}))])
    }

    fn full_fixture(id: &ParcelId) -> FixtureSource {
        FixtureSource::new()
            .with_parcel(id, parcel_fc())
            .with_landtypes(fc(vec![feature(
                square(149.995, -27.005, 0.01),
                json!({"code": "LT1", "name": "Brigalow"}),
            )]))
            .with_bores(fc(vec![feature(
                geojson::Value::Point(vec![150.005, -26.995]),
                json!({"rn": "RN100", "status": "EX", "type": "AB"}),
            )]))
            .with_easements(fc(vec![feature(
                square(150.002, -26.998, 0.004),
                json!({"parcel_typ": "EASEMENT", "feat_name": "Access Easement", "tenure": "Freehold"}),
            )]))
            .with_water_layer(WaterLayerRaw {
                layer_id: 20,
                layer_title: Some("Watercourses".into()),
                source_layer_name: None,
                geometry_type: Some("esriGeometryPolygon".into()),
                features: fc(vec![feature(
                    square(150.001, -26.999, 0.002),
                    json!({"code": "W1", "name": "Creek"}),
                )]),
            })
    }

    #[tokio::test]
    async fn end_to_end_report() {
        let id = ParcelId::parse("1TEST").unwrap();
        let source = full_fixture(&id);
        let icons = InMemoryIconCatalog::new().with_icon("EX,AB", vec![0x89, 0x50], "image/png");
        let ctx = ReportContext::new(&source, &icons, ReportOptions::default());

        let report = build_property_report(&ctx, &id, &SilentProgress).await.unwrap();

        assert_eq!(report.filename, "Property Report – 1TEST.kmz");
        assert_eq!(report.document.folder_names(), vec!["Land Types", "Easements", "Water"]);

        let water = report.document.folder("Water").unwrap();
        let children: Vec<&str> = water.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(children, vec!["Groundwater Bores", "Watercourses"]);

        let easement = &report.document.folder("Easements").unwrap().shapes[0];
        assert!(easement.label.starts_with("Access Easement (Lot/Plan: 1TEST"));
        assert!(easement.label.contains("Parcel Type: EASEMENT"));
        assert!(easement.label.contains("Tenure: Freehold"));
        assert!(easement.label.contains("Alias: -"));
        let area = format!("Area: {:.2} ha", easement.shape.area_ha);
        assert!(easement.label.contains(&area), "{}", easement.label);

        let landtype = &report.document.folder("Land Types").unwrap().shapes[0];
        assert!(landtype.shape.area_ha > 0.0);
        assert!(landtype.shape.area_ha < area_hectares(&Geometry::try_from(square(149.995, -27.005, 0.01)).unwrap()));

        let entries = read_entries(&report.kmz).unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["doc.kml", "icons/ex_ab.png"]);
        assert!(report.kml.contains("Property Report – 1TEST"));

        assert_eq!(
            source.calls(),
            vec!["parcel:1TEST", "landtypes", "bores", "water", "easements"]
        );
    }

    #[tokio::test]
    async fn empty_parcel_is_not_found() {
        let id = ParcelId::parse("2EMPTY").unwrap();
        let source = FixtureSource::new().with_parcel(&id, parcel_fc());
        let ctx = ReportContext::new(&source, &NoIcons, ReportOptions::default());

        let err = build_property_report(&ctx, &id, &SilentProgress).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        let id = ParcelId::parse("3FAIL").unwrap();
        let source = FixtureSource::new().with_failing_parcel(&id);
        let ctx = ReportContext::new(&source, &NoIcons, ReportOptions::default());

        let err = build_property_report(&ctx, &id, &SilentProgress).await.unwrap_err();
        assert!(matches!(err, LandReportError::Upstream(_)));
    }

    #[tokio::test]
    async fn vegetation_is_fetched_when_configured() {
        let id = ParcelId::parse("1TEST").unwrap();
        let source = full_fixture(&id).with_vegetation(fc(vec![feature(
            square(150.0, -27.0, 0.005),
            json!({"rvm_cat": "B"}),
        )]));
        let options = ReportOptions {
            simplify_tolerance: 0.0,
            vegetation: Some(VegetationParams {
                service_url: "https://veg.example".into(),
                layer_id: 109,
                name_field: "rvm_cat".into(),
                code_field: None,
            }),
        };
        let ctx = ReportContext::new(&source, &NoIcons, options);
        let report = build_property_report(&ctx, &id, &SilentProgress).await.unwrap();

        let veg = report.document.folder("Vegetation").unwrap();
        assert_eq!(veg.shapes[0].shape.name, "Category B");
        assert!(source.calls().contains(&"vegetation:109".to_string()));
    }

    #[tokio::test]
    async fn duplicate_easement_identities_merge() {
        let id = ParcelId::parse("1TEST").unwrap();
        let props = json!({"parcel_typ": "EASEMENT", "feat_name": "Drainage", "tenure": "Freehold"});
        let source = FixtureSource::new().with_parcel(&id, parcel_fc()).with_easements(fc(vec![
            feature(square(150.001, -26.999, 0.002), props.clone()),
            feature(square(150.005, -26.995, 0.002), props),
        ]));
        let ctx = ReportContext::new(&source, &NoIcons, ReportOptions::default());
        let layers = collect_layers(&ctx, &id, &SilentProgress).await.unwrap();

        assert_eq!(layers.easements.len(), 1);
        assert!(matches!(layers.easements[0].shape.geometry, Geometry::MultiPolygon(_)));
    }

    #[tokio::test]
    async fn flat_kml_requires_landtypes() {
        let id = ParcelId::parse("1TEST").unwrap();
        let source = FixtureSource::new().with_parcel(&id, parcel_fc());
        let ctx = ReportContext::new(&source, &NoIcons, ReportOptions::default());
        let err = build_parcel_kml(&ctx, &id, &SilentProgress).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn flat_kml_inlines_icons() {
        let id = ParcelId::parse("1TEST").unwrap();
        let source = full_fixture(&id);
        let icons = InMemoryIconCatalog::new().with_icon("EX,AB", vec![0, 1, 2], "image/png");
        let ctx = ReportContext::new(&source, &icons, ReportOptions::default());

        let kml = build_parcel_kml(&ctx, &id, &SilentProgress).await.unwrap();
        assert_eq!(kml.filename, "1TEST_landtypes.kml");
        assert!(kml.kml.contains("data:image/png;base64,AAEC"));
        assert!(!kml.kml.contains("icons/ex_ab.png"));
    }

    #[test]
    fn kmz_staging_is_removed_after_success() {
        let root = tempfile::tempdir().unwrap();
        let bytes = compose_kmz_in(root.path(), "<kml/>", &IconAssets::new()).unwrap();
        let entries = read_entries(&bytes).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "doc.kml");
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn kmz_staging_is_removed_after_failure() {
        let root = tempfile::tempdir().unwrap();
        let mut assets = IconAssets::new();
        assets.insert("../outside.png".into(), vec![1, 2, 3]);
        let err = compose_kmz_in(root.path(), "<kml/>", &assets).unwrap_err();
        assert!(matches!(err, LandReportError::Archive(_)));
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }
}
