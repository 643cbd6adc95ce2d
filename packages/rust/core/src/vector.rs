//! GeoJSON-shaped payloads for the live map view.

use std::collections::{BTreeMap, HashSet};

use geo::Geometry;
use geojson::{Feature, FeatureCollection, JsonObject};
use landreport_shared::{Bounds, ClassifiedShape, LandReportError, ParcelId, Result};
use landreport_sources::LayerSource;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::assembler::ReportLayers;
use crate::bores::BoreFeature;
use crate::geometry::{combined_bounds, feature_geometry, to_geojson};
use crate::identity::color_from_code;
use crate::pipeline::{ProgressReporter, ReportContext, collect_layers};

// ---------------------------------------------------------------------------
// Payload types
// ---------------------------------------------------------------------------

/// One legend row: total clipped area per classification code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegendEntry {
    pub code: String,
    pub name: String,
    pub color_hex: String,
    pub area_ha: f64,
}

/// A water layer's clipped features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WaterLayerPayload {
    pub layer_id: i64,
    pub layer_title: String,
    pub source_layer_name: String,
    pub features: FeatureCollection,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WaterPayload {
    pub layers: Vec<WaterLayerPayload>,
}

impl WaterPayload {
    fn feature_count(&self) -> usize {
        self.layers.iter().map(|l| l.features.features.len()).sum()
    }
}

/// Single-parcel map payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorReport {
    pub lotplan: ParcelId,
    pub parcel: FeatureCollection,
    pub landtypes: FeatureCollection,
    pub vegetation: FeatureCollection,
    pub bores: FeatureCollection,
    pub easements: FeatureCollection,
    pub water: WaterPayload,
    pub legend: Vec<LegendEntry>,
    pub bounds4326: Option<Bounds>,
    pub has_data: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Multi-parcel map payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorBulk {
    pub lotplans: Vec<ParcelId>,
    pub parcels: FeatureCollection,
    pub landtypes: FeatureCollection,
    pub vegetation: FeatureCollection,
    pub bores: FeatureCollection,
    pub easements: FeatureCollection,
    pub water: WaterPayload,
    pub legend: Vec<LegendEntry>,
    pub bounds4326: Option<Bounds>,
}

// ---------------------------------------------------------------------------
// Feature builders
// ---------------------------------------------------------------------------

fn collection(features: Vec<Feature>) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn feature(geometry: &Geometry<f64>, properties: JsonObject) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(to_geojson(geometry)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

fn to_object<T: Serialize>(value: &T) -> JsonObject {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => map,
        _ => JsonObject::new(),
    }
}

/// Parcel features tagged with their lot/plan.
fn tagged_parcel(parcel: &FeatureCollection, id: &ParcelId) -> Vec<Feature> {
    parcel
        .features
        .iter()
        .filter(|f| f.geometry.is_some())
        .map(|f| {
            let mut tagged = f.clone();
            let props = tagged.properties.get_or_insert_with(JsonObject::new);
            props.insert("lotplan".into(), Value::String(id.as_str().to_string()));
            tagged
        })
        .collect()
}

fn classified_features(shapes: &[ClassifiedShape], id: &ParcelId) -> Vec<Feature> {
    shapes
        .iter()
        .map(|shape| {
            let mut props = JsonObject::new();
            props.insert("code".into(), Value::String(shape.code.clone()));
            props.insert("name".into(), Value::String(shape.name.clone()));
            props.insert("area_ha".into(), Value::from(shape.area_ha));
            props.insert("color_hex".into(), Value::String(color_from_code(&shape.code).hex()));
            props.insert("lotplan".into(), Value::String(id.as_str().to_string()));
            feature(&shape.geometry, props)
        })
        .collect()
}

fn bore_features(bores: &[BoreFeature], id: &ParcelId) -> Vec<Feature> {
    bores
        .iter()
        .map(|bore| {
            let mut props = to_object(&bore.record);
            props.insert("lotplan".into(), Value::String(id.as_str().to_string()));
            feature(&Geometry::Point(bore.location), props)
        })
        .collect()
}

fn easement_features(layers: &ReportLayers) -> Vec<Feature> {
    layers
        .easements
        .iter()
        .map(|e| feature(&e.shape.geometry, to_object(&e.record)))
        .collect()
}

fn water_payload(layers: &ReportLayers) -> Vec<WaterLayerPayload> {
    layers
        .water
        .iter()
        .filter(|b| !b.features.features.is_empty())
        .map(|b| WaterLayerPayload {
            layer_id: b.layer_id,
            layer_title: b.layer_title.clone(),
            source_layer_name: b.source_layer_name.clone(),
            features: b.features.clone(),
        })
        .collect()
}

/// Aggregate area per code, sorted by descending area then code.
pub fn build_legend<'a>(shapes: impl IntoIterator<Item = &'a ClassifiedShape>) -> Vec<LegendEntry> {
    let mut by_code: BTreeMap<&str, LegendEntry> = BTreeMap::new();
    for shape in shapes {
        by_code
            .entry(shape.code.as_str())
            .or_insert_with(|| LegendEntry {
                code: shape.code.clone(),
                name: shape.name.clone(),
                color_hex: color_from_code(&shape.code).hex(),
                area_ha: 0.0,
            })
            .area_ha += shape.area_ha;
    }
    let mut legend: Vec<LegendEntry> = by_code.into_values().collect();
    legend.sort_by(|a, b| b.area_ha.total_cmp(&a.area_ha).then_with(|| a.code.cmp(&b.code)));
    legend
}

fn bounds_of(collections: &[&FeatureCollection]) -> Option<Bounds> {
    let geometries: Vec<Geometry<f64>> = collections
        .iter()
        .flat_map(|fc| fc.features.iter())
        .filter_map(feature_geometry)
        .collect();
    combined_bounds(&geometries)
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Map payload for one parcel. An empty parcel still yields a payload, with
/// `has_data` false and an error message.
#[instrument(skip_all, fields(parcel = %id))]
pub async fn vector_report<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    id: &ParcelId,
    progress: &dyn ProgressReporter,
) -> Result<VectorReport> {
    let layers = collect_layers(ctx, id, progress).await?;
    Ok(vector_from_layers(&layers))
}

/// Build the single-parcel payload from collected layers.
pub fn vector_from_layers(layers: &ReportLayers) -> VectorReport {
    let id = &layers.parcel_id;
    let parcel = collection(tagged_parcel(&layers.parcel, id));
    let landtypes = collection(classified_features(&layers.landtypes, id));
    let vegetation = collection(classified_features(&layers.vegetation, id));
    let bores = collection(bore_features(&layers.bores.features, id));
    let easements = collection(easement_features(layers));
    let water = WaterPayload {
        layers: water_payload(layers),
    };

    let mut bound_sources = vec![&parcel, &landtypes, &vegetation, &bores, &easements];
    bound_sources.extend(water.layers.iter().map(|l| &l.features));
    let bounds4326 = bounds_of(&bound_sources);

    let has_data = !landtypes.features.is_empty()
        || !vegetation.features.is_empty()
        || !bores.features.is_empty()
        || !easements.features.is_empty()
        || water.feature_count() > 0;

    VectorReport {
        lotplan: id.clone(),
        legend: build_legend(&layers.landtypes),
        parcel,
        landtypes,
        vegetation,
        bores,
        easements,
        water,
        bounds4326,
        has_data,
        error: (!has_data).then(|| "No Land Types intersect this parcel.".to_string()),
    }
}

/// Map payload for several parcels. Bores dedup across parcels; water
/// layers merge by id and are sorted by it.
#[instrument(skip_all, fields(parcels = ids.len()))]
pub async fn vector_bulk<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    ids: &[ParcelId],
    progress: &dyn ProgressReporter,
) -> Result<VectorBulk> {
    let mut parcels = Vec::new();
    let mut landtypes = Vec::new();
    let mut vegetation = Vec::new();
    let mut bores = Vec::new();
    let mut easements = Vec::new();
    let mut water: BTreeMap<i64, WaterLayerPayload> = BTreeMap::new();
    let mut legend_shapes: Vec<ClassifiedShape> = Vec::new();
    let mut seen_bores: HashSet<String> = HashSet::new();

    for (i, id) in ids.iter().enumerate() {
        progress.parcel_started(id, i + 1, ids.len());
        let layers = match collect_layers(ctx, id, progress).await {
            Ok(layers) => layers,
            Err(e) if e.is_not_found() => {
                debug!(parcel = %id, error = %e, "parcel skipped");
                continue;
            }
            Err(e) => return Err(e),
        };

        parcels.extend(tagged_parcel(&layers.parcel, id));
        landtypes.extend(classified_features(&layers.landtypes, id));
        vegetation.extend(classified_features(&layers.vegetation, id));
        let fresh: Vec<BoreFeature> = layers
            .bores
            .features
            .iter()
            .filter(|b| seen_bores.insert(b.record.bore_number.clone()))
            .cloned()
            .collect();
        bores.extend(bore_features(&fresh, id));
        easements.extend(easement_features(&layers));
        for layer in water_payload(&layers) {
            match water.get_mut(&layer.layer_id) {
                Some(existing) => existing.features.features.extend(layer.features.features),
                None => {
                    water.insert(layer.layer_id, layer);
                }
            }
        }
        legend_shapes.extend(layers.landtypes);
        debug!(parcel = %id, "parcel added to vector payload");
    }

    let water = WaterPayload {
        layers: water.into_values().collect(),
    };
    let all_empty = parcels.is_empty()
        && landtypes.is_empty()
        && vegetation.is_empty()
        && bores.is_empty()
        && easements.is_empty()
        && water.feature_count() == 0;
    if all_empty {
        return Err(LandReportError::no_features("the provided lots/plans"));
    }

    let parcels = collection(parcels);
    let landtypes = collection(landtypes);
    let vegetation = collection(vegetation);
    let bores = collection(bores);
    let easements = collection(easements);
    let mut bound_sources = vec![&parcels, &landtypes, &vegetation, &bores, &easements];
    bound_sources.extend(water.layers.iter().map(|l| &l.features));
    let bounds4326 = bounds_of(&bound_sources);

    info!(
        parcels = ids.len(),
        landtypes = landtypes.features.len(),
        bores = bores.features.len(),
        water_layers = water.layers.len(),
        "vector bulk payload built"
    );
    Ok(VectorBulk {
        lotplans: ids.to_vec(),
        parcels,
        landtypes,
        vegetation,
        bores,
        easements,
        water,
        legend: build_legend(&legend_shapes),
        bounds4326,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bores::NoIcons;
    use crate::pipeline::SilentProgress;
    use landreport_shared::{ClipOutcome, ReportOptions};
    use landreport_sources::{FixtureSource, WaterLayerRaw};
    use serde_json::json;

    fn square(x0: f64, y0: f64, size: f64, props: Value) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
                vec![x0, y0],
                vec![x0 + size, y0],
                vec![x0 + size, y0 + size],
                vec![x0, y0 + size],
                vec![x0, y0],
            ]]))),
            id: None,
            properties: props.as_object().cloned(),
            foreign_members: None,
        }
    }

    fn point(lon: f64, lat: f64, props: Value) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![lon, lat]))),
            id: None,
            properties: props.as_object().cloned(),
            foreign_members: None,
        }
    }

    fn id(raw: &str) -> ParcelId {
        ParcelId::parse(raw).unwrap()
    }

    fn source() -> FixtureSource {
        FixtureSource::new()
            .with_parcel(&id("A1"), collection(vec![square(150.0, -27.0, 0.01, json!({}))]))
            .with_parcel(&id("B2"), collection(vec![square(150.01, -27.0, 0.01, json!({}))]))
            .with_landtypes(collection(vec![square(150.0, -27.0, 0.02, json!({"code": "LT1", "name": "Brigalow"}))]))
            // Same bore number, one in each parcel.
            .with_bores(collection(vec![
                point(150.005, -26.995, json!({"rn": "RN7"})),
                point(150.015, -26.995, json!({"rn": "rn 7"})),
            ]))
            .with_water_layer(WaterLayerRaw {
                layer_id: 25,
                layer_title: Some("Wetlands".into()),
                source_layer_name: None,
                geometry_type: None,
                features: collection(vec![square(150.005, -26.996, 0.01, json!({"code": "W"}))]),
            })
            .with_water_layer(WaterLayerRaw {
                layer_id: 20,
                layer_title: Some("Watercourses".into()),
                source_layer_name: None,
                geometry_type: None,
                features: collection(vec![square(150.002, -26.998, 0.001, json!({"code": "C"}))]),
            })
    }

    #[tokio::test]
    async fn single_payload_shape() {
        let source = source();
        let ctx = ReportContext::new(&source, &NoIcons, ReportOptions::default());
        let report = vector_report(&ctx, &id("A1"), &SilentProgress).await.unwrap();

        assert!(report.has_data);
        assert!(report.error.is_none());
        assert_eq!(report.parcel.features[0].properties.as_ref().unwrap()["lotplan"], json!("A1"));

        let lt = report.landtypes.features[0].properties.as_ref().unwrap();
        assert_eq!(lt["code"], json!("LT1"));
        assert_eq!(lt["color_hex"], json!(color_from_code("LT1").hex()));
        assert_eq!(report.bores.features.len(), 1);
        assert_eq!(
            report.bores.features[0].properties.as_ref().unwrap()["bore_number"],
            json!("RN7")
        );
        assert_eq!(report.legend.len(), 1);

        let bounds = report.bounds4326.unwrap();
        assert!((bounds.west - 150.0).abs() < 1e-9);

        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(value["water"]["layers"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn empty_parcel_reports_no_data() {
        let source = FixtureSource::new().with_parcel(&id("C3"), collection(vec![square(10.0, 10.0, 0.01, json!({}))]));
        let ctx = ReportContext::new(&source, &NoIcons, ReportOptions::default());
        let report = vector_report(&ctx, &id("C3"), &SilentProgress).await.unwrap();
        assert!(!report.has_data);
        assert!(report.error.is_some());
        assert_eq!(report.parcel.features.len(), 1);
    }

    #[tokio::test]
    async fn bulk_merges_water_and_dedups_bores() {
        let source = source();
        let ctx = ReportContext::new(&source, &NoIcons, ReportOptions::default());
        let bulk = vector_bulk(&ctx, &[id("A1"), id("B2")], &SilentProgress).await.unwrap();

        assert_eq!(bulk.parcels.features.len(), 2);
        assert_eq!(bulk.bores.features.len(), 1);
        let layer_ids: Vec<i64> = bulk.water.layers.iter().map(|l| l.layer_id).collect();
        assert_eq!(layer_ids, vec![20, 25]);
        assert_eq!(bulk.water.layers[1].features.features.len(), 2);
        assert_eq!(bulk.legend.len(), 1);
        assert_eq!(bulk.landtypes.features.len(), 2);
    }

    #[tokio::test]
    async fn bulk_without_any_feature_is_not_found() {
        let source = FixtureSource::new().with_parcel(&id("A1"), collection(Vec::new()));
        let ctx = ReportContext::new(&source, &NoIcons, ReportOptions::default());
        let err = vector_bulk(&ctx, &[id("A1")], &SilentProgress).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn legend_sorts_by_area_then_code() {
        let shape = |code: &str, area_ha: f64| ClassifiedShape {
            geometry: Geometry::Point(geo::Point::new(0.0, 0.0)),
            code: code.into(),
            name: code.into(),
            area_ha,
            clip: ClipOutcome::Clipped,
        };
        let shapes = [shape("B", 1.0), shape("A", 1.0), shape("C", 0.5), shape("C", 2.0)];
        let legend = build_legend(&shapes);
        let codes: Vec<&str> = legend.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["C", "A", "B"]);
        assert!((legend[0].area_ha - 2.5).abs() < 1e-12);
    }
}
