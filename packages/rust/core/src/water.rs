//! Water layer bundles.
//!
//! Each upstream water layer becomes one bundle. Areal and linear features
//! are clipped to the parcel and colored per layer; point features become
//! placemarks. Bundles that keep nothing are dropped.

use chrono::DateTime;
use geo::{Geometry, MultiPolygon};
use geojson::{Feature, FeatureCollection, JsonObject};
use landreport_shared::{ClassifiedShape, ParcelId, PointPlacemark};
use landreport_sources::WaterLayerRaw;
use quick_xml::escape::escape;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::clip::ClipEngine;
use crate::geometry::{area_hectares, feature_geometry, is_areal, to_geojson};
use crate::normalize::value_text;

/// Attributes shown in the description header or used internally.
const RESERVED_KEYS: &[&str] = &[
    "display_name",
    "name",
    "code",
    "layer_id",
    "layer_title",
    "source_layer_name",
    "lotplan",
    "icon_key",
];

/// Extra attributes listed per description.
const MAX_EXTRA_ATTRIBUTES: usize = 8;

/// One water layer's surviving features.
#[derive(Debug, Clone, PartialEq)]
pub struct WaterLayerBundle {
    pub layer_id: i64,
    pub layer_title: String,
    pub source_layer_name: String,
    pub geometry_type: Option<String>,
    /// Areal and linear features, colored by layer.
    pub shapes: Vec<ClassifiedShape>,
    pub points: Vec<PointPlacemark>,
    /// Clipped features with their enriched attributes.
    pub features: FeatureCollection,
}

impl WaterLayerBundle {
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty() && self.points.is_empty()
    }
}

/// Clip every raw layer against the parcel and keep the non-empty ones.
#[instrument(skip_all, fields(layers = layers.len()))]
pub fn prepare_water_layers(
    engine: &ClipEngine,
    boundary: Option<&MultiPolygon<f64>>,
    layers: Vec<WaterLayerRaw>,
    lotplan: Option<&ParcelId>,
) -> Vec<WaterLayerBundle> {
    let mut bundles = Vec::new();

    for layer in layers {
        let layer_title = layer
            .layer_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| format!("Layer {}", layer.layer_id));
        let source_layer_name = layer
            .source_layer_name
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| layer_title.clone());

        let mut bundle = WaterLayerBundle {
            layer_id: layer.layer_id,
            layer_title,
            source_layer_name,
            geometry_type: layer.geometry_type,
            shapes: Vec::new(),
            points: Vec::new(),
            features: landreport_sources::empty_collection(),
        };

        for feature in &layer.features.features {
            let Some(geometry) = feature_geometry(feature) else {
                continue;
            };
            let mut props = feature.properties.clone().unwrap_or_default();
            let Some(code) = props.get("code").and_then(value_text) else {
                continue;
            };
            enrich_props(&mut props, &bundle, lotplan);

            let Some((clipped, clip)) = engine.clip(&geometry, boundary) else {
                continue;
            };
            let area_ha = area_hectares(&clipped);
            if is_areal(&clipped) && area_ha <= 0.0 {
                continue;
            }

            let display = props
                .get("display_name")
                .and_then(value_text)
                .unwrap_or_else(|| code.clone());
            match &clipped {
                Geometry::Point(p) => bundle.points.push(water_point(&display, &props, p.x(), p.y())),
                Geometry::MultiPoint(mp) => {
                    for p in mp.iter() {
                        bundle.points.push(water_point(&display, &props, p.x(), p.y()));
                    }
                }
                _ => bundle.shapes.push(ClassifiedShape {
                    geometry: clipped.clone(),
                    code: code.clone(),
                    name: display.clone(),
                    area_ha,
                    clip,
                }),
            }

            bundle.features.features.push(Feature {
                bbox: None,
                geometry: Some(to_geojson(&clipped)),
                id: None,
                properties: Some(props),
                foreign_members: None,
            });
        }

        if bundle.is_empty() {
            debug!(layer_id = bundle.layer_id, "water layer empty after clip, dropped");
            continue;
        }
        bundles.push(bundle);
    }

    info!(bundles = bundles.len(), "water layers prepared");
    bundles
}

fn enrich_props(props: &mut JsonObject, bundle: &WaterLayerBundle, lotplan: Option<&ParcelId>) {
    let name = props
        .get("name")
        .and_then(value_text)
        .unwrap_or_else(|| bundle.layer_title.clone());
    props.insert("name".into(), Value::String(name.clone()));
    props.entry("display_name").or_insert(Value::String(name));
    props.entry("layer_id").or_insert(Value::from(bundle.layer_id));
    props
        .entry("layer_title")
        .or_insert_with(|| Value::String(bundle.layer_title.clone()));
    props
        .entry("source_layer_name")
        .or_insert_with(|| Value::String(bundle.source_layer_name.clone()));
    if let Some(id) = lotplan {
        props
            .entry("lotplan")
            .or_insert_with(|| Value::String(id.as_str().to_string()));
    }
}

fn water_point(display: &str, props: &JsonObject, lon: f64, lat: f64) -> PointPlacemark {
    PointPlacemark {
        name: display.to_string(),
        description_html: water_description(props),
        lon,
        lat,
        style_id: None,
        icon_href: None,
    }
}

// ---------------------------------------------------------------------------
// Descriptions
// ---------------------------------------------------------------------------

/// HTML description: bold name, layer, lot/plan and a few sorted extras.
pub fn water_description(props: &JsonObject) -> String {
    let name = ["display_name", "name", "layer_title"]
        .iter()
        .find_map(|k| props.get(*k).and_then(value_text))
        .unwrap_or_else(|| "Water feature".to_string());

    let mut lines = vec![format!("<b>{}</b>", escape(name.as_str()))];
    if let Some(layer) = props.get("layer_title").and_then(value_text) {
        lines.push(format!(r#"<span class="muted">Layer:</span> {}"#, escape(layer.as_str())));
    }
    if let Some(lotplan) = props.get("lotplan").and_then(value_text) {
        lines.push(format!(r#"<span class="muted">Lot/Plan:</span> {}"#, escape(lotplan.as_str())));
    }

    let mut extras: Vec<(String, String)> = props
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .filter_map(|(key, value)| Some((attribute_label(key), format_value(key, value)?)))
        .collect();
    extras.sort();
    for (label, value) in extras.into_iter().take(MAX_EXTRA_ATTRIBUTES) {
        lines.push(format!(
            r#"<span class="muted">{}:</span> {}"#,
            escape(label.as_str()),
            escape(value.as_str())
        ));
    }

    lines.join("<br/>")
}

/// `flow_type` becomes `Flow Type`.
fn attribute_label(key: &str) -> String {
    key.replace('_', " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn format_value(key: &str, value: &Value) -> Option<String> {
    match value {
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            if parts.is_empty() { None } else { Some(parts.join(", ")) }
        }
        Value::Number(n) if key.to_lowercase().contains("date") => n
            .as_f64()
            .and_then(epoch_date)
            .or_else(|| value_text(value)),
        _ => value_text(value),
    }
}

fn epoch_date(ts: f64) -> Option<String> {
    let seconds = if ts > 10_000_000_000.0 { ts / 1000.0 } else { ts };
    DateTime::from_timestamp(seconds.floor() as i64, 0).map(|d| d.date_naive().format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use serde_json::json;

    fn feature(value: geojson::Value, props: Value) -> Feature {
        Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(value)),
            id: None,
            properties: match props {
                Value::Object(map) => Some(map),
                _ => None,
            },
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

    fn raw(layer_id: i64, title: Option<&str>, features: Vec<Feature>) -> WaterLayerRaw {
        WaterLayerRaw {
            layer_id,
            layer_title: title.map(String::from),
            source_layer_name: None,
            geometry_type: Some("esriGeometryPolygon".into()),
            features: FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            },
        }
    }

    fn parcel() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 1.0, y: 0.0),
            (x: 1.0, y: 1.0),
            (x: 0.0, y: 1.0),
        ]])
    }

    #[test]
    fn empty_bundles_are_dropped() {
        let id = ParcelId::parse("1TEST").unwrap();
        let layers = vec![
            raw(20, Some("Watercourses"), vec![feature(square(5.0, 5.0, 1.0), json!({"code": "W1"}))]),
            raw(25, Some("Wetlands"), vec![feature(square(0.2, 0.2, 0.2), json!({"code": "W2"}))]),
            raw(30, None, Vec::new()),
        ];
        let bundles = prepare_water_layers(&ClipEngine::default(), Some(&parcel()), layers, Some(&id));
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].layer_id, 25);
        assert_eq!(bundles[0].shapes.len(), 1);
        assert_eq!(bundles[0].shapes[0].name, "Wetlands");
    }

    #[test]
    fn features_without_code_are_skipped() {
        let layers = vec![raw(20, None, vec![feature(square(0.2, 0.2, 0.2), json!({"name": "Creek"}))])];
        assert!(prepare_water_layers(&ClipEngine::default(), Some(&parcel()), layers, None).is_empty());
    }

    #[test]
    fn metadata_is_filled_in() {
        let id = ParcelId::parse("1TEST").unwrap();
        let layers = vec![raw(
            20,
            None,
            vec![feature(square(0.2, 0.2, 0.2), json!({"code": 7, "name": "Creek"}))],
        )];
        let bundles = prepare_water_layers(&ClipEngine::default(), Some(&parcel()), layers, Some(&id));
        let bundle = &bundles[0];
        assert_eq!(bundle.layer_title, "Layer 20");
        assert_eq!(bundle.source_layer_name, "Layer 20");
        assert_eq!(bundle.shapes[0].code, "7");

        let props = bundle.features.features[0].properties.as_ref().unwrap();
        assert_eq!(props["display_name"], json!("Creek"));
        assert_eq!(props["layer_id"], json!(20));
        assert_eq!(props["layer_title"], json!("Layer 20"));
        assert_eq!(props["lotplan"], json!("1TEST"));
    }

    #[test]
    fn multipoints_become_one_placemark_per_part() {
        let layers = vec![raw(
            40,
            Some("Springs"),
            vec![feature(
                geojson::Value::MultiPoint(vec![vec![0.5, 0.5], vec![0.6, 0.6], vec![9.0, 9.0]]),
                json!({"code": "S1", "name": "Spring"}),
            )],
        )];
        let bundles = prepare_water_layers(&ClipEngine::default(), Some(&parcel()), layers, None);
        assert_eq!(bundles[0].points.len(), 2);
        assert!(bundles[0].shapes.is_empty());
        assert_eq!(bundles[0].points[0].name, "Spring");
    }

    #[test]
    fn description_lists_sorted_extras() {
        let props = match json!({
            "display_name": "Creek <A>",
            "layer_title": "Watercourses",
            "lotplan": "1TEST",
            "stream_order": 3,
            "survey_date": 981_158_400_000i64,
            "aliases": ["North", "", "Upper"],
            "blank": "  ",
            "code": "W1",
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let html = water_description(&props);
        assert_eq!(
            html,
            "<b>Creek &lt;A&gt;</b>\
             <br/><span class=\"muted\">Layer:</span> Watercourses\
             <br/><span class=\"muted\">Lot/Plan:</span> 1TEST\
             <br/><span class=\"muted\">Aliases:</span> North, Upper\
             <br/><span class=\"muted\">Stream Order:</span> 3\
             <br/><span class=\"muted\">Survey Date:</span> 2001-02-03"
        );
    }

    #[test]
    fn extras_are_capped() {
        let mut props = JsonObject::new();
        for i in 0..12 {
            props.insert(format!("attr_{i:02}"), json!(i));
        }
        let html = water_description(&props);
        assert_eq!(html.matches("<br/>").count(), MAX_EXTRA_ATTRIBUTES);
        assert!(html.starts_with("<b>Water feature</b>"));
    }
}
