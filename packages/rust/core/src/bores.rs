//! Groundwater bore placemarks and their icons.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use geo::{Geometry, Intersects, MultiPolygon, Point};
use geojson::FeatureCollection;
use quick_xml::escape::escape;
use landreport_shared::{
    IconAssets, PointPlacemark, content_type_for_href, extension_for_content_type,
};
use tracing::{debug, info, instrument, warn};

use crate::geometry::feature_geometry;
use crate::normalize::{BoreRecord, normalize_bore};

/// Name of the reserved bore sub-folder under Water.
pub const BORE_FOLDER_NAME: &str = "Groundwater Bores";

// ---------------------------------------------------------------------------
// Icon catalogs
// ---------------------------------------------------------------------------

/// Raw icon image with its content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Looks up bore icons by icon key (`"STATUS,TYPE"`).
pub trait IconCatalog: Send + Sync {
    /// Icon for the key, or `None` when there is none.
    fn icon(&self, key: &str) -> Option<IconImage>;
}

/// Icons held in memory, keyed by slug.
#[derive(Debug, Clone, Default)]
pub struct InMemoryIconCatalog {
    icons: HashMap<String, IconImage>,
}

impl InMemoryIconCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Keys that slugify alike share one icon.
    pub fn with_icon(mut self, key: &str, bytes: Vec<u8>, content_type: &str) -> Self {
        self.icons.insert(
            slugify_icon_key(key),
            IconImage {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        self
    }
}

impl IconCatalog for InMemoryIconCatalog {
    fn icon(&self, key: &str) -> Option<IconImage> {
        self.icons.get(&slugify_icon_key(key)).cloned()
    }
}

/// Icons read from `<dir>/<slug>.png` or `<dir>/<slug>.jpg`.
#[derive(Debug, Clone)]
pub struct DirectoryIconCatalog {
    dir: PathBuf,
}

impl DirectoryIconCatalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl IconCatalog for DirectoryIconCatalog {
    fn icon(&self, key: &str) -> Option<IconImage> {
        let slug = slugify_icon_key(key);
        for ext in ["png", "jpg", "jpeg"] {
            let path = self.dir.join(format!("{slug}.{ext}"));
            match std::fs::read(&path) {
                Ok(bytes) => {
                    return Some(IconImage {
                        bytes,
                        content_type: content_type_for_href(&path.to_string_lossy()).to_string(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable bore icon");
                    return None;
                }
            }
        }
        None
    }
}

/// Catalog with no icons at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoIcons;

impl IconCatalog for NoIcons {
    fn icon(&self, _key: &str) -> Option<IconImage> {
        None
    }
}

// ---------------------------------------------------------------------------
// Slugs and hrefs
// ---------------------------------------------------------------------------

/// File-safe slug of an icon key: lower-case, `,` and every other
/// non-alphanumeric character become `_`. Empty keys become `icon`.
pub fn slugify_icon_key(key: &str) -> String {
    let slug: String = key
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if slug.is_empty() { "icon".to_string() } else { slug }
}

/// Archive-relative href of an icon, e.g. `icons/ex_ab.png`.
pub fn icon_href(key: &str, content_type: &str) -> String {
    format!(
        "icons/{}.{}",
        slugify_icon_key(key),
        extension_for_content_type(content_type)
    )
}

/// Shared KML style id of an icon, e.g. `bore_ex_ab`.
pub fn icon_style_id(key: &str) -> String {
    format!("bore_{}", slugify_icon_key(key))
}

// ---------------------------------------------------------------------------
// Placemarks
// ---------------------------------------------------------------------------

/// A kept bore: its normalized record and location.
#[derive(Debug, Clone, PartialEq)]
pub struct BoreFeature {
    pub record: BoreRecord,
    pub location: Point<f64>,
}

/// Bores ready for assembly.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreparedBores {
    pub features: Vec<BoreFeature>,
    pub placemarks: Vec<PointPlacemark>,
    pub assets: IconAssets,
}

/// Keep point bores inside the parcel, normalize them, drop duplicate bore
/// numbers (first wins) and resolve icons.
#[instrument(skip_all, fields(features = collection.features.len()))]
pub fn prepare_bore_placemarks(
    collection: &FeatureCollection,
    boundary: Option<&MultiPolygon<f64>>,
    icons: &dyn IconCatalog,
) -> PreparedBores {
    let mut prepared = PreparedBores::default();
    let mut seen: HashSet<String> = HashSet::new();
    let mut resolved: HashMap<String, Option<(String, String)>> = HashMap::new();

    for feature in &collection.features {
        let Some(Geometry::Point(location)) = feature_geometry(feature) else {
            continue;
        };
        let outside = boundary.is_some_and(|b| !b.0.is_empty() && !location.intersects(b));
        if outside {
            continue;
        }
        let Some(props) = feature.properties.as_ref() else {
            continue;
        };
        let Some(record) = normalize_bore(props) else {
            debug!("bore without a number skipped");
            continue;
        };
        if !seen.insert(record.bore_number.clone()) {
            debug!(bore = %record.bore_number, "duplicate bore skipped");
            continue;
        }

        let icon = record.icon_key.as_deref().and_then(|key| {
            resolved
                .entry(key.to_string())
                .or_insert_with(|| {
                    let image = icons.icon(key).filter(|img| !img.bytes.is_empty())?;
                    let href = icon_href(key, &image.content_type);
                    prepared.assets.entry(href.clone()).or_insert(image.bytes);
                    Some((href, icon_style_id(key)))
                })
                .clone()
        });
        let (icon_href, style_id) = match icon {
            Some((href, style)) => (Some(href), Some(style)),
            None => (None, None),
        };

        prepared.placemarks.push(PointPlacemark {
            name: record.bore_number.clone(),
            description_html: bore_description(&record),
            lon: location.x(),
            lat: location.y(),
            style_id,
            icon_href,
        });
        prepared.features.push(BoreFeature { record, location });
    }

    info!(
        bores = prepared.placemarks.len(),
        icons = prepared.assets.len(),
        "bores prepared"
    );
    prepared
}

/// Deduplicate bore features across parcels, first occurrence wins.
pub fn dedup_bores(features: impl IntoIterator<Item = BoreFeature>) -> Vec<BoreFeature> {
    let mut seen = HashSet::new();
    features
        .into_iter()
        .filter(|f| seen.insert(f.record.bore_number.clone()))
        .collect()
}

/// `Label (CODE)` when they differ, otherwise whichever is present.
fn combine_label(label: Option<&str>, code: Option<&str>) -> Option<String> {
    let label = label.map(str::trim).filter(|s| !s.is_empty());
    let code = code.map(str::trim).filter(|s| !s.is_empty());
    match (label, code) {
        (Some(l), Some(c)) if !l.eq_ignore_ascii_case(c) => Some(format!("{l} ({c})")),
        (Some(l), _) => Some(l.to_string()),
        (None, c) => c.map(String::from),
    }
}

/// HTML description: status, type, drill date and report link.
pub fn bore_description(record: &BoreRecord) -> String {
    let mut parts = Vec::new();
    if let Some(status) = combine_label(record.status_label.as_deref(), record.status_code.as_deref()) {
        parts.push(format!("<b>Status:</b> {}", escape(status.as_str())));
    }
    if let Some(kind) = combine_label(record.type_label.as_deref(), record.type_code.as_deref()) {
        parts.push(format!("<b>Type:</b> {}", escape(kind.as_str())));
    }
    if let Some(drilled) = &record.drilled_date {
        parts.push(format!("<b>Drilled:</b> {}", escape(drilled.as_str())));
    }
    if let Some(url) = &record.report_url {
        parts.push(format!(
            r#"<a href="{}" target="_blank" rel="noopener">View bore report</a>"#,
            escape(url.as_str())
        ));
    }
    parts.join("<br/>")
}

// ---------------------------------------------------------------------------
// Inline icons
// ---------------------------------------------------------------------------

/// Replace archive hrefs with `data:` URIs built from the asset bytes.
///
/// Points whose href has no (or empty) asset keep their href unchanged.
pub fn inline_icon_hrefs(points: Vec<PointPlacemark>, assets: &IconAssets) -> Vec<PointPlacemark> {
    if assets.is_empty() {
        return points;
    }
    let mut cache: HashMap<String, Option<String>> = HashMap::new();
    points
        .into_iter()
        .map(|mut point| {
            let Some(href) = point.icon_href.clone() else {
                return point;
            };
            let uri = cache
                .entry(href.clone())
                .or_insert_with(|| {
                    assets
                        .get(&href)
                        .filter(|bytes| !bytes.is_empty())
                        .map(|bytes| {
                            format!("data:{};base64,{}", content_type_for_href(&href), STANDARD.encode(bytes))
                        })
                })
                .clone();
            if let Some(uri) = uri {
                point.icon_href = Some(uri);
            }
            point
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;
    use geojson::{Feature, JsonObject};
    use serde_json::json;

    fn bore(lon: f64, lat: f64, props: serde_json::Value) -> Feature {
        let properties: JsonObject = match props {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        };
        Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![lon, lat]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        }
    }

    fn collection(features: Vec<Feature>) -> FeatureCollection {
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
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
    fn duplicate_bore_numbers_collapse_to_first() {
        let fc = collection(vec![
            bore(0.2, 0.2, json!({"rn": "RN123", "status": "EX"})),
            bore(0.3, 0.3, json!({"bore_number": "rn 123 ", "status": "AU"})),
        ]);
        let prepared = prepare_bore_placemarks(&fc, Some(&parcel()), &NoIcons);
        assert_eq!(prepared.placemarks.len(), 1);
        assert_eq!(prepared.placemarks[0].name, "RN123");
        assert_eq!(prepared.placemarks[0].lon, 0.2);
        assert_eq!(prepared.features[0].record.status_code.as_deref(), Some("EX"));
    }

    #[test]
    fn bores_outside_parcel_or_without_number_are_dropped() {
        let fc = collection(vec![
            bore(5.0, 5.0, json!({"rn": "RN1"})),
            bore(0.5, 0.5, json!({"status": "EX"})),
            bore(0.5, 0.5, json!({"rn": "RN2"})),
        ]);
        let prepared = prepare_bore_placemarks(&fc, Some(&parcel()), &NoIcons);
        let names: Vec<&str> = prepared.placemarks.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["RN2"]);
    }

    #[test]
    fn icons_are_shared_by_key() {
        let icons = InMemoryIconCatalog::new().with_icon("EX,AB", vec![1, 2, 3], "image/png");
        let fc = collection(vec![
            bore(0.2, 0.2, json!({"rn": "RN1", "status": "EX", "type": "AB"})),
            bore(0.4, 0.4, json!({"rn": "RN2", "status": "ex", "type": "ab"})),
            bore(0.6, 0.6, json!({"rn": "RN3", "status": "EX"})),
        ]);
        let prepared = prepare_bore_placemarks(&fc, Some(&parcel()), &icons);

        assert_eq!(prepared.assets.len(), 1);
        assert_eq!(prepared.assets["icons/ex_ab.png"], vec![1, 2, 3]);
        assert_eq!(prepared.placemarks[0].icon_href.as_deref(), Some("icons/ex_ab.png"));
        assert_eq!(prepared.placemarks[0].style_id.as_deref(), Some("bore_ex_ab"));
        assert_eq!(prepared.placemarks[1].style_id.as_deref(), Some("bore_ex_ab"));
        assert_eq!(prepared.placemarks[2].icon_href, None);
        assert_eq!(prepared.placemarks[2].style_id, None);
    }

    #[test]
    fn missing_icon_bytes_are_not_an_error() {
        let icons = InMemoryIconCatalog::new().with_icon("EX,AB", Vec::new(), "image/png");
        let fc = collection(vec![bore(0.2, 0.2, json!({"rn": "RN1", "status": "EX", "type": "AB"}))]);
        let prepared = prepare_bore_placemarks(&fc, None, &icons);
        assert_eq!(prepared.placemarks.len(), 1);
        assert_eq!(prepared.placemarks[0].icon_href, None);
        assert!(prepared.assets.is_empty());
    }

    #[test]
    fn directory_catalog_reads_slugged_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ex_ab.jpg"), [9u8, 9]).unwrap();
        let catalog = DirectoryIconCatalog::new(dir.path());

        let icon = catalog.icon("EX,AB").unwrap();
        assert_eq!(icon.bytes, vec![9, 9]);
        assert_eq!(icon.content_type, "image/jpeg");
        assert!(catalog.icon("AU,XX").is_none());
        assert_eq!(icon_href("EX,AB", &icon.content_type), "icons/ex_ab.jpg");
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify_icon_key(" EX,AB "), "ex_ab");
        assert_eq!(slugify_icon_key("EX/AB-1"), "ex_ab_1");
        assert_eq!(slugify_icon_key(""), "icon");
    }

    #[test]
    fn description_combines_labels_and_codes() {
        let record = BoreRecord {
            bore_number: "RN1".into(),
            status_code: Some("EX".into()),
            status_label: Some("Existing".into()),
            type_code: Some("AB".into()),
            type_label: Some("ab".into()),
            drilled_date: Some("1960-07-01".into()),
            report_url: Some("https://example.com/?a=1&b=\"2\"".into()),
            icon_key: Some("EX,AB".into()),
        };
        let html = bore_description(&record);
        assert_eq!(
            html,
            "<b>Status:</b> Existing (EX)<br/><b>Type:</b> ab<br/><b>Drilled:</b> 1960-07-01<br/>\
             <a href=\"https://example.com/?a=1&amp;b=&quot;2&quot;\" target=\"_blank\" rel=\"noopener\">View bore report</a>"
        );
    }

    #[test]
    fn description_escapes_markup_in_labels() {
        let record = BoreRecord {
            bore_number: "RN2".into(),
            status_code: None,
            status_label: Some("<Dry> & 'capped'".into()),
            type_code: None,
            type_label: None,
            drilled_date: None,
            report_url: None,
            icon_key: None,
        };
        assert_eq!(
            bore_description(&record),
            "<b>Status:</b> &lt;Dry&gt; &amp; &apos;capped&apos;"
        );
    }

    #[test]
    fn inline_hrefs_become_data_uris() {
        let mut assets = IconAssets::new();
        assets.insert("icons/ex_ab.png".into(), vec![0, 1, 2]);
        let point = |href: Option<&str>| PointPlacemark {
            name: "RN1".into(),
            description_html: String::new(),
            lon: 0.0,
            lat: 0.0,
            style_id: None,
            icon_href: href.map(String::from),
        };
        let points = inline_icon_hrefs(
            vec![point(Some("icons/ex_ab.png")), point(Some("icons/missing.png")), point(None)],
            &assets,
        );
        assert_eq!(points[0].icon_href.as_deref(), Some("data:image/png;base64,AAEC"));
        assert_eq!(points[1].icon_href.as_deref(), Some("icons/missing.png"));
        assert_eq!(points[2].icon_href, None);
    }

    #[test]
    fn cross_parcel_dedup_keeps_first() {
        let fc = collection(vec![bore(0.2, 0.2, json!({"rn": "RN1"}))]);
        let a = prepare_bore_placemarks(&fc, None, &NoIcons).features;
        let fc = collection(vec![bore(0.9, 0.9, json!({"rn": "rn1"}))]);
        let b = prepare_bore_placemarks(&fc, None, &NoIcons).features;
        let merged = dedup_bores(a.into_iter().chain(b));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].location.x(), 0.2);
    }
}
