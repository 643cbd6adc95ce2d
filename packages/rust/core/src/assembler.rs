//! Report document assembler.
//!
//! Turns the per-category results of one or more parcels into the folder
//! tree every serializer consumes. Three shapes are supported:
//!
//! ```text
//! flat                    nested                      multi-parcel
//! ├── Land Types          ├── Land Types              ├── 1TEST
//! ├── Vegetation          ├── Vegetation              │   ├── Land Types
//! ├── Easements           ├── Easements               │   └── Water
//! └── Water               └── Water                   └── 2/RP1
//!     (bores, shapes)         ├── Groundwater Bores       └── ...
//!                             └── <layer title>...
//! ```

use geojson::FeatureCollection;
use landreport_shared::{
    ClassifiedShape, ColoredShape, Folder, IconAssets, ParcelId, ReportDocument, Rgb, merge_assets,
};
use tracing::{debug, info, instrument};

use crate::bores::{BORE_FOLDER_NAME, PreparedBores};
use crate::identity::{EasementKey, color_from_code, water_color_key};
use crate::normalize::EasementRecord;
use crate::water::WaterLayerBundle;

pub const LANDTYPES_FOLDER: &str = "Land Types";
pub const VEGETATION_FOLDER: &str = "Vegetation";
pub const EASEMENTS_FOLDER: &str = "Easements";
pub const WATER_FOLDER: &str = "Water";

/// An easement shape together with the record it was normalized from.
#[derive(Debug, Clone, PartialEq)]
pub struct EasementShape {
    /// `code` holds the pipe-joined summary, `name` the display name.
    pub shape: ClassifiedShape,
    pub record: EasementRecord,
    pub key: EasementKey,
}

/// Everything one parcel contributes to a report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportLayers {
    pub parcel_id: ParcelId,
    /// Parcel boundary features as fetched.
    pub parcel: FeatureCollection,
    pub landtypes: Vec<ClassifiedShape>,
    pub vegetation: Vec<ClassifiedShape>,
    pub easements: Vec<EasementShape>,
    pub bores: PreparedBores,
    pub water: Vec<WaterLayerBundle>,
}

impl ReportLayers {
    /// An empty result for the parcel.
    pub fn empty(parcel_id: ParcelId) -> Self {
        Self {
            parcel_id,
            parcel: landreport_sources::empty_collection(),
            landtypes: Vec::new(),
            vegetation: Vec::new(),
            easements: Vec::new(),
            bores: PreparedBores::default(),
            water: Vec::new(),
        }
    }

    /// `true` when no category holds a shape, a point or a non-empty water bundle.
    pub fn is_empty(&self) -> bool {
        self.landtypes.is_empty()
            && self.vegetation.is_empty()
            && self.easements.is_empty()
            && self.bores.placemarks.is_empty()
            && self.water.iter().all(WaterLayerBundle::is_empty)
    }
}

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// `Brigalow (LT1) - 12.34 ha`
pub fn classified_label(shape: &ClassifiedShape) -> String {
    if shape.name == shape.code {
        format!("{} - {:.2} ha", shape.code, shape.area_ha)
    } else {
        format!("{} ({}) - {:.2} ha", shape.name, shape.code, shape.area_ha)
    }
}

/// `Lot/Plan: 1TEST | Parcel Type: EASEMENT | Tenure: Freehold | Alias: - | Area: 1.23 ha`
///
/// The clipped area is shown; when it is zero the source-reported area is
/// used instead.
pub fn easement_summary(record: &EasementRecord, clipped_area_ha: f64) -> String {
    fn display(value: Option<&str>) -> &str {
        value.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("-")
    }
    let area = if clipped_area_ha > 0.0 {
        clipped_area_ha
    } else {
        record.area_ha.unwrap_or(0.0)
    };
    format!(
        "Lot/Plan: {} | Parcel Type: {} | Tenure: {} | Alias: {} | Area: {:.2} ha",
        display(Some(record.lotplan.as_str())),
        display(record.parcel_type.as_deref()),
        display(record.tenure.as_deref()),
        display(record.alias.as_deref()),
        area,
    )
}

// ---------------------------------------------------------------------------
// Leaves
// ---------------------------------------------------------------------------

fn color_classified(shapes: &[ClassifiedShape]) -> Vec<ColoredShape> {
    shapes
        .iter()
        .map(|shape| ColoredShape {
            color: color_from_code(&shape.code),
            label: classified_label(shape),
            shape: shape.clone(),
        })
        .collect()
}

fn color_easements(easements: &[EasementShape]) -> Vec<ColoredShape> {
    easements
        .iter()
        .map(|e| ColoredShape {
            color: e.key.color(),
            label: format!("{} ({})", e.shape.name, e.shape.code),
            shape: e.shape.clone(),
        })
        .collect()
}

fn color_water(bundle: &WaterLayerBundle) -> Vec<ColoredShape> {
    let color: Rgb = color_from_code(&water_color_key(bundle.layer_id));
    bundle
        .shapes
        .iter()
        .map(|shape| ColoredShape {
            color,
            label: classified_label(shape),
            shape: shape.clone(),
        })
        .collect()
}

fn leaf(name: &str, shapes: Vec<ColoredShape>) -> Folder {
    Folder {
        shapes,
        ..Folder::new(name)
    }
}

// ---------------------------------------------------------------------------
// Category trees
// ---------------------------------------------------------------------------

/// Land Types, Vegetation and Easements folders, skipping empty ones.
fn thematic_folders(layers: &ReportLayers) -> Vec<Folder> {
    [
        leaf(LANDTYPES_FOLDER, color_classified(&layers.landtypes)),
        leaf(VEGETATION_FOLDER, color_classified(&layers.vegetation)),
        leaf(EASEMENTS_FOLDER, color_easements(&layers.easements)),
    ]
    .into_iter()
    .filter(|f| !f.is_empty())
    .collect()
}

/// Category folders with Water split into bore and per-layer sub-folders.
pub fn nested_category_folders(layers: &ReportLayers) -> Vec<Folder> {
    let mut folders = thematic_folders(layers);

    let mut water = Folder::new(WATER_FOLDER);
    if !layers.bores.placemarks.is_empty() {
        let mut bores = Folder::new(BORE_FOLDER_NAME);
        bores.points = layers.bores.placemarks.clone();
        water.children.push(bores);
    }
    for bundle in layers.water.iter().filter(|b| !b.is_empty()) {
        let mut child = leaf(&bundle.layer_title, color_water(bundle));
        child.points = bundle.points.clone();
        water.children.push(child);
    }
    if !water.is_empty() {
        folders.push(water);
    }
    folders
}

/// Category folders with every item directly under its category.
pub fn flat_category_folders(layers: &ReportLayers) -> Vec<Folder> {
    let mut folders = thematic_folders(layers);

    let mut water = leaf(
        WATER_FOLDER,
        layers.water.iter().flat_map(color_water).collect(),
    );
    water.points = layers.bores.placemarks.clone();
    water
        .points
        .extend(layers.water.iter().flat_map(|b| b.points.iter().cloned()));
    if !water.is_empty() {
        folders.push(water);
    }
    folders
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// `Property Report – <id>`
pub fn report_document_name(parcel_id: &ParcelId) -> String {
    format!("Property Report – {parcel_id}")
}

/// Single-parcel document with nested categories.
#[instrument(skip_all, fields(parcel = %layers.parcel_id))]
pub fn build_nested_document(layers: &ReportLayers) -> ReportDocument {
    let doc = ReportDocument {
        name: report_document_name(&layers.parcel_id),
        folders: nested_category_folders(layers),
        assets: layers.bores.assets.clone(),
    };
    debug!(folders = ?doc.folder_names(), "nested document assembled");
    doc
}

/// Single-parcel document with flat categories.
pub fn build_flat_document(name: impl Into<String>, layers: &ReportLayers) -> ReportDocument {
    ReportDocument {
        name: name.into(),
        folders: flat_category_folders(layers),
        assets: layers.bores.assets.clone(),
    }
}

/// One top-level folder per non-empty parcel, each holding its nested
/// categories. Icon assets merge in parcel order; the first href wins.
#[instrument(skip_all, fields(parcels = parcels.len()))]
pub fn build_multi_parcel_document(name: impl Into<String>, parcels: &[ReportLayers]) -> ReportDocument {
    let mut assets = IconAssets::new();
    let mut folders = Vec::new();
    for layers in parcels.iter().filter(|l| !l.is_empty()) {
        merge_assets(&mut assets, &layers.bores.assets);
        folders.push(Folder {
            children: nested_category_folders(layers),
            ..Folder::new(layers.parcel_id.as_str())
        });
    }
    info!(parcels = folders.len(), assets = assets.len(), "multi-parcel document assembled");
    ReportDocument {
        name: name.into(),
        folders,
        assets,
    }
}
