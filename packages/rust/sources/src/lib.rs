//! Layer fetch adapters for Land Report.
//!
//! A [`LayerSource`] answers "give me the raw features for this parcel" and
//! "give me the raw features of layer X inside this envelope". The report
//! pipeline only ever sees [`FeatureCollection`]s, so the ArcGIS adapter and
//! the in-memory fixture are interchangeable.

mod arcgis;
mod fixture;

use std::future::Future;

use landreport_shared::{Envelope, ParcelId, Result, VegetationParams};

pub use arcgis::ArcGisSource;
pub use fixture::FixtureSource;
pub use geojson::FeatureCollection;

// ---------------------------------------------------------------------------
// Raw water layer
// ---------------------------------------------------------------------------

/// One upstream water layer's features, as fetched.
#[derive(Debug, Clone)]
pub struct WaterLayerRaw {
    /// Numeric upstream layer id; bundles are keyed by it.
    pub layer_id: i64,
    pub layer_title: Option<String>,
    pub source_layer_name: Option<String>,
    /// Upstream geometry type hint (e.g. `esriGeometryPolygon`).
    pub geometry_type: Option<String>,
    pub features: FeatureCollection,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Source of raw layer features.
///
/// Every method surfaces upstream failures as [`LandReportError::Upstream`]
/// and never retries.
///
/// [`LandReportError::Upstream`]: landreport_shared::LandReportError::Upstream
pub trait LayerSource: Send + Sync {
    /// Parcel boundary features for an identifier. Fails when the parcel is unknown.
    fn fetch_parcel(&self, id: &ParcelId) -> impl Future<Output = Result<FeatureCollection>> + Send;

    /// Land type polygons intersecting the envelope.
    fn fetch_landtypes(
        &self,
        envelope: &Envelope,
    ) -> impl Future<Output = Result<FeatureCollection>> + Send;

    /// Vegetation polygons intersecting the envelope, from a caller-chosen service.
    fn fetch_vegetation(
        &self,
        envelope: &Envelope,
        params: &VegetationParams,
    ) -> impl Future<Output = Result<FeatureCollection>> + Send;

    /// Groundwater bore points intersecting the envelope.
    fn fetch_bores(&self, envelope: &Envelope)
    -> impl Future<Output = Result<FeatureCollection>> + Send;

    /// Easement polygons intersecting the envelope.
    fn fetch_easements(
        &self,
        envelope: &Envelope,
    ) -> impl Future<Output = Result<FeatureCollection>> + Send;

    /// Every configured water layer, each with its features inside the envelope.
    fn fetch_water_layers(
        &self,
        envelope: &Envelope,
    ) -> impl Future<Output = Result<Vec<WaterLayerRaw>>> + Send;
}

/// An empty feature collection.
pub fn empty_collection() -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: Vec::new(),
        foreign_members: None,
    }
}
