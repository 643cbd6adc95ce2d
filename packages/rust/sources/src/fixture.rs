//! In-memory [`LayerSource`] backed by canned feature collections.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use geo::BoundingRect;
use geojson::{Feature, FeatureCollection};
use landreport_shared::{Bounds, Envelope, LandReportError, ParcelId, Result, VegetationParams};

use crate::{LayerSource, WaterLayerRaw};

/// Canned layer data, filtered by envelope on every fetch.
///
/// Layer collections are shared by every parcel; only features whose
/// bounding box overlaps the query envelope are returned. Features without
/// geometry are always returned.
#[derive(Debug, Default)]
pub struct FixtureSource {
    parcels: HashMap<String, FeatureCollection>,
    failing: HashSet<String>,
    landtypes: Vec<Feature>,
    vegetation: Vec<Feature>,
    bores: Vec<Feature>,
    easements: Vec<Feature>,
    water_layers: Vec<WaterLayerRaw>,
    calls: Mutex<Vec<String>>,
}

impl FixtureSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a parcel boundary under its canonical identifier.
    pub fn with_parcel(mut self, id: &ParcelId, features: FeatureCollection) -> Self {
        self.parcels.insert(id.as_str().to_string(), features);
        self
    }

    /// Make `fetch_parcel` fail with an upstream error for this identifier.
    pub fn with_failing_parcel(mut self, id: &ParcelId) -> Self {
        self.failing.insert(id.as_str().to_string());
        self
    }

    pub fn with_landtypes(mut self, features: FeatureCollection) -> Self {
        self.landtypes.extend(features.features);
        self
    }

    pub fn with_vegetation(mut self, features: FeatureCollection) -> Self {
        self.vegetation.extend(features.features);
        self
    }

    pub fn with_bores(mut self, features: FeatureCollection) -> Self {
        self.bores.extend(features.features);
        self
    }

    pub fn with_easements(mut self, features: FeatureCollection) -> Self {
        self.easements.extend(features.features);
        self
    }

    pub fn with_water_layer(mut self, layer: WaterLayerRaw) -> Self {
        self.water_layers.push(layer);
        self
    }

    /// Fetch calls made so far, in order (`parcel:<id>`, `landtypes`, ...).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    fn record(&self, call: impl Into<String>) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call.into());
        }
    }
}

impl LayerSource for FixtureSource {
    async fn fetch_parcel(&self, id: &ParcelId) -> Result<FeatureCollection> {
        self.record(format!("parcel:{id}"));
        if self.failing.contains(id.as_str()) {
            return Err(LandReportError::upstream(format!("parcel service unavailable for {id}")));
        }
        self.parcels
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| LandReportError::upstream(format!("parcel {id} not found")))
    }

    async fn fetch_landtypes(&self, envelope: &Envelope) -> Result<FeatureCollection> {
        self.record("landtypes");
        Ok(within(&self.landtypes, envelope))
    }

    async fn fetch_vegetation(
        &self,
        envelope: &Envelope,
        params: &VegetationParams,
    ) -> Result<FeatureCollection> {
        self.record(format!("vegetation:{}", params.layer_id));
        Ok(within(&self.vegetation, envelope))
    }

    async fn fetch_bores(&self, envelope: &Envelope) -> Result<FeatureCollection> {
        self.record("bores");
        Ok(within(&self.bores, envelope))
    }

    async fn fetch_easements(&self, envelope: &Envelope) -> Result<FeatureCollection> {
        self.record("easements");
        Ok(within(&self.easements, envelope))
    }

    async fn fetch_water_layers(&self, envelope: &Envelope) -> Result<Vec<WaterLayerRaw>> {
        self.record("water");
        Ok(self
            .water_layers
            .iter()
            .map(|layer| WaterLayerRaw {
                features: within(&layer.features.features, envelope),
                ..layer.clone()
            })
            .collect())
    }
}

fn within(features: &[Feature], envelope: &Envelope) -> FeatureCollection {
    FeatureCollection {
        bbox: None,
        features: features
            .iter()
            .filter(|f| feature_envelope(f).is_none_or(|e| e.intersects(envelope)))
            .cloned()
            .collect(),
        foreign_members: None,
    }
}

fn feature_envelope(feature: &Feature) -> Option<Envelope> {
    let geometry = feature.geometry.as_ref()?;
    let geometry = geo::Geometry::<f64>::try_from(geometry.clone()).ok()?;
    let rect = geometry.bounding_rect()?;
    Some(Envelope::from_bounds(&Bounds {
        west: rect.min().x,
        south: rect.min().y,
        east: rect.max().x,
        north: rect.max().y,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> Feature {
        let geometry = geojson::Geometry::new(geojson::Value::Polygon(vec![vec![
            vec![x0, y0],
            vec![x0 + size, y0],
            vec![x0 + size, y0 + size],
            vec![x0, y0 + size],
            vec![x0, y0],
        ]]));
        Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: None,
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

    #[tokio::test]
    async fn envelope_filters_layer_features() {
        let source = FixtureSource::new()
            .with_landtypes(collection(vec![square(0.0, 0.0, 1.0), square(50.0, 50.0, 1.0)]));

        let envelope = Envelope::from_bounds(&Bounds {
            west: 0.0,
            south: 0.0,
            east: 2.0,
            north: 2.0,
        });
        let fc = source.fetch_landtypes(&envelope).await.unwrap();
        assert_eq!(fc.features.len(), 1);
    }

    #[tokio::test]
    async fn unknown_and_failing_parcels() {
        let known = ParcelId::parse("1TEST").unwrap();
        let broken = ParcelId::parse("2TEST").unwrap();
        let source = FixtureSource::new()
            .with_parcel(&known, collection(vec![square(0.0, 0.0, 1.0)]))
            .with_failing_parcel(&broken);

        assert!(source.fetch_parcel(&known).await.is_ok());
        assert!(source.fetch_parcel(&broken).await.is_err());
        assert!(source.fetch_parcel(&ParcelId::parse("3TEST").unwrap()).await.is_err());
        assert_eq!(source.calls(), vec!["parcel:1TEST", "parcel:2TEST", "parcel:3TEST"]);
    }
}
