//! ArcGIS REST `MapServer/<layer>/query` adapter.

use std::time::Duration;

use geojson::FeatureCollection;
use landreport_shared::{
    AppConfig, ENVELOPE_WKID, Envelope, LandReportError, LayerServiceConfig, ParcelId,
    ParcelServiceConfig, Result, VegetationParams, WaterLayerConfig,
};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::{LayerSource, WaterLayerRaw, empty_collection};

/// User-Agent string for upstream requests.
const USER_AGENT: &str = concat!("LandReport/", env!("CARGO_PKG_VERSION"));

/// Records requested per page on envelope queries.
const PAGE_SIZE: usize = 1000;

/// Hard stop on pagination, in pages.
const MAX_PAGES: usize = 50;

/// Fetches layers from ArcGIS REST services described by [`AppConfig`].
#[derive(Debug, Clone)]
pub struct ArcGisSource {
    client: Client,
    parcel: ParcelServiceConfig,
    landtypes: LayerServiceConfig,
    bores: LayerServiceConfig,
    easements: LayerServiceConfig,
    water_layers: Vec<WaterLayerConfig>,
}

impl ArcGisSource {
    /// Build an adapter with an HTTP client using the configured timeout.
    pub fn new(config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.defaults.timeout_secs))
            .build()
            .map_err(|e| LandReportError::upstream(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            parcel: config.parcel.clone(),
            landtypes: config.landtypes.clone(),
            bores: config.bores.clone(),
            easements: config.easements.clone(),
            water_layers: config.water_layers.clone(),
        })
    }

    /// Run one attribute query and return its features.
    async fn query_where(
        &self,
        service_url: &str,
        layer_id: u32,
        where_clause: &str,
    ) -> Result<FeatureCollection> {
        let url = query_url(service_url, layer_id);
        let params = [
            ("where", where_clause.to_string()),
            ("outFields", "*".to_string()),
            ("returnGeometry", "true".to_string()),
            ("outSR", "4326".to_string()),
            ("f", "geojson".to_string()),
        ];
        let body = self.get_json(&url, &params).await?;
        parse_collection(&url, body)
    }

    /// Run a paginated envelope-intersects query.
    async fn query_envelope(
        &self,
        service_url: &str,
        layer_id: u32,
        envelope: &Envelope,
    ) -> Result<FeatureCollection> {
        let url = query_url(service_url, layer_id);
        let mut collected = empty_collection();

        for page in 0..MAX_PAGES {
            let offset = page * PAGE_SIZE;
            let params = [
                ("where", "1=1".to_string()),
                ("geometry", envelope.to_query_value()),
                ("geometryType", "esriGeometryEnvelope".to_string()),
                ("inSR", ENVELOPE_WKID.to_string()),
                ("spatialRel", "esriSpatialRelIntersects".to_string()),
                ("outFields", "*".to_string()),
                ("returnGeometry", "true".to_string()),
                ("outSR", "4326".to_string()),
                ("resultOffset", offset.to_string()),
                ("resultRecordCount", PAGE_SIZE.to_string()),
                ("f", "geojson".to_string()),
            ];
            let body = self.get_json(&url, &params).await?;
            let more = exceeded_transfer_limit(&body);
            let fc = parse_collection(&url, body)?;
            let received = fc.features.len();
            collected.features.extend(fc.features);

            debug!(%url, page, received, more, "envelope page fetched");
            if !more || received == 0 {
                return Ok(collected);
            }
        }

        warn!(%url, pages = MAX_PAGES, "pagination limit reached, result truncated");
        Ok(collected)
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| LandReportError::upstream(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LandReportError::upstream(format!("{url}: HTTP {status}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LandReportError::upstream(format!("{url}: invalid JSON body: {e}")))
    }
}

impl LayerSource for ArcGisSource {
    #[instrument(skip_all, fields(parcel = %id))]
    async fn fetch_parcel(&self, id: &ParcelId) -> Result<FeatureCollection> {
        let cfg = &self.parcel;

        for clause in parcel_where_clauses(cfg, id) {
            let fc = self
                .query_where(&cfg.service_url, cfg.layer_id, &clause)
                .await?;
            if !fc.features.is_empty() {
                info!(features = fc.features.len(), "parcel found");
                return Ok(fc);
            }
            debug!(%clause, "no parcel match");
        }

        Err(LandReportError::upstream(format!("parcel {id} not found")))
    }

    #[instrument(skip_all)]
    async fn fetch_landtypes(&self, envelope: &Envelope) -> Result<FeatureCollection> {
        self.query_envelope(&self.landtypes.service_url, self.landtypes.layer_id, envelope)
            .await
    }

    #[instrument(skip_all, fields(layer = params.layer_id))]
    async fn fetch_vegetation(
        &self,
        envelope: &Envelope,
        params: &VegetationParams,
    ) -> Result<FeatureCollection> {
        self.query_envelope(&params.service_url, params.layer_id, envelope)
            .await
    }

    #[instrument(skip_all)]
    async fn fetch_bores(&self, envelope: &Envelope) -> Result<FeatureCollection> {
        self.query_envelope(&self.bores.service_url, self.bores.layer_id, envelope)
            .await
    }

    #[instrument(skip_all)]
    async fn fetch_easements(&self, envelope: &Envelope) -> Result<FeatureCollection> {
        self.query_envelope(&self.easements.service_url, self.easements.layer_id, envelope)
            .await
    }

    #[instrument(skip_all, fields(layers = self.water_layers.len()))]
    async fn fetch_water_layers(&self, envelope: &Envelope) -> Result<Vec<WaterLayerRaw>> {
        let mut layers = Vec::with_capacity(self.water_layers.len());
        for layer in &self.water_layers {
            let layer_id = u32::try_from(layer.layer_id).map_err(|_| {
                LandReportError::config(format!("water layer id {} is negative", layer.layer_id))
            })?;
            let features = self
                .query_envelope(&layer.service_url, layer_id, envelope)
                .await?;
            debug!(layer = layer.layer_id, features = features.features.len(), "water layer fetched");
            layers.push(WaterLayerRaw {
                layer_id: layer.layer_id,
                layer_title: Some(layer.title.clone()),
                source_layer_name: None,
                geometry_type: layer.geometry_type.clone(),
                features,
            });
        }
        Ok(layers)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_url(service_url: &str, layer_id: u32) -> String {
    format!("{}/{layer_id}/query", service_url.trim_end_matches('/'))
}

/// Quote a value for an ArcGIS SQL `where` clause.
fn sql_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Where clauses to try, in order: the combined lot/plan field, then split fields.
fn parcel_where_clauses(cfg: &ParcelServiceConfig, id: &ParcelId) -> Vec<String> {
    let mut clauses = Vec::new();

    if !cfg.lotplan_field.is_empty() {
        let combined = id.as_str().replace('/', "");
        clauses.push(format!("UPPER({})={}", cfg.lotplan_field, sql_quote(&combined)));
    }

    if let (Some(lot), Some(plan)) = (id.lot(), id.plan()) {
        let mut parts = vec![
            format!("UPPER({})={}", cfg.lot_field, sql_quote(lot)),
            format!("UPPER({})={}", cfg.plan_field, sql_quote(plan)),
        ];
        if let Some(section) = id.section() {
            if !cfg.section_field.is_empty() {
                parts.push(format!("UPPER({})={}", cfg.section_field, sql_quote(section)));
            }
        }
        clauses.push(parts.join(" AND "));
    }

    clauses
}

/// ArcGIS flags truncated pages either at the top level or under `properties`.
fn exceeded_transfer_limit(body: &Value) -> bool {
    let flag = |v: Option<&Value>| v.and_then(Value::as_bool).unwrap_or(false);
    flag(body.get("exceededTransferLimit"))
        || flag(body.get("properties").and_then(|p| p.get("exceededTransferLimit")))
}

/// Turn a response body into features, surfacing ArcGIS `{"error": ...}` payloads.
fn parse_collection(url: &str, body: Value) -> Result<FeatureCollection> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(LandReportError::upstream(format!("{url}: {message}")));
    }

    serde_json::from_value::<FeatureCollection>(body)
        .map_err(|e| LandReportError::upstream(format!("{url}: not a feature collection: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parcel_body() -> Value {
        serde_json::json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"lotplan": "13SP181800"},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                }
            }]
        })
    }

    fn empty_body() -> Value {
        serde_json::json!({"type": "FeatureCollection", "features": []})
    }

    fn config_for(server: &MockServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.parcel.service_url = format!("{}/parcels", server.uri());
        config.parcel.layer_id = 4;
        config.landtypes.service_url = format!("{}/landtypes", server.uri());
        config.landtypes.layer_id = 0;
        config.water_layers = vec![WaterLayerConfig {
            layer_id: 7,
            title: "Wetlands".into(),
            service_url: format!("{}/water", server.uri()),
            geometry_type: Some("esriGeometryPolygon".into()),
        }];
        config
    }

    fn envelope() -> Envelope {
        Envelope {
            xmin: 0.0,
            ymin: 0.0,
            xmax: 10.0,
            ymax: 10.0,
        }
    }

    #[test]
    fn where_clauses_prefer_combined_field() {
        let cfg = ParcelServiceConfig {
            section_field: "section".into(),
            ..ParcelServiceConfig::default()
        };
        let id = ParcelId::parse("Lot 2 Section 5 DP 12345").unwrap();
        let clauses = parcel_where_clauses(&cfg, &id);
        assert_eq!(clauses[0], "UPPER(lotplan)='25DP12345'");
        assert_eq!(
            clauses[1],
            "UPPER(lot)='2' AND UPPER(plan)='DP12345' AND UPPER(section)='5'"
        );

        let id = ParcelId::parse("1TEST").unwrap();
        assert_eq!(parcel_where_clauses(&cfg, &id).len(), 1);
    }

    #[test]
    fn sql_quote_escapes_apostrophes() {
        assert_eq!(sql_quote("O'BRIEN"), "'O''BRIEN'");
    }

    #[tokio::test]
    async fn parcel_falls_back_to_split_fields() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/parcels/4/query"))
            .and(query_param("where", "UPPER(lotplan)='13SP181800'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_body()))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/parcels/4/query"))
            .and(query_param("where", "UPPER(lot)='13' AND UPPER(plan)='SP181800'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(parcel_body()))
            .mount(&server)
            .await;

        let source = ArcGisSource::new(&config_for(&server)).unwrap();
        let id = ParcelId::parse("13SP181800").unwrap();
        let fc = source.fetch_parcel(&id).await.unwrap();
        assert_eq!(fc.features.len(), 1);
    }

    #[tokio::test]
    async fn unknown_parcel_is_upstream_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/parcels/4/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_body()))
            .mount(&server)
            .await;

        let source = ArcGisSource::new(&config_for(&server)).unwrap();
        let id = ParcelId::parse("99DP1").unwrap();
        let err = source.fetch_parcel(&id).await.unwrap_err();
        assert!(matches!(err, LandReportError::Upstream(_)));
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn arcgis_error_payload_is_surfaced() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/landtypes/0/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": 400, "message": "Invalid query parameters"}
            })))
            .mount(&server)
            .await;

        let source = ArcGisSource::new(&config_for(&server)).unwrap();
        let err = source.fetch_landtypes(&envelope()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid query parameters"));
    }

    #[tokio::test]
    async fn http_failure_is_upstream_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/landtypes/0/query"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = ArcGisSource::new(&config_for(&server)).unwrap();
        let err = source.fetch_landtypes(&envelope()).await.unwrap_err();
        assert!(matches!(err, LandReportError::Upstream(_)));
    }

    #[tokio::test]
    async fn envelope_query_sends_spatial_filter() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/landtypes/0/query"))
            .and(query_param("geometryType", "esriGeometryEnvelope"))
            .and(query_param("inSR", "3857"))
            .and(query_param("spatialRel", "esriSpatialRelIntersects"))
            .and(query_param("geometry", "0,0,10,10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(parcel_body()))
            .expect(1)
            .mount(&server)
            .await;

        let source = ArcGisSource::new(&config_for(&server)).unwrap();
        let fc = source.fetch_landtypes(&envelope()).await.unwrap();
        assert_eq!(fc.features.len(), 1);
    }

    #[tokio::test]
    async fn envelope_query_follows_pages() {
        let server = MockServer::start().await;

        let mut first = parcel_body();
        first["exceededTransferLimit"] = Value::Bool(true);

        Mock::given(method("GET"))
            .and(path("/landtypes/0/query"))
            .and(query_param("resultOffset", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(first))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/landtypes/0/query"))
            .and(query_param("resultOffset", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(parcel_body()))
            .mount(&server)
            .await;

        let source = ArcGisSource::new(&config_for(&server)).unwrap();
        let fc = source.fetch_landtypes(&envelope()).await.unwrap();
        assert_eq!(fc.features.len(), 2);
    }

    #[tokio::test]
    async fn water_layers_carry_configured_metadata() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/water/7/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(parcel_body()))
            .mount(&server)
            .await;

        let source = ArcGisSource::new(&config_for(&server)).unwrap();
        let layers = source.fetch_water_layers(&envelope()).await.unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].layer_id, 7);
        assert_eq!(layers[0].layer_title.as_deref(), Some("Wetlands"));
        assert_eq!(layers[0].geometry_type.as_deref(), Some("esriGeometryPolygon"));
        assert_eq!(layers[0].features.features.len(), 1);
    }
}
