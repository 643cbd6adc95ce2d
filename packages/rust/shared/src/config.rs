//! Application configuration for Land Report.
//!
//! User config lives at `~/.landreport/landreport.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LandReportError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "landreport.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".landreport";

/// Largest accepted simplification tolerance, in degrees.
pub const MAX_SIMPLIFY_TOLERANCE: f64 = 0.001;

/// Root of the Queensland spatial services used by the default config.
const QLD_SPATIAL: &str = "https://spatial-gis.information.qld.gov.au/arcgis/rest/services";

// ---------------------------------------------------------------------------
// Config structs (matching landreport.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Cadastral parcel service.
    #[serde(default)]
    pub parcel: ParcelServiceConfig,

    /// Land type classification service.
    #[serde(default = "default_landtypes")]
    pub landtypes: LayerServiceConfig,

    /// Vegetation classification service (optional).
    #[serde(default)]
    pub vegetation: VegetationConfig,

    /// Groundwater bore service.
    #[serde(default = "default_bores")]
    pub bores: LayerServiceConfig,

    /// Easement parcel service.
    #[serde(default = "default_easements")]
    pub easements: LayerServiceConfig,

    /// Water feature layers, queried one by one.
    #[serde(default = "default_water_layers")]
    pub water_layers: Vec<WaterLayerConfig>,

    /// Bore icon lookup.
    #[serde(default)]
    pub icons: IconsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            defaults: DefaultsConfig::default(),
            parcel: ParcelServiceConfig::default(),
            landtypes: default_landtypes(),
            vegetation: VegetationConfig::default(),
            bores: default_bores(),
            easements: default_easements(),
            water_layers: default_water_layers(),
            icons: IconsConfig::default(),
        }
    }
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Topology-preserving simplification tolerance in degrees (0 disables).
    #[serde(default)]
    pub simplify_tolerance: f64,

    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Directory exports are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            simplify_tolerance: 0.0,
            timeout_secs: default_timeout_secs(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_output_dir() -> String {
    ".".into()
}

/// `[parcel]` section: where and how to look up a parcel boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParcelServiceConfig {
    pub service_url: String,
    pub layer_id: u32,
    /// Combined lot/plan field, tried first.
    #[serde(default = "default_lotplan_field")]
    pub lotplan_field: String,
    #[serde(default = "default_lot_field")]
    pub lot_field: String,
    #[serde(default = "default_plan_field")]
    pub plan_field: String,
    /// Section field; empty when the cadastre has no sections.
    #[serde(default)]
    pub section_field: String,
}

impl Default for ParcelServiceConfig {
    fn default() -> Self {
        Self {
            service_url: format!("{QLD_SPATIAL}/PlanningCadastre/LandParcelPropertyFramework/MapServer"),
            layer_id: 4,
            lotplan_field: default_lotplan_field(),
            lot_field: default_lot_field(),
            plan_field: default_plan_field(),
            section_field: String::new(),
        }
    }
}

fn default_lotplan_field() -> String {
    "lotplan".into()
}
fn default_lot_field() -> String {
    "lot".into()
}
fn default_plan_field() -> String {
    "plan".into()
}

/// A single ArcGIS layer endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerServiceConfig {
    pub service_url: String,
    pub layer_id: u32,
}

fn default_landtypes() -> LayerServiceConfig {
    LayerServiceConfig {
        service_url: format!("{QLD_SPATIAL}/Environment/LandTypes/MapServer"),
        layer_id: 0,
    }
}

fn default_bores() -> LayerServiceConfig {
    LayerServiceConfig {
        service_url: format!("{QLD_SPATIAL}/InlandWaters/GroundAndSurfaceWaterMonitoring/MapServer"),
        layer_id: 1,
    }
}

fn default_easements() -> LayerServiceConfig {
    LayerServiceConfig {
        service_url: format!("{QLD_SPATIAL}/PlanningCadastre/LandParcelPropertyFramework/MapServer"),
        layer_id: 9,
    }
}

/// `[vegetation]` section. Vegetation is only fetched when the URL,
/// layer id and name field are all set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VegetationConfig {
    #[serde(default)]
    pub service_url: String,
    #[serde(default)]
    pub layer_id: Option<u32>,
    #[serde(default)]
    pub name_field: String,
    #[serde(default)]
    pub code_field: Option<String>,
}

/// `[[water_layers]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterLayerConfig {
    pub layer_id: i64,
    pub title: String,
    pub service_url: String,
    /// Upstream geometry type hint (e.g. `esriGeometryPolygon`).
    #[serde(default)]
    pub geometry_type: Option<String>,
}

fn default_water_layers() -> Vec<WaterLayerConfig> {
    let service_url = format!("{QLD_SPATIAL}/InlandWaters/WaterCourseIdentificationMap/MapServer");
    vec![
        WaterLayerConfig {
            layer_id: 20,
            title: "Watercourses".into(),
            service_url: service_url.clone(),
            geometry_type: Some("esriGeometryPolyline".into()),
        },
        WaterLayerConfig {
            layer_id: 25,
            title: "Wetlands".into(),
            service_url,
            geometry_type: Some("esriGeometryPolygon".into()),
        },
    ]
}

/// `[icons]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IconsConfig {
    /// Directory holding `<slug>.png` / `<slug>.jpg` bore icons.
    #[serde(default)]
    pub dir: Option<String>,
}

// ---------------------------------------------------------------------------
// Report config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Vegetation query parameters, complete enough to run a fetch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VegetationParams {
    pub service_url: String,
    pub layer_id: u32,
    pub name_field: String,
    pub code_field: Option<String>,
}

impl VegetationParams {
    /// Build params from possibly-partial inputs; `None` unless URL, layer
    /// and name field are all present.
    pub fn complete(
        service_url: Option<&str>,
        layer_id: Option<u32>,
        name_field: Option<&str>,
        code_field: Option<&str>,
    ) -> Option<Self> {
        let url = service_url.map(str::trim).filter(|s| !s.is_empty())?;
        let layer_id = layer_id?;
        let name = name_field.map(str::trim).filter(|s| !s.is_empty())?;
        Some(Self {
            service_url: url.to_string(),
            layer_id,
            name_field: name.to_string(),
            code_field: code_field
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from),
        })
    }

    /// Caller-supplied params when complete, otherwise the configured defaults.
    pub fn resolve(requested: Option<VegetationParams>, defaults: &VegetationConfig) -> Option<Self> {
        requested.or_else(|| {
            Self::complete(
                Some(&defaults.service_url),
                defaults.layer_id,
                Some(&defaults.name_field),
                defaults.code_field.as_deref(),
            )
        })
    }
}

/// Runtime report configuration, merged from config file + CLI flags.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    /// Simplification tolerance in degrees; 0 disables simplification.
    pub simplify_tolerance: f64,
    /// Vegetation query, when one is configured.
    pub vegetation: Option<VegetationParams>,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            simplify_tolerance: 0.0,
            vegetation: None,
        }
    }
}

impl From<&AppConfig> for ReportOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            simplify_tolerance: config
                .defaults
                .simplify_tolerance
                .clamp(0.0, MAX_SIMPLIFY_TOLERANCE),
            vegetation: VegetationParams::resolve(None, &config.vegetation),
        }
    }
}

/// Reject tolerances outside `[0, MAX_SIMPLIFY_TOLERANCE]`.
pub fn validate_simplify_tolerance(tolerance: f64) -> Result<f64> {
    if !(0.0..=MAX_SIMPLIFY_TOLERANCE).contains(&tolerance) {
        return Err(LandReportError::config(format!(
            "simplify tolerance {tolerance} outside 0..={MAX_SIMPLIFY_TOLERANCE}"
        )));
    }
    Ok(tolerance)
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.landreport/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| LandReportError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.landreport/landreport.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LandReportError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        LandReportError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LandReportError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LandReportError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LandReportError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check service URLs parse and the default tolerance is in range.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    validate_simplify_tolerance(config.defaults.simplify_tolerance)?;

    let mut urls: Vec<(&str, &str)> = vec![
        ("parcel", config.parcel.service_url.as_str()),
        ("landtypes", config.landtypes.service_url.as_str()),
        ("bores", config.bores.service_url.as_str()),
        ("easements", config.easements.service_url.as_str()),
    ];
    if !config.vegetation.service_url.trim().is_empty() {
        urls.push(("vegetation", config.vegetation.service_url.as_str()));
    }
    for layer in &config.water_layers {
        urls.push(("water_layers", layer.service_url.as_str()));
    }

    for (section, raw) in urls {
        url::Url::parse(raw).map_err(|e| {
            LandReportError::config(format!("[{section}] service_url '{raw}' is invalid: {e}"))
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("simplify_tolerance"));
        assert!(toml_str.contains("lotplan_field"));
        assert!(toml_str.contains("[[water_layers]]"));
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
simplify_tolerance = 0.0005

[vegetation]
service_url = "https://example.com/arcgis/rest/services/Veg/MapServer"
layer_id = 109
name_field = "rvm_cat"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.defaults.timeout_secs, 60);
        assert_eq!(config.parcel.lotplan_field, "lotplan");
        assert_eq!(config.water_layers.len(), 2);

        let report = ReportOptions::from(&config);
        assert_eq!(report.simplify_tolerance, 0.0005);
        let veg = report.vegetation.expect("vegetation configured");
        assert_eq!(veg.layer_id, 109);
        assert_eq!(veg.code_field, None);
    }

    #[test]
    fn vegetation_requires_url_layer_and_name() {
        assert!(VegetationParams::complete(Some("https://x"), Some(1), Some("name"), None).is_some());
        assert!(VegetationParams::complete(Some("  "), Some(1), Some("name"), None).is_none());
        assert!(VegetationParams::complete(Some("https://x"), None, Some("name"), None).is_none());
        assert!(VegetationParams::complete(Some("https://x"), Some(1), Some(""), None).is_none());
    }

    #[test]
    fn vegetation_falls_back_to_defaults() {
        let defaults = VegetationConfig {
            service_url: "https://veg".into(),
            layer_id: Some(3),
            name_field: "cat".into(),
            code_field: Some(" ".into()),
        };
        let resolved = VegetationParams::resolve(None, &defaults).expect("defaults complete");
        assert_eq!(resolved.service_url, "https://veg");
        assert_eq!(resolved.code_field, None);

        assert!(VegetationParams::resolve(None, &VegetationConfig::default()).is_none());
    }

    #[test]
    fn tolerance_bounds() {
        assert!(validate_simplify_tolerance(0.0).is_ok());
        assert!(validate_simplify_tolerance(0.001).is_ok());
        assert!(validate_simplify_tolerance(0.01).is_err());
        assert!(validate_simplify_tolerance(-1.0).is_err());
    }
}
