//! Shared types, error model, and configuration for Land Report.
//!
//! This crate is the foundation depended on by all other Land Report crates.
//! It provides:
//! - [`LandReportError`], the unified error type
//! - Domain types ([`ParcelId`], [`Envelope`], [`ClassifiedShape`])
//! - The export document tree ([`ReportDocument`], [`Folder`])
//! - Configuration ([`AppConfig`], [`ReportOptions`], config loading)

pub mod config;
pub mod document;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, IconsConfig, LayerServiceConfig, MAX_SIMPLIFY_TOLERANCE,
    ParcelServiceConfig, ReportOptions, VegetationConfig, VegetationParams, WaterLayerConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, validate_config,
    validate_simplify_tolerance,
};
pub use document::{
    ColoredShape, DEFAULT_ICON_CONTENT_TYPE, Folder, IconAssets, PointPlacemark, ReportDocument,
    Rgb, content_type_for_href, extension_for_content_type, merge_assets,
};
pub use error::{LandReportError, Result};
pub use types::{
    Bounds, ClassifiedShape, ClipOutcome, ENVELOPE_WKID, Envelope, ParcelId, lon_lat_to_mercator,
};
