//! Report pipeline and domain logic for land reports.
//!
//! This crate ties together layer fetching, attribute normalization,
//! clipping and document assembly into end-to-end workflows
//! (e.g., `build_property_report`, `export_any`, `vector_report`).

pub mod assembler;
pub mod bores;
pub mod bulk;
pub mod clip;
pub mod geometry;
pub mod identity;
pub mod normalize;
pub mod pipeline;
pub mod vector;
pub mod water;

pub use assembler::{ReportLayers, build_flat_document, build_multi_parcel_document, build_nested_document};
pub use bores::{DirectoryIconCatalog, IconCatalog, InMemoryIconCatalog, NoIcons};
pub use bulk::{
    BulkKmz, ExportArtifact, ExportRequest, create_bulk_kmz, create_report_zip, export_any, normalize_identifiers,
};
pub use clip::ClipEngine;
pub use pipeline::{
    ParcelKml, ProgressReporter, PropertyReport, ReportContext, SilentProgress, build_parcel_kml,
    build_property_report, collect_layers,
};
pub use vector::{VectorBulk, VectorReport, vector_bulk, vector_report};
