//! KML serialization and KMZ / ZIP packaging for Land Report documents.
//!
//! [`render_kml`] turns a [`ReportDocument`](landreport_shared::ReportDocument)
//! into KML text; [`write_kmz`] bundles that text with its icon assets and
//! [`write_zip`] packages several finished artifacts side by side.

mod archive;
mod render;

pub use archive::{KMZ_DOC_ENTRY, ZipEntry, read_entries, write_kmz, write_zip};
pub use render::{KML_CONTENT_TYPE, KMZ_CONTENT_TYPE, ZIP_CONTENT_TYPE, render_kml};
