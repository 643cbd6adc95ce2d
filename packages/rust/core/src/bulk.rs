//! Multi-parcel exports.
//!
//! Identifiers are processed sequentially in caller order after dedup. A
//! parcel that yields nothing is skipped; any other failure aborts the
//! batch. If every parcel is empty the batch is not-found.

use std::collections::HashSet;
use std::io::Cursor;

use chrono::Utc;
use landreport_kml::{KMZ_CONTENT_TYPE, ZIP_CONTENT_TYPE, ZipEntry, render_kml, write_zip};
use landreport_shared::{LandReportError, ParcelId, ReportDocument, Result};
use landreport_sources::LayerSource;
use tracing::{debug, info, instrument};

use crate::assembler::{ReportLayers, build_multi_parcel_document};
use crate::pipeline::{
    ProgressReporter, PropertyReport, ReportContext, build_property_report, collect_layers,
    compose_kmz, report_filename,
};

/// Archive name used when no prefix is given.
const DEFAULT_ZIP_BASE: &str = "Property Reports";

// ---------------------------------------------------------------------------
// Names
// ---------------------------------------------------------------------------

/// Keep alphanumerics, `_`, `-`, `.` and spaces; trim. Empty becomes `download`.
pub fn sanitize_filename(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ' '))
        .collect();
    let trimmed = kept.trim();
    if trimmed.is_empty() {
        "download".to_string()
    } else {
        trimmed.to_string()
    }
}

fn strip_kmz_suffix(name: &str) -> &str {
    if name.to_ascii_lowercase().ends_with(".kmz") {
        &name[..name.len() - 4]
    } else {
        name
    }
}

fn clean_prefix(prefix: Option<&str>) -> Option<String> {
    prefix
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(sanitize_filename)
}

/// `Property Report – <id>.kmz`, or `<prefix> – Property Report – <id>.kmz`.
pub fn prefixed_report_filename(parcel_id: &ParcelId, prefix: Option<&str>) -> String {
    let base = report_filename(parcel_id);
    match clean_prefix(prefix) {
        Some(clean) => format!("{} – {base}", strip_kmz_suffix(&clean)),
        None => base,
    }
}

/// Document name of a merged bulk KMZ.
pub fn bulk_document_name(filename: Option<&str>, parcel_count: usize) -> String {
    match clean_prefix(filename) {
        Some(clean) => {
            let label = strip_kmz_suffix(&clean);
            if label.contains("Property Report") {
                label.to_string()
            } else {
                format!("Property Report – {label}")
            }
        }
        None => format!("Property Report – {parcel_count} lots"),
    }
}

/// Parse, skip blanks and dedup identifiers in caller order.
pub fn normalize_identifiers<I, T>(raw: I) -> Result<Vec<ParcelId>>
where
    I: IntoIterator<Item = T>,
    T: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for item in raw {
        let text = item.as_ref();
        if text.trim().is_empty() {
            continue;
        }
        let id = ParcelId::parse(text)?;
        if seen.insert(id.clone()) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        return Err(LandReportError::invalid_identifier("provide at least one lot/plan"));
    }
    Ok(ids)
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// A finished export file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// A merged multi-parcel KMZ.
#[derive(Debug, Clone)]
pub struct BulkKmz {
    pub document: ReportDocument,
    pub kml: String,
    pub artifact: ExportArtifact,
}

/// Collected layers for every parcel that has data.
#[instrument(skip_all, fields(parcels = ids.len()))]
pub async fn collect_bulk_layers<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    ids: &[ParcelId],
    progress: &dyn ProgressReporter,
) -> Result<Vec<ReportLayers>> {
    let mut collected = Vec::new();
    for (i, id) in ids.iter().enumerate() {
        progress.parcel_started(id, i + 1, ids.len());
        match collect_layers(ctx, id, progress).await {
            Ok(layers) if layers.is_empty() => debug!(parcel = %id, "parcel has no data, skipped"),
            Ok(layers) => collected.push(layers),
            Err(e) if e.is_not_found() => debug!(parcel = %id, error = %e, "parcel skipped"),
            Err(e) => return Err(e),
        }
    }
    if collected.is_empty() {
        return Err(LandReportError::no_features("the provided lots/plans"));
    }
    Ok(collected)
}

/// Merge every parcel into one document.
pub async fn build_bulk_document<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    ids: &[ParcelId],
    filename: Option<&str>,
    progress: &dyn ProgressReporter,
) -> Result<ReportDocument> {
    let layers = collect_bulk_layers(ctx, ids, progress).await?;
    Ok(build_multi_parcel_document(bulk_document_name(filename, ids.len()), &layers))
}

/// One KMZ holding a top-level folder per parcel.
#[instrument(skip_all, fields(parcels = ids.len()))]
pub async fn create_bulk_kmz<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    ids: &[ParcelId],
    filename: Option<&str>,
    progress: &dyn ProgressReporter,
) -> Result<BulkKmz> {
    let document = build_bulk_document(ctx, ids, filename, progress).await?;
    let kml = render_kml(&document);
    let bytes = compose_kmz(&kml, &document.assets)?;
    let artifact = ExportArtifact {
        filename: format!("{}.kmz", document.name),
        content_type: KMZ_CONTENT_TYPE,
        bytes,
    };

    info!(
        parcels = document.folders.len(),
        bytes = artifact.bytes.len(),
        filename = %artifact.filename,
        "bulk kmz built"
    );
    progress.done(&artifact.filename, artifact.bytes.len());
    Ok(BulkKmz {
        document,
        kml,
        artifact,
    })
}

/// A ZIP of independent single-parcel KMZ files.
#[instrument(skip_all, fields(parcels = ids.len()))]
pub async fn create_report_zip<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    ids: &[ParcelId],
    prefix: Option<&str>,
    progress: &dyn ProgressReporter,
) -> Result<ExportArtifact> {
    let prefix = clean_prefix(prefix);
    let mut entries = Vec::new();

    for (i, id) in ids.iter().enumerate() {
        progress.parcel_started(id, i + 1, ids.len());
        let report: PropertyReport = match build_property_report(ctx, id, progress).await {
            Ok(report) => report,
            Err(e) if e.is_not_found() => {
                debug!(parcel = %id, "parcel has no data, skipped");
                continue;
            }
            Err(e) => return Err(e),
        };
        let name = match &prefix {
            Some(p) => prefixed_report_filename(&report.parcel_id, Some(p)),
            None => report.filename,
        };
        entries.push(ZipEntry {
            name,
            bytes: report.kmz,
        });
    }
    if entries.is_empty() {
        return Err(LandReportError::no_features("the provided lots/plans"));
    }

    let bytes = write_zip(Cursor::new(Vec::new()), &entries)?.into_inner();
    let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let base = prefix.as_deref().unwrap_or(DEFAULT_ZIP_BASE);
    let artifact = ExportArtifact {
        filename: format!("{base}_{stamp}.zip"),
        content_type: ZIP_CONTENT_TYPE,
        bytes,
    };

    info!(entries = entries.len(), filename = %artifact.filename, "report zip built");
    progress.done(&artifact.filename, artifact.bytes.len());
    Ok(artifact)
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// What the caller asked to export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    pub identifiers: Vec<String>,
    /// Single-report prefix or merged document name.
    pub filename: Option<String>,
    /// Requests a ZIP of independent reports when several parcels are given.
    pub filename_prefix: Option<String>,
}

/// One parcel gives a single KMZ, several with a prefix give a ZIP,
/// otherwise a merged KMZ.
#[instrument(skip_all, fields(identifiers = request.identifiers.len()))]
pub async fn export_any<S: LayerSource>(
    ctx: &ReportContext<'_, S>,
    request: &ExportRequest,
    progress: &dyn ProgressReporter,
) -> Result<ExportArtifact> {
    let ids = normalize_identifiers(&request.identifiers)?;

    if let [id] = ids.as_slice() {
        let report = build_property_report(ctx, id, progress).await?;
        let artifact = ExportArtifact {
            filename: prefixed_report_filename(&report.parcel_id, request.filename.as_deref()),
            content_type: KMZ_CONTENT_TYPE,
            bytes: report.kmz,
        };
        progress.done(&artifact.filename, artifact.bytes.len());
        return Ok(artifact);
    }

    if request.filename_prefix.is_some() {
        return create_report_zip(ctx, &ids, request.filename_prefix.as_deref(), progress).await;
    }

    let bulk = create_bulk_kmz(ctx, &ids, request.filename.as_deref(), progress).await?;
    Ok(bulk.artifact)
}
