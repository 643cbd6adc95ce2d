//! KMZ and ZIP packaging.

use std::io::{Cursor, Read, Seek, Write};

use landreport_shared::{IconAssets, LandReportError, Result};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Name of the KML entry inside a KMZ.
pub const KMZ_DOC_ENTRY: &str = "doc.kml";

/// A named file inside a ZIP archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZipEntry {
    pub name: String,
    pub bytes: Vec<u8>,
}

fn deflated() -> SimpleFileOptions {
    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated)
}

fn archive_err(e: impl std::fmt::Display) -> LandReportError {
    LandReportError::Archive(e.to_string())
}

/// Entry names stay relative and inside the archive.
fn check_entry_name(name: &str) -> Result<()> {
    let escapes = name.is_empty()
        || name.starts_with('/')
        || name.contains('\\')
        || name.split('/').any(|part| part == "..");
    if escapes {
        return Err(archive_err(format!("entry name '{name}' escapes the archive")));
    }
    Ok(())
}

/// Write a KMZ: `doc.kml` followed by every icon asset at its href.
///
/// Assets with no bytes are skipped.
pub fn write_kmz<W: Write + Seek>(writer: W, kml: &str, assets: &IconAssets) -> Result<W> {
    let mut zip = ZipWriter::new(writer);

    zip.start_file(KMZ_DOC_ENTRY, deflated())
        .map_err(archive_err)?;
    zip.write_all(kml.as_bytes()).map_err(archive_err)?;

    let mut written = 0usize;
    for (href, bytes) in assets {
        if bytes.is_empty() {
            warn!(%href, "skipping empty icon asset");
            continue;
        }
        check_entry_name(href)?;
        if href == KMZ_DOC_ENTRY {
            return Err(archive_err(format!("icon asset collides with '{KMZ_DOC_ENTRY}'")));
        }
        zip.start_file(href.as_str(), deflated())
            .map_err(archive_err)?;
        zip.write_all(bytes).map_err(archive_err)?;
        written += 1;
    }

    debug!(kml_bytes = kml.len(), assets = written, "kmz written");
    zip.finish().map_err(archive_err)
}

/// Write a plain ZIP of the given entries, in order.
pub fn write_zip<W: Write + Seek>(writer: W, entries: &[ZipEntry]) -> Result<W> {
    let mut zip = ZipWriter::new(writer);
    for entry in entries {
        check_entry_name(&entry.name)?;
        zip.start_file(entry.name.as_str(), deflated())
            .map_err(archive_err)?;
        zip.write_all(&entry.bytes).map_err(archive_err)?;
    }
    debug!(entries = entries.len(), "zip written");
    zip.finish().map_err(archive_err)
}

/// Read every file entry of an in-memory archive, in archive order.
pub fn read_entries(bytes: &[u8]) -> Result<Vec<ZipEntry>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).map_err(archive_err)?;
    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(archive_err)?;
        if file.is_dir() {
            continue;
        }
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).map_err(archive_err)?;
        entries.push(ZipEntry {
            name: file.name().to_string(),
            bytes: buf,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kmz_holds_doc_and_assets() {
        let mut assets = IconAssets::new();
        assets.insert("icons/ex_ab.png".into(), vec![0x89, 0x50, 0x4e, 0x47]);
        assets.insert("icons/empty.png".into(), Vec::new());

        let bytes = write_kmz(Cursor::new(Vec::new()), "<kml/>", &assets)
            .unwrap()
            .into_inner();
        let entries = read_entries(&bytes).unwrap();

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["doc.kml", "icons/ex_ab.png"]);
        assert_eq!(entries[0].bytes, b"<kml/>");
    }

    #[test]
    fn zip_keeps_entry_order() {
        let entries = vec![
            ZipEntry {
                name: "b.kmz".into(),
                bytes: vec![1],
            },
            ZipEntry {
                name: "a.kmz".into(),
                bytes: vec![2],
            },
        ];
        let bytes = write_zip(Cursor::new(Vec::new()), &entries)
            .unwrap()
            .into_inner();
        assert_eq!(read_entries(&bytes).unwrap(), entries);
    }

    #[test]
    fn asset_hrefs_must_stay_inside_the_archive() {
        for href in ["../icons/x.png", "/abs.png", "icons\\x.png", "doc.kml"] {
            let mut assets = IconAssets::new();
            assets.insert(href.to_string(), vec![1]);
            let err = write_kmz(Cursor::new(Vec::new()), "<kml/>", &assets).unwrap_err();
            assert!(matches!(err, LandReportError::Archive(_)), "{href}");
        }
    }

    #[test]
    fn garbage_is_an_archive_error() {
        let err = read_entries(b"not a zip").unwrap_err();
        assert!(matches!(err, LandReportError::Archive(_)));
    }
}
