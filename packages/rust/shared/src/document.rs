//! The export document tree shared by every serializer.
//!
//! A [`ReportDocument`] is a named tree of [`Folder`]s. Leaf folders carry
//! colored shapes and point placemarks; icon bytes live in a flat
//! [`IconAssets`] map keyed by archive-relative href.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::ClassifiedShape;

/// Fallback content type for icons whose extension is unknown.
pub const DEFAULT_ICON_CONTENT_TYPE: &str = "image/png";

// ---------------------------------------------------------------------------
// Colors
// ---------------------------------------------------------------------------

/// An opaque RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    /// `#rrggbb`
    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }

    /// KML `aabbggrr` with the given alpha.
    pub fn kml(&self, alpha: u8) -> String {
        format!("{alpha:02x}{:02x}{:02x}{:02x}", self.2, self.1, self.0)
    }
}

// ---------------------------------------------------------------------------
// Leaves
// ---------------------------------------------------------------------------

/// A shape ready for rendering: geometry, classification, color and label.
#[derive(Debug, Clone, PartialEq)]
pub struct ColoredShape {
    pub shape: ClassifiedShape,
    pub color: Rgb,
    /// Placemark title, composed from name, code and area.
    pub label: String,
}

/// A point feature with an HTML description and optional icon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PointPlacemark {
    pub name: String,
    pub description_html: String,
    pub lon: f64,
    pub lat: f64,
    /// Shared style identifier (e.g. `bore_ex_ab`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style_id: Option<String>,
    /// Archive-relative href (`icons/ex_ab.png`) or an inline `data:` URI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_href: Option<String>,
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

/// A named group node in the export tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Folder {
    pub name: String,
    /// Child folders, rendered before this folder's own placemarks.
    pub children: Vec<Folder>,
    pub shapes: Vec<ColoredShape>,
    pub points: Vec<PointPlacemark>,
}

impl Folder {
    /// An empty folder with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder-style child append.
    pub fn with_child(mut self, child: Folder) -> Self {
        self.children.push(child);
        self
    }

    /// `true` if neither this folder nor any descendant holds a shape or point.
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
            && self.points.is_empty()
            && self.children.iter().all(Folder::is_empty)
    }

    /// Find a direct child by name.
    pub fn child(&self, name: &str) -> Option<&Folder> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Count shapes in this folder and all descendants.
    pub fn shape_count(&self) -> usize {
        self.shapes.len() + self.children.iter().map(Folder::shape_count).sum::<usize>()
    }

    /// Count points in this folder and all descendants.
    pub fn point_count(&self) -> usize {
        self.points.len() + self.children.iter().map(Folder::point_count).sum::<usize>()
    }
}

/// Icon bytes keyed by archive-relative href. Ordered for reproducible output.
pub type IconAssets = BTreeMap<String, Vec<u8>>;

/// Insert every asset of `from` into `into`, keeping existing entries on collision.
pub fn merge_assets(into: &mut IconAssets, from: &IconAssets) {
    for (href, bytes) in from {
        into.entry(href.clone()).or_insert_with(|| bytes.clone());
    }
}

/// The final export document: a folder tree plus its icon assets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportDocument {
    pub name: String,
    pub folders: Vec<Folder>,
    pub assets: IconAssets,
}

impl ReportDocument {
    /// Find a top-level folder by name.
    pub fn folder(&self, name: &str) -> Option<&Folder> {
        self.folders.iter().find(|f| f.name == name)
    }

    /// Names of the top-level folders, in order.
    pub fn folder_names(&self) -> Vec<&str> {
        self.folders.iter().map(|f| f.name.as_str()).collect()
    }
}

/// Recover an icon's content type from its href extension.
pub fn content_type_for_href(href: &str) -> &'static str {
    let ext = href
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => DEFAULT_ICON_CONTENT_TYPE,
    }
}

/// File extension used when storing an icon of the given content type.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    match content_type.to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" => "jpg",
        _ => "png",
    }
}
