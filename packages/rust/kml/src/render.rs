//! KML text rendering of the folder tree.

use std::collections::{BTreeMap, BTreeSet};

use geo::{Coord, Geometry, LineString, Polygon};
use landreport_shared::{ClipOutcome, ColoredShape, Folder, PointPlacemark, ReportDocument, Rgb};
use quick_xml::escape::escape;
use tracing::{debug, instrument};

pub const KML_CONTENT_TYPE: &str = "application/vnd.google-earth.kml+xml";
pub const KMZ_CONTENT_TYPE: &str = "application/vnd.google-earth.kmz";
pub const ZIP_CONTENT_TYPE: &str = "application/zip";

/// Fill opacity for polygons.
const POLY_ALPHA: u8 = 0x99;

/// Outline opacity for polygons and lines.
const LINE_ALPHA: u8 = 0xff;

const XML_HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
const KML_OPEN: &str = r#"<kml xmlns="http://www.opengis.net/kml/2.2">"#;

/// Render a document as KML text.
///
/// Shared styles are emitted once at the top of the document: one per
/// distinct shape color (`c_rrggbb`) and one per point style id. Within a
/// folder, child folders come before the folder's own placemarks.
#[instrument(skip_all, fields(name = %doc.name, folders = doc.folders.len()))]
pub fn render_kml(doc: &ReportDocument) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str(XML_HEADER);
    out.push('\n');
    out.push_str(KML_OPEN);
    out.push_str("<Document>");
    push_element(&mut out, "name", &doc.name);

    let mut colors = BTreeSet::new();
    let mut icon_styles = BTreeMap::new();
    for folder in &doc.folders {
        collect_styles(folder, &mut colors, &mut icon_styles);
    }
    for color in &colors {
        push_color_style(&mut out, color);
    }
    for (style_id, href) in &icon_styles {
        push_icon_style(&mut out, Some(style_id), href);
    }

    for folder in &doc.folders {
        push_folder(&mut out, folder);
    }

    out.push_str("</Document></kml>");
    debug!(
        bytes = out.len(),
        colors = colors.len(),
        icon_styles = icon_styles.len(),
        "kml rendered"
    );
    out
}

// ---------------------------------------------------------------------------
// Styles
// ---------------------------------------------------------------------------

fn collect_styles(
    folder: &Folder,
    colors: &mut BTreeSet<Rgb>,
    icon_styles: &mut BTreeMap<String, String>,
) {
    for shape in &folder.shapes {
        colors.insert(shape.color);
    }
    for point in &folder.points {
        if let (Some(style_id), Some(href)) = (&point.style_id, &point.icon_href) {
            icon_styles
                .entry(style_id.clone())
                .or_insert_with(|| href.clone());
        }
    }
    for child in &folder.children {
        collect_styles(child, colors, icon_styles);
    }
}

fn color_style_id(color: &Rgb) -> String {
    format!("c_{}", color.hex().trim_start_matches('#'))
}

fn push_color_style(out: &mut String, color: &Rgb) {
    out.push_str(&format!(
        "<Style id=\"{}\"><LineStyle><color>{}</color><width>1.5</width></LineStyle>\
         <PolyStyle><color>{}</color></PolyStyle></Style>",
        color_style_id(color),
        color.kml(LINE_ALPHA),
        color.kml(POLY_ALPHA),
    ));
}

fn push_icon_style(out: &mut String, style_id: Option<&str>, href: &str) {
    match style_id {
        Some(id) => out.push_str(&format!("<Style id=\"{}\">", escape(id))),
        None => out.push_str("<Style>"),
    }
    out.push_str("<IconStyle><scale>1.0</scale><Icon>");
    push_element(out, "href", href);
    out.push_str("</Icon></IconStyle></Style>");
}

// ---------------------------------------------------------------------------
// Folders and placemarks
// ---------------------------------------------------------------------------

fn push_folder(out: &mut String, folder: &Folder) {
    out.push_str("<Folder>");
    push_element(out, "name", &folder.name);
    for child in &folder.children {
        push_folder(out, child);
    }
    for shape in &folder.shapes {
        push_shape(out, shape);
    }
    for point in &folder.points {
        push_point(out, point);
    }
    out.push_str("</Folder>");
}

fn push_shape(out: &mut String, shape: &ColoredShape) {
    out.push_str("<Placemark>");
    push_element(out, "name", &shape.label);
    out.push_str(&format!("<styleUrl>#{}</styleUrl>", color_style_id(&shape.color)));

    out.push_str("<ExtendedData>");
    push_data(out, "code", &shape.shape.code);
    push_data(out, "area_ha", &format!("{:.4}", shape.shape.area_ha));
    if shape.shape.clip == ClipOutcome::PassThrough {
        push_data(out, "clip", "unclipped");
    }
    out.push_str("</ExtendedData>");

    push_geometry(out, &shape.shape.geometry);
    out.push_str("</Placemark>");
}

fn push_point(out: &mut String, point: &PointPlacemark) {
    out.push_str("<Placemark>");
    push_element(out, "name", &point.name);
    if !point.description_html.is_empty() {
        out.push_str("<description><![CDATA[");
        out.push_str(&point.description_html.replace("]]>", "]]]]><![CDATA[>"));
        out.push_str("]]></description>");
    }
    match (&point.style_id, &point.icon_href) {
        (Some(style_id), Some(_)) => {
            out.push_str(&format!("<styleUrl>#{}</styleUrl>", escape(style_id.as_str())));
        }
        (None, Some(href)) => push_icon_style(out, None, href),
        _ => {}
    }
    out.push_str(&format!(
        "<Point><coordinates>{},{}</coordinates></Point>",
        point.lon, point.lat
    ));
    out.push_str("</Placemark>");
}

fn push_element(out: &mut String, tag: &str, text: &str) {
    out.push_str(&format!("<{tag}>{}</{tag}>", escape(text)));
}

fn push_data(out: &mut String, name: &str, value: &str) {
    out.push_str(&format!(
        "<Data name=\"{}\"><value>{}</value></Data>",
        escape(name),
        escape(value)
    ));
}

// ---------------------------------------------------------------------------
// Geometry
// ---------------------------------------------------------------------------

fn push_geometry(out: &mut String, geometry: &Geometry<f64>) {
    match geometry {
        Geometry::Point(p) => push_point_geometry(out, p.0),
        Geometry::Line(l) => push_line_string(out, &LineString::from(vec![l.start, l.end])),
        Geometry::LineString(ls) => push_line_string(out, ls),
        Geometry::Polygon(p) => push_polygon(out, p),
        Geometry::MultiPoint(mp) => {
            out.push_str("<MultiGeometry>");
            for p in mp {
                push_point_geometry(out, p.0);
            }
            out.push_str("</MultiGeometry>");
        }
        Geometry::MultiLineString(mls) => {
            out.push_str("<MultiGeometry>");
            for ls in mls {
                push_line_string(out, ls);
            }
            out.push_str("</MultiGeometry>");
        }
        Geometry::MultiPolygon(mp) => {
            out.push_str("<MultiGeometry>");
            for p in mp {
                push_polygon(out, p);
            }
            out.push_str("</MultiGeometry>");
        }
        Geometry::GeometryCollection(gc) => {
            out.push_str("<MultiGeometry>");
            for g in gc {
                push_geometry(out, g);
            }
            out.push_str("</MultiGeometry>");
        }
        Geometry::Rect(r) => push_polygon(out, &r.to_polygon()),
        Geometry::Triangle(t) => push_polygon(out, &t.to_polygon()),
    }
}

fn push_point_geometry(out: &mut String, c: Coord<f64>) {
    out.push_str(&format!("<Point><coordinates>{},{}</coordinates></Point>", c.x, c.y));
}

fn push_line_string(out: &mut String, ls: &LineString<f64>) {
    out.push_str("<LineString><tessellate>1</tessellate><coordinates>");
    push_coords(out, ls);
    out.push_str("</coordinates></LineString>");
}

fn push_polygon(out: &mut String, polygon: &Polygon<f64>) {
    out.push_str("<Polygon><outerBoundaryIs><LinearRing><coordinates>");
    push_coords(out, polygon.exterior());
    out.push_str("</coordinates></LinearRing></outerBoundaryIs>");
    for ring in polygon.interiors() {
        out.push_str("<innerBoundaryIs><LinearRing><coordinates>");
        push_coords(out, ring);
        out.push_str("</coordinates></LinearRing></innerBoundaryIs>");
    }
    out.push_str("</Polygon>");
}

fn push_coords(out: &mut String, ls: &LineString<f64>) {
    let coords: Vec<String> = ls.coords().map(|c| format!("{},{}", c.x, c.y)).collect();
    out.push_str(&coords.join(" "));
}
