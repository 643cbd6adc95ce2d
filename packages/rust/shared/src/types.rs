//! Core domain types for Land Report.

use std::fmt;
use std::sync::LazyLock;

use geo::Geometry;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{LandReportError, Result};

/// Spatial reference of every [`Envelope`] (Web Mercator).
pub const ENVELOPE_WKID: u32 = 3857;

/// Half the equatorial circumference in Web Mercator metres.
const MERCATOR_EXTENT: f64 = 20_037_508.342_789_244;

/// Latitude limit of the Web Mercator projection.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

// ---------------------------------------------------------------------------
// ParcelId
// ---------------------------------------------------------------------------

static VERBOSE_LOTPLAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:LOT\s*)?(?P<lot>[A-Z0-9]+)\s+(?:(?:SECTION|SEC)\s*(?P<sec>[A-Z0-9]+)\s+)?(?P<plan>[A-Z]+)\s*(?P<num>\d+)$",
    )
    .expect("valid lot/plan regex")
});

static COMPACT_LOTPLAN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<lot>\d+)(?P<plan>[A-Z]+\d+)$").expect("valid compact lot/plan regex")
});

/// Canonical cadastral parcel identifier (`lot/plan` or `lot/section/plan`).
///
/// Compact forms such as `13SP181800` keep their compact spelling; verbose
/// forms such as `Lot 2 Section 5 DP 12345` become `2/5/DP12345`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParcelId {
    canonical: String,
    lot: Option<String>,
    section: Option<String>,
    plan: Option<String>,
}

impl ParcelId {
    /// Parse and normalize a user-supplied lot/plan string.
    pub fn parse(raw: &str) -> Result<Self> {
        let upper = raw.trim().to_uppercase();
        if upper.is_empty() {
            return Err(LandReportError::invalid_identifier("lot/plan is required"));
        }
        let collapsed = upper.split_whitespace().collect::<Vec<_>>().join(" ");

        if let Some(caps) = VERBOSE_LOTPLAN.captures(&collapsed) {
            let lot = caps["lot"].to_string();
            let plan = format!("{}{}", &caps["plan"], &caps["num"]);
            let section = caps.name("sec").map(|m| m.as_str().to_string());
            let canonical = match &section {
                Some(sec) => format!("{lot}/{sec}/{plan}"),
                None => format!("{lot}/{plan}"),
            };
            return Ok(Self {
                canonical,
                lot: Some(lot),
                section,
                plan: Some(plan),
            });
        }

        let compact: String = collapsed.chars().filter(|c| !c.is_whitespace()).collect();

        let parts: Vec<&str> = compact.split('/').collect();
        if parts.iter().all(|p| !p.is_empty()) && (parts.len() == 2 || parts.len() == 3) {
            let (lot, section, plan) = match parts.as_slice() {
                [lot, plan] => (*lot, None, *plan),
                [lot, sec, plan] => (*lot, Some(sec.to_string()), *plan),
                _ => unreachable!("length checked above"),
            };
            return Ok(Self {
                canonical: compact.clone(),
                lot: Some(lot.to_string()),
                section,
                plan: Some(plan.to_string()),
            });
        }

        if compact.contains('/') {
            return Err(LandReportError::invalid_identifier(format!(
                "cannot interpret '{}' as lot/plan",
                raw.trim()
            )));
        }

        let (lot, plan) = match COMPACT_LOTPLAN.captures(&compact) {
            Some(caps) => (Some(caps["lot"].to_string()), Some(caps["plan"].to_string())),
            None => (None, None),
        };

        Ok(Self {
            canonical: compact,
            lot,
            section: None,
            plan,
        })
    }

    /// The canonical string form used as lookup key and display label.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// Lot number, when the identifier could be split.
    pub fn lot(&self) -> Option<&str> {
        self.lot.as_deref()
    }

    /// Section number, when present.
    pub fn section(&self) -> Option<&str> {
        self.section.as_deref()
    }

    /// Plan code (e.g. `DP12345`), when the identifier could be split.
    pub fn plan(&self) -> Option<&str> {
        self.plan.as_deref()
    }
}

impl fmt::Display for ParcelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl std::str::FromStr for ParcelId {
    type Err = LandReportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for ParcelId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

// ---------------------------------------------------------------------------
// Envelope / Bounds
// ---------------------------------------------------------------------------

/// Axis-aligned query rectangle in Web Mercator (EPSG:3857) metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Envelope {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Envelope {
    /// Project geographic (WGS84) bounds into a Web Mercator envelope.
    pub fn from_bounds(bounds: &Bounds) -> Self {
        let (xmin, ymin) = lon_lat_to_mercator(bounds.west, bounds.south);
        let (xmax, ymax) = lon_lat_to_mercator(bounds.east, bounds.north);
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Whether two envelopes overlap (touching edges count).
    pub fn intersects(&self, other: &Envelope) -> bool {
        self.xmin <= other.xmax
            && other.xmin <= self.xmax
            && self.ymin <= other.ymax
            && other.ymin <= self.ymax
    }

    /// `xmin,ymin,xmax,ymax`, the form ArcGIS envelope queries expect.
    pub fn to_query_value(&self) -> String {
        format!("{},{},{},{}", self.xmin, self.ymin, self.xmax, self.ymax)
    }
}

/// Project a WGS84 coordinate to Web Mercator metres.
pub fn lon_lat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT);
    let x = lon * MERCATOR_EXTENT / 180.0;
    let y = ((90.0 + lat) * std::f64::consts::PI / 360.0).tan().ln() / (std::f64::consts::PI / 180.0);
    (x, y * MERCATOR_EXTENT / 180.0)
}

/// Geographic bounding box (WGS84 degrees).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    /// Grow to cover `other`.
    pub fn expand(&mut self, other: &Bounds) {
        self.west = self.west.min(other.west);
        self.south = self.south.min(other.south);
        self.east = self.east.max(other.east);
        self.north = self.north.max(other.north);
    }
}

// ---------------------------------------------------------------------------
// ClassifiedShape
// ---------------------------------------------------------------------------

/// How a shape's geometry relates to the parcel boundary it was clipped against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipOutcome {
    /// Intersected with the parcel union.
    Clipped,
    /// No parcel union was available; geometry kept as supplied.
    Unbounded,
    /// Every repair strategy failed; the original geometry was kept and may
    /// extend outside the parcel.
    PassThrough,
}

/// A clipped thematic polygon (or line/point) with its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedShape {
    /// Geometry in WGS84 lon/lat.
    pub geometry: Geometry<f64>,
    /// Classification code (legend and color key).
    pub code: String,
    /// Display name.
    pub name: String,
    /// Area in hectares, recomputed from `geometry`.
    pub area_ha: f64,
    /// Clip provenance.
    pub clip: ClipOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parcel_id_supports_section() {
        let id = ParcelId::parse("Lot 2 Section 5 DP 12345").unwrap();
        assert_eq!(id.as_str(), "2/5/DP12345");
        assert_eq!(id.lot(), Some("2"));
        assert_eq!(id.section(), Some("5"));
        assert_eq!(id.plan(), Some("DP12345"));

        let id = ParcelId::parse("Lot 2 Sec 5 DP 12345").unwrap();
        assert_eq!(id.as_str(), "2/5/DP12345");
    }

    #[test]
    fn parcel_id_without_section() {
        let id = ParcelId::parse("lot 3 dp 45678").unwrap();
        assert_eq!(id.as_str(), "3/DP45678");
        assert_eq!(id.section(), None);
    }

    #[test]
    fn parcel_id_compact_forms() {
        let id = ParcelId::parse(" 13sp181800 ").unwrap();
        assert_eq!(id.as_str(), "13SP181800");
        assert_eq!(id.lot(), Some("13"));
        assert_eq!(id.plan(), Some("SP181800"));

        let id = ParcelId::parse("1TEST").unwrap();
        assert_eq!(id.as_str(), "1TEST");
        assert_eq!(id.lot(), None);
    }

    #[test]
    fn parcel_id_rejects_blank() {
        let err = ParcelId::parse("   ").unwrap_err();
        assert!(err.is_client_error());
        assert!(ParcelId::parse("2//DP1").is_err());
    }

    #[test]
    fn parcel_id_serializes_as_string() {
        let id = ParcelId::parse("3/DP45678").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"3/DP45678\"");
    }

    #[test]
    fn envelope_projection_and_overlap() {
        let a = Envelope::from_bounds(&Bounds {
            west: 0.0,
            south: 0.0,
            east: 1.0,
            north: 1.0,
        });
        assert!(a.xmin.abs() < 1e-6);
        assert!((a.xmax - 111_319.490_793).abs() < 1.0);

        let b = Envelope::from_bounds(&Bounds {
            west: 10.0,
            south: 10.0,
            east: 11.0,
            north: 11.0,
        });
        assert!(!a.intersects(&b));
        assert!(a.intersects(&a));
    }
}
