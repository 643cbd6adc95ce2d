//! Identity keys and deterministic colors.
//!
//! Every thematic shape is colored from a string key. The mapping is a pure
//! function of the key, so one classification renders with one color across
//! every parcel of a run regardless of processing order.

use std::fmt;

use landreport_shared::Rgb;
use sha2::{Digest, Sha256};

use crate::normalize::EasementRecord;

/// Deterministic color for a grouping key.
///
/// Hue comes from the first two digest bytes; saturation and value are kept
/// in a mid range so adjacent hues stay readable on satellite imagery.
pub fn color_from_code(key: &str) -> Rgb {
    let digest = Sha256::digest(key.as_bytes());
    let hue = f64::from(u16::from_be_bytes([digest[0], digest[1]]) % 360);
    let saturation = 0.45 + f64::from(digest[2]) / 255.0 * 0.35;
    let value = 0.70 + f64::from(digest[3]) / 255.0 * 0.25;
    hsv_to_rgb(hue, saturation, value)
}

fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Rgb {
    let chroma = value * saturation;
    let sector = hue / 60.0;
    let x = chroma * (1.0 - (sector % 2.0 - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = value - chroma;
    let channel = |c: f64| ((c + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb(channel(r), channel(g), channel(b))
}

/// Synthetic color key shared by every feature of one water layer.
pub fn water_color_key(layer_id: i64) -> String {
    format!("WATER-{layer_id}")
}

// ---------------------------------------------------------------------------
// Easement identity
// ---------------------------------------------------------------------------

/// Composite identity of an easement.
///
/// Two easements with equal keys are the same easement for coloring and
/// metadata lookup, even if they came from different source features.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EasementKey {
    pub owner: String,
    pub parcel_type: Option<String>,
    pub tenure: Option<String>,
    pub alias: Option<String>,
    pub name: Option<String>,
}

impl From<&EasementRecord> for EasementKey {
    fn from(record: &EasementRecord) -> Self {
        Self {
            owner: record.lotplan.clone(),
            parcel_type: record.parcel_type.clone(),
            tenure: record.tenure.clone(),
            alias: record.alias.clone(),
            name: record.name.clone(),
        }
    }
}

/// `|`-separated fields; literal `|` and `\` inside a field are
/// backslash-escaped and absent fields are written as an empty slot.
impl fmt::Display for EasementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            Some(self.owner.as_str()),
            self.parcel_type.as_deref(),
            self.tenure.as_deref(),
            self.alias.as_deref(),
            self.name.as_deref(),
        ];
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                f.write_str("|")?;
            }
            for c in field.unwrap_or_default().chars() {
                if c == '|' || c == '\\' {
                    f.write_str("\\")?;
                }
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

impl EasementKey {
    /// Color of this easement identity.
    pub fn color(&self) -> Rgb {
        color_from_code(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_is_pure_and_order_independent() {
        let first: Vec<Rgb> = ["LT1", "LT2", "WATER-20"].iter().map(|k| color_from_code(k)).collect();
        let reversed: Vec<Rgb> = ["WATER-20", "LT2", "LT1"].iter().map(|k| color_from_code(k)).collect();
        assert_eq!(first[0], reversed[2]);
        assert_eq!(first[1], reversed[1]);
        assert_eq!(first[2], reversed[0]);
        assert_eq!(color_from_code("LT1"), color_from_code("LT1"));
    }

    #[test]
    fn colors_are_total() {
        // Empty and non-ASCII keys still map to a color.
        let _ = color_from_code("");
        let _ = color_from_code("Überschwemmung ✓");
        assert_ne!(color_from_code("A"), color_from_code("B"));
    }

    #[test]
    fn hsv_primaries() {
        assert_eq!(hsv_to_rgb(0.0, 1.0, 1.0), Rgb(255, 0, 0));
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Rgb(0, 255, 0));
        assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Rgb(0, 0, 255));
    }

    #[test]
    fn water_key_format() {
        assert_eq!(water_color_key(25), "WATER-25");
    }

    #[test]
    fn easement_key_display_does_not_collide() {
        let a = EasementKey {
            owner: "1TEST".into(),
            parcel_type: Some("A|B".into()),
            tenure: None,
            alias: None,
            name: None,
        };
        let b = EasementKey {
            owner: "1TEST".into(),
            parcel_type: Some("A".into()),
            tenure: Some("B".into()),
            alias: None,
            name: None,
        };
        assert_eq!(a.to_string(), "1TEST|A\\|B|||");
        assert_eq!(b.to_string(), "1TEST|A|B||");
        assert_ne!(a.to_string(), b.to_string());
        assert_ne!(a, b);
    }

    #[test]
    fn identical_composites_share_a_color() {
        let key = |name: &str| EasementKey {
            owner: "2/RP1".into(),
            parcel_type: Some("EASEMENT".into()),
            tenure: Some("Freehold".into()),
            alias: None,
            name: Some(name.into()),
        };
        assert_eq!(key("E").color(), key("E").color());
        assert_eq!(key("E"), key("E"));
    }
}
