//! Attribute normalizers.
//!
//! Upstream layers disagree on field names and value types. Each field of a
//! normalized record tries an ordered alias list and takes the first
//! non-blank value. Blank text becomes `None`; numeric parsing fails soft.

use chrono::{DateTime, NaiveDate};
use geojson::JsonObject;
use landreport_shared::{ParcelId, VegetationParams};
use serde::Serialize;
use serde_json::Value;

// ---------------------------------------------------------------------------
// Field aliases
// ---------------------------------------------------------------------------

const BORE_NUMBER: &[&str] = &["bore_number", "rn_char", "rn", "registered_number"];
const BORE_STATUS: &[&str] = &["status", "status_code", "facility_status", "fac_status"];
const BORE_STATUS_LABEL: &[&str] = &["status_label", "facility_status_decode", "statusLabel"];
const BORE_TYPE: &[&str] = &["type", "type_code", "facility_type"];
const BORE_TYPE_LABEL: &[&str] = &["type_label", "facility_type_decode", "typeLabel"];
const BORE_DRILLED: &[&str] = &["drilled_date", "drill_date"];
const BORE_REPORT_URL: &[&str] = &["report_url", "bore_report_url"];
const BORE_ICON_KEY: &[&str] = &["icon_key"];

const EASEMENT_LOTPLAN: &[&str] = &["lotplan", "lot_plan"];
const EASEMENT_PARCEL_TYPE: &[&str] = &["parcel_type", "parcel_typ"];
const EASEMENT_NAME: &[&str] = &["name", "feat_name"];
const EASEMENT_ALIAS: &[&str] = &["alias", "feat_alias", "feature_alias"];
const EASEMENT_TENURE: &[&str] = &["tenure"];
const EASEMENT_AREA: &[&str] = &["area_m2", "lot_area"];

const LANDTYPE_CODE: &[&str] = &["code", "lt_code"];
const LANDTYPE_NAME: &[&str] = &["name", "lt_name"];

/// Code used when a classified feature carries none.
pub const UNKNOWN_CODE: &str = "UNK";

/// Epoch values above this magnitude are milliseconds.
const EPOCH_MS_THRESHOLD: f64 = 10_000_000_000.0;

// ---------------------------------------------------------------------------
// Primitive readers
// ---------------------------------------------------------------------------

/// Text form of a JSON scalar: trimmed strings, integral numbers without a
/// fractional part. Blank and non-scalar values are `None`.
pub fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() { None } else { Some(text) }
}

/// First non-blank text among the aliases.
pub fn first_text(props: &JsonObject, aliases: &[&str]) -> Option<String> {
    aliases
        .iter()
        .filter_map(|key| props.get(*key))
        .find_map(value_text)
}

/// First non-null raw value among the aliases.
fn first_value<'a>(props: &'a JsonObject, aliases: &[&str]) -> Option<&'a Value> {
    aliases
        .iter()
        .filter_map(|key| props.get(*key))
        .find(|v| match v {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

/// Parse a number, tolerating thousands separators. Never fails loudly.
pub fn safe_float(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let cleaned = s.trim().replace(',', "");
            if cleaned.is_empty() {
                None
            } else {
                cleaned.parse::<f64>().ok()
            }
        }
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

// ---------------------------------------------------------------------------
// Bores
// ---------------------------------------------------------------------------

/// Upper-case a bore number and strip all whitespace.
pub fn normalize_bore_number(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// `"STATUS,TYPE"` icon key; `None` unless both codes are present.
pub fn bore_icon_key(status: Option<&str>, type_code: Option<&str>) -> Option<String> {
    let status = status.map(str::trim).filter(|s| !s.is_empty())?;
    let type_code = type_code.map(str::trim).filter(|s| !s.is_empty())?;
    Some(format!("{},{}", status.to_uppercase(), type_code.to_uppercase()))
}

/// Normalize a drill date to `YYYY-MM-DD`.
///
/// Accepts epoch milliseconds or seconds (numbers or numeric strings) and
/// the string forms `YYYY-MM-DD`, `DD/MM/YYYY`, `YYYY/MM/DD` and RFC 3339.
pub fn normalize_drill_date(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_f64().and_then(epoch_to_date),
        Value::String(s) => {
            let text = s.trim();
            if text.is_empty() {
                return None;
            }
            if let Ok(ts) = text.parse::<f64>() {
                return epoch_to_date(ts);
            }
            parse_date_text(text)
        }
        _ => None,
    }
}

fn epoch_to_date(ts: f64) -> Option<String> {
    if !ts.is_finite() {
        return None;
    }
    let datetime = if ts.abs() > EPOCH_MS_THRESHOLD {
        DateTime::from_timestamp_millis(ts.round() as i64)?
    } else {
        DateTime::from_timestamp(ts.floor() as i64, 0)?
    };
    Some(datetime.date_naive().format("%Y-%m-%d").to_string())
}

fn parse_date_text(text: &str) -> Option<String> {
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.date_naive().format("%Y-%m-%d").to_string());
    }
    // Timestamps without an offset, e.g. `2001-02-03T04:05:06`.
    let prefix = text.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// A groundwater bore in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoreRecord {
    /// Normalized registered number; the dedup key.
    pub bore_number: String,
    #[serde(rename = "status")]
    pub status_code: Option<String>,
    pub status_label: Option<String>,
    #[serde(rename = "type")]
    pub type_code: Option<String>,
    pub type_label: Option<String>,
    pub drilled_date: Option<String>,
    pub report_url: Option<String>,
    pub icon_key: Option<String>,
}

/// Normalize raw bore attributes; `None` when no bore number alias is set.
pub fn normalize_bore(props: &JsonObject) -> Option<BoreRecord> {
    let bore_number = first_text(props, BORE_NUMBER).and_then(|raw| normalize_bore_number(&raw))?;

    let status_code = first_text(props, BORE_STATUS);
    let type_code = first_text(props, BORE_TYPE);
    let status_label = first_text(props, BORE_STATUS_LABEL).or_else(|| status_code.clone());
    let type_label = first_text(props, BORE_TYPE_LABEL).or_else(|| type_code.clone());
    let drilled_date = first_value(props, BORE_DRILLED).and_then(normalize_drill_date);
    let icon_key = first_text(props, BORE_ICON_KEY)
        .or_else(|| bore_icon_key(status_code.as_deref(), type_code.as_deref()));

    Some(BoreRecord {
        bore_number,
        status_code,
        status_label,
        type_code,
        type_label,
        drilled_date,
        report_url: first_text(props, BORE_REPORT_URL),
        icon_key,
    })
}

// ---------------------------------------------------------------------------
// Easements
// ---------------------------------------------------------------------------

/// An easement parcel in canonical form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EasementRecord {
    /// Owning parcel, normalized when parseable.
    pub lotplan: String,
    pub parcel_type: Option<String>,
    /// Feature name, falling back to the alias.
    pub name: Option<String>,
    pub alias: Option<String>,
    pub tenure: Option<String>,
    /// Source-reported area; informational only.
    pub area_m2: Option<f64>,
    pub area_ha: Option<f64>,
}

/// Normalize raw easement attributes. The requested parcel is the owner
/// when the feature names none.
pub fn normalize_easement(props: &JsonObject, requested: &ParcelId) -> EasementRecord {
    let lotplan = first_text(props, EASEMENT_LOTPLAN)
        .map(|raw| {
            ParcelId::parse(&raw)
                .map(|id| id.as_str().to_string())
                .unwrap_or(raw)
        })
        .unwrap_or_else(|| requested.as_str().to_string());

    let alias = first_text(props, EASEMENT_ALIAS);
    let name = first_text(props, EASEMENT_NAME).or_else(|| alias.clone());
    let area_m2 = first_value(props, EASEMENT_AREA).and_then(safe_float);

    EasementRecord {
        lotplan,
        parcel_type: first_text(props, EASEMENT_PARCEL_TYPE),
        name,
        alias,
        tenure: first_text(props, EASEMENT_TENURE),
        area_m2,
        area_ha: area_m2.map(|m2| m2 / 10_000.0),
    }
}

// ---------------------------------------------------------------------------
// Thematic classifications
// ---------------------------------------------------------------------------

/// `(code, name)` of a land type feature. Missing code becomes `UNK`;
/// missing name falls back to the code.
pub fn landtype_classification(props: &JsonObject) -> (String, String) {
    let code = first_text(props, LANDTYPE_CODE).unwrap_or_else(|| UNKNOWN_CODE.to_string());
    let name = first_text(props, LANDTYPE_NAME).unwrap_or_else(|| code.clone());
    (code, name)
}

/// `(code, name)` of a vegetation feature, read through the configured
/// field names. Names are presented as `Category <name>`.
pub fn vegetation_classification(props: &JsonObject, params: &VegetationParams) -> (String, String) {
    let code_field = params.code_field.as_deref().unwrap_or("code");
    let code = first_text(props, &[code_field, "code"]);
    let name = first_text(props, &[params.name_field.as_str(), "name"]);

    let category = name
        .clone()
        .or_else(|| code.clone())
        .unwrap_or_else(|| "Unknown".to_string());
    let code = code.or(name).unwrap_or_else(|| UNKNOWN_CODE.to_string());
    (code, format!("Category {category}"))
}
