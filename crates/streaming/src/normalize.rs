//! Raw record → canonical `Spot` conversion.
//!
//! Both the viewport fetch path and the live channel feed records through
//! here, so both sources produce identical shapes. Field precedence is fixed:
//! camelCase spellings win over snake_case ones whenever both are present.

use serde_json::{Map, Value};

use crate::spot::{Spot, SpotId, SpotStatus};

pub(crate) const ID_KEYS: [&str; 3] = ["id", "spotId", "spot_id"];
const LAT_KEYS: [&str; 2] = ["latitude", "lat"];
const LNG_KEYS: [&str; 3] = ["longitude", "lng", "lon"];
pub(crate) const PRICE_KEYS: [&str; 2] = ["pricePerHour", "price_per_hour"];
pub(crate) const UPDATED_KEYS: [&str; 4] =
    ["lastUpdated", "last_updated", "updatedAt", "timestamp"];
const ENVELOPE_KEYS: [&str; 2] = ["spot", "payload"];
const MAX_ENVELOPE_DEPTH: usize = 4;

/// Convert any JSON value into a `Spot`. Never fails: absent or mistyped
/// fields fall back to defaults (`id` 0, coordinates 0.0, status
/// `Available`, no price).
pub fn normalize(raw: &Value) -> Spot {
    let Some(obj) = unwrap_envelope(raw).as_object() else {
        return blank(0);
    };

    let mut spot = blank(record_id(obj).unwrap_or(0));
    spot.latitude = field(obj, &LAT_KEYS).and_then(coerce_f64).unwrap_or(0.0);
    spot.longitude = field(obj, &LNG_KEYS).and_then(coerce_f64).unwrap_or(0.0);
    spot.location = field(obj, &["location"])
        .and_then(coerce_string)
        .unwrap_or_default();
    spot.status = field(obj, &["status"])
        .and_then(Value::as_str)
        .and_then(SpotStatus::parse)
        .unwrap_or_default();
    spot.price_per_hour = field(obj, &PRICE_KEYS)
        .and_then(coerce_f64)
        .filter(|p| *p >= 0.0);
    spot.last_updated = field(obj, &UPDATED_KEYS).and_then(coerce_string);
    spot.city = field(obj, &["city"]).and_then(coerce_string);
    spot.area = field(obj, &["area"]).and_then(coerce_string);
    spot
}

/// Checked variant for list endpoints: `None` when the record has no usable
/// id or lacks either coordinate.
pub fn normalize_record(raw: &Value) -> Option<Spot> {
    let obj = unwrap_envelope(raw).as_object()?;
    record_id(obj)?;
    if !object_has_geometry(obj) {
        return None;
    }
    Some(normalize(raw))
}

/// Whether a raw record carries both coordinates.
pub fn has_geometry(raw: &Value) -> bool {
    unwrap_envelope(raw)
        .as_object()
        .is_some_and(object_has_geometry)
}

/// Strip `{spot: {...}}` / `{payload: {...}}` wrappers around a record.
pub(crate) fn unwrap_envelope(raw: &Value) -> &Value {
    let mut current = raw;
    for _ in 0..MAX_ENVELOPE_DEPTH {
        let Some(obj) = current.as_object() else {
            break;
        };
        if ID_KEYS.iter().any(|k| obj.contains_key(*k)) {
            break;
        }
        match ENVELOPE_KEYS
            .iter()
            .filter_map(|k| obj.get(*k))
            .find(|v| v.is_object())
        {
            Some(inner) => current = inner,
            None => break,
        }
    }
    current
}

pub(crate) fn record_id(obj: &Map<String, Value>) -> Option<SpotId> {
    field(obj, &ID_KEYS).and_then(coerce_id)
}

/// First present, non-null value among `keys`, in order.
pub(crate) fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

pub(crate) fn coerce_id(v: &Value) -> Option<SpotId> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() <= MAX_EXACT)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| {
                s.parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite() && f.fract() == 0.0 && f.abs() <= MAX_EXACT)
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

pub(crate) fn coerce_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

pub(crate) fn coerce_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn object_has_geometry(obj: &Map<String, Value>) -> bool {
    field(obj, &LAT_KEYS).and_then(coerce_f64).is_some()
        && field(obj, &LNG_KEYS).and_then(coerce_f64).is_some()
}

fn blank(id: SpotId) -> Spot {
    Spot {
        id,
        latitude: 0.0,
        longitude: 0.0,
        location: String::new(),
        status: SpotStatus::default(),
        price_per_hour: None,
        last_updated: None,
        city: None,
        area: None,
    }
}
