//! Live channel message decoding.
//!
//! The push channel is not uniform about its envelopes. This module accepts:
//! - flat status messages: `{id | spot_id, status, ...}`
//! - topic envelopes: `{topic: "parking/<city>/<id>/status", payload: status}`
//! - kind-tagged records: `{type: "spot_update" | "spot_patch", spot: {...}}`
//! - a JSON array, whose first element is decoded
//!
//! and resolves each into a single `Delta`. Anything else is a `DecodeError`
//! and must be dropped by the caller.

use std::fmt;

use serde_json::{Map, Value};

use crate::normalize::{
    ID_KEYS, PRICE_KEYS, UPDATED_KEYS, coerce_f64, coerce_string, field, has_geometry, normalize,
    record_id,
};
use crate::spot::{Spot, SpotId, SpotStatus};

/// Event kind tag carried in the `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Insert-or-replace the whole record.
    SpotUpdate,
    /// Merge fields into an already known record.
    SpotPatch,
}

impl EventKind {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "spot_update" => Some(Self::SpotUpdate),
            "spot_patch" => Some(Self::SpotPatch),
            _ => None,
        }
    }
}

/// Partial update for one spot. `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpotPatch {
    pub id: SpotId,
    pub status: Option<SpotStatus>,
    pub last_updated: Option<String>,
    pub location: Option<String>,
    pub price_per_hour: Option<f64>,
    pub city: Option<String>,
    pub area: Option<String>,
}

impl SpotPatch {
    pub fn status(id: SpotId, status: SpotStatus) -> Self {
        Self {
            id,
            status: Some(status),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.last_updated.is_none()
            && self.location.is_none()
            && self.price_per_hour.is_none()
            && self.city.is_none()
            && self.area.is_none()
    }
}

/// One incremental change delivered by the live channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Upsert(Spot),
    Patch(SpotPatch),
}

impl Delta {
    pub fn id(&self) -> SpotId {
        match self {
            Delta::Upsert(spot) => spot.id,
            Delta::Patch(patch) => patch.id,
        }
    }

    pub fn status(&self) -> Option<SpotStatus> {
        match self {
            Delta::Upsert(spot) => Some(spot.status),
            Delta::Patch(patch) => patch.status,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Json(String),
    UnrecognizedShape,
    MissingId,
    InvalidStatus(String),
    EmptyPatch,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Json(e) => write!(f, "invalid JSON: {e}"),
            DecodeError::UnrecognizedShape => write!(f, "unrecognized message shape"),
            DecodeError::MissingId => write!(f, "message has no usable spot id"),
            DecodeError::InvalidStatus(s) => write!(f, "unknown spot status: {s}"),
            DecodeError::EmptyPatch => write!(f, "patch carries no fields"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decode one text frame from the push channel.
pub fn decode(text: &str) -> Result<Delta, DecodeError> {
    let value: Value = serde_json::from_str(text).map_err(|e| DecodeError::Json(e.to_string()))?;
    decode_value(&value)
}

pub fn decode_value(value: &Value) -> Result<Delta, DecodeError> {
    match value {
        Value::Array(items) => items
            .first()
            .ok_or(DecodeError::UnrecognizedShape)
            .and_then(decode_value),
        Value::Object(obj) => decode_object(obj),
        _ => Err(DecodeError::UnrecognizedShape),
    }
}

fn decode_object(obj: &Map<String, Value>) -> Result<Delta, DecodeError> {
    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .and_then(EventKind::parse);

    // Kind-tagged record wrapped in `spot` / `data`.
    if let Some(kind) = kind {
        if let Some(body) = ["spot", "data"]
            .iter()
            .filter_map(|k| obj.get(*k))
            .find_map(Value::as_object)
        {
            return decode_record(kind, body, obj);
        }
    }

    if ID_KEYS.iter().any(|k| obj.contains_key(*k)) {
        return match kind {
            Some(kind) => decode_record(kind, obj, obj),
            None if obj.contains_key("status") => patch_from(obj, obj).map(Delta::Patch),
            None => Err(DecodeError::UnrecognizedShape),
        };
    }

    let topic = obj.get("topic").and_then(Value::as_str);
    if let (Some(topic), Some(payload)) = (topic, obj.get("payload")) {
        return decode_topic(topic, payload, obj);
    }

    Err(DecodeError::UnrecognizedShape)
}

/// `spot_update` with geometry upserts the full record; every other tagged
/// record degrades to a patch so partial data never creates a spot.
fn decode_record(
    kind: EventKind,
    body: &Map<String, Value>,
    envelope: &Map<String, Value>,
) -> Result<Delta, DecodeError> {
    let raw = Value::Object(body.clone());
    if kind == EventKind::SpotUpdate && has_geometry(&raw) {
        record_id(body).ok_or(DecodeError::MissingId)?;
        strict_status(body)?;
        let mut spot = normalize(&raw);
        if spot.last_updated.is_none() {
            spot.last_updated = field(envelope, &UPDATED_KEYS).and_then(coerce_string);
        }
        return Ok(Delta::Upsert(spot));
    }
    patch_from(body, envelope).map(Delta::Patch)
}

fn decode_topic(
    topic: &str,
    payload: &Value,
    envelope: &Map<String, Value>,
) -> Result<Delta, DecodeError> {
    let id = topic
        .split('/')
        .nth(2)
        .and_then(|seg| seg.trim().parse::<SpotId>().ok())
        .ok_or(DecodeError::MissingId)?;

    let status_text = match payload {
        Value::String(s) if s.trim_start().starts_with('{') => serde_json::from_str::<Value>(s)
            .ok()
            .and_then(|v| v.get("status").and_then(Value::as_str).map(str::to_owned))
            .unwrap_or_else(|| s.clone()),
        Value::String(s) => s.clone(),
        Value::Object(inner) => inner
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(DecodeError::UnrecognizedShape)?,
        other => return Err(DecodeError::InvalidStatus(other.to_string())),
    };
    let status =
        SpotStatus::parse(&status_text).ok_or(DecodeError::InvalidStatus(status_text))?;

    Ok(Delta::Patch(SpotPatch {
        last_updated: field(envelope, &UPDATED_KEYS).and_then(coerce_string),
        ..SpotPatch::status(id, status)
    }))
}

fn patch_from(
    body: &Map<String, Value>,
    envelope: &Map<String, Value>,
) -> Result<SpotPatch, DecodeError> {
    let id = record_id(body)
        .or_else(|| record_id(envelope))
        .ok_or(DecodeError::MissingId)?;
    let patch = SpotPatch {
        id,
        status: strict_status(body)?,
        last_updated: field(body, &UPDATED_KEYS)
            .or_else(|| field(envelope, &UPDATED_KEYS))
            .and_then(coerce_string),
        location: field(body, &["location"]).and_then(coerce_string),
        price_per_hour: field(body, &PRICE_KEYS)
            .and_then(coerce_f64)
            .filter(|p| *p >= 0.0),
        city: field(body, &["city"]).and_then(coerce_string),
        area: field(body, &["area"]).and_then(coerce_string),
    };
    if patch.is_empty() {
        return Err(DecodeError::EmptyPatch);
    }
    Ok(patch)
}

/// A present status must be one of the known values; live messages with a
/// garbled status are dropped instead of defaulting.
fn strict_status(obj: &Map<String, Value>) -> Result<Option<SpotStatus>, DecodeError> {
    match field(obj, &["status"]) {
        None => Ok(None),
        Some(v) => v
            .as_str()
            .and_then(SpotStatus::parse)
            .map(Some)
            .ok_or_else(|| DecodeError::InvalidStatus(v.to_string())),
    }
}
