use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::IngestError;
use crate::ids::SessionId;

/// One persisted telemetry reading.
///
/// Serializes to the history item shape clients consume:
/// `{id, timestamp, identifier, velocity, air_pressure, save_datetime}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Assigned by the store when the append commits.
    #[serde(rename = "id")]
    pub sequence_no: i64,
    /// Producer-supplied label, e.g. `"T+3"`. Not ordered, not unique.
    pub timestamp: String,
    #[serde(rename = "identifier")]
    pub session_id: SessionId,
    pub velocity: f64,
    pub air_pressure: f64,
    #[serde(rename = "save_datetime")]
    pub recorded_at: DateTime<Utc>,
}

/// A validated sample that has not been persisted yet.
#[derive(Clone, Debug, PartialEq)]
pub struct NewSample {
    pub session_id: SessionId,
    pub timestamp: String,
    pub velocity: f64,
    pub air_pressure: f64,
}

impl NewSample {
    pub fn new(
        session_id: SessionId,
        timestamp: impl Into<String>,
        velocity: f64,
        air_pressure: f64,
    ) -> Self {
        Self {
            session_id,
            timestamp: timestamp.into(),
            velocity,
            air_pressure,
        }
    }

    /// Validate a raw ingestion body.
    ///
    /// Expects `{timestamp: string, identifier: string, velocity: number,
    /// air_pressure: number}`. Unknown keys are ignored.
    pub fn from_json(body: &Value) -> Result<Self, IngestError> {
        let obj = body
            .as_object()
            .ok_or_else(|| IngestError::Validation("request body must be a JSON object".into()))?;

        let timestamp = require_str(obj, "timestamp")?;
        let identifier = require_str(obj, "identifier")?;
        let velocity = require_number(obj, "velocity")?;
        let air_pressure = require_number(obj, "air_pressure")?;

        Ok(Self::new(
            SessionId::from_raw(identifier),
            timestamp,
            velocity,
            air_pressure,
        ))
    }
}

fn require_str<'a>(
    obj: &'a serde_json::Map<String, Value>,
    key: &str,
) -> Result<&'a str, IngestError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(IngestError::Validation(format!(
            "missing required field: {key}"
        ))),
        Some(Value::String(s)) if s.trim().is_empty() => Err(IngestError::Validation(format!(
            "field must not be empty: {key}"
        ))),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(IngestError::Validation(format!(
            "field must be a string: {key}"
        ))),
    }
}

fn require_number(obj: &serde_json::Map<String, Value>, key: &str) -> Result<f64, IngestError> {
    match obj.get(key) {
        None | Some(Value::Null) => Err(IngestError::Validation(format!(
            "missing required field: {key}"
        ))),
        Some(Value::Number(n)) => n
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| IngestError::Validation(format!("field must be a finite number: {key}"))),
        Some(_) => Err(IngestError::Validation(format!(
            "field must be a number: {key}"
        ))),
    }
}
