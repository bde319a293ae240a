//! Batch-write payload types and normalization
//!
//! The write endpoint accepts a JSON `BatchPoints` document. Timestamps on
//! the wire are either epoch integers scaled by a `precision` code or
//! RFC3339 strings; decoding resolves both forms to UTC instants.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{TickError, TickResult};
use crate::time::{parse_rfc3339, Precision};

/// A single field value. All JSON numbers map to `Number`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Number(_) => FieldType::Number,
            FieldValue::Bool(_) => FieldType::Boolean,
            FieldValue::Text(_) => FieldType::String,
        }
    }
}

/// Scalar type of a stored field, used in type-conflict errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Number,
    Boolean,
    String,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::String => "string",
        };
        write!(f, "{}", s)
    }
}

/// A single point within a batch
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// Measurement name
    pub name: String,

    /// Tag dimensions; keys are unique and ordered
    pub tags: BTreeMap<String, String>,

    /// Explicit instant for this point, if the payload carried one
    pub timestamp: Option<DateTime<Utc>>,

    /// Field values keyed by field name
    pub fields: BTreeMap<String, FieldValue>,
}

/// A batch of points addressed to one database and retention policy
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchPoints {
    pub database: String,
    pub retention_policy: String,

    /// Batch-level instant applied to points without their own timestamp
    pub timestamp: Option<DateTime<Utc>>,

    pub points: Vec<Point>,
}

/// A point after normalization: timestamp resolved, ready for the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedPoint {
    pub name: String,
    pub tags: BTreeMap<String, String>,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Resolve a wire timestamp value against a precision code.
fn resolve_timestamp(
    value: Option<&serde_json::Value>,
    precision: Option<&str>,
) -> TickResult<Option<DateTime<Utc>>> {
    let value = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(v) => v,
    };
    match value {
        serde_json::Value::Number(n) => {
            let epoch = n.as_i64().ok_or_else(|| {
                TickError::InvalidTimestamp(format!("invalid timestamp {}", n))
            })?;
            let precision = Precision::parse(precision.unwrap_or(""))?;
            precision.epoch_to_timestamp(epoch).map(Some)
        }
        serde_json::Value::String(s) => parse_rfc3339(s).map(Some),
        other => Err(TickError::InvalidTimestamp(format!(
            "invalid timestamp {}",
            other
        ))),
    }
}

#[derive(Deserialize)]
struct RawPoint {
    #[serde(default)]
    name: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    #[serde(default)]
    precision: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, FieldValue>,
}

impl<'de> Deserialize<'de> for Point {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawPoint::deserialize(deserializer)?;
        let timestamp = resolve_timestamp(raw.timestamp.as_ref(), raw.precision.as_deref())
            .map_err(D::Error::custom)?;
        Ok(Point {
            name: raw.name,
            tags: raw.tags,
            timestamp,
            fields: raw.fields,
        })
    }
}

#[derive(Deserialize)]
struct RawBatchPoints {
    #[serde(default)]
    database: String,
    #[serde(default, rename = "retentionPolicy")]
    retention_policy: String,
    #[serde(default)]
    timestamp: Option<serde_json::Value>,
    #[serde(default)]
    precision: Option<String>,
    #[serde(default)]
    points: Vec<Point>,
}

impl<'de> Deserialize<'de> for BatchPoints {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawBatchPoints::deserialize(deserializer)?;
        let timestamp = resolve_timestamp(raw.timestamp.as_ref(), raw.precision.as_deref())
            .map_err(D::Error::custom)?;
        Ok(BatchPoints {
            database: raw.database,
            retention_policy: raw.retention_policy,
            timestamp,
            points: raw.points,
        })
    }
}

/// Normalize a decoded batch for the backend write call.
///
/// Timestamp precedence: per-point, then batch-level, then the server clock
/// at the time of this call. Every point must carry at least one field.
pub fn normalize_batch(batch: &BatchPoints) -> TickResult<Vec<NormalizedPoint>> {
    let mut normalized = Vec::with_capacity(batch.points.len());
    for point in &batch.points {
        if point.fields.is_empty() {
            return Err(TickError::FieldsRequired);
        }
        let timestamp = point
            .timestamp
            .or(batch.timestamp)
            .unwrap_or_else(Utc::now);
        normalized.push(NormalizedPoint {
            name: point.name.clone(),
            tags: point.tags.clone(),
            timestamp,
            fields: point.fields.clone(),
        });
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_epoch_timestamps() {
        let now = Utc::now();
        let cases: [(&str, i64); 6] = [
            ("n", now.timestamp_nanos_opt().unwrap()),
            ("u", now.timestamp_nanos_opt().unwrap() / 1_000),
            ("ms", now.timestamp_millis()),
            ("s", now.timestamp()),
            ("m", now.timestamp() / 60),
            ("h", now.timestamp() / 3_600),
        ];

        for (precision, epoch) in cases {
            let body = format!(r#"{{"timestamp": {}, "precision": "{}"}}"#, epoch, precision);
            let batch: BatchPoints = serde_json::from_str(&body).unwrap();
            let expected = Precision::parse(precision)
                .unwrap()
                .epoch_to_timestamp(epoch)
                .unwrap();
            assert_eq!(batch.timestamp, Some(expected), "precision {}", precision);
        }
    }

    #[test]
    fn test_batch_epoch_max_int64() {
        let batch: BatchPoints =
            serde_json::from_str(r#"{"timestamp": 9223372036854775807, "precision": "n"}"#)
                .unwrap();
        assert_eq!(
            batch.timestamp.unwrap().timestamp_nanos_opt().unwrap(),
            i64::MAX
        );
    }

    #[test]
    fn test_batch_rfc3339_timestamps() {
        let batch: BatchPoints =
            serde_json::from_str(r#"{"timestamp": "2009-11-10T23:00:00Z"}"#).unwrap();
        assert_eq!(batch.timestamp.unwrap().timestamp(), 1257894000);

        let batch: BatchPoints =
            serde_json::from_str(r#"{"timestamp": "2009-11-10T23:00:00.000000042Z"}"#).unwrap();
        assert_eq!(
            batch.timestamp.unwrap().timestamp_nanos_opt().unwrap(),
            1257894000000000042
        );
    }

    #[test]
    fn test_batch_default_precision_is_nanoseconds() {
        let batch: BatchPoints = serde_json::from_str(r#"{"timestamp": 1}"#).unwrap();
        assert_eq!(batch.timestamp.unwrap().timestamp_nanos_opt().unwrap(), 1);
    }

    #[test]
    fn test_batch_bad_precision_is_a_decode_error() {
        let err = serde_json::from_str::<BatchPoints>(r#"{"timestamp": 1, "precision": "d"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("invalid precision"));
    }

    #[test]
    fn test_full_batch_decode() {
        let body = r#"{
            "database": "foo",
            "retentionPolicy": "bar",
            "points": [
                {"name": "cpu", "tags": {"host": "server01"},
                 "timestamp": "2009-11-10T23:00:00Z", "fields": {"value": 100}}
            ]
        }"#;
        let batch: BatchPoints = serde_json::from_str(body).unwrap();
        assert_eq!(batch.database, "foo");
        assert_eq!(batch.retention_policy, "bar");
        assert_eq!(batch.points.len(), 1);
        let p = &batch.points[0];
        assert_eq!(p.name, "cpu");
        assert_eq!(p.tags.get("host").map(String::as_str), Some("server01"));
        assert_eq!(p.fields.get("value"), Some(&FieldValue::Number(100.0)));
        assert!(p.timestamp.is_some());
    }

    #[test]
    fn test_normalize_timestamp_precedence() {
        let batch_ts = parse_rfc3339("2009-11-10T23:00:00Z").unwrap();
        let point_ts = parse_rfc3339("2010-01-01T00:00:00Z").unwrap();

        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), FieldValue::Number(1.0));

        let batch = BatchPoints {
            database: "foo".into(),
            retention_policy: "bar".into(),
            timestamp: Some(batch_ts),
            points: vec![
                Point {
                    name: "cpu".into(),
                    tags: BTreeMap::new(),
                    timestamp: Some(point_ts),
                    fields: fields.clone(),
                },
                Point {
                    name: "cpu".into(),
                    tags: BTreeMap::new(),
                    timestamp: None,
                    fields,
                },
            ],
        };

        let normalized = normalize_batch(&batch).unwrap();
        assert_eq!(normalized[0].timestamp, point_ts);
        assert_eq!(normalized[1].timestamp, batch_ts);
    }

    #[test]
    fn test_normalize_assigns_server_time() {
        let before = Utc::now();

        let mut fields = BTreeMap::new();
        fields.insert("value".to_string(), FieldValue::Number(1.0));
        let batch = BatchPoints {
            database: "foo".into(),
            points: vec![Point {
                name: "cpu".into(),
                tags: BTreeMap::new(),
                timestamp: None,
                fields,
            }],
            ..Default::default()
        };

        let normalized = normalize_batch(&batch).unwrap();
        assert!(normalized[0].timestamp > before);
    }

    #[test]
    fn test_normalize_requires_fields() {
        let batch = BatchPoints {
            database: "foo".into(),
            points: vec![Point {
                name: "cpu".into(),
                tags: BTreeMap::new(),
                timestamp: None,
                fields: BTreeMap::new(),
            }],
            ..Default::default()
        };
        assert_eq!(normalize_batch(&batch).unwrap_err(), TickError::FieldsRequired);
    }

    #[test]
    fn test_field_value_types() {
        let fields: BTreeMap<String, FieldValue> =
            serde_json::from_str(r#"{"a": 1, "b": 2.5, "c": true, "d": "x"}"#).unwrap();
        assert_eq!(fields["a"].field_type(), FieldType::Number);
        assert_eq!(fields["b"].field_type(), FieldType::Number);
        assert_eq!(fields["c"].field_type(), FieldType::Boolean);
        assert_eq!(fields["d"].field_type(), FieldType::String);
    }
}
