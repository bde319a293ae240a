//! The per-statement results envelope
//!
//! Query, write-error and admin-error responses all serialize through these
//! types. Field omission rules match the wire format exactly: empty
//! collections disappear and an error-only envelope is `{"error":"..."}`.

use serde::ser::Serializer;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::TickError;

fn serialize_error<S>(err: &Option<TickError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match err {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

/// One named series of rows: ordered column names and ordered row values.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Row {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<serde_json::Value>>,
}

/// Outcome of one submitted statement: series data or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct StatementResult {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<Row>,

    #[serde(
        rename = "error",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub err: Option<TickError>,
}

impl StatementResult {
    pub fn ok(series: Vec<Row>) -> Self {
        Self { series, err: None }
    }

    pub fn error(err: TickError) -> Self {
        Self {
            series: Vec::new(),
            err: Some(err),
        }
    }
}

/// Ordered sequence of statement results, one per submitted statement.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Results {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<StatementResult>,

    #[serde(
        rename = "error",
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub err: Option<TickError>,
}

impl Results {
    pub fn from_statements(results: Vec<StatementResult>) -> Self {
        Self { results, err: None }
    }

    /// Envelope carrying a single top-level error and no statement results.
    pub fn from_error(err: TickError) -> Self {
        Self {
            results: Vec::new(),
            err: Some(err),
        }
    }

    /// The aggregate error: the top-level error if set, otherwise the first
    /// per-statement error. Used only for HTTP status selection; all
    /// statement results are still emitted in the body.
    pub fn error(&self) -> Option<&TickError> {
        if let Some(err) = &self.err {
            return Some(err);
        }
        self.results.iter().find_map(|r| r.err.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_statement_result_is_empty_object() {
        let body = serde_json::to_string(&Results::from_statements(vec![
            StatementResult::default(),
        ]))
        .unwrap();
        assert_eq!(body, r#"{"results":[{}]}"#);
    }

    #[test]
    fn test_series_serialization() {
        let results = Results::from_statements(vec![StatementResult::ok(vec![Row {
            columns: vec!["name".into()],
            values: vec![vec![json!("bar")], vec![json!("foo")]],
            ..Default::default()
        }])]);
        assert_eq!(
            serde_json::to_string(&results).unwrap(),
            r#"{"results":[{"series":[{"columns":["name"],"values":[["bar"],["foo"]]}]}]}"#
        );
    }

    #[test]
    fn test_statement_error_serialization() {
        let results =
            Results::from_statements(vec![StatementResult::error(TickError::DatabaseExists)]);
        assert_eq!(
            serde_json::to_string(&results).unwrap(),
            r#"{"results":[{"error":"database exists"}]}"#
        );
    }

    #[test]
    fn test_top_level_error_serialization() {
        let results = Results::from_error(TickError::DatabaseRequired);
        assert_eq!(
            serde_json::to_string(&results).unwrap(),
            r#"{"error":"database is required"}"#
        );
    }

    #[test]
    fn test_aggregate_error_prefers_top_level() {
        let mut results =
            Results::from_statements(vec![StatementResult::error(TickError::DatabaseExists)]);
        assert_eq!(results.error(), Some(&TickError::DatabaseExists));

        results.err = Some(TickError::DatabaseRequired);
        assert_eq!(results.error(), Some(&TickError::DatabaseRequired));

        assert!(Results::default().error().is_none());
    }
}
