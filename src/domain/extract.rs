//! Record extraction from intercepted listing payloads
//!
//! The listing endpoint has answered with a bare array, or with an object
//! wrapping the array under one of a few field names. Anything else is
//! treated as "no records here", never as a failure.

use serde_json::Value;
use thiserror::Error;

use super::token::Record;

/// Container fields probed for the record array, in priority order.
pub const CONTAINER_FIELDS: [&str; 3] = ["data", "coins", "items"];

/// Raised when a response body is not JSON at all.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("Malformed payload from {url}: {source}")]
    Malformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Shape in which the record array was found.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Extraction<'a> {
    /// The payload itself is the array.
    BareArray(&'a [Record]),
    /// The array sits under a container field.
    Container {
        field: &'static str,
        records: &'a [Record],
    },
    /// No array in any recognized position.
    NotFound,
}

impl<'a> Extraction<'a> {
    pub const fn records(&self) -> &'a [Record] {
        match self {
            Self::BareArray(records) | Self::Container { records, .. } => *records,
            Self::NotFound => &[],
        }
    }

    pub const fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }
}

/// Locate the record array inside a decoded payload.
pub fn extract_records(payload: &Value) -> Extraction<'_> {
    match payload {
        Value::Array(records) => Extraction::BareArray(records),
        Value::Object(fields) => CONTAINER_FIELDS
            .iter()
            .find_map(|field| match fields.get(*field) {
                Some(Value::Array(records)) => Some(Extraction::Container {
                    field: *field,
                    records,
                }),
                _ => None,
            })
            .unwrap_or(Extraction::NotFound),
        _ => Extraction::NotFound,
    }
}

/// Decode a raw response body.
pub fn decode_payload(url: &str, body: &str) -> Result<Value, PayloadError> {
    serde_json::from_str(body).map_err(|source| PayloadError::Malformed {
        url: url.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn bare_array_is_returned_unchanged() {
        let payload = json!([{"id": 1}, {"id": 2}]);
        let extraction = extract_records(&payload);
        assert!(matches!(extraction, Extraction::BareArray(_)));
        assert_eq!(extraction.records(), payload.as_array().unwrap().as_slice());
    }

    #[rstest]
    #[case("data")]
    #[case("coins")]
    #[case("items")]
    fn container_fields_are_recognized(#[case] field: &str) {
        let payload = json!({ field: [{"coinMint": "A"}], "total": 1 });
        let extraction = extract_records(&payload);
        assert_eq!(
            extraction,
            Extraction::Container {
                field: CONTAINER_FIELDS.iter().copied().find(|f| *f == field).unwrap(),
                records: payload[field].as_array().unwrap(),
            }
        );
    }

    #[test]
    fn first_array_valued_container_wins() {
        let payload = json!({
            "data": {"nested": true},
            "coins": [{"id": "c"}],
            "items": [{"id": "i"}],
        });
        match extract_records(&payload) {
            Extraction::Container { field, records } => {
                assert_eq!(field, "coins");
                assert_eq!(records, [json!({"id": "c"})].as_slice());
            }
            other => panic!("unexpected extraction: {other:?}"),
        }
    }

    #[rstest]
    #[case(json!({}))]
    #[case(json!(42))]
    #[case(json!("text"))]
    #[case(json!(null))]
    #[case(json!({"data": "not an array"}))]
    fn unrecognized_shapes_yield_no_records(#[case] payload: Value) {
        let extraction = extract_records(&payload);
        assert!(!extraction.is_found());
        assert!(extraction.records().is_empty());
    }

    #[test]
    fn non_json_body_is_malformed() {
        let err = decode_payload("https://frontend-api/list", "<html>").unwrap_err();
        assert!(err.to_string().contains("https://frontend-api/list"));
    }
}
