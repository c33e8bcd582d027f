use std::collections::HashMap;

use serde_json::Value;

/// A raw tabular record as produced by a `RecordSource`, before any
/// validation or cleaning: an untyped field map tagged with the name of the
/// source it came from. CSV cells arrive as strings; coercion to native
/// types is the validator's (throwaway) and cleaner's (real) job.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub source: String,
    pub fields: HashMap<String, Value>,
}

impl RawRecord {
    pub fn new(source: &str, fields: HashMap<String, Value>) -> Self {
        Self {
            source: source.to_owned(),
            fields,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// The original field map as a JSON object, preserved verbatim for the
    /// rejection audit trail.
    pub fn payload(&self) -> Value {
        Value::Object(self.fields.clone().into_iter().collect())
    }
}

/// Whether a value counts as null for nullability purposes. Missing fields,
/// JSON nulls, and empty CSV cells are all equivalent.
pub fn is_null_like(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record_with(field: &str, value: Value) -> RawRecord {
        RawRecord::new("external", HashMap::from([(field.to_owned(), value)]))
    }

    #[test]
    fn empty_cells_are_null_like() {
        let record = record_with("pressure_hpa", json!("  "));
        assert!(is_null_like(record.get("pressure_hpa")));
        assert!(is_null_like(record.get("not_present")));
        assert!(is_null_like(record_with("aqi", Value::Null).get("aqi")));
        assert!(!is_null_like(record_with("aqi", json!("42")).get("aqi")));
    }

    #[test]
    fn payload_preserves_original_fields() {
        let record = record_with("pressure_hpa", json!("2000"));
        assert_eq!(record.payload(), json!({"pressure_hpa": "2000"}));
    }
}
