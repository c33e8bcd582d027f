use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;
use thiserror::Error;

use crate::record::RawRecord;

/// Enumeration of cleaning failures. The validator guarantees the natural
/// key fields are present and well-typed before `clean` runs, so these only
/// surface when a record bypasses validation; the pipeline still routes them
/// to the rejection sink rather than dropping the record.
#[derive(Error, Debug)]
pub enum CleanError {
    #[error("no cleaner registered for table {0}")]
    UnknownTable(String),
    #[error("missing or invalid {0}")]
    MissingField(&'static str),
}

/// Person attributes carried by a record: the natural key plus optional
/// location, used only on first sighting of a new name.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonAttributes {
    pub name: String,
    pub location_name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehavioralMetrics {
    pub sleep_hours: Option<f64>,
    pub breakfast_skipped: Option<bool>,
    pub lunch_skipped: Option<bool>,
    pub phone_usage: Option<i64>,
    pub caffeine_count: Option<i64>,
    pub steps: Option<i64>,
    pub water_glasses: Option<i64>,
    pub exercise: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CognitiveMetrics {
    pub brain_fog_score: Option<i64>,
    pub reaction_time_ms: Option<f64>,
    pub verbal_memory_words: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExternalMetrics {
    pub pressure_hpa: Option<f64>,
    pub pressure_change_24h: Option<f64>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pm25: Option<f64>,
    pub aqi: Option<i64>,
}

/// Metric columns of one record, discriminated by the logical table it was
/// validated against. Each variant owns exactly the columns its upsert
/// writes, so sources merging into the same measurement row never clobber
/// each other's values.
#[derive(Debug, Clone, PartialEq)]
pub enum Metrics {
    Behavioral(BehavioralMetrics),
    Cognitive(CognitiveMetrics),
    External(ExternalMetrics),
}

impl Metrics {
    pub fn kind(&self) -> &'static str {
        match self {
            Metrics::Behavioral(_) => "behavioral",
            Metrics::Cognitive(_) => "cognitive",
            Metrics::External(_) => "external",
        }
    }
}

/// A typed, normalized record ready for the upsert loader. Every metric is
/// either its native type or an explicit null; no raw-only artifacts
/// survive cleaning.
#[derive(Debug, Clone, PartialEq)]
pub struct CleanRecord {
    pub person: PersonAttributes,
    pub timestamp: NaiveDateTime,
    pub metrics: Metrics,
}

/// Normalize a validated record for the table it was validated against.
///
/// Missing or unparseable metric values become null rather than defaulting
/// to zero, so downstream analytics are not biased by absent data. Unknown
/// raw fields are dropped by construction.
pub fn clean(record: &RawRecord, table: &str) -> Result<CleanRecord, CleanError> {
    let metrics = match table {
        "measurements_behavioral" => Metrics::Behavioral(clean_behavioral(record)),
        "measurements_cognitive" => Metrics::Cognitive(clean_cognitive(record)),
        "measurements_external" => Metrics::External(clean_external(record)),
        other => return Err(CleanError::UnknownTable(other.to_owned())),
    };

    let name = record
        .get("person")
        .and_then(safe_string)
        .map(|name| canonical_name(&name))
        .ok_or(CleanError::MissingField("person"))?;
    let timestamp = record
        .get("timestamp")
        .and_then(parse_timestamp)
        .ok_or(CleanError::MissingField("timestamp"))?;

    Ok(CleanRecord {
        person: PersonAttributes {
            name,
            location_name: record.get("location_name").and_then(safe_string),
            latitude: record.get("latitude").and_then(safe_float),
            longitude: record.get("longitude").and_then(safe_float),
        },
        timestamp,
        metrics,
    })
}

fn clean_behavioral(record: &RawRecord) -> BehavioralMetrics {
    BehavioralMetrics {
        sleep_hours: record.get("sleep_hours").and_then(safe_float),
        breakfast_skipped: record.get("breakfast_skipped").and_then(safe_bool),
        lunch_skipped: record.get("lunch_skipped").and_then(safe_bool),
        phone_usage: record.get("phone_usage").and_then(safe_int),
        caffeine_count: record.get("caffeine_count").and_then(safe_int),
        steps: record.get("steps").and_then(safe_int),
        water_glasses: record.get("water_glasses").and_then(safe_int),
        exercise: record.get("exercise").and_then(safe_bool),
    }
}

fn clean_cognitive(record: &RawRecord) -> CognitiveMetrics {
    CognitiveMetrics {
        brain_fog_score: record.get("brain_fog_score").and_then(safe_int),
        reaction_time_ms: record.get("reaction_time_ms").and_then(safe_float),
        verbal_memory_words: record.get("verbal_memory_words").and_then(safe_int),
    }
}

fn clean_external(record: &RawRecord) -> ExternalMetrics {
    ExternalMetrics {
        pressure_hpa: record.get("pressure_hpa").and_then(safe_float),
        pressure_change_24h: record.get("pressure_change_24h").and_then(safe_float),
        temperature: record.get("temperature").and_then(safe_float),
        humidity: record.get("humidity").and_then(safe_float),
        pm25: record.get("pm25").and_then(safe_float),
        aqi: record.get("aqi").and_then(safe_int),
    }
}

/// Trim and collapse inner whitespace so the same logical person is never
/// split into two rows by incidental formatting differences.
fn canonical_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn safe_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Integer coercion goes through float so CSV cells like "4.8" truncate to
/// 4 instead of failing.
pub(crate) fn safe_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

pub(crate) fn safe_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_uppercase().as_str() {
            "Y" | "YES" | "TRUE" | "1" => Some(true),
            "N" | "NO" | "FALSE" | "0" => Some(false),
            _ => None,
        },
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        _ => None,
    }
}

pub(crate) fn safe_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        }
        _ => None,
    }
}

/// Parse a timestamp cell. Accepts RFC 3339, ISO-8601 with or without
/// seconds, the space-separated equivalents, and bare dates.
pub(crate) fn parse_timestamp(value: &Value) -> Option<NaiveDateTime> {
    let Value::String(s) = value else { return None };
    let s = s.trim();

    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }

    const FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
    ];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Whether a present, non-null value coerces to the given metric type.
/// Shared with the validator, which uses it for throwaway type checks; the
/// real coercion happens here in the cleaner.
pub(crate) fn coercible(value: &Value, field_type: crate::schema::FieldType) -> bool {
    use crate::schema::FieldType;

    match field_type {
        FieldType::Integer => safe_int(value).is_some(),
        FieldType::Float => safe_float(value).is_some(),
        FieldType::Boolean => safe_bool(value).is_some(),
        FieldType::String => safe_string(value).is_some(),
        FieldType::Timestamp => parse_timestamp(value).is_some(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;

    use super::*;

    fn external_record(fields: &[(&str, Value)]) -> RawRecord {
        let mut map = HashMap::new();
        map.insert("person".to_owned(), json!("Alice"));
        map.insert("timestamp".to_owned(), json!("2024-01-01T08:00"));
        for (field, value) in fields {
            map.insert((*field).to_owned(), value.clone());
        }
        RawRecord::new("external", map)
    }

    #[test]
    fn numeric_strings_become_native_types() {
        let record = external_record(&[
            ("pressure_hpa", json!("1010.5")),
            ("aqi", json!("42")),
            ("humidity", json!(55)),
        ]);

        let cleaned = clean(&record, "measurements_external").unwrap();
        let Metrics::External(metrics) = cleaned.metrics else {
            panic!("expected external metrics");
        };
        assert_eq!(metrics.pressure_hpa, Some(1010.5));
        assert_eq!(metrics.aqi, Some(42));
        assert_eq!(metrics.humidity, Some(55.0));
    }

    #[test]
    fn missing_metrics_stay_null() {
        let record = external_record(&[("pressure_hpa", json!(""))]);

        let cleaned = clean(&record, "measurements_external").unwrap();
        let Metrics::External(metrics) = cleaned.metrics else {
            panic!("expected external metrics");
        };
        assert_eq!(metrics.pressure_hpa, None);
        assert_eq!(metrics.temperature, None);
    }

    #[test]
    fn person_name_is_canonicalized() {
        let mut map = HashMap::new();
        map.insert("person".to_owned(), json!("  Alice   Smith "));
        map.insert("timestamp".to_owned(), json!("2024-01-01 08:00:00"));
        map.insert("brain_fog_score".to_owned(), json!("7"));
        let record = RawRecord::new("cognitive", map);

        let cleaned = clean(&record, "measurements_cognitive").unwrap();
        assert_eq!(cleaned.person.name, "Alice Smith");
    }

    #[test]
    fn integer_cells_truncate_through_float() {
        assert_eq!(safe_int(&json!("4.8")), Some(4));
        assert_eq!(safe_int(&json!(4.8)), Some(4));
        assert_eq!(safe_int(&json!("12")), Some(12));
        assert_eq!(safe_int(&json!("not a number")), None);
    }

    #[test]
    fn boolean_cells_accept_csv_spellings() {
        assert_eq!(safe_bool(&json!("Y")), Some(true));
        assert_eq!(safe_bool(&json!("no")), Some(false));
        assert_eq!(safe_bool(&json!("TRUE")), Some(true));
        assert_eq!(safe_bool(&json!(0)), Some(false));
        assert_eq!(safe_bool(&json!("maybe")), None);
    }

    #[test]
    fn timestamp_forms_parse() {
        for form in [
            "2024-01-01T08:00",
            "2024-01-01T08:00:00",
            "2024-01-01 08:00:00",
            "2024-01-01T08:00:00Z",
        ] {
            let parsed = parse_timestamp(&json!(form)).unwrap();
            assert_eq!(parsed.format("%Y-%m-%d %H:%M").to_string(), "2024-01-01 08:00");
        }
        assert_eq!(
            parse_timestamp(&json!("2024-01-01"))
                .unwrap()
                .format("%H:%M:%S")
                .to_string(),
            "00:00:00"
        );
        assert_eq!(parse_timestamp(&json!("yesterday")), None);
    }

    #[test]
    fn unknown_raw_fields_do_not_leak() {
        let record = external_record(&[("bogus_column", json!("3.14"))]);

        let cleaned = clean(&record, "measurements_external").unwrap();
        assert_eq!(
            cleaned.metrics,
            Metrics::External(ExternalMetrics::default())
        );
    }

    #[test]
    fn unknown_table_is_an_error() {
        let record = external_record(&[]);
        assert!(matches!(
            clean(&record, "measurements_martian"),
            Err(CleanError::UnknownTable(_))
        ));
    }
}
