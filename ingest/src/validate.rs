use serde_json::Value;

use crate::clean::{coercible, safe_bool, safe_float, safe_int, safe_string};
use crate::record::{is_null_like, RawRecord};
use crate::schema::{FieldRule, FieldType, TableRules};

/// One rule breach on one field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub field: String,
    pub message: String,
}

/// The verdict for a single record. All of a record's violations are
/// collected before the verdict, in field-declaration order, so the
/// rejection reason is complete and deterministic.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    /// The deterministic, ordered concatenation of all violations, used as
    /// the rejection reason.
    pub fn reason(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Apply a table's rules to a raw record. Fields present in the record but
/// absent from the registry are ignored, so unknown columns never cause
/// rejection. Coercion here is for checking only; the cleaner performs the
/// real conversion on accepted records.
pub fn validate(record: &RawRecord, rules: &TableRules) -> ValidationResult {
    let mut result = ValidationResult::default();

    for rule in &rules.fields {
        let value = record.get(&rule.field);
        if is_null_like(value) {
            if !rule.nullable {
                push(&mut result, rule, "missing required field".to_owned());
            }
            continue;
        }
        let value = match value {
            Some(value) => value,
            None => continue,
        };

        if !coercible(value, rule.field_type) {
            push(
                &mut result,
                rule,
                format!("invalid type, expected {}", rule.field_type),
            );
            continue;
        }

        if let Some(message) = range_violation(value, rule) {
            push(&mut result, rule, message);
        }

        if let Some(allowed) = &rule.allowed {
            if !in_allowed_set(value, rule.field_type, allowed) {
                push(&mut result, rule, "not in allowed set".to_owned());
            }
        }
    }

    result
}

fn push(result: &mut ValidationResult, rule: &FieldRule, message: String) {
    result.violations.push(Violation {
        field: rule.field.clone(),
        message,
    });
}

fn range_violation(value: &Value, rule: &FieldRule) -> Option<String> {
    if rule.min.is_none() && rule.max.is_none() {
        return None;
    }

    let numeric = match rule.field_type {
        FieldType::Integer => safe_int(value).map(|i| i as f64),
        FieldType::Float => safe_float(value),
        _ => None,
    }?;

    let min = rule.min.unwrap_or(f64::NEG_INFINITY);
    let max = rule.max.unwrap_or(f64::INFINITY);
    if numeric < min || numeric > max {
        return Some(format!("out of range [{min},{max}]"));
    }

    None
}

fn in_allowed_set(value: &Value, field_type: FieldType, allowed: &[Value]) -> bool {
    match field_type {
        FieldType::Integer => safe_int(value)
            .map(|i| allowed.iter().any(|a| a.as_i64() == Some(i)))
            .unwrap_or(false),
        FieldType::Float => safe_float(value)
            .map(|f| allowed.iter().any(|a| a.as_f64() == Some(f)))
            .unwrap_or(false),
        FieldType::Boolean => safe_bool(value)
            .map(|b| allowed.iter().any(|a| a.as_bool() == Some(b)))
            .unwrap_or(false),
        FieldType::String => safe_string(value)
            .map(|s| allowed.iter().any(|a| a.as_str() == Some(s.as_str())))
            .unwrap_or(false),
        // Enumerated timestamps are not a supported contract.
        FieldType::Timestamp => true,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::{json, Value};

    use crate::schema::SchemaRegistry;

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

    fn external_rules() -> TableRules {
        SchemaRegistry::builtin()
            .unwrap()
            .rules_for("measurements_external")
            .unwrap()
            .clone()
    }

    #[test]
    fn pressure_out_of_range_is_rejected_with_exact_reason() {
        let record = external_record(&[("pressure_hpa", json!(2000))]);

        let result = validate(&record, &external_rules());
        assert!(!result.is_valid());
        assert_eq!(
            result.violations,
            vec![Violation {
                field: "pressure_hpa".to_owned(),
                message: "out of range [870,1084]".to_owned(),
            }]
        );
        assert_eq!(result.reason(), "pressure_hpa: out of range [870,1084]");
    }

    #[test]
    fn in_range_pressure_is_accepted() {
        let record = external_record(&[("pressure_hpa", json!(1010))]);
        assert!(validate(&record, &external_rules()).is_valid());
    }

    #[test]
    fn all_violations_are_collected_in_declaration_order() {
        let mut map = HashMap::new();
        map.insert("timestamp".to_owned(), json!("2024-01-01T08:00"));
        map.insert("humidity".to_owned(), json!("150"));
        map.insert("pressure_hpa".to_owned(), json!("not a number"));
        let record = RawRecord::new("external", map);

        let result = validate(&record, &external_rules());
        let fields: Vec<&str> = result.violations.iter().map(|v| v.field.as_str()).collect();
        // person precedes pressure_hpa precedes humidity in the rule file
        assert_eq!(fields, vec!["person", "pressure_hpa", "humidity"]);
        assert_eq!(result.violations[0].message, "missing required field");
        assert_eq!(result.violations[1].message, "invalid type, expected float");
        assert_eq!(result.violations[2].message, "out of range [0,100]");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let record = external_record(&[("bogus_column", json!("banana"))]);
        assert!(validate(&record, &external_rules()).is_valid());
    }

    #[test]
    fn empty_cells_count_as_null() {
        // nullable metric: fine; required natural key: violation
        let record = external_record(&[("pressure_hpa", json!(""))]);
        assert!(validate(&record, &external_rules()).is_valid());

        let mut map = HashMap::new();
        map.insert("person".to_owned(), json!("   "));
        map.insert("timestamp".to_owned(), json!("2024-01-01T08:00"));
        let record = RawRecord::new("external", map);
        let result = validate(&record, &external_rules());
        assert_eq!(result.reason(), "person: missing required field");
    }

    #[test]
    fn bad_timestamp_is_a_type_violation() {
        let record = external_record(&[("timestamp", json!("noonish"))]);
        let result = validate(&record, &external_rules());
        assert_eq!(
            result.reason(),
            "timestamp: invalid type, expected timestamp"
        );
    }

    #[test]
    fn enum_rules_reject_values_outside_the_set() {
        let registry = SchemaRegistry::from_json(
            r#"{"t": [
                {"field": "phase", "type": "string", "allowed": ["solid", "liquid", "gas"]},
                {"field": "grade", "type": "integer", "allowed": [1, 2, 3]}
            ]}"#,
        )
        .unwrap();
        let rules = registry.rules_for("t").unwrap();

        let mut map = HashMap::new();
        map.insert("phase".to_owned(), json!("plasma"));
        map.insert("grade".to_owned(), json!("2"));
        let record = RawRecord::new("t", map);

        let result = validate(&record, rules);
        assert_eq!(result.reason(), "phase: not in allowed set");
    }
}
