//! Data model: per-page extraction results and merged patient records.
//!
//! Both are thin wrappers around an ordered JSON object. The vision service
//! decides which fields it can read, so a record is a mapping rather than a
//! struct with twenty `Option`s; the known field names below describe how
//! values are shaped, not which keys are allowed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Scalar string fields of an intake form.
pub const SCALAR_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "date_of_birth",
    "gender",
    "phone",
    "email",
    "address",
    "emergency_contact_name",
    "emergency_contact_phone",
    "insurance_provider",
    "insurance_id",
    "reason_for_visit",
    "additional_notes",
];

/// Fields whose value is always a list of strings.
pub const LIST_FIELDS: &[&str] = &["allergies", "current_medications", "medical_conditions"];

/// Metadata field holding the originating file name. Set only by the pipeline.
pub const SOURCE_FILE_FIELD: &str = "source_file";

/// How a field's value is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar,
    List,
    Metadata,
    /// Not part of the form schema; passed through untouched.
    Unknown,
}

impl FieldKind {
    pub fn of(name: &str) -> Self {
        if name == SOURCE_FILE_FIELD {
            FieldKind::Metadata
        } else if LIST_FIELDS.contains(&name) {
            FieldKind::List
        } else if SCALAR_FIELDS.contains(&name) {
            FieldKind::Scalar
        } else {
            FieldKind::Unknown
        }
    }
}

/// The structured output of one page, as parsed from the service reply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExtractionResult(pub Map<String, Value>);

impl ExtractionResult {
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for ExtractionResult {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// One page's extraction result tagged with its 1-based page number.
#[derive(Debug, Clone, PartialEq)]
pub struct PageExtraction {
    pub page_num: usize,
    pub result: ExtractionResult,
}

/// The merged, persisted record for one document.
///
/// Serialises as a flat JSON object with field names verbatim, so the record
/// store stays readable by hand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientRecord(Map<String, Value>);

impl PatientRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// String value of a scalar field.
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// String items of a list field. Non-string items are skipped.
    pub fn get_list(&self, field: &str) -> Vec<&str> {
        match self.0.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    pub fn first_name(&self) -> Option<&str> {
        self.get_str("first_name")
    }

    pub fn last_name(&self) -> Option<&str> {
        self.get_str("last_name")
    }

    /// `"{first} {last}"` with missing parts as empty strings.
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name().unwrap_or_default(),
            self.last_name().unwrap_or_default()
        )
    }

    pub fn source_file(&self) -> Option<&str> {
        self.get_str(SOURCE_FILE_FIELD)
    }

    /// Record the originating file name.
    pub(crate) fn set_source_file(&mut self, name: impl Into<String>) {
        self.0
            .insert(SOURCE_FILE_FIELD.to_string(), Value::String(name.into()));
    }

    pub(crate) fn insert(&mut self, field: String, value: Value) {
        self.0.insert(field, value);
    }

    /// Human-readable `(label, value)` rows, skipping metadata.
    ///
    /// Labels are title-cased field names (`date_of_birth` → `Date Of Birth`);
    /// lists are joined with `", "`, or `None` when empty.
    pub fn display_rows(&self) -> Vec<(String, String)> {
        self.0
            .iter()
            .filter(|(key, _)| key.as_str() != SOURCE_FILE_FIELD)
            .map(|(key, value)| (title_case(key), display_value(value)))
            .collect()
    }
}

impl From<Map<String, Value>> for PatientRecord {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn title_case(key: &str) -> String {
    key.split('_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "None".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(v: Value) -> PatientRecord {
        match v {
            Value::Object(map) => PatientRecord::from(map),
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn field_kinds() {
        assert_eq!(FieldKind::of("phone"), FieldKind::Scalar);
        assert_eq!(FieldKind::of("allergies"), FieldKind::List);
        assert_eq!(FieldKind::of("source_file"), FieldKind::Metadata);
        assert_eq!(FieldKind::of("blood_type"), FieldKind::Unknown);
    }

    #[test]
    fn full_name_with_missing_parts() {
        assert_eq!(record(json!({"first_name": "Maria"})).full_name(), "Maria ");
        assert_eq!(record(json!({"last_name": "Gonzalez"})).full_name(), " Gonzalez");
        assert_eq!(record(json!({})).full_name(), " ");
    }

    #[test]
    fn display_rows_skip_metadata_and_join_lists() {
        let r = record(json!({
            "first_name": "Maria",
            "date_of_birth": "1985-03-14",
            "allergies": ["Penicillin", "Shellfish"],
            "current_medications": [],
            "source_file": "form.pdf"
        }));
        let rows = r.display_rows();
        assert_eq!(
            rows,
            vec![
                ("First Name".to_string(), "Maria".to_string()),
                ("Date Of Birth".to_string(), "1985-03-14".to_string()),
                ("Allergies".to_string(), "Penicillin, Shellfish".to_string()),
                ("Current Medications".to_string(), "None".to_string()),
            ]
        );
    }

    #[test]
    fn serialises_as_flat_object_in_insertion_order() {
        let r = record(json!({"last_name": "Gonzalez", "first_name": "Maria"}));
        assert_eq!(
            serde_json::to_string(&r).unwrap(),
            r#"{"last_name":"Gonzalez","first_name":"Maria"}"#
        );
    }

    #[test]
    fn get_list_skips_non_strings() {
        let r = record(json!({"allergies": ["Latex", 3, null]}));
        assert_eq!(r.get_list("allergies"), vec!["Latex"]);
        assert!(r.get_list("medical_conditions").is_empty());
    }
}
