//! Record merging: fold per-page extraction results into one patient record.
//!
//! The policy is last-write-wins per field, in page-number order. List fields
//! are replaced wholesale, never concatenated: a continuation sheet that lists
//! one medication replaces the first page's list. Fields a page does not
//! mention (or reports as empty) leave the earlier value alone.

use crate::record::{ExtractionResult, FieldKind, PageExtraction, PatientRecord};
use serde_json::Value;
use tracing::debug;

/// Merge page results into a single record.
///
/// Pages are sorted by page number first, so callers that gathered results
/// out of order still get the page-order outcome.
pub fn merge_pages(pages: &[PageExtraction]) -> PatientRecord {
    let mut ordered: Vec<&PageExtraction> = pages.iter().collect();
    ordered.sort_by_key(|p| p.page_num);

    let mut record = PatientRecord::new();
    for page in ordered {
        apply_page(&mut record, page.page_num, &page.result);
    }
    record
}

fn apply_page(record: &mut PatientRecord, page_num: usize, result: &ExtractionResult) {
    for (field, value) in result.fields() {
        match police_value(field, value) {
            Some(value) => {
                if let Some(previous) = record.get(field) {
                    if previous != &value {
                        debug!("Page {}: '{}' overrides earlier value", page_num, field);
                    }
                }
                record.insert(field.clone(), value);
            }
            None => debug!("Page {}: ignoring empty or reserved field '{}'", page_num, field),
        }
    }
}

/// Shape a service value for its field, or `None` when it counts as omitted.
fn police_value(field: &str, value: &Value) -> Option<Value> {
    match FieldKind::of(field) {
        // Only the pipeline sets metadata.
        FieldKind::Metadata => None,
        FieldKind::Scalar => scalar_string(value).map(Value::String),
        FieldKind::List => {
            let items: Vec<Value> = match value {
                Value::Array(items) => items
                    .iter()
                    .filter_map(scalar_string)
                    .map(Value::String)
                    .collect(),
                other => scalar_string(other).map(Value::String).into_iter().collect(),
            };
            (!items.is_empty()).then_some(Value::Array(items))
        }
        FieldKind::Unknown => (!is_empty_value(value)).then(|| value.clone()),
    }
}

/// Non-empty string form of a scalar JSON value.
fn scalar_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!s.trim().is_empty()).then_some(s)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}
