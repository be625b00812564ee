//! Record store: the persisted collection of patient records.
//!
//! The collection is one pretty-printed JSON array on disk. Every append
//! rewrites the whole file; at the volumes an intake desk produces (a few
//! records a day) that is simpler than any incremental format, and the file
//! stays easy to read and fix by hand.
//!
//! Writes go to a sibling `*.tmp` file that is renamed over the target, so a
//! crash mid-write leaves the previous collection intact. The load-append-save
//! cycle holds the store's mutex, so concurrent appends through one
//! [`RecordStore`] never lose records.

use crate::error::{IntakeError, ValidationError};
use crate::record::PatientRecord;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// JSON-file backed, append-only collection of [`PatientRecord`]s.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl RecordStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the full collection in store order.
    ///
    /// A missing file is an empty collection. A file that exists but is not a
    /// JSON array of objects is a [`ValidationError`]; it is never treated as
    /// empty, since the next append would silently discard its contents.
    pub async fn load(&self) -> Result<Vec<PatientRecord>, IntakeError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No record store at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(IntakeError::StoreReadFailed {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let records: Vec<PatientRecord> =
            serde_json::from_str(&text).map_err(|e| ValidationError {
                path: self.path.clone(),
                detail: e.to_string(),
            })?;
        debug!("Loaded {} records from {}", records.len(), self.path.display());
        Ok(records)
    }

    /// Replace the persisted collection with `records`.
    pub async fn save(&self, records: &[PatientRecord]) -> Result<(), IntakeError> {
        let _guard = self.write_lock.lock().await;
        self.write_all(records).await
    }

    /// Append one record at the end of the collection.
    ///
    /// Returns the collection size after the append.
    pub async fn append(&self, record: PatientRecord) -> Result<usize, IntakeError> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.load().await?;
        records.push(record);
        self.write_all(&records).await?;
        info!(
            "Saved record #{} to {}",
            records.len(),
            self.path.display()
        );
        Ok(records.len())
    }

    /// Records whose `"{first_name} {last_name}"` contains `query`,
    /// case-insensitively, in store order.
    pub async fn find_by_name(&self, query: &str) -> Result<Vec<PatientRecord>, IntakeError> {
        let records = self.load().await?;
        Ok(filter_by_name(records, query))
    }

    async fn write_all(&self, records: &[PatientRecord]) -> Result<(), IntakeError> {
        let write_err = |source| IntakeError::StoreWriteFailed {
            path: self.path.clone(),
            source,
        };

        let json = serde_json::to_string_pretty(records)
            .map_err(|e| IntakeError::Internal(format!("Failed to serialise records: {e}")))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(write_err)?;
        Ok(())
    }
}

/// Case-insensitive substring match on the full name, preserving order.
pub fn filter_by_name(records: Vec<PatientRecord>, query: &str) -> Vec<PatientRecord> {
    let needle = query.to_lowercase();
    records
        .into_iter()
        .filter(|r| r.full_name().to_lowercase().contains(&needle))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn record(v: Value) -> PatientRecord {
        serde_json::from_value(v).unwrap()
    }

    fn maria() -> PatientRecord {
        record(json!({
            "first_name": "Maria",
            "last_name": "Gonzalez",
            "allergies": ["Penicillin", "Shellfish"],
            "source_file": "maria.pdf"
        }))
    }

    #[tokio::test]
    async fn load_without_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.json"));

        assert_eq!(store.append(maria()).await.unwrap(), 1);
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![maria()]);
        assert_eq!(loaded[0].get_list("allergies"), vec!["Penicillin", "Shellfish"]);
    }

    #[tokio::test]
    async fn append_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.json"));
        for name in ["Ann", "Bob", "Cy"] {
            store.append(record(json!({"first_name": name}))).await.unwrap();
        }
        let names: Vec<String> = store
            .load()
            .await
            .unwrap()
            .iter()
            .map(|r| r.first_name().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["Ann", "Bob", "Cy"]);
    }

    #[tokio::test]
    async fn file_is_pretty_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        let store = RecordStore::new(&path);
        store.append(maria()).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("[\n  {\n    \"first_name\": \"Maria\""), "got: {text}");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = RecordStore::new(&path);

        assert!(matches!(
            store.load().await.unwrap_err(),
            IntakeError::Validation(_)
        ));
        // An append must not clobber the unreadable file.
        assert!(store.append(maria()).await.is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn array_of_non_objects_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(&path, r#"["Maria"]"#).unwrap();
        assert!(matches!(
            RecordStore::new(&path).load().await.unwrap_err(),
            IntakeError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn find_by_name_is_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordStore::new(dir.path().join("records.json"));
        store.append(maria()).await.unwrap();
        store
            .append(record(json!({"first_name": "John", "last_name": "Smith"})))
            .await
            .unwrap();

        let found = store.find_by_name("gonzalez").await.unwrap();
        assert_eq!(found, vec![maria()]);
        assert_eq!(store.find_by_name("MARIA GON").await.unwrap().len(), 1);
        assert!(store.find_by_name("zzz").await.unwrap().is_empty());
    }

    #[test]
    fn filter_treats_missing_names_as_empty() {
        let records = vec![
            record(json!({"last_name": "Gonzalez"})),
            record(json!({"email": "x@y.z"})),
        ];
        assert_eq!(filter_by_name(records.clone(), "gonz").len(), 1);
        assert_eq!(filter_by_name(records, "").len(), 2);
    }

    #[test]
    fn save_replaces_collection() {
        tokio_test::block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let store = RecordStore::new(dir.path().join("nested/records.json"));
            store.append(maria()).await.unwrap();
            store.save(&[]).await.unwrap();
            assert!(store.load().await.unwrap().is_empty());
        });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_are_serialised() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(RecordStore::new(dir.path().join("records.json")));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append(record(json!({"first_name": format!("P{i}")})))
                        .await
                })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.load().await.unwrap().len(), 8);
    }
}
