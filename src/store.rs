//! On-disk files of record.
//!
//! A content store directory holds:
//!   lessons.json  : every lesson
//!   modules.json  : top-level module tree
//!   metadata.json : `{ "lastUpdatedTimestamp": ... }`
//!
//! Each file is replaced through `write_atomic`. `write_all` removes
//! metadata.json before touching the content files and writes it back last,
//! so a store interrupted mid-write has no metadata and reads as empty: it is
//! never mistaken for a complete store, and the next update re-syncs it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::domain::{ContentMetadata, LearningModule, Lesson, LessonRecord};
use crate::error::StoreError;
use crate::util::write_atomic;

pub const LESSONS_FILE: &str = "lessons.json";
pub const MODULES_FILE: &str = "modules.json";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Clone, Debug)]
pub struct ContentStore {
  dir: PathBuf,
}

impl ContentStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn read_metadata(&self) -> Result<Option<ContentMetadata>, StoreError> {
    read_json(&self.dir.join(METADATA_FILE))
  }

  pub fn read_lessons(&self) -> Result<Option<Vec<Lesson>>, StoreError> {
    read_json(&self.dir.join(LESSONS_FILE))
  }

  pub fn read_modules(&self) -> Result<Option<Vec<LearningModule>>, StoreError> {
    read_json(&self.dir.join(MODULES_FILE))
  }

  /// Replace all three files. Metadata is dropped first and written last.
  #[instrument(level = "debug", skip_all, fields(dir = %self.dir.display(), lessons = lessons.len(), modules = modules.len()))]
  pub fn write_all(
    &self,
    lessons: &[Lesson],
    modules: &[LearningModule],
    metadata: &ContentMetadata,
  ) -> Result<(), StoreError> {
    let metadata_path = self.dir.join(METADATA_FILE);
    match fs::remove_file(&metadata_path) {
      Ok(()) => {}
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => return Err(StoreError::io(metadata_path, e)),
    }
    write_json(&self.dir.join(LESSONS_FILE), &lessons)?;
    write_json(&self.dir.join(MODULES_FILE), &modules)?;
    write_json(&metadata_path, metadata)?;
    debug!(target: "lesson_forge", "Content store written");
    Ok(())
  }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
  match fs::read(path) {
    Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| StoreError::json(path, e)),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
    Err(e) => Err(StoreError::io(path, e)),
  }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
  let bytes = serde_json::to_vec_pretty(value).map_err(|e| StoreError::json(path, e))?;
  write_atomic(path, &bytes).map_err(|e| StoreError::io(path, e))
}

/// Path of the lesson file for `id` inside a generation output directory.
pub fn lesson_record_path(output_dir: &Path, id: &str) -> PathBuf {
  output_dir.join(format!("{id}.json"))
}

/// Read one lesson record; `Ok(None)` if the file does not exist.
pub fn read_lesson_record(path: &Path) -> Result<Option<LessonRecord>, StoreError> {
  read_json(path)
}

/// Every lesson record in a generation output directory, sorted by id.
/// Hidden entries (the staging directory, temp files) are ignored.
#[instrument(level = "info", skip_all, fields(dir = %output_dir.display()))]
pub fn load_lesson_records(output_dir: &Path) -> Result<Vec<LessonRecord>, StoreError> {
  let entries = fs::read_dir(output_dir).map_err(|e| StoreError::io(output_dir, e))?;
  let mut records = Vec::new();
  for entry in entries {
    let entry = entry.map_err(|e| StoreError::io(output_dir, e))?;
    let path = entry.path();
    let name = entry.file_name();
    let name = name.to_string_lossy();
    if name.starts_with('.') || path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
      continue;
    }
    match read_lesson_record(&path)? {
      Some(record) => {
        record.lesson.validate()?;
        records.push(record);
      }
      None => warn!(target: "lesson_forge", path = %path.display(), "Lesson file vanished while listing"),
    }
  }
  records.sort_by(|a, b| a.lesson.metadata.id.cmp(&b.lesson.metadata.id));
  info!(target: "lesson_forge", count = records.len(), "Loaded lesson records");
  Ok(records)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{fixtures, GenerationRequest};
  use chrono::{TimeZone, Utc};

  #[test]
  fn absent_files_read_as_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path());
    assert!(store.read_metadata().unwrap().is_none());
    assert!(store.read_lessons().unwrap().is_none());
    assert!(store.read_modules().unwrap().is_none());
  }

  #[test]
  fn write_all_then_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path().join("store"));
    let lessons = vec![fixtures::lesson("Ownership")];
    let modules = vec![fixtures::module("core", &["ownership"], vec![])];
    let meta = ContentMetadata { last_updated_timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() };
    store.write_all(&lessons, &modules, &meta).unwrap();

    assert_eq!(store.read_lessons().unwrap().unwrap(), lessons);
    assert_eq!(store.read_modules().unwrap().unwrap(), modules);
    assert_eq!(store.read_metadata().unwrap().unwrap(), meta);
  }

  #[test]
  fn interrupted_write_all_leaves_no_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::new(dir.path());
    let old_meta = ContentMetadata { last_updated_timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() };
    store
      .write_all(&[fixtures::lesson("Ownership")], &[fixtures::module("core", &["ownership"], vec![])], &old_meta)
      .unwrap();

    // A non-empty directory where modules.json belongs makes its rename fail.
    fs::remove_file(dir.path().join(MODULES_FILE)).unwrap();
    fs::create_dir(dir.path().join(MODULES_FILE)).unwrap();
    fs::write(dir.path().join(MODULES_FILE).join("keep"), "x").unwrap();

    let new_lessons = vec![fixtures::lesson("Ownership"), fixtures::lesson("Lifetimes")];
    let new_meta = ContentMetadata { last_updated_timestamp: Utc.with_ymd_and_hms(2026, 4, 1, 12, 0, 0).unwrap() };
    let err = store
      .write_all(&new_lessons, &[fixtures::module("core", &["ownership"], vec![])], &new_meta)
      .unwrap_err();
    assert!(matches!(err, StoreError::Io { .. }));

    assert!(store.read_metadata().unwrap().is_none());
    assert_eq!(store.read_lessons().unwrap().unwrap(), new_lessons);
  }

  #[test]
  fn corrupt_file_is_a_json_error() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(METADATA_FILE), "{not json").unwrap();
    let err = ContentStore::new(dir.path()).read_metadata().unwrap_err();
    assert!(matches!(err, StoreError::Json { .. }));
  }

  #[test]
  fn load_lesson_records_skips_hidden_and_foreign_files() {
    let dir = tempfile::tempdir().unwrap();
    for title in ["Borrowing", "Async"] {
      let record = LessonRecord { request: GenerationRequest::new(title, "f"), lesson: fixtures::lesson(title) };
      let path = lesson_record_path(dir.path(), &record.lesson.metadata.id);
      fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
    }
    fs::create_dir(dir.path().join(".staging")).unwrap();
    fs::write(dir.path().join(".staging").join("x.json"), "garbage").unwrap();
    fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

    let records = load_lesson_records(dir.path()).unwrap();
    let ids: Vec<_> = records.iter().map(|r| r.lesson.metadata.id.as_str()).collect();
    assert_eq!(ids, vec!["async", "borrowing"]);
  }
}
