//! Module tree validation and publishing of a content store.
//!
//! Module ids must be unique across the whole tree (a repeated id is how a
//! cycle would show up in a serialized tree) and every lesson reference must
//! resolve. Dangling references are an error, never skipped.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use chrono::Utc;
use tracing::{info, instrument};

use crate::domain::{BatchSpec, ContentMetadata, LearningModule, Lesson};
use crate::error::{StoreError, ValidationError};
use crate::store::{load_lesson_records, ContentStore};

pub fn validate_module_tree(modules: &[LearningModule], lesson_ids: &HashSet<&str>) -> Result<(), ValidationError> {
  let mut seen = HashSet::new();
  let mut result = Ok(());
  for root in modules {
    root.walk(&mut |m| {
      if result.is_err() {
        return;
      }
      if !seen.insert(m.id.as_str()) {
        result = Err(ValidationError::DuplicateModule(m.id.clone()));
        return;
      }
      if let Some(missing) = m.lessons.iter().find(|l| !lesson_ids.contains(l.as_str())) {
        result = Err(ValidationError::DanglingLesson { module: m.id.clone(), lesson: missing.clone() });
      }
    });
    result.clone()?;
  }
  result
}

/// Lessons keyed by id, rejecting duplicates and structurally invalid lessons.
pub fn index_lessons(lessons: Vec<Lesson>) -> Result<HashMap<String, Lesson>, ValidationError> {
  let mut by_id = HashMap::with_capacity(lessons.len());
  for lesson in lessons {
    lesson.validate()?;
    let id = lesson.metadata.id.clone();
    if by_id.insert(id.clone(), lesson).is_some() {
      return Err(ValidationError::DuplicateLesson(id));
    }
  }
  Ok(by_id)
}

/// A flat top-level module over `lessons`. When a batch spec is given its
/// order wins; lessons it does not mention follow, sorted by id.
pub fn single_module(
  id: &str,
  title: &str,
  description: &str,
  lessons: &[Lesson],
  order: Option<&BatchSpec>,
) -> LearningModule {
  let mut ids: Vec<String> = lessons.iter().map(|l| l.metadata.id.clone()).collect();
  ids.sort();
  if let Some(spec) = order {
    let rank: HashMap<String, usize> = spec.requests().iter().enumerate().map(|(i, r)| (r.id(), i)).collect();
    ids.sort_by_key(|id| rank.get(id).copied().unwrap_or(usize::MAX));
  }
  LearningModule {
    id: id.to_string(),
    title: title.to_string(),
    description: description.to_string(),
    lessons: ids,
    sub_modules: Vec::new(),
  }
}

/// How the module tree for a publish is obtained.
pub enum ModulePlan {
  /// A hand-written outline (JSON list of module trees).
  Outline(Vec<LearningModule>),
  /// One flat module over every generated lesson.
  Single { id: String, title: String, description: String, order: Option<BatchSpec> },
}

/// Read the lesson records in `lessons_dir`, build and validate the module
/// tree, and write a content store stamped with the current time.
#[instrument(level = "info", skip_all, fields(lessons_dir = %lessons_dir.display(), store_dir = %store_dir.display()))]
pub fn publish(lessons_dir: &Path, store_dir: &Path, plan: ModulePlan) -> Result<ContentMetadata, StoreError> {
  let lessons: Vec<Lesson> = load_lesson_records(lessons_dir)?.into_iter().map(|r| r.lesson).collect();
  let modules = match plan {
    ModulePlan::Outline(modules) => modules,
    ModulePlan::Single { id, title, description, order } => {
      vec![single_module(&id, &title, &description, &lessons, order.as_ref())]
    }
  };

  let by_id = index_lessons(lessons.clone())?;
  let ids: HashSet<&str> = by_id.keys().map(String::as_str).collect();
  validate_module_tree(&modules, &ids)?;

  let metadata = ContentMetadata { last_updated_timestamp: Utc::now() };
  ContentStore::new(store_dir).write_all(&lessons, &modules, &metadata)?;
  info!(
    target: "lesson_forge",
    lessons = lessons.len(),
    modules = modules.len(),
    timestamp = %metadata.last_updated_timestamp,
    "Published content store"
  );
  Ok(metadata)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::{fixtures, GenerationRequest, LessonRecord};
  use crate::store::lesson_record_path;

  fn ids<'a>(v: &'a [&'a str]) -> HashSet<&'a str> {
    v.iter().copied().collect()
  }

  #[test]
  fn valid_tree_passes() {
    let tree = vec![fixtures::module("root", &["a"], vec![fixtures::module("child", &["b"], vec![])])];
    assert!(validate_module_tree(&tree, &ids(&["a", "b"])).is_ok());
  }

  #[test]
  fn dangling_reference_is_an_error() {
    let tree = vec![fixtures::module("root", &["a"], vec![fixtures::module("child", &["ghost"], vec![])])];
    assert_eq!(
      validate_module_tree(&tree, &ids(&["a"])).unwrap_err(),
      ValidationError::DanglingLesson { module: "child".into(), lesson: "ghost".into() }
    );
  }

  #[test]
  fn repeated_module_id_is_rejected() {
    let tree = vec![
      fixtures::module("root", &[], vec![fixtures::module("shared", &[], vec![])]),
      fixtures::module("other", &[], vec![fixtures::module("root", &[], vec![])]),
    ];
    assert_eq!(validate_module_tree(&tree, &ids(&[])).unwrap_err(), ValidationError::DuplicateModule("root".into()));
  }

  #[test]
  fn duplicate_lessons_are_rejected() {
    let err = index_lessons(vec![fixtures::lesson("Traits"), fixtures::lesson("Traits")]).unwrap_err();
    assert_eq!(err, ValidationError::DuplicateLesson("traits".into()));
  }

  #[test]
  fn single_module_follows_batch_order() {
    let lessons = vec![fixtures::lesson("Alpha"), fixtures::lesson("Beta"), fixtures::lesson("Gamma")];
    let spec = BatchSpec::new(vec![GenerationRequest::new("Gamma", ""), GenerationRequest::new("Alpha", "")]).unwrap();
    let m = single_module("course", "Course", "", &lessons, Some(&spec));
    assert_eq!(m.lessons, vec!["gamma", "alpha", "beta"]);
    let m = single_module("course", "Course", "", &lessons, None);
    assert_eq!(m.lessons, vec!["alpha", "beta", "gamma"]);
  }

  #[test]
  fn publish_writes_a_readable_store() {
    let lessons_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    for title in ["Alpha", "Beta"] {
      let record = LessonRecord { request: GenerationRequest::new(title, ""), lesson: fixtures::lesson(title) };
      std::fs::write(lesson_record_path(lessons_dir.path(), &record.lesson.metadata.id), serde_json::to_vec(&record).unwrap())
        .unwrap();
    }
    let plan = ModulePlan::Single { id: "course".into(), title: "Course".into(), description: String::new(), order: None };
    let meta = publish(lessons_dir.path(), store_dir.path(), plan).unwrap();

    let store = ContentStore::new(store_dir.path());
    assert_eq!(store.read_metadata().unwrap(), Some(meta));
    assert_eq!(store.read_lessons().unwrap().unwrap().len(), 2);
    assert_eq!(store.read_modules().unwrap().unwrap()[0].lessons, vec!["alpha", "beta"]);
  }

  #[test]
  fn publish_refuses_dangling_outline() {
    let lessons_dir = tempfile::tempdir().unwrap();
    let store_dir = tempfile::tempdir().unwrap();
    let plan = ModulePlan::Outline(vec![fixtures::module("root", &["missing"], vec![])]);
    let err = publish(lessons_dir.path(), store_dir.path(), plan).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(ValidationError::DanglingLesson { .. })));
    assert!(ContentStore::new(store_dir.path()).read_metadata().unwrap().is_none());
  }
}
