//! Domain models: generation requests and batches, lessons, learning modules,
//! and the content freshness marker.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::util::slugify;

/// One unit of work for the generator: a lesson title plus what it should focus on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
  pub title: String,
  #[serde(default)]
  pub focus: String,
}

impl GenerationRequest {
  pub fn new(title: impl Into<String>, focus: impl Into<String>) -> Self {
    Self { title: title.into(), focus: focus.into() }
  }

  /// Stable key used for ids and output filenames.
  pub fn id(&self) -> String {
    slugify(&self.title)
  }
}

/// Ordered, validated set of requests. Position matters for batch APIs that
/// answer with parallel arrays.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BatchSpec {
  requests: Vec<GenerationRequest>,
}

impl BatchSpec {
  pub fn new(requests: Vec<GenerationRequest>) -> Result<Self, ValidationError> {
    let mut seen = HashSet::new();
    for r in &requests {
      let id = r.id();
      if id.is_empty() {
        return Err(ValidationError::EmptyTitle(r.title.clone()));
      }
      if !seen.insert(id.clone()) {
        return Err(ValidationError::DuplicateRequest(id));
      }
    }
    Ok(Self { requests })
  }

  pub fn requests(&self) -> &[GenerationRequest] {
    &self.requests
  }

  pub fn len(&self) -> usize {
    self.requests.len()
  }

  pub fn is_empty(&self) -> bool {
    self.requests.is_empty()
  }
}

impl<'de> Deserialize<'de> for BatchSpec {
  fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
    let requests = Vec::<GenerationRequest>::deserialize(d)?;
    BatchSpec::new(requests).map_err(serde::de::Error::custom)
  }
}

/// Text returned by the generation client, tagged with the request that produced it.
#[derive(Clone, Debug)]
pub struct RawResponse {
  pub request: GenerationRequest,
  pub text: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proficiency {
  Basic,
  Intermediate,
  Advanced,
}

/// The fixed section kinds every lesson carries, in reading order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SectionKind {
  Introduction,
  Body,
  Discussion,
  #[serde(rename = "Key Takeaways")]
  KeyTakeaways,
}

impl SectionKind {
  pub const ALL: [SectionKind; 4] =
    [SectionKind::Introduction, SectionKind::Body, SectionKind::Discussion, SectionKind::KeyTakeaways];

  pub fn name(self) -> &'static str {
    match self {
      SectionKind::Introduction => "Introduction",
      SectionKind::Body => "Body",
      SectionKind::Discussion => "Discussion",
      SectionKind::KeyTakeaways => "Key Takeaways",
    }
  }
}

impl fmt::Display for SectionKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonMetadata {
  pub id: String,
  pub title: String,
  pub description: String,
  pub proficiency: Proficiency,
  #[serde(default)]
  pub tags: BTreeSet<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
  #[serde(rename = "title")]
  pub kind: SectionKind,
  pub content: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
  pub id: String,
  pub prompt: String,
  pub proficiency: Proficiency,
  pub answers: Vec<String>,
  pub correct_answer_index: usize,
  #[serde(default)]
  pub explanation: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
  pub metadata: LessonMetadata,
  pub sections: Vec<Section>,
  pub questions: Vec<Question>,
}

impl Lesson {
  pub fn id(&self) -> &str {
    &self.metadata.id
  }

  pub fn section(&self, kind: SectionKind) -> Option<&Section> {
    self.sections.iter().find(|s| s.kind == kind)
  }

  /// Structural checks shared by the parser and by anything that loads
  /// lessons from outside (store files, remote sync).
  pub fn validate(&self) -> Result<(), ValidationError> {
    let invalid = |reason: String| ValidationError::InvalidLesson { lesson: self.metadata.id.clone(), reason };

    if self.metadata.id.is_empty() || self.metadata.id != slugify(&self.metadata.title) {
      return Err(invalid(format!("id {:?} does not match title {:?}", self.metadata.id, self.metadata.title)));
    }
    // Exactly one section per kind, in reading order.
    let kinds: Vec<SectionKind> = self.sections.iter().map(|s| s.kind).collect();
    if kinds != SectionKind::ALL {
      let names: Vec<&str> = kinds.iter().map(|k| k.name()).collect();
      return Err(invalid(format!("sections must be {:?}, got {:?}", SectionKind::ALL.map(SectionKind::name), names)));
    }
    let mut ids = HashSet::new();
    for q in &self.questions {
      if q.correct_answer_index >= q.answers.len() {
        return Err(invalid(format!(
          "question {:?} has correctAnswerIndex {} but {} answers",
          q.id,
          q.correct_answer_index,
          q.answers.len()
        )));
      }
      if !ids.insert(q.id.as_str()) {
        return Err(invalid(format!("duplicate question id {:?}", q.id)));
      }
    }
    Ok(())
  }
}

/// What a lesson file in the output directory holds: the lesson plus the
/// request it was generated from. The request is the content identity the
/// skip-if-generated guard compares against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonRecord {
  pub request: GenerationRequest,
  pub lesson: Lesson,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningModule {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub lessons: Vec<String>,
  #[serde(default)]
  pub sub_modules: Vec<LearningModule>,
}

impl LearningModule {
  /// Depth-first walk over this module and all of its descendants.
  pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a LearningModule)) {
    visit(self);
    for m in &self.sub_modules {
      m.walk(visit);
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
  pub last_updated_timestamp: DateTime<Utc>,
}
