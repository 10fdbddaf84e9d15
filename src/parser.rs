//! Response parser/validator for the delimiter-based lesson format.
//!
//! A response is a sequence of regions, each opened by `<<<Name>>>` and closed
//! by `<<</Name>>>`. Lessons need `Metadata`, the four prose sections and
//! `Questions`; topic breakdowns need a single `Lessons` region. JSON regions
//! may be wrapped in a markdown code fence.
//!
//! Parsing is all-or-nothing: either every region is present and valid, or
//! the whole response is rejected.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{
  BatchSpec, GenerationRequest, Lesson, LessonMetadata, Proficiency, Question, RawResponse, Section,
  SectionKind,
};
use crate::error::ParseError;
use crate::util::slugify;

pub const METADATA: &str = "Metadata";
pub const QUESTIONS: &str = "Questions";
pub const LESSONS: &str = "Lessons";

#[derive(Deserialize, Serialize)]
struct MetadataBlock {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  title: Option<String>,
  description: String,
  proficiency: Proficiency,
  #[serde(default)]
  tags: BTreeSet<String>,
}

fn open_tag(name: &str) -> String {
  format!("<<<{name}>>>")
}

fn close_tag(name: &str) -> String {
  format!("<<</{name}>>>")
}

/// Body of region `name`, with its outer whitespace trimmed.
fn region<'a>(text: &'a str, name: &str) -> Result<&'a str, ParseError> {
  let missing = || ParseError::MissingSection(name.to_string());
  let open = open_tag(name);
  let start = text.find(&open).ok_or_else(missing)? + open.len();
  let len = text[start..].find(&close_tag(name)).ok_or_else(missing)?;
  Ok(text[start..start + len].trim())
}

/// Drop a surrounding ```json ... ``` fence if the model added one.
fn strip_code_fence(s: &str) -> &str {
  let Some(rest) = s.strip_prefix("```") else {
    return s;
  };
  let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or("");
  body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn normalize(text: &str) -> String {
  text.replace("\r\n", "\n")
}

/// Parse one generated lesson. The lesson's title and id come from the
/// originating request, so output filenames stay stable even if the model
/// echoes a different title in its metadata.
pub fn parse_lesson(raw: &RawResponse) -> Result<Lesson, ParseError> {
  let text = normalize(&raw.text);

  // Locate every region before decoding anything, so a missing section is
  // reported as such even when another region is also broken.
  let metadata_src = region(&text, METADATA)?;
  let mut sections = Vec::with_capacity(SectionKind::ALL.len());
  for kind in SectionKind::ALL {
    let content = region(&text, kind.name())?;
    if content.is_empty() {
      return Err(ParseError::MissingSection(kind.name().to_string()));
    }
    sections.push(Section { kind, content: content.to_string() });
  }
  let questions_src = region(&text, QUESTIONS)?;

  let metadata = parse_metadata(metadata_src, &raw.request)?;
  let questions = parse_questions(questions_src)?;

  Ok(Lesson { metadata, sections, questions })
}

fn parse_metadata(src: &str, request: &GenerationRequest) -> Result<LessonMetadata, ParseError> {
  let block: MetadataBlock =
    serde_json::from_str(strip_code_fence(src)).map_err(|e| ParseError::MalformedMetadata(e.to_string()))?;

  let title = request.title.trim().to_string();
  let id = slugify(&title);
  if id.is_empty() {
    return Err(ParseError::MalformedMetadata(format!("title {:?} yields an empty id", request.title)));
  }
  if let Some(echoed) = block.title.as_deref() {
    if slugify(echoed) != id {
      debug!(target: "generation", %id, echoed, "Model echoed a different title; keeping request title");
    }
  }

  Ok(LessonMetadata {
    id,
    title,
    description: block.description.trim().to_string(),
    proficiency: block.proficiency,
    tags: block.tags.into_iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect(),
  })
}

fn parse_questions(src: &str) -> Result<Vec<Question>, ParseError> {
  let questions: Vec<Question> =
    serde_json::from_str(strip_code_fence(src)).map_err(|e| ParseError::MalformedQuestions(e.to_string()))?;

  let mut ids = HashSet::new();
  for q in &questions {
    if q.id.trim().is_empty() {
      return Err(ParseError::MalformedQuestions("question with empty id".into()));
    }
    if q.answers.is_empty() {
      return Err(ParseError::MalformedQuestions(format!("question {:?} has no answers", q.id)));
    }
    if q.correct_answer_index >= q.answers.len() {
      return Err(ParseError::MalformedQuestions(format!(
        "question {:?}: correctAnswerIndex {} out of range for {} answers",
        q.id,
        q.correct_answer_index,
        q.answers.len()
      )));
    }
    if !ids.insert(q.id.as_str()) {
      return Err(ParseError::MalformedQuestions(format!("duplicate question id {:?}", q.id)));
    }
  }
  Ok(questions)
}

/// Parse a topic breakdown into an ordered batch of lesson requests.
pub fn parse_batch_spec(text: &str) -> Result<BatchSpec, ParseError> {
  let text = normalize(text);
  let src = region(&text, LESSONS)?;
  let requests: Vec<GenerationRequest> =
    serde_json::from_str(strip_code_fence(src)).map_err(|e| ParseError::MalformedBatchSpec(e.to_string()))?;
  if requests.is_empty() {
    return Err(ParseError::MalformedBatchSpec("no lessons listed".into()));
  }
  let requests = requests
    .into_iter()
    .map(|r| GenerationRequest::new(r.title.trim(), r.focus.trim()))
    .collect();
  BatchSpec::new(requests).map_err(|e| ParseError::MalformedBatchSpec(e.to_string()))
}

/// Write a lesson in the same region grammar `parse_lesson` reads.
pub fn render_lesson(lesson: &Lesson) -> Result<String, serde_json::Error> {
  let meta = MetadataBlock {
    title: Some(lesson.metadata.title.clone()),
    description: lesson.metadata.description.clone(),
    proficiency: lesson.metadata.proficiency,
    tags: lesson.metadata.tags.clone(),
  };
  let mut out = String::new();
  push_region(&mut out, METADATA, &serde_json::to_string_pretty(&meta)?);
  for section in &lesson.sections {
    push_region(&mut out, section.kind.name(), &section.content);
  }
  push_region(&mut out, QUESTIONS, &serde_json::to_string_pretty(&lesson.questions)?);
  Ok(out)
}

fn push_region(out: &mut String, name: &str, body: &str) {
  out.push_str(&open_tag(name));
  out.push('\n');
  out.push_str(body);
  out.push('\n');
  out.push_str(&close_tag(name));
  out.push_str("\n\n");
}
