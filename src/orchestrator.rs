//! Generation orchestrator: prompt -> client -> parser -> staging -> output.
//!
//! `generate_one` fails fast and reports which stage broke. `generate_batch`
//! isolates items: each request succeeds or fails on its own and the batch
//! returns a report. Only batch-level problems (the output or staging
//! directory cannot be prepared, or an upstream batch call cannot be made)
//! fail the whole call.
//!
//! A lesson lands in the output directory only through a rename from the
//! staging directory, so readers of the output directory never see a
//! partially written file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{BatchDispatch, GenerationConfig, Prompts};
use crate::domain::{BatchSpec, GenerationRequest, LessonRecord, RawResponse};
use crate::error::{GenerationError, TransportError};
use crate::openai::{GenerationClient, SamplingParams};
use crate::parser::{parse_batch_spec, parse_lesson};
use crate::prompt::{breakdown_prompt, lesson_prompt};
use crate::store::{lesson_record_path, read_lesson_record};

/// Caller-supplied guard deciding whether a request can be skipped because
/// its output already exists.
pub trait SkipFilter: Send + Sync {
  fn should_skip(&self, request: &GenerationRequest, target: &Path) -> bool;
}

/// Skip when the target file exists and was generated from an identical
/// request (same title and focus). Unreadable or foreign files never skip.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipExisting;

impl SkipFilter for SkipExisting {
  fn should_skip(&self, request: &GenerationRequest, target: &Path) -> bool {
    match read_lesson_record(target) {
      Ok(Some(record)) => record.request == *request,
      Ok(None) => false,
      Err(e) => {
        warn!(target: "generation", path = %target.display(), error = %e, "Existing output unreadable; regenerating");
        false
      }
    }
  }
}

#[derive(Debug)]
pub struct ItemFailure {
  pub id: String,
  pub title: String,
  pub error: GenerationError,
}

/// Outcome of one batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
  pub generated: Vec<PathBuf>,
  pub skipped: Vec<PathBuf>,
  pub failures: Vec<ItemFailure>,
}

impl BatchReport {
  pub fn is_complete(&self) -> bool {
    self.failures.is_empty()
  }

  fn record(&mut self, request: &GenerationRequest, outcome: Result<PathBuf, GenerationError>) {
    match outcome {
      Ok(path) => self.generated.push(path),
      Err(error) => {
        error!(target: "generation", id = %request.id(), stage = %error.stage(), error = %error, "Lesson generation failed");
        self.failures.push(ItemFailure { id: request.id(), title: request.title.clone(), error });
      }
    }
  }
}

#[derive(Clone)]
pub struct Orchestrator {
  client: Arc<dyn GenerationClient>,
  prompts: Arc<Prompts>,
  params: SamplingParams,
  output_dir: PathBuf,
  staging_dir: PathBuf,
  concurrency: usize,
  dispatch: BatchDispatch,
  skip: Option<Arc<dyn SkipFilter>>,
}

impl Orchestrator {
  pub fn new(client: Arc<dyn GenerationClient>, prompts: Prompts, params: SamplingParams, cfg: &GenerationConfig) -> Self {
    Self {
      client,
      prompts: Arc::new(prompts),
      params,
      output_dir: cfg.output_dir.clone(),
      staging_dir: cfg.staging_dir(),
      concurrency: cfg.concurrency.max(1),
      dispatch: cfg.dispatch,
      skip: None,
    }
  }

  pub fn with_skip_filter(mut self, filter: Arc<dyn SkipFilter>) -> Self {
    self.skip = Some(filter);
    self
  }

  pub fn staging_dir(&self) -> &Path {
    &self.staging_dir
  }

  /// Final location of the lesson generated for `request`.
  pub fn target_path(&self, request: &GenerationRequest) -> PathBuf {
    lesson_record_path(&self.output_dir, &request.id())
  }

  fn prepare_dirs(&self) -> Result<(), GenerationError> {
    for dir in [&self.output_dir, &self.staging_dir] {
      fs::create_dir_all(dir).map_err(|e| GenerationError::fs(dir, e))?;
    }
    Ok(())
  }

  /// Generate a single lesson and move it into the output directory.
  #[instrument(level = "info", skip(self, request), fields(id = %request.id()))]
  pub async fn generate_one(&self, request: &GenerationRequest) -> Result<PathBuf, GenerationError> {
    self.prepare_dirs()?;
    self.request_and_store(request).await
  }

  async fn request_and_store(&self, request: &GenerationRequest) -> Result<PathBuf, GenerationError> {
    let prompt = lesson_prompt(&self.prompts, request);
    let text = self.client.send(&prompt, &self.params).await?;
    self.store_response(RawResponse { request: request.clone(), text })
  }

  /// Stage raw text, parse it, stage the JSON record, then rename into place.
  /// On a parse failure the raw text stays in staging for inspection.
  fn store_response(&self, raw: RawResponse) -> Result<PathBuf, GenerationError> {
    let id = raw.request.id();
    let token = Uuid::new_v4().simple().to_string();
    let raw_path = self.staging_dir.join(format!("{id}.{token}.txt"));
    fs::write(&raw_path, raw.text.as_bytes()).map_err(|e| GenerationError::fs(&raw_path, e))?;

    let lesson = parse_lesson(&raw).map_err(|e| {
      warn!(target: "generation", %id, staged = %raw_path.display(), "Response rejected; raw text kept in staging");
      e
    })?;
    let record = LessonRecord { request: raw.request, lesson };

    let staged = self.staging_dir.join(format!("{id}.{token}.json"));
    let bytes = serde_json::to_vec_pretty(&record)
      .map_err(|e| GenerationError::fs(&staged, io::Error::new(io::ErrorKind::InvalidData, e)))?;
    fs::write(&staged, bytes).map_err(|e| GenerationError::fs(&staged, e))?;

    let target = lesson_record_path(&self.output_dir, &id);
    if let Err(e) = fs::rename(&staged, &target) {
      let _ = fs::remove_file(&staged);
      return Err(GenerationError::fs(&target, e));
    }
    if let Err(e) = fs::remove_file(&raw_path) {
      debug!(target: "generation", path = %raw_path.display(), error = %e, "Could not remove staged raw text");
    }
    info!(target: "generation", %id, path = %target.display(), questions = record.lesson.questions.len(), "Lesson stored");
    Ok(target)
  }

  /// Generate every request in `spec`, isolating per-item failures.
  #[instrument(level = "info", skip(self, spec), fields(items = spec.len(), concurrency = self.concurrency, dispatch = ?self.dispatch))]
  pub async fn generate_batch(&self, spec: &BatchSpec) -> Result<BatchReport, GenerationError> {
    self.prepare_dirs()?;
    let mut report = BatchReport::default();

    let mut pending = Vec::with_capacity(spec.len());
    for request in spec.requests() {
      let target = self.target_path(request);
      if self.skip.as_ref().is_some_and(|f| f.should_skip(request, &target)) {
        debug!(target: "generation", id = %request.id(), "Already generated; skipping");
        report.skipped.push(target);
      } else {
        pending.push(request.clone());
      }
    }

    match self.dispatch {
      BatchDispatch::PerItem => self.fan_out(pending, &mut report).await,
      BatchDispatch::Upstream => self.dispatch_upstream(pending, &mut report).await?,
    }

    let failed: Vec<&str> = report.failures.iter().map(|f| f.id.as_str()).collect();
    info!(
      target: "generation",
      generated = report.generated.len(),
      skipped = report.skipped.len(),
      failed = report.failures.len(),
      failed_ids = ?failed,
      "Batch finished"
    );
    Ok(report)
  }

  /// One task per request; the semaphore gates task launch, so at most
  /// `concurrency` requests are in flight at once.
  async fn fan_out(&self, pending: Vec<GenerationRequest>, report: &mut BatchReport) {
    let permits = Arc::new(Semaphore::new(self.concurrency));
    let mut handles = Vec::with_capacity(pending.len());
    for request in pending {
      let permit = match permits.clone().acquire_owned().await {
        Ok(p) => p,
        Err(e) => {
          report.record(&request, Err(GenerationError::Task(e.to_string())));
          continue;
        }
      };
      let this = self.clone();
      let task_request = request.clone();
      let handle = tokio::spawn(async move {
        let _permit = permit;
        this.request_and_store(&task_request).await
      });
      handles.push((request, handle));
    }

    for (request, handle) in handles {
      let outcome = handle.await.unwrap_or_else(|e| Err(GenerationError::Task(e.to_string())));
      report.record(&request, outcome);
    }
  }

  /// A single upstream batch call; responses correlate to requests by position.
  async fn dispatch_upstream(&self, pending: Vec<GenerationRequest>, report: &mut BatchReport) -> Result<(), GenerationError> {
    if pending.is_empty() {
      return Ok(());
    }
    let prompts: Vec<_> = pending.iter().map(|r| lesson_prompt(&self.prompts, r)).collect();
    let responses = self.client.send_batch(&prompts, &self.params).await?;
    if responses.len() != pending.len() {
      return Err(TransportError::BatchMismatch { expected: pending.len(), got: responses.len() }.into());
    }
    for (request, response) in pending.into_iter().zip(responses) {
      let outcome = response
        .map_err(GenerationError::from)
        .and_then(|text| self.store_response(RawResponse { request: request.clone(), text }));
      report.record(&request, outcome);
    }
    Ok(())
  }

  /// Ask the model to split a topic into an ordered batch of lesson requests.
  #[instrument(level = "info", skip(self, topic), fields(topic = %topic.title))]
  pub async fn breakdown(&self, topic: &GenerationRequest) -> Result<BatchSpec, GenerationError> {
    let prompt = breakdown_prompt(&self.prompts, topic);
    let text = self.client.send(&prompt, &self.params).await?;
    let spec = parse_batch_spec(&text)?;
    info!(target: "generation", lessons = spec.len(), "Topic broken down");
    Ok(spec)
  }
}
