//! Error taxonomy for the pipeline.
//!
//! Each stage owns one enum. Single-item operations return the first error
//! they hit; batch operations collect per-item errors into a report instead.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure talking to a remote HTTP service (generation API or content source).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
  #[error("service unreachable: {0}")]
  Unreachable(String),

  #[error("authentication rejected: {0}")]
  Unauthorized(String),

  #[error("rate limited: {0}")]
  RateLimited(String),

  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("invalid response: {0}")]
  InvalidResponse(String),

  #[error("batch returned {got} responses for {expected} prompts")]
  BatchMismatch { expected: usize, got: usize },
}

impl TransportError {
  /// Classify a non-success HTTP status with its (already extracted) message.
  pub fn from_status(status: u16, message: String) -> Self {
    match status {
      401 | 403 => TransportError::Unauthorized(message),
      429 => TransportError::RateLimited(message),
      _ => TransportError::Http { status, message },
    }
  }
}

impl From<reqwest::Error> for TransportError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      TransportError::InvalidResponse(err.to_string())
    } else if let Some(status) = err.status() {
      TransportError::from_status(status.as_u16(), err.to_string())
    } else {
      TransportError::Unreachable(err.to_string())
    }
  }
}

/// Structural rejection of a model response. Always fatal to that one item.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("missing section: {0}")]
  MissingSection(String),

  #[error("malformed metadata: {0}")]
  MalformedMetadata(String),

  #[error("malformed questions: {0}")]
  MalformedQuestions(String),

  #[error("malformed batch spec: {0}")]
  MalformedBatchSpec(String),
}

/// Rejection of a batch spec or content set before anything is written.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
  #[error("request title {0:?} has no usable characters for an id")]
  EmptyTitle(String),

  #[error("duplicate request id {0:?} in batch")]
  DuplicateRequest(String),

  #[error("duplicate lesson id {0:?}")]
  DuplicateLesson(String),

  #[error("module id {0:?} appears more than once in the module tree")]
  DuplicateModule(String),

  #[error("module {module:?} references unknown lesson {lesson:?}")]
  DanglingLesson { module: String, lesson: String },

  #[error("lesson {lesson:?} is invalid: {reason}")]
  InvalidLesson { lesson: String, reason: String },
}

/// Which step of `generate_one` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Transport,
  Parse,
  Filesystem,
  Task,
}

impl std::fmt::Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      Stage::Transport => "transport",
      Stage::Parse => "parse",
      Stage::Filesystem => "filesystem",
      Stage::Task => "task",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Error)]
pub enum GenerationError {
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error(transparent)]
  Parse(#[from] ParseError),

  #[error("filesystem error at {}: {source}", path.display())]
  Filesystem {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("generation task aborted: {0}")]
  Task(String),
}

impl GenerationError {
  pub fn fs(path: impl Into<PathBuf>, source: io::Error) -> Self {
    GenerationError::Filesystem { path: path.into(), source }
  }

  pub fn stage(&self) -> Stage {
    match self {
      GenerationError::Transport(_) => Stage::Transport,
      GenerationError::Parse(_) => Stage::Parse,
      GenerationError::Filesystem { .. } => Stage::Filesystem,
      GenerationError::Task(_) => Stage::Task,
    }
  }
}

/// Reading or writing the content store's files of record.
#[derive(Debug, Error)]
pub enum StoreError {
  #[error("I/O error at {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("invalid JSON in {}: {source}", path.display())]
  Json {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error(transparent)]
  Invalid(#[from] ValidationError),
}

impl StoreError {
  pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
    StoreError::Io { path: path.into(), source }
  }

  pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
    StoreError::Json { path: path.into(), source }
  }
}

/// A failed repository sync. The visible cache is unchanged whenever one of
/// these is returned.
#[derive(Debug, Error)]
pub enum SyncError {
  #[error("remote metadata fetch failed: {0}")]
  MetadataFetchFailed(#[source] TransportError),

  #[error("remote content fetch failed: {0}")]
  ContentFetchFailed(#[source] TransportError),

  #[error("remote content rejected: {0}")]
  InvalidSnapshot(#[from] ValidationError),

  #[error("persisting synced content failed: {0}")]
  Persist(#[source] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {}: {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse config {}: {source}", path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: toml::de::Error,
  },

  #[error("invalid configuration: {0}")]
  Invalid(String),

  #[error("no API key configured (set OPENAI_API_KEY or client.api_key)")]
  MissingApiKey,

  #[error("failed to build HTTP client: {0}")]
  HttpClient(String),
}
