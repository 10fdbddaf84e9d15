//! Loading pipeline configuration (client, generation, repository, prompts) from TOML.
//!
//! Every section is optional; missing keys fall back to defaults. A few
//! environment variables override the file so credentials never need to be
//! written to disk:
//!   OPENAI_API_KEY  : API credential for the generation client
//!   OPENAI_BASE_URL : default "https://api.openai.com/v1"
//!   OPENAI_MODEL    : default "gpt-4o-mini"

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::info;

use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
  pub client: ClientConfig,
  pub generation: GenerationConfig,
  pub repository: RepositoryConfig,
  pub prompts: Prompts,
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
  pub base_url: String,
  pub model: String,
  pub temperature: f32,
  pub max_tokens: Option<u32>,
  pub n: u32,
  pub timeout_secs: u64,
  pub api_key: Option<String>,
}

impl Default for ClientConfig {
  fn default() -> Self {
    Self {
      base_url: "https://api.openai.com/v1".into(),
      model: "gpt-4o-mini".into(),
      temperature: 0.7,
      max_tokens: Some(4096),
      n: 1,
      timeout_secs: 120,
      api_key: None,
    }
  }
}

// Hand-written so the key never reaches a log line.
impl std::fmt::Debug for ClientConfig {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ClientConfig")
      .field("base_url", &self.base_url)
      .field("model", &self.model)
      .field("temperature", &self.temperature)
      .field("max_tokens", &self.max_tokens)
      .field("n", &self.n)
      .field("timeout_secs", &self.timeout_secs)
      .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
      .finish()
  }
}

/// How a batch reaches the generation client.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchDispatch {
  /// One request per item, semaphore-gated.
  #[default]
  PerItem,
  /// A single `send_batch` call whose responses correlate by position.
  Upstream,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  pub output_dir: PathBuf,
  /// Defaults to `<output_dir>/.staging`. Must be on the same filesystem as
  /// `output_dir` for the final rename to be atomic.
  pub staging_dir: Option<PathBuf>,
  pub concurrency: usize,
  pub dispatch: BatchDispatch,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self {
      output_dir: PathBuf::from("content/lessons"),
      staging_dir: None,
      concurrency: 4,
      dispatch: BatchDispatch::PerItem,
    }
  }
}

impl GenerationConfig {
  pub fn staging_dir(&self) -> PathBuf {
    self.staging_dir.clone().unwrap_or_else(|| self.output_dir.join(".staging"))
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
  pub cache_dir: PathBuf,
  pub remote_url: String,
  pub tolerance_ms: i64,
  pub timeout_secs: u64,
}

impl Default for RepositoryConfig {
  fn default() -> Self {
    Self {
      cache_dir: PathBuf::from("content/cache"),
      remote_url: "http://127.0.0.1:3000".into(),
      tolerance_ms: 1000,
      timeout_secs: 30,
    }
  }
}

/// Prompts sent to the generation client. `{title}` and `{focus}` are
/// substituted by the prompt builder. Override in TOML to tune tone or level.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub lesson_system: String,
  pub lesson_user_template: String,
  pub breakdown_system: String,
  pub breakdown_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      lesson_system: "You are an expert curriculum writer. Follow the output format exactly. Do not add text outside the delimited regions.".into(),
      lesson_user_template: r#"Write one lesson titled "{title}" focusing on: {focus}

Use exactly these regions, each opened with <<<Name>>> and closed with <<</Name>>> on its own line:

<<<Metadata>>>
{"title": "{title}", "description": "<one sentence>", "proficiency": "basic|intermediate|advanced", "tags": ["<tag>", "..."]}
<<</Metadata>>>
<<<Introduction>>>
<markdown>
<<</Introduction>>>
<<<Body>>>
<markdown>
<<</Body>>>
<<<Discussion>>>
<markdown>
<<</Discussion>>>
<<<Key Takeaways>>>
<markdown bullet list>
<<</Key Takeaways>>>
<<<Questions>>>
[{"id": "q1", "prompt": "<question>", "proficiency": "basic|intermediate|advanced", "answers": ["<a>", "<b>", "<c>", "<d>"], "correctAnswerIndex": 0, "explanation": "<why>"}]
<<</Questions>>>"#
        .into(),
      breakdown_system: "You are a curriculum planner. Split topics into focused, non-overlapping lessons. Follow the output format exactly.".into(),
      breakdown_user_template: r#"Topic: {title}
Focus: {focus}

Split this topic into 3 to 10 lessons, ordered from foundational to advanced. Each lesson title must be unique.
Answer with exactly one region:

<<<Lessons>>>
[{"title": "<lesson title>", "focus": "<what the lesson should cover>"}]
<<</Lessons>>>"#
        .into(),
    }
  }
}

impl AppConfig {
  /// Load from `path` if given (defaults otherwise), then apply env overrides.
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    let mut cfg = match path {
      Some(p) => Self::from_file(p)?,
      None => AppConfig::default(),
    };
    cfg.apply_env(|k| std::env::var(k).ok());
    cfg.validate()?;
    Ok(cfg)
  }

  fn from_file(path: &Path) -> Result<Self, ConfigError> {
    let s = std::fs::read_to_string(path)
      .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
    let cfg = toml::from_str::<AppConfig>(&s)
      .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
    info!(target: "lesson_forge", path = %path.display(), "Loaded config (TOML)");
    Ok(cfg)
  }

  fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
    if let Some(key) = var("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
      self.client.api_key = Some(key);
    }
    if let Some(url) = var("OPENAI_BASE_URL") {
      self.client.base_url = url;
    }
    if let Some(model) = var("OPENAI_MODEL") {
      self.client.model = model;
    }
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.generation.concurrency == 0 {
      return Err(ConfigError::Invalid("generation.concurrency must be at least 1".into()));
    }
    if self.client.n == 0 {
      return Err(ConfigError::Invalid("client.n must be at least 1".into()));
    }
    if self.repository.tolerance_ms < 0 {
      return Err(ConfigError::Invalid("repository.tolerance_ms must not be negative".into()));
    }
    Ok(())
  }
}
