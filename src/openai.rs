//! Generation client boundary plus a minimal OpenAI implementation.
//!
//! We only call chat.completions and request plain text; the parser owns all
//! structure. Calls are instrumented and log model names, latencies, and
//! response sizes (not contents).
//!
//! NOTE: We never log the API key and we keep payload truncations short to avoid PII leaks.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument};

use crate::config::ClientConfig;
use crate::error::{ConfigError, TransportError};
use crate::prompt::Prompt;
use crate::util::trunc_for_log;

/// Sampling parameters sent with every prompt.
#[derive(Clone, Debug, PartialEq)]
pub struct SamplingParams {
  pub model: String,
  pub temperature: f32,
  pub max_tokens: Option<u32>,
  pub n: u32,
}

impl From<&ClientConfig> for SamplingParams {
  fn from(cfg: &ClientConfig) -> Self {
    Self { model: cfg.model.clone(), temperature: cfg.temperature, max_tokens: cfg.max_tokens, n: cfg.n }
  }
}

/// Anything that turns a prompt into raw text.
#[async_trait]
pub trait GenerationClient: Send + Sync {
  async fn send(&self, prompt: &Prompt, params: &SamplingParams) -> Result<String, TransportError>;

  /// One response per prompt, in input order. The outer error means the batch
  /// call itself could not be made; per-prompt failures are inner errors.
  ///
  /// The default runs the prompts one after another through `send`.
  async fn send_batch(
    &self,
    prompts: &[Prompt],
    params: &SamplingParams,
  ) -> Result<Vec<Result<String, TransportError>>, TransportError> {
    let mut out = Vec::with_capacity(prompts.len());
    for prompt in prompts {
      out.push(self.send(prompt, params).await);
    }
    Ok(out)
  }
}

#[derive(Clone)]
pub struct OpenAiClient {
  client: reqwest::Client,
  api_key: String,
  base_url: String,
}

impl OpenAiClient {
  /// A missing credential is a construction error, never a per-call one.
  pub fn new(cfg: &ClientConfig) -> Result<Self, ConfigError> {
    let api_key = cfg.api_key.clone().filter(|k| !k.trim().is_empty()).ok_or(ConfigError::MissingApiKey)?;
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()
      .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
    let base_url = cfg.base_url.trim_end_matches('/').to_string();
    info!(target: "lesson_forge", %base_url, model = %cfg.model, "OpenAI client ready");
    Ok(Self { client, api_key, base_url })
  }

  pub fn base_url(&self) -> &str {
    &self.base_url
  }
}

#[async_trait]
impl GenerationClient for OpenAiClient {
  #[instrument(level = "info", skip(self, prompt, params), fields(model = %params.model, prompt_len = prompt.len()))]
  async fn send(&self, prompt: &Prompt, params: &SamplingParams) -> Result<String, TransportError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: params.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: prompt.system.clone() },
        ChatMessageReq { role: "user".into(), content: prompt.user.clone() },
      ],
      temperature: params.temperature,
      max_tokens: params.max_tokens,
      n: params.n,
    };

    let start = Instant::now();
    let res = self.client.post(&url)
      .header(USER_AGENT, concat!("lesson-forge/", env!("CARGO_PKG_VERSION")))
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await
      .map_err(|e| {
        error!(elapsed = ?start.elapsed(), error = %e, "OpenAI request failed");
        TransportError::from(e)
      })?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 300));
      error!(elapsed = ?start.elapsed(), %status, "OpenAI returned an error status");
      return Err(TransportError::from_status(status.as_u16(), msg));
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.into_iter()
      .filter_map(|c| c.message.content)
      .find(|t| !t.trim().is_empty())
      .ok_or_else(|| TransportError::InvalidResponse("no non-empty choice in completion".into()))?;

    info!(elapsed = ?start.elapsed(), response_len = text.len(), "Model response received");
    debug!(preview = %trunc_for_log(&text, 120), "Model response preview");
    Ok(text)
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
  n: u32,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}
