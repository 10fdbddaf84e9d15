//! lesson-forge · lesson generation pipeline and content repository
//!
//! ```text
//! topic ─▶ breakdown ─▶ BatchSpec ─▶ Orchestrator ─▶ GenerationClient ─▶ parser ─▶ staging ─▶ output dir
//!                                                                                              │
//!                                     reader ◀─ ContentRepository ◀─ HTTP ◀─ serve ◀─ publish ◀┘
//! ```
//!
//! - `orchestrator`: bounded, failure-isolated batch generation with an idempotence guard
//! - `parser`: strict delimiter grammar for model output
//! - `repository`: freshness-gated, all-or-nothing sync of lessons and modules

pub mod config;
pub mod domain;
pub mod error;
pub mod modules;
pub mod openai;
pub mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod protocol;
pub mod repository;
pub mod routes;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod util;

pub use config::AppConfig;
pub use domain::{BatchSpec, ContentMetadata, GenerationRequest, LearningModule, Lesson};
pub use error::{GenerationError, ParseError, SyncError, TransportError};
pub use openai::{GenerationClient, OpenAiClient, SamplingParams};
pub use orchestrator::{BatchReport, Orchestrator, SkipExisting, SkipFilter};
pub use repository::{ContentRepository, ContentSource, HttpContentSource, SyncStatus};
