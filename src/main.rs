//! lesson-forge CLI
//!
//! Drives the pipeline end to end:
//!   breakdown : topic -> batch spec (JSON)
//!   generate  : one lesson
//!   batch     : every lesson in a batch spec, failures logged and skipped
//!   publish   : lesson files + module tree -> content store
//!   serve     : content store over HTTP (the remote a repository syncs from)
//!   sync      : bring a local repository cache up to date
//!
//! Important env variables:
//!   LESSON_FORGE_CONFIG : path to TOML config
//!   OPENAI_API_KEY      : required by breakdown/generate/batch
//!   LOG_LEVEL           : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT          : "pretty" (default) or "json"

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use lesson_forge::config::AppConfig;
use lesson_forge::domain::{BatchSpec, GenerationRequest, LearningModule};
use lesson_forge::modules::{publish, ModulePlan};
use lesson_forge::openai::{OpenAiClient, SamplingParams};
use lesson_forge::orchestrator::{Orchestrator, SkipExisting};
use lesson_forge::repository::{ContentRepository, HttpContentSource};
use lesson_forge::routes::build_router;
use lesson_forge::state::ServerState;
use lesson_forge::telemetry;

/// Generate lessons with a text-generation API and publish them as a content store.
#[derive(Parser, Debug)]
#[command(name = "lesson-forge")]
#[command(version)]
#[command(about, long_about = None)]
struct Cli {
  /// TOML configuration file
  #[arg(long, global = true, env = "LESSON_FORGE_CONFIG")]
  config: Option<PathBuf>,

  /// Debug-level logs with file and line
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Split a topic into a batch spec of lesson requests
  Breakdown {
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    focus: String,
    /// Write the spec here instead of stdout
    #[arg(long)]
    out: Option<PathBuf>,
  },
  /// Generate a single lesson
  Generate {
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    focus: String,
  },
  /// Generate every lesson in a batch spec
  Batch {
    /// JSON array of {"title", "focus"}
    #[arg(long)]
    spec: PathBuf,
    /// Regenerate lessons whose output already exists
    #[arg(long)]
    force: bool,
  },
  /// Build the module tree and write a content store
  Publish {
    /// Directory of generated lesson files (defaults to generation.output_dir)
    #[arg(long)]
    lessons: Option<PathBuf>,
    #[arg(long)]
    store: PathBuf,
    /// JSON list of module trees; without it a single flat module is built
    #[arg(long)]
    outline: Option<PathBuf>,
    /// Batch spec whose order the flat module follows
    #[arg(long, conflicts_with = "outline")]
    order: Option<PathBuf>,
    #[arg(long, default_value = "course")]
    module_id: String,
    #[arg(long, default_value = "Course")]
    module_title: String,
    #[arg(long, default_value = "")]
    module_description: String,
  },
  /// Serve a content store over HTTP
  Serve {
    #[arg(long)]
    store: PathBuf,
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
  },
  /// Sync a local repository cache from a content server
  Sync {
    /// Defaults to repository.remote_url
    #[arg(long)]
    remote: Option<String>,
    /// Defaults to repository.cache_dir
    #[arg(long)]
    cache: Option<PathBuf>,
    /// Skip the freshness check
    #[arg(long)]
    force: bool,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  telemetry::init_tracing(cli.verbose);

  let cfg = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;

  match cli.command {
    Command::Breakdown { title, focus, out } => {
      let orch = orchestrator(&cfg)?;
      let spec = orch.breakdown(&GenerationRequest::new(title, focus)).await?;
      let json = serde_json::to_string_pretty(&spec)?;
      match out {
        Some(path) => {
          std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
          info!(target: "lesson_forge", path = %path.display(), lessons = spec.len(), "Batch spec written");
        }
        None => println!("{json}"),
      }
    }
    Command::Generate { title, focus } => {
      let orch = orchestrator(&cfg)?;
      let path = orch.generate_one(&GenerationRequest::new(title, focus)).await?;
      println!("{}", path.display());
    }
    Command::Batch { spec, force } => {
      let batch = read_json::<BatchSpec>(&spec)?;
      let mut orch = orchestrator(&cfg)?;
      if !force {
        orch = orch.with_skip_filter(Arc::new(SkipExisting));
      }
      let report = orch.generate_batch(&batch).await?;
      for path in &report.generated {
        println!("{}", path.display());
      }
      println!(
        "generated: {}, skipped: {}, failed: {}",
        report.generated.len(),
        report.skipped.len(),
        report.failures.len()
      );
      for failure in &report.failures {
        println!("  failed {} ({}): [{}] {}", failure.id, failure.title, failure.error.stage(), failure.error);
      }
    }
    Command::Publish { lessons, store, outline, order, module_id, module_title, module_description } => {
      let lessons_dir = lessons.unwrap_or_else(|| cfg.generation.output_dir.clone());
      let plan = match outline {
        Some(path) => ModulePlan::Outline(read_json::<Vec<LearningModule>>(&path)?),
        None => ModulePlan::Single {
          id: module_id,
          title: module_title,
          description: module_description,
          order: order.map(|p| read_json::<BatchSpec>(&p)).transpose()?,
        },
      };
      let meta = publish(&lessons_dir, &store, plan)?;
      println!("published {} at {}", store.display(), meta.last_updated_timestamp);
    }
    Command::Serve { store, port } => {
      let state = Arc::new(ServerState::load(&store)?);
      let app = build_router(state);
      let addr = SocketAddr::from(([0, 0, 0, 0], port));
      let listener = TcpListener::bind(addr).await?;
      info!(target: "lesson_forge", %addr, "HTTP server listening");
      axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    }
    Command::Sync { remote, cache, force } => {
      let remote = remote.unwrap_or_else(|| cfg.repository.remote_url.clone());
      let cache = cache.unwrap_or_else(|| cfg.repository.cache_dir.clone());
      let source = HttpContentSource::new(&remote, Duration::from_secs(cfg.repository.timeout_secs))?;
      let tolerance = chrono::Duration::milliseconds(cfg.repository.tolerance_ms);
      let repo = ContentRepository::open(cache, Arc::new(source), tolerance);

      let outcome = if force { repo.force_sync().await.map(|_| true) } else { repo.update_data_if_needed().await };
      let snap = repo.snapshot().await;
      match outcome {
        Ok(synced) => {
          println!(
            "{} ({} lessons, {} modules)",
            if synced { "synced" } else { "up to date" },
            snap.lesson_count(),
            snap.modules().len()
          );
        }
        Err(e) => {
          warn!(target: "lesson_forge", status = ?repo.status().await, "Serving last good snapshot");
          return Err(e).context(format!("sync from {remote} failed"));
        }
      }
    }
  }
  Ok(())
}

fn orchestrator(cfg: &AppConfig) -> Result<Orchestrator> {
  let client = OpenAiClient::new(&cfg.client)?;
  Ok(Orchestrator::new(Arc::new(client), cfg.prompts.clone(), SamplingParams::from(&cfg.client), &cfg.generation))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &std::path::Path) -> Result<T> {
  let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
  serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(target: "lesson_forge", error = %e, "Failed to listen for Ctrl-C");
    std::future::pending::<()>().await;
  }
  info!(target: "lesson_forge", "Shutting down");
}
