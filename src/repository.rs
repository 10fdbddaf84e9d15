//! Content repository: an in-memory snapshot of lessons and modules backed by
//! a local content store, refreshed from a remote source of truth.
//!
//! Readers clone an `Arc` to the current snapshot, so they never hold a lock
//! across their own work. A sync fetches lessons and modules concurrently,
//! validates and persists them, and only then swaps the snapshot under a
//! write lock held for the swap alone. If anything fails before the swap, the
//! previous snapshot stays visible.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, instrument, warn};

use crate::domain::{ContentMetadata, LearningModule, Lesson};
use crate::error::{ConfigError, StoreError, SyncError, TransportError, ValidationError};
use crate::modules::{index_lessons, validate_module_tree};
use crate::store::ContentStore;
use crate::util::trunc_for_log;

/// Remote source of truth for content.
#[async_trait]
pub trait ContentSource: Send + Sync {
  async fn fetch_metadata(&self) -> Result<ContentMetadata, TransportError>;
  async fn fetch_lessons(&self) -> Result<Vec<Lesson>, TransportError>;
  async fn fetch_modules(&self) -> Result<Vec<LearningModule>, TransportError>;
}

/// `ContentSource` over the content server's HTTP API.
#[derive(Clone)]
pub struct HttpContentSource {
  client: reqwest::Client,
  base_url: String,
}

impl HttpContentSource {
  pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
    Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, TransportError> {
    let url = format!("{}/api/v1/{}", self.base_url, path);
    let res = self.client.get(&url).send().await?;
    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      return Err(TransportError::from_status(status, trunc_for_log(&body, 300)));
    }
    Ok(res.json::<T>().await?)
  }
}

#[async_trait]
impl ContentSource for HttpContentSource {
  async fn fetch_metadata(&self) -> Result<ContentMetadata, TransportError> {
    self.get_json("metadata").await
  }

  async fn fetch_lessons(&self) -> Result<Vec<Lesson>, TransportError> {
    self.get_json("lessons").await
  }

  async fn fetch_modules(&self) -> Result<Vec<LearningModule>, TransportError> {
    self.get_json("modules").await
  }
}

/// Immutable view of the content at one point in time.
#[derive(Debug, Default)]
pub struct ContentSnapshot {
  metadata: Option<ContentMetadata>,
  lessons: HashMap<String, Lesson>,
  modules: Vec<LearningModule>,
  module_index: HashMap<String, LearningModule>,
}

impl ContentSnapshot {
  /// Validate and index a full content set.
  pub fn build(
    metadata: Option<ContentMetadata>,
    lessons: Vec<Lesson>,
    modules: Vec<LearningModule>,
  ) -> Result<Self, ValidationError> {
    let lessons = index_lessons(lessons)?;
    let ids: HashSet<&str> = lessons.keys().map(String::as_str).collect();
    validate_module_tree(&modules, &ids)?;

    let mut module_index = HashMap::new();
    for root in &modules {
      root.walk(&mut |m| {
        module_index.insert(m.id.clone(), m.clone());
      });
    }
    Ok(Self { metadata, lessons, modules, module_index })
  }

  pub fn metadata(&self) -> Option<ContentMetadata> {
    self.metadata
  }

  pub fn lesson(&self, id: &str) -> Option<&Lesson> {
    self.lessons.get(id)
  }

  /// Lessons sorted by id.
  pub fn lessons(&self) -> Vec<&Lesson> {
    let mut out: Vec<&Lesson> = self.lessons.values().collect();
    out.sort_by(|a, b| a.metadata.id.cmp(&b.metadata.id));
    out
  }

  pub fn module(&self, id: &str) -> Option<&LearningModule> {
    self.module_index.get(id)
  }

  pub fn modules(&self) -> &[LearningModule] {
    &self.modules
  }

  pub fn lesson_count(&self) -> usize {
    self.lessons.len()
  }
}

/// Freshness state as seen by the host application.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncStatus {
  Uninitialized,
  Fresh { last_updated: DateTime<Utc> },
  Syncing { previous: Option<DateTime<Utc>> },
  /// The last attempt failed; readers still see the snapshot from `last_good`.
  SyncFailed { last_good: Option<DateTime<Utc>>, error: String },
}

pub struct ContentRepository {
  store: ContentStore,
  source: Arc<dyn ContentSource>,
  tolerance: chrono::Duration,
  snapshot: RwLock<Arc<ContentSnapshot>>,
  status: RwLock<SyncStatus>,
  sync_gate: Mutex<()>,
}

impl ContentRepository {
  /// Open the repository over `cache_dir`, loading whatever was persisted by
  /// the last successful sync. Missing or unreadable files leave the
  /// repository uninitialized so the next update performs a full sync.
  #[instrument(level = "info", skip_all, fields(cache_dir = %cache_dir.display()))]
  pub fn open(cache_dir: PathBuf, source: Arc<dyn ContentSource>, tolerance: chrono::Duration) -> Self {
    let store = ContentStore::new(cache_dir);
    let snapshot = match load_local(&store) {
      Ok(Some(s)) => s,
      Ok(None) => ContentSnapshot::default(),
      Err(e) => {
        warn!(target: "repository", error = %e, "Local content unreadable; starting uninitialized");
        ContentSnapshot::default()
      }
    };
    let status = match snapshot.metadata {
      Some(m) => SyncStatus::Fresh { last_updated: m.last_updated_timestamp },
      None => SyncStatus::Uninitialized,
    };
    info!(target: "repository", lessons = snapshot.lesson_count(), modules = snapshot.modules.len(), ?status, "Repository opened");
    Self {
      store,
      source,
      tolerance,
      snapshot: RwLock::new(Arc::new(snapshot)),
      status: RwLock::new(status),
      sync_gate: Mutex::new(()),
    }
  }

  /// Current snapshot; cheap to call and safe to hold.
  pub async fn snapshot(&self) -> Arc<ContentSnapshot> {
    self.snapshot.read().await.clone()
  }

  pub async fn status(&self) -> SyncStatus {
    self.status.read().await.clone()
  }

  pub async fn metadata(&self) -> Option<ContentMetadata> {
    self.snapshot().await.metadata
  }

  pub async fn fetch_lesson(&self, id: &str) -> Option<Lesson> {
    self.snapshot().await.lesson(id).cloned()
  }

  /// Lessons for `ids` in the given order; unknown ids are left out.
  pub async fn fetch_lessons(&self, ids: &[String]) -> Vec<Lesson> {
    let snap = self.snapshot().await;
    ids.iter().filter_map(|id| snap.lesson(id).cloned()).collect()
  }

  pub async fn fetch_module(&self, id: &str) -> Option<LearningModule> {
    self.snapshot().await.module(id).cloned()
  }

  /// Ids of the top-level modules, in order.
  pub async fn fetch_all_module_ids(&self) -> Vec<String> {
    self.snapshot().await.modules.iter().map(|m| m.id.clone()).collect()
  }

  /// Sync when there is no local content, or when the remote timestamp is
  /// newer than the local one by more than the tolerance. Returns whether a
  /// sync happened.
  #[instrument(level = "info", skip(self))]
  pub async fn update_data_if_needed(&self) -> Result<bool, SyncError> {
    let _gate = self.sync_gate.lock().await;
    let local = self.snapshot().await.metadata;

    let remote = match self.source.fetch_metadata().await {
      Ok(m) => m,
      Err(e) => return Err(self.fail(SyncError::MetadataFetchFailed(e)).await),
    };

    if let Some(local) = local {
      if !is_newer(&remote, &local, self.tolerance) {
        info!(target: "repository", local = %local.last_updated_timestamp, remote = %remote.last_updated_timestamp, "Content up to date");
        *self.status.write().await = SyncStatus::Fresh { last_updated: local.last_updated_timestamp };
        return Ok(false);
      }
    }

    self.replace_all(remote).await?;
    Ok(true)
  }

  /// Full fetch-and-replace regardless of timestamps.
  #[instrument(level = "info", skip(self))]
  pub async fn force_sync(&self) -> Result<(), SyncError> {
    let _gate = self.sync_gate.lock().await;
    let remote = match self.source.fetch_metadata().await {
      Ok(m) => m,
      Err(e) => return Err(self.fail(SyncError::MetadataFetchFailed(e)).await),
    };
    self.replace_all(remote).await
  }

  /// Caller must hold the sync gate. `metadata` was fetched before the
  /// content: if the remote changes mid-sync, the next check sees a newer
  /// timestamp and syncs again.
  async fn replace_all(&self, metadata: ContentMetadata) -> Result<(), SyncError> {
    let previous = self.snapshot().await.metadata.map(|m| m.last_updated_timestamp);
    *self.status.write().await = SyncStatus::Syncing { previous };
    info!(target: "repository", remote = %metadata.last_updated_timestamp, "Full content sync started");

    let fetched = tokio::try_join!(self.source.fetch_lessons(), self.source.fetch_modules());
    let (lessons, modules) = match fetched {
      Ok(pair) => pair,
      Err(e) => return Err(self.fail(SyncError::ContentFetchFailed(e)).await),
    };

    let snapshot = match ContentSnapshot::build(Some(metadata), lessons, modules) {
      Ok(s) => s,
      Err(e) => return Err(self.fail(SyncError::InvalidSnapshot(e)).await),
    };

    let lessons: Vec<Lesson> = snapshot.lessons().into_iter().cloned().collect();
    if let Err(e) = self.store.write_all(&lessons, &snapshot.modules, &metadata) {
      return Err(self.fail(SyncError::Persist(e)).await);
    }

    let count = snapshot.lesson_count();
    let module_count = snapshot.modules.len();
    *self.snapshot.write().await = Arc::new(snapshot);
    *self.status.write().await = SyncStatus::Fresh { last_updated: metadata.last_updated_timestamp };
    info!(target: "repository", lessons = count, modules = module_count, "Full content sync committed");
    Ok(())
  }

  async fn fail(&self, err: SyncError) -> SyncError {
    let last_good = self.snapshot().await.metadata.map(|m| m.last_updated_timestamp);
    error!(target: "repository", error = %err, "Content sync failed; keeping previous snapshot");
    *self.status.write().await = SyncStatus::SyncFailed { last_good, error: err.to_string() };
    err
  }
}

fn is_newer(remote: &ContentMetadata, local: &ContentMetadata, tolerance: chrono::Duration) -> bool {
  remote.last_updated_timestamp > local.last_updated_timestamp + tolerance
}

/// `Ok(None)` unless metadata and both collections are present.
fn load_local(store: &ContentStore) -> Result<Option<ContentSnapshot>, StoreError> {
  let Some(metadata) = store.read_metadata()? else {
    return Ok(None);
  };
  let (Some(lessons), Some(modules)) = (store.read_lessons()?, store.read_modules()?) else {
    return Ok(None);
  };
  Ok(Some(ContentSnapshot::build(Some(metadata), lessons, modules)?))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::fixtures;
  use chrono::TimeZone;
  use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
  use std::sync::Mutex as StdMutex;

  #[derive(Default)]
  struct FakeSource {
    metadata: StdMutex<Option<ContentMetadata>>,
    lessons: StdMutex<Vec<Lesson>>,
    modules: StdMutex<Vec<LearningModule>>,
    fail_modules: AtomicBool,
    content_fetches: AtomicUsize,
  }

  impl FakeSource {
    fn publish(&self, at: DateTime<Utc>, titles: &[&str]) {
      let lessons: Vec<Lesson> = titles.iter().map(|t| fixtures::lesson(t)).collect();
      let ids: Vec<&str> = lessons.iter().map(|l| l.metadata.id.as_str()).collect();
      *self.modules.lock().unwrap() = vec![fixtures::module("course", &ids, vec![fixtures::module("extra", &[], vec![])])];
      *self.lessons.lock().unwrap() = lessons;
      *self.metadata.lock().unwrap() = Some(ContentMetadata { last_updated_timestamp: at });
    }
  }

  #[async_trait]
  impl ContentSource for FakeSource {
    async fn fetch_metadata(&self) -> Result<ContentMetadata, TransportError> {
      (*self.metadata.lock().unwrap()).ok_or_else(|| TransportError::Unreachable("no metadata".into()))
    }

    async fn fetch_lessons(&self) -> Result<Vec<Lesson>, TransportError> {
      self.content_fetches.fetch_add(1, Ordering::SeqCst);
      Ok(self.lessons.lock().unwrap().clone())
    }

    async fn fetch_modules(&self) -> Result<Vec<LearningModule>, TransportError> {
      self.content_fetches.fetch_add(1, Ordering::SeqCst);
      if self.fail_modules.load(Ordering::SeqCst) {
        return Err(TransportError::Http { status: 503, message: "unavailable".into() });
      }
      Ok(self.modules.lock().unwrap().clone())
    }
  }

  fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
  }

  fn tolerance() -> chrono::Duration {
    chrono::Duration::milliseconds(1000)
  }

  async fn synced(dir: &std::path::Path, source: Arc<FakeSource>) -> ContentRepository {
    let repo = ContentRepository::open(dir.to_path_buf(), source, tolerance());
    assert!(repo.update_data_if_needed().await.unwrap());
    repo
  }

  #[tokio::test]
  async fn first_update_performs_full_sync() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha", "Beta"]);
    let repo = ContentRepository::open(dir.path().to_path_buf(), source.clone(), tolerance());
    assert_eq!(repo.status().await, SyncStatus::Uninitialized);
    assert!(repo.fetch_lesson("alpha").await.is_none());

    assert!(repo.update_data_if_needed().await.unwrap());
    assert_eq!(repo.status().await, SyncStatus::Fresh { last_updated: t(0) });
    assert_eq!(repo.fetch_lesson("alpha").await, Some(fixtures::lesson("Alpha")));
    assert_eq!(repo.fetch_all_module_ids().await, vec!["course"]);
    assert!(repo.fetch_module("extra").await.is_some());
  }

  #[tokio::test]
  async fn equal_or_within_tolerance_timestamps_do_not_sync() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;
    let fetches = source.content_fetches.load(Ordering::SeqCst);

    assert!(!repo.update_data_if_needed().await.unwrap());
    *source.metadata.lock().unwrap() = Some(ContentMetadata { last_updated_timestamp: t(0) + chrono::Duration::milliseconds(900) });
    assert!(!repo.update_data_if_needed().await.unwrap());
    *source.metadata.lock().unwrap() = Some(ContentMetadata { last_updated_timestamp: t(-5) });
    assert!(!repo.update_data_if_needed().await.unwrap());
    assert_eq!(source.content_fetches.load(Ordering::SeqCst), fetches);
  }

  #[tokio::test]
  async fn newer_remote_replaces_both_collections() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;

    source.publish(t(5), &["Beta", "Gamma"]);
    assert!(repo.update_data_if_needed().await.unwrap());
    assert!(repo.fetch_lesson("alpha").await.is_none());
    let got = repo.fetch_lessons(&["gamma".into(), "missing".into(), "beta".into()]).await;
    let ids: Vec<_> = got.iter().map(|l| l.metadata.id.as_str()).collect();
    assert_eq!(ids, vec!["gamma", "beta"]);
    assert_eq!(repo.fetch_module("course").await.unwrap().lessons, vec!["beta", "gamma"]);
    assert_eq!(repo.metadata().await.unwrap().last_updated_timestamp, t(5));
  }

  #[tokio::test]
  async fn failed_module_fetch_keeps_previous_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;

    source.publish(t(10), &["Beta"]);
    source.fail_modules.store(true, Ordering::SeqCst);
    let err = repo.update_data_if_needed().await.unwrap_err();
    assert!(matches!(err, SyncError::ContentFetchFailed(_)));

    assert_eq!(repo.fetch_lesson("alpha").await, Some(fixtures::lesson("Alpha")));
    assert!(repo.fetch_lesson("beta").await.is_none());
    assert_eq!(repo.fetch_module("course").await.unwrap().lessons, vec!["alpha"]);
    assert!(matches!(repo.status().await, SyncStatus::SyncFailed { last_good: Some(ts), .. } if ts == t(0)));

    // Nothing new reached disk either.
    let reopened = ContentRepository::open(dir.path().to_path_buf(), source.clone(), tolerance());
    assert_eq!(reopened.metadata().await.unwrap().last_updated_timestamp, t(0));
    assert!(reopened.fetch_lesson("alpha").await.is_some());

    source.fail_modules.store(false, Ordering::SeqCst);
    assert!(repo.update_data_if_needed().await.unwrap());
    assert!(repo.fetch_lesson("beta").await.is_some());
  }

  #[tokio::test]
  async fn dangling_remote_content_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;

    source.publish(t(10), &["Beta"]);
    source.lessons.lock().unwrap().clear();
    let err = repo.update_data_if_needed().await.unwrap_err();
    assert!(matches!(err, SyncError::InvalidSnapshot(ValidationError::DanglingLesson { .. })));
    assert!(repo.fetch_lesson("alpha").await.is_some());
  }

  #[tokio::test]
  async fn metadata_failure_leaves_cache_alone() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;

    *source.metadata.lock().unwrap() = None;
    assert!(matches!(repo.update_data_if_needed().await, Err(SyncError::MetadataFetchFailed(_))));
    assert!(repo.fetch_lesson("alpha").await.is_some());
  }

  #[tokio::test]
  async fn successful_check_after_failure_reports_fresh() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;

    *source.metadata.lock().unwrap() = None;
    assert!(repo.update_data_if_needed().await.is_err());
    assert!(matches!(repo.status().await, SyncStatus::SyncFailed { .. }));

    *source.metadata.lock().unwrap() = Some(ContentMetadata { last_updated_timestamp: t(0) });
    assert!(!repo.update_data_if_needed().await.unwrap());
    assert_eq!(repo.status().await, SyncStatus::Fresh { last_updated: t(0) });
  }

  #[tokio::test]
  async fn persist_failure_keeps_snapshot_and_never_reopens_mixed() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;

    // lessons.json can be replaced, modules.json cannot.
    let modules_path = dir.path().join(crate::store::MODULES_FILE);
    std::fs::remove_file(&modules_path).unwrap();
    std::fs::create_dir(&modules_path).unwrap();
    std::fs::write(modules_path.join("keep"), "x").unwrap();

    source.publish(t(10), &["Alpha", "Beta"]);
    let err = repo.update_data_if_needed().await.unwrap_err();
    assert!(matches!(err, SyncError::Persist(_)));
    assert!(repo.fetch_lesson("beta").await.is_none());
    assert_eq!(repo.fetch_module("course").await.unwrap().lessons, vec!["alpha"]);
    assert!(matches!(repo.status().await, SyncStatus::SyncFailed { last_good: Some(ts), .. } if ts == t(0)));

    let reopened = ContentRepository::open(dir.path().to_path_buf(), source.clone(), tolerance());
    assert_eq!(reopened.status().await, SyncStatus::Uninitialized);
    assert!(reopened.metadata().await.is_none());
    assert!(reopened.fetch_lesson("beta").await.is_none());
    assert!(reopened.fetch_all_module_ids().await.is_empty());

    std::fs::remove_dir_all(&modules_path).unwrap();
    assert!(reopened.update_data_if_needed().await.unwrap());
    assert_eq!(reopened.fetch_module("course").await.unwrap().lessons, vec!["alpha", "beta"]);
  }

  #[tokio::test]
  async fn reopen_serves_persisted_snapshot_and_gates_on_it() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    drop(synced(dir.path(), source.clone()).await);

    let repo = ContentRepository::open(dir.path().to_path_buf(), source.clone(), tolerance());
    assert_eq!(repo.status().await, SyncStatus::Fresh { last_updated: t(0) });
    assert!(repo.fetch_lesson("alpha").await.is_some());
    let fetches = source.content_fetches.load(Ordering::SeqCst);
    assert!(!repo.update_data_if_needed().await.unwrap());
    assert_eq!(source.content_fetches.load(Ordering::SeqCst), fetches);
  }

  #[tokio::test]
  async fn force_sync_ignores_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;
    source.publish(t(0), &["Beta"]);
    repo.force_sync().await.unwrap();
    assert!(repo.fetch_lesson("beta").await.is_some());
  }

  #[tokio::test]
  async fn held_snapshot_is_unaffected_by_later_sync() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(FakeSource::default());
    source.publish(t(0), &["Alpha"]);
    let repo = synced(dir.path(), source.clone()).await;
    let before = repo.snapshot().await;

    source.publish(t(10), &["Beta"]);
    assert!(repo.update_data_if_needed().await.unwrap());
    assert!(before.lesson("alpha").is_some());
    assert!(before.lesson("beta").is_none());
    assert_eq!(before.module("course").unwrap().lessons, vec!["alpha"]);
  }
}
