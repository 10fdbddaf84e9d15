//! Content server state: the published snapshot it serves.
//!
//! The store is read once at startup; publishing new content means restarting
//! the server (repositories notice the newer timestamp on their next check).

use std::io;
use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use crate::error::StoreError;
use crate::repository::ContentSnapshot;
use crate::store::{ContentStore, LESSONS_FILE, METADATA_FILE, MODULES_FILE};

#[derive(Clone)]
pub struct ServerState {
    pub snapshot: Arc<ContentSnapshot>,
}

impl ServerState {
    pub fn new(snapshot: ContentSnapshot) -> Self {
        Self { snapshot: Arc::new(snapshot) }
    }

    /// Load and validate a published content store. Every file of record must exist.
    #[instrument(level = "info", skip_all, fields(dir = %dir.display()))]
    pub fn load(dir: &Path) -> Result<Self, StoreError> {
        let store = ContentStore::new(dir);
        let not_published = |file: &str| StoreError::io(dir.join(file), io::Error::new(io::ErrorKind::NotFound, "content store not published"));

        let metadata = store.read_metadata()?.ok_or_else(|| not_published(METADATA_FILE))?;
        let lessons = store.read_lessons()?.ok_or_else(|| not_published(LESSONS_FILE))?;
        let modules = store.read_modules()?.ok_or_else(|| not_published(MODULES_FILE))?;
        let snapshot = ContentSnapshot::build(Some(metadata), lessons, modules)?;

        info!(
            target: "lesson_forge",
            lessons = snapshot.lesson_count(),
            modules = snapshot.modules().len(),
            timestamp = %metadata.last_updated_timestamp,
            "Content store loaded"
        );
        Ok(Self::new(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{fixtures, ContentMetadata};
    use chrono::Utc;

    #[test]
    fn load_requires_a_published_store() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerState::load(dir.path()).err().unwrap();
        assert!(matches!(err, StoreError::Io { .. }));
    }

    #[test]
    fn load_reads_all_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let meta = ContentMetadata { last_updated_timestamp: Utc::now() };
        ContentStore::new(dir.path())
            .write_all(&[fixtures::lesson("Alpha")], &[fixtures::module("m", &["alpha"], vec![])], &meta)
            .unwrap();
        let state = ServerState::load(dir.path()).unwrap();
        assert_eq!(state.snapshot.metadata(), Some(meta));
        assert!(state.snapshot.lesson("alpha").is_some());
    }
}
