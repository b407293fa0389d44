//! JSON-file directory store: one pretty-printed `<id>.json` per document.
//!
//! Every operation runs under a `.store.lock` file created with `create_new`,
//! so several processes can share one directory. The lock holds its owner's
//! token; a stale lock is moved aside with a rename before removal, so two
//! processes racing to clear it cannot delete a fresh one. Writes go to a
//! temporary file first and are renamed into place.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use cito_types::{CaseDocument, CitoError, PipelineStatus, Result};

use super::{
    apply_update, claim_one, mark_claimed, pick_next, release_one, sorted_ids, ClaimResult,
    CommitOutcome, DocumentStore, DocumentUpdate,
};

const LOCK_FILE: &str = ".store.lock";
const LOCK_ATTEMPTS: usize = 50;
const LOCK_RETRY: Duration = Duration::from_millis(100);
/// A lock file older than this was left behind by a crashed process.
const LOCK_STALE: Duration = Duration::from_secs(60);

async fn lock_is_stale(path: &Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    meta.modified()
        .ok()
        .and_then(|m| m.elapsed().ok())
        .is_some_and(|age| age > LOCK_STALE)
}

fn unavailable(context: &str, e: std::io::Error) -> CitoError {
    CitoError::StoreUnavailable(format!("{context}: {e}"))
}

/// File name for a document id. Characters outside `[A-Za-z0-9._-]` become `_`.
fn file_name(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}.json", safe.trim_start_matches('.'))
}

/// Removes the lock file when dropped, unless it no longer holds our token.
struct LockGuard {
    path: PathBuf,
    token: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match std::fs::read_to_string(&self.path) {
            Ok(held) if held == self.token => {
                if let Err(e) = std::fs::remove_file(&self.path) {
                    tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove store lock");
                }
            }
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "Store lock was taken over, leaving it");
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Store lock vanished");
            }
        }
    }
}

pub struct FileStore {
    dir: PathBuf,
    lease: chrono::Duration,
}

impl FileStore {
    /// Open (and create if needed) a store directory.
    pub async fn open(dir: impl Into<PathBuf>, lease: chrono::Duration) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| unavailable(&dir.display().to_string(), e))?;
        tracing::debug!(dir = %dir.display(), "File store opened");
        Ok(Self { dir, lease })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(file_name(id))
    }

    async fn lock(&self) -> Result<LockGuard> {
        let path = self.dir.join(LOCK_FILE);
        let token = uuid::Uuid::new_v4().to_string();
        for _ in 0..LOCK_ATTEMPTS {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    let written = match file.write_all(token.as_bytes()).await {
                        Ok(()) => file.flush().await,
                        Err(e) => Err(e),
                    };
                    if let Err(e) = written {
                        if let Err(e) = tokio::fs::remove_file(&path).await {
                            tracing::warn!(path = %path.display(), error = %e, "Failed to remove store lock");
                        }
                        return Err(unavailable("cannot write store lock", e));
                    }
                    return Ok(LockGuard { path, token });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    if self.clear_stale_lock(&path).await? {
                        continue;
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(unavailable("cannot create store lock", e)),
            }
        }
        Err(CitoError::StoreUnavailable(format!(
            "store lock {} is held by another process",
            path.display()
        )))
    }

    /// Move a stale lock aside and delete it. Returns `true` when the lock
    /// path is free to retry. If the file moved turns out to be fresh, another
    /// process replaced the stale lock in between and its lock is put back.
    async fn clear_stale_lock(&self, path: &Path) -> Result<bool> {
        if !lock_is_stale(path).await {
            return Ok(false);
        }
        let aside = self.dir.join(format!("{LOCK_FILE}.{}", uuid::Uuid::new_v4()));
        match tokio::fs::rename(path, &aside).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(unavailable("cannot move stale store lock", e)),
        }

        if lock_is_stale(&aside).await {
            tracing::warn!(path = %path.display(), "Removed stale store lock");
            if let Err(e) = tokio::fs::remove_file(&aside).await {
                tracing::warn!(path = %aside.display(), error = %e, "Failed to delete stale lock");
            }
            return Ok(true);
        }

        // hard_link fails if the path exists, so a newer lock is never replaced.
        let restored = tokio::fs::hard_link(&aside, path).await;
        if let Err(e) = tokio::fs::remove_file(&aside).await {
            tracing::warn!(path = %aside.display(), error = %e, "Failed to delete moved lock");
        }
        match restored {
            Ok(()) => Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(unavailable("cannot restore store lock", e)),
        }
    }

    async fn read_path(&self, path: &Path) -> Result<Option<CaseDocument>> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(unavailable(&path.display().to_string(), e)),
        };
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let doc: CaseDocument =
            serde_json::from_str(&json).map_err(|e| CitoError::InvalidDocument {
                id: name,
                message: e.to_string(),
            })?;
        doc.validate()?;
        Ok(Some(doc))
    }

    async fn read_doc(&self, id: &str) -> Result<Option<CaseDocument>> {
        Ok(self
            .read_path(&self.path_for(id))
            .await?
            .filter(|doc| doc.id() == id))
    }

    /// Every readable document. Unparseable files are logged and skipped.
    async fn read_all(&self) -> Result<Vec<CaseDocument>> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir.display().to_string(), e))?;
        let mut docs = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(&self.dir.display().to_string(), e))?
        {
            let path = entry.path();
            let is_doc = path.extension().is_some_and(|ext| ext == "json")
                && !entry.file_name().to_string_lossy().starts_with('.');
            if !is_doc {
                continue;
            }
            match self.read_path(&path).await {
                Ok(Some(doc)) => docs.push(doc),
                Ok(None) => {}
                Err(e @ CitoError::InvalidDocument { .. }) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable document");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(docs)
    }

    async fn write_doc(&self, doc: &CaseDocument) -> Result<()> {
        let name = file_name(doc.id());
        let path = self.dir.join(&name);
        let tmp = self.dir.join(format!(".{name}.tmp"));
        let json = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| unavailable(&tmp.display().to_string(), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| unavailable(&path.display().to_string(), e))?;
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn claim_next(
        &self,
        gating: PipelineStatus,
        owner: &str,
    ) -> Result<Option<CaseDocument>> {
        let _lock = self.lock().await?;
        let now = Utc::now();
        let docs = self.read_all().await?;
        let Some(id) = pick_next(docs.iter(), gating, owner, now, self.lease) else {
            return Ok(None);
        };
        let Some(mut doc) = docs.into_iter().find(|d| d.id() == id) else {
            return Ok(None);
        };
        mark_claimed(&mut doc, owner, now);
        self.write_doc(&doc).await?;
        Ok(Some(doc))
    }

    async fn claim_by_id(
        &self,
        id: &str,
        eligible: &[PipelineStatus],
        owner: &str,
    ) -> Result<ClaimResult> {
        let _lock = self.lock().await?;
        let Some(mut doc) = self.read_doc(id).await? else {
            return Ok(ClaimResult::NotFound);
        };
        let result = claim_one(&mut doc, eligible, owner, Utc::now(), self.lease);
        if matches!(result, ClaimResult::Claimed(_)) {
            self.write_doc(&doc).await?;
        }
        Ok(result)
    }

    async fn commit(
        &self,
        id: &str,
        expected: PipelineStatus,
        update: DocumentUpdate,
    ) -> Result<CommitOutcome> {
        let _lock = self.lock().await?;
        let mut doc = self
            .read_doc(id)
            .await?
            .ok_or_else(|| CitoError::NotFound(id.to_string()))?;
        if doc.pipeline_status() != expected {
            return Ok(CommitOutcome::Conflict {
                actual: doc.pipeline_status(),
            });
        }
        apply_update(&mut doc, update, Utc::now());
        self.write_doc(&doc).await?;
        Ok(CommitOutcome::Committed(Box::new(doc)))
    }

    async fn release(&self, id: &str, owner: &str) -> Result<()> {
        let _lock = self.lock().await?;
        if let Some(mut doc) = self.read_doc(id).await? {
            if release_one(&mut doc, owner) {
                self.write_doc(&doc).await?;
            }
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CaseDocument>> {
        let _lock = self.lock().await?;
        self.read_doc(id).await
    }

    async fn find_ids(&self, status: Option<PipelineStatus>) -> Result<Vec<String>> {
        let _lock = self.lock().await?;
        let docs = self.read_all().await?;
        Ok(sorted_ids(docs.iter(), status))
    }

    async fn count(&self, status: Option<PipelineStatus>) -> Result<usize> {
        Ok(self.find_ids(status).await?.len())
    }

    async fn insert(&self, doc: CaseDocument) -> Result<bool> {
        doc.validate()?;
        let _lock = self.lock().await?;
        if tokio::fs::try_exists(self.path_for(doc.id()))
            .await
            .map_err(|e| unavailable(&self.dir.display().to_string(), e))?
        {
            return Ok(false);
        }
        self.write_doc(&doc).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cito_types::{Identity, Stage, StageMeta};

    fn lease() -> chrono::Duration {
        chrono::Duration::minutes(15)
    }

    fn doc(id: &str) -> CaseDocument {
        let mut identity = Identity::new(id);
        identity.case_title = Some(format!("ADI {id}"));
        CaseDocument::discovered(identity)
    }

    // 1. Documents survive a reopen
    #[tokio::test]
    async fn round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), lease()).await.unwrap();
        assert!(store.insert(doc("15345")).await.unwrap());
        assert!(!store.insert(doc("15345")).await.unwrap());

        let reopened = FileStore::open(dir.path(), lease()).await.unwrap();
        let loaded = reopened.get("15345").await.unwrap().unwrap();
        assert_eq!(loaded.identity.case_title.as_deref(), Some("ADI 15345"));
        assert!(dir.path().join("15345.json").exists());
        assert!(!dir.path().join(LOCK_FILE).exists());
    }

    // 2. Claim, commit and release are persisted
    #[tokio::test]
    async fn claim_commit_release() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), lease()).await.unwrap();
        store.insert(doc("1")).await.unwrap();

        let claimed = store
            .claim_next(PipelineStatus::Extracted, "w1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.status.claimed_by.as_deref(), Some("w1"));
        assert_eq!(store.claim_by_id("1", &[], "w2").await.unwrap(), ClaimResult::Busy);

        let update = DocumentUpdate {
            stage: Stage::Scrape,
            meta: StageMeta::success().with_http_status(200),
            advance_to: Some(PipelineStatus::CaseScraped),
            changes: vec![super::super::FieldChange::HtmlRaw("<html></html>".into())],
        };
        let out = store
            .commit("1", PipelineStatus::Extracted, update.clone())
            .await
            .unwrap();
        assert!(matches!(out, CommitOutcome::Committed(_)));
        let conflict = store.commit("1", PipelineStatus::Extracted, update).await.unwrap();
        assert!(matches!(conflict, CommitOutcome::Conflict { .. }));

        store.release("1", "w1").await.unwrap();
        let stored = store.get("1").await.unwrap().unwrap();
        assert!(stored.status.claimed_by.is_none());
        assert_eq!(stored.pipeline_status(), PipelineStatus::CaseScraped);
        assert_eq!(store.count(Some(PipelineStatus::CaseScraped)).await.unwrap(), 1);
    }

    // 3. Unparseable files are skipped, not fatal
    #[tokio::test]
    async fn bad_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), lease()).await.unwrap();
        store.insert(doc("1")).await.unwrap();
        tokio::fs::write(dir.path().join("broken.json"), "{").await.unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "x").await.unwrap();
        assert_eq!(store.find_ids(None).await.unwrap(), vec!["1"]);
        assert!(matches!(
            store.get("broken").await,
            Err(CitoError::InvalidDocument { .. })
        ));
    }

    // 4. A stale lock left by a crash is taken over
    #[tokio::test]
    async fn stale_lock_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), lease()).await.unwrap();
        let lock = dir.path().join(LOCK_FILE);
        let file = std::fs::File::create(&lock).unwrap();
        let old = std::time::SystemTime::now() - Duration::from_secs(600);
        file.set_modified(old).unwrap();
        drop(file);

        assert_eq!(store.count(None).await.unwrap(), 0);
        assert!(!lock.exists());
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    // 5. A fresh lock is never cleared, and a guard only removes its own lock
    #[tokio::test]
    async fn fresh_lock_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), lease()).await.unwrap();
        let lock = dir.path().join(LOCK_FILE);
        std::fs::write(&lock, "other-process").unwrap();
        assert!(!store.clear_stale_lock(&lock).await.unwrap());
        assert_eq!(std::fs::read_to_string(&lock).unwrap(), "other-process");
        std::fs::remove_file(&lock).unwrap();

        let guard = store.lock().await.unwrap();
        assert_eq!(std::fs::read_to_string(&lock).unwrap(), guard.token);
        std::fs::write(&lock, "taken-over").unwrap();
        drop(guard);
        assert_eq!(std::fs::read_to_string(&lock).unwrap(), "taken-over");
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(file_name("15345"), "15345.json");
        assert_eq!(file_name("../etc/passwd"), "_etc_passwd.json");
        assert_eq!(file_name("ADI 4277"), "ADI_4277.json");
    }
}
