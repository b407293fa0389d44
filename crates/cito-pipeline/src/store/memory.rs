//! In-memory store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use cito_types::{CaseDocument, CitoError, PipelineStatus, Result};
use tokio::sync::Mutex;

use super::{
    apply_update, claim_one, mark_claimed, pick_next, release_one, sorted_ids, ClaimResult,
    CommitOutcome, DocumentStore, DocumentUpdate,
};

pub struct MemoryStore {
    docs: Mutex<BTreeMap<String, CaseDocument>>,
    lease: chrono::Duration,
    unavailable: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new(lease: chrono::Duration) -> Self {
        Self {
            docs: Mutex::new(BTreeMap::new()),
            lease,
            unavailable: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn with_documents(lease: chrono::Duration, docs: impl IntoIterator<Item = CaseDocument>) -> Self {
        let map = docs
            .into_iter()
            .map(|d| (d.id().to_string(), d))
            .collect();
        Self {
            docs: Mutex::new(map),
            ..Self::new(lease)
        }
    }

    /// Simulate a lost connection: every call fails with `StoreUnavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful commits so far.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CitoError::StoreUnavailable("memory store offline".into()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(chrono::Duration::minutes(15))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn claim_next(
        &self,
        gating: PipelineStatus,
        owner: &str,
    ) -> Result<Option<CaseDocument>> {
        self.check()?;
        let now = Utc::now();
        let mut docs = self.docs.lock().await;
        let Some(id) = pick_next(docs.values(), gating, owner, now, self.lease) else {
            return Ok(None);
        };
        Ok(docs.get_mut(&id).map(|doc| {
            mark_claimed(doc, owner, now);
            doc.clone()
        }))
    }

    async fn claim_by_id(
        &self,
        id: &str,
        eligible: &[PipelineStatus],
        owner: &str,
    ) -> Result<ClaimResult> {
        self.check()?;
        let mut docs = self.docs.lock().await;
        Ok(match docs.get_mut(id) {
            Some(doc) => claim_one(doc, eligible, owner, Utc::now(), self.lease),
            None => ClaimResult::NotFound,
        })
    }

    async fn commit(
        &self,
        id: &str,
        expected: PipelineStatus,
        update: DocumentUpdate,
    ) -> Result<CommitOutcome> {
        self.check()?;
        let mut docs = self.docs.lock().await;
        let doc = docs
            .get_mut(id)
            .ok_or_else(|| CitoError::NotFound(id.to_string()))?;
        if doc.pipeline_status() != expected {
            return Ok(CommitOutcome::Conflict {
                actual: doc.pipeline_status(),
            });
        }
        apply_update(doc, update, Utc::now());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(CommitOutcome::Committed(Box::new(doc.clone())))
    }

    async fn release(&self, id: &str, owner: &str) -> Result<()> {
        self.check()?;
        if let Some(doc) = self.docs.lock().await.get_mut(id) {
            release_one(doc, owner);
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<CaseDocument>> {
        self.check()?;
        Ok(self.docs.lock().await.get(id).cloned())
    }

    async fn find_ids(&self, status: Option<PipelineStatus>) -> Result<Vec<String>> {
        self.check()?;
        Ok(sorted_ids(self.docs.lock().await.values(), status))
    }

    async fn count(&self, status: Option<PipelineStatus>) -> Result<usize> {
        self.check()?;
        let docs = self.docs.lock().await;
        Ok(docs
            .values()
            .filter(|d| status.map_or(true, |s| d.pipeline_status() == s))
            .count())
    }

    async fn insert(&self, doc: CaseDocument) -> Result<bool> {
        self.check()?;
        doc.validate()?;
        let mut docs = self.docs.lock().await;
        if docs.contains_key(doc.id()) {
            return Ok(false);
        }
        docs.insert(doc.id().to_string(), doc);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cito_types::{Identity, Stage, StageMeta};

    fn doc(id: &str) -> CaseDocument {
        CaseDocument::discovered(Identity::new(id))
    }

    fn advance(stage: Stage, to: PipelineStatus) -> DocumentUpdate {
        DocumentUpdate {
            stage,
            meta: StageMeta::success(),
            advance_to: Some(to),
            changes: vec![],
        }
    }

    #[tokio::test]
    async fn insert_and_count() {
        let store = MemoryStore::default();
        assert!(store.insert(doc("1")).await.unwrap());
        assert!(!store.insert(doc("1")).await.unwrap());
        assert!(store.insert(doc("2")).await.unwrap());
        assert_eq!(store.count(None).await.unwrap(), 2);
        assert_eq!(store.count(Some(PipelineStatus::CaseScraped)).await.unwrap(), 0);
        assert!(store.insert(doc(" ")).await.is_err());
    }

    #[tokio::test]
    async fn claim_next_is_exclusive() {
        let store = MemoryStore::with_documents(chrono::Duration::minutes(15), [doc("1")]);
        let first = store.claim_next(PipelineStatus::Extracted, "a").await.unwrap();
        assert_eq!(first.unwrap().status.claimed_by.as_deref(), Some("a"));
        assert!(store
            .claim_next(PipelineStatus::Extracted, "b")
            .await
            .unwrap()
            .is_none());
        store.release("1", "a").await.unwrap();
        assert!(store
            .claim_next(PipelineStatus::Extracted, "b")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn claim_by_id_outcomes() {
        let store = MemoryStore::with_documents(chrono::Duration::minutes(15), [doc("1")]);
        assert_eq!(
            store.claim_by_id("9", &[], "a").await.unwrap(),
            ClaimResult::NotFound
        );
        assert_eq!(
            store
                .claim_by_id("1", &[PipelineStatus::CaseScraped], "a")
                .await
                .unwrap(),
            ClaimResult::Ineligible(PipelineStatus::Extracted)
        );
        assert!(matches!(
            store.claim_by_id("1", &[PipelineStatus::Extracted], "a").await.unwrap(),
            ClaimResult::Claimed(_)
        ));
        assert_eq!(
            store.claim_by_id("1", &[], "b").await.unwrap(),
            ClaimResult::Busy
        );
    }

    #[tokio::test]
    async fn commit_is_conditional() {
        let store = MemoryStore::with_documents(chrono::Duration::minutes(15), [doc("1")]);
        let out = store
            .commit("1", PipelineStatus::Extracted, advance(Stage::Scrape, PipelineStatus::CaseScraped))
            .await
            .unwrap();
        assert!(matches!(out, CommitOutcome::Committed(_)));
        let stale = store
            .commit("1", PipelineStatus::Extracted, advance(Stage::Scrape, PipelineStatus::CaseScraped))
            .await
            .unwrap();
        assert_eq!(
            stale,
            CommitOutcome::Conflict {
                actual: PipelineStatus::CaseScraped
            }
        );
        assert_eq!(store.commits(), 1);
        assert!(matches!(
            store.commit("9", PipelineStatus::Extracted, advance(Stage::Scrape, PipelineStatus::CaseScraped)).await,
            Err(CitoError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::default();
        store.set_unavailable(true);
        let err = store.count(None).await.unwrap_err();
        assert!(err.is_fatal());
        store.set_unavailable(false);
        assert_eq!(store.count(None).await.unwrap(), 0);
    }
}
