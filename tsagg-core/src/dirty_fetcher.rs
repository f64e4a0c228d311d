use std::collections::HashSet;

use tracing::warn;

use crate::error::Result;
use crate::lock::{LockClient, LockHandle};
use crate::model::{collection_for_interval, lock_key, DataDocument, Interval, Timestamp};
use crate::store::{Projection, Store};

/// Fields read off every data document; matches the external-interfaces
/// minimum column set.
const PROJECTION_FIELDS: [&str; 7] = [
    "_id",
    "identifier",
    "start",
    "end",
    "updated",
    "updated_start",
    "updated_end",
];

pub fn projection() -> Projection {
    PROJECTION_FIELDS.iter().map(|s| s.to_string()).collect()
}

/// Authoritative dirty documents plus the lock handles acquired for them.
/// The caller owns releasing `handles` once the downstream publish/clear
/// step has run, success or failure.
pub struct DirtyFetchResult {
    pub docs: Vec<DataDocument>,
    pub handles: Vec<LockHandle>,
}

/// Two-phase lock-then-reread dirty-document reader. Lock TTL is a
/// property of the [`LockClient`] implementation, not of the fetcher.
pub struct DirtyFetcher<'a> {
    store: &'a dyn Store,
    lock: &'a dyn LockClient,
}

impl<'a> DirtyFetcher<'a> {
    pub fn new(store: &'a dyn Store, lock: &'a dyn LockClient) -> Self {
        Self { store, lock }
    }

    /// Scans `db`'s `interval_from` collection for documents dirty since
    /// `since` among `ids`, locks each one found, then re-reads by the
    /// scanned internal id set. The re-read is authoritative: a document
    /// may have been mutated or deleted between scan and lock.
    pub async fn fetch(
        &self,
        db: &str,
        interval_from: Interval,
        since: Timestamp,
        ids: &HashSet<String>,
    ) -> Result<DirtyFetchResult> {
        let projection = projection();
        let scanned = self
            .store
            .fetch_dirty(db, interval_from, since, ids, &projection)
            .await?;

        let collection = collection_for_interval(interval_from);
        let mut handles = Vec::with_capacity(scanned.len());
        for doc in &scanned {
            let key = lock_key(db, &collection, &doc.identifier, doc.start, doc.end);
            match self.lock.acquire(&key).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(db, interval_from, key, error = %e, "aborting dirty fetch: lock acquisition failed");
                    self.release_all(handles).await;
                    return Err(e);
                }
            }
        }

        let internal_ids: Vec<String> = scanned.iter().map(|d| d.id.clone()).collect();
        match self
            .store
            .refetch_by_ids(db, interval_from, &internal_ids, &projection)
            .await
        {
            Ok(docs) => Ok(DirtyFetchResult { docs, handles }),
            Err(e) => {
                warn!(db, interval_from, error = %e, "aborting dirty fetch: reread failed");
                self.release_all(handles).await;
                Err(e)
            }
        }
    }

    async fn release_all(&self, handles: Vec<LockHandle>) {
        for handle in handles {
            self.lock.release(handle).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeLockClient, FakeStore};

    #[tokio::test]
    async fn second_reread_dropping_docs_yields_fewer_results() {
        let mut store = FakeStore::new();
        store.seed_dirty(
            "db",
            60,
            vec![DataDocument {
                id: "1".into(),
                identifier: "x".into(),
                start: 0,
                end: 60,
                updated: Some(100),
                updated_start: Some(90),
                updated_end: Some(125),
            }],
        );
        // Simulate the document vanishing before reread (stolen/deleted).
        store.seed_refetch("db", 60, vec![]);

        let lock = FakeLockClient::new();
        let fetcher = DirtyFetcher::new(&store, &lock);

        let mut ids = HashSet::new();
        ids.insert("x".to_string());
        let result = fetcher.fetch("db", 60, 0, &ids).await.unwrap();

        assert!(result.docs.is_empty());
        assert_eq!(result.handles.len(), 1);
    }
}
