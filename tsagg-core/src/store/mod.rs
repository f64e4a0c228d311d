//! Document-store boundary: the only place this crate talks to the backing
//! time-series database. [`Store`] captures exactly the operations the
//! scheduler needs; concrete access lives in [`mongo`].

pub mod mongo;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::model::{AggregationPolicy, DataDocument, Interval, Measurement, Metadata, Timestamp};

pub use mongo::MongoStore;

/// Field projection: the document-store fields a caller needs back.
pub type Projection = Vec<String>;

/// Read/update access to the document store backing one or more databases.
///
/// Every method is scoped to a single named database, mirroring the
/// collection layout in the external-interfaces section of the spec:
/// `aggregate`, `metadata`, `measurements`, and `data`/`data_<interval>`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Enumerates the databases this store supervises, in a stable order.
    async fn list_databases(&self) -> Result<Vec<String>>;

    /// Lists well-formed policies for `db`. Malformed policies (missing
    /// `interval` or `eval_position`) are dropped with a warning rather
    /// than surfaced as an error. An "unauthorized" failure yields an
    /// empty list silently; any other failure is a warned error.
    async fn list_policies(&self, db: &str) -> Result<Vec<AggregationPolicy>>;

    /// Reads the single metadata document for `db`. Fails if either
    /// `required_meta_fields` or `value_fields` comes back empty.
    async fn fetch_metadata(&self, db: &str) -> Result<Metadata>;

    /// Runs `selector` over `measurements`, grouping to the latest `start`
    /// per identifier and projecting `projection`.
    async fn fetch_measurements(
        &self,
        db: &str,
        selector: &Value,
        projection: &Projection,
    ) -> Result<HashMap<String, Measurement>>;

    /// Scans the collection for `interval` for documents with
    /// `updated >= since` whose `identifier` is in `ids`.
    async fn fetch_dirty(
        &self,
        db: &str,
        interval: Interval,
        since: Timestamp,
        ids: &HashSet<String>,
        projection: &Projection,
    ) -> Result<Vec<DataDocument>>;

    /// Re-reads documents for `interval` by their internal ids, for the
    /// authoritative second phase of the lock-then-reread protocol.
    async fn refetch_by_ids(
        &self,
        db: &str,
        interval: Interval,
        ids: &[String],
        projection: &Projection,
    ) -> Result<Vec<DataDocument>>;

    /// Clears the `updated`, `updated_start`, and `updated_end` fields on
    /// every document in `ids` for `interval`.
    async fn clear_dirty(&self, db: &str, interval: Interval, ids: &[String]) -> Result<()>;

    /// Persists the floored `last_run` for `policy_name` in `db`.
    async fn set_last_run(&self, db: &str, policy_name: &str, floored_now: Timestamp) -> Result<()>;
}
