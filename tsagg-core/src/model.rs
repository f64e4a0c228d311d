use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Target bucket width in seconds. `1` means raw, unaggregated data.
pub type Interval = i64;

/// UNIX seconds.
pub type Timestamp = i64;

/// A database's aggregation policy, as read from the `aggregate` collection.
///
/// A policy is well-formed only if both `interval` and `eval_position` were
/// present on the source document; construction is expected to happen via
/// [`AggregationPolicy::from_document_fields`] so malformed policies can be
/// skipped with a warning rather than panicking deeper in the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregationPolicy {
    pub name: String,
    pub interval: Interval,
    pub eval_position: i64,
    pub meta: Value,
    pub values: HashMap<String, ValueSpec>,
    pub last_run: Timestamp,
}

impl AggregationPolicy {
    /// Builds a policy from loosely-typed document fields, returning `None`
    /// when the document is missing `interval` or `eval_position` — the
    /// only well-formedness rule the spec imposes.
    pub fn from_parts(
        name: String,
        interval: Option<Interval>,
        eval_position: Option<i64>,
        meta: Value,
        values: HashMap<String, ValueSpec>,
        last_run: Option<Timestamp>,
    ) -> Option<Self> {
        let interval = interval?;
        let eval_position = eval_position?;
        Some(Self {
            name,
            interval,
            eval_position,
            meta,
            values,
            last_run: last_run.unwrap_or(0),
        })
    }

    /// The wall-clock instant this policy next becomes due.
    pub fn next_run(&self) -> Timestamp {
        self.last_run + self.interval
    }

    /// Whether this policy is due to run at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.last_run + self.interval <= now
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValueSpec {
    pub hist_res: Option<i64>,
    pub hist_min_width: Option<i64>,
}

/// Ordered field lists describing a database's measurement schema.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub required_meta_fields: Vec<String>,
    pub value_fields: Vec<String>,
}

impl Metadata {
    pub fn is_valid(&self) -> bool {
        !self.required_meta_fields.is_empty() && !self.value_fields.is_empty()
    }
}

/// One identifiable time-series stream as summarised for a single policy run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub identifier: String,
    pub start: Timestamp,
    /// Selected required meta fields: `field name -> value`.
    pub fields: HashMap<String, Value>,
    /// Per value-field min/max observed for this measurement.
    pub values: HashMap<String, MinMax>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

/// One (measurement, interval, time-window) bucket in the data store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataDocument {
    pub id: String,
    pub identifier: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub updated: Option<Timestamp>,
    pub updated_start: Option<Timestamp>,
    pub updated_end: Option<Timestamp>,
}

impl DataDocument {
    pub fn is_dirty(&self) -> bool {
        self.updated.is_some()
    }
}

/// Derives the `lock__<db>__<collection>__<identifier>__<start>__<end>`
/// key mandated by the writer/reader interop contract. Must match the
/// writer's derivation byte-for-byte — see the data model invariants.
pub fn lock_key(
    db: &str,
    collection: &str,
    identifier: &str,
    start: Timestamp,
    end: Timestamp,
) -> String {
    format!("lock__{db}__{collection}__{identifier}__{start}__{end}")
}

/// Maps an interval to its backing collection name: `1 -> "data"`,
/// `k -> "data_<k>"` for `k > 1`.
pub fn collection_for_interval(interval: Interval) -> String {
    if interval == 1 {
        "data".to_string()
    } else {
        format!("data_{interval}")
    }
}
