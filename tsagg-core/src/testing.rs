//! In-memory fakes for [`Store`], [`LockClient`], and [`Publisher`],
//! shared across this crate's unit tests. Hand-written rather than built
//! on a mocking framework, mirroring the teacher's `dispatcher` test
//! module convention.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::lock::{LockClient, LockHandle};
use crate::model::{AggregationPolicy, DataDocument, Interval, Measurement, Metadata, Timestamp};
use crate::publish::Publisher;
use crate::store::{Projection, Store};

#[derive(Default)]
pub struct FakeStore {
    databases: Mutex<Vec<String>>,
    policies: Mutex<HashMap<String, Vec<AggregationPolicy>>>,
    metadata: Mutex<HashMap<String, Metadata>>,
    measurements: Mutex<HashMap<String, HashMap<String, Measurement>>>,
    dirty: Mutex<HashMap<(String, Interval), Vec<DataDocument>>>,
    refetch_override: Mutex<HashMap<(String, Interval), Vec<DataDocument>>>,
    cleared: Mutex<HashMap<(String, Interval), Vec<String>>>,
    last_run: Mutex<HashMap<(String, String), Timestamp>>,
    unauthorized_databases: Mutex<HashSet<String>>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_databases(&mut self, names: Vec<String>) {
        *self.databases.get_mut().unwrap() = names;
    }

    pub fn seed_policies(&mut self, db: &str, policies: Vec<AggregationPolicy>) {
        self.policies.get_mut().unwrap().insert(db.to_string(), policies);
    }

    pub fn seed_metadata(&mut self, db: &str, metadata: Metadata) {
        self.metadata.get_mut().unwrap().insert(db.to_string(), metadata);
    }

    pub fn seed_measurements(&mut self, db: &str, measurements: HashMap<String, Measurement>) {
        self.measurements.get_mut().unwrap().insert(db.to_string(), measurements);
    }

    pub fn seed_dirty(&mut self, db: &str, interval: Interval, docs: Vec<DataDocument>) {
        self.dirty.get_mut().unwrap().insert((db.to_string(), interval), docs);
    }

    /// Overrides what `refetch_by_ids` returns for `(db, interval)`,
    /// independent of what was scanned — used to simulate a document
    /// stolen or deleted between scan and lock.
    pub fn seed_refetch(&mut self, db: &str, interval: Interval, docs: Vec<DataDocument>) {
        self.refetch_override
            .get_mut()
            .unwrap()
            .insert((db.to_string(), interval), docs);
    }

    pub fn cleared_for(&self, db: &str, interval: Interval) -> Vec<String> {
        self.cleared
            .lock()
            .unwrap()
            .get(&(db.to_string(), interval))
            .cloned()
            .unwrap_or_default()
    }

    pub fn last_run_for(&self, db: &str, policy_name: &str) -> Option<Timestamp> {
        self.last_run.lock().unwrap().get(&(db.to_string(), policy_name.to_string())).copied()
    }

    /// Makes `list_policies` return [`SchedulerError::AuthSkipped`] for
    /// `db`, simulating a database this credential isn't permitted to read.
    pub fn seed_unauthorized(&mut self, db: &str) {
        self.unauthorized_databases.get_mut().unwrap().insert(db.to_string());
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.databases.lock().unwrap().clone())
    }

    async fn list_policies(&self, db: &str) -> Result<Vec<AggregationPolicy>> {
        if self.unauthorized_databases.lock().unwrap().contains(db) {
            return Err(SchedulerError::AuthSkipped);
        }
        Ok(self.policies.lock().unwrap().get(db).cloned().unwrap_or_default())
    }

    async fn fetch_metadata(&self, db: &str) -> Result<Metadata> {
        self.metadata
            .lock()
            .unwrap()
            .get(db)
            .cloned()
            .ok_or_else(|| SchedulerError::DatabaseTransient(format!("no metadata seeded for {db}")))
    }

    async fn fetch_measurements(
        &self,
        db: &str,
        _selector: &Value,
        _projection: &Projection,
    ) -> Result<HashMap<String, Measurement>> {
        Ok(self.measurements.lock().unwrap().get(db).cloned().unwrap_or_default())
    }

    async fn fetch_dirty(
        &self,
        db: &str,
        interval: Interval,
        _since: Timestamp,
        ids: &HashSet<String>,
        _projection: &Projection,
    ) -> Result<Vec<DataDocument>> {
        Ok(self
            .dirty
            .lock()
            .unwrap()
            .get(&(db.to_string(), interval))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|d| ids.contains(&d.identifier))
            .collect())
    }

    async fn refetch_by_ids(
        &self,
        db: &str,
        interval: Interval,
        ids: &[String],
        _projection: &Projection,
    ) -> Result<Vec<DataDocument>> {
        if let Some(docs) = self.refetch_override.lock().unwrap().get(&(db.to_string(), interval)) {
            return Ok(docs.clone());
        }
        Ok(self
            .dirty
            .lock()
            .unwrap()
            .get(&(db.to_string(), interval))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|d| ids.contains(&d.id))
            .collect())
    }

    async fn clear_dirty(&self, db: &str, interval: Interval, ids: &[String]) -> Result<()> {
        self.cleared
            .lock()
            .unwrap()
            .entry((db.to_string(), interval))
            .or_default()
            .extend(ids.iter().cloned());
        Ok(())
    }

    async fn set_last_run(&self, db: &str, policy_name: &str, floored_now: Timestamp) -> Result<()> {
        self.last_run
            .lock()
            .unwrap()
            .insert((db.to_string(), policy_name.to_string()), floored_now);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeLockClient {
    held: Mutex<HashSet<String>>,
}

impl FakeLockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

#[async_trait]
impl LockClient for FakeLockClient {
    async fn acquire(&self, key: &str) -> Result<LockHandle> {
        let mut held = self.held.lock().unwrap();
        if !held.insert(key.to_string()) {
            return Err(SchedulerError::LockFailure { key: key.to_string(), reason: "already held".into() });
        }
        Ok(LockHandle { key: key.to_string(), token: Uuid::new_v4().to_string() })
    }

    async fn release(&self, handle: LockHandle) {
        self.held.lock().unwrap().remove(&handle.key);
    }
}

#[derive(Default)]
pub struct FakePublisher {
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl FakePublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        self.published.lock().unwrap().push((queue.to_string(), body));
        Ok(())
    }
}
