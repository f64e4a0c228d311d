use std::collections::HashMap;

use crate::model::{Measurement, Metadata};

/// Process-local, per-scheduler-instance cache of per-database schema and
/// per-policy measurement snapshots.
///
/// Entries are overwritten whenever their owning step re-runs; there is no
/// eviction. [`PolicyResolver`](crate::policy_resolver) reads the
/// measurement snapshots to decide whether an earlier (heavier) policy
/// already covered a given identifier.
#[derive(Default)]
pub struct MetadataCache {
    metadata: HashMap<String, Metadata>,
    measurements: HashMap<(String, String), HashMap<String, Measurement>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_metadata(&mut self, db: &str, metadata: Metadata) {
        self.metadata.insert(db.to_string(), metadata);
    }

    pub fn metadata(&self, db: &str) -> Option<&Metadata> {
        self.metadata.get(db)
    }

    pub fn set_measurements(
        &mut self,
        db: &str,
        policy_name: &str,
        measurements: HashMap<String, Measurement>,
    ) {
        self.measurements
            .insert((db.to_string(), policy_name.to_string()), measurements);
    }

    pub fn measurements(&self, db: &str, policy_name: &str) -> Option<&HashMap<String, Measurement>> {
        self.measurements.get(&(db.to_string(), policy_name.to_string()))
    }
}
