use std::cmp::max;
use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::dirty_fetcher::DirtyFetcher;
use crate::lock::LockClient;
use crate::metadata_cache::MetadataCache;
use crate::model::{AggregationPolicy, Timestamp};
use crate::policy_resolver;
use crate::publish::Publisher;
use crate::store::Store;
use crate::work_builder::WorkBuilder;

/// Tuning knobs the scheduler loop takes instead of hardcoded constants.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerTuning {
    pub idle_sleep: Duration,
    pub meta_chunk_size: usize,
}

impl Default for SchedulerTuning {
    fn default() -> Self {
        Self {
            idle_sleep: Duration::from_secs(60),
            meta_chunk_size: 50,
        }
    }
}

/// Outer loop: discover policies, evaluate each database, sleep until the
/// next policy comes due.
pub struct Scheduler<'a> {
    store: &'a dyn Store,
    lock: &'a dyn LockClient,
    publisher: &'a dyn Publisher,
    queue: String,
    tuning: SchedulerTuning,
}

impl<'a> Scheduler<'a> {
    pub fn new(
        store: &'a dyn Store,
        lock: &'a dyn LockClient,
        publisher: &'a dyn Publisher,
        queue: impl Into<String>,
        tuning: SchedulerTuning,
    ) -> Self {
        Self { store, lock, publisher, queue: queue.into(), tuning }
    }

    /// Runs forever. Intended to be raced against `tokio::signal::ctrl_c()`
    /// by the process entry point so an interrupt lands between
    /// iterations rather than mid-batch.
    pub async fn run(&self, now_fn: impl Fn() -> Timestamp) {
        loop {
            let next_wake = self.pass(now_fn()).await;
            let sleep_for = max(0, next_wake - now_fn());
            tokio::time::sleep(Duration::from_secs(sleep_for as u64)).await;
        }
    }

    /// Runs exactly one scheduling pass and returns the wall-clock
    /// timestamp the caller should next wake at. Split out from [`run`]
    /// so tests can drive single passes without an infinite loop.
    pub async fn pass(&self, now: Timestamp) -> Timestamp {
        let databases = match self.store.list_databases().await {
            Ok(dbs) => dbs,
            Err(e) => {
                warn!(error = %e, "failed to list databases; retrying after idle sleep");
                return now + self.tuning.idle_sleep.as_secs() as Timestamp;
            }
        };

        if databases.is_empty() {
            info!("No aggregate policies to evaluate; no databases registered");
            return now + self.tuning.idle_sleep.as_secs() as Timestamp;
        }

        let mut next_wake: Option<Timestamp> = None;
        for db in &databases {
            match self.evaluate_database(db, now).await {
                Ok(Some(db_next)) => {
                    next_wake = Some(next_wake.map_or(db_next, |n| n.min(db_next)));
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(db, error = %e, "database pass failed; continuing with next database");
                }
            }
        }

        next_wake.unwrap_or(now + self.tuning.idle_sleep.as_secs() as Timestamp)
    }

    async fn evaluate_database(&self, db: &str, now: Timestamp) -> crate::error::Result<Option<Timestamp>> {
        let mut policies = match self.store.list_policies(db).await {
            Ok(p) => p,
            Err(crate::error::SchedulerError::AuthSkipped) => {
                debug!(db, "authorization skipped; not permitted to list policies for this database");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        if policies.is_empty() {
            return Ok(None);
        }
        // (interval asc, eval_position desc): the order evaluation proceeds
        // in, and the order PolicyResolver's same-interval tie-break relies on.
        policies.sort_by(|a, b| a.interval.cmp(&b.interval).then(b.eval_position.cmp(&a.eval_position)));

        let metadata = match self.store.fetch_metadata(db).await {
            Ok(m) => m,
            Err(e) => {
                warn!(db, error = %e, "failed to fetch metadata; skipping database");
                return Ok(None);
            }
        };

        let mut cache = MetadataCache::new();
        cache.set_metadata(db, metadata.clone());

        let mut lowest_next_run: Option<Timestamp> = None;

        for policy in &policies {
            let next_run = if policy.is_due(now) {
                self.evaluate_policy(db, policy, &policies, &metadata, &mut cache, now).await
            } else {
                policy.next_run()
            };
            lowest_next_run = Some(lowest_next_run.map_or(next_run, |n| n.min(next_run)));
        }

        Ok(lowest_next_run)
    }

    async fn evaluate_policy(
        &self,
        db: &str,
        policy: &AggregationPolicy,
        all_policies: &[AggregationPolicy],
        metadata: &crate::model::Metadata,
        cache: &mut MetadataCache,
        now: Timestamp,
    ) -> Timestamp {
        let fallback_next_run = policy.next_run();

        let selector = policy.meta.clone();
        let projection: Vec<String> = metadata.required_meta_fields.clone();

        let measurements = match self.store.fetch_measurements(db, &selector, &projection).await {
            Ok(m) => m,
            Err(e) => {
                warn!(db, policy = policy.name, error = %e, "failed to fetch measurements; skipping policy");
                return fallback_next_run;
            }
        };
        cache.set_measurements(db, &policy.name, measurements.clone());

        let buckets = policy_resolver::resolve(policy, all_policies, &measurements, cache, db);
        if buckets.is_empty() {
            debug!(db, policy = policy.name, "no measurements to aggregate this pass");
        }

        let fetcher = DirtyFetcher::new(self.store, self.lock);
        let builder = WorkBuilder::new(self.store, self.publisher, self.tuning.meta_chunk_size);

        let mut succeeded = true;
        for (interval_from, bucket_measurements) in &buckets {
            let ids: HashSet<String> = bucket_measurements.keys().cloned().collect();
            let fetch_result = match fetcher.fetch(db, *interval_from, policy.last_run, &ids).await {
                Ok(r) => r,
                Err(e) => {
                    warn!(db, policy = policy.name, interval_from, error = %e, "dirty fetch failed; abandoning this source interval");
                    succeeded = false;
                    continue;
                }
            };

            let publish_result = builder
                .process(
                    db,
                    &self.queue,
                    policy,
                    *interval_from,
                    policy.interval,
                    &fetch_result.docs,
                    bucket_measurements,
                    metadata,
                )
                .await;

            for handle in fetch_result.handles {
                self.lock.release(handle).await;
            }

            if let Err(e) = publish_result {
                warn!(db, policy = policy.name, interval_from, error = %e, "publish failed; dirty flags left set for retry");
                succeeded = false;
            }
        }

        if !succeeded {
            return fallback_next_run;
        }

        // Always advance on vacuous success (no buckets, or buckets with
        // zero surviving documents): see the design decision on this.
        let floored_now = (now / policy.interval) * policy.interval;
        if let Err(e) = self.store.set_last_run(db, &policy.name, floored_now).await {
            warn!(db, policy = policy.name, error = %e, "failed to persist last_run; scheduler will retry from in-memory value next pass");
        }
        floored_now + policy.interval
    }
}
