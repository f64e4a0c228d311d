use std::collections::HashMap;

use crate::metadata_cache::MetadataCache;
use crate::model::{AggregationPolicy, Interval, Measurement};

/// Decides, per measurement, which already-aggregated interval (if any)
/// should feed `current`'s run, and drops measurements already covered by
/// a heavier same-interval policy.
///
/// The source contains a guard of the shape `policy.interval >
/// current_interval`, which reads as always-false dead code inside a loop
/// already iterating `policy.interval`. The filter actually intended —
/// and the one applied here — is `p.interval <= current.interval`: a
/// policy can only be a *source* for another policy at the same or a
/// coarser interval, never a finer one.
pub fn resolve(
    current: &AggregationPolicy,
    all_policies: &[AggregationPolicy],
    current_measurements: &HashMap<String, Measurement>,
    cache: &MetadataCache,
    db: &str,
) -> HashMap<Interval, HashMap<String, Measurement>> {
    let mut candidates: Vec<&AggregationPolicy> = all_policies
        .iter()
        .filter(|p| p.name != current.name && p.interval <= current.interval)
        .collect();
    candidates.sort_by(|a, b| b.interval.cmp(&a.interval).then(b.eval_position.cmp(&a.eval_position)));

    let mut buckets: HashMap<Interval, HashMap<String, Measurement>> = HashMap::new();

    for (identifier, measurement) in current_measurements {
        let chosen = candidates
            .iter()
            .find(|p| {
                cache
                    .measurements(db, &p.name)
                    .map(|m| m.contains_key(identifier))
                    .unwrap_or(false)
            })
            .copied();

        match chosen {
            Some(p) if p.interval == current.interval => {
                // Already aggregated at this level by a heavier same-interval
                // policy; drop the identifier rather than double-aggregate.
            }
            Some(p) => {
                buckets
                    .entry(p.interval)
                    .or_default()
                    .insert(identifier.clone(), measurement.clone());
            }
            None => {
                buckets
                    .entry(1)
                    .or_default()
                    .insert(identifier.clone(), measurement.clone());
            }
        }
    }

    buckets
}
