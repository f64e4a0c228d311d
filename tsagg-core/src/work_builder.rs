use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::{AggregationPolicy, DataDocument, Interval, Measurement, Metadata, Timestamp};
use crate::publish::Publisher;
use crate::store::Store;

/// One work-order message, serialized as the sole element of a JSON
/// array. Envelope fields are identical across every chunk of a group.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkMessage {
    #[serde(rename = "type")]
    pub db_type: String,
    pub interval_from: Interval,
    pub interval_to: Interval,
    pub start: Timestamp,
    pub end: Timestamp,
    pub required_meta: Vec<String>,
    pub values: Vec<ValueDescriptor>,
    pub meta: Vec<MetaEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ValueDescriptor {
    pub name: String,
    pub hist_res: Option<i64>,
    pub hist_min_width: Option<i64>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MetaEntry {
    pub values: Vec<ValueEntry>,
    pub fields: HashMap<String, Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ValueEntry {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

fn floor_to(ts: Timestamp, interval: Interval) -> Timestamp {
    ts.div_euclid(interval) * interval
}

fn ceil_to(ts: Timestamp, interval: Interval) -> Timestamp {
    let floor = floor_to(ts, interval);
    if floor == ts {
        floor
    } else {
        floor + interval
    }
}

/// Groups dirty documents by target-interval time window, chunks their
/// measurements into bounded-size work orders, and publishes them.
pub struct WorkBuilder<'a> {
    store: &'a dyn Store,
    publisher: &'a dyn Publisher,
    chunk_size: usize,
}

impl<'a> WorkBuilder<'a> {
    pub fn new(store: &'a dyn Store, publisher: &'a dyn Publisher, chunk_size: usize) -> Self {
        Self { store, publisher, chunk_size: chunk_size.max(1) }
    }

    /// Builds, publishes, and — only on full success — clears dirty flags
    /// for every document in `docs`. Returns the identifiers of documents
    /// that were actually published. On any failure no flags are cleared
    /// and the error propagates so the caller can abandon the policy pass.
    #[allow(clippy::too_many_arguments)]
    pub async fn process(
        &self,
        db: &str,
        queue: &str,
        policy: &AggregationPolicy,
        interval_from: Interval,
        interval_to: Interval,
        docs: &[DataDocument],
        measurements: &HashMap<String, Measurement>,
        metadata: &Metadata,
    ) -> Result<Vec<String>> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }

        let values: Vec<ValueDescriptor> = metadata
            .value_fields
            .iter()
            .map(|name| {
                let spec = policy.values.get(name);
                ValueDescriptor {
                    name: name.clone(),
                    hist_res: spec.and_then(|s| s.hist_res),
                    hist_min_width: spec.and_then(|s| s.hist_min_width),
                }
            })
            .collect();

        let mut groups: HashMap<(Timestamp, Timestamp), Vec<&DataDocument>> = HashMap::new();
        for doc in docs {
            let updated_start = doc.updated_start.unwrap_or(doc.start);
            let updated_end = doc.updated_end.unwrap_or(doc.end);
            let floor = floor_to(updated_start, interval_to);
            let ceil = ceil_to(updated_end, interval_to);
            groups.entry((floor, ceil)).or_default().push(doc);
        }

        let mut published_ids = Vec::new();
        for ((floor, ceil), group_docs) in groups {
            let entries: Vec<MetaEntry> = group_docs
                .iter()
                .filter_map(|doc| measurements.get(&doc.identifier))
                .map(|m| MetaEntry {
                    values: m
                        .values
                        .iter()
                        .map(|(name, mm)| ValueEntry { name: name.clone(), min: mm.min, max: mm.max })
                        .collect(),
                    fields: m.fields.clone(),
                })
                .collect();

            for chunk in entries.chunks(self.chunk_size) {
                let message = WorkMessage {
                    db_type: db.to_string(),
                    interval_from,
                    interval_to,
                    start: floor,
                    end: ceil,
                    required_meta: metadata.required_meta_fields.clone(),
                    values: values.clone(),
                    meta: chunk.to_vec(),
                };
                let body = serde_json::to_vec(&[message])?;
                self.publisher.publish(queue, body).await?;
            }

            published_ids.extend(group_docs.iter().map(|d| d.id.clone()));
        }

        self.store.clear_dirty(db, interval_from, &published_ids).await?;
        Ok(published_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MinMax;
    use crate::testing::{FakePublisher, FakeStore};

    fn metadata() -> Metadata {
        Metadata {
            required_meta_fields: vec!["host".into()],
            value_fields: vec!["cpu".into()],
        }
    }

    fn policy() -> AggregationPolicy {
        AggregationPolicy::from_parts(
            "p".into(),
            Some(60),
            Some(1),
            Value::Null,
            HashMap::new(),
            Some(0),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn single_dirty_doc_produces_one_message_with_expected_window() {
        let store = FakeStore::new();
        let publisher = FakePublisher::new();
        let builder = WorkBuilder::new(&store, &publisher, 50);

        let doc = DataDocument {
            id: "1".into(),
            identifier: "x".into(),
            start: 0,
            end: 86_400,
            updated: Some(100),
            updated_start: Some(90),
            updated_end: Some(125),
        };
        let mut measurements = HashMap::new();
        measurements.insert(
            "x".to_string(),
            Measurement {
                identifier: "x".into(),
                start: 90,
                fields: HashMap::from([("host".to_string(), Value::String("a".into()))]),
                values: HashMap::from([("cpu".to_string(), MinMax { min: 1.0, max: 2.0 })]),
            },
        );

        let ids = builder
            .process("db", "queue", &policy(), 1, 60, &[doc], &measurements, &metadata())
            .await
            .unwrap();

        assert_eq!(ids, vec!["1".to_string()]);
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        let messages: Vec<WorkMessage> = serde_json::from_slice(&published[0].1).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].start, 60);
        assert_eq!(messages[0].end, 180);
        assert_eq!(messages[0].interval_from, 1);
        assert_eq!(messages[0].interval_to, 60);
        assert_eq!(store.cleared_for("db", 1), vec!["1".to_string()]);
    }

    #[tokio::test]
    async fn chunks_meta_entries_at_configured_size() {
        let store = FakeStore::new();
        let publisher = FakePublisher::new();
        let builder = WorkBuilder::new(&store, &publisher, 2);

        let docs: Vec<DataDocument> = (0..5)
            .map(|i| DataDocument {
                id: i.to_string(),
                identifier: format!("id{i}"),
                start: 0,
                end: 60,
                updated: Some(100),
                updated_start: Some(0),
                updated_end: Some(60),
            })
            .collect();
        let measurements: HashMap<String, Measurement> = docs
            .iter()
            .map(|d| {
                (
                    d.identifier.clone(),
                    Measurement {
                        identifier: d.identifier.clone(),
                        start: 0,
                        fields: HashMap::new(),
                        values: HashMap::new(),
                    },
                )
            })
            .collect();

        builder
            .process("db", "queue", &policy(), 1, 60, &docs, &measurements, &metadata())
            .await
            .unwrap();

        // 5 entries chunked at 2 -> 3 messages (2, 2, 1).
        assert_eq!(publisher.published().len(), 3);
    }
}
