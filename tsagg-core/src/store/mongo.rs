//! MongoDB-backed [`Store`] implementation. Collection names and the
//! `measurements` aggregation pipeline follow the external-interfaces
//! section of the spec exactly; this is the only module allowed to know
//! about BSON.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures::stream::TryStreamExt;
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use tracing::warn;

use crate::error::{Result, SchedulerError};
use crate::model::{
    collection_for_interval, AggregationPolicy, DataDocument, Interval, MinMax, Measurement,
    Metadata, Timestamp, ValueSpec,
};

use super::{Projection, Store};

const POLICY_COLLECTION: &str = "aggregate";
const METADATA_COLLECTION: &str = "metadata";
const MEASUREMENTS_COLLECTION: &str = "measurements";

/// Document-store client for the Mongo deployment backing one or more
/// time-series databases.
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Connects and verifies reachability with a `ping`, matching the
    /// fatal-on-startup-failure contract: callers should treat a failure
    /// here as [`SchedulerError::ConfigFatal`].
    pub async fn connect(uri: &str) -> Result<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| SchedulerError::ConfigFatal(format!("mongo connect: {e}")))?;
        client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| SchedulerError::ConfigFatal(format!("mongo ping: {e}")))?;
        Ok(Self { client })
    }

    fn db(&self, name: &str) -> Database {
        self.client.database(name)
    }

    fn data_collection(&self, db: &str, interval: Interval) -> Collection<Document> {
        self.db(db).collection(&collection_for_interval(interval))
    }

    fn is_unauthorized(err: &mongodb::error::Error) -> bool {
        use mongodb::error::ErrorKind;
        matches!(
            err.kind.as_ref(),
            ErrorKind::Authentication { .. }
        ) || err.code().map(|c| c == 13).unwrap_or(false)
    }

    fn doc_to_policy(name: String, doc: Document) -> Option<AggregationPolicy> {
        let interval = doc.get_i64("interval").ok();
        let eval_position = doc.get_i64("eval_position").ok();
        let last_run = doc.get_i64("last_run").ok();
        let meta = doc
            .get_document("meta")
            .cloned()
            .map(|d| bson_document_to_json(&d))
            .unwrap_or(Value::Null);
        let values = doc
            .get_document("values")
            .cloned()
            .map(|d| {
                d.into_iter()
                    .map(|(k, v)| {
                        let spec = v.as_document().map(|vd| ValueSpec {
                            hist_res: vd.get_i64("hist_res").ok(),
                            hist_min_width: vd.get_i64("hist_min_width").ok(),
                        });
                        (k, spec.unwrap_or_default())
                    })
                    .collect()
            })
            .unwrap_or_default();
        AggregationPolicy::from_parts(name, interval, eval_position, meta, values, last_run)
    }

    fn doc_to_data_document(doc: &Document) -> Option<DataDocument> {
        let id = doc_id_to_string(doc.get("_id")?);
        let identifier = doc.get_str("identifier").ok()?.to_string();
        let start = doc.get_i64("start").ok()?;
        let end = doc.get_i64("end").ok()?;
        Some(DataDocument {
            id,
            identifier,
            start,
            end,
            updated: doc.get_i64("updated").ok(),
            updated_start: doc.get_i64("updated_start").ok(),
            updated_end: doc.get_i64("updated_end").ok(),
        })
    }

    fn projection_document(projection: &Projection) -> Document {
        let mut d = Document::new();
        for field in projection {
            d.insert(field.as_str(), 1);
        }
        d
    }
}

fn doc_id_to_string(id: &Bson) -> String {
    match id {
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn bson_document_to_json(doc: &Document) -> Value {
    serde_json::to_value(doc).unwrap_or(Value::Null)
}

fn json_to_bson_document(value: &Value) -> Result<Document> {
    bson::to_document(value).map_err(|e| SchedulerError::DecodeError(e.to_string()))
}

#[async_trait]
impl Store for MongoStore {
    async fn list_databases(&self) -> Result<Vec<String>> {
        let names = self
            .client
            .list_database_names()
            .await
            .map_err(SchedulerError::from)?;
        Ok(names
            .into_iter()
            .filter(|n| !matches!(n.as_str(), "admin" | "local" | "config"))
            .collect())
    }

    async fn list_policies(&self, db: &str) -> Result<Vec<AggregationPolicy>> {
        let collection: Collection<Document> = self.db(db).collection(POLICY_COLLECTION);
        let mut cursor = match collection.find(doc! {}).await {
            Ok(c) => c,
            Err(e) if Self::is_unauthorized(&e) => {
                return Err(SchedulerError::AuthSkipped);
            }
            Err(e) => return Err(e.into()),
        };

        let mut policies = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(SchedulerError::from)? {
            let name = match doc.get_str("name") {
                Ok(n) => n.to_string(),
                Err(_) => {
                    warn!(db, "skipping policy document with no `name`");
                    continue;
                }
            };
            match Self::doc_to_policy(name.clone(), doc) {
                Some(policy) => policies.push(policy),
                None => warn!(db, policy = name, "skipping malformed policy: missing interval or eval_position"),
            }
        }
        Ok(policies)
    }

    async fn fetch_metadata(&self, db: &str) -> Result<Metadata> {
        let collection: Collection<Document> = self.db(db).collection(METADATA_COLLECTION);
        let doc = collection
            .find_one(doc! {})
            .await
            .map_err(SchedulerError::from)?
            .ok_or_else(|| SchedulerError::DatabaseTransient(format!("no metadata document for {db}")))?;

        let required_meta_fields = doc
            .get_document("meta_fields")
            .map(|fields| {
                fields
                    .iter()
                    .filter(|(_, v)| {
                        v.as_document()
                            .and_then(|d| d.get_bool("required").ok())
                            .unwrap_or(false)
                    })
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();

        let value_fields = doc
            .get_document("values")
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default();

        let metadata = Metadata {
            required_meta_fields,
            value_fields,
        };
        if !metadata.is_valid() {
            return Err(SchedulerError::DatabaseTransient(format!(
                "metadata for {db} has empty required_meta_fields or value_fields"
            )));
        }
        Ok(metadata)
    }

    async fn fetch_measurements(
        &self,
        db: &str,
        selector: &Value,
        projection: &Projection,
    ) -> Result<HashMap<String, Measurement>> {
        let collection: Collection<Document> = self.db(db).collection(MEASUREMENTS_COLLECTION);
        let match_stage = doc! { "$match": json_to_bson_document(selector)? };
        let sort_stage = doc! { "$sort": { "start": -1 } };

        let mut group = Document::new();
        group.insert("_id", "$identifier");
        group.insert("start", doc! { "$first": "$start" });
        for field in projection {
            group.insert(format!("field_{field}"), doc! { "$first": format!("${field}") });
        }
        group.insert(
            "values",
            doc! { "$first": "$values" },
        );
        let group_stage = doc! { "$group": group };

        let pipeline = vec![match_stage, sort_stage, group_stage];
        let mut cursor = collection
            .aggregate(pipeline)
            .await
            .map_err(SchedulerError::from)?;

        let mut out = HashMap::new();
        while let Some(doc) = cursor.try_next().await.map_err(SchedulerError::from)? {
            let identifier = match doc.get("_id").and_then(|b| b.as_str()) {
                Some(s) => s.to_string(),
                None => continue,
            };
            let start = doc.get_i64("start").unwrap_or(0);
            let mut fields = HashMap::new();
            for field in projection {
                if let Some(v) = doc.get(format!("field_{field}")) {
                    fields.insert(field.clone(), bson::from_bson(v.clone()).unwrap_or(Value::Null));
                }
            }
            let values = doc
                .get_document("values")
                .map(|vd| {
                    vd.iter()
                        .filter_map(|(k, v)| {
                            let sub = v.as_document()?;
                            let min = sub.get_f64("min").ok()?;
                            let max = sub.get_f64("max").ok()?;
                            Some((k.clone(), MinMax { min, max }))
                        })
                        .collect()
                })
                .unwrap_or_default();

            out.insert(
                identifier.clone(),
                Measurement {
                    identifier,
                    start,
                    fields,
                    values,
                },
            );
        }
        Ok(out)
    }

    async fn fetch_dirty(
        &self,
        db: &str,
        interval: Interval,
        since: Timestamp,
        ids: &HashSet<String>,
        projection: &Projection,
    ) -> Result<Vec<DataDocument>> {
        let collection = self.data_collection(db, interval);
        let id_list: Vec<&String> = ids.iter().collect();
        let filter = doc! {
            "updated": { "$gte": since },
            "identifier": { "$in": id_list.iter().map(|s| s.as_str()).collect::<Vec<_>>() },
        };
        let mut cursor = collection
            .find(filter)
            .projection(Self::projection_document(projection))
            .await
            .map_err(SchedulerError::from)?;

        let mut docs = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(SchedulerError::from)? {
            if let Some(d) = Self::doc_to_data_document(&doc) {
                docs.push(d);
            }
        }
        Ok(docs)
    }

    async fn refetch_by_ids(
        &self,
        db: &str,
        interval: Interval,
        ids: &[String],
        projection: &Projection,
    ) -> Result<Vec<DataDocument>> {
        let collection = self.data_collection(db, interval);
        let object_ids: Vec<Bson> = ids
            .iter()
            .map(|id| match bson::oid::ObjectId::parse_str(id) {
                Ok(oid) => Bson::ObjectId(oid),
                Err(_) => Bson::String(id.clone()),
            })
            .collect();
        let filter = doc! { "_id": { "$in": object_ids } };
        let mut cursor = collection
            .find(filter)
            .projection(Self::projection_document(projection))
            .await
            .map_err(SchedulerError::from)?;

        let mut docs = Vec::new();
        while let Some(doc) = cursor.try_next().await.map_err(SchedulerError::from)? {
            if let Some(d) = Self::doc_to_data_document(&doc) {
                docs.push(d);
            }
        }
        Ok(docs)
    }

    async fn clear_dirty(&self, db: &str, interval: Interval, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let collection = self.data_collection(db, interval);
        let object_ids: Vec<Bson> = ids
            .iter()
            .map(|id| match bson::oid::ObjectId::parse_str(id) {
                Ok(oid) => Bson::ObjectId(oid),
                Err(_) => Bson::String(id.clone()),
            })
            .collect();
        let filter = doc! { "_id": { "$in": object_ids } };
        let update = doc! { "$unset": { "updated": "", "updated_start": "", "updated_end": "" } };
        collection
            .update_many(filter, update)
            .await
            .map_err(SchedulerError::from)?;
        Ok(())
    }

    async fn set_last_run(&self, db: &str, policy_name: &str, floored_now: Timestamp) -> Result<()> {
        let collection: Collection<Document> = self.db(db).collection(POLICY_COLLECTION);
        collection
            .update_one(
                doc! { "name": policy_name },
                doc! { "$set": { "last_run": floored_now } },
            )
            .await
            .map_err(SchedulerError::from)?;
        Ok(())
    }
}
