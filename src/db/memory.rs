//! In-memory document store used by the test suites and by local runs without MongoDB.

use std::collections::HashMap;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use chrono::Datelike;
use tokio::sync::RwLock;

use crate::db::query::{
    as_number, lookup, sort_order, values_equal, Accumulator, Filter, GroupKey, Projection, Stage,
};
use crate::db::store::{Changes, DocumentStore, FindSpec, StoreError, UniqueIndex};

#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    unique: Vec<UniqueIndex>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_unique_indexes(indexes: &[UniqueIndex]) -> Self {
        MemoryStore {
            collections: RwLock::default(),
            unique: indexes.to_vec(),
        }
    }

    /// Every stored document of a collection, ignoring any read scope.
    pub async fn raw(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn check_unique(
        &self,
        collection: &str,
        existing: &[Document],
        candidate: &Document,
    ) -> Result<(), StoreError> {
        let candidate_id = candidate.get("_id");
        for index in self.unique.iter().filter(|i| i.collection == collection) {
            let Some(values) = index
                .fields
                .iter()
                .map(|f| candidate.get(*f))
                .collect::<Option<Vec<&Bson>>>()
            else {
                continue;
            };
            let clash = existing.iter().any(|doc| {
                doc.get("_id") != candidate_id
                    && index
                        .fields
                        .iter()
                        .zip(&values)
                        .all(|(f, v)| doc.get(*f).is_some_and(|other| values_equal(other, v)))
            });
            if clash {
                let described: Vec<String> = index
                    .fields
                    .iter()
                    .zip(&values)
                    .map(|(f, v)| format!("{f}: {v}"))
                    .collect();
                return Err(StoreError::DuplicateKey(described.join(", ")));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&self, collection: &str, mut doc: Document) -> Result<ObjectId, StoreError> {
        let id = match doc.get("_id") {
            Some(Bson::ObjectId(id)) => *id,
            Some(_) => {
                return Err(StoreError::Backend("_id must be an ObjectId".to_string()));
            }
            None => {
                let id = ObjectId::new();
                doc.insert("_id", id);
                id
            }
        };

        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.get("_id") == Some(&Bson::ObjectId(id))) {
            return Err(StoreError::DuplicateKey(format!("_id: {id}")));
        }
        self.check_unique(collection, docs, &doc)?;
        docs.push(doc);
        Ok(id)
    }

    async fn find(&self, collection: &str, spec: &FindSpec) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let mut matched: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| spec.filter.matches(d))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        drop(collections);

        if !spec.sort.is_empty() {
            matched.sort_by(|a, b| spec.sort.compare(a, b));
        }
        let skip = usize::try_from(spec.skip).unwrap_or(usize::MAX);
        let limit = spec
            .limit
            .filter(|l| *l > 0)
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);

        Ok(matched
            .into_iter()
            .skip(skip)
            .take(limit)
            .map(|d| match &spec.projection {
                Some(projection) => projection.apply(d),
                None => d,
            })
            .collect())
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        let found = collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)))
            .cloned();
        Ok(match (found, projection) {
            (Some(doc), Some(projection)) => Some(projection.apply(doc)),
            (found, _) => found,
        })
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        changes: &Changes,
    ) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(position) = docs.iter().position(|d| filter.matches(d)) else {
            return Ok(false);
        };

        let mut updated = docs[position].clone();
        changes.apply_to(&mut updated);
        self.check_unique(collection, docs, &updated)?;
        docs[position] = updated;
        Ok(true)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        match docs.iter().position(|d| filter.matches(d)) {
            Some(position) => {
                docs.remove(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.raw(collection).await;
        Ok(pipeline.iter().fold(docs, |docs, stage| apply_stage(docs, stage)))
    }
}

fn apply_stage(docs: Vec<Document>, stage: &Stage) -> Vec<Document> {
    match stage {
        Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
        Stage::Unwind(field) => unwind(docs, field),
        Stage::Group { key, accumulators } => group(docs, key, accumulators),
        Stage::Sort(sort) => {
            let mut docs = docs;
            docs.sort_by(|a, b| sort.compare(a, b));
            docs
        }
        Stage::AddFields(fields) => docs
            .into_iter()
            .map(|mut doc| {
                for (target, source) in fields {
                    if let Some(value) = lookup(&doc, source).cloned() {
                        doc.insert(target.clone(), value);
                    }
                }
                doc
            })
            .collect(),
        Stage::Project(projection) => docs.into_iter().map(|d| projection.apply(d)).collect(),
        Stage::Limit(n) => {
            let n = usize::try_from(*n).unwrap_or(0);
            docs.into_iter().take(n).collect()
        }
    }
}

fn unwind(docs: Vec<Document>, field: &str) -> Vec<Document> {
    let mut out = Vec::new();
    for doc in docs {
        match doc.get(field) {
            Some(Bson::Array(items)) => {
                for item in items.clone() {
                    let mut copy = doc.clone();
                    copy.insert(field, item);
                    out.push(copy);
                }
            }
            None | Some(Bson::Null) => {}
            Some(_) => out.push(doc),
        }
    }
    out
}

fn group_key(doc: &Document, key: &GroupKey) -> Bson {
    match key {
        GroupKey::Field(field) => lookup(doc, field).cloned().unwrap_or(Bson::Null),
        GroupKey::Month(field) => match lookup(doc, field) {
            Some(Bson::DateTime(date)) => Bson::Int32(date.to_chrono().month() as i32),
            _ => Bson::Null,
        },
    }
}

fn group(
    docs: Vec<Document>,
    key: &GroupKey,
    accumulators: &[(String, Accumulator)],
) -> Vec<Document> {
    let mut groups: Vec<(Bson, Vec<Document>)> = Vec::new();
    for doc in docs {
        let value = group_key(&doc, key);
        match groups.iter_mut().find(|(k, _)| values_equal(k, &value)) {
            Some((_, members)) => members.push(doc),
            None => groups.push((value, vec![doc])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut out = Document::new();
            out.insert("_id", key);
            for (name, accumulator) in accumulators {
                out.insert(name.clone(), accumulate(&members, accumulator));
            }
            out
        })
        .collect()
}

fn accumulate(members: &[Document], accumulator: &Accumulator) -> Bson {
    let values = |field: &str| -> Vec<Bson> {
        members
            .iter()
            .filter_map(|d| lookup(d, field))
            .filter(|v| !matches!(v, Bson::Null))
            .cloned()
            .collect()
    };

    match accumulator {
        Accumulator::Count => Bson::Int32(i32::try_from(members.len()).unwrap_or(i32::MAX)),
        Accumulator::Sum(field) => {
            let values = values(field);
            let all_integers = values
                .iter()
                .all(|v| matches!(v, Bson::Int32(_) | Bson::Int64(_)));
            if all_integers {
                Bson::Int64(
                    values
                        .iter()
                        .map(|v| match v {
                            Bson::Int32(n) => i64::from(*n),
                            Bson::Int64(n) => *n,
                            _ => 0,
                        })
                        .sum(),
                )
            } else {
                Bson::Double(values.iter().filter_map(as_number).sum())
            }
        }
        Accumulator::Avg(field) => {
            let numbers: Vec<f64> = values(field).iter().filter_map(as_number).collect();
            if numbers.is_empty() {
                Bson::Null
            } else {
                Bson::Double(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Accumulator::Min(field) => values(field)
            .into_iter()
            .min_by(|a, b| sort_order(Some(a), Some(b)))
            .unwrap_or(Bson::Null),
        Accumulator::Max(field) => values(field)
            .into_iter()
            .max_by(|a, b| sort_order(Some(a), Some(b)))
            .unwrap_or(Bson::Null),
        Accumulator::Push(field) => Bson::Array(
            members
                .iter()
                .filter_map(|d| lookup(d, field).cloned())
                .collect(),
        ),
    }
}
