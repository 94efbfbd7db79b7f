use std::sync::Arc;

use async_trait::async_trait;
use bson::{oid::ObjectId, Document};
use thiserror::Error;

use crate::db::query::{Filter, Projection, Sort, Stage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("database error: {0}")]
    Backend(String),
}

/// Everything a list read needs: the scoped filter plus ordering, projection and paging.
#[derive(Debug, Clone, Default)]
pub struct FindSpec {
    pub filter: Filter,
    pub sort: Sort,
    pub projection: Option<Projection>,
    pub skip: u64,
    pub limit: Option<i64>,
}

impl FindSpec {
    pub fn filtered(filter: Filter) -> Self {
        FindSpec {
            filter,
            ..FindSpec::default()
        }
    }
}

/// A partial update: fields to set and fields to remove.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub set: Document,
    pub unset: Vec<String>,
}

impl Changes {
    pub fn set(set: Document) -> Self {
        Changes {
            set,
            unset: Vec::new(),
        }
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.unset.push(field.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Renders the `$set`/`$unset` update document, omitting empty operators.
    pub fn to_document(&self) -> Document {
        let mut update = Document::new();
        if !self.set.is_empty() {
            update.insert("$set", self.set.clone());
        }
        if !self.unset.is_empty() {
            let mut unset = Document::new();
            for field in &self.unset {
                unset.insert(field.clone(), "");
            }
            update.insert("$unset", unset);
        }
        update
    }

    /// Applies the changes to an in-memory document.
    pub fn apply_to(&self, doc: &mut Document) {
        for (key, value) in &self.set {
            doc.insert(key.clone(), value.clone());
        }
        for field in &self.unset {
            doc.remove(field);
        }
    }
}

/// A unique constraint over one or more fields of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniqueIndex {
    pub collection: &'static str,
    pub fields: &'static [&'static str],
}

/// Document-oriented persistence used by every resource.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn insert(&self, collection: &str, doc: Document) -> Result<ObjectId, StoreError>;

    async fn find(&self, collection: &str, spec: &FindSpec) -> Result<Vec<Document>, StoreError>;

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError>;

    /// Returns whether a document matched.
    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        changes: &Changes,
    ) -> Result<bool, StoreError>;

    /// Returns whether a document was removed.
    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError>;

    async fn find_by_id(
        &self,
        collection: &str,
        id: ObjectId,
        scope: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError> {
        let filter = Filter::id(id).and(scope.clone());
        self.find_one(collection, &filter, projection).await
    }

    async fn update_by_id(
        &self,
        collection: &str,
        id: ObjectId,
        scope: &Filter,
        changes: &Changes,
    ) -> Result<bool, StoreError> {
        let filter = Filter::id(id).and(scope.clone());
        self.update_one(collection, &filter, changes).await
    }

    async fn delete_by_id(
        &self,
        collection: &str,
        id: ObjectId,
        scope: &Filter,
    ) -> Result<bool, StoreError> {
        let filter = Filter::id(id).and(scope.clone());
        self.delete_one(collection, &filter).await
    }
}

pub type Store = Arc<dyn DocumentStore>;
