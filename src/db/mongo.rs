use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Document};
use futures::TryStreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{
        ClientOptions, FindOneOptions, FindOptions, IndexOptions, ServerApi, ServerApiVersion,
    },
    Client, Collection, Database, IndexModel,
};
use regex::Regex;

use crate::db::query::{pipeline_documents, Filter, Projection, Stage};
use crate::db::store::{Changes, DocumentStore, FindSpec, StoreError, UniqueIndex};

const DUPLICATE_KEY: i32 = 11000;

pub async fn create_mongo_client(uri: &str) -> Result<Client, StoreError> {
    log::info!("Connecting to MongoDB");

    let mut client_options = ClientOptions::parse(uri)
        .await
        .map_err(|e| StoreError::Backend(format!("invalid MongoDB URI: {e}")))?;

    client_options.connect_timeout = Some(Duration::from_secs(10));
    client_options.server_selection_timeout = Some(Duration::from_secs(10));
    client_options.max_pool_size = Some(10);
    client_options.min_pool_size = Some(1);

    let server_api = ServerApi::builder().version(ServerApiVersion::V1).build();
    client_options.server_api = Some(server_api);

    Client::with_options(client_options).map_err(map_error)
}

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = create_mongo_client(uri).await?;
        let store = MongoStore {
            db: client.database(database),
        };

        match store.ping().await {
            Ok(()) => log::info!("Connected to MongoDB database {database}"),
            Err(e) => log::warn!("Connected to MongoDB but ping failed: {e}"),
        }

        Ok(store)
    }

    pub async fn ensure_indexes(&self, indexes: &[UniqueIndex]) -> Result<(), StoreError> {
        for index in indexes {
            let mut keys = Document::new();
            for field in index.fields {
                keys.insert(*field, 1);
            }
            let model = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build();
            self.collection(index.collection)
                .create_index(model)
                .await
                .map_err(map_error)?;
        }
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.db.collection(name)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(map_error)
    }

    async fn insert(&self, collection: &str, doc: Document) -> Result<ObjectId, StoreError> {
        let result = self
            .collection(collection)
            .insert_one(doc)
            .await
            .map_err(map_error)?;
        result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| StoreError::Backend("inserted id is not an ObjectId".to_string()))
    }

    async fn find(&self, collection: &str, spec: &FindSpec) -> Result<Vec<Document>, StoreError> {
        let mut options = FindOptions::default();
        if !spec.sort.is_empty() {
            options.sort = Some(spec.sort.to_document());
        }
        options.projection = spec.projection.as_ref().map(Projection::to_document);
        options.skip = Some(spec.skip);
        options.limit = spec.limit;

        let cursor = self
            .collection(collection)
            .find(spec.filter.to_document())
            .with_options(options)
            .await
            .map_err(map_error)?;
        cursor.try_collect().await.map_err(map_error)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<&Projection>,
    ) -> Result<Option<Document>, StoreError> {
        let mut options = FindOneOptions::default();
        options.projection = projection.map(Projection::to_document);

        self.collection(collection)
            .find_one(filter.to_document())
            .with_options(options)
            .await
            .map_err(map_error)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Filter,
        changes: &Changes,
    ) -> Result<bool, StoreError> {
        if changes.is_empty() {
            return Ok(self.find_one(collection, filter, None).await?.is_some());
        }
        let result = self
            .collection(collection)
            .update_one(filter.to_document(), changes.to_document())
            .await
            .map_err(map_error)?;
        Ok(result.matched_count > 0)
    }

    async fn delete_one(&self, collection: &str, filter: &Filter) -> Result<bool, StoreError> {
        let result = self
            .collection(collection)
            .delete_one(filter.to_document())
            .await
            .map_err(map_error)?;
        Ok(result.deleted_count > 0)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
    ) -> Result<Vec<Document>, StoreError> {
        let cursor = self
            .collection(collection)
            .aggregate(pipeline_documents(pipeline))
            .await
            .map_err(map_error)?;
        cursor.try_collect().await.map_err(map_error)
    }
}

fn map_error(err: mongodb::error::Error) -> StoreError {
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = err.kind.as_ref() {
        if write_error.code == DUPLICATE_KEY {
            return StoreError::DuplicateKey(duplicate_value(&write_error.message));
        }
    }
    StoreError::Backend(err.to_string())
}

/// Pulls `name: "The Forest Hiker"` out of an E11000 message.
fn duplicate_value(message: &str) -> String {
    Regex::new(r"dup key: \{ ?(.*?) ?\}")
        .ok()
        .and_then(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| message.to_string())
}
