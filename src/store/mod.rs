//! Storage port. Handlers and services only see `Store`; `MongoStore` backs
//! production and `MemoryStore` backs tests and the demo mode.

mod filter;
mod memory;
mod mongo;
pub mod timestamp;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson, Document};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use filter::Filter;
pub use memory::MemoryStore;
pub use mongo::MongoStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("MongoDB error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("Failed to encode document: {0}")]
    Encode(#[from] bson::ser::Error),
    #[error("Failed to decode document: {0}")]
    Decode(#[from] bson::de::Error),
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),
    #[error("Document has no _id")]
    MissingId,
    #[error("Unexpected storage state: {0}")]
    Unexpected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Timestamps are stored in the fixed-width `timestamp` form, so partial
/// updates and query bounds compare correctly with serialized documents.
pub fn date_value(at: &DateTime<Utc>) -> Bson {
    Bson::String(timestamp::format(at))
}

pub fn to_value<T: Serialize>(value: &T) -> StoreResult<Bson> {
    Ok(bson::to_bson(value)?)
}

/// `(collection, field)` pairs that must stay unique.
pub const UNIQUE_FIELDS: &[(&str, &str)] = &[
    ("users", "username"),
    ("customers", "vkn"),
    ("tickets", "number"),
];

pub async fn ensure_indexes(store: &dyn Store) -> StoreResult<()> {
    for (collection, field) in UNIQUE_FIELDS {
        store.ensure_unique(collection, field).await?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub struct Sort {
    pub field: &'static str,
    pub descending: bool,
}

impl Sort {
    pub fn asc(field: &'static str) -> Self {
        Sort { field, descending: false }
    }

    pub fn desc(field: &'static str) -> Self {
        Sort { field, descending: true }
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ensure_unique(&self, collection: &str, field: &str) -> StoreResult<()>;

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()>;

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>>;

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<Sort>,
    ) -> StoreResult<Vec<Document>>;

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Replaces the document with the given `_id`. Returns false when none matched.
    async fn replace(&self, collection: &str, id: &str, document: Document) -> StoreResult<bool>;

    /// Replaces the document only if its `version` field still equals
    /// `expected_version`.
    async fn replace_versioned(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        document: Document,
    ) -> StoreResult<bool>;

    async fn update_fields(&self, collection: &str, id: &str, fields: Document) -> StoreResult<bool>;

    async fn update_many(&self, collection: &str, filter: &Filter, fields: Document) -> StoreResult<u64>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    /// Atomically increments and returns the named counter, starting at 1.
    async fn next_sequence(&self, name: &str) -> StoreResult<i64>;
}

/// A document type stored in its own collection, keyed by a string `_id`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;

    fn id(&self) -> &str;
}

/// Typed access to one collection.
pub struct Repository<T> {
    store: Arc<dyn Store>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Entity> Repository<T> {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store, _marker: PhantomData }
    }

    pub async fn insert(&self, item: &T) -> StoreResult<()> {
        let document = bson::to_document(item)?;
        self.store.insert(T::COLLECTION, document).await
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<T>> {
        self.find_one(&Filter::by_id(id)).await
    }

    pub async fn find_one(&self, filter: &Filter) -> StoreResult<Option<T>> {
        match self.store.find_one(T::COLLECTION, filter).await? {
            Some(document) => Ok(Some(bson::from_document(document)?)),
            None => Ok(None),
        }
    }

    pub async fn list(&self, filter: &Filter, sort: Option<Sort>) -> StoreResult<Vec<T>> {
        self.store
            .find(T::COLLECTION, filter, sort)
            .await?
            .into_iter()
            .map(|d| bson::from_document(d).map_err(StoreError::from))
            .collect()
    }

    pub async fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.store.count(T::COLLECTION, filter).await
    }

    pub async fn save(&self, item: &T) -> StoreResult<bool> {
        let document = bson::to_document(item)?;
        self.store.replace(T::COLLECTION, item.id(), document).await
    }

    pub async fn save_versioned(&self, item: &T, expected_version: i64) -> StoreResult<bool> {
        let document = bson::to_document(item)?;
        self.store
            .replace_versioned(T::COLLECTION, item.id(), expected_version, document)
            .await
    }

    pub async fn update_fields(&self, id: &str, fields: Document) -> StoreResult<bool> {
        self.store.update_fields(T::COLLECTION, id, fields).await
    }

    pub async fn update_many(&self, filter: &Filter, fields: Document) -> StoreResult<u64> {
        self.store.update_many(T::COLLECTION, filter, fields).await
    }

    pub async fn delete(&self, id: &str) -> StoreResult<bool> {
        self.store.delete(T::COLLECTION, id).await
    }
}
