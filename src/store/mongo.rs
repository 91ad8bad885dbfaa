use async_trait::async_trait;
use futures::stream::TryStreamExt;
use log::info;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use mongodb::options::{ClientOptions, IndexOptions, ReturnDocument};
use mongodb::{Client, Collection, Database, IndexModel};

use super::{Filter, Sort, Store, StoreError, StoreResult};

const COUNTERS: &str = "counters";

pub struct MongoStore {
    pub client: Client,
    pub db: Database,
}

impl MongoStore {
    pub async fn init(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        info!("Connected to MongoDB database {}", db_name);
        Ok(MongoStore { client, db })
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }
}

fn map_write_error(err: MongoError, collection: &str) -> StoreError {
    let duplicate = matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    );
    if duplicate {
        StoreError::DuplicateKey(collection.to_string())
    } else {
        StoreError::Database(err)
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn ensure_unique(&self, collection: &str, field: &str) -> StoreResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.coll(collection).create_index(index).await?;
        Ok(())
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()> {
        self.coll(collection)
            .insert_one(document)
            .await
            .map_err(|e| map_write_error(e, collection))?;
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        Ok(self.coll(collection).find_one(filter.to_document()).await?)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<Sort>,
    ) -> StoreResult<Vec<Document>> {
        let coll = self.coll(collection);
        let mut action = coll.find(filter.to_document());
        if let Some(sort) = sort {
            let direction = if sort.descending { -1 } else { 1 };
            action = action.sort(doc! { sort.field: direction });
        }
        let cursor = action.await?;
        let documents: Vec<Document> = cursor.try_collect().await?;
        Ok(documents)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        Ok(self.coll(collection).count_documents(filter.to_document()).await?)
    }

    async fn replace(&self, collection: &str, id: &str, document: Document) -> StoreResult<bool> {
        let result = self
            .coll(collection)
            .replace_one(doc! { "_id": id }, document)
            .await
            .map_err(|e| map_write_error(e, collection))?;
        Ok(result.matched_count > 0)
    }

    async fn replace_versioned(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        document: Document,
    ) -> StoreResult<bool> {
        let result = self
            .coll(collection)
            .replace_one(doc! { "_id": id, "version": expected_version }, document)
            .await
            .map_err(|e| map_write_error(e, collection))?;
        Ok(result.matched_count > 0)
    }

    async fn update_fields(&self, collection: &str, id: &str, fields: Document) -> StoreResult<bool> {
        let result = self
            .coll(collection)
            .update_one(doc! { "_id": id }, doc! { "$set": fields })
            .await
            .map_err(|e| map_write_error(e, collection))?;
        Ok(result.matched_count > 0)
    }

    async fn update_many(&self, collection: &str, filter: &Filter, fields: Document) -> StoreResult<u64> {
        let result = self
            .coll(collection)
            .update_many(filter.to_document(), doc! { "$set": fields })
            .await?;
        Ok(result.modified_count)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let result = self.coll(collection).delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn next_sequence(&self, name: &str) -> StoreResult<i64> {
        let updated = self
            .coll(COUNTERS)
            .find_one_and_update(doc! { "_id": name }, doc! { "$inc": { "seq": 1i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?;
        match updated.as_ref().and_then(|d| d.get("seq")) {
            Some(Bson::Int64(v)) => Ok(*v),
            Some(Bson::Int32(v)) => Ok(i64::from(*v)),
            _ => Err(StoreError::Unexpected(format!("counter {} has no seq", name))),
        }
    }
}
