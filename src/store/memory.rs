use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use mongodb::bson::{Bson, Document};

use super::filter::{compare, lookup};
use super::{Filter, Sort, Store, StoreError, StoreResult};

/// Process-local store. Collections are vectors of documents kept in insertion order.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, Vec<Document>>>,
    unique_fields: Mutex<HashMap<String, HashSet<String>>>,
    sequences: Mutex<HashMap<String, i64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn document_id(document: &Document) -> StoreResult<&str> {
    document.get_str("_id").map_err(|_| StoreError::MissingId)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unique_fields(self, fields: &[(&str, &str)]) -> Self {
        {
            let mut unique = lock(&self.unique_fields);
            for (collection, field) in fields {
                unique.entry(collection.to_string()).or_default().insert(field.to_string());
            }
        }
        self
    }

    fn check_unique(
        &self,
        collection: &str,
        existing: &[Document],
        candidate: &Document,
        skip_id: Option<&str>,
    ) -> StoreResult<()> {
        let unique = lock(&self.unique_fields);
        let Some(fields) = unique.get(collection) else {
            return Ok(());
        };
        for field in fields {
            let Some(value) = candidate.get(field) else { continue };
            let clash = existing.iter().any(|d| {
                d.get_str("_id").ok() != skip_id && d.get(field) == Some(value)
            });
            if clash {
                return Err(StoreError::DuplicateKey(format!("{}.{}", collection, field)));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ensure_unique(&self, collection: &str, field: &str) -> StoreResult<()> {
        lock(&self.unique_fields)
            .entry(collection.to_string())
            .or_default()
            .insert(field.to_string());
        Ok(())
    }

    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()> {
        let id = document_id(&document)?.to_string();
        let mut collections = lock(&self.collections);
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|d| d.get_str("_id").ok() == Some(id.as_str())) {
            return Err(StoreError::DuplicateKey(format!("{}._id", collection)));
        }
        self.check_unique(collection, docs, &document, None)?;
        docs.push(document);
        Ok(())
    }

    async fn find_one(&self, collection: &str, filter: &Filter) -> StoreResult<Option<Document>> {
        let collections = lock(&self.collections);
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|d| filter.matches(d)).cloned()))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<Sort>,
    ) -> StoreResult<Vec<Document>> {
        let mut found: Vec<Document> = {
            let collections = lock(&self.collections);
            collections
                .get(collection)
                .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
                .unwrap_or_default()
        };
        if let Some(sort) = sort {
            found.sort_by(|a, b| {
                let ordering = match (lookup(a, sort.field), lookup(b, sort.field)) {
                    (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                if sort.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }
        Ok(found)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        let collections = lock(&self.collections);
        Ok(collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).count() as u64)
            .unwrap_or(0))
    }

    async fn replace(&self, collection: &str, id: &str, document: Document) -> StoreResult<bool> {
        let mut collections = lock(&self.collections);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        self.check_unique(collection, docs, &document, Some(id))?;
        match docs.iter_mut().find(|d| d.get_str("_id").ok() == Some(id)) {
            Some(slot) => {
                *slot = document;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_versioned(
        &self,
        collection: &str,
        id: &str,
        expected_version: i64,
        document: Document,
    ) -> StoreResult<bool> {
        let mut collections = lock(&self.collections);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let slot = docs.iter_mut().find(|d| {
            d.get_str("_id").ok() == Some(id)
                && matches!(d.get("version"), Some(Bson::Int64(v)) if *v == expected_version)
        });
        match slot {
            Some(slot) => {
                *slot = document;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn update_fields(&self, collection: &str, id: &str, fields: Document) -> StoreResult<bool> {
        let mut collections = lock(&self.collections);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(position) = docs.iter().position(|d| d.get_str("_id").ok() == Some(id)) else {
            return Ok(false);
        };
        let mut updated = docs[position].clone();
        for (key, value) in fields {
            updated.insert(key, value);
        }
        self.check_unique(collection, docs, &updated, Some(id))?;
        docs[position] = updated;
        Ok(true)
    }

    async fn update_many(&self, collection: &str, filter: &Filter, fields: Document) -> StoreResult<u64> {
        let mut collections = lock(&self.collections);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut modified = 0;
        for document in docs.iter_mut().filter(|d| filter.matches(d)) {
            for (key, value) in fields.iter() {
                document.insert(key.clone(), value.clone());
            }
            modified += 1;
        }
        Ok(modified)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let mut collections = lock(&self.collections);
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(false);
        };
        let before = docs.len();
        docs.retain(|d| d.get_str("_id").ok() != Some(id));
        Ok(docs.len() != before)
    }

    async fn next_sequence(&self, name: &str) -> StoreResult<i64> {
        let mut sequences = lock(&self.sequences);
        let value = sequences.entry(name.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[actix_web::test]
    async fn unique_fields_reject_duplicates() {
        let store = MemoryStore::new();
        store.ensure_unique("customers", "vkn").await.unwrap();
        store
            .insert("customers", doc! { "_id": "a", "vkn": "1234567890" })
            .await
            .unwrap();
        let err = store
            .insert("customers", doc! { "_id": "b", "vkn": "1234567890" })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateKey(_)));
        assert_eq!(store.count("customers", &Filter::new()).await.unwrap(), 1);
    }

    #[actix_web::test]
    async fn versioned_replace_rejects_stale_writes() {
        let store = MemoryStore::new();
        store.insert("chats", doc! { "_id": "c", "version": 1i64 }).await.unwrap();
        assert!(store
            .replace_versioned("chats", "c", 1, doc! { "_id": "c", "version": 2i64 })
            .await
            .unwrap());
        assert!(!store
            .replace_versioned("chats", "c", 1, doc! { "_id": "c", "version": 2i64 })
            .await
            .unwrap());
    }

    #[actix_web::test]
    async fn find_sorts_descending() {
        let store = MemoryStore::new();
        for (id, at) in [("a", "2026-01-01"), ("b", "2026-03-01"), ("c", "2026-02-01")] {
            store.insert("activities", doc! { "_id": id, "createdAt": at }).await.unwrap();
        }
        let found = store
            .find("activities", &Filter::new(), Some(Sort::desc("createdAt")))
            .await
            .unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d.get_str("_id").unwrap()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[actix_web::test]
    async fn sequences_count_from_one() {
        let store = MemoryStore::new();
        assert_eq!(store.next_sequence("SRV-2026").await.unwrap(), 1);
        assert_eq!(store.next_sequence("SRV-2026").await.unwrap(), 2);
        assert_eq!(store.next_sequence("ARZ-2026").await.unwrap(), 1);
    }
}
