use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    Bounds, Document, DocumentStore, Filter, ListQuery, NewDocument, StoreError, StoreResult,
    compare_desc, int_field,
};

#[derive(Default)]
struct Collection {
    docs: BTreeMap<String, Document>,
    // unique_key -> id, and the reverse so deletes can release the key
    unique: HashMap<String, String>,
    keys_by_id: HashMap<String, String>,
}

/// In-process store. Every operation holds the lock for its whole duration,
/// which makes each call (increments included) atomic.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, |c| c.docs.len())
    }
}

fn merge(target: &mut Document, patch: Document) {
    for (field, value) in patch {
        target.insert(field, value);
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|c| c.docs.get(id))
            .cloned())
    }

    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> StoreResult<Vec<(String, Document)>> {
        let collections = self.collections.read().await;
        let Some(c) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut matching: Vec<(&String, &Document)> = c
            .docs
            .iter()
            .filter(|(id, doc)| query.matches(id, doc))
            .collect();
        if let Some(field) = &query.order_by_desc {
            matching.sort_by(|a, b| compare_desc(field, (a.0, a.1), (b.0, b.1)));
        }

        Ok(matching
            .into_iter()
            .take(query.limit)
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect())
    }

    async fn create(&self, collection: &str, doc: NewDocument) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        let c = collections.entry(collection.to_string()).or_default();

        if c.docs.contains_key(&doc.id) {
            return Err(StoreError::conflict(collection, &doc.id));
        }
        if let Some(key) = &doc.unique_key {
            if c.unique.contains_key(key) {
                return Err(StoreError::conflict(collection, key));
            }
            c.unique.insert(key.clone(), doc.id.clone());
            c.keys_by_id.insert(doc.id.clone(), key.clone());
        }
        c.docs.insert(doc.id, doc.data);
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|c| c.docs.get_mut(id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        merge(doc, patch);
        Ok(())
    }

    async fn update_many(
        &self,
        collection: &str,
        patches: Vec<(String, Document)>,
    ) -> StoreResult<Vec<(String, StoreResult<()>)>> {
        let mut collections = self.collections.write().await;
        let c = collections.entry(collection.to_string()).or_default();

        Ok(patches
            .into_iter()
            .map(|(id, patch)| {
                let outcome = match c.docs.get_mut(&id) {
                    Some(doc) => {
                        merge(doc, patch);
                        Ok(())
                    }
                    None => Err(StoreError::not_found(collection, &id)),
                };
                (id, outcome)
            })
            .collect())
    }

    async fn update_where(
        &self,
        collection: &str,
        id: &str,
        guards: &[Filter],
        patch: Document,
    ) -> StoreResult<bool> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|c| c.docs.get_mut(id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        if !guards.iter().all(|g| g.matches(doc)) {
            return Ok(false);
        }
        merge(doc, patch);
        Ok(true)
    }

    async fn delete_where(
        &self,
        collection: &str,
        id: &str,
        guards: &[Filter],
    ) -> StoreResult<bool> {
        let mut collections = self.collections.write().await;
        let c = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        let doc = c
            .docs
            .get(id)
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        if !guards.iter().all(|g| g.matches(doc)) {
            return Ok(false);
        }
        c.docs.remove(id);
        if let Some(key) = c.keys_by_id.remove(id) {
            c.unique.remove(&key);
        }
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let mut collections = self.collections.write().await;
        let c = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        c.docs
            .remove(id)
            .ok_or_else(|| StoreError::not_found(collection, id))?;
        if let Some(key) = c.keys_by_id.remove(id) {
            c.unique.remove(&key);
        }
        Ok(())
    }

    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
        bounds: Bounds,
    ) -> StoreResult<i64> {
        let mut collections = self.collections.write().await;
        let doc = collections
            .get_mut(collection)
            .and_then(|c| c.docs.get_mut(id))
            .ok_or_else(|| StoreError::not_found(collection, id))?;

        let next = bounds.clamp(int_field(doc, field).saturating_add(delta));
        doc.insert(field.to_string(), Value::from(next));
        Ok(next)
    }
}
