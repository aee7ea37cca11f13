//! Document storage collaborator.
//!
//! Every durable piece of state lives behind [`DocumentStore`]: documents are
//! JSON objects addressed by a collection name and an id. The only concurrency
//! primitive the rest of the crate relies on is [`DocumentStore::increment`],
//! which must apply each delta atomically against the stored field.

use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const POSTS: &str = "posts";
pub const COMMENTS: &str = "comments";
pub const VOTES: &str = "votes";

pub type Document = Map<String, Value>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("{collection}/{key} violates a uniqueness constraint")]
    Conflict { collection: String, key: String },

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn conflict(collection: &str, key: &str) -> Self {
        StoreError::Conflict {
            collection: collection.to_string(),
            key: key.to_string(),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A single predicate over a top-level document field. Filters in a
/// [`ListQuery`] are AND-ed together.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Gte(String, Value),
    Lt(String, Value),
    Lte(String, Value),
    In(String, Vec<Value>),
    /// The document has no such field.
    Absent(String),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ne(field.to_string(), value.into())
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(field.to_string(), value.into())
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gte(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(field.to_string(), value.into())
    }

    pub fn lte(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lte(field.to_string(), value.into())
    }

    pub fn any_of<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        )
    }

    pub fn absent(field: &str) -> Self {
        Filter::Absent(field.to_string())
    }

    /// Holds while `field` still has the value it has in `doc` (or is still
    /// missing).
    pub fn unchanged(doc: &Document, field: &str) -> Self {
        match doc.get(field) {
            Some(value) => Filter::Eq(field.to_string(), value.clone()),
            None => Filter::absent(field),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Filter::Eq(f, _)
            | Filter::Ne(f, _)
            | Filter::Gt(f, _)
            | Filter::Gte(f, _)
            | Filter::Lt(f, _)
            | Filter::Lte(f, _)
            | Filter::In(f, _)
            | Filter::Absent(f) => f,
        }
    }

    /// Evaluates the filter against an in-memory document.
    pub fn matches(&self, doc: &Document) -> bool {
        let actual = doc.get(self.field());
        match self {
            Filter::Eq(_, expected) => actual.is_some_and(|a| values_equal(a, expected)),
            Filter::Ne(_, expected) => !actual.is_some_and(|a| values_equal(a, expected)),
            Filter::Gt(_, bound) => compare(actual, bound) == Some(Ordering::Greater),
            Filter::Gte(_, bound) => matches!(
                compare(actual, bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt(_, bound) => compare(actual, bound) == Some(Ordering::Less),
            Filter::Lte(_, bound) => matches!(
                compare(actual, bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Filter::In(_, candidates) => {
                actual.is_some_and(|a| candidates.iter().any(|c| values_equal(a, c)))
            }
            Filter::Absent(_) => actual.is_none(),
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(actual: Option<&Value>, bound: &Value) -> Option<Ordering> {
    let actual = actual?;
    match (actual, bound) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Keyset-paginated query. Results are ordered by id ascending and start
/// strictly after `after` when it is set.
///
/// With `order_by_desc` set the store instead returns the top `limit`
/// matches by that numeric field, highest first, ties broken by id.
/// Documents without the field sort last. `after` does not apply then.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub filters: Vec<Filter>,
    pub after: Option<String>,
    pub order_by_desc: Option<String>,
    pub limit: usize,
}

impl ListQuery {
    pub fn new(limit: usize) -> Self {
        Self {
            filters: Vec::new(),
            after: None,
            order_by_desc: None,
            limit,
        }
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.order_by_desc = Some(field.to_string());
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.after = cursor;
        self
    }

    pub fn matches(&self, id: &str, doc: &Document) -> bool {
        if self.order_by_desc.is_some() {
            return self.filters.iter().all(|f| f.matches(doc));
        }
        if let Some(after) = &self.after {
            if id <= after.as_str() {
                return false;
            }
        }
        self.filters.iter().all(|f| f.matches(doc))
    }
}

#[derive(Debug, Clone)]
pub struct NewDocument {
    pub id: String,
    pub data: Document,
    /// Collection-scoped uniqueness key; a second document with the same key
    /// is rejected with [`StoreError::Conflict`].
    pub unique_key: Option<String>,
}

/// Inclusive clamp applied after an increment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Bounds {
    pub min: Option<i64>,
    pub max: Option<i64>,
}

impl Bounds {
    pub const UNBOUNDED: Bounds = Bounds {
        min: None,
        max: None,
    };

    pub const NON_NEGATIVE: Bounds = Bounds {
        min: Some(0),
        max: None,
    };

    pub fn clamp(&self, value: i64) -> i64 {
        let value = self.min.map_or(value, |min| value.max(min));
        self.max.map_or(value, |max| value.min(max))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Fetches several documents at once. Missing ids are simply absent from
    /// the result.
    async fn get_many(
        &self,
        collection: &str,
        ids: &[String],
    ) -> StoreResult<Vec<(String, Document)>> {
        let mut found = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.get(collection, id).await? {
                found.push((id.clone(), doc));
            }
        }
        Ok(found)
    }

    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> StoreResult<Vec<(String, Document)>>;

    async fn create(&self, collection: &str, doc: NewDocument) -> StoreResult<()>;

    /// Merges the top-level fields of `patch` into the stored document.
    async fn update(&self, collection: &str, id: &str, patch: Document) -> StoreResult<()>;

    /// Bulk variant of [`DocumentStore::update`] reporting one outcome per id.
    async fn update_many(
        &self,
        collection: &str,
        patches: Vec<(String, Document)>,
    ) -> StoreResult<Vec<(String, StoreResult<()>)>>;

    /// Applies `patch` only if the stored document still satisfies every
    /// guard. Returns `false` when one of them no longer holds.
    async fn update_where(
        &self,
        collection: &str,
        id: &str,
        guards: &[Filter],
        patch: Document,
    ) -> StoreResult<bool>;

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Deletes only if the stored document still satisfies every guard.
    async fn delete_where(
        &self,
        collection: &str,
        id: &str,
        guards: &[Filter],
    ) -> StoreResult<bool>;

    /// Atomically adds `delta` to an integer field and returns the new value.
    async fn increment(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        delta: i64,
        bounds: Bounds,
    ) -> StoreResult<i64>;
}

/// Descending order on a numeric field, missing values last, then id.
pub fn compare_desc(field: &str, a: (&str, &Document), b: (&str, &Document)) -> Ordering {
    let value = |doc: &Document| doc.get(field).and_then(Value::as_f64);
    match (value(a.1), value(b.1)) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then_with(|| a.0.cmp(b.0))
}

/// Drains every page of `query`, following the id cursor.
pub async fn list_all(
    store: &dyn DocumentStore,
    collection: &str,
    query: ListQuery,
) -> StoreResult<Vec<(String, Document)>> {
    let mut query = query;
    if query.limit == 0 {
        query.limit = 100;
    }

    let mut all = Vec::new();
    loop {
        let page = store.list(collection, &query).await?;
        let exhausted = page.len() < query.limit;
        query.after = page.last().map(|(id, _)| id.clone());
        all.extend(page);
        if exhausted || query.after.is_none() {
            return Ok(all);
        }
    }
}

/// Reads an integer field, treating absent or non-numeric values as zero.
pub fn int_field(doc: &Document, field: &str) -> i64 {
    doc.get(field)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

pub fn float_field(doc: &Document, field: &str) -> Option<f64> {
    doc.get(field).and_then(Value::as_f64)
}
