use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, types::Json};

use super::{
    Bounds, Document, DocumentStore, Filter, ListQuery, NewDocument, StoreError, StoreResult,
};

/// Document store on top of a single JSONB table (see `migrations/`).
#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn ensure_exists(&self, collection: &str, id: &str) -> StoreResult<()> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM documents WHERE collection = $1 AND id = $2)",
        )
        .bind(collection)
        .bind(id)
        .fetch_one(&self.db)
        .await?;

        if exists {
            Ok(())
        } else {
            Err(StoreError::not_found(collection, id))
        }
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    let field = filter.field().to_string();
    match filter {
        Filter::Eq(_, value) => {
            builder.push(" AND data -> ");
            builder.push_bind(field);
            builder.push(" = ");
            builder.push_bind(value.clone());
        }
        Filter::Ne(_, value) => {
            builder.push(" AND (data -> ");
            builder.push_bind(field);
            builder.push(") IS DISTINCT FROM ");
            builder.push_bind(value.clone());
        }
        Filter::In(_, values) => {
            builder.push(" AND data -> ");
            builder.push_bind(field);
            builder.push(" = ANY(");
            builder.push_bind(values.clone());
            builder.push(")");
        }
        Filter::Absent(_) => {
            builder.push(" AND NOT (data ? ");
            builder.push_bind(field);
            builder.push(")");
        }
        Filter::Gt(_, bound) => push_range(builder, field, ">", bound),
        Filter::Gte(_, bound) => push_range(builder, field, ">=", bound),
        Filter::Lt(_, bound) => push_range(builder, field, "<", bound),
        Filter::Lte(_, bound) => push_range(builder, field, "<=", bound),
    }
}

// Range predicates only match values of the bound's JSON type; anything else
// (missing field included) is excluded, mirroring the in-memory store.
fn push_range(builder: &mut QueryBuilder<'_, Postgres>, field: String, op: &str, bound: &Value) {
    match bound {
        Value::Number(n) => {
            builder.push(" AND CASE WHEN jsonb_typeof(data -> ");
            builder.push_bind(field.clone());
            builder.push(") = 'number' THEN (data ->> ");
            builder.push_bind(field);
            builder.push(format!(")::float8 {} ", op));
            builder.push_bind(n.as_f64().unwrap_or_default());
            builder.push(" ELSE false END");
        }
        Value::String(s) => {
            builder.push(" AND CASE WHEN jsonb_typeof(data -> ");
            builder.push_bind(field.clone());
            builder.push(") = 'string' THEN (data ->> ");
            builder.push_bind(field);
            builder.push(format!(") COLLATE \"C\" {} ", op));
            builder.push_bind(s.clone());
            builder.push(" ELSE false END");
        }
        _ => {
            builder.push(" AND false");
        }
    }
}

fn map_insert_error(err: sqlx::Error, collection: &str, key: &str) -> StoreError {
    match err {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::conflict(collection, key)
        }
        other => StoreError::Database(other),
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let row = sqlx::query("SELECT data FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        row.map(|row| {
            row.try_get::<Json<Document>, _>("data")
                .map(|Json(doc)| doc)
        })
        .transpose()
        .map_err(StoreError::from)
    }

    async fn get_many(
        &self,
        collection: &str,
        ids: &[String],
    ) -> StoreResult<Vec<(String, Document)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, data FROM documents WHERE collection = $1 AND id = ANY($2) ORDER BY id",
        )
        .bind(collection)
        .bind(ids)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let Json(doc): Json<Document> = row.try_get("data")?;
                Ok((id, doc))
            })
            .collect()
    }

    async fn list(
        &self,
        collection: &str,
        query: &ListQuery,
    ) -> StoreResult<Vec<(String, Document)>> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, data FROM documents WHERE collection = ",
        );
        builder.push_bind(collection.to_string());

        if let (Some(after), None) = (&query.after, &query.order_by_desc) {
            builder.push(" AND id > ");
            builder.push_bind(after.clone());
        }
        for filter in &query.filters {
            push_filter(&mut builder, filter);
        }

        match &query.order_by_desc {
            Some(field) => {
                builder.push(" ORDER BY CASE WHEN jsonb_typeof(data -> ");
                builder.push_bind(field.clone());
                builder.push(") = 'number' THEN (data ->> ");
                builder.push_bind(field.clone());
                builder.push(")::float8 END DESC NULLS LAST, id LIMIT ");
            }
            None => {
                builder.push(" ORDER BY id LIMIT ");
            }
        }
        builder.push_bind(query.limit as i64);

        let rows = builder.build().fetch_all(&self.db).await?;
        rows.into_iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let Json(doc): Json<Document> = row.try_get("data")?;
                Ok((id, doc))
            })
            .collect()
    }

    async fn create(&self, collection: &str, doc: NewDocument) -> StoreResult<()> {
        let key = doc.unique_key.clone().unwrap_or_else(|| doc.id.clone());
        sqlx::query(
            r#"
            INSERT INTO documents (collection, id, unique_key, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            "#,
        )
        .bind(collection)
        .bind(&doc.id)
        .bind(&doc.unique_key)
        .bind(Json(&doc.data))
        .execute(&self.db)
        .await
        .map_err(|e| map_insert_error(e, collection, &key))?;

        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, patch: Document) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET data = data || $3, updated_at = NOW()
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(Json(&patch))
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection, id));
        }
        Ok(())
    }

    async fn update_many(
        &self,
        collection: &str,
        patches: Vec<(String, Document)>,
    ) -> StoreResult<Vec<(String, StoreResult<()>)>> {
        if patches.is_empty() {
            return Ok(Vec::new());
        }

        let (ids, docs): (Vec<String>, Vec<Value>) = patches
            .into_iter()
            .map(|(id, patch)| (id, Value::Object(patch)))
            .unzip();

        let rows = sqlx::query(
            r#"
            UPDATE documents AS d
            SET data = d.data || u.patch, updated_at = NOW()
            FROM UNNEST($2::text[], $3::jsonb[]) AS u(id, patch)
            WHERE d.collection = $1 AND d.id = u.id
            RETURNING d.id
            "#,
        )
        .bind(collection)
        .bind(&ids)
        .bind(&docs)
        .fetch_all(&self.db)
        .await?;

        let updated: std::collections::HashSet<String> = rows
            .into_iter()
            .filter_map(|row| row.try_get::<String, _>("id").ok())
            .collect();

        Ok(ids
            .into_iter()
            .map(|id| {
                let outcome = if updated.contains(&id) {
                    Ok(())
                } else {
                    Err(StoreError::not_found(collection, &id))
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
        let mut builder = QueryBuilder::<Postgres>::new("UPDATE documents SET data = data || ");
        builder.push_bind(Json(patch));
        builder.push(", updated_at = NOW() WHERE collection = ");
        builder.push_bind(collection.to_string());
        builder.push(" AND id = ");
        builder.push_bind(id.to_string());
        for guard in guards {
            push_filter(&mut builder, guard);
        }

        let result = builder.build().execute(&self.db).await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.ensure_exists(collection, id).await?;
        Ok(false)
    }

    async fn delete_where(
        &self,
        collection: &str,
        id: &str,
        guards: &[Filter],
    ) -> StoreResult<bool> {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM documents WHERE collection = ");
        builder.push_bind(collection.to_string());
        builder.push(" AND id = ");
        builder.push_bind(id.to_string());
        for guard in guards {
            push_filter(&mut builder, guard);
        }

        let result = builder.build().execute(&self.db).await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.ensure_exists(collection, id).await?;
        Ok(false)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
            .bind(collection)
            .bind(id)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(collection, id));
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
        // GREATEST/LEAST ignore NULL arguments, so absent bounds are no-ops.
        let row = sqlx::query(
            r#"
            UPDATE documents
            SET data = jsonb_set(
                    data,
                    ARRAY[$3::text],
                    to_jsonb(LEAST(GREATEST(COALESCE((data ->> $3)::bigint, 0) + $4, $5), $6))
                ),
                updated_at = NOW()
            WHERE collection = $1 AND id = $2
            RETURNING (data ->> $3)::bigint AS value
            "#,
        )
        .bind(collection)
        .bind(id)
        .bind(field)
        .bind(delta)
        .bind(bounds.min)
        .bind(bounds.max)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| StoreError::not_found(collection, id))?;

        Ok(row.try_get("value")?)
    }
}
