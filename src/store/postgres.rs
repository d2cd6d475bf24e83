//! PostgreSQL-backed event store.
//!
//! Inserts flow through a request/reply channel drained by one acceptor
//! task, so storage-class hooks run off the caller's path while the caller
//! still learns the outcome. Queries are compiled to a disjunction of
//! per-filter conjunctions over the indexed columns.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{Executor, Postgres, QueryBuilder, Row};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::error::Error;
use crate::event::Event;
use crate::filter::Filter;
use crate::store::{EventStore, StorageClass, StorageFilter, StoreFilterer};

/// Schema migrations, applied in ascending version order. The current
/// version lives in the single-row `migrations` table.
const MIGRATIONS: &[(i64, &str)] = &[(1, include_str!("../../migrations/1.create_events.sql"))];

struct AddRequest {
    event: Arc<Event>,
    reply: oneshot::Sender<Result<(), Error>>,
}

pub struct PostgresStore {
    inner: Arc<Inner>,
    tx: mpsc::Sender<AddRequest>,
}

struct Inner {
    pool: PgPool,
    filters: Mutex<Vec<StorageFilter>>,
}

impl PostgresStore {
    pub async fn connect(dsn: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new().max_connections(50).connect(dsn).await?;
        migrate(&pool).await?;

        let inner = Arc::new(Inner {
            pool,
            filters: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = mpsc::channel::<AddRequest>(10);
        let acceptor = inner.clone();
        tokio::spawn(async move {
            while let Some(req) = rx.recv().await {
                let result = acceptor.accept(&req.event).await;
                let _ = req.reply.send(result);
            }
        });

        Ok(PostgresStore { inner, tx })
    }
}

impl Inner {
    async fn accept(&self, event: &Event) -> Result<(), Error> {
        let classes: Vec<StorageClass> = {
            let filters = self.filters.lock().expect("storage filter list poisoned");
            filters.iter().map(|f| f(event)).collect()
        };
        for class in classes {
            match class {
                StorageClass::Normal => {}
                StorageClass::Drop => return Ok(()),
                StorageClass::Single(filter) => self.delete_matching(&filter).await?,
            }
        }
        sqlx::query(
            "INSERT INTO events (id, pubkey, created_at, kind, tags, munged_tags, content, sig) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id, pubkey) DO NOTHING",
        )
        .bind(&event.id)
        .bind(&event.pubkey)
        .bind(event.created_at)
        .bind(event.kind)
        .bind(Json(&event.tags))
        .bind(Json(munge_tags(event)))
        .bind(&event.content)
        .bind(&event.sig)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_matching(&self, filter: &Filter) -> Result<(), Error> {
        let mut query = QueryBuilder::new("DELETE FROM events");
        push_where(&mut query, std::slice::from_ref(filter));
        debug!(sql = query.sql(), "deleting events");
        query.build().execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl EventStore for PostgresStore {
    async fn add(&self, event: Arc<Event>) -> Result<(), Error> {
        let (reply, outcome) = oneshot::channel();
        self.tx
            .send(AddRequest { event, reply })
            .await
            .map_err(|_| Error::Store("postgres store acceptor is gone".into()))?;
        outcome
            .await
            .map_err(|_| Error::Store("postgres store dropped the reply".into()))?
    }

    async fn get(&self, filters: &[Filter]) -> Result<Vec<Arc<Event>>, Error> {
        if filters.is_empty() {
            return Ok(Vec::new());
        }
        let mut query = QueryBuilder::new(
            "SELECT id, pubkey, created_at, kind, tags, content, sig FROM events",
        );
        push_where(&mut query, filters);
        query.push(" ORDER BY created_at DESC, id DESC");
        let limit = Filter::max_limit(filters);
        if limit > 0 {
            query.push(" LIMIT ");
            query.push_bind(limit);
        }
        debug!(sql = query.sql(), "querying events");

        let rows = query.build().fetch_all(&self.inner.pool).await?;
        let mut events = rows
            .into_iter()
            .map(row_to_event)
            .collect::<Result<Vec<_>, _>>()?;
        // newest-first from the database, chronological on the wire
        events.reverse();
        Ok(events)
    }

    async fn delete(&self, filter: &Filter) -> Result<(), Error> {
        self.inner.delete_matching(filter).await
    }
}

impl StoreFilterer for PostgresStore {
    fn add_storage_filter(&self, filter: StorageFilter) {
        self.inner
            .filters
            .lock()
            .expect("storage filter list poisoned")
            .push(filter);
    }
}

fn row_to_event(row: PgRow) -> Result<Arc<Event>, sqlx::Error> {
    let tags: Json<Vec<Vec<String>>> = row.try_get("tags")?;
    Ok(Arc::new(Event {
        id: row.try_get::<String, _>("id")?.trim_end().to_string(),
        pubkey: row.try_get::<String, _>("pubkey")?.trim_end().to_string(),
        created_at: row.try_get("created_at")?,
        kind: row.try_get("kind")?,
        tags: tags.0,
        content: row.try_get("content")?,
        sig: row.try_get::<String, _>("sig")?.trim_end().to_string(),
    }))
}

/// Projection of the tags suitable for jsonb containment lookups: only
/// tags with a name and a single-character value survive, shaped as
/// `{name: [values]}`.
fn munge_tags(event: &Event) -> BTreeMap<String, Vec<String>> {
    let mut munged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for tag in &event.tags {
        if tag.len() < 2 || tag[1].len() != 1 {
            continue;
        }
        munged.entry(tag[0].clone()).or_default().push(tag[1].clone());
    }
    munged
}

/// Append `WHERE (filter) OR (filter) ...` where each filter lowers to a
/// conjunction over the indexed columns. An empty filter lowers to TRUE.
fn push_where(query: &mut QueryBuilder<'_, Postgres>, filters: &[Filter]) {
    query.push(" WHERE ");
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            query.push(" OR ");
        }
        query.push("(");
        let mut any = false;
        let sep = |query: &mut QueryBuilder<'_, Postgres>, any: &mut bool| {
            if *any {
                query.push(" AND ");
            }
            *any = true;
        };
        if !filter.ids.is_empty() {
            sep(query, &mut any);
            query.push("id = ANY(");
            query.push_bind(filter.ids.clone());
            query.push(")");
        }
        if !filter.authors.is_empty() {
            sep(query, &mut any);
            query.push("pubkey = ANY(");
            query.push_bind(filter.authors.clone());
            query.push(")");
        }
        if !filter.kinds.is_empty() {
            sep(query, &mut any);
            query.push("kind = ANY(");
            query.push_bind(filter.kinds.clone());
            query.push(")");
        }
        if filter.since > 0 {
            sep(query, &mut any);
            query.push("created_at >= ");
            query.push_bind(filter.since);
        }
        if filter.until > 0 {
            sep(query, &mut any);
            query.push("created_at <= ");
            query.push_bind(filter.until);
        }
        for (name, values) in &filter.tag_filters {
            sep(query, &mut any);
            query.push("(");
            for (j, value) in values.iter().enumerate() {
                if j > 0 {
                    query.push(" OR ");
                }
                let mut containment = serde_json::Map::new();
                containment.insert(name.clone(), serde_json::json!([value]));
                query.push("munged_tags @> ");
                query.push_bind(Json(serde_json::Value::Object(containment)));
            }
            query.push(")");
        }
        if !any {
            query.push("TRUE");
        }
        query.push(")");
    }
}

async fn migrate(pool: &PgPool) -> Result<(), Error> {
    let mut version: i64 = match sqlx::query_scalar("SELECT version FROM migrations")
        .fetch_one(pool)
        .await
    {
        Ok(version) => version,
        Err(_) => {
            pool.execute(
                "CREATE TABLE migrations (version BIGINT NOT NULL); \
                 INSERT INTO migrations (version) VALUES (0);",
            )
            .await?;
            0
        }
    };
    for (target, sql) in MIGRATIONS {
        if *target <= version {
            continue;
        }
        info!(version = *target, "applying schema migration");
        pool.execute(*sql).await?;
        sqlx::query("UPDATE migrations SET version = $1")
            .bind(target)
            .execute(pool)
            .await?;
        version = *target;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn munged_tags_keep_single_char_values_only() {
        let event = Event {
            tags: vec![
                vec!["e".into(), "f".into()],
                vec!["e".into(), "g".into()],
                vec!["p".into(), "deadbeef".into()],
                vec!["alone".into()],
            ],
            ..Default::default()
        };
        let munged = munge_tags(&event);
        assert_eq!(munged.len(), 1);
        assert_eq!(munged["e"], vec!["f", "g"]);
    }

    #[test]
    fn where_clause_is_a_disjunction_of_conjunctions() {
        let filters = vec![
            Filter {
                ids: vec!["a".into()],
                kinds: vec![1],
                since: 5,
                ..Default::default()
            },
            Filter {
                authors: vec!["b".into()],
                until: 9,
                ..Default::default()
            },
        ];
        let mut query = QueryBuilder::new("SELECT 1 FROM events");
        push_where(&mut query, &filters);
        let sql = query.sql();
        assert_eq!(
            sql,
            "SELECT 1 FROM events WHERE (id = ANY($1) AND kind = ANY($2) \
             AND created_at >= $3) OR (pubkey = ANY($4) AND created_at <= $5)"
        );
    }

    #[test]
    fn empty_filter_lowers_to_true() {
        let mut query = QueryBuilder::new("DELETE FROM events");
        push_where(&mut query, &[Filter::default()]);
        assert_eq!(query.sql(), "DELETE FROM events WHERE (TRUE)");
    }

    #[test]
    fn tag_values_are_or_ed_within_a_name() {
        let mut filter = Filter::default();
        filter
            .tag_filters
            .insert("e".into(), vec!["x".into(), "y".into()]);
        let mut query = QueryBuilder::new("SELECT 1 FROM events");
        push_where(&mut query, std::slice::from_ref(&filter));
        assert_eq!(
            query.sql(),
            "SELECT 1 FROM events WHERE ((munged_tags @> $1 OR munged_tags @> $2))"
        );
    }
}
