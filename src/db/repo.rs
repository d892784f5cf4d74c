use super::model::{EntryRow, NotificationRow};
use super::query::{push_order_and_limit, push_predicate, Field, Predicate, Query};
use crate::error::StoreError;
use crate::model::{EntryRecord, Fingerprint, NewEntry, NotificationRecord};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::instrument;

pub type Pool = SqlitePool;

const ENTRY_COLUMNS: &str = "id, file_path, category, slug, status, entry_date, last_modified, \
                             title, body, more, meta, content_hash";

pub async fn init_pool(database_url: &str) -> anyhow::Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = if normalized.starts_with("sqlite::memory") {
        // Every connection to :memory: is a separate database; keep exactly one alive.
        SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&normalized)
            .await?
    } else {
        let options = SqliteConnectOptions::from_str(&normalized)?.create_if_missing(true);
        SqlitePool::connect_with(options).await?
    };
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and make sure the parent
/// directory exists. Other URLs pass through untouched.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let expanded = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&expanded).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }
    match query {
        Some(q) => format!("sqlite://{expanded}?{q}"),
        None => format!("sqlite://{expanded}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// The record store contract the indexer, view engine and notifier depend on.
///
/// Every write is a single-record statement; there are no multi-record
/// transactions, so readers never see a half-written record.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Insert or update the record for `entry.file_path`, returning its id.
    /// An existing record keeps its id.
    async fn upsert(&self, entry: &NewEntry) -> Result<i64, StoreError>;

    /// Remove the record for a file path. Returns whether one existed.
    async fn delete(&self, file_path: &str) -> Result<bool, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<EntryRecord>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<EntryRecord>, StoreError> {
        let query = Query {
            predicate: Predicate::eq(Field::Id, id),
            sort: Vec::new(),
            limit: Some(1),
        };
        Ok(self.query(&query).await?.into_iter().next())
    }

    /// Id and content hash of every indexed file, keyed by file path.
    async fn fingerprints(&self) -> Result<HashMap<String, Fingerprint>, StoreError>;

    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), StoreError>;

    async fn notifications(&self, entry_id: i64) -> Result<Vec<NotificationRecord>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl EntryStore for SqliteStore {
    #[instrument(skip_all, fields(path = %entry.file_path))]
    async fn upsert(&self, entry: &NewEntry) -> Result<i64, StoreError> {
        let meta = serde_json::to_string(&entry.meta).unwrap_or_else(|_| "{}".to_string());
        let row = sqlx::query(
            "INSERT INTO entries (id, file_path, category, slug, status, entry_date, entry_ts, \
                                  last_modified, title, body, more, meta, content_hash) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(file_path) DO UPDATE SET \
                category = excluded.category, slug = excluded.slug, status = excluded.status, \
                entry_date = excluded.entry_date, entry_ts = excluded.entry_ts, \
                last_modified = excluded.last_modified, title = excluded.title, \
                body = excluded.body, more = excluded.more, meta = excluded.meta, \
                content_hash = excluded.content_hash \
             RETURNING id",
        )
        .bind(entry.requested_id)
        .bind(&entry.file_path)
        .bind(&entry.category)
        .bind(&entry.slug)
        .bind(entry.status.as_str())
        .bind(entry.entry_date.to_rfc3339())
        .bind(entry.entry_date.timestamp_millis())
        .bind(entry.last_modified.timestamp_millis())
        .bind(&entry.title)
        .bind(&entry.body)
        .bind(&entry.more)
        .bind(meta)
        .bind(&entry.content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>("id"))
    }

    #[instrument(skip_all, fields(path = %file_path))]
    async fn delete(&self, file_path: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM entries WHERE file_path = ?")
            .bind(file_path)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    #[instrument(skip_all)]
    async fn query(&self, query: &Query) -> Result<Vec<EntryRecord>, StoreError> {
        let mut qb =
            QueryBuilder::<Sqlite>::new(format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE "));
        push_predicate(&mut qb, &query.predicate);
        push_order_and_limit(&mut qb, query);
        let rows: Vec<EntryRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(EntryRecord::try_from).collect()
    }

    #[instrument(skip_all)]
    async fn fingerprints(&self) -> Result<HashMap<String, Fingerprint>, StoreError> {
        let rows = sqlx::query("SELECT id, file_path, content_hash FROM entries")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let fp = Fingerprint {
                    id: row.get("id"),
                    content_hash: row.get("content_hash"),
                };
                (row.get::<String, _>("file_path"), fp)
            })
            .collect())
    }

    #[instrument(skip_all, fields(entry_id = record.entry_id, target = %record.target))]
    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO webmentions_sent (entry_id, target, success, status_code, sent_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(record.entry_id)
        .bind(&record.target)
        .bind(record.success)
        .bind(record.status_code.map(i64::from))
        .bind(record.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn notifications(&self, entry_id: i64) -> Result<Vec<NotificationRecord>, StoreError> {
        let rows: Vec<NotificationRow> = sqlx::query_as(
            "SELECT entry_id, target, success, status_code, sent_at \
             FROM webmentions_sent WHERE entry_id = ? ORDER BY id ASC",
        )
        .bind(entry_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(NotificationRecord::from).collect())
    }
}
