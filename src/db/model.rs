//! Row shapes returned by repository queries.
//!
//! Rows mirror the table columns; conversion into domain records lives here so
//! the repository stays focused on SQL.

use crate::error::StoreError;
use crate::model::{DeclaredStatus, EntryRecord, Metadata, NotificationRecord};
use chrono::{DateTime, TimeZone, Utc};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EntryRow {
    pub id: i64,
    pub file_path: String,
    pub category: String,
    pub slug: String,
    pub status: String,
    pub entry_date: String,
    pub last_modified: i64,
    pub title: Option<String>,
    pub body: String,
    pub more: String,
    pub meta: String,
    pub content_hash: String,
}

impl TryFrom<EntryRow> for EntryRecord {
    type Error = StoreError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |message: String| StoreError::Corrupt { id, message };
        let status = DeclaredStatus::parse(&row.status)
            .ok_or_else(|| corrupt(format!("unknown status {}", row.status)))?;
        let entry_date = DateTime::parse_from_rfc3339(&row.entry_date)
            .map_err(|e| corrupt(format!("bad entry_date {}: {e}", row.entry_date)))?;
        let last_modified = millis_to_utc(row.last_modified)
            .ok_or_else(|| corrupt(format!("bad last_modified {}", row.last_modified)))?;
        let meta: Metadata = serde_json::from_str(&row.meta)
            .map_err(|e| corrupt(format!("bad meta: {e}")))?;

        Ok(EntryRecord {
            id: row.id,
            file_path: row.file_path,
            category: row.category,
            slug: row.slug,
            status,
            entry_date,
            last_modified,
            title: row.title,
            body: row.body,
            more: row.more,
            meta,
            content_hash: row.content_hash,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct NotificationRow {
    pub entry_id: i64,
    pub target: String,
    pub success: bool,
    pub status_code: Option<i64>,
    pub sent_at: DateTime<Utc>,
}

impl From<NotificationRow> for NotificationRecord {
    fn from(row: NotificationRow) -> Self {
        NotificationRecord {
            entry_id: row.entry_id,
            target: row.target,
            success: row.success,
            status_code: row.status_code.and_then(|c| u16::try_from(c).ok()),
            sent_at: row.sent_at,
        }
    }
}

pub(crate) fn millis_to_utc(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
