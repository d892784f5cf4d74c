use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Publish status as declared in a content file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DeclaredStatus {
    Draft,
    Scheduled,
    Published,
    Gone,
}

impl DeclaredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclaredStatus::Draft => "DRAFT",
            DeclaredStatus::Scheduled => "SCHEDULED",
            DeclaredStatus::Published => "PUBLISHED",
            DeclaredStatus::Gone => "GONE",
        }
    }

    /// Case-insensitive parse of a status header value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Some(DeclaredStatus::Draft),
            "SCHEDULED" => Some(DeclaredStatus::Scheduled),
            "PUBLISHED" => Some(DeclaredStatus::Published),
            "GONE" => Some(DeclaredStatus::Gone),
            _ => None,
        }
    }
}

/// Multi-valued metadata headers, keyed by lowercase header name.
pub type Metadata = BTreeMap<String, Vec<String>>;

/// An index record as written by the scanner. `requested_id` is the id the
/// file asks for; the store assigns one when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub requested_id: Option<i64>,
    pub file_path: String,
    pub category: String,
    pub slug: String,
    pub status: DeclaredStatus,
    pub entry_date: DateTime<FixedOffset>,
    pub last_modified: DateTime<Utc>,
    pub title: Option<String>,
    pub body: String,
    pub more: String,
    pub meta: Metadata,
    pub content_hash: String,
}

/// An index record as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: i64,
    pub file_path: String,
    pub category: String,
    pub slug: String,
    pub status: DeclaredStatus,
    pub entry_date: DateTime<FixedOffset>,
    pub last_modified: DateTime<Utc>,
    pub title: Option<String>,
    pub body: String,
    pub more: String,
    pub meta: Metadata,
    pub content_hash: String,
}

/// What the scanner needs to know about an already-indexed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    pub id: i64,
    pub content_hash: String,
}

/// One outbound notification attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub entry_id: i64,
    pub target: String,
    pub success: bool,
    pub status_code: Option<u16>,
    pub sent_at: DateTime<Utc>,
}
