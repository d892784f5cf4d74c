//! Read-side handle for one indexed entry.
use crate::model::{DeclaredStatus, EntryRecord};
use crate::publish::{effective_state, Visibility};
use crate::render::{RenderOptions, Renderer};
use anyhow::Context;
use chrono::{DateTime, FixedOffset, Utc};
use reqwest::Url;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    record: Arc<EntryRecord>,
}

impl From<EntryRecord> for Entry {
    fn from(record: EntryRecord) -> Self {
        Self {
            record: Arc::new(record),
        }
    }
}

impl Entry {
    pub fn record(&self) -> &EntryRecord {
        &self.record
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn title(&self) -> Option<&str> {
        self.record.title.as_deref()
    }

    pub fn category(&self) -> &str {
        &self.record.category
    }

    pub fn slug(&self) -> &str {
        &self.record.slug
    }

    pub fn status(&self) -> DeclaredStatus {
        self.record.status
    }

    pub fn entry_date(&self) -> DateTime<FixedOffset> {
        self.record.entry_date
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.record.last_modified
    }

    /// First value of a metadata header (case-insensitive).
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.record
            .meta
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn visibility(&self, now: DateTime<Utc>, include_future: bool) -> Visibility {
        effective_state(self.record.status, &self.record.entry_date, &now, include_future)
    }

    /// Absolute permalink: `{site}/{category}/{id}-{slug}`.
    pub fn permalink(&self, site_url: &str) -> anyhow::Result<Url> {
        let mut base = Url::parse(site_url).with_context(|| format!("invalid site url {site_url}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let leaf = if self.record.slug.is_empty() {
            self.record.id.to_string()
        } else {
            format!("{}-{}", self.record.id, self.record.slug)
        };
        let rel = if self.record.category.is_empty() {
            leaf
        } else {
            format!("{}/{}", self.record.category, leaf)
        };
        base.join(&rel)
            .with_context(|| format!("cannot build permalink for entry {}", self.record.id))
    }

    pub fn body(&self, renderer: &dyn Renderer, options: &RenderOptions) -> anyhow::Result<String> {
        renderer.render(&self.record.body, options)
    }

    pub fn more(&self, renderer: &dyn Renderer, options: &RenderOptions) -> anyhow::Result<String> {
        renderer.render(&self.record.more, options)
    }
}
