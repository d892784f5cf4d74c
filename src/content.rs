//! Turns a content file on disk into an index record.
//!
//! A file is an optional block of `Key: value` headers, a blank line, the
//! body, and optionally a line of five or more dots followed by the extended
//! ("more") body.

use crate::config::Timezone;
use crate::error::ParseError;
use crate::model::{DeclaredStatus, Metadata, NewEntry};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;

/// File extensions the indexer picks up.
pub const ENTRY_EXTENSIONS: &[&str] = &["md", "htm", "html"];

static HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9_-]*):\s*(.*?)\s*$").expect("header regex"));
static MORE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\.{5,}[ \t]*\r?$").expect("more regex"));

pub fn is_entry_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| ENTRY_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

/// Everything the parser needs besides the file bytes.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext {
    pub timezone: Timezone,
    pub now: DateTime<Utc>,
}

/// Read and parse one file. `rel_path` is the path relative to the content
/// root, with `/` separators.
pub fn load_entry(
    abs_path: &Path,
    rel_path: &str,
    ctx: &ParseContext,
) -> Result<NewEntry, ParseError> {
    let bytes = std::fs::read(abs_path)?;
    let mtime: DateTime<Utc> = std::fs::metadata(abs_path)?.modified()?.into();
    parse_entry(&bytes, rel_path, mtime, ctx)
}

pub fn parse_entry(
    bytes: &[u8],
    rel_path: &str,
    mtime: DateTime<Utc>,
    ctx: &ParseContext,
) -> Result<NewEntry, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::InvalidUtf8)?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let (meta, rest) = split_headers(text)?;

    let (body, more) = match MORE_RE.find(rest) {
        Some(m) => (&rest[..m.start()], &rest[m.end()..]),
        None => (rest, ""),
    };

    let first = |key: &str| meta.get(key).and_then(|v| v.first()).map(String::as_str);

    let entry_date = match first("date") {
        Some(raw) => parse_date(raw, ctx.timezone)?,
        None => ctx.timezone.from_utc(mtime),
    };

    let mut status = match first("status") {
        Some(raw) => DeclaredStatus::parse(raw)
            .ok_or_else(|| ParseError::InvalidStatus(raw.to_string()))?,
        None => DeclaredStatus::Published,
    };
    if status == DeclaredStatus::Published && entry_date > ctx.now {
        status = DeclaredStatus::Scheduled;
    }

    let requested_id = first("entry-id")
        .map(|raw| {
            raw.parse::<i64>()
                .ok()
                .filter(|id| *id > 0)
                .ok_or_else(|| ParseError::InvalidId(raw.to_string()))
        })
        .transpose()?;

    let category = match first("category") {
        Some(raw) => normalize_category(raw),
        None => category_of(rel_path),
    };

    let title = first("title").map(str::to_string).filter(|t| !t.is_empty());
    let slug = first("slug-text")
        .map(slugify)
        .or_else(|| title.as_deref().map(slugify))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| slugify(file_stem(rel_path)));

    Ok(NewEntry {
        requested_id,
        file_path: rel_path.to_string(),
        category,
        slug,
        status,
        entry_date,
        last_modified: mtime,
        title,
        body: body.trim().to_string(),
        more: more.trim().to_string(),
        meta,
        content_hash: hex::encode(Sha256::digest(bytes)),
    })
}

fn split_headers(text: &str) -> Result<(Metadata, &str), ParseError> {
    let mut meta = Metadata::new();
    let mut offset = 0;
    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.trim().is_empty() {
            offset += line.len();
            break;
        }
        match HEADER_RE.captures(trimmed) {
            Some(caps) => {
                meta.entry(caps[1].to_ascii_lowercase())
                    .or_default()
                    .push(caps[2].to_string());
            }
            None if idx == 0 => return Ok((meta, text)),
            None => {
                return Err(ParseError::MalformedHeader {
                    line: idx + 1,
                    text: trimmed.to_string(),
                })
            }
        }
        offset += line.len();
    }
    Ok((meta, &text[offset..]))
}

/// Parse an entry date header; values without a zone use `tz`.
pub fn parse_date(raw: &str, tz: Timezone) -> Result<DateTime<FixedOffset>, ParseError> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%:z", "%Y-%m-%d %H:%M:%S %z", "%Y-%m-%d %H:%M%:z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Ok(dt);
        }
    }
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        });
    naive
        .and_then(|n| tz.localize(n))
        .ok_or_else(|| ParseError::InvalidDate(raw.to_string()))
}

/// Category from the directory part of a relative path.
pub fn category_of(rel_path: &str) -> String {
    match rel_path.rsplit_once('/') {
        Some((dir, _)) => normalize_category(dir),
        None => String::new(),
    }
}

/// Strip surrounding slashes and collapse empty segments.
pub fn normalize_category(raw: &str) -> String {
    raw.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

fn file_stem(rel_path: &str) -> &str {
    let name = rel_path.rsplit('/').next().unwrap_or(rel_path);
    name.rsplit_once('.').map_or(name, |(stem, _)| stem)
}

pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut dash = false;
    for c in text.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
