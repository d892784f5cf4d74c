//! Content scanner: walks the content tree and keeps the index in step with it.
use crate::content::{self, ParseContext};
use crate::context::AppContext;
use crate::dispatcher::Dispatcher;
use crate::error::{IndexError, ParseError};
use crate::model::DeclaredStatus;
use crate::publish::{effective_state, Visibility};
use crate::webmention::Pinger;
use chrono::{DateTime, FixedOffset, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

/// Outcome of one scan pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub files: usize,
    pub upserted: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub failed: usize,
    /// Earliest scheduled entry that is still hidden.
    pub next_scheduled: Option<DateTime<Utc>>,
    /// Entries that went live during this pass: new or changed entries that
    /// are publicly visible, and scheduled entries that came due.
    pub published: Vec<i64>,
}

impl ScanReport {
    pub fn writes(&self) -> usize {
        self.upserted + self.deleted
    }
}

/// Scan the configured content folder into the store.
///
/// Unchanged files (same content hash) are skipped unless `force` is set.
/// A file that fails to parse is logged and left as it was in the index.
pub async fn scan(ctx: &AppContext, force: bool) -> Result<ScanReport, IndexError> {
    scan_since(ctx, force, None).await
}

/// Like [`scan`], but also reports unchanged scheduled entries whose publish
/// time fell after `since` as published.
#[instrument(skip_all, fields(force = force))]
pub async fn scan_since(
    ctx: &AppContext,
    force: bool,
    since: Option<DateTime<Utc>>,
) -> Result<ScanReport, IndexError> {
    let root = ctx.config.index.content_folder.clone();
    let files = tokio::task::spawn_blocking(move || walk(&root)).await??;

    let known = ctx.store.fingerprints().await?;
    let parse_ctx = ParseContext {
        timezone: ctx.config.site.timezone,
        now: Utc::now(),
    };

    let mut report = ScanReport {
        files: files.len(),
        ..ScanReport::default()
    };
    let on_disk: HashSet<String> = files.iter().map(|(_, rel)| rel.clone()).collect();

    // Removals go first so a moved file can keep its entry id.
    for path in known.keys().filter(|p| !on_disk.contains(*p)) {
        if ctx.store.delete(path).await? {
            debug!(%path, "removed entry for missing file");
            report.deleted += 1;
        }
    }

    let mut parsed = stream::iter(files)
        .map(|(abs, rel)| {
            tokio::task::spawn_blocking(move || {
                let result = content::load_entry(&abs, &rel, &parse_ctx);
                (rel, result)
            })
        })
        .buffer_unordered(ctx.config.index.max_index_threads.max(1));

    while let Some(joined) = parsed.next().await {
        let (rel, result) = joined?;
        let mut entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                report.failed += 1;
                log_parse_failure(&rel, &err);
                continue;
            }
        };

        let state = effective_state(entry.status, &entry.entry_date, &parse_ctx.now, false);
        if entry.status == DeclaredStatus::Scheduled && state == Visibility::Hidden {
            let due = entry.entry_date.with_timezone(&Utc);
            report.next_scheduled = Some(report.next_scheduled.map_or(due, |d| d.min(due)));
        }

        let visible = state.is_visible();
        let existing = known.get(&rel);
        let changed = existing.map_or(true, |fp| fp.content_hash != entry.content_hash);
        if !force && !changed {
            report.unchanged += 1;
            if let Some(fp) = existing {
                if visible && came_due(entry.status, &entry.entry_date, since) {
                    report.published.push(fp.id);
                }
            }
            continue;
        }

        if let Some(wanted) = entry.requested_id {
            if existing.is_none() && id_taken(ctx, wanted, &rel).await? {
                warn!(path = %rel, id = wanted, "entry id already in use; assigning a new one");
                entry.requested_id = None;
            }
        }

        let id = ctx.store.upsert(&entry).await?;
        debug!(path = %rel, id, "indexed entry");
        report.upserted += 1;
        if visible && changed {
            report.published.push(id);
        }
    }
    report.published.sort_unstable();

    info!(
        files = report.files,
        upserted = report.upserted,
        unchanged = report.unchanged,
        deleted = report.deleted,
        failed = report.failed,
        published = report.published.len(),
        "scan complete"
    );
    Ok(report)
}

fn came_due(
    status: DeclaredStatus,
    entry_date: &DateTime<FixedOffset>,
    since: Option<DateTime<Utc>>,
) -> bool {
    status == DeclaredStatus::Scheduled && since.is_some_and(|since| *entry_date > since)
}

async fn id_taken(ctx: &AppContext, id: i64, rel: &str) -> Result<bool, IndexError> {
    Ok(ctx
        .store
        .get(id)
        .await?
        .is_some_and(|rec| rec.file_path != rel))
}

fn log_parse_failure(rel: &str, err: &ParseError) {
    warn!(path = %rel, error = %err, "skipping unparsable content file");
}

/// Recognized content files under `root` as (absolute, relative) pairs.
fn walk(root: &Path) -> Result<Vec<(PathBuf, String)>, IndexError> {
    std::fs::metadata(root).map_err(|source| IndexError::ContentRoot {
        path: root.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
    for item in walker {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                warn!(error = %err, "skipping unreadable path");
                continue;
            }
        };
        if !item.file_type().is_file() || !content::is_entry_file(item.path()) {
            continue;
        }
        let Ok(rel) = item.path().strip_prefix(root) else {
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        files.push((item.path().to_path_buf(), rel));
    }
    files.sort_by(|a, b| a.1.cmp(&b.1));
    Ok(files)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Whether a gated rescan is due.
pub fn should_rescan(
    force: bool,
    last_scan: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    interval_secs: u64,
) -> bool {
    match last_scan {
        _ if force => true,
        None => true,
        Some(last) => (now - last).num_milliseconds() > (interval_secs as i64).saturating_mul(1000),
    }
}

/// Process-wide timestamp holder, unset until first written. Tracks the last
/// completed scan and the next scheduled publish time.
#[derive(Debug)]
pub struct Watermark(AtomicI64);

const UNSET: i64 = i64::MIN;

impl Default for Watermark {
    fn default() -> Self {
        Self(AtomicI64::new(UNSET))
    }
}

impl Watermark {
    pub fn get(&self) -> Option<DateTime<Utc>> {
        match self.0.load(Ordering::Acquire) {
            UNSET => None,
            ms => crate::db::model::millis_to_utc(ms),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.0.store(at.timestamp_millis(), Ordering::Release);
    }

    pub fn clear(&self) {
        self.0.store(UNSET, Ordering::Release);
    }

    fn set_opt(&self, at: Option<DateTime<Utc>>) {
        match at {
            Some(at) => self.set(at),
            None => self.clear(),
        }
    }
}

/// Request-time rescan gate. Checking is cheap and never blocks: a due scan is
/// handed to the dispatcher, and only one gated scan runs at a time.
#[derive(Clone)]
pub struct Rescanner {
    dispatcher: Dispatcher,
    last_scan: Arc<Watermark>,
    next_scheduled: Arc<Watermark>,
    running: Arc<AtomicBool>,
    interval_secs: u64,
    pinger: Option<Pinger>,
}

impl Rescanner {
    pub fn new(dispatcher: Dispatcher, interval_secs: u64) -> Self {
        Self {
            dispatcher,
            last_scan: Arc::new(Watermark::default()),
            next_scheduled: Arc::new(Watermark::default()),
            running: Arc::new(AtomicBool::new(false)),
            interval_secs,
            pinger: None,
        }
    }

    /// Queue webmentions for entries each scan reports as published.
    pub fn with_pinger(mut self, pinger: Pinger) -> Self {
        self.pinger = Some(pinger);
        self
    }

    pub fn interval_secs(&self) -> u64 {
        self.interval_secs
    }

    pub fn last_scan(&self) -> Option<DateTime<Utc>> {
        self.last_scan.get()
    }

    /// Earliest scheduled entry still hidden as of the last scan.
    pub fn next_scheduled(&self) -> Option<DateTime<Utc>> {
        self.next_scheduled.get()
    }

    /// Record a scan that ran outside the gate (e.g. at startup).
    pub fn mark_scanned(&self, at: DateTime<Utc>, report: &ScanReport) {
        self.last_scan.set(at);
        self.next_scheduled.set_opt(report.next_scheduled);
    }

    /// Submit a scan if one is due. Returns whether a scan was submitted.
    /// With a zero interval only forced scans run.
    pub fn maybe_rescan(&self, force: bool) -> bool {
        if !force && self.interval_secs == 0 {
            return false;
        }
        if !should_rescan(force, self.last_scan.get(), Utc::now(), self.interval_secs) {
            return false;
        }
        self.start(force)
    }

    /// Submit an incremental scan regardless of the interval, e.g. when a
    /// scheduled entry comes due. Returns false if a scan is already running.
    pub fn rescan_due(&self) -> bool {
        self.start(false)
    }

    fn start(&self, force: bool) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let last_scan = Arc::clone(&self.last_scan);
        let next_scheduled = Arc::clone(&self.next_scheduled);
        let running = RunningGuard(Arc::clone(&self.running));
        let pinger = self.pinger.clone();
        let dispatcher = self.dispatcher.clone();
        self.dispatcher.submit("index-scan", move |ctx| async move {
            let _running = running;
            let started = Utc::now();
            let report = scan_since(&ctx, force, last_scan.get()).await?;
            last_scan.set(started);
            next_scheduled.set_opt(report.next_scheduled);
            if let Some(pinger) = pinger {
                pinger.ping_entries(&dispatcher, &report.published).await?;
            }
            Ok(())
        });
        true
    }
}

const MIN_WAKEUP: std::time::Duration = std::time::Duration::from_secs(1);
const MAX_WAKEUP: std::time::Duration = std::time::Duration::from_secs(300);

/// How long a watcher should sleep before asking the gate again: until the
/// rescan interval lapses or the next scheduled entry is due, whichever is
/// first, bounded to between one second and five minutes.
pub fn rescan_delay(
    interval_secs: u64,
    last_scan: Option<DateTime<Utc>>,
    next_scheduled: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> std::time::Duration {
    let interval_due = match (interval_secs, last_scan) {
        (0, _) => None,
        (_, None) => Some(now),
        (secs, Some(last)) => {
            Some(last + chrono::Duration::seconds(secs as i64) + chrono::Duration::milliseconds(1))
        }
    };
    let wake = match (interval_due, next_scheduled) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    wake.map_or(MAX_WAKEUP, |at| (at - now).to_std().unwrap_or_default())
        .clamp(MIN_WAKEUP, MAX_WAKEUP)
}

/// Clears the in-flight flag however the scan job ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
