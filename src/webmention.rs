//! Outbound webmentions: find the links in an entry and notify each target.
use crate::context::AppContext;
use crate::dispatcher::Dispatcher;
use crate::entry::Entry;
use crate::model::NotificationRecord;
use crate::render::{RenderOptions, Renderer};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{Client, Url};
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("anchor selector"));
static REL_LINKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("link[rel][href], a[rel][href]").expect("rel selector"));
static LINK_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([^>]*)>([^,<]*)").expect("link header regex"));
static REL_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i);\s*rel\s*=\s*(?:"([^"]*)"|([^\s;]+))"#).expect("rel regex"));

/// Distinct absolute http(s) URLs linked from `html`, resolved against `base`.
pub fn scan_outbound_links(html: &str, base: &Url) -> BTreeSet<Url> {
    let document = Html::parse_fragment(html);
    document
        .select(&ANCHORS)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| base.join(href.trim()).ok())
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .collect()
}

/// Delivers one notification. `Ok(None)` means the target advertises no
/// endpoint; otherwise the endpoint's HTTP status is returned.
#[async_trait]
pub trait MentionSender: Send + Sync {
    async fn send(&self, source: &Url, target: &Url) -> Result<Option<u16>>;
}

/// Webmention sender over HTTP: discovers the target's endpoint, then posts
/// the form-encoded `source` and `target`.
#[derive(Clone)]
pub struct WebmentionClient {
    http: Client,
}

impl fmt::Debug for WebmentionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebmentionClient").finish_non_exhaustive()
    }
}

impl WebmentionClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("publ-index/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }

    /// Find the webmention endpoint advertised by `target`.
    pub async fn discover(&self, target: &Url) -> Result<Option<Url>> {
        let res = self
            .http
            .get(target.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch {target}"))?;
        let base = res.url().clone();
        if let Some(endpoint) = endpoint_from_headers(res.headers(), &base) {
            return Ok(Some(endpoint));
        }
        let is_html = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map_or(true, |v| v.contains("html"));
        if !is_html {
            return Ok(None);
        }
        let body = res.text().await.context("failed to read target page")?;
        Ok(endpoint_from_html(&body, &base))
    }
}

#[async_trait]
impl MentionSender for WebmentionClient {
    async fn send(&self, source: &Url, target: &Url) -> Result<Option<u16>> {
        let Some(endpoint) = self.discover(target).await? else {
            return Ok(None);
        };
        debug!(%endpoint, "posting webmention");
        let res = self
            .http
            .post(endpoint)
            .form(&[("source", source.as_str()), ("target", target.as_str())])
            .send()
            .await
            .context("failed to reach webmention endpoint")?;
        Ok(Some(res.status().as_u16()))
    }
}

fn has_webmention_rel(rel: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|token| token.eq_ignore_ascii_case("webmention"))
}

/// Endpoint from a `Link: <...>; rel="webmention"` response header.
fn endpoint_from_headers(headers: &HeaderMap, base: &Url) -> Option<Url> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| LINK_VALUE.captures_iter(v))
        .find_map(|caps| {
            let params = caps.get(2)?.as_str();
            let rel = REL_PARAM.captures(params)?;
            let rel = rel.get(1).or_else(|| rel.get(2))?.as_str();
            has_webmention_rel(rel).then(|| base.join(&caps[1]).ok())?
        })
}

/// Endpoint from the first `<link>` or `<a>` whose rel includes webmention.
fn endpoint_from_html(html: &str, base: &Url) -> Option<Url> {
    let document = Html::parse_document(html);
    let found = document.select(&REL_LINKS).find(|el| {
        el.value()
            .attr("rel")
            .is_some_and(has_webmention_rel)
    })?;
    base.join(found.value().attr("href")?.trim()).ok()
}

/// Render both bodies of `entry`, collect their outbound links and queue one
/// notification job per distinct target. Returns the number of jobs queued.
#[instrument(skip_all, fields(entry_id = entry.id()))]
pub fn send_pings(
    dispatcher: &Dispatcher,
    entry: &Entry,
    renderer: &dyn Renderer,
    sender: Arc<dyn MentionSender>,
) -> Result<usize> {
    let permalink = entry.permalink(&dispatcher.context().config.site.url)?;
    let options = RenderOptions {
        base_url: Some(permalink.to_string()),
    };

    let mut targets = scan_outbound_links(&entry.body(renderer, &options)?, &permalink);
    targets.extend(scan_outbound_links(
        &entry.more(renderer, &options)?,
        &permalink,
    ));

    let count = targets.len();
    for target in targets {
        let sender = Arc::clone(&sender);
        let source = permalink.clone();
        let entry_id = entry.id();
        dispatcher.submit("webmention", move |ctx| async move {
            send_ping(&ctx, sender.as_ref(), entry_id, &source, &target).await
        });
    }
    debug!(count, "queued webmentions");
    Ok(count)
}

/// Queues webmentions for entries by id, typically the ones a scan reports
/// as newly published.
#[derive(Clone)]
pub struct Pinger {
    renderer: Arc<dyn Renderer>,
    sender: Arc<dyn MentionSender>,
}

impl fmt::Debug for Pinger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pinger").finish_non_exhaustive()
    }
}

impl Pinger {
    pub fn new(renderer: Arc<dyn Renderer>, sender: Arc<dyn MentionSender>) -> Self {
        Self { renderer, sender }
    }

    /// Queue pings for every listed entry still in the store. An entry whose
    /// links cannot be collected is logged and skipped. Returns the number of
    /// jobs queued.
    pub async fn ping_entries(&self, dispatcher: &Dispatcher, ids: &[i64]) -> Result<usize> {
        let mut queued = 0;
        for &id in ids {
            let Some(record) = dispatcher.context().store.get(id).await? else {
                continue;
            };
            let entry = Entry::from(record);
            match send_pings(dispatcher, &entry, self.renderer.as_ref(), Arc::clone(&self.sender)) {
                Ok(count) => queued += count,
                Err(err) => warn!(entry_id = id, error = %err, "could not queue webmentions"),
            }
        }
        Ok(queued)
    }
}

/// Send one notification and record the attempt. In debug mode nothing is
/// sent and nothing is recorded.
pub async fn send_ping(
    ctx: &AppContext,
    sender: &dyn MentionSender,
    entry_id: i64,
    source: &Url,
    target: &Url,
) -> Result<()> {
    info!(entry_id, %source, %target, "sending webmention");
    if ctx.config.site.debug {
        debug!("debug mode; not sending");
        return Ok(());
    }

    let outcome = sender.send(source, target).await;
    let status_code = match &outcome {
        Ok(Some(code)) => {
            info!(%target, status = code, "got response");
            Some(*code)
        }
        Ok(None) => {
            info!(%target, "endpoint not found");
            None
        }
        Err(_) => None,
    };
    let record = NotificationRecord {
        entry_id,
        target: target.to_string(),
        success: status_code.is_some_and(|c| (200..300).contains(&c)),
        status_code,
        sent_at: Utc::now(),
    };
    ctx.store.record_notification(&record).await?;
    outcome.map(|_| ())
}
