use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use publ_index::config::{self, Config, Timezone};
use publ_index::db::{self, EntryStore, SqliteStore};
use publ_index::model::{DeclaredStatus, NewEntry};
use publ_index::render::LinkRenderer;
use publ_index::scanner::{self, Rescanner};
use publ_index::webmention::{send_ping, send_pings, MentionSender, Pinger};
use publ_index::{AppContext, Dispatcher, Entry};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Sender that records every call and answers from a per-target table.
/// Targets missing from the table fail like an unreachable host.
#[derive(Clone, Default)]
struct RecordingSender {
    responses: Arc<HashMap<String, Option<u16>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingSender {
    fn with_responses(responses: &[(&str, Option<u16>)]) -> Self {
        Self {
            responses: Arc::new(
                responses
                    .iter()
                    .map(|(url, code)| (url.to_string(), *code))
                    .collect(),
            ),
            ..Default::default()
        }
    }

    async fn targets(&self) -> Vec<String> {
        let mut targets: Vec<_> = self.calls.lock().await.iter().map(|(_, t)| t.clone()).collect();
        targets.sort();
        targets
    }
}

#[async_trait]
impl MentionSender for RecordingSender {
    async fn send(&self, source: &Url, target: &Url) -> Result<Option<u16>> {
        self.calls
            .lock()
            .await
            .push((source.to_string(), target.to_string()));
        self.responses
            .get(target.as_str())
            .copied()
            .ok_or_else(|| anyhow!("connection refused"))
    }
}

async fn context(cfg: Config) -> AppContext {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    AppContext::new(cfg, Arc::new(SqliteStore::new(pool)))
}

fn site_config(debug: bool) -> Config {
    let mut cfg: Config = serde_yaml::from_str(config::example()).unwrap();
    cfg.site.url = "https://site.example/".into();
    cfg.site.debug = debug;
    cfg
}

async fn setup(debug: bool) -> (AppContext, Entry) {
    let ctx = context(site_config(debug)).await;

    let id = ctx
        .store
        .upsert(&NewEntry {
            requested_id: Some(12),
            file_path: "blog/post.md".into(),
            category: "blog".into(),
            slug: "post".into(),
            status: DeclaredStatus::Published,
            entry_date: DateTime::parse_from_rfc3339("2021-05-01T00:00:00Z").unwrap(),
            last_modified: Utc::now(),
            title: Some("Post".into()),
            body: "See [a friend](https://friend.example/hi) and <a href=\"/about\">me</a>.".into(),
            more: "Again [a friend](https://friend.example/hi), plus <https://down.example/> \
                   and [mail](mailto:x@y.example)."
                .into(),
            meta: Default::default(),
            content_hash: "h".into(),
        })
        .await
        .unwrap();
    let record = ctx.store.get(id).await.unwrap().unwrap();
    (ctx, Entry::from(record))
}

#[tokio::test]
async fn pings_every_distinct_target_and_records_outcomes() {
    let (ctx, entry) = setup(false).await;
    let dispatcher = Dispatcher::new(ctx.clone(), 2);
    let sender = RecordingSender::with_responses(&[
        ("https://friend.example/hi", Some(202)),
        ("https://site.example/about", None),
    ]);

    let queued = send_pings(&dispatcher, &entry, &LinkRenderer, Arc::new(sender.clone())).unwrap();
    assert_eq!(queued, 3);
    dispatcher.wait_idle().await;

    assert_eq!(
        sender.targets().await,
        vec![
            "https://down.example/",
            "https://friend.example/hi",
            "https://site.example/about",
        ]
    );
    for (source, _) in sender.calls.lock().await.iter() {
        assert_eq!(source, "https://site.example/blog/12-post");
    }

    let mut sent = ctx.store.notifications(entry.id()).await.unwrap();
    sent.sort_by(|a, b| a.target.cmp(&b.target));
    let summary: Vec<_> = sent
        .iter()
        .map(|n| (n.target.as_str(), n.success, n.status_code))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("https://down.example/", false, None),
            ("https://friend.example/hi", true, Some(202)),
            ("https://site.example/about", false, None),
        ]
    );
}

#[tokio::test]
async fn debug_mode_sends_and_records_nothing() {
    let (ctx, entry) = setup(true).await;
    let dispatcher = Dispatcher::new(ctx.clone(), 2);
    let sender = RecordingSender::with_responses(&[]);

    let queued = send_pings(&dispatcher, &entry, &LinkRenderer, Arc::new(sender.clone())).unwrap();
    assert_eq!(queued, 3);
    dispatcher.wait_idle().await;

    assert!(sender.calls.lock().await.is_empty());
    assert!(ctx.store.notifications(entry.id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_send_is_recorded_and_reported() {
    let (ctx, entry) = setup(false).await;
    let sender = RecordingSender::with_responses(&[("https://gone.example/", Some(410))]);
    let source = Url::parse("https://site.example/blog/12-post").unwrap();

    send_ping(
        &ctx,
        &sender,
        entry.id(),
        &source,
        &Url::parse("https://gone.example/").unwrap(),
    )
    .await
    .unwrap();
    let err = send_ping(
        &ctx,
        &sender,
        entry.id(),
        &source,
        &Url::parse("https://unreachable.example/").unwrap(),
    )
    .await;
    assert!(err.is_err());

    let sent = ctx.store.notifications(entry.id()).await.unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!((sent[0].success, sent[0].status_code), (false, Some(410)));
    assert_eq!((sent[1].success, sent[1].status_code), (false, None));
}

#[tokio::test]
async fn rescans_announce_newly_published_entries() {
    let td = tempfile::tempdir().unwrap();
    let write = |rel: &str, content: &str| {
        let path = td.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    };
    write("blog/old.md", "Entry-ID: 1\n\nSee [old](https://old.example/).\n");

    let mut cfg = site_config(false);
    cfg.index.content_folder = td.path().to_path_buf();
    cfg.site.timezone = Timezone::parse("+00:00").unwrap();
    let ctx = context(cfg).await;
    let dispatcher = Dispatcher::new(ctx.clone(), 2);
    let sender = RecordingSender::with_responses(&[("https://friend.example/hi", Some(202))]);
    let pinger = Pinger::new(Arc::new(LinkRenderer), Arc::new(sender.clone()));
    let rescanner = Rescanner::new(dispatcher.clone(), 3600).with_pinger(pinger.clone());

    // what is already live before watching starts is not announced
    let report = scanner::scan(&ctx, false).await.unwrap();
    rescanner.mark_scanned(Utc::now(), &report);

    write("blog/new.md", "Entry-ID: 2\n\nHello [friend](https://friend.example/hi).\n");
    write(
        "blog/wip.md",
        "Entry-ID: 3\nStatus: DRAFT\n\nSee [draft](https://draft.example/).\n",
    );
    assert!(rescanner.rescan_due());
    dispatcher.wait_idle().await;

    assert_eq!(sender.targets().await, vec!["https://friend.example/hi"]);
    let sent = ctx.store.notifications(2).await.unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!((sent[0].success, sent[0].status_code), (true, Some(202)));
    assert!(ctx.store.notifications(1).await.unwrap().is_empty());
    assert!(ctx.store.notifications(3).await.unwrap().is_empty());

    // ids no longer in the store are skipped
    assert_eq!(pinger.ping_entries(&dispatcher, &[99]).await.unwrap(), 0);
}
