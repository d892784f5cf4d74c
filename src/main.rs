use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use publ_index::config;
use publ_index::render::LinkRenderer;
use publ_index::scanner::{self, Rescanner};
use publ_index::view::{View, ViewSpec};
use publ_index::webmention::{self, Pinger, WebmentionClient};
use publ_index::{AppContext, Dispatcher, Entry};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan the content folder once and exit
    Scan {
        /// Re-index every file even if it is unchanged
        #[arg(long)]
        force: bool,
    },
    /// Scan, then keep rescanning on the configured interval and whenever a
    /// scheduled entry becomes due
    Watch,
    /// Print the entries of a view given as key=value options
    View {
        /// Print records as JSON lines
        #[arg(long)]
        json: bool,
        options: Vec<String>,
    },
    /// Send webmentions for every link in an entry
    Ping { entry_id: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;
    let ctx = AppContext::connect(cfg).await?;

    match args.command {
        Command::Scan { force } => {
            let report = scanner::scan(&ctx, force).await?;
            println!(
                "{} files: {} indexed, {} unchanged, {} removed, {} failed",
                report.files, report.upserted, report.unchanged, report.deleted, report.failed
            );
        }
        Command::Watch => watch(ctx).await?,
        Command::View { json, options } => {
            let pairs = options
                .iter()
                .map(|opt| {
                    opt.split_once('=')
                        .ok_or_else(|| anyhow!("expected key=value, got {opt:?}"))
                })
                .collect::<Result<Vec<_>>>()?;
            let spec = ViewSpec::from_args(pairs)?;
            let view = View::new(&ctx, spec)?;
            for entry in view.entries().await? {
                if json {
                    println!("{}", serde_json::to_string(entry.record())?);
                } else {
                    println!(
                        "{}\t{}\t{}\t{}",
                        entry.id(),
                        entry.entry_date().to_rfc3339(),
                        entry.category(),
                        entry.title().unwrap_or("")
                    );
                }
            }
            info!(last_modified = %view.last_modified().await?, "view complete");
        }
        Command::Ping { entry_id } => {
            let record = ctx
                .store
                .get(entry_id)
                .await?
                .with_context(|| format!("no entry with id {entry_id}"))?;
            let dispatcher = Dispatcher::from_config(ctx.clone());
            let sender = Arc::new(WebmentionClient::new()?);
            let queued =
                webmention::send_pings(&dispatcher, &Entry::from(record), &LinkRenderer, sender)?;
            info!(queued, "waiting for webmentions");
            dispatcher.wait_idle().await;
            for sent in ctx.store.notifications(entry_id).await? {
                println!(
                    "{}\t{}\t{}",
                    sent.target,
                    if sent.success { "ok" } else { "failed" },
                    sent.status_code.map_or("-".to_string(), |c| c.to_string())
                );
            }
        }
    }
    Ok(())
}

async fn watch(ctx: AppContext) -> Result<()> {
    let interval = ctx.config.index.index_rescan_interval;
    let dispatcher = Dispatcher::from_config(ctx.clone());
    let pinger = Pinger::new(Arc::new(LinkRenderer), Arc::new(WebmentionClient::new()?));
    let rescanner = Rescanner::new(dispatcher.clone(), interval).with_pinger(pinger);

    // entries already live at startup are not re-announced
    let started = Utc::now();
    let report = scanner::scan(&ctx, false).await?;
    rescanner.mark_scanned(started, &report);
    info!(interval, "watching content folder");

    loop {
        let wait = scanner::rescan_delay(
            interval,
            rescanner.last_scan(),
            rescanner.next_scheduled(),
            Utc::now(),
        );
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
            _ = tokio::time::sleep(wait) => {}
        }
        let due = rescanner
            .next_scheduled()
            .is_some_and(|at| at <= Utc::now());
        if due {
            rescanner.rescan_due();
        } else {
            rescanner.maybe_rescan(false);
        }
    }

    dispatcher.wait_idle().await;
    Ok(())
}
