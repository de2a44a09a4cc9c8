use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use labcache_core::config::LabcacheConfig;
use labcache_core::models::{Catalog, OperationCategory, OperationKey, SubjectKey};
use labcache_core::persistence::{OperationHistoryStore, spawn_history_recorder};
use labcache_core::remote::{HttpJobSource, IsoFamily, StartRequest};
use labcache_core::sqlite::SqliteHistoryStore;
use labcache_core::tracking::{OperationTracker, StartReport, TrackerEvent};
use tokio::sync::broadcast::error::RecvError;

use crate::output;

const RECORDER_DRAIN: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(
    name = "labcache",
    about = "Start and follow image and ISO cache jobs on a lab orchestration server"
)]
pub struct Cli {
    /// JSON configuration file.
    #[arg(long, global = true, env = "LABCACHE_CONFIG")]
    config: Option<PathBuf>,
    /// Overrides `api.base_url` from the configuration.
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// SQLite file that records finished operations.
    #[arg(long, global = true, env = "LABCACHE_HISTORY_DB")]
    history_db: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull a container image into the cache.
    Pull(PullArgs),
    /// Build a container image from a definition file.
    Build(BuildArgs),
    /// Download an operating-system ISO.
    Iso(IsoArgs),
    /// Download an ISO from an arbitrary URL.
    CustomIso(CustomIsoArgs),
    /// Cancel a running job and stop tracking it.
    Cancel(CancelArgs),
    /// Attach to jobs that are already running and follow them.
    Watch(WatchArgs),
    /// Show recently finished operations.
    History(HistoryArgs),
}

#[derive(Args)]
struct FollowArgs {
    /// Return as soon as the job is accepted.
    #[arg(long)]
    detach: bool,
}

#[derive(Args)]
struct PullArgs {
    reference: String,
    #[command(flatten)]
    follow: FollowArgs,
}

#[derive(Args)]
struct BuildArgs {
    tag: String,
    #[arg(long)]
    definition: PathBuf,
    #[command(flatten)]
    follow: FollowArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum FamilyArg {
    Linux,
    Windows,
}

impl From<FamilyArg> for IsoFamily {
    fn from(value: FamilyArg) -> Self {
        match value {
            FamilyArg::Linux => IsoFamily::Linux,
            FamilyArg::Windows => IsoFamily::Windows,
        }
    }
}

#[derive(Args)]
struct IsoArgs {
    #[arg(value_enum)]
    family: FamilyArg,
    version: String,
    #[arg(long)]
    arch: Option<String>,
    #[arg(long)]
    source_url: Option<String>,
    #[command(flatten)]
    follow: FollowArgs,
}

#[derive(Args)]
struct CustomIsoArgs {
    filename: String,
    #[arg(long)]
    url: String,
    #[command(flatten)]
    follow: FollowArgs,
}

#[derive(Args)]
struct CancelArgs {
    /// One of image-pull, image-build, linux-iso, windows-iso, custom-iso.
    #[arg(value_parser = parse_category)]
    category: OperationCategory,
    subject: String,
    #[arg(long)]
    arch: Option<String>,
}

#[derive(Args)]
struct WatchArgs {
    /// JSON catalog of known subjects, checked one by one for categories
    /// without an active-job listing.
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long, default_value_t = 20)]
    limit: usize,
    #[arg(long)]
    json: bool,
}

struct AppContext {
    tracker: OperationTracker,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = LabcacheConfig::load(cli.config.as_deref())?;
    if let Some(url) = cli.api_url {
        config.api.base_url = url;
        config.validate()?;
    }

    let history = match cli.history_db {
        Some(path) => {
            let store = SqliteHistoryStore::new(path);
            store
                .migrate_to_latest()
                .with_context(|| format!("opening history at {}", store.database_path().display()))?;
            Some(Arc::new(store))
        }
        None => None,
    };

    if let Command::History(args) = &cli.command {
        return handle_history(history.as_deref(), args);
    }

    let source = Arc::new(HttpJobSource::new(&config.api));
    tracing::debug!(base_url = source.base_url(), "using job service");
    let tracker = OperationTracker::new(source, config.tracker);
    let session = tracker.session_guard();
    let recorder = history
        .map(|store| spawn_history_recorder(&tracker, store as Arc<dyn OperationHistoryStore>));
    let ctx = AppContext { tracker };

    let result = dispatch(&ctx, cli.command).await;

    // The recorder stops once every tracker handle is gone.
    drop(ctx);
    drop(session);
    if let Some(recorder) = recorder
        && tokio::time::timeout(RECORDER_DRAIN, recorder).await.is_err()
    {
        tracing::warn!("history recorder did not finish before exit");
    }
    result
}

async fn dispatch(ctx: &AppContext, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Pull(args) => {
            let request = StartRequest::ImagePull {
                reference: args.reference,
            };
            handle_start(ctx, request, &args.follow).await
        }
        Command::Build(args) => {
            let definition = std::fs::read_to_string(&args.definition).with_context(|| {
                format!("reading build definition {}", args.definition.display())
            })?;
            let request = StartRequest::ImageBuild {
                tag: args.tag,
                definition,
            };
            handle_start(ctx, request, &args.follow).await
        }
        Command::Iso(args) => {
            let request = StartRequest::OsIso {
                family: args.family.into(),
                version: args.version,
                arch: args.arch,
                source_url: args.source_url,
            };
            handle_start(ctx, request, &args.follow).await
        }
        Command::CustomIso(args) => {
            let request = StartRequest::CustomIso {
                filename: args.filename,
                source_url: args.url,
            };
            handle_start(ctx, request, &args.follow).await
        }
        Command::Cancel(args) => {
            let key = OperationKey::new(
                args.category,
                SubjectKey::with_arch(args.subject, args.arch),
            );
            ctx.tracker.cancel(&key).await?;
            println!("cancelled {key}");
            Ok(())
        }
        Command::Watch(args) => handle_watch(ctx, args).await,
        Command::History(_) => Ok(()),
    }
}

async fn handle_start(
    ctx: &AppContext,
    request: StartRequest,
    follow: &FollowArgs,
) -> anyhow::Result<()> {
    let key = request.key();
    // Subscribe first so the first poll cannot slip past us.
    let events = ctx.tracker.subscribe();

    match ctx.tracker.start(request).await? {
        StartReport::Started { .. } => println!("started {key}"),
        StartReport::AlreadyActive { detail, .. } => {
            println!("{key} is already running{}", output::detail_suffix(detail.as_deref()));
        }
        StartReport::AlreadySatisfied { detail } => {
            println!("{key} is already cached{}", output::detail_suffix(detail.as_deref()));
            return Ok(());
        }
    }

    if follow.detach || !ctx.tracker.is_busy(&key) {
        return Ok(());
    }
    follow_operation(ctx, &key, events).await
}

async fn follow_operation(
    ctx: &AppContext,
    key: &OperationKey,
    mut events: tokio::sync::broadcast::Receiver<TrackerEvent>,
) -> anyhow::Result<()> {
    loop {
        let event = tokio::select! {
            received = events.recv() => received,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted; cancelling {key}");
                ctx.tracker.cancel(key).await?;
                return Ok(());
            }
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "progress output skipped events");
                continue;
            }
            Err(RecvError::Closed) => return Ok(()),
        };
        if event.key() != key {
            continue;
        }

        match event {
            TrackerEvent::Progress { snapshot } => output::print_snapshot(&snapshot),
            TrackerEvent::Finished { snapshot } => {
                output::print_snapshot(&snapshot);
                return match snapshot.error {
                    Some(error) => Err(anyhow!("{key} failed: {error}")),
                    None => Ok(()),
                };
            }
            TrackerEvent::Lost { reason, .. } => {
                bail!("lost track of {key}: {reason}");
            }
            TrackerEvent::Cancelled { .. } => return Ok(()),
            _ => {}
        }
    }
}

async fn handle_watch(ctx: &AppContext, args: WatchArgs) -> anyhow::Result<()> {
    let catalog = match &args.catalog {
        Some(path) => Catalog::load(path)?,
        None => Catalog::default(),
    };
    let mut events = ctx.tracker.subscribe();
    let report = ctx.tracker.resume(&catalog).await?;
    for failure in &report.failures {
        eprintln!("warning: {failure}");
    }
    println!(
        "resumed {} operation(s) using {} request(s)",
        report.resumed.len(),
        report.requests
    );
    output::print_view(&ctx.tracker.view());

    while ctx.tracker.live_timer_count() > 0 {
        let event = tokio::select! {
            received = events.recv() => received,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("interrupted; leaving remote jobs running");
                return Ok(());
            }
        };
        match event {
            Ok(event) => output::print_event(&event),
            Err(RecvError::Lagged(_)) => output::print_view(&ctx.tracker.view()),
            Err(RecvError::Closed) => break,
        }
    }
    Ok(())
}

fn handle_history(
    history: Option<&SqliteHistoryStore>,
    args: &HistoryArgs,
) -> anyhow::Result<()> {
    let Some(store) = history else {
        bail!("no history database configured; pass --history-db or set LABCACHE_HISTORY_DB");
    };
    let records = store.list_recent(args.limit)?;
    if args.json {
        let rendered = serde_json::to_string_pretty(&output::history_json(&records))?;
        println!("{rendered}");
    } else {
        output::print_history(&records);
    }
    Ok(())
}

fn parse_category(raw: &str) -> Result<OperationCategory, String> {
    raw.parse().map_err(|()| {
        let known: Vec<&str> = OperationCategory::ALL
            .iter()
            .map(|category| category.as_str())
            .collect();
        format!("unknown category '{raw}', expected one of {}", known.join(", "))
    })
}
