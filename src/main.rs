use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use lobbyscope_api::{AntisniperApi, DenickApi, HypixelStatsApi, StatsApi, http_client};
use lobbyscope_logs::{LogTail, read_existing};
use lobbyscope_overlay::{
    Action, Coordinator, CoordinatorConfig, NickChangeHook, Settings, SettingsStore,
    TableRenderer, run_console,
};
use lobbyscope_stats::{NickDatabase, StatsCache, StatsResolver};

/// Lobbyscope - live Bed Wars lobby stats from the Minecraft client log
#[derive(Parser, Debug)]
#[command(name = "lobbyscope")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Client log to follow (latest.log or launcher_log.txt)
    #[arg(value_name = "LOGFILE")]
    logfile: Option<PathBuf>,

    /// Settings file (defaults to the user config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Start from the end of the log without replaying it
    #[arg(long)]
    no_fast_forward: bool,

    /// Override the number of concurrent stats fetches
    #[arg(long, value_name = "N")]
    max_fetches: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();

    let result = run_app(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run_app(args: Args) -> Result<()> {
    let settings_path = match args.config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load_or_create(&settings_path)?;
    if let Some(max) = args.max_fetches {
        settings.max_concurrent_fetches = max;
    }

    let logfile = args
        .logfile
        .or_else(|| settings.logfile.clone())
        .with_context(|| {
            format!(
                "no log file given; pass LOGFILE or set `logfile` in {}",
                settings_path.display()
            )
        })?;

    if !settings.has_hypixel_key() {
        warn!(
            path = %settings_path.display(),
            "no Hypixel API key configured, every lookup will fail"
        );
    }

    // Remote services
    let client = http_client()?;
    let stats_api: Arc<dyn StatsApi> =
        Arc::new(HypixelStatsApi::new(client.clone(), settings.hypixel_api_key.trim()));
    let denick_api: Option<Arc<dyn DenickApi>> = settings
        .antisniper_key()
        .map(|key| Arc::new(AntisniperApi::new(client.clone(), key)) as Arc<dyn DenickApi>);

    // Stats pipeline
    let cache = Arc::new(StatsCache::new(settings.ttl_policy()));
    let nicks = Arc::new(NickDatabase::from_entries(
        settings
            .known_nicks
            .iter()
            .map(|(nick, entry)| (nick.as_str(), entry.username.as_str())),
    ));
    let resolver = StatsResolver::new(
        Arc::clone(&cache),
        stats_api,
        denick_api,
        Arc::clone(&nicks),
        settings.resolver_config(),
    );

    let config = CoordinatorConfig {
        ranking: settings.ranking_config(),
        debounce: settings.debounce(),
    };
    let store = Arc::new(SettingsStore::new(settings_path, settings));
    let hook_store = Arc::clone(&store);
    let hook: NickChangeHook = Box::new(move |nick: &str, username: Option<&str>| {
        if let Err(e) = hook_store.set_known_nick(nick, username) {
            warn!(error = %e, "failed to save known nicks");
        }
    });
    let (mut coordinator, views) = Coordinator::new(cache, resolver, nicks, config);
    coordinator = coordinator.with_nick_hook(hook);

    // Catch up on the existing log, then follow it
    let offset = if args.no_fast_forward {
        tokio::fs::metadata(&logfile)
            .await
            .with_context(|| format!("failed to open {}", logfile.display()))?
            .len()
    } else {
        let (lines, offset) = read_existing(&logfile)
            .await
            .with_context(|| format!("failed to read {}", logfile.display()))?;
        coordinator.fast_forward(&lines);
        offset
    };

    let (line_tx, line_rx) = mpsc::unbounded_channel();
    let mut tail = LogTail::new(&logfile);
    tail.start(offset, line_tx);
    info!(path = %logfile.display(), offset, "following log");

    // No interactive input yet; keep the sender so the channel stays open
    let (_action_tx, action_rx) = mpsc::unbounded_channel::<Action>();

    let cancel = CancellationToken::new();
    let renderer = TableRenderer::new(std::io::stdout().is_terminal());
    let console = tokio::spawn(run_console(views, renderer, cancel.clone()));
    let pipeline = tokio::spawn(coordinator.run(line_rx, action_rx, cancel.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");
    cancel.cancel();

    tail.stop();
    pipeline.await.context("coordinator task panicked")?;
    console
        .await
        .context("console task panicked")?
        .context("failed to write to stdout")?;

    Ok(())
}
