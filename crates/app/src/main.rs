use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jukebox_core::format::seconds_to_timestamp;
use jukebox_core::AppConfig;
use jukebox_engine::{BatchLimits, FetchDispatcher, FetchPipeline, Player, PlayerService, Resolution};
use jukebox_providers::ffplay::FfplaySink;
use jukebox_providers::{build_resolver, build_sink};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

mod console;
mod session;

use console::{parse_line, ConsoleGateway};
use session::{Flow, Session};

#[derive(Parser, Debug)]
#[command(
    name = "jukebox",
    about = "Shared playback queue driven by chat commands"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read `name: message` lines from stdin and play what they ask for.
    Run,
    Doctor,
    /// Resolve a link or search term and print what would be queued.
    Resolve {
        query: String,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run);
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg).await
        }
        Commands::Resolve { query } => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            resolve(&cfg, &query).await
        }
        Commands::Run => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            run(cfg).await
        }
    }
}

fn pipeline(cfg: &AppConfig) -> FetchPipeline {
    let resolver = Arc::new(build_resolver(&cfg.backend));
    FetchPipeline::new(resolver.clone(), resolver, cfg.fetch.max_query_len)
}

fn batch_limits(cfg: &AppConfig) -> BatchLimits {
    BatchLimits {
        max_count: cfg.preferences.max_playlist_length,
        max_item_length: cfg.preferences.max_song_length,
    }
}

async fn run(cfg: AppConfig) -> Result<()> {
    let (event_tx, mut events) = mpsc::unbounded_channel();
    let player = Player::new(cfg.preferences.default_volume)?.with_listener(Box::new(move |event| {
        // The receiver only goes away during shutdown.
        let _ = event_tx.send(event);
    }));
    let handle = PlayerService::spawn(player);

    let (dispatcher, mut outcomes) =
        FetchDispatcher::new(pipeline(&cfg), batch_limits(&cfg), cfg.fetch.max_in_flight);

    let backend = cfg.backend.clone();
    let prefix = cfg.command_prefix.clone();
    let mut session = Session::new(
        cfg,
        ConsoleGateway::new(),
        handle.clone(),
        dispatcher,
        Box::new(move || build_sink(&backend)),
    );
    session.start();

    info!(
        "jukebox started; type `name: {prefix}join` then `name: {prefix}play <link or search>`"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_line(&line) {
                    Ok(Some(msg)) => {
                        if session.handle_message(msg).await? == Flow::Shutdown {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => warn!(error=%err, "unreadable console line"),
                },
                Ok(None) => {
                    info!("stdin closed; shutting down");
                    break;
                }
                Err(err) => {
                    error!(error=%err, "failed to read stdin");
                    break;
                }
            },
            Some(outcome) = outcomes.recv() => {
                session.handle_fetch(outcome).await?;
            }
            Some(event) = events.recv() => {
                session.handle_player_event(event);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c; shutting down");
                break;
            }
        }
    }

    if handle.detach_sink().await.is_err() {
        warn!("player stopped before shutdown");
    }
    Ok(())
}

async fn doctor(cfg: &AppConfig) -> Result<()> {
    println!("== jukebox doctor ==");

    let resolver = build_resolver(&cfg.backend);
    match resolver.version().await {
        Ok(version) => println!("Resolver ({}): {version}", resolver.program()),
        Err(err) => println!("Resolver ({}): unavailable ({err:#})", resolver.program()),
    }

    if cfg.backend.player_program.trim().is_empty() {
        println!("Player: disabled; playback is silent and each item ends after its length");
    } else {
        let sink = FfplaySink::new(cfg.backend.player_program.clone());
        match sink.probe().await {
            Ok(()) => println!("Player ({}): ok", sink.program()),
            Err(err) => println!("Player ({}): unavailable ({err:#})", sink.program()),
        }
    }

    match cfg.validate() {
        Ok(()) => println!("Config: ok"),
        Err(err) => println!("Config: {err}"),
    }

    Ok(())
}

async fn resolve(cfg: &AppConfig, query: &str) -> Result<()> {
    let resolution = pipeline(cfg)
        .resolve(query, batch_limits(cfg))
        .await
        .with_context(|| format!("failed to resolve `{query}`"))?;

    if let Resolution::Batch(batch) = &resolution {
        println!("playlist: {} items, {} skipped", batch.items.len(), batch.skipped);
    }
    for item in resolution.into_items() {
        println!(
            "{} [{}] {}",
            item.display_title,
            seconds_to_timestamp(item.length_seconds),
            item.canonical_url.as_deref().unwrap_or(&item.source_locator)
        );
    }
    Ok(())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("jukebox").join("config.toml")
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg);
    cfg.validate()
        .with_context(|| format!("invalid configuration in {}", path.display()))?;
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Ok(v) = std::env::var("JUKEBOX_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.log_level = v;
        }
    }
    if let Ok(v) = std::env::var("JUKEBOX_OWNER_ID") {
        if !v.trim().is_empty() {
            cfg.permissions.owner_id = v;
        }
    }
    if let Ok(v) = std::env::var("JUKEBOX_DEFAULT_VOLUME") {
        if let Ok(parsed) = v.parse::<f32>() {
            cfg.preferences.default_volume = parsed;
        }
    }
}
