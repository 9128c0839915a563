//! Gift market sniper CLI.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gift_sniper::buyer::AutoBuyer;
use gift_sniper::client::{load_accounts, ClientPool, MarketApi};
use gift_sniper::config::Config;
use gift_sniper::error::BotError;
use gift_sniper::notify::{DealSink, Notifier, TelegramSink};
use gift_sniper::scanner::{MarketScanner, DEALS_CHANNEL_CAPACITY};
use gift_sniper::score;
use gift_sniper::storage::{Database, GiftRepository, GiftStore, GiftTypeRepository, GiftTypeStore};
use gift_sniper::telegram::CommandBot;
use gift_sniper::valuator::{RuntimeSettings, Valuator};

#[derive(Parser)]
#[command(name = "gift-sniper")]
#[command(about = "Arbitrage sniper for the gift resale market")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sniper: scanner, notifier, auto-buyer and command bot
    Run,
    /// Sync the gift-type catalog into the database and exit
    Sync,
    /// Rate the aesthetic value of a serial number
    Score { num: i64 },
    /// Send a test notification to the operator chat
    TestNotify,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run => run(Config::from_env()?).await,
        Commands::Sync => sync(Config::from_env()?).await,
        Commands::Score { num } => {
            print_score(num);
            Ok(())
        }
        Commands::TestNotify => test_notify(Config::from_env()?).await,
    }
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    tracing::info!("starting gift sniper");

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let db = Database::connect(&cfg.postgres).await?;
    db.ping().await?;
    tracing::info!("database connection OK");

    let gift_type_store: Arc<dyn GiftTypeStore> = Arc::new(GiftTypeRepository::new(db.pool()));
    let gift_store: Arc<dyn GiftStore> = Arc::new(GiftRepository::new(db.pool()));

    let (pool, client_count) = start_pool(&cfg, &shutdown).await?;
    let api: Arc<dyn MarketApi> = pool;

    let settings = Arc::new(RuntimeSettings::new());
    let valuator = Arc::new(Valuator::new(
        gift_type_store.clone(),
        gift_store,
        api.clone(),
        settings.clone(),
    ));
    let buyer = Arc::new(AutoBuyer::new(api, settings.clone()));

    let sink = TelegramSink::new(cfg.bot.token.clone(), cfg.bot.admin_id)?;
    if let Err(err) = sink.send_html("🚀 Gift sniper is starting").await {
        tracing::warn!(error = %err, "startup notification failed");
    }

    let (deals_tx, deals_rx) = mpsc::channel(DEALS_CHANNEL_CAPACITY);
    let notifier = Notifier::new(sink);
    let notifier_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(err) = notifier.run(deals_rx, shutdown).await {
                if !matches!(err, BotError::Cancelled) {
                    tracing::error!(error = %err, "notifier stopped");
                }
            }
        })
    };

    let scanner = Arc::new(
        MarketScanner::new(
            valuator.clone(),
            gift_type_store,
            buyer,
            deals_tx,
            shutdown.clone(),
        )
        .with_rate_control(cfg.telegram.rate_per_client(), client_count),
    );
    scanner.clone().start()?;
    tracing::info!("scanner started");

    let bot = CommandBot::new(&cfg.bot, scanner.clone(), settings, valuator)?;
    let bot_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { bot.run(shutdown).await })
    };

    shutdown.cancelled().await;
    tracing::info!("shutting down");
    scanner.stop().await;
    let _ = notifier_handle.await;
    let _ = bot_handle.await;
    tracing::info!("application stopped");
    Ok(())
}

async fn sync(cfg: Config) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let db = Database::connect(&cfg.postgres).await?;
    db.ping().await?;

    let gift_type_store: Arc<dyn GiftTypeStore> = Arc::new(GiftTypeRepository::new(db.pool()));
    let gift_store: Arc<dyn GiftStore> = Arc::new(GiftRepository::new(db.pool()));

    let (pool, _) = start_pool(&cfg, &shutdown).await?;
    let api: Arc<dyn MarketApi> = pool;

    let valuator = Valuator::new(
        gift_type_store,
        gift_store,
        api,
        Arc::new(RuntimeSettings::new()),
    );
    let result = valuator.sync_catalog().await?;
    println!(
        "Catalog sync: {} created, {} updated, {} errors",
        result.created, result.updated, result.errors
    );

    shutdown.cancel();
    Ok(())
}

async fn start_pool(
    cfg: &Config,
    shutdown: &CancellationToken,
) -> anyhow::Result<(Arc<ClientPool>, usize)> {
    let accounts = load_accounts(&cfg.telegram.accounts_path)?;
    tracing::info!(count = accounts.len(), "loaded accounts");

    let pool = Arc::new(ClientPool::new(&cfg.telegram, accounts)?);
    let client_count = pool.size();
    pool.start(shutdown.clone()).await?;
    Ok((pool, client_count))
}

fn print_score(num: i64) {
    let rating = score::rate(num);
    println!(
        "{num}: {} (score {:.0}, unique: {})",
        rating.description, rating.score, rating.is_unique
    );
}

async fn test_notify(cfg: Config) -> anyhow::Result<()> {
    let sink = TelegramSink::new(cfg.bot.token, cfg.bot.admin_id)?;
    sink.send_html("🧪 <b>Test notification</b>\n\nIf you can read this, the bot is wired up.")
        .await?;
    println!("Test notification sent");
    Ok(())
}

fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::error!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
