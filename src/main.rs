//! Card Trading Bot
//!
//! Lives in the lobby of a card-trading game's chat, answers WTS/WTB and price
//! questions, and trades with queued players one at a time.
//!
//! ## Architecture
//!
//! - **Gateway** websocket pump turning relay frames into bot events
//! - **Bot loop** answering public commands and scheduling the trade queue
//! - **Trade sessions** negotiating card/gold offers as spawned tasks
//! - **Price refresher** pulling reference prices from the community price page
//! - **Trade log** persisted to SQLite on a dedicated writer thread
//! - **Supervisor** restarting everything after a transport failure

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use trade_bot::catalog::ItemCatalog;
use trade_bot::config::{log_file, BotConfig};
use trade_bot::inventory::{InventoryLedger, Ledger};
use trade_bot::price_feed::PriceFeed;
use trade_bot::pricing::{PriceTable, PricingEngine};
use trade_bot::resolver::ItemResolver;
use trade_bot::storage::create_trade_log_channel;
use trade_bot::supervisor::{run_connected, supervise, BotServices};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging with both stdout and file output
    let file_appender = tracing_appender::rolling::never(".", log_file());
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("trade_bot=info".parse().context("Invalid log directive")?);

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let config = Arc::new(BotConfig::from_env());
    info!("[BOT] Card trading bot starting as {}", config.bot_name);
    info!("[BOT]   Gateway: {}", config.gateway_url);
    info!("[BOT]   Lobby: {}", config.lobby_room);
    if let Some(operator) = &config.operator {
        info!("[BOT]   Operator: {}", operator);
    }

    let catalog = Arc::new(
        ItemCatalog::load(&config.catalog_path)
            .with_context(|| format!("Failed to load catalog from {}", config.catalog_path))?,
    );
    info!("[BOT] Loaded {} cards from {}", catalog.len(), config.catalog_path);

    // Reference prices: one synchronous fetch, then periodic refreshes
    let prices = Arc::new(PriceTable::new());
    let feed = PriceFeed::new(&config.price_source_url, catalog.clone(), prices.clone())?;
    match feed.refresh().await {
        Ok(n) => info!("[PRICES] Loaded {} reference prices", n),
        Err(e) => warn!("[PRICES] Initial fetch failed, pricing at rarity floors: {:#}", e),
    }
    tokio::spawn(feed.run(Duration::from_secs(config.price_refresh_secs)));

    let ledger: Arc<dyn Ledger> = Arc::new(InventoryLedger::new(&catalog, config.gold_reserve));

    let trade_log = create_trade_log_channel(&config.trade_log_db);
    info!("[STORAGE] Trade log: {}", config.trade_log_db);

    let services = BotServices {
        config: config.clone(),
        ledger,
        pricing: PricingEngine::new(catalog.clone(), prices),
        resolver: ItemResolver::new(catalog),
        trade_log: Some(trade_log.clone()),
    };

    let backoff = Duration::from_secs(config.restart_backoff_secs);
    let result = supervise(backoff, None, move |hello| run_connected(services.clone(), hello)).await;

    trade_log.shutdown();
    result
}
