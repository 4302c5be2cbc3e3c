//! Restart-on-failure supervision of the bot.
//!
//! A transport failure or a panic tears the whole bot down. After a fixed
//! backoff it reconnects and announces itself again. Queue, want-lists and
//! any in-flight session are lost across restarts; the ledger is kept and
//! re-synced from the server.

use anyhow::{bail, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::bot::TradeBot;
use crate::config::BotConfig;
use crate::gateway;
use crate::inventory::Ledger;
use crate::pricing::PricingEngine;
use crate::resolver::ItemResolver;
use crate::session::SessionContext;
use crate::storage::TradeLogChannel;
use crate::transport::Transport;

/// Lobby greeting after a restart
pub const RESTART_HELLO: &str = "I live again!";

/// State that outlives a single connection
#[derive(Clone)]
pub struct BotServices {
    pub config: Arc<BotConfig>,
    pub ledger: Arc<dyn Ledger>,
    pub pricing: PricingEngine,
    pub resolver: ItemResolver,
    pub trade_log: Option<TradeLogChannel>,
}

impl BotServices {
    pub fn session_context(&self, transport: Arc<dyn Transport>) -> SessionContext {
        SessionContext {
            transport,
            ledger: self.ledger.clone(),
            pricing: self.pricing.clone(),
            resolver: self.resolver.clone(),
            trade_log: self.trade_log.clone(),
            config: self.config.clone(),
        }
    }
}

/// One connection lifetime: connect, run the bot until it fails
pub async fn run_connected(services: BotServices, hello: Option<&'static str>) -> Result<()> {
    let conn = gateway::connect(&services.config).await?;
    let ctx = services.session_context(Arc::new(conn.transport));
    let result = TradeBot::new(ctx).run(conn.events, hello).await;
    conn.pump.abort();
    result
}

/// Run `start` under supervision.
///
/// Each attempt runs as its own task so a panic is caught as a join error.
/// The first attempt gets no greeting, restarts get [`RESTART_HELLO`].
/// Returns when an attempt finishes cleanly or `max_restarts` is exhausted.
pub async fn supervise<F, Fut>(backoff: Duration, max_restarts: Option<u32>, mut start: F) -> Result<()>
where
    F: FnMut(Option<&'static str>) -> Fut,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut hello = None;
    let mut restarts = 0u32;

    loop {
        match tokio::spawn(start(hello)).await {
            Ok(Ok(())) => {
                info!("[SUPERVISOR] Bot stopped cleanly");
                return Ok(());
            }
            Ok(Err(e)) => error!("[SUPERVISOR] Bot failed: {:#}", e),
            Err(e) => error!("[SUPERVISOR] Bot task aborted: {}", e),
        }

        if max_restarts.is_some_and(|max| restarts >= max) {
            bail!("giving up after {} restarts", restarts);
        }
        restarts += 1;
        warn!("[SUPERVISOR] Restarting in {}s (restart #{})", backoff.as_secs(), restarts);
        tokio::time::sleep(backoff).await;
        hello = Some(RESTART_HELLO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[tokio::test(start_paused = true)]
    async fn test_restarts_with_greeting_until_clean_exit() {
        let hellos: Arc<Mutex<Vec<Option<&'static str>>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = hellos.clone();

        let started = tokio::time::Instant::now();
        let result = supervise(Duration::from_secs(5), None, move |hello| {
            let seen = seen.clone();
            async move {
                let attempt = {
                    let mut seen = seen.lock();
                    seen.push(hello);
                    seen.len()
                };
                match attempt {
                    1 => bail!("socket closed"),
                    2 => panic!("boom"),
                    _ => Ok(()),
                }
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(*hellos.lock(), vec![None, Some(RESTART_HELLO), Some(RESTART_HELLO)]);
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_restarts() {
        let result = supervise(Duration::from_secs(1), Some(2), |_| async { bail!("down") }).await;
        assert!(result.unwrap_err().to_string().contains("2 restarts"));
    }
}
