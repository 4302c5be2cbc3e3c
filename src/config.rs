//! System configuration: timing constants and environment parsing.
//!
//! Everything tunable at deploy time is read from the environment by
//! [`BotConfig::from_env`]. Trade session deadlines are constants collected in
//! [`SessionTimings`] so tests can shrink them.

use std::time::Duration;

/// Default websocket relay the gateway connects to
pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:4100/v1/json";

/// Public room the bot lives in
pub const DEFAULT_LOBBY_ROOM: &str = "clockwork";

/// Channel name the transport uses for private messages
pub const WHISPER_CHANNEL: &str = "WHISPER";

/// Prefix of the per-trade rooms assigned by the server
pub const TRADE_ROOM_PREFIX: &str = "trade-";

/// Sender name of server-generated room messages ("Trade ended", ...)
pub const DEFAULT_SYSTEM_SENDER: &str = "Scrolls";

/// External price page
pub const DEFAULT_PRICE_SOURCE_URL: &str = "http://www.scrollsguide.com/trade";

/// How often the price table is refreshed (seconds)
pub const DEFAULT_PRICE_REFRESH_SECS: u64 = 30 * 60;

/// Delay before the supervisor restarts a crashed bot (seconds)
pub const DEFAULT_RESTART_BACKOFF_SECS: u64 = 5;

/// Gateway keepalive ping interval (seconds)
pub const GATEWAY_PING_INTERVAL_SECS: u64 = 30;

/// No inbound frame for this long means the connection is dead (seconds)
pub const GATEWAY_STALE_SECS: u64 = 120;

/// Capacity of the per-session event channel
pub const SESSION_CHANNEL_CAPACITY: usize = 256;

/// Time to wait for a trade invite to be accepted
pub const INVITE_TIMEOUT_SECS: u64 = 30;

/// Heartbeat of the negotiation loop
pub const HEARTBEAT_SECS: u64 = 1;

/// Idle time before the "closing in 30 seconds" warning
pub const IDLE_WARNING_SECS: u64 = 60;

/// Idle time before the trade is closed
pub const IDLE_TIMEOUT_SECS: u64 = 90;

/// Session age at which the one-minute warning is given
pub const LIFETIME_MINUTE_WARNING_SECS: u64 = 4 * 60;

/// Session age at which the ten-second warning is given
pub const LIFETIME_TEN_SECOND_WARNING_SECS: u64 = 4 * 60 + 50;

/// Hard session lifetime
pub const LIFETIME_SECS: u64 = 5 * 60;

/// Quiet period after an offer change before imbalance hints are given
pub const NUDGE_QUIET_SECS: u64 = 2;

/// Quiet period before the bot accepts a balanced trade
pub const AUTO_ACCEPT_QUIET_SECS: u64 = 7;

/// Deadlines that drive a trade session.
#[derive(Debug, Clone, Copy)]
pub struct SessionTimings {
    pub invite_timeout: Duration,
    pub heartbeat: Duration,
    pub idle_warning: Duration,
    pub idle_timeout: Duration,
    pub minute_warning: Duration,
    pub ten_second_warning: Duration,
    pub lifetime: Duration,
    pub nudge_quiet: Duration,
    pub auto_accept_quiet: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            invite_timeout: Duration::from_secs(INVITE_TIMEOUT_SECS),
            heartbeat: Duration::from_secs(HEARTBEAT_SECS),
            idle_warning: Duration::from_secs(IDLE_WARNING_SECS),
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
            minute_warning: Duration::from_secs(LIFETIME_MINUTE_WARNING_SECS),
            ten_second_warning: Duration::from_secs(LIFETIME_TEN_SECOND_WARNING_SECS),
            lifetime: Duration::from_secs(LIFETIME_SECS),
            nudge_quiet: Duration::from_secs(NUDGE_QUIET_SECS),
            auto_accept_quiet: Duration::from_secs(AUTO_ACCEPT_QUIET_SECS),
        }
    }
}

/// Runtime configuration of the bot
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Relay websocket URL
    pub gateway_url: String,

    /// Our own player name (used to orient trade views)
    pub bot_name: String,

    /// Public room to join and announce in
    pub lobby_room: String,

    /// Player who receives fault reports and may use `!say`
    pub operator: Option<String>,

    /// Partner whose trades are accepted without the balance check
    pub trusted_partner: Option<String>,

    /// Players whose commands are ignored
    pub banned_users: Vec<String>,

    /// Sender of server room notices
    pub system_sender: String,

    /// JSON file with the item catalog
    pub catalog_path: String,

    /// External price page
    pub price_source_url: String,

    /// Seconds between price refreshes
    pub price_refresh_secs: u64,

    /// SQLite file for settled trades
    pub trade_log_db: String,

    /// Seconds the supervisor waits before restarting
    pub restart_backoff_secs: u64,

    /// Gold kept out of trading
    pub gold_reserve: i64,

    /// Chance of appending the whisper tip to price replies
    pub tip_chance: f64,

    /// Session deadlines
    pub timings: SessionTimings,
}

impl BotConfig {
    pub fn from_env() -> Self {
        Self {
            gateway_url: std::env::var("GATEWAY_URL")
                .unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string()),

            bot_name: std::env::var("BOT_NAME").unwrap_or_else(|_| "Clockwork".to_string()),

            lobby_room: std::env::var("LOBBY_ROOM")
                .unwrap_or_else(|_| DEFAULT_LOBBY_ROOM.to_string()),

            operator: non_empty_var("OPERATOR"),

            trusted_partner: non_empty_var("TRUSTED_PARTNER").or_else(|| non_empty_var("OPERATOR")),

            banned_users: std::env::var("BANNED_USERS")
                .map(|v| parse_name_list(&v))
                .unwrap_or_default(),

            system_sender: std::env::var("SYSTEM_SENDER")
                .unwrap_or_else(|_| DEFAULT_SYSTEM_SENDER.to_string()),

            catalog_path: std::env::var("CATALOG_PATH").unwrap_or_else(|_| "catalog.json".to_string()),

            price_source_url: std::env::var("PRICE_SOURCE_URL")
                .unwrap_or_else(|_| DEFAULT_PRICE_SOURCE_URL.to_string()),

            price_refresh_secs: std::env::var("PRICE_REFRESH_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PRICE_REFRESH_SECS),

            trade_log_db: std::env::var("TRADE_LOG_DB").unwrap_or_else(|_| "trades.db".to_string()),

            restart_backoff_secs: std::env::var("RESTART_BACKOFF_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RESTART_BACKOFF_SECS),

            gold_reserve: std::env::var("GOLD_RESERVE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),

            tip_chance: std::env::var("TIP_CHANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.05),

            timings: SessionTimings::default(),
        }
    }

    /// Whether commands from this player are ignored
    pub fn is_banned(&self, player: &str) -> bool {
        self.banned_users.iter().any(|b| b.eq_ignore_ascii_case(player))
    }

    /// Whether this player bypasses the balance check on auto-accept
    pub fn is_trusted(&self, player: &str) -> bool {
        self.trusted_partner.as_deref() == Some(player)
    }

    /// Whether this player is the operator
    pub fn is_operator(&self, player: &str) -> bool {
        self.operator.as_deref() == Some(player)
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            bot_name: "Clockwork".to_string(),
            lobby_room: DEFAULT_LOBBY_ROOM.to_string(),
            operator: None,
            trusted_partner: None,
            banned_users: Vec::new(),
            system_sender: DEFAULT_SYSTEM_SENDER.to_string(),
            catalog_path: "catalog.json".to_string(),
            price_source_url: DEFAULT_PRICE_SOURCE_URL.to_string(),
            price_refresh_secs: DEFAULT_PRICE_REFRESH_SECS,
            trade_log_db: "trades.db".to_string(),
            restart_backoff_secs: DEFAULT_RESTART_BACKOFF_SECS,
            gold_reserve: 0,
            tip_chance: 0.0,
            timings: SessionTimings::default(),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_name_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Log file name (set LOG_FILE to override)
pub fn log_file() -> String {
    std::env::var("LOG_FILE").unwrap_or_else(|_| "system.log".to_string())
}
