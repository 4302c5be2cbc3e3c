//! Bot event loop.
//!
//! Consumes the ordered [`BotEvent`] stream: answers public commands, feeds
//! the queue, and forwards trade-room traffic to the one active session.
//! Sessions run as spawned tasks and report back on a completion channel; the
//! next session starts only after that report is handled.

use anyhow::{bail, Result};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::catalog::Rarity;
use crate::command::{parse_list, Command, ParsedList};
use crate::config::{SESSION_CHANNEL_CAPACITY, TRADE_ROOM_PREFIX};
use crate::queue::{Advance, Enqueued, TradeQueue};
use crate::session::{run_session, SessionContext, SessionEvent, SessionOutcome};
use crate::storage::SessionRecord;
use crate::types::{BotEvent, CardInstance, ChatMessage, Gold, ProtocolRequest, Side};

const FORCE_WHISPER_NOTE: &str = "To avoid spamming the channel, please use this command only in whisper. \
    By the way, you can use any other command in whisper as well!";

const PRICE_TIP: &str = " By the way, you can whisper me with 'wtb/wts [list of cards]' to easily check prices \
    and availability for all cards you're interested in.";

const PUBLIC_HELP: &str = "You can whisper me WTS or WTB requests. If you're interested in trading, \
    you can queue up with '!trade'. You can also check the '!stock'.";

const LIST_REQUIRED: &str =
    "You need to add a list of cards to this command, separated by commas. Multipliers like '2x' are allowed.";

/// Reported by a session task when it finishes
#[derive(Debug)]
pub struct SessionCompletion {
    pub partner: String,
    pub outcome: SessionOutcome,
}

struct ActiveSession {
    partner: String,
    events: mpsc::Sender<SessionEvent>,
}

/// One reply produced by a public command
struct Reply {
    text: String,
    /// Deliver as whisper even when asked publicly
    force_whisper: bool,
}

impl Reply {
    fn public(text: String) -> Self {
        Self { text, force_whisper: false }
    }

    fn private(text: String) -> Self {
        Self { text, force_whisper: true }
    }
}

fn quantity_label(item: &str, n: u32, force: bool) -> String {
    if force || n != 1 {
        format!("{}x {}", n, item)
    } else {
        item.to_string()
    }
}

fn unknown_suffix(parsed: &ParsedList) -> String {
    if parsed.failed.is_empty() {
        String::new()
    } else {
        format!(" I don't know what '{}' is.", parsed.failed.join(", "))
    }
}

/// "2h 5m 3s"
pub fn format_uptime(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {}m {}s", h, m, s)
    } else if m > 0 {
        format!("{}m {}s", m, s)
    } else {
        format!("{}s", s)
    }
}

pub struct TradeBot {
    ctx: SessionContext,
    queue: TradeQueue,
    want_lists: FxHashMap<String, BTreeMap<String, u32>>,
    active: Option<ActiveSession>,

    // Inventory syncs held back while a session runs
    deferred_library: Option<Vec<CardInstance>>,
    deferred_gold: Option<Gold>,

    completion_tx: mpsc::Sender<SessionCompletion>,
    completion_rx: mpsc::Receiver<SessionCompletion>,
    started_at: Instant,
}

impl TradeBot {
    pub fn new(ctx: SessionContext) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(4);
        Self {
            ctx,
            queue: TradeQueue::new(),
            want_lists: FxHashMap::default(),
            active: None,
            deferred_library: None,
            deferred_gold: None,
            completion_tx,
            completion_rx,
            started_at: Instant::now(),
        }
    }

    pub fn queue(&self) -> &TradeQueue {
        &self.queue
    }

    pub fn want_list(&self, partner: &str) -> Option<&BTreeMap<String, u32>> {
        self.want_lists.get(partner)
    }

    fn lobby(&self) -> &str {
        &self.ctx.config.lobby_room
    }

    /// Run until the transport fails. Returns `Err` on disconnect.
    pub async fn run(mut self, mut events: mpsc::Receiver<BotEvent>, hello: Option<&str>) -> Result<()> {
        let lobby = self.lobby().to_string();
        self.ctx.transport.join(&lobby);
        if let Some(hello) = hello {
            self.ctx.transport.say(&lobby, hello);
        }
        self.request_inventory();
        info!("[BOT] {} listening in {}", self.ctx.config.bot_name, lobby);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(BotEvent::Disconnected(reason)) => bail!("transport disconnected: {}", reason),
                    Some(event) => self.handle_event(event).await,
                    None => bail!("event stream closed"),
                },
                Some(done) = self.completion_rx.recv() => self.on_session_complete(done),
            }
        }
    }

    fn request_inventory(&self) {
        self.ctx.transport.send_request(ProtocolRequest::LibraryView);
        self.ctx.transport.send_request(ProtocolRequest::ProfileDataInfo);
    }

    pub async fn handle_event(&mut self, event: BotEvent) {
        match event {
            BotEvent::Chat(msg) if msg.is_trade_room() => self.route(SessionEvent::Chat(msg)).await,
            BotEvent::Chat(msg) => self.handle_public(msg),
            BotEvent::RoomJoined(room) => {
                if room.starts_with(TRADE_ROOM_PREFIX) {
                    self.route(SessionEvent::RoomAssigned(room)).await;
                }
            }
            BotEvent::TradeResponse { accepted } => self.route(SessionEvent::InviteResponse(accepted)).await,
            BotEvent::TradeView(view) => {
                let snapshot = view.normalize(&self.ctx.config.bot_name);
                self.route(SessionEvent::Snapshot(snapshot)).await;
            }
            BotEvent::Library(cards) => {
                if self.active.is_some() {
                    debug!("[BOT] Deferring library sync ({} cards) until session ends", cards.len());
                    self.deferred_library = Some(cards);
                } else {
                    self.ctx.ledger.sync_library(cards);
                }
            }
            BotEvent::Gold(gold) => {
                if self.active.is_some() {
                    self.deferred_gold = Some(gold);
                } else {
                    self.ctx.ledger.sync_gold(gold);
                }
            }
            BotEvent::Disconnected(reason) => warn!("[BOT] Disconnect event outside run loop: {}", reason),
        }
    }

    async fn route(&self, event: SessionEvent) {
        match &self.active {
            Some(active) => {
                if active.events.send(event).await.is_err() {
                    debug!("[BOT] Session with {} already finished", active.partner);
                }
            }
            None => debug!("[BOT] No active session, dropping {:?}", event),
        }
    }

    // =========================================================================
    // SESSIONS
    // =========================================================================

    fn start_session(&mut self, partner: String) {
        let lobby = self.lobby().to_string();
        self.ctx.transport.say(&lobby, &self.queue.announcement());

        let want_list = self.want_lists.remove(&partner);
        let (tx, rx) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        self.active = Some(ActiveSession {
            partner: partner.clone(),
            events: tx,
        });

        let ctx = self.ctx.clone();
        let done = self.completion_tx.clone();
        tokio::spawn(async move {
            let task = tokio::spawn(run_session(ctx, partner.clone(), want_list, rx));
            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(e) => SessionOutcome::Faulted(format!("session task failed: {}", e)),
            };
            let _ = done.send(SessionCompletion { partner, outcome }).await;
        });
    }

    pub fn on_session_complete(&mut self, done: SessionCompletion) {
        self.active = None;
        let lobby = self.lobby().to_string();

        match &done.outcome {
            SessionOutcome::Settled { report, .. } => {
                if !report.newly_stocked.is_empty() {
                    let text = format!("I've just acquired {}.", report.newly_stocked.join(", "));
                    self.ctx.transport.say(&lobby, &text);
                }
                if !report.sold_out.is_empty() {
                    let text = format!("I've just sold my last {}.", report.sold_out.join(", "));
                    self.ctx.transport.say(&lobby, &text);
                }
            }
            other => {
                let detail = match other {
                    SessionOutcome::TimedOut(kind) => Some(format!("{:?}", kind)),
                    SessionOutcome::Faulted(reason) => Some(reason.clone()),
                    _ => None,
                };
                if let Some(log) = &self.ctx.trade_log {
                    log.record_session(SessionRecord::new(&done.partner, format!("{:?}", other.state()), detail));
                }
            }
        }

        // Syncs taken during a settled session predate the settlement
        let deferred = (self.deferred_library.take(), self.deferred_gold.take());
        if matches!(done.outcome, SessionOutcome::Settled { .. }) {
            if deferred.0.is_some() || deferred.1.is_some() {
                debug!("[BOT] Dropping inventory sync from before settlement, requesting a fresh one");
                self.ctx.transport.send_request(ProtocolRequest::LibraryView);
                self.ctx.transport.send_request(ProtocolRequest::ProfileDataInfo);
            }
        } else {
            if let Some(cards) = deferred.0 {
                self.ctx.ledger.sync_library(cards);
            }
            if let Some(gold) = deferred.1 {
                self.ctx.ledger.sync_gold(gold);
            }
        }

        match self.queue.complete() {
            Advance::Next(partner) => self.start_session(partner),
            Advance::Idle => self.ctx.transport.say(&lobby, &self.queue.announcement()),
        }
    }

    // =========================================================================
    // PUBLIC COMMANDS
    // =========================================================================

    fn handle_public(&mut self, msg: ChatMessage) {
        if msg.from == self.ctx.config.bot_name || self.ctx.config.is_banned(&msg.from) {
            return;
        }
        let Some(command) = Command::parse(&msg) else {
            return;
        };
        debug!("[BOT] {} in {}: {:?}", msg.from, msg.channel, command);

        let reply = match command {
            Command::Say(text) => {
                if self.ctx.config.is_operator(&msg.from) {
                    let lobby = self.lobby().to_string();
                    self.ctx.transport.say(&lobby, &text);
                }
                None
            }
            Command::ListRequired => Some(Reply::private(LIST_REQUIRED.to_string())),
            Command::Wts(list) => self.wts_reply(&list).map(Reply::private),
            Command::Wtb(list) => {
                let parsed = parse_list(&self.ctx.resolver, &list);
                let reply = self.wtb_reply(&parsed);
                self.want_lists.insert(msg.from.clone(), parsed.items);
                reply.map(Reply::private)
            }
            Command::Price(item) => Some(Reply::public(self.price_reply(&item))),
            Command::Missing => Some(Reply::private(self.missing_reply())),
            Command::Stock => Some(Reply::public(self.stock_reply())),
            Command::Help => Some(Reply::public(PUBLIC_HELP.to_string())),
            Command::Uptime => Some(Reply::public(format!(
                "Up since {}",
                format_uptime(self.started_at.elapsed())
            ))),
            Command::Trade => match self.queue.enqueue(&msg.from) {
                Enqueued::Started(partner) => {
                    self.start_session(partner);
                    None
                }
                queued => queued.reply().map(|text| {
                    if msg.is_whisper() {
                        Reply::public(text)
                    } else {
                        Reply::public(format!("{}: {}", msg.from, text))
                    }
                }),
            },
        };

        if let Some(reply) = reply {
            self.send_reply(&msg, reply);
        }
    }

    fn send_reply(&self, msg: &ChatMessage, reply: Reply) {
        let transport = &self.ctx.transport;
        if msg.is_whisper() {
            transport.whisper(&msg.from, &reply.text);
        } else if reply.force_whisper {
            transport.whisper(&msg.from, &reply.text);
            transport.whisper(&msg.from, FORCE_WHISPER_NOTE);
        } else {
            transport.say(&msg.channel, &reply.text);
        }
    }

    fn stock_of(&self, item: &str) -> u32 {
        self.ctx.ledger.stock(item).unwrap_or(0)
    }

    /// Quote for cards the player wants to sell us
    fn wts_reply(&self, list: &str) -> Option<String> {
        let parsed = parse_list(&self.ctx.resolver, list);
        let unknown = unknown_suffix(&parsed);
        if parsed.is_empty() {
            return (!unknown.is_empty()).then(|| unknown.trim_start().to_string());
        }

        let mut words = Vec::with_capacity(parsed.items.len());
        let mut sum: Gold = 0;
        for (item, &n) in &parsed.items {
            let gold = self.ctx.pricing.price(item, n, Side::Buy, self.stock_of(item));
            words.push(format!("{} {}g", quantity_label(item, n, false), gold));
            sum += gold;
        }

        let available = self.ctx.ledger.gold_for_trade();
        let verb = if sum > available { "would" } else { "will" };
        let total = if words.len() > 1 {
            format!(" That sums up to {}g.", sum)
        } else {
            String::new()
        };
        let budget = if sum > available {
            format!(" I currently only have {}g.", available)
        } else {
            String::new()
        };
        Some(format!("I {} pay {}.{}{}{}", verb, words.join(", "), total, budget, unknown))
    }

    /// Quote for cards the player wants to buy from us, capped at stock
    fn wtb_reply(&self, parsed: &ParsedList) -> Option<String> {
        let unknown = unknown_suffix(parsed);
        if parsed.is_empty() {
            return (!unknown.is_empty()).then(|| unknown.trim_start().to_string());
        }

        let mut words = Vec::new();
        let mut sum: Gold = 0;
        let mut has_all = true;
        for (item, &wanted) in &parsed.items {
            let stocked = self.stock_of(item);
            let capped = wanted > stocked;
            let n = wanted.min(stocked);
            if capped {
                has_all = false;
            }
            if n == 0 {
                continue;
            }
            let gold = self.ctx.pricing.price(item, n, Side::Sell, stocked);
            words.push(format!("{} {}g", quantity_label(item, n, capped), gold));
            sum += gold;
        }

        if words.is_empty() {
            let text = match parsed.items.iter().next() {
                Some((item, 1)) if parsed.items.len() == 1 => format!("I don't have {} stocked.", item),
                _ => "I don't have anything on that list stocked.".to_string(),
            };
            return Some(format!("{}{}", text, unknown));
        }

        let partial = if has_all { "" } else { " That's all I have." };
        let total = if words.len() > 1 {
            format!(" That sums up to {}g.", sum)
        } else {
            String::new()
        };
        Some(format!("I want to have {}.{}{}{}", words.join(", "), partial, total, unknown))
    }

    fn price_reply(&self, input: &str) -> String {
        let name = self.ctx.resolver.resolve(input);
        let pricing = &self.ctx.pricing;
        let mut reply = match self.ctx.ledger.stock(&name) {
            None => format!("There is no card named '{}'.", name),
            Some(0) => {
                let buy = pricing.price(&name, 1, Side::Buy, 0);
                let base = pricing.base_value(&name);
                if buy > self.ctx.ledger.gold_for_trade() {
                    format!(
                        "{} is out of stock. I would buy for {}g, but I don't have that much (base value {}g).",
                        name, buy, base
                    )
                } else {
                    format!("{} is out of stock. I'm buying for {}g (base value {}g).", name, buy, base)
                }
            }
            Some(stocked) => format!(
                "I'm buying {} for {}g and selling for {}g (base value {}g, {} stocked).",
                name,
                pricing.price(&name, 1, Side::Buy, stocked),
                pricing.price(&name, 1, Side::Sell, stocked),
                pricing.base_value(&name),
                stocked
            ),
        };

        if rand::random::<f64>() < self.ctx.config.tip_chance {
            reply.push_str(PRICE_TIP);
        }
        reply
    }

    fn missing_reply(&self) -> String {
        let missing: Vec<&str> = self
            .ctx
            .resolver
            .catalog()
            .names()
            .filter(|name| self.stock_of(name) == 0)
            .collect();
        if missing.is_empty() {
            "I have at least one of every card.".to_string()
        } else {
            format!("I currently don't have {}. I'm paying extra for that!", missing.join(", "))
        }
    }

    fn stock_reply(&self) -> String {
        let catalog = self.ctx.resolver.catalog();
        let mut by_rarity: BTreeMap<Rarity, u32> = BTreeMap::new();
        for card in self.ctx.ledger.library() {
            if let Some(rarity) = catalog.rarity(&card.item) {
                *by_rarity.entry(rarity).or_insert(0) += 1;
            }
        }

        let holdings = self.ctx.ledger.holdings();
        let gold = self.ctx.ledger.gold_for_trade();
        let card_value: Gold = holdings
            .iter()
            .map(|(item, &n)| self.ctx.pricing.price(item, n, Side::Sell, n))
            .sum();
        let owned_types = holdings.keys().filter(|item| catalog.contains(item)).count();
        let percent = if catalog.is_empty() {
            0
        } else {
            100 * owned_types / catalog.len()
        };

        let count = |r: Rarity| by_rarity.get(&r).copied().unwrap_or(0);
        format!(
            "I have {} commons, {} uncommons and {} rares. That's {}% of all card types, as well as {} gold. Total value is {}k gold.",
            count(Rarity::Common),
            count(Rarity::Uncommon),
            count(Rarity::Rare),
            percent,
            gold,
            (card_value + gold) / 1000
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, ItemCatalog};
    use crate::config::BotConfig;
    use crate::inventory::{InventoryLedger, Ledger};
    use crate::pricing::{PriceTable, PricingEngine};
    use crate::resolver::ItemResolver;
    use crate::transport::{create_transport_channel, Outbound};
    use std::sync::Arc;

    fn bot(gold: Gold, cards: Vec<CardInstance>) -> (TradeBot, mpsc::UnboundedReceiver<Outbound>) {
        let catalog = Arc::new(
            ItemCatalog::new(vec![
                CatalogEntry { name: "Bear".to_string(), rarity: Rarity::Common },
                CatalogEntry { name: "Wolf Rider".to_string(), rarity: Rarity::Uncommon },
                CatalogEntry { name: "Dragon".to_string(), rarity: Rarity::Rare },
            ])
            .unwrap(),
        );
        let prices = Arc::new(PriceTable::new());
        prices.set_reference("Bear", 100);
        prices.set_reference("Wolf Rider", 400);
        prices.set_reference("Dragon", 1000);

        let (transport, rx) = create_transport_channel();
        let config = BotConfig {
            bot_name: "Bot".to_string(),
            operator: Some("op".to_string()),
            banned_users: vec!["troll".to_string()],
            tip_chance: 0.0,
            ..BotConfig::default()
        };
        let ctx = SessionContext {
            transport: Arc::new(transport),
            ledger: Arc::new(InventoryLedger::with_contents(&catalog, 0, cards, gold)),
            pricing: PricingEngine::new(catalog.clone(), prices),
            resolver: ItemResolver::new(catalog),
            trade_log: None,
            config: Arc::new(config),
        };
        (TradeBot::new(ctx), rx)
    }

    fn card(id: u64, item: &str) -> CardInstance {
        CardInstance { id, item: item.to_string(), tradable: true }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            out.push(frame);
        }
        out
    }

    fn chat(from: &str, channel: &str, text: &str) -> BotEvent {
        BotEvent::Chat(ChatMessage::new(from, channel, text))
    }

    #[tokio::test]
    async fn test_public_wts_is_force_whispered() {
        let (mut bot, mut rx) = bot(5000, vec![]);
        bot.handle_event(chat("alice", "clockwork", "wts dragon, 2x bear, qqq")).await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            Outbound::Whisper { to, text } => {
                assert_eq!(to, "alice");
                assert!(text.starts_with("I will pay "), "{text}");
                assert!(text.contains("Dragon 1000g"));
                assert!(text.contains("That sums up to"));
                assert!(text.ends_with(" I don't know what 'qqq' is."));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(frames[1], Outbound::Whisper { to: "alice".to_string(), text: FORCE_WHISPER_NOTE.to_string() });
    }

    #[tokio::test]
    async fn test_wts_over_budget() {
        let (mut bot, mut rx) = bot(300, vec![]);
        bot.handle_event(chat("alice", "WHISPER", "wts dragon")).await;
        let frames = drain(&mut rx);
        assert_eq!(
            frames,
            vec![Outbound::Whisper {
                to: "alice".to_string(),
                text: "I would pay Dragon 1000g. I currently only have 300g.".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_wtb_capped_at_stock_and_stored() {
        let (mut bot, mut rx) = bot(0, vec![card(1, "Bear")]);
        bot.handle_event(chat("alice", "WHISPER", "wtb 3x bear")).await;

        let frames = drain(&mut rx);
        match &frames[0] {
            Outbound::Whisper { text, .. } => {
                assert!(text.starts_with("I want to have 1x Bear "), "{text}");
                assert!(text.ends_with("That's all I have."));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert_eq!(bot.want_list("alice").and_then(|w| w.get("Bear")), Some(&3));

        bot.handle_event(chat("bob", "WHISPER", "wtb dragon")).await;
        assert_eq!(
            drain(&mut rx),
            vec![Outbound::Whisper { to: "bob".to_string(), text: "I don't have Dragon stocked.".to_string() }]
        );
    }

    #[tokio::test]
    async fn test_price_lines() {
        let (mut bot, mut rx) = bot(100, vec![card(1, "Bear")]);
        bot.handle_event(chat("alice", "clockwork", "!price dragn")).await;
        bot.handle_event(chat("alice", "clockwork", "!stock bear")).await;
        bot.handle_event(chat("alice", "clockwork", "!price qqqq")).await;

        let texts: Vec<String> = drain(&mut rx)
            .into_iter()
            .map(|f| match f {
                Outbound::Say { room, text } => {
                    assert_eq!(room, "clockwork");
                    text
                }
                other => panic!("unexpected frame {other:?}"),
            })
            .collect();
        assert_eq!(
            texts[0],
            "Dragon is out of stock. I would buy for 1000g, but I don't have that much (base value 1000g)."
        );
        assert!(texts[1].starts_with("I'm buying Bear for 95g and selling for "), "{}", texts[1]);
        assert!(texts[1].ends_with("(base value 100g, 1 stocked)."));
        assert_eq!(texts[2], "There is no card named 'qqqq'.");
    }

    #[tokio::test]
    async fn test_missing_and_stock_summary() {
        let (mut bot, mut rx) = bot(2500, vec![card(1, "Bear"), card(2, "Bear"), card(3, "Dragon")]);
        bot.handle_event(chat("alice", "WHISPER", "missing")).await;
        bot.handle_event(chat("alice", "WHISPER", "stock")).await;

        let frames = drain(&mut rx);
        assert_eq!(
            frames[0],
            Outbound::Whisper {
                to: "alice".to_string(),
                text: "I currently don't have Wolf Rider. I'm paying extra for that!".to_string()
            }
        );
        match &frames[1] {
            Outbound::Whisper { text, .. } => {
                assert!(text.starts_with("I have 2 commons, 0 uncommons and 1 rares. That's 66% of all card types, as well as 2500 gold."), "{text}");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_banned_and_trade_room_chat_ignored() {
        let (mut bot, mut rx) = bot(0, vec![]);
        bot.handle_event(chat("troll", "WHISPER", "help")).await;
        bot.handle_event(chat("alice", "trade-7", "!help")).await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_operator_say_relays_to_lobby() {
        let (mut bot, mut rx) = bot(0, vec![]);
        bot.handle_event(chat("op", "WHISPER", "!say Back in five")).await;
        bot.handle_event(chat("alice", "WHISPER", "!say nope")).await;
        assert_eq!(
            drain(&mut rx),
            vec![Outbound::Say { room: "clockwork".to_string(), text: "Back in five".to_string() }]
        );
    }

    #[tokio::test]
    async fn test_trade_queue_replies() {
        let (mut bot, mut rx) = bot(0, vec![]);
        bot.handle_event(chat("alice", "clockwork", "!trade")).await;
        bot.handle_event(chat("bob", "clockwork", "!trade")).await;
        bot.handle_event(chat("bob", "WHISPER", "queue")).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let frames = drain(&mut rx);
        assert!(frames.contains(&Outbound::Say {
            room: "clockwork".to_string(),
            text: "Now trading with [alice].".to_string()
        }));
        assert!(frames.contains(&Outbound::Say {
            room: "clockwork".to_string(),
            text: "bob: You are now queued for trading. Your position in the queue is 1.".to_string()
        }));
        assert!(frames.contains(&Outbound::Whisper {
            to: "bob".to_string(),
            text: "You are already queued for trading. Your position in the queue is 1.".to_string()
        }));
        assert!(frames.contains(&Outbound::Request {
            request: ProtocolRequest::TradeInvite { profile: "alice".to_string() }
        }));
        assert_eq!(bot.queue().active(), Some("alice"));
    }

    #[tokio::test]
    async fn test_inventory_sync_deferred_during_session() {
        let (mut bot, mut rx) = bot(100, vec![]);
        bot.handle_event(chat("alice", "WHISPER", "trade")).await;
        bot.handle_event(BotEvent::Library(vec![card(5, "Dragon")])).await;
        bot.handle_event(BotEvent::Gold(900)).await;
        assert_eq!(bot.ctx.ledger.gold(), 100);
        assert_eq!(bot.ctx.ledger.stock("Dragon"), Some(0));

        bot.on_session_complete(SessionCompletion {
            partner: "alice".to_string(),
            outcome: SessionOutcome::Rejected,
        });
        assert_eq!(bot.ctx.ledger.gold(), 900);
        assert_eq!(bot.ctx.ledger.stock("Dragon"), Some(1));
        assert!(bot.queue().is_empty());
        assert!(drain(&mut rx).contains(&Outbound::Say {
            room: "clockwork".to_string(),
            text: "Finished trading.".to_string()
        }));
    }

    #[tokio::test]
    async fn test_sync_during_settled_session_does_not_undo_settlement() {
        use crate::inventory::Settlement;
        use crate::types::{OfferSide, OfferedCard};

        let (mut bot, mut rx) = bot(5000, vec![]);
        bot.handle_event(chat("alice", "WHISPER", "trade")).await;
        bot.handle_event(BotEvent::Library(vec![])).await;
        bot.handle_event(BotEvent::Gold(5000)).await;
        drain(&mut rx);

        // The session pays 1000g for a Dragon and commits it
        let settlement = Settlement {
            partner: "alice".to_string(),
            mine: OfferSide { cards: vec![], gold: 1000, accepted: true },
            theirs: OfferSide {
                cards: vec![OfferedCard { id: 50, item: "Dragon".to_string() }],
                gold: 0,
                accepted: true,
            },
        };
        let report = bot.ctx.ledger.apply_settlement(&settlement).unwrap();
        assert_eq!(bot.ctx.ledger.gold(), 4000);

        bot.on_session_complete(SessionCompletion {
            partner: "alice".to_string(),
            outcome: SessionOutcome::Settled { settlement, report },
        });
        assert_eq!(bot.ctx.ledger.gold(), 4000);
        assert_eq!(bot.ctx.ledger.stock("Dragon"), Some(1));

        let frames = drain(&mut rx);
        assert!(frames.contains(&Outbound::Request { request: ProtocolRequest::LibraryView }));
        assert!(frames.contains(&Outbound::Request { request: ProtocolRequest::ProfileDataInfo }));
    }

    #[tokio::test]
    async fn test_disconnect_ends_run_with_error() {
        let (bot, _rx) = bot(0, vec![]);
        let (tx, events) = mpsc::channel(8);
        tx.send(BotEvent::Disconnected("socket closed".to_string())).await.unwrap();
        let err = bot.run(events, None).await.unwrap_err();
        assert!(err.to_string().contains("socket closed"));
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::from_secs(42)), "42s");
        assert_eq!(format_uptime(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_uptime(Duration::from_secs(7384)), "2h 3m 4s");
    }
}
