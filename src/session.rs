//! Live trade negotiation with a single partner.
//!
//! A session runs as its own task and goes through
//! `Inviting → AwaitingRoom → Negotiating → Settled | Ended | Rejected | TimedOut | Faulted`.
//!
//! The invite phase waits for two independent facts, the partner's acceptance
//! and the trade room assignment, which may arrive in either order. The
//! negotiation phase is a single consumer of room chat, trade snapshots and a
//! one second heartbeat, so no two changes to the offer state ever overlap.
//! [`Negotiation`] holds the synchronous state machine and takes `now`
//! explicitly; [`run_session`] drives it with real timers.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::command::RoomCommand;
use crate::config::{BotConfig, SessionTimings};
use crate::inventory::{Ledger, Settlement, SettlementReport};
use crate::pricing::PricingEngine;
use crate::resolver::ItemResolver;
use crate::storage::{TradeLogChannel, TradeRecord};
use crate::transport::Transport;
use crate::types::{ChatMessage, Gold, OfferSide, ProtocolRequest, Side, TradeSnapshot};

/// Everything a session needs from the rest of the bot
#[derive(Clone)]
pub struct SessionContext {
    pub transport: Arc<dyn Transport>,
    pub ledger: Arc<dyn Ledger>,
    pub pricing: PricingEngine,
    pub resolver: ItemResolver,
    pub trade_log: Option<TradeLogChannel>,
    pub config: Arc<BotConfig>,
}

/// Events routed to the active session by the bot loop
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Chat(ChatMessage),
    RoomAssigned(String),
    InviteResponse(bool),
    Snapshot(TradeSnapshot),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inviting,
    AwaitingRoom,
    Negotiating,
    Settled,
    Ended,
    Rejected,
    TimedOut,
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Invite,
    Idle,
    Lifetime,
}

/// How a session finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    Settled {
        settlement: Settlement,
        report: SettlementReport,
    },
    /// Server closed the trade room
    Ended,
    Rejected,
    TimedOut(TimeoutKind),
    Faulted(String),
}

impl SessionOutcome {
    pub fn state(&self) -> SessionState {
        match self {
            SessionOutcome::Settled { .. } => SessionState::Settled,
            SessionOutcome::Ended => SessionState::Ended,
            SessionOutcome::Rejected => SessionState::Rejected,
            SessionOutcome::TimedOut(_) => SessionState::TimedOut,
            SessionOutcome::Faulted(_) => SessionState::Faulted,
        }
    }
}

// =============================================================================
// INVITE PHASE
// =============================================================================

/// Result of feeding one event to the invite tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InviteStep {
    Pending,
    Ready(String),
    Declined,
}

/// Holds acceptance and room assignment as independent facts
#[derive(Debug, Default)]
pub struct InviteTracker {
    accepted: bool,
    room: Option<String>,
    /// Latest snapshot seen before negotiation starts
    early_snapshot: Option<TradeSnapshot>,
}

impl InviteTracker {
    pub fn state(&self) -> SessionState {
        if self.accepted || self.room.is_some() {
            SessionState::AwaitingRoom
        } else {
            SessionState::Inviting
        }
    }

    pub fn room(&self) -> Option<&str> {
        self.room.as_deref()
    }

    pub fn take_early_snapshot(&mut self) -> Option<TradeSnapshot> {
        self.early_snapshot.take()
    }

    pub fn observe(&mut self, event: SessionEvent) -> InviteStep {
        match event {
            SessionEvent::InviteResponse(false) => return InviteStep::Declined,
            SessionEvent::InviteResponse(true) => self.accepted = true,
            SessionEvent::RoomAssigned(room) => {
                if self.room.is_none() {
                    self.room = Some(room);
                }
            }
            SessionEvent::Chat(msg) => {
                if self.room.is_none() && msg.is_trade_room() {
                    self.room = Some(msg.channel);
                }
            }
            SessionEvent::Snapshot(snapshot) => self.early_snapshot = Some(snapshot),
        }

        match (&self.room, self.accepted) {
            (Some(room), true) => InviteStep::Ready(room.clone()),
            _ => InviteStep::Pending,
        }
    }
}

// =============================================================================
// NEGOTIATION
// =============================================================================

/// One side of the trade with its computed value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Offer {
    pub contents: OfferSide,
    pub counts: BTreeMap<String, u32>,
    pub value: Gold,
}

impl Offer {
    /// Price an offer side against current stock (`Buy` for theirs, `Sell` for mine)
    pub fn priced(contents: OfferSide, side: Side, pricing: &PricingEngine, ledger: &dyn Ledger) -> Self {
        let counts = contents.counts();
        let value = counts
            .iter()
            .map(|(item, &n)| pricing.price(item, n, side, ledger.stock(item).unwrap_or(0)))
            .sum();
        Self { contents, counts, value }
    }

    /// Value plus gold
    pub fn total(&self) -> Gold {
        self.value + self.contents.gold
    }

    pub fn offered(&self, item: &str) -> u32 {
        self.counts.get(item).copied().unwrap_or(0)
    }
}

fn quantity_label(item: &str, n: u32) -> String {
    if n > 1 {
        format!("{}x {}", n, item)
    } else {
        item.to_string()
    }
}

/// "A for 300g, 2x B for 120g", most valuable line first
fn priced_lines(offer: &Offer, side: Side, pricing: &PricingEngine, ledger: &dyn Ledger) -> String {
    let mut lines: Vec<(Gold, String)> = offer
        .counts
        .iter()
        .map(|(item, &n)| {
            let gold = pricing.price(item, n, side, ledger.stock(item).unwrap_or(0));
            (gold, quantity_label(item, n))
        })
        .collect();
    lines.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    lines
        .iter()
        .map(|(gold, label)| format!("{} for {}g", label, gold))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Card ids of tradable holdings whose sell price has hit the rarity floor (one per item)
pub fn liquidation_candidates(ledger: &dyn Ledger, pricing: &PricingEngine) -> Vec<u64> {
    ledger
        .holdings()
        .into_iter()
        .filter(|(item, stock)| pricing.is_at_floor(item, *stock))
        .filter_map(|(item, _)| ledger.tradable_cards(&item).first().copied())
        .collect()
}

const WELCOME: &str = "This is an automated trading unit. If you don't know what to do, just say '!help'.";

const ROOM_HELP: &str = "Just add the cards you want to sell on your side. To buy cards from me, say '!add [card name]' \
    or '!remove [card name]' and I will update my side. Not sure about the gold? Just ask for the !price and I'll list it up.";

/// Negotiation state for one partner in one room
#[derive(Debug)]
pub struct Negotiation {
    partner: String,
    room: String,
    trusted: bool,
    timings: SessionTimings,

    started: Instant,
    last_activity: Instant,
    last_idle_warning: Instant,
    minute_warning: bool,
    ten_second_warning: bool,

    /// Offer values moved since the last imbalance hint
    cards_changed: bool,
    /// Accept already requested for the current offer state
    accept_sent: bool,
    /// Card ids requested onto our side but not yet in a snapshot
    pending_adds: HashSet<u64>,

    mine: Offer,
    theirs: Offer,
}

impl Negotiation {
    pub fn new(partner: &str, room: &str, config: &BotConfig, now: Instant) -> Self {
        Self {
            partner: partner.to_string(),
            room: room.to_string(),
            trusted: config.is_trusted(partner),
            timings: config.timings,
            started: now,
            last_activity: now,
            last_idle_warning: now,
            minute_warning: false,
            ten_second_warning: false,
            cards_changed: false,
            accept_sent: false,
            pending_adds: HashSet::new(),
            mine: Offer::default(),
            theirs: Offer::default(),
        }
    }

    pub fn mine(&self) -> &Offer {
        &self.mine
    }

    pub fn theirs(&self) -> &Offer {
        &self.theirs
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    /// Greet the partner and pre-fill our side from their last WTB request
    pub fn open(&mut self, ctx: &SessionContext, want_list: Option<BTreeMap<String, u32>>) {
        ctx.transport.say(&self.room, &format!("Welcome {}. {}", self.partner, WELCOME));

        let Some(want_list) = want_list.filter(|w| !w.is_empty()) else {
            return;
        };
        let mut card_ids = Vec::new();
        for (item, &n) in &want_list {
            card_ids.extend(ctx.ledger.tradable_cards(item).into_iter().take(n as usize));
        }
        if card_ids.is_empty() {
            return;
        }
        self.pending_adds.extend(card_ids.iter().copied());
        ctx.transport.send_request(ProtocolRequest::TradeAddCards { card_ids });
        ctx.transport.say(&self.room, "I've initialized the trade room with your last WTB request.");
    }

    /// Room chat. Returns an outcome when the server closes the trade.
    pub fn on_chat(&mut self, ctx: &SessionContext, msg: &ChatMessage, now: Instant) -> Option<SessionOutcome> {
        if msg.channel != self.room {
            return None;
        }
        if msg.from == ctx.config.system_sender && msg.text.starts_with("Trade ended") {
            info!("[SESSION] Trade with {} ended by server", self.partner);
            return Some(SessionOutcome::Ended);
        }
        if msg.from != self.partner {
            return None;
        }

        self.last_activity = now;
        match RoomCommand::parse(&msg.text) {
            Some(RoomCommand::Help) => ctx.transport.say(&self.room, ROOM_HELP),
            Some(RoomCommand::Price) => self.say_price(ctx),
            Some(RoomCommand::Add(name)) => self.add_card(ctx, &name),
            Some(RoomCommand::Remove(name)) => self.remove_card(ctx, &name),
            None => {}
        }
        None
    }

    fn say_price(&self, ctx: &SessionContext) {
        let ledger = ctx.ledger.as_ref();
        let mut msg = String::new();
        if !self.theirs.counts.is_empty() {
            msg.push_str(&format!(
                "I'll buy {}. ",
                priced_lines(&self.theirs, Side::Buy, &ctx.pricing, ledger)
            ));
        }
        if !self.mine.counts.is_empty() {
            msg.push_str(&format!(
                "I'll sell {}. ",
                priced_lines(&self.mine, Side::Sell, &ctx.pricing, ledger)
            ));
        }
        let diff = self.theirs.value - self.mine.value;
        if diff < 0 {
            msg.push_str(&format!("Thus you owe me {}g.", -diff));
        } else {
            msg.push_str(&format!("Thus I owe you {}g.", diff));
        }
        ctx.transport.say(&self.room, &msg);
    }

    fn add_card(&mut self, ctx: &SessionContext, name: &str) {
        let item = ctx.resolver.resolve(name);
        let Some(stock) = ctx.ledger.stock(&item) else {
            ctx.transport.say(&self.room, &format!("There is no card named '{}'.", item));
            return;
        };

        let offered: HashSet<u64> = self.mine.contents.cards.iter().map(|c| c.id).collect();
        let in_flight = ctx
            .ledger
            .tradable_cards(&item)
            .iter()
            .filter(|id| self.pending_adds.contains(id) && !offered.contains(id))
            .count() as u32;

        let next = if self.mine.offered(&item) + in_flight >= stock {
            None
        } else {
            ctx.ledger
                .tradable_cards(&item)
                .into_iter()
                .find(|id| !offered.contains(id) && !self.pending_adds.contains(id))
        };

        match next {
            Some(id) => {
                debug!("[SESSION] Adding {} (card {}) for {}", item, id, self.partner);
                self.pending_adds.insert(id);
                ctx.transport.send_request(ProtocolRequest::TradeAddCards { card_ids: vec![id] });
            }
            None => ctx.transport.say(&self.room, &format!("Sorry, {} is out of stock.", item)),
        }
    }

    fn remove_card(&mut self, ctx: &SessionContext, name: &str) {
        let item = ctx.resolver.resolve(name);
        if ctx.ledger.stock(&item).is_none() {
            ctx.transport.say(&self.room, &format!("There is no card named '{}'.", item));
            return;
        }
        let last = self.mine.contents.cards.iter().rev().find(|c| c.item == item);
        match last {
            Some(card) => {
                debug!("[SESSION] Removing {} (card {}) for {}", item, card.id, self.partner);
                ctx.transport.send_request(ProtocolRequest::TradeRemoveCard { card_id: card.id });
            }
            None => ctx.transport.say(&self.room, &format!("{} is not part of this trade!", item)),
        }
    }

    /// Authoritative trade state from the server
    pub fn on_snapshot(&mut self, ctx: &SessionContext, snapshot: TradeSnapshot, now: Instant) -> Option<SessionOutcome> {
        if snapshot.partner != self.partner {
            let reason = format!("trade partner mismatch: {} != {}", snapshot.partner, self.partner);
            error!("[SESSION] {}", reason);
            if let Some(operator) = &ctx.config.operator {
                ctx.transport.whisper(operator, &format!("Session fault: {}", reason));
            }
            return Some(SessionOutcome::Faulted(reason));
        }

        if snapshot.modified {
            self.last_activity = now;
            self.accept_sent = false;
        }
        // Requested cards stay pending until the server shows them on our side
        let echoed: HashSet<u64> = snapshot.mine.cards.iter().map(|c| c.id).collect();
        self.pending_adds.retain(|id| !echoed.contains(id));

        if snapshot.mine.accepted && snapshot.theirs.accepted {
            return Some(self.settle(ctx, snapshot));
        }

        let old_sum = self.mine.value + self.theirs.value;
        let ledger = ctx.ledger.as_ref();
        self.theirs = Offer::priced(snapshot.theirs, Side::Buy, &ctx.pricing, ledger);
        self.mine = Offer::priced(snapshot.mine, Side::Sell, &ctx.pricing, ledger);
        if old_sum != self.mine.value + self.theirs.value {
            self.cards_changed = true;
        }

        let gold_needed = self.theirs.value - self.mine.value + self.theirs.contents.gold;
        if gold_needed != self.mine.contents.gold {
            if gold_needed > 0 && ctx.ledger.gold_for_trade() >= gold_needed {
                ctx.transport.send_request(ProtocolRequest::TradeSetGold { gold: gold_needed });
            } else if self.mine.contents.gold != 0 {
                ctx.transport.send_request(ProtocolRequest::TradeSetGold { gold: 0 });
            }
        }
        None
    }

    fn settle(&mut self, ctx: &SessionContext, snapshot: TradeSnapshot) -> SessionOutcome {
        let ledger = ctx.ledger.as_ref();
        let their_value = Offer::priced(snapshot.theirs.clone(), Side::Buy, &ctx.pricing, ledger).value;
        let my_value = Offer::priced(snapshot.mine.clone(), Side::Sell, &ctx.pricing, ledger).value;
        let settlement = Settlement {
            partner: self.partner.clone(),
            mine: snapshot.mine,
            theirs: snapshot.theirs,
        };

        let report = match ctx.ledger.apply_settlement(&settlement) {
            Ok(report) => report,
            Err(e) => {
                error!("[SESSION] Settlement with {} rejected by ledger: {}", self.partner, e);
                if let Some(operator) = &ctx.config.operator {
                    ctx.transport.whisper(operator, &format!("Settlement failed: {}", e));
                }
                return SessionOutcome::Faulted(e.to_string());
            }
        };
        ctx.transport.say(&self.room, "Thanks!");

        let card_ids = liquidation_candidates(ledger, &ctx.pricing);
        if !card_ids.is_empty() {
            info!("[SESSION] Liquidating {} floor-priced cards", card_ids.len());
            ctx.transport.send_request(ProtocolRequest::SellCards { card_ids });
            ctx.transport.send_request(ProtocolRequest::ProfileDataInfo);
            ctx.transport.send_request(ProtocolRequest::LibraryView);
        }

        if let Some(log) = &ctx.trade_log {
            log.record_trade(TradeRecord::from_settlement(&settlement, their_value, my_value));
        }

        SessionOutcome::Settled { settlement, report }
    }

    /// Heartbeat: deadlines, hints and auto-accept
    pub fn on_tick(&mut self, ctx: &SessionContext, now: Instant) -> Option<SessionOutcome> {
        let t = self.timings;
        let idle = now.saturating_duration_since(self.last_activity);
        let age = now.saturating_duration_since(self.started);

        if idle >= t.idle_warning && now.saturating_duration_since(self.last_idle_warning) >= t.idle_warning {
            let remaining = t.idle_timeout.saturating_sub(t.idle_warning).as_secs();
            ctx.transport.say(
                &self.room,
                &format!(
                    "You have been idle for a minute. This trade window will close in {} seconds unless you interact with it.",
                    remaining
                ),
            );
            self.last_idle_warning = now;
        }

        if idle >= t.idle_timeout {
            ctx.transport.say(&self.room, "Time's up!");
            return Some(SessionOutcome::TimedOut(TimeoutKind::Idle));
        }

        if !self.minute_warning && age >= t.minute_warning {
            ctx.transport.say(&self.room, "Please finish the trade within the next minute.");
            self.minute_warning = true;
        }
        if !self.ten_second_warning && age >= t.ten_second_warning {
            ctx.transport.say(&self.room, "You have 10 seconds left to finish the trade.");
            self.ten_second_warning = true;
        }
        if age >= t.lifetime {
            ctx.transport.say(&self.room, "Time's up!");
            return Some(SessionOutcome::TimedOut(TimeoutKind::Lifetime));
        }

        if self.cards_changed && idle >= t.nudge_quiet {
            self.cards_changed = false;
            let owed = self.theirs.value - self.mine.value;
            let available = ctx.ledger.gold_for_trade();
            if owed > available {
                ctx.transport.say(
                    &self.room,
                    &format!("Sorry - I only have {} gold at my disposal. Please take something out.", available),
                );
            } else if owed < 0 {
                ctx.transport.say(&self.room, &format!("Please set your gold offer to {}g", -owed));
            }
        }

        if idle >= t.auto_accept_quiet && !self.mine.contents.accepted && !self.accept_sent {
            let balanced = self.theirs.total() == self.mine.total() && self.theirs.total() > 0;
            if self.trusted || balanced {
                info!(
                    "[SESSION] Accepting trade with {} ({}g each side{})",
                    self.partner,
                    self.mine.total(),
                    if self.trusted { ", trusted" } else { "" }
                );
                ctx.transport.send_request(ProtocolRequest::TradeAcceptBargain);
                self.accept_sent = true;
            }
        }
        None
    }
}

// =============================================================================
// DRIVER
// =============================================================================

/// Wait until the partner accepted and the room is known
async fn await_invite(
    ctx: &SessionContext,
    partner: &str,
    events: &mut mpsc::Receiver<SessionEvent>,
    tracker: &mut InviteTracker,
) -> Result<String, SessionOutcome> {
    let deadline = sleep(ctx.config.timings.invite_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    return Err(SessionOutcome::Faulted("event stream closed".to_string()));
                };
                match tracker.observe(event) {
                    InviteStep::Ready(room) => return Ok(room),
                    InviteStep::Declined => {
                        info!("[SESSION] {} declined the trade invite", partner);
                        return Err(SessionOutcome::Rejected);
                    }
                    InviteStep::Pending => {
                        debug!("[SESSION] Invite to {}: {:?}", partner, tracker.state());
                    }
                }
            }
            _ = &mut deadline => {
                warn!("[SESSION] Invite to {} timed out ({:?})", partner, tracker.state());
                return Err(SessionOutcome::TimedOut(TimeoutKind::Invite));
            }
        }
    }
}

/// Run one complete session. Never touches the ledger except on settlement.
pub async fn run_session(
    ctx: SessionContext,
    partner: String,
    want_list: Option<BTreeMap<String, u32>>,
    mut events: mpsc::Receiver<SessionEvent>,
) -> SessionOutcome {
    info!("[SESSION] Inviting {}", partner);
    ctx.transport.send_request(ProtocolRequest::TradeInvite { profile: partner.clone() });

    let mut tracker = InviteTracker::default();
    let room = match await_invite(&ctx, &partner, &mut events, &mut tracker).await {
        Ok(room) => room,
        Err(outcome) => {
            if let Some(room) = tracker.room() {
                ctx.transport.leave(room);
            }
            return outcome;
        }
    };
    info!("[SESSION] Negotiating with {} in {}", partner, room);

    let now = Instant::now();
    let mut negotiation = Negotiation::new(&partner, &room, &ctx.config, now);
    negotiation.open(&ctx, want_list);

    let mut outcome = tracker
        .take_early_snapshot()
        .and_then(|snapshot| negotiation.on_snapshot(&ctx, snapshot, now));

    let heartbeat_period = ctx.config.timings.heartbeat;
    let mut heartbeat = interval_at(now + heartbeat_period, heartbeat_period);

    while outcome.is_none() {
        outcome = tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Chat(msg)) => negotiation.on_chat(&ctx, &msg, Instant::now()),
                Some(SessionEvent::Snapshot(snapshot)) => negotiation.on_snapshot(&ctx, snapshot, Instant::now()),
                Some(_) => None,
                None => Some(SessionOutcome::Faulted("event stream closed".to_string())),
            },
            _ = heartbeat.tick() => negotiation.on_tick(&ctx, Instant::now()),
        };
    }

    ctx.transport.leave(&room);
    let outcome = outcome.unwrap_or(SessionOutcome::Ended);
    info!("[SESSION] Session with {} finished: {:?}", partner, outcome.state());
    outcome
}
