//! Chat command parsing: public commands, in-room trade commands and card lists.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::resolver::ItemResolver;
use crate::types::ChatMessage;

fn invalid_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^a-z'0-9 ]").expect("valid regex"))
}

fn leading_multiplier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*x?(\d+)x?\s*").expect("valid regex"))
}

fn trailing_multiplier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s*x?(\d+)x?\s*$").expect("valid regex"))
}

/// Result of parsing a comma separated card list
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedList {
    /// Resolved item -> requested quantity
    pub items: BTreeMap<String, u32>,
    /// Tokens that did not resolve to a catalog item (cleaned form)
    pub failed: Vec<String>,
}

impl ParsedList {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units requested
    pub fn total_units(&self) -> u32 {
        self.items.values().sum()
    }
}

/// Split a token into (quantity, remaining text)
fn split_multiplier(token: &str) -> (u32, String) {
    for re in [leading_multiplier(), trailing_multiplier()] {
        if let Some(caps) = re.captures(token) {
            let qty = caps
                .get(1)
                .and_then(|m| m.as_str().parse::<u32>().ok())
                .filter(|&q| q > 0)
                .unwrap_or(1);
            let rest = re.replace(token, " ");
            return (qty, rest.trim().to_string());
        }
    }
    (1, token.trim().to_string())
}

/// Catalog name spelled out in full, digits included
fn exact_name(resolver: &ItemResolver, token: &str) -> Option<String> {
    let token = token.trim();
    resolver
        .catalog()
        .names()
        .find(|name| name.to_lowercase() == token)
        .map(str::to_string)
}

/// Parse "2x wolf rider, bear, x3 dragon" into item quantities.
///
/// Tokens resolving to the same item add up. Empty tokens are skipped.
/// Unresolved tokens are reported as typed, multiplier included.
pub fn parse_list(resolver: &ItemResolver, text: &str) -> ParsedList {
    let mut parsed = ParsedList::default();

    for raw in text.split(',') {
        let lowered = raw.to_lowercase();
        let cleaned = invalid_chars().replace_all(&lowered, "");
        let (qty, word) = match exact_name(resolver, &cleaned) {
            Some(name) => (1, name),
            None => split_multiplier(&cleaned),
        };
        if word.is_empty() {
            continue;
        }

        match resolver.resolve_known(&word) {
            Some(item) => *parsed.items.entry(item).or_insert(0) += qty,
            None => parsed.failed.push(cleaned.trim().to_string()),
        }
    }
    parsed
}

/// Public chat commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Player wants to sell us these cards
    Wts(String),
    /// Player wants to buy these cards from us
    Wtb(String),
    /// `!wts` / `!wtb` without a list
    ListRequired,
    /// `!price <item>` / `!stock <item>`
    Price(String),
    Missing,
    Stock,
    Help,
    Uptime,
    /// `!trade` / `!queue`
    Trade,
    /// Operator relay: `!say <text>`, case preserved
    Say(String),
}

impl Command {
    /// Normalise a chat line and recognise a command.
    ///
    /// Matching is case-insensitive; `wt..` becomes `!wt..` and a whisper
    /// without a leading `!` is treated as a command.
    pub fn parse(msg: &ChatMessage) -> Option<Command> {
        if let Some(rest) = msg.text.strip_prefix("!say ") {
            return Some(Command::Say(rest.to_string()));
        }

        let mut command = msg.text.trim().to_lowercase();
        if command.starts_with("wt") {
            command.insert(0, '!');
        }
        if msg.is_whisper() && !command.starts_with('!') {
            command.insert(0, '!');
        }

        match command.as_str() {
            "!wts" | "!wtb" => return Some(Command::ListRequired),
            "!missing" => return Some(Command::Missing),
            "!stock" => return Some(Command::Stock),
            "!help" => return Some(Command::Help),
            "!uptime" => return Some(Command::Uptime),
            "!trade" | "!queue" => return Some(Command::Trade),
            _ => {}
        }

        if let Some(list) = command.strip_prefix("!wts ") {
            return Some(Command::Wts(list.to_string()));
        }
        if let Some(list) = command.strip_prefix("!wtb ") {
            return Some(Command::Wtb(list.to_string()));
        }
        if let Some(item) = command
            .strip_prefix("!price ")
            .or_else(|| command.strip_prefix("!stock "))
        {
            return Some(Command::Price(item.trim().to_string()));
        }
        None
    }
}

/// Commands understood inside a trade room
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomCommand {
    Help,
    Price,
    Add(String),
    Remove(String),
}

impl RoomCommand {
    pub fn parse(text: &str) -> Option<RoomCommand> {
        let text = text.trim();
        let (head, arg) = match text.split_once(' ') {
            Some((head, arg)) => (head, arg.trim()),
            None => (text, ""),
        };
        match head.to_lowercase().as_str() {
            "!help" if arg.is_empty() => Some(RoomCommand::Help),
            "!price" if arg.is_empty() => Some(RoomCommand::Price),
            "!add" => Some(RoomCommand::Add(arg.to_string())),
            "!remove" => Some(RoomCommand::Remove(arg.to_string())),
            _ => None,
        }
    }
}
