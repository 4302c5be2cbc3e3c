//! Single-slot trade queue.
//!
//! Position 0 is the partner currently being served. A partner appears at
//! most once across the active slot and the waiting list.

use std::collections::VecDeque;
use tracing::info;

/// Result of a `!trade` request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Queue was idle; a session starts right away
    Started(String),
    Queued { position: usize },
    AlreadyQueued { position: usize },
}

impl Enqueued {
    /// Reply to the requester, if any
    pub fn reply(&self) -> Option<String> {
        match self {
            Enqueued::Started(_) => None,
            Enqueued::Queued { position } => Some(format!(
                "You are now queued for trading. Your position in the queue is {}.",
                position
            )),
            Enqueued::AlreadyQueued { position } => Some(format!(
                "You are already queued for trading. Your position in the queue is {}.",
                position
            )),
        }
    }
}

/// What to do after the active session completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    Next(String),
    Idle,
}

#[derive(Debug, Default)]
pub struct TradeQueue {
    active: Option<String>,
    waiting: VecDeque<String>,
}

impl TradeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn is_trading(&self) -> bool {
        self.active.is_some()
    }

    /// Number of partners including the active one
    pub fn len(&self) -> usize {
        self.waiting.len() + usize::from(self.active.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn position(&self, partner: &str) -> Option<usize> {
        self.active
            .iter()
            .chain(self.waiting.iter())
            .position(|p| p == partner)
    }

    pub fn enqueue(&mut self, partner: &str) -> Enqueued {
        if let Some(position) = self.position(partner) {
            return Enqueued::AlreadyQueued { position };
        }
        if self.active.is_none() {
            self.active = Some(partner.to_string());
            info!("[QUEUE] {} starts trading immediately", partner);
            return Enqueued::Started(partner.to_string());
        }
        self.waiting.push_back(partner.to_string());
        let position = self.len() - 1;
        info!("[QUEUE] {} queued at position {}", partner, position);
        Enqueued::Queued { position }
    }

    /// Drop the served partner and promote the next one
    pub fn complete(&mut self) -> Advance {
        if let Some(done) = self.active.take() {
            info!("[QUEUE] Finished with {}", done);
        }
        match self.waiting.pop_front() {
            Some(next) => {
                self.active = Some(next.clone());
                Advance::Next(next)
            }
            None => Advance::Idle,
        }
    }

    /// Lobby line announcing the current order
    pub fn announcement(&self) -> String {
        let Some(active) = &self.active else {
            return "Finished trading.".to_string();
        };
        if self.waiting.is_empty() {
            format!("Now trading with [{}].", active)
        } else {
            let waiting: Vec<&str> = self.waiting.iter().map(String::as_str).collect();
            format!("Now trading with [{}] < {}", active, waiting.join(" < "))
        }
    }
}
