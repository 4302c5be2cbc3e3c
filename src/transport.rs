//! Seam between the trading engine and the chat/trade transport.
//!
//! The engine only ever talks to [`Transport`]. Outbound calls never block:
//! [`ChannelTransport`] queues frames on an unbounded channel drained by the
//! gateway pump (or inspected directly by tests).

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::types::ProtocolRequest;

/// Actions the bot asks the transport to perform
pub trait Transport: Send + Sync {
    fn join(&self, room: &str);
    fn leave(&self, room: &str);
    fn say(&self, room: &str, text: &str);
    fn whisper(&self, user: &str, text: &str);
    fn send_request(&self, request: ProtocolRequest);
}

/// One outbound frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Outbound {
    Join { room: String },
    Leave { room: String },
    Say { room: String, text: String },
    Whisper { to: String, text: String },
    Request { request: ProtocolRequest },
}

/// Transport that forwards every call as an [`Outbound`] frame
#[derive(Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelTransport {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    fn push(&self, frame: Outbound) {
        if self.tx.send(frame).is_err() {
            debug!("[TRANSPORT] Outbound channel closed, dropping frame");
        }
    }
}

/// Create a transport and the receiving end of its frames
pub fn create_transport_channel() -> (ChannelTransport, mpsc::UnboundedReceiver<Outbound>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelTransport::new(tx), rx)
}

impl Transport for ChannelTransport {
    fn join(&self, room: &str) {
        self.push(Outbound::Join { room: room.to_string() });
    }

    fn leave(&self, room: &str) {
        self.push(Outbound::Leave { room: room.to_string() });
    }

    fn say(&self, room: &str, text: &str) {
        self.push(Outbound::Say {
            room: room.to_string(),
            text: text.to_string(),
        });
    }

    fn whisper(&self, user: &str, text: &str) {
        self.push(Outbound::Whisper {
            to: user.to_string(),
            text: text.to_string(),
        });
    }

    fn send_request(&self, request: ProtocolRequest) {
        self.push(Outbound::Request { request });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calls_become_frames_in_order() {
        let (transport, mut rx) = create_transport_channel();
        transport.join("clockwork");
        transport.say("clockwork", "hi");
        transport.send_request(ProtocolRequest::TradeSetGold { gold: 5 });

        assert_eq!(rx.try_recv().unwrap(), Outbound::Join { room: "clockwork".to_string() });
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Say { room: "clockwork".to_string(), text: "hi".to_string() }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Request { request: ProtocolRequest::TradeSetGold { gold: 5 } }
        );
    }

    #[test]
    fn test_frame_json_shape() {
        let json = serde_json::to_string(&Outbound::Whisper { to: "bob".to_string(), text: "yo".to_string() }).unwrap();
        assert_eq!(json, r#"{"op":"whisper","to":"bob","text":"yo"}"#);
    }

    #[test]
    fn test_closed_channel_is_silent() {
        let (transport, rx) = create_transport_channel();
        drop(rx);
        transport.say("room", "nobody listens");
    }
}
