//! Websocket gateway to the chat/trade relay.
//!
//! Frames are JSON objects tagged by `op`. Outbound frames come from the
//! [`ChannelTransport`] queue; inbound frames are decoded into [`BotEvent`]s.
//! Any connection failure ends with a final [`BotEvent::Disconnected`].

use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::config::{BotConfig, GATEWAY_PING_INTERVAL_SECS, GATEWAY_STALE_SECS};
use crate::transport::{create_transport_channel, ChannelTransport, Outbound};
use crate::types::{BotEvent, CardInstance, ChatMessage, Gold, TradeSideView, TradeView};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
/// Characters of an undecodable frame quoted in the log
const FRAME_PREVIEW_CHARS: usize = 200;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Inbound relay frames
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Inbound {
    Message {
        from: String,
        channel: String,
        text: String,
    },
    RoomJoined {
        room: String,
    },
    TradeResponse {
        status: String,
    },
    TradeView {
        #[serde(default)]
        modified: bool,
        from: TradeSideView,
        to: TradeSideView,
    },
    Library {
        cards: Vec<CardInstance>,
    },
    Profile {
        gold: Gold,
    },
    Ping,
}

/// Decode one text frame. `Ok(None)` for frames with no bot-level meaning.
pub fn decode_frame(text: &str) -> Result<Option<BotEvent>> {
    let inbound: Inbound = serde_json::from_str(text).context("Failed to parse relay frame")?;
    let event = match inbound {
        Inbound::Message { from, channel, text } => BotEvent::Chat(ChatMessage { from, channel, text }),
        Inbound::RoomJoined { room } => BotEvent::RoomJoined(room),
        Inbound::TradeResponse { status } => BotEvent::TradeResponse {
            accepted: status.eq_ignore_ascii_case("accept"),
        },
        Inbound::TradeView { modified, from, to } => BotEvent::TradeView(TradeView { modified, from, to }),
        Inbound::Library { cards } => BotEvent::Library(cards),
        Inbound::Profile { gold } => BotEvent::Gold(gold),
        Inbound::Ping => return Ok(None),
    };
    Ok(Some(event))
}

/// Leading part of a frame for logging, cut on a char boundary
fn preview(text: &str) -> &str {
    match text.char_indices().nth(FRAME_PREVIEW_CHARS) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

/// Live gateway: the transport to talk through and the events to consume
pub struct GatewayConnection {
    pub transport: ChannelTransport,
    pub events: mpsc::Receiver<BotEvent>,
    pub pump: JoinHandle<()>,
}

/// Connect, log in and start the pump task
pub async fn connect(config: &BotConfig) -> Result<GatewayConnection> {
    let (ws, _) = connect_async(config.gateway_url.as_str())
        .await
        .with_context(|| format!("Failed to connect to gateway at {}", config.gateway_url))?;
    info!("[GATEWAY] Connected to {}", config.gateway_url);

    let (transport, outbound_rx) = create_transport_channel();
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let login = serde_json::json!({ "op": "login", "name": config.bot_name }).to_string();

    let pump = tokio::spawn(async move {
        let reason = match run_pump(ws, login, outbound_rx, &event_tx).await {
            Ok(reason) => reason,
            Err(e) => {
                error!("[GATEWAY] {:#}", e);
                format!("{:#}", e)
            }
        };
        warn!("[GATEWAY] Disconnected: {}", reason);
        let _ = event_tx.send(BotEvent::Disconnected(reason)).await;
    });

    Ok(GatewayConnection {
        transport,
        events: event_rx,
        pump,
    })
}

/// Shuttle frames both ways. Returns the reason the connection ended.
async fn run_pump(
    ws: WsStream,
    login: String,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: &mpsc::Sender<BotEvent>,
) -> Result<String> {
    let (mut write, mut read) = ws.split();
    write.send(Message::Text(login)).await.context("Failed to send login")?;

    let ping_every = Duration::from_secs(GATEWAY_PING_INTERVAL_SECS);
    let stale_after = Duration::from_secs(GATEWAY_STALE_SECS);
    let mut ping_interval = interval_at(Instant::now() + ping_every, ping_every);
    let mut last_message = Instant::now();

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                write.send(Message::Ping(vec![])).await.context("Failed to send ping")?;
            }

            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    return Ok("transport dropped".to_string());
                };
                let json = serde_json::to_string(&frame)?;
                write.send(Message::Text(json)).await.context("Failed to send frame")?;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_message = Instant::now();
                        match decode_frame(&text) {
                            Ok(Some(event)) => {
                                if events.send(event).await.is_err() {
                                    return Ok("bot stopped listening".to_string());
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("[GATEWAY] {:#}: {}", e, preview(&text)),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_message = Instant::now();
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_message = Instant::now();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return Ok(format!("server closed: {:?}", frame));
                    }
                    Some(Ok(other)) => debug!("[GATEWAY] Ignoring frame {:?}", other),
                    Some(Err(e)) => return Err(e).context("Websocket error"),
                    None => return Ok("stream ended".to_string()),
                }
            }
        }

        if last_message.elapsed() > stale_after {
            return Ok("stale connection".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;
    use tokio::net::TcpListener;

    #[test]
    fn test_decode_chat_and_trade_frames() {
        let chat = decode_frame(r#"{"op":"message","from":"alice","channel":"WHISPER","text":"wtb bear"}"#).unwrap();
        assert_eq!(chat, Some(BotEvent::Chat(ChatMessage::new("alice", "WHISPER", "wtb bear"))));

        let resp = decode_frame(r#"{"op":"trade_response","status":"ACCEPT"}"#).unwrap();
        assert_eq!(resp, Some(BotEvent::TradeResponse { accepted: true }));
        let resp = decode_frame(r#"{"op":"trade_response","status":"DECLINE"}"#).unwrap();
        assert_eq!(resp, Some(BotEvent::TradeResponse { accepted: false }));

        let view = decode_frame(
            r#"{"op":"trade_view","modified":true,
                "from":{"name":"Bot","cards":[{"id":1,"item":"Bear"}],"gold":5},
                "to":{"name":"alice","accepted":true}}"#,
        )
        .unwrap();
        match view {
            Some(BotEvent::TradeView(v)) => {
                assert!(v.modified);
                assert_eq!(v.from.cards.len(), 1);
                assert!(v.to.accepted);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_decode_inventory_frames() {
        let lib = decode_frame(r#"{"op":"library","cards":[{"id":3,"item":"Dragon","tradable":false},{"id":4,"item":"Bear"}]}"#)
            .unwrap();
        match lib {
            Some(BotEvent::Library(cards)) => {
                assert!(!cards[0].tradable);
                assert!(cards[1].tradable);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decode_frame(r#"{"op":"profile","gold":1200}"#).unwrap(), Some(BotEvent::Gold(1200)));
        assert_eq!(decode_frame(r#"{"op":"ping"}"#).unwrap(), None);
        assert!(decode_frame(r#"{"op":"nonsense"}"#).is_err());
    }

    #[test]
    fn test_preview_cuts_on_char_boundary() {
        let frame = format!("{}é{}", "a".repeat(199), "b".repeat(50));
        assert_eq!(preview(&frame).chars().count(), FRAME_PREVIEW_CHARS);
        assert!(preview(&frame).ends_with('é'));
        assert_eq!(preview("short é"), "short é");
    }

    #[tokio::test]
    async fn test_undecodable_multibyte_frame_keeps_pump_alive() {
        let _log = tracing::subscriber::set_default(tracing_subscriber::fmt().with_test_writer().finish());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // Wait for the login before sending anything
            let _ = ws.next().await;

            // Byte 200 falls inside the two-byte 'é'
            let bad = format!(r#"{{"op":"x","t":"{}é{}"}}"#, "a".repeat(184), "b".repeat(50));
            ws.send(Message::Text(bad)).await.unwrap();
            ws.send(Message::Text(r#"{"op":"room_joined","room":"trade-1"}"#.to_string()))
                .await
                .unwrap();
            ws
        });

        let config = BotConfig {
            gateway_url: format!("ws://{}", addr),
            bot_name: "Bot".to_string(),
            ..BotConfig::default()
        };
        let mut conn = connect(&config).await.unwrap();

        assert_eq!(conn.events.recv().await, Some(BotEvent::RoomJoined("trade-1".to_string())));
        assert!(!conn.pump.is_finished());

        drop(server.await.unwrap());
        match conn.events.recv().await {
            Some(BotEvent::Disconnected(_)) => {}
            other => panic!("expected disconnect, got {other:?}"),
        }
        assert!(conn.pump.await.is_ok());
    }

    #[tokio::test]
    async fn test_gateway_round_trip_and_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let mut texts = Vec::new();
            while texts.len() < 2 {
                match ws.next().await {
                    Some(Ok(Message::Text(t))) => {
                        if texts.is_empty() {
                            ws.send(Message::Text(r#"{"op":"room_joined","room":"clockwork"}"#.to_string()))
                                .await
                                .unwrap();
                        }
                        texts.push(t);
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            ws.close(None).await.unwrap();
            texts
        });

        let config = BotConfig {
            gateway_url: format!("ws://{}", addr),
            bot_name: "Bot".to_string(),
            ..BotConfig::default()
        };
        let mut conn = connect(&config).await.unwrap();

        assert_eq!(conn.events.recv().await, Some(BotEvent::RoomJoined("clockwork".to_string())));
        conn.transport.say("clockwork", "hello");

        let texts = server.await.unwrap();
        assert!(texts[0].contains(r#""op":"login""#));
        assert_eq!(texts[1], r#"{"op":"say","room":"clockwork","text":"hello"}"#);

        match conn.events.recv().await {
            Some(BotEvent::Disconnected(_)) => {}
            other => panic!("expected disconnect, got {other:?}"),
        }
    }
}
