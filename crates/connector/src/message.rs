//! Wire messages exchanged with the price server and events delivered to subscribers
//!
//! Frames are JSON objects tagged by a `type` field. Ticks go to the tick buffer,
//! `pong` feeds the heartbeat, everything else is routed to subscribers by channel.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local channel carrying coalesced tick batches
pub const TICKS_BATCH_CHANNEL: &str = "ticks_batch";

/// Subscribers on this channel receive every routed event
pub const WILDCARD_CHANNEL: &str = "*";

/// A single price update for one symbol. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickUpdate {
    symbol: String,
    bid: f64,
    ask: f64,
    spread: f64,
    /// Epoch milliseconds
    timestamp: i64,
    /// Liquidity provider that quoted the price
    source: String,
}

impl TickUpdate {
    /// Build a tick; a missing spread is derived as `ask - bid`.
    pub fn new(
        symbol: impl Into<String>,
        bid: f64,
        ask: f64,
        spread: Option<f64>,
        timestamp: i64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            bid,
            ask,
            spread: spread.unwrap_or(ask - bid),
            timestamp,
            source: source.into(),
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn bid(&self) -> f64 {
        self.bid
    }

    pub fn ask(&self) -> f64 {
        self.ask
    }

    pub fn spread(&self) -> f64 {
        self.spread
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Wall-clock time of the quote, if the timestamp is in range
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

/// Tick frame as it appears on the wire
#[derive(Debug, Deserialize)]
struct TickFrame {
    symbol: String,
    bid: f64,
    ask: f64,
    #[serde(default)]
    spread: Option<f64>,
    #[serde(default = "now_millis")]
    timestamp: i64,
    #[serde(default, rename = "lp", alias = "source")]
    source: String,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl From<TickFrame> for TickUpdate {
    fn from(frame: TickFrame) -> Self {
        TickUpdate::new(
            frame.symbol,
            frame.bid,
            frame.ask,
            frame.spread,
            frame.timestamp,
            frame.source,
        )
    }
}

/// Outbound command sent to the price server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
    Ping,
}

impl Command {
    pub fn subscribe(channel: impl Into<String>) -> Self {
        Command::Subscribe {
            channel: channel.into(),
        }
    }

    pub fn unsubscribe(channel: impl Into<String>) -> Self {
        Command::Unsubscribe {
            channel: channel.into(),
        }
    }

    /// Channel the command refers to, if any
    pub fn channel(&self) -> Option<&str> {
        match self {
            Command::Subscribe { channel } | Command::Unsubscribe { channel } => Some(channel),
            Command::Ping => None,
        }
    }

    /// Serialize to a JSON text frame
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Non-tick message addressed to a channel (acks, account updates, errors, ...)
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub channel: String,
    /// Value of the frame's `type` field
    pub kind: String,
    pub payload: serde_json::Value,
}

/// Ordered, coalesced set of ticks from one flush window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickBatch {
    pub entries: Vec<TickUpdate>,
}

impl TickBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TicksBatch(TickBatch),
    Message(ChannelMessage),
}

impl Event {
    pub fn channel(&self) -> &str {
        match self {
            Event::TicksBatch(_) => TICKS_BATCH_CHANNEL,
            Event::Message(msg) => &msg.channel,
        }
    }
}

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("missing type field")]
    MissingType,
    #[error("invalid tick: {0}")]
    InvalidTick(serde_json::Error),
}

/// Parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Tick(TickUpdate),
    Pong,
    Channel(ChannelMessage),
}

/// Parse a raw inbound frame
pub fn parse_frame(data: &[u8]) -> Result<Inbound, ParseError> {
    let value: serde_json::Value = serde_json::from_slice(data)?;
    let kind = match value.as_object() {
        Some(obj) => obj
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or(ParseError::MissingType)?
            .to_string(),
        None => return Err(ParseError::NotAnObject),
    };

    match kind.as_str() {
        "tick" => {
            let frame: TickFrame =
                serde_json::from_value(value).map_err(ParseError::InvalidTick)?;
            Ok(Inbound::Tick(frame.into()))
        }
        "pong" => Ok(Inbound::Pong),
        _ => {
            let channel = value
                .get("channel")
                .and_then(|c| c.as_str())
                .unwrap_or(kind.as_str())
                .to_string();
            Ok(Inbound::Channel(ChannelMessage {
                channel,
                kind,
                payload: value,
            }))
        }
    }
}
