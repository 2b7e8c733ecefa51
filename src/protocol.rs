//! Push-feed wire protocol.
//!
//! One JSON object per text frame, both directions. Inbound frames are full
//! snapshots; outbound frames are user intents tagged with an `action`
//! field. The feed has grown several client variants over the years and the
//! ticket/item shapes differ between them (numeric `ack_status` vs
//! `ready_status` flags, `order_type` vs `bill_type`, numbers serialized as
//! strings), so the inbound types here are deliberately tolerant: every
//! variant normalizes into the same structs. A frame that lacks a `tickets`
//! array of the right shape fails as a whole — there is no partial apply.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::KdsError;

// ---------------------------------------------------------------------------
// Inbound: snapshot
// ---------------------------------------------------------------------------

/// One complete push of the current ticket set. The feed repeats these
/// continuously; each one is authoritative and exhaustive.
#[derive(Debug, Clone, Deserialize)]
pub struct Snapshot {
    /// Active tickets. Required — a frame without this array is not a
    /// snapshot and is discarded entirely.
    pub tickets: Vec<RawTicket>,

    /// Outstanding quantity per item name across all tickets. Informational,
    /// replaced wholesale each push.
    #[serde(default)]
    pub summary: Vec<SummaryRow>,

    /// Recently delivered tickets for the recall surface.
    #[serde(default)]
    pub delivered_tickets: Vec<RawTicket>,
}

impl Snapshot {
    /// Parse one inbound text frame. Any shape problem rejects the whole
    /// frame so a half-understood snapshot can never reach the store.
    pub fn parse(text: &str) -> Result<Self, KdsError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Aggregate item-name → outstanding-quantity row from the feed summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "de_flex_f64")]
    pub qty: f64,
}

/// Ticket as transmitted, before station filtering and status normalization.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTicket {
    #[serde(deserialize_with = "de_flex_i64")]
    pub kot_no: i64,

    #[serde(default, deserialize_with = "de_flex_opt_string")]
    pub bill_no: Option<String>,

    #[serde(default, deserialize_with = "de_flex_i64")]
    pub table_no: i64,

    /// Order category (dine-in, takeaway, ...). Older feeds call this
    /// `bill_type`.
    #[serde(default, alias = "bill_type")]
    pub order_type: String,

    #[serde(default, deserialize_with = "de_flex_opt_datetime")]
    pub created_on: Option<DateTime<Utc>>,

    /// Station this ticket is routed to. Absent means "every station".
    #[serde(default, rename = "kds_name", deserialize_with = "de_flex_opt_string")]
    pub station: Option<String>,

    /// Opaque pass-through fields, not interpreted by the engine.
    #[serde(default, alias = "stwd", deserialize_with = "de_flex_opt_string")]
    pub steward: Option<String>,
    #[serde(default, alias = "Comments", deserialize_with = "de_flex_opt_string")]
    pub comment: Option<String>,

    #[serde(default)]
    pub items: Vec<RawItem>,
}

/// Line item as transmitted. Raw status arrives as some combination of a
/// three-state `status` string and a 0/1 acknowledgment flag; see
/// [`crate::status::canonical_status`] for the normalization rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RawItem {
    #[serde(deserialize_with = "de_flex_string")]
    pub i_code: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "de_flex_f64")]
    pub qty: f64,

    #[serde(default, deserialize_with = "de_flex_opt_string")]
    pub comment: Option<String>,

    /// Three-state label variant: "Pending" / "Ready" / "Delivered".
    #[serde(default, deserialize_with = "de_flex_opt_string")]
    pub status: Option<String>,

    /// Acknowledgment flag variant (KOT displays).
    #[serde(default, deserialize_with = "de_flex_flag")]
    pub ack_status: Option<u8>,

    /// Readiness flag variant (delivery/expo displays).
    #[serde(default, deserialize_with = "de_flex_flag")]
    pub ready_status: Option<u8>,
}

impl RawItem {
    /// Whichever boolean-like flag this feed variant carries.
    pub fn flag(&self) -> Option<u8> {
        self.ack_status.or(self.ready_status)
    }
}

// ---------------------------------------------------------------------------
// Outbound: user intents
// ---------------------------------------------------------------------------

/// Key for one item inside a ticket-scoped message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemRef {
    pub i_code: String,
}

/// Messages the station sends back over the same connection. Delivery is
/// fire-and-forget: the next authoritative snapshot is the recovery path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Identity announcement, sent once per successful (re)connect.
    InitStation { name: String },

    /// Acknowledge one or more items of a ticket.
    AckTicket {
        kot_no: i64,
        bill_no: String,
        items: Vec<ItemRef>,
    },

    /// Advance a whole ticket (delivery displays).
    ToggleTicket {
        kot_no: i64,
        bill_no: String,
        table_no: i64,
        items: Vec<ItemRef>,
    },

    /// Flip a single item between ready and pending.
    ToggleItem {
        kot_no: i64,
        bill_no: String,
        i_code: String,
    },

    /// Pull a delivered item back onto the active board.
    RecallItem {
        kot_no: i64,
        bill_no: String,
        i_code: String,
    },
}

impl OutboundMessage {
    pub fn to_wire(&self) -> String {
        // Serialization of these enums cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tolerant field deserializers
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(untagged)]
enum FlexScalar {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

fn de_flex_i64<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    match FlexScalar::deserialize(d)? {
        FlexScalar::Int(n) => Ok(n),
        FlexScalar::Float(f) => Ok(f as i64),
        FlexScalar::Str(s) => Ok(s.trim().parse::<i64>().map_err(serde::de::Error::custom)?),
        FlexScalar::Bool(b) => Ok(b as i64),
        FlexScalar::Null => Ok(0),
    }
}

fn de_flex_f64<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    match FlexScalar::deserialize(d)? {
        FlexScalar::Int(n) => Ok(n as f64),
        FlexScalar::Float(f) => Ok(f),
        FlexScalar::Str(s) => Ok(s.trim().parse::<f64>().map_err(serde::de::Error::custom)?),
        FlexScalar::Bool(b) => Ok(b as i64 as f64),
        FlexScalar::Null => Ok(0.0),
    }
}

fn de_flex_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match FlexScalar::deserialize(d)? {
        FlexScalar::Str(s) => Ok(s),
        FlexScalar::Int(n) => Ok(n.to_string()),
        FlexScalar::Float(f) => Ok(f.to_string()),
        FlexScalar::Bool(b) => Ok(b.to_string()),
        FlexScalar::Null => Ok(String::new()),
    }
}

fn de_flex_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    match FlexScalar::deserialize(d)? {
        FlexScalar::Null => Ok(None),
        FlexScalar::Str(s) if s.is_empty() => Ok(None),
        FlexScalar::Str(s) => Ok(Some(s)),
        FlexScalar::Int(n) => Ok(Some(n.to_string())),
        FlexScalar::Float(f) => Ok(Some(f.to_string())),
        FlexScalar::Bool(b) => Ok(Some(b.to_string())),
    }
}

/// 0/1 flag that various feed variants send as a number, numeric string, or
/// boolean. Unrecognized values read as absent rather than failing the frame.
fn de_flex_flag<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u8>, D::Error> {
    Ok(match FlexScalar::deserialize(d)? {
        FlexScalar::Int(n) => Some((n != 0) as u8),
        FlexScalar::Float(f) => Some((f != 0.0) as u8),
        FlexScalar::Bool(b) => Some(b as u8),
        FlexScalar::Str(s) => match s.trim().parse::<i64>() {
            Ok(n) => Some((n != 0) as u8),
            Err(_) => None,
        },
        FlexScalar::Null => None,
    })
}

fn de_flex_opt_datetime<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match FlexScalar::deserialize(d)? {
        FlexScalar::Str(s) => parse_feed_datetime(&s),
        FlexScalar::Int(n) => Utc.timestamp_opt(n, 0).single(),
        _ => None,
    })
}

/// Parse the datetime spellings seen across feed variants: RFC 3339, and the
/// bare `YYYY-MM-DD HH:MM:SS` form the backend emits for `created_on`.
/// Naive timestamps are taken as UTC.
pub fn parse_feed_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

// ===========================================================================
// Tests
// ===========================================================================
