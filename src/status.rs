//! Canonical item status and ticket aggregate status.
//!
//! The feed transmits item state in two incompatible shapes: a three-state
//! `status` string and a 0/1 acknowledgment flag, sometimes both on the same
//! item. Everything downstream works on one canonical enum, so the
//! normalization here must be total — any combination of raw fields maps to
//! exactly one state. Precedence: a recognized status string wins, then the
//! flag, then `Pending`.

use serde::{Deserialize, Serialize};

/// Normalized three-state item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CanonicalStatus {
    Pending,
    Ready,
    Delivered,
}

impl CanonicalStatus {
    /// Ready or Delivered — the item no longer needs kitchen attention.
    pub fn is_acked(self) -> bool {
        matches!(self, CanonicalStatus::Ready | CanonicalStatus::Delivered)
    }

    pub fn label(self) -> &'static str {
        match self {
            CanonicalStatus::Pending => "Pending",
            CanonicalStatus::Ready => "Ready",
            CanonicalStatus::Delivered => "Delivered",
        }
    }
}

/// Ticket-level status derived from item statuses. Never transmitted and
/// never stored; recomputed from scratch on every pass because item sets
/// shrink and grow between snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TicketStatus {
    Pending,
    Partial,
    Ready,
}

/// Map raw feed fields to the canonical status.
///
/// Total and deterministic: unrecognized strings fall through to the flag,
/// and an item with neither field is `Pending`.
pub fn canonical_status(status: Option<&str>, flag: Option<u8>) -> CanonicalStatus {
    if let Some(label) = status {
        match label.trim().to_ascii_lowercase().as_str() {
            "pending" => return CanonicalStatus::Pending,
            "ready" => return CanonicalStatus::Ready,
            "delivered" => return CanonicalStatus::Delivered,
            _ => {}
        }
    }
    match flag {
        Some(0) => CanonicalStatus::Pending,
        Some(_) => CanonicalStatus::Ready,
        None => CanonicalStatus::Pending,
    }
}

/// Aggregate a ticket's item statuses.
///
/// `Ready` iff there is at least one item and every item is acked;
/// `Partial` iff some but not all are acked; `Pending` otherwise, including
/// the vacuous zero-item case the caller should already have excluded.
pub fn derive_ticket_status(statuses: &[CanonicalStatus]) -> TicketStatus {
    let total = statuses.len();
    let acked = statuses.iter().filter(|s| s.is_acked()).count();
    if total > 0 && acked == total {
        TicketStatus::Ready
    } else if acked > 0 {
        TicketStatus::Partial
    } else {
        TicketStatus::Pending
    }
}

// ===========================================================================
// Tests
// ===========================================================================
