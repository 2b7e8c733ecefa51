//! Filtered, sorted projection of the ticket store for the presentation
//! layer.
//!
//! Pure function of (tickets, view configuration, now) — no hidden state,
//! so the same inputs always produce the same frame and an unrelated state
//! change can never visibly reorder tickets. Sorting uses the standard
//! stable sort; ties keep feed order.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::protocol::SummaryRow;
use crate::status::{derive_ticket_status, CanonicalStatus, TicketStatus};
use crate::sync::{Ticket, TicketStore};

// ---------------------------------------------------------------------------
// View configuration
// ---------------------------------------------------------------------------

/// Display granularity: whole tickets, or one card per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ViewMode {
    Kot,
    Item,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SortKey {
    Time,
    Table,
}

/// Filter/sort/view state owned by the UI controls, read-only to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewConfig {
    /// Canonical item states that pass the filter.
    pub state_filter: BTreeSet<CanonicalStatus>,
    /// Enabled order-type categories. Empty set means every category.
    pub order_types: BTreeSet<String>,
    pub sort_key: SortKey,
    /// Only honored for `SortKey::Time`; table sort is fixed ascending.
    pub sort_ascending: bool,
    pub view_mode: ViewMode,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            state_filter: [CanonicalStatus::Pending, CanonicalStatus::Ready]
                .into_iter()
                .collect(),
            order_types: BTreeSet::new(),
            sort_key: SortKey::Time,
            sort_ascending: false,
            view_mode: ViewMode::Item,
        }
    }
}

// ---------------------------------------------------------------------------
// Age bands
// ---------------------------------------------------------------------------

/// Elapsed-time classification for display emphasis. Derived continuously,
/// never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgeBand {
    Nominal,
    Warning,
    Critical,
}

/// 0–3 min nominal, 3–5 min warning, ≥5 min critical — except that a unit
/// older than 30 seconds with any unacknowledged item jumps straight to
/// critical.
pub fn age_band(created_on: DateTime<Utc>, any_pending: bool, now: DateTime<Utc>) -> AgeBand {
    let elapsed_secs = (now - created_on).num_seconds().max(0);
    if elapsed_secs >= 300 {
        AgeBand::Critical
    } else if elapsed_secs >= 180 {
        AgeBand::Warning
    } else if elapsed_secs > 30 && any_pending {
        AgeBand::Critical
    } else {
        AgeBand::Nominal
    }
}

// ---------------------------------------------------------------------------
// Renderable output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderItem {
    pub i_code: String,
    pub name: String,
    pub qty: f64,
    pub comment: Option<String>,
    pub status: CanonicalStatus,
}

/// One display unit: a whole ticket in KOT mode, a synthetic single-item
/// ticket in ITEM mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderTicket {
    pub kot_no: i64,
    pub bill_no: String,
    pub table_no: i64,
    pub order_type: String,
    pub created_on: DateTime<Utc>,
    pub steward: Option<String>,
    pub comment: Option<String>,
    pub status: TicketStatus,
    pub age_band: AgeBand,
    pub items: Vec<RenderItem>,
}

/// Everything the presentation layer needs to redraw.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Frame {
    pub tickets: Vec<RenderTicket>,
    /// Count of visible source tickets, before ITEM-mode explosion.
    pub kot_count: usize,
    pub summary: Vec<SummaryRow>,
    /// Delivered board for the recall surface, in feed order.
    pub delivered: Vec<RenderTicket>,
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

/// Build the renderable frame from the store.
pub fn project(store: &TicketStore, config: &ViewConfig, now: DateTime<Utc>) -> Frame {
    let mut ordered: Vec<&Ticket> = store.tickets().iter().collect();
    match config.sort_key {
        SortKey::Time => {
            if config.sort_ascending {
                ordered.sort_by(|a, b| a.created_on.cmp(&b.created_on));
            } else {
                ordered.sort_by(|a, b| b.created_on.cmp(&a.created_on));
            }
        }
        SortKey::Table => ordered.sort_by(|a, b| a.table_no.cmp(&b.table_no)),
    }

    let mut tickets = Vec::new();
    let mut kot_count = 0usize;

    for ticket in ordered {
        if !config.order_types.is_empty() && !config.order_types.contains(&ticket.order_type) {
            continue;
        }
        let passing: Vec<RenderItem> = ticket
            .items
            .iter()
            .filter(|it| config.state_filter.contains(&it.status))
            .map(|it| RenderItem {
                i_code: it.i_code.clone(),
                name: it.name.clone(),
                qty: it.qty,
                comment: it.comment.clone(),
                status: it.status,
            })
            .collect();
        if passing.is_empty() {
            continue;
        }
        kot_count += 1;

        match config.view_mode {
            ViewMode::Kot => tickets.push(render_unit(ticket, passing, now)),
            ViewMode::Item => {
                // Each passing item becomes its own independently timed,
                // independently actionable card.
                for item in passing {
                    tickets.push(render_unit(ticket, vec![item], now));
                }
            }
        }
    }

    let delivered = store
        .delivered()
        .iter()
        .map(|ticket| {
            let items = ticket
                .items
                .iter()
                .map(|it| RenderItem {
                    i_code: it.i_code.clone(),
                    name: it.name.clone(),
                    qty: it.qty,
                    comment: it.comment.clone(),
                    status: it.status,
                })
                .collect();
            render_unit(ticket, items, now)
        })
        .collect();

    Frame {
        tickets,
        kot_count,
        summary: store.summary().to_vec(),
        delivered,
    }
}

fn render_unit(ticket: &Ticket, items: Vec<RenderItem>, now: DateTime<Utc>) -> RenderTicket {
    let statuses: Vec<CanonicalStatus> = items.iter().map(|it| it.status).collect();
    let any_pending = statuses.iter().any(|s| !s.is_acked());
    RenderTicket {
        kot_no: ticket.kot_no,
        bill_no: ticket.bill_no.clone(),
        table_no: ticket.table_no,
        order_type: ticket.order_type.clone(),
        created_on: ticket.created_on,
        steward: ticket.steward.clone(),
        comment: ticket.comment.clone(),
        status: derive_ticket_status(&statuses),
        age_band: age_band(ticket.created_on, any_pending, now),
        items,
    }
}

// ===========================================================================
// Tests
// ===========================================================================
