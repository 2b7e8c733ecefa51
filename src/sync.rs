//! Ticket store and snapshot reconciliation.
//!
//! The feed repeats full snapshots; each one is authoritative and
//! exhaustive, so merging is replace-by-key rather than patching. The one
//! exception is an item with a live optimistic override (a user acted and
//! the backend has not confirmed yet): its displayed status is the action's
//! intended state until the feed's own value agrees or the action times
//! out. Without that window, a snapshot generated before the backend
//! persisted the action would visibly revert the user's tap.
//!
//! The store is exclusively mutated here and by the action submitter, both
//! on the engine's single event loop. Nothing else holds a mutable handle.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::actions::ActionKind;
use crate::protocol::{RawTicket, Snapshot, SummaryRow};
use crate::status::{canonical_status, derive_ticket_status, CanonicalStatus, TicketStatus};

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

/// One line item of a ticket, after status normalization.
#[derive(Debug, Clone)]
pub struct Item {
    pub i_code: String,
    pub name: String,
    pub qty: f64,
    pub comment: Option<String>,
    /// Status as last reported by the feed.
    pub raw_status: CanonicalStatus,
    /// Status shown to the kitchen — the raw status, or a live optimistic
    /// override if one is in flight for this item.
    pub status: CanonicalStatus,
}

/// One kitchen order ticket (KOT).
#[derive(Debug, Clone)]
pub struct Ticket {
    pub kot_no: i64,
    pub bill_no: String,
    pub table_no: i64,
    pub order_type: String,
    pub created_on: DateTime<Utc>,
    pub steward: Option<String>,
    pub comment: Option<String>,
    pub items: Vec<Item>,
}

impl Ticket {
    fn from_raw(raw: RawTicket, fallback_created_on: DateTime<Utc>) -> Self {
        let items = raw
            .items
            .into_iter()
            .map(|it| {
                let raw_status = canonical_status(it.status.as_deref(), it.flag());
                Item {
                    i_code: it.i_code,
                    name: it.name,
                    qty: it.qty,
                    comment: it.comment,
                    raw_status,
                    status: raw_status,
                }
            })
            .collect();
        Self {
            kot_no: raw.kot_no,
            bill_no: raw.bill_no.unwrap_or_default(),
            table_no: raw.table_no,
            order_type: raw.order_type,
            created_on: raw.created_on.unwrap_or(fallback_created_on),
            steward: raw.steward,
            comment: raw.comment,
            items,
        }
    }

    pub fn item(&self, i_code: &str) -> Option<&Item> {
        self.items.iter().find(|it| it.i_code == i_code)
    }

    pub fn item_mut(&mut self, i_code: &str) -> Option<&mut Item> {
        self.items.iter_mut().find(|it| it.i_code == i_code)
    }

    /// Aggregate status over displayed item statuses. Derived fresh on every
    /// call; never cached.
    pub fn aggregate_status(&self) -> TicketStatus {
        let statuses: Vec<CanonicalStatus> = self.items.iter().map(|it| it.status).collect();
        derive_ticket_status(&statuses)
    }

    fn raw_aggregate_status(&self) -> TicketStatus {
        let statuses: Vec<CanonicalStatus> = self.items.iter().map(|it| it.raw_status).collect();
        derive_ticket_status(&statuses)
    }
}

/// A locally issued, not-yet-confirmed mutation awaiting the feed's
/// agreement or a timeout.
#[derive(Debug, Clone)]
pub struct PendingAction {
    pub kind: ActionKind,
    pub intended: CanonicalStatus,
    pub deadline: DateTime<Utc>,
}

/// New-arrival events for the alert collaborator. Fired exactly once per
/// transition, never repeated for the same state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arrival {
    /// Ticket number seen for the first time.
    NewTicket { kot_no: i64 },
    /// Existing ticket moved out of fully-pending (delivery display variant).
    StatusAdvance { kot_no: i64, status: TicketStatus },
}

/// Result of one reconciliation pass.
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// True when the merge produced any observable difference. A snapshot
    /// that changes nothing must not trigger a re-render or alert sound.
    pub changed: bool,
    pub arrivals: Vec<Arrival>,
}

// ---------------------------------------------------------------------------
// Ticket store
// ---------------------------------------------------------------------------

/// Process-wide ticket table. Tickets keep feed order, which is what breaks
/// sort ties downstream.
#[derive(Debug)]
pub struct TicketStore {
    station_name: String,
    tickets: Vec<Ticket>,
    summary: Vec<SummaryRow>,
    delivered: Vec<Ticket>,
    pending: HashMap<(i64, String), PendingAction>,
    seen_kot_nos: HashSet<i64>,
    prev_raw_status: HashMap<i64, TicketStatus>,
}

impl TicketStore {
    pub fn new(station_name: impl Into<String>) -> Self {
        Self {
            station_name: station_name.into(),
            tickets: Vec::new(),
            summary: Vec::new(),
            delivered: Vec::new(),
            pending: HashMap::new(),
            seen_kot_nos: HashSet::new(),
            prev_raw_status: HashMap::new(),
        }
    }

    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    pub fn summary(&self) -> &[SummaryRow] {
        &self.summary
    }

    pub fn delivered(&self) -> &[Ticket] {
        &self.delivered
    }

    pub fn ticket(&self, kot_no: i64) -> Option<&Ticket> {
        self.tickets.iter().find(|t| t.kot_no == kot_no)
    }

    pub fn ticket_mut(&mut self, kot_no: i64) -> Option<&mut Ticket> {
        self.tickets.iter_mut().find(|t| t.kot_no == kot_no)
    }

    pub fn delivered_ticket(&self, kot_no: i64) -> Option<&Ticket> {
        self.delivered.iter().find(|t| t.kot_no == kot_no)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Apply an optimistic override: show `intended` for the item now and
    /// keep showing it until the feed confirms or `deadline` passes.
    /// Returns false when the item is unknown.
    pub fn set_override(
        &mut self,
        kot_no: i64,
        i_code: &str,
        kind: ActionKind,
        intended: CanonicalStatus,
        deadline: DateTime<Utc>,
    ) -> bool {
        let Some(ticket) = self.ticket_mut(kot_no) else {
            return false;
        };
        let Some(item) = ticket.item_mut(i_code) else {
            return false;
        };
        item.status = intended;
        self.pending.insert(
            (kot_no, i_code.to_string()),
            PendingAction {
                kind,
                intended,
                deadline,
            },
        );
        true
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Merge one snapshot into the store. Replace-by-key: every ticket in
    /// the snapshot replaces its local counterpart wholesale, except items
    /// under a live pending-action override; local tickets absent from the
    /// snapshot are removed.
    pub fn apply_snapshot(&mut self, snapshot: Snapshot, now: DateTime<Utc>) -> MergeOutcome {
        let mut incoming = self.sanitize(snapshot.tickets, now, true);

        // Pending-action overrides: confirmed or expired entries clear, live
        // ones pin the displayed status to the intended value.
        for ticket in &mut incoming {
            for item in &mut ticket.items {
                let key = (ticket.kot_no, item.i_code.clone());
                match self.pending.get(&key) {
                    Some(action) if action.deadline <= now => {
                        debug!(
                            kot_no = ticket.kot_no,
                            i_code = %item.i_code,
                            "Pending action timed out, feed value takes over"
                        );
                        self.pending.remove(&key);
                    }
                    Some(action) if item.raw_status == action.intended => {
                        debug!(
                            kot_no = ticket.kot_no,
                            i_code = %item.i_code,
                            "Pending action confirmed by feed"
                        );
                        self.pending.remove(&key);
                    }
                    Some(action) => {
                        item.status = action.intended;
                    }
                    None => {}
                }
            }
        }

        // The feed is exhaustive: overrides for vanished tickets/items are moot.
        self.pending.retain(|(kot_no, i_code), _| {
            incoming
                .iter()
                .any(|t| t.kot_no == *kot_no && t.item(i_code).is_some())
        });

        let delivered = self.sanitize(snapshot.delivered_tickets, now, false);

        let changed = !same_observable(&self.tickets, &incoming)
            || self.summary != snapshot.summary
            || !same_observable(&self.delivered, &delivered);

        let arrivals = self.detect_arrivals(&incoming);

        self.tickets = incoming;
        self.summary = snapshot.summary;
        self.delivered = delivered;

        MergeOutcome { changed, arrivals }
    }

    /// Drop expired overrides outside of a merge (timer tick). Returns true
    /// when any displayed status reverted to the feed value.
    pub fn expire_overrides(&mut self, now: DateTime<Utc>) -> bool {
        let expired: Vec<(i64, String)> = self
            .pending
            .iter()
            .filter(|(_, action)| action.deadline <= now)
            .map(|(key, _)| key.clone())
            .collect();

        let mut changed = false;
        for (kot_no, i_code) in expired {
            self.pending.remove(&(kot_no, i_code.clone()));
            if let Some(item) = self.ticket_mut(kot_no).and_then(|t| t.item_mut(&i_code)) {
                if item.status != item.raw_status {
                    debug!(kot_no, i_code = %i_code, "Optimistic override expired");
                    item.status = item.raw_status;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Station filtering, vacuous-ticket discard, and duplicate-kot
    /// defensive discard. Station routing only applies to the active board.
    fn sanitize(
        &self,
        raw_tickets: Vec<RawTicket>,
        now: DateTime<Utc>,
        filter_station: bool,
    ) -> Vec<Ticket> {
        let mut out: Vec<Ticket> = Vec::with_capacity(raw_tickets.len());
        let mut seen: HashSet<i64> = HashSet::new();

        for raw in raw_tickets {
            if filter_station {
                if let Some(station) = &raw.station {
                    if station != &self.station_name {
                        continue;
                    }
                }
            }
            if raw.items.is_empty() {
                debug!(kot_no = raw.kot_no, "Discarding vacuous ticket with no items");
                continue;
            }
            if !seen.insert(raw.kot_no) {
                warn!(
                    kot_no = raw.kot_no,
                    "Duplicate ticket number within one snapshot, discarding entry"
                );
                continue;
            }

            // A feed variant that omits created_on gets a sticky first-seen
            // time, not a fresh one per push. The delivered list omits it
            // unconditionally, and a ticket can hop boards between pushes,
            // so consult the board this list feeds first and fall back to
            // the other one.
            let fallback = if raw.created_on.is_none() {
                let prior = if filter_station {
                    self.ticket(raw.kot_no)
                        .or_else(|| self.delivered_ticket(raw.kot_no))
                } else {
                    self.delivered_ticket(raw.kot_no)
                        .or_else(|| self.ticket(raw.kot_no))
                };
                prior.map(|t| t.created_on).unwrap_or(now)
            } else {
                now
            };
            out.push(Ticket::from_raw(raw, fallback));
        }
        out
    }

    fn detect_arrivals(&mut self, incoming: &[Ticket]) -> Vec<Arrival> {
        let mut arrivals = Vec::new();

        for ticket in incoming {
            let raw_status = ticket.raw_aggregate_status();
            if !self.seen_kot_nos.contains(&ticket.kot_no) {
                arrivals.push(Arrival::NewTicket {
                    kot_no: ticket.kot_no,
                });
            } else if self.prev_raw_status.get(&ticket.kot_no) == Some(&TicketStatus::Pending)
                && raw_status != TicketStatus::Pending
            {
                arrivals.push(Arrival::StatusAdvance {
                    kot_no: ticket.kot_no,
                    status: raw_status,
                });
            }
        }

        self.seen_kot_nos = incoming.iter().map(|t| t.kot_no).collect();
        self.prev_raw_status = incoming
            .iter()
            .map(|t| (t.kot_no, t.raw_aggregate_status()))
            .collect();
        arrivals
    }
}

/// Compare ticket lists on what the kitchen can actually see: identity,
/// descriptive fields, and each item's displayed status/qty/name. The raw
/// (pre-override) status is deliberately not part of this.
fn same_observable(a: &[Ticket], b: &[Ticket]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).all(|(x, y)| {
        x.kot_no == y.kot_no
            && x.bill_no == y.bill_no
            && x.table_no == y.table_no
            && x.order_type == y.order_type
            && x.created_on == y.created_on
            && x.steward == y.steward
            && x.comment == y.comment
            && x.items.len() == y.items.len()
            && x.items.iter().zip(&y.items).all(|(i, j)| {
                i.i_code == j.i_code
                    && i.name == j.name
                    && i.qty == j.qty
                    && i.comment == j.comment
                    && i.status == j.status
            })
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn snapshot(value: serde_json::Value) -> Snapshot {
        serde_json::from_value(value).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        "2024-03-01T12:00:00Z".parse().unwrap()
    }

    fn one_ticket_snapshot(status_flag: u8) -> Snapshot {
        snapshot(json!({
            "tickets": [{
                "kot_no": 101, "table_no": 4, "order_type": "Dine In",
                "created_on": "2024-03-01 11:55:00",
                "items": [{"i_code": "A", "name": "Soup", "qty": 1, "ack_status": status_flag}]
            }]
        }))
    }

    #[test]
    fn test_merge_adds_and_removes_tickets() {
        let mut store = TicketStore::new("NONE");
        let outcome = store.apply_snapshot(one_ticket_snapshot(0), t0());
        assert!(outcome.changed);
        assert_eq!(store.tickets().len(), 1);
        assert_eq!(outcome.arrivals, vec![Arrival::NewTicket { kot_no: 101 }]);

        // Feed is exhaustive: an empty snapshot removes everything.
        let outcome = store.apply_snapshot(snapshot(json!({"tickets": []})), t0());
        assert!(outcome.changed);
        assert!(store.tickets().is_empty());
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut store = TicketStore::new("NONE");
        let first = store.apply_snapshot(one_ticket_snapshot(0), t0());
        assert!(first.changed);

        let second = store.apply_snapshot(one_ticket_snapshot(0), t0());
        assert!(!second.changed);
        assert!(second.arrivals.is_empty());
    }

    #[test]
    fn test_override_survives_stale_snapshot_until_confirmed() {
        let mut store = TicketStore::new("NONE");
        store.apply_snapshot(one_ticket_snapshot(0), t0());

        let deadline = t0() + Duration::seconds(10);
        assert!(store.set_override(
            101,
            "A",
            ActionKind::AcknowledgeItem,
            CanonicalStatus::Ready,
            deadline,
        ));
        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Ready
        );

        // Stale snapshot still says Pending — the override wins.
        let outcome = store.apply_snapshot(one_ticket_snapshot(0), t0() + Duration::seconds(2));
        assert!(!outcome.changed);
        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Ready
        );
        assert_eq!(store.pending_count(), 1);

        // Confirmation: feed agrees, override cleared, nothing visibly changes.
        let outcome = store.apply_snapshot(one_ticket_snapshot(1), t0() + Duration::seconds(4));
        assert!(!outcome.changed);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Ready
        );
    }

    #[test]
    fn test_override_expires_on_merge_deadline() {
        let mut store = TicketStore::new("NONE");
        store.apply_snapshot(one_ticket_snapshot(0), t0());
        store.set_override(
            101,
            "A",
            ActionKind::AcknowledgeItem,
            CanonicalStatus::Ready,
            t0() + Duration::seconds(10),
        );

        // Past the deadline the feed value takes over again.
        let outcome = store.apply_snapshot(one_ticket_snapshot(0), t0() + Duration::seconds(11));
        assert!(outcome.changed);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Pending
        );
    }

    #[test]
    fn test_expire_overrides_on_tick() {
        let mut store = TicketStore::new("NONE");
        store.apply_snapshot(one_ticket_snapshot(0), t0());
        store.set_override(
            101,
            "A",
            ActionKind::AcknowledgeItem,
            CanonicalStatus::Ready,
            t0() + Duration::seconds(10),
        );

        assert!(!store.expire_overrides(t0() + Duration::seconds(5)));
        assert_eq!(store.pending_count(), 1);

        assert!(store.expire_overrides(t0() + Duration::seconds(10)));
        assert_eq!(store.pending_count(), 0);
        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Pending
        );
    }

    #[test]
    fn test_station_filter() {
        let mut store = TicketStore::new("GRILL");
        let outcome = store.apply_snapshot(
            snapshot(json!({
                "tickets": [
                    {"kot_no": 1, "kds_name": "GRILL",
                     "items": [{"i_code": "A", "name": "Steak", "qty": 1}]},
                    {"kot_no": 2, "kds_name": "FRYER",
                     "items": [{"i_code": "B", "name": "Fries", "qty": 1}]},
                    {"kot_no": 3,
                     "items": [{"i_code": "C", "name": "Salad", "qty": 1}]}
                ]
            })),
            t0(),
        );
        // Missing station field means the ticket belongs to every station.
        let kots: Vec<i64> = store.tickets().iter().map(|t| t.kot_no).collect();
        assert_eq!(kots, vec![1, 3]);
        assert_eq!(outcome.arrivals.len(), 2);
    }

    #[test]
    fn test_vacuous_and_duplicate_tickets_discarded() {
        let mut store = TicketStore::new("NONE");
        store.apply_snapshot(
            snapshot(json!({
                "tickets": [
                    {"kot_no": 1, "items": []},
                    {"kot_no": 2, "items": [{"i_code": "A", "name": "Tea", "qty": 1}]},
                    {"kot_no": 2, "items": [{"i_code": "Z", "name": "Imposter", "qty": 9}]}
                ]
            })),
            t0(),
        );
        assert_eq!(store.tickets().len(), 1);
        assert_eq!(store.ticket(2).unwrap().items[0].name, "Tea");
    }

    #[test]
    fn test_new_arrival_fires_once() {
        let mut store = TicketStore::new("NONE");
        let first = store.apply_snapshot(one_ticket_snapshot(0), t0());
        assert_eq!(first.arrivals.len(), 1);

        let second = store.apply_snapshot(one_ticket_snapshot(0), t0());
        assert!(second.arrivals.is_empty());
    }

    #[test]
    fn test_status_advance_fires_once_per_transition() {
        let mut store = TicketStore::new("NONE");
        store.apply_snapshot(one_ticket_snapshot(0), t0());

        let advanced = store.apply_snapshot(one_ticket_snapshot(1), t0());
        assert_eq!(
            advanced.arrivals,
            vec![Arrival::StatusAdvance {
                kot_no: 101,
                status: TicketStatus::Ready
            }]
        );

        // Same state again: no repeat alert.
        let repeat = store.apply_snapshot(one_ticket_snapshot(1), t0());
        assert!(repeat.arrivals.is_empty());
    }

    #[test]
    fn test_summary_and_delivered_replaced_wholesale() {
        let mut store = TicketStore::new("NONE");
        let outcome = store.apply_snapshot(
            snapshot(json!({
                "tickets": [],
                "summary": [{"name": "Soup", "qty": 3}],
                "delivered_tickets": [
                    {"kot_no": 9, "items": [{"i_code": "A", "name": "Soup", "qty": 1, "status": "Delivered"}]}
                ]
            })),
            t0(),
        );
        assert!(outcome.changed);
        assert_eq!(store.summary().len(), 1);
        assert_eq!(store.delivered().len(), 1);
        assert_eq!(
            store.delivered_ticket(9).unwrap().items[0].status,
            CanonicalStatus::Delivered
        );

        let outcome = store.apply_snapshot(snapshot(json!({"tickets": []})), t0());
        assert!(outcome.changed);
        assert!(store.summary().is_empty());
        assert!(store.delivered().is_empty());
    }

    #[test]
    fn test_missing_created_on_is_sticky_across_merges() {
        let mut store = TicketStore::new("NONE");
        let snap = json!({
            "tickets": [{"kot_no": 7, "items": [{"i_code": "A", "name": "Tea", "qty": 1}]}]
        });
        store.apply_snapshot(snapshot(snap.clone()), t0());
        let first_seen = store.ticket(7).unwrap().created_on;
        assert_eq!(first_seen, t0());

        let outcome = store.apply_snapshot(snapshot(snap), t0() + Duration::seconds(30));
        assert!(!outcome.changed);
        assert_eq!(store.ticket(7).unwrap().created_on, first_seen);
    }

    #[test]
    fn test_delivered_without_created_on_is_idempotent() {
        let mut store = TicketStore::new("NONE");
        let snap = json!({
            "tickets": [],
            "delivered_tickets": [
                {"kot_no": 9, "items": [{"i_code": "A", "name": "Soup", "qty": 1, "status": "Delivered"}]}
            ]
        });
        let first = store.apply_snapshot(snapshot(snap.clone()), t0());
        assert!(first.changed);
        let first_seen = store.delivered_ticket(9).unwrap().created_on;

        // Same push a second later must not look changed just because the
        // delivered list never carries created_on.
        let second = store.apply_snapshot(snapshot(snap), t0() + Duration::seconds(1));
        assert!(!second.changed);
        assert_eq!(store.delivered_ticket(9).unwrap().created_on, first_seen);
    }

    #[test]
    fn test_explicit_created_on_equal_to_merge_instant_is_taken() {
        let mut store = TicketStore::new("NONE");
        store.apply_snapshot(
            snapshot(json!({
                "tickets": [{"kot_no": 7, "created_on": "2024-03-01 11:00:00",
                             "items": [{"i_code": "A", "name": "Tea", "qty": 1}]}]
            })),
            t0(),
        );

        // Feed reports a created_on that happens to equal the merge instant;
        // an explicit value always wins over the stored one.
        let outcome = store.apply_snapshot(
            snapshot(json!({
                "tickets": [{"kot_no": 7, "created_on": "2024-03-01 12:00:00",
                             "items": [{"i_code": "A", "name": "Tea", "qty": 1}]}]
            })),
            t0(),
        );
        assert!(outcome.changed);
        assert_eq!(store.ticket(7).unwrap().created_on, t0());
    }
}
