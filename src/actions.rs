//! User intent submission.
//!
//! The presentation layer has exactly one write entry point into the
//! engine: [`submit`]. It validates the intent against the current store,
//! applies the intended end state optimistically so the board reflects the
//! tap before any network round trip, registers the pending-action
//! override(s), and hands back the single outbound message to emit. There
//! is no client-side retry queue — if the connection is down the message is
//! simply not delivered this cycle, and the next reconnect plus the next
//! authoritative snapshot recover the truth.

use chrono::{DateTime, Duration, Utc};

use crate::error::KdsError;
use crate::protocol::{ItemRef, OutboundMessage};
use crate::status::CanonicalStatus;
use crate::sync::TicketStore;

/// The user intents a station can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    AcknowledgeItem,
    AcknowledgeTicket,
    ToggleItem,
    ToggleTicket,
    RecallItem,
}

/// Accepted submission: the one message to put on the wire, plus an
/// optional transient notice for the operator.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub message: OutboundMessage,
    pub notice: Option<String>,
}

/// Translate a user intent into an optimistic store mutation and one
/// outbound message. No-op intents are rejected before anything is sent or
/// mutated.
///
/// Ticket-wide kinds apply to every item as one batch — all overrides are
/// registered before this returns, so partial application is never
/// observable.
pub fn submit(
    store: &mut TicketStore,
    kind: ActionKind,
    kot_no: i64,
    i_code: Option<&str>,
    now: DateTime<Utc>,
    timeout: Duration,
) -> Result<SubmitOutcome, KdsError> {
    let deadline = now + timeout;
    match kind {
        ActionKind::AcknowledgeItem => {
            let i_code = require_item_code(i_code)?;
            let (bill_no, name, status) = item_view(store, kot_no, i_code)?;

            // A second tap on an already-acked item advances it to delivered.
            let already_acked = status.is_acked();
            let intended = if already_acked {
                CanonicalStatus::Delivered
            } else {
                CanonicalStatus::Ready
            };
            store.set_override(kot_no, i_code, kind, intended, deadline);

            Ok(SubmitOutcome {
                message: OutboundMessage::AckTicket {
                    kot_no,
                    bill_no,
                    items: vec![ItemRef {
                        i_code: i_code.to_string(),
                    }],
                },
                notice: Some(if already_acked {
                    format!("Item Delivered: {name}")
                } else {
                    format!("Item Accepted: {name}")
                }),
            })
        }

        ActionKind::AcknowledgeTicket => {
            let ticket = store
                .ticket(kot_no)
                .ok_or_else(|| unknown_ticket(kot_no))?;
            let bill_no = ticket.bill_no.clone();
            let all_acked = ticket.items.iter().all(|it| it.status.is_acked());
            let intended = if all_acked {
                CanonicalStatus::Delivered
            } else {
                CanonicalStatus::Ready
            };
            let item_codes: Vec<String> =
                ticket.items.iter().map(|it| it.i_code.clone()).collect();

            for code in &item_codes {
                store.set_override(kot_no, code, kind, intended, deadline);
            }

            Ok(SubmitOutcome {
                message: OutboundMessage::AckTicket {
                    kot_no,
                    bill_no,
                    items: item_codes
                        .into_iter()
                        .map(|i_code| ItemRef { i_code })
                        .collect(),
                },
                notice: Some(if all_acked {
                    format!("Order Delivered: KOT {kot_no}")
                } else {
                    format!("Order Accepted: KOT {kot_no}")
                }),
            })
        }

        ActionKind::ToggleItem => {
            let i_code = require_item_code(i_code)?;
            let (bill_no, _, status) = item_view(store, kot_no, i_code)?;
            let intended = if status.is_acked() {
                CanonicalStatus::Pending
            } else {
                CanonicalStatus::Ready
            };
            store.set_override(kot_no, i_code, kind, intended, deadline);

            Ok(SubmitOutcome {
                message: OutboundMessage::ToggleItem {
                    kot_no,
                    bill_no,
                    i_code: i_code.to_string(),
                },
                notice: None,
            })
        }

        ActionKind::ToggleTicket => {
            let ticket = store
                .ticket(kot_no)
                .ok_or_else(|| unknown_ticket(kot_no))?;
            if !ticket.items.iter().any(|it| it.status.is_acked()) {
                return Err(KdsError::RejectedAction("No Orders Ready".into()));
            }
            let bill_no = ticket.bill_no.clone();
            let table_no = ticket.table_no;
            let item_codes: Vec<String> =
                ticket.items.iter().map(|it| it.i_code.clone()).collect();

            for code in &item_codes {
                store.set_override(kot_no, code, kind, CanonicalStatus::Delivered, deadline);
            }

            Ok(SubmitOutcome {
                message: OutboundMessage::ToggleTicket {
                    kot_no,
                    bill_no,
                    table_no,
                    items: item_codes
                        .into_iter()
                        .map(|i_code| ItemRef { i_code })
                        .collect(),
                },
                notice: None,
            })
        }

        ActionKind::RecallItem => {
            let i_code = require_item_code(i_code)?;

            // Recall normally targets the delivered board; an item can also
            // still sit on the active board under a live override.
            let bill_no = if let Some(ticket) = store.delivered_ticket(kot_no) {
                ticket.bill_no.clone()
            } else if let Some(ticket) = store.ticket(kot_no) {
                ticket.bill_no.clone()
            } else {
                return Err(unknown_ticket(kot_no));
            };

            // Optimistic only when the item is on the active board; the
            // delivered list itself is feed-owned and replaced wholesale.
            store.set_override(kot_no, i_code, kind, CanonicalStatus::Pending, deadline);

            Ok(SubmitOutcome {
                message: OutboundMessage::RecallItem {
                    kot_no,
                    bill_no,
                    i_code: i_code.to_string(),
                },
                notice: Some("Items Recalled".into()),
            })
        }
    }
}

fn require_item_code(i_code: Option<&str>) -> Result<&str, KdsError> {
    i_code.ok_or_else(|| KdsError::RejectedAction("Action requires an item".into()))
}

fn unknown_ticket(kot_no: i64) -> KdsError {
    KdsError::RejectedAction(format!("Unknown ticket: KOT {kot_no}"))
}

fn item_view(
    store: &TicketStore,
    kot_no: i64,
    i_code: &str,
) -> Result<(String, String, CanonicalStatus), KdsError> {
    let ticket = store.ticket(kot_no).ok_or_else(|| unknown_ticket(kot_no))?;
    let item = ticket.item(i_code).ok_or_else(|| {
        KdsError::RejectedAction(format!("Unknown item {i_code} on KOT {kot_no}"))
    })?;
    Ok((ticket.bill_no.clone(), item.name.clone(), item.status))
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Snapshot;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        "2024-03-01T12:00:00Z".parse().unwrap()
    }

    fn timeout() -> Duration {
        Duration::seconds(10)
    }

    fn store_with_ticket() -> TicketStore {
        let mut store = TicketStore::new("NONE");
        let snap: Snapshot = serde_json::from_value(json!({
            "tickets": [{
                "kot_no": 101, "bill_no": "B-9", "table_no": 4, "order_type": "Dine In",
                "created_on": "2024-03-01 11:55:00",
                "items": [
                    {"i_code": "A", "name": "Soup", "qty": 1, "ack_status": 0},
                    {"i_code": "B", "name": "Bread", "qty": 2, "ack_status": 0}
                ]
            }]
        }))
        .unwrap();
        store.apply_snapshot(snap, t0());
        store
    }

    #[test]
    fn test_acknowledge_item_is_optimistic() {
        let mut store = store_with_ticket();
        let outcome = submit(
            &mut store,
            ActionKind::AcknowledgeItem,
            101,
            Some("A"),
            t0(),
            timeout(),
        )
        .unwrap();

        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Ready
        );
        assert_eq!(store.pending_count(), 1);
        assert_eq!(outcome.notice.as_deref(), Some("Item Accepted: Soup"));
        match outcome.message {
            OutboundMessage::AckTicket { kot_no, items, .. } => {
                assert_eq!(kot_no, 101);
                assert_eq!(items.len(), 1);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_acknowledge_item_second_tap_delivers() {
        let mut store = store_with_ticket();
        submit(
            &mut store,
            ActionKind::AcknowledgeItem,
            101,
            Some("A"),
            t0(),
            timeout(),
        )
        .unwrap();
        let outcome = submit(
            &mut store,
            ActionKind::AcknowledgeItem,
            101,
            Some("A"),
            t0(),
            timeout(),
        )
        .unwrap();

        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Delivered
        );
        assert_eq!(outcome.notice.as_deref(), Some("Item Delivered: Soup"));
    }

    #[test]
    fn test_acknowledge_ticket_applies_to_all_items_atomically() {
        let mut store = store_with_ticket();
        let outcome = submit(
            &mut store,
            ActionKind::AcknowledgeTicket,
            101,
            None,
            t0(),
            timeout(),
        )
        .unwrap();

        let ticket = store.ticket(101).unwrap();
        assert!(ticket.items.iter().all(|it| it.status == CanonicalStatus::Ready));
        assert_eq!(store.pending_count(), 2);
        assert_eq!(outcome.notice.as_deref(), Some("Order Accepted: KOT 101"));
        match outcome.message {
            OutboundMessage::AckTicket { items, .. } => assert_eq!(items.len(), 2),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_toggle_item_flips_both_ways() {
        let mut store = store_with_ticket();
        submit(
            &mut store,
            ActionKind::ToggleItem,
            101,
            Some("A"),
            t0(),
            timeout(),
        )
        .unwrap();
        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Ready
        );

        submit(
            &mut store,
            ActionKind::ToggleItem,
            101,
            Some("A"),
            t0(),
            timeout(),
        )
        .unwrap();
        assert_eq!(
            store.ticket(101).unwrap().item("A").unwrap().status,
            CanonicalStatus::Pending
        );
    }

    #[test]
    fn test_toggle_ticket_rejected_when_nothing_ready() {
        let mut store = store_with_ticket();
        let err = submit(
            &mut store,
            ActionKind::ToggleTicket,
            101,
            None,
            t0(),
            timeout(),
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "No Orders Ready");
        // Rejected before any mutation.
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_toggle_ticket_delivers_everything() {
        let mut store = store_with_ticket();
        submit(
            &mut store,
            ActionKind::AcknowledgeItem,
            101,
            Some("A"),
            t0(),
            timeout(),
        )
        .unwrap();

        let outcome = submit(
            &mut store,
            ActionKind::ToggleTicket,
            101,
            None,
            t0(),
            timeout(),
        )
        .unwrap();
        let ticket = store.ticket(101).unwrap();
        assert!(ticket
            .items
            .iter()
            .all(|it| it.status == CanonicalStatus::Delivered));
        match outcome.message {
            OutboundMessage::ToggleTicket { table_no, items, .. } => {
                assert_eq!(table_no, 4);
                assert_eq!(items.len(), 2);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_recall_item_from_delivered_board() {
        let mut store = TicketStore::new("NONE");
        let snap: Snapshot = serde_json::from_value(json!({
            "tickets": [],
            "delivered_tickets": [{
                "kot_no": 9, "bill_no": "B-2",
                "items": [{"i_code": "A", "name": "Soup", "qty": 1, "status": "Delivered"}]
            }]
        }))
        .unwrap();
        store.apply_snapshot(snap, t0());

        let outcome = submit(
            &mut store,
            ActionKind::RecallItem,
            9,
            Some("A"),
            t0(),
            timeout(),
        )
        .unwrap();
        assert_eq!(outcome.notice.as_deref(), Some("Items Recalled"));
        match outcome.message {
            OutboundMessage::RecallItem {
                kot_no,
                bill_no,
                i_code,
            } => {
                assert_eq!(kot_no, 9);
                assert_eq!(bill_no, "B-2");
                assert_eq!(i_code, "A");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_targets_are_rejected() {
        let mut store = store_with_ticket();
        assert!(submit(
            &mut store,
            ActionKind::AcknowledgeItem,
            999,
            Some("A"),
            t0(),
            timeout(),
        )
        .is_err());
        assert!(submit(
            &mut store,
            ActionKind::AcknowledgeItem,
            101,
            Some("nope"),
            t0(),
            timeout(),
        )
        .is_err());
        assert!(submit(
            &mut store,
            ActionKind::RecallItem,
            42,
            Some("A"),
            t0(),
            timeout(),
        )
        .is_err());
        assert_eq!(store.pending_count(), 0);
    }
}
