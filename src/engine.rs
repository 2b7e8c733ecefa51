//! Engine event loop.
//!
//! Single-threaded, cooperative, event-driven: every state transition
//! happens on this one task in reaction to an inbound snapshot, a user
//! command, or the periodic tick. The tick only expires stale optimistic
//! overrides and refreshes age bands — it never mutates ticket data — so
//! there is no locking discipline anywhere, just ordering.
//!
//! Collaborator surfaces:
//! - projection frames on a `watch` channel (the presentation layer
//!   redraws on change, and only on change),
//! - new-arrival events on an mpsc channel (the audio/alert collaborator),
//! - transient notices on an mpsc channel (popup-style messages),
//! - [`EngineHandle::submit`] as the only write entry point from UI
//!   handlers.

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::actions::{self, ActionKind};
use crate::projection::{project, Frame, ViewConfig};
use crate::protocol::{OutboundMessage, Snapshot};
use crate::settings::StationSettings;
use crate::sync::{Arrival, TicketStore};

/// Commands from the presentation layer.
#[derive(Debug, Clone)]
pub enum Command {
    Submit {
        kind: ActionKind,
        kot_no: i64,
        i_code: Option<String>,
    },
    /// Filter/sort/view controls changed.
    SetViewConfig(ViewConfig),
}

/// Cheap cloneable handle for UI event handlers.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<Command>,
    pub frames: watch::Receiver<Frame>,
}

impl EngineHandle {
    /// Forward a user intent. Never blocks and never fails the caller; a
    /// rejected intent comes back as a notice, not an error.
    pub fn submit(&self, kind: ActionKind, kot_no: i64, i_code: Option<String>) {
        let _ = self.commands.send(Command::Submit {
            kind,
            kot_no,
            i_code,
        });
    }

    pub fn set_view_config(&self, config: ViewConfig) {
        let _ = self.commands.send(Command::SetViewConfig(config));
    }
}

/// Event receivers for the alert/notice collaborators. Single consumer.
pub struct EngineEvents {
    pub arrivals: mpsc::UnboundedReceiver<Arrival>,
    pub notices: mpsc::UnboundedReceiver<String>,
}

pub struct Engine {
    store: TicketStore,
    config: ViewConfig,
    action_timeout: chrono::Duration,
    tick_interval: std::time::Duration,
    snapshots: mpsc::UnboundedReceiver<Snapshot>,
    commands: mpsc::UnboundedReceiver<Command>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    frames: watch::Sender<Frame>,
    arrivals: mpsc::UnboundedSender<Arrival>,
    notices: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
}

impl Engine {
    pub fn new(
        settings: &StationSettings,
        snapshots: mpsc::UnboundedReceiver<Snapshot>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        cancel: CancellationToken,
    ) -> (Self, EngineHandle, EngineEvents) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = watch::channel(Frame::default());
        let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();

        let engine = Self {
            store: TicketStore::new(settings.station_name.clone()),
            config: ViewConfig::default(),
            action_timeout: chrono::Duration::seconds(
                settings.pending_action_timeout_secs as i64,
            ),
            tick_interval: std::time::Duration::from_millis(settings.tick_interval_ms),
            snapshots,
            commands: commands_rx,
            outbound,
            frames: frames_tx,
            arrivals: arrivals_tx,
            notices: notices_tx,
            cancel,
        };
        let handle = EngineHandle {
            commands: commands_tx,
            frames: frames_rx,
        };
        let events = EngineEvents {
            arrivals: arrivals_rx,
            notices: notices_rx,
        };
        (engine, handle, events)
    }

    /// Run until cancelled or every input channel is gone.
    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Engine loop started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Engine loop stopped");
                    return;
                }
                snapshot = self.snapshots.recv() => match snapshot {
                    Some(snapshot) => self.on_snapshot(snapshot),
                    None => return,
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => return,
                },
                _ = tick.tick() => self.on_tick(),
            }
        }
    }

    fn on_snapshot(&mut self, snapshot: Snapshot) {
        let now = chrono::Utc::now();
        let outcome = self.store.apply_snapshot(snapshot, now);

        for arrival in outcome.arrivals {
            let _ = self.arrivals.send(arrival);
        }

        // An unchanged snapshot must not trigger a recompute or redraw.
        if outcome.changed {
            self.publish(now);
        }
    }

    fn on_command(&mut self, command: Command) {
        let now = chrono::Utc::now();
        match command {
            Command::Submit {
                kind,
                kot_no,
                i_code,
            } => match actions::submit(
                &mut self.store,
                kind,
                kot_no,
                i_code.as_deref(),
                now,
                self.action_timeout,
            ) {
                Ok(outcome) => {
                    // Fire-and-forget: a closed connection drops this and
                    // the next snapshot after reconnect recovers the truth.
                    let _ = self.outbound.send(outcome.message);
                    if let Some(notice) = outcome.notice {
                        let _ = self.notices.send(notice);
                    }
                    self.publish(now);
                }
                Err(e) => {
                    debug!(?kind, kot_no, error = %e, "Action rejected");
                    let _ = self.notices.send(e.to_string());
                }
            },
            Command::SetViewConfig(config) => {
                if self.config != config {
                    self.config = config;
                    self.publish(now);
                }
            }
        }
    }

    fn on_tick(&mut self) {
        let now = chrono::Utc::now();
        self.store.expire_overrides(now);
        // Recompute age bands; the frame comparison below drops the redraw
        // when nothing moved between bands.
        self.publish(now);
    }

    fn publish(&mut self, now: chrono::DateTime<chrono::Utc>) {
        let frame = project(&self.store, &self.config, now);
        self.frames.send_if_modified(|current| {
            if *current != frame {
                *current = frame;
                true
            } else {
                false
            }
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================
