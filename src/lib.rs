//! The Small KDS - kitchen display station engine.
//!
//! Keeps a local, interactive view of kitchen order tickets consistent with
//! a continuously repeated full-snapshot push feed, while tolerating
//! network drops, duplicate/out-of-order delivery, and local user actions
//! that race the next snapshot. The presentation layer is an external
//! collaborator: it renders the projection frames this crate emits and
//! forwards user intents through [`engine::EngineHandle::submit`].
//!
//! Module map, in data-flow order:
//! - [`connection`] — one push-feed socket with fixed-delay reconnect
//! - [`sync`] — ticket store and snapshot reconciliation
//! - [`status`] — canonical item status and ticket aggregate status
//! - [`projection`] — filtered/sorted renderable frames with age bands
//! - [`actions`] — optimistic user-intent submission
//! - [`engine`] — the single event loop tying the above together
//! - [`protocol`], [`settings`], [`error`] — wire types, station config,
//!   error taxonomy

pub mod actions;
pub mod connection;
pub mod engine;
pub mod error;
pub mod projection;
pub mod protocol;
pub mod settings;
pub mod status;
pub mod sync;

pub use actions::ActionKind;
pub use connection::{ConnectionManager, ConnectionState};
pub use engine::{Command, Engine, EngineEvents, EngineHandle};
pub use error::KdsError;
pub use projection::{AgeBand, Frame, RenderTicket, SortKey, ViewConfig, ViewMode};
pub use protocol::{OutboundMessage, Snapshot};
pub use settings::StationSettings;
pub use status::{CanonicalStatus, TicketStatus};
pub use sync::{Arrival, Ticket, TicketStore};
