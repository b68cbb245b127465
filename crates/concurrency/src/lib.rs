//! Connection fan-out and presence tracking.
//!
//! [`registry::SubscriptionRegistry`] indexes live subscribers by
//! collection-scope and doc-scope and broadcasts over snapshots, never
//! live references, so a blocked subscriber send can't stall a
//! concurrent subscribe/unsubscribe. [`presence::PresenceManager`]
//! tracks per-document cursors and runs the idle sweep that turns a
//! silently-disconnected client into a synthetic leave event.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod presence;
pub mod registry;

pub use presence::{EvictedParticipant, PresenceManager, PresenceState};
pub use registry::{Subscriber, SubscriptionRegistry};
