//! Resilience layer for parkwatch clients.
//!
//! Wraps fallible backend interactions in a retry queue driven by the
//! reachability feed from [`parkwatch_api`]: actions survive offline
//! windows and are replayed, with bounded retries, once the backend is
//! reachable again.

pub mod error;
pub mod queue;

pub use error::ActionError;
pub use queue::{ActionId, ActionRetryQueue, EnqueueOptions, PendingAction};

pub use parkwatch_api::probe::Reachability;
