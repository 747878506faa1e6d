//! Durable handoff storage.
//!
//! Stores hold whole handoff documents. They never edit lifecycle fields on
//! their own: the only write path for an existing handoff is
//! [`HandoffStore::replace`], a compare-and-swap on `version` of a value
//! produced by the state machine.

use crate::model::{Handoff, HandoffStatus, HandoffType};
use crate::notification::NotificationLogEntry;
use crate::token::TokenDigest;
use custody_core::Result;
use serde::{Deserialize, Serialize};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryHandoffStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteHandoffStore;

/// Conjunctive list filter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffFilter {
    pub status: Option<HandoffStatus>,
    #[serde(rename = "type")]
    pub handoff_type: Option<HandoffType>,
}

impl HandoffFilter {
    pub fn matches(&self, handoff: &Handoff) -> bool {
        self.status.map_or(true, |s| handoff.status == s)
            && self.handoff_type.map_or(true, |t| handoff.handoff_type == t)
    }
}

pub trait HandoffStore: Send + Sync {
    /// Next value of the per-type code sequence, starting at 1.
    fn next_sequence(&self, handoff_type: HandoffType) -> Result<u64>;

    /// Persist a new handoff and index its token. Fails `Validation` on a
    /// duplicate id.
    fn insert(&self, handoff: Handoff) -> Result<Handoff>;

    /// Fails `NotFound` when absent.
    fn get(&self, id: &str) -> Result<Handoff>;

    /// Matching handoffs, most recently created first.
    fn list(&self, filter: &HandoffFilter) -> Result<Vec<Handoff>>;

    /// All handoffs of one collection session, most recently created first.
    fn by_session(&self, session_id: &str) -> Result<Vec<Handoff>>;

    /// Handoff a token was issued for. Digests stay indexed after the token
    /// is cleared so a retired token can be told apart from an unknown one.
    fn find_by_token(&self, digest: &TokenDigest) -> Result<Option<Handoff>>;

    /// Replace the stored handoff if its version still equals
    /// `expected_version`; the stored copy gets `expected_version + 1`.
    /// Fails `ConcurrencyConflict` otherwise.
    fn replace(&self, expected_version: u64, handoff: Handoff) -> Result<Handoff>;

    /// Handoffs in `pending` or `confirmed_by_sender`.
    fn expiry_candidates(&self) -> Result<Vec<Handoff>>;

    fn append_notification(&self, entry: NotificationLogEntry) -> Result<()>;

    /// Delivery attempts for one handoff, oldest first.
    fn notifications(&self, handoff_id: &str) -> Result<Vec<NotificationLogEntry>>;
}
