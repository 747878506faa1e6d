//! Hash-chained audit trail.
//!
//! Every lifecycle transition is recorded as an [`AuditEntry`] whose BLAKE3
//! hash covers its own fields and the previous entry's hash. The first entry
//! links to [`GENESIS_HASH`].

use serde::{Deserialize, Serialize};

/// Previous-hash value of the first entry in a trail.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// One recorded transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the trail, starting at 0
    pub sequence: u64,
    /// Event that caused the transition
    pub event: String,
    /// Status before the event
    pub from: String,
    /// Status after the event
    pub to: String,
    /// Identity that triggered the event (`system` for sweeps, `token` for link holders)
    pub actor: String,
    /// Unix milliseconds
    pub at: u64,
    /// Hex BLAKE3 hash of the previous entry
    pub prev_hash: String,
    /// Hex BLAKE3 hash of this entry
    pub hash: String,
}

impl AuditEntry {
    #[allow(clippy::too_many_arguments)]
    fn compute_hash(
        subject: &str,
        sequence: u64,
        event: &str,
        from: &str,
        to: &str,
        actor: &str,
        at: u64,
        prev_hash: &[u8],
    ) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(subject.as_bytes());
        hasher.update(&sequence.to_le_bytes());
        for field in [event, from, to, actor] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hasher.update(&at.to_le_bytes());
        hasher.update(prev_hash);
        *hasher.finalize().as_bytes()
    }
}

/// Append a new entry to `trail`, chaining it to the last one.
///
/// `subject` (the handoff id) is bound into every hash so entries cannot be
/// transplanted between trails.
pub fn append(
    trail: &mut Vec<AuditEntry>,
    subject: &str,
    event: &str,
    from: &str,
    to: &str,
    actor: &str,
    at: u64,
) {
    let prev_hash = match trail.last() {
        Some(last) => hex::decode(&last.hash).unwrap_or_else(|_| GENESIS_HASH.to_vec()),
        None => GENESIS_HASH.to_vec(),
    };
    let sequence = trail.len() as u64;
    let hash = AuditEntry::compute_hash(subject, sequence, event, from, to, actor, at, &prev_hash);

    trail.push(AuditEntry {
        sequence,
        event: event.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        actor: actor.to_string(),
        at,
        prev_hash: hex::encode(prev_hash),
        hash: hex::encode(hash),
    });
}

/// Recompute every hash in `trail`. Returns the sequence of the first broken
/// entry, or `None` when the trail is intact.
pub fn first_break(trail: &[AuditEntry], subject: &str) -> Option<u64> {
    let mut expected_prev = GENESIS_HASH.to_vec();
    for (index, entry) in trail.iter().enumerate() {
        if entry.sequence != index as u64 || entry.prev_hash != hex::encode(&expected_prev) {
            return Some(index as u64);
        }
        let hash = AuditEntry::compute_hash(
            subject,
            entry.sequence,
            &entry.event,
            &entry.from,
            &entry.to,
            &entry.actor,
            entry.at,
            &expected_prev,
        );
        if entry.hash != hex::encode(hash) {
            return Some(index as u64);
        }
        expected_prev = hash.to_vec();
    }
    None
}
