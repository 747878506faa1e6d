//! In-memory store.
//!
//! Each handoff sits behind its own mutex so transitions on different ids
//! never contend; the map-level lock is only taken for write on insert.

use super::{HandoffFilter, HandoffStore};
use crate::model::{Handoff, HandoffType};
use crate::notification::NotificationLogEntry;
use crate::token::TokenDigest;
use custody_core::{CustodyError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

#[derive(Debug)]
struct Slot {
    /// Insertion order, tie-breaker for equal `created_at`
    seq: u64,
    handoff: Handoff,
}

#[derive(Debug, Default)]
pub struct InMemoryHandoffStore {
    handoffs: RwLock<HashMap<String, Arc<Mutex<Slot>>>>,
    tokens: RwLock<HashMap<String, String>>,
    notifications: Mutex<Vec<NotificationLogEntry>>,
    sequences: Mutex<HashMap<HandoffType, u64>>,
    inserted: AtomicU64,
}

fn poisoned<T>(_: T) -> CustodyError {
    CustodyError::Storage("store lock poisoned".to_string())
}

impl InMemoryHandoffStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: &str) -> Result<Arc<Mutex<Slot>>> {
        let handoffs = self.handoffs.read().map_err(poisoned)?;
        handoffs
            .get(id)
            .cloned()
            .ok_or_else(|| CustodyError::not_found(id))
    }

    fn collect<F>(&self, keep: F) -> Result<Vec<Handoff>>
    where
        F: Fn(&Handoff) -> bool,
    {
        let slots: Vec<_> = self
            .handoffs
            .read()
            .map_err(poisoned)?
            .values()
            .cloned()
            .collect();

        let mut found = Vec::new();
        for slot in slots {
            let slot = slot.lock().map_err(poisoned)?;
            if keep(&slot.handoff) {
                found.push((slot.seq, slot.handoff.clone()));
            }
        }
        found.sort_by(|(seq_a, a), (seq_b, b)| {
            b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a))
        });
        Ok(found.into_iter().map(|(_, h)| h).collect())
    }
}

impl HandoffStore for InMemoryHandoffStore {
    fn next_sequence(&self, handoff_type: HandoffType) -> Result<u64> {
        let mut sequences = self.sequences.lock().map_err(poisoned)?;
        let next = sequences.entry(handoff_type).or_insert(0);
        *next += 1;
        Ok(*next)
    }

    fn insert(&self, handoff: Handoff) -> Result<Handoff> {
        let mut handoffs = self.handoffs.write().map_err(poisoned)?;
        if handoffs.contains_key(&handoff.id) {
            return Err(CustodyError::Validation(format!(
                "handoff {} already exists",
                handoff.id
            )));
        }
        if let Some(token) = &handoff.confirmation_token {
            self.tokens
                .write()
                .map_err(poisoned)?
                .insert(token.digest().to_hex(), handoff.id.clone());
        }
        let seq = self.inserted.fetch_add(1, Ordering::SeqCst);
        handoffs.insert(
            handoff.id.clone(),
            Arc::new(Mutex::new(Slot {
                seq,
                handoff: handoff.clone(),
            })),
        );
        Ok(handoff)
    }

    fn get(&self, id: &str) -> Result<Handoff> {
        let slot = self.slot(id)?;
        let slot = slot.lock().map_err(poisoned)?;
        Ok(slot.handoff.clone())
    }

    fn list(&self, filter: &HandoffFilter) -> Result<Vec<Handoff>> {
        self.collect(|h| filter.matches(h))
    }

    fn by_session(&self, session_id: &str) -> Result<Vec<Handoff>> {
        self.collect(|h| h.session_id.as_deref() == Some(session_id))
    }

    fn find_by_token(&self, digest: &TokenDigest) -> Result<Option<Handoff>> {
        let id = self
            .tokens
            .read()
            .map_err(poisoned)?
            .get(&digest.to_hex())
            .cloned();
        match id {
            Some(id) => self.get(&id).map(Some),
            None => Ok(None),
        }
    }

    fn replace(&self, expected_version: u64, mut handoff: Handoff) -> Result<Handoff> {
        let slot = self.slot(&handoff.id)?;
        let mut slot = slot.lock().map_err(poisoned)?;
        if slot.handoff.version != expected_version {
            return Err(CustodyError::ConcurrencyConflict {
                id: handoff.id.clone(),
                expected: expected_version,
                actual: slot.handoff.version,
            });
        }
        handoff.version = expected_version + 1;
        slot.handoff = handoff.clone();
        Ok(handoff)
    }

    fn expiry_candidates(&self) -> Result<Vec<Handoff>> {
        self.collect(|h| h.status.can_expire())
    }

    fn append_notification(&self, entry: NotificationLogEntry) -> Result<()> {
        self.notifications.lock().map_err(poisoned)?.push(entry);
        Ok(())
    }

    fn notifications(&self, handoff_id: &str) -> Result<Vec<NotificationLogEntry>> {
        let log = self.notifications.lock().map_err(poisoned)?;
        Ok(log
            .iter()
            .filter(|e| e.handoff_id == handoff_id)
            .cloned()
            .collect())
    }
}
