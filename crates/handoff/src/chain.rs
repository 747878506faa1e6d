//! Chain aggregation over the two steps of a collection session.

use crate::model::{Handoff, HandoffStatus, HandoffType};
use serde::Serialize;

/// Number of steps in a full custody chain.
pub const CHAIN_STEPS: usize = 2;

/// Chain id shared by every handoff of `session_id`.
pub fn chain_id_for(session_id: &str) -> String {
    format!("chain-{}", session_id)
}

/// Read-only view of one session's chain.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainView {
    pub chain_id: String,
    pub session_id: String,
    /// `facility_to_driver`
    pub step1: Option<Handoff>,
    /// `driver_to_incinerator`
    pub step2: Option<Handoff>,
    pub completed_steps: usize,
    pub total_steps: usize,
    /// `completed_steps / total_steps`
    pub progress: f64,
}

impl ChainView {
    pub fn is_complete(&self) -> bool {
        self.completed_steps == self.total_steps
    }
}

/// Partition a session's handoffs by type. When a type occurs more than once
/// (an expired or resolved attempt followed by a retry) the most recently
/// created handoff represents the step. `handoffs` is in store order, newest
/// first, so on equal `created_at` the earlier element wins.
pub fn aggregate(session_id: &str, handoffs: &[Handoff]) -> ChainView {
    let latest = |wanted: HandoffType| {
        handoffs
            .iter()
            .filter(|h| h.handoff_type == wanted)
            .fold(None::<&Handoff>, |best, h| match best {
                Some(b) if b.created_at >= h.created_at => Some(b),
                _ => Some(h),
            })
            .cloned()
    };
    let step1 = latest(HandoffType::FacilityToDriver);
    let step2 = latest(HandoffType::DriverToIncinerator);

    let completed_steps = [&step1, &step2]
        .iter()
        .filter(|step| {
            step.as_ref()
                .map_or(false, |h| h.status == HandoffStatus::Completed)
        })
        .count();

    ChainView {
        chain_id: chain_id_for(session_id),
        session_id: session_id.to_string(),
        step1,
        step2,
        completed_steps,
        total_steps: CHAIN_STEPS,
        progress: completed_steps as f64 / CHAIN_STEPS as f64,
    }
}
