//! Handoff state machine.
//!
//! Each legal edge is one pure function: it takes the current handoff by
//! reference and returns either a new handoff value ([`Transition::Applied`]),
//! [`Transition::Unchanged`] for idempotent repeats, or an error when a guard
//! fails. Nothing here touches storage; the service commits results through a
//! compare-and-swap on the handoff version.
//!
//! # State Transitions
//!
//! ```text
//! created ──notify──▶ pending ──sender──▶ confirmed_by_sender ──receiver──▶ completed
//!                        │    ──receiver─▶ confirmed_by_receiver ──sender──▶ completed
//!                        │
//! any non-terminal ──dispute──▶ disputed ──start──▶ resolving ──resolve──▶ resolved
//! pending / confirmed_by_sender ──ttl elapsed──▶ expired
//! ```
//!
//! Confirmation is commutative: sender and receiver confirmations are two
//! independent timestamps and the status is derived from them, so the second
//! confirmation always lands in `completed` whichever side went first.

use crate::model::{Caller, DisputeReason, DisputeStage, Dispute, Handoff, HandoffStatus};
use crate::token::ConfirmationToken;
use custody_core::{audit, CustodyError, Result};
use tracing::debug;

/// Who is driving a transition.
#[derive(Debug, Clone, Copy)]
pub enum Actor<'a> {
    /// Authenticated account
    Account(&'a Caller),
    /// Holder of the receiver's capability token
    Token(&'a ConfirmationToken),
    /// Background sweep or service-internal step
    System,
}

impl Actor<'_> {
    /// Audit label. Token holders are never recorded by secret.
    pub fn label(&self) -> String {
        match self {
            Actor::Account(caller) => caller.identity.clone(),
            Actor::Token(_) => "token".to_string(),
            Actor::System => "system".to_string(),
        }
    }
}

/// Lifecycle events, one per edge of the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffEvent {
    Created,
    NotificationDispatched,
    SenderConfirmed,
    ReceiverConfirmed,
    DisputeRaised,
    ResolutionStarted,
    ResolutionSubmitted,
    Expired,
}

impl HandoffEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffEvent::Created => "create",
            HandoffEvent::NotificationDispatched => "notify",
            HandoffEvent::SenderConfirmed => "sender_confirm",
            HandoffEvent::ReceiverConfirmed => "receiver_confirm",
            HandoffEvent::DisputeRaised => "dispute",
            HandoffEvent::ResolutionStarted => "start_resolution",
            HandoffEvent::ResolutionSubmitted => "resolve",
            HandoffEvent::Expired => "expire",
        }
    }
}

impl std::fmt::Display for HandoffEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of applying an event.
#[derive(Debug, Clone)]
pub enum Transition {
    /// The event changed the handoff; the new value must be committed
    Applied(Handoff),
    /// The event repeated something already recorded
    Unchanged,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

fn rejected(handoff: &Handoff, event: HandoffEvent) -> CustodyError {
    CustodyError::invalid_transition(handoff.status, event)
}

fn record(next: &mut Handoff, from: HandoffStatus, event: HandoffEvent, actor: &Actor<'_>, now: u64) {
    next.refresh_status();
    next.updated_at = now;
    audit::append(
        &mut next.audit,
        &next.id,
        event.as_str(),
        from.as_str(),
        next.status.as_str(),
        &actor.label(),
        now,
    );
    debug!(
        handoff_id = %next.handoff_id,
        event = event.as_str(),
        from = from.as_str(),
        to = next.status.as_str(),
        "handoff transition"
    );
}

fn commit(mut next: Handoff, prev: &Handoff, event: HandoffEvent, actor: &Actor<'_>, now: u64) -> Transition {
    record(&mut next, prev.status, event, actor, now);
    if next.status == HandoffStatus::Completed {
        next.completed_at = Some(now);
        next.confirmation_token = None;
    }
    Transition::Applied(next)
}

/// Token guard shared by the receiver-side edges.
fn check_token(handoff: &Handoff, presented: &ConfirmationToken) -> Result<()> {
    match &handoff.confirmation_token {
        Some(current) if current.matches(presented) => Ok(()),
        _ => Err(CustodyError::TokenExpired {
            handoff_id: handoff.handoff_id.clone(),
        }),
    }
}

/// Append the creation entry to a freshly built handoff.
pub fn record_creation(handoff: &mut Handoff, creator: &Caller, now: u64) {
    handoff.refresh_status();
    handoff.created_at = now;
    handoff.updated_at = now;
    audit::append(
        &mut handoff.audit,
        &handoff.id,
        HandoffEvent::Created.as_str(),
        "",
        handoff.status.as_str(),
        &creator.identity,
        now,
    );
}

/// created → pending once the receiver has been notified.
pub fn notify_dispatched(handoff: &Handoff, now: u64) -> Result<Transition> {
    match handoff.status {
        HandoffStatus::Created => {
            let mut next = handoff.clone();
            next.notified_at = Some(now);
            Ok(commit(next, handoff, HandoffEvent::NotificationDispatched, &Actor::System, now))
        }
        status if status.is_terminal() => Err(rejected(handoff, HandoffEvent::NotificationDispatched)),
        _ => Ok(Transition::Unchanged),
    }
}

/// Sender-side confirmation. Only the sender's own account may confirm.
pub fn sender_confirm(handoff: &Handoff, caller: &Caller, now: u64) -> Result<Transition> {
    if !handoff.sender.is_identity(caller) {
        return Err(rejected(handoff, HandoffEvent::SenderConfirmed));
    }
    match handoff.status {
        HandoffStatus::ConfirmedBySender | HandoffStatus::Completed => Ok(Transition::Unchanged),
        HandoffStatus::Pending | HandoffStatus::ConfirmedByReceiver => {
            let mut next = handoff.clone();
            next.sender.confirmed_at = Some(now);
            Ok(commit(next, handoff, HandoffEvent::SenderConfirmed, &Actor::Account(caller), now))
        }
        _ => Err(rejected(handoff, HandoffEvent::SenderConfirmed)),
    }
}

/// Receiver-side confirmation, by token or by the receiver's own account.
/// Clears the token. A token that located an already receiver-confirmed
/// handoff is a repeat of that confirmation and changes nothing.
pub fn receiver_confirm(handoff: &Handoff, actor: &Actor<'_>, now: u64) -> Result<Transition> {
    let receiver_done = matches!(
        handoff.status,
        HandoffStatus::ConfirmedByReceiver | HandoffStatus::Completed
    );
    match actor {
        Actor::Token(_) if receiver_done => return Ok(Transition::Unchanged),
        Actor::Token(presented) => check_token(handoff, presented)?,
        Actor::Account(caller) if handoff.receiver.is_identity(caller) => {}
        _ => return Err(rejected(handoff, HandoffEvent::ReceiverConfirmed)),
    }
    match handoff.status {
        _ if receiver_done => Ok(Transition::Unchanged),
        HandoffStatus::Pending | HandoffStatus::ConfirmedBySender => {
            let mut next = handoff.clone();
            next.receiver.confirmed_at = Some(now);
            next.confirmation_token = None;
            Ok(commit(next, handoff, HandoffEvent::ReceiverConfirmed, actor, now))
        }
        _ => Err(rejected(handoff, HandoffEvent::ReceiverConfirmed)),
    }
}

/// Raise a dispute from any non-terminal state without an open dispute.
/// Prior one-sided confirmations are kept; the token is retired.
pub fn raise_dispute(
    handoff: &Handoff,
    actor: &Actor<'_>,
    reason: DisputeReason,
    description: Option<String>,
    now: u64,
) -> Result<Transition> {
    let allowed = match actor {
        Actor::Account(caller) => {
            caller.role.is_supervisor()
                || handoff.sender.is_identity(caller)
                || handoff.receiver.is_identity(caller)
        }
        Actor::Token(presented) => {
            check_token(handoff, presented)?;
            true
        }
        Actor::System => false,
    };
    if !allowed || handoff.is_terminal() || handoff.dispute.is_some() {
        return Err(rejected(handoff, HandoffEvent::DisputeRaised));
    }

    let description = description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());
    if reason == DisputeReason::Other && description.is_none() {
        return Err(CustodyError::Validation(
            "a description is required when the dispute reason is `other`".to_string(),
        ));
    }

    let mut next = handoff.clone();
    next.dispute = Some(Dispute {
        reason,
        description,
        raised_by: actor.label(),
        raised_at: now,
        stage: DisputeStage::Open,
        resolution: None,
        resolved_by: None,
        resolved_at: None,
    });
    next.confirmation_token = None;
    Ok(commit(next, handoff, HandoffEvent::DisputeRaised, actor, now))
}

/// disputed → resolving. Supervisor or admin only.
pub fn begin_resolution(handoff: &Handoff, caller: &Caller, now: u64) -> Result<Transition> {
    if !caller.role.is_supervisor() {
        return Err(rejected(handoff, HandoffEvent::ResolutionStarted));
    }
    match handoff.status {
        HandoffStatus::Resolving => Ok(Transition::Unchanged),
        HandoffStatus::Disputed => {
            let mut next = handoff.clone();
            if let Some(dispute) = next.dispute.as_mut() {
                dispute.stage = DisputeStage::Resolving;
            }
            Ok(commit(next, handoff, HandoffEvent::ResolutionStarted, &Actor::Account(caller), now))
        }
        _ => Err(rejected(handoff, HandoffEvent::ResolutionStarted)),
    }
}

/// Close the dispute. From `disputed` the `resolving` step is recorded in the
/// same commit. Resolution never confirms the handoff.
pub fn resolve(handoff: &Handoff, caller: &Caller, resolution: &str, now: u64) -> Result<Transition> {
    if !caller.role.is_supervisor() {
        return Err(rejected(handoff, HandoffEvent::ResolutionSubmitted));
    }
    let resolution = resolution.trim();
    if resolution.is_empty() {
        return Err(CustodyError::Validation(
            "resolution text must not be empty".to_string(),
        ));
    }

    let actor = Actor::Account(caller);
    let mut next = match handoff.status {
        HandoffStatus::Resolving => handoff.clone(),
        HandoffStatus::Disputed => match begin_resolution(handoff, caller, now)? {
            Transition::Applied(started) => started,
            Transition::Unchanged => handoff.clone(),
        },
        _ => return Err(rejected(handoff, HandoffEvent::ResolutionSubmitted)),
    };

    let from = next.status;
    if let Some(dispute) = next.dispute.as_mut() {
        dispute.stage = DisputeStage::Resolved;
        dispute.resolution = Some(resolution.to_string());
        dispute.resolved_by = Some(caller.identity.clone());
        dispute.resolved_at = Some(now);
    }
    record(&mut next, from, HandoffEvent::ResolutionSubmitted, &actor, now);
    Ok(Transition::Applied(next))
}

/// True when `handoff` has sat in an expirable state for at least `ttl_ms`.
pub fn expiry_due(handoff: &Handoff, ttl_ms: u64, now: u64) -> bool {
    handoff.status.can_expire() && now.saturating_sub(handoff.updated_at) >= ttl_ms
}

/// pending / confirmed_by_sender → expired once the time window is exceeded.
/// Idempotent on already expired handoffs.
pub fn expire(handoff: &Handoff, ttl_ms: u64, now: u64) -> Result<Transition> {
    if handoff.status == HandoffStatus::Expired {
        return Ok(Transition::Unchanged);
    }
    if !expiry_due(handoff, ttl_ms, now) {
        return Err(rejected(handoff, HandoffEvent::Expired));
    }
    let mut next = handoff.clone();
    next.expired_at = Some(now);
    next.confirmation_token = None;
    Ok(commit(next, handoff, HandoffEvent::Expired, &Actor::System, now))
}
