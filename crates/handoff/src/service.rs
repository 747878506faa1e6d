//! Handoff command and query service.
//!
//! The service owns every write to the store. Commands load the current
//! handoff (expiring it first when its time window has run out), ask the state
//! machine for the next value and commit it with a compare-and-swap on
//! `version`. A lost race is retried once against a fresh read; a second loss
//! is reported as `ConcurrencyConflict`.

use crate::chain::{self, chain_id_for, ChainView};
use crate::directory::Directory;
use crate::machine::{self, Actor, Transition};
use crate::model::{
    Caller, ContainerLine, DisputeReason, Handoff, HandoffStatus, HandoffType, Party, Role,
};
use crate::notification::{Channel, DeliveryStatus, NotificationLogEntry, Notifier};
use crate::store::{HandoffFilter, HandoffStore};
use crate::token::ConfirmationToken;
use custody_core::{Clock, CustodyError, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Who receives the containers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiverSpec {
    /// Account id of a receiver with an account
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Contact phone for link delivery
    #[serde(default)]
    pub phone: Option<String>,
}

/// Create command payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHandoff {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(rename = "type")]
    pub handoff_type: HandoffType,
    pub containers: Vec<ContainerLine>,
    pub receiver: ReceiverSpec,
    #[serde(default)]
    pub company: Option<String>,
    /// Delivery channel for the first notification
    #[serde(default)]
    pub channel: Option<Channel>,
}

/// Result of a command: the handoff as stored afterwards, and whether the
/// command changed it.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub handoff: Handoff,
    pub applied: bool,
}

pub struct HandoffService {
    store: Arc<dyn HandoffStore>,
    directory: Arc<dyn Directory>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    default_channel: Channel,
    /// Serializes creation so the per-session uniqueness check cannot race
    create_lock: Mutex<()>,
}

impl HandoffService {
    pub fn new(
        store: Arc<dyn HandoffStore>,
        directory: Arc<dyn Directory>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            directory,
            notifier,
            clock,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            default_channel: Channel::Sms,
            create_lock: Mutex::new(()),
        }
    }

    pub fn with_default_channel(mut self, channel: Channel) -> Self {
        self.default_channel = channel;
        self
    }

    /// Time-in-state after which an unconfirmed handoff expires.
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    // ----------------------------------------------------------------------
    // Commands
    // ----------------------------------------------------------------------

    /// Create a handoff, notify the receiver and move it to `pending`.
    pub fn create(&self, caller: &Caller, request: CreateHandoff) -> Result<Handoff> {
        Self::validate_containers(&request.containers)?;
        let company = self.resolve_company(&request)?;
        let receiver = self.resolve_receiver(caller, &request)?;

        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| CustodyError::Storage("create lock poisoned".to_string()))?;

        if let Some(session_id) = &request.session_id {
            self.check_session_slot(session_id, request.handoff_type)?;
        }

        let sequence = self.store.next_sequence(request.handoff_type)?;
        let id = Uuid::new_v4().to_string();
        let now = self.clock.now_ms();

        let mut handoff = Handoff {
            handoff_id: format!("{}-{:06}", request.handoff_type.code_prefix(), sequence),
            chain_id: request
                .session_id
                .as_deref()
                .map(chain_id_for)
                .unwrap_or_else(|| id.clone()),
            id,
            handoff_type: request.handoff_type,
            session_id: request.session_id.clone(),
            company,
            containers: request.containers,
            total_containers: 0,
            total_declared_weight: 0.0,
            sender: Party {
                identity: Some(caller.identity.clone()),
                role: caller.role,
                name: caller.name.clone(),
                phone: None,
                confirmed_at: None,
            },
            receiver,
            confirmation_token: Some(ConfirmationToken::generate()),
            status: HandoffStatus::Created,
            dispute: None,
            notified_at: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            expired_at: None,
            version: 0,
            audit: Vec::new(),
        };
        handoff.recompute_totals();
        machine::record_creation(&mut handoff, caller, now);

        let handoff = self.store.insert(handoff)?;
        drop(_guard);

        info!(
            handoff_id = %handoff.handoff_id,
            handoff_type = handoff.handoff_type.as_str(),
            chain_id = %handoff.chain_id,
            containers = handoff.total_containers,
            created_by = %caller.identity,
            "Handoff created"
        );

        let channel = request.channel.unwrap_or(self.default_channel);
        if let Err(e) = self.dispatch(&handoff, channel) {
            warn!(
                handoff_id = %handoff.handoff_id,
                error = %e,
                "Could not record notification attempt"
            );
        }
        let outcome = self.mutate(&handoff.id, "notify", |h, now| {
            machine::notify_dispatched(h, now)
        })?;
        Ok(outcome.handoff)
    }

    /// Authenticated confirmation. The caller's identity selects the side.
    pub fn confirm(&self, caller: &Caller, id: &str) -> Result<Outcome> {
        self.mutate(id, "confirm", |h, now| {
            if h.sender.is_identity(caller) {
                machine::sender_confirm(h, caller, now)
            } else if h.receiver.is_identity(caller) {
                machine::receiver_confirm(h, &Actor::Account(caller), now)
            } else {
                Err(CustodyError::invalid_transition(h.status, "confirm"))
            }
        })
    }

    pub fn dispute(
        &self,
        caller: &Caller,
        id: &str,
        reason: DisputeReason,
        description: Option<String>,
    ) -> Result<Outcome> {
        self.mutate(id, "dispute", |h, now| {
            machine::raise_dispute(h, &Actor::Account(caller), reason, description.clone(), now)
        })
    }

    /// disputed → resolving.
    pub fn begin_resolution(&self, caller: &Caller, id: &str) -> Result<Outcome> {
        self.mutate(id, "start_resolution", |h, now| {
            machine::begin_resolution(h, caller, now)
        })
    }

    /// Close the dispute from `disputed` or `resolving`.
    pub fn resolve(&self, caller: &Caller, id: &str, resolution: &str) -> Result<Outcome> {
        self.mutate(id, "resolve", |h, now| {
            machine::resolve(h, caller, resolution, now)
        })
    }

    /// Send the confirmation link again. Never changes status beyond the
    /// initial `created → pending` step; rejected once terminal.
    pub fn resend_notification(
        &self,
        caller: &Caller,
        id: &str,
        channel: Option<Channel>,
    ) -> Result<NotificationLogEntry> {
        let handoff = self.load(id)?;
        if handoff.is_terminal() {
            return Err(CustodyError::invalid_transition(
                handoff.status,
                "resend_notification",
            ));
        }
        if !handoff.sender.is_identity(caller) && !caller.role.is_supervisor() {
            return Err(CustodyError::invalid_transition(
                handoff.status,
                "resend_notification",
            ));
        }

        let entry = self.dispatch(&handoff, channel.unwrap_or(self.default_channel))?;
        if handoff.status == HandoffStatus::Created {
            self.mutate(id, "notify", |h, now| machine::notify_dispatched(h, now))?;
        }
        Ok(entry)
    }

    /// Move every handoff whose time window has run out to `expired`.
    /// Returns the number of handoffs this call expired.
    pub fn expire_due(&self) -> Result<usize> {
        let mut expired = 0;
        for candidate in self.store.expiry_candidates()? {
            let before = candidate.status;
            let after = self.expire_if_due(candidate)?;
            if before != HandoffStatus::Expired && after.status == HandoffStatus::Expired {
                expired += 1;
            }
        }
        if expired > 0 {
            info!(count = expired, "Expiry sweep completed");
        }
        Ok(expired)
    }

    // ----------------------------------------------------------------------
    // Token paths
    // ----------------------------------------------------------------------

    /// Resolve a presented token to its handoff. Unknown tokens fail
    /// `TokenInvalid`; tokens whose handoff has left the receiver window fail
    /// `TokenExpired`.
    pub fn resolve_token(&self, token: &str) -> Result<Handoff> {
        let (presented, handoff) = self.locate_token(token)?;
        Self::require_live(&presented, handoff)
    }

    /// Receiver confirmation through the capability token. Replaying a
    /// token after the receiver side already confirmed is a no-op.
    pub fn confirm_by_token(&self, token: &str) -> Result<Outcome> {
        let (presented, handoff) = self.locate_token(token)?;
        if handoff.confirmation_token.is_none()
            && matches!(
                handoff.status,
                HandoffStatus::ConfirmedByReceiver | HandoffStatus::Completed
            )
        {
            debug!(handoff_id = %handoff.handoff_id, "Token confirmation replayed");
            return Ok(Outcome {
                handoff,
                applied: false,
            });
        }
        let handoff = Self::require_live(&presented, handoff)?;
        self.mutate(&handoff.id, "receiver_confirm", |h, now| {
            machine::receiver_confirm(h, &Actor::Token(&presented), now)
        })
    }

    /// Dispute raised by the holder of the receiver's token.
    pub fn dispute_by_token(
        &self,
        token: &str,
        reason: DisputeReason,
        description: Option<String>,
    ) -> Result<Outcome> {
        let (presented, handoff) = self.locate_token(token)?;
        let handoff = Self::require_live(&presented, handoff)?;
        self.mutate(&handoff.id, "dispute", |h, now| {
            machine::raise_dispute(h, &Actor::Token(&presented), reason, description.clone(), now)
        })
    }

    // ----------------------------------------------------------------------
    // Queries
    // ----------------------------------------------------------------------

    pub fn get(&self, id: &str) -> Result<Handoff> {
        self.load(id)
    }

    pub fn list(&self, filter: &HandoffFilter) -> Result<Vec<Handoff>> {
        self.store.list(filter)
    }

    /// Every handoff of one collection session, newest first.
    pub fn get_by_chain(&self, session_id: &str) -> Result<Vec<Handoff>> {
        self.store.by_session(session_id)
    }

    pub fn chain(&self, session_id: &str) -> Result<ChainView> {
        let handoffs = self.get_by_chain(session_id)?;
        Ok(chain::aggregate(session_id, &handoffs))
    }

    /// Delivery attempts for a handoff, oldest first.
    pub fn notifications(&self, id: &str) -> Result<Vec<NotificationLogEntry>> {
        self.store.get(id)?;
        self.store.notifications(id)
    }

    // ----------------------------------------------------------------------
    // Internals
    // ----------------------------------------------------------------------

    /// Load, then apply the transition computed by `apply` with a
    /// compare-and-swap, retrying once on a lost race.
    fn mutate<F>(&self, id: &str, event: &str, apply: F) -> Result<Outcome>
    where
        F: Fn(&Handoff, u64) -> Result<Transition>,
    {
        let mut retried = false;
        loop {
            let current = self.load(id)?;
            let now = self.clock.now_ms();
            let next = match apply(&current, now)? {
                Transition::Applied(next) => next,
                Transition::Unchanged => {
                    debug!(handoff_id = %current.handoff_id, event, "No-op transition");
                    return Ok(Outcome {
                        handoff: current,
                        applied: false,
                    });
                }
            };

            match self.store.replace(current.version, next) {
                Ok(saved) => {
                    info!(
                        handoff_id = %saved.handoff_id,
                        event,
                        from = current.status.as_str(),
                        to = saved.status.as_str(),
                        version = saved.version,
                        "Handoff transition committed"
                    );
                    return Ok(Outcome {
                        handoff: saved,
                        applied: true,
                    });
                }
                Err(err) if err.kind() == ErrorKind::ConcurrencyConflict && !retried => {
                    warn!(handoff_id = %current.handoff_id, event, "Lost update race, retrying once");
                    retried = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Read a handoff, expiring it first when due.
    fn load(&self, id: &str) -> Result<Handoff> {
        let handoff = self.store.get(id)?;
        self.expire_if_due(handoff)
    }

    fn expire_if_due(&self, handoff: Handoff) -> Result<Handoff> {
        let now = self.clock.now_ms();
        if !machine::expiry_due(&handoff, self.ttl_ms, now) {
            return Ok(handoff);
        }
        match machine::expire(&handoff, self.ttl_ms, now)? {
            Transition::Unchanged => Ok(handoff),
            Transition::Applied(next) => match self.store.replace(handoff.version, next) {
                Ok(saved) => {
                    info!(
                        handoff_id = %saved.handoff_id,
                        from = handoff.status.as_str(),
                        "Handoff expired"
                    );
                    Ok(saved)
                }
                // Someone else moved it first; their write stands
                Err(err) if err.kind() == ErrorKind::ConcurrencyConflict => {
                    self.store.get(&handoff.id)
                }
                Err(err) => Err(err),
            },
        }
    }

    fn locate_token(&self, token: &str) -> Result<(ConfirmationToken, Handoff)> {
        let Some(presented) = ConfirmationToken::parse(token) else {
            warn!("Malformed confirmation token presented");
            return Err(CustodyError::TokenInvalid);
        };
        let digest = presented.digest();
        match self.store.find_by_token(&digest)? {
            Some(handoff) => {
                let handoff = self.expire_if_due(handoff)?;
                Ok((presented, handoff))
            }
            None => {
                warn!(token = %digest.short(), "Unknown confirmation token presented");
                Err(CustodyError::TokenInvalid)
            }
        }
    }

    fn require_live(presented: &ConfirmationToken, handoff: Handoff) -> Result<Handoff> {
        let live = handoff
            .confirmation_token
            .as_ref()
            .map_or(false, |current| current.matches(presented));
        if live && handoff.status.receiver_window_open() {
            Ok(handoff)
        } else {
            debug!(
                handoff_id = %handoff.handoff_id,
                status = handoff.status.as_str(),
                "Retired confirmation token presented"
            );
            Err(CustodyError::TokenExpired {
                handoff_id: handoff.handoff_id,
            })
        }
    }

    fn dispatch(&self, handoff: &Handoff, channel: Channel) -> Result<NotificationLogEntry> {
        let entry = self.notifier.send(handoff, channel, self.clock.now_ms());
        match entry.status {
            DeliveryStatus::Sent => info!(
                handoff_id = %handoff.handoff_id,
                channel = channel.as_str(),
                "Notification sent"
            ),
            DeliveryStatus::Failed => warn!(
                handoff_id = %handoff.handoff_id,
                channel = channel.as_str(),
                error = entry.error.as_deref().unwrap_or("unknown"),
                "Notification failed"
            ),
        }
        self.store.append_notification(entry.clone())?;
        Ok(entry)
    }

    fn validate_containers(containers: &[ContainerLine]) -> Result<()> {
        if containers.is_empty() {
            return Err(CustodyError::Validation(
                "a handoff needs at least one container".to_string(),
            ));
        }
        for line in containers {
            if line.container_ref.trim().is_empty() {
                return Err(CustodyError::Validation(
                    "container reference must not be empty".to_string(),
                ));
            }
            if let Some(weight) = line.declared_weight {
                if !weight.is_finite() || weight < 0.0 {
                    return Err(CustodyError::Validation(format!(
                        "declared weight for {} must be a non-negative number",
                        line.container_ref
                    )));
                }
            }
        }
        Ok(())
    }

    /// Every container must belong to one company, which must match the
    /// requested company when one is given.
    fn resolve_company(&self, request: &CreateHandoff) -> Result<String> {
        let mut owner: Option<String> = None;
        for line in &request.containers {
            let company = self
                .directory
                .resolve_company_for_container(&line.container_ref)
                .ok_or_else(|| {
                    CustodyError::Validation(format!("unknown container {}", line.container_ref))
                })?;
            if let Some(requested) = &request.company {
                if &company != requested {
                    return Err(CustodyError::Validation(format!(
                        "container {} belongs to {}, not {}",
                        line.container_ref, company, requested
                    )));
                }
            }
            match &owner {
                Some(first) if first != &company => {
                    return Err(CustodyError::Validation(
                        "containers belong to more than one company".to_string(),
                    ));
                }
                Some(_) => {}
                None => owner = Some(company),
            }
        }
        owner.ok_or_else(|| CustodyError::Validation("no containers".to_string()))
    }

    fn resolve_receiver(&self, caller: &Caller, request: &CreateHandoff) -> Result<Party> {
        let spec = &request.receiver;
        match request.handoff_type {
            HandoffType::FacilityToDriver => {
                if !matches!(
                    caller.role,
                    Role::Admin | Role::Supervisor | Role::FacilityStaff
                ) {
                    return Err(CustodyError::Validation(format!(
                        "role {} cannot hand containers to a driver",
                        caller.role.as_str()
                    )));
                }
                let account_id = spec.account_id.as_deref().ok_or_else(|| {
                    CustodyError::Validation("receiver driver account is required".to_string())
                })?;
                let driver = self.directory.resolve_driver_account(account_id).ok_or_else(|| {
                    CustodyError::Validation(format!("unknown driver account {}", account_id))
                })?;
                Ok(Party {
                    identity: Some(driver.account_id),
                    role: Role::Driver,
                    name: driver.name,
                    phone: spec.phone.clone().or(driver.phone),
                    confirmed_at: None,
                })
            }
            HandoffType::DriverToIncinerator => {
                if caller.role != Role::Driver {
                    return Err(CustodyError::Validation(
                        "only a driver can hand containers to an incinerator".to_string(),
                    ));
                }
                let phone = spec.phone.clone().filter(|p| !p.trim().is_empty());
                if spec.account_id.is_none() && phone.is_none() {
                    return Err(CustodyError::Validation(
                        "receiver needs an account id or a contact phone".to_string(),
                    ));
                }
                let name = spec
                    .name
                    .clone()
                    .or_else(|| spec.account_id.clone())
                    .or_else(|| phone.clone())
                    .unwrap_or_default();
                Ok(Party {
                    identity: spec.account_id.clone(),
                    role: Role::IncineratorOperator,
                    name,
                    phone,
                    confirmed_at: None,
                })
            }
        }
    }

    fn check_session_slot(&self, session_id: &str, handoff_type: HandoffType) -> Result<()> {
        let occupied = self.store.by_session(session_id)?.into_iter().any(|h| {
            h.handoff_type == handoff_type
                && !matches!(h.status, HandoffStatus::Expired | HandoffStatus::Resolved)
        });
        if occupied {
            return Err(CustodyError::Validation(format!(
                "session {} already has a live {} handoff",
                session_id, handoff_type
            )));
        }
        Ok(())
    }
}
