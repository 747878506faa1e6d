//! Public confirmation gateway.
//!
//! Entry point for receivers without an account. The capability token is the
//! only authorization factor, so every call re-validates it against the
//! store, and responses are redacted to display names and roles.

use crate::model::{ContainerLine, DisputeReason, Handoff, HandoffStatus, HandoffType, Role};
use crate::service::HandoffService;
use custody_core::Result;
use serde::Serialize;
use std::sync::Arc;

/// Party as shown to a token holder.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicParty {
    pub name: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<u64>,
}

/// Redacted projection of a handoff. Carries no account identities, phone
/// numbers, session or chain ids.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicHandoffView {
    pub handoff_id: String,
    #[serde(rename = "type")]
    pub handoff_type: HandoffType,
    pub status: HandoffStatus,
    pub company: String,
    pub containers: Vec<ContainerLine>,
    pub total_containers: usize,
    pub total_declared_weight: f64,
    pub sender: PublicParty,
    pub receiver: PublicParty,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    /// When the confirmation window closes, if it is still open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispute_reason: Option<DisputeReason>,
    pub can_confirm: bool,
    pub can_dispute: bool,
}

impl PublicHandoffView {
    pub fn project(handoff: &Handoff, ttl_ms: u64) -> Self {
        let token_live = handoff.confirmation_token.is_some();
        let party = |p: &crate::model::Party| PublicParty {
            name: p.name.clone(),
            role: p.role,
            confirmed_at: p.confirmed_at,
        };
        Self {
            handoff_id: handoff.handoff_id.clone(),
            handoff_type: handoff.handoff_type,
            status: handoff.status,
            company: handoff.company.clone(),
            containers: handoff.containers.clone(),
            total_containers: handoff.total_containers,
            total_declared_weight: handoff.total_declared_weight,
            sender: party(&handoff.sender),
            receiver: party(&handoff.receiver),
            created_at: handoff.created_at,
            completed_at: handoff.completed_at,
            expires_at: handoff
                .status
                .can_expire()
                .then(|| handoff.updated_at.saturating_add(ttl_ms)),
            dispute_reason: handoff.dispute.as_ref().map(|d| d.reason),
            can_confirm: token_live
                && matches!(
                    handoff.status,
                    HandoffStatus::Pending | HandoffStatus::ConfirmedBySender
                ),
            can_dispute: token_live && !handoff.is_terminal() && handoff.dispute.is_none(),
        }
    }
}

/// Token-authenticated operations.
#[derive(Clone)]
pub struct PublicGateway {
    service: Arc<HandoffService>,
}

impl PublicGateway {
    pub fn new(service: Arc<HandoffService>) -> Self {
        Self { service }
    }

    pub fn get_by_token(&self, token: &str) -> Result<PublicHandoffView> {
        let handoff = self.service.resolve_token(token)?;
        Ok(PublicHandoffView::project(&handoff, self.service.ttl_ms()))
    }

    /// Apply the receiver confirmation. Returns the redacted view and whether
    /// this call changed the handoff.
    pub fn confirm_by_token(&self, token: &str) -> Result<(PublicHandoffView, bool)> {
        let outcome = self.service.confirm_by_token(token)?;
        Ok((
            PublicHandoffView::project(&outcome.handoff, self.service.ttl_ms()),
            outcome.applied,
        ))
    }

    pub fn dispute_by_token(
        &self,
        token: &str,
        reason: DisputeReason,
        description: Option<String>,
    ) -> Result<PublicHandoffView> {
        let outcome = self.service.dispute_by_token(token, reason, description)?;
        Ok(PublicHandoffView::project(&outcome.handoff, self.service.ttl_ms()))
    }
}
