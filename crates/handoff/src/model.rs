//! Handoff data model.
//!
//! A [`Handoff`] records one custody transfer of a batch of waste containers.
//! Its `status` is never written directly: it is a projection of the
//! confirmation timestamps, the dispute stage, the expiry marker and the
//! notification marker, recomputed by [`Handoff::refresh_status`] after every
//! transition.

use crate::token::ConfirmationToken;
use custody_core::AuditEntry;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Direction of a custody transfer. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffType {
    /// Step 1: generating facility hands containers to a driver
    FacilityToDriver,
    /// Step 2: driver hands containers to the incineration plant
    DriverToIncinerator,
}

impl HandoffType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffType::FacilityToDriver => "facility_to_driver",
            HandoffType::DriverToIncinerator => "driver_to_incinerator",
        }
    }

    /// Prefix of the human-readable handoff code.
    pub fn code_prefix(&self) -> &'static str {
        match self {
            HandoffType::FacilityToDriver => "FD",
            HandoffType::DriverToIncinerator => "DI",
        }
    }
}

impl std::fmt::Display for HandoffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandoffType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "facility_to_driver" => Ok(HandoffType::FacilityToDriver),
            "driver_to_incinerator" => Ok(HandoffType::DriverToIncinerator),
            other => Err(format!("unknown handoff type: {}", other)),
        }
    }
}

/// Handoff lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    Created,
    Pending,
    ConfirmedBySender,
    ConfirmedByReceiver,
    Completed,
    Disputed,
    Resolving,
    Resolved,
    Expired,
}

impl HandoffStatus {
    pub const ALL: [HandoffStatus; 9] = [
        HandoffStatus::Created,
        HandoffStatus::Pending,
        HandoffStatus::ConfirmedBySender,
        HandoffStatus::ConfirmedByReceiver,
        HandoffStatus::Completed,
        HandoffStatus::Disputed,
        HandoffStatus::Resolving,
        HandoffStatus::Resolved,
        HandoffStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffStatus::Created => "created",
            HandoffStatus::Pending => "pending",
            HandoffStatus::ConfirmedBySender => "confirmed_by_sender",
            HandoffStatus::ConfirmedByReceiver => "confirmed_by_receiver",
            HandoffStatus::Completed => "completed",
            HandoffStatus::Disputed => "disputed",
            HandoffStatus::Resolving => "resolving",
            HandoffStatus::Resolved => "resolved",
            HandoffStatus::Expired => "expired",
        }
    }

    /// `completed`, `resolved` and `expired` are retained for audit only.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HandoffStatus::Completed | HandoffStatus::Resolved | HandoffStatus::Expired
        )
    }

    /// States in which the receiver's confirmation token is still live.
    pub fn receiver_window_open(&self) -> bool {
        matches!(
            self,
            HandoffStatus::Created | HandoffStatus::Pending | HandoffStatus::ConfirmedBySender
        )
    }

    /// States the expiry sweep may move to `expired`.
    pub fn can_expire(&self) -> bool {
        matches!(self, HandoffStatus::Pending | HandoffStatus::ConfirmedBySender)
    }

    pub fn has_dispute(&self) -> bool {
        matches!(
            self,
            HandoffStatus::Disputed | HandoffStatus::Resolving | HandoffStatus::Resolved
        )
    }
}

impl std::fmt::Display for HandoffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandoffStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HandoffStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown handoff status: {}", s))
    }
}

/// Role of a party or caller. Authentication is external; the role is taken
/// as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Supervisor,
    FacilityStaff,
    Driver,
    IncineratorOperator,
}

impl Role {
    /// Supervisors and admins may resolve disputes and act on any handoff.
    pub fn is_supervisor(&self) -> bool {
        matches!(self, Role::Admin | Role::Supervisor)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::FacilityStaff => "facility_staff",
            Role::Driver => "driver",
            Role::IncineratorOperator => "incinerator_operator",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "supervisor" => Ok(Role::Supervisor),
            "facility_staff" => Ok(Role::FacilityStaff),
            "driver" => Ok(Role::Driver),
            "incinerator_operator" => Ok(Role::IncineratorOperator),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Authenticated caller identity, supplied by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub identity: String,
    pub role: Role,
    pub name: String,
}

impl Caller {
    pub fn new(identity: impl Into<String>, role: Role, name: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            role,
            name: name.into(),
        }
    }
}

/// One container in a handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerLine {
    pub container_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bag_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl ContainerLine {
    pub fn new(container_ref: impl Into<String>) -> Self {
        Self {
            container_ref: container_ref.into(),
            declared_weight: None,
            bag_count: None,
            notes: None,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.declared_weight = Some(weight);
        self
    }
}

/// Sender or receiver of a handoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Party {
    /// Account identity; `None` for receivers reachable only through a token
    pub identity: Option<String>,
    pub role: Role,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<u64>,
}

impl Party {
    pub fn is_confirmed(&self) -> bool {
        self.confirmed_at.is_some()
    }

    /// True when `caller` is the account behind this party.
    pub fn is_identity(&self, caller: &Caller) -> bool {
        self.identity.as_deref() == Some(caller.identity.as_str())
    }
}

/// Why a party disagrees with a handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeReason {
    WrongWeight,
    WrongCount,
    DamagedContainer,
    MissingContainer,
    Other,
}

impl DisputeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisputeReason::WrongWeight => "wrong_weight",
            DisputeReason::WrongCount => "wrong_count",
            DisputeReason::DamagedContainer => "damaged_container",
            DisputeReason::MissingContainer => "missing_container",
            DisputeReason::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStage {
    Open,
    Resolving,
    Resolved,
}

/// Dispute record. Present only while status is `disputed`, `resolving` or
/// `resolved`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    pub reason: DisputeReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub raised_by: String,
    pub raised_at: u64,
    pub stage: DisputeStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
}

/// One custody-transfer record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handoff {
    /// Opaque stable identifier
    pub id: String,
    /// Human-readable code (`FD-000001`)
    pub handoff_id: String,
    /// Groups the two steps of one collection session
    pub chain_id: String,
    #[serde(rename = "type")]
    pub handoff_type: HandoffType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub company: String,
    pub containers: Vec<ContainerLine>,
    pub total_containers: usize,
    pub total_declared_weight: f64,
    pub sender: Party,
    pub receiver: Party,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation_token: Option<ConfirmationToken>,
    pub status: HandoffStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispute: Option<Dispute>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notified_at: Option<u64>,
    pub created_at: u64,
    /// Time the current status was entered; expiry is measured from here
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_at: Option<u64>,
    /// Optimistic concurrency version, bumped by the store on every replace
    pub version: u64,
    pub audit: Vec<AuditEntry>,
}

impl Handoff {
    /// Recompute the cached container summaries.
    pub fn recompute_totals(&mut self) {
        self.total_containers = self.containers.len();
        self.total_declared_weight = self
            .containers
            .iter()
            .map(|c| c.declared_weight.unwrap_or(0.0))
            .sum();
    }

    /// Project the status from the underlying facts.
    pub fn derive_status(&self) -> HandoffStatus {
        if self.expired_at.is_some() {
            return HandoffStatus::Expired;
        }
        if let Some(dispute) = &self.dispute {
            return match dispute.stage {
                DisputeStage::Open => HandoffStatus::Disputed,
                DisputeStage::Resolving => HandoffStatus::Resolving,
                DisputeStage::Resolved => HandoffStatus::Resolved,
            };
        }
        match (self.sender.is_confirmed(), self.receiver.is_confirmed()) {
            (true, true) => HandoffStatus::Completed,
            (true, false) => HandoffStatus::ConfirmedBySender,
            (false, true) => HandoffStatus::ConfirmedByReceiver,
            (false, false) if self.notified_at.is_some() => HandoffStatus::Pending,
            (false, false) => HandoffStatus::Created,
        }
    }

    pub fn refresh_status(&mut self) {
        self.status = self.derive_status();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Check every data-model invariant. Returns the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.total_containers != self.containers.len() {
            return Err(format!(
                "total_containers {} != {} containers",
                self.total_containers,
                self.containers.len()
            ));
        }
        let weight: f64 = self
            .containers
            .iter()
            .map(|c| c.declared_weight.unwrap_or(0.0))
            .sum();
        if (weight - self.total_declared_weight).abs() > 1e-9 {
            return Err(format!(
                "total_declared_weight {} != {}",
                self.total_declared_weight, weight
            ));
        }
        if self.status != self.derive_status() {
            return Err(format!(
                "status {} does not match derived {}",
                self.status,
                self.derive_status()
            ));
        }
        if self.completed_at.is_some() != (self.status == HandoffStatus::Completed) {
            return Err("completed_at set iff status is completed".to_string());
        }
        if self.dispute.is_some() != self.status.has_dispute() {
            return Err("dispute present iff status is disputed/resolving/resolved".to_string());
        }
        if self.confirmation_token.is_some() && !self.status.receiver_window_open() {
            return Err(format!(
                "confirmation token still live in status {}",
                self.status
            ));
        }
        Ok(())
    }
}
