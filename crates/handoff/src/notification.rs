//! Notification bookkeeping.
//!
//! Delivery itself is an external collaborator behind [`Notifier`]. The core
//! only records each attempt as an append-only [`NotificationLogEntry`];
//! a failed delivery is logged with a failed status and never fails the
//! transition that triggered it.

use crate::model::Handoff;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{info, warn};

/// Delivery channel for confirmation links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Sms,
    Whatsapp,
    Telegram,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Sms => "sms",
            Channel::Whatsapp => "whatsapp",
            Channel::Telegram => "telegram",
        }
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(Channel::Sms),
            "whatsapp" => Ok(Channel::Whatsapp),
            "telegram" => Ok(Channel::Telegram),
            other => Err(format!("unknown notification channel: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Failed => "failed",
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(DeliveryStatus::Sent),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {}", other)),
        }
    }
}

/// One delivery attempt. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationLogEntry {
    /// Opaque handoff id
    pub handoff_id: String,
    pub channel: Channel,
    pub recipient_phone: Option<String>,
    pub status: DeliveryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub sent_at: u64,
}

/// Outbound notification service.
pub trait Notifier: Send + Sync {
    /// Send the confirmation link for `handoff` over `channel` and report the
    /// attempt. Implementations must not panic on delivery failure.
    fn send(&self, handoff: &Handoff, channel: Channel, now: u64) -> NotificationLogEntry;
}

/// Build the public confirmation link for a handoff, if it still has a token.
pub fn confirmation_link(base_url: &str, handoff: &Handoff) -> Option<String> {
    handoff.confirmation_token.as_ref().map(|token| {
        format!(
            "{}/handoffs/public/{}",
            base_url.trim_end_matches('/'),
            token.as_str()
        )
    })
}

fn entry(handoff: &Handoff, channel: Channel, now: u64, error: Option<String>) -> NotificationLogEntry {
    NotificationLogEntry {
        handoff_id: handoff.id.clone(),
        channel,
        recipient_phone: handoff.receiver.phone.clone(),
        status: if error.is_some() {
            DeliveryStatus::Failed
        } else {
            DeliveryStatus::Sent
        },
        error,
        sent_at: now,
    }
}

/// Notifier that hands the link to the log pipeline instead of a carrier.
/// The link itself is not logged since it carries the token.
#[derive(Debug, Clone)]
pub struct TracingNotifier {
    base_url: String,
}

impl TracingNotifier {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Notifier for TracingNotifier {
    fn send(&self, handoff: &Handoff, channel: Channel, now: u64) -> NotificationLogEntry {
        let Some(phone) = handoff.receiver.phone.as_deref() else {
            warn!(handoff_id = %handoff.handoff_id, "receiver has no phone number");
            return entry(handoff, channel, now, Some("receiver has no phone number".to_string()));
        };
        if confirmation_link(&self.base_url, handoff).is_none() {
            return entry(handoff, channel, now, Some("no live confirmation token".to_string()));
        }
        info!(
            handoff_id = %handoff.handoff_id,
            channel = channel.as_str(),
            recipient = %phone,
            "confirmation link dispatched"
        );
        entry(handoff, channel, now, None)
    }
}

/// Notifier that records every request in memory. Delivery can be switched
/// to fail to exercise best-effort semantics.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(String, Channel)>>,
    failing: std::sync::atomic::AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    /// `(handoff id, channel)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, Channel)> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, handoff: &Handoff, channel: Channel, now: u64) -> NotificationLogEntry {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((handoff.id.clone(), channel));
        }
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            entry(handoff, channel, now, Some("carrier rejected message".to_string()))
        } else {
            entry(handoff, channel, now, None)
        }
    }
}
