use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    models::{BroadcastKind, CampaignRecipient, Message},
    status::DeliveryStatus,
};

/// Which of a recipient's two provider sids a webhook matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendPhase {
    /// The session-opening template message.
    Confirmation,
    /// The campaign body itself.
    Actual,
}

/// The local row a provider callback resolved to.
///
/// Resolved once at webhook ingress, then driven through the one shared
/// state machine; the tag is what remembers which table (and which sid
/// column) matched.
#[derive(Debug, Clone)]
pub enum DeliveryTarget {
    Message(Message),
    BroadcastRecipient(CampaignRecipient, SendPhase),
    WeatherBroadcastRecipient(CampaignRecipient, SendPhase),
}

impl DeliveryTarget {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryTarget::Message(m) => m.status,
            DeliveryTarget::BroadcastRecipient(r, _)
            | DeliveryTarget::WeatherBroadcastRecipient(r, _) => r.status,
        }
    }

    pub fn set_status(&mut self, status: DeliveryStatus) {
        let now = Utc::now();
        match self {
            DeliveryTarget::Message(m) => {
                m.status = status;
                m.updated_at = now;
            }
            DeliveryTarget::BroadcastRecipient(r, _)
            | DeliveryTarget::WeatherBroadcastRecipient(r, _) => {
                r.status = status;
                r.updated_at = now;
            }
        }
    }

    pub fn set_error(&mut self, code: Option<i32>, message: &str, permanent: bool) {
        match self {
            DeliveryTarget::Message(m) => {
                m.error_code = code;
                m.error_message = Some(message.to_string());
                m.error_permanent = permanent;
            }
            DeliveryTarget::BroadcastRecipient(r, _)
            | DeliveryTarget::WeatherBroadcastRecipient(r, _) => {
                r.error_message = Some(match code {
                    Some(code) => format!("{code}: {message}"),
                    None => message.to_string(),
                });
                r.error_permanent = permanent;
            }
        }
    }

    /// Stamps the delivered timestamp, first transition only. For a
    /// confirmation-phase recipient the stamp lands on `confirmed_at`
    /// instead, since the campaign body has not gone out yet.
    pub fn stamp_delivered(&mut self, at: DateTime<Utc>) {
        match self {
            DeliveryTarget::Message(m) => {
                if m.delivered_at.is_none() {
                    m.delivered_at = Some(at);
                }
            }
            DeliveryTarget::BroadcastRecipient(r, phase)
            | DeliveryTarget::WeatherBroadcastRecipient(r, phase) => match phase {
                SendPhase::Confirmation => {
                    if r.confirmed_at.is_none() {
                        r.confirmed_at = Some(at);
                    }
                }
                SendPhase::Actual => {
                    if r.delivered_at.is_none() {
                        r.delivered_at = Some(at);
                    }
                }
            },
        }
    }

    pub fn stamp_read(&mut self, at: DateTime<Utc>) {
        if let DeliveryTarget::BroadcastRecipient(r, SendPhase::Actual)
        | DeliveryTarget::WeatherBroadcastRecipient(r, SendPhase::Actual) = self
        {
            if r.read_at.is_none() {
                r.read_at = Some(at);
            }
        }
    }

    /// Whether the campaign body has already gone out for this row.
    pub fn actual_dispatched(&self) -> bool {
        match self {
            DeliveryTarget::Message(_) => false,
            DeliveryTarget::BroadcastRecipient(r, _)
            | DeliveryTarget::WeatherBroadcastRecipient(r, _) => r.message_sid.is_some(),
        }
    }

    pub fn phase(&self) -> Option<SendPhase> {
        match self {
            DeliveryTarget::Message(_) => None,
            DeliveryTarget::BroadcastRecipient(_, phase)
            | DeliveryTarget::WeatherBroadcastRecipient(_, phase) => Some(*phase),
        }
    }

    pub fn broadcast_kind(&self) -> Option<BroadcastKind> {
        match self {
            DeliveryTarget::Message(_) => None,
            DeliveryTarget::BroadcastRecipient(_, _) => Some(BroadcastKind::Campaign),
            DeliveryTarget::WeatherBroadcastRecipient(_, _) => Some(BroadcastKind::Weather),
        }
    }

    pub fn local_id(&self) -> Uuid {
        match self {
            DeliveryTarget::Message(m) => m.id,
            DeliveryTarget::BroadcastRecipient(r, _)
            | DeliveryTarget::WeatherBroadcastRecipient(r, _) => r.id,
        }
    }
}
