use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::status::DeliveryStatus;

/// Which recipient-tracking table a campaign fans out into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BroadcastKind {
    Campaign,
    Weather,
}

impl BroadcastKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastKind::Campaign => "campaign",
            BroadcastKind::Weather => "weather",
        }
    }

    pub fn from_str(value: &str) -> Option<BroadcastKind> {
        match value {
            "campaign" => Some(BroadcastKind::Campaign),
            "weather" => Some(BroadcastKind::Weather),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BroadcastStatus {
    Pending,
    Queued,
    InProgress,
    Completed,
    PartiallyFailed,
}

impl BroadcastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastStatus::Pending => "pending",
            BroadcastStatus::Queued => "queued",
            BroadcastStatus::InProgress => "in_progress",
            BroadcastStatus::Completed => "completed",
            BroadcastStatus::PartiallyFailed => "partially_failed",
        }
    }

    pub fn from_str(value: &str) -> Option<BroadcastStatus> {
        match value {
            "pending" => Some(BroadcastStatus::Pending),
            "queued" => Some(BroadcastStatus::Queued),
            "in_progress" => Some(BroadcastStatus::InProgress),
            "completed" => Some(BroadcastStatus::Completed),
            "partially_failed" => Some(BroadcastStatus::PartiallyFailed),
            _ => None,
        }
    }
}

/// A one-to-many campaign. Recipient counts are derived by query, never
/// stored alongside the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: Uuid,
    pub kind: BroadcastKind,
    pub name: String,
    pub body: String,
    pub created_by: Uuid,
    pub status: BroadcastStatus,
    pub group_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Broadcast {
    pub fn new(
        kind: BroadcastKind,
        name: impl Into<String>,
        body: impl Into<String>,
        created_by: Uuid,
        group_ids: Vec<Uuid>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            name: name.into(),
            body: body.into(),
            created_by,
            status: BroadcastStatus::Pending,
            group_ids,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-recipient delivery tracking for one campaign.
///
/// The same row shape backs both the `broadcast_recipients` and
/// `weather_broadcast_recipients` tables; which table a row belongs to is
/// carried by [`BroadcastKind`] at the repository boundary.
///
/// Two provider sids per row: `confirmation_sid` for the session-opening
/// template and `message_sid` for the campaign body. The actual body never
/// goes out before the confirmation is delivered, unless the customer's
/// session window was already open at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignRecipient {
    pub id: Uuid,
    pub broadcast_id: Uuid,
    pub customer_id: Uuid,
    pub status: DeliveryStatus,
    pub confirmation_sid: Option<String>,
    pub message_sid: Option<String>,
    /// Linked single-message row, set once the campaign body is sent.
    pub message_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub error_permanent: bool,
    pub retry_count: u32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignRecipient {
    pub fn pending(broadcast_id: Uuid, customer_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            broadcast_id,
            customer_id,
            status: DeliveryStatus::Pending,
            confirmation_sid: None,
            message_sid: None,
            message_id: None,
            error_message: None,
            error_permanent: false,
            retry_count: 0,
            last_retry_at: None,
            sent_at: None,
            confirmed_at: None,
            delivered_at: None,
            read_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Dispatch has already reached the gateway for this row.
    pub fn is_dispatched(&self) -> bool {
        self.confirmation_sid.is_some() || self.message_sid.is_some()
    }
}

/// Per-status recipient tallies for one campaign.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCounts {
    pub pending: u64,
    pub queued: u64,
    pub sending: u64,
    pub sent: u64,
    pub delivered: u64,
    pub read: u64,
    pub failed: u64,
    pub undelivered: u64,
}

impl RecipientCounts {
    pub fn total(&self) -> u64 {
        self.pending
            + self.queued
            + self.sending
            + self.sent
            + self.delivered
            + self.read
            + self.failed
            + self.undelivered
    }

    /// Rows that may still move: anything short of delivered/read/failure.
    pub fn in_flight(&self) -> u64 {
        self.pending + self.queued + self.sending + self.sent
    }

    pub fn failures(&self) -> u64 {
        self.failed + self.undelivered
    }

    pub fn tally(&mut self, status: DeliveryStatus) {
        match status {
            DeliveryStatus::Pending => self.pending += 1,
            DeliveryStatus::Queued => self.queued += 1,
            DeliveryStatus::Sending => self.sending += 1,
            DeliveryStatus::Sent => self.sent += 1,
            DeliveryStatus::Delivered => self.delivered += 1,
            DeliveryStatus::Read => self.read += 1,
            DeliveryStatus::Failed => self.failed += 1,
            DeliveryStatus::Undelivered => self.undelivered += 1,
        }
    }

    /// Aggregate campaign status derived from recipient states.
    pub fn derive_status(&self) -> BroadcastStatus {
        if self.in_flight() > 0 {
            BroadcastStatus::InProgress
        } else if self.failures() > 0 {
            BroadcastStatus::PartiallyFailed
        } else {
            BroadcastStatus::Completed
        }
    }
}
