use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::status::DeliveryStatus;

/// One outbound WhatsApp message and its delivery tracking state.
///
/// `provider_sid` is assigned by the gateway at send time and is unique once
/// set; the first assignment wins. `retry_count` never decreases and
/// `delivered_at` is stamped at most once, both enforced by the state
/// machine rather than by callers mutating fields directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub provider_sid: Option<String>,
    pub to: String,
    pub body: String,
    pub status: DeliveryStatus,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    /// Failure classified as permanent by the gateway; excluded from retry.
    pub error_permanent: bool,
    /// Body of a broadcast recipient. Retried through the recipient row
    /// only; the message claim path skips these.
    pub campaign_linked: bool,
    pub retry_count: u32,
    /// Time of the last send attempt, scheduler-driven or initial.
    pub last_retry_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(to: impl Into<String>, body: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider_sid: None,
            to: to.into(),
            body: body.into(),
            status: DeliveryStatus::Pending,
            error_code: None,
            error_message: None,
            error_permanent: false,
            campaign_linked: false,
            retry_count: 0,
            last_retry_at: None,
            delivered_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
