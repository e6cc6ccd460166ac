use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A farmer reachable over WhatsApp.
///
/// `session_expires_at` marks the end of the 24-hour messaging window that
/// the last inbound message opened. Stamping it happens in the inbound
/// path, outside this core; the fan-out engine only reads it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub phone_number: String,
    pub full_name: Option<String>,
    pub session_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn has_active_session(&self, now: DateTime<Utc>) -> bool {
        self.session_expires_at.is_some_and(|expires| expires > now)
    }
}

/// A named audience with a materialized member list.
///
/// Filters (crop type, age group, administrative area) are applied once at
/// group creation; the member list is what campaigns resolve against, so a
/// campaign's composition is stable after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerGroup {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}
