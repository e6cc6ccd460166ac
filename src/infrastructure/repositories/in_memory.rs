use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    application::retry_scheduler::retry_eligible,
    domain::{
        models::{
            Broadcast, BroadcastKind, BroadcastStatus, CampaignRecipient, Customer, Message,
            RecipientCounts, SendPhase,
        },
        repositories::{
            BroadcastRepository, CustomerRepository, MessageRepository, RecipientRepository,
        },
        status::DeliveryStatus,
    },
};

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: Arc<RwLock<HashMap<Uuid, Message>>>,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn insert(&self, message: Message) -> anyhow::Result<Message> {
        let mut messages = self.messages.write().await;
        messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Message>> {
        let messages = self.messages.read().await;
        Ok(messages.get(&id).cloned())
    }

    async fn find_by_sid(&self, sid: &str) -> anyhow::Result<Option<Message>> {
        let messages = self.messages.read().await;
        Ok(messages
            .values()
            .find(|m| m.provider_sid.as_deref() == Some(sid))
            .cloned())
    }

    async fn update(&self, message: &Message) -> anyhow::Result<()> {
        let mut messages = self.messages.write().await;
        messages.insert(message.id, message.clone());
        Ok(())
    }

    async fn claim_retryable(
        &self,
        now: DateTime<Utc>,
        backoff_minutes: &[i64],
        max_attempts: u32,
        limit: i64,
    ) -> anyhow::Result<Vec<Message>> {
        let mut messages = self.messages.write().await;
        let mut claimed = Vec::new();
        let mut ids: Vec<Uuid> = messages.keys().copied().collect();
        ids.sort();
        for id in ids {
            if claimed.len() as i64 >= limit {
                break;
            }
            let entry = messages.get_mut(&id).expect("key just listed");
            // Campaign bodies are retried through their recipient row.
            if entry.campaign_linked {
                continue;
            }
            if retry_eligible(
                entry.status,
                entry.error_permanent,
                entry.retry_count,
                entry.last_retry_at,
                now,
                backoff_minutes,
                max_attempts,
            ) {
                entry.retry_count += 1;
                entry.last_retry_at = Some(now);
                entry.status = DeliveryStatus::Pending;
                // The resend gets a fresh sid; late callbacks for the old
                // one land as orphans.
                entry.provider_sid = None;
                entry.updated_at = now;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }
}

#[derive(Default)]
pub struct InMemoryRecipientRepository {
    rows: Arc<RwLock<HashMap<(BroadcastKind, Uuid), CampaignRecipient>>>,
}

impl InMemoryRecipientRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipientRepository for InMemoryRecipientRepository {
    async fn insert_pending(
        &self,
        kind: BroadcastKind,
        recipients: Vec<CampaignRecipient>,
    ) -> anyhow::Result<()> {
        let mut rows = self.rows.write().await;
        for recipient in recipients {
            rows.insert((kind, recipient.id), recipient);
        }
        Ok(())
    }

    async fn get(
        &self,
        kind: BroadcastKind,
        id: Uuid,
    ) -> anyhow::Result<Option<CampaignRecipient>> {
        let rows = self.rows.read().await;
        Ok(rows.get(&(kind, id)).cloned())
    }

    async fn list_for_broadcast(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<Vec<CampaignRecipient>> {
        let rows = self.rows.read().await;
        let mut result: Vec<CampaignRecipient> = rows
            .iter()
            .filter(|((k, _), row)| *k == kind && row.broadcast_id == broadcast_id)
            .map(|(_, row)| row.clone())
            .collect();
        result.sort_by_key(|row| row.created_at);
        Ok(result)
    }

    async fn update(
        &self,
        kind: BroadcastKind,
        recipient: &CampaignRecipient,
    ) -> anyhow::Result<()> {
        let mut rows = self.rows.write().await;
        rows.insert((kind, recipient.id), recipient.clone());
        Ok(())
    }

    async fn find_by_sid(
        &self,
        kind: BroadcastKind,
        sid: &str,
    ) -> anyhow::Result<Option<(CampaignRecipient, SendPhase)>> {
        let rows = self.rows.read().await;
        for ((k, _), row) in rows.iter() {
            if *k != kind {
                continue;
            }
            if row.message_sid.as_deref() == Some(sid) {
                return Ok(Some((row.clone(), SendPhase::Actual)));
            }
            if row.confirmation_sid.as_deref() == Some(sid) {
                return Ok(Some((row.clone(), SendPhase::Confirmation)));
            }
        }
        Ok(None)
    }

    async fn claim_pending(
        &self,
        kind: BroadcastKind,
        id: Uuid,
        now: DateTime<Utc>,
        reclaim_after_minutes: i64,
    ) -> anyhow::Result<bool> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(&(kind, id)) else {
            return Ok(false);
        };
        if row.status != DeliveryStatus::Pending || row.is_dispatched() {
            return Ok(false);
        }
        let claimable = match row.last_retry_at {
            None => true,
            Some(at) => now - at >= Duration::minutes(reclaim_after_minutes),
        };
        if !claimable {
            return Ok(false);
        }
        row.last_retry_at = Some(now);
        row.updated_at = now;
        Ok(true)
    }

    async fn claim_retryable(
        &self,
        kind: BroadcastKind,
        now: DateTime<Utc>,
        backoff_minutes: &[i64],
        max_attempts: u32,
        limit: i64,
    ) -> anyhow::Result<Vec<CampaignRecipient>> {
        let mut rows = self.rows.write().await;
        let mut keys: Vec<(BroadcastKind, Uuid)> = rows
            .keys()
            .filter(|(k, _)| *k == kind)
            .copied()
            .collect();
        keys.sort_by_key(|(_, id)| *id);
        let mut claimed = Vec::new();
        for key in keys {
            if claimed.len() as i64 >= limit {
                break;
            }
            let row = rows.get_mut(&key).expect("key just listed");
            // Pending rows belong to the fan-out claim path, not here.
            if row.status == DeliveryStatus::Pending {
                continue;
            }
            if retry_eligible(
                row.status,
                row.error_permanent,
                row.retry_count,
                row.last_retry_at,
                now,
                backoff_minutes,
                max_attempts,
            ) {
                row.retry_count += 1;
                row.last_retry_at = Some(now);
                row.status = DeliveryStatus::Pending;
                if row.message_sid.is_some() {
                    row.message_sid = None;
                } else {
                    row.confirmation_sid = None;
                }
                row.updated_at = now;
                claimed.push(row.clone());
            }
        }
        Ok(claimed)
    }

    async fn status_counts(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<RecipientCounts> {
        let rows = self.rows.read().await;
        let mut counts = RecipientCounts::default();
        for ((k, _), row) in rows.iter() {
            if *k == kind && row.broadcast_id == broadcast_id {
                counts.tally(row.status);
            }
        }
        Ok(counts)
    }

    async fn existing_customer_ids(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<Vec<Uuid>> {
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|((k, _), row)| *k == kind && row.broadcast_id == broadcast_id)
            .map(|(_, row)| row.customer_id)
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryBroadcastRepository {
    broadcasts: Arc<RwLock<HashMap<Uuid, Broadcast>>>,
}

impl InMemoryBroadcastRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BroadcastRepository for InMemoryBroadcastRepository {
    async fn insert(&self, broadcast: Broadcast) -> anyhow::Result<Broadcast> {
        let mut broadcasts = self.broadcasts.write().await;
        broadcasts.insert(broadcast.id, broadcast.clone());
        Ok(broadcast)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Broadcast>> {
        let broadcasts = self.broadcasts.read().await;
        Ok(broadcasts.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: BroadcastStatus) -> anyhow::Result<()> {
        let mut broadcasts = self.broadcasts.write().await;
        if let Some(broadcast) = broadcasts.get_mut(&id) {
            broadcast.status = status;
            broadcast.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCustomerRepository {
    customers: Arc<std::sync::RwLock<HashMap<Uuid, Customer>>>,
    groups: Arc<std::sync::RwLock<HashMap<Uuid, Vec<Uuid>>>>,
}

impl InMemoryCustomerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, customer: Customer) {
        self.customers
            .write()
            .expect("customer lock poisoned")
            .insert(customer.id, customer);
    }

    pub fn put_group(&self, group_id: Uuid, member_ids: Vec<Uuid>) {
        self.groups
            .write()
            .expect("group lock poisoned")
            .insert(group_id, member_ids);
    }
}

#[async_trait]
impl CustomerRepository for InMemoryCustomerRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Customer>> {
        Ok(self
            .customers
            .read()
            .expect("customer lock poisoned")
            .get(&id)
            .cloned())
    }

    async fn group_members(&self, group_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        Ok(self
            .groups
            .read()
            .expect("group lock poisoned")
            .get(&group_id)
            .cloned()
            .unwrap_or_default())
    }
}
