use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::models::{
    Broadcast, BroadcastKind, BroadcastStatus, CampaignRecipient, Customer, Message,
    RecipientCounts, SendPhase,
};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn insert(&self, message: Message) -> anyhow::Result<Message>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Message>>;

    async fn find_by_sid(&self, sid: &str) -> anyhow::Result<Option<Message>>;

    /// Persists the whole row. Row-scoped; callers must have gone through
    /// the state machine for any status change.
    async fn update(&self, message: &Message) -> anyhow::Result<()>;

    /// Atomically selects retry-eligible rows and stamps the claim on them
    /// (increment `retry_count`, set `last_retry_at`, reset to pending),
    /// returning the claimed rows. Two concurrent scheduler instances never
    /// claim the same row.
    ///
    /// Eligible: status pending or failed, not permanent-classified,
    /// `retry_count < max_attempts`, and `last_retry_at` absent or at least
    /// `backoff_minutes[retry_count]` minutes in the past.
    async fn claim_retryable(
        &self,
        now: DateTime<Utc>,
        backoff_minutes: &[i64],
        max_attempts: u32,
        limit: i64,
    ) -> anyhow::Result<Vec<Message>>;
}

#[async_trait]
pub trait BroadcastRepository: Send + Sync {
    async fn insert(&self, broadcast: Broadcast) -> anyhow::Result<Broadcast>;

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Broadcast>>;

    async fn set_status(&self, id: Uuid, status: BroadcastStatus) -> anyhow::Result<()>;
}

/// One implementation serves both recipient tables; [`BroadcastKind`]
/// selects which.
#[async_trait]
pub trait RecipientRepository: Send + Sync {
    async fn insert_pending(
        &self,
        kind: BroadcastKind,
        recipients: Vec<CampaignRecipient>,
    ) -> anyhow::Result<()>;

    async fn get(&self, kind: BroadcastKind, id: Uuid) -> anyhow::Result<Option<CampaignRecipient>>;

    async fn list_for_broadcast(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<Vec<CampaignRecipient>>;

    async fn update(&self, kind: BroadcastKind, recipient: &CampaignRecipient)
        -> anyhow::Result<()>;

    /// Matches a provider sid against both sid columns, reporting which one
    /// hit so the caller knows the send phase.
    async fn find_by_sid(
        &self,
        kind: BroadcastKind,
        sid: &str,
    ) -> anyhow::Result<Option<(CampaignRecipient, SendPhase)>>;

    /// Conditional claim of an undispatched pending row before the gateway
    /// call, so a resumed or concurrent dispatch pass cannot double-send.
    /// A previous claim older than `reclaim_after_minutes` is considered
    /// abandoned (crashed worker) and may be taken over.
    async fn claim_pending(
        &self,
        kind: BroadcastKind,
        id: Uuid,
        now: DateTime<Utc>,
        reclaim_after_minutes: i64,
    ) -> anyhow::Result<bool>;

    /// Same claim semantics as [`MessageRepository::claim_retryable`], over
    /// a recipient table.
    async fn claim_retryable(
        &self,
        kind: BroadcastKind,
        now: DateTime<Utc>,
        backoff_minutes: &[i64],
        max_attempts: u32,
        limit: i64,
    ) -> anyhow::Result<Vec<CampaignRecipient>>;

    async fn status_counts(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<RecipientCounts>;

    /// Customers that already have a recipient row in this campaign.
    /// Used to make fan-out re-runs idempotent.
    async fn existing_customer_ids(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<Vec<Uuid>>;
}

#[async_trait]
pub trait CustomerRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Customer>>;

    /// Materialized member list of one group.
    async fn group_members(&self, group_id: Uuid) -> anyhow::Result<Vec<Uuid>>;
}
