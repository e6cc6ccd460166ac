use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres, Row};
use uuid::Uuid;

use crate::domain::{
    models::{
        Broadcast, BroadcastKind, BroadcastStatus, CampaignRecipient, Customer, Message,
        RecipientCounts, SendPhase,
    },
    repositories::{
        BroadcastRepository, CustomerRepository, MessageRepository, RecipientRepository,
    },
    status::DeliveryStatus,
};

pub type PgPool = Pool<Postgres>;

const MESSAGE_COLUMNS: &str = "id, provider_sid, to_number, body, status, error_code, \
     error_message, error_permanent, campaign_linked, retry_count, last_retry_at, \
     delivered_at, created_at, updated_at";

const RECIPIENT_COLUMNS: &str = "id, broadcast_id, customer_id, status, confirmation_sid, \
     message_sid, message_id, error_message, error_permanent, retry_count, last_retry_at, \
     sent_at, confirmed_at, delivered_at, read_at, created_at, updated_at";

fn recipient_table(kind: BroadcastKind) -> &'static str {
    match kind {
        BroadcastKind::Campaign => "broadcast_recipients",
        BroadcastKind::Weather => "weather_broadcast_recipients",
    }
}

#[derive(Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    async fn insert(&self, message: Message) -> anyhow::Result<Message> {
        sqlx::query(
            r#"
            INSERT INTO messages (
                id, provider_sid, to_number, body, status, error_code, error_message,
                error_permanent, campaign_linked, retry_count, last_retry_at, delivered_at,
                created_at, updated_at
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(message.id)
        .bind(&message.provider_sid)
        .bind(&message.to)
        .bind(&message.body)
        .bind(message.status.as_str())
        .bind(message.error_code)
        .bind(&message.error_message)
        .bind(message.error_permanent)
        .bind(message.campaign_linked)
        .bind(message.retry_count as i32)
        .bind(message.last_retry_at)
        .bind(message.delivered_at)
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(message)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Message::try_from).transpose()
    }

    async fn find_by_sid(&self, sid: &str) -> anyhow::Result<Option<Message>> {
        let record = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE provider_sid = $1"
        ))
        .bind(sid)
        .fetch_optional(&self.pool)
        .await?;
        record.map(Message::try_from).transpose()
    }

    async fn update(&self, message: &Message) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE messages
            SET provider_sid = $2,
                status = $3,
                error_code = $4,
                error_message = $5,
                error_permanent = $6,
                campaign_linked = $7,
                retry_count = $8,
                last_retry_at = $9,
                delivered_at = $10,
                updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(message.id)
        .bind(&message.provider_sid)
        .bind(message.status.as_str())
        .bind(message.error_code)
        .bind(&message.error_message)
        .bind(message.error_permanent)
        .bind(message.campaign_linked)
        .bind(message.retry_count as i32)
        .bind(message.last_retry_at)
        .bind(message.delivered_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_retryable(
        &self,
        now: DateTime<Utc>,
        backoff_minutes: &[i64],
        max_attempts: u32,
        limit: i64,
    ) -> anyhow::Result<Vec<Message>> {
        // Claim-before-send: selection and the retry stamp are one atomic
        // statement, and SKIP LOCKED keeps concurrent scheduler instances
        // off each other's rows.
        let records = sqlx::query_as::<_, MessageRecord>(&format!(
            r#"
            UPDATE messages
            SET retry_count = retry_count + 1,
                last_retry_at = $1,
                status = 'pending',
                provider_sid = NULL,
                updated_at = $1
            WHERE id IN (
                SELECT id FROM messages
                WHERE status IN ('pending', 'failed')
                  AND NOT error_permanent
                  AND NOT campaign_linked
                  AND retry_count < $2
                  AND retry_count < cardinality($3::bigint[])
                  AND (last_retry_at IS NULL
                       OR last_retry_at <= $1 - make_interval(
                              mins => (($3::bigint[])[retry_count + 1])::int))
                ORDER BY created_at
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {MESSAGE_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(max_attempts as i32)
        .bind(backoff_minutes.to_vec())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(Message::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PostgresBroadcastRepository {
    pool: PgPool,
}

impl PostgresBroadcastRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl BroadcastRepository for PostgresBroadcastRepository {
    async fn insert(&self, broadcast: Broadcast) -> anyhow::Result<Broadcast> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO broadcasts (id, kind, name, body, created_by, status, created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
            "#,
        )
        .bind(broadcast.id)
        .bind(broadcast.kind.as_str())
        .bind(&broadcast.name)
        .bind(&broadcast.body)
        .bind(broadcast.created_by)
        .bind(broadcast.status.as_str())
        .bind(broadcast.created_at)
        .bind(broadcast.updated_at)
        .execute(&mut *tx)
        .await?;
        for group_id in &broadcast.group_ids {
            sqlx::query(
                "INSERT INTO broadcast_groups (broadcast_id, group_id) VALUES ($1, $2)",
            )
            .bind(broadcast.id)
            .bind(group_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(broadcast)
    }

    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Broadcast>> {
        let Some(record) = sqlx::query_as::<_, BroadcastRecord>(
            "SELECT id, kind, name, body, created_by, status, created_at, updated_at \
             FROM broadcasts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let group_ids: Vec<Uuid> =
            sqlx::query("SELECT group_id FROM broadcast_groups WHERE broadcast_id = $1")
                .bind(id)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .map(|row| row.get("group_id"))
                .collect();

        Ok(Some(record.into_broadcast(group_ids)?))
    }

    async fn set_status(&self, id: Uuid, status: BroadcastStatus) -> anyhow::Result<()> {
        sqlx::query("UPDATE broadcasts SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresRecipientRepository {
    pool: PgPool,
}

impl PostgresRecipientRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl RecipientRepository for PostgresRecipientRepository {
    async fn insert_pending(
        &self,
        kind: BroadcastKind,
        recipients: Vec<CampaignRecipient>,
    ) -> anyhow::Result<()> {
        let table = recipient_table(kind);
        let mut tx = self.pool.begin().await?;
        for recipient in &recipients {
            sqlx::query(&format!(
                r#"
                INSERT INTO {table} (
                    id, broadcast_id, customer_id, status, confirmation_sid, message_sid,
                    message_id, error_message, error_permanent, retry_count, last_retry_at,
                    sent_at, confirmed_at, delivered_at, read_at, created_at, updated_at
                )
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17)
                ON CONFLICT (broadcast_id, customer_id) DO NOTHING
                "#
            ))
            .bind(recipient.id)
            .bind(recipient.broadcast_id)
            .bind(recipient.customer_id)
            .bind(recipient.status.as_str())
            .bind(&recipient.confirmation_sid)
            .bind(&recipient.message_sid)
            .bind(recipient.message_id)
            .bind(&recipient.error_message)
            .bind(recipient.error_permanent)
            .bind(recipient.retry_count as i32)
            .bind(recipient.last_retry_at)
            .bind(recipient.sent_at)
            .bind(recipient.confirmed_at)
            .bind(recipient.delivered_at)
            .bind(recipient.read_at)
            .bind(recipient.created_at)
            .bind(recipient.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(
        &self,
        kind: BroadcastKind,
        id: Uuid,
    ) -> anyhow::Result<Option<CampaignRecipient>> {
        let table = recipient_table(kind);
        let record = sqlx::query_as::<_, RecipientRecord>(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM {table} WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        record.map(CampaignRecipient::try_from).transpose()
    }

    async fn list_for_broadcast(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<Vec<CampaignRecipient>> {
        let table = recipient_table(kind);
        let records = sqlx::query_as::<_, RecipientRecord>(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM {table} WHERE broadcast_id = $1 ORDER BY created_at"
        ))
        .bind(broadcast_id)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(CampaignRecipient::try_from).collect()
    }

    async fn update(
        &self,
        kind: BroadcastKind,
        recipient: &CampaignRecipient,
    ) -> anyhow::Result<()> {
        let table = recipient_table(kind);
        sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET status = $2,
                confirmation_sid = $3,
                message_sid = $4,
                message_id = $5,
                error_message = $6,
                error_permanent = $7,
                retry_count = $8,
                last_retry_at = $9,
                sent_at = $10,
                confirmed_at = $11,
                delivered_at = $12,
                read_at = $13,
                updated_at = $14
            WHERE id = $1
            "#
        ))
        .bind(recipient.id)
        .bind(recipient.status.as_str())
        .bind(&recipient.confirmation_sid)
        .bind(&recipient.message_sid)
        .bind(recipient.message_id)
        .bind(&recipient.error_message)
        .bind(recipient.error_permanent)
        .bind(recipient.retry_count as i32)
        .bind(recipient.last_retry_at)
        .bind(recipient.sent_at)
        .bind(recipient.confirmed_at)
        .bind(recipient.delivered_at)
        .bind(recipient.read_at)
        .bind(recipient.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_sid(
        &self,
        kind: BroadcastKind,
        sid: &str,
    ) -> anyhow::Result<Option<(CampaignRecipient, SendPhase)>> {
        let table = recipient_table(kind);
        let record = sqlx::query_as::<_, RecipientRecord>(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM {table} \
             WHERE message_sid = $1 OR confirmation_sid = $1"
        ))
        .bind(sid)
        .fetch_optional(&self.pool)
        .await?;
        let Some(record) = record else {
            return Ok(None);
        };
        let phase = if record.message_sid.as_deref() == Some(sid) {
            SendPhase::Actual
        } else {
            SendPhase::Confirmation
        };
        Ok(Some((CampaignRecipient::try_from(record)?, phase)))
    }

    async fn claim_pending(
        &self,
        kind: BroadcastKind,
        id: Uuid,
        now: DateTime<Utc>,
        reclaim_after_minutes: i64,
    ) -> anyhow::Result<bool> {
        let table = recipient_table(kind);
        let result = sqlx::query(&format!(
            r#"
            UPDATE {table}
            SET last_retry_at = $2, updated_at = $2
            WHERE id = $1
              AND status = 'pending'
              AND confirmation_sid IS NULL
              AND message_sid IS NULL
              AND (last_retry_at IS NULL
                   OR last_retry_at <= $2 - make_interval(mins => $3::int))
            "#
        ))
        .bind(id)
        .bind(now)
        .bind(reclaim_after_minutes)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_retryable(
        &self,
        kind: BroadcastKind,
        now: DateTime<Utc>,
        backoff_minutes: &[i64],
        max_attempts: u32,
        limit: i64,
    ) -> anyhow::Result<Vec<CampaignRecipient>> {
        let table = recipient_table(kind);
        // The sid of the phase being retried is cleared so the resend can
        // bind a fresh one; never-dispatched pending rows belong to the
        // fan-out claim path and are excluded here.
        let records = sqlx::query_as::<_, RecipientRecord>(&format!(
            r#"
            UPDATE {table}
            SET retry_count = retry_count + 1,
                last_retry_at = $1,
                status = 'pending',
                message_sid = NULL,
                confirmation_sid = CASE WHEN message_sid IS NULL THEN NULL
                                        ELSE confirmation_sid END,
                updated_at = $1
            WHERE id IN (
                SELECT id FROM {table}
                WHERE status = 'failed'
                  AND NOT error_permanent
                  AND retry_count < $2
                  AND retry_count < cardinality($3::bigint[])
                  AND (last_retry_at IS NULL
                       OR last_retry_at <= $1 - make_interval(
                              mins => (($3::bigint[])[retry_count + 1])::int))
                ORDER BY created_at
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {RECIPIENT_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(max_attempts as i32)
        .bind(backoff_minutes.to_vec())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        records.into_iter().map(CampaignRecipient::try_from).collect()
    }

    async fn status_counts(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<RecipientCounts> {
        let table = recipient_table(kind);
        let rows = sqlx::query(&format!(
            "SELECT status, COUNT(*) AS total FROM {table} WHERE broadcast_id = $1 GROUP BY status"
        ))
        .bind(broadcast_id)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = RecipientCounts::default();
        for row in rows {
            let status_str: String = row.get("status");
            let total: i64 = row.get("total");
            let status = DeliveryStatus::from_str(&status_str)
                .ok_or_else(|| anyhow::anyhow!("unknown delivery status {status_str}"))?;
            for _ in 0..total {
                counts.tally(status);
            }
        }
        Ok(counts)
    }

    async fn existing_customer_ids(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<Vec<Uuid>> {
        let table = recipient_table(kind);
        let rows = sqlx::query(&format!(
            "SELECT customer_id FROM {table} WHERE broadcast_id = $1"
        ))
        .bind(broadcast_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("customer_id")).collect())
    }
}

#[derive(Clone)]
pub struct PostgresCustomerRepository {
    pool: PgPool,
}

impl PostgresCustomerRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }
}

#[async_trait]
impl CustomerRepository for PostgresCustomerRepository {
    async fn get(&self, id: Uuid) -> anyhow::Result<Option<Customer>> {
        let record = sqlx::query_as::<_, CustomerRecord>(
            "SELECT id, phone_number, full_name, session_expires_at, created_at \
             FROM customers WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record.map(Customer::from))
    }

    async fn group_members(&self, group_id: Uuid) -> anyhow::Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT customer_id FROM customer_group_members WHERE group_id = $1",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|row| row.get("customer_id")).collect())
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    provider_sid: Option<String>,
    to_number: String,
    body: String,
    status: String,
    error_code: Option<i32>,
    error_message: Option<String>,
    error_permanent: bool,
    campaign_linked: bool,
    retry_count: i32,
    last_retry_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = anyhow::Error;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let status = DeliveryStatus::from_str(&value.status)
            .ok_or_else(|| anyhow::anyhow!("unknown delivery status {}", value.status))?;
        Ok(Self {
            id: value.id,
            provider_sid: value.provider_sid,
            to: value.to_number,
            body: value.body,
            status,
            error_code: value.error_code,
            error_message: value.error_message,
            error_permanent: value.error_permanent,
            campaign_linked: value.campaign_linked,
            retry_count: value.retry_count as u32,
            last_retry_at: value.last_retry_at,
            delivered_at: value.delivered_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(FromRow)]
struct RecipientRecord {
    id: Uuid,
    broadcast_id: Uuid,
    customer_id: Uuid,
    status: String,
    confirmation_sid: Option<String>,
    message_sid: Option<String>,
    message_id: Option<Uuid>,
    error_message: Option<String>,
    error_permanent: bool,
    retry_count: i32,
    last_retry_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecipientRecord> for CampaignRecipient {
    type Error = anyhow::Error;

    fn try_from(value: RecipientRecord) -> Result<Self, Self::Error> {
        let status = DeliveryStatus::from_str(&value.status)
            .ok_or_else(|| anyhow::anyhow!("unknown delivery status {}", value.status))?;
        Ok(Self {
            id: value.id,
            broadcast_id: value.broadcast_id,
            customer_id: value.customer_id,
            status,
            confirmation_sid: value.confirmation_sid,
            message_sid: value.message_sid,
            message_id: value.message_id,
            error_message: value.error_message,
            error_permanent: value.error_permanent,
            retry_count: value.retry_count as u32,
            last_retry_at: value.last_retry_at,
            sent_at: value.sent_at,
            confirmed_at: value.confirmed_at,
            delivered_at: value.delivered_at,
            read_at: value.read_at,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(FromRow)]
struct BroadcastRecord {
    id: Uuid,
    kind: String,
    name: String,
    body: String,
    created_by: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BroadcastRecord {
    fn into_broadcast(self, group_ids: Vec<Uuid>) -> anyhow::Result<Broadcast> {
        let kind = BroadcastKind::from_str(&self.kind)
            .ok_or_else(|| anyhow::anyhow!("unknown broadcast kind {}", self.kind))?;
        let status = BroadcastStatus::from_str(&self.status)
            .ok_or_else(|| anyhow::anyhow!("unknown broadcast status {}", self.status))?;
        Ok(Broadcast {
            id: self.id,
            kind,
            name: self.name,
            body: self.body,
            created_by: self.created_by,
            status,
            group_ids,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
struct CustomerRecord {
    id: Uuid,
    phone_number: String,
    full_name: Option<String>,
    session_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl From<CustomerRecord> for Customer {
    fn from(value: CustomerRecord) -> Self {
        Self {
            id: value.id,
            phone_number: value.phone_number,
            full_name: value.full_name,
            session_expires_at: value.session_expires_at,
            created_at: value.created_at,
        }
    }
}
