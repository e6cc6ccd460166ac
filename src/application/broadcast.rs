use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    application::{
        services::gateway::WhatsAppGateway,
        state_machine::DeliveryStateMachine,
    },
    domain::{
        models::{
            Broadcast, BroadcastKind, BroadcastStatus, CampaignRecipient, Customer,
            DeliveryTarget, Message, RecipientCounts, SendPhase,
        },
        repositories::{
            BroadcastRepository, CustomerRepository, MessageRepository, RecipientRepository,
        },
        status::DeliveryStatus,
    },
};

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Gateway throughput cap, sends per second.
    pub rate_per_sec: u32,
    /// Pre-approved template used to (re)open a session window.
    pub confirmation_template_id: String,
    /// A pending claim older than this is treated as abandoned.
    pub reclaim_after_minutes: i64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            rate_per_sec: 10,
            confirmation_template_id: "broadcast_optin".to_string(),
            reclaim_after_minutes: 5,
        }
    }
}

/// Fans one campaign out to its deduplicated audience and drives each
/// recipient through the two-phase template/body protocol.
///
/// Every recipient is independently tracked and idempotent to re-drive, so
/// a dispatch pass can be cancelled between recipients and resumed later:
/// rows that already carry a sid are skipped, undispatched rows are claimed
/// conditionally before the gateway call.
pub struct BroadcastDispatcher {
    broadcasts: Arc<dyn BroadcastRepository>,
    recipients: Arc<dyn RecipientRepository>,
    customers: Arc<dyn CustomerRepository>,
    messages: Arc<dyn MessageRepository>,
    gateway: Arc<dyn WhatsAppGateway>,
    state_machine: Arc<DeliveryStateMachine>,
    config: DispatchConfig,
}

impl BroadcastDispatcher {
    pub fn new(
        broadcasts: Arc<dyn BroadcastRepository>,
        recipients: Arc<dyn RecipientRepository>,
        customers: Arc<dyn CustomerRepository>,
        messages: Arc<dyn MessageRepository>,
        gateway: Arc<dyn WhatsAppGateway>,
        state_machine: Arc<DeliveryStateMachine>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            broadcasts,
            recipients,
            customers,
            messages,
            gateway,
            state_machine,
            config,
        }
    }

    /// Full fan-out run: resolve audience, create tracking rows, dispatch,
    /// refresh the aggregate. Safe to re-run for a partially dispatched
    /// campaign.
    pub async fn fan_out(&self, broadcast_id: Uuid) -> anyhow::Result<()> {
        let broadcast = self
            .broadcasts
            .get(broadcast_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("broadcast {broadcast_id} not found"))?;
        let kind = broadcast.kind;

        self.broadcasts
            .set_status(broadcast_id, BroadcastStatus::Queued)
            .await?;

        let audience = self.resolve_audience(&broadcast).await?;
        info!(
            broadcast = %broadcast_id,
            recipients = audience.len(),
            "audience resolved"
        );

        // Skip customers that already have a row from an earlier run.
        let existing: HashSet<Uuid> = self
            .recipients
            .existing_customer_ids(kind, broadcast_id)
            .await?
            .into_iter()
            .collect();
        let rows: Vec<CampaignRecipient> = audience
            .iter()
            .filter(|id| !existing.contains(id))
            .map(|id| CampaignRecipient::pending(broadcast_id, *id))
            .collect();
        if !rows.is_empty() {
            self.recipients.insert_pending(kind, rows).await?;
        }

        self.broadcasts
            .set_status(broadcast_id, BroadcastStatus::InProgress)
            .await?;

        self.dispatch_pending(&broadcast).await?;
        self.refresh_status(kind, broadcast_id).await?;
        Ok(())
    }

    /// Union of the target groups' materialized member lists, one entry per
    /// customer no matter how many groups they appear in.
    async fn resolve_audience(&self, broadcast: &Broadcast) -> anyhow::Result<Vec<Uuid>> {
        let mut seen = HashSet::new();
        let mut audience = Vec::new();
        for group_id in &broadcast.group_ids {
            for customer_id in self.customers.group_members(*group_id).await? {
                if seen.insert(customer_id) {
                    audience.push(customer_id);
                }
            }
        }
        Ok(audience)
    }

    /// One throttled pass over undispatched pending rows. Per-row failures
    /// are contained; they surface later through the aggregate counts.
    async fn dispatch_pending(&self, broadcast: &Broadcast) -> anyhow::Result<()> {
        let kind = broadcast.kind;
        let rows = self
            .recipients
            .list_for_broadcast(kind, broadcast.id)
            .await?;
        let pause = Duration::from_millis(1000 / u64::from(self.config.rate_per_sec.max(1)));

        for row in rows {
            if row.is_dispatched() || row.status != DeliveryStatus::Pending {
                continue;
            }
            let claimed = self
                .recipients
                .claim_pending(kind, row.id, Utc::now(), self.config.reclaim_after_minutes)
                .await?;
            if !claimed {
                continue;
            }
            // Re-read so the local copy carries the claim stamp.
            let Some(row) = self.recipients.get(kind, row.id).await? else {
                continue;
            };
            if let Err(err) = self.send_to_recipient(broadcast, row).await {
                warn!(broadcast = %broadcast.id, error = %err, "recipient dispatch failed");
            }
            tokio::time::sleep(pause).await;
        }
        Ok(())
    }

    /// Opens with the confirmation template when the customer has no active
    /// 24-hour window; otherwise the body goes straight out.
    async fn send_to_recipient(
        &self,
        broadcast: &Broadcast,
        row: CampaignRecipient,
    ) -> anyhow::Result<()> {
        let kind = broadcast.kind;
        let Some(customer) = self.customers.get(row.customer_id).await? else {
            let result = Err(crate::domain::errors::GatewayError::permanent(
                None,
                "customer no longer exists",
            ));
            let mut target = recipient_target(kind, row, SendPhase::Actual);
            return self
                .state_machine
                .apply_outbound_result(&mut target, &result)
                .await;
        };

        if customer.has_active_session(Utc::now()) {
            self.send_actual(broadcast, row, &customer).await
        } else {
            self.send_confirmation(kind, row, &customer, broadcast).await
        }
    }

    async fn send_confirmation(
        &self,
        kind: BroadcastKind,
        row: CampaignRecipient,
        customer: &Customer,
        broadcast: &Broadcast,
    ) -> anyhow::Result<()> {
        let mut variables = HashMap::new();
        variables.insert(
            "1".to_string(),
            customer.full_name.clone().unwrap_or_else(|| "farmer".to_string()),
        );
        variables.insert("2".to_string(), broadcast.name.clone());

        let result = self
            .gateway
            .send_template(
                &customer.phone_number,
                &self.config.confirmation_template_id,
                &variables,
            )
            .await;

        let mut target = recipient_target(kind, row, SendPhase::Confirmation);
        self.state_machine
            .apply_outbound_result(&mut target, &result)
            .await
    }

    /// Sends the campaign body and creates (or reuses) the linked message
    /// row that tracks it as a plain outbound message.
    async fn send_actual(
        &self,
        broadcast: &Broadcast,
        mut row: CampaignRecipient,
        customer: &Customer,
    ) -> anyhow::Result<()> {
        let kind = broadcast.kind;
        let message = match row.message_id {
            Some(id) => self.messages.get(id).await?,
            None => None,
        };
        let message = match message {
            Some(message) => message,
            None => {
                let mut message = Message::new(&customer.phone_number, &broadcast.body);
                message.campaign_linked = true;
                message.last_retry_at = Some(Utc::now());
                let message = self.messages.insert(message).await?;
                row.message_id = Some(message.id);
                self.recipients.update(kind, &row).await?;
                message
            }
        };

        let result = self
            .gateway
            .send(&customer.phone_number, &broadcast.body)
            .await;

        let mut target = recipient_target(kind, row, SendPhase::Actual);
        self.state_machine
            .apply_outbound_result(&mut target, &result)
            .await?;
        let mut linked = DeliveryTarget::Message(message);
        self.state_machine
            .apply_outbound_result(&mut linked, &result)
            .await
    }

    /// Two-phase hand-off: the confirmation just reached `Delivered`, so the
    /// campaign body may now go out. Replay-safe: a duplicate confirmation
    /// webhook finds `message_sid` already set and does nothing.
    pub async fn on_confirmation_delivered(
        &self,
        kind: BroadcastKind,
        row: CampaignRecipient,
    ) -> anyhow::Result<()> {
        if row.message_sid.is_some() {
            return Ok(());
        }
        let broadcast = self
            .broadcasts
            .get(row.broadcast_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("broadcast {} not found", row.broadcast_id))?;
        debug_assert_eq!(broadcast.kind, kind);
        let customer = self
            .customers
            .get(row.customer_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("customer {} not found", row.customer_id))?;
        self.send_actual(&broadcast, row, &customer).await
    }

    /// Resend path used by the retry scheduler after it has claimed a row.
    /// Which phase to redo follows from how far the row got.
    pub async fn redrive(&self, kind: BroadcastKind, row: CampaignRecipient) -> anyhow::Result<()> {
        let broadcast = self
            .broadcasts
            .get(row.broadcast_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("broadcast {} not found", row.broadcast_id))?;
        let Some(customer) = self.customers.get(row.customer_id).await? else {
            return Ok(());
        };

        if row.confirmed_at.is_some() || customer.has_active_session(Utc::now()) {
            self.send_actual(&broadcast, row, &customer).await
        } else {
            self.send_confirmation(kind, row, &customer, &broadcast).await
        }
    }

    /// Derives and persists the campaign aggregate from recipient states.
    pub async fn refresh_status(
        &self,
        kind: BroadcastKind,
        broadcast_id: Uuid,
    ) -> anyhow::Result<RecipientCounts> {
        let counts = self.recipients.status_counts(kind, broadcast_id).await?;
        if counts.total() > 0 {
            self.broadcasts
                .set_status(broadcast_id, counts.derive_status())
                .await?;
        }
        Ok(counts)
    }
}

fn recipient_target(
    kind: BroadcastKind,
    row: CampaignRecipient,
    phase: SendPhase,
) -> DeliveryTarget {
    match kind {
        BroadcastKind::Campaign => DeliveryTarget::BroadcastRecipient(row, phase),
        BroadcastKind::Weather => DeliveryTarget::WeatherBroadcastRecipient(row, phase),
    }
}
