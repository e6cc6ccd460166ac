use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::{
    application::services::gateway::SendReceipt,
    domain::{
        errors::GatewayError,
        models::{DeliveryTarget, SendPhase},
        repositories::{MessageRepository, RecipientRepository},
        status::{DeliveryStatus, Transition},
    },
};

/// What applying a webhook event did.
#[derive(Debug)]
pub enum WebhookOutcome {
    /// No local row matched the provider sid. Logged and counted; the
    /// webhook sender still gets a success response.
    Orphan,
    /// The event would move the row backwards or duplicate its state.
    /// Dropped as a no-op.
    Stale(DeliveryTarget),
    /// The row advanced (or failed). Carries the post-transition row so the
    /// reconciler can run follow-ups such as the two-phase hand-off.
    Applied(DeliveryTarget),
}

/// The one place delivery status is allowed to change.
///
/// Serves single messages and both broadcast-recipient tables through the
/// [`DeliveryTarget`] tag. Every mutation is load, plan, persist on a single
/// row; nothing is cached between calls, so concurrent writers only contend
/// at row granularity in the store.
pub struct DeliveryStateMachine {
    messages: Arc<dyn MessageRepository>,
    recipients: Arc<dyn RecipientRepository>,
    orphan_callbacks: AtomicU64,
}

impl DeliveryStateMachine {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        recipients: Arc<dyn RecipientRepository>,
    ) -> Self {
        Self {
            messages,
            recipients,
            orphan_callbacks: AtomicU64::new(0),
        }
    }

    /// Total orphan callbacks seen since startup.
    pub fn orphan_count(&self) -> u64 {
        self.orphan_callbacks.load(Ordering::Relaxed)
    }

    /// Records the outcome of a send attempt, immediately after the gateway
    /// call returns.
    ///
    /// Success assigns the provider sid (first assignment only; a row that
    /// already carries a different sid keeps it and the conflict is logged)
    /// and advances to the gateway's initial status. Failure marks the row
    /// failed with the error fields. Retry counting is owned by the
    /// scheduler and is not touched here.
    pub async fn apply_outbound_result(
        &self,
        target: &mut DeliveryTarget,
        result: &Result<SendReceipt, GatewayError>,
    ) -> anyhow::Result<()> {
        match result {
            Ok(receipt) => {
                let fresh_sid = self.assign_sid(target, &receipt.provider_sid);
                // Two cases restart the ladder instead of ratcheting: the
                // first actual-phase send (the row may sit at the
                // confirmation's final status, up to Delivered) and a
                // successful resend on a failed row, where the scheduler's
                // claim may not have reset this particular row.
                if (fresh_sid && target.phase() == Some(SendPhase::Actual))
                    || target.status().is_failure()
                {
                    target.set_status(receipt.initial_status);
                } else {
                    match Transition::plan(target.status(), receipt.initial_status) {
                        Transition::Advance => target.set_status(receipt.initial_status),
                        Transition::Fail => {
                            // Gateways do not report failure through a receipt.
                            target.set_status(receipt.initial_status)
                        }
                        Transition::Stale => {
                            debug!(
                                id = %target.local_id(),
                                current = target.status().as_str(),
                                incoming = receipt.initial_status.as_str(),
                                "stale outbound result ignored"
                            );
                        }
                    }
                }
                self.mark_recipient_sent(target);
            }
            Err(err) => {
                if Transition::plan(target.status(), DeliveryStatus::Failed) == Transition::Fail {
                    target.set_status(DeliveryStatus::Failed);
                }
                target.set_error(err.code, &err.message, !err.is_transient());
            }
        }
        self.persist(target).await
    }

    /// Applies one normalized webhook event.
    ///
    /// Resolution order: broadcast recipients, weather recipients, then
    /// single messages. Recipient sids are checked first because the actual
    /// campaign body shares its sid with the linked message row; the
    /// reconciler forwards the event to that row afterwards.
    pub async fn apply_webhook_event(
        &self,
        provider_sid: &str,
        status: DeliveryStatus,
        error_code: Option<i32>,
        error_message: Option<&str>,
    ) -> anyhow::Result<WebhookOutcome> {
        let Some(mut target) = self.resolve(provider_sid).await? else {
            let seen = self.orphan_callbacks.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(sid = provider_sid, total = seen, "orphan callback");
            return Ok(WebhookOutcome::Orphan);
        };

        // Once the body is out the row's status belongs to the actual-phase
        // ladder; late confirmation events only stamp their timestamp.
        if target.phase() == Some(SendPhase::Confirmation) && target.actual_dispatched() {
            if status == DeliveryStatus::Delivered {
                target.stamp_delivered(Utc::now());
                self.persist(&target).await?;
            }
            return Ok(WebhookOutcome::Stale(target));
        }

        match Transition::plan(target.status(), status) {
            Transition::Stale => {
                debug!(
                    sid = provider_sid,
                    current = target.status().as_str(),
                    incoming = status.as_str(),
                    "stale transition ignored"
                );
                Ok(WebhookOutcome::Stale(target))
            }
            Transition::Advance => {
                target.set_status(status);
                let now = Utc::now();
                match status {
                    DeliveryStatus::Delivered => target.stamp_delivered(now),
                    DeliveryStatus::Read => target.stamp_read(now),
                    _ => {}
                }
                self.persist(&target).await?;
                Ok(WebhookOutcome::Applied(target))
            }
            Transition::Fail => {
                target.set_status(status);
                if let Some(message) = error_message {
                    target.set_error(error_code, message, false);
                } else if let Some(code) = error_code {
                    target.set_error(Some(code), "gateway reported failure", false);
                }
                self.persist(&target).await?;
                info!(
                    sid = provider_sid,
                    status = status.as_str(),
                    code = ?error_code,
                    "delivery failed"
                );
                Ok(WebhookOutcome::Applied(target))
            }
        }
    }

    /// Forwards an already-applied recipient event to the linked message
    /// row, so the single-message view of a campaign body stays consistent.
    pub async fn apply_to_linked_message(
        &self,
        message_id: uuid::Uuid,
        status: DeliveryStatus,
        error_code: Option<i32>,
        error_message: Option<&str>,
    ) -> anyhow::Result<()> {
        let Some(message) = self.messages.get(message_id).await? else {
            return Ok(());
        };
        let mut target = DeliveryTarget::Message(message);
        match Transition::plan(target.status(), status) {
            Transition::Stale => {}
            Transition::Advance => {
                target.set_status(status);
                if status == DeliveryStatus::Delivered {
                    target.stamp_delivered(Utc::now());
                }
                self.persist(&target).await?;
            }
            Transition::Fail => {
                target.set_status(status);
                if let Some(message) = error_message {
                    target.set_error(error_code, message, false);
                }
                self.persist(&target).await?;
            }
        }
        Ok(())
    }

    async fn resolve(&self, sid: &str) -> anyhow::Result<Option<DeliveryTarget>> {
        use crate::domain::models::BroadcastKind;

        if let Some((row, phase)) = self
            .recipients
            .find_by_sid(BroadcastKind::Campaign, sid)
            .await?
        {
            return Ok(Some(DeliveryTarget::BroadcastRecipient(row, phase)));
        }
        if let Some((row, phase)) = self
            .recipients
            .find_by_sid(BroadcastKind::Weather, sid)
            .await?
        {
            return Ok(Some(DeliveryTarget::WeatherBroadcastRecipient(row, phase)));
        }
        if let Some(message) = self.messages.find_by_sid(sid).await? {
            return Ok(Some(DeliveryTarget::Message(message)));
        }
        Ok(None)
    }

    /// First assignment wins. Returns whether this call did the assignment.
    fn assign_sid(&self, target: &mut DeliveryTarget, sid: &str) -> bool {
        let local_id = target.local_id();
        let slot = match target {
            DeliveryTarget::Message(m) => &mut m.provider_sid,
            DeliveryTarget::BroadcastRecipient(r, phase)
            | DeliveryTarget::WeatherBroadcastRecipient(r, phase) => match phase {
                SendPhase::Confirmation => &mut r.confirmation_sid,
                SendPhase::Actual => &mut r.message_sid,
            },
        };
        match slot {
            None => {
                *slot = Some(sid.to_string());
                true
            }
            Some(existing) if existing == sid => false,
            Some(existing) => {
                warn!(
                    id = %local_id,
                    existing = existing.as_str(),
                    incoming = sid,
                    "provider sid conflict, keeping first assignment"
                );
                false
            }
        }
    }

    fn mark_recipient_sent(&self, target: &mut DeliveryTarget) {
        if let DeliveryTarget::BroadcastRecipient(r, _)
        | DeliveryTarget::WeatherBroadcastRecipient(r, _) = target
        {
            if r.sent_at.is_none() {
                r.sent_at = Some(Utc::now());
            }
        }
    }

    async fn persist(&self, target: &DeliveryTarget) -> anyhow::Result<()> {
        match target {
            DeliveryTarget::Message(m) => self.messages.update(m).await,
            DeliveryTarget::BroadcastRecipient(r, _)
            | DeliveryTarget::WeatherBroadcastRecipient(r, _) => {
                let kind = target
                    .broadcast_kind()
                    .expect("recipient target always has a kind");
                self.recipients.update(kind, r).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::domain::models::{BroadcastKind, CampaignRecipient, Message};
    use crate::infrastructure::repositories::in_memory::{
        InMemoryMessageRepository, InMemoryRecipientRepository,
    };

    fn machine() -> (
        DeliveryStateMachine,
        Arc<InMemoryMessageRepository>,
        Arc<InMemoryRecipientRepository>,
    ) {
        let messages = Arc::new(InMemoryMessageRepository::new());
        let recipients = Arc::new(InMemoryRecipientRepository::new());
        let machine = DeliveryStateMachine::new(messages.clone(), recipients.clone());
        (machine, messages, recipients)
    }

    fn receipt(sid: &str) -> Result<SendReceipt, GatewayError> {
        Ok(SendReceipt {
            provider_sid: sid.to_string(),
            initial_status: DeliveryStatus::Queued,
        })
    }

    #[tokio::test]
    async fn outbound_success_assigns_sid_and_queues() {
        let (machine, messages, _) = machine();
        let message = messages.insert(Message::new("+255700000001", "hi")).await.unwrap();

        let mut target = DeliveryTarget::Message(message);
        machine
            .apply_outbound_result(&mut target, &receipt("SM1"))
            .await
            .unwrap();

        let stored = messages.find_by_sid("SM1").await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Queued);
        assert_eq!(stored.provider_sid.as_deref(), Some("SM1"));
    }

    #[tokio::test]
    async fn existing_sid_is_preserved_on_conflict() {
        let (machine, messages, _) = machine();
        let mut message = Message::new("+255700000001", "hi");
        message.provider_sid = Some("SM1".to_string());
        let message = messages.insert(message).await.unwrap();

        let mut target = DeliveryTarget::Message(message);
        machine
            .apply_outbound_result(&mut target, &receipt("SM2"))
            .await
            .unwrap();

        assert!(messages.find_by_sid("SM1").await.unwrap().is_some());
        assert!(messages.find_by_sid("SM2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn webhook_ratchets_forward_only() {
        let (machine, messages, _) = machine();
        let mut message = Message::new("+255700000001", "hi");
        message.provider_sid = Some("SM1".to_string());
        message.status = DeliveryStatus::Queued;
        messages.insert(message).await.unwrap();

        machine
            .apply_webhook_event("SM1", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        // Late, out-of-order "sent" must not regress the row.
        let outcome = machine
            .apply_webhook_event("SM1", DeliveryStatus::Sent, None, None)
            .await
            .unwrap();

        assert!(matches!(outcome, WebhookOutcome::Stale(_)));
        let stored = messages.find_by_sid("SM1").await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn duplicate_delivered_webhook_is_idempotent() {
        let (machine, messages, _) = machine();
        let mut message = Message::new("+255700000001", "hi");
        message.provider_sid = Some("SM1".to_string());
        message.status = DeliveryStatus::Sent;
        messages.insert(message).await.unwrap();

        machine
            .apply_webhook_event("SM1", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        let first = messages.find_by_sid("SM1").await.unwrap().unwrap();
        machine
            .apply_webhook_event("SM1", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        let second = messages.find_by_sid("SM1").await.unwrap().unwrap();

        assert_eq!(first.status, second.status);
        assert_eq!(first.delivered_at, second.delivered_at);
        assert_eq!(first.retry_count, second.retry_count);
    }

    #[tokio::test]
    async fn delivered_timestamp_is_stamped_once() {
        let (machine, messages, _) = machine();
        let mut message = Message::new("+255700000001", "hi");
        message.provider_sid = Some("SM1".to_string());
        message.status = DeliveryStatus::Sent;
        messages.insert(message).await.unwrap();

        machine
            .apply_webhook_event("SM1", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        let delivered_at = messages
            .find_by_sid("SM1")
            .await
            .unwrap()
            .unwrap()
            .delivered_at;
        assert!(delivered_at.is_some());

        machine
            .apply_webhook_event("SM1", DeliveryStatus::Read, None, None)
            .await
            .unwrap();
        let after_read = messages.find_by_sid("SM1").await.unwrap().unwrap();
        assert_eq!(after_read.delivered_at, delivered_at);
        assert_eq!(after_read.status, DeliveryStatus::Read);
    }

    #[tokio::test]
    async fn orphan_callback_is_counted_not_failed() {
        let (machine, _, _) = machine();
        let outcome = machine
            .apply_webhook_event("SM_UNKNOWN", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Orphan));
        assert_eq!(machine.orphan_count(), 1);
    }

    #[tokio::test]
    async fn confirmation_phase_delivery_stamps_confirmed_at() {
        let (machine, _, recipients) = machine();
        let broadcast_id = Uuid::new_v4();
        let mut row = CampaignRecipient::pending(broadcast_id, Uuid::new_v4());
        row.confirmation_sid = Some("SM_CONF".to_string());
        row.status = DeliveryStatus::Sent;
        let id = row.id;
        recipients
            .insert_pending(BroadcastKind::Campaign, vec![row])
            .await
            .unwrap();

        machine
            .apply_webhook_event("SM_CONF", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();

        let stored = recipients
            .get(BroadcastKind::Campaign, id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.confirmed_at.is_some());
        assert!(stored.delivered_at.is_none());
        assert_eq!(stored.status, DeliveryStatus::Delivered);
    }

    #[tokio::test]
    async fn resend_receipt_lifts_a_failed_row() {
        let (machine, messages, _) = machine();
        let mut message = Message::new("+255700000001", "hi");
        message.status = DeliveryStatus::Failed;
        message.error_message = Some("connection reset".to_string());
        let id = message.id;
        messages.insert(message).await.unwrap();

        let message = messages.get(id).await.unwrap().unwrap();
        let mut target = DeliveryTarget::Message(message);
        machine
            .apply_outbound_result(&mut target, &receipt("SM_RESEND"))
            .await
            .unwrap();

        let stored = messages.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Queued);
        assert_eq!(stored.provider_sid.as_deref(), Some("SM_RESEND"));
    }

    #[tokio::test]
    async fn late_confirmation_event_leaves_actual_ladder_alone() {
        let (machine, _, recipients) = machine();
        let mut row = CampaignRecipient::pending(Uuid::new_v4(), Uuid::new_v4());
        row.confirmation_sid = Some("SM_CONF".to_string());
        row.message_sid = Some("SM_BODY".to_string());
        row.status = DeliveryStatus::Queued;
        let id = row.id;
        recipients
            .insert_pending(BroadcastKind::Campaign, vec![row])
            .await
            .unwrap();

        // Replayed confirmation webhook after the body has gone out.
        let outcome = machine
            .apply_webhook_event("SM_CONF", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        assert!(matches!(outcome, WebhookOutcome::Stale(_)));

        let stored = recipients
            .get(BroadcastKind::Campaign, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DeliveryStatus::Queued);
        assert!(stored.confirmed_at.is_some());
        assert!(stored.delivered_at.is_none());
    }

    #[tokio::test]
    async fn first_actual_send_restarts_ladder_after_confirmation() {
        let (machine, _, recipients) = machine();
        let mut row = CampaignRecipient::pending(Uuid::new_v4(), Uuid::new_v4());
        row.confirmation_sid = Some("SM_CONF".to_string());
        row.status = DeliveryStatus::Delivered;
        row.confirmed_at = Some(Utc::now());
        let id = row.id;
        recipients
            .insert_pending(BroadcastKind::Campaign, vec![row.clone()])
            .await
            .unwrap();

        let mut target = DeliveryTarget::BroadcastRecipient(row, SendPhase::Actual);
        machine
            .apply_outbound_result(&mut target, &receipt("SM_BODY"))
            .await
            .unwrap();

        let stored = recipients
            .get(BroadcastKind::Campaign, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DeliveryStatus::Queued);
        assert_eq!(stored.message_sid.as_deref(), Some("SM_BODY"));

        machine
            .apply_webhook_event("SM_BODY", DeliveryStatus::Delivered, None, None)
            .await
            .unwrap();
        let stored = recipients
            .get(BroadcastKind::Campaign, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert!(stored.delivered_at.is_some());
    }

    #[tokio::test]
    async fn permanent_gateway_error_marks_failed_permanent() {
        let (machine, messages, _) = machine();
        let message = messages.insert(Message::new("+255bad", "hi")).await.unwrap();
        let id = message.id;

        let mut target = DeliveryTarget::Message(message);
        let result = Err(GatewayError::permanent(Some(21211), "invalid 'To' number"));
        machine.apply_outbound_result(&mut target, &result).await.unwrap();

        let stored = messages.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert!(stored.error_permanent);
        assert_eq!(stored.error_code, Some(21211));
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn template_send_receipt_lands_on_confirmation_sid() {
        let (machine, _, recipients) = machine();
        let row = CampaignRecipient::pending(Uuid::new_v4(), Uuid::new_v4());
        let id = row.id;
        recipients
            .insert_pending(BroadcastKind::Weather, vec![row.clone()])
            .await
            .unwrap();

        let mut target =
            DeliveryTarget::WeatherBroadcastRecipient(row, SendPhase::Confirmation);
        machine
            .apply_outbound_result(&mut target, &receipt("SM_TPL"))
            .await
            .unwrap();

        let stored = recipients
            .get(BroadcastKind::Weather, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.confirmation_sid.as_deref(), Some("SM_TPL"));
        assert!(stored.message_sid.is_none());
        assert!(stored.sent_at.is_some());
        // Resolving the sid back reports the confirmation phase.
        let (_, phase) = recipients
            .find_by_sid(BroadcastKind::Weather, "SM_TPL")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(phase, SendPhase::Confirmation);
    }
}
