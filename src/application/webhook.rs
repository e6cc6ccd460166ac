use std::sync::Arc;

use tracing::warn;

use crate::{
    application::{
        broadcast::BroadcastDispatcher,
        state_machine::{DeliveryStateMachine, WebhookOutcome},
    },
    domain::{
        models::{DeliveryTarget, SendPhase},
        status::DeliveryStatus,
    },
};

/// A status callback as the gateway posts it, before normalization.
#[derive(Debug, Clone)]
pub struct StatusCallback {
    pub message_sid: String,
    pub message_status: String,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
}

/// Single ingress for provider status callbacks.
///
/// Normalizes the provider vocabulary, resolves the local row and feeds the
/// state machine, then runs the follow-ups a recipient transition implies:
/// the two-phase hand-off and the campaign aggregate refresh. Replayable by
/// construction; every path ends in success from the provider's point of
/// view so the provider does not retry the webhook itself.
pub struct WebhookReconciler {
    state_machine: Arc<DeliveryStateMachine>,
    dispatcher: Arc<BroadcastDispatcher>,
}

impl WebhookReconciler {
    pub fn new(
        state_machine: Arc<DeliveryStateMachine>,
        dispatcher: Arc<BroadcastDispatcher>,
    ) -> Self {
        Self {
            state_machine,
            dispatcher,
        }
    }

    pub async fn process(&self, callback: StatusCallback) -> anyhow::Result<()> {
        let Some(status) = DeliveryStatus::from_provider(&callback.message_status) else {
            warn!(
                sid = callback.message_sid.as_str(),
                status = callback.message_status.as_str(),
                "unknown provider status, acknowledged and dropped"
            );
            return Ok(());
        };

        let outcome = self
            .state_machine
            .apply_webhook_event(
                &callback.message_sid,
                status,
                callback.error_code,
                callback.error_message.as_deref(),
            )
            .await?;

        let WebhookOutcome::Applied(target) = outcome else {
            return Ok(());
        };
        let (DeliveryTarget::BroadcastRecipient(row, phase)
        | DeliveryTarget::WeatherBroadcastRecipient(row, phase)) = &target
        else {
            return Ok(());
        };
        let kind = target
            .broadcast_kind()
            .expect("recipient target always has a kind");

        // The campaign body shares its sid with the linked message row;
        // keep that row's view of the delivery consistent.
        if *phase == SendPhase::Actual {
            if let Some(message_id) = row.message_id {
                self.state_machine
                    .apply_to_linked_message(
                        message_id,
                        status,
                        callback.error_code,
                        callback.error_message.as_deref(),
                    )
                    .await?;
            }
        }

        // Two-phase hand-off: a delivered confirmation releases the body.
        if *phase == SendPhase::Confirmation && status == DeliveryStatus::Delivered {
            if let Err(err) = self
                .dispatcher
                .on_confirmation_delivered(kind, row.clone())
                .await
            {
                // The recipient row now carries the failure; the retry
                // scheduler picks it up from there.
                warn!(recipient = %row.id, error = %err, "actual send after confirmation failed");
            }
        }

        self.dispatcher.refresh_status(kind, row.broadcast_id).await?;
        Ok(())
    }
}
