use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    application::{
        services::gateway::WhatsAppGateway, state_machine::DeliveryStateMachine,
    },
    domain::{
        errors::DomainError,
        models::{DeliveryTarget, Message},
        repositories::MessageRepository,
    },
};

pub struct SendMessageUseCase {
    messages: Arc<dyn MessageRepository>,
    gateway: Arc<dyn WhatsAppGateway>,
    state_machine: Arc<DeliveryStateMachine>,
}

pub struct SendMessageRequest {
    pub to: String,
    pub body: String,
}

pub struct SendMessageResponse {
    pub message_id: Uuid,
}

impl SendMessageUseCase {
    pub fn new(
        messages: Arc<dyn MessageRepository>,
        gateway: Arc<dyn WhatsAppGateway>,
        state_machine: Arc<DeliveryStateMachine>,
    ) -> Self {
        Self {
            messages,
            gateway,
            state_machine,
        }
    }

    /// Creates the tracking row at send-intent time, then attempts the send
    /// inline. A failed attempt leaves the row for the retry scheduler; the
    /// id is returned either way.
    pub async fn execute(
        &self,
        request: SendMessageRequest,
    ) -> Result<SendMessageResponse, DomainError> {
        if request.body.trim().is_empty() {
            return Err(DomainError::Validation("message body is empty".into()));
        }
        if !request.to.starts_with('+') {
            return Err(DomainError::Validation(
                "destination must be an E.164 number".into(),
            ));
        }

        let mut message = Message::new(&request.to, &request.body);
        // Backoff counts from the last attempt; the initial send is one.
        message.last_retry_at = Some(Utc::now());
        let message = self.messages.insert(message).await?;
        let message_id = message.id;

        let result = self.gateway.send(&request.to, &request.body).await;
        let mut target = DeliveryTarget::Message(message);
        self.state_machine
            .apply_outbound_result(&mut target, &result)
            .await?;

        Ok(SendMessageResponse { message_id })
    }
}
