use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::{errors::GatewayError, status::DeliveryStatus};

/// What the gateway acknowledged at submit time.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub provider_sid: String,
    pub initial_status: DeliveryStatus,
}

/// Outbound side of the external WhatsApp gateway.
///
/// `send` delivers freeform text inside an open session window;
/// `send_template` delivers a pre-approved template, which is also what
/// (re)opens a session. Implementations perform the HTTP call and nothing
/// else; no local state is persisted here.
#[async_trait]
pub trait WhatsAppGateway: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<SendReceipt, GatewayError>;

    async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        variables: &HashMap<String, String>,
    ) -> Result<SendReceipt, GatewayError>;
}
