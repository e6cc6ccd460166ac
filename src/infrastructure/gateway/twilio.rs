use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::{
    application::services::gateway::{SendReceipt, WhatsAppGateway},
    domain::{errors::GatewayError, status::DeliveryStatus},
};

#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender in `whatsapp:+XXXXXXXXX` form.
    pub from: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

/// Twilio WhatsApp implementation of the gateway boundary.
///
/// One HTTP call per send, nothing persisted. Timeouts and 429/5xx map to
/// transient errors so the retry scheduler can pick the row up; everything
/// else the API rejects is permanent.
pub struct TwilioGateway {
    http: Client,
    config: TwilioConfig,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .user_agent("farmcast/whatsapp")
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { http, config })
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.config.base_url, self.config.account_sid
        )
    }

    fn whatsapp_address(to: &str) -> String {
        if to.starts_with("whatsapp:") {
            to.to_string()
        } else {
            format!("whatsapp:{to}")
        }
    }

    async fn submit(&self, form: Vec<(&str, String)>) -> Result<SendReceipt, GatewayError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|err| {
                // Connect failures and timeouts are worth another attempt.
                GatewayError::transient(format!("gateway unreachable: {err}"))
            })?;

        let status = response.status();
        if status.is_success() {
            let body: TwilioMessageResponse = response
                .json()
                .await
                .map_err(|err| GatewayError::transient(format!("malformed response: {err}")))?;
            let initial_status = body
                .status
                .as_deref()
                .and_then(DeliveryStatus::from_provider)
                .unwrap_or(DeliveryStatus::Queued);
            return Ok(SendReceipt {
                provider_sid: body.sid,
                initial_status,
            });
        }

        let error: TwilioErrorResponse = response.json().await.unwrap_or_default();
        let message = error
            .message
            .unwrap_or_else(|| format!("gateway returned {status}"));
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(GatewayError {
                code: error.code,
                message,
                kind: crate::domain::errors::GatewayErrorKind::Transient,
            })
        } else {
            Err(GatewayError::permanent(error.code, message))
        }
    }
}

#[async_trait]
impl WhatsAppGateway for TwilioGateway {
    async fn send(&self, to: &str, body: &str) -> Result<SendReceipt, GatewayError> {
        self.submit(vec![
            ("To", Self::whatsapp_address(to)),
            ("From", self.config.from.clone()),
            ("Body", body.to_string()),
        ])
        .await
    }

    async fn send_template(
        &self,
        to: &str,
        template_id: &str,
        variables: &HashMap<String, String>,
    ) -> Result<SendReceipt, GatewayError> {
        let content_variables = serde_json::to_string(variables)
            .map_err(|err| GatewayError::permanent(None, format!("bad variables: {err}")))?;
        self.submit(vec![
            ("To", Self::whatsapp_address(to)),
            ("From", self.config.from.clone()),
            ("ContentSid", template_id.to_string()),
            ("ContentVariables", content_variables),
        ])
        .await
    }
}

#[derive(Debug, Deserialize)]
struct TwilioMessageResponse {
    sid: String,
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TwilioErrorResponse {
    code: Option<i32>,
    message: Option<String>,
}
