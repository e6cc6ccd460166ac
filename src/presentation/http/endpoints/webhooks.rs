use std::sync::Arc;

use poem::{handler, web::Data, web::Form};
use serde::Deserialize;
use tracing::error;

use crate::application::webhook::{StatusCallback, WebhookReconciler};

/// Form-encoded status callback as the gateway posts it.
#[derive(Debug, Deserialize)]
pub struct StatusCallbackForm {
    #[serde(rename = "MessageSid")]
    pub message_sid: String,
    #[serde(rename = "MessageStatus")]
    pub message_status: String,
    #[serde(rename = "ErrorCode")]
    pub error_code: Option<String>,
    #[serde(rename = "ErrorMessage")]
    pub error_message: Option<String>,
}

/// Always answers 200: a processing hiccup on our side must not make the
/// gateway re-deliver the callback, and replays are harmless anyway.
#[handler]
pub async fn status_callback(
    Data(reconciler): Data<&Arc<WebhookReconciler>>,
    Form(payload): Form<StatusCallbackForm>,
) -> &'static str {
    let callback = StatusCallback {
        message_sid: payload.message_sid,
        message_status: payload.message_status,
        error_code: payload.error_code.and_then(|code| code.parse().ok()),
        error_message: payload.error_message,
    };
    if let Err(err) = reconciler.process(callback).await {
        error!(error = %err, "webhook processing failed");
    }
    ""
}
