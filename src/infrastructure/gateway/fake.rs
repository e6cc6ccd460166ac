use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::{
    application::services::gateway::{SendReceipt, WhatsAppGateway},
    domain::{errors::GatewayError, status::DeliveryStatus},
};

enum InjectedFailure {
    Transient(String),
    Permanent(i32, String),
}

/// In-process gateway used by tests and local development. Accepts every
/// send, hands out sequential sids, and can be told to fail for specific
/// destinations.
pub struct FakeGateway {
    counter: AtomicU64,
    text_sends: AtomicU64,
    template_sends: AtomicU64,
    failures: Mutex<HashMap<String, InjectedFailure>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
            text_sends: AtomicU64::new(0),
            template_sends: AtomicU64::new(0),
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_transiently_for(&self, to: &str, message: &str) {
        self.failures
            .lock()
            .expect("failure lock poisoned")
            .insert(to.to_string(), InjectedFailure::Transient(message.to_string()));
    }

    pub fn fail_permanently_for(&self, to: &str, code: i32, message: &str) {
        self.failures.lock().expect("failure lock poisoned").insert(
            to.to_string(),
            InjectedFailure::Permanent(code, message.to_string()),
        );
    }

    pub fn recover(&self, to: &str) {
        self.failures
            .lock()
            .expect("failure lock poisoned")
            .remove(to);
    }

    pub fn text_sends(&self) -> u64 {
        self.text_sends.load(Ordering::Relaxed)
    }

    pub fn template_sends(&self) -> u64 {
        self.template_sends.load(Ordering::Relaxed)
    }

    fn check(&self, to: &str) -> Result<(), GatewayError> {
        match self.failures.lock().expect("failure lock poisoned").get(to) {
            None => Ok(()),
            Some(InjectedFailure::Transient(message)) => {
                Err(GatewayError::transient(message.clone()))
            }
            Some(InjectedFailure::Permanent(code, message)) => {
                Err(GatewayError::permanent(Some(*code), message.clone()))
            }
        }
    }

    fn receipt(&self) -> SendReceipt {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        SendReceipt {
            provider_sid: format!("SM{n:032}"),
            initial_status: DeliveryStatus::Queued,
        }
    }
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WhatsAppGateway for FakeGateway {
    async fn send(&self, to: &str, _body: &str) -> Result<SendReceipt, GatewayError> {
        self.check(to)?;
        self.text_sends.fetch_add(1, Ordering::Relaxed);
        Ok(self.receipt())
    }

    async fn send_template(
        &self,
        to: &str,
        _template_id: &str,
        _variables: &HashMap<String, String>,
    ) -> Result<SendReceipt, GatewayError> {
        self.check(to)?;
        self.template_sends.fetch_add(1, Ordering::Relaxed);
        Ok(self.receipt())
    }
}
