use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    application::{
        broadcast::BroadcastDispatcher, services::gateway::WhatsAppGateway,
        state_machine::DeliveryStateMachine,
    },
    domain::{
        models::{BroadcastKind, DeliveryTarget},
        repositories::{MessageRepository, RecipientRepository},
        status::DeliveryStatus,
    },
};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub enabled: bool,
    /// Minutes to wait after attempt N before attempt N+1. The list length
    /// also bounds how many retries are ever scheduled.
    pub backoff_minutes: Vec<i64>,
    pub max_attempts: u32,
    /// Pass interval. Must not be coarser than the smallest backoff step.
    pub tick: Duration,
    pub batch_size: i64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backoff_minutes: vec![5, 15, 60],
            max_attempts: 3,
            tick: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

/// Pure eligibility predicate, shared by the in-memory store and the tests.
/// The Postgres claim query re-expresses the same condition in SQL.
///
/// Backoff counts from the last attempt, not from row creation. A row whose
/// failure was classified permanent is never eligible, and `Undelivered` is
/// deliberately excluded: it is a slower-path class that this scheduler does
/// not touch.
pub fn retry_eligible(
    status: DeliveryStatus,
    error_permanent: bool,
    retry_count: u32,
    last_retry_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    backoff_minutes: &[i64],
    max_attempts: u32,
) -> bool {
    if !matches!(status, DeliveryStatus::Pending | DeliveryStatus::Failed) {
        return false;
    }
    if error_permanent || retry_count >= max_attempts {
        return false;
    }
    let Some(&wait_minutes) = backoff_minutes.get(retry_count as usize) else {
        return false;
    };
    match last_retry_at {
        None => true,
        Some(last) => now - last >= chrono::Duration::minutes(wait_minutes),
    }
}

/// Periodic worker that re-drives failed and stuck-pending sends.
///
/// Selection is claim-before-send: the repository atomically stamps the
/// retry (count, timestamp, status reset to pending) while selecting, so a
/// second scheduler instance running the same pass cannot double-send.
pub struct RetryScheduler {
    config: RetryConfig,
    messages: Arc<dyn MessageRepository>,
    recipients: Arc<dyn RecipientRepository>,
    gateway: Arc<dyn WhatsAppGateway>,
    state_machine: Arc<DeliveryStateMachine>,
    dispatcher: Arc<BroadcastDispatcher>,
}

pub struct RetrySchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RetrySchedulerHandle {
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "retry scheduler task panicked");
        }
    }
}

impl RetryScheduler {
    pub fn new(
        config: RetryConfig,
        messages: Arc<dyn MessageRepository>,
        recipients: Arc<dyn RecipientRepository>,
        gateway: Arc<dyn WhatsAppGateway>,
        state_machine: Arc<DeliveryStateMachine>,
        dispatcher: Arc<BroadcastDispatcher>,
    ) -> Self {
        Self {
            config,
            messages,
            recipients,
            gateway,
            state_machine,
            dispatcher,
        }
    }

    /// Spawns the periodic loop. Owned by the composition root; stop via the
    /// returned handle.
    pub fn start(self: Arc<Self>) -> RetrySchedulerHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            if !self.config.enabled {
                info!("retry scheduler disabled by configuration");
                return;
            }
            let mut interval = tokio::time::interval(self.config.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(err) = self.pass(Utc::now()).await {
                            error!(error = %err, "retry pass failed");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("retry scheduler stopping");
                        return;
                    }
                }
            }
        });
        RetrySchedulerHandle { shutdown, task }
    }

    /// One full pass: single messages, then both recipient tables.
    /// Row failures are contained per row; the batch always completes.
    pub async fn pass(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let claimed = self
            .messages
            .claim_retryable(
                now,
                &self.config.backoff_minutes,
                self.config.max_attempts,
                self.config.batch_size,
            )
            .await?;
        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed messages for retry");
        }
        for message in claimed {
            let id = message.id;
            let attempt = message.retry_count;
            let result = self.gateway.send(&message.to, &message.body).await;
            let mut target = DeliveryTarget::Message(message);
            if let Err(err) = self
                .state_machine
                .apply_outbound_result(&mut target, &result)
                .await
            {
                warn!(message = %id, error = %err, "failed to record retry outcome");
            }
            if attempt >= self.config.max_attempts {
                warn!(message = %id, attempt, "retries exhausted");
            }
        }

        for kind in [BroadcastKind::Campaign, BroadcastKind::Weather] {
            let claimed = self
                .recipients
                .claim_retryable(
                    kind,
                    now,
                    &self.config.backoff_minutes,
                    self.config.max_attempts,
                    self.config.batch_size,
                )
                .await?;
            for row in claimed {
                let id = row.id;
                if let Err(err) = self.dispatcher.redrive(kind, row).await {
                    warn!(recipient = %id, error = %err, "recipient redrive failed");
                }
            }
        }
        Ok(())
    }
}
