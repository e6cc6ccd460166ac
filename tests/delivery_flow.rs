use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use farmcast::{
    application::{
        broadcast::{BroadcastDispatcher, DispatchConfig},
        retry_scheduler::{RetryConfig, RetryScheduler},
        state_machine::DeliveryStateMachine,
        usecases::send_message::{SendMessageRequest, SendMessageUseCase},
        webhook::{StatusCallback, WebhookReconciler},
    },
    domain::{
        models::{Broadcast, BroadcastKind, BroadcastStatus, Customer},
        repositories::{
            BroadcastRepository, MessageRepository, RecipientRepository,
        },
        status::DeliveryStatus,
    },
    infrastructure::{
        gateway::fake::FakeGateway,
        repositories::in_memory::{
            InMemoryBroadcastRepository, InMemoryCustomerRepository, InMemoryMessageRepository,
            InMemoryRecipientRepository,
        },
    },
};

struct World {
    messages: Arc<InMemoryMessageRepository>,
    recipients: Arc<InMemoryRecipientRepository>,
    broadcasts: Arc<InMemoryBroadcastRepository>,
    customers: Arc<InMemoryCustomerRepository>,
    gateway: Arc<FakeGateway>,
    dispatcher: Arc<BroadcastDispatcher>,
    reconciler: WebhookReconciler,
    scheduler: RetryScheduler,
    send_message: SendMessageUseCase,
}

fn world() -> World {
    let messages = Arc::new(InMemoryMessageRepository::new());
    let recipients = Arc::new(InMemoryRecipientRepository::new());
    let broadcasts = Arc::new(InMemoryBroadcastRepository::new());
    let customers = Arc::new(InMemoryCustomerRepository::new());
    let gateway = Arc::new(FakeGateway::new());
    let state_machine = Arc::new(DeliveryStateMachine::new(
        messages.clone(),
        recipients.clone(),
    ));
    let dispatcher = Arc::new(BroadcastDispatcher::new(
        broadcasts.clone(),
        recipients.clone(),
        customers.clone(),
        messages.clone(),
        gateway.clone(),
        state_machine.clone(),
        DispatchConfig {
            rate_per_sec: 1000,
            ..DispatchConfig::default()
        },
    ));
    let reconciler = WebhookReconciler::new(state_machine.clone(), dispatcher.clone());
    let scheduler = RetryScheduler::new(
        RetryConfig::default(),
        messages.clone(),
        recipients.clone(),
        gateway.clone(),
        state_machine.clone(),
        dispatcher.clone(),
    );
    let send_message = SendMessageUseCase::new(
        messages.clone(),
        gateway.clone(),
        state_machine,
    );
    World {
        messages,
        recipients,
        broadcasts,
        customers,
        gateway,
        dispatcher,
        reconciler,
        scheduler,
        send_message,
    }
}

fn farmer(world: &World, phone: &str, session_open: bool) -> Customer {
    let customer = Customer {
        id: Uuid::new_v4(),
        phone_number: phone.to_string(),
        full_name: Some("Juma".to_string()),
        session_expires_at: session_open.then(|| Utc::now() + Duration::hours(3)),
        created_at: Utc::now(),
    };
    world.customers.put(customer.clone());
    customer
}

async fn webhook(world: &World, sid: &str, status: &str) {
    world
        .reconciler
        .process(StatusCallback {
            message_sid: sid.to_string(),
            message_status: status.to_string(),
            error_code: None,
            error_message: None,
        })
        .await
        .expect("webhook processing never errors");
}

/// New customer with no open session: template first, body only after the
/// confirmation is delivered, campaign completes at 1/1 delivered.
#[tokio::test]
async fn two_phase_broadcast_runs_to_completion() {
    let w = world();
    let customer = farmer(&w, "+255700000010", false);
    let group = Uuid::new_v4();
    w.customers.put_group(group, vec![customer.id]);

    let broadcast = Broadcast::new(
        BroadcastKind::Campaign,
        "market day",
        "Market opens Saturday.",
        Uuid::new_v4(),
        vec![group],
    );
    let campaign_id = broadcast.id;
    w.broadcasts.insert(broadcast).await.unwrap();
    w.dispatcher.fan_out(campaign_id).await.unwrap();

    let rows = w
        .recipients
        .list_for_broadcast(BroadcastKind::Campaign, campaign_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let confirmation_sid = rows[0].confirmation_sid.clone().expect("template sent");
    assert!(rows[0].message_sid.is_none());

    webhook(&w, &confirmation_sid, "sent").await;
    webhook(&w, &confirmation_sid, "delivered").await;

    // Confirmation delivery released the campaign body.
    let row = w
        .recipients
        .get(BroadcastKind::Campaign, rows[0].id)
        .await
        .unwrap()
        .unwrap();
    assert!(row.confirmed_at.is_some());
    let actual_sid = row.message_sid.clone().expect("body sent after confirmation");
    assert_ne!(actual_sid, confirmation_sid);
    assert!(row.message_id.is_some());

    webhook(&w, &actual_sid, "sent").await;
    webhook(&w, &actual_sid, "delivered").await;

    let row = w
        .recipients
        .get(BroadcastKind::Campaign, row.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, DeliveryStatus::Delivered);
    assert!(row.delivered_at.is_some());

    // The linked message row tracked the same delivery.
    let linked = w
        .messages
        .get(row.message_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(linked.status, DeliveryStatus::Delivered);

    let counts = w
        .dispatcher
        .refresh_status(BroadcastKind::Campaign, campaign_id)
        .await
        .unwrap();
    assert_eq!(counts.delivered, 1);
    assert_eq!(counts.total(), 1);
    let stored = w.broadcasts.get(campaign_id).await.unwrap().unwrap();
    assert_eq!(stored.status, BroadcastStatus::Completed);
}

/// Transient send failure is picked up by the scheduler after the first
/// backoff step and succeeds on the second attempt.
#[tokio::test]
async fn transient_failure_is_retried_after_backoff() {
    let w = world();
    let phone = "+255700000020";
    w.gateway.fail_transiently_for(phone, "connection reset");

    let response = w
        .send_message
        .execute(SendMessageRequest {
            to: phone.to_string(),
            body: "Vaccination day is Tuesday.".to_string(),
        })
        .await
        .unwrap();

    let message = w.messages.get(response.message_id).await.unwrap().unwrap();
    assert_eq!(message.status, DeliveryStatus::Failed);
    assert_eq!(message.retry_count, 0);
    assert!(!message.error_permanent);

    // Too early: the first backoff step is five minutes.
    w.scheduler.pass(Utc::now() + Duration::minutes(2)).await.unwrap();
    let message = w.messages.get(response.message_id).await.unwrap().unwrap();
    assert_eq!(message.status, DeliveryStatus::Failed);
    assert_eq!(message.retry_count, 0);

    w.gateway.recover(phone);
    w.scheduler.pass(Utc::now() + Duration::minutes(5)).await.unwrap();

    let message = w.messages.get(response.message_id).await.unwrap().unwrap();
    assert_eq!(message.retry_count, 1);
    assert_eq!(message.status, DeliveryStatus::Queued);
    let sid = message.provider_sid.clone().expect("resend got a sid");

    webhook(&w, &sid, "sent").await;
    let message = w.messages.get(response.message_id).await.unwrap().unwrap();
    assert_eq!(message.status, DeliveryStatus::Sent);
}

/// A permanently classified failure is never selected again, regardless of
/// how much time passes.
#[tokio::test]
async fn permanent_failure_is_never_retried() {
    let w = world();
    let phone = "+255700000030";
    w.gateway.fail_permanently_for(phone, 21211, "invalid 'To' number");

    let response = w
        .send_message
        .execute(SendMessageRequest {
            to: phone.to_string(),
            body: "hello".to_string(),
        })
        .await
        .unwrap();

    let message = w.messages.get(response.message_id).await.unwrap().unwrap();
    assert_eq!(message.status, DeliveryStatus::Failed);
    assert!(message.error_permanent);
    assert_eq!(message.error_code, Some(21211));

    w.gateway.recover(phone);
    w.scheduler.pass(Utc::now() + Duration::days(2)).await.unwrap();

    let message = w.messages.get(response.message_id).await.unwrap().unwrap();
    assert_eq!(message.retry_count, 0);
    assert_eq!(message.status, DeliveryStatus::Failed);
    assert_eq!(w.gateway.text_sends(), 0);
}

/// A transiently failed campaign body is resent exactly once per scheduler
/// pass: the recipient redrive owns the retry, and the linked message row is
/// never picked up as a second retry source.
#[tokio::test]
async fn failed_campaign_body_is_resent_once() {
    let w = world();
    let customer = farmer(&w, "+255700000060", true);
    let group = Uuid::new_v4();
    w.customers.put_group(group, vec![customer.id]);
    w.gateway
        .fail_transiently_for(&customer.phone_number, "connection reset");

    let broadcast = Broadcast::new(
        BroadcastKind::Campaign,
        "dip day",
        "Cattle dip opens Friday.",
        Uuid::new_v4(),
        vec![group],
    );
    let campaign_id = broadcast.id;
    w.broadcasts.insert(broadcast).await.unwrap();
    w.dispatcher.fan_out(campaign_id).await.unwrap();

    let rows = w
        .recipients
        .list_for_broadcast(BroadcastKind::Campaign, campaign_id)
        .await
        .unwrap();
    assert_eq!(rows[0].status, DeliveryStatus::Failed);
    let message_id = rows[0].message_id.expect("linked row created");
    assert_eq!(w.gateway.text_sends(), 0);

    w.gateway.recover(&customer.phone_number);
    w.scheduler
        .pass(Utc::now() + Duration::minutes(6))
        .await
        .unwrap();

    // One customer, one resend.
    assert_eq!(w.gateway.text_sends(), 1);
    let row = w
        .recipients
        .get(BroadcastKind::Campaign, rows[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, DeliveryStatus::Queued);
    assert_eq!(row.retry_count, 1);

    // The linked row follows the resend but holds no retry state of its own.
    let linked = w.messages.get(message_id).await.unwrap().unwrap();
    assert_eq!(linked.status, DeliveryStatus::Queued);
    assert_eq!(linked.retry_count, 0);
    assert_eq!(linked.provider_sid, row.message_sid);
}

/// Replaying the confirmation-delivered webhook must not send the campaign
/// body twice.
#[tokio::test]
async fn replayed_confirmation_webhook_sends_body_once() {
    let w = world();
    let customer = farmer(&w, "+255700000040", false);
    let group = Uuid::new_v4();
    w.customers.put_group(group, vec![customer.id]);

    let broadcast = Broadcast::new(
        BroadcastKind::Campaign,
        "replay test",
        "Hello again.",
        Uuid::new_v4(),
        vec![group],
    );
    let campaign_id = broadcast.id;
    w.broadcasts.insert(broadcast).await.unwrap();
    w.dispatcher.fan_out(campaign_id).await.unwrap();

    let rows = w
        .recipients
        .list_for_broadcast(BroadcastKind::Campaign, campaign_id)
        .await
        .unwrap();
    let confirmation_sid = rows[0].confirmation_sid.clone().unwrap();

    webhook(&w, &confirmation_sid, "delivered").await;
    webhook(&w, &confirmation_sid, "delivered").await;
    webhook(&w, &confirmation_sid, "DELIVERED").await;

    assert_eq!(w.gateway.text_sends(), 1);
    assert_eq!(w.gateway.template_sends(), 1);
}

/// A callback for a sid nobody knows is acknowledged, not an error.
#[tokio::test]
async fn orphan_callbacks_are_acknowledged() {
    let w = world();
    w.reconciler
        .process(StatusCallback {
            message_sid: "SM_never_heard_of".to_string(),
            message_status: "delivered".to_string(),
            error_code: None,
            error_message: None,
        })
        .await
        .expect("orphans must not surface as errors");
}

/// A weather broadcast tracks through its own recipient table with the same
/// machinery.
#[tokio::test]
async fn weather_broadcast_uses_parallel_table() {
    let w = world();
    let customer = farmer(&w, "+255700000050", true);
    let group = Uuid::new_v4();
    w.customers.put_group(group, vec![customer.id]);

    let broadcast = Broadcast::new(
        BroadcastKind::Weather,
        "storm warning",
        "Strong winds expected tonight.",
        Uuid::new_v4(),
        vec![group],
    );
    let campaign_id = broadcast.id;
    w.broadcasts.insert(broadcast).await.unwrap();
    w.dispatcher.fan_out(campaign_id).await.unwrap();

    let rows = w
        .recipients
        .list_for_broadcast(BroadcastKind::Weather, campaign_id)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let sid = rows[0].message_sid.clone().expect("open session sends body");

    webhook(&w, &sid, "delivered").await;

    let row = w
        .recipients
        .get(BroadcastKind::Weather, rows[0].id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, DeliveryStatus::Delivered);
    // Nothing leaked into the campaign table.
    assert!(w
        .recipients
        .list_for_broadcast(BroadcastKind::Campaign, campaign_id)
        .await
        .unwrap()
        .is_empty());
}
