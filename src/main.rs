use std::io::Error;
use std::sync::Arc;

use poem::{EndpointExt, Route, Server, listener::TcpListener, post};
use poem_openapi::OpenApiService;
use sqlx::postgres::PgPoolOptions;
use tokio::main;
use tracing::info;

use farmcast::{
    application::{
        broadcast::BroadcastDispatcher,
        retry_scheduler::RetryScheduler,
        state_machine::DeliveryStateMachine,
        usecases::{
            create_campaign::CreateCampaignUseCase,
            get_campaign_status::GetCampaignStatusUseCase, send_message::SendMessageUseCase,
        },
        webhook::WebhookReconciler,
    },
    config::Config,
    infrastructure::{
        gateway::twilio::TwilioGateway,
        repositories::postgres::{
            PostgresBroadcastRepository, PostgresCustomerRepository, PostgresMessageRepository,
            PostgresRecipientRepository,
        },
    },
    presentation::http::endpoints::{
        broadcasts::BroadcastsEndpoints, health::HealthEndpoints, messages::MessagesEndpoints,
        root::ApiState, webhooks::status_callback,
    },
};

#[main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "farmcast=info".into()),
        )
        .init();

    let config = Config::try_parse().map_err(Error::other)?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .map_err(Error::other)?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(Error::other)?;

    let messages = PostgresMessageRepository::new(pool.clone());
    let recipients = PostgresRecipientRepository::new(pool.clone());
    let broadcasts = PostgresBroadcastRepository::new(pool.clone());
    let customers = PostgresCustomerRepository::new(pool.clone());
    let gateway = Arc::new(TwilioGateway::new(config.twilio.clone()).map_err(Error::other)?);

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
        config.dispatch.clone(),
    ));
    let reconciler = Arc::new(WebhookReconciler::new(
        state_machine.clone(),
        dispatcher.clone(),
    ));

    let scheduler = Arc::new(RetryScheduler::new(
        config.retry.clone(),
        messages.clone(),
        recipients.clone(),
        gateway.clone(),
        state_machine.clone(),
        dispatcher.clone(),
    ));
    let scheduler_handle = scheduler.start();

    let state = Arc::new(ApiState {
        send_message_usecase: Arc::new(SendMessageUseCase::new(
            messages.clone(),
            gateway.clone(),
            state_machine.clone(),
        )),
        create_campaign_usecase: Arc::new(CreateCampaignUseCase::new(
            broadcasts.clone(),
            dispatcher.clone(),
        )),
        campaign_status_usecase: Arc::new(GetCampaignStatusUseCase::new(
            broadcasts.clone(),
            recipients.clone(),
        )),
        messages: messages.clone(),
    });

    let api_service = OpenApiService::new(
        (
            HealthEndpoints,
            MessagesEndpoints::new(state.clone()),
            BroadcastsEndpoints::new(state.clone()),
        ),
        "Farmcast Delivery API",
        "0.1.0",
    )
    .server(format!("http://localhost:{}/api", config.port));
    let ui = api_service.swagger_ui();
    let app = Route::new()
        .nest("/api", api_service)
        .at("/api/webhooks/status", post(status_callback))
        .nest("/", ui)
        .data(reconciler);

    info!(port = config.port, "starting server");
    let result = Server::new(TcpListener::bind(format!("0.0.0.0:{}", config.port)))
        .run(app)
        .await;

    scheduler_handle.stop().await;
    result
}
