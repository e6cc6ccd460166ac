use std::sync::Arc;

use tracing::error;
use uuid::Uuid;

use crate::{
    application::broadcast::BroadcastDispatcher,
    domain::{
        errors::DomainError,
        models::{Broadcast, BroadcastKind},
        repositories::BroadcastRepository,
    },
};

pub struct CreateCampaignUseCase {
    broadcasts: Arc<dyn BroadcastRepository>,
    dispatcher: Arc<BroadcastDispatcher>,
}

pub struct CreateCampaignRequest {
    pub kind: BroadcastKind,
    pub name: String,
    pub body: String,
    pub created_by: Uuid,
    pub group_ids: Vec<Uuid>,
}

pub struct CreateCampaignResponse {
    pub campaign_id: Uuid,
}

impl CreateCampaignUseCase {
    pub fn new(
        broadcasts: Arc<dyn BroadcastRepository>,
        dispatcher: Arc<BroadcastDispatcher>,
    ) -> Self {
        Self {
            broadcasts,
            dispatcher,
        }
    }

    /// Persists the campaign and hands it to a background fan-out worker.
    /// The id returns immediately; progress is observable through the
    /// aggregate status.
    pub async fn execute(
        &self,
        request: CreateCampaignRequest,
    ) -> Result<CreateCampaignResponse, DomainError> {
        if request.body.trim().is_empty() {
            return Err(DomainError::Validation("campaign body is empty".into()));
        }
        if request.group_ids.is_empty() {
            return Err(DomainError::Validation(
                "campaign targets no groups".into(),
            ));
        }

        let broadcast = Broadcast::new(
            request.kind,
            request.name,
            request.body,
            request.created_by,
            request.group_ids,
        );
        let broadcast = self.broadcasts.insert(broadcast).await?;

        let dispatcher = self.dispatcher.clone();
        let campaign_id = broadcast.id;
        tokio::spawn(async move {
            if let Err(err) = dispatcher.fan_out(campaign_id).await {
                error!(campaign = %campaign_id, error = %err, "fan-out worker failed");
            }
        });

        Ok(CreateCampaignResponse { campaign_id })
    }
}
