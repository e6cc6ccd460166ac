use std::sync::Arc;

use uuid::Uuid;

use crate::domain::{
    errors::DomainError,
    models::{BroadcastStatus, RecipientCounts},
    repositories::{BroadcastRepository, RecipientRepository},
};

pub struct GetCampaignStatusUseCase {
    broadcasts: Arc<dyn BroadcastRepository>,
    recipients: Arc<dyn RecipientRepository>,
}

pub struct CampaignStatusView {
    pub campaign_id: Uuid,
    pub name: String,
    pub status: BroadcastStatus,
    pub counts: RecipientCounts,
}

impl GetCampaignStatusUseCase {
    pub fn new(
        broadcasts: Arc<dyn BroadcastRepository>,
        recipients: Arc<dyn RecipientRepository>,
    ) -> Self {
        Self {
            broadcasts,
            recipients,
        }
    }

    /// Aggregate status plus per-status recipient counts, derived live from
    /// the tracking table. Reads never mutate the campaign row.
    pub async fn execute(&self, campaign_id: Uuid) -> Result<CampaignStatusView, DomainError> {
        let broadcast = self
            .broadcasts
            .get(campaign_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {campaign_id}")))?;

        let counts = self
            .recipients
            .status_counts(broadcast.kind, campaign_id)
            .await?;
        let status = if counts.total() > 0 {
            counts.derive_status()
        } else {
            broadcast.status
        };

        Ok(CampaignStatusView {
            campaign_id,
            name: broadcast.name,
            status,
            counts,
        })
    }
}
