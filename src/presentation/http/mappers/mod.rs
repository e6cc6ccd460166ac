use crate::{
    application::usecases::get_campaign_status::CampaignStatusView,
    domain::models::{Message, RecipientCounts},
    presentation::http::responses::{CampaignStatusDto, MessageDto, RecipientCountsDto},
};

pub fn map_message(message: &Message) -> MessageDto {
    MessageDto {
        id: message.id,
        to: message.to.clone(),
        body: message.body.clone(),
        status: message.status.as_str().to_string(),
        error_code: message.error_code,
        error_message: message.error_message.clone(),
        retry_count: message.retry_count,
        delivered_at: message.delivered_at,
        created_at: message.created_at,
    }
}

pub fn map_counts(counts: &RecipientCounts) -> RecipientCountsDto {
    RecipientCountsDto {
        pending: counts.pending,
        queued: counts.queued,
        sending: counts.sending,
        sent: counts.sent,
        delivered: counts.delivered,
        read: counts.read,
        failed: counts.failed,
        undelivered: counts.undelivered,
        total: counts.total(),
    }
}

pub fn map_campaign_status(view: &CampaignStatusView) -> CampaignStatusDto {
    CampaignStatusDto {
        campaign_id: view.campaign_id,
        name: view.name.clone(),
        status: view.status.as_str().to_string(),
        counts: map_counts(&view.counts),
    }
}
