use chrono::{DateTime, Utc};
use poem_openapi::Object;
use uuid::Uuid;

#[derive(Debug, Object)]
pub struct SendMessageResponseDto {
    pub message_id: Uuid,
}

#[derive(Debug, Object)]
pub struct MessageDto {
    pub id: Uuid,
    pub to: String,
    pub body: String,
    pub status: String,
    pub error_code: Option<i32>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Object)]
pub struct CreateCampaignResponseDto {
    pub campaign_id: Uuid,
}

#[derive(Debug, Object)]
pub struct RecipientCountsDto {
    pub pending: u64,
    pub queued: u64,
    pub sending: u64,
    pub sent: u64,
    pub delivered: u64,
    pub read: u64,
    pub failed: u64,
    pub undelivered: u64,
    pub total: u64,
}

#[derive(Debug, Object)]
pub struct CampaignStatusDto {
    pub campaign_id: Uuid,
    pub name: String,
    pub status: String,
    pub counts: RecipientCountsDto,
}
