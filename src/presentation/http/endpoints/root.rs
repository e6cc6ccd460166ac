use std::sync::Arc;

use poem_openapi::Tags;

use crate::{
    application::usecases::{
        create_campaign::CreateCampaignUseCase, get_campaign_status::GetCampaignStatusUseCase,
        send_message::SendMessageUseCase,
    },
    domain::repositories::MessageRepository,
};

#[derive(Clone)]
pub struct ApiState {
    pub send_message_usecase: Arc<SendMessageUseCase>,
    pub create_campaign_usecase: Arc<CreateCampaignUseCase>,
    pub campaign_status_usecase: Arc<GetCampaignStatusUseCase>,
    pub messages: Arc<dyn MessageRepository>,
}

/// Enum of API sections (tags)
#[derive(Tags)]
pub enum EndpointsTags {
    Health,
    Messages,
    Broadcasts,
}
