use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{OpenApi, param::Path, payload::Json};

use crate::{
    application::usecases::create_campaign::CreateCampaignRequest,
    domain::{errors::DomainError, models::BroadcastKind},
    presentation::http::{
        endpoints::{
            messages::map_domain_error,
            root::{ApiState, EndpointsTags},
        },
        mappers::map_campaign_status,
        requests::CreateCampaignRequestDto,
        responses::{CampaignStatusDto, CreateCampaignResponseDto},
    },
};

#[derive(Clone)]
pub struct BroadcastsEndpoints {
    state: Arc<ApiState>,
}

impl BroadcastsEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl BroadcastsEndpoints {
    #[oai(
        path = "/broadcasts",
        method = "post",
        tag = EndpointsTags::Broadcasts,
    )]
    pub async fn create_campaign(
        &self,
        request: Json<CreateCampaignRequestDto>,
    ) -> PoemResult<Json<CreateCampaignResponseDto>> {
        let kind = match request.kind.as_deref() {
            None => BroadcastKind::Campaign,
            Some(value) => BroadcastKind::from_str(value).ok_or_else(|| {
                map_domain_error(DomainError::Validation(format!(
                    "unknown broadcast kind {value}"
                )))
            })?,
        };

        let response = self
            .state
            .create_campaign_usecase
            .execute(CreateCampaignRequest {
                kind,
                name: request.name.clone(),
                body: request.body.clone(),
                created_by: request.created_by,
                group_ids: request.group_ids.clone(),
            })
            .await
            .map_err(map_domain_error)?;

        Ok(Json(CreateCampaignResponseDto {
            campaign_id: response.campaign_id,
        }))
    }

    #[oai(
        path = "/broadcasts/:campaign_id",
        method = "get",
        tag = EndpointsTags::Broadcasts,
    )]
    pub async fn get_campaign_status(
        &self,
        campaign_id: Path<uuid::Uuid>,
    ) -> PoemResult<Json<CampaignStatusDto>> {
        let view = self
            .state
            .campaign_status_usecase
            .execute(campaign_id.0)
            .await
            .map_err(map_domain_error)?;

        Ok(Json(map_campaign_status(&view)))
    }
}
