use std::sync::Arc;

use poem::Result as PoemResult;
use poem_openapi::{OpenApi, param::Path, payload::Json};

use crate::{
    application::usecases::send_message::SendMessageRequest,
    domain::errors::DomainError,
    presentation::http::{
        endpoints::root::{ApiState, EndpointsTags},
        mappers::map_message,
        requests::SendMessageRequestDto,
        responses::{MessageDto, SendMessageResponseDto},
    },
};

#[derive(Clone)]
pub struct MessagesEndpoints {
    state: Arc<ApiState>,
}

impl MessagesEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl MessagesEndpoints {
    #[oai(
        path = "/messages",
        method = "post",
        tag = EndpointsTags::Messages,
    )]
    pub async fn send_message(
        &self,
        request: Json<SendMessageRequestDto>,
    ) -> PoemResult<Json<SendMessageResponseDto>> {
        let response = self
            .state
            .send_message_usecase
            .execute(SendMessageRequest {
                to: request.to.clone(),
                body: request.text.clone(),
            })
            .await
            .map_err(map_domain_error)?;

        Ok(Json(SendMessageResponseDto {
            message_id: response.message_id,
        }))
    }

    #[oai(
        path = "/messages/:message_id",
        method = "get",
        tag = EndpointsTags::Messages,
    )]
    pub async fn get_message(
        &self,
        message_id: Path<uuid::Uuid>,
    ) -> PoemResult<Json<MessageDto>> {
        let message = self
            .state
            .messages
            .get(message_id.0)
            .await
            .map_err(|err| map_domain_error(DomainError::Other(err)))?
            .ok_or_else(|| {
                poem::Error::from_string("message not found", poem::http::StatusCode::NOT_FOUND)
            })?;

        Ok(Json(map_message(&message)))
    }
}

pub fn map_domain_error(err: DomainError) -> poem::Error {
    let status = match &err {
        DomainError::NotFound(_) => poem::http::StatusCode::NOT_FOUND,
        DomainError::Validation(_) => poem::http::StatusCode::BAD_REQUEST,
        DomainError::Other(_) => poem::http::StatusCode::INTERNAL_SERVER_ERROR,
    };
    poem::Error::from_string(err.to_string(), status)
}
