use poem_openapi::Object;
use uuid::Uuid;

#[derive(Debug, Object)]
pub struct SendMessageRequestDto {
    /// Destination in E.164 form.
    pub to: String,
    pub text: String,
}

#[derive(Debug, Object)]
pub struct CreateCampaignRequestDto {
    pub name: String,
    pub body: String,
    pub created_by: Uuid,
    pub group_ids: Vec<Uuid>,
    /// "campaign" (default) or "weather".
    pub kind: Option<String>,
}
