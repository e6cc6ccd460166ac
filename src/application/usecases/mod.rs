pub mod create_campaign;
pub mod get_campaign_status;
pub mod send_message;
