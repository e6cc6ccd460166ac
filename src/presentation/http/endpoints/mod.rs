pub mod broadcasts;
pub mod health;
pub mod messages;
pub mod root;
pub mod webhooks;
