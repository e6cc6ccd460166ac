pub mod broadcast;
pub mod customer;
pub mod message;
pub mod target;

pub use broadcast::{
    Broadcast, BroadcastKind, BroadcastStatus, CampaignRecipient, RecipientCounts,
};
pub use customer::{Customer, CustomerGroup};
pub use message::Message;
pub use target::{DeliveryTarget, SendPhase};
