pub mod broadcast;
pub mod retry_scheduler;
pub mod services;
pub mod state_machine;
pub mod usecases;
pub mod webhook;
