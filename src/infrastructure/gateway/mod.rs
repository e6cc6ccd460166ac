pub mod fake;
pub mod twilio;
