pub mod climate;
pub mod engine;
pub mod scheduler;
pub mod sms;
pub mod stages;
