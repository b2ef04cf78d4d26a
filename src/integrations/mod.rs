pub mod events;
pub mod payment;
