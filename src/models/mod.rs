pub mod caller;
pub mod driver;
pub mod event;
pub mod fare;
pub mod location;
pub mod ride;
pub mod wallet;
