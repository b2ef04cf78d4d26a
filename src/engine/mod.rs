pub mod dispatch;
pub mod drivers;
pub mod fare;
pub mod ledger;
pub mod lifecycle;
pub mod matching;
pub mod queue;
