pub mod attendance;
pub mod batch;
pub mod core;
pub mod eligibility;
pub mod events;
pub mod performance;
pub mod results;
pub mod setup;
