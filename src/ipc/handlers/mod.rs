pub mod assignments;
pub mod attendance;
pub mod auth;
pub mod backup;
pub mod coins;
pub mod core;
pub mod groups;
pub mod notifications;
pub mod payments;
pub mod referrals;
pub mod stats;
pub mod students;
pub mod withdrawals;
