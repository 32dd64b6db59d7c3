//! Checks run on each heartbeat tick
//!
//! Only the health monitor acts; the others log or alert.

pub mod connectivity;
pub mod external_balance;
pub mod funding;
pub mod health;
