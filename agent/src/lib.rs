//! phoenix library
//!
//! Core modules of the self-healing workload keeper: compute providers and failover,
//! the heartbeat scheduler, monitors and recovery actions.

pub mod actions;
pub mod alerts;
pub mod app;
pub mod errors;
pub mod filesys;
pub mod heartbeat;
pub mod logs;
pub mod models;
pub mod monitors;
pub mod providers;
pub mod server;
pub mod storage;
pub mod utils;
