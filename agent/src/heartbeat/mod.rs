//! Named job scheduler driving the monitors

pub mod schedule;
pub mod scheduler;
