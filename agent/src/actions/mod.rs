//! Recovery and reporting actions run by heartbeat jobs

pub mod self_heal;
pub mod summarizer;
