//! Local state: layout, settings, deployment record and agent memory

pub mod layout;
pub mod memory;
pub mod record;
pub mod settings;
