//! Usage: Infrastructure adapters (settings persistence, hot-reloadable configuration).

pub mod hot_config;
pub mod settings;
