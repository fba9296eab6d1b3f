// Utility functions module

pub mod config;
pub mod database;
pub mod schema;
pub mod text;

pub use config::AssistantConfig;
pub use database::Database;
