pub mod auth;
pub mod bots;
pub mod chat;
pub mod sources;
pub mod stats;
pub mod system;
pub mod tenants;
pub mod tokens;
pub mod users;
pub mod webhooks;
