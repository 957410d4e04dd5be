pub mod agents;
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod knowledge;
pub mod memory;
pub mod prompting;
pub mod provider;
pub mod relay;
pub mod store;
pub mod tickets;
pub mod types;
pub mod widget;
