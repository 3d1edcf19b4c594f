pub mod api_transport;
pub mod config;
pub mod cookies;
pub mod credential_store;
pub mod error;
