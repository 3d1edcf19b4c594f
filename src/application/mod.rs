pub mod accounts;
pub mod api;
pub mod bootstrap;
pub mod commands;
pub mod route_guard;
pub mod session;
pub mod task_cache;
