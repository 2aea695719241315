//! Lua plugin runtime: one interpreter per script, a shared host table, and the
//! manager that discovers scripts and commits what they contribute.

pub mod adapter;
pub mod api;
pub mod host;
pub mod manager;

pub use api::PluginApi;
pub use manager::PluginManager;
