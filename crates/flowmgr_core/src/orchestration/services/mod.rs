//! Stateful services the orchestration handlers are composed of.
pub mod cache;
pub mod locks;
pub mod resources;
pub mod status;
pub mod transaction;
