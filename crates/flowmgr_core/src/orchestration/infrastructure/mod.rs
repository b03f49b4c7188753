//! Domain model shared by every orchestration service.
pub mod flow;
pub mod rules;
