//! Request lifecycle engine

pub mod dispatcher;
pub mod keys;
pub mod logging;
pub mod mcp;
pub mod plugins;
pub mod providers;
pub mod resilience;
pub mod semantic_cache;
pub mod streaming;
pub mod trace;
pub mod types;
