//! Core keel library: resource lifecycle for long-running agent
//! processes (bounded caches, session loggers, memory pressure,
//! shutdown coordination).

pub mod cache;
pub mod config;
pub mod lifecycle;
pub mod logging;
pub mod memory;
pub mod runtime;

pub use runtime::Runtime;
