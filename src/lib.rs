//! Hybrid query resolution: turns parsed analytics questions into validated,
//! circuit-protected SQL from a cache, a learned library, templates or a
//! language model.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod llm;
pub mod schema;
pub mod util;
pub mod web;
