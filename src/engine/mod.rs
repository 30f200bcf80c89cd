//! The hybrid query resolution engine.

pub mod breaker;
pub mod cache;
pub mod generator;
pub mod learning;
pub mod monitor;
pub mod pattern;
pub mod query;
pub mod resolver;
pub mod signatures;
pub mod templates;
pub mod validator;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a resolved SQL statement came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Cache,
    Learned,
    Template,
    Dynamic,
    Fallback,
}

impl ResolutionSource {
    pub const ALL: [ResolutionSource; 5] = [
        ResolutionSource::Cache,
        ResolutionSource::Learned,
        ResolutionSource::Template,
        ResolutionSource::Dynamic,
        ResolutionSource::Fallback,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Cache => "cache",
            ResolutionSource::Learned => "learned",
            ResolutionSource::Template => "template",
            ResolutionSource::Dynamic => "dynamic",
            ResolutionSource::Fallback => "fallback",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
