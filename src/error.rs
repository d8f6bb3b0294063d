//! Provides the [`enum@Error`] type returned by all fallible stepgraph surfaces.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// One entry per specific violation; the caller must fix every listed
    /// problem and retry.
    #[error("invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
    #[error("pad data invalid: {0}")]
    PadData(String),
    #[error("step graph build failed for pad {pad}: {reason}")]
    GraphBuild { pad: String, reason: String },
    #[error("step graph load failed: {0}")]
    GraphLoad(String),
    #[error("step graph version mismatch: found {found}, expected {expected}")]
    GraphVersionMismatch { found: u32, expected: u32 },
    #[error("serialized enum ordinals changed; the file requires a newer format version")]
    SerializedEnumMismatch,
    #[error("no expression found for chart {chart}: search exhausted at position {position}")]
    ExpressionFailure { chart: String, position: i32 },
    #[error("no performance found for chart {chart}: furthest position reached {position}")]
    PerformanceFailure { chart: String, position: i32 },
    #[error("could not read or write step graph file: {0}")]
    Io(#[from] io::Error),
    #[error("could not parse JSON input: {0}")]
    Json(#[from] serde_json::Error),
}
