//! Error types for the engine.

use thiserror::Error;

/// Errors surfaced by the engine and its components.
///
/// Collector and summarizer failures are recovered inside a cycle (a cycle
/// always completes with some summary); validation and discovery errors are
/// returned to the caller synchronously.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The activity tracker is unreachable or not responding.
    #[error("activity tracker unavailable: {0}")]
    CollectorUnavailable(String),

    /// The tracker is reachable but returned no data for the requested range.
    /// Collection normally reports this as an empty event list; the variant
    /// exists for callers that need the distinction at an API boundary.
    #[error("activity tracker returned no data for the requested range")]
    CollectorEmpty,

    /// The model endpoint is unreachable, timed out, or replied with a
    /// payload that failed both parse stages.
    #[error("model endpoint unavailable: {0}")]
    SummarizerUnavailable(String),

    /// A category update was rejected; the store is unmodified.
    #[error("validation error: {0}")]
    Validation(String),

    /// Bucket discovery against the tracker failed.
    #[error("service discovery failed: {0}")]
    Discovery(String),

    /// Configuration could not be loaded or saved.
    #[error("config error: {0}")]
    Config(String),

    /// The engine task is no longer running.
    #[error("engine unavailable: {0}")]
    EngineGone(String),
}
