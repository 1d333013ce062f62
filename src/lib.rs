//! Cadence - activity classification and adaptive intervention engine.
//!
//! This library continuously classifies a user's computer-activity stream
//! into a productivity state and drives mode-dependent, rate-limited
//! interventions: AI-generated summaries and nudges with a deterministic
//! fallback when the model is unavailable.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Cadence Engine                        │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌───────────┐   ┌────────────┐   ┌────────────┐            │
//! │  │ Collector │──▶│ Classifier │──▶│ Summarizer │            │
//! │  │ (tracker) │   │  (pure)    │   │ (model+fb) │            │
//! │  └───────────┘   └────────────┘   └────────────┘            │
//! │        │               │                 │                  │
//! │        ▼               ▼                 ▼                  │
//! │  ┌───────────┐   ┌────────────┐   ┌────────────┐            │
//! │  │ Resources │   │ Categories │   │ Scheduler  │──▶ cache   │
//! │  │ (clients) │   │  (store)   │   │  (actor)   │            │
//! │  └───────────┘   └────────────┘   └────────────┘            │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A single scheduler actor owns all mutable state. Ticks and mode switches
//! feed it as two input streams; cycles (collect → classify → summarize)
//! run strictly serialized, and completed summaries are published to a cache
//! that foreground readers consult without ever blocking on network I/O.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cadence_engine::{CategoryStore, Config, Engine};
//!
//! # async fn demo() {
//! let config = Config::load().unwrap_or_default();
//! let store = Arc::new(CategoryStore::with_defaults());
//! let (engine, handle) = Engine::new(config, store);
//! tokio::spawn(engine.run());
//!
//! // Non-blocking cache read; None before the first completed cycle.
//! let latest = handle.latest_summary().await;
//! # let _ = latest;
//! # }
//! ```

pub mod categories;
pub mod classifier;
pub mod collector;
pub mod config;
pub mod error;
pub mod resources;
pub mod scheduler;
pub mod server;
pub mod summarizer;

// Re-export key types at crate root for convenience
pub use categories::{Category, CategoryStore, CategoryView};
pub use classifier::{classify, ActivityState, ClassificationResult, ContextSwitch};
pub use collector::{Collector, Event, Timeframe};
pub use config::{Config, Mode, ModeProfile, Thresholds};
pub use error::EngineError;
pub use resources::{BucketIds, Endpoint, ResourceManager};
pub use scheduler::{ConnectionStatus, Engine, EngineHandle, Nudge, ScheduleState};
pub use summarizer::{DailyStats, Summarizer, Summary, SummarySource};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
