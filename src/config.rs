//! Configuration for the engine.
//!
//! Every tuning constant the classification and scheduling logic depends on
//! (state thresholds, mode cadences, nudge cooldowns, endpoint locations)
//! lives here so deployments can adjust them without touching code.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Behavior profile selecting analysis cadence and intervention
/// aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Silent hourly summaries, never nudges.
    Ghost,
    /// Hourly summaries, gentle nudge when unproductive.
    Chill,
    /// 5-minute check-ins against the configured study focus.
    Study,
    /// 15-minute check-ins against the configured task list.
    Coach,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Ghost => "ghost",
            Mode::Chill => "chill",
            Mode::Study => "study",
            Mode::Coach => "coach",
        }
    }
}

impl FromStr for Mode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ghost" => Ok(Mode::Ghost),
            "chill" => Ok(Mode::Chill),
            "study" => Ok(Mode::Study),
            "coach" => Ok(Mode::Coach),
            other => Err(EngineError::Validation(format!("unknown mode: {other}"))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cadence and intervention profile for one mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeProfile {
    /// Minimum minutes between scheduled cycles.
    pub interval_mins: i64,
    /// Minimum minutes between nudges issued from this mode.
    pub cooldown_mins: i64,
    /// Whether switching into this mode forces a cycle immediately.
    pub immediate: bool,
}

/// Per-mode cadence table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeTable {
    pub ghost: ModeProfile,
    pub chill: ModeProfile,
    pub study: ModeProfile,
    pub coach: ModeProfile,
}

impl Default for ModeTable {
    fn default() -> Self {
        Self {
            ghost: ModeProfile {
                interval_mins: 60,
                cooldown_mins: 60,
                immediate: false,
            },
            chill: ModeProfile {
                interval_mins: 60,
                cooldown_mins: 60,
                immediate: false,
            },
            study: ModeProfile {
                interval_mins: 5,
                cooldown_mins: 5,
                immediate: true,
            },
            coach: ModeProfile {
                interval_mins: 15,
                cooldown_mins: 15,
                immediate: true,
            },
        }
    }
}

impl ModeTable {
    pub fn profile(&self, mode: Mode) -> &ModeProfile {
        match mode {
            Mode::Ghost => &self.ghost,
            Mode::Chill => &self.chill,
            Mode::Study => &self.study,
            Mode::Coach => &self.coach,
        }
    }
}

/// Thresholds driving state classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    /// Focus score at or above which the state is productive.
    pub focus_high: f64,
    /// Focus score at or above which the state is moderate.
    pub focus_mid: f64,
    /// Focus score at or above which the state is chilling (when the
    /// distraction bucket is not dominant).
    pub focus_low: f64,
    /// Productivity score at or above which an otherwise-distraction app
    /// counts toward the work bucket.
    pub work_score: u8,
    /// Active minutes below which a timeframe classifies as afk.
    pub min_active_minutes: f64,
    /// Number of app switches inside the rapid-switch window that counts as
    /// a burst.
    pub rapid_switch_count: usize,
    /// Width of the rapid-switch window in seconds.
    pub rapid_switch_window_secs: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            focus_high: 75.0,
            focus_mid: 60.0,
            focus_low: 40.0,
            work_score: 70,
            min_active_minutes: 1.0,
            rapid_switch_count: 4,
            rapid_switch_window_secs: 300,
        }
    }
}

/// State-keyed cooldowns for proactive nudges, in minutes. Afk never nudges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgeCooldowns {
    pub productive_mins: i64,
    pub moderate_mins: i64,
    pub unproductive_mins: i64,
}

impl Default for NudgeCooldowns {
    fn default() -> Self {
        Self {
            productive_mins: 45,
            moderate_mins: 15,
            unproductive_mins: 5,
        }
    }
}

/// Intervention texts delivered with a nudge, per mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NudgePrompts {
    pub chill: String,
    pub study: String,
    pub coach: String,
}

impl Default for NudgePrompts {
    fn default() -> Self {
        Self {
            chill: "You've been drifting for a while. Maybe switch to something \
                    productive, or take a proper break?"
                .to_string(),
            study: "Looks like you got pulled away from studying. Time to get back \
                    on track."
                .to_string(),
            coach: "Check-in time: review your task list and update your progress."
                .to_string(),
        }
    }
}

/// Main configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Activity tracker host.
    pub tracker_host: String,
    /// Activity tracker port.
    pub tracker_port: u16,

    /// Model endpoint host.
    pub model_host: String,
    /// Model endpoint port.
    pub model_port: u16,
    /// Model name sent with each generation request.
    pub model_name: String,
    /// Sampling temperature; kept low for reproducible summaries.
    pub temperature: f32,

    /// Free-text context about the user, embedded in every prompt.
    pub user_context: String,
    /// What the user is studying (study mode).
    pub study_focus: String,
    /// The task the user committed to (coach mode).
    pub coach_task: String,

    pub thresholds: Thresholds,
    pub modes: ModeTable,
    pub nudge_cooldowns: NudgeCooldowns,
    pub nudge_prompts: NudgePrompts,

    /// Consecutive same-app events closer than this are merged.
    pub merge_gap_secs: i64,
    /// Minimum spacing between two model calls.
    pub min_model_gap_secs: u64,
    /// Timeout for reactive (study/coach) model calls.
    pub reactive_timeout_secs: u64,
    /// Timeout for full (hourly/daily) model calls.
    pub full_timeout_secs: u64,
    /// How long discovered bucket ids stay cached.
    pub bucket_ttl_secs: i64,

    /// Directory for persisted state (categories, mode).
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadence");

        Self {
            tracker_host: "127.0.0.1".to_string(),
            tracker_port: 5600,
            model_host: "127.0.0.1".to_string(),
            model_port: 11434,
            model_name: "mistral".to_string(),
            temperature: 0.2,
            user_context: "I want to understand where my computer time goes."
                .to_string(),
            study_focus: String::new(),
            coach_task: String::new(),
            thresholds: Thresholds::default(),
            modes: ModeTable::default(),
            nudge_cooldowns: NudgeCooldowns::default(),
            nudge_prompts: NudgePrompts::default(),
            merge_gap_secs: 5,
            min_model_gap_secs: 2,
            reactive_timeout_secs: 10,
            full_timeout_secs: 30,
            bucket_ttl_secs: 900,
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, EngineError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| EngineError::Config(format!("read {config_path:?}: {e}")))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| EngineError::Config(format!("parse {config_path:?}: {e}")))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), EngineError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Config(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::Config(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cadence")
            .join("config.json")
    }

    /// Path of the persisted category store.
    pub fn categories_path(&self) -> PathBuf {
        self.data_path.join("categories.json")
    }

    /// Path of the persisted mode selection.
    pub fn mode_path(&self) -> PathBuf {
        self.data_path.join("mode.txt")
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> Result<(), EngineError> {
        std::fs::create_dir_all(&self.data_path).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Base URL of the activity tracker.
    pub fn tracker_url(&self) -> String {
        format!("http://{}:{}", self.tracker_host, self.tracker_port)
    }

    /// Base URL of the model endpoint.
    pub fn model_url(&self) -> String {
        format!("http://{}:{}", self.model_host, self.model_port)
    }

    /// Load the persisted mode, if any.
    pub fn load_mode(&self) -> Option<Mode> {
        let content = std::fs::read_to_string(self.mode_path()).ok()?;
        content.parse().ok()
    }

    /// Persist the current mode so it survives restarts.
    pub fn save_mode(&self, mode: Mode) -> Result<(), EngineError> {
        self.ensure_directories()?;
        std::fs::write(self.mode_path(), mode.as_str())
            .map_err(|e| EngineError::Config(e.to_string()))
    }

    /// User context for a mode: the base context plus the mode's focus text.
    pub fn context_for(&self, mode: Mode) -> String {
        match mode {
            Mode::Study if !self.study_focus.is_empty() => format!(
                "{} Currently studying: {}. Flag anything that pulls away from it.",
                self.user_context, self.study_focus
            ),
            Mode::Coach if !self.coach_task.is_empty() => format!(
                "{} Committed task: {}. Judge activity against that commitment.",
                self.user_context, self.coach_task
            ),
            _ => self.user_context.clone(),
        }
    }
}
