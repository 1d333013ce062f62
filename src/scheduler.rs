//! The scheduling loop: one actor task that owns all mutable engine state.
//!
//! Two input streams feed the actor (a fixed-resolution tick and a command
//! channel carrying mode switches and forced cycles), and cycles execute
//! inline in the actor loop, so two cycles can never overlap. Readers never
//! touch the actor: completed results are published to a shared cache behind
//! a single lock boundary, and `EngineHandle` reads return immediately.

use crate::categories::CategoryStore;
use crate::classifier::{self, ActivityState, ClassificationResult};
use crate::collector::{Collector, Timeframe};
use crate::config::{Config, Mode, NudgeCooldowns};
use crate::error::EngineError;
use crate::resources::{Endpoint, ResourceManager};
use crate::summarizer::{CycleInput, DailyStats, Summarizer, Summary};
use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::{interval, MissedTickBehavior};

/// Seconds between scheduler ticks.
const TICK_SECS: u64 = 60;

/// Scheduler-owned state. Mutated only inside the actor, through the
/// tick/mode-switch protocol.
#[derive(Debug, Clone)]
pub struct ScheduleState {
    pub current_mode: Mode,
    pub last_run_at: Option<DateTime<Utc>>,
    pub in_flight: bool,
}

/// A proactive intervention produced by a completed cycle. Delivery is the
/// shell's job; the engine only decides and records it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nudge {
    pub text: String,
    pub at: DateTime<Utc>,
    pub mode: Mode,
}

/// Connectivity of the two external services.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub tracker: bool,
    pub model: bool,
}

/// What readers observe. Replaced atomically after each completed cycle;
/// never partially updated.
struct Published {
    mode: Mode,
    last_cycle: Option<Summary>,
    last_daily: Option<Summary>,
    last_nudge: Option<Nudge>,
}

enum Command {
    SetMode(Mode),
    CycleNow {
        mode: Option<Mode>,
        reply: oneshot::Sender<Summary>,
    },
    DailyNow {
        reply: oneshot::Sender<Summary>,
    },
}

/// The background engine. Construct with [`Engine::new`], then hand the
/// engine to a task (`tokio::spawn(engine.run())`) and keep the handle.
pub struct Engine {
    config: Config,
    collector: Collector,
    summarizer: Summarizer,
    store: Arc<CategoryStore>,
    published: Arc<RwLock<Published>>,
    schedule: ScheduleState,
    last_nudge_at: Option<DateTime<Utc>>,
    rx: mpsc::Receiver<Command>,
}

/// Cheap, cloneable access to the running engine.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    published: Arc<RwLock<Published>>,
    store: Arc<CategoryStore>,
    resources: Arc<ResourceManager>,
    instance_id: Arc<str>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<CategoryStore>) -> (Engine, EngineHandle) {
        let resources = Arc::new(ResourceManager::new(&config));
        let collector = Collector::new(resources.clone(), config.merge_gap_secs);
        let summarizer = Summarizer::new(resources.clone(), &config);

        let initial_mode = config.load_mode().unwrap_or(Mode::Coach);
        let published = Arc::new(RwLock::new(Published {
            mode: initial_mode,
            last_cycle: None,
            last_daily: None,
            last_nudge: None,
        }));

        let (tx, rx) = mpsc::channel(16);
        let instance_id: Arc<str> =
            format!("cadence-{}", &uuid::Uuid::new_v4().to_string()[..8]).into();

        let engine = Engine {
            config,
            collector,
            summarizer,
            store: store.clone(),
            published: published.clone(),
            schedule: ScheduleState {
                current_mode: initial_mode,
                // Baseline at startup: the first scheduled cycle waits a full
                // interval; forced and immediate-mode cycles do not.
                last_run_at: Some(Utc::now()),
                in_flight: false,
            },
            last_nudge_at: None,
            rx,
        };

        let handle = EngineHandle {
            tx,
            published,
            store,
            resources,
            instance_id,
        };

        (engine, handle)
    }

    /// Drive the scheduler until every handle is dropped.
    pub async fn run(mut self) {
        let mut ticker = interval(std::time::Duration::from_secs(TICK_SECS));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            mode = %self.schedule.current_mode,
            "engine started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick().await,
                cmd = self.rx.recv() => match cmd {
                    Some(Command::SetMode(mode)) => self.on_mode_switch(mode).await,
                    Some(Command::CycleNow { mode, reply }) => {
                        let mode = mode.unwrap_or(self.schedule.current_mode);
                        let summary = self.run_cycle(mode).await;
                        let _ = reply.send(summary);
                    }
                    Some(Command::DailyNow { reply }) => {
                        let summary = self.run_daily().await;
                        let _ = reply.send(summary);
                    }
                    None => break,
                }
            }
        }

        tracing::info!("engine stopped");
    }

    async fn on_tick(&mut self) {
        // Cycles run inline in this loop, so a tick can never observe an
        // in-flight cycle; the guard is the stated invariant, kept explicit.
        if self.schedule.in_flight {
            return;
        }
        let mode = self.schedule.current_mode;
        let profile = self.config.modes.profile(mode);
        if !cycle_due(self.schedule.last_run_at, Utc::now(), profile.interval_mins) {
            return;
        }
        self.run_cycle(mode).await;
    }

    async fn on_mode_switch(&mut self, mode: Mode) {
        let previous = self.schedule.current_mode;
        self.schedule.current_mode = mode;
        {
            let mut published = self.published.write().await;
            published.mode = mode;
        }
        if let Err(e) = self.config.save_mode(mode) {
            tracing::warn!("could not persist mode: {e}");
        }
        tracing::info!(from = %previous, to = %mode, "mode switched");

        if self.config.modes.profile(mode).immediate {
            // Immediate modes get a cycle right away; the in_flight guard
            // still applies because the cycle runs inline here.
            self.run_cycle(mode).await;
        } else {
            // Restart the cadence from the switch.
            self.schedule.last_run_at = Some(Utc::now());
        }
    }

    /// One full cycle: collect, classify, summarize, publish. The cycle runs
    /// under `mode` even if the current mode changes while it is in flight,
    /// and always completes with a summary.
    async fn run_cycle(&mut self, mode: Mode) -> Summary {
        self.schedule.in_flight = true;
        let started = Utc::now();
        let analysis_tf = analysis_timeframe(mode);

        let collected = self
            .collector
            .collect_multi(&[analysis_tf, Timeframe::ThirtyMinutes])
            .await;

        let view = self.store.view().await;
        let (classification, timeline) = match collected {
            Ok(mut frames) => {
                let events = frames.remove(&analysis_tf).unwrap_or_default();
                let timeline = frames
                    .remove(&Timeframe::ThirtyMinutes)
                    .unwrap_or_else(|| events.clone());
                let classification =
                    classifier::classify(&events, &view, &self.config.thresholds);
                (classification, timeline)
            }
            Err(e) => {
                // Collector offline degrades to a zero-activity
                // classification; the cycle still completes.
                tracing::warn!("collector unavailable, classifying zero activity: {e}");
                (ClassificationResult::afk(), Vec::new())
            }
        };

        let switches = classifier::detect_context_switches(&timeline);
        let bursts = classifier::rapid_switch_bursts(
            &switches,
            Duration::seconds(self.config.thresholds.rapid_switch_window_secs),
            self.config.thresholds.rapid_switch_count,
        );
        let user_context = self.config.context_for(mode);

        let input = CycleInput {
            classification: &classification,
            timeline: &timeline,
            bursts: &bursts,
            mode,
            user_context: &user_context,
            period_label: period_label(analysis_tf, started),
        };
        let summary = self.summarizer.summarize(&input).await;
        let nudge = self.maybe_nudge(mode, classification.state);

        {
            let mut published = self.published.write().await;
            published.last_cycle = Some(summary.clone());
            if nudge.is_some() {
                published.last_nudge = nudge.clone();
            }
        }

        // A fallback summary still counts as a completed cycle.
        self.schedule.last_run_at = Some(Utc::now());
        self.schedule.in_flight = false;

        tracing::info!(
            mode = %mode,
            state = %summary.state,
            focus = summary.focus_score,
            source = ?summary.source,
            nudged = nudge.is_some(),
            "cycle completed"
        );
        summary
    }

    /// Day-level aggregation through the same model-with-fallback pipeline.
    async fn run_daily(&mut self) -> Summary {
        self.schedule.in_flight = true;
        let events = match self.collector.collect(Timeframe::Daily).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("collector unavailable for daily summary: {e}");
                Vec::new()
            }
        };
        let stats = DailyStats::from_events(&events);
        let mode = self.schedule.current_mode;
        let summary = self
            .summarizer
            .summarize_daily(
                &stats,
                &self.config.user_context,
                mode,
                Local::now().format("%Y-%m-%d").to_string(),
            )
            .await;

        {
            let mut published = self.published.write().await;
            published.last_daily = Some(summary.clone());
        }
        self.schedule.in_flight = false;
        summary
    }

    /// Decide whether this cycle should carry an intervention. Ghost mode
    /// never nudges; afk never nudges; the state-keyed cooldown applies on
    /// top of that.
    fn maybe_nudge(&mut self, mode: Mode, state: ActivityState) -> Option<Nudge> {
        let text = match (mode, state) {
            (Mode::Ghost, _) | (_, ActivityState::Afk) => return None,
            (Mode::Chill, ActivityState::Unproductive) => self.config.nudge_prompts.chill.clone(),
            (Mode::Study, ActivityState::Unproductive) => self.config.nudge_prompts.study.clone(),
            (Mode::Coach, _) => self.config.nudge_prompts.coach.clone(),
            _ => return None,
        };

        let now = Utc::now();
        if !nudge_allowed(self.last_nudge_at, now, state, &self.config.nudge_cooldowns) {
            return None;
        }
        self.last_nudge_at = Some(now);
        Some(Nudge { text, at: now, mode })
    }
}

impl EngineHandle {
    /// Latest completed cycle summary. Non-blocking cache read; never waits
    /// on network I/O.
    pub async fn latest_summary(&self) -> Option<Summary> {
        self.published.read().await.last_cycle.clone()
    }

    /// Latest daily summary, if one was generated.
    pub async fn latest_daily_summary(&self) -> Option<Summary> {
        self.published.read().await.last_daily.clone()
    }

    /// Most recent intervention, if any.
    pub async fn last_nudge(&self) -> Option<Nudge> {
        self.published.read().await.last_nudge.clone()
    }

    pub async fn current_mode(&self) -> Mode {
        self.published.read().await.mode
    }

    /// Switch modes. Immediate modes force a cycle on the actor's next turn;
    /// an in-progress cycle is never interrupted.
    pub async fn set_mode(&self, mode: Mode) -> Result<(), EngineError> {
        self.tx
            .send(Command::SetMode(mode))
            .await
            .map_err(|_| EngineError::EngineGone("engine task has stopped".into()))
    }

    /// Run a cycle now and wait for its summary (or fallback).
    pub async fn run_cycle_now(&self, mode: Option<Mode>) -> Result<Summary, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::CycleNow { mode, reply })
            .await
            .map_err(|_| EngineError::EngineGone("engine task has stopped".into()))?;
        rx.await
            .map_err(|_| EngineError::EngineGone("engine dropped the cycle request".into()))
    }

    /// Run the daily aggregation now and wait for its summary.
    pub async fn run_daily_now(&self) -> Result<Summary, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::DailyNow { reply })
            .await
            .map_err(|_| EngineError::EngineGone("engine task has stopped".into()))?;
        rx.await
            .map_err(|_| EngineError::EngineGone("engine dropped the daily request".into()))
    }

    /// The shared category store (lookups, updates, bulk updates).
    pub fn categories(&self) -> &Arc<CategoryStore> {
        &self.store
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Probe both external services.
    pub async fn check_connections(&self) -> ConnectionStatus {
        let tracker_url = self.resources.tracker_url("/api/0/info");
        let tracker = match self
            .resources
            .client(Endpoint::Tracker)
            .get(tracker_url)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        };

        let model_url = self.resources.model_url("/api/tags");
        let model = match self
            .resources
            .client(Endpoint::Model)
            .get(model_url)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        };

        ConnectionStatus { tracker, model }
    }
}

/// Whether the scheduled interval for a mode has elapsed.
fn cycle_due(last_run: Option<DateTime<Utc>>, now: DateTime<Utc>, interval_mins: i64) -> bool {
    match last_run {
        None => true,
        Some(at) => now - at >= Duration::minutes(interval_mins),
    }
}

/// Cooldown before another nudge is allowed, keyed by the state that
/// triggered it. Afk suppresses nudges entirely.
fn nudge_cooldown(state: ActivityState, cooldowns: &NudgeCooldowns) -> Option<Duration> {
    match state {
        ActivityState::Productive => Some(Duration::minutes(cooldowns.productive_mins)),
        ActivityState::Moderate | ActivityState::Chilling => {
            Some(Duration::minutes(cooldowns.moderate_mins))
        }
        ActivityState::Unproductive => Some(Duration::minutes(cooldowns.unproductive_mins)),
        ActivityState::Afk => None,
    }
}

fn nudge_allowed(
    last_nudge: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    state: ActivityState,
    cooldowns: &NudgeCooldowns,
) -> bool {
    let Some(cooldown) = nudge_cooldown(state, cooldowns) else {
        return false;
    };
    match last_nudge {
        None => true,
        Some(at) => now - at >= cooldown,
    }
}

/// The analysis window each mode looks at.
fn analysis_timeframe(mode: Mode) -> Timeframe {
    match mode {
        Mode::Ghost | Mode::Chill => Timeframe::Hourly,
        Mode::Study => Timeframe::FiveMinutes,
        Mode::Coach => Timeframe::ThirtyMinutes,
    }
}

/// "HH:MM-HH:MM" in local time for the analyzed window.
fn period_label(timeframe: Timeframe, end: DateTime<Utc>) -> String {
    let start = end - timeframe.duration();
    format!(
        "{}-{}",
        start.with_timezone(&Local).format("%H:%M"),
        end.with_timezone(&Local).format("%H:%M")
    )
}
