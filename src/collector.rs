//! Activity collection: fetches window and AFK events from the tracker,
//! removes idle time, and merges fragmented same-app events.
//!
//! Events are fetched fresh on every call and discarded after the cycle;
//! nothing here caches activity data.

use crate::error::EngineError;
use crate::resources::{Endpoint, ResourceManager};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Analysis window relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    FiveMinutes,
    ThirtyMinutes,
    Hourly,
    Daily,
    Weekly,
}

impl Timeframe {
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::FiveMinutes => Duration::minutes(5),
            Timeframe::ThirtyMinutes => Duration::minutes(30),
            Timeframe::Hourly => Duration::hours(1),
            Timeframe::Daily => Duration::hours(24),
            Timeframe::Weekly => Duration::days(7),
        }
    }

    pub fn minutes(&self) -> f64 {
        self.duration().num_seconds() as f64 / 60.0
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::FiveMinutes => "5_minutes",
            Timeframe::ThirtyMinutes => "30_minutes",
            Timeframe::Hourly => "1_hour",
            Timeframe::Daily => "24_hours",
            Timeframe::Weekly => "7_days",
        }
    }
}

/// One merged span of foreground activity in a single app.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub app: String,
    pub title: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Event {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn duration_minutes(&self) -> f64 {
        (self.end - self.start).num_seconds() as f64 / 60.0
    }
}

/// An idle interval reported by the AFK watcher. Transient: used to subtract
/// idle time, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AfkPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Wire shape of a tracker event.
#[derive(Debug, Clone, Deserialize)]
struct RawEvent {
    timestamp: DateTime<Utc>,
    /// Seconds.
    duration: f64,
    #[serde(default)]
    data: HashMap<String, serde_json::Value>,
}

impl RawEvent {
    fn end(&self) -> DateTime<Utc> {
        self.timestamp + Duration::milliseconds((self.duration * 1000.0) as i64)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// Strip any path prefix and a trailing `.exe` from a reported app name.
pub fn normalize_app_name(raw: &str) -> String {
    let base = raw
        .rsplit(['\\', '/'])
        .next()
        .unwrap_or(raw);
    let lower = base.to_lowercase();
    if let Some(stripped) = lower.strip_suffix(".exe") {
        stripped.to_string()
    } else {
        lower
    }
}

/// Fetches and cleans activity for a timeframe.
pub struct Collector {
    resources: Arc<ResourceManager>,
    merge_gap: Duration,
}

impl Collector {
    pub fn new(resources: Arc<ResourceManager>, merge_gap_secs: i64) -> Self {
        Self {
            resources,
            merge_gap: Duration::seconds(merge_gap_secs),
        }
    }

    /// Ordered, AFK-filtered, merged events for one timeframe.
    ///
    /// A reachable tracker with no activity yields `Ok(vec![])`; an
    /// unreachable tracker yields [`EngineError::CollectorUnavailable`] so
    /// callers can tell "no activity" from "collector offline".
    pub async fn collect(&self, timeframe: Timeframe) -> Result<Vec<Event>, EngineError> {
        let now = Utc::now();
        let start = now - timeframe.duration();
        let (window, afk) = self.fetch_range(start, now).await?;
        Ok(self.clean(&window, &afk, start, now))
    }

    /// Events for several timeframes from a single pair of outbound queries.
    ///
    /// Fetches the widest window once and slices in memory, so the tracker
    /// sees at most one query per bucket regardless of how many timeframes
    /// are requested.
    pub async fn collect_multi(
        &self,
        timeframes: &[Timeframe],
    ) -> Result<HashMap<Timeframe, Vec<Event>>, EngineError> {
        let widest = timeframes
            .iter()
            .copied()
            .max_by_key(|tf| tf.duration())
            .ok_or_else(|| EngineError::Validation("no timeframes requested".into()))?;

        let now = Utc::now();
        let start = now - widest.duration();
        let (window, afk) = self.fetch_range(start, now).await?;
        let full = self.clean(&window, &afk, start, now);

        let mut per_timeframe = HashMap::new();
        for tf in timeframes {
            let tf_start = now - tf.duration();
            per_timeframe.insert(*tf, clip_to_window(&full, tf_start, now));
        }
        Ok(per_timeframe)
    }

    fn clean(
        &self,
        window: &[RawEvent],
        afk: &[RawEvent],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Event> {
        let idle = afk_periods(afk);
        let active = active_periods(start, end, &idle);
        let clipped = clip_to_active(window, &active);
        merge_consecutive(clipped, self.merge_gap)
    }

    async fn fetch_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(Vec<RawEvent>, Vec<RawEvent>), EngineError> {
        let buckets = self.resources.buckets().await.map_err(|e| match e {
            EngineError::Discovery(reason) => EngineError::CollectorUnavailable(reason),
            other => other,
        })?;

        let (window, afk) = tokio::try_join!(
            self.fetch_events(&buckets.window, start, end),
            self.fetch_events(&buckets.afk, start, end)
        )?;
        Ok((window, afk))
    }

    async fn fetch_events(
        &self,
        bucket: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<RawEvent>, EngineError> {
        // The tracker rejects sub-second precision in range queries.
        let start_str = start.trunc_subsecs(0).format("%Y-%m-%dT%H:%M:%SZ");
        let end_str = end.trunc_subsecs(0).format("%Y-%m-%dT%H:%M:%SZ");
        let url = self.resources.tracker_url(&format!(
            "/api/0/buckets/{bucket}/events?start={start_str}&end={end_str}"
        ));

        let response = self
            .resources
            .get_with_retry(Endpoint::Tracker, &url)
            .await
            .map_err(|e| EngineError::CollectorUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::CollectorUnavailable(format!(
                "tracker returned {} for bucket {bucket}",
                response.status()
            )));
        }

        let mut events: Vec<RawEvent> = response
            .json()
            .await
            .map_err(|e| EngineError::CollectorUnavailable(format!("event parse: {e}")))?;
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }
}

/// Idle periods from the AFK watcher's status events, merged when they
/// overlap or touch.
fn afk_periods(afk: &[RawEvent]) -> Vec<AfkPeriod> {
    let mut periods: Vec<AfkPeriod> = afk
        .iter()
        .filter(|e| e.str_field("status") == Some("afk"))
        .map(|e| AfkPeriod {
            start: e.timestamp,
            end: e.end(),
        })
        .filter(|p| p.end > p.start)
        .collect();
    periods.sort_by_key(|p| p.start);

    let mut merged: Vec<AfkPeriod> = Vec::new();
    for period in periods {
        if let Some(last) = merged.last_mut() {
            if period.start <= last.end {
                last.end = last.end.max(period.end);
                continue;
            }
        }
        merged.push(period);
    }
    merged
}

/// The complement of the idle periods within `[start, end]`.
fn active_periods(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    idle: &[AfkPeriod],
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let mut active = Vec::new();
    let mut cursor = start;
    for period in idle {
        let idle_start = period.start.max(start);
        let idle_end = period.end.min(end);
        if idle_end <= cursor {
            continue;
        }
        if idle_start > cursor {
            active.push((cursor, idle_start.min(end)));
        }
        cursor = cursor.max(idle_end);
        if cursor >= end {
            break;
        }
    }
    if cursor < end {
        active.push((cursor, end));
    }
    active
}

/// Retain only the portions of window events inside active periods. An event
/// straddling an AFK boundary is clipped, not dropped; one raw event can
/// yield several clipped segments.
fn clip_to_active(
    window: &[RawEvent],
    active: &[(DateTime<Utc>, DateTime<Utc>)],
) -> Vec<Event> {
    let mut events = Vec::new();
    for raw in window {
        let app = match raw.str_field("app") {
            Some(app) => normalize_app_name(app),
            None => continue,
        };
        let title = raw.str_field("title").unwrap_or("").to_string();
        let raw_end = raw.end();

        for &(active_start, active_end) in active {
            if raw.timestamp < active_end && raw_end > active_start {
                let start = raw.timestamp.max(active_start);
                let end = raw_end.min(active_end);
                if end > start {
                    events.push(Event {
                        app: app.clone(),
                        title: title.clone(),
                        start,
                        end,
                    });
                }
            }
        }
    }
    events.sort_by_key(|e| e.start);
    events
}

/// Merge consecutive events with identical app identity and a gap at or
/// below the threshold.
fn merge_consecutive(events: Vec<Event>, gap: Duration) -> Vec<Event> {
    let mut merged: Vec<Event> = Vec::new();
    for event in events {
        if let Some(last) = merged.last_mut() {
            if last.app == event.app && event.start - last.end <= gap {
                last.end = last.end.max(event.end);
                if last.title.is_empty() {
                    last.title = event.title;
                }
                continue;
            }
        }
        merged.push(event);
    }
    merged
}

/// Clip merged events to a narrower window (used by multi-timeframe slicing).
fn clip_to_window(
    events: &[Event],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Event> {
    events
        .iter()
        .filter(|e| e.start < end && e.end > start)
        .map(|e| Event {
            app: e.app.clone(),
            title: e.title.clone(),
            start: e.start.max(start),
            end: e.end.min(end),
        })
        .collect()
}
