//! Pure classification: bucket split, focus score, and the state ladder.
//!
//! Nothing here suspends or touches the network; the scheduler hands in a
//! category snapshot and gets a fresh [`ClassificationResult`] back.

use crate::categories::CategoryView;
use crate::collector::Event;
use crate::config::Thresholds;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Categories whose time lands in the work bucket.
const WORK_CATEGORIES: &[&str] = &["work", "development", "productivity", "study"];

/// Categories whose time lands in the communication bucket.
const COMMUNICATION_CATEGORIES: &[&str] = &["communication"];

/// Five-way productivity state for a timeframe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Productive,
    Moderate,
    Chilling,
    Unproductive,
    Afk,
}

impl ActivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityState::Productive => "productive",
            ActivityState::Moderate => "moderate",
            ActivityState::Chilling => "chilling",
            ActivityState::Unproductive => "unproductive",
            ActivityState::Afk => "afk",
        }
    }
}

impl std::str::FromStr for ActivityState {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "productive" => Ok(ActivityState::Productive),
            "moderate" => Ok(ActivityState::Moderate),
            "chilling" => Ok(ActivityState::Chilling),
            "unproductive" => Ok(ActivityState::Unproductive),
            "afk" => Ok(ActivityState::Afk),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ActivityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived classification for one timeframe. Recomputed every cycle, never
/// mutated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub work_minutes: f64,
    pub communication_minutes: f64,
    pub distraction_minutes: f64,
    pub active_minutes: f64,
    /// 0-100, duration-weighted mean of per-app productivity scores.
    pub focus_score: f64,
    pub state: ActivityState,
    pub context_switches: usize,
}

impl ClassificationResult {
    /// Classification of an empty or unreachable timeframe.
    pub fn afk() -> Self {
        Self {
            work_minutes: 0.0,
            communication_minutes: 0.0,
            distraction_minutes: 0.0,
            active_minutes: 0.0,
            focus_score: 0.0,
            state: ActivityState::Afk,
            context_switches: 0,
        }
    }

    /// Share of active time in the work bucket, 0-100.
    pub fn work_percentage(&self) -> f64 {
        percentage(self.work_minutes, self.active_minutes)
    }

    pub fn communication_percentage(&self) -> f64 {
        percentage(self.communication_minutes, self.active_minutes)
    }

    pub fn distraction_percentage(&self) -> f64 {
        percentage(self.distraction_minutes, self.active_minutes)
    }
}

fn percentage(part: f64, whole: f64) -> f64 {
    if whole > 0.0 {
        (part / whole * 100.0).round()
    } else {
        0.0
    }
}

/// An app-to-app transition in the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSwitch {
    pub at: DateTime<Utc>,
    pub from_app: String,
    pub to_app: String,
}

/// Classify a timeframe's merged events against a category snapshot.
pub fn classify(
    events: &[Event],
    categories: &CategoryView,
    thresholds: &Thresholds,
) -> ClassificationResult {
    let mut work = 0.0;
    let mut communication = 0.0;
    let mut distraction = 0.0;
    let mut weighted_score = 0.0;
    let mut active = 0.0;

    for event in events {
        let category = categories.resolve(&event.app);
        let minutes = event.duration_minutes();
        if minutes <= 0.0 {
            continue;
        }

        active += minutes;
        weighted_score += f64::from(category.productivity_score) * minutes;

        if WORK_CATEGORIES.contains(&category.category.as_str()) {
            work += minutes;
        } else if COMMUNICATION_CATEGORIES.contains(&category.category.as_str()) {
            communication += minutes;
        } else if category.productivity_score >= thresholds.work_score {
            // High-scoring app in an unknown category still counts as work.
            work += minutes;
        } else {
            distraction += minutes;
        }
    }

    let focus_score = if active > 0.0 {
        (weighted_score / active).clamp(0.0, 100.0)
    } else {
        0.0
    };

    let switches = detect_context_switches(events);
    let state = derive_state(focus_score, active, work, communication, distraction, thresholds);

    ClassificationResult {
        work_minutes: work,
        communication_minutes: communication,
        distraction_minutes: distraction,
        active_minutes: active,
        focus_score,
        state,
        context_switches: switches.len(),
    }
}

/// The state ladder. First match wins; thresholds are closed on the upper
/// bound so a score sitting exactly on a boundary takes the better state.
fn derive_state(
    focus_score: f64,
    active_minutes: f64,
    work_minutes: f64,
    communication_minutes: f64,
    distraction_minutes: f64,
    thresholds: &Thresholds,
) -> ActivityState {
    if active_minutes < thresholds.min_active_minutes {
        return ActivityState::Afk;
    }
    if focus_score >= thresholds.focus_high {
        return ActivityState::Productive;
    }
    if focus_score >= thresholds.focus_mid {
        return ActivityState::Moderate;
    }
    let distraction_dominant = distraction_minutes > work_minutes + communication_minutes;
    if focus_score >= thresholds.focus_low && !distraction_dominant {
        return ActivityState::Chilling;
    }
    ActivityState::Unproductive
}

/// App-to-app transitions over an ordered event list.
pub fn detect_context_switches(events: &[Event]) -> Vec<ContextSwitch> {
    events
        .windows(2)
        .filter(|pair| pair[0].app != pair[1].app)
        .map(|pair| ContextSwitch {
            at: pair[1].start,
            from_app: pair[0].app.clone(),
            to_app: pair[1].app.clone(),
        })
        .collect()
}

/// Bursts of rapid switching: windows containing at least `min_count`
/// switches within `window` of each other. Returns (burst start, switch
/// count) per burst.
pub fn rapid_switch_bursts(
    switches: &[ContextSwitch],
    window: Duration,
    min_count: usize,
) -> Vec<(DateTime<Utc>, usize)> {
    if min_count == 0 || switches.is_empty() {
        return Vec::new();
    }

    let mut bursts = Vec::new();
    let mut start_idx = 0;
    let mut i = 0;
    while i < switches.len() {
        while switches[i].at - switches[start_idx].at > window {
            start_idx += 1;
        }
        let count = i - start_idx + 1;
        if count == min_count {
            bursts.push((switches[start_idx].at, count));
        } else if count > min_count {
            // Extend the burst we already reported.
            if let Some(last) = bursts.last_mut() {
                last.1 = count;
            }
        }
        i += 1;
    }
    bursts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::CategoryStore;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(app: &str, start_min: i64, minutes: i64) -> Event {
        Event {
            app: app.to_string(),
            title: String::new(),
            start: ts(start_min * 60),
            end: ts((start_min + minutes) * 60),
        }
    }

    async fn view_with(records: Vec<(&str, &str, u8)>) -> CategoryView {
        let store = CategoryStore::new();
        for (app, category, score) in records {
            store
                .update(crate::categories::Category {
                    app_name: app.to_string(),
                    category: category.to_string(),
                    subcategory: None,
                    productivity_score: score,
                })
                .await
                .unwrap();
        }
        store.view().await
    }

    #[tokio::test]
    async fn test_weighted_focus_score_scenario() {
        // 50 work-minutes at score 90, 10 distraction-minutes at score 10:
        // (50*90 + 10*10) / 60 = 76.67 -> productive.
        let view = view_with(vec![
            ("editor", "development", 90),
            ("videos", "entertainment", 10),
        ])
        .await;
        let events = vec![
            event("editor", 0, 20),
            event("editor", 20, 30),
            event("videos", 50, 10),
        ];

        let result = classify(&events, &view, &Thresholds::default());
        assert_eq!(result.work_minutes, 50.0);
        assert_eq!(result.distraction_minutes, 10.0);
        assert!((result.focus_score - 76.666).abs() < 0.01);
        assert_eq!(result.state, ActivityState::Productive);
    }

    #[tokio::test]
    async fn test_no_activity_is_afk_with_zero_focus() {
        let view = view_with(vec![]).await;
        let result = classify(&[], &view, &Thresholds::default());
        assert_eq!(result.state, ActivityState::Afk);
        assert_eq!(result.focus_score, 0.0);
        assert_eq!(result.active_minutes, 0.0);
    }

    #[tokio::test]
    async fn test_below_activity_floor_is_afk() {
        let view = view_with(vec![("editor", "development", 90)]).await;
        // 30 seconds of activity, floor is 1 minute.
        let events = vec![Event {
            app: "editor".to_string(),
            title: String::new(),
            start: ts(0),
            end: ts(30),
        }];
        let result = classify(&events, &view, &Thresholds::default());
        assert_eq!(result.state, ActivityState::Afk);
    }

    #[tokio::test]
    async fn test_threshold_tie_resolves_to_higher_state() {
        let thresholds = Thresholds::default();
        let view = view_with(vec![("app", "development", 75)]).await;
        let result = classify(&[event("app", 0, 10)], &view, &thresholds);
        // Exactly at focus_high -> productive, not moderate.
        assert_eq!(result.focus_score, 75.0);
        assert_eq!(result.state, ActivityState::Productive);
    }

    #[tokio::test]
    async fn test_high_score_unknown_category_counts_as_work() {
        let view = view_with(vec![("figurine", "hobby", 85)]).await;
        let result = classify(&[event("figurine", 0, 10)], &view, &Thresholds::default());
        assert_eq!(result.work_minutes, 10.0);
        assert_eq!(result.distraction_minutes, 0.0);
    }

    #[tokio::test]
    async fn test_dominant_distraction_is_unproductive() {
        let view = view_with(vec![
            ("videos", "entertainment", 45),
            ("editor", "development", 45),
        ])
        .await;
        // Focus 45 is above focus_low but distraction dominates.
        let events = vec![event("videos", 0, 40), event("editor", 40, 10)];
        let result = classify(&events, &view, &Thresholds::default());
        assert_eq!(result.state, ActivityState::Unproductive);
    }

    #[tokio::test]
    async fn test_low_focus_without_dominant_distraction_is_chilling() {
        let view = view_with(vec![("slack", "communication", 45)]).await;
        let result = classify(&[event("slack", 0, 30)], &view, &Thresholds::default());
        assert_eq!(result.state, ActivityState::Chilling);
    }

    #[tokio::test]
    async fn test_empty_store_still_classifies() {
        let view = view_with(vec![]).await;
        let result = classify(&[event("whoknows", 0, 30)], &view, &Thresholds::default());
        // Default score 50 -> distraction bucket, chilling state.
        assert_eq!(result.focus_score, 50.0);
        assert_eq!(result.state, ActivityState::Unproductive);
        assert_eq!(result.distraction_minutes, 30.0);
    }

    #[test]
    fn test_focus_score_stays_in_range() {
        let result = ClassificationResult::afk();
        assert!(result.focus_score >= 0.0 && result.focus_score <= 100.0);
    }

    #[test]
    fn test_context_switch_detection() {
        let events = vec![
            event("editor", 0, 10),
            event("slack", 10, 2),
            event("editor", 12, 10),
        ];
        let switches = detect_context_switches(&events);
        assert_eq!(switches.len(), 2);
        assert_eq!(switches[0].from_app, "editor");
        assert_eq!(switches[0].to_app, "slack");
    }

    #[test]
    fn test_rapid_switch_bursts() {
        let mk = |at: i64, from: &str, to: &str| ContextSwitch {
            at: ts(at),
            from_app: from.to_string(),
            to_app: to.to_string(),
        };
        // Four switches within 2 minutes, then a lone one much later.
        let switches = vec![
            mk(0, "a", "b"),
            mk(30, "b", "c"),
            mk(60, "c", "a"),
            mk(120, "a", "d"),
            mk(3600, "d", "a"),
        ];
        let bursts = rapid_switch_bursts(&switches, Duration::minutes(5), 4);
        assert_eq!(bursts.len(), 1);
        assert_eq!(bursts[0].1, 4);

        let none = rapid_switch_bursts(&switches, Duration::minutes(5), 6);
        assert!(none.is_empty());
    }

    #[test]
    fn test_percentages() {
        let result = ClassificationResult {
            work_minutes: 30.0,
            communication_minutes: 10.0,
            distraction_minutes: 20.0,
            active_minutes: 60.0,
            focus_score: 55.0,
            state: ActivityState::Moderate,
            context_switches: 3,
        };
        assert_eq!(result.work_percentage(), 50.0);
        assert_eq!(result.communication_percentage(), 17.0);
        assert_eq!(result.distraction_percentage(), 33.0);
    }
}
