//! Summary generation: prompt assembly, the model call, and the
//! deterministic fallback.
//!
//! The model is strictly best-effort. One request per cycle, bounded timeout,
//! no retries; any failure (unreachable endpoint, timeout, unparseable reply)
//! drops to a template summary built purely from the classification, so a
//! completed cycle always yields a summary.

use crate::classifier::{ActivityState, ClassificationResult};
use crate::collector::Event;
use crate::config::{Config, Mode};
use crate::error::EngineError;
use crate::resources::{Endpoint, ResourceManager};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where a summary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySource {
    Llm,
    Fallback,
}

/// The engine's user-facing output for one completed cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub focus_score: f64,
    pub generated_at: DateTime<Utc>,
    pub period_label: String,
    pub source: SummarySource,
    pub mode: Mode,
    pub state: ActivityState,
}

/// Everything the summarizer needs for one cycle.
pub struct CycleInput<'a> {
    pub classification: &'a ClassificationResult,
    /// Recent merged events, newest last (prompt timeline).
    pub timeline: &'a [Event],
    /// Rapid context-switch bursts: (burst start, switch count).
    pub bursts: &'a [(DateTime<Utc>, usize)],
    pub mode: Mode,
    pub user_context: &'a str,
    pub period_label: String,
}

/// Day-level aggregates feeding the daily summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub total_active_hours: f64,
    /// Work sessions, split on gaps longer than five minutes.
    pub sessions: usize,
    /// Top apps by active minutes, descending.
    pub top_apps: Vec<(String, f64)>,
}

impl DailyStats {
    pub fn from_events(events: &[Event]) -> Self {
        let mut app_minutes: HashMap<String, f64> = HashMap::new();
        let mut total_minutes = 0.0;
        let mut sessions = 0;
        let mut last_end: Option<DateTime<Utc>> = None;

        for event in events {
            let minutes = event.duration_minutes();
            *app_minutes.entry(event.app.clone()).or_insert(0.0) += minutes;
            total_minutes += minutes;

            match last_end {
                None => sessions = 1,
                Some(end) if (event.start - end) > Duration::minutes(5) => sessions += 1,
                Some(_) => {}
            }
            last_end = Some(event.end);
        }

        let mut top_apps: Vec<(String, f64)> = app_minutes.into_iter().collect();
        top_apps.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        top_apps.truncate(5);

        Self {
            total_active_hours: total_minutes / 60.0,
            sessions,
            top_apps,
        }
    }
}

/// Structured reply we ask the model for.
#[derive(Debug, Deserialize)]
struct ModelAnalysis {
    summary: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    focus_score: Option<f64>,
}

/// Model-backed summarizer with deterministic fallback.
pub struct Summarizer {
    resources: Arc<ResourceManager>,
    model_name: String,
    temperature: f32,
    reactive_timeout: std::time::Duration,
    full_timeout: std::time::Duration,
    min_gap: std::time::Duration,
    last_call: Mutex<Option<tokio::time::Instant>>,
}

impl Summarizer {
    pub fn new(resources: Arc<ResourceManager>, config: &Config) -> Self {
        Self {
            resources,
            model_name: config.model_name.clone(),
            temperature: config.temperature,
            reactive_timeout: std::time::Duration::from_secs(config.reactive_timeout_secs),
            full_timeout: std::time::Duration::from_secs(config.full_timeout_secs),
            min_gap: std::time::Duration::from_secs(config.min_model_gap_secs),
            last_call: Mutex::new(None),
        }
    }

    /// Produce the cycle summary. Never fails: the fallback path handles
    /// every model-side error.
    pub async fn summarize(&self, input: &CycleInput<'_>) -> Summary {
        // Nothing to ask the model about when the user was away.
        if input.classification.state == ActivityState::Afk {
            return self.fallback(input);
        }

        let prompt = build_cycle_prompt(input);
        let timeout = match input.mode {
            Mode::Study | Mode::Coach => self.reactive_timeout,
            Mode::Ghost | Mode::Chill => self.full_timeout,
        };

        match self.call_model(&prompt, timeout).await {
            Ok(raw) => match parse_model_reply(&raw) {
                Ok(analysis) => self.accept(input, analysis),
                Err(e) => {
                    tracing::warn!("model reply rejected, using fallback: {e}");
                    self.fallback(input)
                }
            },
            Err(e) => {
                tracing::warn!("model call failed, using fallback: {e}");
                self.fallback(input)
            }
        }
    }

    /// Produce the daily summary from day-level aggregates.
    pub async fn summarize_daily(
        &self,
        stats: &DailyStats,
        user_context: &str,
        mode: Mode,
        period_label: String,
    ) -> Summary {
        // An empty day never reaches the model.
        if stats.total_active_hours <= 0.0 {
            return self.daily_fallback(stats, mode, period_label);
        }

        let prompt = build_daily_prompt(stats, user_context);
        match self.call_model(&prompt, self.full_timeout).await {
            Ok(raw) => match parse_model_reply(&raw) {
                Ok(analysis) => accept_daily(analysis, stats, mode, period_label),
                Err(e) => {
                    tracing::warn!("daily model reply rejected, using fallback: {e}");
                    self.daily_fallback(stats, mode, period_label)
                }
            },
            Err(e) => {
                tracing::warn!("daily model call failed, using fallback: {e}");
                self.daily_fallback(stats, mode, period_label)
            }
        }
    }

    fn daily_fallback(&self, stats: &DailyStats, mode: Mode, period_label: String) -> Summary {
        let state = if stats.total_active_hours > 0.0 {
            ActivityState::Moderate
        } else {
            ActivityState::Afk
        };
        Summary {
            text: daily_fallback_text(stats),
            focus_score: 0.0,
            generated_at: Utc::now(),
            period_label,
            source: SummarySource::Fallback,
            mode,
            state,
        }
    }

    /// Accept a validated model analysis; out-of-range fields keep the
    /// locally computed values.
    fn accept(&self, input: &CycleInput<'_>, analysis: ModelAnalysis) -> Summary {
        let classification = input.classification;

        let state = analysis
            .state
            .as_deref()
            .and_then(|s| s.parse::<ActivityState>().ok())
            .unwrap_or(classification.state);

        let focus_score = analysis
            .focus_score
            .filter(|score| (0.0..=100.0).contains(score))
            .unwrap_or(classification.focus_score);

        Summary {
            text: analysis.summary,
            focus_score,
            generated_at: Utc::now(),
            period_label: input.period_label.clone(),
            source: SummarySource::Llm,
            mode: input.mode,
            state,
        }
    }

    /// Deterministic summary from the classification alone.
    fn fallback(&self, input: &CycleInput<'_>) -> Summary {
        let classification = input.classification;
        Summary {
            text: fallback_text(classification, input.timeline),
            focus_score: classification.focus_score,
            generated_at: Utc::now(),
            period_label: input.period_label.clone(),
            source: SummarySource::Fallback,
            mode: input.mode,
            state: classification.state,
        }
    }

    /// One model request with a bounded timeout and no retries. Calls are
    /// spaced by a minimum gap so a burst of cycles cannot hammer a local
    /// model server.
    async fn call_model(
        &self,
        prompt: &str,
        timeout: std::time::Duration,
    ) -> Result<String, EngineError> {
        {
            let mut last = self.last_call.lock().await;
            if let Some(at) = *last {
                let elapsed = at.elapsed();
                if elapsed < self.min_gap {
                    tokio::time::sleep(self.min_gap - elapsed).await;
                }
            }
            *last = Some(tokio::time::Instant::now());
        }

        let payload = serde_json::json!({
            "model": self.model_name,
            "prompt": prompt,
            "system": "You are a concise productivity assistant. Respond with \
                       ONLY valid JSON, no other text. Address the user as you.",
            "stream": false,
            "options": {
                "temperature": self.temperature,
                "num_predict": 300,
            }
        });

        let response = self
            .resources
            .client(Endpoint::Model)
            .post(self.resources.model_url("/api/generate"))
            .json(&payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| EngineError::SummarizerUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EngineError::SummarizerUnavailable(format!(
                "model endpoint returned {}",
                response.status()
            )));
        }

        let envelope: serde_json::Value = response
            .json()
            .await
            .map_err(|e| EngineError::SummarizerUnavailable(format!("envelope parse: {e}")))?;

        envelope
            .get("response")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                EngineError::SummarizerUnavailable("no response field in model output".into())
            })
    }

}

fn accept_daily(
    analysis: ModelAnalysis,
    stats: &DailyStats,
    mode: Mode,
    period_label: String,
) -> Summary {
    let focus_score = analysis
        .focus_score
        .filter(|score| (0.0..=100.0).contains(score))
        .unwrap_or(0.0);
    let state = analysis
        .state
        .as_deref()
        .and_then(|s| s.parse::<ActivityState>().ok())
        .unwrap_or(if stats.total_active_hours > 0.0 {
            ActivityState::Moderate
        } else {
            ActivityState::Afk
        });

    Summary {
        text: analysis.summary,
        focus_score,
        generated_at: Utc::now(),
        period_label,
        source: SummarySource::Llm,
        mode,
        state,
    }
}

/// Strict-then-lenient reply parsing.
///
/// Stage 1 expects the exact JSON shape we asked for. Stage 2 extracts the
/// outermost JSON object from a prose-wrapped reply. A plain-text reply with
/// no JSON at all is accepted verbatim as the summary string. Anything else
/// is a summarizer failure.
fn parse_model_reply(raw: &str) -> Result<ModelAnalysis, EngineError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EngineError::SummarizerUnavailable(
            "model returned an empty reply".into(),
        ));
    }

    if let Ok(analysis) = serde_json::from_str::<ModelAnalysis>(trimmed) {
        return validate_analysis(analysis);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(analysis) = serde_json::from_str::<ModelAnalysis>(&trimmed[start..=end]) {
                return validate_analysis(analysis);
            }
        }
        // JSON-looking but unparseable: not recoverable as plain text.
        return Err(EngineError::SummarizerUnavailable(
            "model reply contained malformed JSON".into(),
        ));
    }

    // No JSON anywhere: take the text itself as the summary, bounded.
    let text: String = trimmed.chars().take(600).collect();
    Ok(ModelAnalysis {
        summary: text,
        state: None,
        focus_score: None,
    })
}

fn validate_analysis(analysis: ModelAnalysis) -> Result<ModelAnalysis, EngineError> {
    if analysis.summary.trim().is_empty() {
        return Err(EngineError::SummarizerUnavailable(
            "model reply had an empty summary".into(),
        ));
    }
    Ok(analysis)
}

/// The cycle prompt: classification, timeline with categories, switch bursts,
/// and the mode's user context.
fn build_cycle_prompt(input: &CycleInput<'_>) -> String {
    let classification = input.classification;

    let timeline: Vec<String> = input
        .timeline
        .iter()
        .rev()
        .take(20)
        .rev()
        .map(|event| {
            let title = if event.title.is_empty() {
                String::new()
            } else {
                format!(" → {}", event.title)
            };
            format!(
                "• {} - {}{} ({:.1}min)",
                event.start.format("%H:%M"),
                event.app,
                title,
                event.duration_minutes()
            )
        })
        .collect();
    let timeline = if timeline.is_empty() {
        "No activity recorded".to_string()
    } else {
        timeline.join("\n")
    };

    let bursts = if input.bursts.is_empty() {
        "None detected".to_string()
    } else {
        input
            .bursts
            .iter()
            .map(|(start, count)| format!("• {} switches starting {}", count, start.format("%H:%M")))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"Analyze the user's recent computer activity. Return ONLY JSON, no other text.

USER CONTEXT: {}

LOCAL METRICS (already computed):
- State: {} | Focus score: {:.0}
- Active: {:.1}min | Work: {:.0}% | Communication: {:.0}% | Distraction: {:.0}%
- Context switches: {}

RAPID SWITCH BURSTS:
{}

ACTIVITY TIMELINE:
{}

Write a concise 2-3 sentence summary naming the key apps and the main
pattern, with one actionable suggestion when focus is slipping.

Return JSON only:
{{
  "summary": "2-3 sentence summary",
  "state": "productive|moderate|chilling|unproductive|afk",
  "focus_score": 0-100
}}"#,
        input.user_context,
        classification.state,
        classification.focus_score,
        classification.active_minutes,
        classification.work_percentage(),
        classification.communication_percentage(),
        classification.distraction_percentage(),
        classification.context_switches,
        bursts,
        timeline,
    )
}

fn build_daily_prompt(stats: &DailyStats, user_context: &str) -> String {
    let top_apps = stats
        .top_apps
        .iter()
        .map(|(app, minutes)| format!("{} ({:.0}m)", app, minutes))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Generate a daily activity summary. Return ONLY JSON, no other text.

USER CONTEXT: {}

ACTIVITY DATA:
- Total active time: {:.1} hours
- Work sessions: {}
- Top applications: {}

Write exactly 3 sentences: overall productivity and time usage, the main
focus areas, and one brief insight or encouragement.

Return JSON only:
{{
  "summary": "3 sentence daily summary"
}}"#,
        user_context, stats.total_active_hours, stats.sessions, top_apps,
    )
}

/// Deterministic cycle summary. This path must never fail.
fn fallback_text(classification: &ClassificationResult, timeline: &[Event]) -> String {
    if classification.state == ActivityState::Afk {
        return "No meaningful activity in this period; you were away from the computer."
            .to_string();
    }

    let mut app_minutes: HashMap<&str, f64> = HashMap::new();
    for event in timeline {
        *app_minutes.entry(event.app.as_str()).or_insert(0.0) += event.duration_minutes();
    }
    let mut top: Vec<(&str, f64)> = app_minutes.into_iter().collect();
    top.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top_apps = top
        .iter()
        .take(3)
        .map(|(app, _)| *app)
        .collect::<Vec<_>>()
        .join(", ");

    let state_phrase = match classification.state {
        ActivityState::Productive => "a focused stretch",
        ActivityState::Moderate => "steady work with some detours",
        ActivityState::Chilling => "a low-key period",
        ActivityState::Unproductive => "mostly distractions",
        ActivityState::Afk => unreachable!("handled above"),
    };

    let apps_part = if top_apps.is_empty() {
        String::new()
    } else {
        format!(" Most time went to {top_apps}.")
    };

    format!(
        "You spent {:.0}% of the period on productive work, {:.0}% communicating, \
         and {:.0}% on distractions: {}.{}",
        classification.work_percentage(),
        classification.communication_percentage(),
        classification.distraction_percentage(),
        state_phrase,
        apps_part,
    )
}

fn daily_fallback_text(stats: &DailyStats) -> String {
    if stats.total_active_hours <= 0.0 {
        return "No recorded activity today.".to_string();
    }
    let top_apps = stats
        .top_apps
        .iter()
        .map(|(app, _)| app.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "You were active for {:.1} hours across {} sessions. Your top applications \
         were: {}.",
        stats.total_active_hours, stats.sessions, top_apps,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn sample_classification() -> ClassificationResult {
        ClassificationResult {
            work_minutes: 40.0,
            communication_minutes: 10.0,
            distraction_minutes: 10.0,
            active_minutes: 60.0,
            focus_score: 72.0,
            state: ActivityState::Moderate,
            context_switches: 6,
        }
    }

    fn test_summarizer() -> Summarizer {
        let mut config = Config::default();
        config.model_port = 1; // nothing listens here
        config.min_model_gap_secs = 0;
        let resources = Arc::new(ResourceManager::new(&config));
        Summarizer::new(resources, &config)
    }

    #[test]
    fn test_parse_strict_json() {
        let raw = r#"{"summary": "Solid coding session.", "state": "productive", "focus_score": 82}"#;
        let analysis = parse_model_reply(raw).unwrap();
        assert_eq!(analysis.summary, "Solid coding session.");
        assert_eq!(analysis.state.as_deref(), Some("productive"));
        assert_eq!(analysis.focus_score, Some(82.0));
    }

    #[test]
    fn test_parse_prose_wrapped_json() {
        let raw = "Here is the analysis:\n{\"summary\": \"Mostly email.\"}\nHope that helps!";
        let analysis = parse_model_reply(raw).unwrap();
        assert_eq!(analysis.summary, "Mostly email.");
    }

    #[test]
    fn test_parse_plain_text_recovers_summary() {
        let analysis = parse_model_reply("You mostly worked in your editor today.").unwrap();
        assert_eq!(analysis.summary, "You mostly worked in your editor today.");
        assert!(analysis.state.is_none());
    }

    #[test]
    fn test_parse_malformed_json_fails() {
        assert!(parse_model_reply("{\"summary\": ").is_err());
        assert!(parse_model_reply("").is_err());
        assert!(parse_model_reply("   ").is_err());
    }

    #[test]
    fn test_out_of_range_model_values_keep_local_classification() {
        let summarizer = test_summarizer();
        let classification = sample_classification();
        let input = CycleInput {
            classification: &classification,
            timeline: &[],
            bursts: &[],
            mode: Mode::Chill,
            user_context: "test",
            period_label: "10:00-11:00".to_string(),
        };
        let analysis = ModelAnalysis {
            summary: "ok".to_string(),
            state: Some("hyperfocus".to_string()), // not a valid state
            focus_score: Some(250.0),              // out of range
        };
        let summary = summarizer.accept(&input, analysis);
        assert_eq!(summary.state, ActivityState::Moderate);
        assert_eq!(summary.focus_score, 72.0);
        assert_eq!(summary.source, SummarySource::Llm);
    }

    #[test]
    fn test_fallback_text_mentions_split_and_apps() {
        let classification = sample_classification();
        let timeline = vec![event("editor", 0, 40), event("slack", 40, 10)];
        let text = fallback_text(&classification, &timeline);
        assert!(text.contains("67%"));
        assert!(text.contains("editor"));
    }

    #[test]
    fn test_fallback_afk_text() {
        let text = fallback_text(&ClassificationResult::afk(), &[]);
        assert!(text.contains("away from the computer"));
    }

    #[tokio::test]
    async fn test_unreachable_model_falls_back() {
        let summarizer = test_summarizer();
        let classification = sample_classification();
        let input = CycleInput {
            classification: &classification,
            timeline: &[],
            bursts: &[],
            mode: Mode::Study,
            user_context: "test",
            period_label: "10:00-10:05".to_string(),
        };
        let summary = summarizer.summarize(&input).await;
        assert_eq!(summary.source, SummarySource::Fallback);
        assert_eq!(summary.state, ActivityState::Moderate);
        assert_eq!(summary.focus_score, 72.0);
    }

    #[tokio::test]
    async fn test_afk_skips_model_entirely() {
        let summarizer = test_summarizer();
        let classification = ClassificationResult::afk();
        let input = CycleInput {
            classification: &classification,
            timeline: &[],
            bursts: &[],
            mode: Mode::Ghost,
            user_context: "test",
            period_label: "10:00-11:00".to_string(),
        };
        let summary = summarizer.summarize(&input).await;
        assert_eq!(summary.source, SummarySource::Fallback);
        assert_eq!(summary.state, ActivityState::Afk);
        assert_eq!(summary.focus_score, 0.0);
    }

    #[test]
    fn test_daily_stats_sessions_and_top_apps() {
        let events = vec![
            event("editor", 0, 30),
            event("slack", 30, 10),
            // 20 minute gap -> new session
            event("editor", 60, 60),
        ];
        let stats = DailyStats::from_events(&events);
        assert_eq!(stats.sessions, 2);
        assert!((stats.total_active_hours - 100.0 / 60.0).abs() < 0.01);
        assert_eq!(stats.top_apps[0].0, "editor");
        assert_eq!(stats.top_apps[0].1, 90.0);
    }

    #[test]
    fn test_daily_fallback_text() {
        let stats = DailyStats {
            total_active_hours: 4.2,
            sessions: 3,
            top_apps: vec![("editor".to_string(), 120.0), ("slack".to_string(), 60.0)],
        };
        let text = daily_fallback_text(&stats);
        assert!(text.contains("4.2 hours"));
        assert!(text.contains("3 sessions"));
        assert!(text.contains("editor"));

        assert_eq!(
            daily_fallback_text(&DailyStats::from_events(&[])),
            "No recorded activity today."
        );
    }

    #[test]
    fn test_cycle_prompt_embeds_context_and_timeline() {
        let classification = sample_classification();
        let timeline = vec![event("editor", 0, 40)];
        let bursts = vec![(ts(0), 5)];
        let input = CycleInput {
            classification: &classification,
            timeline: &timeline,
            bursts: &bursts,
            mode: Mode::Study,
            user_context: "Currently studying: compilers.",
            period_label: "10:00-10:05".to_string(),
        };
        let prompt = build_cycle_prompt(&input);
        assert!(prompt.contains("Currently studying: compilers."));
        assert!(prompt.contains("editor"));
        assert!(prompt.contains("5 switches"));
        assert!(prompt.contains("Return JSON only"));
    }
}
