//! Category store: app name → category and productivity score.
//!
//! Lookups never fail; unknown apps get a synthesized `uncategorized` entry
//! with a neutral score, which is never persisted. Updates are validated and
//! bulk updates are all-or-nothing under a single write lock, so an in-flight
//! classification sees either the pre-update or the fully-updated store.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

/// Default score for apps nothing knows about.
pub const DEFAULT_SCORE: u8 = 50;

/// Category record for one app. `app_name` is the unique key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub app_name: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    pub productivity_score: u8,
}

impl Category {
    fn uncategorized(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            category: "uncategorized".to_string(),
            subcategory: None,
            productivity_score: DEFAULT_SCORE,
        }
    }
}

/// Immutable snapshot of the store, taken under one read lock. Cycles resolve
/// categories against a snapshot so a concurrent bulk update can never show
/// them a half-applied batch.
#[derive(Debug, Clone)]
pub struct CategoryView {
    entries: HashMap<String, Category>,
}

impl CategoryView {
    /// Resolve an app to its category; synthesizes a default on miss.
    pub fn resolve(&self, app_name: &str) -> Category {
        resolve_in(&self.entries, app_name)
    }
}

fn resolve_in(entries: &HashMap<String, Category>, app_name: &str) -> Category {
    let key = app_name.trim().to_lowercase();
    if let Some(found) = entries.get(&key) {
        return found.clone();
    }
    // Partial match, then pattern heuristics, before giving up.
    if let Some(found) = entries
        .iter()
        .find(|(known, _)| key.contains(known.as_str()))
        .map(|(_, c)| c)
    {
        let mut category = found.clone();
        category.app_name = key;
        return category;
    }
    if let Some(category) = pattern_category(&key) {
        return category;
    }
    Category::uncategorized(&key)
}

/// Substring heuristics for apps missing from the store.
fn pattern_category(app: &str) -> Option<Category> {
    let entry = |category: &str, subcategory: &str, score: u8| {
        Some(Category {
            app_name: app.to_string(),
            category: category.to_string(),
            subcategory: Some(subcategory.to_string()),
            productivity_score: score,
        })
    };

    if app.contains("game") || app.contains("play") {
        return entry("entertainment", "gaming", 10);
    }
    if app.contains("code") || app.contains("studio") || app.contains("ide") {
        return entry("development", "ide", 90);
    }
    if app.contains("chat") || app.contains("messenger") {
        return entry("communication", "chat", 40);
    }
    if app.contains("browser") {
        return entry("productivity", "browser", 60);
    }
    None
}

/// Built-in seed for common apps, so a fresh install classifies sensibly
/// before anyone curates the store.
fn default_entries() -> Vec<Category> {
    let entry = |app: &str, category: &str, sub: &str, score: u8| Category {
        app_name: app.to_string(),
        category: category.to_string(),
        subcategory: Some(sub.to_string()),
        productivity_score: score,
    };

    vec![
        entry("code", "development", "ide", 95),
        entry("devenv", "development", "ide", 95),
        entry("intellij", "development", "ide", 95),
        entry("windowsterminal", "development", "terminal", 85),
        entry("cmd", "development", "terminal", 80),
        entry("powershell", "development", "terminal", 80),
        entry("chrome", "productivity", "browser", 60),
        entry("firefox", "productivity", "browser", 60),
        entry("brave", "productivity", "browser", 60),
        entry("edge", "productivity", "browser", 60),
        entry("obsidian", "productivity", "notes", 85),
        entry("notion", "productivity", "notes", 85),
        entry("todoist", "productivity", "tasks", 90),
        entry("outlook", "work", "email", 70),
        entry("excel", "work", "office", 80),
        entry("word", "work", "office", 80),
        entry("powerpoint", "work", "office", 70),
        entry("discord", "communication", "chat", 40),
        entry("slack", "communication", "chat", 50),
        entry("teams", "communication", "chat", 50),
        entry("zoom", "communication", "video", 60),
        entry("explorer", "system", "file_manager", 50),
        entry("taskmgr", "system", "utility", 50),
        entry("steam", "entertainment", "gaming", 10),
        entry("spotify", "entertainment", "music", 30),
        entry("vlc", "entertainment", "video", 20),
    ]
}

/// Shared, lock-guarded category store.
pub struct CategoryStore {
    entries: RwLock<HashMap<String, Category>>,
}

impl CategoryStore {
    /// An empty store (unknown apps resolve to the synthesized default).
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// A store seeded with the built-in defaults.
    pub fn with_defaults() -> Self {
        let entries = default_entries()
            .into_iter()
            .map(|c| (c.app_name.clone(), c))
            .collect();
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Resolve one app. Never fails; the synthesized default is not stored.
    pub async fn lookup(&self, app_name: &str) -> Category {
        let entries = self.entries.read().await;
        resolve_in(&entries, app_name)
    }

    /// Snapshot for use inside a classification cycle.
    pub async fn view(&self) -> CategoryView {
        let entries = self.entries.read().await;
        CategoryView {
            entries: entries.clone(),
        }
    }

    /// Insert or replace one record. Last writer wins.
    pub async fn update(&self, record: Category) -> Result<(), EngineError> {
        let record = validate(record)?;
        let mut entries = self.entries.write().await;
        entries.insert(record.app_name.clone(), record);
        Ok(())
    }

    /// Apply a batch atomically: either every record validates and all are
    /// applied, or the store is left untouched.
    pub async fn bulk_update(&self, records: Vec<Category>) -> Result<usize, EngineError> {
        let mut validated = Vec::with_capacity(records.len());
        for record in records {
            validated.push(validate(record)?);
        }

        let applied = validated.len();
        let mut entries = self.entries.write().await;
        for record in validated {
            entries.insert(record.app_name.clone(), record);
        }
        Ok(applied)
    }

    /// All records, sorted by app name.
    pub async fn all(&self) -> Vec<Category> {
        let entries = self.entries.read().await;
        let mut records: Vec<Category> = entries.values().cloned().collect();
        records.sort_by(|a, b| a.app_name.cmp(&b.app_name));
        records
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Load records from a JSON list file, replacing current contents.
    pub async fn load(&self, path: &Path) -> Result<usize, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("read {path:?}: {e}")))?;
        let records: Vec<Category> = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("parse {path:?}: {e}")))?;

        let mut validated = HashMap::with_capacity(records.len());
        for record in records {
            let record = validate(record)?;
            validated.insert(record.app_name.clone(), record);
        }

        let count = validated.len();
        let mut entries = self.entries.write().await;
        *entries = validated;
        Ok(count)
    }

    /// Persist all records as a JSON list.
    pub async fn save(&self, path: &Path) -> Result<(), EngineError> {
        let records = self.all().await;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::Config(e.to_string()))?;
        }
        let content = serde_json::to_string_pretty(&records)
            .map_err(|e| EngineError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| EngineError::Config(e.to_string()))
    }
}

impl Default for CategoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn validate(mut record: Category) -> Result<Category, EngineError> {
    record.app_name = record.app_name.trim().to_lowercase();
    if record.app_name.is_empty() {
        return Err(EngineError::Validation("app_name must not be empty".into()));
    }
    if record.category.trim().is_empty() {
        return Err(EngineError::Validation("category must not be empty".into()));
    }
    if record.productivity_score > 100 {
        return Err(EngineError::Validation(format!(
            "productivity_score {} out of range 0-100 for {}",
            record.productivity_score, record.app_name
        )));
    }
    Ok(record)
}
