//! Result database: finished generations saved as JSON files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::{Example, Prompt};

/// One finished generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub id: String,
    pub created_at: String,
    pub supply: String,
    pub model: String,
    pub prompts: Vec<Prompt>,
    #[serde(default)]
    pub examples: Vec<Example>,
    pub replies: Vec<String>,
}

impl GenerationRecord {
    pub fn new(supply: &str, model: &str, prompts: Vec<Prompt>, examples: Vec<Example>) -> Self {
        Self {
            id: generate_record_id(),
            created_at: now_timestamp(),
            supply: supply.to_string(),
            model: model.to_string(),
            prompts,
            examples,
            replies: Vec::new(),
        }
    }
}

pub fn generate_record_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

pub fn now_timestamp() -> String {
    chrono::Local::now().to_rfc3339()
}

pub struct ResultDatabase {
    dir: PathBuf,
}

impl ResultDatabase {
    /// Open (creating if needed) the database directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create results directory: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn save(&self, record: &GenerationRecord) -> Result<PathBuf> {
        let path = self.path_for(&record.id);
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write result: {}", path.display()))?;
        Ok(path)
    }

    pub fn load(&self, id: &str) -> Result<GenerationRecord> {
        let path = self.path_for(id);
        let content =
            std::fs::read_to_string(&path).with_context(|| format!("Result '{}' not found", id))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse result: {}", path.display()))?;
        Ok(record)
    }

    /// All readable records, newest first. Unparseable files are skipped.
    pub fn list(&self) -> Result<Vec<GenerationRecord>> {
        let mut records = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if let Ok(record) = serde_json::from_str::<GenerationRecord>(&content) {
                        records.push(record);
                    }
                }
            }
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(created_at: &str) -> GenerationRecord {
        let mut record = GenerationRecord::new(
            "Slack",
            "claude",
            vec![Prompt::new("", "write a function")],
            vec![Example::new("", "print('hi')")],
        );
        record.created_at = created_at.to_string();
        record.replies = vec!["def f(): pass".to_string()];
        record
    }

    #[test]
    fn test_generate_record_id() {
        assert_eq!(generate_record_id().len(), 8);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let db = ResultDatabase::open(dir.path().join("results")).unwrap();
        let saved = record("2026-01-01T00:00:00+00:00");
        let path = db.save(&saved).unwrap();
        assert!(path.exists());

        let loaded = db.load(&saved.id).unwrap();
        assert_eq!(loaded.supply, "Slack");
        assert_eq!(loaded.replies, vec!["def f(): pass"]);
        assert_eq!(loaded.examples[0].content, "print('hi')");
    }

    #[test]
    fn test_list_newest_first_and_skips_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let db = ResultDatabase::open(dir.path()).unwrap();
        db.save(&record("2026-01-01T00:00:00+00:00")).unwrap();
        db.save(&record("2026-03-01T00:00:00+00:00")).unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();

        let records = db.list().unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].created_at > records[1].created_at);
    }

    #[test]
    fn test_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let db = ResultDatabase::open(dir.path()).unwrap();
        assert!(db.load("nope").is_err());
    }
}
