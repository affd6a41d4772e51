//! `MemoryWriteback`: persists a run's outcome into the project's
//! auto-memory, appending under a `smart-pipeline` topic via
//! `memory::write_topic`. On FAIL, the lesson is the critic's joined
//! reasons; on PASS, only detected preferences are written (nothing is
//! written for an uneventful successful run).

use std::path::Path;

use anyhow::Result;
use chrono::Utc;

use crate::memory;

const TOPIC: &str = "smart-pipeline";

#[derive(Debug, Clone, Default)]
pub struct WritebackInput {
    pub failures: Vec<String>,
    pub max_retries: u32,
    pub lesson: Option<String>,
    pub preferences: Vec<String>,
}

pub struct MemoryWriteback;

impl MemoryWriteback {
    pub fn persist(root: &Path, input: &WritebackInput) -> Result<Option<String>> {
        if let Some(lesson) = &input.lesson {
            let entry = render_failure_entry(lesson, &input.failures, input.max_retries);
            memory::write_topic(root, TOPIC, &entry, false)?;
            return Ok(Some(entry));
        }

        if !input.preferences.is_empty() {
            let entry = render_preferences_entry(&input.preferences);
            memory::write_topic(root, TOPIC, &entry, false)?;
            return Ok(Some(entry));
        }

        Ok(None)
    }
}

fn render_failure_entry(lesson: &str, failures: &[String], max_retries: u32) -> String {
    format!(
        "\n## Run failed at {}\n\n- lesson: {}\n- retries exhausted: {}/{}\n- failures:\n{}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        lesson,
        max_retries,
        max_retries,
        failures.iter().map(|f| format!("  - {f}")).collect::<Vec<_>>().join("\n")
    )
}

fn render_preferences_entry(preferences: &[String]) -> String {
    format!(
        "\n## Detected preferences at {}\n\n{}\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S"),
        preferences.iter().map(|p| format!("- {p}")).collect::<Vec<_>>().join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persists_failure_lesson_on_fail() {
        let dir = tempdir().unwrap();
        let input = WritebackInput {
            failures: vec!["verification_not_exercised".to_string()],
            max_retries: 3,
            lesson: Some("verification_not_exercised".to_string()),
            preferences: vec![],
        };
        let entry = MemoryWriteback::persist(dir.path(), &input).unwrap();
        assert!(entry.is_some());
        let content = memory::read_topic(dir.path(), "smart-pipeline").unwrap();
        assert!(content.contains("verification_not_exercised"));
    }

    #[test]
    fn persists_preferences_on_pass() {
        let dir = tempdir().unwrap();
        let input = WritebackInput { failures: vec![], max_retries: 3, lesson: None, preferences: vec!["prefers tabs".to_string()] };
        let entry = MemoryWriteback::persist(dir.path(), &input).unwrap();
        assert!(entry.is_some());
    }

    #[test]
    fn writes_nothing_on_uneventful_pass() {
        let dir = tempdir().unwrap();
        let input = WritebackInput::default();
        let entry = MemoryWriteback::persist(dir.path(), &input).unwrap();
        assert!(entry.is_none());
        assert!(memory::read_topic(dir.path(), "smart-pipeline").is_err());
    }
}
