//! Per-phase message history scoped to a `{jobId, runId, taskId, taskKey, role}`
//! tuple. Lanes are append-only: nothing is ever removed or reordered once
//! written, matching the ordering guarantees in the pipeline's concurrency
//! model (lane appends happen strictly in phase order).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Role a lane is scoped to (maps 1:1 onto a pipeline phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneRole {
    Context,
    Architect,
    Builder,
    Critic,
    Research,
}

impl std::fmt::Display for LaneRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaneRole::Context => write!(f, "context"),
            LaneRole::Architect => write!(f, "architect"),
            LaneRole::Builder => write!(f, "builder"),
            LaneRole::Critic => write!(f, "critic"),
            LaneRole::Research => write!(f, "research"),
        }
    }
}

/// Stable, deterministic identity for a lane: `hash(jobId, runId, taskId, taskKey, role)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LaneId(pub String);

impl LaneId {
    pub fn new(job_id: &str, run_id: &str, task_id: &str, task_key: &str, role: LaneRole) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(job_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(run_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(task_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(task_key.as_bytes());
        hasher.update(b"\0");
        hasher.update(role.to_string().as_bytes());
        let digest = hasher.finalize();
        LaneId(hex::encode(&digest[..16]))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaneMessage {
    pub seq: u64,
    pub author: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lane {
    pub id: LaneId,
    pub role: LaneRole,
    messages: Vec<LaneMessage>,
}

impl Lane {
    fn new(id: LaneId, role: LaneRole) -> Self {
        Self { id, role, messages: Vec::new() }
    }

    /// Append-only write. Returns the sequence number assigned to the message.
    pub fn append(&mut self, author: &str, content: impl Into<String>) -> u64 {
        let seq = self.messages.len() as u64;
        self.messages.push(LaneMessage {
            seq,
            author: author.to_string(),
            content: content.into(),
        });
        seq
    }

    pub fn messages(&self) -> &[LaneMessage] {
        &self.messages
    }

    pub fn last(&self) -> Option<&LaneMessage> {
        self.messages.last()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Render the lane as a flat transcript, oldest first.
    pub fn render(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("[{}] {}", m.author, m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// The `{jobId, runId, taskId, taskKey}` identity a single pipeline run
/// shares across all five of its lanes; only `role` varies per phase.
#[derive(Debug, Clone)]
pub struct LaneKey {
    pub job_id: String,
    pub run_id: String,
    pub task_id: String,
    pub task_key: String,
}

impl LaneKey {
    pub fn new(job_id: impl Into<String>, run_id: impl Into<String>, task_id: impl Into<String>, task_key: impl Into<String>) -> Self {
        Self { job_id: job_id.into(), run_id: run_id.into(), task_id: task_id.into(), task_key: task_key.into() }
    }
}

/// Owns every lane for a single pipeline run. Never shared mutable graph --
/// each lane is looked up by its deterministic id and mutated in place.
#[derive(Debug, Default, Clone)]
pub struct LaneStore {
    lanes: HashMap<LaneId, Lane>,
}

impl LaneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lane_mut(&mut self, job_id: &str, run_id: &str, task_id: &str, task_key: &str, role: LaneRole) -> &mut Lane {
        let id = LaneId::new(job_id, run_id, task_id, task_key, role);
        self.lanes.entry(id.clone()).or_insert_with(|| Lane::new(id, role))
    }

    pub fn lane(&self, job_id: &str, run_id: &str, task_id: &str, task_key: &str, role: LaneRole) -> Option<&Lane> {
        let id = LaneId::new(job_id, run_id, task_id, task_key, role);
        self.lanes.get(&id)
    }

    /// Append to the lane identified by `key` + `role`, creating it on first use.
    pub fn append(&mut self, key: &LaneKey, role: LaneRole, author: &str, content: impl Into<String>) -> u64 {
        self.lane_mut(&key.job_id, &key.run_id, &key.task_id, &key.task_key, role).append(author, content)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lane_id_is_stable_and_role_sensitive() {
        let a = LaneId::new("job", "run", "task", "key", LaneRole::Architect);
        let b = LaneId::new("job", "run", "task", "key", LaneRole::Architect);
        let c = LaneId::new("job", "run", "task", "key", LaneRole::Builder);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn appends_are_ordered_and_retained() {
        let mut store = LaneStore::new();
        let lane = store.lane_mut("j", "r", "t", "k", LaneRole::Architect);
        lane.append("architect", "first");
        lane.append("pipeline", "second");
        assert_eq!(lane.messages().len(), 2);
        assert_eq!(lane.messages()[0].seq, 0);
        assert_eq!(lane.messages()[1].seq, 1);
        assert_eq!(lane.last().unwrap().content, "second");
    }

    #[test]
    fn lookup_without_mut_returns_none_before_creation() {
        let store = LaneStore::new();
        assert!(store.lane("j", "r", "t", "k", LaneRole::Critic).is_none());
    }

    #[test]
    fn lane_key_append_reaches_the_same_lane_as_manual_lookup() {
        let key = LaneKey::new("j", "r", "t", "k");
        let mut store = LaneStore::new();
        store.append(&key, LaneRole::Builder, "builder", "patch applied");
        let lane = store.lane("j", "r", "t", "k", LaneRole::Builder).unwrap();
        assert_eq!(lane.messages().len(), 1);
        assert_eq!(lane.last().unwrap().content, "patch applied");
    }
}
