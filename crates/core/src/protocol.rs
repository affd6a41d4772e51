//! Cross-phase message protocol: the fenced blocks appended to lane history
//! verbatim. Each block is `<TAG> v1\n<json>` -- round-tripping is a pure
//! serde encode/decode, no custom grammar.

use serde::{Deserialize, Serialize};
use serde_json::Value;

const AGENT_REQUEST_TAG: &str = "AGENT_REQUEST v1";
const CODALI_RESPONSE_TAG: &str = "CODALI_RESPONSE v1";
const GBFN_MEMORY_TAG: &str = "GBFN MEMORY v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "need", rename_all = "snake_case")]
pub enum AgentNeed {
    #[serde(rename = "docdex.search")]
    DocdexSearch { query: String, limit: Option<usize> },
    #[serde(rename = "docdex.open")]
    DocdexOpen { path: String },
    #[serde(rename = "docdex.snippet")]
    DocdexSnippet { path: String, doc_id: Option<String> },
    #[serde(rename = "docdex.symbols")]
    DocdexSymbols { path: String },
    #[serde(rename = "docdex.ast")]
    DocdexAst { path: String },
    #[serde(rename = "docdex.impact")]
    DocdexImpact { file: String },
    #[serde(rename = "docdex.impact_diagnostics")]
    DocdexImpactDiagnostics { file: String },
    #[serde(rename = "file.list")]
    FileList { dir: Option<String> },
    #[serde(rename = "file.read")]
    FileRead { path: String },
    #[serde(rename = "docdex.web")]
    DocdexWeb { query: String },
}

impl AgentNeed {
    pub fn tag(&self) -> &'static str {
        match self {
            AgentNeed::DocdexSearch { .. } => "docdex.search",
            AgentNeed::DocdexOpen { .. } => "docdex.open",
            AgentNeed::DocdexSnippet { .. } => "docdex.snippet",
            AgentNeed::DocdexSymbols { .. } => "docdex.symbols",
            AgentNeed::DocdexAst { .. } => "docdex.ast",
            AgentNeed::DocdexImpact { .. } => "docdex.impact",
            AgentNeed::DocdexImpactDiagnostics { .. } => "docdex.impact_diagnostics",
            AgentNeed::FileList { .. } => "file.list",
            AgentNeed::FileRead { .. } => "file.read",
            AgentNeed::DocdexWeb { .. } => "docdex.web",
        }
    }

    /// Queries this need contributes toward the bundle's derived query set.
    pub fn as_query(&self) -> Option<&str> {
        match self {
            AgentNeed::DocdexSearch { query, .. } => Some(query),
            AgentNeed::DocdexWeb { query } => Some(query),
            _ => None,
        }
    }

    /// Paths this need references (used to derive `preferredFiles` on refresh).
    pub fn as_path(&self) -> Option<&str> {
        match self {
            AgentNeed::DocdexOpen { path } => Some(path),
            AgentNeed::DocdexSnippet { path, .. } => Some(path),
            AgentNeed::DocdexSymbols { path } => Some(path),
            AgentNeed::DocdexAst { path } => Some(path),
            AgentNeed::FileRead { path } => Some(path),
            AgentNeed::DocdexImpact { file } => Some(file),
            AgentNeed::DocdexImpactDiagnostics { file } => Some(file),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    pub version: u32,
    pub role: String,
    pub request_id: String,
    pub needs: Vec<AgentNeed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
}

impl AgentRequest {
    pub fn new(role: &str, request_id: &str, needs: Vec<AgentNeed>) -> Self {
        Self { version: 1, role: role.to_string(), request_id: request_id.to_string(), needs, context: None }
    }

    /// Two requests have the same "shape" when they carry the same set of
    /// need tags + paths/queries, independent of request_id. Used by the
    /// architect loop to detect a repeated request (triggers `alternateHintPending`).
    pub fn same_shape(&self, other: &AgentRequest) -> bool {
        if self.needs.len() != other.needs.len() {
            return false;
        }
        let mut a: Vec<String> = self.needs.iter().map(describe_need).collect();
        let mut b: Vec<String> = other.needs.iter().map(describe_need).collect();
        a.sort();
        b.sort();
        a == b
    }

    pub fn to_lane_text(&self) -> String {
        format!("{AGENT_REQUEST_TAG}\n{}", serde_json::to_string_pretty(self).unwrap_or_default())
    }

    pub fn from_lane_text(text: &str) -> Option<Self> {
        let body = text.strip_prefix(AGENT_REQUEST_TAG)?.trim_start();
        serde_json::from_str(body).ok()
    }
}

fn describe_need(need: &AgentNeed) -> String {
    format!(
        "{}:{}",
        need.tag(),
        need.as_path().or_else(|| need.as_query()).unwrap_or("")
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeedResult {
    pub need: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodaliResponse {
    pub version: u32,
    pub request_id: String,
    pub results: Vec<NeedResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl CodaliResponse {
    pub fn new(request_id: &str, results: Vec<NeedResult>) -> Self {
        Self { version: 1, request_id: request_id.to_string(), results, meta: None }
    }

    pub fn to_lane_text(&self) -> String {
        format!("{CODALI_RESPONSE_TAG}\n{}", serde_json::to_string_pretty(self).unwrap_or_default())
    }

    pub fn from_lane_text(text: &str) -> Option<Self> {
        let body = text.strip_prefix(CODALI_RESPONSE_TAG)?.trim_start();
        serde_json::from_str(body).ok()
    }

    pub fn all_ok(&self) -> bool {
        self.results.iter().all(|r| r.ok)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryRelation {
    pub subject: String,
    pub predicate: String,
    pub object: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MemoryFacts {
    pub facts: Vec<String>,
    pub relations: Vec<MemoryRelation>,
    pub ttl: u64,
}

/// Only emitted for research summaries (deep-mode), never for ordinary turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GbfnMemory {
    pub memory: MemoryFacts,
}

impl GbfnMemory {
    pub fn to_lane_text(&self) -> String {
        format!("{GBFN_MEMORY_TAG}\n{}", serde_json::to_string_pretty(self).unwrap_or_default())
    }

    pub fn from_lane_text(text: &str) -> Option<Self> {
        let body = text.strip_prefix(GBFN_MEMORY_TAG)?.trim_start();
        serde_json::from_str(body).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_request_round_trips_through_lane_text() {
        let req = AgentRequest::new(
            "architect",
            "req-1",
            vec![AgentNeed::DocdexSearch { query: "greeting".into(), limit: Some(5) }],
        );
        let text = req.to_lane_text();
        assert!(text.starts_with(AGENT_REQUEST_TAG));
        let parsed = AgentRequest::from_lane_text(&text).unwrap();
        assert_eq!(parsed.request_id, "req-1");
        assert_eq!(parsed.needs.len(), 1);
    }

    #[test]
    fn same_shape_ignores_request_id() {
        let a = AgentRequest::new("architect", "a", vec![AgentNeed::FileRead { path: "src/x.rs".into() }]);
        let b = AgentRequest::new("architect", "b", vec![AgentNeed::FileRead { path: "src/x.rs".into() }]);
        assert!(a.same_shape(&b));
    }

    #[test]
    fn different_paths_are_not_same_shape() {
        let a = AgentRequest::new("architect", "a", vec![AgentNeed::FileRead { path: "src/x.rs".into() }]);
        let b = AgentRequest::new("architect", "b", vec![AgentNeed::FileRead { path: "src/y.rs".into() }]);
        assert!(!a.same_shape(&b));
    }

    #[test]
    fn codali_response_round_trips() {
        let resp = CodaliResponse::new(
            "req-1",
            vec![NeedResult { need: "docdex.search".into(), ok: true, data: Some(serde_json::json!({"hits": []})), error: None }],
        );
        let text = resp.to_lane_text();
        let parsed = CodaliResponse::from_lane_text(&text).unwrap();
        assert!(parsed.all_ok());
    }
}
