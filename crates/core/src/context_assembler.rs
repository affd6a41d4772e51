//! `ContextAssembler`: builds a `ContextBundle` from a request, the
//! `RepoIndex`, and prior memory. The bundle is the hand-off every
//! downstream phase (architect, builder, critic) consumes; once built it is
//! treated as immutable until the pipeline explicitly rebinds the slot on a
//! refresh.

use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::repo_index::{AstNode, Impact, RepoIndex, Symbol};
use crate::protocol::{AgentNeed, AgentRequest, CodaliResponse, NeedResult};

pub const SKELETON_MARKER: &str = "/* ... skeletonized: body omitted ... */";
pub const TRUNCATION_MARKER: &str = "\n/* ... truncated: byte budget exceeded ... */";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub path: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub locator: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileRole {
    Focus,
    Periphery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub role: FileRole,
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Selection {
    pub focus: Vec<String>,
    pub periphery: Vec<String>,
    pub all: Vec<String>,
    pub low_confidence: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Redaction {
    pub count: usize,
    pub ignored: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializedMode {
    BundleText,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Audience {
    Librarian,
    Builder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Serialized {
    pub mode: SerializedMode,
    pub audience: Audience,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSummary {
    pub cycles: u32,
    pub tool_calls: usize,
    pub evidence_gate_met: bool,
    pub facts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub queries: Vec<String>,
    pub search_results: Vec<QueryResult>,
    pub snippets: Vec<Snippet>,
    pub symbols: HashMap<String, Vec<Symbol>>,
    pub ast: HashMap<String, Vec<AstNode>>,
    pub impact: HashMap<String, Impact>,
    pub selection: Selection,
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub repo_map: Option<String>,
    #[serde(default)]
    pub repo_map_raw: Option<String>,
    #[serde(default)]
    pub research: Option<ResearchSummary>,
    pub memory: String,
    pub profile: String,
    pub warnings: BTreeSet<String>,
    pub serialized: Serialized,
    pub redaction: Redaction,
}

impl ContextBundle {
    /// `selection.focus ⊆ selection.all` and every `files` path is in `selection.all`.
    pub fn check_invariants(&self) -> Result<(), String> {
        for f in &self.selection.focus {
            if !self.selection.all.contains(f) {
                return Err(format!("focus path {f} missing from selection.all"));
            }
        }
        for entry in &self.files {
            if !self.selection.all.contains(&entry.path) {
                return Err(format!("files entry {} missing from selection.all", entry.path));
            }
        }
        Ok(())
    }

    pub fn known_paths(&self) -> Vec<String> {
        self.selection.all.clone()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    pub additional_queries: Vec<String>,
    pub preferred_files: Vec<String>,
    pub recent_files: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_files: usize,
    pub max_total_bytes: usize,
    pub focus_max_file_bytes: usize,
    pub periphery_max_bytes: usize,
    pub token_budget: usize,
    pub include_repo_map: bool,
    pub include_impact: bool,
    pub include_snippets: bool,
    pub skeletonize_large_files: bool,
    pub redact_secrets: bool,
    pub ignore_files_from: Vec<String>,
    pub redact_patterns: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_files: 20,
            max_total_bytes: 400_000,
            focus_max_file_bytes: 40_000,
            periphery_max_bytes: 8_000,
            token_budget: 120_000,
            include_repo_map: true,
            include_impact: true,
            include_snippets: true,
            skeletonize_large_files: true,
            redact_secrets: true,
            ignore_files_from: Vec::new(),
            redact_patterns: default_redact_patterns(),
        }
    }
}

fn default_redact_patterns() -> Vec<String> {
    vec![
        r#"(?i)api[_-]?key\s*[:=]\s*["']?[A-Za-z0-9_\-]{16,}"#.to_string(),
        r#"(?i)secret\s*[:=]\s*["']?[A-Za-z0-9_\-]{16,}"#.to_string(),
        r#"-----BEGIN [A-Z ]*PRIVATE KEY-----"#.to_string(),
    ]
}

pub struct ContextAssembler {
    index: Arc<dyn RepoIndex>,
    config: ContextConfig,
    project_root: PathBuf,
    memory_text: String,
    profile_text: String,
}

impl ContextAssembler {
    pub fn new(index: Arc<dyn RepoIndex>, config: ContextConfig, project_root: PathBuf) -> Self {
        Self { index, config, project_root, memory_text: String::new(), profile_text: String::new() }
    }

    pub fn with_memory(mut self, memory_text: String, profile_text: String) -> Self {
        self.memory_text = memory_text;
        self.profile_text = profile_text;
        self
    }

    pub async fn assemble(&self, request: &str, opts: Option<AssembleOptions>) -> ContextBundle {
        let opts = opts.unwrap_or_default();
        let mut warnings = BTreeSet::new();

        let queries = derive_queries(request, &opts.additional_queries);

        let mut search_results = Vec::new();
        let mut ranked_hits: Vec<SearchHit> = Vec::new();
        for query in &queries {
            match self.index.search(query, 10).await {
                Ok(hits) => {
                    let mapped: Vec<SearchHit> = hits
                        .into_iter()
                        .map(|h| SearchHit { path: h.path, doc_id: h.doc_id, score: h.score })
                        .collect();
                    ranked_hits.extend(mapped.clone());
                    search_results.push(QueryResult { query: query.clone(), hits: mapped });
                }
                Err(e) => {
                    warnings.insert(format!("docdex_search_failed:{e}"));
                    search_results.push(QueryResult { query: query.clone(), hits: vec![] });
                }
            }
        }
        if ranked_hits.is_empty() {
            warnings.insert("docdex_no_hits".to_string());
        }
        ranked_hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let selection = self.select_files(&opts, &ranked_hits, &mut warnings);

        let files = self.load_files(&selection, &mut warnings).await;

        let mut symbols = HashMap::new();
        let mut ast = HashMap::new();
        for path in &selection.focus {
            match self.index.symbols(path).await {
                Ok(s) => { symbols.insert(path.clone(), s); }
                Err(e) => { warnings.insert(format!("docdex_symbols_failed:{e}")); }
            }
            match self.index.ast(path).await {
                Ok(a) => { ast.insert(path.clone(), a); }
                Err(e) => { warnings.insert(format!("docdex_ast_failed:{e}")); }
            }
        }

        let mut impact = HashMap::new();
        if self.config.include_impact {
            for path in &selection.focus {
                match self.index.impact(path).await {
                    Ok(i) => {
                        if i.inbound.is_empty() && i.outbound.is_empty() {
                            warnings.insert(format!("impact_graph_sparse:{path}"));
                        }
                        impact.insert(path.clone(), i);
                    }
                    Err(e) => { warnings.insert(format!("docdex_impact_failed:{e}")); }
                }
            }
        }

        let snippets = if self.config.include_snippets {
            self.gather_snippets(&selection, &mut warnings).await
        } else {
            Vec::new()
        };

        let (repo_map, repo_map_raw) = if self.config.include_repo_map {
            match self.index.tree().await {
                Ok(tree) => (Some(render_repo_map_summary(&tree)), Some(tree)),
                Err(_) => (None, None),
            }
        } else {
            (None, None)
        };

        let redaction = if self.config.redact_secrets {
            Redaction::default()
        } else {
            Redaction::default()
        };

        let mut bundle = ContextBundle {
            queries,
            search_results,
            snippets,
            symbols,
            ast,
            impact,
            selection,
            files,
            repo_map,
            repo_map_raw,
            research: None,
            memory: self.memory_text.clone(),
            profile: self.profile_text.clone(),
            warnings,
            serialized: Serialized { mode: SerializedMode::BundleText, audience: Audience::Builder, content: String::new() },
            redaction,
        };

        self.apply_redaction(&mut bundle);
        bundle.serialized = serialize_bundle(&bundle, SerializedMode::BundleText, Audience::Builder);
        bundle
    }

    fn select_files(&self, opts: &AssembleOptions, ranked_hits: &[SearchHit], warnings: &mut BTreeSet<String>) -> Selection {
        let mut focus: Vec<String> = Vec::new();

        for p in &opts.preferred_files {
            if !focus.contains(p) {
                focus.push(p.clone());
            }
        }
        for hit in ranked_hits {
            if focus.len() >= self.config.max_files {
                break;
            }
            if !focus.contains(&hit.path) {
                focus.push(hit.path.clone());
            }
        }
        for p in &opts.recent_files {
            if focus.len() >= self.config.max_files {
                break;
            }
            if !focus.contains(p) {
                focus.push(p.clone());
            }
        }

        let low_confidence = opts.preferred_files.is_empty() && ranked_hits.is_empty() && opts.recent_files.is_empty();
        if low_confidence {
            warnings.insert("docdex_low_confidence".to_string());
        }

        let periphery: Vec<String> = ranked_hits
            .iter()
            .map(|h| h.path.clone())
            .filter(|p| !focus.contains(p))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(self.config.max_files)
            .collect();

        let mut all = focus.clone();
        all.extend(periphery.iter().cloned());
        all.sort();
        all.dedup();

        Selection { focus, periphery, all, low_confidence }
    }

    async fn load_files(&self, selection: &Selection, warnings: &mut BTreeSet<String>) -> Vec<FileEntry> {
        let mut files = Vec::new();
        let mut total_bytes = 0usize;

        for path in &selection.all {
            if total_bytes >= self.config.max_total_bytes {
                break;
            }
            let role = if selection.focus.contains(path) { FileRole::Focus } else { FileRole::Periphery };
            let budget = match role {
                FileRole::Focus => self.config.focus_max_file_bytes,
                FileRole::Periphery => self.config.periphery_max_bytes,
            };

            let content = match self.index.open(path).await {
                Ok(c) => c,
                Err(e) => {
                    warnings.insert(format!("docdex_open_failed:{e}"));
                    continue;
                }
            };

            let shaped = if content.len() > budget {
                if self.config.skeletonize_large_files {
                    skeletonize(&content, budget)
                } else {
                    let mut truncated = content[..budget.min(content.len())].to_string();
                    truncated.push_str(TRUNCATION_MARKER);
                    truncated
                }
            } else {
                content
            };

            total_bytes += shaped.len();
            files.push(FileEntry { path: path.clone(), role, content: shaped });
        }
        files
    }

    async fn gather_snippets(&self, selection: &Selection, warnings: &mut BTreeSet<String>) -> Vec<Snippet> {
        let mut snippets = Vec::new();
        for path in selection.focus.iter().take(10) {
            match self.index.snippet(path).await {
                Ok(content) => snippets.push(Snippet { locator: path.clone(), content }),
                Err(e) => { warnings.insert(format!("docdex_snippet_failed:{e}")); }
            }
        }
        snippets
    }

    fn apply_redaction(&self, bundle: &mut ContextBundle) {
        if !self.config.redact_secrets {
            return;
        }
        let patterns: Vec<Regex> = self
            .config
            .redact_patterns
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect();

        let mut count = 0usize;
        let mut ignored = Vec::new();

        for entry in &mut bundle.files {
            if self.config.ignore_files_from.iter().any(|i| entry.path.starts_with(i.as_str())) {
                ignored.push(entry.path.clone());
                continue;
            }
            for pattern in &patterns {
                let matches = pattern.find_iter(&entry.content).count();
                if matches > 0 {
                    entry.content = pattern.replace_all(&entry.content, "[REDACTED]").to_string();
                    count += matches;
                }
            }
        }
        bundle.redaction = Redaction { count, ignored };
    }

    /// Executes a structured AGENT_REQUEST. Side-effect free on the bundle --
    /// the caller decides whether/how to merge results into a refreshed bundle.
    pub async fn fulfill_agent_request(&self, req: &AgentRequest) -> CodaliResponse {
        let mut results = Vec::new();
        for need in &req.needs {
            let result = self.fulfill_need(need).await;
            results.push(result);
        }
        CodaliResponse::new(&req.request_id, results)
    }

    async fn fulfill_need(&self, need: &AgentNeed) -> NeedResult {
        let tag = need.tag().to_string();
        match need {
            AgentNeed::DocdexSearch { query, limit } => {
                match self.index.search(query, limit.unwrap_or(10)).await {
                    Ok(hits) => ok_result(tag, serde_json::to_value(hits).unwrap_or_default()),
                    Err(e) => err_result(tag, e.to_string()),
                }
            }
            AgentNeed::DocdexOpen { path } | AgentNeed::FileRead { path } => {
                match self.index.open(path).await {
                    Ok(content) => ok_result(tag, serde_json::json!({ "content": content })),
                    Err(e) => err_result(tag, e.to_string()),
                }
            }
            AgentNeed::DocdexSnippet { path, .. } => match self.index.snippet(path).await {
                Ok(content) => ok_result(tag, serde_json::json!({ "content": content })),
                Err(e) => err_result(tag, e.to_string()),
            },
            AgentNeed::DocdexSymbols { path } => match self.index.symbols(path).await {
                Ok(s) => ok_result(tag, serde_json::to_value(s).unwrap_or_default()),
                Err(e) => err_result(tag, e.to_string()),
            },
            AgentNeed::DocdexAst { path } => match self.index.ast(path).await {
                Ok(a) => ok_result(tag, serde_json::to_value(a).unwrap_or_default()),
                Err(e) => err_result(tag, e.to_string()),
            },
            AgentNeed::DocdexImpact { file } | AgentNeed::DocdexImpactDiagnostics { file } => {
                match self.index.impact(file).await {
                    Ok(i) => ok_result(tag, serde_json::to_value(i).unwrap_or_default()),
                    Err(e) => err_result(tag, e.to_string()),
                }
            }
            AgentNeed::FileList { dir } => match self.index.tree().await {
                Ok(tree) => {
                    let filtered: String = match dir {
                        Some(d) => tree.lines().filter(|l| l.contains(d.as_str())).collect::<Vec<_>>().join("\n"),
                        None => tree,
                    };
                    ok_result(tag, serde_json::json!({ "tree": filtered }))
                }
                Err(e) => err_result(tag, e.to_string()),
            },
            AgentNeed::DocdexWeb { .. } => err_result(tag, "docdex.web is out of scope for this pipeline".to_string()),
        }
    }
}

fn ok_result(need: String, data: serde_json::Value) -> NeedResult {
    NeedResult { need, ok: true, data: Some(data), error: None }
}

fn err_result(need: String, error: String) -> NeedResult {
    NeedResult { need, ok: false, data: None, error: Some(error) }
}

fn derive_queries(request: &str, additional: &[String]) -> Vec<String> {
    let mut queries: Vec<String> = Vec::new();

    let trimmed = request.trim();
    if !trimmed.is_empty() {
        queries.push(trimmed.to_string());
    }

    let keyword_re = Regex::new(r"[A-Za-z_][A-Za-z0-9_]{2,}").unwrap();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for cap in keyword_re.find_iter(request).take(6) {
        let word = cap.as_str().to_lowercase();
        if is_stop_word(&word) || !seen.insert(word.clone()) {
            continue;
        }
        queries.push(word);
    }

    for q in additional {
        let q = q.trim().to_string();
        if !q.is_empty() && !queries.contains(&q) {
            queries.push(q);
        }
    }

    queries.dedup();
    queries
}

fn is_stop_word(word: &str) -> bool {
    matches!(
        word,
        "the" | "and" | "for" | "with" | "that" | "this" | "from" | "into" | "update" | "change" | "make" | "please"
    )
}

fn skeletonize(content: &str, budget: usize) -> String {
    let sig_re = Regex::new(r"(?m)^\s*(pub\s+)?(async\s+)?(fn|struct|enum|trait|impl|class|def)\s.*$").unwrap();
    let mut out = String::new();
    for m in sig_re.find_iter(content) {
        out.push_str(m.as_str().trim_end());
        out.push('\n');
        out.push_str(SKELETON_MARKER);
        out.push('\n');
        if out.len() > budget {
            break;
        }
    }
    if out.is_empty() {
        let mut truncated = content[..budget.min(content.len())].to_string();
        truncated.push_str(TRUNCATION_MARKER);
        truncated
    } else {
        out
    }
}

fn render_repo_map_summary(tree: &str) -> String {
    tree.lines().take(200).collect::<Vec<_>>().join("\n")
}

/// Pure function of the bundle's fields plus `{mode, audience}` -- same
/// inputs always produce byte-identical output.
pub fn serialize_bundle(bundle: &ContextBundle, mode: SerializedMode, audience: Audience) -> Serialized {
    let content = match mode {
        SerializedMode::Json => {
            let mut clone = bundle.clone();
            clone.serialized = Serialized { mode, audience, content: String::new() };
            serde_json::to_string(&clone).unwrap_or_default()
        }
        SerializedMode::BundleText => {
            let mut out = String::new();
            out.push_str(&format!("# Context (audience: {audience:?})\n\n"));
            out.push_str(&format!("## Queries\n{}\n\n", bundle.queries.join(", ")));
            out.push_str(&format!(
                "## Selection\nfocus: {}\nperiphery: {}\nlow_confidence: {}\n\n",
                bundle.selection.focus.join(", "),
                bundle.selection.periphery.join(", "),
                bundle.selection.low_confidence
            ));
            for file in &bundle.files {
                out.push_str(&format!("### {} ({:?})\n```\n{}\n```\n\n", file.path, file.role, file.content));
            }
            if let Some(map) = &bundle.repo_map {
                out.push_str(&format!("## Repo Map\n{map}\n\n"));
            }
            if !bundle.warnings.is_empty() {
                out.push_str(&format!("## Warnings\n{}\n", bundle.warnings.iter().cloned().collect::<Vec<_>>().join("\n")));
            }
            out
        }
    };
    Serialized { mode, audience, content }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo_index::FixtureRepoIndex;

    fn assembler() -> ContextAssembler {
        let index = Arc::new(
            FixtureRepoIndex::new()
                .with_file("src/index.ts", "const greeting = \"Hello\";\n")
                .with_file("src/other.ts", "export function other() {}\n"),
        );
        ContextAssembler::new(index, ContextConfig::default(), PathBuf::from("."))
    }

    #[tokio::test]
    async fn assemble_sets_focus_from_search_hits_and_satisfies_invariants() {
        let bundle = assembler().assemble("update greeting text", None).await;
        assert!(bundle.check_invariants().is_ok());
        assert!(bundle.selection.focus.contains(&"src/index.ts".to_string()));
    }

    #[tokio::test]
    async fn assemble_marks_low_confidence_with_no_signal() {
        let bundle = assembler().assemble("zzz_no_match_anywhere_in_repo", None).await;
        assert!(bundle.selection.low_confidence || bundle.warnings.contains("docdex_no_hits"));
    }

    #[tokio::test]
    async fn serialization_is_pure_and_idempotent() {
        let bundle = assembler().assemble("update greeting", None).await;
        let a = serialize_bundle(&bundle, SerializedMode::BundleText, Audience::Builder);
        let b = serialize_bundle(&bundle, SerializedMode::BundleText, Audience::Builder);
        assert_eq!(a.content, b.content);
    }

    #[tokio::test]
    async fn fulfill_agent_request_reads_file_content() {
        let a = assembler();
        let req = AgentRequest::new("architect", "r1", vec![AgentNeed::FileRead { path: "src/index.ts".into() }]);
        let resp = a.fulfill_agent_request(&req).await;
        assert!(resp.all_ok());
    }

    #[tokio::test]
    async fn fulfill_agent_request_reports_error_for_missing_file() {
        let a = assembler();
        let req = AgentRequest::new("architect", "r1", vec![AgentNeed::FileRead { path: "src/missing.ts".into() }]);
        let resp = a.fulfill_agent_request(&req).await;
        assert!(!resp.all_ok());
    }
}
