//! `RepoIndex`: the abstract semantic+structural lookup surface the
//! ContextAssembler and the architect/critic gates consume. Out of scope per
//! the pipeline's purpose is the full docdex search engine; here we adapt
//! `nyzhi_index::CodebaseIndex` for search/open/snippet/tree, and layer a
//! lightweight heuristic scanner (grounded on the symbol/relationship shapes
//! a code-graph indexer produces) for symbols/ast/impact.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHit {
    pub path: String,
    #[serde(default)]
    pub doc_id: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Interface,
    Module,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    pub file: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AstNode {
    pub kind: String,
    pub name: String,
    pub start_line: usize,
    pub end_line: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Impact {
    pub inbound: Vec<String>,
    pub outbound: Vec<String>,
}

#[async_trait]
pub trait RepoIndex: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>>;
    async fn open(&self, path: &str) -> Result<String>;
    async fn snippet(&self, path_or_doc_id: &str) -> Result<String>;
    async fn symbols(&self, path: &str) -> Result<Vec<Symbol>>;
    async fn ast(&self, path: &str) -> Result<Vec<AstNode>>;
    async fn impact(&self, file: &str) -> Result<Impact>;
    async fn tree(&self) -> Result<String>;
}

/// Production adapter over the workspace's semantic index.
pub struct IndexRepoIndex {
    index: Arc<nyzhi_index::CodebaseIndex>,
    project_root: PathBuf,
}

impl IndexRepoIndex {
    pub fn new(index: Arc<nyzhi_index::CodebaseIndex>, project_root: PathBuf) -> Self {
        Self { index, project_root }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() { p.to_path_buf() } else { self.project_root.join(p) }
    }
}

#[async_trait]
impl RepoIndex for IndexRepoIndex {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>> {
        let results = self.index.search(query, limit).await?;
        Ok(results
            .into_iter()
            .map(|r| IndexHit { path: r.file, doc_id: None, score: r.score })
            .collect())
    }

    async fn open(&self, path: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.resolve(path))?)
    }

    async fn snippet(&self, path_or_doc_id: &str) -> Result<String> {
        self.open(path_or_doc_id).await
    }

    async fn symbols(&self, path: &str) -> Result<Vec<Symbol>> {
        let content = self.open(path).await?;
        Ok(scan_symbols(path, &content))
    }

    async fn ast(&self, path: &str) -> Result<Vec<AstNode>> {
        let symbols = self.symbols(path).await?;
        Ok(symbols
            .into_iter()
            .map(|s| AstNode {
                kind: format!("{:?}", s.kind).to_lowercase(),
                name: s.name,
                start_line: s.start_line,
                end_line: s.end_line,
            })
            .collect())
    }

    async fn impact(&self, file: &str) -> Result<Impact> {
        let stem = Path::new(file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(file)
            .to_string();
        let content = self.open(file).await.unwrap_or_default();
        let outbound = scan_imports(&content);

        let mut inbound = Vec::new();
        if let Ok(hits) = self.search(&stem, 50).await {
            for hit in hits {
                if hit.path == file {
                    continue;
                }
                if let Ok(other) = self.open(&hit.path).await {
                    if scan_imports(&other).iter().any(|i| i.contains(&stem)) {
                        inbound.push(hit.path);
                    }
                }
            }
        }
        inbound.sort();
        inbound.dedup();
        Ok(Impact { inbound, outbound })
    }

    async fn tree(&self) -> Result<String> {
        Ok(render_tree(&self.project_root))
    }
}

fn scan_symbols(file: &str, content: &str) -> Vec<Symbol> {
    let mut out = Vec::new();
    let patterns: &[(&Regex, SymbolKind)] = &[];
    let _ = patterns;

    let fn_re = Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?(?:async\s+)?fn\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    let struct_re = Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?struct\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    let enum_re = Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?enum\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    let trait_re = Regex::new(r"(?m)^\s*(?:pub(?:\([^)]*\))?\s+)?trait\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    let class_re = Regex::new(r"(?m)^\s*(?:export\s+)?class\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    let def_re = Regex::new(r"(?m)^\s*def\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();

    let line_of = |content: &str, byte_pos: usize| content[..byte_pos].matches('\n').count() + 1;

    for (re, kind) in [
        (&fn_re, SymbolKind::Function),
        (&struct_re, SymbolKind::Struct),
        (&enum_re, SymbolKind::Enum),
        (&trait_re, SymbolKind::Interface),
        (&class_re, SymbolKind::Class),
        (&def_re, SymbolKind::Function),
    ] {
        for cap in re.captures_iter(content) {
            let m = cap.get(1).unwrap();
            let start = line_of(content, m.start());
            out.push(Symbol {
                name: m.as_str().to_string(),
                kind: kind.clone_kind(),
                file: file.to_string(),
                start_line: start,
                end_line: start,
            });
        }
    }
    out.sort_by_key(|s| s.start_line);
    out
}

impl SymbolKind {
    fn clone_kind(&self) -> SymbolKind {
        self.clone()
    }
}

fn scan_imports(content: &str) -> Vec<String> {
    let use_re = Regex::new(r"(?m)^\s*use\s+([A-Za-z0-9_:]+)").unwrap();
    let import_re = Regex::new(r#"(?m)^\s*(?:import|from)\s+['"]?([A-Za-z0-9_./-]+)"#).unwrap();
    let mut out = Vec::new();
    for re in [&use_re, &import_re] {
        for cap in re.captures_iter(content) {
            out.push(cap[1].to_string());
        }
    }
    out.sort();
    out.dedup();
    out
}

const SKIP_DIRS: &[&str] = &[".git", "target", "node_modules", "dist", "build", "__pycache__", "vendor"];

fn render_tree(root: &Path) -> String {
    let mut out = String::new();
    render_tree_rec(root, root, 0, &mut out, &mut 0);
    out
}

fn render_tree_rec(root: &Path, dir: &Path, depth: usize, out: &mut String, budget: &mut usize) {
    if *budget > 2000 || !dir.is_dir() {
        return;
    }
    let mut entries: Vec<_> = match std::fs::read_dir(dir) {
        Ok(e) => e.flatten().collect(),
        Err(_) => return,
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        if *budget > 2000 {
            return;
        }
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with('.') || SKIP_DIRS.contains(&name_str.as_ref()) {
            continue;
        }
        let path = entry.path();
        let rel = path.strip_prefix(root).unwrap_or(&path).display();
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("- {rel}\n"));
        *budget += 1;
        if path.is_dir() {
            render_tree_rec(root, &path, depth + 1, out, budget);
        }
    }
}

/// Deterministic in-memory stand-in for tests: no filesystem, no sqlite.
#[derive(Default)]
pub struct FixtureRepoIndex {
    pub files: BTreeMap<String, String>,
    pub impacts: BTreeMap<String, Impact>,
}

impl FixtureRepoIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }
}

#[async_trait]
impl RepoIndex for FixtureRepoIndex {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>> {
        let q = query.to_lowercase();
        let mut hits: Vec<IndexHit> = self
            .files
            .iter()
            .filter(|(path, content)| {
                path.to_lowercase().contains(&q) || content.to_lowercase().contains(&q)
            })
            .map(|(path, content)| {
                let score = if path.to_lowercase().contains(&q) { 1.0 } else if content.to_lowercase().contains(&q) { 0.5 } else { 0.0 };
                IndexHit { path: path.clone(), doc_id: None, score }
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn open(&self, path: &str) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no such fixture file: {path}"))
    }

    async fn snippet(&self, path_or_doc_id: &str) -> Result<String> {
        self.open(path_or_doc_id).await
    }

    async fn symbols(&self, path: &str) -> Result<Vec<Symbol>> {
        let content = self.open(path).await?;
        Ok(scan_symbols(path, &content))
    }

    async fn ast(&self, path: &str) -> Result<Vec<AstNode>> {
        let symbols = self.symbols(path).await?;
        Ok(symbols
            .into_iter()
            .map(|s| AstNode { kind: format!("{:?}", s.kind).to_lowercase(), name: s.name, start_line: s.start_line, end_line: s.end_line })
            .collect())
    }

    async fn impact(&self, file: &str) -> Result<Impact> {
        Ok(self.impacts.get(file).cloned().unwrap_or_default())
    }

    async fn tree(&self) -> Result<String> {
        let mut paths: Vec<&String> = self.files.keys().collect();
        paths.sort();
        Ok(paths.iter().map(|p| format!("- {p}")).collect::<Vec<_>>().join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixture_search_ranks_path_match_above_content_match() {
        let idx = FixtureRepoIndex::new()
            .with_file("src/greeting.rs", "const X: u32 = 1;")
            .with_file("src/other.rs", "// mentions greeting here");
        let hits = idx.search("greeting", 10).await.unwrap();
        assert_eq!(hits[0].path, "src/greeting.rs");
    }

    #[test]
    fn scan_symbols_finds_rust_fn_and_struct() {
        let content = "pub fn hello() {}\nstruct Foo { x: u32 }\n";
        let symbols = scan_symbols("src/x.rs", content);
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"hello"));
        assert!(names.contains(&"Foo"));
    }

    #[test]
    fn scan_imports_finds_rust_use() {
        let content = "use std::path::Path;\nuse crate::foo::Bar;\n";
        let imports = scan_imports(content);
        assert!(imports.iter().any(|i| i.contains("std::path")));
    }
}
