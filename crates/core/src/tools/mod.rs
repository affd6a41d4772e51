pub mod apply_patch;
pub mod bash;
pub mod batch;
pub mod change_tracker;
pub mod diff;
pub mod edit;
pub mod filesystem;
pub mod fuzzy_find;
pub mod git;
pub mod glob;
pub mod grep;
pub mod lsp;
pub mod permission;
pub mod read;
pub mod semantic_search;
pub mod tail_file;
pub mod think;
pub mod todo;
pub mod update_plan;
pub mod verify;
pub mod web;
pub mod write;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use permission::ToolPermission;
use serde_json::Value;

pub type IndexHandle = Arc<nyzhi_index::CodebaseIndex>;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn permission(&self) -> ToolPermission {
        ToolPermission::ReadOnly
    }
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult>;
}

#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub cwd: PathBuf,
    pub project_root: PathBuf,
    /// 0 = main agent, 1 = first sub-agent, etc.
    pub depth: u32,
    pub change_tracker: Arc<tokio::sync::Mutex<change_tracker::ChangeTracker>>,
    /// If set, only these tools are visible to the agent (role-based filtering).
    pub allowed_tool_names: Option<Vec<String>>,
    /// Shared todo store for rehydration during compaction.
    pub todo_store: Option<TodoStoreHandle>,
    /// Codebase index for semantic search and auto-context.
    pub index: Option<IndexHandle>,
}

pub struct ToolResult {
    pub output: String,
    pub title: String,
    pub metadata: Value,
}

pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    pub fn definitions(&self) -> Vec<nyzhi_provider::ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .values()
            .map(|t| nyzhi_provider::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Return definitions for read-only tools only (plan mode).
    pub fn definitions_read_only(&self) -> Vec<nyzhi_provider::ToolDefinition> {
        let mut defs: Vec<_> = self
            .tools
            .values()
            .filter(|t| t.permission() == permission::ToolPermission::ReadOnly)
            .map(|t| nyzhi_provider::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if let Some(allowed) = &ctx.allowed_tool_names {
            if !allowed.iter().any(|a| a == name) {
                anyhow::bail!("Tool `{name}` is not available for this agent role");
            }
        }
        let tool = self
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {name}"))?;
        tool.execute(args, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Create a new registry containing only tools allowed by the given filters.
    /// `allowed`: if Some, only tools whose name is in the set are kept.
    /// `disallowed`: if Some, tools whose name is in the set are removed.
    /// Allowed is applied first (whitelist), then disallowed (blacklist).
    pub fn filtered(
        &self,
        allowed: Option<&[String]>,
        disallowed: Option<&[String]>,
    ) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();

        if let Some(allow_list) = allowed {
            let allow_set: std::collections::HashSet<&str> =
                allow_list.iter().map(|s| s.as_str()).collect();
            names.retain(|n| allow_set.contains(n.as_str()));
        }

        if let Some(deny_list) = disallowed {
            let deny_set: std::collections::HashSet<&str> =
                deny_list.iter().map(|s| s.as_str()).collect();
            names.retain(|n| !deny_set.contains(n.as_str()));
        }

        names
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Return tool definitions filtered to only the given tool names.
    pub fn definitions_filtered(
        &self,
        allowed_names: &[String],
    ) -> Vec<nyzhi_provider::ToolDefinition> {
        let allow_set: std::collections::HashSet<&str> =
            allowed_names.iter().map(|s| s.as_str()).collect();
        let mut defs: Vec<_> = self
            .tools
            .values()
            .filter(|t| allow_set.contains(t.name()))
            .map(|t| nyzhi_provider::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

pub type TodoStoreHandle =
    Arc<tokio::sync::Mutex<std::collections::HashMap<String, Vec<todo::TodoItem>>>>;

pub async fn todo_has_incomplete(store: &TodoStoreHandle, session_id: &str) -> bool {
    todo::has_incomplete_todos(store, session_id).await
}

pub async fn todo_incomplete_summary(store: &TodoStoreHandle, session_id: &str) -> Option<String> {
    todo::incomplete_summary(store, session_id).await
}

pub async fn todo_progress(
    store: &TodoStoreHandle,
    session_id: &str,
) -> Option<(usize, usize, usize)> {
    todo::progress_summary(store, session_id).await
}

pub struct RegistryBundle {
    pub registry: ToolRegistry,
    pub todo_store: TodoStoreHandle,
}

/// The tool catalog the Runner's thin tool-call loop (non-smart path) exposes
/// to a generator: file/git/search primitives plus the structured patch tool
/// the build/critic loop also uses.
pub fn default_registry(codebase_index: Option<IndexHandle>) -> RegistryBundle {
    let todo_store = todo::shared_store();
    let mut registry = ToolRegistry::new();

    // Core tools
    registry.register(Box::new(bash::BashTool));
    registry.register(Box::new(read::ReadTool));
    registry.register(Box::new(write::WriteTool));
    registry.register(Box::new(edit::EditTool));
    registry.register(Box::new(glob::GlobTool));
    registry.register(Box::new(grep::GrepTool));

    // Git tools
    registry.register(Box::new(git::GitStatusTool));
    registry.register(Box::new(git::GitDiffTool));
    registry.register(Box::new(git::GitLogTool));
    registry.register(Box::new(git::GitShowTool));
    registry.register(Box::new(git::GitBranchTool));
    registry.register(Box::new(git::GitCommitTool));
    registry.register(Box::new(git::GitCheckoutTool));

    // Task management
    registry.register(Box::new(todo::TodoWriteTool::with_store(
        todo_store.clone(),
    )));
    registry.register(Box::new(todo::TodoReadTool::with_store(todo_store.clone())));

    // Filesystem
    registry.register(Box::new(filesystem::ListDirTool));
    registry.register(Box::new(filesystem::DirectoryTreeTool));
    registry.register(Box::new(filesystem::FileInfoTool));
    registry.register(Box::new(filesystem::DeleteFileTool));
    registry.register(Box::new(filesystem::MoveFileTool));
    registry.register(Box::new(filesystem::CopyFileTool));
    registry.register(Box::new(filesystem::CreateDirTool));

    // Code analysis
    registry.register(Box::new(verify::VerifyTool));
    registry.register(Box::new(lsp::LspDiagnosticsTool));
    registry.register(Box::new(lsp::AstSearchTool));
    registry.register(Box::new(lsp::LspGotoDefinitionTool));
    registry.register(Box::new(lsp::LspFindReferencesTool));
    registry.register(Box::new(lsp::LspHoverTool));

    // Web
    registry.register(Box::new(web::WebFetchTool));
    registry.register(Box::new(web::WebSearchTool));

    // Misc
    registry.register(Box::new(tail_file::TailFileTool));
    registry.register(Box::new(batch::BatchApplyTool));

    // Semantic search & fuzzy find
    if let Some(idx) = codebase_index {
        registry.register(Box::new(semantic_search::SemanticSearchTool::new(idx)));
    }
    registry.register(Box::new(fuzzy_find::FuzzyFindTool));

    // Plan tracking
    registry.register(Box::new(update_plan::CreatePlanTool));

    // Think tool
    registry.register(Box::new(think::ThinkTool));

    // Structured patch application
    registry.register(Box::new(apply_patch::ApplyPatchTool));
    registry.register(Box::new(apply_patch::MultiEditTool));

    RegistryBundle {
        registry,
        todo_store,
    }
}
