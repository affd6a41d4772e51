use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub mcp: McpConfig,
    #[serde(default)]
    pub smart_pipeline: SmartPipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartPipelineConfig {
    #[serde(default)]
    pub smart: SmartSection,
    #[serde(default)]
    pub deep_investigation: DeepInvestigationConfig,
    #[serde(default)]
    pub context: PipelineContextConfig,
    #[serde(default)]
    pub security: PipelineSecurityConfig,
    #[serde(default)]
    pub builder: PipelineBuilderConfig,
    #[serde(default)]
    pub interpreter: InterpreterConfig,
    #[serde(default)]
    pub limits: PipelineLimitsConfig,
    #[serde(default)]
    pub cost: PipelineCostConfig,
    #[serde(default)]
    pub streaming: PipelineStreamingConfig,
    #[serde(default)]
    pub routing: PipelineRoutingConfig,
}

impl Default for SmartPipelineConfig {
    fn default() -> Self {
        Self {
            smart: SmartSection::default(),
            deep_investigation: DeepInvestigationConfig::default(),
            context: PipelineContextConfig::default(),
            security: PipelineSecurityConfig::default(),
            builder: PipelineBuilderConfig::default(),
            interpreter: InterpreterConfig::default(),
            limits: PipelineLimitsConfig::default(),
            cost: PipelineCostConfig::default(),
            streaming: PipelineStreamingConfig::default(),
            routing: PipelineRoutingConfig::default(),
        }
    }
}

fn default_true_pipeline() -> bool {
    true
}

fn default_max_passes_extra() -> u32 {
    1
}

/// `enabled=false` routes requests to the thin Runner instead of SmartPipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmartSection {
    #[serde(default)]
    pub enabled: bool,
    /// Corresponds to the spec's `allowAutoRetry`; exposed here rather than hard-coded.
    #[serde(default = "default_true_pipeline")]
    pub allow_auto_retry: bool,
    #[serde(default = "default_max_passes_extra")]
    pub max_request_recovery: u32,
}

impl Default for SmartSection {
    fn default() -> Self {
        Self { enabled: false, allow_auto_retry: true, max_request_recovery: default_max_passes_extra() }
    }
}

fn default_tool_quota() -> usize {
    6
}
fn default_evidence_gate() -> usize {
    3
}
fn default_min_cycles() -> u32 {
    2
}
fn default_max_cycles() -> u32 {
    5
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepInvestigationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub deep_scan_preset: Option<String>,
    #[serde(default = "default_tool_quota")]
    pub tool_quota: usize,
    #[serde(default = "default_min_cycles")]
    pub investigation_budget_cycles: u32,
    #[serde(default = "default_evidence_gate")]
    pub evidence_gate: usize,
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u32,
}

impl Default for DeepInvestigationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            deep_scan_preset: None,
            tool_quota: default_tool_quota(),
            investigation_budget_cycles: default_min_cycles(),
            evidence_gate: default_evidence_gate(),
            max_cycles: default_max_cycles(),
        }
    }
}

fn default_max_files() -> usize {
    20
}
fn default_max_total_bytes() -> usize {
    400_000
}
fn default_token_budget() -> usize {
    120_000
}
fn default_focus_max_file_bytes() -> usize {
    40_000
}
fn default_periphery_max_bytes() -> usize {
    8_000
}
fn default_max_context_refreshes() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContextConfig {
    #[serde(default = "default_context_mode")]
    pub mode: String,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_max_total_bytes")]
    pub max_total_bytes: usize,
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,
    #[serde(default = "default_focus_max_file_bytes")]
    pub focus_max_file_bytes: usize,
    #[serde(default = "default_periphery_max_bytes")]
    pub periphery_max_bytes: usize,
    #[serde(default = "default_true_pipeline")]
    pub include_repo_map: bool,
    #[serde(default = "default_true_pipeline")]
    pub include_impact: bool,
    #[serde(default = "default_true_pipeline")]
    pub include_snippets: bool,
    #[serde(default = "default_read_strategy")]
    pub read_strategy: String,
    #[serde(default = "default_max_context_refreshes")]
    pub max_context_refreshes: u32,
    #[serde(default = "default_true_pipeline")]
    pub skeletonize_large_files: bool,
    #[serde(default = "default_true_pipeline")]
    pub redact_secrets: bool,
    #[serde(default)]
    pub ignore_files_from: Vec<String>,
}

fn default_context_mode() -> String {
    "auto".to_string()
}

fn default_read_strategy() -> String {
    "lazy".to_string()
}

impl Default for PipelineContextConfig {
    fn default() -> Self {
        Self {
            mode: default_context_mode(),
            max_files: default_max_files(),
            max_total_bytes: default_max_total_bytes(),
            token_budget: default_token_budget(),
            focus_max_file_bytes: default_focus_max_file_bytes(),
            periphery_max_bytes: default_periphery_max_bytes(),
            include_repo_map: true,
            include_impact: true,
            include_snippets: true,
            read_strategy: default_read_strategy(),
            max_context_refreshes: default_max_context_refreshes(),
            skeletonize_large_files: true,
            redact_secrets: true,
            ignore_files_from: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineSecurityConfig {
    #[serde(default)]
    pub redact_patterns: Vec<String>,
    #[serde(default)]
    pub read_only_paths: Vec<String>,
    #[serde(default)]
    pub allow_doc_edits: bool,
    #[serde(default)]
    pub allow_cloud_models: bool,
}

fn default_patch_format() -> String {
    "search_replace".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineBuilderConfig {
    #[serde(default = "default_builder_mode")]
    pub mode: String,
    #[serde(default = "default_patch_format")]
    pub patch_format: String,
    #[serde(default)]
    pub fallback_to_interpreter: bool,
}

fn default_builder_mode() -> String {
    "tool_calls".to_string()
}

impl Default for PipelineBuilderConfig {
    fn default() -> Self {
        Self { mode: default_builder_mode(), patch_format: default_patch_format(), fallback_to_interpreter: false }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub grammar: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_steps() -> u32 {
    24
}
fn default_max_tool_calls() -> u32 {
    40
}
fn default_limits_max_tokens() -> u32 {
    8_192
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineLimitsConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: u32,
    #[serde(default = "default_limits_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for PipelineLimitsConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tool_calls: default_max_tool_calls(),
            max_tokens: default_limits_max_tokens(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_max_cost_per_run() -> f64 {
    1.0
}
fn default_char_per_token() -> f64 {
    4.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCostConfig {
    #[serde(default = "default_max_cost_per_run")]
    pub max_cost_per_run: f64,
    #[serde(default = "default_char_per_token")]
    pub char_per_token: f64,
    #[serde(default)]
    pub pricing_overrides: HashMap<String, f64>,
}

impl Default for PipelineCostConfig {
    fn default() -> Self {
        Self { max_cost_per_run: default_max_cost_per_run(), char_per_token: default_char_per_token(), pricing_overrides: HashMap::new() }
    }
}

fn default_flush_every_ms() -> u64 {
    80
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStreamingConfig {
    #[serde(default = "default_true_pipeline")]
    pub enabled: bool,
    #[serde(default = "default_flush_every_ms")]
    pub flush_every_ms: u64,
}

impl Default for PipelineStreamingConfig {
    fn default() -> Self {
        Self { enabled: true, flush_every_ms: default_flush_every_ms() }
    }
}

/// Per-phase Generator/agent override for the smart pipeline's architect/builder/critic stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineRoutingConfig {
    #[serde(default)]
    pub librarian: Option<String>,
    #[serde(default)]
    pub architect: Option<String>,
    #[serde(default)]
    pub builder: Option<String>,
    #[serde(default)]
    pub critic: Option<String>,
    #[serde(default)]
    pub interpreter: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum McpServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Http {
        url: String,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub trust: TrustConfig,
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustConfig {
    #[serde(default)]
    pub mode: TrustMode,
    #[serde(default)]
    pub allow_tools: Vec<String>,
    #[serde(default)]
    pub allow_paths: Vec<String>,
    #[serde(default)]
    pub deny_tools: Vec<String>,
    #[serde(default)]
    pub deny_paths: Vec<String>,
    #[serde(default)]
    pub auto_approve: Vec<String>,
    #[serde(default)]
    pub always_ask: Vec<String>,
    #[serde(default)]
    pub remember_approvals: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustMode {
    #[default]
    Off,
    Limited,
    AutoEdit,
    Full,
}

impl std::fmt::Display for TrustMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustMode::Off => write!(f, "off"),
            TrustMode::Limited => write!(f, "limited"),
            TrustMode::AutoEdit => write!(f, "autoedit"),
            TrustMode::Full => write!(f, "full"),
        }
    }
}

impl std::str::FromStr for TrustMode {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" => Ok(TrustMode::Off),
            "limited" => Ok(TrustMode::Limited),
            "autoedit" | "auto_edit" | "auto-edit" => Ok(TrustMode::AutoEdit),
            "full" => Ok(TrustMode::Full),
            other => Err(format!("unknown trust mode: {other} (use off, limited, autoedit, or full)")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderDef {
    pub id: &'static str,
    pub name: &'static str,
    pub env_var: &'static str,
    pub default_base_url: &'static str,
    pub api_style: &'static str,
    pub category: &'static str,
    pub supports_oauth: bool,
}

pub const BUILT_IN_PROVIDERS: &[ProviderDef] = &[
    ProviderDef { id: "openai", name: "OpenAI", env_var: "OPENAI_API_KEY",
                  default_base_url: "https://api.openai.com/v1",
                  api_style: "openai", category: "popular", supports_oauth: true },
    ProviderDef { id: "anthropic", name: "Anthropic", env_var: "ANTHROPIC_API_KEY",
                  default_base_url: "https://api.anthropic.com/v1",
                  api_style: "anthropic", category: "popular", supports_oauth: true },
    ProviderDef { id: "gemini", name: "Google Gemini", env_var: "GEMINI_API_KEY",
                  default_base_url: "https://generativelanguage.googleapis.com/v1beta",
                  api_style: "gemini", category: "popular", supports_oauth: true },
    ProviderDef { id: "cursor", name: "Cursor", env_var: "CURSOR_API_KEY",
                  default_base_url: "https://api2.cursor.sh",
                  api_style: "cursor", category: "popular", supports_oauth: true },
    ProviderDef { id: "openrouter", name: "OpenRouter", env_var: "OPENROUTER_API_KEY",
                  default_base_url: "https://openrouter.ai/api/v1",
                  api_style: "openai", category: "popular", supports_oauth: false },
    ProviderDef { id: "claude-sdk", name: "Claude Agent SDK", env_var: "ANTHROPIC_API_KEY",
                  default_base_url: "",
                  api_style: "claude-sdk", category: "agents", supports_oauth: false },
    ProviderDef { id: "codex", name: "OpenAI Codex CLI", env_var: "CODEX_API_KEY",
                  default_base_url: "",
                  api_style: "codex", category: "agents", supports_oauth: true },
    ProviderDef { id: "groq", name: "Groq", env_var: "GROQ_API_KEY",
                  default_base_url: "https://api.groq.com/openai/v1",
                  api_style: "openai", category: "other", supports_oauth: false },
    ProviderDef { id: "together", name: "Together AI", env_var: "TOGETHER_API_KEY",
                  default_base_url: "https://api.together.xyz/v1",
                  api_style: "openai", category: "other", supports_oauth: false },
    ProviderDef { id: "deepseek", name: "DeepSeek", env_var: "DEEPSEEK_API_KEY",
                  default_base_url: "https://api.deepseek.com/v1",
                  api_style: "openai", category: "other", supports_oauth: false },
    ProviderDef { id: "ollama", name: "Ollama (local)", env_var: "OLLAMA_API_KEY",
                  default_base_url: "http://localhost:11434/v1",
                  api_style: "openai", category: "other", supports_oauth: false },
    ProviderDef { id: "kimi", name: "Kimi (Moonshot)", env_var: "MOONSHOT_API_KEY",
                  default_base_url: "https://api.moonshot.ai/v1",
                  api_style: "openai", category: "other", supports_oauth: false },
    ProviderDef { id: "kimi-coding", name: "Kimi Coding Plan", env_var: "KIMI_CODING_API_KEY",
                  default_base_url: "https://api.kimi.com/coding",
                  api_style: "anthropic", category: "other", supports_oauth: false },
    ProviderDef { id: "minimax", name: "MiniMax", env_var: "MINIMAX_API_KEY",
                  default_base_url: "https://api.minimax.io/v1",
                  api_style: "openai", category: "other", supports_oauth: false },
    ProviderDef { id: "minimax-coding", name: "MiniMax Coding Plan", env_var: "MINIMAX_CODING_API_KEY",
                  default_base_url: "https://api.minimax.io/anthropic",
                  api_style: "anthropic", category: "other", supports_oauth: false },
    ProviderDef { id: "glm", name: "GLM (Z.ai)", env_var: "ZHIPU_API_KEY",
                  default_base_url: "https://api.z.ai/api/paas/v4",
                  api_style: "openai", category: "other", supports_oauth: false },
    ProviderDef { id: "glm-coding", name: "GLM Coding Plan", env_var: "ZHIPU_CODING_API_KEY",
                  default_base_url: "https://api.z.ai/api/coding/paas/v4",
                  api_style: "openai", category: "other", supports_oauth: false },
];

pub fn find_provider_def(id: &str) -> Option<&'static ProviderDef> {
    BUILT_IN_PROVIDERS.iter().find(|p| p.id == id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider")]
    pub default: String,
    #[serde(default, flatten)]
    pub providers: HashMap<String, ProviderEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub api_style: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

impl ProviderConfig {
    pub fn entry(&self, name: &str) -> Option<&ProviderEntry> {
        self.providers.get(name)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            default: default_provider(),
            providers: HashMap::new(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nyzhi")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nyzhi")
    }

    pub fn ensure_dirs() -> Result<()> {
        std::fs::create_dir_all(Self::config_dir())?;
        std::fs::create_dir_all(Self::data_dir())?;
        Ok(())
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        Self::ensure_dirs()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn load_project(project_root: &std::path::Path) -> Result<Option<Self>> {
        let path = project_root.join(".nyzhi").join("config.toml");
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read project config")?;
            let config: Config =
                toml::from_str(&content).context("Failed to parse project config")?;
            Ok(Some(config))
        } else {
            Ok(None)
        }
    }

    pub fn load_local(project_root: &std::path::Path) -> Result<Option<Self>> {
        let path = project_root.join(".nyzhi").join("config.local.toml");
        if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read local config")?;
            let config: Config =
                toml::from_str(&content).context("Failed to parse local config")?;
            Ok(Some(config))
        } else {
            Ok(None)
        }
    }

    pub fn merge(global: &Config, project: &Config) -> Config {
        let provider = {
            let mut merged = global.provider.providers.clone();
            for (k, proj_entry) in &project.provider.providers {
                let base = merged.remove(k).unwrap_or_default();
                merged.insert(k.clone(), merge_provider_entry(&base, proj_entry));
            }
            ProviderConfig {
                default: if project.provider.default != default_provider() {
                    project.provider.default.clone()
                } else {
                    global.provider.default.clone()
                },
                providers: merged,
            }
        };

        let mut mcp_servers = global.mcp.servers.clone();
        mcp_servers.extend(project.mcp.servers.clone());

        Config {
            provider,
            models: ModelsConfig {
                max_tokens: if project.models.max_tokens != default_max_tokens() {
                    project.models.max_tokens
                } else {
                    global.models.max_tokens
                },
                temperature: project.models.temperature.or(global.models.temperature),
            },
            agent: AgentSettings {
                trust: {
                    let base = if project.agent.trust.mode != TrustMode::Off {
                        project.agent.trust.clone()
                    } else {
                        global.agent.trust.clone()
                    };
                    let mut deny_tools = global.agent.trust.deny_tools.clone();
                    deny_tools.extend(project.agent.trust.deny_tools.clone());
                    deny_tools.sort();
                    deny_tools.dedup();
                    let mut deny_paths = global.agent.trust.deny_paths.clone();
                    deny_paths.extend(project.agent.trust.deny_paths.clone());
                    deny_paths.sort();
                    deny_paths.dedup();
                    TrustConfig {
                        deny_tools,
                        deny_paths,
                        ..base
                    }
                },
            },
            mcp: McpConfig {
                servers: mcp_servers,
            },
            smart_pipeline: if project.smart_pipeline.smart.enabled {
                project.smart_pipeline.clone()
            } else {
                global.smart_pipeline.clone()
            },
        }
    }
}

fn merge_provider_entry(global: &ProviderEntry, project: &ProviderEntry) -> ProviderEntry {
    ProviderEntry {
        api_key: project.api_key.clone().or_else(|| global.api_key.clone()),
        base_url: project.base_url.clone().or_else(|| global.base_url.clone()),
        model: project.model.clone().or_else(|| global.model.clone()),
        api_style: project.api_style.clone().or_else(|| global.api_style.clone()),
        max_tokens: project.max_tokens.or(global.max_tokens),
        temperature: project.temperature.or(global.temperature),
    }
}
