use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "nyzhi", about = "Smart pipeline coding agent for the terminal", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Provider to use (openai, anthropic, gemini)
    #[arg(short, long)]
    provider: Option<String>,

    /// Model to use (e.g. gpt-4.1, claude-sonnet-4, gemini-2.5-flash)
    #[arg(short, long)]
    model: Option<String>,

    /// Trust mode: off, limited, or full (auto-approve tool calls)
    #[arg(short = 'y', long = "trust")]
    trust: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the smart pipeline (or the thin runner, if smart mode is off) on a prompt
    Run {
        /// The prompt to send
        prompt: String,
    },
    /// Log in to a provider (OAuth refresh token or API key)
    Login {
        /// Provider to log in to (e.g. openai, anthropic, gemini, openrouter)
        provider: Option<String>,
    },
    /// Log out from a provider (delete stored token)
    Logout {
        /// Provider to log out from
        provider: String,
    },
    /// Show current auth status for known providers
    Whoami,
    /// Show current configuration
    Config,
    /// Initialize a .nyzhi/ project directory
    Init,
    /// Manage MCP servers
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },
    /// Auto-diagnose and fix CI failures. Reads a failure log and runs the pipeline to fix it.
    CiFix {
        /// Path to CI log file (reads from stdin if not provided)
        #[arg(short, long)]
        log_file: Option<String>,
        /// CI format: auto, junit, tap, plain (default: auto)
        #[arg(long, default_value = "auto")]
        format: String,
        /// Auto-commit the fix
        #[arg(long)]
        commit: bool,
    },
}

#[derive(Subcommand)]
enum McpAction {
    /// Add an MCP server
    Add {
        /// Server name
        name: String,
        /// HTTP URL (for remote servers)
        #[arg(long)]
        url: Option<String>,
        /// Scope: "global" or "project" (default: project)
        #[arg(long, default_value = "project")]
        scope: String,
        /// Command and arguments for stdio transport
        #[arg(last = true)]
        command_args: Vec<String>,
    },
    /// List configured MCP servers
    List,
    /// Remove an MCP server
    Remove {
        /// Server name to remove
        name: String,
        /// Scope: "global" or "project" (default: project)
        #[arg(long, default_value = "project")]
        scope: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("nyzhi=info".parse()?),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let global_config = nyzhi_config::Config::load()?;
    nyzhi_config::Config::ensure_dirs()?;

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let workspace = nyzhi_core::workspace::detect_workspace(&cwd);

    let config = if workspace.has_nyzhi_config {
        match nyzhi_config::Config::load_project(&workspace.project_root)? {
            Some(project_config) => nyzhi_config::Config::merge(&global_config, &project_config),
            None => global_config,
        }
    } else {
        global_config
    };

    let provider_name_owned = cli
        .provider
        .clone()
        .unwrap_or_else(|| config.provider.default.clone());
    let provider_name: &str = &provider_name_owned;

    match cli.command {
        Some(Commands::Init) => {
            match nyzhi_core::workspace::scaffold_nyzhi_dir(&workspace.project_root) {
                Ok(created) => {
                    if created.is_empty() {
                        println!(
                            ".nyzhi/ already exists in {}",
                            workspace.project_root.display()
                        );
                    } else {
                        println!(
                            "Initialized .nyzhi/ in {}",
                            workspace.project_root.display()
                        );
                        for p in &created {
                            println!("  created {}", p.display());
                        }
                    }
                }
                Err(e) => eprintln!("Failed to initialize: {e}"),
            }
            return Ok(());
        }
        Some(Commands::Config) => {
            let path = nyzhi_config::Config::config_path();
            println!("Config path: {}", path.display());
            if workspace.has_nyzhi_config {
                println!(
                    "Project config: {}",
                    workspace.project_root.join(".nyzhi/config.toml").display()
                );
            }
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Mcp { action }) => {
            handle_mcp_command(action, &workspace, &config).await?;
            return Ok(());
        }
        Some(Commands::Login { provider: prov }) => {
            let prov = match prov {
                Some(p) => p,
                None => {
                    println!("Select a provider:");
                    for (i, def) in nyzhi_config::BUILT_IN_PROVIDERS.iter().enumerate() {
                        println!("  {}: {}", i + 1, def.name);
                    }
                    print!("Enter number: ");
                    use std::io::Write;
                    std::io::stdout().flush()?;
                    let mut input = String::new();
                    std::io::stdin().read_line(&mut input)?;
                    let idx: usize = input.trim().parse().unwrap_or(0);
                    if idx == 0 || idx > nyzhi_config::BUILT_IN_PROVIDERS.len() {
                        eprintln!("Invalid selection.");
                        return Ok(());
                    }
                    nyzhi_config::BUILT_IN_PROVIDERS[idx - 1].id.to_string()
                }
            };
            prompt_api_key(&prov)?;
            return Ok(());
        }
        Some(Commands::Logout { provider: prov }) => {
            nyzhi_auth::token_store::delete_token(&prov)?;
            println!("Logged out from {prov}.");
            return Ok(());
        }
        Some(Commands::Whoami) => {
            println!("Auth status:");
            let mut seen = std::collections::HashSet::new();
            for def in nyzhi_config::BUILT_IN_PROVIDERS {
                seen.insert(def.id.to_string());
                let status = nyzhi_auth::auth_status(def.id);
                let marker = if status != "not connected" { "✓" } else { "✗" };
                println!("  {marker} {}: {status}", def.name);
            }
            for (name, _entry) in &config.provider.providers {
                if seen.contains(name) {
                    continue;
                }
                let status = nyzhi_auth::auth_status(name);
                let marker = if status != "not connected" { "✓" } else { "✗" };
                println!("  {marker} {name} (custom): {status}");
            }
            return Ok(());
        }
        _ => {}
    }

    let provider: Arc<dyn nyzhi_provider::Provider> =
        nyzhi_provider::create_provider_async(provider_name, &config)
            .await?
            .into();

    let mut config = config;
    if let Some(trust_str) = &cli.trust {
        match trust_str.parse::<nyzhi_config::TrustMode>() {
            Ok(mode) => config.agent.trust.mode = mode,
            Err(e) => {
                eprintln!("Invalid --trust value: {e}");
                std::process::exit(1);
            }
        }
    }

    match cli.command {
        Some(Commands::Run { prompt }) => {
            run_pipeline(&provider, provider_name, cli.model.as_deref(), &prompt, &workspace, &config).await?;
        }
        Some(Commands::CiFix { log_file, format, commit }) => {
            let ci_log = if let Some(path) = &log_file {
                std::fs::read_to_string(path)?
            } else {
                use std::io::Read;
                let mut buf = String::new();
                std::io::stdin().read_to_string(&mut buf)?;
                buf
            };

            if ci_log.trim().is_empty() {
                eprintln!("No CI log content provided. Pass --log-file or pipe via stdin.");
                std::process::exit(1);
            }

            let prompt = format!(
                "CI failure log (format: {format}):\n\n```\n{ci_log}\n```\n\n\
                 Analyze this CI failure. Identify the root cause, fix the code, and verify \
                 the fix passes. Be surgical - only change what's needed to make CI green."
            );

            run_pipeline(&provider, provider_name, cli.model.as_deref(), &prompt, &workspace, &config).await?;

            if commit {
                let output = tokio::process::Command::new("git")
                    .args(["add", "-A"])
                    .current_dir(&workspace.project_root)
                    .output()
                    .await?;
                if output.status.success() {
                    let _ = tokio::process::Command::new("git")
                        .args(["commit", "-m", "fix: auto-fix CI failure (nyzhi ci-fix)"])
                        .current_dir(&workspace.project_root)
                        .output()
                        .await;
                }
            }
        }
        _ => unreachable!(),
    }

    Ok(())
}

/// Picks the model for a run: explicit `--model`, else the provider's configured
/// default, else the first model the provider advertises.
fn resolve_model(provider: &dyn nyzhi_provider::Provider, model: Option<&str>) -> String {
    model.map(String::from).unwrap_or_else(|| {
        provider
            .supported_models()
            .first()
            .map(|m| m.id.clone())
            .unwrap_or_else(|| "default".to_string())
    })
}

/// Drives one request through the smart pipeline (§4.6) when
/// `smart_pipeline.smart.enabled` is set, otherwise through the thin Runner
/// (§4.6.6). Both paths share the same provider-backed generator and
/// codebase index; only the orchestration around them differs.
async fn run_pipeline(
    provider: &Arc<dyn nyzhi_provider::Provider>,
    provider_name: &str,
    model: Option<&str>,
    prompt: &str,
    workspace: &nyzhi_core::workspace::WorkspaceContext,
    config: &nyzhi_config::Config,
) -> Result<()> {
    use nyzhi_core::generator::{Generator, ProviderGenerator};

    let model_name = resolve_model(provider.as_ref(), model);
    let model_info = provider
        .supported_models()
        .iter()
        .find(|m| m.id == model_name)
        .cloned()
        .unwrap_or_else(|| fallback_model_info(provider_name, &model_name));
    let supports_tools = model_info.supports_tools;

    let api_key = nyzhi_auth::resolve_credential_async(provider_name, None)
        .await
        .ok()
        .map(|c| c.header_value());
    let codebase_index = Arc::new(nyzhi_index::CodebaseIndex::open_sync(
        &workspace.project_root,
        api_key,
    )?);

    let generator: Arc<dyn Generator> = Arc::new(ProviderGenerator::new(
        provider.clone(),
        model_name,
        supports_tools,
    ));

    if config.smart_pipeline.smart.enabled {
        run_smart(generator, model_info, codebase_index, prompt, workspace, config).await
    } else {
        run_thin(generator, codebase_index, prompt, workspace).await
    }
}

async fn run_smart(
    generator: Arc<dyn nyzhi_core::generator::Generator>,
    model_info: nyzhi_provider::ModelInfo,
    codebase_index: Arc<nyzhi_index::CodebaseIndex>,
    prompt: &str,
    workspace: &nyzhi_core::workspace::WorkspaceContext,
    config: &nyzhi_config::Config,
) -> Result<()> {
    use nyzhi_core::cost_preflight::{Pricing, PricingSource};
    use nyzhi_core::repo_index::{IndexRepoIndex, RepoIndex};
    use nyzhi_core::smart_pipeline::{SmartPipeline, SmartPipelineDeps};

    let index: Arc<dyn RepoIndex> = Arc::new(IndexRepoIndex::new(
        codebase_index,
        workspace.project_root.clone(),
    ));

    let pricing = Pricing {
        model: model_info,
        source: PricingSource::ModelCatalog,
    };

    let deps = SmartPipelineDeps {
        index,
        architect_generator: generator.clone(),
        builder_generator: generator,
        interpreter_generator: None,
        pricing,
        project_root: workspace.project_root.clone(),
        memory_text: nyzhi_core::memory::load_memory_for_prompt(&workspace.project_root),
        profile_text: workspace.rules.clone().unwrap_or_default(),
    };

    let pipeline = SmartPipeline::new(
        config.smart_pipeline.clone(),
        deps,
        Arc::new(nyzhi_core::audit::TracingAuditSink),
    );

    let outcome = pipeline.run(prompt, &workspace.project_root).await?;

    println!("plan:");
    for step in &outcome.plan.steps {
        println!("  - {step}");
    }
    if outcome.plan_degraded {
        println!("(plan degraded after request-recovery retries)");
    }
    println!("touched files:");
    for file in &outcome.builder_output.touched_files {
        println!("  {file}");
    }
    println!("{}", outcome.builder_output.message);
    println!(
        "critic: {:?} (attempts: {}, estimated cost: ${:.4})",
        outcome.critic_result.status, outcome.attempts, outcome.cost_estimate.estimated_cost
    );
    if !outcome.critic_result.reasons.is_empty() {
        println!("notes: {}", outcome.critic_result.reasons.join("; "));
    }

    Ok(())
}

async fn run_thin(
    generator: Arc<dyn nyzhi_core::generator::Generator>,
    codebase_index: Arc<nyzhi_index::CodebaseIndex>,
    prompt: &str,
    workspace: &nyzhi_core::workspace::WorkspaceContext,
) -> Result<()> {
    use nyzhi_core::runner::{self, RunnerOptions};
    use nyzhi_core::tools::{change_tracker::ChangeTracker, default_registry, ToolContext};

    let bundle = default_registry(Some(codebase_index.clone()));

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let ctx = ToolContext {
        session_id: uuid::Uuid::new_v4().to_string(),
        cwd,
        project_root: workspace.project_root.clone(),
        depth: 0,
        change_tracker: Arc::new(tokio::sync::Mutex::new(ChangeTracker::new())),
        allowed_tool_names: None,
        todo_store: Some(bundle.todo_store),
        index: Some(codebase_index),
    };

    let outcome = runner::run(prompt, generator, &bundle.registry, &ctx, &RunnerOptions::default(), None).await?;
    println!("{}", outcome.final_message);
    Ok(())
}

/// A custom `--model` that isn't in the provider's catalog (e.g. a
/// self-hosted or newly released model) still needs a pricing row for the
/// cost preflight; this is the zero-cost placeholder used in that case.
fn fallback_model_info(provider_name: &str, model_name: &str) -> nyzhi_provider::ModelInfo {
    nyzhi_provider::ModelInfo {
        id: model_name.to_string(),
        name: model_name.to_string(),
        provider: provider_name.to_string(),
        context_window: 128_000,
        max_output_tokens: 8192,
        supports_tools: true,
        supports_streaming: true,
        supports_vision: false,
        input_price_per_m: 0.0,
        output_price_per_m: 0.0,
        cache_read_price_per_m: 0.0,
        cache_write_price_per_m: 0.0,
        tier: nyzhi_provider::ModelTier::Medium,
        thinking: None,
    }
}

async fn handle_mcp_command(
    action: McpAction,
    workspace: &nyzhi_core::workspace::WorkspaceContext,
    config: &nyzhi_config::Config,
) -> Result<()> {
    use std::collections::HashMap;

    match action {
        McpAction::Add {
            name,
            url,
            scope,
            command_args,
        } => {
            let server_config = if let Some(url) = url {
                nyzhi_config::McpServerConfig::Http {
                    url,
                    headers: HashMap::new(),
                }
            } else if !command_args.is_empty() {
                let command = command_args[0].clone();
                let args = command_args[1..].to_vec();
                nyzhi_config::McpServerConfig::Stdio {
                    command,
                    args,
                    env: HashMap::new(),
                }
            } else {
                eprintln!("Provide either --url or a command after --");
                return Ok(());
            };

            let config_path = if scope == "global" {
                nyzhi_config::Config::config_dir().join("config.toml")
            } else {
                workspace.project_root.join(".nyzhi").join("config.toml")
            };

            let mut existing = if config_path.exists() {
                let content = std::fs::read_to_string(&config_path)?;
                toml::from_str::<nyzhi_config::Config>(&content).unwrap_or_default()
            } else {
                nyzhi_config::Config::default()
            };

            existing.mcp.servers.insert(name.clone(), server_config);

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&config_path, toml::to_string_pretty(&existing)?)?;
            println!("Added MCP server '{name}' to {}", config_path.display());
        }
        McpAction::List => {
            let all_servers = config.mcp.servers.clone();
            if all_servers.is_empty() {
                println!("No MCP servers configured.");
                println!("  Add one: nyzhi mcp add <name> -- <command> [args...]");
            } else {
                println!("MCP servers ({}):", all_servers.len());
                for (name, cfg) in &all_servers {
                    match cfg {
                        nyzhi_config::McpServerConfig::Stdio { command, args, .. } => {
                            println!("  {name}  stdio  {command} {}", args.join(" "));
                        }
                        nyzhi_config::McpServerConfig::Http { url, .. } => {
                            println!("  {name}  http   {url}");
                        }
                    }
                }
            }
        }
        McpAction::Remove { name, scope } => {
            let config_path = if scope == "global" {
                nyzhi_config::Config::config_dir().join("config.toml")
            } else {
                workspace.project_root.join(".nyzhi").join("config.toml")
            };

            if !config_path.exists() {
                eprintln!("Config file not found: {}", config_path.display());
                return Ok(());
            }

            let content = std::fs::read_to_string(&config_path)?;
            let mut existing: nyzhi_config::Config = toml::from_str(&content)?;

            if existing.mcp.servers.remove(&name).is_some() {
                std::fs::write(&config_path, toml::to_string_pretty(&existing)?)?;
                println!("Removed MCP server '{name}' from {}", config_path.display());
            } else {
                eprintln!("MCP server '{name}' not found in {}", config_path.display());
            }
        }
    }

    Ok(())
}

fn prompt_api_key(provider: &str) -> anyhow::Result<()> {
    let display = nyzhi_config::find_provider_def(provider)
        .map(|d| d.name)
        .unwrap_or(provider);
    print!("Enter API key for {display}: ");
    use std::io::Write;
    std::io::stdout().flush()?;
    let mut key = String::new();
    std::io::stdin().read_line(&mut key)?;
    let key = key.trim();
    if key.is_empty() {
        eprintln!("No key entered.");
        return Ok(());
    }
    nyzhi_auth::token_store::store_token(
        provider,
        &nyzhi_auth::token_store::StoredToken {
            access_token: key.to_string(),
            refresh_token: None,
            expires_at: None,
            provider: provider.to_string(),
        },
    )?;
    println!("API key saved for {display}.");
    Ok(())
}
