//! End-to-end coverage of the literal scenarios the Smart Pipeline was
//! specified against: happy path, non-DSL recovery, a deterministic patch
//! failure recovered by a single replan, terminal quality-gate exhaustion,
//! a builder-side context request, and a deep-mode research run that
//! saturates its budget before the architect phase starts.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nyzhi_config::{DeepInvestigationConfig, SmartPipelineConfig};
use nyzhi_core::generator::{Generator, GeneratorError, GeneratorRequest, GeneratorResponse};
use nyzhi_core::repo_index::FixtureRepoIndex;
use nyzhi_core::smart_pipeline::{PipelineError, SmartPipeline, SmartPipelineDeps};
use nyzhi_provider::{Message, MessageContent, ModelInfo, ModelTier, Role};
use tempfile::tempdir;

struct ScriptedGenerator(Mutex<Vec<String>>);

impl ScriptedGenerator {
    fn new(scripts: Vec<&str>) -> Self {
        Self(Mutex::new(scripts.into_iter().map(String::from).collect()))
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }
    async fn generate(&self, _request: &GeneratorRequest) -> Result<GeneratorResponse, GeneratorError> {
        let mut scripts = self.0.lock().unwrap();
        let text = if scripts.len() > 1 { scripts.remove(0) } else { scripts[0].clone() };
        Ok(GeneratorResponse { message: Message { role: Role::Assistant, content: MessageContent::Text(text) }, usage: None, response_format_downgraded: false })
    }
}

fn pricing() -> nyzhi_core::cost_preflight::Pricing {
    nyzhi_core::cost_preflight::Pricing {
        model: ModelInfo {
            id: "m".into(),
            name: "m".into(),
            provider: "test".into(),
            context_window: 100_000,
            max_output_tokens: 4096,
            supports_tools: true,
            supports_streaming: true,
            supports_vision: false,
            input_price_per_m: 3.0,
            output_price_per_m: 15.0,
            cache_read_price_per_m: 0.3,
            cache_write_price_per_m: 3.75,
            tier: ModelTier::Medium,
            thinking: None,
        },
        source: nyzhi_core::cost_preflight::PricingSource::ModelCatalog,
    }
}

fn greeting_patch(search: &str, replace: &str) -> String {
    serde_json::json!({
        "kind": "search_replace",
        "edits": [{"action": "replace", "file": "index.ts", "search_block": search, "replace_block": replace}]
    })
    .to_string()
}

fn well_formed_dsl(target: &str) -> String {
    format!("PLAN\n- update greeting\n\nTARGETS\n- {target}\n\nRISK\nlow\n\nVERIFY\n- edits\n")
}

/// Scenario 1: happy path. One architect pass, one builder attempt, critic PASS.
#[tokio::test]
async fn happy_path_runs_in_one_attempt() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();
    let index = Arc::new(FixtureRepoIndex::new().with_file("index.ts", "const x = \"Hello\";\n"));

    let deps = SmartPipelineDeps {
        index,
        architect_generator: Arc::new(ScriptedGenerator::new(vec![&well_formed_dsl("index.ts")])),
        builder_generator: Arc::new(ScriptedGenerator::new(vec![&greeting_patch("\"Hello\"", "\"Hi\"")])),
        interpreter_generator: None,
        pricing: pricing(),
        project_root: dir.path().to_path_buf(),
        memory_text: String::new(),
        profile_text: String::new(),
    };
    let pipeline = SmartPipeline::new(SmartPipelineConfig::default(), deps, Arc::new(nyzhi_core::audit::CollectingAuditSink::new()));

    let outcome = pipeline.run("update index greeting", dir.path()).await.unwrap();
    assert!(!outcome.plan_degraded);
    assert_eq!(outcome.attempts, 1);
    let content = std::fs::read_to_string(dir.path().join("index.ts")).unwrap();
    assert!(content.contains("\"Hi\""));
}

/// Scenario 2: architect returns JSON instead of DSL on pass 1, then valid
/// DSL on the strict-retry pass; build proceeds normally after that.
#[tokio::test]
async fn non_dsl_output_recovers_on_strict_retry() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();
    let index = Arc::new(FixtureRepoIndex::new().with_file("index.ts", "const x = \"Hello\";\n"));

    let deps = SmartPipelineDeps {
        index,
        architect_generator: Arc::new(ScriptedGenerator::new(vec![
            "{\"note\": \"not the expected DSL shape\"}",
            &well_formed_dsl("index.ts"),
        ])),
        builder_generator: Arc::new(ScriptedGenerator::new(vec![&greeting_patch("\"Hello\"", "\"Hi\"")])),
        interpreter_generator: None,
        pricing: pricing(),
        project_root: dir.path().to_path_buf(),
        memory_text: String::new(),
        profile_text: String::new(),
    };
    let mut config = SmartPipelineConfig::default();
    config.smart.max_request_recovery = 1;
    let pipeline = SmartPipeline::new(config, deps, Arc::new(nyzhi_core::audit::CollectingAuditSink::new()));

    let outcome = pipeline.run("update index greeting", dir.path()).await.unwrap();
    assert!(!outcome.plan_degraded);
}

/// Scenario 3: the first plan targets a file that doesn't exist; the
/// deterministic ENOENT failure triggers one bounded replan against a known
/// path, and the retried build succeeds.
#[tokio::test]
async fn deterministic_apply_failure_triggers_one_replan() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();
    let index = Arc::new(FixtureRepoIndex::new().with_file("index.ts", "const x = \"Hello\";\n"));

    let deps = SmartPipelineDeps {
        index,
        architect_generator: Arc::new(ScriptedGenerator::new(vec![&well_formed_dsl("nope.ts"), &well_formed_dsl("index.ts")])),
        builder_generator: Arc::new(ScriptedGenerator::new(vec![
            &greeting_patch_for("nope.ts", "\"Hello\"", "\"Hi\""),
            &greeting_patch("\"Hello\"", "\"Hi\""),
        ])),
        interpreter_generator: None,
        pricing: pricing(),
        project_root: dir.path().to_path_buf(),
        memory_text: String::new(),
        profile_text: String::new(),
    };
    let pipeline = SmartPipeline::new(SmartPipelineConfig::default(), deps, Arc::new(nyzhi_core::audit::CollectingAuditSink::new()));

    let outcome = pipeline.run("update index greeting", dir.path()).await.unwrap();
    assert_eq!(outcome.plan.target_files, vec!["index.ts".to_string()]);
    let content = std::fs::read_to_string(dir.path().join("index.ts")).unwrap();
    assert!(content.contains("\"Hi\""));
}

fn greeting_patch_for(file: &str, search: &str, replace: &str) -> String {
    serde_json::json!({
        "kind": "search_replace",
        "edits": [{"action": "replace", "file": file, "search_block": search, "replace_block": replace}]
    })
    .to_string()
}

/// Scenario 4: the architect can only ever produce an unresolvable plan
/// (unknown target, no concrete path in context either) -- after exhausting
/// its passes the synthesized fallback plan still fails the quality gate, so
/// the run raises a terminal architect error instead of proceeding.
#[tokio::test]
async fn quality_gate_exhaustion_is_a_terminal_error() {
    let dir = tempdir().unwrap();
    let index = Arc::new(FixtureRepoIndex::new());

    let bad_dsl = "PLAN\n- do something vague\n\nTARGETS\n- unknown\n\nRISK\nlow\n\nVERIFY\n".to_string();
    let deps = SmartPipelineDeps {
        index,
        architect_generator: Arc::new(ScriptedGenerator::new(vec![&bad_dsl])),
        builder_generator: Arc::new(ScriptedGenerator::new(vec!["unused"])),
        interpreter_generator: None,
        pricing: pricing(),
        project_root: dir.path().to_path_buf(),
        memory_text: String::new(),
        profile_text: String::new(),
    };
    let mut config = SmartPipelineConfig::default();
    config.smart.max_request_recovery = 1;
    let pipeline = SmartPipeline::new(config, deps, Arc::new(nyzhi_core::audit::CollectingAuditSink::new()));

    let err = pipeline.run("do something with nothing in context", dir.path()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Architect(_)));
}

/// Scenario 5: the builder asks for more context before it can produce a
/// patch; the refresh is bounded by `maxContextRefreshes=1` and the retried
/// attempt passes.
#[tokio::test]
async fn builder_context_request_is_fulfilled_then_passes() {
    let dir = tempdir().unwrap();
    std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();
    let index = Arc::new(FixtureRepoIndex::new().with_file("index.ts", "const x = \"Hello\";\n"));

    let agent_request = nyzhi_core::protocol::AgentRequest::new(
        "builder",
        "r1",
        vec![nyzhi_core::protocol::AgentNeed::FileRead { path: "index.ts".to_string() }],
    );

    let deps = SmartPipelineDeps {
        index,
        architect_generator: Arc::new(ScriptedGenerator::new(vec![&well_formed_dsl("index.ts")])),
        builder_generator: Arc::new(ScriptedGenerator::new(vec![&agent_request.to_lane_text(), &greeting_patch("\"Hello\"", "\"Hi\"")])),
        interpreter_generator: None,
        pricing: pricing(),
        project_root: dir.path().to_path_buf(),
        memory_text: String::new(),
        profile_text: String::new(),
    };
    let mut config = SmartPipelineConfig::default();
    config.context.max_context_refreshes = 1;
    let pipeline = SmartPipeline::new(config, deps, Arc::new(nyzhi_core::audit::CollectingAuditSink::new()));

    let outcome = pipeline.run("update index greeting", dir.path()).await.unwrap();
    assert!(!outcome.plan_degraded);
    let content = std::fs::read_to_string(dir.path().join("index.ts")).unwrap();
    assert!(content.contains("\"Hi\""));
}

/// Scenario 6: deep investigation is enabled with a low evidence gate/tool
/// quota and `minCycles=2`; research saturates before the architect phase
/// runs and the pipeline proceeds to completion.
#[tokio::test]
async fn deep_mode_research_saturates_then_pipeline_proceeds() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("src")).unwrap();
    std::fs::write(dir.path().join("src/greeting.rs"), "pub fn greet() {}\n").unwrap();
    let index = Arc::new(
        FixtureRepoIndex::new()
            .with_file("src/greeting.rs", "pub fn greet() {}\n")
            .with_file("src/caller.rs", "use crate::greeting::greet;\n"),
    );

    let greet_dsl = "PLAN\n- tweak greeting\n\nTARGETS\n- src/greeting.rs\n\nRISK\nlow\n\nVERIFY\n- edits\n".to_string();
    let greet_patch = serde_json::json!({
        "kind": "search_replace",
        "edits": [{"action": "replace", "file": "src/greeting.rs", "search_block": "pub fn greet() {}", "replace_block": "pub fn greet() { println!(\"hi\"); }"}]
    })
    .to_string();

    let deps = SmartPipelineDeps {
        index,
        architect_generator: Arc::new(ScriptedGenerator::new(vec![&greet_dsl])),
        builder_generator: Arc::new(ScriptedGenerator::new(vec![&greet_patch])),
        interpreter_generator: None,
        pricing: pricing(),
        project_root: dir.path().to_path_buf(),
        memory_text: String::new(),
        profile_text: String::new(),
    };
    let mut config = SmartPipelineConfig::default();
    config.deep_investigation = DeepInvestigationConfig { enabled: true, deep_scan_preset: None, tool_quota: 1, evidence_gate: 1, investigation_budget_cycles: 2, max_cycles: 5 };
    let pipeline = SmartPipeline::new(config, deps, Arc::new(nyzhi_core::audit::CollectingAuditSink::new()));

    let outcome = pipeline.run("greet", dir.path()).await.unwrap();
    let research = outcome.research.expect("research should have run");
    assert!(research.saturated());
    assert!(!outcome.plan_degraded);
}
