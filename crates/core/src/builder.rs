//! `BuilderRunner`: turns a `Plan` into a patch, in one of three modes. The
//! actual file mutation is delegated to `patch::apply_patch`; this module's
//! job is producing a `Patch` value from a model response and recognizing
//! when the model asks for more context instead (`context_request`).

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::architect::Plan;
use crate::context_assembler::ContextBundle;
use crate::generator::{user_message, Generator, GeneratorError, GeneratorRequest, ResponseFormat};
use crate::patch::{Patch, PatchApplyFailure};
use crate::protocol::AgentRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderMode {
    ToolCalls,
    PatchJson,
    Freeform,
}

impl Default for BuilderMode {
    fn default() -> Self {
        BuilderMode::ToolCalls
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchFormat {
    SearchReplace,
    FileWrites,
}

impl Default for PatchFormat {
    fn default() -> Self {
        PatchFormat::SearchReplace
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuilderOptions {
    pub mode: BuilderMode,
    pub patch_format: PatchFormat,
    pub fallback_to_interpreter: bool,
    pub note: Option<String>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct BuilderOutput {
    pub message: String,
    pub touched_files: Vec<String>,
    pub patch: Option<Patch>,
    pub context_request: Option<AgentRequest>,
    pub mode_used: BuilderMode,
}

pub struct BuilderRunner {
    generator: Arc<dyn Generator>,
    interpreter: Option<Arc<dyn Generator>>,
}

impl BuilderRunner {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator, interpreter: None }
    }

    pub fn with_interpreter(mut self, interpreter: Arc<dyn Generator>) -> Self {
        self.interpreter = Some(interpreter);
        self
    }

    pub async fn run(
        &self,
        plan: &Plan,
        context: &ContextBundle,
        opts: &BuilderOptions,
        cwd: &Path,
    ) -> Result<BuilderOutput, PatchApplyFailure> {
        let generated = self.generate(plan, context, opts).await;
        let text = match generated {
            Ok(text) => text,
            Err(e) => {
                return Err(PatchApplyFailure {
                    error: format!("builder generator call failed: {e}"),
                    source: "generator".to_string(),
                    patches: Vec::new(),
                    rollback: Default::default(),
                    raw_output: None,
                    deterministic: false,
                });
            }
        };

        if let Some(request) = AgentRequest::from_lane_text(&text) {
            return Ok(BuilderOutput {
                message: text,
                touched_files: Vec::new(),
                patch: None,
                context_request: Some(request),
                mode_used: opts.mode,
            });
        }

        let mut patch = extract_patch(&text, opts.patch_format);

        if patch.is_none() && opts.mode == BuilderMode::Freeform && opts.fallback_to_interpreter {
            if let Some(interpreter) = &self.interpreter {
                if let Ok(reformatted) = interpret_into_patch(interpreter, &text, opts.patch_format).await {
                    patch = extract_patch(&reformatted, opts.patch_format);
                }
            }
        }

        let touched = match &patch {
            Some(p) => crate::patch::apply_patch(p, cwd, &plan.target_files, &plan.create_files)?,
            None => Vec::new(),
        };

        Ok(BuilderOutput { message: text, touched_files: touched, patch, context_request: None, mode_used: opts.mode })
    }

    async fn generate(&self, plan: &Plan, context: &ContextBundle, opts: &BuilderOptions) -> Result<String, GeneratorError> {
        let prompt = build_builder_prompt(plan, context, opts);
        let response_format = match opts.mode {
            BuilderMode::PatchJson => ResponseFormat::Json,
            _ => ResponseFormat::Default,
        };
        let request = GeneratorRequest {
            response_format,
            max_tokens: opts.max_tokens,
            ..GeneratorRequest::text_only(vec![user_message(prompt)])
        };
        let response = self.generator.generate(&request).await?;
        Ok(response.text().to_string())
    }
}

async fn interpret_into_patch(interpreter: &Arc<dyn Generator>, freeform: &str, format: PatchFormat) -> Result<String, GeneratorError> {
    let prompt = format!(
        "Reformat this change description into a {format:?} patch, as a single JSON object, no prose:\n\n{freeform}"
    );
    let request = GeneratorRequest { response_format: ResponseFormat::Json, ..GeneratorRequest::text_only(vec![user_message(prompt)]) };
    let response = interpreter.generate(&request).await?;
    Ok(response.text().to_string())
}

fn build_builder_prompt(plan: &Plan, context: &ContextBundle, opts: &BuilderOptions) -> String {
    let mut prompt = String::new();
    prompt.push_str("Implement this plan against the given context. Emit a single patch JSON object.\n\n");
    if let Some(note) = &opts.note {
        prompt.push_str(&format!("Feedback from a prior attempt: {note}\n\n"));
    }
    prompt.push_str(&format!("Plan steps: {:?}\n", plan.steps));
    prompt.push_str(&format!("Targets: {:?}\n", plan.target_files));
    prompt.push_str(&format!("Create files: {:?}\n", plan.create_files));
    prompt.push_str(&format!("Verification: {:?}\n\n", plan.verification));
    prompt.push_str(&context.serialized.content);
    prompt
}

fn extract_patch(text: &str, format: PatchFormat) -> Option<Patch> {
    let candidate = extract_json_block(text).unwrap_or_else(|| text.trim().to_string());
    let parsed: Patch = serde_json::from_str(&candidate).ok()?;
    let _ = format;
    Some(parsed)
}

fn extract_json_block(text: &str) -> Option<String> {
    let fence_re = Regex::new(r"(?s)```(?:json)?\n(.*?)```").unwrap();
    fence_re.captures(text).map(|c| c[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratorResponse;
    use async_trait::async_trait;
    use nyzhi_provider::{Message, MessageContent, Role};
    use tempfile::tempdir;

    struct StubGenerator(String);

    #[async_trait]
    impl Generator for StubGenerator {
        fn name(&self) -> &str {
            "stub"
        }
        async fn generate(&self, _request: &GeneratorRequest) -> Result<GeneratorResponse, GeneratorError> {
            Ok(GeneratorResponse {
                message: Message { role: Role::Assistant, content: MessageContent::Text(self.0.clone()) },
                usage: None,
                response_format_downgraded: false,
            })
        }
    }

    fn bundle() -> ContextBundle {
        use crate::context_assembler::*;
        ContextBundle {
            queries: vec![],
            search_results: vec![],
            snippets: vec![],
            symbols: Default::default(),
            ast: Default::default(),
            impact: Default::default(),
            selection: Selection::default(),
            files: vec![],
            repo_map: None,
            repo_map_raw: None,
            research: None,
            memory: String::new(),
            profile: String::new(),
            warnings: Default::default(),
            serialized: Serialized { mode: SerializedMode::BundleText, audience: Audience::Builder, content: String::new() },
            redaction: Default::default(),
        }
    }

    #[tokio::test]
    async fn patch_json_mode_applies_generated_patch() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("index.ts"), "const x = \"Hello\";\n").unwrap();

        let patch_json = serde_json::json!({
            "kind": "search_replace",
            "edits": [{"action": "replace", "file": "index.ts", "search_block": "\"Hello\"", "replace_block": "\"Hi\""}]
        });
        let gen = Arc::new(StubGenerator(patch_json.to_string()));
        let runner = BuilderRunner::new(gen);

        let plan = Plan { target_files: vec!["index.ts".into()], ..Default::default() };
        let opts = BuilderOptions { mode: BuilderMode::PatchJson, ..Default::default() };

        let output = runner.run(&plan, &bundle(), &opts, dir.path()).await.unwrap();
        assert_eq!(output.touched_files, vec!["index.ts".to_string()]);
    }

    #[tokio::test]
    async fn context_request_short_circuits_patch_application() {
        let dir = tempdir().unwrap();
        let req = AgentRequest::new("builder", "r1", vec![crate::protocol::AgentNeed::FileRead { path: "index.ts".into() }]);
        let gen = Arc::new(StubGenerator(req.to_lane_text()));
        let runner = BuilderRunner::new(gen);

        let plan = Plan::default();
        let opts = BuilderOptions::default();
        let output = runner.run(&plan, &bundle(), &opts, dir.path()).await.unwrap();
        assert!(output.context_request.is_some());
        assert!(output.touched_files.is_empty());
    }
}
