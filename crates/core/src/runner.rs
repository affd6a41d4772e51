//! The thin non-smart Runner, §4.6.6: used when `smart.enabled` is false.
//! A plain send-request/execute-tool-calls/repeat loop with none of the
//! pipeline's gates, passes, or writeback -- the fallback path when a
//! request doesn't warrant the full SmartPipeline machinery.

use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::generator::{user_message, Generator, GeneratorError, GeneratorRequest};
use crate::repo_index::RepoIndex;
use crate::tools::{ToolContext, ToolRegistry};
use nyzhi_provider::{ContentPart, Message, MessageContent, Role};

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub max_steps: u32,
    pub max_tool_calls: u32,
    pub max_tokens: Option<u32>,
    pub flush_every_ms: u64,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self { max_steps: 20, max_tool_calls: 40, max_tokens: None, flush_every_ms: 50 }
    }
}

/// Minimal context for the thin path: no snippets, no symbols, no repo map --
/// just the files the request names explicitly. Replaces an earlier draft
/// that derived `summary` from a bundle it never actually built.
#[derive(Debug, Clone, Default)]
pub struct MinimalBundle {
    pub focus: Vec<String>,
    pub periphery: Vec<String>,
    pub summary: String,
}

/// Scans `request` for filename-shaped tokens and keeps the ones that exist
/// in the index. `periphery` is always empty -- the thin path doesn't do
/// retrieval, only what the user pointed at directly.
pub async fn minimal_bundle(request: &str, index: &dyn RepoIndex) -> MinimalBundle {
    let re = Regex::new(r"[A-Za-z0-9_./-]+\.[A-Za-z0-9]{1,8}").unwrap();
    let mut focus = Vec::new();
    for m in re.find_iter(request) {
        let candidate = m.as_str().trim_matches(|c| c == '.' || c == '/').to_string();
        if candidate.is_empty() || focus.contains(&candidate) {
            continue;
        }
        if index.open(&candidate).await.is_ok() {
            focus.push(candidate);
        }
    }

    let summary = if focus.is_empty() {
        "no files explicitly named in the request".to_string()
    } else {
        format!("files mentioned: {}", focus.join(", "))
    };

    MinimalBundle { focus, periphery: Vec::new(), summary }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("generator error: {0}")]
    Generator(#[from] GeneratorError),
    #[error("tool call limit of {0} exceeded")]
    ToolCallLimitExceeded(u32),
    #[error("step limit of {0} exceeded without a final message")]
    StepLimitExceeded(u32),
}

#[derive(Debug, Clone)]
pub struct RunnerOutcome {
    pub final_message: String,
    pub steps_used: u32,
    pub tool_calls_used: u32,
}

/// A single token-flush callback. Called once per assistant text chunk; the
/// thin path has no real token stream (the `Generator` trait returns whole
/// messages), so flushing happens at message granularity rather than at the
/// `flushEveryMs` cadence the spec describes for a true streaming provider.
pub type OnToken<'a> = dyn Fn(&str) + Send + Sync + 'a;

pub async fn run(
    request: &str,
    generator: Arc<dyn Generator>,
    tools: &ToolRegistry,
    ctx: &ToolContext,
    opts: &RunnerOptions,
    on_token: Option<&OnToken<'_>>,
) -> Result<RunnerOutcome, RunnerError> {
    let mut messages = vec![user_message(request)];
    let mut tool_calls_used = 0u32;
    let mut steps_used = 0u32;

    loop {
        if steps_used >= opts.max_steps {
            return Err(RunnerError::StepLimitExceeded(opts.max_steps));
        }
        steps_used += 1;

        let gen_request = GeneratorRequest {
            messages: messages.clone(),
            response_format: crate::generator::ResponseFormat::Default,
            temperature: None,
            max_tokens: opts.max_tokens,
            tools: if generator.supports_tools() { tools.definitions() } else { Vec::new() },
            stream: false,
        };

        let response = generator.generate(&gen_request).await?;
        let tool_uses = extract_tool_uses(&response.message);

        if tool_uses.is_empty() {
            let text = response.text().to_string();
            if let Some(cb) = on_token {
                cb(&text);
            }
            return Ok(RunnerOutcome { final_message: text, steps_used, tool_calls_used });
        }

        messages.push(response.message.clone());

        let mut result_parts = Vec::with_capacity(tool_uses.len());
        for (id, name, input) in tool_uses {
            if tool_calls_used >= opts.max_tool_calls {
                return Err(RunnerError::ToolCallLimitExceeded(opts.max_tool_calls));
            }
            tool_calls_used += 1;

            let output = match tools.execute(&name, input, ctx).await {
                Ok(result) => result.output,
                Err(err) => format!("error: {err}"),
            };
            result_parts.push(ContentPart::ToolResult { tool_use_id: id, content: output });
        }

        messages.push(Message { role: Role::Tool, content: MessageContent::Parts(result_parts) });
    }
}

fn extract_tool_uses(message: &Message) -> Vec<(String, String, Value)> {
    match &message.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input } => Some((id.clone(), name.clone(), input.clone())),
                _ => None,
            })
            .collect(),
        MessageContent::Text(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratorResponse;
    use crate::repo_index::FixtureRepoIndex;
    use crate::tools::change_tracker::ChangeTracker;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct ScriptedGenerator(Mutex<Vec<Message>>, bool);

    #[async_trait]
    impl Generator for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }
        fn supports_tools(&self) -> bool {
            self.1
        }
        async fn generate(&self, _request: &GeneratorRequest) -> Result<GeneratorResponse, GeneratorError> {
            let mut scripts = self.0.lock().unwrap();
            let message = if scripts.len() > 1 { scripts.remove(0) } else { scripts[0].clone() };
            Ok(GeneratorResponse { message, usage: None, response_format_downgraded: false })
        }
    }

    fn text_message(text: &str) -> Message {
        Message { role: Role::Assistant, content: MessageContent::Text(text.to_string()) }
    }

    fn test_ctx() -> ToolContext {
        ToolContext {
            session_id: "s1".to_string(),
            cwd: PathBuf::from("."),
            project_root: PathBuf::from("."),
            depth: 0,
            change_tracker: Arc::new(AsyncMutex::new(ChangeTracker::new())),
            allowed_tool_names: None,
            todo_store: None,
            index: None,
        }
    }

    #[tokio::test]
    async fn returns_final_message_when_no_tool_calls() {
        let gen = Arc::new(ScriptedGenerator(Mutex::new(vec![text_message("all done")]), false));
        let tools = ToolRegistry::new();
        let ctx = test_ctx();
        let opts = RunnerOptions::default();

        let outcome = run("do a thing", gen, &tools, &ctx, &opts, None).await.unwrap();
        assert_eq!(outcome.final_message, "all done");
        assert_eq!(outcome.steps_used, 1);
        assert_eq!(outcome.tool_calls_used, 0);
    }

    #[tokio::test]
    async fn step_limit_is_enforced() {
        let gen = Arc::new(ScriptedGenerator(
            Mutex::new(vec![Message {
                role: Role::Assistant,
                content: MessageContent::Parts(vec![ContentPart::ToolUse {
                    id: "1".to_string(),
                    name: "nonexistent".to_string(),
                    input: serde_json::json!({}),
                }]),
            }]),
            true,
        ));
        let tools = ToolRegistry::new();
        let ctx = test_ctx();
        let opts = RunnerOptions { max_steps: 2, max_tool_calls: 10, max_tokens: None, flush_every_ms: 50 };

        let err = run("loop forever", gen, &tools, &ctx, &opts, None).await.unwrap_err();
        assert!(matches!(err, RunnerError::StepLimitExceeded(2)));
    }

    #[tokio::test]
    async fn minimal_bundle_finds_only_mentioned_existing_files() {
        let index = FixtureRepoIndex::new().with_file("src/index.ts", "const x = 1;\n");
        let bundle = minimal_bundle("please fix src/index.ts and also missing.rs", &index).await;
        assert_eq!(bundle.focus, vec!["src/index.ts".to_string()]);
        assert!(bundle.periphery.is_empty());
    }
}
