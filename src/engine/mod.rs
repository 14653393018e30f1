//! The Orchestrator: a multi-turn, single-flight Plan/Act loop.
//!
//! Each turn assembles a working set, issues one provider call, parses
//! exactly one tool invocation out of the response, validates it against the
//! registry, then either executes a context tool locally and loops or maps
//! the invocation to proposals and returns. Recoverable errors are reflected
//! back to the model as user turns; per-kind counters make them fatal past
//! their limits.

pub mod context_tools;
pub mod diff;
pub mod fallback;
pub mod mapper;
pub mod parser;
pub mod registry;
pub mod templates;
pub mod types;
pub mod working_set;

pub use types::{ChatInput, LoopError, RunOutcome, TaskState};

use crate::cache::SessionStore;
use crate::config::Config;
use crate::credentials::Credentials;
use crate::events::{AssistantPhase, EventSink};
use crate::prompts::{self, PromptStore};
use crate::proposals::{Proposal, ProposalBody};
use crate::providers::{CallRequest, ChatMessage, ProviderError, ProviderGateway};
use registry::ToolKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use types::{PlanStep, ToolRun};

/// Consecutive schema rejections tolerated before the loop fails.
const MAX_CONSECUTIVE_VALIDATION_ERRORS: usize = 2;
/// Unknown-tool reflections tolerated before the loop fails.
const MAX_UNKNOWN_TOOL_RETRIES: usize = 1;

pub struct Orchestrator {
    config: crate::config::OrchestratorConfig,
    catalog_enabled: bool,
    gateway: ProviderGateway,
    events: Arc<EventSink>,
    prompts: PromptStore,
    sessions: SessionStore,
    workflows: HashMap<String, TaskState>,
}

impl Orchestrator {
    pub fn new(config: &Config, creds: &Credentials, events: Arc<EventSink>) -> Self {
        let gateway =
            ProviderGateway::new(config.providers.clone(), creds, &config.orchestrator);
        Self {
            config: config.orchestrator.clone(),
            catalog_enabled: config.catalog.enabled,
            gateway,
            events,
            prompts: PromptStore::load(),
            sessions: SessionStore::new(),
            workflows: HashMap::new(),
        }
    }

    pub fn events(&self) -> Arc<EventSink> {
        self.events.clone()
    }

    /// Run one chat request to proposals (the `runLLM` operation).
    pub async fn run_chat(
        &mut self,
        input: ChatInput,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, LoopError> {
        let workflow_id = input
            .workflow_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut state = self
            .workflows
            .remove(&workflow_id)
            .unwrap_or_else(|| TaskState::new(workflow_id.clone()));
        if state.in_flight {
            self.workflows.insert(workflow_id.clone(), state);
            return Err(LoopError::Provider(
                "another request is in flight for this workflow".to_string(),
            ));
        }
        state.in_flight = true;
        state.absorb_context(&input.context);
        self.sessions.set_workflow(&input.project_id, &workflow_id);

        let result = self.drive(&input, &mut state, &cancel).await;

        state.in_flight = false;
        let outcome = result.map(|(proposals, is_complete)| RunOutcome {
            workflow_id: workflow_id.clone(),
            proposals,
            task_state: state.view(),
            token_totals: state.token_totals,
            is_complete,
        });
        self.workflows.insert(workflow_id, state);
        outcome
    }

    async fn drive(
        &mut self,
        input: &ChatInput,
        state: &mut TaskState,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Proposal>, bool), LoopError> {
        let key = state.workflow_id.clone();
        self.events.push(&key, "orchestrator.start");

        // Deterministic template bypass: no provider call at all.
        if let Some(proposals) = templates::match_template(&input.message) {
            let op_count: usize = proposals
                .iter()
                .map(|p| match &p.body {
                    ProposalBody::ObjectOp { ops } => ops.len(),
                    _ => 0,
                })
                .sum();
            state.object_op_count += op_count;
            info!("Template bypass matched; emitting {} proposals", proposals.len());
            self.events.push(
                &key,
                format!("proposals.mapped template count={}", proposals.len()),
            );
            return Ok((proposals, false));
        }

        state
            .history
            .push(ChatMessage::new("user", input.message.clone()));

        let system_prompt = self.prompts.render(
            prompts::SYSTEM_PROMPT,
            &[
                ("tool_list", registry::tool_list_for_prompt().as_str()),
                (
                    "workspace_root",
                    self.config
                        .workspace_root
                        .as_ref()
                        .map(|p| p.to_string_lossy().to_string())
                        .unwrap_or_else(|| "game".to_string())
                        .as_str(),
                ),
            ],
        );

        let mut consecutive_validation_errors = 0usize;
        let mut unknown_tool_retries = 0usize;
        let mut cache_facts: Vec<String> = Vec::new();
        let mut provider_failure: Option<String> = None;

        for turn in 0..self.config.max_turns {
            if cancel.is_cancelled() {
                self.events.push(&key, "error.provider cancelled");
                return Err(LoopError::Cancelled);
            }

            working_set::maybe_compact(state, self.config.context_window_tokens);
            if let Some((_, end)) = state.history_deleted_range {
                state.fingerprints
                    .insert("historyFoldedTurns".to_string(), end.to_string());
            }

            let messages =
                working_set::build_working_set(&system_prompt, state, &cache_facts);
            cache_facts.clear();
            let input_estimate = working_set::estimate_tokens_for_messages(&messages);

            let response = self
                .gateway
                .call(
                    CallRequest {
                        system_prompt: &messages[0].content,
                        messages: &messages[1..],
                        model_override: input.model_override.as_deref(),
                        provider_override: input.provider.as_deref(),
                    },
                    cancel,
                )
                .await;

            let response = match response {
                Ok(r) => r,
                Err(ProviderError::Cancelled) => {
                    self.events.push(&key, "error.provider cancelled");
                    return Err(LoopError::Cancelled);
                }
                Err(err) => {
                    let msg = err.to_string();
                    self.events.push(&key, format!("error.provider {msg}"));
                    if input.provider.is_some() {
                        // Explicitly requested providers are never masked by
                        // templates or fallbacks.
                        return Err(LoopError::Provider(msg));
                    }
                    provider_failure = Some(msg);
                    break;
                }
            };

            let usage = response.usage.clone().unwrap_or_default();
            state.token_totals.input += usage.input.unwrap_or(input_estimate);
            state.token_totals.output += usage
                .output
                .unwrap_or_else(|| working_set::estimate_tokens(&response.content));
            self.events.push(
                &key,
                format!(
                    "provider.response turn={} chars={}",
                    turn + 1,
                    response.content.chars().count()
                ),
            );

            let parsed = match parser::parse_tool_call(&response.content) {
                Ok(parsed) => parsed,
                Err(parser::ParseError::NoToolCall) => {
                    self.events.push(&key, "error.validation _parse no tool call parsed");
                    if input.provider.is_some() {
                        return Err(LoopError::Parse("no tool call parsed".to_string()));
                    }
                    state.history.push(ChatMessage::new("assistant", response.content));
                    self.reflect(state, self.prompts.render(prompts::NUDGE_NO_TOOL, &[]));
                    continue;
                }
                Err(parser::ParseError::MultipleToolCalls) => {
                    state.history.push(ChatMessage::new("assistant", response.content));
                    self.events
                        .push(&key, "error.validation _multiple emit exactly one tool call per message");
                    consecutive_validation_errors += 1;
                    if consecutive_validation_errors > MAX_CONSECUTIVE_VALIDATION_ERRORS {
                        return Err(LoopError::Validation {
                            tool: "_multiple".to_string(),
                            message: "emit exactly one tool call per message".to_string(),
                        });
                    }
                    self.reflect(state, self.prompts.render(prompts::NUDGE_SINGLE_TOOL, &[]));
                    continue;
                }
            };

            if !self.config.allow_text_before_tool && !parsed.leading_text.is_empty() {
                state.history.push(ChatMessage::new("assistant", response.content));
                consecutive_validation_errors += 1;
                if consecutive_validation_errors > MAX_CONSECUTIVE_VALIDATION_ERRORS {
                    return Err(LoopError::Validation {
                        tool: parsed.invocation.name.clone(),
                        message: "prose before the tool call is not allowed".to_string(),
                    });
                }
                self.reflect(
                    state,
                    "VALIDATION_ERROR _format\nprose before the tool call is not allowed"
                        .to_string(),
                );
                continue;
            }
            if self.config.enforce_tool_at_end && !parsed.trailing_text.is_empty() {
                warn!("Prose follows the tool tag; ignoring trailing text");
                self.events.push(&key, "warn.text_after_tool");
            }

            // The assistant-emitted tool call joins the provider-visible
            // memory verbatim.
            state
                .history
                .push(ChatMessage::new("assistant", response.content.clone()));

            let name = parsed.invocation.name.clone();
            self.events.push(&key, format!("tool.parsed {name}"));

            let Some(spec) = registry::find(&name) else {
                unknown_tool_retries += 1;
                self.events
                    .push(&key, format!("error.validation {name} unknown tool"));
                if unknown_tool_retries > MAX_UNKNOWN_TOOL_RETRIES {
                    return Err(LoopError::UnknownTool(name));
                }
                let nudge = self
                    .prompts
                    .render(prompts::NUDGE_UNKNOWN_TOOL, &[("tool", name.as_str())]);
                self.reflect(state, nudge);
                continue;
            };

            let args = serde_json::Value::Object(parsed.invocation.args.clone());
            let normalized = match registry::validate(spec, &args) {
                Ok(v) => v,
                Err(issues) => {
                    let rendered = registry::render_issues(&issues);
                    self.events.push(
                        &key,
                        format!("error.validation {name} {}", first_line(&rendered)),
                    );
                    consecutive_validation_errors += 1;
                    if consecutive_validation_errors > MAX_CONSECUTIVE_VALIDATION_ERRORS {
                        return Err(LoopError::Validation {
                            tool: name,
                            message: rendered,
                        });
                    }
                    let nudge = self.prompts.render(
                        prompts::NUDGE_VALIDATION,
                        &[("tool", name.as_str()), ("issues", rendered.as_str())],
                    );
                    self.reflect(state, nudge);
                    continue;
                }
            };
            consecutive_validation_errors = 0;
            self.events.push(&key, format!("tool.valid {name}"));

            match spec.kind {
                ToolKind::Context => {
                    self.events.push(&key, format!("context.request {name}"));
                    match context_tools::execute_context_tool(&name, &normalized, input, state) {
                        Ok(out) => {
                            self.sessions
                                .set_last_tool(&input.project_id, &name, out.value.clone());
                            state.tool_runs.push(ToolRun {
                                name: name.clone(),
                                ok: true,
                                summary: summarize_value(&out.value),
                            });
                            if let Some(fact) = out.cache_fact {
                                // Cache-served: inject the fact, not the body.
                                self.reflect(
                                    state,
                                    format!("TOOL_RESULT {name}\n(cached) {fact}"),
                                );
                                cache_facts.push(fact);
                            } else {
                                self.reflect(
                                    state,
                                    format!("TOOL_RESULT {name}\n{}", out.value),
                                );
                            }
                            self.events.push(&key, format!("tool.result {name}"));
                        }
                        Err(msg) => {
                            state.tool_runs.push(ToolRun {
                                name: name.clone(),
                                ok: false,
                                summary: msg.clone(),
                            });
                            self.reflect(
                                state,
                                format!("TOOL_RESULT {name}\n{{\"error\":{}}}", serde_json::Value::String(msg.clone())),
                            );
                            self.events.push(&key, format!("tool.result {name} error"));
                        }
                    }
                }
                ToolKind::Planning => {
                    self.apply_plan_tool(state, &name, &normalized);
                    self.events.push(&key, "planning…");
                }
                ToolKind::Message => {
                    let text = normalized
                        .get("text")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default();
                    let phase = normalized
                        .get("phase")
                        .and_then(|v| v.as_str())
                        .unwrap_or("update");
                    self.events
                        .push_assistant_text(&key, AssistantPhase::parse(phase), text);
                }
                ToolKind::Script | ToolKind::Instance | ToolKind::Asset | ToolKind::Completion => {
                    match mapper::map_invocation(
                        &name,
                        &normalized,
                        input,
                        state,
                        self.catalog_enabled,
                    ) {
                        Err(mapper::MapError::Validation(issues)) => {
                            let rendered = registry::render_issues(&issues);
                            self.events.push(
                                &key,
                                format!("error.validation {name} {}", first_line(&rendered)),
                            );
                            consecutive_validation_errors += 1;
                            if consecutive_validation_errors > MAX_CONSECUTIVE_VALIDATION_ERRORS {
                                return Err(LoopError::Validation {
                                    tool: name,
                                    message: rendered,
                                });
                            }
                            let nudge = self.prompts.render(
                                prompts::NUDGE_VALIDATION,
                                &[("tool", name.as_str()), ("issues", rendered.as_str())],
                            );
                            self.reflect(state, nudge);
                        }
                        Err(mapper::MapError::Policy(msg)) => {
                            self.events
                                .push(&key, format!("error.validation {name} {}", first_line(&msg)));
                            let nudge = self.prompts.render(
                                prompts::NUDGE_POLICY,
                                &[("tool", name.as_str()), ("message", msg.as_str())],
                            );
                            self.reflect(state, nudge);
                        }
                        Ok(proposals) => {
                            if state.object_op_count > self.config.max_mutating_steps {
                                return Err(LoopError::BudgetExceeded(format!(
                                    "mutating step cap reached ({})",
                                    self.config.max_mutating_steps
                                )));
                            }
                            state.tool_runs.push(ToolRun {
                                name: name.clone(),
                                ok: true,
                                summary: format!("{} proposal(s)", proposals.len()),
                            });
                            self.events.push(
                                &key,
                                format!("proposals.mapped {name} count={}", proposals.len()),
                            );
                            if proposals
                                .iter()
                                .any(|p| p.notes.as_deref() == Some("manual_fallback"))
                            {
                                self.events.push(&key, "search_assets.disabled");
                            }
                            let is_complete =
                                proposals.iter().any(Proposal::is_completion);
                            if is_complete {
                                if let Some(ProposalBody::Completion { summary, .. }) = proposals
                                    .iter()
                                    .find(|p| p.is_completion())
                                    .map(|p| &p.body)
                                {
                                    self.events.push_assistant_text(
                                        &key,
                                        AssistantPhase::Final,
                                        summary,
                                    );
                                }
                            }
                            return Ok((proposals, is_complete));
                        }
                    }
                }
            }
        }

        // Out of turns (or the provider failed without an explicit request):
        // fall through to the fallback generator.
        if self.config.disable_fallbacks {
            return match provider_failure {
                Some(msg) => Err(LoopError::Provider(msg)),
                None => Err(LoopError::BudgetExceeded(
                    "no actionable tool produced within turn limit".to_string(),
                )),
            };
        }
        let (proposals, kind) = fallback::fallback_proposals(input);
        info!("Loop exhausted; synthesizing {kind} proposal");
        self.events.push(&key, kind);
        Ok((proposals, false))
    }

    fn reflect(&self, state: &mut TaskState, content: String) {
        state.history.push(ChatMessage::new("user", content));
    }

    fn apply_plan_tool(&self, state: &mut TaskState, name: &str, args: &serde_json::Value) {
        match name {
            "start_plan" => {
                let steps = args
                    .get("steps")
                    .and_then(|v| v.as_array())
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|v| v.as_str())
                            .map(|s| PlanStep {
                                text: s.to_string(),
                                done: false,
                            })
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                info!("Plan started with {} steps", steps.len());
                state.plan = steps;
            }
            "update_plan" => {
                if let Some(completed) = args.get("completedStep").and_then(|v| v.as_str()) {
                    if let Some(step) = state
                        .plan
                        .iter_mut()
                        .find(|s| s.text.eq_ignore_ascii_case(completed))
                    {
                        step.done = true;
                    }
                }
                if let Some(next) = args.get("nextStep").and_then(|v| v.as_str()) {
                    if !state.plan.iter().any(|s| s.text.eq_ignore_ascii_case(next)) {
                        state.plan.push(PlanStep {
                            text: next.to_string(),
                            done: false,
                        });
                    }
                }
                if let Some(notes) = args.get("notes").and_then(|v| v.as_str()) {
                    state.plan_notes = Some(notes.to_string());
                }
            }
            // Free-form <plan> carry-forward.
            "plan" => {
                if let Some(text) = args.get("text").and_then(|v| v.as_str()) {
                    state.plan_notes = Some(text.to_string());
                }
            }
            _ => {}
        }
    }
}

fn summarize_value(value: &serde_json::Value) -> String {
    let rendered = value.to_string();
    if rendered.chars().count() > 120 {
        rendered.chars().take(120).collect::<String>() + "..."
    } else {
        rendered
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::engine::types::{ActiveScript, ChatContext, SelectedInstance};
    use crate::proposals::Op;
    use crate::scene::SceneNode;
    use serde_json::Map;

    fn orchestrator(responses: Vec<&str>) -> Orchestrator {
        let mut config = Config::default();
        config.providers = vec![ProviderConfig {
            id: "scripted".to_string(),
            kind: "scripted".to_string(),
            url: String::new(),
            model: "scripted".to_string(),
            api_key: None,
            timeout_ms: None,
            responses: responses.into_iter().map(String::from).collect(),
        }];
        config.orchestrator.retry_delay_ms = 1;
        config.orchestrator.retry_max_ms = 2;
        Orchestrator::new(&config, &Credentials::default(), Arc::new(EventSink::new()))
    }

    fn workspace_scene() -> Vec<SceneNode> {
        vec![SceneNode {
            path: "game.Workspace".into(),
            class_name: "Workspace".into(),
            name: "Workspace".into(),
            parent_path: None,
            props: Map::new(),
        }]
    }

    fn chat(message: &str, workflow: Option<&str>) -> ChatInput {
        ChatInput {
            project_id: "proj".into(),
            message: message.into(),
            context: ChatContext {
                active_script: None,
                selection: vec![],
                open_docs: vec![],
                scene: Some(workspace_scene()),
                code_definitions: None,
            },
            mode: None,
            model_override: None,
            workflow_id: workflow.map(String::from),
            provider: None,
        }
    }

    async fn run(orch: &mut Orchestrator, input: ChatInput) -> RunOutcome {
        orch.run_chat(input, CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn grid_template_bypasses_provider() {
        let mut orch = orchestrator(vec!["should never be consumed"]);
        let outcome = run(&mut orch, chat("grid 3x3", None)).await;
        assert_eq!(outcome.proposals.len(), 10);
        assert!(!outcome.is_complete);
        assert_eq!(outcome.task_state.object_op_count, 10);

        let tail = orch.events.tail(&outcome.workflow_id);
        assert!(tail.iter().any(|l| l.contains("proposals.mapped template count=10")));
        assert!(!tail.iter().any(|l| l.starts_with("provider.response")));
    }

    #[tokio::test]
    async fn missing_parent_auto_repair_end_to_end() {
        let mut orch = orchestrator(vec![
            "<create_instance><className>Part</className><parentPath>game.Workspace.Base.Structures</parentPath><props>{\"Name\":\"WallNorth\"}</props></create_instance>",
        ]);
        let outcome = run(&mut orch, chat("build the north wall", None)).await;
        assert_eq!(outcome.proposals.len(), 1);
        match &outcome.proposals[0].body {
            ProposalBody::ObjectOp { ops } => {
                assert_eq!(ops.len(), 3);
                let names: Vec<&str> = ops
                    .iter()
                    .map(|op| match op {
                        Op::CreateInstance { props, .. } => props
                            .as_ref()
                            .and_then(|p| p.get("Name"))
                            .and_then(|v| v.as_str())
                            .unwrap_or(""),
                        _ => "",
                    })
                    .collect();
                assert_eq!(names, vec!["Base", "Structures", "WallNorth"]);
            }
            other => panic!("expected object op, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn flexible_tag_parsing_end_to_end() {
        for response in [
            "<search_assets><query>tree</query><tags>[\"nature\",\"plant\"]</tags></search_assets>",
            "<search_assets><query>tree</query><tags>nature, plant</tags></search_assets>",
            "<search_assets><query>tree</query><tags><tag>nature</tag><tag>plant</tag></tags></search_assets>",
            "{\"name\":\"search_assets\",\"arguments\":{\"query\":\"tree\",\"tags\":[\"nature\",\"plant\"]}}",
        ] {
            let mut orch = orchestrator(vec![response]);
            let outcome = run(&mut orch, chat("find a tree", None)).await;
            match &outcome.proposals[0].body {
                ProposalBody::AssetOp { search: Some(s), .. } => {
                    assert_eq!(s.query, "tree", "response: {response}");
                    assert_eq!(
                        s.tags.as_deref(),
                        Some(&["nature".to_string(), "plant".to_string()][..])
                    );
                    assert_eq!(s.limit, Some(6));
                }
                other => panic!("expected asset search, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn edit_safety_round_trip() {
        let mut orch = orchestrator(vec![
            "<show_diff><path>Script</path><edits>[{\"start\":{\"line\":0,\"character\":0},\"end\":{\"line\":0,\"character\":0},\"text\":\"-- note\\n\"}]</edits></show_diff>",
        ]);
        let mut input = chat("annotate the script", None);
        input.context.active_script = Some(ActiveScript {
            path: "Script".into(),
            text: "print('hi')\n".into(),
        });
        let outcome = run(&mut orch, input).await;
        match &outcome.proposals[0].body {
            ProposalBody::Edit { files } => {
                let file = &files[0];
                assert_eq!(file.safety.before_hash, diff::sha1_hex("print('hi')\n"));
                assert!(file.preview.as_ref().unwrap().unified.contains("+-- note"));
                let applied = diff::apply_range_edits(
                    file.safety.base_text.as_deref().unwrap(),
                    &file.diff.edits,
                )
                .unwrap();
                assert_eq!(applied, "-- note\nprint('hi')\n");
            }
            other => panic!("expected edit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn validation_error_reflects_then_recovers() {
        let mut orch = orchestrator(vec![
            "<create_instance><className>Part</className></create_instance>",
            "<create_instance><className>Part</className><parentPath>game.Workspace</parentPath></create_instance>",
        ]);
        let outcome = run(&mut orch, chat("make a part", None)).await;
        assert_eq!(outcome.proposals.len(), 1);

        let tail = orch.events.tail(&outcome.workflow_id);
        assert!(tail
            .iter()
            .any(|l| l.starts_with("error.validation create_instance")));
        assert!(tail
            .iter()
            .any(|l| l.contains("proposals.mapped create_instance")));

        // The reflection turn is visible in the conversation history.
        let state = orch.workflows.get(&outcome.workflow_id).unwrap();
        assert!(state
            .history
            .iter()
            .any(|m| m.role == "user" && m.content.starts_with("VALIDATION_ERROR create_instance")));
    }

    #[tokio::test]
    async fn three_consecutive_validation_errors_are_fatal() {
        let bad = "<create_instance><className>Part</className></create_instance>";
        let mut orch = orchestrator(vec![bad, bad, bad, bad]);
        let mut config_input = chat("make a part", None);
        config_input.workflow_id = Some("wf-fatal".into());
        let err = orch
            .run_chat(config_input, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Validation { .. }));
    }

    #[tokio::test]
    async fn completion_gate_rejects_then_allows_after_edit() {
        // Request 1: create geometry.
        let mut orch = orchestrator(vec![
            "<create_instance><className>Part</className><parentPath>game.Workspace</parentPath><props>{\"Name\":\"Door\"}</props></create_instance>",
        ]);
        let outcome = run(&mut orch, chat("add a door", Some("wf-gate"))).await;
        assert!(!outcome.is_complete);

        // Request 2: the model tries to complete; the gate reflects a policy
        // error and the next turn proposes the script edit instead.
        push_scripted_responses(
            &mut orch,
            vec![
                "<complete><summary>done</summary></complete>",
                "<apply_edit><path>Door</path><edits>[{\"start\":{\"line\":0,\"character\":0},\"end\":{\"line\":0,\"character\":0},\"text\":\"-- door wiring\\n\"}]</edits></apply_edit>",
            ],
        );
        let outcome = run(&mut orch, chat("finish up", Some("wf-gate"))).await;
        assert!(!outcome.is_complete);
        assert!(outcome.proposals[0].is_edit());
        let state = orch.workflows.get("wf-gate").unwrap();
        assert!(state
            .history
            .iter()
            .any(|m| m.content.starts_with("POLICY_ERROR complete")));

        // Request 3: the gate is open now.
        push_scripted_responses(&mut orch, vec!["<complete><summary>done</summary></complete>"]);
        let outcome = run(&mut orch, chat("finish up", Some("wf-gate"))).await;
        assert!(outcome.is_complete);
        assert!(outcome.proposals[0].is_completion());
    }

    #[tokio::test]
    async fn geometry_only_mode_skips_gate() {
        let mut orch = orchestrator(vec![
            "<create_instance><className>Part</className><parentPath>game.Workspace</parentPath></create_instance>",
        ]);
        let outcome = run(&mut orch, chat("add a part", Some("wf-geo"))).await;
        assert!(!outcome.is_complete);

        push_scripted_responses(&mut orch, vec!["<complete><summary>done</summary></complete>"]);
        let mut input = chat("finish", Some("wf-geo"));
        input.mode = Some("geometry_only".into());
        let outcome = run(&mut orch, input).await;
        assert!(outcome.is_complete);
    }

    #[tokio::test]
    async fn context_tool_loops_then_maps() {
        let mut orch = orchestrator(vec![
            "<list_children><parentPath>game.Workspace</parentPath></list_children>",
            "<create_instance><className>Part</className><parentPath>game.Workspace</parentPath></create_instance>",
        ]);
        let outcome = run(&mut orch, chat("inspect then build", None)).await;
        assert_eq!(outcome.proposals.len(), 1);

        let state = orch.workflows.get(&outcome.workflow_id).unwrap();
        assert!(state
            .history
            .iter()
            .any(|m| m.content.starts_with("TOOL_RESULT list_children")));
        let tail = orch.events.tail(&outcome.workflow_id);
        assert!(tail.iter().any(|l| l == &"context.request list_children".to_string()));
        assert!(tail.iter().any(|l| l == &"tool.result list_children".to_string()));
    }

    #[tokio::test]
    async fn planning_tool_updates_state_and_loops() {
        let mut orch = orchestrator(vec![
            "<start_plan><steps>[\"survey the scene\",\"build the base\"]</steps></start_plan>",
            "<create_instance><className>Part</className><parentPath>game.Workspace</parentPath></create_instance>",
        ]);
        let outcome = run(&mut orch, chat("plan then build", None)).await;
        assert_eq!(outcome.task_state.plan.len(), 2);
        assert_eq!(outcome.task_state.plan[0].text, "survey the scene");
        let tail = orch.events.tail(&outcome.workflow_id);
        assert!(tail.iter().any(|l| l == &"planning…".to_string()));
    }

    #[tokio::test]
    async fn unknown_tool_retries_once_then_fails() {
        // One unknown then a valid call recovers.
        let mut orch = orchestrator(vec![
            "<frobnicate><speed>9</speed></frobnicate>",
            "<list_selection />",
            "<complete><summary>nothing to do</summary></complete>",
        ]);
        let outcome = run(&mut orch, chat("do the thing", None)).await;
        assert!(outcome.is_complete);

        // Two unknowns are fatal.
        let mut orch = orchestrator(vec![
            "<frobnicate><speed>9</speed></frobnicate>",
            "<defenestrate><target>window</target></defenestrate>",
        ]);
        let err = orch
            .run_chat(chat("do the thing", None), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::UnknownTool(_)));
    }

    #[tokio::test]
    async fn prose_only_turns_fall_back() {
        let mut orch = orchestrator(vec![
            "I'm thinking about it.",
            "Still thinking.",
            "Hmm.",
            "One more thought.",
        ]);
        let mut input = chat("spooky tree", None);
        input.context.selection = vec![SelectedInstance {
            class_name: "Part".into(),
            path: "game.Workspace.Tree".into(),
        }];
        let outcome = run(&mut orch, input).await;
        assert!(!outcome.is_complete);
        match &outcome.proposals[0].body {
            ProposalBody::ObjectOp { ops } => match &ops[0] {
                Op::RenameInstance { new_name, .. } => assert_eq!(new_name, "Tree_Warp"),
                other => panic!("unexpected {other:?}"),
            },
            other => panic!("expected fallback rename, got {other:?}"),
        }
        let tail = orch.events.tail(&outcome.workflow_id);
        assert!(tail.iter().any(|l| l == &"fallback.object".to_string()));
    }

    #[tokio::test]
    async fn disabled_fallbacks_fail_the_run() {
        let mut orch = orchestrator(vec!["prose", "prose", "prose", "prose"]);
        orch.config.disable_fallbacks = true;
        let err = orch
            .run_chat(chat("anything", None), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            LoopError::BudgetExceeded(msg) => {
                assert!(msg.contains("no actionable tool produced"))
            }
            other => panic!("expected budget error, got {other}"),
        }
    }

    #[tokio::test]
    async fn provider_exhaustion_without_explicit_provider_falls_back() {
        let mut orch = orchestrator(vec![]);
        let outcome = run(&mut orch, chat("tree", None)).await;
        match &outcome.proposals[0].body {
            ProposalBody::AssetOp { search: Some(s), .. } => assert_eq!(s.query, "tree"),
            other => panic!("expected fallback asset search, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn explicit_provider_failure_is_fatal() {
        let mut orch = orchestrator(vec![]);
        let mut input = chat("tree", None);
        input.provider = Some("scripted".into());
        let err = orch
            .run_chat(input, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LoopError::Provider(_)));
    }

    #[tokio::test]
    async fn cancelled_token_stops_the_loop() {
        let mut orch = orchestrator(vec!["<list_selection />"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = orch.run_chat(chat("x", None), cancel).await.unwrap_err();
        assert!(matches!(err, LoopError::Cancelled));
    }

    #[tokio::test]
    async fn single_flight_guard_rejects_reentry() {
        let mut orch = orchestrator(vec!["<list_selection />"]);
        let mut busy = TaskState::new("wf-busy".into());
        busy.in_flight = true;
        orch.workflows.insert("wf-busy".into(), busy);
        let err = orch
            .run_chat(chat("x", Some("wf-busy")), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            LoopError::Provider(msg) => assert!(msg.contains("in flight")),
            other => panic!("expected busy error, got {other}"),
        }
    }

    #[tokio::test]
    async fn workflow_state_is_reused_across_requests() {
        let mut orch = orchestrator(vec![
            "<create_instance><className>Part</className><parentPath>game.Workspace.Base.Structures</parentPath><props>{\"Name\":\"A\"}</props></create_instance>",
        ]);
        let outcome = run(&mut orch, chat("build A", Some("wf-reuse"))).await;
        match &outcome.proposals[0].body {
            ProposalBody::ObjectOp { ops } => assert_eq!(ops.len(), 3),
            other => panic!("unexpected {other:?}"),
        }

        // Second request in the same workflow: parents already repaired, so a
        // sibling create prepends nothing. The fresh editor snapshot still
        // only knows Workspace, but the workflow remembers its own creations
        // only if the editor echoes them back; here the snapshot does.
        push_scripted_responses(
            &mut orch,
            vec![
                "<create_instance><className>Part</className><parentPath>game.Workspace.Base.Structures</parentPath><props>{\"Name\":\"B\"}</props></create_instance>",
            ],
        );
        let mut input = chat("build B", Some("wf-reuse"));
        let mut scene = workspace_scene();
        for (path, class) in [
            ("game.Workspace.Base", "Model"),
            ("game.Workspace.Base.Structures", "Model"),
        ] {
            scene.push(SceneNode {
                path: path.into(),
                class_name: class.into(),
                name: crate::scene::path_leaf(path).into(),
                parent_path: None,
                props: Map::new(),
            });
        }
        input.context.scene = Some(scene);
        let outcome = run(&mut orch, input).await;
        match &outcome.proposals[0].body {
            ProposalBody::ObjectOp { ops } => assert_eq!(ops.len(), 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn message_tool_emits_assistant_text_and_loops() {
        let mut orch = orchestrator(vec![
            "<message><text>working on it</text><phase>start</phase></message>",
            "<complete><summary>done</summary></complete>",
        ]);
        let outcome = run(&mut orch, chat("say hi then finish", None)).await;
        assert!(outcome.is_complete);
        let tail = orch.events.tail(&outcome.workflow_id);
        assert!(tail.iter().any(|l| l.starts_with("assistant.start")));
        assert!(tail.iter().any(|l| l.starts_with("assistant.final")));
    }

    // Feed more canned responses to an existing orchestrator's scripted
    // provider by rebuilding the gateway.
    fn push_scripted_responses(orch: &mut Orchestrator, responses: Vec<&str>) {
        let mut config = Config::default();
        config.providers = vec![ProviderConfig {
            id: "scripted".to_string(),
            kind: "scripted".to_string(),
            url: String::new(),
            model: "scripted".to_string(),
            api_key: None,
            timeout_ms: None,
            responses: responses.into_iter().map(String::from).collect(),
        }];
        config.orchestrator.retry_delay_ms = 1;
        config.orchestrator.retry_max_ms = 2;
        orch.gateway = ProviderGateway::new(
            config.providers.clone(),
            &Credentials::default(),
            &config.orchestrator,
        );
    }
}
