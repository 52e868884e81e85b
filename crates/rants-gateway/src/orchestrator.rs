//! Recursive session loop: generate → parse → (compile → execute → append)
//! → repeat, bounded by iterations, depth, and wallclock.

use std::sync::Arc;

use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::StreamExt;
use rants_llm::ModelBackend;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use uuid::Uuid;

use crate::compiler::ToolCompiler;
use crate::config::GatewayConfig;
use crate::engine::RlmEngine;
use crate::errors::{ErrorKind, GatewayError};
use crate::events::{EventSink, SessionEvent};
use crate::response::{OutputMessage, ResponseObject, ResponseUsage};
use crate::store::{SqliteStore, StoredResponse};
use crate::streaming::IntentScanner;
use crate::tools::{ToolContext, ToolOutcome, ToolRegistry, BATCH_TOOL, TASK_TOOL};
use crate::transcript::{
    AuditEvent, CanonicalTranscript, RecursiveSession, SessionStatus, Step, ToolCallRecord,
    ToolResultRecord,
};

/// Byte cap applied when a child session's final text is condensed into the
/// parent's `task` tool result.
const TASK_SUMMARY_MAX_BYTES: usize = 2048;

/// Upper bound on concurrently running `batch` children.
const BATCH_WORKER_LIMIT: usize = 8;

#[derive(Clone, Debug)]
pub struct RunOptions {
    pub tenant_id: String,
    /// Virtual model id echoed back on the response.
    pub model: String,
    pub input: String,
    pub system: Option<String>,
    pub previous_response_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub tool_choice: String,
    /// Shim mode compiles but never executes; see the chat-completions path.
    pub execute_tools: bool,
    pub persist: bool,
    pub stream_generator: bool,
}

impl RunOptions {
    pub fn new(tenant_id: impl Into<String>, model: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            model: model.into(),
            input: input.into(),
            system: None,
            previous_response_id: None,
            temperature: None,
            max_output_tokens: None,
            tool_choice: "auto".to_string(),
            execute_tools: true,
            persist: true,
            stream_generator: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct RunResult {
    pub response: ResponseObject,
    pub transcript: CanonicalTranscript,
    pub session: RecursiveSession,
}

impl RunResult {
    /// Tool calls of the last step, used by the chat-completions shim.
    pub fn last_step_tool_calls(&self) -> &[ToolCallRecord] {
        self.transcript
            .steps
            .last()
            .map(|step| step.tool_calls.as_slice())
            .unwrap_or(&[])
    }
}

pub struct Orchestrator {
    config: Arc<GatewayConfig>,
    store: SqliteStore,
    registry: Arc<ToolRegistry>,
    generator: Arc<dyn ModelBackend>,
    compiler: ToolCompiler,
    engine: RlmEngine,
    batch_permits: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<GatewayConfig>,
        store: SqliteStore,
        registry: Arc<ToolRegistry>,
        generator: Arc<dyn ModelBackend>,
        tool_compiler_backend: Arc<dyn ModelBackend>,
    ) -> Self {
        let compiler = ToolCompiler::new(
            tool_compiler_backend,
            config.models.tool_compiler.model.clone(),
        );
        Self {
            config,
            store,
            registry,
            generator,
            compiler,
            engine: RlmEngine,
            batch_permits: Arc::new(Semaphore::new(BATCH_WORKER_LIMIT)),
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run a root session for one inbound request.
    pub async fn run(
        &self,
        options: RunOptions,
        sink: Arc<dyn EventSink>,
    ) -> Result<RunResult, GatewayError> {
        if options.input.trim().is_empty() {
            return Err(GatewayError::bad_request("input must not be empty"));
        }

        let schemas = self.registry.schemas();
        let mut transcript =
            CanonicalTranscript::new(options.system.clone(), options.input.clone(), &schemas);
        if let Some(previous_id) = &options.previous_response_id {
            let stored = self
                .store
                .lookup_response(previous_id, &options.tenant_id)
                .await?
                .ok_or_else(|| {
                    GatewayError::not_found(format!("unknown previous_response_id {previous_id}"))
                })?;
            transcript.steps = stored.transcript.steps;
        }

        let session = RecursiveSession::root(
            options.tenant_id.clone(),
            self.config.limits.max_wallclock_seconds,
        );
        self.run_session(session, transcript, options, sink).await
    }

    /// The per-session loop, boxed so the `task` tool can recurse through it.
    fn run_session<'a>(
        &'a self,
        session: RecursiveSession,
        transcript: CanonicalTranscript,
        options: RunOptions,
        sink: Arc<dyn EventSink>,
    ) -> BoxFuture<'a, Result<RunResult, GatewayError>> {
        Box::pin(async move {
            let mut session = session;
            let mut transcript = transcript;
            if options.persist {
                self.store.create_session(&session, &transcript).await?;
            }

            let deadline = deadline_instant(&session);
            let mut response = self.new_response(&session, &options);
            let message_id = response.output[0].id.clone();

            if !sink.emit(SessionEvent::Started {
                session_id: session.session_id,
                response: Box::new(response.clone()),
            }) {
                return self.fail(session, options.persist, GatewayError::cancelled(), &sink).await;
            }

            let schemas = self.registry.schemas();
            let iteration_cap = self
                .config
                .limits
                .max_tool_iterations
                .min(self.config.rlm.rants_one.max_iterations);
            let mut accumulated_text = String::new();
            let mut usage = ResponseUsage::default();
            let mut step_index = 0u32;
            let mut iterations = 0u32;

            let outcome: Result<(), GatewayError> = loop {
                if Instant::now() >= deadline {
                    break Err(GatewayError::deadline_exceeded());
                }
                if iterations >= iteration_cap {
                    // Iteration cap: close with a synthetic terminal step
                    // that carries no further calls.
                    let mut step = Step::begin();
                    step.finished_at = Some(Utc::now());
                    if let Err(error) = self
                        .persist_step(&session, step_index, &step, options.persist)
                        .await
                    {
                        break Err(error);
                    }
                    transcript.steps.push(step);
                    break Ok(());
                }

                let mut step = Step::begin();
                let request = self.engine.build_request(
                    &transcript,
                    &schemas,
                    &options.tool_choice,
                    &self.config.models.generator.model,
                    options
                        .temperature
                        .or_else(|| self.config.models.generator.temperature()),
                    options.max_output_tokens,
                    deadline,
                );

                let raw = match self
                    .generate(request, options.stream_generator, deadline, &sink, &mut usage)
                    .await
                {
                    Ok(raw) => raw,
                    Err(error) => break Err(error),
                };
                let parsed = RlmEngine::parse_output(&raw);
                accumulated_text.push_str(&parsed.text);
                step.generator_output = parsed.text;
                step.tool_intent = parsed.tool_intent;

                let Some(intent) = step.tool_intent.clone() else {
                    step.finished_at = Some(Utc::now());
                    if let Err(error) = self
                        .persist_step(&session, step_index, &step, options.persist)
                        .await
                    {
                        break Err(error);
                    }
                    transcript.steps.push(step);
                    break Ok(());
                };

                let calls = match self
                    .compiler
                    .compile(&self.registry, &transcript, &intent, deadline)
                    .await
                {
                    Ok(calls) => calls,
                    Err(error) => break Err(error),
                };
                if calls.is_empty() {
                    // EmptyCompilation is recorded and ends the loop; it is
                    // never surfaced to the client.
                    tracing::warn!(
                        session_id = %session.session_id,
                        kind = ErrorKind::EmptyCompilation.as_str(),
                        "tool compiler produced no calls for a non-empty intent"
                    );
                    step.finished_at = Some(Utc::now());
                    if let Err(error) = self
                        .persist_step(&session, step_index, &step, options.persist)
                        .await
                    {
                        break Err(error);
                    }
                    transcript.steps.push(step);
                    break Ok(());
                }

                step.tool_calls = calls;
                if options.persist {
                    if let Err(error) = self
                        .store
                        .append_step(session.session_id, step_index, &step)
                        .await
                    {
                        break Err(error);
                    }
                }

                if !options.execute_tools {
                    // Shim mode: the client executes these calls itself.
                    transcript.steps.push(step);
                    break Ok(());
                }

                if !sink.emit(SessionEvent::ToolPhaseStarted {
                    tools: step.tool_calls.iter().map(|call| call.tool.clone()).collect(),
                }) {
                    break Err(GatewayError::cancelled());
                }

                let mut results = Vec::with_capacity(step.tool_calls.len());
                let mut store_failure = None;
                for call in &step.tool_calls {
                    let result = self.execute_call(call, &session, deadline).await;
                    if options.persist {
                        let audit = audit_event(&session, step_index, call, &result);
                        if let Err(error) = self.store.record_audit(&audit).await {
                            store_failure = Some(error);
                            break;
                        }
                    }
                    results.push(result);
                }
                if let Some(error) = store_failure {
                    break Err(error);
                }

                step.tool_results = results;
                step.finished_at = Some(Utc::now());
                if options.persist {
                    if let Err(error) = self
                        .store
                        .finalize_step(
                            session.session_id,
                            step_index,
                            &step.tool_results,
                            step.finished_at.unwrap_or_else(Utc::now),
                        )
                        .await
                    {
                        break Err(error);
                    }
                }
                transcript.steps.push(step);
                step_index += 1;
                iterations += 1;

                if !sink.emit(SessionEvent::ToolPhaseDone) {
                    break Err(GatewayError::cancelled());
                }
            };

            if let Err(error) = outcome {
                return self.fail(session, options.persist, error, &sink).await;
            }

            session.status = SessionStatus::Completed;
            response.status = SessionStatus::Completed.as_str().to_string();
            response.output[0] = OutputMessage::assistant(message_id, accumulated_text);
            response.usage = Some(usage);
            if options.persist {
                self.store
                    .update_session_status(session.session_id, session.status)
                    .await?;
                self.store
                    .persist_response(&StoredResponse {
                        response_id: response.id.clone(),
                        session_id: session.session_id,
                        tenant_id: session.tenant_id.clone(),
                        previous_response_id: options.previous_response_id.clone(),
                        created_at: session.created_at,
                        transcript: transcript.clone(),
                        response_json: serde_json::to_value(&response)
                            .map_err(|error| GatewayError::internal(error.to_string()))?,
                    })
                    .await?;
            }

            sink.emit(SessionEvent::TextDone);
            sink.emit(SessionEvent::Completed {
                response: Box::new(response.clone()),
            });
            Ok(RunResult {
                response,
                transcript,
                session,
            })
        })
    }

    /// Invoke the generator once, forwarding client-safe deltas through the
    /// intent lookahead. Returns the raw (unstripped) generator output.
    async fn generate(
        &self,
        request: rants_llm::CompletionRequest,
        streaming: bool,
        deadline: Instant,
        sink: &Arc<dyn EventSink>,
        usage: &mut ResponseUsage,
    ) -> Result<String, GatewayError> {
        let mut scanner = IntentScanner::new();
        let mut raw = String::new();

        if streaming {
            let mut stream = tokio::time::timeout_at(deadline, self.generator.stream(request))
                .await
                .map_err(|_| GatewayError::deadline_exceeded())??;
            loop {
                let item = tokio::time::timeout_at(deadline, stream.next())
                    .await
                    .map_err(|_| GatewayError::deadline_exceeded())?;
                match item {
                    None => break,
                    Some(Ok(token)) => {
                        raw.push_str(&token);
                        let safe = scanner.feed(&token);
                        if !safe.is_empty()
                            && !sink.emit(SessionEvent::TextDelta { delta: safe })
                        {
                            return Err(GatewayError::cancelled());
                        }
                    }
                    Some(Err(error)) => return Err(error.into()),
                }
            }
        } else {
            let result = tokio::time::timeout_at(deadline, self.generator.complete(request))
                .await
                .map_err(|_| GatewayError::deadline_exceeded())??;
            usage.input_tokens += result.usage.input_tokens;
            usage.output_tokens += result.usage.output_tokens;
            usage.total_tokens += result.usage.total_tokens;
            raw = result.text;
            let safe = scanner.feed(&raw);
            if !safe.is_empty() && !sink.emit(SessionEvent::TextDelta { delta: safe }) {
                return Err(GatewayError::cancelled());
            }
        }

        let tail = scanner.finish();
        if !tail.is_empty() && !sink.emit(SessionEvent::TextDelta { delta: tail }) {
            return Err(GatewayError::cancelled());
        }
        Ok(raw)
    }

    async fn execute_call(
        &self,
        call: &ToolCallRecord,
        session: &RecursiveSession,
        deadline: Instant,
    ) -> ToolResultRecord {
        match call.tool.as_str() {
            TASK_TOOL => self.execute_task(call, session).await,
            BATCH_TOOL => self.execute_batch(call, session, deadline).await,
            _ => {
                self.registry
                    .execute(call, self.tool_context(session, deadline))
                    .await
            }
        }
    }

    /// The recursion primitive: run the full loop in a child session over
    /// the task prompt and condense its final text into a summary.
    async fn execute_task(
        &self,
        call: &ToolCallRecord,
        session: &RecursiveSession,
    ) -> ToolResultRecord {
        let started_at = Utc::now();
        let prompt = call
            .parameters
            .get("prompt")
            .and_then(Value::as_str)
            .or_else(|| call.parameters.get("description").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string();

        let max_depth = self.config.rlm.rants_one.max_depth;
        if session.depth + 1 > max_depth {
            return result_from_outcome(
                call.id,
                started_at,
                ToolOutcome::failure(
                    ErrorKind::RecursionLimit,
                    format!("task would exceed max_depth {max_depth}"),
                ),
            );
        }
        if prompt.trim().is_empty() {
            return result_from_outcome(
                call.id,
                started_at,
                ToolOutcome::failure(ErrorKind::ToolExecError, "task prompt is empty"),
            );
        }

        let child = RecursiveSession::child_of(session);
        let schemas = self.registry.schemas();
        let child_transcript = CanonicalTranscript::new(None, prompt.clone(), &schemas);
        let mut child_options =
            RunOptions::new(child.tenant_id.clone(), self.config.rlm.rants_one.name.clone(), prompt);
        child_options.persist = true;

        let run = self
            .run_session(
                child,
                child_transcript,
                child_options,
                Arc::new(crate::events::NoopEventSink),
            )
            .await;
        match run {
            Ok(result) => {
                let summary = result
                    .transcript
                    .last_assistant_text()
                    .unwrap_or_default()
                    .to_string();
                let summary = clip_to_bytes(&summary, TASK_SUMMARY_MAX_BYTES);
                result_from_outcome(
                    call.id,
                    started_at,
                    ToolOutcome::success(json!({ "summary": summary })),
                )
            }
            Err(error) => result_from_outcome(
                call.id,
                started_at,
                ToolOutcome::failure(error.kind, error.message),
            ),
        }
    }

    /// Run `batch` children concurrently; results keep the declared order
    /// regardless of completion order.
    async fn execute_batch(
        &self,
        call: &ToolCallRecord,
        session: &RecursiveSession,
        deadline: Instant,
    ) -> ToolResultRecord {
        let started_at = Utc::now();
        let Some(tool_uses) = call.parameters.get("tool_uses").and_then(Value::as_array) else {
            return result_from_outcome(
                call.id,
                started_at,
                ToolOutcome::failure(ErrorKind::ToolExecError, "batch requires 'tool_uses'"),
            );
        };

        let futures = tool_uses.iter().map(|entry| {
            let tool = entry
                .get("recipient_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let parameters = entry.get("parameters").cloned().unwrap_or_else(|| json!({}));
            let ctx = self.tool_context(session, deadline);
            let permits = self.batch_permits.clone();
            async move {
                let _permit = permits.acquire().await.ok();
                if tool == TASK_TOOL || tool == BATCH_TOOL {
                    return json!({
                        "tool": tool,
                        "ok": false,
                        "output": { "error": format!("'{tool}' cannot run inside batch") },
                    });
                }
                let child_call = ToolCallRecord {
                    id: Uuid::new_v4(),
                    tool: tool.clone(),
                    parameters,
                };
                let result = self.registry.execute(&child_call, ctx).await;
                json!({ "tool": tool, "ok": result.ok, "output": result.output })
            }
        });
        let results: Vec<Value> = join_all(futures).await;

        result_from_outcome(
            call.id,
            started_at,
            ToolOutcome::success(json!({ "results": results })),
        )
    }

    fn tool_context(&self, session: &RecursiveSession, deadline: Instant) -> ToolContext {
        ToolContext {
            workspace_root: self.config.limits.workspace_root.clone(),
            deadline,
            tenant_id: session.tenant_id.clone(),
            session_id: session.session_id,
            output_max_bytes: self.config.limits.tool_output_max_bytes,
        }
    }

    fn new_response(&self, session: &RecursiveSession, options: &RunOptions) -> ResponseObject {
        let mut response = ResponseObject::new(&options.model, &session.tenant_id);
        response.previous_response_id = options.previous_response_id.clone();
        response.temperature = options
            .temperature
            .or_else(|| self.config.models.generator.temperature());
        response.tool_choice = Value::String(options.tool_choice.clone());
        response.tools = self
            .registry
            .schemas()
            .iter()
            .map(|schema| serde_json::to_value(schema).unwrap_or_default())
            .collect();
        response.output.push(OutputMessage::assistant(
            format!("msg_{}", Uuid::new_v4().simple()),
            "",
        ));
        response
    }

    async fn persist_step(
        &self,
        session: &RecursiveSession,
        step_index: u32,
        step: &Step,
        persist: bool,
    ) -> Result<(), GatewayError> {
        if !persist {
            return Ok(());
        }
        self.store
            .append_step(session.session_id, step_index, step)
            .await?;
        self.store
            .finalize_step(
                session.session_id,
                step_index,
                &step.tool_results,
                step.finished_at.unwrap_or_else(Utc::now),
            )
            .await
    }

    async fn fail(
        &self,
        mut session: RecursiveSession,
        persist: bool,
        error: GatewayError,
        sink: &Arc<dyn EventSink>,
    ) -> Result<RunResult, GatewayError> {
        session.status = match error.kind {
            ErrorKind::Cancelled => SessionStatus::Cancelled,
            _ => SessionStatus::Failed,
        };
        if persist {
            let _ = self
                .store
                .update_session_status(session.session_id, session.status)
                .await;
        }
        tracing::warn!(
            session_id = %session.session_id,
            kind = error.kind.as_str(),
            message = %error.message,
            "session terminated"
        );
        sink.emit(SessionEvent::Failed {
            kind: error.kind,
            message: error.message.clone(),
        });
        Err(error)
    }
}

fn deadline_instant(session: &RecursiveSession) -> Instant {
    let remaining = (session.deadline_at - Utc::now())
        .to_std()
        .unwrap_or_default();
    Instant::now() + remaining
}

fn result_from_outcome(
    call_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    outcome: ToolOutcome,
) -> ToolResultRecord {
    ToolResultRecord {
        call_id,
        ok: outcome.ok,
        output: outcome.output,
        error_kind: outcome.error_kind,
        started_at,
        finished_at: Utc::now(),
        bytes_truncated: 0,
    }
}

fn audit_event(
    session: &RecursiveSession,
    step_index: u32,
    call: &ToolCallRecord,
    result: &ToolResultRecord,
) -> AuditEvent {
    let size_after = result.output.to_string().len() as u64;
    AuditEvent {
        tenant_id: session.tenant_id.clone(),
        session_id: session.session_id,
        step_index,
        call_id: call.id,
        tool: call.tool.clone(),
        ok: result.ok,
        error_kind: result.error_kind,
        timestamp: Utc::now(),
        size_before: size_after + result.bytes_truncated,
        size_after,
    }
}

fn clip_to_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
