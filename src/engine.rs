//! Iteration controller: the bounded agent loop
//!
//! This module ties the whole engine together. One [`Engine::start`] call
//! owns the complete lifetime of one streamed response: it drives the
//! round state machine, feeds tool results back to the model, and emits
//! every outward [`WireEvent`], always ending with exactly one `done`.
//!
//! # The state machine
//!
//! ```text
//! ROUND_START ──▶ STREAMING ──▶ NO_TOOLS ─────────────▶ DONE
//!      ▲              │
//!      │              └──▶ HAS_TOOLS ──▶ EXECUTING ──┐
//!      └─────────────────────────────────────────────┘
//!
//! terminals: DONE, MAX_ROUNDS (limit notice), ERROR (sanitized error event)
//! ```
//!
//! - **ROUND_START**: one streaming completion call over the full
//!   accumulated history plus the complete tool catalog. Tools are offered
//!   every round; the model may call zero or more.
//! - **STREAMING**: fragments drain through the [`DeltaAccumulator`]; text
//!   is forwarded as `content` events the moment it arrives.
//! - **HAS_TOOLS**: finalized invocations are capped per round, recorded as
//!   one assistant message, then executed.
//! - **EXECUTING**: the round's admitted invocations run concurrently;
//!   refused ones (duplicate / budget-exhausted) resolve synthetically
//!   without dispatching. Results are appended to history in call order,
//!   never completion order, and each admitted invocation gets exactly one
//!   tool-result message before the next round's model call.
//!
//! # Bounds
//!
//! The model decides when to stop calling tools; the engine decides when it
//! *must* stop. Three independent bounds hold regardless of model behavior:
//! the round budget (default 5), the per-round invocation cap (default 5),
//! and the per-request call guard (duplicate + per-name ledgers). Hitting a
//! bound is a designed terminal or refusal path, not an error.
//!
//! # Cancellation
//!
//! Each [`Turn`] exposes an interrupt handle (`Arc<AtomicBool>`). The driver
//! observes it before each round, per model fragment, and while awaiting
//! tool results; on interruption, in-flight work is dropped and `done` is
//! still emitted so the decoder reaches a clean stop. Dropping the `Turn`
//! itself has the same effect; the driver notices the closed channel.
//!
//! # Examples
//!
//! ```rust,no_run
//! use chatwire::{Engine, EngineOptions, EngineRequest, Message, WireEvent};
//! use futures::StreamExt;
//!
//! # async fn example() -> chatwire::Result<()> {
//! let engine = Engine::new(
//!     EngineOptions::builder()
//!         .model("qwen2.5-32b-instruct")
//!         .base_url("http://localhost:1234/v1")
//!         .build()?,
//! )?;
//!
//! let mut turn = engine.start(EngineRequest::new(vec![Message::user("Hello!")]));
//! while let Some(event) = turn.next().await {
//!     if let WireEvent::Content { text } = event {
//!         print!("{}", text);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::delta::{DeltaAccumulator, Fragment};
use crate::guard::{CallGuard, Verdict, DUPLICATE_LIMIT};
use crate::provider::{CompletionBackend, CompletionRequest, HttpBackend};
use crate::retry::RetryConfig;
use crate::tools::{Progress, ProgressUpdate, Tool, ToolOutcome, ToolRegistry};
use crate::types::{EngineRequest, Message, Role, ToolInvocation};
use crate::wire::WireEvent;
use crate::{context, Result};
use futures::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::env;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Default bound on entries into ROUND_START per request
pub const DEFAULT_MAX_ROUNDS: u32 = 5;

/// Default cap on invocations executed within one round
pub const DEFAULT_MAX_CALLS_PER_ROUND: usize = 5;

/// Content appended when the round budget runs out with tool calls pending
pub const ROUND_LIMIT_NOTICE: &str = "\n\nI've used all the tool rounds available for this \
request, so this answer is based on the results gathered so far.";

/// How often the executing phase re-checks the interrupt flag
const INTERRUPT_POLL: Duration = Duration::from_millis(25);

/// Local OpenAI-compatible servers the engine ships endpoint defaults for.
///
/// A shortcut only resolves the base URL. The engine sends the same thing to
/// every provider (full history, complete tool catalog, `stream: true`), so
/// nothing else in the round loop varies by provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    LMStudio,
    Ollama,
    LlamaCpp,
    VLLM,
}

impl Provider {
    /// Endpoint the provider listens on out of the box
    pub fn endpoint(&self) -> &'static str {
        match self {
            Provider::LMStudio => "http://localhost:1234/v1",
            Provider::Ollama => "http://localhost:11434/v1",
            Provider::LlamaCpp => "http://localhost:8080/v1",
            Provider::VLLM => "http://localhost:8000/v1",
        }
    }
}

/// Options for configuring the engine
#[derive(Clone)]
pub struct EngineOptions {
    /// Default model identifier; a request may override it
    pub model: String,

    /// System prompt prepended when the request doesn't carry one
    pub system_prompt: String,

    /// OpenAI-compatible endpoint URL
    pub base_url: String,

    /// API key (most local servers don't need this)
    pub api_key: String,

    /// Maximum tokens to generate (None uses provider default)
    pub max_tokens: Option<u32>,

    /// Sampling temperature (0.0 to 2.0)
    pub temperature: f32,

    /// Request timeout in seconds, covering the full stream
    pub timeout: u64,

    /// Bound on entries into ROUND_START per request
    pub max_rounds: u32,

    /// Cap on invocations executed within one round
    pub max_calls_per_round: usize,

    /// Per-name invocation budgets enforced by the call guard
    pub tool_budgets: HashMap<String, u32>,

    /// Tools available to the model
    pub tools: Vec<Arc<Tool>>,

    /// Retry policy for opening the upstream stream
    pub retry: RetryConfig,

    /// When set, inbound histories near this token count are truncated
    /// before round 1 (see [`truncate_messages`](crate::truncate_messages))
    pub context_limit: Option<usize>,

    /// Messages kept (besides the system prompt) when truncating
    pub context_keep: usize,
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &"***")
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("max_rounds", &self.max_rounds)
            .field("max_calls_per_round", &self.max_calls_per_round)
            .field("tool_budgets", &self.tool_budgets)
            .field("tools", &format!("{} tools", self.tools.len()))
            .field("context_limit", &self.context_limit)
            .finish()
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            model: String::new(),
            system_prompt: String::new(),
            base_url: String::new(),
            api_key: "not-needed".to_string(),
            max_tokens: Some(4096),
            temperature: 0.7,
            timeout: 120,
            max_rounds: DEFAULT_MAX_ROUNDS,
            max_calls_per_round: DEFAULT_MAX_CALLS_PER_ROUND,
            tool_budgets: HashMap::new(),
            tools: Vec::new(),
            retry: RetryConfig::default(),
            context_limit: None,
            context_keep: 10,
        }
    }
}

impl EngineOptions {
    /// Create a new builder for EngineOptions
    pub fn builder() -> EngineOptionsBuilder {
        EngineOptionsBuilder::default()
    }
}

/// Builder for EngineOptions
#[derive(Default)]
pub struct EngineOptionsBuilder {
    model: Option<String>,
    system_prompt: Option<String>,
    base_url: Option<String>,
    provider: Option<Provider>,
    api_key: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout: Option<u64>,
    max_rounds: Option<u32>,
    max_calls_per_round: Option<usize>,
    tool_budgets: HashMap<String, u32>,
    tools: Vec<Arc<Tool>>,
    retry: Option<RetryConfig>,
    context_limit: Option<usize>,
    context_keep: Option<usize>,
}

impl EngineOptionsBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Use a provider shortcut's default endpoint. An explicit `base_url`
    /// or a `CHATWIRE_BASE_URL` environment override takes precedence.
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, tokens: u32) -> Self {
        self.max_tokens = Some(tokens);
        self
    }

    pub fn temperature(mut self, temp: f32) -> Self {
        self.temperature = Some(temp);
        self
    }

    pub fn timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = Some(rounds);
        self
    }

    pub fn max_calls_per_round(mut self, calls: usize) -> Self {
        self.max_calls_per_round = Some(calls);
        self
    }

    /// Cap a tool name at `cap` invocations per request
    pub fn tool_budget(mut self, name: impl Into<String>, cap: u32) -> Self {
        self.tool_budgets.insert(name.into(), cap);
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(Arc::new(tool));
        self
    }

    pub fn tools(mut self, tools: Vec<Tool>) -> Self {
        self.tools.extend(tools.into_iter().map(Arc::new));
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn context_limit(mut self, limit: usize) -> Self {
        self.context_limit = Some(limit);
        self
    }

    pub fn context_keep(mut self, keep: usize) -> Self {
        self.context_keep = Some(keep);
        self
    }

    pub fn build(self) -> Result<EngineOptions> {
        // Deployments steer the engine through CHATWIRE_MODEL and
        // CHATWIRE_BASE_URL without touching code; explicit builder values
        // always win over the environment.
        let model = self
            .model
            .or_else(|| env::var("CHATWIRE_MODEL").ok())
            .ok_or_else(|| crate::Error::config("model is required"))?;

        let base_url = self
            .base_url
            .or_else(|| env::var("CHATWIRE_BASE_URL").ok())
            .unwrap_or_else(|| {
                self.provider
                    .unwrap_or(Provider::LMStudio)
                    .endpoint()
                    .to_string()
            });

        Ok(EngineOptions {
            model,
            system_prompt: self.system_prompt.unwrap_or_default(),
            base_url,
            api_key: self.api_key.unwrap_or_else(|| "not-needed".to_string()),
            max_tokens: self.max_tokens.or(Some(4096)),
            temperature: self.temperature.unwrap_or(0.7),
            timeout: self.timeout.unwrap_or(120),
            max_rounds: self.max_rounds.unwrap_or(DEFAULT_MAX_ROUNDS),
            max_calls_per_round: self.max_calls_per_round.unwrap_or(DEFAULT_MAX_CALLS_PER_ROUND),
            tool_budgets: self.tool_budgets,
            tools: self.tools,
            retry: self.retry.unwrap_or_default(),
            context_limit: self.context_limit,
            context_keep: self.context_keep.unwrap_or(10),
        })
    }
}

/// The tool-augmented streaming completion engine.
///
/// Cheap to share: holds configuration, the capability registry, and the
/// backend. All per-request state lives in the driver task spawned by
/// [`Engine::start`], so one engine serves any number of concurrent
/// requests without contention.
pub struct Engine {
    options: Arc<EngineOptions>,
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn CompletionBackend>,
}

impl Engine {
    /// Create an engine talking to the configured HTTP endpoint
    pub fn new(options: EngineOptions) -> Result<Self> {
        let backend = HttpBackend::new(
            options.base_url.clone(),
            options.api_key.clone(),
            options.timeout,
            options.retry.clone(),
        )?;
        Ok(Self::with_backend(options, Arc::new(backend)))
    }

    /// Create an engine over a custom backend (scripted model streams in
    /// tests, alternative transports in production)
    pub fn with_backend(options: EngineOptions, backend: Arc<dyn CompletionBackend>) -> Self {
        let registry = Arc::new(ToolRegistry::new(options.tools.iter().cloned()));
        Self {
            options: Arc::new(options),
            registry,
            backend,
        }
    }

    /// The capability registry built from the configured tools
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Begin one streamed request.
    ///
    /// Returns immediately; the driver task runs the rounds and the
    /// returned [`Turn`] yields events as they happen. The stream always
    /// terminates with exactly one [`WireEvent::Done`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, request: EngineRequest) -> Turn {
        let (events, receiver) = mpsc::unbounded_channel();
        let interrupt = Arc::new(AtomicBool::new(false));

        let driver = Driver {
            options: self.options.clone(),
            registry: self.registry.clone(),
            backend: self.backend.clone(),
            events,
            interrupt: interrupt.clone(),
        };
        tokio::spawn(driver.run(request));

        Turn {
            events: UnboundedReceiverStream::new(receiver),
            interrupt,
        }
    }
}

/// The event stream of one in-flight request
pub struct Turn {
    events: UnboundedReceiverStream<WireEvent>,
    interrupt: Arc<AtomicBool>,
}

impl Turn {
    /// Clone the interrupt flag for use from other tasks or threads.
    /// Store `true` to cancel; the stream still ends with `done`.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }
}

impl Stream for Turn {
    type Item = WireEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx)
    }
}

/// Per-request driver: owns the IterationState (round counter, history,
/// ledgers) and runs on its own task until `done` is emitted.
struct Driver {
    options: Arc<EngineOptions>,
    registry: Arc<ToolRegistry>,
    backend: Arc<dyn CompletionBackend>,
    events: mpsc::UnboundedSender<WireEvent>,
    interrupt: Arc<AtomicBool>,
}

impl Driver {
    async fn run(self, request: EngineRequest) {
        if let Err(err) = self.run_rounds(request).await {
            // Full detail to the logs, sanitized message to the wire.
            log::error!("request failed: {}", err);
            self.emit(WireEvent::Error {
                message: err.user_message(),
            });
        }

        // Exactly one `done`, always last, on every terminal path:
        // success, limit, error, or interruption.
        self.emit(WireEvent::Done);
    }

    fn emit(&self, event: WireEvent) {
        // A closed channel means the client is gone; `halted` picks that up
        // at the next suspension point.
        let _ = self.events.send(event);
    }

    /// Interrupted, or the client dropped the Turn
    fn halted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst) || self.events.is_closed()
    }

    async fn run_rounds(&self, request: EngineRequest) -> Result<()> {
        let model = request
            .model
            .clone()
            .unwrap_or_else(|| self.options.model.clone());

        // Routing metadata is emitted once, before any content, and only
        // when the request actually carries some.
        if request.conversation.is_some() {
            self.emit(WireEvent::Status {
                conversation: request.conversation.clone(),
                model: model.clone(),
            });
        }

        let mut history = self.assemble_history(request.messages);
        let mut guard = CallGuard::new(self.options.tool_budgets.clone());
        let catalog = self.registry.catalog();
        let mut round: u32 = 0;

        loop {
            if self.halted() {
                log::debug!("request halted before round {}", round + 1);
                return Ok(());
            }

            // MAX_ROUNDS: unconditional termination with a limit notice,
            // even with tool calls pending.
            if round >= self.options.max_rounds {
                log::warn!(
                    "round budget ({}) exhausted; terminating with limit notice",
                    self.options.max_rounds
                );
                self.emit(WireEvent::Content {
                    text: ROUND_LIMIT_NOTICE.to_string(),
                });
                history.push(Message::assistant(ROUND_LIMIT_NOTICE));
                return Ok(());
            }
            round += 1;

            // ROUND_START: full history + complete catalog, every round.
            let completion = CompletionRequest {
                model: model.clone(),
                messages: history.iter().map(Message::to_api).collect(),
                tools: catalog.clone(),
                max_tokens: self.options.max_tokens,
                temperature: Some(self.options.temperature),
            };
            let mut fragments = self.backend.stream_turn(completion).await?;

            // STREAMING: forward text immediately, fold everything. The
            // select keeps cancellation observable even while the upstream
            // read is stalled.
            let mut accumulator = DeltaAccumulator::new(round);
            let mut poll = tokio::time::interval(INTERRUPT_POLL);
            loop {
                let fragment = tokio::select! {
                    fragment = fragments.next() => fragment,
                    _ = poll.tick() => {
                        if self.halted() {
                            log::debug!("request halted mid-stream in round {}", round);
                            return Ok(());
                        }
                        continue;
                    }
                };

                let Some(fragment) = fragment else {
                    break;
                };
                let fragment = fragment?;
                if let Fragment::Text(text) = &fragment {
                    if !text.is_empty() {
                        self.emit(WireEvent::Content { text: text.clone() });
                    }
                }
                accumulator.apply(fragment);
                if accumulator.turn_ended() {
                    break;
                }
            }
            let turn = accumulator.finish();

            // NO_TOOLS: a plain-text answer ends the request.
            if turn.invocations.is_empty() {
                if !turn.text.is_empty() {
                    history.push(Message::assistant(turn.text));
                }
                return Ok(());
            }

            // HAS_TOOLS: cap the round, record one assistant message with
            // the (possibly truncated) calls.
            let mut invocations = turn.invocations;
            if invocations.len() > self.options.max_calls_per_round {
                log::warn!(
                    "round {} requested {} tool calls; keeping the first {}",
                    round,
                    invocations.len(),
                    self.options.max_calls_per_round
                );
                invocations.truncate(self.options.max_calls_per_round);
            }
            let text = (!turn.text.is_empty()).then_some(turn.text);
            history.push(Message::assistant_with_calls(text, invocations.clone()));

            // EXECUTING: run the round's invocations, then append results in
            // call order. `None` means we were halted mid-execution.
            let Some(outcomes) = self.execute_round(&invocations, &mut guard).await else {
                return Ok(());
            };

            for (invocation, outcome) in invocations.iter().zip(outcomes) {
                self.emit(WireEvent::ToolResult {
                    id: invocation.id.clone(),
                    name: invocation.name.clone(),
                    result: outcome.content.clone(),
                });
                history.push(Message::tool(invocation.id.clone(), outcome.content));
            }
        }
    }

    /// Build the request-private history: configured system prompt first
    /// (unless the request brought its own), then the inbound messages,
    /// truncated once if they crowd the context window.
    fn assemble_history(&self, messages: Vec<Message>) -> Vec<Message> {
        let mut history = Vec::with_capacity(messages.len() + 1);

        let has_system = messages.first().is_some_and(|m| m.role == Role::System);
        if !self.options.system_prompt.is_empty() && !has_system {
            history.push(Message::system(self.options.system_prompt.clone()));
        }
        history.extend(messages);

        if let Some(limit) = self.options.context_limit {
            if context::is_approaching_limit(&history, limit, 0.9) {
                let before = history.len();
                history = context::truncate_messages(&history, self.options.context_keep, true);
                log::warn!(
                    "inbound history near the {}-token context limit; truncated {} -> {} messages",
                    limit,
                    before,
                    history.len()
                );
            }
        }

        history
    }

    /// Execute one round's invocations.
    ///
    /// Guard verdicts and `tool_call` events happen in call order up front;
    /// admitted dispatches then run concurrently while progress updates are
    /// forwarded live. Returns outcomes in call order, or `None` if the
    /// request was halted (in-flight handlers are dropped).
    async fn execute_round(
        &self,
        invocations: &[ToolInvocation],
        guard: &mut CallGuard,
    ) -> Option<Vec<ToolOutcome>> {
        enum Slot {
            /// Refused by the guard; outcome synthesized without dispatching
            Ready(ToolOutcome),
            /// Dispatched; index into the join results
            Running(usize),
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<ProgressUpdate>();
        let mut slots = Vec::with_capacity(invocations.len());
        let mut dispatched = Vec::new();

        for invocation in invocations {
            self.emit(WireEvent::ToolCall {
                id: invocation.id.clone(),
                name: invocation.name.clone(),
                arguments: invocation.arguments.clone(),
            });

            match guard.admit(&invocation.name, &invocation.arguments) {
                Verdict::Permit => {
                    let registry = self.registry.clone();
                    let invocation = invocation.clone();
                    let progress = Progress::new(invocation.name.clone(), progress_tx.clone());
                    slots.push(Slot::Running(dispatched.len()));
                    dispatched
                        .push(async move { registry.dispatch(&invocation, progress).await });
                }
                Verdict::Duplicate => {
                    log::warn!(
                        "refusing duplicate call to '{}' (same arguments already ran {} times)",
                        invocation.name,
                        DUPLICATE_LIMIT
                    );
                    slots.push(Slot::Ready(ToolOutcome::failure(format!(
                        "duplicate call: '{}' already ran {} times with these exact arguments; \
                         reuse the earlier results instead of calling it again",
                        invocation.name, DUPLICATE_LIMIT
                    ))));
                }
                Verdict::Exhausted { cap } => {
                    log::warn!(
                        "refusing call to '{}': per-request budget of {} exhausted",
                        invocation.name,
                        cap
                    );
                    slots.push(Slot::Ready(ToolOutcome::failure(format!(
                        "budget exhausted: '{}' may be used at most {} time(s) per request",
                        invocation.name, cap
                    ))));
                }
            }
        }
        // Handlers hold the only remaining senders; recv() ends when the
        // last one finishes.
        drop(progress_tx);

        let mut join = Box::pin(futures::future::join_all(dispatched));
        let mut poll = tokio::time::interval(INTERRUPT_POLL);
        let results = loop {
            tokio::select! {
                Some(update) = progress_rx.recv() => {
                    self.emit(WireEvent::ToolProgress {
                        name: update.name,
                        status: update.status,
                        message: update.message,
                        details: update.details,
                    });
                }
                results = &mut join => break results,
                _ = poll.tick() => {
                    if self.halted() {
                        log::debug!("request halted while executing tools; dropping in-flight dispatches");
                        return None;
                    }
                }
            }
        };

        // Progress that raced with the last completion
        while let Ok(update) = progress_rx.try_recv() {
            self.emit(WireEvent::ToolProgress {
                name: update.name,
                status: update.status,
                message: update.message,
                details: update.details,
            });
        }

        let outcomes = slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Ready(outcome) => outcome,
                Slot::Running(index) => results[index].clone(),
            })
            .collect();
        Some(outcomes)
    }
}
