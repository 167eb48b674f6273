//! Tool system: definitions, capability registry, and dispatch
//!
//! A [`Tool`] pairs metadata the model sees (name, description, parameter
//! schema) with the async handler that does the work. Handlers follow one
//! uniform contract: arguments in, a [`Progress`] handle for incremental
//! status, a JSON result (or error) out:
//!
//! ```rust,no_run
//! use chatwire::{tool, Result};
//! use serde_json::json;
//!
//! let weather = tool("get_weather", "Get current weather for a location")
//!     .param("location", "string")
//!     .build(|args, progress| async move {
//!         let location = args["location"].as_str().unwrap_or("Unknown");
//!         progress.update("running", format!("looking up {location}"));
//!         Ok(json!({"location": location, "temperature": 22}))
//!     });
//! ```
//!
//! All registered tools live in a [`ToolRegistry`] built once at engine
//! startup: a name-to-handler map looked up per invocation, so adding a tool
//! never touches the iteration loop. Dispatch never fails the round:
//! unknown names and handler errors come back as failure [`ToolOutcome`]s
//! that flow to the model like any other result.
//!
//! # Schema flexibility
//!
//! Parameter schemas accept three shapes, all normalized to the JSON Schema
//! structure the completions API expects:
//!
//! - simple: `{"location": "string", "units": "string"}` (all required)
//! - extended: `{"limit": {"type": "integer", "optional": true}}`
//! - full JSON Schema (passed through untouched)

use crate::types::ToolInvocation;
use crate::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// One progress report from a running tool
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    /// Tool that reported it
    pub name: String,
    /// Coarse state, e.g. "starting", "running", "finishing"
    pub status: String,
    /// Human-readable detail line
    pub message: String,
    /// Optional structured details
    pub details: Option<Value>,
}

/// Handle a tool handler uses to report progress.
///
/// Each update is forwarded to the requesting client as a `tool_progress`
/// event in real time. Cheap to clone; sending never blocks and never fails
/// the handler. If nobody is listening anymore, updates are dropped.
#[derive(Debug, Clone)]
pub struct Progress {
    name: String,
    sender: Option<UnboundedSender<ProgressUpdate>>,
}

impl Progress {
    pub(crate) fn new(name: impl Into<String>, sender: UnboundedSender<ProgressUpdate>) -> Self {
        Self {
            name: name.into(),
            sender: Some(sender),
        }
    }

    /// A handle that discards updates. For calling [`Tool::execute`] directly
    /// (tests, warm-up calls) without wiring a channel.
    pub fn disconnected(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sender: None,
        }
    }

    /// Report a status/message pair
    pub fn update(&self, status: impl Into<String>, message: impl Into<String>) {
        self.send(status.into(), message.into(), None);
    }

    /// Report a status/message pair with structured details
    pub fn update_with_details(
        &self,
        status: impl Into<String>,
        message: impl Into<String>,
        details: Value,
    ) {
        self.send(status.into(), message.into(), Some(details));
    }

    fn send(&self, status: String, message: String, details: Option<Value>) {
        if let Some(sender) = &self.sender {
            // A closed channel means the request is being torn down; the
            // handler keeps running until its own cancellation point.
            let _ = sender.send(ProgressUpdate {
                name: self.name.clone(),
                status,
                message,
                details,
            });
        }
    }
}

/// Type alias for tool handler functions.
///
/// `Arc` so one handler can be shared by registry and catalog; the pinned,
/// boxed future erases each handler's concrete async type so they can live
/// in one map.
pub type ToolHandler = Arc<
    dyn Fn(Value, Progress) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync,
>;

/// A named capability the model may invoke.
///
/// Immutable once built: metadata and handler never change mid-request, so
/// clones are cheap (the handler is shared through its `Arc`) and access is
/// safe across tasks without locks.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    input_schema: Value,
    handler: ToolHandler,
}

impl Tool {
    /// Create a tool. The schema accepts the three shapes described in the
    /// module docs and is normalized once, here.
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(Value, Progress) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: normalize_schema(input_schema),
            handler: Arc::new(move |args, progress| Box::pin(handler(args, progress))),
        }
    }

    /// Run the handler with the given arguments and progress handle
    pub async fn execute(&self, arguments: Value, progress: Progress) -> Result<Value> {
        (self.handler)(arguments, progress).await
    }

    /// The tool-catalog entry sent to the model every round:
    /// `{"type": "function", "function": {name, description, parameters}}`
    pub fn catalog_entry(&self) -> Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.input_schema
            }
        })
    }

    /// Returns the tool's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tool's description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns a reference to the tool's normalized input schema.
    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }
}

// The handler field has no useful debug representation; show metadata only.
impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("input_schema", &self.input_schema)
            .finish()
    }
}

/// What one dispatch resolved to: a success/failure flag plus the text fed
/// back to both the model (tool message) and the wire (`tool_result` event).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub success: bool,
    pub content: String,
}

impl ToolOutcome {
    /// Successful result; the value is serialized as the result text
    pub fn success(value: &Value) -> Self {
        Self {
            success: true,
            content: value.to_string(),
        }
    }

    /// Failed or refused invocation; the message is wrapped as
    /// `{"error": ...}` so the model sees a structured explanation
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: serde_json::json!({"error": message.into()}).to_string(),
        }
    }
}

/// Name-to-handler capability registry, built once at startup.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    by_name: HashMap<String, Arc<Tool>>,
    /// Registration order, for a deterministic catalog
    order: Vec<Arc<Tool>>,
}

impl ToolRegistry {
    /// Build the registry from the configured tools. A repeated name keeps
    /// the later registration and logs a warning.
    pub fn new(tools: impl IntoIterator<Item = Arc<Tool>>) -> Self {
        let mut registry = Self::default();
        for tool in tools {
            if registry.by_name.contains_key(tool.name()) {
                log::warn!("tool '{}' registered twice; keeping the latest", tool.name());
                registry.order.retain(|t| t.name() != tool.name());
            }
            registry.by_name.insert(tool.name().to_string(), tool.clone());
            registry.order.push(tool);
        }
        registry
    }

    /// Look up a tool by name
    pub fn get(&self, name: &str) -> Option<&Arc<Tool>> {
        self.by_name.get(name)
    }

    /// Catalog entries for every registered tool, in registration order
    pub fn catalog(&self) -> Vec<Value> {
        self.order.iter().map(|tool| tool.catalog_entry()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Route one invocation to its handler.
    ///
    /// Never returns an error: an unknown name or a failing handler becomes
    /// a failure outcome so the round (and the conversation) continues.
    pub async fn dispatch(&self, invocation: &ToolInvocation, progress: Progress) -> ToolOutcome {
        let Some(tool) = self.get(&invocation.name) else {
            log::warn!("model requested unregistered tool '{}'", invocation.name);
            return ToolOutcome::failure(format!(
                "no tool named '{}' is available",
                invocation.name
            ));
        };

        match tool.execute(invocation.arguments.clone(), progress).await {
            Ok(value) => ToolOutcome::success(&value),
            Err(err) => {
                log::warn!("tool '{}' failed: {}", invocation.name, err);
                ToolOutcome::failure(err.to_string())
            }
        }
    }
}

/// Start building a tool with the fluent parameter API
pub fn tool(name: impl Into<String>, description: impl Into<String>) -> ToolBuilder {
    ToolBuilder {
        name: name.into(),
        description: description.into(),
        params: Vec::new(),
    }
}

/// Builder returned by [`tool`]
#[derive(Debug)]
pub struct ToolBuilder {
    name: String,
    description: String,
    params: Vec<(String, String, bool)>,
}

impl ToolBuilder {
    /// Add a required parameter with a simple type name ("string", "number", ...)
    pub fn param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push((name.into(), type_name.into(), true));
        self
    }

    /// Add an optional parameter with a simple type name
    pub fn optional_param(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push((name.into(), type_name.into(), false));
        self
    }

    /// Finish with the handler, producing the [`Tool`]
    pub fn build<F, Fut>(self, handler: F) -> Tool
    where
        F: Fn(Value, Progress) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for (name, type_name, is_required) in self.params {
            properties.insert(name.clone(), serde_json::json!({"type": type_name}));
            if is_required {
                required.push(Value::String(name));
            }
        }

        let schema = serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required
        });

        Tool::new(self.name, self.description, schema, handler)
    }
}

/// Normalize the accepted schema shapes to JSON Schema.
///
/// Full JSON Schema (has "type": "object" and "properties") passes through.
/// Otherwise each key maps a parameter to either a type-name string or an
/// extended property object; `"optional": true` / `"required": false` mark a
/// parameter optional, everything else is required.
fn normalize_schema(schema: Value) -> Value {
    let Value::Object(map) = &schema else {
        return schema;
    };

    // Already full JSON Schema
    if map.get("type").and_then(Value::as_str) == Some("object") && map.contains_key("properties") {
        return schema;
    }

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for (name, spec) in map {
        match spec {
            Value::String(type_name) => {
                properties.insert(name.clone(), serde_json::json!({"type": type_name}));
                required.push(Value::String(name.clone()));
            }
            Value::Object(spec_map) => {
                let optional = spec_map.get("optional").and_then(Value::as_bool) == Some(true)
                    || spec_map.get("required").and_then(Value::as_bool) == Some(false);

                let mut cleaned = spec_map.clone();
                cleaned.remove("optional");
                cleaned.remove("required");
                properties.insert(name.clone(), Value::Object(cleaned));

                if !optional {
                    required.push(Value::String(name.clone()));
                }
            }
            other => {
                // Unrecognized spec shape; pass it through as the property
                properties.insert(name.clone(), other.clone());
                required.push(Value::String(name.clone()));
            }
        }
    }

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_tool_execution() {
        let multiply = tool("multiply", "Multiply two numbers")
            .param("x", "number")
            .param("y", "number")
            .build(|args, _progress| async move {
                let x = args["x"].as_f64().unwrap_or(0.0);
                let y = args["y"].as_f64().unwrap_or(0.0);
                Ok(json!({"result": x * y}))
            });

        let result = multiply
            .execute(json!({"x": 5.0, "y": 3.0}), Progress::disconnected("multiply"))
            .await
            .unwrap();

        assert_eq!(result["result"], 15.0);
    }

    #[tokio::test]
    async fn test_progress_updates_are_forwarded() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let slow = tool("slow", "Reports progress").build(|_args, progress| async move {
            progress.update("running", "step 1");
            progress.update_with_details("running", "step 2", json!({"pct": 50}));
            Ok(json!({"done": true}))
        });

        slow.execute(json!({}), Progress::new("slow", tx))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.name, "slow");
        assert_eq!(first.status, "running");
        assert_eq!(first.message, "step 1");
        assert!(first.details.is_none());

        let second = rx.recv().await.unwrap();
        assert_eq!(second.details, Some(json!({"pct": 50})));
    }

    #[tokio::test]
    async fn test_registry_dispatch_unknown_tool() {
        let registry = ToolRegistry::new(Vec::new());
        let invocation = ToolInvocation::new("call_1", "missing", json!({}));

        let outcome = registry
            .dispatch(&invocation, Progress::disconnected("missing"))
            .await;

        assert!(!outcome.success);
        assert!(outcome.content.contains("missing"));
    }

    #[tokio::test]
    async fn test_registry_dispatch_handler_error_becomes_failure() {
        let failing = tool("fail", "Always fails").build(|_args, _progress| async move {
            Err(crate::Error::tool("backing service unavailable"))
        });
        let registry = ToolRegistry::new(vec![Arc::new(failing)]);
        let invocation = ToolInvocation::new("call_1", "fail", json!({}));

        let outcome = registry
            .dispatch(&invocation, Progress::disconnected("fail"))
            .await;

        assert!(!outcome.success);
        assert!(outcome.content.contains("backing service unavailable"));
    }

    #[test]
    fn test_catalog_preserves_registration_order() {
        let a = Arc::new(tool("alpha", "a").build(|_, _| async { Ok(json!({})) }));
        let b = Arc::new(tool("beta", "b").build(|_, _| async { Ok(json!({})) }));
        let registry = ToolRegistry::new(vec![a, b]);

        let catalog = registry.catalog();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0]["function"]["name"], "alpha");
        assert_eq!(catalog[1]["function"]["name"], "beta");
    }

    #[test]
    fn test_catalog_entry_shape() {
        let search = tool("search", "Search the index")
            .param("query", "string")
            .optional_param("limit", "integer")
            .build(|_, _| async { Ok(json!({})) });

        let entry = search.catalog_entry();
        assert_eq!(entry["type"], "function");
        assert_eq!(entry["function"]["name"], "search");
        assert_eq!(
            entry["function"]["parameters"]["properties"]["query"]["type"],
            "string"
        );
        assert_eq!(entry["function"]["parameters"]["required"], json!(["query"]));
    }

    #[test]
    fn test_normalize_simple_schema() {
        let schema = normalize_schema(json!({"location": "string", "units": "string"}));

        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["location"]["type"], "string");
        let required = schema["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn test_normalize_extended_schema() {
        let schema = normalize_schema(json!({
            "query": {"type": "string", "description": "Search query"},
            "limit": {"type": "integer", "optional": true}
        }));

        assert_eq!(schema["properties"]["query"]["description"], "Search query");
        // the marker key is consumed during normalization
        assert!(schema["properties"]["limit"].get("optional").is_none());
        assert_eq!(schema["required"], json!(["query"]));
    }

    #[test]
    fn test_normalize_full_schema_passthrough() {
        let full = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });

        assert_eq!(normalize_schema(full.clone()), full);
    }

    #[test]
    fn test_duplicate_registration_keeps_latest() {
        let first = Arc::new(tool("echo", "first").build(|_, _| async { Ok(json!(1)) }));
        let second = Arc::new(tool("echo", "second").build(|_, _| async { Ok(json!(2)) }));
        let registry = ToolRegistry::new(vec![first, second]);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("echo").unwrap().description(), "second");
    }

    #[test]
    fn test_outcome_constructors() {
        let ok = ToolOutcome::success(&json!({"result": 4}));
        assert!(ok.success);
        assert_eq!(ok.content, r#"{"result":4}"#);

        let failed = ToolOutcome::failure("boom");
        assert!(!failed.success);
        assert_eq!(failed.content, r#"{"error":"boom"}"#);
    }
}
