//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what let the model act: look up a forecast, query or create
//! events, send the reply. Each tool declares typed arguments and output;
//! the registry erases those types and does the JSON work at its boundary:
//!
//! 1. look up the tool by name (unknown → error result)
//! 2. validate raw arguments against the parameter schema (violation → error result)
//! 3. deserialize and execute exactly once (failure → opaque error result)
//! 4. validate the serialized output against the response schema (violation → fatal)
//! 5. attach `is_final` for the agent

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{DispatchError, RegistryError, ToolError};
use crate::message::{ToolCall, ToolResult};
use crate::provider::ToolDefinition;
use crate::schema::{self, CompiledSchema};

/// The core Tool trait.
///
/// Implementations see only typed values; schema validation and JSON
/// conversion happen in [`ToolRegistry::dispatch`].
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    /// Validated, deserialized arguments.
    type Args: DeserializeOwned + Send + 'static;

    /// What a successful call returns.
    type Output: Serialize + Send + Sync + 'static;

    /// The unique, stable name of this tool (e.g., "weather_forecast").
    fn name(&self) -> &str;

    /// A description of this tool alone (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema for accepted arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    /// JSON Schema the output promises to satisfy.
    fn response_schema(&self) -> serde_json::Value;

    /// Perform the operation.
    async fn execute(
        &self,
        ctx: &RequestContext,
        args: Self::Args,
    ) -> std::result::Result<Self::Output, ToolError>;

    /// Whether a successful call ends the agent loop.
    fn is_final(&self, _output: &Self::Output) -> bool {
        false
    }

    /// The user-visible text this call produced, if any.
    fn transcript(&self, _output: &Self::Output) -> Option<String> {
        None
    }
}

/// What the agent learns from one dispatched call.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub result: ToolResult,

    /// Only ever true for a successful, schema-conforming result
    pub is_final: bool,

    pub transcript: Option<String>,
}

impl DispatchOutcome {
    fn failed(result: ToolResult) -> Self {
        Self {
            result,
            is_final: false,
            transcript: None,
        }
    }
}

struct Executed {
    payload: serde_json::Value,
    is_final: bool,
    transcript: Option<String>,
}

enum RunError {
    Arguments(String),
    Tool(ToolError),
    Unserializable(String),
}

#[async_trait]
trait ErasedTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    async fn run(
        &self,
        ctx: &RequestContext,
        arguments: serde_json::Value,
    ) -> std::result::Result<Executed, RunError>;
}

struct Typed<T>(T);

#[async_trait]
impl<T: Tool> ErasedTool for Typed<T> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn description(&self) -> &str {
        self.0.description()
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        arguments: serde_json::Value,
    ) -> std::result::Result<Executed, RunError> {
        let args: T::Args =
            serde_json::from_value(arguments).map_err(|e| RunError::Arguments(e.to_string()))?;
        let output = self.0.execute(ctx, args).await.map_err(RunError::Tool)?;
        let is_final = self.0.is_final(&output);
        let transcript = self.0.transcript(&output);
        let payload =
            serde_json::to_value(&output).map_err(|e| RunError::Unserializable(e.to_string()))?;
        Ok(Executed {
            payload,
            is_final,
            transcript,
        })
    }
}

struct Entry {
    tool: Box<dyn ErasedTool>,
    parameters: CompiledSchema,
    response: CompiledSchema,
}

/// A registry of available tools, built once at startup.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the model
/// 2. Dispatch the calls the model returns
pub struct ToolRegistry {
    tools: BTreeMap<String, Entry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Names must be unique and both schemas must compile.
    pub fn register<T: Tool>(&mut self, tool: T) -> std::result::Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateName(name));
        }

        let parameters = CompiledSchema::compile(tool.parameters_schema()).map_err(|reason| {
            RegistryError::InvalidSchema {
                tool_name: name.clone(),
                which: "parameter",
                reason,
            }
        })?;
        let response = CompiledSchema::compile(tool.response_schema()).map_err(|reason| {
            RegistryError::InvalidSchema {
                tool_name: name.clone(),
                which: "response",
                reason,
            }
        })?;

        self.tools.insert(
            name,
            Entry {
                tool: Box::new(Typed(tool)),
                parameters,
                response,
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get all tool definitions (for sending to the model), ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|entry| ToolDefinition {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                parameters: entry.parameters.source().clone(),
            })
            .collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Dispatch one model-issued call.
    ///
    /// Everything the model can recover from comes back as an error
    /// `ToolResult`. Only a tool breaking its own response schema is an `Err`.
    pub async fn dispatch(
        &self,
        ctx: &RequestContext,
        call: &ToolCall,
    ) -> std::result::Result<DispatchOutcome, DispatchError> {
        let Some(entry) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Model called an unknown tool");
            return Ok(DispatchOutcome::failed(ToolResult::error(
                call,
                format!("unknown tool: {}", call.name),
            )));
        };

        if let Err(violations) = entry.parameters.validate(&call.arguments) {
            debug!(tool = %call.name, violations = violations.len(), "Rejected tool arguments");
            return Ok(DispatchOutcome::failed(ToolResult::error(
                call,
                format!("invalid arguments: {}", schema::describe(&violations)),
            )));
        }

        let executed = match entry.tool.run(ctx, call.arguments.clone()).await {
            Ok(executed) => executed,
            Err(RunError::Arguments(reason)) => {
                return Ok(DispatchOutcome::failed(ToolResult::error(
                    call,
                    format!("invalid arguments: {reason}"),
                )));
            }
            Err(RunError::Tool(e)) => {
                warn!(
                    tool = %call.name,
                    call_id = %call.id,
                    conversation = %ctx.conversation_key,
                    error = %e,
                    "Tool execution failed"
                );
                return Ok(DispatchOutcome::failed(ToolResult::error(
                    call,
                    e.model_message(),
                )));
            }
            Err(RunError::Unserializable(reason)) => {
                return Err(DispatchError::UnserializableResult {
                    tool_name: call.name.clone(),
                    reason,
                });
            }
        };

        if let Err(violations) = entry.response.validate(&executed.payload) {
            return Err(DispatchError::ResponseSchemaViolation {
                tool_name: call.name.clone(),
                violations: schema::describe(&violations),
            });
        }

        Ok(DispatchOutcome {
            result: ToolResult::success(call, executed.payload),
            is_final: executed.is_final,
            transcript: executed.transcript,
        })
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ReplyHandle;
    use crate::message::{ConversationKey, ToolOutcome};
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> RequestContext {
        RequestContext::new(ConversationKey::user("U1"), "U1", ReplyHandle::new("tok"))
    }

    #[derive(Deserialize)]
    struct EchoArgs {
        text: String,
    }

    #[derive(Serialize)]
    struct EchoOutput {
        text: String,
    }

    /// Echoes its input; counts executions; final when the text says "done".
    struct EchoTool {
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        type Args = EchoArgs;
        type Output = EchoOutput;

        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        fn response_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            _ctx: &RequestContext,
            args: EchoArgs,
        ) -> std::result::Result<EchoOutput, ToolError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if args.text == "fail" {
                return Err(ToolError::Upstream {
                    tool_name: "echo".into(),
                    service: "echo-backend".into(),
                    detail: "connection refused at /var/run/echo.sock".into(),
                });
            }
            Ok(EchoOutput { text: args.text })
        }
        fn is_final(&self, output: &EchoOutput) -> bool {
            output.text == "done"
        }
    }

    /// Declares a string `count` but returns a number.
    struct LyingTool;

    #[async_trait]
    impl Tool for LyingTool {
        type Args = serde_json::Value;
        type Output = serde_json::Value;

        fn name(&self) -> &str {
            "liar"
        }
        fn description(&self) -> &str {
            "Breaks its own response schema"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object" })
        }
        fn response_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "count": { "type": "string" } },
                "required": ["count"]
            })
        }
        async fn execute(
            &self,
            _ctx: &RequestContext,
            _args: serde_json::Value,
        ) -> std::result::Result<serde_json::Value, ToolError> {
            Ok(serde_json::json!({ "count": 3 }))
        }
        fn is_final(&self, _output: &serde_json::Value) -> bool {
            true
        }
    }

    fn registry() -> (ToolRegistry, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry
            .register(EchoTool { runs: runs.clone() })
            .unwrap();
        (registry, runs)
    }

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "call_1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let (registry, _) = registry();
        assert!(registry.contains("echo"));
        assert!(!registry.contains("nonexistent"));
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[test]
    fn duplicate_name_rejected() {
        let (mut registry, runs) = registry();
        let err = registry.register(EchoTool { runs }).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateName(name) if name == "echo"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registry_definitions() {
        let (registry, _) = registry();
        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert_eq!(defs[0].parameters["required"][0], "text");
    }

    #[tokio::test]
    async fn dispatch_success() {
        let (registry, runs) = registry();
        let outcome = registry
            .dispatch(&ctx(), &call("echo", serde_json::json!({"text": "hello"})))
            .await
            .unwrap();
        assert_eq!(
            outcome.result.outcome,
            ToolOutcome::Success(serde_json::json!({"text": "hello"}))
        );
        assert_eq!(outcome.result.call_id, "call_1");
        assert!(!outcome.is_final);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispatch_reports_finality() {
        let (registry, _) = registry();
        let outcome = registry
            .dispatch(&ctx(), &call("echo", serde_json::json!({"text": "done"})))
            .await
            .unwrap();
        assert!(outcome.is_final);
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error_result() {
        let (registry, _) = registry();
        let outcome = registry
            .dispatch(&ctx(), &call("nonexistent", serde_json::json!({})))
            .await
            .unwrap();
        assert!(outcome.result.error_message().unwrap().contains("unknown tool"));
        assert!(!outcome.is_final);
        assert_eq!(registry.names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn invalid_arguments_never_execute() {
        let (registry, runs) = registry();
        let outcome = registry
            .dispatch(&ctx(), &call("echo", serde_json::json!({"text": 42})))
            .await
            .unwrap();
        let message = outcome.result.error_message().unwrap();
        assert!(message.contains("/text"), "{message}");
        assert!(message.contains("string"), "{message}");
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn execution_failure_is_opaque_and_not_final() {
        let (registry, runs) = registry();
        let outcome = registry
            .dispatch(&ctx(), &call("echo", serde_json::json!({"text": "fail"})))
            .await
            .unwrap();
        let message = outcome.result.error_message().unwrap();
        assert!(!message.contains("echo.sock"));
        assert!(!outcome.is_final);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn response_schema_violation_is_fatal() {
        let mut registry = ToolRegistry::new();
        registry.register(LyingTool).unwrap();
        let err = registry
            .dispatch(&ctx(), &call("liar", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::ResponseSchemaViolation { .. }));
    }
}
