//! Tool System
//!
//! Tools are plain descriptors (schema + function reference) collected into an
//! explicit registration table at startup. The table is read-only once it is
//! shared, and every invocation is argument-checked and time-bounded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::error::{AgentError, Result};

/// Default upper bound on a single tool invocation
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Tool call request from the LLM
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID for tracking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Tool identifier
    #[serde(alias = "tool")]
    pub name: String,

    /// Arguments as key-value pairs
    #[serde(default)]
    pub arguments: HashMap<String, Value>,

    /// Set when the model's arguments could not be read; the call is then
    /// rejected instead of running with `arguments` left empty
    #[serde(skip)]
    pub malformed: Option<String>,
}

impl ToolCall {
    /// Build a call from a JSON value. Anything but an object is kept as a
    /// malformed call.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let (arguments, malformed) = match arguments {
            Value::Object(map) => (map.into_iter().collect(), None),
            other => (
                HashMap::new(),
                Some(format!("arguments must be a JSON object, got {}", other)),
            ),
        };
        Self {
            id: None,
            name: name.into(),
            arguments,
            malformed,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_malformed_arguments(mut self, reason: impl Into<String>) -> Self {
        self.arguments.clear();
        self.malformed = Some(reason.into());
        self
    }
}

/// Result from tool execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Tool that was called
    pub name: String,

    /// Call ID (if provided in request)
    pub id: Option<String>,

    /// Whether execution succeeded
    pub success: bool,

    /// Output (success message or error)
    pub output: String,
}

impl ToolResult {
    pub fn success(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            success: false,
            output: error.into(),
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }

    /// Text fed back to the model in the tool-result message
    pub fn to_message_content(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            format!("Error: {}", self.output)
        }
    }
}

/// Parameter definition for tool schema
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Parameter name
    pub name: String,

    /// JSON Schema type (string, number, integer, boolean, object, array)
    #[serde(rename = "type")]
    pub param_type: String,

    /// Human-readable description
    pub description: String,

    /// Whether this parameter is required
    #[serde(default)]
    pub required: bool,
}

impl ParameterSchema {
    /// A required numeric parameter
    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type: "number".into(),
            description: description.into(),
            required: true,
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match self.param_type.as_str() {
            "number" => value.is_number() || value.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok()),
            "integer" => value.is_i64() || value.is_u64(),
            "string" => value.is_string(),
            "boolean" => value.is_boolean(),
            "object" => value.is_object(),
            "array" => value.is_array(),
            _ => true,
        }
    }
}

/// Tool definition schema (for LLM function calling)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description (shown to LLM)
    pub description: String,

    /// Parameter definitions
    pub parameters: Vec<ParameterSchema>,
}

impl ToolSchema {
    /// JSON Schema object describing the parameters
    pub fn parameters_json_schema(&self) -> Value {
        let properties: serde_json::Map<String, Value> = self
            .parameters
            .iter()
            .map(|p| {
                (
                    p.name.clone(),
                    serde_json::json!({"type": p.param_type, "description": p.description}),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Failure reported by a tool function itself
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    /// The arguments were well-typed but unusable
    #[error("{0}")]
    InvalidArgument(String),

    /// The function ran and failed
    #[error("{0}")]
    Failed(String),
}

/// Validated arguments handed to a tool function
#[derive(Clone, Debug, Default)]
pub struct ToolArgs {
    values: HashMap<String, Value>,
}

impl ToolArgs {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// Numeric argument; numeric strings are accepted
    pub fn number(&self, name: &str) -> std::result::Result<f64, ToolError> {
        match self.values.get(name) {
            Some(Value::Number(n)) => n
                .as_f64()
                .ok_or_else(|| ToolError::InvalidArgument(format!("'{}' is out of range", name))),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map_err(|_| ToolError::InvalidArgument(format!("'{}' is not a number", name))),
            Some(_) => Err(ToolError::InvalidArgument(format!("'{}' is not a number", name))),
            None => Err(ToolError::InvalidArgument(format!("missing '{}'", name))),
        }
    }
}

/// Function reference stored in a descriptor
pub type ToolFn = Arc<dyn Fn(&ToolArgs) -> std::result::Result<Value, ToolError> + Send + Sync>;

/// A registered tool: schema plus the function that implements it
#[derive(Clone)]
pub struct ToolDescriptor {
    schema: ToolSchema,
    invoke: ToolFn,
}

impl ToolDescriptor {
    pub fn new<F>(schema: ToolSchema, invoke: F) -> Self
    where
        F: Fn(&ToolArgs) -> std::result::Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            schema,
            invoke: Arc::new(invoke),
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Registry for available tools
#[derive(Debug)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDescriptor>,
    timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Override the per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Register a new tool; names must be unique
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<()> {
        let name = descriptor.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AgentError::DuplicateTool(name));
        }
        self.tools.insert(name, descriptor);
        Ok(())
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    /// Check a call against the declared parameters
    pub fn validate(&self, call: &ToolCall) -> Result<ToolArgs> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;

        if let Some(reason) = &call.malformed {
            return Err(AgentError::Argument {
                tool: call.name.clone(),
                reason: reason.clone(),
            });
        }

        for param in &tool.schema.parameters {
            match call.arguments.get(&param.name) {
                None | Some(Value::Null) if param.required => {
                    return Err(AgentError::Argument {
                        tool: call.name.clone(),
                        reason: format!("missing required parameter '{}'", param.name),
                    });
                }
                Some(value) if !value.is_null() && !param.accepts(value) => {
                    return Err(AgentError::Argument {
                        tool: call.name.clone(),
                        reason: format!("'{}' must be of type {}", param.name, param.param_type),
                    });
                }
                _ => {}
            }
        }

        Ok(ToolArgs::new(call.arguments.clone()))
    }

    /// Invoke a tool call. Runs on the blocking pool so a slow tool only holds
    /// up the request that asked for it.
    pub async fn invoke(&self, call: &ToolCall) -> Result<ToolResult> {
        let args = self.validate(call)?;
        let handler = match self.get(&call.name) {
            Some(tool) => tool.invoke.clone(),
            None => return Err(AgentError::UnknownTool(call.name.clone())),
        };

        let task = tokio::task::spawn_blocking(move || handler(&args));
        let outcome = tokio::time::timeout(self.timeout, task)
            .await
            .map_err(|_| AgentError::ToolInvocation {
                tool: call.name.clone(),
                reason: format!("timed out after {}ms", self.timeout.as_millis()),
            })?
            .map_err(|e| AgentError::ToolInvocation {
                tool: call.name.clone(),
                reason: format!("tool task aborted: {}", e),
            })?;

        match outcome {
            Ok(value) => Ok(ToolResult::success(&call.name, render_value(&value)).with_id(call.id.clone())),
            Err(ToolError::InvalidArgument(reason)) => Err(AgentError::Argument {
                tool: call.name.clone(),
                reason,
            }),
            Err(ToolError::Failed(reason)) => Err(AgentError::ToolInvocation {
                tool: call.name.clone(),
                reason,
            }),
        }
    }

    /// Get all tool schemas, ordered by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|t| t.schema.clone()).collect()
    }

    /// Get tool names
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Generate system prompt section describing available tools, for
    /// providers without native function calling
    pub fn generate_prompt_section(schemas: &[ToolSchema]) -> String {
        let mut prompt = String::from("## Available Tools\n\n");
        prompt.push_str("You can use the following tools by responding with a JSON block:\n\n");
        prompt.push_str("```tool\n{\"tool\": \"tool_name\", \"arguments\": {\"arg\": \"value\"}}\n```\n\n");

        for schema in schemas {
            prompt.push_str(&format!("### {}\n", schema.name));
            prompt.push_str(&format!("{}\n", schema.description));

            if !schema.parameters.is_empty() {
                prompt.push_str("**Parameters:**\n");
                for param in &schema.parameters {
                    let required = if param.required { " (required)" } else { "" };
                    prompt.push_str(&format!(
                        "- `{}` ({}){}: {}\n",
                        param.name, param.param_type, required, param.description
                    ));
                }
            }
            prompt.push('\n');
        }

        prompt
    }
}

/// Render a tool's JSON output as text for the model
fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{:.0}", f),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}
