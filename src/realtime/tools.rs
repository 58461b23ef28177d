//! Tool (function) handlers invoked on behalf of the remote model.

use super::messages::ToolDeclaration;
use crate::conversation::{Expression, Gesture};
use crate::{Result, TutorError};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

pub const SET_EXPRESSION: &str = "set_expression";
pub const PLAY_GESTURE: &str = "play_gesture";
pub const END_SESSION: &str = "end_session";

#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// `arguments` is the JSON object sent by the model.
    async fn call(&self, arguments: Value) -> Result<Value>;
}

/// Adapts a plain closure into a handler.
pub struct FnTool<F>(pub F);

#[async_trait]
impl<F> ToolHandler for FnTool<F>
where
    F: Fn(Value) -> Result<Value> + Send + Sync,
{
    async fn call(&self, arguments: Value) -> Result<Value> {
        (self.0)(arguments)
    }
}

#[derive(Clone)]
struct RegisteredTool {
    declaration: ToolDeclaration,
    handler: Arc<dyn ToolHandler>,
}

/// Declarations sent in the session configuration, keyed by tool name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, declaration: ToolDeclaration, handler: Arc<dyn ToolHandler>) {
        let name = declaration.name.clone();
        if !self.tools.contains_key(&name) {
            self.order.push(name.clone());
        }
        self.tools.insert(name, RegisteredTool { declaration, handler });
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.declaration.clone())
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a tool. Every failure becomes an `{"error": ...}` payload for the model.
    pub async fn invoke(&self, name: &str, arguments: &str) -> Value {
        match self.try_invoke(name, arguments).await {
            Ok(value) => value,
            Err(e) => {
                warn!(tool = name, error = %e, "tool invocation failed");
                let message = match e {
                    TutorError::ToolInvocationError(message) => message,
                    other => other.to_string(),
                };
                json!({ "error": message })
            }
        }
    }

    async fn try_invoke(&self, name: &str, arguments: &str) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| TutorError::ToolInvocationError(format!("unknown tool: {}", name)))?;
        let arguments: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            serde_json::from_str(arguments).map_err(|e| {
                TutorError::ToolInvocationError(format!("invalid arguments for {}: {}", name, e))
            })?
        };
        tool.handler.call(arguments).await
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry").field("tools", &self.order).finish()
    }
}

fn string_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| TutorError::ToolInvocationError(format!("missing argument: {}", key)))
}

fn enum_schema(key: &str, values: Vec<&'static str>, description: &str) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert(
        key.to_string(),
        json!({"type": "string", "enum": values, "description": description}),
    );
    json!({
        "type": "object",
        "properties": properties,
        "required": [key]
    })
}

/// Declarations and acknowledging handlers for the animated character.
/// The session reads the calls from the event stream to drive the UI.
pub fn character_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    registry.register(
        ToolDeclaration::function(
            SET_EXPRESSION,
            "Change the character's facial expression to match the mood of the conversation.",
            enum_schema(
                "expression",
                Expression::ALL.iter().map(Expression::as_str).collect(),
                "Facial expression to show",
            ),
        ),
        Arc::new(FnTool(|args: Value| -> Result<Value> {
            let value = string_arg(&args, "expression")?;
            let expression = Expression::parse(value)
                .ok_or_else(|| TutorError::ToolInvocationError(format!("unknown expression: {}", value)))?;
            Ok(json!({"status": "ok", "expression": expression.as_str()}))
        })),
    );

    registry.register(
        ToolDeclaration::function(
            PLAY_GESTURE,
            "Play a body gesture animation on the character.",
            enum_schema(
                "gesture",
                Gesture::ALL.iter().map(Gesture::as_str).collect(),
                "Gesture to play",
            ),
        ),
        Arc::new(FnTool(|args: Value| -> Result<Value> {
            let value = string_arg(&args, "gesture")?;
            let gesture = Gesture::parse(value)
                .ok_or_else(|| TutorError::ToolInvocationError(format!("unknown gesture: {}", value)))?;
            Ok(json!({"status": "ok", "gesture": gesture.as_str()}))
        })),
    );

    registry.register(
        ToolDeclaration::function(
            END_SESSION,
            "End the practice session after saying goodbye, when the user asks to stop or time is up.",
            enum_schema(
                "farewell_reason",
                vec!["user_request", "time_limit"],
                "Why the session is ending",
            ),
        ),
        Arc::new(FnTool(|args: Value| -> Result<Value> {
            let reason = args
                .get("farewell_reason")
                .and_then(Value::as_str)
                .unwrap_or("user_request");
            Ok(json!({"status": "ok", "ending": true, "farewell_reason": reason}))
        })),
    );

    registry
}
