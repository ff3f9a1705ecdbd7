//! Tool Registry
//!
//! Named capabilities the voice model may invoke during a round. Each tool has
//! a description, an optional JSON-schema for its arguments, and an async
//! handler. The registry is validated as tools are added, so a malformed schema
//! or a duplicate name is caught before a session ever announces it.

use anyhow::Context;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Errors raised while building a [`ToolRegistry`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ToolError {
    #[error("Tool name must not be empty")]
    EmptyName,
    #[error("Tool '{0}' is already registered")]
    DuplicateName(String),
    #[error("Invalid parameter schema for tool '{name}': {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// A local callback behind a tool.
///
/// Handlers receive the already-parsed argument object and return any JSON
/// value, which is serialized back to the model as the call's output.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value) -> anyhow::Result<Value>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn call(&self, args: Value) -> anyhow::Result<Value> {
        (self)(args).await
    }
}

/// A single registered capability.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Option<Value>,
    pub handler: Arc<dyn ToolHandler>,
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// The wire shape announced to the model.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            r#type: ToolKind::Function,
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Function,
}

/// A tool as it appears in a `session.update` event.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolDefinition {
    pub r#type: ToolKind,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// The closed table of tools for one session, in registration order.
#[derive(Default, Clone, Debug)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor after validating its name and schema.
    pub fn register(&mut self, descriptor: ToolDescriptor) -> Result<&mut Self, ToolError> {
        if descriptor.name.trim().is_empty() {
            return Err(ToolError::EmptyName);
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(ToolError::DuplicateName(descriptor.name));
        }
        if let Some(schema) = &descriptor.parameters {
            validate_schema(&descriptor.name, schema)?;
        }
        self.index
            .insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(descriptor);
        Ok(self)
    }

    /// Registers a handler working directly on JSON values.
    pub fn register_fn<H>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Option<Value>,
        handler: H,
    ) -> Result<&mut Self, ToolError>
    where
        H: ToolHandler + 'static,
    {
        self.register(ToolDescriptor {
            name: name.into(),
            description: description.into(),
            parameters,
            handler: Arc::new(handler),
        })
    }

    /// Registers a handler with strongly typed arguments.
    ///
    /// The parameter schema is derived from `A` and the raw arguments are
    /// deserialized into `A` before the handler runs.
    pub fn register_typed<A, R, F, Fut>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        handler: F,
    ) -> Result<&mut Self, ToolError>
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let name = name.into();
        let parameters = schema_for::<A>(&name)?;
        let handler = Arc::new(handler);
        let tool_name = name.clone();
        let erased = move |args: Value| {
            let handler = handler.clone();
            let tool_name = tool_name.clone();
            async move { invoke_typed(handler.as_ref(), &tool_name, args).await }
        };
        self.register(ToolDescriptor {
            name,
            description: description.into(),
            parameters: Some(parameters),
            handler: Arc::new(erased),
        })
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

async fn invoke_typed<A, R, F, Fut>(handler: &F, tool_name: &str, args: Value) -> anyhow::Result<Value>
where
    A: DeserializeOwned,
    R: Serialize,
    F: Fn(A) -> Fut,
    Fut: Future<Output = anyhow::Result<R>>,
{
    let parsed: A = serde_json::from_value(args)
        .with_context(|| format!("Invalid arguments for tool '{}'", tool_name))?;
    let output = handler(parsed).await?;
    Ok(serde_json::to_value(output)?)
}

fn validate_schema(name: &str, schema: &Value) -> Result<(), ToolError> {
    let invalid = |reason: &str| ToolError::InvalidSchema {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let object = schema
        .as_object()
        .ok_or_else(|| invalid("schema must be a JSON object"))?;
    match object.get("type").and_then(Value::as_str) {
        Some("object") => {}
        Some(other) => return Err(invalid(&format!("expected type 'object', got '{}'", other))),
        None => return Err(invalid("missing 'type'")),
    }
    if let Some(properties) = object.get("properties") {
        if !properties.is_object() {
            return Err(invalid("'properties' must be an object"));
        }
    }
    Ok(())
}

fn schema_for<A: JsonSchema>(name: &str) -> Result<Value, ToolError> {
    let mut schema = serde_json::to_value(schemars::schema_for!(A)).map_err(|e| {
        ToolError::InvalidSchema {
            name: name.to_string(),
            reason: e.to_string(),
        }
    })?;
    if let Some(object) = schema.as_object_mut() {
        object.remove("$schema");
        object.remove("title");
    }
    Ok(schema)
}
