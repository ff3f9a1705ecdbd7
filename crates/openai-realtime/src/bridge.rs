//! Tool Dispatch Bridge
//!
//! Translates function calls announced by the model on the control channel
//! into local tool invocations, and the results back into protocol events.

use crate::{
    error::Result,
    events::{ClientEvent, FunctionCallArgumentsDone, ServerEvent, SessionConfig},
    transport::ControlChannel,
};
use guesswho_core::tools::ToolRegistry;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Something the caller may want to know about that the model is never told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// The model called a tool that is not registered; no output was sent.
    UnknownTool { name: String, call_id: String },
    /// A call id was delivered again and ignored.
    DuplicateCall { name: String, call_id: String },
    /// An inbound message could not be understood and was discarded.
    MalformedMessage { reason: String },
    /// A tool callback failed; the model received an error output.
    ToolFailed {
        name: String,
        call_id: String,
        message: String,
    },
    /// The model reported an error event.
    ModelError { message: String },
}

/// Per-session dispatcher between the control channel and a [`ToolRegistry`].
pub struct ToolBridge {
    registry: Arc<ToolRegistry>,
    seen_calls: HashSet<String>,
    diagnostics: broadcast::Sender<Diagnostic>,
}

impl ToolBridge {
    pub fn new(registry: Arc<ToolRegistry>, diagnostics: broadcast::Sender<Diagnostic>) -> Self {
        Self {
            registry,
            seen_calls: HashSet::new(),
            diagnostics,
        }
    }

    /// Announces the tool set and asks the model to start talking.
    pub async fn announce(&self, channel: &dyn ControlChannel) -> Result<()> {
        let update = ClientEvent::SessionUpdate {
            session: SessionConfig::with_tools(self.registry.definitions()),
        };
        send(channel, &update).await?;
        send(channel, &ClientEvent::ResponseCreate).await?;
        info!(tools = self.registry.len(), "Tool set announced");
        Ok(())
    }

    /// Handles one inbound control-channel message.
    ///
    /// Only a failure to send on the channel is returned as an error; anything
    /// wrong with the message itself is reported as a [`Diagnostic`].
    pub async fn handle_message(&mut self, channel: &dyn ControlChannel, text: &str) -> Result<()> {
        let event = match ServerEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                self.report(Diagnostic::MalformedMessage {
                    reason: e.to_string(),
                });
                return Ok(());
            }
        };

        match event {
            ServerEvent::FunctionCallArgumentsDone(call) => self.dispatch(channel, call).await,
            ServerEvent::Error { error } => {
                self.report(Diagnostic::ModelError {
                    message: error.message,
                });
                Ok(())
            }
            ServerEvent::Other => Ok(()),
        }
    }

    async fn dispatch(
        &mut self,
        channel: &dyn ControlChannel,
        call: FunctionCallArgumentsDone,
    ) -> Result<()> {
        let Some(tool) = self.registry.get(&call.name) else {
            self.report(Diagnostic::UnknownTool {
                name: call.name,
                call_id: call.call_id,
            });
            return Ok(());
        };

        if self.seen_calls.contains(&call.call_id) {
            self.report(Diagnostic::DuplicateCall {
                name: call.name,
                call_id: call.call_id,
            });
            return Ok(());
        }

        let args = match parse_arguments(&call.arguments) {
            Ok(args) => args,
            Err(reason) => {
                self.report(Diagnostic::MalformedMessage {
                    reason: format!("arguments for '{}': {}", call.name, reason),
                });
                return Ok(());
            }
        };
        self.seen_calls.insert(call.call_id.clone());

        debug!(tool = %call.name, call_id = %call.call_id, %args, "Invoking tool");
        let handler = tool.handler.clone();
        let output = match handler.call(args).await {
            Ok(value) => value,
            Err(e) => {
                let message = format!("{:#}", e);
                self.report(Diagnostic::ToolFailed {
                    name: call.name.clone(),
                    call_id: call.call_id.clone(),
                    message: message.clone(),
                });
                json!({ "error": message })
            }
        };

        let output = serde_json::to_string(&output)?;
        send(channel, &ClientEvent::function_call_output(call.call_id, output)).await?;
        send(channel, &ClientEvent::ResponseCreate).await
    }

    fn report(&self, diagnostic: Diagnostic) {
        warn!(?diagnostic, "Tool bridge diagnostic");
        // No subscribers is fine.
        let _ = self.diagnostics.send(diagnostic);
    }
}

/// The arguments string must encode an object; an empty string means no arguments.
fn parse_arguments(raw: &str) -> std::result::Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(json!({}));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, got {}", other)),
        Err(e) => Err(e.to_string()),
    }
}

async fn send(channel: &dyn ControlChannel, event: &ClientEvent) -> Result<()> {
    channel.send_text(event.to_json()?).await
}
