//! Control-channel events exchanged with the realtime model.
//!
//! Only the events this client sends or acts on are modelled; every other
//! inbound type deserializes to [`ServerEvent::Other`].

use guesswho_core::tools::ToolDefinition;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

/// Session settings announced once the control channel opens.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub modalities: Vec<Modality>,
    pub tools: Vec<ToolDefinition>,
}

impl SessionConfig {
    pub fn with_tools(tools: Vec<ToolDefinition>) -> Self {
        Self {
            modalities: vec![Modality::Text, Modality::Audio],
            tools,
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    FunctionCallOutput {
        call_id: String,
        /// The tool result, JSON-encoded.
        output: String,
    },
}

/// Events sent from this client to the model.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },
    /// Asks the model to produce a response now.
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
}

impl ClientEvent {
    pub fn function_call_output(call_id: impl Into<String>, output: String) -> Self {
        Self::ConversationItemCreate {
            item: ConversationItem::FunctionCallOutput {
                call_id: call_id.into(),
                output,
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The model finished streaming the arguments of a function call.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct FunctionCallArgumentsDone {
    pub call_id: String,
    pub name: String,
    /// A JSON-encoded object.
    #[serde(default)]
    pub arguments: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ApiError {
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Events received from the model.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone(FunctionCallArgumentsDone),
    #[serde(rename = "error")]
    Error { error: ApiError },
    #[serde(other)]
    Other,
}

impl ServerEvent {
    pub fn parse(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guesswho_core::tools::ToolKind;
    use serde_json::{Value, json};

    fn to_value(event: &ClientEvent) -> Value {
        serde_json::from_str(&event.to_json().unwrap()).unwrap()
    }

    #[test]
    fn test_response_create_shape() {
        assert_eq!(to_value(&ClientEvent::ResponseCreate), json!({ "type": "response.create" }));
    }

    #[test]
    fn test_session_update_shape() {
        let event = ClientEvent::SessionUpdate {
            session: SessionConfig::with_tools(vec![
                ToolDefinition {
                    r#type: ToolKind::Function,
                    name: "endGame".into(),
                    description: "Ends the game".into(),
                    parameters: Some(json!({ "type": "object", "properties": {} })),
                },
                ToolDefinition {
                    r#type: ToolKind::Function,
                    name: "increaseGuessCount".into(),
                    description: "Counts a guess".into(),
                    parameters: None,
                },
            ]),
        };
        assert_eq!(
            to_value(&event),
            json!({
                "type": "session.update",
                "session": {
                    "modalities": ["text", "audio"],
                    "tools": [
                        {
                            "type": "function",
                            "name": "endGame",
                            "description": "Ends the game",
                            "parameters": { "type": "object", "properties": {} }
                        },
                        {
                            "type": "function",
                            "name": "increaseGuessCount",
                            "description": "Counts a guess"
                        }
                    ]
                }
            })
        );
    }

    #[test]
    fn test_function_call_output_shape() {
        let event = ClientEvent::function_call_output("call_1", r#"{"success":true}"#.to_string());
        assert_eq!(
            to_value(&event),
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "function_call_output",
                    "call_id": "call_1",
                    "output": "{\"success\":true}"
                }
            })
        );
    }

    #[test]
    fn test_parse_function_call_arguments_done() {
        let event = ServerEvent::parse(
            r#"{"type":"response.function_call_arguments.done","event_id":"ev_1",
                "response_id":"resp_1","item_id":"item_1","output_index":0,
                "call_id":"call_9","name":"endGame","arguments":"{\"success\":true}"}"#,
        )
        .unwrap();
        match event {
            ServerEvent::FunctionCallArgumentsDone(done) => {
                assert_eq!(done.call_id, "call_9");
                assert_eq!(done.name, "endGame");
                assert_eq!(done.arguments, r#"{"success":true}"#);
                assert_eq!(done.event_id.as_deref(), Some("ev_1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_error_and_unknown_events() {
        let event = ServerEvent::parse(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad"}}"#,
        )
        .unwrap();
        assert!(matches!(event, ServerEvent::Error { error } if error.message == "bad"));

        let event = ServerEvent::parse(r#"{"type":"response.audio_transcript.delta","delta":"hi"}"#)
            .unwrap();
        assert_eq!(event, ServerEvent::Other);
    }

    #[test]
    fn test_parse_rejects_malformed_payloads() {
        assert!(ServerEvent::parse("not json").is_err());
        assert!(ServerEvent::parse(r#"{"no_type":true}"#).is_err());
        assert!(
            ServerEvent::parse(r#"{"type":"response.function_call_arguments.done","name":"x"}"#)
                .is_err()
        );
    }
}
