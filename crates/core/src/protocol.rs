//! Wire schema of the control channel.
//!
//! Both directions are JSON objects discriminated by a `type` field.
//! Outbound messages prime and drive the conversation; inbound messages are
//! the response-turn lifecycle events. Inbound types outside the recognized
//! set are tolerated and ignored, so the schema can grow server-side without
//! breaking deployed clients.

use serde::{Deserialize, Serialize};

/// Messages sent to the remote endpoint over the control channel.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Opens a conversation with the named model.
    #[serde(rename = "conversation.create")]
    ConversationCreate { model: String },
    /// Appends an item to the conversation.
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },
    /// Asks the model to produce a response.
    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseSpec },
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub role: ItemRole,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// A user-originated message holding a single text block.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Message,
            role: ItemRole::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Message,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ItemRole {
    User,
    System,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
}

/// Parameters of a `response.create` request.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ResponseSpec {
    /// Conversation continuation mode; `auto` keeps extending the default
    /// conversation with each turn.
    pub conversation: ConversationMode,
    pub modalities: Vec<Modality>,
}

impl ResponseSpec {
    /// The mode used after priming: automatic continuation, spoken and
    /// written output.
    pub fn text_and_audio() -> Self {
        Self {
            conversation: ConversationMode::Auto,
            modalities: vec![Modality::Text, Modality::Audio],
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationMode {
    Auto,
    None,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Audio,
}

/// Messages received from the remote endpoint.
#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// The model finished a response turn.
    #[serde(rename = "response.done")]
    ResponseDone,
    /// The model failed a response turn.
    #[serde(rename = "response.error")]
    ResponseError {
        #[serde(default)]
        error: Option<ErrorDetail>,
    },
    /// Any type this client does not recognize.
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ErrorDetail {
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conversation_create_shape() {
        let event = ClientEvent::ConversationCreate {
            model: "gpt-4o-realtime-preview-2024-12-17".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "conversation.create",
                "model": "gpt-4o-realtime-preview-2024-12-17",
            })
        );
    }

    #[test]
    fn conversation_item_create_shape() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::user_text("Document: Photosynthesis\n\nPlants..."),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "conversation.item.create",
                "item": {
                    "type": "message",
                    "role": "user",
                    "content": [
                        { "type": "text", "text": "Document: Photosynthesis\n\nPlants..." }
                    ],
                },
            })
        );
    }

    #[test]
    fn response_create_shape() {
        let event = ClientEvent::ResponseCreate {
            response: ResponseSpec::text_and_audio(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "type": "response.create",
                "response": {
                    "conversation": "auto",
                    "modalities": ["text", "audio"],
                },
            })
        );
    }

    #[test]
    fn response_done_parses() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type":"response.done","response":{"id":"resp_1"}}"#).unwrap();
        assert!(matches!(event, ServerEvent::ResponseDone));
    }

    #[test]
    fn response_error_parses_with_message() {
        let event: ServerEvent = serde_json::from_str(
            r#"{"type":"response.error","error":{"message":"model overloaded"}}"#,
        )
        .unwrap();
        match event {
            ServerEvent::ResponseError { error } => {
                assert_eq!(error.unwrap().message, "model overloaded");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn response_error_tolerates_missing_detail() {
        let event: ServerEvent = serde_json::from_str(r#"{"type":"response.error"}"#).unwrap();
        assert!(matches!(event, ServerEvent::ResponseError { error: None }));
    }

    #[test]
    fn unrecognized_types_map_to_unknown() {
        for payload in [
            r#"{"type":"session.created","session":{}}"#,
            r#"{"type":"output_audio_buffer.started"}"#,
        ] {
            let event: ServerEvent = serde_json::from_str(payload).unwrap();
            assert!(matches!(event, ServerEvent::Unknown), "payload: {payload}");
        }
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        assert!(serde_json::from_str::<ServerEvent>("not json").is_err());
        assert!(serde_json::from_str::<ServerEvent>(r#"{"no_type":true}"#).is_err());
    }
}
