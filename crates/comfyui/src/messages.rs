//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. Decoding happens in two steps:
//! the envelope is read first, then the `data` object is decoded into
//! the payload struct for that kind. Kinds this client does not know
//! become [`ComfyUIMessage::Unknown`] instead of an error, so that a
//! newer server never breaks the listener loop.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Every message kind this client can decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Status,
    ExecutionStart,
    ExecutionCached,
    Executing,
    Progress,
    Executed,
    ExecutionError,
}

impl MessageKind {
    /// Map a wire `type` string to a kind.
    pub fn from_type(kind: &str) -> Option<Self> {
        match kind {
            "status" => Some(Self::Status),
            "execution_start" => Some(Self::ExecutionStart),
            "execution_cached" => Some(Self::ExecutionCached),
            "executing" => Some(Self::Executing),
            "progress" => Some(Self::Progress),
            "executed" => Some(Self::Executed),
            "execution_error" => Some(Self::ExecutionError),
            _ => None,
        }
    }

    /// The wire `type` string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::ExecutionStart => "execution_start",
            Self::ExecutionCached => "execution_cached",
            Self::Executing => "executing",
            Self::Progress => "progress",
            Self::Executed => "executed",
            Self::ExecutionError => "execution_error",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded push-channel message.
#[derive(Debug, Clone)]
pub enum ComfyUIMessage {
    /// Server status broadcast (queue depth, etc.).
    Status(StatusData),

    /// A prompt has started executing.
    ExecutionStart(ExecutionStartData),

    /// Some nodes were skipped because their outputs are cached.
    ExecutionCached(ExecutionCachedData),

    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// A node has finished and produced output.
    Executed(ExecutedData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// A well-formed message of a kind this client does not handle.
    Unknown(String),
}

impl ComfyUIMessage {
    /// The kind of this message, or `None` for [`Self::Unknown`].
    pub fn kind(&self) -> Option<MessageKind> {
        match self {
            Self::Status(_) => Some(MessageKind::Status),
            Self::ExecutionStart(_) => Some(MessageKind::ExecutionStart),
            Self::ExecutionCached(_) => Some(MessageKind::ExecutionCached),
            Self::Executing(_) => Some(MessageKind::Executing),
            Self::Progress(_) => Some(MessageKind::Progress),
            Self::Executed(_) => Some(MessageKind::Executed),
            Self::ExecutionError(_) => Some(MessageKind::ExecutionError),
            Self::Unknown(_) => None,
        }
    }

    /// The prompt (correlation) id carried by the message, if any.
    pub fn prompt_id(&self) -> Option<&str> {
        match self {
            Self::ExecutionStart(d) => Some(&d.prompt_id),
            Self::ExecutionCached(d) => Some(&d.prompt_id),
            Self::Executing(d) => Some(&d.prompt_id),
            Self::Progress(d) => d.prompt_id.as_deref(),
            Self::Executed(d) => Some(&d.prompt_id),
            Self::ExecutionError(d) => Some(&d.prompt_id),
            Self::Status(_) | Self::Unknown(_) => None,
        }
    }
}

/// Queue status information.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

/// Current queue state.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

/// Execution queue statistics.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

/// Payload for `execution_start` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

/// Payload for `execution_cached` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    /// Node IDs whose outputs were served from cache.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: i32,
    /// Total number of steps.
    pub max: i32,
    /// Older servers omit the prompt id on progress messages.
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

/// Payload for `executed` messages (node output).
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    /// The node that produced this output.
    #[serde(default)]
    pub node: Option<String>,
    /// Raw output value (images, filenames, etc.).
    pub output: serde_json::Value,
    pub prompt_id: String,
}

impl ExecutedData {
    /// The `output.images` list, when the node produced images.
    pub fn images(&self) -> Option<&[serde_json::Value]> {
        self.output
            .get("images")
            .and_then(serde_json::Value::as_array)
            .map(Vec::as_slice)
    }
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default = "unknown_exception_type")]
    pub exception_type: String,
}

fn unknown_exception_type() -> String {
    "Unknown Error".to_string()
}

impl ErrorData {
    /// `"<exception type>: <message>"`, the form stored on failed jobs.
    pub fn detail(&self) -> String {
        format!("{}: {}", self.exception_type, self.exception_message)
    }
}

/// A frame that could not be decoded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not JSON, or no string `type` field.
    #[error("Malformed message: {0}")]
    Envelope(#[from] serde_json::Error),

    /// A known kind whose `data` does not have the expected shape.
    #[error("Malformed `{kind}` payload: {source}")]
    Payload {
        kind: MessageKind,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Unknown `type` values decode to [`ComfyUIMessage::Unknown`]; only
/// malformed JSON or a malformed payload of a known kind is an error.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, ProtocolError> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let Some(kind) = MessageKind::from_type(&envelope.kind) else {
        return Ok(ComfyUIMessage::Unknown(envelope.kind));
    };

    let data = envelope.data;
    let message = match kind {
        MessageKind::Status => ComfyUIMessage::Status(decode(kind, data)?),
        MessageKind::ExecutionStart => ComfyUIMessage::ExecutionStart(decode(kind, data)?),
        MessageKind::ExecutionCached => ComfyUIMessage::ExecutionCached(decode(kind, data)?),
        MessageKind::Executing => ComfyUIMessage::Executing(decode(kind, data)?),
        MessageKind::Progress => ComfyUIMessage::Progress(decode(kind, data)?),
        MessageKind::Executed => ComfyUIMessage::Executed(decode(kind, data)?),
        MessageKind::ExecutionError => ComfyUIMessage::ExecutionError(decode(kind, data)?),
    };
    Ok(message)
}

fn decode<T: DeserializeOwned>(kind: MessageKind, data: serde_json::Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::Payload { kind, source })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_status_message() {
        let json = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}},"sid":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::Status(data) => {
                assert_eq!(data.status.exec_info.queue_remaining, 3);
            }
            other => panic!("Expected Status, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_start_message() {
        let json = r#"{"type":"execution_start","data":{"prompt_id":"abc-123"}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg.kind(), Some(MessageKind::ExecutionStart));
        assert_eq!(msg.prompt_id(), Some("abc-123"));
    }

    #[test]
    fn parse_execution_cached_without_nodes() {
        let json = r#"{"type":"execution_cached","data":{"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::ExecutionCached(data) => {
                assert!(data.nodes.is_empty());
            }
            other => panic!("Expected ExecutionCached, got {other:?}"),
        }
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::Executing(data) => {
                assert!(data.node.is_none());
                assert_eq!(data.prompt_id, "xyz");
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_with_prompt_id() {
        let json = r#"{"type":"progress","data":{"value":5,"max":20,"prompt_id":"p1","node":"3"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::Progress(data) => {
                assert_eq!(data.value, 5);
                assert_eq!(data.max, 20);
                assert_eq!(data.prompt_id.as_deref(), Some("p1"));
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_without_prompt_id() {
        let json = r#"{"type":"progress","data":{"value":1,"max":2}}"#;
        let msg = parse_message(json).unwrap();
        assert_eq!(msg.kind(), Some(MessageKind::Progress));
        assert!(msg.prompt_id().is_none());
    }

    #[test]
    fn parse_executed_with_images() {
        let json = r#"{"type":"executed","data":{"node":"9","output":{"images":[{"filename":"out.png","subfolder":"","type":"output"}]},"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::Executed(data) => {
                assert_eq!(data.node.as_deref(), Some("9"));
                let images = data.images().expect("images present");
                assert_eq!(images.len(), 1);
                assert_eq!(images[0]["filename"], "out.png");
            }
            other => panic!("Expected Executed, got {other:?}"),
        }
    }

    #[test]
    fn executed_without_images_has_none() {
        let json = r#"{"type":"executed","data":{"node":"4","output":{"text":["hi"]},"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::Executed(data) => assert!(data.images().is_none()),
            other => panic!("Expected Executed, got {other:?}"),
        }
    }

    #[test]
    fn parse_execution_error_message() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::ExecutionError(data) => {
                assert_eq!(data.node_id.as_deref(), Some("5"));
                assert_eq!(data.detail(), "RuntimeError: out of memory");
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn execution_error_defaults_missing_fields() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::ExecutionError(data) => {
                assert_eq!(data.detail(), "Unknown Error: ");
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let json = r#"{"type":"crystools.monitor","data":{"cpu":12}}"#;
        let msg = parse_message(json).unwrap();
        assert_matches!(msg, ComfyUIMessage::Unknown(kind) if kind == "crystools.monitor");
    }

    #[test]
    fn known_kind_with_bad_payload_is_payload_error() {
        let json = r#"{"type":"execution_start","data":{}}"#;
        assert_matches!(
            parse_message(json),
            Err(ProtocolError::Payload {
                kind: MessageKind::ExecutionStart,
                ..
            })
        );
    }

    #[test]
    fn invalid_json_is_envelope_error() {
        assert_matches!(parse_message("not json at all"), Err(ProtocolError::Envelope(_)));
    }

    #[test]
    fn missing_type_is_envelope_error() {
        assert_matches!(
            parse_message(r#"{"data":{"prompt_id":"x"}}"#),
            Err(ProtocolError::Envelope(_))
        );
    }

    #[test]
    fn kind_round_trips_through_wire_name() {
        for kind in [
            MessageKind::Status,
            MessageKind::ExecutionStart,
            MessageKind::ExecutionCached,
            MessageKind::Executing,
            MessageKind::Progress,
            MessageKind::Executed,
            MessageKind::ExecutionError,
        ] {
            assert_eq!(MessageKind::from_type(kind.as_str()), Some(kind));
        }
    }
}
