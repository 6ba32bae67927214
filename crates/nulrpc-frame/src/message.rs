use bytes::{Bytes, BytesMut};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::codec::encode_frame;
use crate::error::Result;

/// Outcome reported by the server. `Error` is an application-level status,
/// not a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Okay,
    Error,
}

/// Whether a message answers a request or was pushed by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Response,
    Event,
}

/// A structured inbound message.
///
/// ```text
/// {"status":"okay","id":"abc","_type":"response","value":"pong"}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedMessage {
    pub status: Status,
    pub id: String,
    #[serde(rename = "_type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl DecodedMessage {
    /// Successful response carrying `value`.
    pub fn response(id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            status: Status::Okay,
            id: id.into(),
            kind: MessageKind::Response,
            error: None,
            value: Some(value),
        }
    }

    /// Response reporting an application error.
    pub fn error_response(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            id: id.into(),
            kind: MessageKind::Response,
            error: Some(error.into()),
            value: None,
        }
    }

    /// Server-pushed event.
    pub fn event(id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            status: Status::Okay,
            id: id.into(),
            kind: MessageKind::Event,
            error: None,
            value: Some(value),
        }
    }

    /// Parse and validate a frame payload.
    pub fn from_slice(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn is_event(&self) -> bool {
        self.kind == MessageKind::Event
    }

    pub fn is_okay(&self) -> bool {
        self.status == Status::Okay
    }

    /// JSON payload terminated by the sentinel.
    pub fn to_frame(&self) -> Result<Bytes> {
        encode_json_frame(self)
    }
}

/// Generate a process-unique request id.
pub fn generate_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// An outbound call of a named server operation.
///
/// `args` always holds JSON text; see [`Request::with_args`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    #[serde(default = "generate_id")]
    pub id: String,
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
}

impl Request {
    /// Request for `endpoint` with a freshly generated id.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            endpoint: endpoint.into(),
            args: None,
        }
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach arguments.
    ///
    /// JSON text is sent as-is; any other string is JSON-encoded first, so
    /// `hello` goes out as `"hello"`.
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        let args = args.into();
        self.args = Some(if serde_json::from_str::<IgnoredAny>(&args).is_ok() {
            args
        } else {
            serde_json::Value::String(args).to_string()
        });
        self
    }

    /// Attach arguments serialized from `args`.
    pub fn with_json_args<T: Serialize>(mut self, args: &T) -> Result<Self> {
        self.args = Some(serde_json::to_string(args)?);
        Ok(self)
    }

    /// Parsed arguments, if present and valid.
    pub fn args_value(&self) -> Option<serde_json::Value> {
        self.args
            .as_deref()
            .and_then(|args| serde_json::from_str(args).ok())
    }

    /// JSON payload terminated by the sentinel.
    pub fn encode(&self) -> Result<Bytes> {
        encode_json_frame(self)
    }
}

fn encode_json_frame<T: Serialize>(value: &T) -> Result<Bytes> {
    // serde_json escapes NUL as \u0000, so the payload never holds the sentinel.
    let payload = serde_json::to_vec(value)?;
    let mut buf = BytesMut::with_capacity(payload.len() + 2);
    encode_frame(&payload, &mut buf)?;
    Ok(buf.freeze())
}
