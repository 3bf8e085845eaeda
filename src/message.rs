//! Transport neutral message records and shape based classification.
use serde::de::DeserializeOwned;
use serde::Deserialize as _;
use serde_json::{Map, Value};

/// Correlation id linking a request to its response or error.
pub type RequestId = i64;

/// Call of `method` on the remote `service`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RequestMessage<S> {
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Vec<Value>,
    pub service: S,
}

/// Successful outcome of the request with the same `id`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResponseMessage {
    pub id: RequestId,
    pub result: Value,
}

/// Failed outcome of the request with the same `id`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ErrorMessage {
    pub id: RequestId,
    pub error: RemoteError,
}

/// Error payload that is sent between peers.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct RemoteError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl RemoteError {
    pub fn new(message: impl ToString) -> Self {
        Self {
            code: None,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<String> for RemoteError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for RemoteError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<anyhow::Error> for RemoteError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error)
    }
}

/// Any of the three message kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Message<S> {
    Request(RequestMessage<S>),
    Response(ResponseMessage),
    Error(ErrorMessage),
}

/// Discriminant of [Message].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Error,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Request => f.write_str("request"),
            MessageKind::Response => f.write_str("response"),
            MessageKind::Error => f.write_str("error"),
        }
    }
}

/// Returned by [Message::classify] when a value cannot be turned into a [Message].
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Message has no recognizable shape")]
    Unrecognized { message: Value },
    #[error("Invalid fields in {kind} message")]
    InvalidFields {
        kind: MessageKind,
        message: Value,
        #[source]
        error: serde_json::Error,
    },
}

impl<S> Message<S> {
    pub fn id(&self) -> RequestId {
        match self {
            Message::Request(request) => request.id,
            Message::Response(response) => response.id,
            Message::Error(error) => error.id,
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Request(_) => MessageKind::Request,
            Message::Response(_) => MessageKind::Response,
            Message::Error(_) => MessageKind::Error,
        }
    }
}

impl<S: DeserializeOwned> Message<S> {
    /// Determine the message kind from the fields present in `value` and decode it.
    ///
    /// Shapes are tested in the order request, response, error. A value with
    /// both `result` and `error` is therefore a response.
    pub fn classify(mut value: Value) -> Result<Self, ClassifyError> {
        // Integral floats pass `has_id` but do not decode into `RequestId`.
        if let Value::Object(object) = &mut value {
            if let Some(id) = object.get("id").and_then(integer_id) {
                object.insert("id".to_string(), Value::from(id));
            }
        }
        let kind = match &value {
            Value::Object(object) if is_request(object) => MessageKind::Request,
            Value::Object(object) if is_response(object) => MessageKind::Response,
            Value::Object(object) if is_error(object) => MessageKind::Error,
            _ => return Err(ClassifyError::Unrecognized { message: value }),
        };
        let decoded = match kind {
            MessageKind::Request => RequestMessage::deserialize(&value).map(Message::Request),
            MessageKind::Response => ResponseMessage::deserialize(&value).map(Message::Response),
            MessageKind::Error => ErrorMessage::deserialize(&value).map(Message::Error),
        };
        decoded.map_err(|error| ClassifyError::InvalidFields {
            kind,
            message: value,
            error,
        })
    }
}

/// True if `object` has an integral `id`.
pub fn has_id(object: &Map<String, Value>) -> bool {
    object.get("id").and_then(integer_id).is_some()
}

pub fn is_request(object: &Map<String, Value>) -> bool {
    has_id(object) && object.contains_key("service") && object.contains_key("method")
}

pub fn is_response(object: &Map<String, Value>) -> bool {
    has_id(object) && object.contains_key("result")
}

pub fn is_error(object: &Map<String, Value>) -> bool {
    has_id(object) && object.contains_key("error")
}

fn integer_id(value: &Value) -> Option<RequestId> {
    match value {
        Value::Number(number) => number.as_i64().or_else(|| {
            let float = number.as_f64()?;
            let in_range = float >= RequestId::MIN as f64 && float < RequestId::MAX as f64;
            if float.fract() == 0.0 && in_range {
                Some(float as RequestId)
            } else {
                None
            }
        }),
        _ => None,
    }
}
