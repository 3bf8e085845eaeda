//! Pluggable conversion between [Message]s and transport units.
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::message::{ClassifyError, ErrorMessage, Message, RequestMessage, ResponseMessage};

/// Converts message records to transport units of type `T` and back.
///
/// Implementations only handle the encoding. Classification of decoded
/// values into message kinds is shared through [Message::classify].
pub trait MessageSerializer<T, S>: Send + Sync {
    fn serialize_request(&self, message: &RequestMessage<S>) -> Result<T, EncodeError>;
    fn serialize_response(&self, message: &ResponseMessage) -> Result<T, EncodeError>;
    fn serialize_error(&self, message: &ErrorMessage) -> Result<T, EncodeError>;
    fn deserialize_message(&self, message: &T) -> Result<Message<S>, DecodeError>;
}

/// Error returned from [MessageSerializer] when a message cannot be encoded.
#[derive(Debug, thiserror::Error)]
#[error("Failed to encode message")]
pub struct EncodeError {
    #[source]
    pub error: anyhow::Error,
}

impl EncodeError {
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// Error returned from [MessageSerializer::deserialize_message].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The transport unit could not be parsed at all.
    #[error("Failed to parse message")]
    Malformed {
        #[source]
        error: anyhow::Error,
    },
    /// The transport unit parsed, but it is not a request, response or error.
    #[error(transparent)]
    Unrecognized(#[from] ClassifyError),
}

/// Reference encoding: one JSON object per message.
///
/// Implemented for UTF-8 text (`String`) and for the same text as bytes
/// (`Vec<u8>`).
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<S> MessageSerializer<String, S> for JsonSerializer
where
    S: Serialize + DeserializeOwned,
{
    fn serialize_request(&self, message: &RequestMessage<S>) -> Result<String, EncodeError> {
        serde_json::to_string(message).map_err(EncodeError::new)
    }

    fn serialize_response(&self, message: &ResponseMessage) -> Result<String, EncodeError> {
        serde_json::to_string(message).map_err(EncodeError::new)
    }

    fn serialize_error(&self, message: &ErrorMessage) -> Result<String, EncodeError> {
        serde_json::to_string(message).map_err(EncodeError::new)
    }

    fn deserialize_message(&self, message: &String) -> Result<Message<S>, DecodeError> {
        decode_json(message.as_bytes())
    }
}

impl<S> MessageSerializer<Vec<u8>, S> for JsonSerializer
where
    S: Serialize + DeserializeOwned,
{
    fn serialize_request(&self, message: &RequestMessage<S>) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(message).map_err(EncodeError::new)
    }

    fn serialize_response(&self, message: &ResponseMessage) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(message).map_err(EncodeError::new)
    }

    fn serialize_error(&self, message: &ErrorMessage) -> Result<Vec<u8>, EncodeError> {
        serde_json::to_vec(message).map_err(EncodeError::new)
    }

    fn deserialize_message(&self, message: &Vec<u8>) -> Result<Message<S>, DecodeError> {
        decode_json(message)
    }
}

fn decode_json<S: DeserializeOwned>(data: &[u8]) -> Result<Message<S>, DecodeError> {
    let value = serde_json::from_slice::<serde_json::Value>(data).map_err(|error| {
        DecodeError::Malformed {
            error: error.into(),
        }
    })?;
    Ok(Message::classify(value)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::message::RemoteError;
    use crate::test_utils::*;

    const TEXT: &dyn MessageSerializer<String, String> = &JsonSerializer;
    const BYTES: &dyn MessageSerializer<Vec<u8>, String> = &JsonSerializer;

    fn round_trip(message: Message<String>) -> Message<String> {
        let encoded = match &message {
            Message::Request(request) => TEXT.serialize_request(request),
            Message::Response(response) => TEXT.serialize_response(response),
            Message::Error(error) => TEXT.serialize_error(error),
        }
        .unwrap();
        TEXT.deserialize_message(&encoded).unwrap()
    }

    #[test_strategy::proptest]
    fn request_round_trip(
        id: i64,
        method: String,
        service: String,
        #[strategy(proptest::collection::vec(arb_json(), 0..4))] params: Vec<serde_json::Value>,
    ) {
        let message = Message::Request(RequestMessage {
            id,
            method,
            params,
            service,
        });
        prop_assert_eq!(round_trip(message.clone()), message);
    }

    #[test_strategy::proptest]
    fn response_round_trip(id: i64, #[strategy(arb_json())] result: serde_json::Value) {
        let message = Message::Response(ResponseMessage { id, result });
        prop_assert_eq!(round_trip(message.clone()), message);
    }

    #[test_strategy::proptest]
    fn error_round_trip(
        id: i64,
        code: Option<i64>,
        message: String,
        #[strategy(proptest::option::of(arb_json_object()))] data: Option<
            serde_json::Map<String, serde_json::Value>,
        >,
    ) {
        let message = Message::Error(ErrorMessage {
            id,
            error: RemoteError {
                code,
                message,
                data,
            },
        });
        prop_assert_eq!(round_trip(message.clone()), message);
    }

    #[test]
    fn bytes_encoding_matches_text() {
        let request = RequestMessage {
            id: 0,
            method: "pong".to_string(),
            params: vec![serde_json::json!("a")],
            service: "PONG".to_string(),
        };
        let text = TEXT.serialize_request(&request).unwrap();
        let bytes = BYTES.serialize_request(&request).unwrap();
        assert_eq!(text.as_bytes(), bytes.as_slice());
        assert_eq!(
            text,
            r#"{"id":0,"method":"pong","params":["a"],"service":"PONG"}"#
        );
    }

    #[test]
    fn malformed_input() {
        let result = BYTES.deserialize_message(&b"{not json".to_vec());
        assert!(matches!(result, Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn unrecognized_input() {
        let result = TEXT.deserialize_message(&r#"{"id":1}"#.to_string());
        assert!(matches!(
            result,
            Err(DecodeError::Unrecognized(ClassifyError::Unrecognized { .. }))
        ));
    }
}
