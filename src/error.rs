use crate::message::{Message, RemoteError, RequestMessage};
use crate::registry::RequestDropped;
use crate::serializer::{DecodeError, EncodeError};

/// Error returned when calling a method of a [RemoteService][crate::RemoteService].
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// The peer answered with an error message.
    #[error(transparent)]
    Remote(RemoteError),
    /// The request could not be encoded.
    #[error("Failed to encode request")]
    Encode(#[source] EncodeError),
    /// The transport does not accept messages anymore.
    #[error("Failed to send request")]
    Send,
    /// The result could not be decoded into the expected type.
    #[error("Failed to decode result")]
    Decode(#[source] serde_json::Error),
    #[error(transparent)]
    Dropped(#[from] RequestDropped),
}

impl CallError {
    /// The error payload sent by the peer, if any.
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            CallError::Remote(error) => Some(error),
            _ => None,
        }
    }
}

/// Category of a [ProxyError]. Displays as the protocol constant.
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidMessageFormat,
    ServiceIsNotImplemented,
    ActionNotFound,
    InvalidRequestId,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidMessageFormat => "INVALID_MESSAGE_FORMAT",
            ErrorKind::ServiceIsNotImplemented => "SERVICE_IS_NOT_IMPLEMENTED",
            ErrorKind::ActionNotFound => "ACTION_NOT_FOUND",
            ErrorKind::InvalidRequestId => "INVALID_REQUEST_ID",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol level anomaly observed while processing an inbound message.
///
/// These are handed to the error observer of the proxy and never interrupt
/// message processing.
#[derive(Debug)]
pub enum ProxyError<T, S, K> {
    /// The inbound unit is not a valid message. No reply is sent.
    InvalidMessageFormat {
        message: T,
        context: K,
        error: DecodeError,
    },
    /// A request named a service that is not registered. The caller receives
    /// an error message.
    ServiceIsNotImplemented {
        request: RequestMessage<S>,
        context: K,
    },
    /// A request named a method the service does not have. The caller
    /// receives an error message.
    ActionNotFound {
        request: RequestMessage<S>,
        context: K,
    },
    /// A response or error message does not belong to a pending request.
    InvalidRequestId { message: Message<S> },
}

impl<T, S, K> ProxyError<T, S, K> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::InvalidMessageFormat { .. } => ErrorKind::InvalidMessageFormat,
            ProxyError::ServiceIsNotImplemented { .. } => ErrorKind::ServiceIsNotImplemented,
            ProxyError::ActionNotFound { .. } => ErrorKind::ActionNotFound,
            ProxyError::InvalidRequestId { .. } => ErrorKind::InvalidRequestId,
        }
    }
}

impl<T, S: std::fmt::Debug, K> std::fmt::Display for ProxyError<T, S, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProxyError::InvalidMessageFormat { error, .. } => {
                write!(f, "{}: {}", self.kind(), error)
            }
            ProxyError::ServiceIsNotImplemented { request, .. } => {
                write!(f, "{}: {:?}", self.kind(), request.service)
            }
            ProxyError::ActionNotFound { request, .. } => write!(
                f,
                "{}: {:?} has no method {:?}",
                self.kind(),
                request.service,
                request.method
            ),
            ProxyError::InvalidRequestId { message } => write!(
                f,
                "{}: no pending request with id {}",
                self.kind(),
                message.id()
            ),
        }
    }
}

impl<T, S, K> std::error::Error for ProxyError<T, S, K>
where
    T: std::fmt::Debug,
    S: std::fmt::Debug,
    K: std::fmt::Debug,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProxyError::InvalidMessageFormat { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_utils::*;

    #[test_strategy::proptest]
    fn remote_error_for_kind_carries_constant(kind: ErrorKind) {
        let error = RemoteError::new(kind);
        prop_assert_eq!(error.message.as_str(), kind.as_str());
        prop_assert_eq!(error.code, None);
    }

    #[test]
    fn kind_display() {
        assert_eq!(
            ErrorKind::ServiceIsNotImplemented.to_string(),
            "SERVICE_IS_NOT_IMPLEMENTED"
        );
        assert_eq!(ErrorKind::ActionNotFound.to_string(), "ACTION_NOT_FOUND");
    }

    #[test]
    fn remote_call_error_displays_remote_message() {
        let error = CallError::Remote(RemoteError::new("ACTION_NOT_FOUND"));
        assert_eq!(error.to_string(), "ACTION_NOT_FOUND");
        assert_eq!(error.remote(), Some(&RemoteError::new("ACTION_NOT_FOUND")));
        assert_eq!(CallError::Send.remote(), None);
    }

    #[test]
    fn proxy_error_display() {
        let error: ProxyError<String, String, ()> = ProxyError::ActionNotFound {
            request: RequestMessage {
                id: 1,
                method: "ping2".to_string(),
                params: vec![],
                service: "PING".to_string(),
            },
            context: (),
        };
        assert_eq!(error.kind(), ErrorKind::ActionNotFound);
        assert_eq!(
            error.to_string(),
            "ACTION_NOT_FOUND: \"PING\" has no method \"ping2\""
        );
    }
}
