//! Transport agnostic, bidirectional RPC between named services.
//!
//! Two endpoints connected by any duplex message channel expose [Service]s to
//! each other and call each other's methods through [RemoteService] proxies.
//! Requests carry a numeric id that correlates them with the response or
//! error the peer sends back. The wire encoding is pluggable through
//! [MessageSerializer]; [JsonSerializer] is the reference encoding.
//!
//! ```no_run
//! # async fn example() -> Result<(), service_proxy::CallError> {
//! use service_proxy::{service_proxy, transport, Service, ServiceProxy};
//!
//! let (a, b) = transport::memory::pair((), ());
//! let x: ServiceProxy<String> = service_proxy(a);
//! let y: ServiceProxy<String> = service_proxy(b);
//!
//! let mut pong = Service::new();
//! pong.add_method("pong", |(message, value): (String, String), _context| async move {
//!     Ok::<_, String>(format!("pong {} {}", message, value))
//! });
//! x.register("PONG", pong);
//!
//! let reply: String = y.get_service("PONG").call("pong", ("a", "b")).await?;
//! assert_eq!(reply, "pong a b");
//! # Ok(())
//! # }
//! ```
mod error;
mod factory;
mod message;
mod proxy;
mod registry;
mod serializer;
mod service;
pub mod transport;

#[cfg(test)]
mod test_utils;

#[doc(inline)]
pub use error::{CallError, ErrorKind, ProxyError};

#[doc(inline)]
pub use factory::{RemoteMethod, RemoteService, RemoteServiceFactory, SendRequest};

#[doc(inline)]
pub use message::{
    has_id, is_error, is_request, is_response, ClassifyError, ErrorMessage, Message, MessageKind,
    RemoteError, RequestId, RequestMessage, ResponseMessage,
};

#[doc(inline)]
pub use proxy::{
    service_proxy, Builder, ErrorObserver, RemoteCall, ServiceId, ServiceProxy, TypedCall,
};

#[doc(inline)]
pub use registry::{PendingRequest, RequestDropped, RequestRegistry, UnknownRequestId};

#[doc(inline)]
pub use serializer::{DecodeError, EncodeError, JsonSerializer, MessageSerializer};

#[doc(inline)]
pub use service::{Service, ARGUMENT_ERROR_CODE};

#[doc(inline)]
pub use transport::Envelope;
