use chashmap::CHashMap;
use futures::channel::mpsc;
use futures::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::hash::Hash;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing_futures::Instrument as _;

use crate::error::{CallError, ErrorKind, ProxyError};
use crate::factory::{RemoteService, RemoteServiceFactory, SendRequest};
use crate::message::{
    ErrorMessage, Message, RemoteError, RequestId, RequestMessage, ResponseMessage,
};
use crate::registry::{PendingRequest, RequestRegistry};
use crate::serializer::{EncodeError, JsonSerializer, MessageSerializer};
use crate::service::Service;
use crate::transport::Envelope;

/// Outcome of a call issued through a [RemoteService].
pub type RemoteCall = PendingRequest<Value, CallError>;

/// Callback that observes every [ProxyError].
pub type ErrorObserver<T, S, K> = Arc<dyn Fn(ProxyError<T, S, K>) + Send + Sync>;

/// Requirements for service identifiers.
pub trait ServiceId:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<S> ServiceId for S where
    S: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Exposes local [Service]s to a peer and calls the services of that peer.
///
/// `S` identifies services, `K` is the context the transport attaches to
/// inbound messages and `T` is the transport unit.
///
/// Inbound messages are processed one at a time in the order the transport
/// delivers them. Calls to local services run concurrently on their own
/// tasks.
pub struct ServiceProxy<S, K = (), T = String> {
    shared: Arc<Shared<S, K, T>>,
    factory: RemoteServiceFactory<S, RemoteCall>,
    send_request: SendRequest<S, RemoteCall>,
    dispatcher_task: async_std::task::JoinHandle<()>,
    sender_task: async_std::task::JoinHandle<anyhow::Result<()>>,
}

impl<S: Debug, K, T> Debug for ServiceProxy<S, K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProxy")
            .field("pending_requests", &self.shared.registry.len())
            .field("factory", &self.factory)
            .field("dispatcher_task", &self.dispatcher_task)
            .field("sender_task", &self.sender_task)
            .finish()
    }
}

/// Create a proxy that speaks the JSON encoding over `transport`.
///
/// Protocol errors are not observed. Use [ServiceProxy::builder] to install an
/// observer or a different serializer.
pub fn service_proxy<S, K, Transport>(transport: Transport) -> ServiceProxy<S, K, String>
where
    S: ServiceId,
    K: Clone + Debug + Send + 'static,
    Transport: Stream<Item = Envelope<String, K>>
        + Sink<Envelope<String, Option<K>>>
        + Send
        + 'static,
    <Transport as Sink<Envelope<String, Option<K>>>>::Error:
        std::error::Error + Send + Sync + 'static,
{
    ServiceProxy::builder(JsonSerializer).connect(transport)
}

/// Configures and connects a [ServiceProxy].
pub struct Builder<S, K, T> {
    serializer: Box<dyn MessageSerializer<T, S>>,
    on_error: ErrorObserver<T, S, K>,
}

impl<S, K, T> Builder<S, K, T>
where
    S: ServiceId,
    K: Clone + Debug + Send + 'static,
    T: Debug + Send + 'static,
{
    pub fn new(serializer: impl MessageSerializer<T, S> + 'static) -> Self {
        Self {
            serializer: Box::new(serializer),
            on_error: Arc::new(|_: ProxyError<T, S, K>| {}),
        }
    }

    /// Install the observer for protocol errors. It replaces any previous one.
    pub fn on_error(
        mut self,
        observer: impl Fn(ProxyError<T, S, K>) + Send + Sync + 'static,
    ) -> Self {
        self.on_error = Arc::new(observer);
        self
    }

    /// Start a proxy on a transport that is both the inbound stream and the
    /// outbound sink.
    pub fn connect<Transport>(self, transport: Transport) -> ServiceProxy<S, K, T>
    where
        Transport: Stream<Item = Envelope<T, K>> + Sink<Envelope<T, Option<K>>> + Send + 'static,
        <Transport as Sink<Envelope<T, Option<K>>>>::Error:
            std::error::Error + Send + Sync + 'static,
    {
        let (sink, stream) = transport.split();
        self.connect_parts(sink, stream)
    }

    /// Start a proxy that sends to `sink` and receives from `stream`.
    pub fn connect_parts<Sink_, Stream_>(
        self,
        sink: Sink_,
        stream: Stream_,
    ) -> ServiceProxy<S, K, T>
    where
        Sink_: Sink<Envelope<T, Option<K>>> + Send + 'static,
        Sink_::Error: std::error::Error + Send + Sync + 'static,
        Stream_: Stream<Item = Envelope<T, K>> + Send + Unpin + 'static,
    {
        let (outbound_sender, outbound_receiver) = mpsc::unbounded();
        let shared = Arc::new(Shared {
            registry: RequestRegistry::new(),
            services: CHashMap::new(),
            outbound: Outbound {
                serializer: Arc::from(self.serializer),
                sender: outbound_sender,
            },
            on_error: self.on_error,
        });

        let dispatcher_task = async_std::task::spawn({
            let shared = Arc::clone(&shared);
            async move { shared.dispatch(stream).await }
        });
        let sender_task = async_std::task::spawn(async move {
            let result = outbound_receiver.map(Ok).forward(sink).await;
            result.map_err(anyhow::Error::from)
        });

        let send_request: SendRequest<S, RemoteCall> = {
            let shared = Arc::clone(&shared);
            Arc::new(move |service: &S, method: &str, params: Vec<Value>| {
                shared.send_request(service, method, params)
            })
        };

        ServiceProxy {
            shared,
            factory: RemoteServiceFactory::new(),
            send_request,
            dispatcher_task,
            sender_task,
        }
    }
}

impl<S, K, T> ServiceProxy<S, K, T>
where
    S: ServiceId,
    K: Clone + Debug + Send + 'static,
    T: Debug + Send + 'static,
{
    pub fn builder(serializer: impl MessageSerializer<T, S> + 'static) -> Builder<S, K, T> {
        Builder::new(serializer)
    }

    /// Proxy for the service `service_id` of the peer.
    ///
    /// Returns the same [Arc] for repeated calls with the same id.
    pub fn get_service(&self, service_id: impl Into<S>) -> Arc<RemoteService<S, RemoteCall>> {
        self.factory
            .get_service(service_id.into(), Arc::clone(&self.send_request))
    }

    /// Expose `service` to the peer under `service_id`, replacing any service
    /// registered with the same id.
    pub fn register(&self, service_id: impl Into<S>, service: Service<K>) -> &Self {
        let service_id = service_id.into();
        tracing::debug!(?service_id, ?service, "register service");
        self.shared.services.insert(service_id, Arc::new(service));
        self
    }

    /// Number of outbound calls that have not been answered yet.
    pub fn pending_requests(&self) -> usize {
        self.shared.registry.len()
    }

    /// Stop sending messages. Queued messages are still flushed and then the
    /// outbound side of the transport is closed.
    ///
    /// Calls issued afterwards fail with [CallError::Send].
    pub fn close(&self) {
        self.shared.outbound.sender.close_channel();
    }

    /// Wait until the transport stops delivering messages, then flush and
    /// close the outbound side.
    ///
    /// Calls that are still pending when the inbound stream ends fail with
    /// [CallError::Dropped].
    pub async fn join(self) -> anyhow::Result<()> {
        let ServiceProxy {
            shared,
            dispatcher_task,
            sender_task,
            ..
        } = self;
        dispatcher_task.await;
        shared.outbound.sender.close_channel();
        sender_task.await
    }
}

impl<S> RemoteService<S, RemoteCall> {
    /// Call `method` with typed arguments and decode the result.
    ///
    /// `args` is encoded as the positional parameters: a tuple or sequence
    /// becomes the parameter list, `()` sends no parameters and any other value
    /// is sent as the only parameter. The request is sent immediately.
    pub fn call<A, R>(&self, method: &str, args: A) -> TypedCall<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let call = match encode_params(&args) {
            Ok(params) => future::Either::Left(self.invoke(method, params)),
            Err(error) => future::Either::Right(future::ready(Err(CallError::Encode(
                EncodeError::new(error),
            )))),
        };
        TypedCall {
            call,
            result: PhantomData,
        }
    }
}

/// Future returned by [RemoteService::call].
#[must_use = "futures do nothing unless polled"]
pub struct TypedCall<R> {
    call: future::Either<RemoteCall, future::Ready<Result<Value, CallError>>>,
    result: PhantomData<fn() -> R>,
}

impl<R> Debug for TypedCall<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedCall").finish()
    }
}

impl<R: DeserializeOwned> Future for TypedCall<R> {
    type Output = Result<R, CallError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match futures::ready!(self.call.poll_unpin(cx)) {
            Ok(value) => Poll::Ready(serde_json::from_value(value).map_err(CallError::Decode)),
            Err(error) => Poll::Ready(Err(error)),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("Method panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("Method panicked: {}", message)
    } else {
        "Method panicked".to_string()
    }
}

fn encode_params(args: &impl Serialize) -> Result<Vec<Value>, serde_json::Error> {
    Ok(match serde_json::to_value(args)? {
        Value::Array(params) => params,
        Value::Null => Vec::new(),
        value => vec![value],
    })
}

struct Shared<S, K, T> {
    registry: RequestRegistry<Value, CallError>,
    services: CHashMap<S, Arc<Service<K>>>,
    outbound: Outbound<S, K, T>,
    on_error: ErrorObserver<T, S, K>,
}

impl<S, K, T> Shared<S, K, T>
where
    S: ServiceId,
    K: Clone + Debug + Send + 'static,
    T: Debug + Send + 'static,
{
    async fn dispatch(&self, inbound: impl Stream<Item = Envelope<T, K>> + Unpin) {
        let mut inbound = inbound;
        while let Some(Envelope { message, context }) = inbound.next().await {
            tracing::trace!(?message, ?context, "received message");
            self.process_message(message, context);
        }
        tracing::debug!("end of inbound message stream");
        self.registry.clear();
    }

    fn process_message(&self, message: T, context: K) {
        match self.outbound.serializer.deserialize_message(&message) {
            Ok(Message::Request(request)) => self.process_request(request, context),
            Ok(Message::Response(response)) => self.process_response(response),
            Ok(Message::Error(error)) => self.process_error(error),
            Err(error) => {
                tracing::debug!(?error, "invalid message");
                self.report(ProxyError::InvalidMessageFormat {
                    message,
                    context,
                    error,
                });
            }
        }
    }

    fn process_request(&self, request: RequestMessage<S>, context: K) {
        let id = request.id;
        let service = self
            .services
            .get(&request.service)
            .map(|service| Arc::clone(&service));
        let service = match service {
            Some(service) => service,
            None => {
                tracing::debug!(id, service = ?request.service, "service is not implemented");
                let reply_context = context.clone();
                self.report(ProxyError::ServiceIsNotImplemented { request, context });
                self.outbound.send_error(
                    id,
                    RemoteError::new(ErrorKind::ServiceIsNotImplemented),
                    reply_context,
                );
                return;
            }
        };
        let handler = match service.handler(&request.method) {
            Some(handler) => handler,
            None => {
                tracing::debug!(
                    id,
                    service = ?request.service,
                    method = ?request.method,
                    "action not found"
                );
                let reply_context = context.clone();
                self.report(ProxyError::ActionNotFound { request, context });
                self.outbound.send_error(
                    id,
                    RemoteError::new(ErrorKind::ActionNotFound),
                    reply_context,
                );
                return;
            }
        };

        let RequestMessage {
            method,
            params,
            service: service_id,
            ..
        } = request;
        let span = tracing::debug_span!("request", id, service = ?service_id, method = %method);
        let outbound = self.outbound.clone();
        let reply_context = context.clone();
        let response = async move { handler(params, context).await };
        async_std::task::spawn(
            async move {
                match AssertUnwindSafe(response).catch_unwind().await {
                    Ok(Ok(result)) => outbound.send_response(id, result, reply_context),
                    Ok(Err(error)) => {
                        tracing::debug!(%error, "method failed");
                        outbound.send_error(id, error, reply_context)
                    }
                    Err(panic) => {
                        let error = RemoteError::new(panic_message(panic.as_ref()));
                        tracing::error!(%error, "method panicked");
                        outbound.send_error(id, error, reply_context)
                    }
                }
            }
            .instrument(span),
        );
    }

    fn process_response(&self, response: ResponseMessage) {
        let ResponseMessage { id, result } = response;
        if let Err(unknown) = self.registry.resolve_request(id, result) {
            tracing::debug!(id, "response for unknown request");
            self.report(ProxyError::InvalidRequestId {
                message: Message::Response(ResponseMessage {
                    id,
                    result: unknown.payload,
                }),
            });
        }
    }

    fn process_error(&self, message: ErrorMessage) {
        let ErrorMessage { id, error } = message;
        if let Err(unknown) = self.registry.reject_request(id, CallError::Remote(error)) {
            tracing::debug!(id, "error for unknown request");
            let error = match unknown.payload {
                CallError::Remote(error) => error,
                other => RemoteError::new(other),
            };
            self.report(ProxyError::InvalidRequestId {
                message: Message::Error(ErrorMessage { id, error }),
            });
        }
    }

    fn send_request(&self, service: &S, method: &str, params: Vec<Value>) -> RemoteCall {
        let (id, pending) = self.registry.register_request();
        let request = RequestMessage {
            id,
            method: method.to_string(),
            params,
            service: service.clone(),
        };
        tracing::trace!(?request, "send request");
        let sent = self
            .outbound
            .serializer
            .serialize_request(&request)
            .map_err(CallError::Encode)
            .and_then(|message| {
                self.outbound
                    .sender
                    .unbounded_send(Envelope::new(message, None))
                    .map_err(|_| CallError::Send)
            });
        if let Err(error) = sent {
            tracing::debug!(id, %error, "failed to send request");
            let _ = self.registry.reject_request(id, error);
        }
        pending
    }

    fn report(&self, error: ProxyError<T, S, K>) {
        (self.on_error)(error)
    }
}

/// Encodes replies and hands them to the sender task.
struct Outbound<S, K, T> {
    serializer: Arc<dyn MessageSerializer<T, S>>,
    sender: mpsc::UnboundedSender<Envelope<T, Option<K>>>,
}

impl<S, K, T> Clone for Outbound<S, K, T> {
    fn clone(&self) -> Self {
        Self {
            serializer: Arc::clone(&self.serializer),
            sender: self.sender.clone(),
        }
    }
}

impl<S, K, T> Outbound<S, K, T> {
    fn send_response(&self, id: RequestId, result: Value, context: K) {
        let message = self
            .serializer
            .serialize_response(&ResponseMessage { id, result });
        self.send_reply(id, message, context)
    }

    fn send_error(&self, id: RequestId, error: RemoteError, context: K) {
        let message = self.serializer.serialize_error(&ErrorMessage { id, error });
        self.send_reply(id, message, context)
    }

    fn send_reply(&self, id: RequestId, message: Result<T, EncodeError>, context: K) {
        let result = match message {
            Ok(message) => self
                .sender
                .unbounded_send(Envelope::new(message, Some(context)))
                .map_err(|error| anyhow::Error::from(error.into_send_error())),
            Err(error) => Err(anyhow::Error::from(error)),
        };
        if let Err(error) = result {
            tracing::warn!(response_id = ?id, ?error, "Failed to send response");
        }
    }
}
