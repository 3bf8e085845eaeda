use futures::future::BoxFuture;
use futures::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::message::RemoteError;

/// Error code sent to the caller when the request parameters do not match the
/// method signature.
pub const ARGUMENT_ERROR_CODE: i64 = -32602;

/// Local implementation of a service that peers can call.
///
/// Each method receives the positional request parameters and the transport
/// context of the request. The context never crosses the wire.
///
/// ```
/// # use service_proxy::Service;
/// let mut pong = Service::<()>::new();
/// pong.add_method("pong", |(message, value): (String, String), _context| async move {
///     Ok::<_, String>(format!("pong {} {}", message, value))
/// });
/// assert!(pong.has_method("pong"));
/// ```
pub struct Service<K> {
    handlers: HashMap<String, Handler<K>>,
}

pub(crate) type Handler<K> =
    Arc<dyn Fn(Vec<Value>, K) -> BoxFuture<'static, Result<Value, RemoteError>> + Send + Sync>;

impl<K> Default for Service<K> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<K> Service<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method with typed parameters and result.
    ///
    /// The request parameters are decoded from a JSON array into `Args`, which
    /// is usually a tuple. Use `()` for methods without parameters. If the
    /// parameters do not decode the caller receives an error with
    /// [ARGUMENT_ERROR_CODE].
    pub fn add_method<Args, R, E, Fut>(
        &mut self,
        method: impl ToString,
        f: impl Fn(Args, K) -> Fut + Send + Sync + 'static,
    ) -> &mut Self
    where
        Args: serde::de::DeserializeOwned + 'static,
        R: serde::Serialize + 'static,
        E: Into<RemoteError> + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let method = method.to_string();
        let name = method.clone();
        self.handlers.insert(
            method,
            Arc::new(move |params, context| match decode_params::<Args>(params) {
                Ok(args) => f(args, context)
                    .map(|result| match result {
                        Ok(value) => serde_json::to_value(&value).map_err(encode_result_error),
                        Err(error) => Err(error.into()),
                    })
                    .boxed(),
                Err(error) => {
                    tracing::debug!(method = ?name, ?error, "failed to deserialize arguments");
                    future::ready(Err(argument_error(error))).boxed()
                }
            }),
        );
        self
    }

    /// Add a method that works on the raw request parameters.
    pub fn add_raw<Fut>(
        &mut self,
        method: impl ToString,
        f: impl Fn(Vec<Value>, K) -> Fut + Send + Sync + 'static,
    ) -> &mut Self
    where
        Fut: Future<Output = Result<Value, RemoteError>> + Send + 'static,
    {
        self.handlers.insert(
            method.to_string(),
            Arc::new(move |params, context| f(params, context).boxed()),
        );
        self
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub(crate) fn handler(&self, method: &str) -> Option<Handler<K>> {
        self.handlers.get(method).map(Arc::clone)
    }
}

impl<K> std::fmt::Debug for Service<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("methods", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn decode_params<Args: serde::de::DeserializeOwned>(
    params: Vec<Value>,
) -> Result<Args, serde_json::Error> {
    if params.is_empty() {
        if let Ok(args) = serde_json::from_value(Value::Null) {
            return Ok(args);
        }
    }
    serde_json::from_value(Value::Array(params))
}

fn argument_error(error: serde_json::Error) -> RemoteError {
    RemoteError::new(format!("Failed to deserialize arguments: {}", error))
        .with_code(ARGUMENT_ERROR_CODE)
}

fn encode_result_error(error: serde_json::Error) -> RemoteError {
    RemoteError::new(format!("Failed to serialize result: {}", error))
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    async fn call(
        service: &Service<u8>,
        method: &str,
        params: Vec<Value>,
    ) -> Result<Value, RemoteError> {
        let handler = service.handler(method).unwrap();
        handler(params, 7).await
    }

    #[async_std::test]
    async fn typed_method() {
        let mut service = Service::new();
        service.add_method("add", |(a, b): (i64, i64), _context| async move {
            Ok::<_, String>(a + b)
        });
        let result = call(&service, "add", vec![json!(1), json!(2)]).await;
        assert_eq!(result, Ok(json!(3)));
    }

    #[async_std::test]
    async fn context_is_passed() {
        let mut service = Service::new();
        service.add_method("context", |(): (), context: u8| async move {
            Ok::<_, String>(context)
        });
        assert_eq!(call(&service, "context", vec![]).await, Ok(json!(7)));
    }

    #[async_std::test]
    async fn application_error() {
        let mut service = Service::new();
        service.add_method("fail", |(): (), _context| async move {
            Err::<(), _>(anyhow::anyhow!("it broke"))
        });
        assert_eq!(
            call(&service, "fail", vec![]).await,
            Err(RemoteError::new("it broke"))
        );
    }

    #[async_std::test]
    async fn argument_mismatch() {
        let mut service = Service::new();
        service.add_method("one", |(value,): (String,), _context| async move {
            Ok::<_, String>(value)
        });
        let error = call(&service, "one", vec![json!(1)]).await.unwrap_err();
        assert_eq!(error.code, Some(ARGUMENT_ERROR_CODE));
        assert!(error.message.starts_with("Failed to deserialize arguments"));

        let error = call(&service, "one", vec![json!("a"), json!("b")])
            .await
            .unwrap_err();
        assert_eq!(error.code, Some(ARGUMENT_ERROR_CODE));
    }

    #[async_std::test]
    async fn raw_method() {
        let mut service = Service::new();
        service.add_raw("count", |params, _context| async move {
            Ok(json!(params.len()))
        });
        assert_eq!(
            call(&service, "count", vec![json!(null), json!([])]).await,
            Ok(json!(2))
        );
    }

    #[test]
    fn method_lookup() {
        let mut service = Service::<u8>::new();
        service
            .add_raw("a", |_, _| future::ready(Ok(Value::Null)))
            .add_raw("b", |_, _| future::ready(Ok(Value::Null)));
        assert!(service.has_method("a"));
        assert!(!service.has_method("c"));
        let mut names = service.method_names().collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }
}
