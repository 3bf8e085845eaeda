//! Callable stand-ins for services on the remote peer.
//!
//! A [RemoteService] has no knowledge of the remote interface. Any method name
//! can be invoked and unknown methods are only reported by the peer.
use chashmap::CHashMap;
use serde_json::Value;
use std::hash::Hash;
use std::sync::Arc;

/// Function that transmits a request for `method` on a service and returns
/// the pending outcome.
pub type SendRequest<S, R> = Arc<dyn Fn(&S, &str, Vec<Value>) -> R + Send + Sync>;

/// Creates and caches one [RemoteService] per service id.
pub struct RemoteServiceFactory<S, R> {
    proxies: CHashMap<S, Arc<RemoteService<S, R>>>,
}

impl<S, R> Default for RemoteServiceFactory<S, R> {
    fn default() -> Self {
        Self {
            proxies: CHashMap::new(),
        }
    }
}

impl<S, R> std::fmt::Debug for RemoteServiceFactory<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServiceFactory")
            .field("proxies", &self.proxies.len())
            .finish()
    }
}

impl<S, R> RemoteServiceFactory<S, R>
where
    S: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the proxy for `service_id`, creating it with `send` on first use.
    ///
    /// Repeated calls for the same id return the same [Arc]. `send` is ignored
    /// if the proxy already exists.
    pub fn get_service(&self, service_id: S, send: SendRequest<S, R>) -> Arc<RemoteService<S, R>> {
        if let Some(proxy) = self.proxies.get(&service_id) {
            return Arc::clone(&proxy);
        }
        let proxy = Arc::new(RemoteService {
            service_id: service_id.clone(),
            send,
        });
        let mut cached = Arc::clone(&proxy);
        // Another thread may have inserted a proxy since the lookup above.
        self.proxies.upsert(
            service_id,
            || proxy,
            |existing| cached = Arc::clone(existing),
        );
        cached
    }
}

/// Proxy for a service on the remote peer.
pub struct RemoteService<S, R> {
    service_id: S,
    send: SendRequest<S, R>,
}

impl<S: std::fmt::Debug, R> std::fmt::Debug for RemoteService<S, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteService")
            .field("service_id", &self.service_id)
            .finish()
    }
}

impl<S, R> RemoteService<S, R> {
    pub fn service_id(&self) -> &S {
        &self.service_id
    }

    /// Call `method` with positional `params`.
    pub fn invoke(&self, method: &str, params: Vec<Value>) -> R {
        (self.send)(&self.service_id, method, params)
    }

    /// Handle for calling `method`. The method does not need to be known in advance.
    pub fn method<'a>(&'a self, method: &'a str) -> RemoteMethod<'a, S, R> {
        RemoteMethod {
            service: self,
            method,
        }
    }
}

/// A method of a [RemoteService], obtained through [RemoteService::method].
pub struct RemoteMethod<'a, S, R> {
    service: &'a RemoteService<S, R>,
    method: &'a str,
}

impl<'a, S, R> RemoteMethod<'a, S, R> {
    pub fn name(&self) -> &str {
        self.method
    }

    pub fn call(&self, params: Vec<Value>) -> R {
        self.service.invoke(self.method, params)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    type Sent = (String, String, Vec<Value>);

    fn recording_send() -> SendRequest<String, Sent> {
        Arc::new(|service: &String, method: &str, params: Vec<Value>| {
            (service.clone(), method.to_string(), params)
        })
    }

    #[test]
    fn any_method_name_is_callable() {
        let factory = RemoteServiceFactory::new();
        let pong = factory.get_service("PONG".to_string(), recording_send());
        assert_eq!(
            pong.invoke("never_declared", vec![json!(1)]),
            ("PONG".to_string(), "never_declared".to_string(), vec![json!(1)])
        );
        let method = pong.method("pong");
        assert_eq!(method.name(), "pong");
        assert_eq!(
            method.call(vec![json!("a"), json!("b")]),
            (
                "PONG".to_string(),
                "pong".to_string(),
                vec![json!("a"), json!("b")]
            )
        );
    }

    #[test]
    fn proxies_are_cached_per_service() {
        let factory = RemoteServiceFactory::new();
        let first = factory.get_service("PONG".to_string(), recording_send());
        let second = factory.get_service("PONG".to_string(), recording_send());
        let other = factory.get_service("PING".to_string(), recording_send());
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.service_id(), "PING");
    }

    #[test]
    fn first_send_function_wins() {
        let factory = RemoteServiceFactory::<u8, &'static str>::new();
        let _ = factory.get_service(1, Arc::new(|_: &u8, _: &str, _: Vec<Value>| "first"));
        let proxy = factory.get_service(1, Arc::new(|_: &u8, _: &str, _: Vec<Value>| "second"));
        assert_eq!(proxy.invoke("m", vec![]), "first");
    }
}
