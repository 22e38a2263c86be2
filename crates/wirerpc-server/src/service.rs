//! Service Dispatcher
//!
//! Services are registered explicitly: each method is an async closure taking
//! one deserializable argument and resolving to `Result<Reply, E>`. The typed
//! closure is erased into a [`MethodType`] so the server can decode
//! arguments, invoke, and encode replies without knowing the concrete types.
//!
//! # Example
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use wirerpc_server::Service;
//!
//! #[derive(Deserialize)]
//! struct Args {
//!     num1: i64,
//!     num2: i64,
//! }
//!
//! let service = Service::new("Foo")
//!     .method("Sum", |args: Args| async move { Ok::<_, String>(args.num1 + args.num2) });
//! assert!(service.method_type("Sum").is_some());
//! ```

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use wirerpc_common::transport::Codec;
use wirerpc_common::{Result, RpcError};

/// Type-erased argument or reply value.
pub type BoxedValue = Box<dyn Any + Send>;

/// Outcome of one invocation; the error is the handler's message.
pub type InvokeResult = std::result::Result<BoxedValue, String>;

type DecodeFn = Box<dyn Fn(&Codec, &[u8]) -> Result<BoxedValue> + Send + Sync>;
type InvokeFn = Box<dyn Fn(BoxedValue) -> BoxFuture<'static, InvokeResult> + Send + Sync>;
type EncodeFn = Box<dyn Fn(&Codec, &BoxedValue) -> Result<Vec<u8>> + Send + Sync>;

/// One registered method: decoder, invoker, encoder and a call counter.
pub struct MethodType {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    num_calls: AtomicU64,
    decode_args: DecodeFn,
    invoke: InvokeFn,
    encode_reply: EncodeFn,
}

impl MethodType {
    /// Wraps a typed handler.
    ///
    /// The signature is the registration contract: exactly one argument `A`,
    /// a reply `R`, and an error `E` whose `Display` text is sent back to the
    /// caller.
    pub fn new<A, R, E, F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let decode_args: DecodeFn = Box::new(|codec: &Codec, data: &[u8]| {
            let args: A = codec.decode(data)?;
            Ok(Box::new(args) as BoxedValue)
        });

        let invoke: InvokeFn = Box::new(move |args: BoxedValue| -> BoxFuture<'static, InvokeResult> {
            match args.downcast::<A>() {
                Ok(args) => {
                    let fut = handler(*args);
                    Box::pin(async move {
                        fut.await
                            .map(|reply| Box::new(reply) as BoxedValue)
                            .map_err(|e| e.to_string())
                    })
                }
                Err(_) => {
                    Box::pin(async { Err(format!("argument is not a {}", type_name::<A>())) })
                }
            }
        });

        let encode_reply: EncodeFn = Box::new(|codec: &Codec, reply: &BoxedValue| {
            let reply = reply.downcast_ref::<R>().ok_or_else(|| {
                RpcError::InvalidResponse(format!("reply is not a {}", type_name::<R>()))
            })?;
            codec.encode(reply)
        });

        Self {
            name: name.into(),
            arg_type: type_name::<A>(),
            reply_type: type_name::<R>(),
            num_calls: AtomicU64::new(0),
            decode_args,
            invoke,
            encode_reply,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Number of invocations started so far.
    pub fn num_calls(&self) -> u64 {
        self.num_calls.load(Ordering::Relaxed)
    }

    /// Decodes a fresh argument value for one request.
    pub fn decode_args(&self, codec: &Codec, data: &[u8]) -> Result<BoxedValue> {
        (self.decode_args)(codec, data)
    }

    /// Starts one invocation. The returned future owns everything it needs,
    /// so it can be spawned and outlive the request that triggered it.
    pub fn call(&self, args: BoxedValue) -> BoxFuture<'static, InvokeResult> {
        self.num_calls.fetch_add(1, Ordering::Relaxed);
        (self.invoke)(args)
    }

    pub fn encode_reply(&self, codec: &Codec, reply: &BoxedValue) -> Result<Vec<u8>> {
        (self.encode_reply)(codec, reply)
    }
}

/// A named group of methods.
pub struct Service {
    name: String,
    methods: HashMap<String, Arc<MethodType>>,
}

impl Service {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Adds a method, replacing any earlier one with the same name.
    pub fn method<A, R, E, F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, E>> + Send + 'static,
    {
        let method = MethodType::new(name, handler);
        self.methods.insert(name.to_string(), Arc::new(method));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_type(&self, name: &str) -> Option<Arc<MethodType>> {
        self.methods.get(name).cloned()
    }

    pub fn methods(&self) -> impl Iterator<Item = &Arc<MethodType>> {
        self.methods.values()
    }

    /// Checks that the service and every method carry exported names.
    pub(crate) fn validate(&self) -> Result<()> {
        if !is_exported(&self.name) {
            return Err(RpcError::InvalidService(format!(
                "{} is not a valid service name",
                self.name
            )));
        }
        if self.methods.is_empty() {
            return Err(RpcError::InvalidService(format!(
                "{} has no methods",
                self.name
            )));
        }
        if let Some(method) = self.methods.keys().find(|name| !is_exported(name)) {
            return Err(RpcError::InvalidService(format!(
                "{}.{} is not a valid method name",
                self.name, method
            )));
        }
        Ok(())
    }

    pub fn info(&self) -> ServiceInfo {
        let mut methods: Vec<MethodInfo> = self
            .methods
            .values()
            .map(|m| MethodInfo {
                name: m.name().to_string(),
                arg_type: m.arg_type().to_string(),
                reply_type: m.reply_type().to_string(),
                calls: m.num_calls(),
            })
            .collect();
        methods.sort_by(|a, b| a.name.cmp(&b.name));
        ServiceInfo {
            name: self.name.clone(),
            methods,
        }
    }
}

/// An exported name starts with an uppercase ASCII letter and contains only
/// ASCII letters, digits and underscores.
pub fn is_exported(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_uppercase() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Introspection view of a registered service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub methods: Vec<MethodInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub name: String,
    pub arg_type: String,
    pub reply_type: String,
    pub calls: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wirerpc_common::transport::{JsonCodec, PostcardCodec};

    #[derive(Debug, Serialize, Deserialize)]
    struct Args {
        num1: i64,
        num2: i64,
    }

    fn foo() -> Service {
        Service::new("Foo")
            .method("Sum", |args: Args| async move { Ok::<_, String>(args.num1 + args.num2) })
            .method("Fail", |_: ()| async { Err::<i64, _>("division by zero") })
    }

    #[test]
    fn test_exported_names() {
        assert!(is_exported("Foo"));
        assert!(is_exported("Sum_2"));
        assert!(!is_exported("foo"));
        assert!(!is_exported(""));
        assert!(!is_exported("Foo.Sum"));
    }

    #[test]
    fn test_validate() {
        assert!(foo().validate().is_ok());
        assert!(Service::new("Empty").validate().is_err());

        let lower = Service::new("Foo").method("sum", |x: i64| async move { Ok::<_, String>(x) });
        let err = lower.validate().unwrap_err();
        assert!(err.to_string().contains("Foo.sum"));

        let unexported =
            Service::new("foo").method("Sum", |x: i64| async move { Ok::<_, String>(x) });
        assert!(matches!(unexported.validate(), Err(RpcError::InvalidService(_))));
    }

    #[tokio::test]
    async fn test_method_call_counts_and_encodes() {
        let service = foo();
        let sum = service.method_type("Sum").unwrap();
        let codec = Codec::Postcard(PostcardCodec);

        let data = codec.encode(&Args { num1: 3, num2: 4 }).unwrap();
        let args = sum.decode_args(&codec, &data).unwrap();
        assert_eq!(sum.num_calls(), 0);

        let reply = sum.call(args).await.unwrap();
        assert_eq!(sum.num_calls(), 1);

        let encoded = sum.encode_reply(&codec, &reply).unwrap();
        let value: i64 = codec.decode(&encoded).unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_handler_error_is_message() {
        let service = foo();
        let fail = service.method_type("Fail").unwrap();
        let codec = Codec::Json(JsonCodec);

        let args = fail.decode_args(&codec, b"null").unwrap();
        let err = fail.call(args).await.unwrap_err();
        assert_eq!(err, "division by zero");
    }

    #[test]
    fn test_decode_rejects_wrong_arguments() {
        let service = foo();
        let sum = service.method_type("Sum").unwrap();
        let codec = Codec::Json(JsonCodec);
        assert!(sum.decode_args(&codec, br#"{"num1": "three"}"#).is_err());
    }

    #[test]
    fn test_info_lists_methods_sorted() {
        let info = foo().info();
        assert_eq!(info.name, "Foo");
        let names: Vec<_> = info.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["Fail", "Sum"]);
        assert!(info.methods[1].arg_type.ends_with("Args"));
        assert_eq!(info.methods[1].reply_type, "i64");
    }
}
