//! The `Foo` demo service.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use wirerpc_server::Service;

/// Arguments shared by every `Foo` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Args {
    pub num1: i64,
    pub num2: i64,
}

/// `Foo.Sum` adds the two numbers; `Foo.Sleep` waits `num1` seconds first.
pub fn foo_service() -> Service {
    Service::new("Foo")
        .method("Sum", |args: Args| async move { sum(args) })
        .method("Sleep", |args: Args| async move {
            tokio::time::sleep(Duration::from_secs(args.num1.max(0) as u64)).await;
            sum(args)
        })
}

fn sum(args: Args) -> Result<i64, String> {
    args.num1
        .checked_add(args.num2)
        .ok_or_else(|| format!("{} + {} overflows", args.num1, args.num2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use wirerpc_client::Client;
    use wirerpc_common::transport::{Codec, JsonCodec};
    use wirerpc_common::Options;
    use wirerpc_server::Server;

    #[tokio::test]
    async fn test_sum_through_method_type() {
        let service = foo_service();
        let method = service.method_type("Sum").unwrap();
        let codec = Codec::Json(JsonCodec);

        let args = method.decode_args(&codec, br#"{"num1":3,"num2":4}"#).unwrap();
        let reply = method.call(args).await.unwrap();
        assert_eq!(method.encode_reply(&codec, &reply).unwrap(), b"7");
        assert_eq!(method.num_calls(), 1);
    }

    #[tokio::test]
    async fn test_sum_overflow_is_an_error() {
        let method = foo_service().method_type("Sum").unwrap();
        let args = Box::new(Args { num1: i64::MAX, num2: 1 });
        let err = method.call(args).await.unwrap_err();
        assert!(err.contains("overflows"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_foo_over_unix_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.sock");

        let server = Arc::new(Server::new());
        server.register(foo_service()).unwrap();
        let listener = tokio::net::UnixListener::bind(&path).unwrap();
        tokio::spawn(server.clone().accept_unix(listener));

        let client = Client::dial_unix(&path, Options::default()).await.unwrap();
        let reply: i64 = client.call("Foo.Sum", Args { num1: 3, num2: 4 }).await.unwrap();
        assert_eq!(reply, 7);

        client.close().await.unwrap();
        server.shutdown();
    }
}
