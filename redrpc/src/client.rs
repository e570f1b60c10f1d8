//! RPC client.
//!
//! A call is pushed to `{prefix}:{function}:calls` and its result is awaited
//! on `{prefix}:{function}:result:{request_id}`. The client never talks to a
//! server directly, so a timeout cannot tell "nobody picked it up" from
//! "the handler is slow" or "the result expired".

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use redrpc_core::broker::Broker;
use redrpc_core::envelope::{self, Arguments, CallEnvelope};
use redrpc_core::error::{CodecError, Result, RpcError};
use redrpc_core::naming;
use redrpc_core::options::ClientOptions;
use redrpc_core::timeout::{poll_window, Deadline};

/// Issues calls through a broker.
///
/// Cheap to share: every method takes `&self`, and broker connections are
/// managed by the broker.
#[derive(Debug)]
pub struct Client<B: Broker> {
    broker: B,
    options: ClientOptions,
}

impl<B: Broker> Client<B> {
    pub fn new(broker: B, options: ClientOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { broker, options })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Queue a call without waiting for it.
    ///
    /// `args` must serialize to a JSON object (its fields become the keyword
    /// arguments) or to `null` (no arguments). Returns the request id to pass
    /// to [`wait`](Self::wait).
    pub fn call_async<A: Serialize>(&self, function: &str, args: A) -> Result<String> {
        let arguments = to_arguments(args)?;
        let request_id = Uuid::new_v4().to_string();
        let call = CallEnvelope::new(request_id.clone(), (self.options.time_source)(), arguments);
        let payload = envelope::encode_call(&call)?;

        let queue = naming::call_queue(&self.options.prefix, function);
        self.broker
            .push_with_expiry(&queue, &payload, self.options.request_expire)?;
        debug!(function, request_id = %request_id, "call queued");
        Ok(request_id)
    }

    /// Wait for the result of a queued call.
    ///
    /// Blocks in steps of at most one poll quantum until the result arrives or
    /// `timeout` passes.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Timeout`] when no result arrived in time
    /// - [`RpcError::Remote`] when the handler failed
    /// - [`RpcError::Codec`] when the result is malformed or does not decode
    ///   into `R`
    pub fn wait<R: DeserializeOwned>(
        &self,
        function: &str,
        request_id: &str,
        timeout: Duration,
    ) -> Result<R> {
        let queue = naming::response_queue(&self.options.prefix, function, request_id);
        let deadline = Deadline::after(timeout);
        let granularity = self.broker.timeout_granularity();

        while let Some(remaining) = deadline.remaining() {
            let window = poll_window(remaining, self.options.poll_quantum, granularity);
            trace!(queue = %queue, ?window, "waiting for result");
            let Some((_, payload)) = self.broker.block_pop(&[queue.as_str()], window)? else {
                continue;
            };

            let value = envelope::decode_result(&payload)?.into_result()?;
            debug!(function, request_id, "result received");
            return serde_json::from_value(value).map_err(|e| RpcError::Codec(CodecError::Decode(e)));
        }

        debug!(function, request_id, ?timeout, "call timed out");
        Err(RpcError::Timeout(timeout))
    }

    /// Call `function` and wait up to the configured response timeout.
    pub fn call<A: Serialize, R: DeserializeOwned>(&self, function: &str, args: A) -> Result<R> {
        self.call_with_timeout(function, args, self.options.response_timeout)
    }

    /// Call `function` and wait up to `timeout`.
    pub fn call_with_timeout<A: Serialize, R: DeserializeOwned>(
        &self,
        function: &str,
        args: A,
        timeout: Duration,
    ) -> Result<R> {
        let request_id = self.call_async(function, args)?;
        self.wait(function, &request_id, timeout)
    }

    /// Ids of the servers of `kind` whose liveness key currently exists.
    pub fn list_online(&self, kind: &str) -> Result<BTreeSet<String>> {
        let prefix = &self.options.prefix;
        let keys = self
            .broker
            .scan_keys(&naming::liveness_pattern(prefix, kind))?;
        Ok(keys
            .iter()
            .filter_map(|key| naming::liveness_id(prefix, kind, key))
            .collect())
    }

    /// Whether server `id` of `kind` is alive, or any server of `kind` when
    /// `id` is `None`.
    pub fn is_online(&self, kind: &str, id: Option<&str>) -> Result<bool> {
        match id {
            Some(id) => Ok(self
                .broker
                .key_exists(&naming::liveness_key(&self.options.prefix, kind, id))?),
            None => Ok(!self.list_online(kind)?.is_empty()),
        }
    }
}

fn to_arguments<A: Serialize>(args: A) -> Result<Arguments> {
    match serde_json::to_value(args).map_err(|e| RpcError::invalid_arguments(e.to_string()))? {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Arguments::new()),
        other => Err(RpcError::invalid_arguments(format!(
            "arguments must be a keyword mapping, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redrpc_core::memory::MemoryBroker;
    use serde_json::json;
    use std::time::Instant;

    fn client() -> Client<MemoryBroker> {
        Client::new(
            MemoryBroker::new(),
            ClientOptions::default().with_poll_quantum(Duration::from_millis(50)),
        )
        .unwrap()
    }

    #[test]
    fn test_call_async_pushes_envelope() {
        let client = client();
        let request_id = client.call_async("get", json!({"k": "a"})).unwrap();
        assert!(Uuid::parse_str(&request_id).is_ok());

        let queue = naming::call_queue("redis_rpc", "get");
        let ttl = client.broker().ttl(&queue).unwrap();
        assert!(ttl > Duration::ZERO && ttl <= Duration::from_secs(120));

        let (_, payload) = client
            .broker()
            .block_pop(&[queue.as_str()], Duration::ZERO)
            .unwrap()
            .unwrap();
        let call = envelope::decode_call(&payload).unwrap();
        assert_eq!(call.request_id, request_id);
        assert_eq!(call.arguments.get("k"), Some(&json!("a")));
    }

    #[test]
    fn test_arguments_must_be_a_mapping() {
        let client = client();
        assert!(client.call_async("f", ()).is_ok());
        let err = client.call_async("f", vec![1, 2]).unwrap_err();
        assert!(matches!(err, RpcError::InvalidArguments(_)));
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn test_wait_times_out_without_server() {
        let client = client();
        let started = Instant::now();
        let err = client
            .call_with_timeout::<_, Value>("nobody", json!({}), Duration::from_millis(120))
            .unwrap_err();
        assert!(err.is_timeout());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(120));
        assert!(elapsed < Duration::from_millis(120) + Duration::from_millis(50) * 4);
    }

    #[test]
    fn test_huge_request_expire_is_accepted() {
        let client = Client::new(
            MemoryBroker::new(),
            ClientOptions::default().with_request_expire(Duration::MAX),
        )
        .unwrap();
        client.call_async("get", json!({"k": "a"})).unwrap();
        assert_eq!(client.broker().len(&naming::call_queue("redis_rpc", "get")), 1);
    }

    #[test]
    fn test_wait_with_unbounded_timeout_returns_result() {
        let client = client();
        let queue = naming::response_queue("redis_rpc", "f", "id-2");
        let result = envelope::ResultEnvelope::success(chrono::Utc::now(), json!(7));
        client
            .broker()
            .push_with_expiry(&queue, &envelope::encode_result(&result).unwrap(), Duration::from_secs(5))
            .unwrap();
        let value: i64 = client.wait("f", "id-2", Duration::MAX).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_malformed_result_is_codec_error() {
        let client = client();
        let queue = naming::response_queue("redis_rpc", "f", "id-1");
        client
            .broker()
            .push_with_expiry(&queue, b"{broken", Duration::from_secs(5))
            .unwrap();
        let err = client.wait::<Value>("f", "id-1", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, RpcError::Codec(_)));
    }
}
