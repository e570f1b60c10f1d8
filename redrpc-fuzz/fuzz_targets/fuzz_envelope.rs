#![no_main]

use libfuzzer_sys::fuzz_target;
use redrpc_core::envelope::{decode_call, decode_result, encode_call, encode_result};
use redrpc_core::naming;

fuzz_target!(|data: &[u8]| {
    // Whatever a peer pushed, decoding must fail cleanly or yield an
    // envelope that encodes and decodes back to itself.
    if let Ok(call) = decode_call(data) {
        let encoded = encode_call(&call).expect("decoded call re-encodes");
        let again = decode_call(&encoded).expect("re-encoded call decodes");
        assert_eq!(again.request_id, call.request_id);
        assert_eq!(again.arguments, call.arguments);

        // request ids end up in key names
        let queue = naming::response_queue("redis_rpc", "f", &call.request_id);
        assert!(queue.starts_with("redis_rpc:f:result:"));
    }

    if let Ok(result) = decode_result(data) {
        let encoded = encode_result(&result).expect("decoded result re-encodes");
        let again = decode_result(&encoded).expect("re-encoded result decodes");
        assert_eq!(again.outcome, result.outcome);
    }

    if let Ok(text) = std::str::from_utf8(data) {
        let key = naming::liveness_key("redis_rpc", "kind", text);
        assert_eq!(naming::liveness_id("redis_rpc", "kind", &key).as_deref(), Some(text));
    }
});
