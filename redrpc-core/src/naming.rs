//! Broker key naming.
//!
//! Every key used by the protocol is derived from a namespace prefix plus one
//! to three name components:
//!
//! | key             | format                               |
//! |-----------------|--------------------------------------|
//! | call queue      | `{prefix}:{function}:calls`          |
//! | response queue  | `{prefix}:{function}:result:{id}`    |
//! | liveness key    | `{prefix}:{kind}:alive:{id}`         |
//!
//! Components are escaped before joining (`%` → `%25`, `:` → `%3A`), so two
//! distinct component tuples can never produce the same key. Names that
//! contain neither character are used verbatim.
//!
//! The prefix is a component too: a namespace such as `app:rpc` becomes
//! `app%3Arpc:get:calls`. Peers that join names without escaping write
//! `app:rpc:get:calls` instead, so processes sharing queues with such peers
//! must use a prefix without `:` or `%`.

use std::borrow::Cow;

/// Default namespace prefix shared by clients and servers.
pub const DEFAULT_PREFIX: &str = "redis_rpc";

const CALLS: &str = "calls";
const RESULT: &str = "result";
const ALIVE: &str = "alive";

/// Name of the list holding pending calls for `function`.
pub fn call_queue(prefix: &str, function: &str) -> String {
    format!("{}:{}:{CALLS}", escape(prefix), escape(function))
}

/// Name of the list holding the result of one outstanding call.
pub fn response_queue(prefix: &str, function: &str, request_id: &str) -> String {
    format!(
        "{}:{}:{RESULT}:{}",
        escape(prefix),
        escape(function),
        escape(request_id)
    )
}

/// Name of the key whose existence marks server `id` of `kind` as alive.
pub fn liveness_key(prefix: &str, kind: &str, id: &str) -> String {
    format!("{}:{}:{ALIVE}:{}", escape(prefix), escape(kind), escape(id))
}

/// Glob pattern matching every liveness key of `kind`.
///
/// Glob metacharacters in the prefix and kind are backslash-escaped so they
/// match literally.
pub fn liveness_pattern(prefix: &str, kind: &str) -> String {
    format!(
        "{}:{}:{ALIVE}:*",
        escape_glob(&escape(prefix)),
        escape_glob(&escape(kind))
    )
}

/// Recover the server id from a key returned by a liveness scan.
///
/// Returns `None` when `key` is not a liveness key of `kind` under `prefix`.
pub fn liveness_id(prefix: &str, kind: &str, key: &str) -> Option<String> {
    let head = format!("{}:{}:{ALIVE}:", escape(prefix), escape(kind));
    let raw = key.strip_prefix(head.as_str())?;
    if raw.contains(':') {
        return None;
    }
    unescape(raw)
}

fn escape(component: &str) -> Cow<'_, str> {
    if !component.contains(['%', ':']) {
        return Cow::Borrowed(component);
    }
    let mut out = String::with_capacity(component.len() + 8);
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

fn unescape(component: &str) -> Option<String> {
    let mut out = String::with_capacity(component.len());
    let mut rest = component;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let code = rest.get(pos + 1..pos + 3)?;
        match code {
            "25" => out.push('%'),
            "3A" => out.push(':'),
            _ => return None,
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_names() {
        assert_eq!(call_queue("redis_rpc", "get"), "redis_rpc:get:calls");
        assert_eq!(
            response_queue("redis_rpc", "get", "abc"),
            "redis_rpc:get:result:abc"
        );
        assert_eq!(liveness_key("redis_rpc", "X", "42"), "redis_rpc:X:alive:42");
        assert_eq!(liveness_pattern("redis_rpc", "X"), "redis_rpc:X:alive:*");
    }

    #[test]
    fn test_separator_in_components_does_not_collide() {
        assert_ne!(call_queue("a:b", "c"), call_queue("a", "b:c"));
        assert_ne!(
            response_queue("p", "f:result", "x"),
            response_queue("p", "f", "result:x")
        );
        assert_ne!(liveness_key("p", "k:alive", "1"), liveness_key("p", "k", "alive:1"));
        // an escaped form typed literally stays distinct from the raw character
        assert_ne!(call_queue("p", "a%3Ab"), call_queue("p", "a:b"));
    }

    #[test]
    fn test_liveness_id_roundtrip() {
        for id in ["42", "host:1234", "100%"] {
            let key = liveness_key("redis_rpc", "worker", id);
            assert_eq!(liveness_id("redis_rpc", "worker", &key).as_deref(), Some(id));
        }
    }

    #[test]
    fn test_liveness_id_rejects_foreign_keys() {
        assert_eq!(liveness_id("redis_rpc", "X", "redis_rpc:Y:alive:1"), None);
        assert_eq!(liveness_id("redis_rpc", "X", "redis_rpc:X:calls"), None);
        assert_eq!(liveness_id("redis_rpc", "X", "redis_rpc:X:alive:%zz"), None);
    }

    #[test]
    fn test_prefix_with_separator_is_escaped() {
        assert_eq!(call_queue("app:rpc", "get"), "app%3Arpc:get:calls");
        assert_eq!(liveness_pattern("app:rpc", "X"), "app%3Arpc:X:alive:*");
    }

    #[test]
    fn test_pattern_escapes_glob_metacharacters() {
        assert_eq!(liveness_pattern("p*", "k?"), "p\\*:k\\?:alive:*");
    }
}
