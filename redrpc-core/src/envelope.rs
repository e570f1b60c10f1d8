//! Call and result envelopes.
//!
//! Envelopes travel through broker lists as JSON objects:
//!
//! ```text
//! call:    {"id": "<request id>", "ts": "<timestamp>", "kw": {<arguments>}}
//! success: {"ts": "<timestamp>", "res": <value>}
//! failure: {"ts": "<timestamp>", "err": "<message>", "trace": "<trace>"}
//! ```
//!
//! The format is versionless. `kw` may be omitted (empty arguments), `trace`
//! is omitted when the handler recorded none, and the presence of `err` is
//! what marks a failure. Failures written under the older `exc` field name
//! are read as well.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CodecError, RemoteException};

/// Keyword arguments of a call.
pub type Arguments = Map<String, Value>;

/// A pending call, as pushed to a call queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEnvelope {
    #[serde(rename = "id")]
    pub request_id: String,
    #[serde(rename = "ts", with = "timestamp")]
    pub issued_at: DateTime<Utc>,
    #[serde(rename = "kw", default)]
    pub arguments: Arguments,
}

impl CallEnvelope {
    pub fn new(request_id: impl Into<String>, issued_at: DateTime<Utc>, arguments: Arguments) -> Self {
        Self {
            request_id: request_id.into(),
            issued_at,
            arguments,
        }
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Value),
    Failure(RemoteException),
}

/// A finished call, as pushed to a response queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEnvelope {
    pub completed_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl ResultEnvelope {
    pub fn success(completed_at: DateTime<Utc>, value: Value) -> Self {
        Self {
            completed_at,
            outcome: Outcome::Success(value),
        }
    }

    pub fn failure(completed_at: DateTime<Utc>, failure: RemoteException) -> Self {
        Self {
            completed_at,
            outcome: Outcome::Failure(failure),
        }
    }

    /// Convert into the value a caller sees.
    pub fn into_result(self) -> Result<Value, RemoteException> {
        match self.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(failure) => Err(failure),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ResultWire {
    #[serde(with = "timestamp")]
    ts: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    res: Option<Value>,
    #[serde(default, alias = "exc", skip_serializing_if = "Option::is_none")]
    err: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    trace: Option<String>,
}

/// Encode a call envelope.
pub fn encode_call(call: &CallEnvelope) -> Result<Bytes, CodecError> {
    serde_json::to_vec(call)
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}

/// Decode a call envelope.
pub fn decode_call(payload: &[u8]) -> Result<CallEnvelope, CodecError> {
    serde_json::from_slice(payload).map_err(CodecError::Decode)
}

/// Encode a result envelope.
pub fn encode_result(result: &ResultEnvelope) -> Result<Bytes, CodecError> {
    let wire = match &result.outcome {
        Outcome::Success(value) => ResultWire {
            ts: result.completed_at,
            res: Some(value.clone()),
            err: None,
            trace: None,
        },
        Outcome::Failure(failure) => ResultWire {
            ts: result.completed_at,
            res: None,
            err: Some(failure.message.clone()),
            trace: failure.trace.clone(),
        },
    };
    serde_json::to_vec(&wire)
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}

/// Decode a result envelope.
pub fn decode_result(payload: &[u8]) -> Result<ResultEnvelope, CodecError> {
    let wire: ResultWire = serde_json::from_slice(payload).map_err(CodecError::Decode)?;
    let outcome = match wire.err {
        Some(message) => Outcome::Failure(RemoteException::new(message, wire.trace)),
        None => Outcome::Success(wire.res.unwrap_or(Value::Null)),
    };
    Ok(ResultEnvelope {
        completed_at: wire.ts,
        outcome,
    })
}

/// RFC 3339 on the way out; RFC 3339 or naive ISO-8601 (read as UTC) on the way in.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }
}
