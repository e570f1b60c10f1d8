//! Handler registration.
//!
//! A handler receives the decoded keyword arguments of one call and returns
//! either a JSON value or a [`HandlerError`]. Most handlers are written
//! against a typed argument record and wrapped with [`typed`]:
//!
//! ```rust
//! use redrpc::handler::{typed, FunctionTable, HandlerError};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Add {
//!     a: i64,
//!     b: i64,
//! }
//!
//! let functions = FunctionTable::new()
//!     .register("add", typed(|args: Add| Ok::<_, HandlerError>(args.a + args.b)));
//! assert!(functions.contains("add"));
//! ```

use hashbrown::HashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::iter;
use std::marker::PhantomData;

use redrpc_core::envelope::Arguments;
use redrpc_core::error::RemoteException;

/// Failure returned by a handler.
///
/// Converted from any [`std::error::Error`]: the message is the error's
/// `Display`, the trace is its `source()` chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
    trace: Option<String>,
    bad_arguments: bool,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: None,
            bad_arguments: false,
        }
    }

    /// Arguments that do not fit the handler's record.
    pub fn invalid_arguments(err: impl fmt::Display) -> Self {
        Self {
            bad_arguments: true,
            ..Self::new(err.to_string())
        }
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Build from an error and its chain of sources.
    ///
    /// The first line of the report is the message; the remaining lines,
    /// one per source, form the trace.
    pub fn from_report(err: &(dyn Error + 'static)) -> Self {
        let causes: Vec<String> = iter::successors(err.source(), |&e| e.source())
            .map(|cause| format!("caused by: {cause}"))
            .collect();
        Self {
            message: err.to_string(),
            trace: (!causes.is_empty()).then(|| causes.join("\n")),
            bad_arguments: false,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn trace(&self) -> Option<&str> {
        self.trace.as_deref()
    }

    #[must_use]
    pub const fn is_invalid_arguments(&self) -> bool {
        self.bad_arguments
    }

    /// Wire form of the failure, as seen by the caller of `function`.
    pub(crate) fn into_remote(self, function: &str) -> RemoteException {
        let message = if self.bad_arguments {
            format!("invalid arguments for `{function}`: {}", self.message)
        } else {
            self.message
        };
        RemoteException::new(message, self.trace)
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl<E: Error + 'static> From<E> for HandlerError {
    fn from(err: E) -> Self {
        Self::from_report(&err)
    }
}

/// A callable function exposed by a server.
pub trait Handler: Send + Sync {
    fn call(&self, args: Arguments) -> Result<Value, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(Arguments) -> Result<Value, HandlerError> + Send + Sync,
{
    fn call(&self, args: Arguments) -> Result<Value, HandlerError> {
        self(args)
    }
}

/// Handler over a typed argument record; see [`typed`].
pub struct Typed<F, A, R, E> {
    f: F,
    _marker: PhantomData<fn(A) -> Result<R, E>>,
}

/// Wrap `f` so the keyword arguments are decoded into `A` and the result
/// encoded from `R`.
///
/// Arguments that do not decode fail the call with
/// "invalid arguments for `<function>`: ..." without running `f`.
pub fn typed<F, A, R, E>(f: F) -> Typed<F, A, R, E>
where
    F: Fn(A) -> Result<R, E> + Send + Sync,
    A: DeserializeOwned,
    R: Serialize,
    E: Into<HandlerError>,
{
    Typed {
        f,
        _marker: PhantomData,
    }
}

impl<F, A, R, E> Handler for Typed<F, A, R, E>
where
    F: Fn(A) -> Result<R, E> + Send + Sync,
    A: DeserializeOwned,
    R: Serialize,
    E: Into<HandlerError>,
{
    fn call(&self, args: Arguments) -> Result<Value, HandlerError> {
        let args: A =
            serde_json::from_value(Value::Object(args)).map_err(HandlerError::invalid_arguments)?;
        let result = (self.f)(args).map_err(Into::into)?;
        serde_json::to_value(result)
            .map_err(|e| HandlerError::new(format!("result is not representable as JSON: {e}")))
    }
}

/// Function name to handler mapping, fixed once handed to a server.
#[derive(Default)]
pub struct FunctionTable {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `handler` under `name`, replacing any previous registration.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, handler: impl Handler + 'static) -> Self {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    pub fn get(&self, name: &str) -> Option<&dyn Handler> {
        self.handlers.get(name).map(|h| &**h)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
