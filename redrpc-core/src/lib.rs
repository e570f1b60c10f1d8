//! redrpc Core
//!
//! This crate contains the broker-agnostic building blocks of the protocol:
//! - Key naming for call queues, response queues and liveness keys (`naming`)
//! - Call / result envelope codec (`envelope`)
//! - Broker capability trait (`broker`) and an in-process broker (`memory`)
//! - Client / server options (`options`)
//! - Deadline arithmetic for bounded waits (`timeout`)
//! - Poll-order rotation (`rotation`)
//! - Cooperative shutdown flag (`shutdown`)
//! - Server event monitoring (`monitor`)
//! - Error types (`error`)

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod broker;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod monitor;
pub mod naming;
pub mod options;
pub mod rotation;
pub mod shutdown;
pub mod timeout;

pub mod prelude {
    pub use crate::broker::{Broker, BrokerResult};
    pub use crate::envelope::{Arguments, CallEnvelope, Outcome, ResultEnvelope};
    pub use crate::error::{BrokerError, CodecError, RemoteException, RpcError};
    pub use crate::memory::MemoryBroker;
    pub use crate::monitor::{ServerEvent, ServerMonitor};
    pub use crate::options::{ClientOptions, ServerIdentity, ServerOptions};
    pub use crate::shutdown::Shutdown;
}
