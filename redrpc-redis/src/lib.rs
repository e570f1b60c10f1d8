//! # redrpc Redis
//!
//! Redis adapter for the redrpc broker contract, built on the `redis` crate.
//!
//! - `push_with_expiry` runs `RPUSH` + `PEXPIRE` as one Lua script
//! - `block_pop` maps to `BLPOP`, with the timeout rounded up to the
//!   configured granularity
//! - liveness keys use `SET .. PX`, `EXISTS` and `SCAN MATCH`
//!
//! Prefer the `redrpc` crate with the `redis` feature, which re-exports this
//! crate.

#![deny(unsafe_code)]
#![allow(clippy::module_name_repetitions)]

mod broker;
pub mod config;
mod pool;

pub use broker::RedisBroker;
pub use config::RedisConfig;
