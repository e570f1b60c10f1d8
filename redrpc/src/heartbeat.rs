//! Liveness heartbeat.
//!
//! A server with an identity keeps the key `{prefix}:{kind}:alive:{id}`
//! present by re-setting it with a short expiry. Clients treat the key's
//! existence as "online". Nothing is deleted on exit: the key simply expires
//! `heartbeat_expire` after the last refresh.

use chrono::SecondsFormat;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

use redrpc_core::broker::Broker;
use redrpc_core::error::{Result, RpcError};
use redrpc_core::monitor::{ServerEvent, ServerEventSender};
use redrpc_core::naming;
use redrpc_core::options::{ServerIdentity, ServerOptions, TimeSource};
use redrpc_core::shutdown::Shutdown;

/// Refreshes one liveness key until shutdown.
pub struct Heartbeat<'a, B: Broker + ?Sized> {
    broker: &'a B,
    key: String,
    period: Duration,
    expire: Duration,
    quantum: Duration,
    time_source: TimeSource,
    events: Option<ServerEventSender>,
}

impl<'a, B: Broker + ?Sized> Heartbeat<'a, B> {
    pub fn new(broker: &'a B, identity: &ServerIdentity, options: &ServerOptions) -> Self {
        Self {
            broker,
            key: naming::liveness_key(&options.prefix, &identity.kind, &identity.id),
            period: options.heartbeat_period,
            expire: options.heartbeat_expire,
            quantum: options.poll_quantum,
            time_source: options.time_source,
            events: None,
        }
    }

    pub(crate) fn with_events(mut self, events: Option<ServerEventSender>) -> Self {
        self.events = events;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Set the liveness key once.
    pub fn beat(&self) -> Result<()> {
        let stamp = (self.time_source)().to_rfc3339_opts(SecondsFormat::Micros, true);
        self.broker
            .set_with_expiry(&self.key, stamp.as_bytes(), self.expire)?;
        trace!(key = %self.key, "heartbeat");
        if let Some(events) = &self.events {
            let _ = events.send(ServerEvent::HeartbeatSent {
                key: self.key.clone(),
            });
        }
        Ok(())
    }

    /// Refresh the key until `shutdown` is triggered.
    ///
    /// Wakes at least once per poll quantum. A wake refreshes the key when
    /// the period has elapsed or the key has gone missing. A broker failure
    /// triggers `shutdown` and is returned.
    pub fn run(&self, shutdown: &Shutdown) -> Result<()> {
        debug!(key = %self.key, period = ?self.period, expire = ?self.expire, "heartbeat started");
        // `None` once the next refresh lies beyond what `Instant` can hold
        let mut next_due = Some(Instant::now());

        while !shutdown.is_triggered() {
            let now = Instant::now();
            let due = next_due.is_some_and(|at| now >= at);
            let refresh = due
                || !self
                    .broker
                    .key_exists(&self.key)
                    .map_err(|e| self.fail(shutdown, e.into()))?;
            if refresh {
                self.beat().map_err(|e| self.fail(shutdown, e))?;
                next_due = now.checked_add(self.period);
            }
            let nap = next_due.map_or(self.quantum, |at| {
                at.saturating_duration_since(Instant::now()).min(self.quantum)
            });
            thread::sleep(nap.max(Duration::from_millis(1)));
        }

        debug!(key = %self.key, "heartbeat stopped");
        Ok(())
    }

    fn fail(&self, shutdown: &Shutdown, err: RpcError) -> RpcError {
        error!(key = %self.key, error = %err, "heartbeat failed");
        shutdown.trigger();
        err
    }
}
