//! Connection pool.
//!
//! One connection is checked out per broker operation, so a blocking pop
//! never shares its connection. The mutex guards only checkout and return.

use parking_lot::Mutex;
use redis::{Client, Connection, ConnectionLike, RedisResult};
use std::ops::{Deref, DerefMut};
use std::time::Duration;
use tracing::trace;

pub(crate) struct Pool {
    client: Client,
    idle: Mutex<Vec<Connection>>,
    max_idle: usize,
    connect_timeout: Option<Duration>,
}

impl Pool {
    pub(crate) fn new(client: Client, max_idle: usize, connect_timeout: Option<Duration>) -> Self {
        Self {
            client,
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            max_idle,
            connect_timeout,
        }
    }

    /// Take an idle connection or open a new one.
    pub(crate) fn get(&self) -> RedisResult<PooledConnection<'_>> {
        let reused = self.idle.lock().pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                trace!("[REDIS] opening connection");
                match self.connect_timeout {
                    Some(timeout) => self.client.get_connection_with_timeout(timeout)?,
                    None => self.client.get_connection()?,
                }
            }
        };
        Ok(PooledConnection {
            pool: self,
            conn: Some(conn),
            broken: false,
        })
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn put_back(&self, conn: Connection) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// Connection checked out of a [`Pool`]; returned on drop unless broken.
pub(crate) struct PooledConnection<'a> {
    pool: &'a Pool,
    conn: Option<Connection>,
    broken: bool,
}

impl PooledConnection<'_> {
    /// Discard the connection instead of returning it.
    pub(crate) fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // only taken in drop
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !self.broken && conn.is_open() {
                self.pool.put_back(conn);
            }
        }
    }
}
