//! Session pool and active-session manager (relay side)
//!
//! Agents' sessions queue up in a bounded FIFO pool. Exactly one of them is
//! "active" and sources the streams for public clients. A watcher task owns
//! the write side of the active slot: when the active session closes it
//! waits for the next pooled session and installs it.

use crate::session::Session;
use anyhow::{Result, anyhow};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Sessions waiting to become active, at most
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// session_pool creates a bounded FIFO of sessions
pub fn session_pool(capacity: usize) -> (PoolSender, SessionPool) {
    let (tx, rx) = mpsc::channel(capacity);
    (PoolSender { tx }, SessionPool { rx })
}

/// PoolSender is the producing end of the pool, held by the relay listener
#[derive(Clone)]
pub struct PoolSender {
    tx: mpsc::Sender<Session>,
}

impl PoolSender {
    /// push enqueues a session, waiting while the pool is full
    pub async fn push(&self, session: Session) -> Result<()> {
        self.tx
            .send(session)
            .await
            .map_err(|_| anyhow!("session pool closed"))
    }
}

/// SessionPool is the consuming end of the pool
pub struct SessionPool {
    rx: mpsc::Receiver<Session>,
}

impl SessionPool {
    /// next waits for the oldest pooled session that is still alive.
    /// Returns None once every sender is gone and the pool is drained.
    pub async fn next(&mut self) -> Option<Session> {
        while let Some(session) = self.rx.recv().await {
            if session.is_closed() {
                warn!(remote_addr = %session.remote_addr(), "discarding pooled session: already closed");
                continue;
            }
            return Some(session);
        }
        None
    }

    /// pending is the number of sessions waiting in the pool
    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

/// ActiveSession is a read handle onto the currently active session
#[derive(Clone)]
pub struct ActiveSession {
    rx: watch::Receiver<Session>,
}

impl ActiveSession {
    /// start waits for the pool's first session, makes it active and
    /// spawns the failover watcher
    pub async fn start(mut pool: SessionPool) -> Result<Self> {
        let first = pool
            .next()
            .await
            .ok_or_else(|| anyhow!("session pool closed before any session arrived"))?;
        info!(remote_addr = %first.remote_addr(), "session acquired");

        let (tx, rx) = watch::channel(first);
        tokio::spawn(watch_active(tx, pool));

        Ok(Self { rx })
    }

    /// current returns the session active right now. Callers must not hold
    /// on to it beyond the request it was fetched for.
    pub fn current(&self) -> Session {
        self.rx.borrow().clone()
    }

    /// changed waits until the watcher installs a new session
    #[cfg(test)]
    pub(crate) async fn changed(&mut self) -> Result<Session> {
        self.rx
            .changed()
            .await
            .map_err(|_| anyhow!("active session watcher stopped"))?;
        Ok(self.current())
    }
}

/// watch_active replaces the active session each time it closes. Exits when
/// the pool is closed or every ActiveSession handle is dropped.
async fn watch_active(tx: watch::Sender<Session>, mut pool: SessionPool) {
    loop {
        let active = tx.borrow().clone();

        tokio::select! {
            _ = active.closed() => {}
            _ = tx.closed() => return,
        }
        warn!(remote_addr = %active.remote_addr(), "received session shutdown");
        drop(active);

        let next = tokio::select! {
            next = pool.next() => next,
            _ = tx.closed() => return,
        };
        let Some(next) = next else {
            info!("session pool closed: no further failover");
            return;
        };

        info!(remote_addr = %next.remote_addr(), pending = pool.pending(), "new session acquired");
        tx.send_replace(next);
    }
}
