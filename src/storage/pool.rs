//! Small bounded pool of `tokio_postgres` clients.
//!
//! A semaphore caps the number of live connections. A [`PooledClient`] returns its client
//! to the idle list when dropped, on every exit path, unless the connection has closed, in
//! which case it is discarded and the slot is freed for a fresh connect.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, warn};

use super::{StoreError, StoreResult};

struct PoolInner {
    config: Config,
    idle: Mutex<Vec<Client>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
}

#[derive(Clone)]
pub struct PgPool {
    inner: Arc<PoolInner>,
}

impl PgPool {
    /// Parse `url` and size the pool. No connection is opened until first use.
    pub fn new(url: &str, size: usize, acquire_timeout: Duration) -> StoreResult<Self> {
        let config: Config = url.parse()?;
        Ok(Self {
            inner: Arc::new(PoolInner {
                config,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(size.max(1))),
                acquire_timeout,
            }),
        })
    }

    /// Borrow a client, waiting at most the acquire timeout for a free slot.
    pub async fn get(&self) -> StoreResult<PooledClient> {
        let permit = tokio::time::timeout(self.inner.acquire_timeout, self.inner.permits.clone().acquire_owned())
            .await
            .map_err(|_| StoreError::Timeout(self.inner.acquire_timeout))?
            .map_err(|_| StoreError::PoolClosed)?;

        let reused = {
            let mut idle = self.inner.idle.lock();
            let mut found = None;
            while let Some(c) = idle.pop() {
                if !c.is_closed() {
                    found = Some(c);
                    break;
                }
            }
            found
        };
        let client = match reused {
            Some(c) => c,
            None => self.connect().await?,
        };
        Ok(PooledClient { client: Some(client), pool: self.inner.clone(), _permit: permit })
    }

    async fn connect(&self) -> StoreResult<Client> {
        let (client, conn) = self.inner.config.connect(NoTls).await?;
        // drive the connection in background
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!(target: "tablegate::pool", "postgres connection ended: {e}");
            }
        });
        debug!(target: "tablegate::pool", "opened postgres connection");
        Ok(client)
    }

    pub fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    /// Slots not currently borrowed.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

pub struct PooledClient {
    client: Option<Client>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client.as_ref().expect("client present until drop")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut Client {
        self.client.as_mut().expect("client present until drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if client.is_closed() {
                debug!(target: "tablegate::pool", "discarding closed connection");
            } else {
                self.pool.idle.lock().push(client);
            }
        }
    }
}
