//! Remote sync for the challenge dataset.
//!
//! - [`RemoteStore`]: transport trait (fetch / put / delete / subscribe)
//! - [`HttpRemote`]: REST + event-stream implementation over the hosted
//!   real-time database
//! - [`RemoteSync`]: the adapter the controller sees — reconciliation on
//!   connect, sorted collections at the boundary, bounded push retry
//!
//! There is no conflict resolution: the remote's last-written value wins
//! for all readers, and `put_challenges` overwrites the collection
//! wholesale. Concurrent writers can silently drop each other's edits;
//! acceptable for a single caregiver device, a known risk beyond that.

pub mod http;
pub mod sse;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;

pub use http::HttpRemote;

use crate::config::Config;
use crate::models::{AppData, Challenge, Session};
use crate::store::LocalStore;

/// Whole-collection snapshot delivered to a subscriber.
pub type SnapshotCallback<T> = Box<dyn Fn(Vec<T>) + Send + Sync + 'static>;

/// A remote change delivered through a subscription.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Challenges were updated by another device.
    ChallengesChanged(Vec<Challenge>),
    /// Sessions were updated by another device.
    SessionsChanged(Vec<Session>),
}

/// Transport to the hosted real-time database. The remote shape is two
/// collections, `challenges` and `sessions`, each a map id → record.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Human-readable transport name (e.g. "http").
    fn backend_name(&self) -> &str;

    async fn fetch_challenges(&self) -> Result<Vec<Challenge>>;
    async fn fetch_sessions(&self) -> Result<Vec<Session>>;

    /// Wholesale overwrite of the challenge collection.
    async fn put_challenges(&self, challenges: &[Challenge]) -> Result<()>;
    /// Add or update a single challenge record.
    async fn put_challenge(&self, challenge: &Challenge) -> Result<()>;
    /// Remove a single challenge record.
    async fn delete_challenge(&self, id: &str) -> Result<()>;

    /// Wholesale overwrite of the session collection (initial sync only).
    async fn put_sessions(&self, sessions: &[Session]) -> Result<()>;
    /// Append-or-update a single session record.
    async fn put_session(&self, session: &Session) -> Result<()>;

    /// Continuous whole-collection snapshots until unsubscribed.
    fn subscribe_challenges(&self, callback: SnapshotCallback<Challenge>) -> SubscriptionHandle;
    fn subscribe_sessions(&self, callback: SnapshotCallback<Session>) -> SubscriptionHandle;
}

/// Handle to a live subscription. Unsubscribing stops callback delivery
/// but does not cancel a request already in flight.
#[derive(Clone)]
pub struct SubscriptionHandle {
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SubscriptionHandle {
    /// A handle with nothing behind it, for the unconfigured case.
    pub fn inert() -> Self {
        Self {
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Self {
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Stop callback delivery. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        if let Ok(mut guard) = self.task.lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.task
            .lock()
            .map(|guard| guard.as_ref().map(|t| !t.is_finished()).unwrap_or(false))
            .unwrap_or(false)
    }
}

/// Outcome of a push. `attempts == 0` means the adapter is not
/// configured and nothing left this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReceipt {
    pub attempts: u32,
}

impl PushReceipt {
    fn skipped() -> Self {
        Self { attempts: 0 }
    }

    pub fn was_pushed(&self) -> bool {
        self.attempts > 0
    }
}

/// Result of the connect-time reconciliation. `healthy` is false when the
/// remote was configured but unreachable and `data` fell back to local.
pub struct InitResult {
    pub data: AppData,
    pub healthy: bool,
}

pub struct RemoteSync {
    transport: Option<Arc<dyn RemoteStore>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    push_attempts: u32,
    retry_base: Duration,
}

impl RemoteSync {
    /// An adapter with no remote behind it: every operation is a local
    /// passthrough or a no-op.
    pub fn offline() -> Self {
        Self::with_transport(None, 3, Duration::from_millis(250))
    }

    pub fn new(transport: Arc<dyn RemoteStore>) -> Self {
        Self::with_transport(Some(transport), 3, Duration::from_millis(250))
    }

    /// Build from configuration: a placeholder or incomplete `[remote]`
    /// section means "not configured," never an error.
    pub fn from_config(config: &Config) -> Self {
        if !config.remote.configured() {
            return Self::offline();
        }
        match HttpRemote::new(
            &config.remote.database_url,
            &config.remote.project_id,
            &config.remote.api_key,
            Duration::from_secs(config.sync.reconnect_delay_secs),
        ) {
            Ok(remote) => Self::with_transport(
                Some(Arc::new(remote)),
                config.sync.push_attempts,
                Duration::from_millis(config.sync.retry_base_ms),
            ),
            Err(e) => {
                tracing::warn!("remote transport unavailable, staying local: {e}");
                Self::offline()
            }
        }
    }

    fn with_transport(
        transport: Option<Arc<dyn RemoteStore>>,
        push_attempts: u32,
        retry_base: Duration,
    ) -> Self {
        Self {
            transport,
            subscriptions: Mutex::new(Vec::new()),
            push_attempts: push_attempts.max(1),
            retry_base,
        }
    }

    pub fn configured(&self) -> bool {
        self.transport.is_some()
    }

    pub fn backend_name(&self) -> &str {
        self.transport
            .as_ref()
            .map(|t| t.backend_name())
            .unwrap_or("none")
    }

    /// Connect-time reconciliation. Remote has data → remote wins and is
    /// cached locally. Remote empty → local is pushed wholesale. Errors
    /// fall back to the local dataset.
    pub async fn initialize(&self, store: &LocalStore) -> InitResult {
        let Some(transport) = self.transport.clone() else {
            return InitResult {
                data: store.load(),
                healthy: true,
            };
        };
        match reconcile(transport.as_ref(), store).await {
            Ok(data) => InitResult {
                data,
                healthy: true,
            },
            Err(e) => {
                tracing::warn!("remote initialize failed, falling back to local: {e}");
                InitResult {
                    data: store.load(),
                    healthy: false,
                }
            }
        }
    }

    pub async fn save_challenges(&self, challenges: &[Challenge]) -> Result<PushReceipt> {
        let Some(transport) = &self.transport else {
            return Ok(PushReceipt::skipped());
        };
        self.with_retry("challenge sync", || transport.put_challenges(challenges))
            .await
    }

    pub async fn save_challenge(&self, challenge: &Challenge) -> Result<PushReceipt> {
        let Some(transport) = &self.transport else {
            return Ok(PushReceipt::skipped());
        };
        self.with_retry("challenge sync", || transport.put_challenge(challenge))
            .await
    }

    pub async fn delete_challenge(&self, id: &str) -> Result<PushReceipt> {
        let Some(transport) = &self.transport else {
            return Ok(PushReceipt::skipped());
        };
        self.with_retry("challenge delete", || transport.delete_challenge(id))
            .await
    }

    pub async fn save_session(&self, session: &Session) -> Result<PushReceipt> {
        let Some(transport) = &self.transport else {
            return Ok(PushReceipt::skipped());
        };
        self.with_retry("session sync", || transport.put_session(session))
            .await
    }

    /// Subscribe to challenge snapshots, sorted by order before delivery.
    pub fn subscribe_challenges(
        &self,
        callback: impl Fn(Vec<Challenge>) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let Some(transport) = &self.transport else {
            return SubscriptionHandle::inert();
        };
        let handle = transport.subscribe_challenges(Box::new(move |mut challenges| {
            sort_challenges(&mut challenges);
            callback(challenges);
        }));
        self.track(handle.clone());
        handle
    }

    /// Subscribe to session snapshots, newest first.
    pub fn subscribe_sessions(
        &self,
        callback: impl Fn(Vec<Session>) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        let Some(transport) = &self.transport else {
            return SubscriptionHandle::inert();
        };
        let handle = transport.subscribe_sessions(Box::new(move |mut sessions| {
            sort_sessions(&mut sessions);
            callback(sessions);
        }));
        self.track(handle.clone());
        handle
    }

    /// Detach every live subscription. Safe to call repeatedly.
    pub fn cleanup(&self) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            for handle in subscriptions.drain(..) {
                handle.unsubscribe();
            }
        }
    }

    fn track(&self, handle: SubscriptionHandle) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.push(handle);
        }
    }

    /// Bounded retry with exponential backoff. The last error is returned
    /// to the caller — pushes are not fire-and-forget.
    async fn with_retry<F, Fut>(&self, what: &str, mut op: F) -> Result<PushReceipt>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let mut delay = self.retry_base;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(()) => return Ok(PushReceipt { attempts: attempt }),
                Err(e) if attempt >= self.push_attempts => {
                    return Err(e.context(format!("{what} failed after {attempt} attempts")));
                }
                Err(e) => {
                    tracing::warn!("{what} attempt {attempt} failed, retrying: {e}");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                }
            }
        }
    }
}

impl Drop for RemoteSync {
    fn drop(&mut self) {
        self.cleanup();
    }
}

async fn reconcile(transport: &dyn RemoteStore, store: &LocalStore) -> Result<AppData> {
    let (mut challenges, mut sessions) =
        tokio::try_join!(transport.fetch_challenges(), transport.fetch_sessions())?;

    if challenges.is_empty() {
        // Nothing remote yet — this device seeds the database
        let local = store.load();
        transport.put_challenges(&local.challenges).await?;
        transport.put_sessions(&local.sessions).await?;
        return Ok(local);
    }

    sort_challenges(&mut challenges);
    sort_sessions(&mut sessions);
    let data = AppData {
        challenges,
        sessions,
        current_session: None,
    };
    if !store.save(&data) {
        tracing::warn!("could not cache remote dataset locally");
    }
    Ok(data)
}

pub(crate) fn sort_challenges(challenges: &mut [Challenge]) {
    challenges.sort_by_key(|c| c.order);
}

pub(crate) fn sort_sessions(sessions: &mut [Session]) {
    sessions.sort_by(|a, b| b.date.cmp(&a.date));
}
