//! Single-flight access-token renewal.
//!
//! The first caller that hits an authentication failure leads the renewal
//! exchange; callers arriving while it is in flight queue behind it and are
//! released in arrival order once it settles.
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::oneshot;
use tracing::debug;

use crate::security::audit_log::AuditLogger;
use crate::security::session::SessionStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("renewal rejected with status {0}")]
    Rejected(u16),

    #[error("renewal exchange failed: {0}")]
    Exchange(String),

    #[error("renewal abandoned before it settled")]
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Idle,
    Refreshing,
}

type Waiter = oneshot::Sender<Result<(), RefreshError>>;

#[derive(Debug)]
struct RefreshState {
    phase: RefreshPhase,
    waiters: VecDeque<Waiter>,
}

enum Role {
    Leader,
    Follower(oneshot::Receiver<Result<(), RefreshError>>),
}

/// Owns the `Idle`/`Refreshing` state and the waiter queue. One per client;
/// share it through `Arc` when several clients must renew together.
#[derive(Debug)]
pub struct RefreshCoordinator {
    // Never held across an await.
    state: Mutex<RefreshState>,
    session: SessionStore,
    audit: AuditLogger,
    renewals: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(session: SessionStore) -> Self {
        Self {
            state: Mutex::new(RefreshState {
                phase: RefreshPhase::Idle,
                waiters: VecDeque::new(),
            }),
            session,
            audit: AuditLogger::new(),
            renewals: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        match self.state.lock() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        }
    }

    pub fn phase(&self) -> RefreshPhase {
        self.lock().phase
    }

    pub fn queued(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Number of renewal exchanges started so far.
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::SeqCst)
    }

    /// Renew credentials, or wait for the renewal already in flight.
    ///
    /// `exchange` runs only if this caller becomes the leader. On failure the
    /// session is expired once, before any waiter is released.
    pub async fn renew<F, Fut>(&self, exchange: F) -> Result<(), RefreshError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), RefreshError>>,
    {
        let role = {
            let mut state = self.lock();
            match state.phase {
                RefreshPhase::Refreshing => {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(tx);
                    self.audit.refresh_queued(state.waiters.len());
                    Role::Follower(rx)
                }
                RefreshPhase::Idle => {
                    state.phase = RefreshPhase::Refreshing;
                    Role::Leader
                }
            }
        };

        match role {
            Role::Follower(rx) => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
            Role::Leader => self.lead(exchange).await,
        }
    }

    async fn lead<F, Fut>(&self, exchange: F) -> Result<(), RefreshError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), RefreshError>>,
    {
        let mut guard = LeaderGuard {
            coordinator: self,
            armed: true,
        };
        self.renewals.fetch_add(1, Ordering::SeqCst);
        self.audit.refresh_started();

        let outcome = exchange().await;
        if let Err(err) = &outcome {
            self.session.expire().await;
            debug!(error = %err, "renewal failed; session expired");
        }

        let waiters = guard.settle();
        match &outcome {
            Ok(()) => self.audit.refresh_succeeded(waiters.len()),
            Err(err) => self.audit.refresh_failed(&err.to_string(), waiters.len()),
        }
        for waiter in waiters {
            // A waiter whose caller went away is simply skipped.
            let _ = waiter.send(outcome.clone());
        }
        outcome
    }
}

/// Returns the coordinator to `Idle` if the leading task is dropped before
/// the exchange settles. Dropped senders reject the queued waiters.
struct LeaderGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    armed: bool,
}

impl LeaderGuard<'_> {
    fn settle(&mut self) -> VecDeque<Waiter> {
        self.armed = false;
        let mut state = self.coordinator.lock();
        state.phase = RefreshPhase::Idle;
        std::mem::take(&mut state.waiters)
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let dropped = self.settle().len();
            self.coordinator.audit.refresh_abandoned(dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::session::SessionEvent;
    use std::sync::Arc;
    use tokio::sync::Notify;

    async fn succeed() -> Result<(), RefreshError> {
        Ok(())
    }

    async fn never_called() -> Result<(), RefreshError> {
        panic!("followers must not run the exchange")
    }

    fn coordinator() -> Arc<RefreshCoordinator> {
        Arc::new(RefreshCoordinator::new(SessionStore::new()))
    }

    async fn wait_for_queue(c: &RefreshCoordinator, n: usize) {
        while c.queued() < n {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_single_caller_success() {
        let c = coordinator();
        assert_eq!(c.phase(), RefreshPhase::Idle);
        c.renew(succeed).await.unwrap();
        assert_eq!(c.phase(), RefreshPhase::Idle);
        assert_eq!(c.renewals(), 1);
    }

    #[tokio::test]
    async fn test_followers_share_one_exchange() {
        let c = coordinator();
        let gate = Arc::new(Notify::new());

        let leader = {
            let c = c.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                c.renew(|| async move {
                    gate.notified().await;
                    Ok::<(), RefreshError>(())
                })
                .await
            })
        };
        while c.phase() != RefreshPhase::Refreshing {
            tokio::task::yield_now().await;
        }

        let followers: Vec<_> = (0..4)
            .map(|_| {
                let c = c.clone();
                tokio::spawn(async move {
                    c.renew(never_called).await
                })
            })
            .collect();
        wait_for_queue(&c, 4).await;

        gate.notify_one();
        assert!(leader.await.unwrap().is_ok());
        for f in followers {
            assert!(f.await.unwrap().is_ok());
        }
        assert_eq!(c.renewals(), 1);
        assert_eq!(c.phase(), RefreshPhase::Idle);
        assert_eq!(c.queued(), 0);
    }

    #[tokio::test]
    async fn test_waiters_released_in_arrival_order() {
        let c = coordinator();
        let gate = Arc::new(Notify::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        let leader = {
            let c = c.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                c.renew(|| async move {
                    gate.notified().await;
                    Ok::<(), RefreshError>(())
                })
                .await
            })
        };
        while c.phase() != RefreshPhase::Refreshing {
            tokio::task::yield_now().await;
        }

        let mut followers = Vec::new();
        for id in 0..3 {
            let follower = c.clone();
            let order = order.clone();
            followers.push(tokio::spawn(async move {
                let res = follower.renew(succeed).await;
                order.lock().unwrap().push(id);
                res
            }));
            wait_for_queue(&c, id + 1).await;
        }

        gate.notify_one();
        leader.await.unwrap().unwrap();
        for f in followers {
            f.await.unwrap().unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_failure_rejects_everyone_and_expires_once() {
        let session = SessionStore::new();
        let mut events = session.subscribe();
        let c = Arc::new(RefreshCoordinator::new(session.clone()));
        let gate = Arc::new(Notify::new());

        let leader = {
            let c = c.clone();
            let gate = gate.clone();
            tokio::spawn(async move {
                c.renew(|| async move {
                    gate.notified().await;
                    Err::<(), RefreshError>(RefreshError::Rejected(401))
                })
                .await
            })
        };
        while c.phase() != RefreshPhase::Refreshing {
            tokio::task::yield_now().await;
        }
        let followers: Vec<_> = (0..3)
            .map(|_| {
                let c = c.clone();
                tokio::spawn(async move { c.renew(succeed).await })
            })
            .collect();
        wait_for_queue(&c, 3).await;

        gate.notify_one();
        assert_eq!(leader.await.unwrap(), Err(RefreshError::Rejected(401)));
        for f in followers {
            assert_eq!(f.await.unwrap(), Err(RefreshError::Rejected(401)));
        }

        let mut redirects = 0;
        while let Ok(ev) = events.try_recv() {
            if ev == SessionEvent::RedirectToLogin {
                redirects += 1;
            }
        }
        assert_eq!(redirects, 1);
        assert_eq!(c.phase(), RefreshPhase::Idle);
    }

    #[tokio::test]
    async fn test_cancelled_leader_releases_waiters() {
        let c = coordinator();

        let leader = {
            let c = c.clone();
            tokio::spawn(async move {
                c.renew(|| std::future::pending::<Result<(), RefreshError>>())
                    .await
            })
        };
        while c.phase() != RefreshPhase::Refreshing {
            tokio::task::yield_now().await;
        }
        let follower = {
            let c = c.clone();
            tokio::spawn(async move { c.renew(succeed).await })
        };
        wait_for_queue(&c, 1).await;

        leader.abort();
        let _ = leader.await;

        assert_eq!(follower.await.unwrap(), Err(RefreshError::Abandoned));
        assert_eq!(c.phase(), RefreshPhase::Idle);

        // The next failure starts a fresh exchange.
        c.renew(succeed).await.unwrap();
        assert_eq!(c.renewals(), 2);
    }
}
