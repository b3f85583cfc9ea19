//! Session lifecycle: authentication, pooling, rotation
//!
//! The supervisor owns the pool and the session factory. Sessions retired
//! at quota are replaced asynchronously so senders never wait on a fresh
//! authentication.

pub mod auth;
pub mod pool;

#[cfg(test)]
pub mod testing;

use crate::session::auth::AuthError;
use crate::session::pool::{NoActiveSession, RecordOutcome, SessionId, SessionPool};
use async_trait::async_trait;
use std::sync::Arc;

/// Creates and tears down pooled sessions.
///
/// The production implementation drives a real browser; tests substitute
/// scripted fakes.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    type Session: Send + Sync + 'static;

    async fn create(&self) -> Result<Self::Session, AuthError>;

    /// Release a session's resources. Dropping the last `Arc` must be
    /// sufficient on its own; implementations add any cleanup beyond that
    /// here.
    async fn destroy(&self, session: Arc<Self::Session>) {
        drop(session);
    }
}

/// Owns the session pool and keeps it replenished.
pub struct SessionSupervisor<F: SessionFactory> {
    pool: SessionPool<F::Session>,
    factory: F,
}

impl<F: SessionFactory> SessionSupervisor<F> {
    pub fn new(factory: F, quota: u32) -> Arc<Self> {
        Arc::new(Self {
            pool: SessionPool::new(quota),
            factory,
        })
    }

    /// Authenticate a new session in the background and pool it on success.
    /// Authentication failure is logged; the pool just stays smaller.
    pub fn spawn_session(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            match supervisor.factory.create().await {
                Ok(session) => {
                    let id = supervisor.pool.insert(Arc::new(session)).await;
                    tracing::info!(session = %id, "session authenticated and pooled");
                }
                Err(e) => {
                    tracing::error!(error = %e, "session authentication failed");
                }
            }
        });
    }

    pub async fn checkout(&self) -> Result<(SessionId, Arc<F::Session>), NoActiveSession> {
        self.pool.select().await
    }

    /// Record a successful send. A session that reaches its quota is
    /// retired here, and exactly one replacement is spawned for it.
    pub async fn record_send(self: &Arc<Self>, id: SessionId) {
        match self.pool.record_send(id).await {
            RecordOutcome::Recorded(count) => {
                tracing::debug!(session = %id, count, "send recorded");
            }
            RecordOutcome::Retired(session) => {
                tracing::info!(session = %id, "session reached quota, rotating");
                let supervisor = Arc::clone(self);
                tokio::spawn(async move { supervisor.factory.destroy(session).await });
                self.spawn_session();
            }
            RecordOutcome::Vacant => {
                tracing::warn!(session = %id, "send recorded for a session no longer pooled");
            }
        }
    }

    /// Drop a session the dispatcher deems unrecoverable.
    pub async fn discard(self: &Arc<Self>, id: SessionId) {
        if let Some(session) = self.pool.remove(id).await {
            tracing::warn!(session = %id, "discarding unrecoverable session");
            let supervisor = Arc::clone(self);
            tokio::spawn(async move { supervisor.factory.destroy(session).await });
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.pool.len().await
    }

    /// Release every pooled session. Called once at shutdown.
    pub async fn shutdown(&self) {
        let sessions = self.pool.drain().await;
        let count = sessions.len();
        for session in sessions {
            self.factory.destroy(session).await;
        }
        if count > 0 {
            tracing::info!(count, "released all sessions");
        }
    }

    /// Insert an already-built session, bypassing the factory.
    #[cfg(test)]
    pub(crate) async fn adopt(&self, session: F::Session) -> SessionId {
        self.pool.insert(Arc::new(session)).await
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SessionPool<F::Session> {
        &self.pool
    }

    #[cfg(test)]
    pub(crate) fn factory(&self) -> &F {
        &self.factory
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{wait_until, StubFactory};
    use super::*;

    #[tokio::test]
    async fn spawn_session_fills_the_pool() {
        let factory = StubFactory::reliable();
        let supervisor = SessionSupervisor::new(factory, 10);
        supervisor.spawn_session();
        wait_until(|| {
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.active_sessions().await == 1 }
        })
        .await;
    }

    #[tokio::test]
    async fn failed_authentication_leaves_pool_untouched() {
        let factory = StubFactory::failing();
        let supervisor = SessionSupervisor::new(factory, 10);
        supervisor.spawn_session();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(supervisor.active_sessions().await, 0);
    }

    #[tokio::test]
    async fn quota_retirement_triggers_one_replacement() {
        let factory = StubFactory::reliable();
        let supervisor = SessionSupervisor::new(factory, 1);
        let id = supervisor.adopt(Default::default()).await;
        assert_eq!(supervisor.active_sessions().await, 1);

        // One send at quota 1: the session retires, the pool transiently
        // drops to zero, then the replacement lands.
        supervisor.record_send(id).await;
        wait_until(|| {
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.active_sessions().await == 1 }
        })
        .await;
        assert_eq!(supervisor.factory.created(), 1);
        wait_until(|| {
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.factory.destroyed() == 1 }
        })
        .await;

        // The replacement is a different slot.
        let (replacement, _) = supervisor.checkout().await.unwrap();
        assert_ne!(replacement, id);
    }

    #[tokio::test]
    async fn discard_removes_without_replacement() {
        let factory = StubFactory::reliable();
        let supervisor = SessionSupervisor::new(factory, 10);
        let id = supervisor.adopt(Default::default()).await;

        supervisor.discard(id).await;
        assert_eq!(supervisor.active_sessions().await, 0);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(supervisor.factory.created(), 0);
    }

    #[tokio::test]
    async fn shutdown_destroys_every_session() {
        let factory = StubFactory::reliable();
        let supervisor = SessionSupervisor::new(factory, 10);
        supervisor.adopt(Default::default()).await;
        supervisor.adopt(Default::default()).await;

        supervisor.shutdown().await;
        assert_eq!(supervisor.active_sessions().await, 0);
        assert_eq!(supervisor.factory.destroyed(), 2);
    }
}
