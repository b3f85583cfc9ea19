//! Scripted fakes for exercising rotation and dispatch without a browser.

use crate::dispatch::{DeliverError, MessageSession};
use crate::session::auth::AuthError;
use crate::session::SessionFactory;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Session whose `deliver` outcomes follow a pre-loaded script; once the
/// script is exhausted every delivery succeeds.
#[derive(Default)]
pub struct ScriptedSession {
    script: Mutex<VecDeque<Result<(), DeliverError>>>,
    delivered: Mutex<Vec<Url>>,
}

impl ScriptedSession {
    pub fn with_script(script: Vec<Result<(), DeliverError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delivered: Mutex::new(Vec::new()),
        }
    }

    /// Compose URLs this session attempted, in order.
    pub fn delivered(&self) -> Vec<Url> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageSession for ScriptedSession {
    async fn deliver(
        &self,
        compose: &Url,
        _settle: Duration,
        _compose_wait: Duration,
    ) -> Result<(), DeliverError> {
        self.delivered.lock().unwrap().push(compose.clone());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// Factory that hands out reliable [`ScriptedSession`]s (or always fails),
/// counting creations and destructions.
pub struct StubFactory {
    fail: bool,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl StubFactory {
    pub fn reliable() -> Self {
        Self {
            fail: false,
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::reliable()
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for StubFactory {
    type Session = ScriptedSession;

    async fn create(&self) -> Result<ScriptedSession, AuthError> {
        if self.fail {
            return Err(AuthError::Launch("scripted launch failure".to_string()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedSession::default())
    }

    async fn destroy(&self, session: Arc<ScriptedSession>) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        drop(session);
    }
}

/// Poll `condition` until it holds, panicking after ~1s.
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}
