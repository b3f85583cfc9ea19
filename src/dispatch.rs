//! Message dispatch: session selection, throttling, bounded retry
//!
//! Each attempt re-selects from the pool, so a retry never sticks to a
//! session that was retired or discarded in the meantime.

use crate::config::Config;
use crate::session::auth::{find_element_within, BrowserSession};
use crate::session::pool::NoActiveSession;
use crate::session::{SessionFactory, SessionSupervisor};
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Compose box on the chat page; Enter submits the prefilled draft.
const COMPOSE_SELECTOR: &str = r#"div[contenteditable="true"]"#;

/// Upper bound on waiting for the compose box to become interactive.
const COMPOSE_WAIT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum DeliverError {
    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("compose box did not appear within {0:?}")]
    ComposeTimeout(Duration),

    #[error("input dispatch failed: {0}")]
    Input(String),

    #[error("browser session lost: {0}")]
    SessionGone(String),
}

impl DeliverError {
    /// Errors that mean the session itself is dead, not just this attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DeliverError::SessionGone(_))
    }
}

/// One pooled session's ability to push a message through the web client.
#[async_trait]
pub trait MessageSession: Send + Sync + 'static {
    /// Drive the compose deep link: navigate, let the page settle for
    /// `settle`, then submit once the compose box is interactive.
    async fn deliver(
        &self,
        compose: &Url,
        settle: Duration,
        compose_wait: Duration,
    ) -> Result<(), DeliverError>;
}

#[async_trait]
impl MessageSession for BrowserSession {
    async fn deliver(
        &self,
        compose: &Url,
        settle: Duration,
        compose_wait: Duration,
    ) -> Result<(), DeliverError> {
        if let Err(e) = self.page.goto(compose.as_str()).await {
            // A page that no longer answers at all is dead, not slow.
            return Err(if self.page.url().await.is_err() {
                DeliverError::SessionGone(e.to_string())
            } else {
                DeliverError::Navigation(e.to_string())
            });
        }

        tokio::time::sleep(settle).await;

        let compose_box = find_element_within(&self.page, COMPOSE_SELECTOR, compose_wait)
            .await
            .ok_or(DeliverError::ComposeTimeout(compose_wait))?;
        compose_box
            .click()
            .await
            .map_err(|e| DeliverError::Input(e.to_string()))?;
        compose_box
            .press_key("Enter")
            .await
            .map_err(|e| DeliverError::Input(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("send failed after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("invalid compose URL: {0}")]
    ComposeUrl(#[from] url::ParseError),
}

/// Terminal outcome of one dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The pool was empty: a normal, retryable condition while
    /// authentication is still in flight, not a failure.
    NoActiveSessions,
}

/// Relays one message at a time through the least-loaded pooled session.
pub struct Dispatcher<F: SessionFactory> {
    supervisor: Arc<SessionSupervisor<F>>,
    entry_url: Url,
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl<F> Dispatcher<F>
where
    F: SessionFactory,
    F::Session: MessageSession,
{
    pub fn new(supervisor: Arc<SessionSupervisor<F>>, config: &Config) -> Self {
        Self {
            supervisor,
            entry_url: config.entry_url.clone(),
            min_delay: config.min_delay,
            max_delay: config.max_delay,
            max_attempts: config.max_attempts.max(1),
        }
    }

    /// Send `mensaje` to `telefono` through the pool.
    ///
    /// Failed attempts are retried with a fresh session selection up to
    /// `max_attempts` times, with a randomized delay between attempts.
    pub async fn send(&self, telefono: &str, mensaje: &str) -> Result<SendOutcome, DispatchError> {
        let compose = compose_url(&self.entry_url, telefono, mensaje)?;

        for attempt in 1..=self.max_attempts {
            let (id, session) = match self.supervisor.checkout().await {
                Ok(pick) => pick,
                Err(NoActiveSession) => return Ok(SendOutcome::NoActiveSessions),
            };

            match session.deliver(&compose, self.draw_delay(), COMPOSE_WAIT).await {
                Ok(()) => {
                    self.supervisor.record_send(id).await;
                    tracing::info!(telefono, session = %id, attempt, "message sent");
                    return Ok(SendOutcome::Sent);
                }
                Err(e) => {
                    tracing::warn!(telefono, session = %id, attempt, error = %e, "send attempt failed");
                    if e.is_fatal() {
                        self.supervisor.discard(id).await;
                    }
                    if attempt < self.max_attempts {
                        tokio::time::sleep(self.draw_delay()).await;
                    }
                }
            }
        }

        Err(DispatchError::RetriesExhausted {
            attempts: self.max_attempts,
        })
    }

    fn draw_delay(&self) -> Duration {
        random_delay(self.min_delay, self.max_delay)
    }
}

/// Uniform random duration in `[min, max]`, inclusive on both ends.
pub(crate) fn random_delay(min: Duration, max: Duration) -> Duration {
    let lo = min.as_millis() as u64;
    let hi = (max.as_millis() as u64).max(lo);
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

/// Deep-link compose URL: `<entry>/send?phone=<telefono>&text=<mensaje>`.
pub(crate) fn compose_url(
    entry: &Url,
    telefono: &str,
    mensaje: &str,
) -> Result<Url, url::ParseError> {
    let mut url = entry.join("send")?;
    url.set_query(Some(&format!(
        "phone={}&text={}",
        urlencoding::encode(telefono),
        urlencoding::encode(mensaje)
    )));
    Ok(url)
}
