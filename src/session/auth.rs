//! Browser session creation and WhatsApp Web authentication

use crate::session::SessionFactory;
use crate::store::{CredentialSnapshot, SessionStore, StoredCookie};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{
    Cookie, CookieParam, CookieSameSite, TimeSinceEpoch,
};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use url::Url;

/// QR canvas shown when no valid prior credential state exists.
const QR_SELECTOR: &str = r#"canvas[aria-label="Scan me!"]"#;

/// How long to probe for the QR challenge after navigation.
const QR_PROBE: Duration = Duration::from_secs(5);

/// Grace window for an out-of-band QR scan once the challenge is visible.
const PAIRING_GRACE: Duration = Duration::from_secs(30);

/// Upper bound on waiting for the entry page to settle.
const NAVIGATION_WAIT: Duration = Duration::from_secs(45);

/// Polling interval while waiting for an element to appear.
const ELEMENT_POLL: Duration = Duration::from_millis(250);

/// Default viewport dimensions
const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
const DEFAULT_VIEWPORT_HEIGHT: u32 = 800;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
}

/// One authenticated browser context bound to the messaging web client.
pub struct BrowserSession {
    #[allow(dead_code)] // Browser must stay alive for the page to work
    browser: Browser,
    handler_task: JoinHandle<()>,
    pub(crate) page: Page,
    user_data_dir: PathBuf,
}

impl BrowserSession {
    pub(crate) fn user_data_dir(&self) -> &Path {
        &self.user_data_dir
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        // Dropping `browser` kills the Chromium child process.
        self.handler_task.abort();
    }
}

/// Poll for a selector until it appears or the timeout lapses.
pub(crate) async fn find_element_within(
    page: &Page,
    selector: &str,
    timeout: Duration,
) -> Option<Element> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(element) = page.find_element(selector).await {
            return Some(element);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(ELEMENT_POLL).await;
    }
}

/// Establishes sessions against the web client, restoring persisted
/// credentials when available and waiting out the QR pairing window when
/// they are not.
pub struct Authenticator {
    entry_url: Url,
    headful: bool,
    store: Option<SessionStore>,
}

impl Authenticator {
    pub fn new(entry_url: Url, headful: bool, store: Option<SessionStore>) -> Self {
        Self {
            entry_url,
            headful,
            store,
        }
    }

    /// Directory where the fetcher caches downloaded Chromium binaries
    fn fetcher_cache_dir() -> PathBuf {
        let base = std::env::var("HOME").map_or_else(|_| PathBuf::from("/tmp"), PathBuf::from);
        base.join(".cache/wa-relay/chromium")
    }

    fn browser_config(
        &self,
        user_data_dir: &Path,
        executable: Option<&Path>,
    ) -> Result<BrowserConfig, AuthError> {
        // Remove a stale profile dir left by a crashed run; Chrome refuses
        // to start on a held SingletonLock.
        let _ = std::fs::remove_dir_all(user_data_dir);

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer")
            .user_data_dir(user_data_dir)
            .viewport(chromiumoxide::handler::viewport::Viewport {
                width: DEFAULT_VIEWPORT_WIDTH,
                height: DEFAULT_VIEWPORT_HEIGHT,
                device_scale_factor: Some(1.0),
                emulating_mobile: false,
                is_landscape: true,
                has_touch: false,
            });

        builder = if self.headful {
            builder.with_head()
        } else {
            builder.new_headless_mode()
        };

        if let Some(path) = executable {
            builder = builder.chrome_executable(path);
        }

        builder.build().map_err(AuthError::Launch)
    }

    async fn try_launch(
        &self,
        user_data_dir: &Path,
        executable: Option<&Path>,
    ) -> Result<BrowserSession, AuthError> {
        let config = self.browser_config(user_data_dir, executable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AuthError::Launch(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::warn!("CDP handler error: {e}");
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| AuthError::Launch(e.to_string()))?;

        Ok(BrowserSession {
            browser,
            handler_task,
            page,
            user_data_dir: user_data_dir.to_path_buf(),
        })
    }

    /// Launch a browser for a fresh session.
    ///
    /// Tries system Chrome first (zero download). On failure, downloads a
    /// compatible Chromium via `BrowserFetcher` and caches it for future
    /// runs.
    async fn launch_session(&self, user_data_dir: &Path) -> Result<BrowserSession, AuthError> {
        match self.try_launch(user_data_dir, None).await {
            Ok(session) => return Ok(session),
            Err(e) => {
                tracing::info!("System Chrome not available ({e}), trying fetcher...");
            }
        }

        let cache_dir = Self::fetcher_cache_dir();
        tracing::info!("Downloading Chromium to {cache_dir:?} (first run only)...");

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            AuthError::Launch(format!(
                "failed to create cache dir {}: {e}",
                cache_dir.display()
            ))
        })?;

        let fetcher_opts = BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .map_err(|e| AuthError::Launch(format!("fetcher config error: {e}")))?;

        let fetcher = BrowserFetcher::new(fetcher_opts);
        let info = fetcher
            .fetch()
            .await
            .map_err(|e| AuthError::Launch(format!("Chromium download failed: {e:#}")))?;

        self.try_launch(user_data_dir, Some(&info.executable_path))
            .await
    }

    /// Authenticate one session: restore persisted cookies when a snapshot
    /// exists, otherwise wait out the QR pairing window.
    pub async fn authenticate(&self) -> Result<BrowserSession, AuthError> {
        let user_data_dir =
            std::env::temp_dir().join(format!("wa-relay-chrome-{}", uuid::Uuid::new_v4()));
        let session = self.launch_session(&user_data_dir).await?;

        // Inject persisted cookies before the first navigation so the web
        // client sees them on load.
        if let Some(store) = &self.store {
            match store.load() {
                Ok(Some(snapshot)) if !snapshot.is_empty() => {
                    let params = cookie_params(&snapshot);
                    tracing::info!(cookies = params.len(), "restoring persisted credentials");
                    if let Err(e) = session.page.set_cookies(params).await {
                        tracing::warn!(error = %e, "failed to inject persisted cookies");
                    }
                }
                Ok(_) => {
                    tracing::info!("no persisted credentials, pairing may be required");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to load credential snapshot");
                }
            }
        }

        let entry = self.entry_url.as_str();
        session
            .page
            .goto(entry)
            .await
            .map_err(|e| AuthError::Navigation {
                url: entry.to_string(),
                reason: e.to_string(),
            })?;
        if tokio::time::timeout(NAVIGATION_WAIT, session.page.wait_for_navigation())
            .await
            .is_err()
        {
            tracing::debug!(url = entry, "entry page still loading after {NAVIGATION_WAIT:?}");
        }

        // A visible QR challenge means the cookie restore did not take.
        if find_element_within(&session.page, QR_SELECTOR, QR_PROBE)
            .await
            .is_some()
        {
            tracing::info!(
                grace = ?PAIRING_GRACE,
                "pairing challenge visible, waiting for out-of-band scan"
            );
            tokio::time::sleep(PAIRING_GRACE).await;
        } else {
            tracing::info!("no pairing challenge detected, session restored");
        }

        // Persist refreshed cookies for the next run. Failure is logged,
        // never fatal: the live session works without it.
        if let Some(store) = &self.store {
            match session.page.get_cookies().await {
                Ok(cookies) => {
                    let snapshot = snapshot_from(&cookies);
                    match store.save(&snapshot) {
                        Ok(()) => {
                            tracing::debug!(
                                cookies = snapshot.cookies.len(),
                                "credential snapshot persisted"
                            );
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to persist credential snapshot");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to capture session cookies");
                }
            }
        }

        Ok(session)
    }
}

#[async_trait]
impl SessionFactory for Authenticator {
    type Session = BrowserSession;

    async fn create(&self) -> Result<BrowserSession, AuthError> {
        self.authenticate().await
    }

    async fn destroy(&self, session: Arc<BrowserSession>) {
        let dir = session.user_data_dir().to_path_buf();
        // In-flight sends may still hold the Arc; the browser dies when the
        // last clone drops, and the dir cleanup tolerates a live process.
        drop(session);
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            tracing::debug!(path = %dir.display(), error = %e, "browser data dir cleanup failed");
        }
    }
}

fn snapshot_from(cookies: &[Cookie]) -> CredentialSnapshot {
    CredentialSnapshot {
        cookies: cookies
            .iter()
            .map(|c| StoredCookie {
                name: c.name.clone(),
                value: c.value.clone(),
                domain: c.domain.clone(),
                path: c.path.clone(),
                expires: c.expires,
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.as_ref().map(|s| same_site_label(s).to_string()),
            })
            .collect(),
    }
}

fn cookie_params(snapshot: &CredentialSnapshot) -> Vec<CookieParam> {
    snapshot
        .cookies
        .iter()
        .filter_map(|c| {
            let mut builder = CookieParam::builder()
                .name(c.name.as_str())
                .value(c.value.as_str())
                .domain(c.domain.as_str())
                .path(c.path.as_str())
                .http_only(c.http_only)
                .secure(c.secure);
            if c.expires > 0.0 {
                builder = builder.expires(TimeSinceEpoch::new(c.expires));
            }
            if let Some(same_site) = c.same_site.as_deref().and_then(parse_same_site) {
                builder = builder.same_site(same_site);
            }
            match builder.build() {
                Ok(param) => Some(param),
                Err(e) => {
                    tracing::warn!(cookie = %c.name, "skipping unrestorable cookie: {e}");
                    None
                }
            }
        })
        .collect()
}

fn same_site_label(same_site: &CookieSameSite) -> &'static str {
    match same_site {
        CookieSameSite::Strict => "Strict",
        CookieSameSite::Lax => "Lax",
        CookieSameSite::None => "None",
    }
}

fn parse_same_site(label: &str) -> Option<CookieSameSite> {
    match label {
        "Strict" => Some(CookieSameSite::Strict),
        "Lax" => Some(CookieSameSite::Lax),
        "None" => Some(CookieSameSite::None),
        _ => None,
    }
}
