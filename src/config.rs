//! Runtime configuration from environment variables

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_ENTRY_URL: &str = "https://web.whatsapp.com";

#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen port.
    pub port: u16,
    /// Messages a session may send before mandatory rotation.
    pub quota: u32,
    /// Inter-send throttle bounds.
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Dispatch attempts before giving up on a message.
    pub max_attempts: u32,
    /// Sessions authenticated at startup.
    pub initial_sessions: usize,
    /// Credential snapshot database; `None` runs ephemeral.
    pub db_path: Option<PathBuf>,
    /// Run the browser with a visible window for QR pairing.
    pub headful: bool,
    /// Web client entry page.
    pub entry_url: Url,
}

impl Default for Config {
    fn default() -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        Self {
            port: 3000,
            quota: 50,
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
            max_attempts: 5,
            initial_sessions: 1,
            db_path: Some(PathBuf::from(format!("{home}/.wa-relay/wa-relay.db"))),
            headful: false,
            entry_url: Url::parse(DEFAULT_ENTRY_URL).expect("default entry URL parses"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let min_delay = Duration::from_millis(env_or(
            "WA_RELAY_MIN_DELAY_MS",
            defaults.min_delay.as_millis() as u64,
        ));
        // An inverted interval collapses to the minimum.
        let max_delay = Duration::from_millis(env_or(
            "WA_RELAY_MAX_DELAY_MS",
            defaults.max_delay.as_millis() as u64,
        ))
        .max(min_delay);

        let db_path = if env_flag("WA_RELAY_EPHEMERAL") {
            None
        } else {
            std::env::var("WA_RELAY_DB_PATH")
                .ok()
                .map(PathBuf::from)
                .or(defaults.db_path)
        };

        let entry_url = std::env::var("WA_RELAY_ENTRY_URL")
            .ok()
            .and_then(|raw| Url::parse(&raw).ok())
            .unwrap_or(defaults.entry_url);

        Self {
            port: env_or("WA_RELAY_PORT", defaults.port),
            quota: env_or("WA_RELAY_QUOTA", defaults.quota).max(1),
            min_delay,
            max_delay,
            max_attempts: env_or("WA_RELAY_MAX_ATTEMPTS", defaults.max_attempts).max(1),
            initial_sessions: env_or("WA_RELAY_SESSIONS", defaults.initial_sessions),
            db_path,
            headful: env_flag("WA_RELAY_HEADFUL"),
            entry_url,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|raw| raw == "1" || raw.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
