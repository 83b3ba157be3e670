use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Classified result of a single probe. Transport errors never cross the
/// probe boundary as `Err`; they land here as variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Outcome {
    Success(u16),
    Timeout,
    ConnectionError,
    OtherError(String),
}

impl Outcome {
    /// Status column text: the decimal code for completed requests,
    /// a fixed sentinel for transport failures.
    pub fn status_text(&self) -> String {
        match self {
            Outcome::Success(code) => code.to_string(),
            Outcome::Timeout => "TIMEOUT".to_string(),
            Outcome::ConnectionError => "CONNECTION ERROR".to_string(),
            Outcome::OtherError(_) => "ERROR".to_string(),
        }
    }

    /// Human-readable issue text for cards, alert mails and the CSV export.
    pub fn issue(&self) -> String {
        match self {
            Outcome::Success(code) => status_issue(*code).to_string(),
            Outcome::Timeout => "API did not respond in time".to_string(),
            Outcome::ConnectionError => "Connection failed".to_string(),
            Outcome::OtherError(msg) => msg.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub timestamp: DateTime<Local>,
    pub endpoint: String,
    pub outcome: Outcome,
    /// Present only for `Success`, in milliseconds rounded to two decimals.
    pub latency_ms: Option<f64>,
}

/// Derived per-endpoint health, computed from the latest buffered result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

/// Label text for common HTTP codes. Cosmetic only; classification never
/// branches on these strings.
pub fn status_issue(code: u16) -> &'static str {
    match code {
        200 => "OK – API working normally",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Timeout",
        429 => "Rate Limited",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown status",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub enabled: bool,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            from: String::new(),
            to: String::new(),
        }
    }
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Endpoints watched from startup. The watch list can be edited at
    /// runtime over the API; edits are not written back.
    #[serde(default)]
    pub endpoints: Vec<String>,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            endpoints: Vec::new(),
            alert: AlertConfig::default(),
            buffer_capacity: default_buffer_capacity(),
            probe_timeout_secs: default_probe_timeout_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_buffer_capacity() -> usize {
    1000
}

fn default_probe_timeout_secs() -> u64 {
    10
}

fn default_poll_interval_secs() -> u64 {
    3
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}
