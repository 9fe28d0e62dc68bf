//! Environment-backed runtime configuration for `session-console`.

use std::{env, error::Error, fmt, path::PathBuf, time::Duration};

use handshake_core::HandshakeConfig;
use handshake_gateway::session_socket_url;

const DEFAULT_DATA_DIR_ROOT: &str = "./.session-console-store";
const PROFILE_FILENAME: &str = ".session-console-profile.json";
const DEFAULT_GATEWAY_URL: &str = "http://localhost:8000";
const DEFAULT_PROMPT_TIMEOUT_MS: u64 = 120_000;
const DEFAULT_COMPLETION_GRACE_MS: u64 = 2_000;
const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Runtime configuration used by the console app.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleConfig {
    /// Gateway base URL as given; kept for display.
    pub gateway_url: String,
    /// Handshake endpoint derived from `gateway_url`.
    pub endpoint: String,
    /// Wait bound for the next gateway frame. `0` disables it.
    pub prompt_timeout_ms: u64,
    /// Pause between success and handing control back.
    pub completion_grace_ms: u64,
    /// Upper bound on opening the websocket.
    pub connect_timeout_ms: u64,
    /// Optional prefill for the application id field.
    pub prefill_application_id: Option<String>,
    /// Optional prefill for the phone number field.
    pub prefill_phone_number: Option<String>,
    /// Optional fixed directory for the remembered profile.
    pub data_dir_override: Option<PathBuf>,
}

impl ConsoleConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let gateway_url = optional_trimmed_env("SESSION_CONSOLE_GATEWAY_URL", &mut lookup)
            .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_owned());
        let endpoint =
            session_socket_url(&gateway_url).map_err(|err| ConfigError::InvalidValue {
                key: "SESSION_CONSOLE_GATEWAY_URL",
                value: gateway_url.clone(),
                reason: err.message,
            })?;

        let prompt_timeout_ms = parse_optional_u64_with_default(
            "SESSION_CONSOLE_PROMPT_TIMEOUT_MS",
            DEFAULT_PROMPT_TIMEOUT_MS,
            &mut lookup,
        )?;
        let completion_grace_ms = parse_optional_u64_with_default(
            "SESSION_CONSOLE_COMPLETION_GRACE_MS",
            DEFAULT_COMPLETION_GRACE_MS,
            &mut lookup,
        )?;
        let connect_timeout_ms = parse_optional_u64_with_default(
            "SESSION_CONSOLE_CONNECT_TIMEOUT_MS",
            DEFAULT_CONNECT_TIMEOUT_MS,
            &mut lookup,
        )?;
        if connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "SESSION_CONSOLE_CONNECT_TIMEOUT_MS",
                value: "0".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }

        let prefill_application_id = optional_trimmed_env("SESSION_CONSOLE_API_ID", &mut lookup);
        let prefill_phone_number = optional_trimmed_env("SESSION_CONSOLE_PHONE", &mut lookup);
        let data_dir_override =
            optional_trimmed_env("SESSION_CONSOLE_DATA_DIR", &mut lookup).map(PathBuf::from);

        Ok(Self {
            gateway_url,
            endpoint,
            prompt_timeout_ms,
            completion_grace_ms,
            connect_timeout_ms,
            prefill_application_id,
            prefill_phone_number,
            data_dir_override,
        })
    }

    /// Flow tuning handed to the handshake runtime.
    pub fn handshake_config(&self) -> HandshakeConfig {
        HandshakeConfig {
            endpoint: self.endpoint.clone(),
            prompt_timeout: (self.prompt_timeout_ms > 0)
                .then(|| Duration::from_millis(self.prompt_timeout_ms)),
            completion_grace: Duration::from_millis(self.completion_grace_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Location of the remembered credential profile.
    pub fn profile_path(&self) -> PathBuf {
        match &self.data_dir_override {
            Some(data_dir) => data_dir.join(PROFILE_FILENAME),
            None => PathBuf::from(DEFAULT_DATA_DIR_ROOT).join(PROFILE_FILENAME),
        }
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<u64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}
