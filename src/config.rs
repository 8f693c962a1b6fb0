use std::env;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tracing::{info, warn};

use crate::model::{ExecutionMode, SuggestionParams};
use crate::pipeline::PipelineSettings;

/// Complete application configuration, loaded from environment variables or default values.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub backend: BackendConfig,
    pub rearrangement: RearrangementConfig,
}

impl AppConfig {
    /// Creates a configuration from the currently available environment variables.
    pub fn from_env() -> Self {
        Self {
            api: ApiConfig::from_env(),
            backend: BackendConfig::from_env(),
            rearrangement: RearrangementConfig::from_env(),
        }
    }
}

/// Configuration for the API server.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    bind_ip: IpAddr,
    display_host: String,
    port: u16,
}

impl ApiConfig {
    const DEFAULT_HOST: &'static str = "0.0.0.0";
    const DEFAULT_PORT: u16 = 8080;

    fn from_env() -> Self {
        let host_value =
            env_string("STOWAGE_API_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let (bind_ip, effective_host) = match host_value.parse::<IpAddr>() {
            Ok(ip) => (ip, host_value),
            Err(err) => {
                warn!(
                    "⚠️ Could not parse STOWAGE_API_HOST ('{}'): {}. Using {}.",
                    host_value,
                    err,
                    Self::DEFAULT_HOST
                );
                (
                    IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                    Self::DEFAULT_HOST.to_string(),
                )
            }
        };

        let port = match env_string("STOWAGE_API_PORT") {
            Some(raw) => match raw.parse::<u16>() {
                Ok(value) if value != 0 => value,
                Ok(_) => {
                    warn!(
                        "⚠️ STOWAGE_API_PORT must not be 0. Using {}.",
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
                Err(err) => {
                    warn!(
                        "⚠️ Could not parse STOWAGE_API_PORT ('{}'): {}. Using {}.",
                        raw,
                        err,
                        Self::DEFAULT_PORT
                    );
                    Self::DEFAULT_PORT
                }
            },
            None => Self::DEFAULT_PORT,
        };

        Self {
            bind_ip,
            display_host: effective_host,
            port,
        }
    }

    /// Socket address to bind the server to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }

    /// Visible hostname for logging and hints.
    pub fn display_host(&self) -> &str {
        &self.display_host
    }

    /// Configured port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Indicates whether binding to all interfaces.
    pub fn binds_to_all_interfaces(&self) -> bool {
        match self.bind_ip {
            IpAddr::V4(addr) => addr == Ipv4Addr::UNSPECIFIED,
            IpAddr::V6(addr) => addr == Ipv6Addr::UNSPECIFIED,
        }
    }
}

/// Where the external placement backend lives and how to talk to it.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    base_url: String,
    timeout: Duration,
}

impl BackendConfig {
    const DEFAULT_BASE_URL: &'static str = "http://localhost:8000";
    const DEFAULT_TIMEOUT_SECS: u64 = 30;

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn from_env() -> Self {
        let base_url = match env_string("STOWAGE_BACKEND_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => url,
            Some(url) => {
                warn!(
                    "⚠️ STOWAGE_BACKEND_URL ('{}') must start with http:// or https://. Using {}.",
                    url,
                    Self::DEFAULT_BASE_URL
                );
                Self::DEFAULT_BASE_URL.to_string()
            }
            None => Self::DEFAULT_BASE_URL.to_string(),
        };

        let timeout_secs = match env_string("STOWAGE_HTTP_TIMEOUT_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(0) => Self::DEFAULT_TIMEOUT_SECS,
                Ok(value) => value,
                Err(err) => {
                    warn!(
                        "⚠️ Could not parse STOWAGE_HTTP_TIMEOUT_SECS ('{}'): {}. Using {}s.",
                        raw,
                        err,
                        Self::DEFAULT_TIMEOUT_SECS
                    );
                    Self::DEFAULT_TIMEOUT_SECS
                }
            },
            None => Self::DEFAULT_TIMEOUT_SECS,
        };

        Self::new(base_url, Duration::from_secs(timeout_secs))
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Per-request timeout for backend calls.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Configuration for planning and executing rearrangements.
#[derive(Clone, Debug)]
pub struct RearrangementConfig {
    settings: PipelineSettings,
}

impl RearrangementConfig {
    const FALLBACK_CAPACITY_VAR: &'static str = "STOWAGE_FALLBACK_CAPACITY";
    const EXECUTION_MODE_VAR: &'static str = "STOWAGE_EXECUTION_MODE";
    const REFRESH_VAR: &'static str = "STOWAGE_REFRESH_AFTER_EXECUTE";
    const USER_ID_VAR: &'static str = "STOWAGE_USER_ID";
    const PRIORITY_THRESHOLD_VAR: &'static str = "STOWAGE_PRIORITY_THRESHOLD";
    const MAX_MOVEMENTS_VAR: &'static str = "STOWAGE_MAX_MOVEMENTS";
    const SPACE_TARGET_VAR: &'static str = "STOWAGE_SPACE_TARGET";

    fn from_env() -> Self {
        let fallback_capacity = load_u32_with_warning(
            Self::FALLBACK_CAPACITY_VAR,
            PipelineSettings::DEFAULT_FALLBACK_CAPACITY,
            |_| true,
            "must be a non-negative integer",
            "Assuming a non-default capacity for containers the inventory does not size",
        );

        let execution_mode = env_string(Self::EXECUTION_MODE_VAR)
            .and_then(|raw| match raw.parse::<ExecutionMode>() {
                Ok(mode) => Some(mode),
                Err(err) => {
                    warn!(
                        "⚠️ {}: {}. Using default value.",
                        Self::EXECUTION_MODE_VAR,
                        err
                    );
                    None
                }
            })
            .unwrap_or_default();

        let refresh_after_execute = env_string(Self::REFRESH_VAR)
            .and_then(|raw| parse_bool(&raw, Self::REFRESH_VAR))
            .unwrap_or(PipelineSettings::DEFAULT_REFRESH_AFTER_EXECUTE);

        let user_id = env_string(Self::USER_ID_VAR)
            .unwrap_or_else(|| PipelineSettings::DEFAULT_USER_ID.to_string());

        let priority_threshold = load_f64_with_warning(
            Self::PRIORITY_THRESHOLD_VAR,
            SuggestionParams::DEFAULT_PRIORITY_THRESHOLD,
            |value| value >= 0.0,
            "must not be negative",
            "Adjusted priority threshold changes which items get suggested",
        );

        let max_movements = load_u32_with_warning(
            Self::MAX_MOVEMENTS_VAR,
            SuggestionParams::DEFAULT_MAX_MOVEMENTS,
            |value| value >= 1,
            "must be at least 1",
            "Adjusted movement limit changes plan sizes",
        );

        let space_target = load_f64_with_warning(
            Self::SPACE_TARGET_VAR,
            SuggestionParams::DEFAULT_SPACE_TARGET,
            |value| (0.0..=1.0).contains(&value),
            "must be between 0 and 1",
            "Adjusted space target changes how aggressively containers are emptied",
        );

        let settings = PipelineSettings::builder()
            .fallback_capacity(fallback_capacity)
            .execution_mode(execution_mode)
            .refresh_after_execute(refresh_after_execute)
            .user_id(user_id)
            .default_params(SuggestionParams {
                priority_threshold,
                max_movements,
                space_target,
            })
            .build();

        Self { settings }
    }

    /// Returns the configured pipeline settings.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        self.settings.clone()
    }
}

fn env_string(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_owned())
            }
        }
        Err(env::VarError::NotPresent) => None,
        Err(err) => {
            warn!(
                "⚠️ Access to {} failed: {}. Using default value.",
                name, err
            );
            None
        }
    }
}

fn parse_bool(raw: &str, var_name: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        other => {
            warn!(
                "⚠️ Could not interpret {} ('{}') as boolean value. Using default value.",
                var_name, other
            );
            None
        }
    }
}

fn load_f64_with_warning(
    var_name: &str,
    default: f64,
    validator: impl Fn(f64) -> bool,
    invalid_hint: &str,
    notice: &str,
) -> f64 {
    let Some(raw) = env_string(var_name) else {
        return default;
    };
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && validator(value) => {
            let tolerance = (default.abs().max(1.0)) * 1e-9;
            if (value - default).abs() > tolerance {
                info!("ℹ️ {} ({} = {}).", notice, var_name, value);
            }
            value
        }
        Ok(_) => {
            warn!(
                "⚠️ {} contains invalid value '{}': {}. Using {}.",
                var_name, raw, invalid_hint, default
            );
            default
        }
        Err(err) => {
            warn!(
                "⚠️ Could not parse {} ('{}') as number: {}. Using {}.",
                var_name, raw, err, default
            );
            default
        }
    }
}

fn load_u32_with_warning(
    var_name: &str,
    default: u32,
    validator: impl Fn(u32) -> bool,
    invalid_hint: &str,
    notice: &str,
) -> u32 {
    let Some(raw) = env_string(var_name) else {
        return default;
    };
    match raw.parse::<u32>() {
        Ok(value) if validator(value) => {
            if value != default {
                info!("ℹ️ {} ({} = {}).", notice, var_name, value);
            }
            value
        }
        Ok(_) => {
            warn!(
                "⚠️ {} contains invalid value '{}': {}. Using {}.",
                var_name, raw, invalid_hint, default
            );
            default
        }
        Err(err) => {
            warn!(
                "⚠️ Could not parse {} ('{}') as {}: {}. Using {}.",
                var_name, raw, invalid_hint, err, default
            );
            default
        }
    }
}
