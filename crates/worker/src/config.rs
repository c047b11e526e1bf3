use std::time::Duration;

use relay_comfyui::client::normalize_ws_url;
use relay_comfyui::ReconnectConfig;
use relay_core::admission::AdmissionLimits;
use relay_orchestrator::DEFAULT_DEBOUNCE_WINDOW;

/// Largest accepted `RECONNECT_MAX_SECS`.
pub const MAX_RECONNECT_DELAY_SECS: u64 = 3600;

/// A variable was set to something unusable.
#[derive(Debug, thiserror::Error)]
#[error("{var} is invalid ({value:?}): {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for a ComfyUI instance on localhost.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// REST base URL of the ComfyUI instance.
    pub api_url: String,
    /// Push-channel base URL (`/ws?clientId=` is appended on connect).
    pub ws_url: String,
    pub reconnect: ReconnectConfig,
    pub debounce_window: Duration,
    pub limits: AdmissionLimits,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                | Default                           |
    /// |------------------------|-----------------------------------|
    /// | `COMFYUI_API_URL`      | `http://127.0.0.1:8188`           |
    /// | `COMFYUI_WS_URL`       | API URL with `http`→`ws`          |
    /// | `RECONNECT_BASE_MS`    | `1000` (must be > 0)              |
    /// | `RECONNECT_MULTIPLIER` | `2.0`                             |
    /// | `RECONNECT_MAX_SECS`   | `60` (at most 3600)               |
    /// | `RECONNECT_JITTER`     | `0.1` (must be in `[0, 1)`)       |
    /// | `CONNECT_TIMEOUT_SECS` | `10`                              |
    /// | `DELIVERY_DEBOUNCE_MS` | `1000`                            |
    /// | `MAX_QUEUE_PER_OWNER`  | `3`                               |
    /// | `SCOPE_QUEUE_LIMITS`   | empty; `scope=limit,scope=limit`  |
    /// | `LOG_FORMAT`           | `text` (or `json`)                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let api_url = get("COMFYUI_API_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8188".into())
            .trim()
            .trim_end_matches('/')
            .to_string();
        let ws_url = normalize_ws_url(&get("COMFYUI_WS_URL").unwrap_or_else(|| api_url.clone()));

        let defaults = ReconnectConfig::default();
        let base_ms: u64 = parse(&get, "RECONNECT_BASE_MS", defaults.initial_delay.as_millis() as u64)?;
        let multiplier: f64 = parse(&get, "RECONNECT_MULTIPLIER", defaults.multiplier)?;
        let max_secs: u64 = parse(&get, "RECONNECT_MAX_SECS", defaults.max_delay.as_secs())?;
        let jitter: f64 = parse(&get, "RECONNECT_JITTER", defaults.jitter)?;
        let connect_timeout_secs: u64 = parse(
            &get,
            "CONNECT_TIMEOUT_SECS",
            defaults.connect_timeout.as_secs(),
        )?;

        if base_ms == 0 {
            return Err(invalid("RECONNECT_BASE_MS", base_ms, "must be > 0"));
        }
        if max_secs == 0 || max_secs > MAX_RECONNECT_DELAY_SECS {
            return Err(invalid(
                "RECONNECT_MAX_SECS",
                max_secs,
                &format!("must be in 1..={MAX_RECONNECT_DELAY_SECS}"),
            ));
        }
        if connect_timeout_secs == 0 {
            return Err(invalid("CONNECT_TIMEOUT_SECS", connect_timeout_secs, "must be > 0"));
        }
        if !(multiplier >= 1.0 && multiplier.is_finite()) {
            return Err(invalid("RECONNECT_MULTIPLIER", multiplier, "must be a finite number >= 1"));
        }
        if !(0.0..1.0).contains(&jitter) {
            return Err(invalid("RECONNECT_JITTER", jitter, "must be in [0, 1)"));
        }

        let debounce_ms: u64 = parse(
            &get,
            "DELIVERY_DEBOUNCE_MS",
            DEFAULT_DEBOUNCE_WINDOW.as_millis() as u64,
        )?;

        let default_ceiling: u32 = parse(
            &get,
            "MAX_QUEUE_PER_OWNER",
            relay_core::admission::DEFAULT_MAX_ACTIVE_PER_OWNER,
        )?;
        let mut limits = AdmissionLimits::new(default_ceiling);
        if let Some(raw) = get("SCOPE_QUEUE_LIMITS") {
            for (scope, ceiling) in parse_scope_limits(&raw)? {
                limits = limits.with_scope_ceiling(scope, ceiling);
            }
        }

        let log_format = match get("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => return Err(invalid("LOG_FORMAT", other, "expected `text` or `json`")),
        };

        Ok(Self {
            api_url,
            ws_url,
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(max_secs),
                multiplier,
                jitter,
                connect_timeout: Duration::from_secs(connect_timeout_secs),
            },
            debounce_window: Duration::from_millis(debounce_ms),
            limits,
            log_format,
        })
    }
}

fn parse<T>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError {
            var,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn invalid(var: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parse `scope=limit,scope=limit`.
fn parse_scope_limits(raw: &str) -> Result<Vec<(String, u32)>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (scope, limit) = pair
                .split_once('=')
                .ok_or_else(|| invalid("SCOPE_QUEUE_LIMITS", pair, "expected `scope=limit`"))?;
            let scope = scope.trim();
            if scope.is_empty() {
                return Err(invalid("SCOPE_QUEUE_LIMITS", pair, "empty scope id"));
            }
            let limit = limit
                .trim()
                .parse::<u32>()
                .map_err(|e| invalid("SCOPE_QUEUE_LIMITS", pair, &e.to_string()))?;
            Ok((scope.to_string(), limit))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|var| map.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.api_url, "http://127.0.0.1:8188");
        assert_eq!(config.ws_url, "ws://127.0.0.1:8188");
        assert_eq!(config.reconnect, ReconnectConfig::default());
        assert_eq!(config.debounce_window, Duration::from_secs(1));
        assert_eq!(config.limits, AdmissionLimits::default());
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn ws_url_follows_https_api_url() {
        let config = load(&[("COMFYUI_API_URL", "https://gpu.example:8443/")]).unwrap();
        assert_eq!(config.api_url, "https://gpu.example:8443");
        assert_eq!(config.ws_url, "wss://gpu.example:8443");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config = load(&[("COMFYUI_WS_URL", "ws://other:9000/ws")]).unwrap();
        assert_eq!(config.ws_url, "ws://other:9000");
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("RECONNECT_BASE_MS", "250"),
            ("RECONNECT_MULTIPLIER", "3"),
            ("RECONNECT_MAX_SECS", "10"),
            ("RECONNECT_JITTER", "0.25"),
            ("CONNECT_TIMEOUT_SECS", "3"),
            ("DELIVERY_DEBOUNCE_MS", "2000"),
            ("MAX_QUEUE_PER_OWNER", "5"),
            ("SCOPE_QUEUE_LIMITS", "guild-1=1, guild-2 = 10"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(config.reconnect.initial_delay, Duration::from_millis(250));
        assert_eq!(config.reconnect.multiplier, 3.0);
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(10));
        assert_eq!(config.reconnect.jitter, 0.25);
        assert_eq!(config.reconnect.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.debounce_window, Duration::from_secs(2));
        assert_eq!(config.limits.ceiling_for(None), 5);
        assert_eq!(config.limits.ceiling_for(Some("guild-1")), 1);
        assert_eq!(config.limits.ceiling_for(Some("guild-2")), 10);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = load(&[("MAX_QUEUE_PER_OWNER", "lots")]).unwrap_err();
        assert_eq!(err.var, "MAX_QUEUE_PER_OWNER");
        assert_eq!(err.value, "lots");
    }

    #[test]
    fn jitter_must_be_below_one() {
        assert_matches!(
            load(&[("RECONNECT_JITTER", "1.0")]),
            Err(ConfigError { var: "RECONNECT_JITTER", .. })
        );
        assert_matches!(
            load(&[("RECONNECT_JITTER", "-0.1")]),
            Err(ConfigError { var: "RECONNECT_JITTER", .. })
        );
    }

    #[test]
    fn zero_base_delay_is_rejected() {
        assert_matches!(
            load(&[("RECONNECT_BASE_MS", "0")]),
            Err(ConfigError { var: "RECONNECT_BASE_MS", .. })
        );
    }

    #[test]
    fn max_delay_is_bounded() {
        assert_matches!(
            load(&[
                ("RECONNECT_MAX_SECS", "18446744073709551615"),
                ("RECONNECT_MULTIPLIER", "1e300"),
            ]),
            Err(ConfigError { var: "RECONNECT_MAX_SECS", .. })
        );
        assert_matches!(
            load(&[("RECONNECT_MAX_SECS", "0")]),
            Err(ConfigError { var: "RECONNECT_MAX_SECS", .. })
        );
        let config = load(&[("RECONNECT_MAX_SECS", "3600")]).unwrap();
        assert_eq!(config.reconnect.max_delay, Duration::from_secs(3600));
    }

    #[test]
    fn zero_connect_timeout_is_rejected() {
        assert_matches!(
            load(&[("CONNECT_TIMEOUT_SECS", "0")]),
            Err(ConfigError { var: "CONNECT_TIMEOUT_SECS", .. })
        );
    }

    #[test]
    fn malformed_scope_limits_are_rejected() {
        assert!(load(&[("SCOPE_QUEUE_LIMITS", "guild-1")]).is_err());
        assert!(load(&[("SCOPE_QUEUE_LIMITS", "=3")]).is_err());
        assert!(load(&[("SCOPE_QUEUE_LIMITS", "guild-1=x")]).is_err());
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert_matches!(
            load(&[("LOG_FORMAT", "xml")]),
            Err(ConfigError { var: "LOG_FORMAT", .. })
        );
    }
}
