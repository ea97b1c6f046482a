use std::env;
use std::time::Duration;

use crate::config::ConfigError;
use crate::lifecycle::WaitOptions;
use crate::services::ErrorPolicy;

pub const DEFAULT_PROVIDER: &str = "scaleway";

/// Runtime settings read from the environment (after `.env` has been loaded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub provider: String,
    pub poll_interval: Duration,
    pub max_wait: Option<Duration>,
    pub on_error: ErrorPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: DEFAULT_PROVIDER.to_string(),
            poll_interval: WaitOptions::default().interval,
            max_wait: None,
            on_error: ErrorPolicy::Abort,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut settings = Settings::default();

        if let Some(provider) = get("FLEET_PROVIDER") {
            settings.provider = provider.to_ascii_lowercase();
        }
        if let Some(raw) = get("FLEET_POLL_INTERVAL_SECS") {
            let interval = parse_secs("FLEET_POLL_INTERVAL_SECS", &raw)?;
            if interval.is_zero() {
                return Err(ConfigError::InvalidSetting {
                    name: "FLEET_POLL_INTERVAL_SECS",
                    value: raw,
                });
            }
            settings.poll_interval = interval;
        }
        if let Some(raw) = get("FLEET_MAX_WAIT_SECS") {
            settings.max_wait = Some(parse_secs("FLEET_MAX_WAIT_SECS", &raw)?);
        }
        if let Some(raw) = get("FLEET_ON_ERROR") {
            settings.on_error = raw.parse().map_err(|_| ConfigError::InvalidSetting {
                name: "FLEET_ON_ERROR",
                value: raw.clone(),
            })?;
        }
        Ok(settings)
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            interval: self.poll_interval,
            max_wait: self.max_wait,
        }
    }
}

fn parse_secs(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidSetting {
            name,
            value: raw.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let settings = Settings::from_lookup(lookup(&[])).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.provider, "scaleway");
        assert_eq!(settings.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.max_wait, None);
    }

    #[test]
    fn reads_every_variable() {
        let settings = Settings::from_lookup(lookup(&[
            ("FLEET_PROVIDER", "Mock"),
            ("FLEET_POLL_INTERVAL_SECS", "5"),
            ("FLEET_MAX_WAIT_SECS", "600"),
            ("FLEET_ON_ERROR", "continue"),
        ]))
        .unwrap();
        assert_eq!(settings.provider, "mock");
        assert_eq!(settings.wait_options().interval, Duration::from_secs(5));
        assert_eq!(settings.wait_options().max_wait, Some(Duration::from_secs(600)));
        assert_eq!(settings.on_error, ErrorPolicy::Continue);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let settings = Settings::from_lookup(lookup(&[("FLEET_MAX_WAIT_SECS", "  ")])).unwrap();
        assert_eq!(settings.max_wait, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Settings::from_lookup(lookup(&[("FLEET_POLL_INTERVAL_SECS", "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                name: "FLEET_POLL_INTERVAL_SECS",
                ..
            }
        ));
        assert!(Settings::from_lookup(lookup(&[("FLEET_ON_ERROR", "retry")])).is_err());
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = Settings::from_lookup(lookup(&[("FLEET_POLL_INTERVAL_SECS", "0")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidSetting {
                name: "FLEET_POLL_INTERVAL_SECS",
                ref value,
            } if value == "0"
        ));
        // A zero max wait stays valid: it means a single look without polling.
        let settings = Settings::from_lookup(lookup(&[("FLEET_MAX_WAIT_SECS", "0")])).unwrap();
        assert_eq!(settings.max_wait, Some(Duration::ZERO));
    }
}
