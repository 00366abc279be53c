//! Prerender limits and policy switches.

use pd_core::BrowserError;
use pd_core::BrowserResult;
use std::str::FromStr;
use std::time::Duration;

pub const ENV_MODE: &str = "PIXELDUST_PRERENDER_MODE";
pub const ENV_MAX_ELEMENTS: &str = "PIXELDUST_PRERENDER_MAX_ELEMENTS";
pub const ENV_MAX_BYTES: &str = "PIXELDUST_PRERENDER_MAX_BYTES";
pub const ENV_MAX_RESIDENT_BYTES: &str = "PIXELDUST_PRERENDER_MAX_RESIDENT_BYTES";
pub const ENV_RATE_LIMIT: &str = "PIXELDUST_PRERENDER_RATE_LIMIT";
pub const ENV_HTTPS: &str = "PIXELDUST_PRERENDER_HTTPS";

const MIB: u64 = 1024 * 1024;

/// Whether prerendering runs, and whether it is only simulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrerenderMode {
    Disabled,
    #[default]
    Enabled,
    /// Hosts are admitted and counted but never loaded.
    ControlGroup,
}

impl PrerenderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Enabled => "enabled",
            Self::ControlGroup => "control",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Some(Self::Disabled),
            "enabled" | "on" => Some(Self::Enabled),
            "control" | "control-group" => Some(Self::ControlGroup),
            _ => None,
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrerenderConfig {
    pub mode: PrerenderMode,
    /// Resident host cap; admission past it evicts the oldest host.
    pub max_elements: usize,
    /// Private memory a single host may use.
    pub max_bytes: u64,
    /// Private memory all resident hosts may use together.
    pub max_resident_bytes: u64,
    pub max_age: Duration,
    pub rate_limit_enabled: bool,
    pub min_time_between_prerenders: Duration,
    pub https_allowed: bool,
    pub navigation_record_window: Duration,
    pub history_length: usize,
}

impl Default for PrerenderConfig {
    fn default() -> Self {
        Self {
            mode: PrerenderMode::Enabled,
            max_elements: 1,
            max_bytes: 150 * MIB,
            max_resident_bytes: 300 * MIB,
            max_age: Duration::from_secs(30),
            rate_limit_enabled: true,
            min_time_between_prerenders: Duration::from_millis(500),
            https_allowed: true,
            navigation_record_window: Duration::from_secs(5),
            history_length: 100,
        }
    }
}

impl PrerenderConfig {
    pub fn validate(&self) -> BrowserResult<()> {
        if self.max_elements == 0 {
            return Err(BrowserError::new(
                "prerender.config.max_elements_invalid",
                "at least one prerender must be allowed to stay resident",
            ));
        }

        if self.max_bytes == 0 || self.max_resident_bytes == 0 {
            return Err(BrowserError::new(
                "prerender.config.memory_limit_invalid",
                "memory limits must be non-zero",
            ));
        }

        if self.max_resident_bytes < self.max_bytes {
            return Err(BrowserError::new(
                "prerender.config.memory_limit_invalid",
                format!(
                    "resident ceiling ({} bytes) is below the per-host limit ({} bytes)",
                    self.max_resident_bytes, self.max_bytes
                ),
            ));
        }

        if self.max_age.is_zero() {
            return Err(BrowserError::new(
                "prerender.config.max_age_invalid",
                "prerender max age must be non-zero",
            ));
        }

        Ok(())
    }

    pub fn from_env() -> BrowserResult<Self> {
        Self::from_env_lookup(|key| std::env::var(key).ok())
    }

    /// Applies `PIXELDUST_PRERENDER_*` overrides read through `lookup`.
    pub fn from_env_lookup<F>(lookup: F) -> BrowserResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MODE) {
            config.mode = PrerenderMode::from_name(&value).ok_or_else(|| {
                BrowserError::new(
                    "prerender.config.env_invalid",
                    format!("{ENV_MODE}=`{value}` is not one of disabled, enabled, control"),
                )
            })?;
        }
        if let Some(value) = lookup(ENV_MAX_ELEMENTS) {
            config.max_elements = parse_number(ENV_MAX_ELEMENTS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_BYTES) {
            config.max_bytes = parse_number(ENV_MAX_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_RESIDENT_BYTES) {
            config.max_resident_bytes = parse_number(ENV_MAX_RESIDENT_BYTES, &value)?;
        }
        if let Some(value) = lookup(ENV_RATE_LIMIT) {
            config.rate_limit_enabled = parse_flag(ENV_RATE_LIMIT, &value)?;
        }
        if let Some(value) = lookup(ENV_HTTPS) {
            config.https_allowed = parse_flag(ENV_HTTPS, &value)?;
        }

        config.validate()?;
        log::debug!(
            "prerender config: mode={} max_elements={} rate_limit={} https={}",
            config.mode.as_str(),
            config.max_elements,
            config.rate_limit_enabled,
            config.https_allowed
        );
        Ok(config)
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> BrowserResult<T> {
    value.trim().parse().map_err(|_| {
        BrowserError::new(
            "prerender.config.env_invalid",
            format!("{key}=`{value}` is not a number"),
        )
    })
}

fn parse_flag(key: &str, value: &str) -> BrowserResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BrowserError::new(
            "prerender.config.env_invalid",
            format!("{key}=`{value}` is not a boolean"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::ENV_HTTPS;
    use super::ENV_MAX_ELEMENTS;
    use super::ENV_MAX_RESIDENT_BYTES;
    use super::ENV_MODE;
    use super::ENV_RATE_LIMIT;
    use super::PrerenderConfig;
    use super::PrerenderMode;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<PrerenderConfig, pd_core::BrowserError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
            .collect();
        PrerenderConfig::from_env_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_are_valid() {
        let config = PrerenderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_elements, 1);
        assert!(config.rate_limit_enabled);
        assert!(config.https_allowed);
    }

    #[test]
    fn zero_cap_is_rejected() {
        let config = PrerenderConfig {
            max_elements: 0,
            ..PrerenderConfig::default()
        };
        let error = config.validate().err().map(|error| error.code);
        assert_eq!(error, Some("prerender.config.max_elements_invalid"));
    }

    #[test]
    fn resident_ceiling_must_cover_one_host() {
        let config = PrerenderConfig {
            max_bytes: 10,
            max_resident_bytes: 5,
            ..PrerenderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn env_overrides_are_applied() {
        let config = match config_from(&[
            (ENV_MODE, "control"),
            (ENV_MAX_ELEMENTS, "3"),
            (ENV_MAX_RESIDENT_BYTES, "1073741824"),
            (ENV_RATE_LIMIT, "0"),
            (ENV_HTTPS, "false"),
        ]) {
            Ok(config) => config,
            Err(error) => panic!("{error}"),
        };

        assert_eq!(config.mode, PrerenderMode::ControlGroup);
        assert_eq!(config.max_elements, 3);
        assert_eq!(config.max_resident_bytes, 1 << 30);
        assert!(!config.rate_limit_enabled);
        assert!(!config.https_allowed);
    }

    #[test]
    fn unparseable_number_rejects_the_whole_config() {
        let error = match config_from(&[(ENV_MODE, "control"), (ENV_MAX_ELEMENTS, "many")]) {
            Ok(config) => panic!("override was not rejected: {config:?}"),
            Err(error) => error,
        };
        assert_eq!(error.code, "prerender.config.env_invalid");
        assert!(error.message.contains(ENV_MAX_ELEMENTS));
        assert!(error.message.contains("many"));
    }

    #[test]
    fn unparseable_env_values_are_errors() {
        assert!(config_from(&[(ENV_MAX_ELEMENTS, "many")]).is_err());
        assert!(config_from(&[(ENV_RATE_LIMIT, "maybe")]).is_err());
        assert!(config_from(&[(ENV_MODE, "sometimes")]).is_err());
    }

    #[test]
    fn env_overrides_are_validated() {
        assert!(config_from(&[(ENV_MAX_ELEMENTS, "0")]).is_err());
    }
}
