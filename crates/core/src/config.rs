use std::path::PathBuf;
use tracing::Level;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000";
pub const DEFAULT_REALTIME_URL: &str = "https://api.openai.com/v1/realtime";
pub const DEFAULT_REALTIME_MODEL: &str = "gpt-4o-realtime-preview-2024-12-17";
pub const DEFAULT_PREFS_PATH: &str = "./voicedesk-prefs.json";

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Client-side settings loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Origin of the same-origin API (`/api/token`, `/api/web-search`, ...).
    pub base_url: String,
    /// Hosted realtime negotiation endpoint.
    pub realtime_url: String,
    pub realtime_model: String,
    pub prefs_path: PathBuf,
    pub log_level: Level,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            realtime_url: DEFAULT_REALTIME_URL.to_string(),
            realtime_model: DEFAULT_REALTIME_MODEL.to_string(),
            prefs_path: PathBuf::from(DEFAULT_PREFS_PATH),
            log_level: Level::INFO,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let base_url =
            std::env::var("VOICEDESK_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(
                "VOICEDESK_BASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", base_url),
            ));
        }

        let realtime_url =
            std::env::var("REALTIME_URL").unwrap_or_else(|_| DEFAULT_REALTIME_URL.to_string());
        let realtime_model =
            std::env::var("REALTIME_MODEL").unwrap_or_else(|_| DEFAULT_REALTIME_MODEL.to_string());

        let prefs_path = std::env::var("VOICEDESK_PREFS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_PREFS_PATH));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            base_url,
            realtime_url,
            realtime_model,
            prefs_path,
            log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("VOICEDESK_BASE_URL");
            env::remove_var("REALTIME_URL");
            env::remove_var("REALTIME_MODEL");
            env::remove_var("VOICEDESK_PREFS_PATH");
            env::remove_var("RUST_LOG");
        }
    }

    #[test]
    fn test_config_error_display() {
        let invalid = ConfigError::InvalidValue("RUST_LOG".to_string(), "'loud'".to_string());
        assert_eq!(
            format!("{}", invalid),
            "Invalid value for environment variable RUST_LOG: 'loud'"
        );
    }

    #[test]
    #[serial]
    fn test_client_config_defaults() {
        clear_env_vars();

        let config = ClientConfig::from_env().expect("Config should load successfully");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.realtime_url, DEFAULT_REALTIME_URL);
        assert_eq!(config.realtime_model, DEFAULT_REALTIME_MODEL);
        assert_eq!(config.prefs_path, PathBuf::from(DEFAULT_PREFS_PATH));
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    #[serial]
    fn test_client_config_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("VOICEDESK_BASE_URL", "https://desk.example.com");
            env::set_var("REALTIME_URL", "https://realtime.example.com/v1/realtime");
            env::set_var("REALTIME_MODEL", "gpt-realtime");
            env::set_var("VOICEDESK_PREFS_PATH", "/tmp/prefs.json");
            env::set_var("RUST_LOG", "debug");
        }

        let config = ClientConfig::from_env().expect("Config should load successfully");
        assert_eq!(config.base_url, "https://desk.example.com");
        assert_eq!(config.realtime_url, "https://realtime.example.com/v1/realtime");
        assert_eq!(config.realtime_model, "gpt-realtime");
        assert_eq!(config.prefs_path, PathBuf::from("/tmp/prefs.json"));
        assert_eq!(config.log_level, Level::DEBUG);
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_client_config_invalid_base_url() {
        clear_env_vars();
        unsafe {
            env::set_var("VOICEDESK_BASE_URL", "localhost:3000");
        }

        let err = ClientConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "VOICEDESK_BASE_URL"),
            _ => panic!("Expected InvalidValue for VOICEDESK_BASE_URL"),
        }
        clear_env_vars();
    }

    #[test]
    #[serial]
    fn test_client_config_invalid_log_level() {
        clear_env_vars();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = ClientConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
        clear_env_vars();
    }
}
