//! Configuration loading and validation.

use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let config: Config = serde_json::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    if config.redirect_uri.trim().is_empty() {
        return Err(ConfigError::Validation {
            message: "redirect_uri must not be empty".to_string(),
        });
    }
    if !config.redirect_uri.starts_with("http://") && !config.redirect_uri.starts_with("https://") {
        return Err(ConfigError::Validation {
            message: format!("redirect_uri is not a URL: {}", config.redirect_uri),
        });
    }

    if config.list_page_size == 0 {
        return Err(ConfigError::Validation {
            message: "list_page_size must be at least 1".to_string(),
        });
    }

    let configured: Vec<(&str, &crate::config::schema::OAuthClientConfig)> = [
        ("gmail", config.providers.gmail.as_ref()),
        ("outlook", config.providers.outlook.as_ref()),
    ]
    .into_iter()
    .filter_map(|(name, cfg)| cfg.map(|c| (name, c)))
    .collect();

    if configured.is_empty() {
        return Err(ConfigError::Validation {
            message: "At least one provider must be configured".to_string(),
        });
    }

    for (name, client) in configured {
        if client.client_id.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("Provider '{}' has an empty client_id", name),
            });
        }
        if !client.has_secret() {
            return Err(ConfigError::Validation {
                message: format!(
                    "Provider '{}' needs a client secret (inline, file, or env var)",
                    name
                ),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_json() -> serde_json::Value {
        serde_json::json!({
            "version": "1.0",
            "redirect_uri": "https://app.example/oauth/callback",
            "providers": {
                "gmail": {
                    "client_id": "gmail-client",
                    "client_secret": "gmail-secret"
                },
                "outlook": {
                    "client_id": "outlook-client",
                    "client_secret_env_var": "OUTLOOK_SECRET"
                }
            }
        })
    }

    #[test]
    fn test_load_valid_config() {
        let config = load_config_from_str(&valid_json().to_string()).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.list_page_size, 25);
        assert!(config.providers.gmail.is_some());
        assert!(config.providers.outlook.is_some());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, valid_json().to_string()).unwrap();

        assert!(load_config(&path).is_ok());
        assert!(matches!(
            load_config(dir.path().join("missing.json")),
            Err(ConfigError::ReadFile { .. })
        ));
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let mut json = valid_json();
        json["version"] = "2.0".into();
        assert!(matches!(
            load_config_from_str(&json.to_string()),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_missing_redirect_uri_rejected() {
        let mut json = valid_json();
        json["redirect_uri"] = "".into();
        assert!(matches!(
            load_config_from_str(&json.to_string()),
            Err(ConfigError::Validation { .. })
        ));

        json["redirect_uri"] = "not-a-url".into();
        assert!(matches!(
            load_config_from_str(&json.to_string()),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_no_providers_rejected() {
        let mut json = valid_json();
        json["providers"] = serde_json::json!({});
        assert!(matches!(
            load_config_from_str(&json.to_string()),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_provider_without_secret_rejected() {
        let mut json = valid_json();
        json["providers"]["gmail"] = serde_json::json!({ "client_id": "gmail-client" });
        assert!(matches!(
            load_config_from_str(&json.to_string()),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn test_single_provider_is_enough() {
        let json = serde_json::json!({
            "version": "1.0",
            "redirect_uri": "https://app.example/cb",
            "providers": {
                "gmail": {"client_id": "id", "client_secret": "secret"}
            }
        });
        let config = load_config_from_str(&json.to_string()).unwrap();
        assert!(config.providers.outlook.is_none());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(matches!(
            load_config_from_str("{not json"),
            Err(ConfigError::ParseJson(_))
        ));
    }
}
