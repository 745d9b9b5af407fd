//! Vendor configuration.
//!
//! Values come from the process environment first, then from the shared MCP config file
//! (`~/.mcp/configs.json`), where this server reads the `"ipgeo-mcp"` section:
//!
//! ```json
//! { "ipgeo-mcp": { "environments": { "IPAPI_API_TOKEN": "..." } } }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::BaseDirs;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{IpGeoError, Result};

pub const CONFIG_SECTION: &str = "ipgeo-mcp";

pub const IPAPI_API_TOKEN: &str = "IPAPI_API_TOKEN";
pub const IPAPI_BASE_URL: &str = "IPAPI_BASE_URL";
pub const SHOPIFY_STORE_DOMAIN: &str = "SHOPIFY_STORE_DOMAIN";
pub const SHOPIFY_ACCESS_TOKEN: &str = "SHOPIFY_ACCESS_TOKEN";
pub const SHOPIFY_API_VERSION: &str = "SHOPIFY_API_VERSION";
pub const SHOPIFY_BASE_URL: &str = "SHOPIFY_BASE_URL";

const KNOWN_KEYS: &[&str] = &[
    IPAPI_API_TOKEN,
    IPAPI_BASE_URL,
    SHOPIFY_STORE_DOMAIN,
    SHOPIFY_ACCESS_TOKEN,
    SHOPIFY_API_VERSION,
    SHOPIFY_BASE_URL,
];

pub const DEFAULT_SHOPIFY_API_VERSION: &str = "2025-01";

#[derive(Debug, Deserialize)]
struct ConfigSection {
    #[serde(default)]
    environments: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct IpApiConfig {
    pub token: Option<String>,
    /// Overrides both the free and the pro endpoint (tests, proxies).
    pub base_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ShopifyConfig {
    pub store_domain: Option<String>,
    pub access_token: Option<String>,
    pub api_version: String,
    pub base_url: Option<String>,
}

impl Config {
    /// Load from the environment and the default config file. A broken file is logged and
    /// ignored so the server still starts on environment values alone.
    pub fn load() -> Self {
        let file = default_config_path();
        match Self::from_sources(std::env::vars(), file.as_deref()) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(error = %e, "ignoring global config file");
                Self::from_sources(std::env::vars(), None).unwrap_or_default()
            }
        }
    }

    pub fn from_sources(
        env: impl IntoIterator<Item = (String, String)>,
        file: Option<&Path>,
    ) -> Result<Self> {
        let mut values = match file {
            Some(path) if path.exists() => read_config_file(path)?,
            _ => HashMap::new(),
        };

        for (k, v) in env {
            if KNOWN_KEYS.contains(&k.as_str()) && !v.trim().is_empty() {
                values.insert(k, v);
            }
        }

        Ok(Self { values })
    }

    pub fn from_pairs<K: Into<String>, V: Into<String>>(
        pairs: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }

    pub fn ip_api(&self) -> IpApiConfig {
        IpApiConfig {
            token: self.get(IPAPI_API_TOKEN).map(str::to_string),
            base_url: self.get(IPAPI_BASE_URL).map(str::to_string),
        }
    }

    pub fn shopify(&self) -> ShopifyConfig {
        ShopifyConfig {
            store_domain: self.get(SHOPIFY_STORE_DOMAIN).map(str::to_string),
            access_token: self.get(SHOPIFY_ACCESS_TOKEN).map(str::to_string),
            api_version: self
                .get(SHOPIFY_API_VERSION)
                .unwrap_or(DEFAULT_SHOPIFY_API_VERSION)
                .to_string(),
            base_url: self.get(SHOPIFY_BASE_URL).map(str::to_string),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    BaseDirs::new().map(|b| b.home_dir().join(".mcp").join("configs.json"))
}

fn read_config_file(path: &Path) -> Result<HashMap<String, String>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| IpGeoError::Config(format!("read {}: {e}", path.display())))?;
    let mut all: HashMap<String, serde_json::Value> = serde_json::from_str(&raw)?;

    let Some(section) = all.remove(CONFIG_SECTION) else {
        debug!(path = %path.display(), "no {CONFIG_SECTION} section in config file");
        return Ok(HashMap::new());
    };
    let section: ConfigSection = serde_json::from_value(section)?;
    Ok(section.environments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn env_overrides_file_and_unknown_keys_are_dropped() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("configs.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "other-server": { "environments": { "IPAPI_API_TOKEN": "wrong" } },
                "ipgeo-mcp": { "environments": {
                    "IPAPI_API_TOKEN": "from-file",
                    "SHOPIFY_STORE_DOMAIN": "shop.myshopify.com"
                } }
            })
            .to_string(),
        )?;

        let env = vec![
            ("IPAPI_API_TOKEN".to_string(), "from-env".to_string()),
            ("HOME".to_string(), "/root".to_string()),
        ];
        let cfg = Config::from_sources(env, Some(&path))?;

        assert_eq!(cfg.ip_api().token.as_deref(), Some("from-env"));
        assert_eq!(
            cfg.shopify().store_domain.as_deref(),
            Some("shop.myshopify.com")
        );
        assert_eq!(cfg.shopify().api_version, DEFAULT_SHOPIFY_API_VERSION);
        assert_eq!(cfg.get("HOME"), None);
        Ok(())
    }

    #[test]
    fn missing_file_and_section_are_empty() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let cfg = Config::from_sources(Vec::new(), Some(&dir.path().join("nope.json")))?;
        assert!(cfg.ip_api().token.is_none());

        let path = dir.path().join("configs.json");
        std::fs::write(&path, r#"{"someone-else":{}}"#)?;
        let cfg = Config::from_sources(Vec::new(), Some(&path))?;
        assert!(cfg.shopify().access_token.is_none());
        Ok(())
    }

    #[test]
    fn malformed_file_is_an_error() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("configs.json");
        std::fs::write(&path, "{not json")?;
        assert!(Config::from_sources(Vec::new(), Some(&path)).is_err());
        Ok(())
    }

    #[test]
    fn blank_values_count_as_unset() {
        let cfg = Config::from_pairs([(IPAPI_API_TOKEN, "  ")]);
        assert!(cfg.ip_api().token.is_none());
    }
}
