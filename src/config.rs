use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::util::{is_local_endpoint_url, parse_bool_flag};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub api_key: Option<String>,
    pub model: String,
    pub provider: String,
    pub api_url: String,
    pub anthropic_version: String,
    pub bind_addr: String,
    /// Permissive CORS for browser clients; disable behind a gateway that
    /// handles origins itself.
    pub permissive_cors: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        let api_url = std::env::var("REPORTFORGE_API_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string());
        let api_key = std::env::var("REPORTFORGE_API_KEY").ok().and_then(|v| {
            if v.trim().is_empty() {
                None
            } else {
                Some(v)
            }
        });
        let model = std::env::var("REPORTFORGE_MODEL")
            .unwrap_or_else(|_| "claude-sonnet-4-5-20250929".to_string());
        let provider =
            std::env::var("REPORTFORGE_PROVIDER").unwrap_or_else(|_| "anthropic".to_string());
        let anthropic_version =
            std::env::var("REPORTFORGE_ANTHROPIC_VERSION").unwrap_or_else(|_| "2023-06-01".to_string());
        let bind_addr =
            std::env::var("REPORTFORGE_BIND").unwrap_or_else(|_| "127.0.0.1:8787".to_string());
        let permissive_cors = std::env::var("REPORTFORGE_PERMISSIVE_CORS")
            .ok()
            .and_then(parse_bool_flag)
            .unwrap_or(true);

        Ok(Self {
            api_key,
            model,
            provider,
            api_url,
            anthropic_version,
            bind_addr,
            permissive_cors,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            bail!(
                "Invalid REPORTFORGE_API_URL '{}': expected http:// or https:// URL",
                self.api_url
            );
        }

        let local_endpoint = self.is_local_endpoint();
        if !local_endpoint && self.api_key.is_none() {
            bail!(
                "REPORTFORGE_API_KEY must be set for non-local endpoints (url: '{}')",
                self.api_url
            );
        }

        if self.bind_addr.trim().is_empty() {
            bail!("REPORTFORGE_BIND must not be empty");
        }

        Ok(())
    }

    fn is_local_endpoint(&self) -> bool {
        is_local_endpoint_url(&self.api_url)
    }
}
