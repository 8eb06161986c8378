use secrecy::{ExposeSecret, SecretString};

use crate::client::consts::{BASE_URL, DEFAULT_MODEL, OPENAI_API_KEY};
use crate::error::ConfigError;

/// Where and how the websocket client connects.
pub struct Config {
    base_url: String,
    api_key: SecretString,
    model: String,
    /// Replaces the direct endpoint; no key is sent to a relay.
    relay_url: Option<String>,
}

pub struct ConfigBuilder {
    config: Config,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.config.api_key = SecretString::from(api_key.to_string());
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.config.model = model.to_string();
        self
    }

    pub fn with_relay_url(mut self, relay_url: &str) -> Self {
        self.config.relay_url = Some(relay_url.to_string());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Defaults, with the key taken from `OPENAI_API_KEY` when set.
    pub fn new() -> Self {
        Self {
            base_url: BASE_URL.to_string(),
            api_key: std::env::var(OPENAI_API_KEY).unwrap_or_default().into(),
            model: DEFAULT_MODEL.to_string(),
            relay_url: None,
        }
    }

    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn relay_url(&self) -> Option<&str> {
        self.relay_url.as_deref()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay_url.is_some() {
            return Ok(());
        }
        if self.base_url.is_empty() || self.api_key.expose_secret().is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("relay_url", &self.relay_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_is_rejected_unless_relayed() {
        let config = Config::builder().with_api_key("").build();
        assert!(matches!(config.validate(), Err(ConfigError::MissingCredential)));

        let relayed = Config::builder().with_api_key("").with_relay_url("ws://localhost:8081").build();
        assert!(relayed.validate().is_ok());

        let direct = Config::builder().with_api_key("sk-test").build();
        assert!(direct.validate().is_ok());
    }
}
