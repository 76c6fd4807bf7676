use crate::types::is_valid_uri;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WampConfig {
    pub url: String,
    pub realm: String,
    pub agent: String,
    pub connect_timeout: Duration,
    /// Ask the broker to confirm each publication with PUBLISHED.
    pub acknowledge_publish: bool,
}

impl Default for WampConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/ws".to_string(),
            realm: "realm1".to_string(),
            agent: format!("afterglow-wamp/{}", env!("CARGO_PKG_VERSION")),
            connect_timeout: Duration::from_secs(10),
            acknowledge_publish: false,
        }
    }
}

impl WampConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_acknowledged_publish(mut self, acknowledge: bool) -> Self {
        self.acknowledge_publish = acknowledge;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Router URL cannot be empty".to_string());
        }

        if !self.url.starts_with("ws://") && !self.url.starts_with("wss://") {
            return Err("Router URL must start with ws:// or wss://".to_string());
        }

        if !is_valid_uri(&self.realm) {
            return Err(format!("Realm '{}' is not a valid WAMP URI", self.realm));
        }

        if self.connect_timeout.is_zero() {
            return Err("Connect timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
