//! Application settings
//!
//! All configuration is environment-driven with defaults suitable for a
//! containerized deployment. A `.env` file is honored in development
//! (loaded by `main` before settings are read).

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

/// Worker settings, one field per environment variable.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// AWS region for the secret and object stores
    #[serde(default = "default_aws_region")]
    pub aws_region: String,

    /// Time-series store endpoint; empty disables persistence
    #[serde(default)]
    pub influxdb_endpoint: String,
    #[serde(default = "default_influxdb_port")]
    pub influxdb_port: u16,
    #[serde(default = "default_influxdb_database")]
    pub influxdb_database: String,
    /// Secret holding the store token
    #[serde(default)]
    pub influxdb_secret_arn: String,

    /// News body bucket; empty disables the object store
    #[serde(default)]
    pub data_bucket: String,
    /// Fetch and extract article bodies during the news job
    #[serde(default)]
    pub fetch_news_content: bool,

    /// Secret holding the upstream API keys
    #[serde(default = "default_api_keys_secret_arn")]
    pub api_keys_secret_arn: String,

    #[serde(default = "default_massive_base_url")]
    pub massive_base_url: String,
    /// Real-time socket host (entitled plans)
    #[serde(default = "default_massive_ws_url")]
    pub massive_ws_url: String,
    /// Delayed socket host; this worker's plan streams from here
    #[serde(default = "default_massive_delayed_ws_url")]
    pub massive_delayed_ws_url: String,

    #[serde(default = "default_alpaca_data_url")]
    pub alpaca_data_url: String,
    #[serde(default = "default_alpaca_stream_url")]
    pub alpaca_stream_url: String,

    /// Comma-separated initial watchlist
    #[serde(default = "default_watchlist")]
    pub default_watchlist: String,

    #[serde(default = "default_health_check_port")]
    pub health_check_port: u16,

    #[serde(default = "default_true")]
    pub enable_realtime: bool,
    #[serde(default = "default_true")]
    pub enable_scheduler: bool,
}

fn default_aws_region() -> String {
    "us-west-2".to_string()
}

fn default_influxdb_port() -> u16 {
    8181
}

fn default_influxdb_database() -> String {
    "market_data".to_string()
}

fn default_api_keys_secret_arn() -> String {
    "wavepilot/api-keys".to_string()
}

fn default_massive_base_url() -> String {
    "https://api.massive.com".to_string()
}

fn default_massive_ws_url() -> String {
    "wss://socket.massive.com/stocks".to_string()
}

fn default_massive_delayed_ws_url() -> String {
    "wss://delayed.massive.com/stocks".to_string()
}

fn default_alpaca_data_url() -> String {
    "https://data.alpaca.markets".to_string()
}

fn default_alpaca_stream_url() -> String {
    "wss://stream.data.alpaca.markets/v2/iex".to_string()
}

fn default_watchlist() -> String {
    "AAPL,TSLA,NVDA,AMZN,GOOGL".to_string()
}

fn default_health_check_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Settings {
    /// Load settings from the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Initial watchlist, uppercased, empty entries dropped.
    pub fn watchlist(&self) -> Vec<String> {
        self.default_watchlist
            .split(',')
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// The socket the delayed feed should dial; falls back to the
    /// real-time host when no delayed host is configured.
    pub fn delayed_ws_url(&self) -> &str {
        if self.massive_delayed_ws_url.is_empty() {
            &self.massive_ws_url
        } else {
            &self.massive_delayed_ws_url
        }
    }

    pub fn store_settings(&self) -> crate::storage::StoreSettings {
        crate::storage::StoreSettings {
            endpoint: self.influxdb_endpoint.clone(),
            port: self.influxdb_port,
            database: self.influxdb_database.clone(),
            secret_arn: self.influxdb_secret_arn.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> Settings {
        serde_json::from_str("{}").unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = defaults();
        assert_eq!(settings.aws_region, "us-west-2");
        assert_eq!(settings.influxdb_port, 8181);
        assert_eq!(settings.influxdb_database, "market_data");
        assert_eq!(settings.health_check_port, 8080);
        assert!(settings.enable_realtime);
        assert!(settings.enable_scheduler);
        assert!(!settings.fetch_news_content);
        assert!(settings.influxdb_endpoint.is_empty());
        assert!(settings.data_bucket.is_empty());
    }

    #[test]
    fn test_watchlist_parsing() {
        let mut settings = defaults();
        settings.default_watchlist = " aapl, TSLA ,,nvda".to_string();
        assert_eq!(settings.watchlist(), vec!["AAPL", "TSLA", "NVDA"]);
    }

    #[test]
    fn test_delayed_ws_fallback() {
        let mut settings = defaults();
        assert_eq!(settings.delayed_ws_url(), "wss://delayed.massive.com/stocks");
        settings.massive_delayed_ws_url = String::new();
        assert_eq!(settings.delayed_ws_url(), "wss://socket.massive.com/stocks");
    }
}
