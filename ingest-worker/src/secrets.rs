//! Secret-store access
//!
//! Secrets are stringified JSON objects mapping names to values. Fetches
//! are cached for the process lifetime; upstream API keys and the
//! time-series store token rotate by redeploy, not at runtime.

use std::collections::HashMap;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use ingest_common::{ErrorCategory, ErrorClassification};

#[derive(Error, Debug)]
pub enum SecretsError {
    #[error("Secret fetch failed for {arn}: {message}")]
    Fetch { arn: String, message: String },

    #[error("Secret {arn} has no value")]
    Empty { arn: String },

    #[error("Secret {arn} is not a JSON object: {message}")]
    Malformed { arn: String, message: String },

    #[error("Secret {arn} is missing key {key}")]
    MissingKey { arn: String, key: String },
}

impl ErrorClassification for SecretsError {
    fn category(&self) -> ErrorCategory {
        match self {
            SecretsError::Fetch { .. } => ErrorCategory::Transient,
            _ => ErrorCategory::Configuration,
        }
    }
}

/// Upstream API credentials resolved from the shared keys secret
#[derive(Debug, Clone)]
pub struct ApiKeys {
    pub alpaca_key: String,
    pub alpaca_secret: String,
    pub massive_key: String,
}

/// Caching client for the secret store.
pub struct SecretsClient {
    client: aws_sdk_secretsmanager::Client,
    cache: Mutex<HashMap<String, HashMap<String, String>>>,
}

impl SecretsClient {
    /// Connect using the ambient AWS environment for `region`.
    pub async fn connect(region: &str) -> Self {
        let config = aws_config::from_env()
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: aws_sdk_secretsmanager::Client::new(&config),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a secret as a name → value map, cached after the first call.
    pub async fn get_secret_map(&self, arn: &str) -> Result<HashMap<String, String>, SecretsError> {
        {
            let cache = self.cache.lock().await;
            if let Some(map) = cache.get(arn) {
                return Ok(map.clone());
            }
        }

        debug!("Fetching secret {}", arn);
        let output = self
            .client
            .get_secret_value()
            .secret_id(arn)
            .send()
            .await
            .map_err(|e| SecretsError::Fetch {
                arn: arn.to_string(),
                message: e.to_string(),
            })?;

        let raw = output.secret_string().ok_or_else(|| SecretsError::Empty {
            arn: arn.to_string(),
        })?;

        let map: HashMap<String, String> =
            serde_json::from_str(raw).map_err(|e| SecretsError::Malformed {
                arn: arn.to_string(),
                message: e.to_string(),
            })?;

        self.cache
            .lock()
            .await
            .insert(arn.to_string(), map.clone());
        Ok(map)
    }

    /// Resolve the upstream API key set.
    pub async fn api_keys(&self, arn: &str) -> Result<ApiKeys, SecretsError> {
        let map = self.get_secret_map(arn).await?;
        let get = |key: &str| {
            map.get(key).cloned().ok_or_else(|| SecretsError::MissingKey {
                arn: arn.to_string(),
                key: key.to_string(),
            })
        };
        Ok(ApiKeys {
            alpaca_key: get("ALPACA_API_KEY")?,
            alpaca_secret: get("ALPACA_API_SECRET")?,
            massive_key: get("MASSIVE_API_KEY")?,
        })
    }

    /// Resolve the time-series store token (`token`, falling back to
    /// `password` for older secret layouts).
    pub async fn database_token(&self, arn: &str) -> Result<String, SecretsError> {
        let map = self.get_secret_map(arn).await?;
        map.get("token")
            .or_else(|| map.get("password"))
            .cloned()
            .ok_or_else(|| SecretsError::MissingKey {
                arn: arn.to_string(),
                key: "token".to_string(),
            })
    }
}
