use crate::config::{ConfigError, NetworkConfig};
use crate::error::ResolutionError;
use crate::resolver::{Credentials, Resolver};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::debug;
use url::Url;

/// Configuration for the HTTP resolver
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds (for exponential backoff cap)
    pub max_retry_delay_ms: u64,
    /// User agent string
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 30000,
            user_agent: format!("xml-invoker/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl From<&NetworkConfig> for HttpClientConfig {
    fn from(network: &NetworkConfig) -> Self {
        let defaults = Self::default();
        Self {
            timeout_seconds: network.timeout_seconds,
            retry_attempts: network.retry_attempts,
            retry_delay_ms: network.retry_delay_ms,
            max_retry_delay_ms: network.max_retry_delay_ms,
            user_agent: network.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }
}

/// Resolver for `http` and `https` URIs
pub struct HttpResolver {
    client: Client,
    config: HttpClientConfig,
}

impl HttpResolver {
    /// Create a new HTTP resolver with the given configuration
    pub fn new(config: HttpClientConfig) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .user_agent(&config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| ConfigError::ClientBuild(e.to_string()))?;

        Ok(Self { client, config })
    }

    pub fn from_network_config(network: &NetworkConfig) -> Result<Self, ConfigError> {
        Self::new(HttpClientConfig::from(network))
    }

    /// Fetch with retry and exponential backoff
    pub async fn fetch(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Bytes, ResolutionError> {
        let response = self.get_response_with_retry(url, credentials).await?;

        if let Some(content_type) = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            && is_multipart(content_type)
        {
            return Err(ResolutionError::Unsupported {
                uri: url.to_string(),
                feature: format!("multipart response body ({})", content_type),
            });
        }

        response.bytes().await.map_err(|e| ResolutionError::Http {
            uri: url.to_string(),
            source: Arc::new(e),
        })
    }

    /// Get response with retry logic
    async fn get_response_with_retry(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Response, ResolutionError> {
        let mut current_attempt = 0;

        loop {
            match self.make_request(url, credentials).await {
                Ok(response) => {
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status = response.status();
                    let error = ResolutionError::HttpStatus {
                        uri: url.to_string(),
                        status: status.as_u16(),
                        message: format!(
                            "HTTP {}: {}",
                            status.as_u16(),
                            status.canonical_reason().unwrap_or("Unknown")
                        ),
                    };

                    // Retry on server errors (5xx) but not client errors (4xx)
                    if status.is_server_error() && current_attempt < self.config.retry_attempts {
                        debug!(uri = %url, status = status.as_u16(), attempt = current_attempt, "retrying");
                        self.wait_before_retry(current_attempt).await;
                        current_attempt += 1;
                        continue;
                    }

                    return Err(error);
                }
                Err(error) => {
                    if current_attempt < self.config.retry_attempts && self.is_retryable_error(&error)
                    {
                        debug!(uri = %url, attempt = current_attempt, error = %error, "retrying");
                        self.wait_before_retry(current_attempt).await;
                        current_attempt += 1;
                        continue;
                    }
                    return Err(error);
                }
            }
        }
    }

    /// Make a single HTTP request with timeout
    async fn make_request(
        &self,
        url: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Response, ResolutionError> {
        let mut request = self.client.get(url.clone());
        if let Some(credentials) = credentials {
            request = request.basic_auth(credentials.username(), credentials.password());
        }

        timeout(self.config.timeout(), request.send())
            .await
            .map_err(|_| ResolutionError::Timeout {
                uri: url.to_string(),
                timeout_seconds: self.config.timeout_seconds,
            })?
            .map_err(|e| ResolutionError::Http {
                uri: url.to_string(),
                source: Arc::new(e),
            })
    }

    /// Wait before retry with exponential backoff
    async fn wait_before_retry(&self, attempt: u32) {
        sleep(self.retry_delay(attempt)).await;
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .config
            .retry_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.config.max_retry_delay_ms))
    }

    /// Check if an error is retryable
    fn is_retryable_error(&self, error: &ResolutionError) -> bool {
        match error {
            ResolutionError::Http { source, .. } => {
                // Retry on network errors, timeouts, but not on invalid URLs or similar
                source.is_timeout() || source.is_connect() || source.is_request()
            }
            ResolutionError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Get the client configuration
    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn get_entity(
        &self,
        uri: &Url,
        credentials: Option<&Credentials>,
    ) -> Result<Bytes, ResolutionError> {
        self.fetch(uri, credentials).await
    }
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("multipart/")
}
