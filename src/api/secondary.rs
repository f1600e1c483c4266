//! HTTP client for the secondary (bare-metal) inventory API.
//!
//! The API supports one full listing and nothing incremental, and rate
//! limits aggressively. Callers go through [`crate::api::cache`] instead of
//! hitting this client per node.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::api::{SecondaryApi, SecondaryServer};
use crate::config::ResolverConfig;
use crate::credentials::CredentialStore;
use crate::error::ApiError;

const DEFAULT_BASE_URL: &str = "https://robot-ws.your-server.de";

/// Backoff assumed when a rate-limit response carries no `Retry-After`.
const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(60);

pub struct SecondaryClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
}

impl SecondaryClient {
    pub fn new(credentials: Arc<CredentialStore>, config: &ResolverConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        let base_url = config
            .secondary_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            http,
            base_url,
            credentials,
        }
    }
}

#[derive(Deserialize)]
struct ServerEntry {
    server: SecondaryServer,
}

fn retry_after(response: &reqwest::Response) -> SystemTime {
    let backoff = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF);
    SystemTime::now() + backoff
}

#[async_trait]
impl SecondaryApi for SecondaryClient {
    async fn list_servers(&self) -> Result<Vec<SecondaryServer>, ApiError> {
        const OP: &str = "secondary/list-servers";

        // Credentials are read per call; a hot reload applies to the very
        // next request. The pair is cloned as a unit, never field by field.
        let credentials = self
            .credentials
            .secondary_credentials()
            .ok_or(ApiError::NotConfigured {
                backend: "secondary",
            })?;

        let response = self
            .http
            .get(format!("{}/server", self.base_url))
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await
            .map_err(|e| ApiError::transport(OP, e))?;

        match response.status() {
            // The API reports an empty account as not-found.
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            StatusCode::TOO_MANY_REQUESTS | StatusCode::FORBIDDEN => Err(ApiError::RateLimited {
                retry_after: retry_after(&response),
            }),
            status if status.is_success() => {
                let entries = response
                    .json::<Vec<ServerEntry>>()
                    .await
                    .map_err(|e| ApiError::transport(OP, e))?;
                Ok(entries.into_iter().map(|e| e.server).collect())
            }
            status => Err(ApiError::transport(
                OP,
                format!("unexpected status {status}"),
            )),
        }
    }
}
