//! HTTP client for the primary (virtualized) inventory API.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::api::{PrimaryApi, PrimaryNetwork, PrimaryServer};
use crate::config::ResolverConfig;
use crate::credentials::CredentialStore;
use crate::error::ApiError;

const DEFAULT_BASE_URL: &str = "https://api.hetzner.cloud/v1";

pub struct PrimaryClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
}

impl PrimaryClient {
    pub fn new(credentials: Arc<CredentialStore>, config: &ResolverConfig) -> Self {
        Self::with_base_url(credentials, config, DEFAULT_BASE_URL.to_string())
    }

    /// Client pointed at a non-default endpoint. Used by tests.
    pub fn with_base_url(
        credentials: Arc<CredentialStore>,
        config: &ResolverConfig,
        base_url: String,
    ) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            base_url,
            credentials,
        }
    }

    /// The bearer token is read per call, so a hot reload applies to the
    /// very next request.
    fn token(&self) -> Result<String, ApiError> {
        self.credentials
            .primary_token()
            .ok_or(ApiError::NotConfigured { backend: "primary" })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        op: &'static str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Option<T>, ApiError> {
        let token = self.token()?;
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::transport(op, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = response
                    .json::<T>()
                    .await
                    .map_err(|e| ApiError::transport(op, e))?;
                Ok(Some(body))
            }
            status => Err(ApiError::transport(
                op,
                format!("unexpected status {status}"),
            )),
        }
    }
}

#[derive(Deserialize)]
struct ServerResponse {
    server: PrimaryServer,
}

#[derive(Deserialize)]
struct ServerListResponse {
    servers: Vec<PrimaryServer>,
}

#[derive(Deserialize)]
struct NetworkResponse {
    network: PrimaryNetwork,
}

#[derive(Deserialize)]
struct NetworkListResponse {
    networks: Vec<PrimaryNetwork>,
}

#[async_trait]
impl PrimaryApi for PrimaryClient {
    async fn server_by_id(&self, id: i64) -> Result<Option<PrimaryServer>, ApiError> {
        const OP: &str = "primary/get-server-by-id";
        let response: Option<ServerResponse> =
            self.get_json(OP, &format!("/servers/{id}"), &[]).await?;
        Ok(response.map(|r| r.server))
    }

    async fn server_by_name(&self, name: &str) -> Result<Option<PrimaryServer>, ApiError> {
        const OP: &str = "primary/get-server-by-name";
        let response: Option<ServerListResponse> =
            self.get_json(OP, "/servers", &[("name", name)]).await?;
        Ok(response.and_then(|r| r.servers.into_iter().next()))
    }

    async fn network(&self, id_or_name: &str) -> Result<Option<PrimaryNetwork>, ApiError> {
        const OP: &str = "primary/get-network";
        if id_or_name.parse::<i64>().is_ok() {
            let response: Option<NetworkResponse> = self
                .get_json(OP, &format!("/networks/{id_or_name}"), &[])
                .await?;
            Ok(response.map(|r| r.network))
        } else {
            let response: Option<NetworkListResponse> = self
                .get_json(OP, "/networks", &[("name", id_or_name)])
                .await?;
            Ok(response.and_then(|r| r.networks.into_iter().next()))
        }
    }
}
