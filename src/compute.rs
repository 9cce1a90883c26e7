//! Yandex Compute API Client
//!
//! Just enough of the Compute REST API to list the instances of a folder:
//! `GET /compute/v1/instances?folderId=..&pageSize=..&pageToken=..`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::AddrType;
use crate::error::ComputeError;

pub const COMPUTE_API: &str = "https://compute.api.cloud.yandex.net";

/// Instances requested per page
pub const PAGE_SIZE: i64 = 64;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================
// API Types
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListInstancesRequest {
    pub folder_id: String,
    pub page_size: i64,
    pub page_token: String,
}

impl ListInstancesRequest {
    pub fn first_page(folder_id: &str) -> Self {
        Self {
            folder_id: folder_id.to_string(),
            page_size: PAGE_SIZE,
            page_token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListInstancesResponse {
    #[serde(default)]
    pub instances: Vec<Instance>,
    /// Empty on the last page
    #[serde(default)]
    pub next_page_token: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterface {
    #[serde(default)]
    pub primary_v4_address: Option<PrimaryAddress>,
    #[serde(default)]
    pub primary_v6_address: Option<PrimaryAddress>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrimaryAddress {
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub one_to_one_nat: Option<OneToOneNat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneToOneNat {
    #[serde(default)]
    pub address: String,
}

impl NetworkInterface {
    /// Address of the requested family, if the interface has one
    pub fn address(&self, addr_type: AddrType) -> Option<&str> {
        let address = match addr_type {
            AddrType::PrivateV4 => self.primary_v4_address.as_ref().map(|a| a.address.as_str()),
            AddrType::PublicV4 => self
                .primary_v4_address
                .as_ref()
                .and_then(|a| a.one_to_one_nat.as_ref())
                .map(|nat| nat.address.as_str()),
            AddrType::PublicV6 => self.primary_v6_address.as_ref().map(|a| a.address.as_str()),
        };
        address.filter(|a| !a.is_empty())
    }
}

// ============================================================
// Client Traits
// ============================================================

/// An authenticated Compute API session
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn list_instances(
        &self,
        request: &ListInstancesRequest,
    ) -> Result<ListInstancesResponse, ComputeError>;
}

/// Opens Compute API sessions for an IAM token
pub trait ComputeConnector: Send + Sync {
    fn connect(&self, iam_token: &str) -> Result<Box<dyn ComputeApi>, ComputeError>;
}

// ============================================================
// HTTP Implementation
// ============================================================

/// Connects to the Compute REST API over HTTPS
#[derive(Debug, Clone)]
pub struct HttpComputeConnector {
    endpoint: String,
    timeout: Duration,
}

impl Default for HttpComputeConnector {
    fn default() -> Self {
        Self::new(COMPUTE_API)
    }
}

impl HttpComputeConnector {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Per-request timeout applied to every page fetch
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl ComputeConnector for HttpComputeConnector {
    fn connect(&self, iam_token: &str) -> Result<Box<dyn ComputeApi>, ComputeError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", iam_token))
            .map_err(|e| ComputeError::Client(format!("invalid IAM token: {}", e)))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .user_agent(concat!("yc-discover/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(self.timeout)
            .build()
            .map_err(|e| ComputeError::Client(e.to_string()))?;

        Ok(Box::new(HttpComputeClient {
            client,
            endpoint: self.endpoint.clone(),
        }))
    }
}

struct HttpComputeClient {
    client: Client,
    endpoint: String,
}

#[async_trait]
impl ComputeApi for HttpComputeClient {
    async fn list_instances(
        &self,
        request: &ListInstancesRequest,
    ) -> Result<ListInstancesResponse, ComputeError> {
        let url = format!("{}/compute/v1/instances", self.endpoint);

        let mut query = vec![
            ("folderId", request.folder_id.clone()),
            ("pageSize", request.page_size.to_string()),
        ];
        if !request.page_token.is_empty() {
            query.push(("pageToken", request.page_token.clone()));
        }

        debug!(
            "Listing instances in folder {} (page token: {:?})",
            request.folder_id, request.page_token
        );

        let response = self.client.get(&url).query(&query).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ComputeError::Status { status, body });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}
