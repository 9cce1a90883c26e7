//! Instance Address Discovery
//!
//! Pages through every compute instance of a folder and collects one
//! address per instance carrying the configured label.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::compute::{
    ComputeApi, ComputeConnector, HttpComputeConnector, Instance, ListInstancesRequest,
};
use crate::config::{DiscoveryQuery, HELP};
use crate::error::{ComputeError, DiscoverError};
use crate::token::{CliTokenMinter, TokenCache};

/// The `yc` discovery provider
///
/// Holds the IAM token cache, so keep one instance per process and reuse it
/// across discovery rounds.
pub struct Provider {
    tokens: Arc<TokenCache>,
    connector: Arc<dyn ComputeConnector>,
}

impl Default for Provider {
    fn default() -> Self {
        Self::new(
            Arc::new(TokenCache::new(Arc::new(CliTokenMinter::new()))),
            Arc::new(HttpComputeConnector::default()),
        )
    }
}

impl Provider {
    pub fn new(tokens: Arc<TokenCache>, connector: Arc<dyn ComputeConnector>) -> Self {
        Self { tokens, connector }
    }

    pub fn help(&self) -> &'static str {
        HELP
    }

    /// Discover peer addresses from the framework's argument map.
    ///
    /// On [`DiscoverError::Fetch`] the addresses gathered before the failing
    /// page travel with the error; treat them as unusable.
    pub async fn addrs(
        &self,
        args: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DiscoverError> {
        let query = DiscoveryQuery::from_args(args)?;
        self.discover(&query, cancel).await
    }

    pub async fn discover(
        &self,
        query: &DiscoveryQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, DiscoverError> {
        let token = match &query.iam_token {
            Some(token) => token.clone(),
            None => self.tokens.token(cancel).await?,
        };

        let api = self.connector.connect(&token).map_err(|e| {
            error!("discover-yc: Failed to create compute client: {}", e);
            DiscoverError::Session(e)
        })?;

        let addrs = instance_addrs(api.as_ref(), query, cancel).await?;

        info!(
            "discover-yc: Found {} {} addresses in folder {} with {}={}",
            addrs.len(),
            query.addr_type,
            query.folder_id,
            query.label_name,
            query.label_value
        );

        Ok(addrs)
    }
}

async fn instance_addrs(
    api: &dyn ComputeApi,
    query: &DiscoveryQuery,
    cancel: &CancellationToken,
) -> Result<Vec<String>, DiscoverError> {
    let mut addrs = Vec::new();
    let mut request = ListInstancesRequest::first_page(&query.folder_id);

    loop {
        let page = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ComputeError::Cancelled),
            page = api.list_instances(&request) => page,
        };

        let page = match page {
            Ok(page) => page,
            Err(source) => {
                error!("discover-yc: Failed to list instances: {}", source);
                return Err(DiscoverError::Fetch {
                    partial: addrs,
                    source,
                });
            }
        };

        debug!(
            "Received {} instances (next page token: {:?})",
            page.instances.len(),
            page.next_page_token
        );

        addrs.extend(
            page.instances
                .iter()
                .filter_map(|instance| select_addr(instance, query))
                .map(str::to_string),
        );

        if page.next_page_token.is_empty() {
            break;
        }
        request.page_token = page.next_page_token;
    }

    Ok(addrs)
}

/// Address to report for `instance`, if it is a cluster member.
///
/// Only instances with exactly one network interface are considered; with
/// several there is no telling which one the cluster talks on.
fn select_addr<'a>(instance: &'a Instance, query: &DiscoveryQuery) -> Option<&'a str> {
    let member = instance
        .labels
        .get(&query.label_name)
        .is_some_and(|value| *value == query.label_value);
    if !member {
        return None;
    }

    match instance.network_interfaces.as_slice() {
        [nic] => {
            let addr = nic.address(query.addr_type);
            if addr.is_none() {
                debug!(
                    "Skipping instance {}: no {} address",
                    instance.id, query.addr_type
                );
            }
            addr
        }
        nics => {
            debug!(
                "Skipping instance {}: {} network interfaces",
                instance.id,
                nics.len()
            );
            None
        }
    }
}
