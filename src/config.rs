//! Provider Arguments
//!
//! Parses the `key=value` argument map handed over by the discovery
//! framework into an immutable [`DiscoveryQuery`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use tracing::warn;

use crate::error::DiscoverError;

/// Value of the `provider` argument this crate answers to
pub const PROVIDER_NAME: &str = "yc";

pub const HELP: &str = r#"Yandex Cloud:

    provider:    "yc"
    folder_id:   The Yandex Cloud folder ID
    label_name:  The label name to filter on
    label_value: The label value to filter on
    addr_type:   "private_v4", "public_v4" or "public_v6". Defaults to "private_v4"
    iam_token:   Optional IAM token. When set, the yc CLI is not invoked

    The only required IAM role is 'compute.viewer'. Without iam_token a new
    IAM token is generated with `yc iam create-token` at most once an hour.
"#;

/// Which address of an instance's network interface to report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AddrType {
    #[default]
    PrivateV4,
    PublicV4,
    PublicV6,
}

impl FromStr for AddrType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private_v4" => Ok(AddrType::PrivateV4),
            "public_v4" => Ok(AddrType::PublicV4),
            "public_v6" => Ok(AddrType::PublicV6),
            other => Err(format!("unknown addr_type: {}", other)),
        }
    }
}

impl fmt::Display for AddrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddrType::PrivateV4 => write!(f, "private_v4"),
            AddrType::PublicV4 => write!(f, "public_v4"),
            AddrType::PublicV6 => write!(f, "public_v6"),
        }
    }
}

/// A validated discovery request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryQuery {
    pub folder_id: String,
    pub label_name: String,
    pub label_value: String,
    pub addr_type: AddrType,
    /// Pre-minted IAM token; bypasses the token cache when present
    pub iam_token: Option<String>,
}

impl DiscoveryQuery {
    /// Build a query from the framework's argument map.
    ///
    /// Fails when `provider` is not `yc` or `folder_id` is missing. An absent
    /// or unrecognised `addr_type` falls back to `private_v4`.
    pub fn from_args(args: &HashMap<String, String>) -> Result<Self, DiscoverError> {
        let provider = args.get("provider").map(String::as_str).unwrap_or("");
        if provider != PROVIDER_NAME {
            return Err(DiscoverError::Config(format!(
                "invalid provider {}",
                provider
            )));
        }

        let folder_id = non_empty(args, "folder_id")
            .ok_or_else(|| DiscoverError::Config("folder_id is required".to_string()))?;

        let addr_type = match args.get("addr_type").map(String::as_str) {
            None | Some("") => AddrType::default(),
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                warn!("discover-yc: {}, using {}", e, AddrType::default());
                AddrType::default()
            }),
        };

        Ok(Self {
            folder_id,
            label_name: args.get("label_name").cloned().unwrap_or_default(),
            label_value: args.get("label_value").cloned().unwrap_or_default(),
            addr_type,
            iam_token: non_empty(args, "iam_token"),
        })
    }
}

fn non_empty(args: &HashMap<String, String>, key: &str) -> Option<String> {
    args.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
