//! Yandex Cloud Node Discovery
//!
//! Finds the addresses of cluster peers running on Yandex Cloud by listing
//! the compute instances of a folder and keeping those carrying a given
//! label. Used by cluster bootstrap tooling instead of static peer lists.
//!
//! IAM tokens are minted with the `yc` CLI and cached for an hour.

pub mod compute;
pub mod config;
pub mod discover;
pub mod error;
pub mod token;

pub use compute::{ComputeApi, ComputeConnector, HttpComputeConnector};
pub use config::{AddrType, DiscoveryQuery};
pub use discover::Provider;
pub use error::{ComputeError, DiscoverError, TokenError};
pub use token::{CliTokenMinter, TokenCache, TokenMinter};
