//! IAM Token Cache
//!
//! Holds a single IAM token and re-mints it once it is older than the
//! freshness window. Minting shells out to the `yc` CLI:
//!
//! ```bash
//! yc iam create-token
//! ```

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::TokenError;

/// IAM tokens are valid for 12 hours; re-mint well before that
pub const FRESHNESS_WINDOW: Duration = Duration::from_secs(3600);

/// Upper bound on a single `yc iam create-token` run
pub const DEFAULT_MINT_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of fresh IAM tokens
#[async_trait]
pub trait TokenMinter: Send + Sync {
    /// Human readable name used in errors and logs
    fn describe(&self) -> String;

    /// Produce a new, non-empty token
    async fn mint(&self, cancel: &CancellationToken) -> Result<String, TokenError>;
}

/// Mints tokens by running the `yc` CLI and reading its stdout
#[derive(Debug, Clone)]
pub struct CliTokenMinter {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl Default for CliTokenMinter {
    fn default() -> Self {
        Self {
            program: "yc".to_string(),
            args: vec!["iam".to_string(), "create-token".to_string()],
            timeout: DEFAULT_MINT_TIMEOUT,
        }
    }
}

impl CliTokenMinter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a different command, e.g. a wrapper script or an absolute path to `yc`
    pub fn with_command(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl TokenMinter for CliTokenMinter {
    fn describe(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    async fn mint(&self, cancel: &CancellationToken) -> Result<String, TokenError> {
        let command = self.describe();
        debug!("Running {}", command);

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TokenError::Spawn {
                command: command.clone(),
                source,
            })?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TokenError::Cancelled),
            res = tokio::time::timeout(self.timeout, child.wait_with_output()) => match res {
                Err(_) => {
                    return Err(TokenError::Timeout {
                        command,
                        timeout: self.timeout,
                    })
                }
                Ok(output) => output.map_err(|source| TokenError::Io {
                    command: command.clone(),
                    source,
                })?,
            },
        };

        if !output.status.success() {
            return Err(TokenError::Exit {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(TokenError::Empty { command });
        }

        Ok(token)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    minted_at: Instant,
}

/// Process-wide IAM token cache
///
/// The lock is held across the whole check-and-refresh sequence so
/// concurrent callers wait for a single mint instead of starting their own.
pub struct TokenCache {
    minter: Arc<dyn TokenMinter>,
    freshness: Duration,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenCache {
    pub fn new(minter: Arc<dyn TokenMinter>) -> Self {
        Self::with_freshness(minter, FRESHNESS_WINDOW)
    }

    pub fn with_freshness(minter: Arc<dyn TokenMinter>, freshness: Duration) -> Self {
        Self {
            minter,
            freshness,
            cached: Mutex::new(None),
        }
    }

    /// Return the cached token, minting a new one when absent or stale.
    ///
    /// A failed mint leaves the previous entry in place.
    pub async fn token(&self, cancel: &CancellationToken) -> Result<String, TokenError> {
        let mut cached = self.cached.lock().await;

        if let Some(entry) = cached.as_ref() {
            if Instant::now() < entry.minted_at + self.freshness {
                return Ok(entry.value.clone());
            }
            debug!(
                "IAM token is {:?} old, refreshing",
                entry.minted_at.elapsed()
            );
        }

        let value = self.minter.mint(cancel).await?;
        if value.is_empty() {
            return Err(TokenError::Empty {
                command: self.minter.describe(),
            });
        }

        info!("Minted new IAM token via {}", self.minter.describe());

        *cached = Some(CachedToken {
            value: value.clone(),
            minted_at: Instant::now(),
        });

        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Hands out "token-1", "token-2", ... and fails while `fail` is set
    struct CountingMinter {
        calls: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
    }

    impl CountingMinter {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TokenMinter for CountingMinter {
        fn describe(&self) -> String {
            "counting minter".to_string()
        }

        async fn mint(&self, _cancel: &CancellationToken) -> Result<String, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail.load(Ordering::SeqCst) {
                return Err(TokenError::Empty {
                    command: self.describe(),
                });
            }
            Ok(format!("token-{}", n))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_reused_within_window() {
        let minter = CountingMinter::new();
        let cache = TokenCache::new(minter.clone());
        let cancel = CancellationToken::new();

        assert_eq!(cache.token(&cancel).await.unwrap(), "token-1");
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert_eq!(cache.token(&cancel).await.unwrap(), "token-1");
        assert_eq!(minter.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_refreshed_after_window() {
        let minter = CountingMinter::new();
        let cache = TokenCache::new(minter.clone());
        let cancel = CancellationToken::new();

        cache.token(&cancel).await.unwrap();
        tokio::time::advance(FRESHNESS_WINDOW).await;

        assert_eq!(cache.token(&cancel).await.unwrap(), "token-2");
        assert_eq!(cache.token(&cancel).await.unwrap(), "token-2");
        assert_eq!(minter.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_keeps_stale_token() {
        let minter = CountingMinter::new();
        let cache = TokenCache::new(minter.clone());
        let cancel = CancellationToken::new();

        cache.token(&cancel).await.unwrap();
        tokio::time::advance(FRESHNESS_WINDOW).await;

        minter.fail.store(true, Ordering::SeqCst);
        assert!(cache.token(&cancel).await.is_err());

        let cached = cache.cached.lock().await.clone().unwrap();
        assert_eq!(cached.value, "token-1");

        minter.fail.store(false, Ordering::SeqCst);
        assert_eq!(cache.token(&cancel).await.unwrap(), "token-3");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_mint() {
        let minter = CountingMinter::new();
        let cache = Arc::new(TokenCache::new(minter.clone()));
        let cancel = CancellationToken::new();

        let (a, b) = tokio::join!(cache.token(&cancel), cache.token(&cancel));
        assert_eq!(a.unwrap(), "token-1");
        assert_eq!(b.unwrap(), "token-1");
        assert_eq!(minter.calls(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_minter_trims_stdout() {
        let minter = CliTokenMinter::with_command("sh", &["-c", "printf '  t1.abc  \\n'"]);
        let token = minter.mint(&CancellationToken::new()).await.unwrap();
        assert_eq!(token, "t1.abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_minter_non_zero_exit() {
        let minter = CliTokenMinter::with_command("sh", &["-c", "echo denied >&2; exit 3"]);
        let err = minter.mint(&CancellationToken::new()).await.unwrap_err();
        match err {
            TokenError::Exit { stderr, .. } => assert_eq!(stderr, "denied"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_minter_empty_output() {
        let minter = CliTokenMinter::with_command("sh", &["-c", "echo"]);
        let err = minter.mint(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TokenError::Empty { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_minter_timeout() {
        let minter = CliTokenMinter::with_command("sleep", &["5"])
            .with_timeout(Duration::from_millis(100));
        let err = minter.mint(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TokenError::Timeout { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cli_minter_cancelled() {
        let minter = CliTokenMinter::with_command("sleep", &["5"]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = minter.mint(&cancel).await.unwrap_err();
        assert!(matches!(err, TokenError::Cancelled));
    }

    #[tokio::test]
    async fn test_cli_minter_missing_binary() {
        let minter = CliTokenMinter::with_command("yc-definitely-not-installed", &[]);
        let err = minter.mint(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, TokenError::Spawn { .. }));
    }
}
