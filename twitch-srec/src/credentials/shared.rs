//! Access token shared by every worker.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use super::provider::{AccessToken, TokenProvider};
use crate::Result;

/// Single accessor for the app access token.
///
/// Workers read the cached token with [`current`](Self::current). A worker
/// whose request was rejected calls [`invalidate`](Self::invalidate) with the
/// token it used; only the first caller for a given token triggers a refetch,
/// the others pick up the replacement.
#[derive(Clone)]
pub struct SharedToken {
    provider: Arc<dyn TokenProvider>,
    state: Arc<Mutex<Option<AccessToken>>>,
}

impl SharedToken {
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider,
            state: Arc::new(Mutex::new(None)),
        }
    }

    /// Cached token, fetching one if none is held.
    pub async fn current(&self) -> Result<AccessToken> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.as_ref() {
            return Ok(token.clone());
        }

        debug!("No cached access token, fetching");
        let token = self.provider.fetch_token().await?;
        *state = Some(token.clone());
        Ok(token)
    }

    /// Replace `stale` with a fresh token.
    ///
    /// If the cached token already differs from `stale`, it is returned as is.
    /// On fetch failure the cache is cleared so the next `current()` retries.
    pub async fn invalidate(&self, stale: &AccessToken) -> Result<AccessToken> {
        let mut state = self.state.lock().await;
        if let Some(token) = state.as_ref()
            && token != stale
        {
            return Ok(token.clone());
        }

        info!("Access token rejected, requesting a new one");
        *state = None;
        let token = self.provider.fetch_token().await?;
        *state = Some(token.clone());
        Ok(token)
    }
}

impl std::fmt::Debug for SharedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedToken").finish_non_exhaustive()
    }
}
