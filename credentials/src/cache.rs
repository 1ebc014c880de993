use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

use crate::{AuthResult, TokenProvider, TokenSource};

/// Tokens are refreshed this long before their declared expiry.
pub const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Upper bound on how long a token is cached, whatever the endpoint claims.
pub const MAX_TOKEN_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

type TokenSlot = Arc<Mutex<Option<CachedToken>>>;

/// Per-scope token cache with single-flight refresh.
///
/// Each scope owns a slot guarded by an async mutex. The caller that finds the
/// slot stale refreshes it while holding the lock; everyone else queued on the
/// same slot then observes the fresh token instead of issuing their own
/// request.
pub struct TokenCache {
    source: Arc<dyn TokenSource>,
    slots: DashMap<String, TokenSlot>,
    skew: Duration,
}

impl TokenCache {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self::with_skew(source, EXPIRY_SKEW)
    }

    pub fn with_skew(source: Arc<dyn TokenSource>, skew: Duration) -> Self {
        Self {
            source,
            slots: DashMap::new(),
            skew,
        }
    }

    fn slot(&self, scope: &str) -> TokenSlot {
        self.slots.entry(scope.to_string()).or_default().clone()
    }
}

#[async_trait]
impl TokenProvider for TokenCache {
    async fn get_token(&self, scope: &str) -> AuthResult<String> {
        let slot = self.slot(scope);
        let mut cached = slot.lock().await;

        if let Some(entry) = cached.as_ref() {
            if Instant::now() + self.skew < entry.expires_at {
                return Ok(entry.token.clone());
            }
        }

        debug!(scope, "refreshing access token");
        let requested_at = Instant::now();
        let issued = self.source.fetch(scope).await?;
        let token = issued.access_token.clone();
        *cached = Some(CachedToken {
            token: issued.access_token,
            expires_at: requested_at + issued.expires_in.min(MAX_TOKEN_LIFETIME),
        });
        Ok(token)
    }
}
