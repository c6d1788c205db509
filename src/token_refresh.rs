//! Token Refresh Engine (C3): pre-emptive refresh with per-subject mutual
//! exclusion, refresh→reauth fallback, atomic write-back.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::credentials;
use crate::error::{AppError, PdsErrorKind};
use crate::models::Community;
use crate::pds_client::PdsClient;

#[derive(Deserialize)]
struct UnverifiedClaims {
    exp: i64,
}

/// Per-DID mutex map. Mutexes are never evicted — evicting one while a
/// worker still holds it would let a third worker create a fresh mutex for
/// the same DID and defeat the exclusion.
pub struct MutexMap {
    inner: RwLock<DashMap<String, Arc<Mutex<()>>>>,
    warn_threshold: usize,
}

impl MutexMap {
    pub fn new(warn_threshold: usize) -> Self {
        Self {
            inner: RwLock::new(DashMap::new()),
            warn_threshold,
        }
    }

    /// Fast path under the read lock returns an existing mutex; slow path
    /// under the write lock double-checks then inserts.
    pub fn get_or_create(&self, did: &str) -> Arc<Mutex<()>> {
        {
            let map = self.inner.read();
            if let Some(existing) = map.get(did) {
                return existing.clone();
            }
        }

        let map = self.inner.write();
        if let Some(existing) = map.get(did) {
            return existing.clone();
        }
        let mutex = Arc::new(Mutex::new(()));
        map.insert(did.to_string(), mutex.clone());

        let len = map.len();
        if len > self.warn_threshold {
            tracing::warn!(
                size = len,
                threshold = self.warn_threshold,
                "token refresh mutex map has grown past the soft threshold; it is never evicted by design"
            );
        }
        mutex
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }
}

/// Parse the `exp` claim of a JWT without verifying its signature — this is
/// only used to decide whether a refresh is needed, never to authenticate.
fn parse_exp_unverified(jwt: &str) -> Result<i64, AppError> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        return Err(AppError::InvalidInput("malformed access token".into()));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| AppError::InvalidInput(format!("bad token payload: {e}")))?;
    let claims: UnverifiedClaims =
        serde_json::from_slice(&payload).map_err(|e| AppError::InvalidInput(format!("bad token claims: {e}")))?;
    Ok(claims.exp)
}

fn is_fresh(community: &Community, buffer: Duration) -> bool {
    match parse_exp_unverified(&community.pds_access_token) {
        Ok(exp) => {
            let now = chrono::Utc::now().timestamp();
            exp - now > buffer.as_secs() as i64
        }
        Err(_) => false,
    }
}

/// `EnsureFreshToken(community) → community_with_valid_access_token`.
pub async fn ensure_fresh_token(
    pool: &PgPool,
    pds_client: &PdsClient,
    mutex_map: &MutexMap,
    community: Community,
    buffer: Duration,
) -> Result<Community, AppError> {
    if is_fresh(&community, buffer) {
        return Ok(community);
    }

    let did = community.did.clone();
    let mutex = mutex_map.get_or_create(&did);
    let _guard = mutex.lock().await;

    // Double-checked locking: another worker may have refreshed while we
    // waited for the lock.
    let refetched = credentials::get_by_did(pool, &did)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("community {did} not found")))?;

    if is_fresh(&refetched, buffer) {
        return Ok(refetched);
    }

    let refreshed = match pds_client.refresh_session(&refetched.pds_url, &refetched.pds_refresh_token).await {
        Ok(tokens) => {
            crate::metrics::record_token_refresh("refreshed");
            tokens
        }
        Err(AppError::Pds(PdsErrorKind::Unauthorized)) => {
            tracing::info!(community_did = %did, "refresh token rejected, falling back to password re-auth");
            let tokens = pds_client
                .create_session(&refetched.pds_url, &refetched.pds_email, &refetched.pds_password)
                .await
                .map_err(|e| {
                    crate::metrics::record_token_refresh("password_fallback_failed");
                    AppError::RefreshFailed(format!("password fallback failed: {e}"))
                })?;
            crate::metrics::record_token_refresh("password_fallback");
            tokens
        }
        Err(other) => {
            crate::metrics::record_token_refresh("refresh_failed");
            return Err(AppError::RefreshFailed(format!("refreshSession failed: {other}")));
        }
    };

    persist_with_retry(pool, &did, &refreshed.access_jwt, &refreshed.refresh_jwt).await?;

    let mut updated = refetched;
    updated.pds_access_token = refreshed.access_jwt;
    updated.pds_refresh_token = refreshed.refresh_jwt;
    Ok(updated)
}

/// Retries the credential write-back up to 3 times with exponential backoff
/// (100 / 200 / 400 ms). Exhausting retries is a CRITICAL, operator-visible
/// failure: the old refresh token is already revoked server-side, so the
/// community is locked out until a human re-authenticates it.
async fn persist_with_retry(
    pool: &PgPool,
    did: &str,
    new_access: &str,
    new_refresh: &str,
) -> Result<(), AppError> {
    let delays = [100u64, 200, 400];
    let mut last_err = None;

    for delay_ms in delays {
        match credentials::update_credentials(pool, did, new_access, new_refresh).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                last_err = Some(e);
                sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }

    crate::metrics::record_token_refresh("locked_out");
    tracing::error!(
        community_did = %did,
        lockout = true,
        "LOCKED OUT: failed to persist refreshed credentials after 3 retries; the PDS refresh token is already revoked"
    );
    Err(AppError::PersistFailed(format!(
        "could not persist refreshed credentials for {did}: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mutex_map_returns_same_instance_for_same_did() {
        let map = MutexMap::new(10_000);
        let a = map.get_or_create("did:plc:u1");
        let b = map.get_or_create("did:plc:u1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_mutex_map_distinct_per_did() {
        let map = MutexMap::new(10_000);
        let a = map.get_or_create("did:plc:u1");
        let b = map.get_or_create("did:plc:u2");
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(map.len(), 2);
    }
}
