//! Process-wide configuration, collected once at startup from the environment.

use std::time::Duration;

/// Typed view over the environment variables the service reads.
///
/// Individual modules still fall back to `std::env::var` for knobs that are
/// only relevant to them (rate limit quotas, JWT settings), but anything the
/// core write-forward/indexing path depends on is collected here so it is
/// read once and threaded through `AppState`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// This instance's own DID, stamped into every community's `hosted_by_did`.
    pub instance_did: String,
    /// DNS domain this instance serves canonical/scoped handles under.
    pub instance_domain: String,
    /// Default PDS base URL used when provisioning new communities.
    pub pds_url: String,
    /// Firehose WebSocket endpoint to subscribe to.
    pub firehose_url: String,
    /// Secret used to HMAC-sign pagination cursors.
    pub cursor_hmac_secret: String,
    /// Buffer, before an access token's `exp`, that triggers a pre-emptive refresh.
    pub token_refresh_buffer: Duration,
    /// Mutex-map size above which a warning is logged (never evicted below or above it).
    pub mutex_map_warn_threshold: usize,
    pub server_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            instance_did: std::env::var("INSTANCE_DID")
                .unwrap_or_else(|_| "did:web:coves.social".to_string()),
            instance_domain: std::env::var("INSTANCE_DOMAIN")
                .unwrap_or_else(|_| "coves.social".to_string()),
            pds_url: std::env::var("PDS_URL")
                .unwrap_or_else(|_| "https://pds.coves.social".to_string()),
            firehose_url: std::env::var("FIREHOSE_URL")
                .unwrap_or_else(|_| "wss://pds.coves.social/xrpc/com.atproto.sync.subscribeRepos".to_string()),
            cursor_hmac_secret: std::env::var("CURSOR_HMAC_SECRET")
                .unwrap_or_else(|_| "insecure-dev-cursor-secret".to_string()),
            token_refresh_buffer: Duration::from_secs(
                std::env::var("TOKEN_REFRESH_BUFFER_SECONDS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(300),
            ),
            mutex_map_warn_threshold: std::env::var("MUTEX_MAP_WARN_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            server_port: std::env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
        }
    }
}
