use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use sqlx::PgPool;
use std::time::SystemTime;

use crate::token_refresh::MutexMap;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    timestamp: u64,
    version: String,
    checks: HealthChecks,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    database: CheckStatus,
    token_refresh: TokenRefreshHealth,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    ready: bool,
    checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    database: bool,
}

/// Observability into the token refresh engine's per-subject mutex map: its
/// size never shrinks (mutexes are never evicted, by design), so this is
/// reported as a gauge rather than something that can be "unhealthy".
#[derive(Debug, Serialize)]
pub struct TokenRefreshHealth {
    mutex_map_size: usize,
}

/// Liveness probe - checks if the application is running.
pub async fn liveness() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Readiness probe - checks database connectivity. Returns 503 if the
/// database is unreachable, 200 otherwise.
pub async fn readiness(State(pool): State<PgPool>) -> (StatusCode, Json<ReadinessResponse>) {
    let db_ready = check_database(&pool).await;
    let status = if db_ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (status, Json(ReadinessResponse { ready: db_ready, checks: ReadinessChecks { database: db_ready } }))
}

/// Detailed health endpoint: database connectivity plus token-refresh engine
/// state.
pub async fn health(
    State(pool): State<PgPool>,
    State(mutex_map): State<std::sync::Arc<MutexMap>>,
) -> (StatusCode, Json<HealthResponse>) {
    let db_status = if check_database(&pool).await { CheckStatus::Healthy } else { CheckStatus::Unhealthy };
    let overall_healthy = matches!(db_status, CheckStatus::Healthy);
    let status = if overall_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    let timestamp = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);

    (
        status,
        Json(HealthResponse {
            status: if overall_healthy { "healthy".to_string() } else { "unhealthy".to_string() },
            timestamp,
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: HealthChecks {
                database: db_status,
                token_refresh: TokenRefreshHealth { mutex_map_size: mutex_map.len() },
            },
        }),
    )
}

async fn check_database(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        let (status, body) = liveness().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
