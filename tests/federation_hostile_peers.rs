//! Defends against inputs a malicious or misbehaving remote peer could send:
//! spoofed instance claims in scoped identifiers, tampered pagination
//! cursors, and malformed firehose identity events.

use std::time::Duration;

use chrono::Utc;
use coves_appview::credentials::{self, NewCommunity};
use coves_appview::db::{self, DbConfig};
use coves_appview::error::AppError;
use coves_appview::feed::cursor::Cursor;
use coves_appview::firehose::indexer;
use coves_appview::identity::resolve_identifier;
use sqlx::PgPool;

const SECRET: &str = "test-hmac-secret";

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/coves_test".to_string());

    let config = DbConfig {
        database_url,
        max_connections: 10,
        min_connections: 2,
        acquire_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(600),
    };

    db::init_db(config).await.expect("failed to initialize test database")
}

async fn cleanup_test_data(pool: &PgPool) {
    sqlx::query("TRUNCATE TABLE identities, communities CASCADE")
        .execute(pool)
        .await
        .expect("failed to clean up test data");
}

fn new_community(did: &str, name: &str, handle: &str) -> NewCommunity {
    NewCommunity {
        did: did.to_string(),
        handle: handle.to_string(),
        name: name.to_string(),
        display_name: None,
        description: None,
        rules: None,
        categories: None,
        language: None,
        created_by_did: "did:plc:creator".to_string(),
        hosted_by_did: "did:web:coves.social".to_string(),
        visibility: "public".to_string(),
        allow_external_discovery: true,
        pds_url: "https://pds.coves.social".to_string(),
        pds_email: format!("community-{name}@communities.coves.social"),
        pds_password: "test-password".to_string(),
        pds_access_token: "test-access".to_string(),
        pds_refresh_token: "test-refresh".to_string(),
        record_uri: format!("at://{did}/social.coves.community.profile/self"),
        record_cid: "bafytestcid".to_string(),
    }
}

#[tokio::test]
async fn test_scoped_identifier_rejects_foreign_instance_claim() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    credentials::create(&pool, new_community("did:plc:local-gaming", "gaming", "c-gaming.coves.social"))
        .await
        .expect("failed to create community");

    // A remote peer claiming a scoped identifier against this instance's
    // domain but naming a different instance must not resolve, even though
    // the name matches a community we actually host.
    let result = resolve_identifier(&pool, "!gaming@not-this-instance.example", "coves.social").await;
    assert!(
        matches!(result, Err(AppError::NotFound(_))),
        "a scoped identifier naming a foreign instance must be rejected, not quietly resolved"
    );
}

#[tokio::test]
async fn test_scoped_identifier_nonexistent_community_not_found() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let result = resolve_identifier(&pool, "!ghost@coves.social", "coves.social").await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn test_handle_resolution_is_case_insensitive() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    credentials::create(&pool, new_community("did:plc:case-test", "CaseTest", "c-casetest.coves.social"))
        .await
        .expect("failed to create community");

    let resolved = resolve_identifier(&pool, "C-CaseTest.Coves.Social", "coves.social")
        .await
        .expect("handle resolution must be case-insensitive on the domain part");
    assert_eq!(resolved, "did:plc:case-test");
}

#[tokio::test]
async fn test_malformed_did_identifier_rejected_before_db_lookup() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let result = resolve_identifier(&pool, "did:key:not-a-plc-or-web", "coves.social").await;
    assert!(matches!(result, Err(AppError::ValidationError { .. })));
}

#[test]
fn test_cursor_single_bit_tamper_rejected() {
    let cursor = Cursor::New { created_at: Utc::now(), uri: "at://did:plc:x/social.coves.post/abc".to_string() };
    let encoded = cursor.encode(SECRET);

    let mut bytes = encoded.into_bytes();
    // Flip one bit in the middle of the token, simulating a forged cursor
    // from an untrusted client.
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;
    let tampered = String::from_utf8(bytes).unwrap_or_else(|_| "not-even-utf8".to_string());

    let result = Cursor::decode(&tampered, SECRET);
    assert!(matches!(result, Err(AppError::InvalidCursor)));
}

#[test]
fn test_cursor_signed_with_different_secret_is_rejected() {
    let cursor = Cursor::Hot {
        created_at: Utc::now(),
        uri: "at://did:plc:x/social.coves.post/abc".to_string(),
        query_time: Utc::now(),
    };
    let encoded = cursor.encode(SECRET);
    let result = Cursor::decode(&encoded, "a-different-secret");
    assert!(matches!(result, Err(AppError::InvalidCursor)));
}

#[test]
fn test_oversized_cursor_rejected_without_touching_sql() {
    let huge = "a".repeat(4096);
    let result = Cursor::decode(&huge, SECRET);
    assert!(matches!(result, Err(AppError::InvalidCursor)));
}

#[tokio::test]
async fn test_identity_upsert_last_write_wins_on_replay() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    indexer::upsert_identity(&pool, "did:plc:flaky-peer", "first-handle.bsky.social")
        .await
        .expect("first upsert should succeed");
    // A hostile or merely out-of-order peer replays an older identity event
    // after a newer one already landed; last write (by arrival order) wins,
    // matching the documented last-write-wins default.
    indexer::upsert_identity(&pool, "did:plc:flaky-peer", "second-handle.bsky.social")
        .await
        .expect("second upsert should succeed");

    let handle: String = sqlx::query_scalar("SELECT handle FROM identities WHERE did = $1")
        .bind("did:plc:flaky-peer")
        .fetch_one(&pool)
        .await
        .expect("identity row missing");
    assert_eq!(handle, "second-handle.bsky.social");
}
