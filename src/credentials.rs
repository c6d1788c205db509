//! Credential Store (C2): encrypted-at-rest persistence of per-community PDS
//! credentials.
//!
//! Encryption is a store concern: this module never holds a
//! decryption key in process memory. Every statement that touches the
//! credential columns wraps them in `pgp_sym_encrypt`/`pgp_sym_decrypt`
//! (Postgres `pgcrypto`), keyed by `CREDENTIAL_ENC_KEY`, so plaintext only
//! ever exists inside the database engine or, momentarily, in a query result
//! the caller already had permission to ask for.

use chrono::Utc;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::Community;

fn enc_key() -> String {
    std::env::var("CREDENTIAL_ENC_KEY").unwrap_or_else(|_| "insecure-dev-credential-key".to_string())
}

/// A freshly-provisioned community, prior to being written to the store.
pub struct NewCommunity {
    pub did: String,
    pub handle: String,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub rules: Option<serde_json::Value>,
    pub categories: Option<serde_json::Value>,
    pub language: Option<String>,
    pub created_by_did: String,
    pub hosted_by_did: String,
    pub visibility: String,
    pub allow_external_discovery: bool,
    pub pds_url: String,
    pub pds_email: String,
    pub pds_password: String,
    pub pds_access_token: String,
    pub pds_refresh_token: String,
    pub record_uri: String,
    pub record_cid: String,
}

/// Insert a newly provisioned community. Raises `AlreadyExists` on a
/// duplicate DID or handle (I3: `owner_did == did`, enforced here).
pub async fn create(pool: &PgPool, c: NewCommunity) -> Result<Community, AppError> {
    let now = Utc::now();
    let row = sqlx::query_as::<_, Community>(
        r#"
        INSERT INTO communities (
            did, handle, name, display_name, description, rules, categories, language,
            owner_did, created_by_did, hosted_by_did,
            visibility, allow_external_discovery,
            pds_url, pds_email, pds_password, pds_access_token, pds_refresh_token,
            member_count, subscriber_count, post_count,
            record_uri, record_cid, created_at, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, $8,
            $1, $9, $10,
            $11, $12,
            $13, $14, pgp_sym_encrypt($15, $20), pgp_sym_encrypt($16, $20), pgp_sym_encrypt($17, $20),
            0, 0, 0,
            $18, $19, $21, $21
        )
        RETURNING
            did, handle, name, display_name, description, facets, avatar_cid, banner_cid,
            rules, categories, language,
            owner_did, created_by_did, hosted_by_did,
            visibility, allow_external_discovery, moderation_type, content_warnings,
            pds_url, pds_email,
            pgp_sym_decrypt(pds_password, $20) AS pds_password,
            pgp_sym_decrypt(pds_access_token, $20) AS pds_access_token,
            pgp_sym_decrypt(pds_refresh_token, $20) AS pds_refresh_token,
            member_count, subscriber_count, post_count,
            record_uri, record_cid, created_at, updated_at, deleted_at
        "#,
    )
    .bind(&c.did)
    .bind(&c.handle)
    .bind(&c.name)
    .bind(&c.display_name)
    .bind(&c.description)
    .bind(&c.rules)
    .bind(&c.categories)
    .bind(&c.language)
    .bind(&c.created_by_did)
    .bind(&c.hosted_by_did)
    .bind(&c.visibility)
    .bind(c.allow_external_discovery)
    .bind(&c.pds_url)
    .bind(&c.pds_email)
    .bind(&c.pds_password)
    .bind(&c.pds_access_token)
    .bind(&c.pds_refresh_token)
    .bind(&c.record_uri)
    .bind(&c.record_cid)
    .bind(enc_key())
    .bind(now)
    .fetch_one(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            AppError::AlreadyExists(format!("community DID or handle already taken: {}", c.did))
        }
        _ => AppError::Internal(e.into()),
    })?;

    Ok(row)
}

/// Fetch a community by DID, including decrypted credentials. Internal use
/// only — callers must convert to `CommunityView` before returning to a
/// client.
pub async fn get_by_did(pool: &PgPool, did: &str) -> Result<Option<Community>, AppError> {
    let row = sqlx::query_as::<_, Community>(
        r#"
        SELECT
            did, handle, name, display_name, description, facets, avatar_cid, banner_cid,
            rules, categories, language,
            owner_did, created_by_did, hosted_by_did,
            visibility, allow_external_discovery, moderation_type, content_warnings,
            pds_url, pds_email,
            pgp_sym_decrypt(pds_password, $2) AS pds_password,
            pgp_sym_decrypt(pds_access_token, $2) AS pds_access_token,
            pgp_sym_decrypt(pds_refresh_token, $2) AS pds_refresh_token,
            member_count, subscriber_count, post_count,
            record_uri, record_cid, created_at, updated_at, deleted_at
        FROM communities
        WHERE did = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(did)
    .bind(enc_key())
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    Ok(row)
}

/// Atomic single-statement rewrite of both token columns (I5): this is the
/// only way access/refresh tokens are ever updated, and it happens in one
/// round trip so no reader observes a torn pair.
pub async fn update_credentials(
    pool: &PgPool,
    did: &str,
    new_access_token: &str,
    new_refresh_token: &str,
) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE communities
        SET pds_access_token = pgp_sym_encrypt($2, $4),
            pds_refresh_token = pgp_sym_encrypt($3, $4),
            updated_at = now()
        WHERE did = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(did)
    .bind(new_access_token)
    .bind(new_refresh_token)
    .bind(enc_key())
    .execute(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound(format!("community {did} not found for credential update")));
    }
    Ok(())
}
