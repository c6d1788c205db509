//! Connection pool setup and the query surface for everything that isn't a
//! credential (see `credentials.rs` for the encrypted community columns).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::error::AppError;
use crate::models::{Comment, Community, CommunityBlock, Membership, Post, Subscription, Vote};

pub type DbPool = PgPool;

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost/coves".to_string()),
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

pub async fn init_db(config: DbConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

pub async fn init_db_default() -> Result<DbPool> {
    init_db(DbConfig::default()).await
}

pub async fn health_check(pool: &DbPool) -> Result<bool> {
    sqlx::query("SELECT 1").execute(pool).await.context("database health check failed")?;
    Ok(true)
}

// ---------------------------------------------------------------------
// Communities
// ---------------------------------------------------------------------

/// Non-credential lookup used by feed/query/handler code; prefer this over
/// `credentials::get_by_did` whenever the caller doesn't need to talk to the
/// community's PDS.
pub async fn get_community_by_did(pool: &DbPool, did: &str) -> Result<Option<Community>, AppError> {
    crate::credentials::get_by_did(pool, did).await
}

pub async fn get_community_by_handle(pool: &DbPool, handle: &str) -> Result<Option<Community>, AppError> {
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
        WHERE handle = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(handle)
    .bind(std::env::var("CREDENTIAL_ENC_KEY").unwrap_or_else(|_| "insecure-dev-credential-key".to_string()))
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(row)
}

pub struct CommunityUpdate {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    pub allow_external_discovery: Option<bool>,
    pub rules: Option<serde_json::Value>,
    pub categories: Option<serde_json::Value>,
    pub record_uri: String,
    pub record_cid: String,
}

/// Applies a community profile record observed on the firehose to the
/// AppView row. Called only from the indexer (C8) — the write-forward path
/// (C5 `update_community`) never calls this directly, since the profile
/// record is the source of truth and the AppView projection of it is only
/// ever current after the commit round-trips back through the firehose.
pub async fn update_community_profile(
    pool: &DbPool,
    did: &str,
    update: CommunityUpdate,
) -> Result<Community, AppError> {
    let row = sqlx::query_as::<_, Community>(
        r#"
        UPDATE communities
        SET display_name = COALESCE($2, display_name),
            description = COALESCE($3, description),
            visibility = COALESCE($4, visibility),
            allow_external_discovery = COALESCE($5, allow_external_discovery),
            rules = COALESCE($6, rules),
            categories = COALESCE($7, categories),
            record_uri = $8,
            record_cid = $9,
            updated_at = now()
        WHERE did = $1 AND deleted_at IS NULL
        RETURNING
            did, handle, name, display_name, description, facets, avatar_cid, banner_cid,
            rules, categories, language,
            owner_did, created_by_did, hosted_by_did,
            visibility, allow_external_discovery, moderation_type, content_warnings,
            pds_url, pds_email, pds_password, pds_access_token, pds_refresh_token,
            member_count, subscriber_count, post_count,
            record_uri, record_cid, created_at, updated_at, deleted_at
        "#,
    )
    .bind(did)
    .bind(&update.display_name)
    .bind(&update.description)
    .bind(&update.visibility)
    .bind(update.allow_external_discovery)
    .bind(&update.rules)
    .bind(&update.categories)
    .bind(&update.record_uri)
    .bind(&update.record_cid)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    row.ok_or_else(|| AppError::NotFound(format!("community {did} not found")))
}

/// Moderation settings are instance-local policy, never written into the
/// federated profile record, so they have no firehose event to ride back in
/// on and are applied directly.
pub async fn update_community_moderation(
    pool: &DbPool,
    did: &str,
    moderation_type: Option<String>,
    content_warnings: Option<serde_json::Value>,
) -> Result<(), AppError> {
    if moderation_type.is_none() && content_warnings.is_none() {
        return Ok(());
    }
    sqlx::query(
        r#"
        UPDATE communities
        SET moderation_type = COALESCE($2, moderation_type),
            content_warnings = COALESCE($3, content_warnings),
            updated_at = now()
        WHERE did = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(did)
    .bind(&moderation_type)
    .bind(&content_warnings)
    .execute(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(())
}

/// Plain (non-HMAC) cursor for the community directory: pagination here has
/// no tamper-sensitivity (it doesn't gate access to anything), unlike the
/// feed cursor in `feed::cursor`.
pub fn encode_directory_cursor(sort_key: &str, did: &str) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(format!("{sort_key}\u{0}{did}"))
}

pub fn decode_directory_cursor(cursor: &str) -> Result<(String, String), AppError> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    let bytes = URL_SAFE_NO_PAD.decode(cursor).map_err(|_| AppError::InvalidCursor)?;
    let text = String::from_utf8(bytes).map_err(|_| AppError::InvalidCursor)?;
    let (sort_key, did) = text.split_once('\u{0}').ok_or(AppError::InvalidCursor)?;
    Ok((sort_key.to_string(), did.to_string()))
}

const COMMUNITY_COLUMNS: &str = r#"
    did, handle, name, display_name, description, facets, avatar_cid, banner_cid,
    rules, categories, language,
    owner_did, created_by_did, hosted_by_did,
    visibility, allow_external_discovery, moderation_type, content_warnings,
    pds_url, pds_email, pds_password, pds_access_token, pds_refresh_token,
    member_count, subscriber_count, post_count,
    record_uri, record_cid, created_at, updated_at, deleted_at
"#;

/// The community directory (`community.list`): four fixed sort modes,
/// each its own query, matching the whitelist-dispatch pattern the feed
/// ranking queries use rather than interpolating `sort` into SQL.
pub async fn list_communities(
    pool: &DbPool,
    sort: &str,
    visibility: Option<&str>,
    cursor: Option<(String, String)>,
    limit: i64,
) -> Result<Vec<Community>, AppError> {
    match sort {
        "active" => list_by_timestamp(pool, "updated_at", visibility, cursor, limit).await,
        "new" => list_by_timestamp(pool, "created_at", visibility, cursor, limit).await,
        "alphabetical" => list_alphabetical(pool, visibility, cursor, limit).await,
        _ => list_by_subscriber_count(pool, visibility, cursor, limit).await,
    }
}

async fn list_by_timestamp(
    pool: &DbPool,
    column: &str,
    visibility: Option<&str>,
    cursor: Option<(String, String)>,
    limit: i64,
) -> Result<Vec<Community>, AppError> {
    let cursor_time = cursor.as_ref().and_then(|(v, _)| v.parse::<DateTime<Utc>>().ok());
    let cursor_did = cursor.as_ref().map(|(_, d)| d.clone());
    let query = format!(
        "SELECT {COMMUNITY_COLUMNS} FROM communities \
         WHERE deleted_at IS NULL AND visibility != 'private' \
         AND ($2::timestamptz IS NULL OR ({column}, did) < ($2, $3)) \
         AND ($4::text IS NULL OR visibility = $4) \
         ORDER BY {column} DESC, did DESC LIMIT $1"
    );
    sqlx::query_as::<_, Community>(&query)
        .bind(limit)
        .bind(cursor_time)
        .bind(cursor_did)
        .bind(visibility)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

async fn list_alphabetical(
    pool: &DbPool,
    visibility: Option<&str>,
    cursor: Option<(String, String)>,
    limit: i64,
) -> Result<Vec<Community>, AppError> {
    let (cursor_name, cursor_did) = cursor.map(|(n, d)| (Some(n), Some(d))).unwrap_or((None, None));
    let query = format!(
        "SELECT {COMMUNITY_COLUMNS} FROM communities \
         WHERE deleted_at IS NULL AND visibility != 'private' \
         AND ($2::text IS NULL OR (name, did) > ($2, $3)) \
         AND ($4::text IS NULL OR visibility = $4) \
         ORDER BY name ASC, did ASC LIMIT $1"
    );
    sqlx::query_as::<_, Community>(&query)
        .bind(limit)
        .bind(cursor_name)
        .bind(cursor_did)
        .bind(visibility)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

async fn list_by_subscriber_count(
    pool: &DbPool,
    visibility: Option<&str>,
    cursor: Option<(String, String)>,
    limit: i64,
) -> Result<Vec<Community>, AppError> {
    let cursor_count = cursor.as_ref().and_then(|(v, _)| v.parse::<i64>().ok());
    let cursor_did = cursor.as_ref().map(|(_, d)| d.clone());
    let query = format!(
        "SELECT {COMMUNITY_COLUMNS} FROM communities \
         WHERE deleted_at IS NULL AND visibility != 'private' \
         AND ($2::bigint IS NULL OR (subscriber_count, did) < ($2, $3)) \
         AND ($4::text IS NULL OR visibility = $4) \
         ORDER BY subscriber_count DESC, did DESC LIMIT $1"
    );
    sqlx::query_as::<_, Community>(&query)
        .bind(limit)
        .bind(cursor_count)
        .bind(cursor_did)
        .bind(visibility)
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))
}

pub async fn search_communities(pool: &DbPool, query: &str, limit: i64) -> Result<Vec<Community>, AppError> {
    let rows = sqlx::query_as::<_, Community>(
        r#"
        SELECT
            did, handle, name, display_name, description, facets, avatar_cid, banner_cid,
            rules, categories, language,
            owner_did, created_by_did, hosted_by_did,
            visibility, allow_external_discovery, moderation_type, content_warnings,
            pds_url, pds_email, pds_password, pds_access_token, pds_refresh_token,
            member_count, subscriber_count, post_count,
            record_uri, record_cid, created_at, updated_at, deleted_at
        FROM communities
        WHERE deleted_at IS NULL
          AND visibility != 'private'
          AND (name ILIKE '%' || $1 || '%' OR description ILIKE '%' || $1 || '%')
        ORDER BY similarity(name, $1) DESC, subscriber_count DESC
        LIMIT $2
        "#,
    )
    .bind(query)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

// ---------------------------------------------------------------------
// Subscriptions (C6)
// ---------------------------------------------------------------------

pub async fn create_subscription(
    pool: &DbPool,
    user_did: &str,
    community_did: &str,
    record_uri: &str,
    record_cid: &str,
    content_visibility: i16,
) -> Result<Subscription, AppError> {
    let mut tx = pool.begin().await.map_err(|e| AppError::Internal(e.into()))?;

    let row = sqlx::query_as::<_, Subscription>(
        r#"
        INSERT INTO community_subscriptions (user_did, community_did, record_uri, record_cid, content_visibility, subscribed_at)
        VALUES ($1, $2, $3, $4, $5, now())
        ON CONFLICT (user_did, community_did) DO NOTHING
        RETURNING user_did, community_did, record_uri, record_cid, content_visibility, subscribed_at
        "#,
    )
    .bind(user_did)
    .bind(community_did)
    .bind(record_uri)
    .bind(record_cid)
    .bind(content_visibility)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    let row = match row {
        Some(r) => r,
        None => {
            tx.rollback().await.ok();
            return Err(AppError::SubscriptionAlreadyExists);
        }
    };

    sqlx::query("UPDATE communities SET subscriber_count = subscriber_count + 1 WHERE did = $1")
        .bind(community_did)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    tx.commit().await.map_err(|e| AppError::Internal(e.into()))?;
    Ok(row)
}

pub async fn delete_subscription(pool: &DbPool, user_did: &str, community_did: &str) -> Result<(), AppError> {
    let mut tx = pool.begin().await.map_err(|e| AppError::Internal(e.into()))?;

    let result = sqlx::query("DELETE FROM community_subscriptions WHERE user_did = $1 AND community_did = $2")
        .bind(user_did)
        .bind(community_did)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    if result.rows_affected() == 0 {
        tx.rollback().await.ok();
        return Err(AppError::SubscriptionNotFound);
    }

    sqlx::query("UPDATE communities SET subscriber_count = GREATEST(0, subscriber_count - 1) WHERE did = $1")
        .bind(community_did)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    tx.commit().await.map_err(|e| AppError::Internal(e.into()))?;
    Ok(())
}

pub async fn get_subscription(pool: &DbPool, user_did: &str, community_did: &str) -> Result<Option<Subscription>, AppError> {
    let row = sqlx::query_as::<_, Subscription>(
        "SELECT user_did, community_did, record_uri, record_cid, content_visibility, subscribed_at \
         FROM community_subscriptions WHERE user_did = $1 AND community_did = $2",
    )
    .bind(user_did)
    .bind(community_did)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(row)
}

pub async fn list_subscriptions_for_user(pool: &DbPool, user_did: &str) -> Result<Vec<Subscription>, AppError> {
    let rows = sqlx::query_as::<_, Subscription>(
        "SELECT user_did, community_did, record_uri, record_cid, content_visibility, subscribed_at \
         FROM community_subscriptions WHERE user_did = $1 ORDER BY subscribed_at DESC",
    )
    .bind(user_did)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

// ---------------------------------------------------------------------
// Blocks (C6)
// ---------------------------------------------------------------------

pub async fn create_block(
    pool: &DbPool,
    user_did: &str,
    community_did: &str,
    record_uri: &str,
    record_cid: &str,
) -> Result<CommunityBlock, AppError> {
    let row = sqlx::query_as::<_, CommunityBlock>(
        r#"
        INSERT INTO community_blocks (user_did, community_did, record_uri, record_cid, blocked_at)
        VALUES ($1, $2, $3, $4, now())
        ON CONFLICT (user_did, community_did) DO NOTHING
        RETURNING user_did, community_did, record_uri, record_cid, blocked_at
        "#,
    )
    .bind(user_did)
    .bind(community_did)
    .bind(record_uri)
    .bind(record_cid)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    row.ok_or(AppError::BlockAlreadyExists)
}

pub async fn delete_block(pool: &DbPool, user_did: &str, community_did: &str) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM community_blocks WHERE user_did = $1 AND community_did = $2")
        .bind(user_did)
        .bind(community_did)
        .execute(pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;

    if result.rows_affected() == 0 {
        return Err(AppError::BlockNotFound);
    }
    Ok(())
}

pub async fn list_blocks_for_user(pool: &DbPool, user_did: &str) -> Result<Vec<CommunityBlock>, AppError> {
    let rows = sqlx::query_as::<_, CommunityBlock>(
        "SELECT user_did, community_did, record_uri, record_cid, blocked_at \
         FROM community_blocks WHERE user_did = $1 ORDER BY blocked_at DESC",
    )
    .bind(user_did)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

// ---------------------------------------------------------------------
// Memberships
// ---------------------------------------------------------------------

pub async fn get_membership(pool: &DbPool, user_did: &str, community_did: &str) -> Result<Option<Membership>, AppError> {
    let row = sqlx::query_as::<_, Membership>(
        "SELECT user_did, community_did, reputation_score, contribution_count, is_banned, is_moderator, joined_at, last_active_at \
         FROM memberships WHERE user_did = $1 AND community_did = $2",
    )
    .bind(user_did)
    .bind(community_did)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(row)
}

pub async fn upsert_membership(pool: &DbPool, user_did: &str, community_did: &str) -> Result<Membership, AppError> {
    let row = sqlx::query_as::<_, Membership>(
        r#"
        INSERT INTO memberships (user_did, community_did, reputation_score, contribution_count, is_banned, is_moderator, joined_at, last_active_at)
        VALUES ($1, $2, 0, 0, false, false, now(), now())
        ON CONFLICT (user_did, community_did) DO UPDATE SET last_active_at = now()
        RETURNING user_did, community_did, reputation_score, contribution_count, is_banned, is_moderator, joined_at, last_active_at
        "#,
    )
    .bind(user_did)
    .bind(community_did)
    .fetch_one(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(row)
}

// ---------------------------------------------------------------------
// Posts
// ---------------------------------------------------------------------

pub async fn get_post_by_uri(pool: &DbPool, uri: &str) -> Result<Option<Post>, AppError> {
    let row = sqlx::query_as::<_, Post>(
        "SELECT uri, cid, rkey, author_did, community_did, content, facets, embeds, labels, languages, score, created_at, deleted_at \
         FROM posts WHERE uri = $1",
    )
    .bind(uri)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(row)
}

pub async fn upsert_post(pool: &DbPool, post: &Post) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO posts (uri, cid, rkey, author_did, community_did, content, facets, embeds, labels, languages, score, created_at, deleted_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (uri) DO UPDATE SET
            cid = EXCLUDED.cid,
            content = EXCLUDED.content,
            facets = EXCLUDED.facets,
            embeds = EXCLUDED.embeds,
            labels = EXCLUDED.labels,
            languages = EXCLUDED.languages
        "#,
    )
    .bind(&post.uri)
    .bind(&post.cid)
    .bind(&post.rkey)
    .bind(&post.author_did)
    .bind(&post.community_did)
    .bind(&post.content)
    .bind(&post.facets)
    .bind(&post.embeds)
    .bind(&post.labels)
    .bind(&post.languages)
    .bind(post.score)
    .bind(post.created_at)
    .bind(post.deleted_at)
    .execute(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(())
}

pub async fn soft_delete_post(pool: &DbPool, uri: &str) -> Result<(), AppError> {
    sqlx::query("UPDATE posts SET deleted_at = now() WHERE uri = $1 AND deleted_at IS NULL")
        .bind(uri)
        .execute(pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(())
}

pub async fn bump_community_post_count(pool: &DbPool, community_did: &str, delta: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE communities SET post_count = GREATEST(0, post_count + $2) WHERE did = $1")
        .bind(community_did)
        .bind(delta)
        .execute(pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(())
}

/// Posts for a single community's feed, newest first (cursor-paginated by
/// the caller via `created_at < cursor_time`).
pub async fn list_posts_for_community(
    pool: &DbPool,
    community_did: &str,
    before: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<Post>, AppError> {
    let rows = sqlx::query_as::<_, Post>(
        r#"
        SELECT uri, cid, rkey, author_did, community_did, content, facets, embeds, labels, languages, score, created_at, deleted_at
        FROM posts
        WHERE community_did = $1 AND deleted_at IS NULL AND ($2::timestamptz IS NULL OR created_at < $2)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(community_did)
    .bind(before)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

/// All non-deleted, non-expired posts considered for hot/top ranking within
/// a window; the caller applies the ranking formula in-process (C9).
pub async fn list_posts_for_ranking(
    pool: &DbPool,
    community_did: Option<&str>,
    since: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Post>, AppError> {
    let rows = sqlx::query_as::<_, Post>(
        r#"
        SELECT uri, cid, rkey, author_did, community_did, content, facets, embeds, labels, languages, score, created_at, deleted_at
        FROM posts
        WHERE deleted_at IS NULL
          AND created_at >= $2
          AND ($1::text IS NULL OR community_did = $1)
        ORDER BY created_at DESC
        LIMIT $3
        "#,
    )
    .bind(community_did)
    .bind(since)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

// ---------------------------------------------------------------------
// Comments
// ---------------------------------------------------------------------

pub async fn get_comment_by_uri(pool: &DbPool, uri: &str) -> Result<Option<Comment>, AppError> {
    let row = sqlx::query_as::<_, Comment>(
        "SELECT uri, cid, rkey, author_did, root_uri, parent_uri, content, facets, embeds, labels, languages, score, created_at, deleted_at \
         FROM comments WHERE uri = $1",
    )
    .bind(uri)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(row)
}

pub async fn upsert_comment(pool: &DbPool, comment: &Comment) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO comments (uri, cid, rkey, author_did, root_uri, parent_uri, content, facets, embeds, labels, languages, score, created_at, deleted_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        ON CONFLICT (uri) DO UPDATE SET
            cid = EXCLUDED.cid,
            content = EXCLUDED.content,
            facets = EXCLUDED.facets,
            embeds = EXCLUDED.embeds,
            labels = EXCLUDED.labels,
            languages = EXCLUDED.languages
        "#,
    )
    .bind(&comment.uri)
    .bind(&comment.cid)
    .bind(&comment.rkey)
    .bind(&comment.author_did)
    .bind(&comment.root_uri)
    .bind(&comment.parent_uri)
    .bind(&comment.content)
    .bind(&comment.facets)
    .bind(&comment.embeds)
    .bind(&comment.labels)
    .bind(&comment.languages)
    .bind(comment.score)
    .bind(comment.created_at)
    .bind(comment.deleted_at)
    .execute(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(())
}

pub async fn soft_delete_comment(pool: &DbPool, uri: &str) -> Result<(), AppError> {
    sqlx::query("UPDATE comments SET deleted_at = now() WHERE uri = $1 AND deleted_at IS NULL")
        .bind(uri)
        .execute(pool)
        .await
        .map_err(|e| AppError::Internal(e.into()))?;
    Ok(())
}

pub async fn list_comments_for_post(pool: &DbPool, root_uri: &str, limit: i64) -> Result<Vec<Comment>, AppError> {
    let rows = sqlx::query_as::<_, Comment>(
        r#"
        SELECT uri, cid, rkey, author_did, root_uri, parent_uri, content, facets, embeds, labels, languages, score, created_at, deleted_at
        FROM comments
        WHERE root_uri = $1 AND deleted_at IS NULL
        ORDER BY created_at ASC
        LIMIT $2
        "#,
    )
    .bind(root_uri)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

// ---------------------------------------------------------------------
// Viewer state (C10)
// ---------------------------------------------------------------------

/// Batched subscription lookup for a set of community DIDs, keyed by DID.
pub async fn subscriptions_for_viewer(
    pool: &DbPool,
    user_did: &str,
    community_dids: &[String],
) -> Result<Vec<Subscription>, AppError> {
    let rows = sqlx::query_as::<_, Subscription>(
        "SELECT user_did, community_did, record_uri, record_cid, content_visibility, subscribed_at \
         FROM community_subscriptions WHERE user_did = $1 AND community_did = ANY($2)",
    )
    .bind(user_did)
    .bind(community_dids)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

/// Batched block lookup for a set of community DIDs, keyed by DID.
pub async fn blocks_for_viewer(
    pool: &DbPool,
    user_did: &str,
    community_dids: &[String],
) -> Result<Vec<CommunityBlock>, AppError> {
    let rows = sqlx::query_as::<_, CommunityBlock>(
        "SELECT user_did, community_did, record_uri, record_cid, blocked_at \
         FROM community_blocks WHERE user_did = $1 AND community_did = ANY($2)",
    )
    .bind(user_did)
    .bind(community_dids)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

/// Batched vote lookup for a set of post/comment URIs.
pub async fn votes_for_viewer(
    pool: &DbPool,
    user_did: &str,
    subject_uris: &[String],
) -> Result<Vec<Vote>, AppError> {
    let rows = sqlx::query_as::<_, Vote>(
        "SELECT user_did, subject_uri, direction, created_at \
         FROM votes WHERE user_did = $1 AND subject_uri = ANY($2)",
    )
    .bind(user_did)
    .bind(subject_uris)
    .fetch_all(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        std::env::remove_var("DATABASE_URL");
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
    }
}
