//! Indexer (C8): idempotently applies routed commit events to the AppView
//! tables, tolerating replays and out-of-order arrival.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::db;
use crate::models::{Comment, Post};
use crate::records::{
    COMMENT_COLLECTION, COMMUNITY_BLOCK_COLLECTION, COMMUNITY_PROFILE_COLLECTION,
    COMMUNITY_SUBSCRIPTION_COLLECTION, POST_COLLECTION,
};

use super::CommitEvent;

pub async fn upsert_identity(pool: &PgPool, did: &str, handle: &str) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO identities (did, handle, updated_at)
        VALUES ($1, $2, now())
        ON CONFLICT (did) DO UPDATE SET handle = EXCLUDED.handle, updated_at = now()
        "#,
    )
    .bind(did)
    .bind(handle)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn handle_commit(pool: &PgPool, event: CommitEvent) {
    let did = match &event.did {
        Some(did) if !did.is_empty() => did.clone(),
        _ => {
            tracing::warn!("malformed commit event (missing did), dropping");
            return;
        }
    };
    let collection = match &event.collection {
        Some(c) => c.clone(),
        None => {
            tracing::warn!(did = %did, "malformed commit event (missing collection), dropping");
            return;
        }
    };
    let rkey = match &event.rkey {
        Some(r) => r.clone(),
        None => {
            tracing::warn!(did = %did, collection = %collection, "malformed commit event (missing rkey), dropping");
            return;
        }
    };
    let operation = event.operation.clone().unwrap_or_else(|| "create".to_string());
    let uri = format!("at://{did}/{collection}/{rkey}");

    let result = match collection.as_str() {
        COMMUNITY_PROFILE_COLLECTION => index_profile(pool, &did, &uri, &operation, &event).await,
        COMMUNITY_SUBSCRIPTION_COLLECTION => index_subscription(pool, &did, &uri, &operation, &event).await,
        COMMUNITY_BLOCK_COLLECTION => index_block(pool, &did, &uri, &operation, &event).await,
        POST_COLLECTION => index_post(pool, &did, &uri, &rkey, &operation, &event).await,
        COMMENT_COLLECTION => index_comment(pool, &did, &uri, &rkey, &operation, &event).await,
        other => {
            tracing::debug!(collection = %other, "commit to unrecognized collection, ignored");
            Ok(())
        }
    };

    if let Err(e) = result {
        tracing::error!(uri = %uri, collection = %collection, error = %e, "indexer error, skipping event");
    }
}

/// Community profile records are mutated via `UpdateCommunity` (C5), which
/// writes to the PDS and returns an in-memory view immediately but defers
/// the AppView row update to this handler, so this is the only path that
/// ever persists display_name/description/visibility/allow_external_discovery
/// changes. Deletes are not meaningful for a `self`-keyed profile record and
/// are ignored.
async fn index_profile(
    pool: &PgPool,
    did: &str,
    uri: &str,
    operation: &str,
    event: &CommitEvent,
) -> Result<(), anyhow::Error> {
    if operation == "delete" {
        tracing::debug!(uri, "ignoring delete of community profile record");
        return Ok(());
    }

    let record = event.record.as_ref().ok_or_else(|| anyhow::anyhow!("commit missing record body"))?;
    let cid = event.cid.clone().unwrap_or_default();

    db::update_community_profile(
        pool,
        did,
        db::CommunityUpdate {
            display_name: record.get("displayName").and_then(|v| v.as_str()).map(String::from),
            description: record.get("description").and_then(|v| v.as_str()).map(String::from),
            visibility: record.get("visibility").and_then(|v| v.as_str()).map(String::from),
            allow_external_discovery: record
                .get("federation")
                .and_then(|f| f.get("allowExternalDiscovery"))
                .and_then(|v| v.as_bool()),
            rules: record.get("rules").cloned(),
            categories: record.get("categories").cloned(),
            record_uri: uri.to_string(),
            record_cid: cid,
        },
    )
    .await?;
    Ok(())
}

async fn index_subscription(
    pool: &PgPool,
    user_did: &str,
    uri: &str,
    operation: &str,
    event: &CommitEvent,
) -> Result<(), anyhow::Error> {
    match operation {
        "delete" => {
            if let Some(community_did) = lookup_subscription_community(pool, uri).await? {
                match db::delete_subscription(pool, user_did, &community_did).await {
                    Ok(()) => {}
                    Err(crate::error::AppError::SubscriptionNotFound) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        }
        _ => {
            let record = event.record.as_ref().ok_or_else(|| anyhow::anyhow!("commit missing record body"))?;
            let community_did = record
                .get("subject")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("subscription record missing subject"))?;
            let content_visibility = record.get("contentVisibility").and_then(|v| v.as_i64()).unwrap_or(3) as i16;
            let cid = event.cid.clone().unwrap_or_default();

            match db::create_subscription(pool, user_did, community_did, uri, &cid, content_visibility).await {
                Ok(_) | Err(crate::error::AppError::SubscriptionAlreadyExists) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }
}

async fn index_block(
    pool: &PgPool,
    user_did: &str,
    uri: &str,
    operation: &str,
    event: &CommitEvent,
) -> Result<(), anyhow::Error> {
    match operation {
        "delete" => {
            if let Some(community_did) = lookup_block_community(pool, uri).await? {
                match db::delete_block(pool, user_did, &community_did).await {
                    Ok(()) => {}
                    Err(crate::error::AppError::BlockNotFound) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Ok(())
        }
        _ => {
            let record = event.record.as_ref().ok_or_else(|| anyhow::anyhow!("commit missing record body"))?;
            let community_did = record
                .get("subject")
                .and_then(|v| v.as_str())
                .ok_or_else(|| anyhow::anyhow!("block record missing subject"))?;
            let cid = event.cid.clone().unwrap_or_default();

            match db::create_block(pool, user_did, community_did, uri, &cid).await {
                Ok(_) | Err(crate::error::AppError::BlockAlreadyExists) => Ok(()),
                Err(e) => Err(e.into()),
            }
        }
    }
}

async fn lookup_subscription_community(pool: &PgPool, record_uri: &str) -> Result<Option<String>, anyhow::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT community_did FROM community_subscriptions WHERE record_uri = $1")
        .bind(record_uri)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(c,)| c))
}

async fn lookup_block_community(pool: &PgPool, record_uri: &str) -> Result<Option<String>, anyhow::Error> {
    let row: Option<(String,)> = sqlx::query_as("SELECT community_did FROM community_blocks WHERE record_uri = $1")
        .bind(record_uri)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(c,)| c))
}

async fn index_post(
    pool: &PgPool,
    author_did: &str,
    uri: &str,
    rkey: &str,
    operation: &str,
    event: &CommitEvent,
) -> Result<(), anyhow::Error> {
    if operation == "delete" {
        let existing = db::get_post_by_uri(pool, uri).await?;
        db::soft_delete_post(pool, uri).await?;
        if let Some(post) = existing.filter(|p| p.deleted_at.is_none()) {
            db::bump_community_post_count(pool, &post.community_did, -1).await?;
        }
        return Ok(());
    }

    let record = event.record.as_ref().ok_or_else(|| anyhow::anyhow!("commit missing record body"))?;
    let community_did = record
        .get("community")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("post record missing community"))?
        .to_string();
    let created_at = parse_created_at(record);

    let post = Post {
        uri: uri.to_string(),
        cid: event.cid.clone().unwrap_or_default(),
        rkey: rkey.to_string(),
        author_did: author_did.to_string(),
        community_did: community_did.clone(),
        content: record.get("text").and_then(|v| v.as_str()).map(String::from),
        facets: record.get("facets").cloned(),
        embeds: record.get("embed").cloned(),
        labels: record.get("labels").cloned(),
        languages: record.get("langs").cloned(),
        score: 0,
        created_at,
        deleted_at: None,
    };

    let was_new = db::get_post_by_uri(pool, uri).await?.is_none();
    db::upsert_post(pool, &post).await?;
    if was_new && operation == "create" {
        db::bump_community_post_count(pool, &community_did, 1).await?;
    }
    Ok(())
}

async fn index_comment(
    pool: &PgPool,
    author_did: &str,
    uri: &str,
    rkey: &str,
    operation: &str,
    event: &CommitEvent,
) -> Result<(), anyhow::Error> {
    if operation == "delete" {
        db::soft_delete_comment(pool, uri).await?;
        return Ok(());
    }

    let record = event.record.as_ref().ok_or_else(|| anyhow::anyhow!("commit missing record body"))?;
    let root_uri = record
        .get("root")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow::anyhow!("comment record missing root"))?
        .to_string();
    let parent_uri = record
        .get("parent")
        .and_then(|v| v.as_str())
        .unwrap_or(&root_uri)
        .to_string();
    let created_at = parse_created_at(record);

    let comment = Comment {
        uri: uri.to_string(),
        cid: event.cid.clone().unwrap_or_default(),
        rkey: rkey.to_string(),
        author_did: author_did.to_string(),
        root_uri,
        parent_uri,
        content: record.get("text").and_then(|v| v.as_str()).map(String::from),
        facets: record.get("facets").cloned(),
        embeds: record.get("embed").cloned(),
        labels: record.get("labels").cloned(),
        languages: record.get("langs").cloned(),
        score: 0,
        created_at,
        deleted_at: None,
    };

    db::upsert_comment(pool, &comment).await?;
    Ok(())
}

fn parse_created_at(record: &serde_json::Value) -> DateTime<Utc> {
    record
        .get("createdAt")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_created_at_falls_back_to_now_on_bad_input() {
        let record = serde_json::json!({ "createdAt": "not-a-date" });
        let parsed = parse_created_at(&record);
        assert!((Utc::now() - parsed).num_seconds() < 5);
    }

    #[test]
    fn test_parse_created_at_parses_rfc3339() {
        let record = serde_json::json!({ "createdAt": "2026-07-28T00:00:00Z" });
        let parsed = parse_created_at(&record);
        assert_eq!(parsed.to_rfc3339(), "2026-07-28T00:00:00+00:00");
    }
}
