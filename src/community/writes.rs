//! User-scoped writes: subscribe/unsubscribe, block/unblock.

use chrono::Utc;

use crate::db;
use crate::error::AppError;
use crate::identity::resolve_identifier;
use crate::models::Community;
use crate::pds_client::PdsClient;
use crate::records::{
    BlockRecord, SubscriptionRecord, COMMUNITY_BLOCK_COLLECTION, COMMUNITY_SUBSCRIPTION_COLLECTION,
};

fn clamp_content_visibility(value: Option<i16>) -> i16 {
    match value {
        Some(v) if (1..=5).contains(&v) => v,
        _ => 3,
    }
}

pub struct SubscribeResult {
    pub uri: String,
    pub cid: String,
    pub existing: bool,
}

pub async fn subscribe_to_community(
    pool: &db::DbPool,
    pds_client: &PdsClient,
    instance_domain: &str,
    user_did: &str,
    user_access_token: &str,
    user_pds_url: &str,
    community_identifier: &str,
    content_visibility: Option<i16>,
) -> Result<SubscribeResult, AppError> {
    let community_did = resolve_identifier(pool, community_identifier, instance_domain).await?;
    let community: Community = db::get_community_by_did(pool, &community_did)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("community {community_did} not found")))?;

    if community.visibility == "private" {
        return Err(AppError::Forbidden("community is private".into()));
    }

    let visibility = clamp_content_visibility(content_visibility);
    let record = SubscriptionRecord {
        type_: COMMUNITY_SUBSCRIPTION_COLLECTION.to_string(),
        subject: community_did.clone(),
        created_at: Utc::now().to_rfc3339(),
        content_visibility: visibility,
    };
    let record_value = serde_json::to_value(&record).map_err(|e| AppError::Internal(e.into()))?;

    match pds_client
        .create_record(user_pds_url, user_did, COMMUNITY_SUBSCRIPTION_COLLECTION, None, record_value, user_access_token)
        .await
    {
        Ok(record_ref) => Ok(SubscribeResult { uri: record_ref.uri, cid: record_ref.cid, existing: false }),
        Err(AppError::Pds(crate::error::PdsErrorKind::Conflict)) => {
            // Eventual-consistency window: the PDS says this
            // already exists. If the firehose has caught up, hand back the
            // indexed row; otherwise this is a typed AlreadyExists.
            match db::get_subscription(pool, user_did, &community_did).await? {
                Some(existing) => Ok(SubscribeResult { uri: existing.record_uri, cid: existing.record_cid, existing: true }),
                None => Err(AppError::SubscriptionAlreadyExists),
            }
        }
        Err(e) => Err(e),
    }
}

pub async fn unsubscribe_from_community(
    pool: &db::DbPool,
    pds_client: &PdsClient,
    instance_domain: &str,
    user_did: &str,
    user_access_token: &str,
    user_pds_url: &str,
    community_identifier: &str,
) -> Result<(), AppError> {
    let community_did = resolve_identifier(pool, community_identifier, instance_domain).await?;
    let subscription = db::get_subscription(pool, user_did, &community_did)
        .await?
        .ok_or(AppError::SubscriptionNotFound)?;

    let rkey = rkey_from_uri(&subscription.record_uri)?;
    pds_client
        .delete_record(user_pds_url, user_did, COMMUNITY_SUBSCRIPTION_COLLECTION, &rkey, user_access_token)
        .await?;
    Ok(())
}

pub struct BlockResult {
    pub uri: String,
    pub cid: String,
}

pub async fn block_community(
    pool: &db::DbPool,
    pds_client: &PdsClient,
    instance_domain: &str,
    user_did: &str,
    user_access_token: &str,
    user_pds_url: &str,
    community_identifier: &str,
) -> Result<BlockResult, AppError> {
    let community_did = resolve_identifier(pool, community_identifier, instance_domain).await?;

    let record = BlockRecord {
        type_: COMMUNITY_BLOCK_COLLECTION.to_string(),
        subject: community_did.clone(),
        created_at: Utc::now().to_rfc3339(),
    };
    let record_value = serde_json::to_value(&record).map_err(|e| AppError::Internal(e.into()))?;

    match pds_client
        .create_record(user_pds_url, user_did, COMMUNITY_BLOCK_COLLECTION, None, record_value, user_access_token)
        .await
    {
        Ok(record_ref) => Ok(BlockResult { uri: record_ref.uri, cid: record_ref.cid }),
        Err(AppError::Pds(crate::error::PdsErrorKind::Conflict)) => {
            match db::list_blocks_for_user(pool, user_did).await?.into_iter().find(|b| b.community_did == community_did) {
                Some(existing) => Ok(BlockResult { uri: existing.record_uri, cid: existing.record_cid }),
                None => Err(AppError::BlockAlreadyExists),
            }
        }
        Err(e) => Err(e),
    }
}

pub async fn unblock_community(
    pool: &db::DbPool,
    pds_client: &PdsClient,
    instance_domain: &str,
    user_did: &str,
    user_access_token: &str,
    user_pds_url: &str,
    community_identifier: &str,
) -> Result<(), AppError> {
    let community_did = resolve_identifier(pool, community_identifier, instance_domain).await?;
    let block = db::list_blocks_for_user(pool, user_did)
        .await?
        .into_iter()
        .find(|b| b.community_did == community_did)
        .ok_or(AppError::BlockNotFound)?;

    let rkey = rkey_from_uri(&block.record_uri)?;
    pds_client
        .delete_record(user_pds_url, user_did, COMMUNITY_BLOCK_COLLECTION, &rkey, user_access_token)
        .await?;
    Ok(())
}

fn rkey_from_uri(uri: &str) -> Result<String, AppError> {
    uri.rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .map(String::from)
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("malformed record_uri: {uri}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_content_visibility() {
        assert_eq!(clamp_content_visibility(Some(1)), 1);
        assert_eq!(clamp_content_visibility(Some(5)), 5);
        assert_eq!(clamp_content_visibility(Some(0)), 3);
        assert_eq!(clamp_content_visibility(Some(6)), 3);
        assert_eq!(clamp_content_visibility(None), 3);
    }

    #[test]
    fn test_rkey_from_uri() {
        assert_eq!(
            rkey_from_uri("at://did:plc:abc/social.coves.community.subscription/xyz").unwrap(),
            "xyz"
        );
        assert!(rkey_from_uri("at://did:plc:abc/social.coves.community.subscription/").is_err());
    }
}
