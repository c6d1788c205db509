//! AppView row types. These map 1:1 onto the tables created under
//! `migrations/` and are the shapes the indexer (C8) and feed/query engines
//! (C9/C10) read and write.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;

/// A community row as seen internally (carries decrypted PDS credentials,
/// never serialized to the wire — see `CommunityView`).
#[derive(Debug, Clone, FromRow)]
pub struct Community {
    pub did: String,
    pub handle: String,
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub facets: Option<serde_json::Value>,
    pub avatar_cid: Option<String>,
    pub banner_cid: Option<String>,
    pub rules: Option<serde_json::Value>,
    pub categories: Option<serde_json::Value>,
    pub language: Option<String>,

    pub owner_did: String,
    pub created_by_did: String,
    pub hosted_by_did: String,

    pub visibility: String,
    pub allow_external_discovery: bool,
    pub moderation_type: Option<String>,
    pub content_warnings: Option<serde_json::Value>,

    pub pds_url: String,
    pub pds_email: String,
    pub pds_password: String,
    pub pds_access_token: String,
    pub pds_refresh_token: String,

    pub member_count: i64,
    pub subscriber_count: i64,
    pub post_count: i64,

    pub record_uri: String,
    pub record_cid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Wire representation of a community: credential fields are never included,
/// since PDS session secrets must never reach a client.
#[derive(Debug, Clone, Serialize)]
pub struct CommunityView {
    pub did: String,
    pub handle: String,
    pub name: String,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "avatarCid", skip_serializing_if = "Option::is_none")]
    pub avatar_cid: Option<String>,
    #[serde(rename = "bannerCid", skip_serializing_if = "Option::is_none")]
    pub banner_cid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(rename = "ownerDid")]
    pub owner_did: String,
    #[serde(rename = "createdByDid")]
    pub created_by_did: String,
    #[serde(rename = "hostedByDid")]
    pub hosted_by_did: String,
    pub visibility: String,
    #[serde(rename = "allowExternalDiscovery")]
    pub allow_external_discovery: bool,
    #[serde(rename = "memberCount")]
    pub member_count: i64,
    #[serde(rename = "subscriberCount")]
    pub subscriber_count: i64,
    #[serde(rename = "postCount")]
    pub post_count: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl From<&Community> for CommunityView {
    fn from(c: &Community) -> Self {
        Self {
            did: c.did.clone(),
            handle: c.handle.clone(),
            name: c.name.clone(),
            display_name: c.display_name.clone(),
            description: c.description.clone(),
            avatar_cid: c.avatar_cid.clone(),
            banner_cid: c.banner_cid.clone(),
            rules: c.rules.clone(),
            categories: c.categories.clone(),
            language: c.language.clone(),
            owner_did: c.owner_did.clone(),
            created_by_did: c.created_by_did.clone(),
            hosted_by_did: c.hosted_by_did.clone(),
            visibility: c.visibility.clone(),
            allow_external_discovery: c.allow_external_discovery,
            member_count: c.member_count,
            subscriber_count: c.subscriber_count,
            post_count: c.post_count,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Subscription {
    pub user_did: String,
    pub community_did: String,
    pub record_uri: String,
    pub record_cid: String,
    pub content_visibility: i16,
    pub subscribed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CommunityBlock {
    pub user_did: String,
    pub community_did: String,
    pub record_uri: String,
    pub record_cid: String,
    pub blocked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Membership {
    pub user_did: String,
    pub community_did: String,
    pub reputation_score: i64,
    pub contribution_count: i64,
    pub is_banned: bool,
    pub is_moderator: bool,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Post {
    pub uri: String,
    pub cid: String,
    #[serde(skip_serializing)]
    pub rkey: String,
    #[serde(rename = "authorDid")]
    pub author_did: String,
    #[serde(rename = "communityDid")]
    pub community_did: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<serde_json::Value>,
    pub score: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A single user's vote on a post or comment (+1/-1). Aggregated into the
/// cached `score` column on the target row by the indexer; read individually
/// here only for viewer-state hydration (C10).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Vote {
    pub user_did: String,
    pub subject_uri: String,
    pub direction: i16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Comment {
    pub uri: String,
    pub cid: String,
    #[serde(skip_serializing)]
    pub rkey: String,
    #[serde(rename = "authorDid")]
    pub author_did: String,
    #[serde(rename = "rootUri")]
    pub root_uri: String,
    #[serde(rename = "parentUri")]
    pub parent_uri: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facets: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embeds: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub languages: Option<serde_json::Value>,
    pub score: i64,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing)]
    pub deleted_at: Option<DateTime<Utc>>,
}
