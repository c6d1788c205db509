//! Wire shapes: XRPC request/response bodies and the PDS record formats
//! written into user/community repositories.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------
// PDS record formats
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityProfileRecord {
    #[serde(rename = "$type")]
    pub type_: String,
    pub name: String,
    pub visibility: String,
    #[serde(rename = "hostedBy")]
    pub hosted_by: String,
    #[serde(rename = "createdBy")]
    pub created_by: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    pub federation: FederationSettings,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederationSettings {
    #[serde(rename = "allowExternalDiscovery")]
    pub allow_external_discovery: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    #[serde(rename = "$type")]
    pub type_: String,
    pub subject: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "contentVisibility")]
    pub content_visibility: i16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    #[serde(rename = "$type")]
    pub type_: String,
    pub subject: String,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

pub const COMMUNITY_PROFILE_COLLECTION: &str = "social.coves.community.profile";
pub const COMMUNITY_SUBSCRIPTION_COLLECTION: &str = "social.coves.community.subscription";
pub const COMMUNITY_BLOCK_COLLECTION: &str = "social.coves.community.block";
pub const POST_COLLECTION: &str = "social.coves.feed.post";
pub const COMMENT_COLLECTION: &str = "social.coves.feed.comment";

// ---------------------------------------------------------------------
// XRPC request bodies
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCommunityInput {
    pub name: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    #[serde(rename = "allowExternalDiscovery", default)]
    pub allow_external_discovery: bool,
    pub rules: Option<serde_json::Value>,
    pub categories: Option<serde_json::Value>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCommunityInput {
    #[serde(rename = "communityDid")]
    pub community_did: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    #[serde(rename = "allowExternalDiscovery")]
    pub allow_external_discovery: Option<bool>,
    #[serde(rename = "moderationType")]
    pub moderation_type: Option<String>,
    #[serde(rename = "contentWarnings")]
    pub content_warnings: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscribeInput {
    pub community: String,
    #[serde(rename = "contentVisibility")]
    pub content_visibility: Option<i16>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnsubscribeInput {
    pub community: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockCommunityInput {
    pub community: String,
}

// ---------------------------------------------------------------------
// XRPC response bodies
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RecordRefOutput {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateCommunityOutput {
    pub uri: String,
    pub cid: String,
    pub did: String,
    pub handle: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscribeOutput {
    pub uri: String,
    pub cid: String,
    pub existing: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuccessOutput {
    pub success: bool,
}

impl SuccessOutput {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockRecordRefOutput {
    #[serde(rename = "recordUri")]
    pub record_uri: String,
    #[serde(rename = "recordCid")]
    pub record_cid: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockOutput {
    pub block: BlockRecordRefOutput,
}

/// A community plus this viewer's subscription/block state. The
/// `is_*` fields are `None` for anonymous callers, since there is no viewer
/// to hydrate against.
#[derive(Debug, Clone, Serialize)]
pub struct CommunityViewWithState {
    #[serde(flatten)]
    pub community: crate::models::CommunityView,
    #[serde(rename = "isSubscribed", skip_serializing_if = "Option::is_none")]
    pub is_subscribed: Option<bool>,
    #[serde(rename = "isBlocked", skip_serializing_if = "Option::is_none")]
    pub is_blocked: Option<bool>,
}

impl From<crate::models::CommunityView> for CommunityViewWithState {
    fn from(community: crate::models::CommunityView) -> Self {
        Self { community, is_subscribed: None, is_blocked: None }
    }
}

/// A post plus this viewer's vote direction, when known.
#[derive(Debug, Clone, Serialize)]
pub struct PostWithVote {
    #[serde(flatten)]
    pub post: crate::models::Post,
    #[serde(rename = "myVote", skip_serializing_if = "Option::is_none")]
    pub my_vote: Option<i16>,
}

impl From<crate::models::Post> for PostWithVote {
    fn from(post: crate::models::Post) -> Self {
        Self { post, my_vote: None }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunityListOutput {
    pub communities: Vec<CommunityViewWithState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommunitySearchOutput {
    pub communities: Vec<CommunityViewWithState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedOutput {
    pub posts: Vec<PostWithVote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_community_profile_record_serializes_type_field() {
        let record = CommunityProfileRecord {
            type_: COMMUNITY_PROFILE_COLLECTION.to_string(),
            name: "gaming".to_string(),
            visibility: "public".to_string(),
            hosted_by: "did:web:coves.social".to_string(),
            created_by: "did:plc:u1".to_string(),
            created_at: "2026-07-28T00:00:00Z".to_string(),
            federation: FederationSettings { allow_external_discovery: true },
            display_name: None,
            description: None,
            rules: None,
            categories: None,
            language: None,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["$type"], COMMUNITY_PROFILE_COLLECTION);
        assert_eq!(json["hostedBy"], "did:web:coves.social");
    }
}
