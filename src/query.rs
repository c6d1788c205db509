//! Query API surface (C10): single-record reads plus batched viewer-state
//! hydration for authenticated callers.

use std::collections::HashMap;

use crate::db::{self, DbPool};
use crate::error::AppError;
use crate::identity::resolve_identifier;
use crate::models::{Comment, CommunityView, Post};
use crate::records::{CommunityViewWithState, PostWithVote};

/// Per-viewer state attached to a community in a listing response.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CommunityViewerState {
    #[serde(rename = "isSubscribed")]
    pub is_subscribed: bool,
    #[serde(rename = "isBlocked")]
    pub is_blocked: bool,
}

const ALLOWED_LIST_SORTS: [&str; 4] = ["popular", "active", "new", "alphabetical"];
const ALLOWED_VISIBILITY_FILTERS: [&str; 2] = ["public", "unlisted"];
const MAX_LIST_LIMIT: i64 = 100;
const DEFAULT_LIST_LIMIT: i64 = 25;

pub struct CommunityDirectoryPage {
    pub communities: Vec<CommunityView>,
    pub cursor: Option<String>,
}

/// The community directory (`community.list`).
pub async fn list_communities(
    pool: &DbPool,
    sort: Option<&str>,
    visibility: Option<&str>,
    cursor_token: Option<&str>,
    limit: Option<i64>,
) -> Result<CommunityDirectoryPage, AppError> {
    let sort = sort.unwrap_or("popular");
    if !ALLOWED_LIST_SORTS.contains(&sort) {
        return Err(AppError::ValidationError {
            field: "sort".into(),
            message: format!("must be one of {:?}", ALLOWED_LIST_SORTS),
        });
    }
    if let Some(v) = visibility {
        if !ALLOWED_VISIBILITY_FILTERS.contains(&v) {
            return Err(AppError::ValidationError {
                field: "visibility".into(),
                message: format!("must be one of {:?}", ALLOWED_VISIBILITY_FILTERS),
            });
        }
    }
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let cursor = cursor_token.map(db::decode_directory_cursor).transpose()?;

    let mut communities = db::list_communities(pool, sort, visibility, cursor, limit + 1).await?;
    let sort_key_of = |c: &crate::models::Community| match sort {
        "active" => c.updated_at.to_rfc3339(),
        "new" => c.created_at.to_rfc3339(),
        "alphabetical" => c.name.clone(),
        _ => c.subscriber_count.to_string(),
    };

    let next_cursor = if communities.len() as i64 > limit {
        communities.truncate(limit as usize);
        communities.last().map(|c| db::encode_directory_cursor(&sort_key_of(c), &c.did))
    } else {
        None
    };

    Ok(CommunityDirectoryPage {
        communities: communities.iter().map(CommunityView::from).collect(),
        cursor: next_cursor,
    })
}

pub async fn get_community(
    pool: &DbPool,
    identifier: &str,
    instance_domain: &str,
) -> Result<CommunityView, AppError> {
    let did = resolve_identifier(pool, identifier, instance_domain).await?;
    let community = db::get_community_by_did(pool, &did)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("community {did} not found")))?;
    Ok(CommunityView::from(&community))
}

pub struct CommunitySearchPage {
    pub communities: Vec<CommunityView>,
    pub total: i64,
}

/// Fuzzy name/description search (`community.search`). Uses trigram
/// similarity ordering; the result count is the exact count of the returned
/// page, not a total across the whole corpus — search result counts beyond
/// one page aren't load-bearing for this surface.
pub async fn search_communities(pool: &DbPool, q: &str, limit: Option<i64>) -> Result<CommunitySearchPage, AppError> {
    let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let communities = db::search_communities(pool, q, limit).await?;
    Ok(CommunitySearchPage { total: communities.len() as i64, communities: communities.iter().map(CommunityView::from).collect() })
}

pub async fn get_post(pool: &DbPool, uri: &str) -> Result<Post, AppError> {
    db::get_post_by_uri(pool, uri)
        .await?
        .filter(|p| p.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound(format!("post {uri} not found")))
}

pub async fn get_comment(pool: &DbPool, uri: &str) -> Result<Comment, AppError> {
    db::get_comment_by_uri(pool, uri)
        .await?
        .filter(|c| c.deleted_at.is_none())
        .ok_or_else(|| AppError::NotFound(format!("comment {uri} not found")))
}

/// Subscription/block state for a batch of communities, one round trip each
/// regardless of batch size.
pub async fn hydrate_community_viewer_state(
    pool: &DbPool,
    viewer_did: &str,
    community_dids: &[String],
) -> Result<HashMap<String, CommunityViewerState>, AppError> {
    if community_dids.is_empty() {
        return Ok(HashMap::new());
    }

    let mut states: HashMap<String, CommunityViewerState> =
        community_dids.iter().map(|d| (d.clone(), CommunityViewerState::default())).collect();

    for sub in db::subscriptions_for_viewer(pool, viewer_did, community_dids).await? {
        if let Some(state) = states.get_mut(&sub.community_did) {
            state.is_subscribed = true;
        }
    }
    for block in db::blocks_for_viewer(pool, viewer_did, community_dids).await? {
        if let Some(state) = states.get_mut(&block.community_did) {
            state.is_blocked = true;
        }
    }

    Ok(states)
}

/// This viewer's vote direction (+1/-1) on a batch of posts or comments,
/// keyed by subject URI. Absent from the map means no vote cast.
pub async fn hydrate_vote_viewer_state(
    pool: &DbPool,
    viewer_did: &str,
    subject_uris: &[String],
) -> Result<HashMap<String, i16>, AppError> {
    if subject_uris.is_empty() {
        return Ok(HashMap::new());
    }

    let votes = db::votes_for_viewer(pool, viewer_did, subject_uris).await?;
    Ok(votes.into_iter().map(|v| (v.subject_uri, v.direction)).collect())
}

/// Attach subscription/block state to a list of communities for an
/// authenticated viewer, in one batched round trip regardless of list size.
pub async fn attach_community_viewer_state(
    pool: &DbPool,
    viewer_did: Option<&str>,
    communities: Vec<CommunityView>,
) -> Result<Vec<CommunityViewWithState>, AppError> {
    let Some(viewer_did) = viewer_did else {
        return Ok(communities.into_iter().map(CommunityViewWithState::from).collect());
    };

    let dids: Vec<String> = communities.iter().map(|c| c.did.clone()).collect();
    let states = hydrate_community_viewer_state(pool, viewer_did, &dids).await?;

    Ok(communities
        .into_iter()
        .map(|community| {
            let state = states.get(&community.did).copied().unwrap_or_default();
            CommunityViewWithState {
                community,
                is_subscribed: Some(state.is_subscribed),
                is_blocked: Some(state.is_blocked),
            }
        })
        .collect())
}

/// Attach this viewer's vote to a list of posts, in one batched round trip.
pub async fn attach_post_viewer_state(
    pool: &DbPool,
    viewer_did: Option<&str>,
    posts: Vec<Post>,
) -> Result<Vec<PostWithVote>, AppError> {
    let Some(viewer_did) = viewer_did else {
        return Ok(posts.into_iter().map(PostWithVote::from).collect());
    };

    let uris: Vec<String> = posts.iter().map(|p| p.uri.clone()).collect();
    let votes = hydrate_vote_viewer_state(pool, viewer_did, &uris).await?;

    Ok(posts
        .into_iter()
        .map(|post| {
            let my_vote = votes.get(&post.uri).copied();
            PostWithVote { post, my_vote }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_community_viewer_state_defaults_to_unsubscribed() {
        let state = CommunityViewerState::default();
        assert!(!state.is_subscribed);
        assert!(!state.is_blocked);
    }
}
