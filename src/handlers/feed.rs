//! `social.coves.feed.{getCommunityFeed,getTimeline,getDiscover}`.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::feed::{self, FeedScope, SortMode, Timeframe};
use crate::identity::resolve_identifier;
use crate::query;
use crate::records::FeedOutput;

const DEFAULT_FEED_LIMIT: i64 = 25;
const MAX_FEED_LIMIT: i64 = 100;

fn clamp_limit(limit: Option<i64>) -> i64 {
    limit.unwrap_or(DEFAULT_FEED_LIMIT).clamp(1, MAX_FEED_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct FeedParams {
    pub sort: Option<SortMode>,
    pub timeframe: Option<Timeframe>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CommunityFeedParams {
    pub community: String,
    pub sort: Option<SortMode>,
    pub timeframe: Option<Timeframe>,
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_community_feed(
    State(pool): State<DbPool>,
    State(config): State<AppConfig>,
    viewer: Option<AuthUser>,
    Query(params): Query<CommunityFeedParams>,
) -> AppResult<Json<FeedOutput>> {
    let community_did = resolve_identifier(&pool, &params.community, &config.instance_domain).await?;
    let page = feed::list_feed(
        &pool,
        FeedScope::Community(&community_did),
        params.sort.unwrap_or(SortMode::Hot),
        params.timeframe,
        params.cursor.as_deref(),
        clamp_limit(params.limit),
        &config.cursor_hmac_secret,
    )
    .await?;

    let viewer_did = viewer.as_ref().map(|u| u.did.as_str());
    let posts = query::attach_post_viewer_state(&pool, viewer_did, page.posts).await?;
    Ok(Json(FeedOutput { posts, cursor: page.cursor }))
}

pub async fn get_timeline(
    State(pool): State<DbPool>,
    State(config): State<AppConfig>,
    user: AuthUser,
    Query(params): Query<FeedParams>,
) -> AppResult<Json<FeedOutput>> {
    let page = feed::list_feed(
        &pool,
        FeedScope::Timeline(&user.did),
        params.sort.unwrap_or(SortMode::New),
        params.timeframe,
        params.cursor.as_deref(),
        clamp_limit(params.limit),
        &config.cursor_hmac_secret,
    )
    .await?;

    let posts = query::attach_post_viewer_state(&pool, Some(&user.did), page.posts).await?;
    Ok(Json(FeedOutput { posts, cursor: page.cursor }))
}

pub async fn get_discover(
    State(pool): State<DbPool>,
    State(config): State<AppConfig>,
    viewer: Option<AuthUser>,
    Query(params): Query<FeedParams>,
) -> AppResult<Json<FeedOutput>> {
    let page = feed::list_feed(
        &pool,
        FeedScope::Discover,
        params.sort.unwrap_or(SortMode::Hot),
        params.timeframe,
        params.cursor.as_deref(),
        clamp_limit(params.limit),
        &config.cursor_hmac_secret,
    )
    .await?;

    let viewer_did = viewer.as_ref().map(|u| u.did.as_str());
    let posts = query::attach_post_viewer_state(&pool, viewer_did, page.posts).await?;
    Ok(Json(FeedOutput { posts, cursor: page.cursor }))
}
