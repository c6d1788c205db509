//! `social.coves.community.{create,update,get,list,search}`.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::community::lifecycle::{self, CreateCommunityRequest, UpdateCommunityRequest};
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::pds_client::PdsClient;
use crate::query;
use crate::records::{
    CommunityListOutput, CommunitySearchOutput, CreateCommunityInput, CreateCommunityOutput,
    UpdateCommunityInput,
};
use crate::token_refresh::MutexMap;
use crate::util::json_extractor::LoggedJson;

pub async fn create(
    State(pool): State<DbPool>,
    State(pds_client): State<PdsClient>,
    State(config): State<AppConfig>,
    user: AuthUser,
    LoggedJson(input): LoggedJson<CreateCommunityInput>,
) -> AppResult<Json<CreateCommunityOutput>> {
    let result = lifecycle::create_community(
        &pool,
        &pds_client,
        &config,
        CreateCommunityRequest {
            name: input.name,
            display_name: input.display_name,
            description: input.description,
            visibility: input.visibility,
            allow_external_discovery: input.allow_external_discovery,
            rules: input.rules,
            categories: input.categories,
            language: input.language,
            created_by_did: user.did,
        },
    )
    .await?;

    Ok(Json(CreateCommunityOutput { uri: result.uri, cid: result.cid, did: result.did, handle: result.handle }))
}

pub async fn update(
    State(pool): State<DbPool>,
    State(pds_client): State<PdsClient>,
    State(mutex_map): State<std::sync::Arc<MutexMap>>,
    State(config): State<AppConfig>,
    user: AuthUser,
    LoggedJson(input): LoggedJson<UpdateCommunityInput>,
) -> AppResult<Json<crate::models::CommunityView>> {
    let updated = lifecycle::update_community(
        &pool,
        &pds_client,
        &mutex_map,
        &config,
        UpdateCommunityRequest {
            community_did: input.community_did,
            requester_did: user.did,
            display_name: input.display_name,
            description: input.description,
            visibility: input.visibility,
            allow_external_discovery: input.allow_external_discovery,
            moderation_type: input.moderation_type,
            content_warnings: input.content_warnings,
        },
    )
    .await?;

    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct GetCommunityParams {
    pub community: String,
}

pub async fn get(
    State(pool): State<DbPool>,
    State(config): State<AppConfig>,
    viewer: Option<AuthUser>,
    Query(params): Query<GetCommunityParams>,
) -> AppResult<Json<crate::records::CommunityViewWithState>> {
    let community = query::get_community(&pool, &params.community, &config.instance_domain).await?;
    let viewer_did = viewer.as_ref().map(|u| u.did.as_str());
    let mut with_state = query::attach_community_viewer_state(&pool, viewer_did, vec![community]).await?;
    Ok(Json(with_state.remove(0)))
}

#[derive(Debug, Deserialize)]
pub struct ListCommunitiesParams {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
    pub sort: Option<String>,
    pub visibility: Option<String>,
}

pub async fn list(
    State(pool): State<DbPool>,
    viewer: Option<AuthUser>,
    Query(params): Query<ListCommunitiesParams>,
) -> AppResult<Json<CommunityListOutput>> {
    let page = query::list_communities(
        &pool,
        params.sort.as_deref(),
        params.visibility.as_deref(),
        params.cursor.as_deref(),
        params.limit,
    )
    .await?;
    let viewer_did = viewer.as_ref().map(|u| u.did.as_str());
    let communities = query::attach_community_viewer_state(&pool, viewer_did, page.communities).await?;
    Ok(Json(CommunityListOutput { communities, cursor: page.cursor }))
}

#[derive(Debug, Deserialize)]
pub struct SearchCommunitiesParams {
    pub q: String,
    pub limit: Option<i64>,
    pub visibility: Option<String>,
}

pub async fn search(
    State(pool): State<DbPool>,
    viewer: Option<AuthUser>,
    Query(params): Query<SearchCommunitiesParams>,
) -> AppResult<Json<CommunitySearchOutput>> {
    let page = query::search_communities(&pool, &params.q, params.limit).await?;
    let viewer_did = viewer.as_ref().map(|u| u.did.as_str());
    let communities = query::attach_community_viewer_state(&pool, viewer_did, page.communities).await?;
    Ok(Json(CommunitySearchOutput { communities, cursor: None, total: page.total }))
}
