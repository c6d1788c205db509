//! `social.coves.community.{subscribe,unsubscribe,block,unblock}`.

use axum::extract::State;
use axum::Json;

use crate::auth::AuthUser;
use crate::community::writes;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::pds_client::PdsClient;
use crate::records::{
    BlockCommunityInput, BlockOutput, BlockRecordRefOutput, SubscribeInput, SubscribeOutput, SuccessOutput,
    UnsubscribeInput,
};
use crate::util::json_extractor::LoggedJson;

pub async fn subscribe(
    State(pool): State<DbPool>,
    State(pds_client): State<PdsClient>,
    State(config): State<AppConfig>,
    user: AuthUser,
    LoggedJson(input): LoggedJson<SubscribeInput>,
) -> AppResult<Json<SubscribeOutput>> {
    let result = writes::subscribe_to_community(
        &pool,
        &pds_client,
        &config.instance_domain,
        &user.did,
        &user.access_token,
        &user.pds_url,
        &input.community,
        input.content_visibility,
    )
    .await?;

    Ok(Json(SubscribeOutput { uri: result.uri, cid: result.cid, existing: result.existing }))
}

pub async fn unsubscribe(
    State(pool): State<DbPool>,
    State(pds_client): State<PdsClient>,
    State(config): State<AppConfig>,
    user: AuthUser,
    LoggedJson(input): LoggedJson<UnsubscribeInput>,
) -> AppResult<Json<SuccessOutput>> {
    writes::unsubscribe_from_community(
        &pool,
        &pds_client,
        &config.instance_domain,
        &user.did,
        &user.access_token,
        &user.pds_url,
        &input.community,
    )
    .await?;

    Ok(Json(SuccessOutput::ok()))
}

pub async fn block(
    State(pool): State<DbPool>,
    State(pds_client): State<PdsClient>,
    State(config): State<AppConfig>,
    user: AuthUser,
    LoggedJson(input): LoggedJson<BlockCommunityInput>,
) -> AppResult<Json<BlockOutput>> {
    let result = writes::block_community(
        &pool,
        &pds_client,
        &config.instance_domain,
        &user.did,
        &user.access_token,
        &user.pds_url,
        &input.community,
    )
    .await?;

    Ok(Json(BlockOutput { block: BlockRecordRefOutput { record_uri: result.uri, record_cid: result.cid } }))
}

pub async fn unblock(
    State(pool): State<DbPool>,
    State(pds_client): State<PdsClient>,
    State(config): State<AppConfig>,
    user: AuthUser,
    LoggedJson(input): LoggedJson<BlockCommunityInput>,
) -> AppResult<Json<SuccessOutput>> {
    writes::unblock_community(
        &pool,
        &pds_client,
        &config.instance_domain,
        &user.did,
        &user.access_token,
        &user.pds_url,
        &input.community,
    )
    .await?;

    Ok(Json(SuccessOutput::ok()))
}
