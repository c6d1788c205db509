//! `CreateCommunity` / `UpdateCommunity`.

use chrono::Utc;

use crate::config::AppConfig;
use crate::credentials::{self, NewCommunity};
use crate::crypto::generate_community_password;
use crate::db;
use crate::error::AppError;
use crate::identity::{canonical_handle, is_valid_dns_label};
use crate::models::{Community, CommunityView};
use crate::pds_client::PdsClient;
use crate::records::{CommunityProfileRecord, FederationSettings, COMMUNITY_PROFILE_COLLECTION};
use crate::token_refresh::{self, MutexMap};

const MAX_NAME_LEN: usize = 63;
const MAX_DESCRIPTION_LEN: usize = 3000;
const ALLOWED_VISIBILITY: [&str; 3] = ["public", "unlisted", "private"];

pub struct CreateCommunityRequest {
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    pub allow_external_discovery: bool,
    pub rules: Option<serde_json::Value>,
    pub categories: Option<serde_json::Value>,
    pub language: Option<String>,
    pub created_by_did: String,
}

pub struct CreateCommunityResult {
    pub uri: String,
    pub cid: String,
    pub did: String,
    pub handle: String,
}

fn validate_visibility(visibility: &str) -> Result<(), AppError> {
    if ALLOWED_VISIBILITY.contains(&visibility) {
        Ok(())
    } else {
        Err(AppError::ValidationError {
            field: "visibility".into(),
            message: format!("must be one of {:?}", ALLOWED_VISIBILITY),
        })
    }
}

fn validate_name(name: &str) -> Result<(), AppError> {
    if name.len() > MAX_NAME_LEN || !is_valid_dns_label(name) {
        return Err(AppError::ValidationError {
            field: "name".into(),
            message: format!("must be a valid DNS label of at most {MAX_NAME_LEN} characters"),
        });
    }
    Ok(())
}

fn validate_description(description: &Option<String>) -> Result<(), AppError> {
    if let Some(d) = description {
        if d.len() > MAX_DESCRIPTION_LEN {
            return Err(AppError::ValidationError {
                field: "description".into(),
                message: format!("must be at most {MAX_DESCRIPTION_LEN} characters"),
            });
        }
    }
    Ok(())
}

pub async fn create_community(
    pool: &db::DbPool,
    pds_client: &PdsClient,
    config: &AppConfig,
    req: CreateCommunityRequest,
) -> Result<CreateCommunityResult, AppError> {
    let visibility = req.visibility.unwrap_or_else(|| "public".to_string());
    validate_visibility(&visibility)?;
    validate_name(&req.name)?;
    validate_description(&req.description)?;

    // Clients MUST NOT supply hosted_by — it is always this instance.
    let hosted_by_did = config.instance_did.clone();

    // Two distinct handles: the PDS account needs its own handle to
    // create a session, but the handle this community is resolved by
    // everywhere else (search, `!name@instance`, feeds) is the canonical one.
    let pds_handle = format!("{}.communities.{}", req.name, config.instance_domain);
    let handle = canonical_handle(&req.name, &config.instance_domain);
    let pds_email = format!("community-{}@communities.{}", req.name, config.instance_domain);
    let pds_password = generate_community_password();

    let session = pds_client
        .create_account(&config.pds_url, &pds_handle, &pds_email, &pds_password)
        .await?;
    let community_did = session.did.clone();

    let now = Utc::now();
    let profile = CommunityProfileRecord {
        type_: COMMUNITY_PROFILE_COLLECTION.to_string(),
        name: req.name.clone(),
        visibility: visibility.clone(),
        hosted_by: hosted_by_did.clone(),
        created_by: req.created_by_did.clone(),
        created_at: now.to_rfc3339(),
        federation: FederationSettings { allow_external_discovery: req.allow_external_discovery },
        display_name: req.display_name.clone(),
        description: req.description.clone(),
        rules: req.rules.clone(),
        categories: req.categories.clone(),
        language: req.language.clone(),
    };
    let record_value = serde_json::to_value(&profile).map_err(|e| AppError::Internal(e.into()))?;

    let record_ref = pds_client
        .put_record(
            &config.pds_url,
            &community_did,
            COMMUNITY_PROFILE_COLLECTION,
            "self",
            record_value,
            &session.access_jwt,
        )
        .await?;

    // Persisting before returning is load-bearing: the
    // firehose may take seconds to index this community, and any
    // subsequent UpdateCommunity call needs these credentials immediately.
    credentials::create(
        pool,
        NewCommunity {
            did: community_did.clone(),
            handle: handle.clone(),
            name: req.name.clone(),
            display_name: req.display_name,
            description: req.description,
            rules: req.rules,
            categories: req.categories,
            language: req.language,
            created_by_did: req.created_by_did,
            hosted_by_did,
            visibility,
            allow_external_discovery: req.allow_external_discovery,
            pds_url: config.pds_url.clone(),
            pds_email,
            pds_password,
            pds_access_token: session.access_jwt,
            pds_refresh_token: session.refresh_jwt,
            record_uri: record_ref.uri.clone(),
            record_cid: record_ref.cid.clone(),
        },
    )
    .await?;

    Ok(CreateCommunityResult {
        uri: record_ref.uri,
        cid: record_ref.cid,
        did: community_did,
        handle,
    })
}

pub struct UpdateCommunityRequest {
    pub community_did: String,
    pub requester_did: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    pub allow_external_discovery: Option<bool>,
    pub moderation_type: Option<String>,
    pub content_warnings: Option<serde_json::Value>,
}

pub async fn update_community(
    pool: &db::DbPool,
    pds_client: &PdsClient,
    mutex_map: &MutexMap,
    config: &AppConfig,
    req: UpdateCommunityRequest,
) -> Result<CommunityView, AppError> {
    if let Some(d) = &req.description {
        if d.len() > MAX_DESCRIPTION_LEN {
            return Err(AppError::ValidationError {
                field: "description".into(),
                message: format!("must be at most {MAX_DESCRIPTION_LEN} characters"),
            });
        }
    }
    if let Some(v) = &req.visibility {
        validate_visibility(v)?;
    }

    let existing = credentials::get_by_did(pool, &req.community_did)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("community {} not found", req.community_did)))?;

    if existing.created_by_did != req.requester_did {
        return Err(AppError::Forbidden("only the creator may update this community".into()));
    }

    let refreshed: Community =
        token_refresh::ensure_fresh_token(pool, pds_client, mutex_map, existing, config.token_refresh_buffer).await?;

    let visibility = req.visibility.clone().unwrap_or_else(|| refreshed.visibility.clone());
    let allow_external_discovery = req.allow_external_discovery.unwrap_or(refreshed.allow_external_discovery);

    let profile = CommunityProfileRecord {
        type_: COMMUNITY_PROFILE_COLLECTION.to_string(),
        name: refreshed.name.clone(),
        visibility: visibility.clone(),
        hosted_by: refreshed.hosted_by_did.clone(),
        created_by: refreshed.created_by_did.clone(),
        created_at: refreshed.created_at.to_rfc3339(),
        federation: FederationSettings { allow_external_discovery },
        display_name: req.display_name.clone().or_else(|| refreshed.display_name.clone()),
        description: req.description.clone().or_else(|| refreshed.description.clone()),
        rules: refreshed.rules.clone(),
        categories: refreshed.categories.clone(),
        language: refreshed.language.clone(),
    };
    let record_value = serde_json::to_value(&profile).map_err(|e| AppError::Internal(e.into()))?;

    pds_client
        .put_record(
            &refreshed.pds_url,
            &refreshed.did,
            COMMUNITY_PROFILE_COLLECTION,
            "self",
            record_value,
            &refreshed.pds_access_token,
        )
        .await?;

    // Moderation settings never travel in the federated profile record, so
    // they have no firehose event to land on and are applied now.
    db::update_community_moderation(pool, &refreshed.did, req.moderation_type, req.content_warnings).await?;

    // Everything else in the profile record (display_name, description,
    // visibility, allow_external_discovery) flows through the PDS and back
    // via the firehose indexer (C8); the AppView row update is deferred to
    // that round-trip, per the write-forward pattern every other mutation
    // path here follows. Return an in-memory view merging the request's
    // overrides onto the pre-update row so the caller sees its own write
    // immediately without waiting on the firehose.
    let mut view = CommunityView::from(&refreshed);
    if let Some(display_name) = req.display_name {
        view.display_name = Some(display_name);
    }
    if let Some(description) = req.description {
        view.description = Some(description);
    }
    view.visibility = visibility;
    view.allow_external_discovery = allow_external_discovery;

    Ok(view)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_boundary() {
        assert!(validate_name(&"a".repeat(63)).is_ok());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_validate_description_boundary() {
        assert!(validate_description(&Some("a".repeat(3000))).is_ok());
        assert!(validate_description(&Some("a".repeat(3001))).is_err());
    }

    #[test]
    fn test_validate_visibility() {
        assert!(validate_visibility("public").is_ok());
        assert!(validate_visibility("unlisted").is_ok());
        assert!(validate_visibility("private").is_ok());
        assert!(validate_visibility("hidden").is_err());
    }
}
