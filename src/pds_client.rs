//! PDS Write Client (C4): authenticated create/put/delete of records against
//! a Personal Data Server, plus the account/session endpoints C3 and C5 need.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{AppError, PdsErrorKind};

#[derive(Debug, Clone, Deserialize)]
pub struct RecordRef {
    pub uri: String,
    pub cid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionTokens {
    pub did: String,
    #[serde(rename = "accessJwt")]
    pub access_jwt: String,
    #[serde(rename = "refreshJwt")]
    pub refresh_jwt: String,
}

#[derive(Clone)]
pub struct PdsClient {
    http: reqwest::Client,
}

impl PdsClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// 30s for account/commit-creating endpoints, 10s for everything else.
    fn timeout_for(path: &str) -> Duration {
        if path.contains("createAccount") || path.contains("createRecord") || path.contains("putRecord") {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(10)
        }
    }

    async fn post_authed(
        &self,
        pds_url: &str,
        path: &str,
        access_token: &str,
        body: &Value,
    ) -> Result<Value, AppError> {
        let url = format!("{}/xrpc/{}", pds_url.trim_end_matches('/'), path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(body)
            .timeout(Self::timeout_for(path))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Pds(PdsErrorKind::Transient)
                } else {
                    AppError::Internal(e.into())
                }
            })?;

        self.handle_response(response).await
    }

    async fn handle_response(&self, response: reqwest::Response) -> Result<Value, AppError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Value>()
                .await
                .or(Ok(Value::Null));
        }
        Err(AppError::Pds(PdsErrorKind::from_status(status)))
    }

    /// `createRecord(repo_did, collection, rkey?, record, access_token)`
    pub async fn create_record(
        &self,
        pds_url: &str,
        repo_did: &str,
        collection: &str,
        rkey: Option<&str>,
        record: Value,
        access_token: &str,
    ) -> Result<RecordRef, AppError> {
        let mut body = serde_json::json!({
            "repo": repo_did,
            "collection": collection,
            "record": record,
        });
        if let Some(rkey) = rkey {
            body["rkey"] = Value::String(rkey.to_string());
        }
        let result = self
            .post_authed(pds_url, "com.atproto.repo.createRecord", access_token, &body)
            .await;
        crate::metrics::record_pds_write(if result.is_ok() { "success" } else { "error" });
        serde_json::from_value(result?).map_err(|e| AppError::Internal(e.into()))
    }

    /// `putRecord(repo_did, collection, rkey, record, access_token)`
    pub async fn put_record(
        &self,
        pds_url: &str,
        repo_did: &str,
        collection: &str,
        rkey: &str,
        record: Value,
        access_token: &str,
    ) -> Result<RecordRef, AppError> {
        let body = serde_json::json!({
            "repo": repo_did,
            "collection": collection,
            "rkey": rkey,
            "record": record,
        });
        let result = self
            .post_authed(pds_url, "com.atproto.repo.putRecord", access_token, &body)
            .await;
        crate::metrics::record_pds_write(if result.is_ok() { "success" } else { "error" });
        serde_json::from_value(result?).map_err(|e| AppError::Internal(e.into()))
    }

    /// `deleteRecord(repo_did, collection, rkey, access_token)`
    pub async fn delete_record(
        &self,
        pds_url: &str,
        repo_did: &str,
        collection: &str,
        rkey: &str,
        access_token: &str,
    ) -> Result<(), AppError> {
        let body = serde_json::json!({
            "repo": repo_did,
            "collection": collection,
            "rkey": rkey,
        });
        let result = self
            .post_authed(pds_url, "com.atproto.repo.deleteRecord", access_token, &body)
            .await;
        crate::metrics::record_pds_write(if result.is_ok() { "success" } else { "error" });
        result?;
        Ok(())
    }

    /// Provision a new PDS account for a community.
    pub async fn create_account(
        &self,
        pds_url: &str,
        handle: &str,
        email: &str,
        password: &str,
    ) -> Result<SessionTokens, AppError> {
        let body = serde_json::json!({ "handle": handle, "email": email, "password": password });
        let url = format!("{}/xrpc/com.atproto.server.createAccount", pds_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&body)
            .timeout(Self::timeout_for("createAccount"))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Pds(PdsErrorKind::Transient)
                } else {
                    AppError::Internal(e.into())
                }
            })?;
        let value = self.handle_response(response).await?;
        serde_json::from_value(value).map_err(|e| AppError::Internal(e.into()))
    }

    /// `refreshSession(pds_url, refresh_token)` — single-use refresh token.
    pub async fn refresh_session(&self, pds_url: &str, refresh_token: &str) -> Result<SessionTokens, AppError> {
        let url = format!("{}/xrpc/com.atproto.server.refreshSession", pds_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .bearer_auth(refresh_token)
            .timeout(Self::timeout_for("refreshSession"))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Pds(PdsErrorKind::Transient)
                } else {
                    AppError::Internal(e.into())
                }
            })?;
        let value = self.handle_response(response).await?;
        serde_json::from_value(value).map_err(|e| AppError::Internal(e.into()))
    }

    /// `createSession(pds_url, email, password)` — password fallback re-auth.
    pub async fn create_session(
        &self,
        pds_url: &str,
        email: &str,
        password: &str,
    ) -> Result<SessionTokens, AppError> {
        let body = serde_json::json!({ "identifier": email, "password": password });
        let url = format!("{}/xrpc/com.atproto.server.createSession", pds_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&body)
            .timeout(Self::timeout_for("createSession"))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Pds(PdsErrorKind::Transient)
                } else {
                    AppError::Internal(e.into())
                }
            })?;
        let value = self.handle_response(response).await?;
        serde_json::from_value(value).map_err(|e| AppError::Internal(e.into()))
    }
}

impl Default for PdsClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_policy() {
        assert_eq!(PdsClient::timeout_for("com.atproto.repo.createRecord"), Duration::from_secs(30));
        assert_eq!(PdsClient::timeout_for("com.atproto.server.createAccount"), Duration::from_secs(30));
        assert_eq!(PdsClient::timeout_for("com.atproto.repo.deleteRecord"), Duration::from_secs(10));
        assert_eq!(PdsClient::timeout_for("com.atproto.repo.getRecord"), Duration::from_secs(10));
    }
}
