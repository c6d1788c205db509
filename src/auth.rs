//! Authentication middleware: verifies the bearer JWT on an XRPC request and
//! injects the opaque "authenticated session" capability — `(user_did,
//! user_access_token)` — that the rest of the core treats as given.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::Utc;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingAuthHeader,

    #[error("invalid authorization header format")]
    InvalidAuthFormat,

    #[error("invalid JWT token: {0}")]
    InvalidToken(String),

    #[error("token has expired")]
    TokenExpired,

    #[error("invalid DID format: {0}")]
    InvalidDid(String),

    #[error("failed to resolve DID document: {0}")]
    DidResolutionFailed(String),

    #[error("invalid signature")]
    InvalidSignature,

    #[error("DID document missing verification method")]
    MissingVerificationMethod,

    #[error("unsupported key type: {0}")]
    UnsupportedKeyType(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::InvalidDid(_) | AuthError::DidResolutionFailed(_) | AuthError::MissingVerificationMethod
            | AuthError::UnsupportedKeyType(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = Json(json!({ "error": "AuthRequired", "message": self.to_string() }));
        (status, body).into_response()
    }
}

/// AT Protocol JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtProtoClaims {
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: Option<i64>,
    pub sub: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DidDocument {
    pub id: String,
    #[serde(rename = "verificationMethod")]
    pub verification_method: Vec<VerificationMethod>,
    #[serde(default)]
    pub service: Vec<ServiceEndpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub id: String,
    #[serde(rename = "type")]
    pub service_type: String,
    #[serde(rename = "serviceEndpoint")]
    pub service_endpoint: String,
}

impl DidDocument {
    pub fn pds_endpoint(&self) -> Option<&str> {
        self.service
            .iter()
            .find(|s| s.id == "#atproto_pds" || s.service_type == "AtprotoPersonalDataServer")
            .map(|s| s.service_endpoint.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub controller: String,
    #[serde(rename = "publicKeyJwk")]
    pub public_key_jwk: Option<PublicKeyJwk>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyJwk {
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub y: Option<String>,
}

/// The opaque authenticated session capability injected into request context.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub did: String,
    pub access_token: String,
    pub pds_url: String,
}

/// Shared state for JWT verification: cached DID documents and an HTTP client
/// used to resolve `did:plc:`/`did:web:` documents.
#[derive(Clone)]
pub struct AuthState {
    did_cache: Cache<String, DidDocument>,
    http_client: reqwest::Client,
}

impl AuthState {
    pub fn new() -> Self {
        let did_cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(std::time::Duration::from_secs(300))
            .build();
        Self {
            did_cache,
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    async fn verify_jwt(&self, token: &str) -> Result<AtProtoClaims, AuthError> {
        let parts: Vec<&str> = token.split('.').collect();
        if parts.len() != 3 {
            return Err(AuthError::InvalidToken("malformed JWT".into()));
        }

        let header_json = URL_SAFE_NO_PAD
            .decode(parts[0])
            .map_err(|e| AuthError::InvalidToken(format!("invalid base64 header: {e}")))?;
        let payload_json = URL_SAFE_NO_PAD
            .decode(parts[1])
            .map_err(|e| AuthError::InvalidToken(format!("invalid base64 payload: {e}")))?;

        #[derive(Deserialize)]
        struct JwtHeader {
            alg: String,
        }
        let header: JwtHeader = serde_json::from_slice(&header_json)
            .map_err(|e| AuthError::InvalidToken(format!("invalid header JSON: {e}")))?;
        let claims: AtProtoClaims = serde_json::from_slice(&payload_json)
            .map_err(|e| AuthError::InvalidToken(format!("invalid claims JSON: {e}")))?;

        if claims.exp < Utc::now().timestamp() {
            return Err(AuthError::TokenExpired);
        }

        let signing_input = format!("{}.{}", parts[0], parts[1]);

        match header.alg.as_str() {
            "HS256" => {
                let secret = std::env::var("JWT_SECRET")
                    .map_err(|_| AuthError::InvalidToken("HS256 requires JWT_SECRET".into()))?;
                jsonwebtoken::decode::<AtProtoClaims>(
                    token,
                    &jsonwebtoken::DecodingKey::from_secret(secret.as_bytes()),
                    &jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::HS256),
                )
                .map(|d| d.claims)
                .map_err(|e| AuthError::InvalidToken(format!("HS256 verify failed: {e}")))
            }
            "ES256" => {
                use p256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
                use p256::EncodedPoint;
                let vk = self.p256_verifying_key(&claims.iss).await?;
                let sig_bytes = URL_SAFE_NO_PAD
                    .decode(parts[2])
                    .map_err(|e| AuthError::InvalidToken(format!("invalid b64 sig: {e}")))?;
                let sig = Signature::from_slice(&sig_bytes)
                    .map_err(|_| AuthError::InvalidToken("invalid ES256 signature".into()))?;
                let _: EncodedPoint = vk.to_encoded_point(false);
                vk.verify(signing_input.as_bytes(), &sig)
                    .map_err(|_| AuthError::InvalidSignature)?;
                Ok(claims)
            }
            "ES256K" => {
                use k256::ecdsa::{signature::Verifier, Signature, VerifyingKey};
                let vk = self.k256_verifying_key(&claims.iss).await?;
                let sig_bytes = URL_SAFE_NO_PAD
                    .decode(parts[2])
                    .map_err(|e| AuthError::InvalidToken(format!("invalid b64 sig: {e}")))?;
                let sig = Signature::from_slice(&sig_bytes)
                    .map_err(|_| AuthError::InvalidToken("invalid ES256K signature".into()))?;
                VerifyingKey::verify(&vk, signing_input.as_bytes(), &sig)
                    .map_err(|_| AuthError::InvalidSignature)?;
                Ok(claims)
            }
            other => Err(AuthError::UnsupportedKeyType(format!("unsupported alg: {other}"))),
        }
    }

    async fn p256_verifying_key(&self, did: &str) -> Result<p256::ecdsa::VerifyingKey, AuthError> {
        use p256::EncodedPoint;
        let doc = self.resolve_did(did).await?;
        let vm = doc
            .verification_method
            .first()
            .ok_or(AuthError::MissingVerificationMethod)?;
        let jwk = vm.public_key_jwk.as_ref().ok_or(AuthError::MissingVerificationMethod)?;
        if jwk.kty != "EC" || jwk.crv.to_ascii_uppercase() != "P-256" {
            return Err(AuthError::UnsupportedKeyType(format!("expected EC P-256, got {} {}", jwk.kty, jwk.crv)));
        }
        let x = URL_SAFE_NO_PAD.decode(&jwk.x).map_err(|e| AuthError::InvalidToken(format!("bad jwk.x: {e}")))?;
        let y = URL_SAFE_NO_PAD
            .decode(jwk.y.as_ref().ok_or(AuthError::MissingVerificationMethod)?)
            .map_err(|e| AuthError::InvalidToken(format!("bad jwk.y: {e}")))?;
        let ep = EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&x),
            p256::FieldBytes::from_slice(&y),
            false,
        );
        p256::ecdsa::VerifyingKey::from_encoded_point(&ep)
            .map_err(|_| AuthError::InvalidToken("invalid P-256 point".into()))
    }

    async fn k256_verifying_key(&self, did: &str) -> Result<k256::ecdsa::VerifyingKey, AuthError> {
        use k256::EncodedPoint;
        let doc = self.resolve_did(did).await?;
        let vm = doc
            .verification_method
            .first()
            .ok_or(AuthError::MissingVerificationMethod)?;
        let jwk = vm.public_key_jwk.as_ref().ok_or(AuthError::MissingVerificationMethod)?;
        let crv = jwk.crv.to_ascii_lowercase();
        if jwk.kty != "EC" || (crv != "secp256k1" && crv != "k-256") {
            return Err(AuthError::UnsupportedKeyType(format!("expected secp256k1, got {}", jwk.crv)));
        }
        let x = URL_SAFE_NO_PAD.decode(&jwk.x).map_err(|e| AuthError::InvalidToken(format!("bad jwk.x: {e}")))?;
        let y = URL_SAFE_NO_PAD
            .decode(jwk.y.as_ref().ok_or(AuthError::MissingVerificationMethod)?)
            .map_err(|e| AuthError::InvalidToken(format!("bad jwk.y: {e}")))?;
        let ep = EncodedPoint::from_affine_coordinates(
            p256::FieldBytes::from_slice(&x),
            p256::FieldBytes::from_slice(&y),
            false,
        );
        k256::ecdsa::VerifyingKey::from_encoded_point(&ep)
            .map_err(|_| AuthError::InvalidToken("invalid secp256k1 point".into()))
    }

    /// Resolve a DID document and return its advertised PDS base URL.
    pub async fn resolve_pds_url(&self, did: &str) -> Result<String, AuthError> {
        let doc = self.resolve_did(did).await?;
        doc.pds_endpoint()
            .map(str::to_string)
            .ok_or_else(|| AuthError::DidResolutionFailed(format!("no PDS service entry for {did}")))
    }

    async fn resolve_did(&self, did: &str) -> Result<DidDocument, AuthError> {
        if !did.starts_with("did:") {
            return Err(AuthError::InvalidDid(format!("DID must start with 'did:': {did}")));
        }
        if let Some(cached) = self.did_cache.get(did).await {
            debug!(%did, "DID document cache hit");
            return Ok(cached);
        }
        let doc = if let Some(plc) = did.strip_prefix("did:plc:") {
            self.fetch_did_doc(&format!("https://plc.directory/did:plc:{plc}")).await?
        } else if let Some(web) = did.strip_prefix("did:web:") {
            let domain = web.replace(':', "/");
            self.fetch_did_doc(&format!("https://{domain}/.well-known/did.json")).await?
        } else {
            return Err(AuthError::InvalidDid(format!("unsupported DID method: {did}")));
        };
        self.did_cache.insert(did.to_string(), doc.clone()).await;
        Ok(doc)
    }

    async fn fetch_did_doc(&self, url: &str) -> Result<DidDocument, AuthError> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AuthError::DidResolutionFailed(format!("HTTP error: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::DidResolutionFailed(format!("status {}", response.status())));
        }
        response
            .json::<DidDocument>()
            .await
            .map_err(|e| AuthError::DidResolutionFailed(format!("failed to parse DID document: {e}")))
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AuthState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AuthError::MissingAuthHeader)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AuthError::InvalidAuthFormat)?;

        let auth_state = AuthState::from_ref(state);
        let claims = auth_state.verify_jwt(token).await?;
        let pds_url = auth_state.resolve_pds_url(&claims.iss).await?;

        debug!(did = %claims.iss, "authenticated request");

        Ok(AuthUser {
            did: claims.iss,
            access_token: token.to_string(),
            pds_url,
        })
    }
}
