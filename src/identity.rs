//! Identifier Resolver (C1): maps `did:*`, `!name@instance`, `@handle`, and
//! `c-name.domain` forms to a canonical community DID.

use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgPool;

use crate::error::AppError;

static DID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^did:(plc|web):[A-Za-z0-9._:%-]+$").expect("valid DID regex"));

/// RFC 1035 DNS label: 1-63 chars, alphanumeric+hyphen, no leading/trailing hyphen.
pub fn is_valid_dns_label(label: &str) -> bool {
    if label.is_empty() || label.len() > 63 {
        return false;
    }
    if label.starts_with('-') || label.ends_with('-') {
        return false;
    }
    label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Build the canonical handle `c-{name}.{instance}`, lowercased.
pub fn canonical_handle(name: &str, instance_domain: &str) -> String {
    format!("c-{}.{}", name.to_ascii_lowercase(), instance_domain.to_ascii_lowercase())
}

/// Resolve a free-form identifier to a community DID.
///
/// Order of rules:
/// 1. `did:plc:…` / `did:web:…` — validated by shape, then existence-checked.
/// 2. `!name@instance` — scoped handle, instance must match `local_instance_domain`.
/// 3. Leading `@` is stripped.
/// 4. A dotted identifier is looked up as a canonical handle.
/// 5. Anything else is a validation error.
pub async fn resolve_identifier(
    pool: &PgPool,
    identifier: &str,
    local_instance_domain: &str,
) -> Result<String, AppError> {
    if identifier.starts_with("did:") {
        if !DID_RE.is_match(identifier) {
            return Err(AppError::ValidationError {
                field: "identifier".into(),
                message: format!("malformed DID: {identifier}"),
            });
        }
        return lookup_did_exists(pool, identifier).await;
    }

    if let Some(rest) = identifier.strip_prefix('!') {
        let (name, instance) = rest
            .split_once('@')
            .ok_or_else(|| AppError::ValidationError {
                field: "identifier".into(),
                message: "scoped identifier must be `!name@instance`".into(),
            })?;

        if !is_valid_dns_label(name) {
            return Err(AppError::ValidationError {
                field: "identifier".into(),
                message: format!("invalid scoped name: {name}"),
            });
        }

        if !instance.eq_ignore_ascii_case(local_instance_domain) {
            return Err(AppError::NotFound(format!(
                "identifier {identifier} is not local to this instance"
            )));
        }

        let handle = canonical_handle(name, local_instance_domain);
        return lookup_by_handle(pool, &handle).await;
    }

    let stripped = identifier.strip_prefix('@').unwrap_or(identifier);

    if stripped.contains('.') {
        return lookup_by_handle(pool, &stripped.to_ascii_lowercase()).await;
    }

    Err(AppError::ValidationError {
        field: "identifier".into(),
        message: format!("unrecognized identifier form: {identifier}"),
    })
}

async fn lookup_did_exists(pool: &PgPool, did: &str) -> Result<String, AppError> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT did FROM communities WHERE did = $1 AND deleted_at IS NULL")
            .bind(did)
            .fetch_optional(pool)
            .await
            .map_err(|e| AppError::Internal(e.into()))?;

    found.ok_or_else(|| AppError::NotFound(format!("no community for DID {did}")))
}

async fn lookup_by_handle(pool: &PgPool, handle: &str) -> Result<String, AppError> {
    let found: Option<String> = sqlx::query_scalar(
        "SELECT did FROM communities WHERE lower(handle) = $1 AND deleted_at IS NULL",
    )
    .bind(handle)
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::Internal(e.into()))?;

    found.ok_or_else(|| AppError::NotFound(format!("no community for handle {handle}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_label_boundaries() {
        assert!(is_valid_dns_label(&"a".repeat(63)));
        assert!(!is_valid_dns_label(&"a".repeat(64)));
        assert!(!is_valid_dns_label("-leading"));
        assert!(!is_valid_dns_label("trailing-"));
        assert!(!is_valid_dns_label(""));
    }

    #[test]
    fn test_did_regex_accepts_plc_and_web() {
        assert!(DID_RE.is_match("did:plc:abc123"));
        assert!(DID_RE.is_match("did:web:example.com"));
        assert!(!DID_RE.is_match("did:key:abc"));
        assert!(!DID_RE.is_match("not-a-did"));
    }

    #[test]
    fn test_canonical_handle_is_lowercased() {
        assert_eq!(canonical_handle("Gaming", "Coves.Social"), "c-gaming.coves.social");
    }
}
