//! Feed Engine (C9): community/timeline/discover feeds sharing one ranking
//! and pagination core.

pub mod cursor;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;

use crate::error::AppError;
use crate::models::Post;
use cursor::Cursor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    New,
    Top,
    Hot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl Timeframe {
    fn interval(&self) -> &'static str {
        match self {
            Timeframe::Hour => "1 hour",
            Timeframe::Day => "1 day",
            Timeframe::Week => "7 days",
            Timeframe::Month => "30 days",
            Timeframe::Year => "365 days",
        }
    }
}

pub enum FeedScope<'a> {
    Community(&'a str),
    Timeline(&'a str),
    Discover,
}

/// `(score + 1) / (hours_since_created + 2)^1.5`, evaluated relative to a
/// fixed `query_time` so pagination stays stable.
fn hot_rank(score: i64, created_at: DateTime<Utc>, query_time: DateTime<Utc>) -> f64 {
    let hours = (query_time - created_at).num_seconds() as f64 / 3600.0;
    (score as f64 + 1.0) / (hours + 2.0).powf(1.5)
}

pub struct FeedPage {
    pub posts: Vec<Post>,
    pub cursor: Option<String>,
}

pub async fn list_feed(
    pool: &PgPool,
    scope: FeedScope<'_>,
    sort: SortMode,
    timeframe: Option<Timeframe>,
    cursor_token: Option<&str>,
    limit: i64,
    hmac_secret: &str,
) -> Result<FeedPage, AppError> {
    let decoded_cursor = match cursor_token {
        Some(token) => Some(Cursor::decode(token, hmac_secret)?),
        None => None,
    };

    let query_time = match &decoded_cursor {
        Some(Cursor::Hot { query_time, .. }) => *query_time,
        _ => Utc::now(),
    };

    // Scopes are interpolated directly rather than bound because the
    // cursor/limit bind positions already shift per sort mode below; the
    // DID values reaching here were already shape-validated by the
    // identifier resolver (C1), and `sql_escape` guards the quote regardless.
    let scope_clause = match &scope {
        FeedScope::Community(did) => format!("p.community_did = '{}'", sql_escape(did)),
        FeedScope::Timeline(user_did) => format!(
            "p.community_did IN (SELECT community_did FROM community_subscriptions WHERE user_did = '{}')",
            sql_escape(user_did)
        ),
        FeedScope::Discover => "TRUE".to_string(),
    };

    let timeframe_clause = if sort == SortMode::Top {
        timeframe
            .map(|t| format!("AND p.created_at > NOW() - INTERVAL '{}'", t.interval()))
            .unwrap_or_default()
    } else {
        String::new()
    };

    let mut rows = match sort {
        SortMode::New => fetch_new(pool, &scope_clause, decoded_cursor.as_ref(), limit).await?,
        SortMode::Top => fetch_top(pool, &scope_clause, &timeframe_clause, decoded_cursor.as_ref(), limit).await?,
        SortMode::Hot => fetch_hot(pool, &scope_clause, decoded_cursor.as_ref(), query_time, limit).await?,
    };

    let has_more = rows.len() as i64 > limit;
    if has_more {
        rows.truncate(limit as usize);
    }

    let next_cursor = if has_more {
        rows.last().map(|last| match sort {
            SortMode::New => Cursor::New { created_at: last.created_at, uri: last.uri.clone() }.encode(hmac_secret),
            SortMode::Top => {
                Cursor::Top { score: last.score, created_at: last.created_at, uri: last.uri.clone() }.encode(hmac_secret)
            }
            SortMode::Hot => {
                Cursor::Hot { created_at: last.created_at, uri: last.uri.clone(), query_time }.encode(hmac_secret)
            }
        })
    } else {
        None
    };

    Ok(FeedPage { posts: rows, cursor: next_cursor })
}

/// Quotes a DID for inline interpolation into the scope clause. DIDs are
/// already validated by the identifier resolver (C1) before reaching here;
/// this only guards against a stray quote breaking the query shape.
fn sql_escape(s: &str) -> String {
    s.replace('\'', "''")
}

async fn fetch_new(
    pool: &PgPool,
    scope_clause: &str,
    cursor: Option<&Cursor>,
    limit: i64,
) -> Result<Vec<Post>, AppError> {
    let cursor_clause = match cursor {
        Some(Cursor::New { .. }) => "AND (p.created_at, p.uri) < ($2, $3)",
        Some(_) => return Err(AppError::InvalidCursor),
        None => "",
    };

    let sql = format!(
        "SELECT p.uri, p.cid, p.rkey, p.author_did, p.community_did, p.content, p.facets, p.embeds, p.labels, p.languages, p.score, p.created_at, p.deleted_at \
         FROM posts p WHERE p.deleted_at IS NULL AND ({scope_clause}) {cursor_clause} \
         ORDER BY p.created_at DESC, p.uri DESC LIMIT $1"
    );

    let mut query = sqlx::query_as::<_, Post>(&sql).bind(limit + 1);
    if let Some(Cursor::New { created_at, uri }) = cursor {
        query = query.bind(*created_at).bind(uri);
    }
    query.fetch_all(pool).await.map_err(|e| AppError::Internal(e.into()))
}

async fn fetch_top(
    pool: &PgPool,
    scope_clause: &str,
    timeframe_clause: &str,
    cursor: Option<&Cursor>,
    limit: i64,
) -> Result<Vec<Post>, AppError> {
    let cursor_clause = match cursor {
        Some(Cursor::Top { .. }) => "AND (p.score, p.created_at, p.uri) < ($2, $3, $4)",
        Some(_) => return Err(AppError::InvalidCursor),
        None => "",
    };

    let sql = format!(
        "SELECT p.uri, p.cid, p.rkey, p.author_did, p.community_did, p.content, p.facets, p.embeds, p.labels, p.languages, p.score, p.created_at, p.deleted_at \
         FROM posts p WHERE p.deleted_at IS NULL AND ({scope_clause}) {timeframe_clause} {cursor_clause} \
         ORDER BY p.score DESC, p.created_at DESC, p.uri DESC LIMIT $1"
    );

    let mut query = sqlx::query_as::<_, Post>(&sql).bind(limit + 1);
    if let Some(Cursor::Top { score, created_at, uri }) = cursor {
        query = query.bind(*score).bind(*created_at).bind(uri);
    }
    query.fetch_all(pool).await.map_err(|e| AppError::Internal(e.into()))
}

async fn fetch_hot(
    pool: &PgPool,
    scope_clause: &str,
    cursor: Option<&Cursor>,
    query_time: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<Post>, AppError> {
    // hot_rank is computed relative to the frozen query_time, not NOW(), so
    // continuation pages see a stable ordering.
    let rank_expr = "(p.score + 1) / POWER(EXTRACT(EPOCH FROM ($2::timestamptz - p.created_at)) / 3600.0 + 2, 1.5)";
    let cursor_rank_expr = "(c.score + 1) / POWER(EXTRACT(EPOCH FROM ($2::timestamptz - c.created_at)) / 3600.0 + 2, 1.5)";

    // Three-level lexicographic strict-less: rows strictly below the
    // cursor's rank come first; within an equal rank, break the tie the
    // same way fetch_top does, on (created_at, uri).
    let cursor_clause = match cursor {
        Some(Cursor::Hot { .. }) => format!(
            "AND ({rank_expr} < (SELECT {cursor_rank_expr} FROM posts c WHERE c.uri = $4) \
             OR ({rank_expr} = (SELECT {cursor_rank_expr} FROM posts c WHERE c.uri = $4) \
                 AND (p.created_at, p.uri) < ($3, $4)))"
        ),
        Some(_) => return Err(AppError::InvalidCursor),
        None => String::new(),
    };

    let sql = format!(
        "SELECT p.uri, p.cid, p.rkey, p.author_did, p.community_did, p.content, p.facets, p.embeds, p.labels, p.languages, p.score, p.created_at, p.deleted_at \
         FROM posts p WHERE p.deleted_at IS NULL AND ({scope_clause}) {cursor_clause} \
         ORDER BY {rank_expr} DESC, p.created_at DESC, p.uri DESC LIMIT $1"
    );

    let mut query = sqlx::query_as::<_, Post>(&sql).bind(limit + 1).bind(query_time);
    if let Some(Cursor::Hot { created_at, uri, .. }) = cursor {
        query = query.bind(*created_at).bind(uri);
    }
    query.fetch_all(pool).await.map_err(|e| AppError::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hot_rank_favors_recent_equal_score() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        let recent = now - chrono::Duration::hours(1);
        let old = now - chrono::Duration::hours(10);
        assert!(hot_rank(10, recent, now) > hot_rank(10, old, now));
    }

    #[test]
    fn test_hot_rank_new_zero_score_post_is_rankable() {
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 12, 0, 0).unwrap();
        assert!(hot_rank(0, now, now) > 0.0);
    }
}
