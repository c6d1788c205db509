use chrono::Utc;
use coves_appview::credentials::{self, NewCommunity};
use coves_appview::db::{self, DbConfig};
use coves_appview::feed::{self, FeedScope, SortMode};
use coves_appview::models::Post;
use sqlx::PgPool;
use std::collections::HashSet;
use std::time::Duration;

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/coves_test".to_string());

    let config = DbConfig {
        database_url,
        max_connections: 10,
        min_connections: 2,
        acquire_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(600),
    };

    db::init_db(config).await.expect("failed to initialize test database")
}

async fn cleanup_test_data(pool: &PgPool) {
    sqlx::query("TRUNCATE TABLE votes, comments, posts, memberships, community_blocks, community_subscriptions, communities CASCADE")
        .execute(pool)
        .await
        .expect("failed to clean up test data");
}

fn new_community(did: &str, name: &str, handle: &str) -> NewCommunity {
    NewCommunity {
        did: did.to_string(),
        handle: handle.to_string(),
        name: name.to_string(),
        display_name: None,
        description: None,
        rules: None,
        categories: None,
        language: None,
        created_by_did: "did:plc:creator".to_string(),
        hosted_by_did: "did:web:coves.social".to_string(),
        visibility: "public".to_string(),
        allow_external_discovery: true,
        pds_url: "https://pds.coves.social".to_string(),
        pds_email: format!("community-{name}@communities.coves.social"),
        pds_password: "test-password".to_string(),
        pds_access_token: "test-access".to_string(),
        pds_refresh_token: "test-refresh".to_string(),
        record_uri: format!("at://{did}/social.coves.community.profile/self"),
        record_cid: "bafytestcid".to_string(),
    }
}

#[tokio::test]
async fn test_community_crud() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let created = credentials::create(&pool, new_community("did:plc:gaming", "gaming", "c-gaming.coves.social"))
        .await
        .expect("failed to create community");

    assert_eq!(created.owner_did, created.did, "owner_did must equal did for self-owned communities");
    assert_eq!(created.subscriber_count, 0);

    let by_did = db::get_community_by_did(&pool, "did:plc:gaming")
        .await
        .expect("query failed")
        .expect("community not found by did");
    assert_eq!(by_did.handle, "c-gaming.coves.social");

    let by_handle = db::get_community_by_handle(&pool, "c-gaming.coves.social")
        .await
        .expect("query failed")
        .expect("community not found by handle");
    assert_eq!(by_handle.did, "did:plc:gaming");
}

#[tokio::test]
async fn test_duplicate_did_rejected() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    credentials::create(&pool, new_community("did:plc:dup", "dup", "c-dup.coves.social"))
        .await
        .expect("first create should succeed");

    let result = credentials::create(&pool, new_community("did:plc:dup", "dup2", "c-dup2.coves.social")).await;
    assert!(result.is_err(), "duplicate DID must be rejected");
}

#[tokio::test]
async fn test_subscribe_is_idempotent_and_bumps_counter_once() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    credentials::create(&pool, new_community("did:plc:sub-target", "subtarget", "c-subtarget.coves.social"))
        .await
        .expect("failed to create community");

    let first = db::create_subscription(
        &pool,
        "did:plc:user1",
        "did:plc:sub-target",
        "at://did:plc:user1/social.coves.community.subscription/abc",
        "cid1",
        3,
    )
    .await
    .expect("first subscribe should succeed");
    assert_eq!(first.content_visibility, 3);

    let replay = db::create_subscription(
        &pool,
        "did:plc:user1",
        "did:plc:sub-target",
        "at://did:plc:user1/social.coves.community.subscription/abc",
        "cid1",
        3,
    )
    .await;
    assert!(
        matches!(replay, Err(coves_appview::error::AppError::SubscriptionAlreadyExists)),
        "replaying the same subscription must not create a second row"
    );

    let community = db::get_community_by_did(&pool, "did:plc:sub-target")
        .await
        .expect("query failed")
        .expect("community missing");
    assert_eq!(community.subscriber_count, 1, "subscriber_count must be incremented exactly once across replays");
}

#[tokio::test]
async fn test_unsubscribe_decrements_counter_and_is_idempotent() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    credentials::create(&pool, new_community("did:plc:unsub-target", "unsubtarget", "c-unsubtarget.coves.social"))
        .await
        .expect("failed to create community");
    db::create_subscription(
        &pool,
        "did:plc:user2",
        "did:plc:unsub-target",
        "at://did:plc:user2/social.coves.community.subscription/xyz",
        "cid2",
        3,
    )
    .await
    .expect("subscribe should succeed");

    db::delete_subscription(&pool, "did:plc:user2", "did:plc:unsub-target").await.expect("unsubscribe should succeed");

    let community = db::get_community_by_did(&pool, "did:plc:unsub-target")
        .await
        .expect("query failed")
        .expect("community missing");
    assert_eq!(community.subscriber_count, 0);

    let second = db::delete_subscription(&pool, "did:plc:user2", "did:plc:unsub-target").await;
    assert!(matches!(second, Err(coves_appview::error::AppError::SubscriptionNotFound)));
}

#[tokio::test]
async fn test_block_create_conflict_and_unblock() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    credentials::create(&pool, new_community("did:plc:block-target", "blocktarget", "c-blocktarget.coves.social"))
        .await
        .expect("failed to create community");

    db::create_block(&pool, "did:plc:user3", "did:plc:block-target", "at://did:plc:user3/social.coves.community.block/abc", "cidblock")
        .await
        .expect("first block should succeed");

    let replay = db::create_block(&pool, "did:plc:user3", "did:plc:block-target", "at://did:plc:user3/social.coves.community.block/abc", "cidblock").await;
    assert!(matches!(replay, Err(coves_appview::error::AppError::BlockAlreadyExists)));

    db::delete_block(&pool, "did:plc:user3", "did:plc:block-target").await.expect("unblock should succeed");
    let second_unblock = db::delete_block(&pool, "did:plc:user3", "did:plc:block-target").await;
    assert!(matches!(second_unblock, Err(coves_appview::error::AppError::BlockNotFound)));
}

#[tokio::test]
async fn test_post_upsert_survives_replay_and_soft_delete_hides_it() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    credentials::create(&pool, new_community("did:plc:post-target", "posttarget", "c-posttarget.coves.social"))
        .await
        .expect("failed to create community");

    let post = Post {
        uri: "at://did:plc:author1/social.coves.post/abc123".to_string(),
        cid: "bafypost1".to_string(),
        rkey: "abc123".to_string(),
        author_did: "did:plc:author1".to_string(),
        community_did: "did:plc:post-target".to_string(),
        content: Some("hello coves".to_string()),
        facets: None,
        embeds: None,
        labels: None,
        languages: None,
        score: 0,
        created_at: Utc::now(),
        deleted_at: None,
    };

    db::upsert_post(&pool, &post).await.expect("first upsert should succeed");
    db::upsert_post(&pool, &post).await.expect("replayed upsert should not error");

    let fetched = db::get_post_by_uri(&pool, &post.uri).await.expect("query failed").expect("post missing");
    assert_eq!(fetched.content, Some("hello coves".to_string()));

    db::soft_delete_post(&pool, &post.uri).await.expect("soft delete should succeed");
    let after_delete = db::get_post_by_uri(&pool, &post.uri).await.expect("query failed");
    assert!(after_delete.is_none(), "soft-deleted posts are excluded from reads");
}

/// Paginating the `hot` sort with a page size smaller than the result set
/// must visit every post exactly once, in non-increasing rank order, with
/// no duplicates or gaps across the cursor boundary.
#[tokio::test]
async fn test_hot_feed_pagination_covers_all_posts_without_duplicates() {
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    credentials::create(&pool, new_community("did:plc:hot-target", "hottarget", "c-hottarget.coves.social"))
        .await
        .expect("failed to create community");

    const TOTAL_POSTS: usize = 7;
    const PAGE_SIZE: i64 = 3;
    let now = Utc::now();

    for i in 0..TOTAL_POSTS {
        let post = Post {
            uri: format!("at://did:plc:author1/social.coves.post/hot{i}"),
            cid: format!("bafyhot{i}"),
            rkey: format!("hot{i}"),
            author_did: "did:plc:author1".to_string(),
            community_did: "did:plc:hot-target".to_string(),
            content: Some(format!("post {i}")),
            facets: None,
            embeds: None,
            labels: None,
            languages: None,
            score: (i as i64) % 3,
            created_at: now - chrono::Duration::minutes(i as i64 * 10),
            deleted_at: None,
        };
        db::upsert_post(&pool, &post).await.expect("seed post upsert should succeed");
    }

    let secret = "test-feed-hmac-secret";
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;
    let mut pages = 0;

    loop {
        let page = feed::list_feed(
            &pool,
            FeedScope::Community("did:plc:hot-target"),
            SortMode::Hot,
            None,
            cursor.as_deref(),
            PAGE_SIZE,
            secret,
        )
        .await
        .expect("hot feed pagination must not error on a continuation cursor");

        for post in &page.posts {
            assert!(seen.insert(post.uri.clone()), "post {} returned on more than one page", post.uri);
        }

        pages += 1;
        assert!(pages <= TOTAL_POSTS, "pagination did not terminate");

        match page.cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    assert_eq!(seen.len(), TOTAL_POSTS, "every post must be visited exactly once across all pages");
    assert!(pages > 1, "test setup must actually exercise a continuation cursor");
}
