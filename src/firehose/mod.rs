//! Firehose Consumer (C7): a long-running task that tails the instance's
//! commit stream and routes events into the indexer.

pub mod indexer;

use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use sqlx::PgPool;
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum FirehoseEvent {
    Identity(IdentityEvent),
    Account(AccountEvent),
    Commit(CommitEvent),
}

#[derive(Debug, Deserialize)]
struct IdentityEvent {
    did: Option<String>,
    handle: Option<String>,
    seq: Option<i64>,
    #[allow(dead_code)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountEvent {
    did: Option<String>,
    #[allow(dead_code)]
    active: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CommitEvent {
    did: Option<String>,
    collection: Option<String>,
    rkey: Option<String>,
    operation: Option<String>,
    cid: Option<String>,
    record: Option<serde_json::Value>,
}

/// Runs forever. Reconnects with a fixed 5s backoff on any connection
/// failure; only returns when `shutdown` fires.
pub async fn run(pool: PgPool, firehose_url: String, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut last_seq: Option<i64> = None;

    loop {
        if *shutdown.borrow() {
            return;
        }

        tracing::info!(url = %firehose_url, "connecting to firehose");
        match connect_async(&firehose_url).await {
            Ok((stream, _response)) => {
                let (mut write, mut read) = stream.split();
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                let _ = write.send(Message::Close(None)).await;
                                return;
                            }
                        }
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    handle_message(&pool, text.as_bytes(), &mut last_seq).await;
                                }
                                Some(Ok(Message::Binary(bytes))) => {
                                    handle_message(&pool, &bytes, &mut last_seq).await;
                                }
                                Some(Ok(Message::Ping(payload))) => {
                                    let _ = write.send(Message::Pong(payload)).await;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "firehose read error, reconnecting");
                                    break;
                                }
                                None => {
                                    tracing::warn!("firehose stream closed, reconnecting");
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to connect to firehose, retrying");
            }
        }

        tokio::time::sleep(RECONNECT_DELAY).await;
    }
}

async fn handle_message(pool: &PgPool, bytes: &[u8], last_seq: &mut Option<i64>) {
    let event: FirehoseEvent = match serde_json::from_slice(bytes) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, "malformed firehose event, dropping");
            return;
        }
    };

    match event {
        FirehoseEvent::Identity(identity) => {
            crate::metrics::record_firehose_event("identity");
            handle_identity(pool, identity, last_seq).await
        }
        FirehoseEvent::Account(account) => {
            crate::metrics::record_firehose_event("account");
            handle_account(account)
        }
        FirehoseEvent::Commit(commit) => {
            crate::metrics::record_firehose_event("commit");
            indexer::handle_commit(pool, commit).await
        }
    }
}

async fn handle_identity(pool: &PgPool, event: IdentityEvent, last_seq: &mut Option<i64>) {
    let (did, handle) = match (event.did, event.handle) {
        (Some(did), Some(handle)) if !did.is_empty() && !handle.is_empty() => (did, handle),
        _ => {
            tracing::warn!("malformed identity event (missing did/handle), dropping");
            return;
        }
    };

    // Last-write-wins: out-of-order seq numbers are tolerated, only logged.
    if let (Some(seq), Some(last)) = (event.seq, *last_seq) {
        if seq < last {
            tracing::warn!(seq, last_observed_seq = last, "identity event arrived out of seq order");
        }
    }
    if let Some(seq) = event.seq {
        *last_seq = Some(last_seq.map_or(seq, |l| l.max(seq)));
    }

    if let Err(e) = indexer::upsert_identity(pool, &did, &handle).await {
        tracing::error!(did = %did, error = %e, "failed to index identity event");
    }
}

fn handle_account(event: AccountEvent) {
    match event.did {
        Some(did) => tracing::debug!(did = %did, "account event received (no-op: account state not indexed)"),
        None => tracing::warn!("malformed account event (missing did), dropping"),
    }
}
