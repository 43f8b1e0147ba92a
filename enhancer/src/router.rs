//! Concurrency-bounded fan-out of feedback items to the apply bridge.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::core::batch::{BatchItem, BatchResponse, ItemOutcome, ItemResult};
use crate::io::bridge::ApplyClient;

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("{0}")]
    BadRequest(String),
}

/// Send every item to `client` with at most `max_concurrency` calls in flight.
///
/// Results come back in input order. Individual failures are reported in the
/// item's result; only an empty batch is an error.
#[instrument(skip_all, fields(items = items.len(), max_concurrency = max_concurrency))]
pub async fn dispatch<C: ApplyClient + ?Sized>(
    client: &C,
    items: Vec<BatchItem>,
    max_concurrency: usize,
) -> Result<BatchResponse, RouterError> {
    if items.is_empty() {
        return Err(RouterError::BadRequest("payload cannot be empty".to_string()));
    }
    let limiter = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let units = items.into_iter().map(|item| {
        let limiter = Arc::clone(&limiter);
        async move {
            let request = item.to_request();
            let outcome = {
                // The semaphore is never closed, so acquire only fails if that changes.
                let _permit = limiter.acquire().await.ok();
                debug!(index = item.index, "dispatching item");
                client.apply(&request).await
            };
            match outcome {
                Ok(result) => ItemResult {
                    index: item.index,
                    outcome: ItemOutcome::Ok { result },
                },
                Err(err) => {
                    warn!(index = item.index, error = %err, "item failed");
                    ItemResult {
                        index: item.index,
                        outcome: ItemOutcome::Error {
                            error: err.to_item_error(),
                        },
                    }
                }
            }
        }
    });

    let response = BatchResponse::assemble(join_all(units).await);
    info!(status = ?response.status, "batch dispatched");
    Ok(response)
}
