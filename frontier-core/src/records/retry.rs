//! Bounded retry with recovery for durable-store calls.
//!
//! A timed out attempt waits for the database to report ready before the
//! next one; a closed connection is re-established first. Any other failure
//! ends the loop at once. At most `max_retries + 1` attempts are made.

use std::future::Future;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{RecordResult, RecordStoreError, StoreFault};

/// Recovery actions the retry loop can ask of a connection.
#[async_trait]
pub trait Recovery: Send + Sync {
    /// Block until the database answers again or the wait budget is spent.
    async fn wait_until_ready(&self) -> Result<(), StoreFault>;

    /// Replace the underlying connection.
    async fn reconnect(&self) -> Result<(), StoreFault>;
}

/// Run `attempt` until it succeeds, fails with a non-recoverable fault, or the
/// retry budget is exhausted.
pub async fn execute_with_retry<T, F, Fut, R>(
    operation: &'static str,
    max_retries: u32,
    recovery: &R,
    mut attempt: F,
) -> RecordResult<T>
where
    R: Recovery + ?Sized,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreFault>>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let fault = match attempt().await {
            Ok(value) => return Ok(value),
            Err(fault) => fault,
        };

        warn!(
            operation,
            retries = attempts - 1,
            error = %fault,
            "Failed to execute query"
        );

        match &fault {
            StoreFault::Timeout(_) => {
                if let Err(err) = recovery.wait_until_ready().await {
                    warn!(operation, error = %err, "Timed out waiting for database to be ready");
                }
            }
            StoreFault::ConnectionClosed(_) => {
                if let Err(err) = recovery.reconnect().await {
                    warn!(operation, error = %err, "Failed to reconnect database");
                }
            }
            StoreFault::Rejected(_) => {
                return Err(RecordStoreError::Query {
                    operation,
                    attempts,
                    source: fault,
                });
            }
        }

        if attempts > max_retries {
            return Err(RecordStoreError::RetriesExhausted {
                operation,
                attempts,
                max_attempts: max_retries.saturating_add(1),
                source: fault,
            });
        }
    }
}
