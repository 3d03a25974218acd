//! Lease acquisition: hands each eligible message to at most one
//! consumer per visibility window.

use std::time::Duration;

use chrono::Utc;

use crate::message::Message;
use crate::store::Store;
use crate::{Error, Id};

/// Maximum number of messages handed out by a single lease call.
pub const MAX_LEASE_COUNT: usize = 100;

/// Lease timeout applied when the caller does not pick one.
pub const DEFAULT_LEASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Shortest accepted lease timeout.
pub const MIN_LEASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest accepted lease timeout.
pub const MAX_LEASE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Acquire up to `count` eligible messages, newest first.
///
/// The store primitive claims one document at a time, so the batch is
/// built by looping: concurrent callers interleave at per-message
/// granularity and losing a race costs one iteration, never the batch.
/// The eligibility horizon stays pinned to the first clock reading;
/// leases written by other callers while this loop runs are therefore
/// never considered expired by it. The lease deadline is recomputed each
/// iteration so every message gets the full `timeout` from its own
/// acquisition moment. Stops early once no eligible message remains.
pub(crate) async fn acquire_batch(
    store: &dyn Store,
    project_id: &Id,
    queue_id: &Id,
    count: usize,
    timeout: Duration,
) -> Result<Vec<Message>, Error> {
    let horizon = Utc::now();
    let mut leased = Vec::with_capacity(count);
    for _ in 0..count {
        let lease_until = Utc::now() + timeout;
        match store
            .acquire_message(project_id, queue_id, horizon, lease_until)
            .await?
        {
            Some(message) => leased.push(message),
            None => break,
        }
    }
    Ok(leased)
}
