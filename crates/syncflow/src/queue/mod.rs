//! The continuation message protocol.
//!
//! A job is walked as a chain of [`WorkUnit`]s, one page per message. Delivery
//! is at-least-once under a visibility lease: a message that is neither
//! deleted nor extended before its lease runs out is handed out again.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

pub mod memory;
pub mod pg;

pub use memory::MemoryWorkQueue;
pub use pg::PgWorkQueue;

/// Bearer token passed through the chain untouched. Never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub job_type: String,
    pub job_id: String,
    pub credential: Credential,
    /// Zero-based offset, always a multiple of the page size.
    pub cursor: u32,
    /// Submission time, carried unchanged down the chain.
    pub submitted_at: DateTime<Utc>,
}

impl WorkUnit {
    pub fn first(
        job_type: &str,
        job_id: &str,
        credential: Credential,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            job_type: job_type.to_string(),
            job_id: job_id.to_string(),
            credential,
            cursor: 0,
            submitted_at,
        }
    }

    /// The unit for the following page. Only the cursor moves.
    pub fn next(&self, page_size: u32) -> Self {
        Self {
            cursor: self.cursor + page_size,
            ..self.clone()
        }
    }

    /// One key per (job, cursor); enqueueing the same key twice is dropped.
    pub fn dedup_key(&self) -> String {
        format!("{}/{}/{}", self.job_type, self.job_id, self.cursor)
    }
}

/// Proof of the current lease. Stale receipts (lease expired and taken by
/// another consumer) no longer delete or extend anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub message_id: Uuid,
    pub lease_token: Uuid,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Receipt,
    pub unit: WorkUnit,
    /// 1 on first delivery, incremented on every redelivery.
    pub receive_count: i32,
}

/// A unit moved aside after using up its receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parked {
    pub unit: WorkUnit,
    pub receive_count: i32,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Receives a message gets before it is only eligible for dead-lettering.
    fn max_receives(&self) -> i32;

    /// Returns `false` when a unit with the same dedup key was already accepted.
    async fn enqueue(&self, unit: &WorkUnit) -> Result<bool>;

    /// Leases one visible message for `visibility`.
    async fn receive(&self, visibility: Duration) -> Result<Option<Delivery>>;

    async fn delete(&self, receipt: &Receipt) -> Result<bool>;

    /// Makes the message invisible for `delay` from now, keeping the lease.
    async fn extend_lease(&self, receipt: &Receipt, delay: Duration) -> Result<bool>;

    /// Parks visible messages that used up their receives and returns them.
    async fn dead_letter_exhausted(&self) -> Result<Vec<Parked>>;

    /// Forgets deleted messages (and their dedup keys) older than `older_than`.
    async fn purge_deleted(&self, older_than: Duration) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_advances_cursor_by_exactly_one_page() {
        let t0 = Utc::now();
        let unit = WorkUnit::first("sync", "ABCD1234", Credential::new("tok"), t0);
        let n1 = unit.next(50);
        let n2 = n1.next(50);
        assert_eq!((unit.cursor, n1.cursor, n2.cursor), (0, 50, 100));
        assert_eq!(n2.submitted_at, t0);
        assert_eq!(n2.credential, unit.credential);
        assert_eq!(n2.dedup_key(), "sync/ABCD1234/100");
    }

    #[test]
    fn credential_is_redacted_but_serialized() {
        let unit = WorkUnit::first("sync", "J", Credential::new("secret-token"), Utc::now());
        assert!(!format!("{unit:?}").contains("secret-token"));

        let body = serde_json::to_value(&unit).unwrap();
        assert_eq!(body["credential"], "secret-token");
        let back: WorkUnit = serde_json::from_value(body).unwrap();
        assert_eq!(back, unit);
    }
}
