//! Per-engine configuration. Plain structs with `Default` impls matching the protocol
//! constants this crate specifies; constructed directly by the embedding application (no
//! file/env loading — that belongs to whatever CLI wraps this core, which is out of scope
//! here).

use std::time::Duration;

use crate::name::Name;

#[derive(Clone, Debug)]
pub struct FullSyncConfig {
    pub sync_prefix: Name,
    pub user_prefix: Name,
    pub expected_entries: usize,
    pub sync_interest_lifetime: Duration,
    pub sync_reply_freshness: Duration,
}

impl FullSyncConfig {
    pub fn new(sync_prefix: Name, user_prefix: Name) -> Self {
        Self {
            sync_prefix,
            user_prefix,
            expected_entries: 80,
            sync_interest_lifetime: Duration::from_secs(1),
            sync_reply_freshness: Duration::from_millis(1600),
        }
    }
}

#[derive(Clone, Debug)]
pub struct PartialSyncProducerConfig {
    pub sync_prefix: Name,
    pub user_prefix: Name,
    pub expected_entries: usize,
    pub hello_reply_freshness: Duration,
    pub sync_reply_freshness: Duration,
    pub bloom_salt_seed: u64,
}

impl PartialSyncProducerConfig {
    pub fn new(sync_prefix: Name, user_prefix: Name) -> Self {
        Self {
            sync_prefix,
            user_prefix,
            expected_entries: 80,
            hello_reply_freshness: Duration::from_secs(1),
            sync_reply_freshness: Duration::from_millis(1600),
            bloom_salt_seed: 0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct PartialSyncConsumerConfig {
    pub sync_prefix: Name,
    pub projected_count: u64,
    pub false_positive_rate: f64,
    pub bloom_salt_seed: u64,
    pub hello_sync_lifetime: Duration,
}

impl PartialSyncConsumerConfig {
    pub fn new(sync_prefix: Name, projected_count: u64, false_positive_rate: f64) -> Self {
        Self {
            sync_prefix,
            projected_count,
            false_positive_rate,
            bloom_salt_seed: 0,
            hello_sync_lifetime: Duration::from_secs(4),
        }
    }

    /// The sentinel configuration subscribing to every prefix a producer announces.
    pub fn subscribe_all(sync_prefix: Name) -> Self {
        Self::new(sync_prefix, 1, 0.001)
    }
}

/// Jitter window applied to full-sync resends: `lifetime/2 ± jitter`.
pub const FULL_SYNC_RESEND_JITTER: Duration = Duration::from_millis(200);

/// Jitter window applied to partial-sync consumer reschedules: uniform [100, 500]ms.
pub const PARTIAL_CONSUMER_JITTER_MIN: Duration = Duration::from_millis(100);
pub const PARTIAL_CONSUMER_JITTER_MAX: Duration = Duration::from_millis(500);

/// Bounded retry count and inter-nack delay for the consumer's `fetch` helper.
pub const FETCH_MAX_RETRIES: u32 = 3;
pub const FETCH_NACK_DELAY: Duration = Duration::from_millis(50);
