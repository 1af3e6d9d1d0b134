//! Per-channel failure penalties with linear decay.
//!
//! Every upstream failure adds to a channel's penalty; the penalty then
//! decays linearly over a recovery window and the selector subtracts
//! whatever is left from the channel's weight. Channels that keep failing
//! escalate fast, channels that stop failing drift back to full weight
//! without any explicit reset.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Penalty ledger configuration
#[derive(Debug, Clone)]
pub struct PenaltyConfig {
    /// Penalty added per failure, multiplied by the consecutive failure count
    pub base_penalty: i64,
    /// Window over which a penalty decays back to zero
    pub recovery: Duration,
    /// Records idle longer than this are dropped entirely
    pub max_record_age: Duration,
    /// How often the cleanup task scans for stale records
    pub cleanup_interval: Duration,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            base_penalty: 2,
            recovery: Duration::from_secs(600),
            max_record_age: Duration::from_secs(1800),
            cleanup_interval: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PenaltyRecord {
    penalty: i64,
    failure_count: i64,
    last_failure: Instant,
}

/// Shared ledger of per-channel penalties.
///
/// Reads are lock-light: `penalty_weight` takes the read lock and only
/// upgrades to the write lock when a record has fully recovered and can be
/// reset. The stored penalty never changes on a partial decay, so repeated
/// reads observe a monotonically non-increasing value until the next
/// failure.
pub struct PenaltyLedger {
    config: PenaltyConfig,
    records: RwLock<HashMap<i64, PenaltyRecord>>,
}

impl PenaltyLedger {
    /// Create a new ledger
    #[must_use]
    pub fn new(config: PenaltyConfig) -> Self {
        Self {
            config,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(PenaltyConfig::default())
    }

    /// Record a failed relay through a channel.
    ///
    /// Consecutive failures escalate super-linearly: the n-th failure since
    /// the last full recovery adds `base_penalty * n`.
    pub fn record_failure(&self, channel_id: i64) {
        let mut records = self.records.write();
        let record = records.entry(channel_id).or_insert(PenaltyRecord {
            penalty: 0,
            failure_count: 0,
            last_failure: Instant::now(),
        });
        record.failure_count += 1;
        record.last_failure = Instant::now();
        record.penalty += self.config.base_penalty * record.failure_count;
        debug!(
            channel_id,
            penalty = record.penalty,
            failures = record.failure_count,
            "recorded channel failure"
        );
    }

    /// Current decayed penalty for a channel, clamped to `[0, cap]`.
    ///
    /// A record older than the recovery window is reset to zero as a side
    /// effect of the read, which also restarts the escalation series.
    pub fn penalty_weight(&self, channel_id: i64, cap: i64) -> i64 {
        {
            let records = self.records.read();
            match records.get(&channel_id) {
                None => return 0,
                Some(record) => {
                    if let Some(decayed) = self.decayed(record, cap) {
                        return decayed;
                    }
                }
            }
        }

        // The record looked fully recovered under the read lock. Re-check
        // under the write lock, a failure may have landed in between.
        let mut records = self.records.write();
        if let Some(record) = records.get_mut(&channel_id) {
            if let Some(decayed) = self.decayed(record, cap) {
                return decayed;
            }
            record.penalty = 0;
            record.failure_count = 0;
            debug!(channel_id, "channel penalty fully recovered");
        }
        0
    }

    /// Drop records whose last failure is older than `max_record_age`.
    ///
    /// Returns the number of records removed.
    pub fn cleanup_old_records(&self) -> usize {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|_, record| record.last_failure.elapsed() < self.config.max_record_age);
        before - records.len()
    }

    /// Number of channels currently carrying a record.
    #[must_use]
    pub fn tracked_channels(&self) -> usize {
        self.records.read().len()
    }

    /// Spawn the periodic cleanup task.
    ///
    /// The caller owns the handle and aborts it on shutdown.
    pub fn spawn_cleanup(self: &Arc<Self>) -> JoinHandle<()> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ledger.config.cleanup_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let dropped = ledger.cleanup_old_records();
                if dropped > 0 {
                    debug!(dropped, "dropped stale penalty records");
                }
            }
        })
    }

    /// Decayed value, or `None` when the record has fully recovered.
    fn decayed(&self, record: &PenaltyRecord, cap: i64) -> Option<i64> {
        let recovery = self.config.recovery.as_secs_f64();
        if recovery <= 0.0 {
            return None;
        }
        let factor = record.last_failure.elapsed().as_secs_f64() / recovery;
        if factor >= 1.0 {
            return None;
        }
        #[allow(clippy::cast_possible_truncation)]
        let value = (record.penalty as f64 * (1.0 - factor)).round() as i64;
        Some(value.clamp(0, cap))
    }
}
