//! Background Expiry Sweeper
//!
//! Lazy expiry alone never reclaims a key that is set with a TTL and then
//! never read again. The sweeper is a single tokio task that periodically
//! calls [`StorageEngine::cleanup_expired`], taking the same shard locks as
//! regular reads and writes.
//!
//! The interval adapts to the observed expiry rate: it halves (down to
//! `min_interval`) while a large fraction of keys is expiring, and doubles
//! (up to `max_interval`) while nothing is.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Interval before the first sweep (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,

    /// Speed up when more than this fraction of keys expired in one sweep
    pub speedup_threshold: f64,

    /// Slow down when less than this fraction of keys expired in one sweep
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

impl ExpiryConfig {
    /// Computes the interval to wait before the next sweep.
    fn next_interval(&self, current: Duration, scanned: u64, expired: u64) -> Duration {
        if scanned == 0 {
            return (current * 2).min(self.max_interval);
        }

        let rate = expired as f64 / scanned as f64;
        if rate > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else if rate < self.slowdown_threshold {
            (current * 2).min(self.max_interval)
        } else {
            current
        }
    }
}

/// Handle to the running expiry sweeper.
///
/// The sweeper task stops when this handle is dropped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));
        info!("Background expiry sweeper started");

        Self { shutdown_tx }
    }

    /// Signals the sweeper task to stop.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            debug!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    trace!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let scanned = engine.len();
        let expired = engine.cleanup_expired();
        let next = config.next_interval(interval, scanned, expired);

        if expired > 0 {
            debug!(
                expired,
                keys_remaining = engine.len(),
                next_interval_ms = next.as_millis() as u64,
                "Expired keys cleaned up"
            );
        } else if next != interval {
            trace!(next_interval_ms = next.as_millis() as u64, "Sweeper backing off");
        }

        interval = next;
    }
}

/// Starts the expiry sweeper with the default configuration.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_next_interval_adapts() {
        let config = ExpiryConfig::default();
        let base = config.base_interval;

        // nothing stored: back off
        assert_eq!(config.next_interval(base, 0, 0), base * 2);
        // half the keys expired: speed up
        assert_eq!(config.next_interval(base, 100, 50), base / 2);
        // in between: unchanged
        assert_eq!(config.next_interval(base, 100, 10), base);
        // clamped at both ends
        assert_eq!(
            config.next_interval(config.min_interval, 10, 10),
            config.min_interval
        );
        assert_eq!(
            config.next_interval(config.max_interval, 10, 0),
            config.max_interval
        );
    }

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let engine = Arc::new(StorageEngine::new());

        for i in 0..10 {
            engine.set_with_ttl(
                Bytes::from(format!("key{}", i)),
                Bytes::from("value"),
                Duration::from_millis(50),
            );
        }
        engine.set(Bytes::from("persistent"), Bytes::from("value"));
        assert_eq!(engine.len(), 11);

        let config = ExpiryConfig {
            base_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(20),
            ..Default::default()
        };
        let _sweeper = ExpirySweeper::start(Arc::clone(&engine), config);

        tokio::time::sleep(Duration::from_millis(250)).await;

        // reclaimed without anyone reading the keys
        assert_eq!(engine.len(), 1);
        assert!(engine.exists(b"persistent"));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let engine = Arc::new(StorageEngine::new());

        let config = ExpiryConfig {
            base_interval: Duration::from_millis(10),
            ..Default::default()
        };

        {
            let _sweeper = ExpirySweeper::start(Arc::clone(&engine), config);
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        engine.set_with_ttl(
            Bytes::from("key"),
            Bytes::from("value"),
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;

        // no sweep ran, the entry is still physically there
        assert_eq!(engine.len(), 1);
        // but reads never see it
        assert!(engine.get(b"key").is_none());
        assert_eq!(engine.len(), 0);
    }
}
