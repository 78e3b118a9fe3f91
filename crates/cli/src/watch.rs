//! Scheduler for the periodic cache jobs
//!
//! Runs the TTL sweep and size eviction on independent intervals. Each job
//! executes on the blocking pool since both walk the filesystem.

use crate::shutdown::ShutdownCoordinator;
use folio_cache::PageCache;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

/// Cadence of the two jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Interval between TTL sweeps
    pub sweep_every: Duration,
    /// Interval between size eviction passes
    pub evict_every: Duration,
}

impl Schedule {
    /// Schedule from the cache config, with optional overrides in seconds
    #[must_use]
    pub fn from_cache(cache: &PageCache, sweep_secs: Option<u64>, evict_secs: Option<u64>) -> Self {
        let config = cache.config();
        Self {
            sweep_every: Duration::from_secs(sweep_secs.unwrap_or(config.sweep_interval_secs).max(1)),
            evict_every: Duration::from_secs(
                evict_secs.unwrap_or(config.eviction_interval_secs).max(1),
            ),
        }
    }
}

/// Totals across a watch session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct WatchSummary {
    /// TTL sweeps completed
    pub sweeps: u64,
    /// Eviction passes completed (skipped passes excluded)
    pub evictions: u64,
    /// Bytes freed by both jobs
    pub bytes_freed: u64,
}

/// Run both jobs until `shutdown` fires
///
/// The first tick of each interval fires immediately, so a fresh watch
/// brings an over-quota cache back in line right away.
pub async fn run(
    cache: Arc<PageCache>,
    schedule: Schedule,
    shutdown: ShutdownCoordinator,
) -> WatchSummary {
    let mut sweep_timer = interval(schedule.sweep_every);
    sweep_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut evict_timer = interval(schedule.evict_every);
    evict_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ttl_minutes = cache.config().ttl_minutes;
    let mut summary = WatchSummary::default();

    tracing::info!(
        root = %cache.root().display(),
        sweep_every_secs = schedule.sweep_every.as_secs(),
        evict_every_secs = schedule.evict_every.as_secs(),
        "Cache scheduler started"
    );

    loop {
        tokio::select! {
            () = shutdown.wait_for_shutdown() => break,
            _ = sweep_timer.tick() => {
                let cache = Arc::clone(&cache);
                match tokio::task::spawn_blocking(move || cache.run_ttl_sweep(ttl_minutes)).await {
                    Ok(result) => {
                        summary.sweeps += 1;
                        summary.bytes_freed += result.bytes_freed;
                    }
                    Err(e) => tracing::error!("TTL sweep task failed: {e}"),
                }
            }
            _ = evict_timer.tick() => {
                let cache = Arc::clone(&cache);
                match tokio::task::spawn_blocking(move || cache.run_size_eviction()).await {
                    Ok(result) => {
                        if !result.skipped {
                            summary.evictions += 1;
                            summary.bytes_freed += result.bytes_freed;
                        }
                    }
                    Err(e) => tracing::error!("Size eviction task failed: {e}"),
                }
            }
        }
    }

    tracing::info!(
        sweeps = summary.sweeps,
        evictions = summary.evictions,
        bytes_freed = summary.bytes_freed,
        "Cache scheduler stopped"
    );
    summary
}
