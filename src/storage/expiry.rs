//! Expiry Sweeper
//!
//! Reads treat expired entries as misses but never delete them. The sweeper
//! walks the whole namespace and removes every entry whose expiry has passed,
//! together with its chunk sets.
//!
//! ## Passes
//!
//! ```text
//! LIST <prefix>/v2/
//!    │
//!    ├── <type>/<key>                  decode ── expires < now ──► delete(type, key)
//!    │
//!    └── <type>/<key>-data/<hash>/<i>  decode ── expires < now ──► DELETE fragment
//!                                      │
//!                                      └ (orphan pass, opt-in)
//!                                        owner gone / not chunked / other hash
//!                                        and older than the grace period
//!                                          ──► DELETE <type>/<key>-data/<hash>/
//! ```
//!
//! Per-item failures are logged and counted as skipped; only a failed
//! listing aborts the sweep.
//!
//! ## Scheduling
//!
//! [`ExpirySweeper::cleanup`] runs one sweep. Hosts without their own
//! scheduler can hand the sweeper to [`start_expiry_sweeper`], which runs it
//! on a background task and adapts the interval to how much each sweep
//! removes.

use crate::envelope::unix_now;
use crate::path::{split_type_key, ChunkRef, PathNamespacer};
use crate::storage::error::StoreResult;
use crate::storage::store::ChunkStore;
use crate::value::{JsonCodec, ValueCodec};
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// Options for a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOptions {
    /// Also delete chunk sets no entry references (default: off)
    pub reclaim_orphans: bool,

    /// Minimum fragment age before an unreferenced chunk set is deleted
    /// (default: 1 hour). Protects writes still in progress.
    pub orphan_grace: Duration,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            reclaim_orphans: false,
            orphan_grace: Duration::from_secs(3600),
        }
    }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Primary entries examined
    pub scanned: usize,
    /// Expired entries deleted
    pub removed: usize,
    /// Entries that could not be read or deleted
    pub skipped: usize,
    /// Expired chunk fragments deleted on their own
    pub fragments: usize,
    /// Unreferenced chunk sets deleted
    pub orphan_sets: usize,
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} items removed ({} scanned, {} skipped)",
            self.removed, self.scanned, self.skipped
        )?;
        if self.fragments > 0 {
            write!(f, ", {} expired fragments", self.fragments)?;
        }
        if self.orphan_sets > 0 {
            write!(f, ", {} orphan chunk sets reclaimed", self.orphan_sets)?;
        }
        Ok(())
    }
}

/// A chunk set seen in the listing, judged once per sweep.
struct ChunkSetCandidate {
    ty: String,
    key: String,
    hash: String,
    /// One fragment of the set, used to date it.
    sample: String,
}

/// Full-namespace expiry sweep over a [`ChunkStore`].
pub struct ExpirySweeper<C: ValueCodec = JsonCodec> {
    store: Arc<ChunkStore<C>>,
    options: SweepOptions,
}

impl<C: ValueCodec> ExpirySweeper<C> {
    /// Creates a sweeper with default options.
    pub fn new(store: Arc<ChunkStore<C>>) -> Self {
        Self::with_options(store, SweepOptions::default())
    }

    /// Creates a sweeper with explicit options.
    pub fn with_options(store: Arc<ChunkStore<C>>, options: SweepOptions) -> Self {
        Self { store, options }
    }

    /// The options in effect.
    pub fn options(&self) -> &SweepOptions {
        &self.options
    }

    /// Runs one sweep over the whole namespace.
    pub async fn cleanup(&self) -> StoreResult<SweepReport> {
        let paths = self.store.paths();
        let root = format!("{}/", paths.root());
        let physical = self.store.client().list_keys(&root).await?;

        let now = unix_now();
        let mut report = SweepReport::default();
        let mut chunk_sets: BTreeMap<String, ChunkSetCandidate> = BTreeMap::new();

        for path in &physical {
            let Some((ty, key)) =
                PathNamespacer::strip_listing_prefix(&root, path).and_then(split_type_key)
            else {
                continue;
            };

            if let Some(chunk) = ChunkRef::parse(key) {
                if self.sweep_fragment(path, now, &mut report).await {
                    continue;
                }
                if self.options.reclaim_orphans {
                    let set_dir = paths.chunk_set_dir(ty, chunk.key, chunk.hash);
                    chunk_sets.entry(set_dir).or_insert_with(|| ChunkSetCandidate {
                        ty: ty.to_string(),
                        key: chunk.key.to_string(),
                        hash: chunk.hash.to_string(),
                        sample: path.clone(),
                    });
                }
                continue;
            }

            report.scanned += 1;

            let envelope = match self.store.load_envelope(path).await {
                Ok(Some(envelope)) => envelope,
                Ok(None) => {
                    trace!(path = %path, "Entry vanished during sweep");
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Skipping unreadable entry");
                    report.skipped += 1;
                    continue;
                }
            };

            if !envelope.is_past(now) {
                continue;
            }

            match self.store.delete(ty, key).await {
                Ok(()) => {
                    debug!(path = %path, expires = envelope.meta.expires, "Removed expired entry");
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Failed to remove expired entry");
                    report.skipped += 1;
                }
            }
        }

        for (set_dir, candidate) in &chunk_sets {
            if self.reclaim_if_orphan(set_dir, candidate).await {
                report.orphan_sets += 1;
            }
        }

        info!(
            scanned = report.scanned,
            removed = report.removed,
            skipped = report.skipped,
            fragments = report.fragments,
            orphan_sets = report.orphan_sets,
            "Expiry sweep finished"
        );

        Ok(report)
    }

    /// Deletes a single fragment whose expiry has passed.
    ///
    /// Fragments carry their owner's expiry, so an expired owner takes them
    /// along first and they read as gone here. This catches the ones left
    /// behind by a dropped marker. Returns `true` when the fragment is gone.
    async fn sweep_fragment(&self, path: &str, now: u64, report: &mut SweepReport) -> bool {
        let fragment = match self.store.load_envelope(path).await {
            Ok(Some(fragment)) => fragment,
            Ok(None) => return true,
            Err(e) => {
                debug!(path = %path, error = %e, "Skipping unreadable fragment");
                return false;
            }
        };

        if !fragment.is_past(now) {
            return false;
        }

        match self.store.client().delete(path, false).await {
            Ok(()) => {
                trace!(path = %path, expires = fragment.meta.expires, "Removed expired fragment");
                report.fragments += 1;
                true
            }
            Err(e) => {
                warn!(path = %path, error = %e, "Failed to remove expired fragment");
                false
            }
        }
    }

    /// Deletes a chunk set if nothing references it and it is past the grace
    /// period. Any doubt keeps the set.
    async fn reclaim_if_orphan(&self, set_dir: &str, candidate: &ChunkSetCandidate) -> bool {
        let owner_path = self
            .store
            .paths()
            .request_path(&candidate.ty, Some(&candidate.key));

        let owner = match self.store.load_envelope(&owner_path).await {
            Ok(owner) => owner,
            Err(e) => {
                debug!(path = %owner_path, error = %e, "Cannot judge chunk set, owner unreadable");
                return false;
            }
        };

        let referenced = owner
            .as_ref()
            .and_then(|o| o.chunk_hash())
            .is_some_and(|h| h.as_str() == candidate.hash);
        if referenced {
            return false;
        }

        let stale = match self.store.load_envelope(&candidate.sample).await {
            Ok(Some(fragment)) => fragment.is_older_than(self.options.orphan_grace, Utc::now()),
            Ok(None) => false,
            Err(e) => {
                debug!(path = %candidate.sample, error = %e, "Cannot date chunk set");
                false
            }
        };
        if !stale {
            return false;
        }

        match self.store.client().delete(set_dir, true).await {
            Ok(()) => {
                info!(path = %set_dir, hash = %candidate.hash, "Reclaimed orphan chunk set");
                true
            }
            Err(e) => {
                warn!(path = %set_dir, error = %e, "Failed to reclaim orphan chunk set");
                false
            }
        }
    }

    /// Runs the sweeper on a background task. See [`start_expiry_sweeper`].
    pub fn start(self, schedule: SweepSchedule) -> SweeperHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(sweeper_loop(self, schedule, shutdown_rx));

        info!("Background expiry sweeper started");

        SweeperHandle { shutdown_tx }
    }
}

/// Interval settings for the background sweeper.
#[derive(Debug, Clone)]
pub struct SweepSchedule {
    /// Interval before the first sweep (default: 60s)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10s)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 10 minutes)
    pub max_interval: Duration,

    /// If this fraction of scanned entries was removed, speed up sweeping
    pub speedup_threshold: f64,

    /// If less than this fraction was removed, slow down sweeping
    pub slowdown_threshold: f64,
}

impl Default for SweepSchedule {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(60),
            min_interval: Duration::from_secs(10),
            max_interval: Duration::from_secs(600),
            speedup_threshold: 0.25,  // Speed up if >25% of entries expired
            slowdown_threshold: 0.01, // Slow down if <1% of entries expired
        }
    }
}

impl SweepSchedule {
    /// A fixed schedule: every sweep `interval` apart.
    pub fn fixed(interval: Duration) -> Self {
        Self {
            base_interval: interval,
            min_interval: interval,
            max_interval: interval,
            ..Self::default()
        }
    }

    /// Interval to wait after a sweep that ran at `current`.
    pub fn next_interval(&self, current: Duration, report: &SweepReport) -> Duration {
        if report.scanned == 0 {
            return (current * 2).min(self.max_interval);
        }

        let rate = report.removed as f64 / report.scanned as f64;
        if rate > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else if rate < self.slowdown_threshold && report.removed == 0 {
            (current * 2).min(self.max_interval)
        } else {
            current
        }
    }
}

/// A handle to the running background sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl SweeperHandle {
    /// Stops the sweeper.
    ///
    /// This is called automatically when the handle is dropped.
    pub fn stop(&self) {
        if !*self.shutdown_tx.borrow() {
            let _ = self.shutdown_tx.send(true);
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop<C: ValueCodec>(
    sweeper: ExpirySweeper<C>,
    schedule: SweepSchedule,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut current_interval = schedule.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(current_interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        match sweeper.cleanup().await {
            Ok(report) => {
                let next = schedule.next_interval(current_interval, &report);
                if next != current_interval {
                    debug!(
                        removed = report.removed,
                        scanned = report.scanned,
                        new_interval_ms = next.as_millis() as u64,
                        "Adjusted sweep interval"
                    );
                }
                current_interval = next;
            }
            Err(e) => {
                warn!(error = %e, "Expiry sweep failed");
            }
        }
    }
}

/// Runs `sweeper` on a background tokio task until the returned handle is
/// stopped or dropped.
///
/// Must be called from within a tokio runtime.
pub fn start_expiry_sweeper<C: ValueCodec>(
    sweeper: ExpirySweeper<C>,
    schedule: SweepSchedule,
) -> SweeperHandle {
    sweeper.start(schedule)
}
