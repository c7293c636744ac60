//! Background retention
//!
//! One purger thread per changelog. Each cycle:
//!
//! 1. `floor = now - purge_delay`
//! 2. with change numbers enabled, purge the index first; the CSN of the
//!    oldest record it still holds caps the replica log purge. An empty or
//!    closed index skips step 3 for this cycle.
//! 3. purge every replica log before the bound
//! 4. sleep until the oldest remaining record becomes eligible, at most
//!    `max_purge_sleep`
//!
//! A purge delay of zero parks the thread until the delay is set again.
//! Shutdown interrupts the sleep; a cycle in progress always completes.
//!
//! Transient `StoreUnavailable` errors skip the affected store. Any other
//! error stops the thread and is handed to the fatal handler.

use crate::clock::Clock;
use crate::config::{validate_purge_delay, ChangelogConfig};
use crate::registry::ReplicaRegistry;
use changelog_core::{Csn, Error, Result};
use changelog_storage::ChangeNumberIndex;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Callback invoked once when the purger hits a fatal error
pub type FatalHandler = Arc<dyn Fn(&Error) + Send + Sync>;

const THREAD_NAME: &str = "changelog-purger";

/// Result of one purge cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Replica logs were purged before this CSN; `None` if they were left
    /// untouched this cycle
    pub bound: Option<Csn>,
    /// Records removed from replica logs
    pub purged_records: usize,
    /// When the oldest remaining replica log record becomes eligible
    pub next_eligible_ms: Option<u64>,
}

impl PurgeOutcome {
    fn skipped() -> Self {
        Self {
            bound: None,
            purged_records: 0,
            next_eligible_ms: None,
        }
    }
}

struct PurgeSettings {
    purge_delay_ms: u64,
    compute_change_number: bool,
    shutdown: bool,
    /// Set by `wake()`; cleared when a cycle starts
    wake: bool,
}

struct Control {
    settings: Mutex<PurgeSettings>,
    signal: Condvar,
    cycles: AtomicU64,
}

impl Control {
    fn notify(&self, update: impl FnOnce(&mut PurgeSettings)) {
        let mut settings = self.settings.lock();
        update(&mut settings);
        settings.wake = true;
        self.signal.notify_all();
    }
}

struct PurgeContext {
    registry: Arc<ReplicaRegistry>,
    index: Arc<ChangeNumberIndex>,
    clock: Arc<dyn Clock>,
    on_fatal: FatalHandler,
    max_sleep: Duration,
}

impl PurgeContext {
    fn purge_once(&self, purge_delay_ms: u64, compute_change_number: bool) -> Result<PurgeOutcome> {
        let now = self.clock.now_ms();
        let floor = Csn::floor_at(now.saturating_sub(purge_delay_ms));

        let bound = if compute_change_number {
            match self.index.purge_up_to(&floor)? {
                Some(oldest_indexed) => oldest_indexed.min(floor),
                None => {
                    debug!(floor = %floor, "Change number index empty, skipping replica log purge");
                    return Ok(PurgeOutcome::skipped());
                }
            }
        } else {
            floor
        };

        let mut purged_records = 0;
        let mut oldest_remaining: Option<Csn> = None;
        for entry in self.registry.all_replicas() {
            let log = entry.log();
            match log.purge_before(&bound) {
                Ok(purged) => purged_records += purged,
                Err(e) if e.is_retryable() => {
                    debug!(domain = %entry.domain(), replica_id = %entry.replica_id(), "Replica log closed during purge");
                    continue;
                }
                Err(e) => return Err(e),
            }
            if let Ok(Some(oldest)) = log.oldest_csn() {
                oldest_remaining = Some(oldest_remaining.map_or(oldest, |o| o.min(oldest)));
            }
        }

        if purged_records > 0 {
            debug!(bound = %bound, purged_records, "Purged replica logs");
        }
        Ok(PurgeOutcome {
            bound: Some(bound),
            purged_records,
            next_eligible_ms: oldest_remaining
                .map(|csn| csn.time_ms().saturating_add(purge_delay_ms)),
        })
    }

    fn sleep_after(&self, outcome: &PurgeOutcome) -> Duration {
        let Some(eligible) = outcome.next_eligible_ms else {
            return self.max_sleep;
        };
        let wait = Duration::from_millis(eligible.saturating_sub(self.clock.now_ms()));
        wait.clamp(Duration::from_millis(1), self.max_sleep)
    }
}

fn run(control: Arc<Control>, context: Arc<PurgeContext>) {
    info!("Retention purger started");
    loop {
        let (purge_delay_ms, compute_change_number) = {
            let mut settings = control.settings.lock();
            loop {
                if settings.shutdown {
                    info!("Retention purger stopped");
                    return;
                }
                if settings.purge_delay_ms > 0 {
                    break;
                }
                control.signal.wait(&mut settings);
            }
            settings.wake = false;
            (settings.purge_delay_ms, settings.compute_change_number)
        };

        let sleep = match context.purge_once(purge_delay_ms, compute_change_number) {
            Ok(outcome) => {
                control.cycles.fetch_add(1, Ordering::AcqRel);
                context.sleep_after(&outcome)
            }
            Err(e) if e.is_retryable() => {
                debug!(error = %e, "Purge cycle interrupted");
                context.max_sleep
            }
            Err(e) => {
                error!(error = %e, "Retention purge failed, stopping purger");
                (context.on_fatal)(&e);
                return;
            }
        };

        let mut settings = control.settings.lock();
        if !settings.shutdown && !settings.wake {
            control.signal.wait_for(&mut settings, sleep);
        }
    }
}

/// Background retention of the change-number index and replica logs
pub struct RetentionPurger {
    control: Arc<Control>,
    context: Arc<PurgeContext>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RetentionPurger {
    /// Start the purger thread
    ///
    /// # Errors
    ///
    /// `ConfigurationRejected` for an out-of-range purge delay, `Io` if the
    /// thread cannot be spawned.
    pub fn start(
        registry: Arc<ReplicaRegistry>,
        index: Arc<ChangeNumberIndex>,
        clock: Arc<dyn Clock>,
        config: &ChangelogConfig,
        on_fatal: FatalHandler,
    ) -> Result<Self> {
        config.validate()?;
        let control = Arc::new(Control {
            settings: Mutex::new(PurgeSettings {
                purge_delay_ms: config.purge_delay_ms,
                compute_change_number: config.compute_change_number,
                shutdown: false,
                wake: false,
            }),
            signal: Condvar::new(),
            cycles: AtomicU64::new(0),
        });
        let context = Arc::new(PurgeContext {
            registry,
            index,
            clock,
            on_fatal,
            max_sleep: config.max_purge_sleep(),
        });

        let handle = {
            let control = Arc::clone(&control);
            let context = Arc::clone(&context);
            thread::Builder::new()
                .name(THREAD_NAME.to_string())
                .spawn(move || run(control, context))?
        };

        Ok(Self {
            control,
            context,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Current purge delay in milliseconds; 0 means purging is disabled
    pub fn purge_delay_ms(&self) -> u64 {
        self.control.settings.lock().purge_delay_ms
    }

    /// Change the purge delay and wake the thread
    ///
    /// Zero parks the thread; a positive delay resumes it.
    pub fn set_purge_delay_ms(&self, purge_delay_ms: u64) -> Result<()> {
        validate_purge_delay(purge_delay_ms)?;
        let previous = self.purge_delay_ms();
        self.control
            .notify(|settings| settings.purge_delay_ms = purge_delay_ms);
        match (previous, purge_delay_ms) {
            (p, 0) if p > 0 => info!("Purging disabled"),
            (0, d) if d > 0 => info!(purge_delay_ms = d, "Purging enabled"),
            _ => debug!(purge_delay_ms, "Purge delay changed"),
        }
        Ok(())
    }

    /// Whether the change-number index takes part in retention
    pub fn set_compute_change_number(&self, enabled: bool) {
        self.control
            .notify(|settings| settings.compute_change_number = enabled);
    }

    /// Run a cycle now instead of waiting for the sleep to elapse
    pub fn wake(&self) {
        self.control.notify(|_| {});
    }

    /// Run one cycle on the calling thread with the current settings
    ///
    /// Does nothing while purging is disabled.
    pub fn purge_now(&self) -> Result<PurgeOutcome> {
        let (purge_delay_ms, compute_change_number) = {
            let settings = self.control.settings.lock();
            (settings.purge_delay_ms, settings.compute_change_number)
        };
        if purge_delay_ms == 0 {
            return Ok(PurgeOutcome::skipped());
        }
        self.context.purge_once(purge_delay_ms, compute_change_number)
    }

    /// Number of cycles completed by the background thread
    pub fn cycles(&self) -> u64 {
        self.control.cycles.load(Ordering::Acquire)
    }

    /// Whether the background thread is still running
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Stop the thread and wait for it to exit
    ///
    /// Idempotent.
    pub fn shutdown(&self) {
        self.control.notify(|settings| settings.shutdown = true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Retention purger thread panicked");
            }
        }
    }
}

impl Drop for RetentionPurger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RetentionPurger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionPurger")
            .field("purge_delay_ms", &self.purge_delay_ms())
            .field("cycles", &self.cycles())
            .field("running", &self.is_running())
            .finish()
    }
}
