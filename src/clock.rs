//! Time sources for the polling core.
//!
//! Every timing decision (token refill, hourly windows, scheduler due times, match timers)
//! reads from a [`Clock`] so tests can run hours of virtual time in milliseconds.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::{sync::watch, time::Instant};

/// Injectable source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    /// Monotonic instant used for pacing, scheduling and rate windows.
    fn now(&self) -> Instant;
    /// Wall-clock UTC time used for timestamps exposed to clients.
    fn wall(&self) -> OffsetDateTime;
    /// Suspend the caller for `duration`.
    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Shared handle to the process clock.
pub type SharedClock = Arc<dyn Clock>;

/// Real clock backed by Tokio's timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Wrap the system clock in a [`SharedClock`].
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn wall(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Virtual clock: time only moves through [`ManualClock::advance`] or [`Clock::sleep`].
///
/// Sleeping advances the clock by the requested duration and returns after a single
/// scheduler yield, so a worker loop driven by this clock simulates time as fast as it runs.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    wall_origin: OffsetDateTime,
    elapsed_nanos: AtomicU64,
}

impl ManualClock {
    /// Start a virtual clock at the current real instant.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            wall_origin: OffsetDateTime::now_utc(),
            elapsed_nanos: AtomicU64::new(0),
        })
    }

    /// Move virtual time forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.elapsed_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Total virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn wall(&self) -> OffsetDateTime {
        self.wall_origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> BoxFuture<'static, ()> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

/// Format a wall-clock timestamp as ISO-8601 / RFC 3339.
pub fn iso_timestamp(time: OffsetDateTime) -> String {
    time.format(&Rfc3339)
        .unwrap_or_else(|_| "invalid-timestamp".into())
}

/// Cooperative stop signal checked by long-running workers at every loop top and sleep.
#[derive(Debug, Clone)]
pub struct StopSignal {
    receiver: watch::Receiver<bool>,
}

impl StopSignal {
    /// Create a signal pair; sending `true` (or dropping the sender) stops the receiver side.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, receiver) = watch::channel(false);
        (tx, Self { receiver })
    }

    /// Whether a stop was requested or the controlling handle is gone.
    pub fn is_stopped(&self) -> bool {
        *self.receiver.borrow() || self.receiver.has_changed().is_err()
    }

    /// Sleep on `clock` for `duration`, waking early on stop.
    ///
    /// Returns `false` when the sleep was interrupted by a stop request.
    pub async fn sleep(&mut self, clock: &dyn Clock, duration: Duration) -> bool {
        if self.is_stopped() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }
        let completed = tokio::select! {
            _ = clock.sleep(duration) => true,
            _ = self.receiver.wait_for(|stopped| *stopped) => false,
        };
        completed && !self.is_stopped()
    }
}
