//! Silent refresh timer
//!
//! Renewal fires `margin` before the access token's `exp`. At most one timer
//! exists at a time: arming always cancels the previous one first.
//!
//! Immediate renewals are throttled to one per [`MIN_RENEW_INTERVAL`], so an
//! identity service issuing tokens shorter-lived than the margin cannot drive
//! a refresh loop.

use crate::token::AccessClaims;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Minimum spacing between two renewals started without a timer
pub const MIN_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Source of wall-clock time in epoch milliseconds
pub trait Clock: Send + Sync + fmt::Debug {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    pub const fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.now_ms.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Outcome of arming the scheduler for a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// One-shot timer armed; renewal fires after `delay`
    Armed { renew_at_ms: i64, delay: Duration },
    /// `renew_at` already passed; renewal was started right away
    Immediate,
    /// Token has no decodable expiry; nothing scheduled
    Disabled,
}

struct ArmedTimer {
    id: u64,
    renew_at_ms: i64,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    margin: Duration,
    clock: Arc<dyn Clock>,
    timer: Mutex<Option<ArmedTimer>>,
    next_id: AtomicU64,
    last_immediate_ms: AtomicI64,
}

impl SchedulerInner {
    fn slot(&self) -> MutexGuard<'_, Option<ArmedTimer>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(timer) = self.slot().take() {
            timer.handle.abort();
        }
    }
}

/// Owns the single refresh timer of a session
#[derive(Clone)]
pub struct RefreshScheduler {
    inner: Arc<SchedulerInner>,
}

impl RefreshScheduler {
    pub fn new(margin: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                margin,
                clock,
                timer: Mutex::new(None),
                next_id: AtomicU64::new(1),
                last_immediate_ms: AtomicI64::new(i64::MIN),
            }),
        }
    }

    pub fn margin(&self) -> Duration {
        self.inner.margin
    }

    /// Arm renewal for `access_token`, replacing any pending timer.
    ///
    /// `on_renew` runs once: after the timer fires, or straight away when
    /// `exp - margin` is already in the past. Must be called within a tokio
    /// runtime.
    pub fn arm<F, Fut>(&self, access_token: &str, on_renew: F) -> Schedule
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Some(exp) = AccessClaims::decode(access_token)
            .ok()
            .and_then(|claims| claims.expires_at)
        else {
            self.cancel();
            debug!("Access token has no expiry, silent refresh disabled");
            return Schedule::Disabled;
        };

        let margin_ms = i64::try_from(self.inner.margin.as_millis()).unwrap_or(i64::MAX);
        let mut renew_at_ms = exp.saturating_mul(1000).saturating_sub(margin_ms);
        let now_ms = self.inner.clock.now_ms();

        let mut slot = self.inner.slot();
        if let Some(previous) = slot.take() {
            previous.handle.abort();
        }

        if renew_at_ms <= now_ms {
            let floor_ms = i64::try_from(MIN_RENEW_INTERVAL.as_millis()).unwrap_or(i64::MAX);
            let last_ms = self.inner.last_immediate_ms.load(Ordering::SeqCst);
            if now_ms.saturating_sub(last_ms) >= floor_ms {
                self.inner.last_immediate_ms.store(now_ms, Ordering::SeqCst);
                drop(slot);
                debug!(renew_at_ms, now_ms, "Token close to expiry, renewing now");
                tokio::spawn(on_renew());
                return Schedule::Immediate;
            }
            renew_at_ms = last_ms.saturating_add(floor_ms);
            warn!(
                exp,
                margin_ms, "Access token lifetime is shorter than the refresh margin, throttling"
            );
        }

        let delay = Duration::from_millis(u64::try_from(renew_at_ms - now_ms).unwrap_or(0));
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.inner);

        // The slot stays locked until the handle is stored, so a timer that
        // fires early still finds its own entry.
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if !detach(&weak, id) {
                return;
            }
            on_renew().await;
        });
        *slot = Some(ArmedTimer {
            id,
            renew_at_ms,
            handle,
        });

        debug!(renew_at_ms, delay_ms = delay.as_millis(), "Armed refresh timer");
        Schedule::Armed { renew_at_ms, delay }
    }

    /// Cancel the pending timer, if any
    pub fn cancel(&self) {
        if let Some(timer) = self.inner.slot().take() {
            timer.handle.abort();
            debug!("Cancelled refresh timer");
        }
    }

    /// Whether a timer is armed and has not fired yet
    pub fn is_armed(&self) -> bool {
        self.inner
            .slot()
            .as_ref()
            .is_some_and(|timer| !timer.handle.is_finished())
    }

    /// Scheduled renewal instant in epoch milliseconds
    pub fn renew_at(&self) -> Option<i64> {
        self.inner.slot().as_ref().map(|timer| timer.renew_at_ms)
    }
}

impl fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("margin", &self.inner.margin)
            .field("renew_at", &self.renew_at())
            .finish()
    }
}

/// Remove a fired timer from the slot so that re-arming from inside the
/// renewal does not abort the renewal itself. Returns `false` if the timer
/// was already replaced or the scheduler is gone.
fn detach(weak: &Weak<SchedulerInner>, id: u64) -> bool {
    let Some(inner) = weak.upgrade() else {
        return false;
    };
    let mut slot = inner.slot();
    if slot.as_ref().is_some_and(|timer| timer.id == id) {
        *slot = None;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{NOW_MS, fixed_clock, mint_token, mint_token_with};
    use std::sync::atomic::AtomicUsize;

    fn counting_callback(
        counter: &Arc<AtomicUsize>,
    ) -> impl FnOnce() -> std::future::Ready<()> + Send + use<> {
        let counter = Arc::clone(counter);
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_margin_before_expiry() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(30), fixed_clock());
        let fired = Arc::new(AtomicUsize::new(0));

        let token = mint_token(NOW_MS / 1000 + 40, &[]);
        let schedule = scheduler.arm(&token, counting_callback(&fired));

        assert_eq!(
            schedule,
            Schedule::Armed {
                renew_at_ms: NOW_MS + 10_000,
                delay: Duration::from_secs(10)
            }
        );
        assert!(scheduler.is_armed());

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!scheduler.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_cancels_previous_timer() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(30), fixed_clock());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler.arm(&mint_token(NOW_MS / 1000 + 40, &[]), counting_callback(&first));
        scheduler.arm(&mint_token(NOW_MS / 1000 + 90, &[]), counting_callback(&second));
        assert_eq!(scheduler.renew_at(), Some(NOW_MS + 60_000));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_renew_at_fires_immediately() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(30), fixed_clock());
        let fired = Arc::new(AtomicUsize::new(0));

        let schedule = scheduler.arm(
            &mint_token(NOW_MS / 1000 + 10, &[]),
            counting_callback(&fired),
        );
        assert_eq!(schedule, Schedule::Immediate);
        assert!(!scheduler.is_armed());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_immediate_renewal_is_throttled() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(30), fixed_clock());
        let fired = Arc::new(AtomicUsize::new(0));
        let short_lived = mint_token(NOW_MS / 1000 + 10, &[]);

        assert_eq!(
            scheduler.arm(&short_lived, counting_callback(&fired)),
            Schedule::Immediate
        );
        assert_eq!(
            scheduler.arm(&short_lived, counting_callback(&fired)),
            Schedule::Armed {
                renew_at_ms: NOW_MS + 5_000,
                delay: MIN_RENEW_INTERVAL
            }
        );

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_exp_disables_scheduling() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(30), fixed_clock());
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.arm(&mint_token(NOW_MS / 1000 + 40, &[]), counting_callback(&fired));
        let token = mint_token_with(serde_json::json!({ "sub": "u" }));
        assert_eq!(
            scheduler.arm(&token, counting_callback(&fired)),
            Schedule::Disabled
        );
        assert!(!scheduler.is_armed());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(30), fixed_clock());
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler.arm(&mint_token(NOW_MS / 1000 + 40, &[]), counting_callback(&fired));
        scheduler.cancel();
        assert!(!scheduler.is_armed());
        assert_eq!(scheduler.renew_at(), None);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_from_callback_keeps_new_timer() {
        let scheduler = RefreshScheduler::new(Duration::from_secs(30), fixed_clock());
        let fired = Arc::new(AtomicUsize::new(0));

        let rearm = scheduler.clone();
        let counter = Arc::clone(&fired);
        scheduler.arm(&mint_token(NOW_MS / 1000 + 40, &[]), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            let next = mint_token(NOW_MS / 1000 + 100, &[]);
            rearm.arm(&next, || std::future::ready(()));
        });

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(scheduler.is_armed());
        assert_eq!(scheduler.renew_at(), Some(NOW_MS + 70_000));
    }
}
