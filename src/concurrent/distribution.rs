//! The striped distribution recorder

use super::stripes::StripeSet;
use super::{available_parallelism, stripe_cap, COMPRESSION_DEFAULT_LEVEL, INITIAL_STRIPES, SPIN_LIMIT};
use crate::quantiles::TDigest;
use crate::traits::{EncodableSketch, MergeError, Sketch};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, trace};

thread_local! {
    static STRIPE_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_entropy());
}

#[inline]
fn random_index() -> usize {
    STRIPE_RNG.with(|rng| rng.borrow_mut().gen())
}

/// Outcome of one attempt to record into a given stripe set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Recorded,
    /// The chosen stripe was locked by someone else
    Contended,
    /// The chosen stripe belongs to a set that has been flushed
    Retired,
}

/// Thread-safe accumulator of `f64` samples for quantile reporting.
///
/// Many threads call [`record`](Self::record); one reporter periodically
/// calls [`flush`](Self::flush) to take everything recorded since the last
/// flush as one encoded sketch.
///
/// Writes go to a randomly chosen stripe of the live [`StripeSet`] with a
/// non-blocking lock. A failed attempt counts as contention and may double
/// the stripe count, never past the largest power of two not above
/// [`max_stripes`](Self::max_stripes).
///
/// The administrative lock serializes growth against flush. It also owns the
/// empty template every fresh stripe is cloned from.
pub struct Distribution<S = TDigest> {
    live: ArcSwap<StripeSet<S>>,
    admin: Mutex<S>,
    max_stripes: usize,
}

impl Distribution<TDigest> {
    /// A t-digest backed distribution with compression
    /// [`COMPRESSION_DEFAULT_LEVEL`], growing up to the machine's hardware
    /// threads.
    pub fn new() -> Self {
        Self::with_compression(COMPRESSION_DEFAULT_LEVEL)
    }

    /// A t-digest backed distribution with the given compression.
    ///
    /// # Panics
    ///
    /// Panics if `compression` is not finite and positive.
    pub fn with_compression(compression: f64) -> Self {
        Self::with_sketch(TDigest::new(compression), available_parallelism())
    }
}

impl Default for Distribution<TDigest> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Distribution<S>
where
    S: Sketch<Item = f64>,
{
    /// A distribution over any mergeable sketch. Every stripe starts as a
    /// clone of `template`; `max_stripes` is rounded down to a power of two.
    ///
    /// # Panics
    ///
    /// Panics if `template` already holds samples.
    pub fn with_sketch(template: S, max_stripes: usize) -> Self {
        assert!(template.is_empty(), "template sketch must be empty");

        Self {
            live: ArcSwap::from_pointee(StripeSet::new(INITIAL_STRIPES, &template)),
            admin: Mutex::new(template),
            max_stripes: stripe_cap(max_stripes),
        }
    }

    /// Record one sample. Never fails; retries until the sample has landed
    /// in a live stripe. Grows the stripe set at most once per call.
    pub fn record(&self, value: f64) {
        let mut failures = 0;
        let mut grew = false;
        loop {
            let current = self.live.load();
            let blocking = failures >= SPIN_LIMIT;
            match Self::attempt(&current, value, blocking) {
                Attempt::Recorded => return,
                Attempt::Contended => {
                    failures += 1;
                    if !grew {
                        grew = self.contended(&current);
                    }
                }
                Attempt::Retired => {
                    trace!("stripe retired by flush, retrying on live set");
                }
            }
        }
    }

    fn attempt(current: &StripeSet<S>, value: f64, blocking: bool) -> Attempt {
        let stripe = current.stripe(current.index(random_index()));
        let mut slot = if blocking {
            stripe.lock()
        } else {
            match stripe.try_lock() {
                Some(slot) => slot,
                None => return Attempt::Contended,
            }
        };

        match slot.as_mut() {
            Some(sketch) => {
                sketch.update(&value);
                Attempt::Recorded
            }
            None => Attempt::Retired,
        }
    }

    /// Called with the set whose stripe could not be locked. Doubles it if
    /// there is room, nobody else holds the administrative lock, and it is
    /// still the live set. Returns whether it grew.
    fn contended(&self, current: &StripeSet<S>) -> bool {
        if current.len() >= self.max_stripes {
            return false;
        }
        let Some(template) = self.admin.try_lock() else {
            return false;
        };
        if !std::ptr::eq(&**self.live.load(), current) {
            return false;
        }

        let grown = StripeSet::grown_from(current, current.len() << 1, &*template);
        debug!(from = current.len(), to = grown.len(), "growing distribution stripes");
        self.live.store(Arc::new(grown));
        true
    }

    /// Best-effort number of samples recorded since the last flush.
    ///
    /// Locks each stripe of the live set in turn; writes racing with the
    /// call may or may not be included.
    pub fn count(&self) -> u64 {
        self.live.load().count()
    }

    /// Detach everything recorded so far and return it as one merged sketch.
    ///
    /// The live set is replaced by an empty one of the same size under the
    /// administrative lock; the detached set is merged after the lock is
    /// released.
    ///
    /// # Errors
    ///
    /// Returns [`MergeError`] only if the sketch refuses to merge clones of
    /// its own template.
    pub fn flush_sketch(&self) -> Result<S, MergeError> {
        let (prev, into) = {
            let template = self.admin.lock();
            let size = self.live.load().len();
            let prev = self.live.swap(Arc::new(StripeSet::new(size, &*template)));
            (prev, S::clone(&template))
        };

        let merged = prev.drain(into)?;
        trace!(stripes = prev.len(), count = merged.count(), "flushed distribution");
        Ok(merged)
    }

    /// Merge the live stripes without resetting them.
    ///
    /// Meant for inspection and tests; reporters should use
    /// [`flush`](Self::flush).
    pub fn snapshot(&self) -> Result<S, MergeError> {
        let into = S::clone(&self.admin.lock());
        self.live.load().merged(into)
    }

    /// Current number of stripes in the live set
    pub fn stripes(&self) -> usize {
        self.live.load().len()
    }

    /// Upper bound on [`stripes`](Self::stripes)
    pub fn max_stripes(&self) -> usize {
        self.max_stripes
    }
}

impl<S> Distribution<S>
where
    S: EncodableSketch<Item = f64>,
{
    /// Detach everything recorded so far and return it in the sketch's
    /// compact encoding. The distribution starts over empty.
    ///
    /// Every `record` that completed before the call is included; every
    /// `record` that starts after it returns lands in the next flush.
    pub fn flush(&self) -> Result<Vec<u8>, MergeError> {
        Ok(self.flush_sketch()?.to_bytes())
    }
}

impl<S> core::fmt::Debug for Distribution<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Distribution")
            .field("stripes", &self.live.load().len())
            .field("max_stripes", &self.max_stripes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::QuantileSketch;

    fn decode(bytes: &[u8]) -> TDigest {
        TDigest::from_bytes(bytes).unwrap()
    }

    /// Grow as if a writer had just failed to lock a stripe of the live set.
    fn force_contention<S: Sketch<Item = f64>>(distribution: &Distribution<S>) {
        let current = distribution.live.load_full();
        distribution.contended(&current);
    }

    #[test]
    fn test_contended_reports_growth() {
        let distribution = Distribution::with_sketch(TDigest::default(), 2);
        let current = distribution.live.load_full();
        assert!(distribution.contended(&current));
        let current = distribution.live.load_full();
        assert!(!distribution.contended(&current), "already at the cap");
    }

    #[test]
    fn test_record_count_flush() {
        let distribution = Distribution::new();
        for value in [1.0, 2.0, 3.0] {
            distribution.record(value);
        }
        assert_eq!(distribution.count(), 3);

        let digest = decode(&distribution.flush().unwrap());
        assert_eq!(digest.count(), 3);
        assert_eq!(digest.min(), Some(1.0));
        assert_eq!(digest.max(), Some(3.0));
        assert_eq!(distribution.count(), 0);
    }

    #[test]
    fn test_empty_flush() {
        let distribution = Distribution::new();
        assert_eq!(decode(&distribution.flush().unwrap()).count(), 0);
        assert_eq!(decode(&distribution.flush().unwrap()).count(), 0);
    }

    #[test]
    fn test_flushes_do_not_overlap() {
        let distribution = Distribution::new();
        for i in 0..10 {
            distribution.record(i as f64);
        }
        let first = decode(&distribution.flush().unwrap());
        for i in 0..5 {
            distribution.record(100.0 + i as f64);
        }
        let second = decode(&distribution.flush().unwrap());

        assert_eq!(first.count(), 10);
        assert_eq!(first.max(), Some(9.0));
        assert_eq!(second.count(), 5);
        assert_eq!(second.min(), Some(100.0));
    }

    #[test]
    fn test_starts_with_one_stripe() {
        let distribution = Distribution::with_sketch(TDigest::default(), 8);
        assert_eq!(distribution.stripes(), INITIAL_STRIPES);
        assert_eq!(distribution.max_stripes(), 8);
    }

    #[test]
    fn test_max_stripes_rounds_down() {
        assert_eq!(Distribution::with_sketch(TDigest::default(), 6).max_stripes(), 4);
        assert_eq!(Distribution::with_sketch(TDigest::default(), 0).max_stripes(), 1);
        assert!(Distribution::new().max_stripes() <= available_parallelism());
    }

    #[test]
    #[should_panic(expected = "template sketch must be empty")]
    fn test_rejects_non_empty_template() {
        let mut template = TDigest::default();
        template.add(1.0);
        Distribution::with_sketch(template, 4);
    }

    #[test]
    fn test_growth_preserves_data() {
        let distribution = Distribution::with_sketch(TDigest::default(), 8);
        for i in 0..100 {
            distribution.record(i as f64);
        }

        force_contention(&distribution);
        assert_eq!(distribution.stripes(), 2);
        assert_eq!(distribution.count(), 100);

        for i in 0..50 {
            distribution.record(i as f64);
        }
        assert_eq!(distribution.count(), 150);

        force_contention(&distribution);
        force_contention(&distribution);
        assert_eq!(distribution.stripes(), 8);
        assert_eq!(distribution.count(), 150);
        assert_eq!(decode(&distribution.flush().unwrap()).count(), 150);
    }

    #[test]
    fn test_growth_is_capped() {
        let distribution = Distribution::with_sketch(TDigest::default(), 4);
        for _ in 0..10 {
            force_contention(&distribution);
        }
        assert_eq!(distribution.stripes(), 4);
    }

    #[test]
    fn test_flush_keeps_stripe_count() {
        let distribution = Distribution::with_sketch(TDigest::default(), 4);
        force_contention(&distribution);
        distribution.record(1.0);
        distribution.flush().unwrap();
        assert_eq!(distribution.stripes(), 2);
    }

    #[test]
    fn test_stale_contention_does_not_grow() {
        let distribution = Distribution::with_sketch(TDigest::default(), 8);
        let stale = distribution.live.load_full();
        force_contention(&distribution);
        assert_eq!(distribution.stripes(), 2);

        assert!(!distribution.contended(&stale));
        assert_eq!(distribution.stripes(), 2);
    }

    #[test]
    fn test_contention_skips_growth_while_admin_held() {
        let distribution = Distribution::with_sketch(TDigest::default(), 8);
        let _admin = distribution.admin.lock();
        let current = distribution.live.load_full();
        assert!(!distribution.contended(&current));
        assert_eq!(distribution.stripes(), 1);
    }

    #[test]
    fn test_attempt_on_locked_stripe_is_contended() {
        let set = StripeSet::new(1, &TDigest::default());
        let _held = set.stripe(0).lock();
        assert_eq!(
            Distribution::<TDigest>::attempt(&set, 1.0, false),
            Attempt::Contended
        );
    }

    #[test]
    fn test_record_blocks_after_spin_limit() {
        let distribution = Distribution::with_sketch(TDigest::default(), 1);
        let set = distribution.live.load_full();
        let held = set.stripe(0).lock();

        std::thread::scope(|s| {
            let writer = s.spawn(|| distribution.record(1.0));

            std::thread::sleep(std::time::Duration::from_millis(200));
            assert!(!writer.is_finished(), "record returned while its stripe was held");
            assert_eq!(distribution.stripes(), 1);

            drop(held);
            writer.join().unwrap();
        });

        assert_eq!(distribution.count(), 1);
    }

    #[test]
    fn test_writer_on_flushed_set_retries() {
        let distribution = Distribution::new();
        distribution.record(1.0);
        let detached = distribution.live.load_full();

        assert_eq!(decode(&distribution.flush().unwrap()).count(), 1);
        assert_eq!(
            Distribution::<TDigest>::attempt(&detached, 2.0, false),
            Attempt::Retired
        );

        distribution.record(2.0);
        assert_eq!(decode(&distribution.flush().unwrap()).count(), 1);
    }

    #[test]
    fn test_snapshot_does_not_reset() {
        let distribution = Distribution::new();
        for i in 1..=100 {
            distribution.record(i as f64);
        }
        let snapshot = distribution.snapshot().unwrap();
        assert_eq!(snapshot.count(), 100);
        let median = snapshot.median().unwrap();
        assert!(median > 40.0 && median < 60.0, "median={}", median);
        assert_eq!(distribution.count(), 100);
    }

    #[test]
    fn test_flush_sketch() {
        let distribution = Distribution::with_compression(200.0);
        for i in 0..1000 {
            distribution.record(i as f64);
        }
        let digest = distribution.flush_sketch().unwrap();
        assert_eq!(digest.count(), 1000);
        assert_eq!(digest.compression(), 200.0);
        assert_eq!(distribution.count(), 0);
    }

    #[test]
    fn test_nan_is_dropped_by_sketch() {
        let distribution = Distribution::new();
        distribution.record(f64::NAN);
        distribution.record(1.0);
        assert_eq!(distribution.count(), 1);
    }

    #[test]
    fn test_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Distribution>();
    }
}
