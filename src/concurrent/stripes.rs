//! Power-of-two sets of independently locked sketches

use crate::traits::{MergeError, Sketch};
use parking_lot::Mutex;
use std::sync::Arc;

/// One lockable sketch. `None` marks a stripe retired by
/// [`StripeSet::drain`]; writers that reach it must retry elsewhere.
pub(crate) type Stripe<S> = Arc<Mutex<Option<S>>>;

/// A fixed, power-of-two sized array of stripes.
///
/// Stripes are reference counted so that a grown set shares the very same
/// lock and sketch as the set it was grown from. A writer still holding a
/// stripe of the old set is therefore writing into the new one too.
pub struct StripeSet<S> {
    stripes: Box<[Stripe<S>]>,
    mask: usize,
}

impl<S> StripeSet<S> {
    /// Number of stripes
    pub fn len(&self) -> usize {
        self.stripes.len()
    }

    /// Always false; a set has at least one stripe.
    pub fn is_empty(&self) -> bool {
        self.stripes.is_empty()
    }

    /// Map any integer onto a stripe index (`random mod len`).
    #[inline]
    pub fn index(&self, random: usize) -> usize {
        random & self.mask
    }

    #[inline]
    pub(crate) fn stripe(&self, index: usize) -> &Mutex<Option<S>> {
        &self.stripes[index]
    }
}

impl<S: Sketch> StripeSet<S> {
    /// Create `size` empty stripes, each a clone of `template`.
    ///
    /// # Panics
    ///
    /// Panics if `size` is not a power of two.
    pub fn new(size: usize, template: &S) -> Self {
        assert!(
            size.is_power_of_two(),
            "stripe count must be a power of two, got {}",
            size
        );

        let stripes = (0..size).map(|_| fresh(template)).collect();
        Self {
            stripes,
            mask: size - 1,
        }
    }

    /// Double `old` by interleaving: old stripe `k` moves to index `2k` as
    /// the same shared stripe, and every odd index gets an empty one.
    ///
    /// # Panics
    ///
    /// Panics unless `size` is exactly twice `old.len()`.
    pub fn grown_from(old: &StripeSet<S>, size: usize, template: &S) -> Self {
        assert!(
            size.is_power_of_two() && size == old.len() << 1,
            "grown stripe count must double {}, got {}",
            old.len(),
            size
        );

        let stripes = old
            .stripes
            .iter()
            .flat_map(|kept| [Arc::clone(kept), fresh(template)])
            .collect();
        Self {
            stripes,
            mask: size - 1,
        }
    }

    /// Sum of the stripes' sample counts, locking one stripe at a time.
    ///
    /// Not a snapshot across stripes: concurrent writes to stripes already
    /// visited are missed.
    pub fn count(&self) -> u64 {
        self.stripes
            .iter()
            .map(|stripe| stripe.lock().as_ref().map_or(0, Sketch::count))
            .sum()
    }

    /// Merge every stripe into `into`, leaving the stripes untouched.
    pub fn merged(&self, mut into: S) -> Result<S, MergeError> {
        for stripe in self.stripes.iter() {
            if let Some(sketch) = stripe.lock().as_ref() {
                into.merge(sketch)?;
            }
        }
        Ok(into)
    }

    /// Merge every stripe into `into` and retire it.
    ///
    /// Stripes are locked in ascending index order. Once a stripe is retired
    /// no later write can land in it, so everything that did land is in the
    /// returned sketch.
    pub fn drain(&self, mut into: S) -> Result<S, MergeError> {
        for stripe in self.stripes.iter() {
            let mut slot = stripe.lock();
            if let Some(sketch) = slot.take() {
                into.merge(&sketch)?;
            }
        }
        Ok(into)
    }
}

fn fresh<S: Clone>(template: &S) -> Stripe<S> {
    Arc::new(Mutex::new(Some(template.clone())))
}

impl<S> core::fmt::Debug for StripeSet<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StripeSet")
            .field("len", &self.stripes.len())
            .finish()
    }
}
