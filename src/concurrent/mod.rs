//! Striped, self-scaling recording of quantile distributions
//!
//! A [`Distribution`] spreads concurrent `record` calls over a power-of-two
//! number of independently locked sketches (a [`StripeSet`]). A writer that
//! finds its stripe locked reports contention, which may double the stripe
//! count, up to the number of hardware threads. `flush` swaps in an empty set
//! and merges the detached one into a single encoded summary.
//!
//! # Example
//!
//! ```
//! use flowstats_distribution::concurrent::Distribution;
//! use flowstats_distribution::quantiles::TDigest;
//! use flowstats_distribution::traits::{EncodableSketch, Sketch};
//!
//! let distribution = Distribution::new();
//! std::thread::scope(|s| {
//!     for t in 0..4 {
//!         let distribution = &distribution;
//!         s.spawn(move || {
//!             for i in 0..1000 {
//!                 distribution.record((t * 1000 + i) as f64);
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(distribution.count(), 4000);
//! let bytes = distribution.flush().unwrap();
//! assert_eq!(TDigest::from_bytes(&bytes).unwrap().count(), 4000);
//! assert_eq!(distribution.count(), 0);
//! ```

mod distribution;
mod stripes;

pub use distribution::Distribution;
pub use stripes::StripeSet;

use std::num::NonZeroUsize;
use std::sync::OnceLock;

/// Compression of the default t-digest; keeps p99 error under ~2% on
/// long-tailed data.
pub const COMPRESSION_DEFAULT_LEVEL: f64 = 100.0;

/// Stripes in a freshly constructed distribution
pub const INITIAL_STRIPES: usize = 1;

/// Failed `try_lock` attempts in one `record` call before it falls back to
/// a blocking lock.
pub const SPIN_LIMIT: usize = 4;

/// Hardware threads available to the process, read once.
pub fn available_parallelism() -> usize {
    static NCPU: OnceLock<usize> = OnceLock::new();
    *NCPU.get_or_init(|| {
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    })
}

/// Largest power of two not above `limit` (and at least 1).
pub(crate) fn stripe_cap(limit: usize) -> usize {
    if limit <= 1 {
        return 1;
    }
    1 << (usize::BITS - 1 - limit.leading_zeros())
}
