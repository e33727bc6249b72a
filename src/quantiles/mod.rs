//! Quantile estimation sketches
//!
//! # Algorithms
//!
//! - [`TDigest`]: mergeable quantile sketch with high accuracy at extremes,
//!   and the default sketch behind [`Distribution`](crate::concurrent::Distribution)
//!
//! # Example
//!
//! ```
//! use flowstats_distribution::quantiles::TDigest;
//! use flowstats_distribution::traits::{EncodableSketch, QuantileSketch, Sketch};
//!
//! let mut digest = TDigest::new(100.0);
//! for value in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0] {
//!     digest.add(value);
//! }
//!
//! let bytes = digest.to_bytes();
//! let decoded = TDigest::from_bytes(&bytes).unwrap();
//! assert_eq!(decoded.count(), 10);
//! ```

mod tdigest;

pub use tdigest::{Centroid, TDigest};
