//! # Flowstats Distribution
//!
//! Low-contention recording of streaming measurements for percentile
//! reporting.
//!
//! A [`Distribution`] is the write path of a metrics instrument: any number
//! of threads call `record(value)` at high frequency while one reporter
//! periodically calls `flush()` to take the window's samples as a single,
//! compactly encoded, mergeable sketch.
//!
//! ## Features
//!
//! - **Striped writes**: samples land in one of several independently
//!   locked sketches, picked at random
//! - **Self-scaling**: contention doubles the stripe count, up to the number
//!   of hardware threads
//! - **Exact windows**: every completed `record` lands in exactly one flush
//! - **Pluggable sketch**: any [`Sketch`](traits::Sketch) over `f64`; the
//!   default is a t-digest with compression 100
//!
//! ## Quick Start
//!
//! ```rust
//! use flowstats_distribution::prelude::*;
//!
//! let latencies = Distribution::new();
//! for ms in [12.0, 15.0, 11.0, 250.0] {
//!     latencies.record(ms);
//! }
//! assert_eq!(latencies.count(), 4);
//!
//! let bytes = latencies.flush().unwrap();
//! let digest = TDigest::from_bytes(&bytes).unwrap();
//! assert_eq!(digest.count(), 4);
//! assert_eq!(digest.max(), Some(250.0));
//! ```
//!
//! ## Feature Flags
//!
//! - `std` (default): Standard library support
//! - `quantiles` (default): t-digest
//! - `distribution` (default): the striped [`Distribution`]; needs `std`
//! - `serde`: Enable serialization of sketches
//! - `full`: Everything above
//!
//! ## Logging
//!
//! Stripe growth is reported at `debug` and flushes at `trace` through
//! [`tracing`](https://docs.rs/tracing). The crate never installs a
//! subscriber.

#![cfg_attr(not(feature = "std"), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(not(feature = "std"))]
extern crate alloc;

// Core traits always available
pub mod traits;

#[cfg(feature = "quantiles")]
mod math;

#[cfg(feature = "quantiles")]
#[cfg_attr(docsrs, doc(cfg(feature = "quantiles")))]
pub mod quantiles;

#[cfg(feature = "distribution")]
#[cfg_attr(docsrs, doc(cfg(feature = "distribution")))]
pub mod concurrent;

pub mod prelude {
    pub use crate::traits::*;

    #[cfg(feature = "quantiles")]
    pub use crate::quantiles::TDigest;

    #[cfg(feature = "distribution")]
    pub use crate::concurrent::Distribution;
}

#[cfg(feature = "quantiles")]
pub use quantiles::TDigest;

#[cfg(feature = "distribution")]
pub use concurrent::{Distribution, StripeSet};
