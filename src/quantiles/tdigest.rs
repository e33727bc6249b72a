//! t-digest quantile estimator
//!
//! Streaming quantile estimation by clustering samples into weighted
//! centroids. Accurate at the tails (p99 and beyond) and fully mergeable,
//! which is what lets a striped recorder fold many per-stripe digests into
//! one summary at flush time.
//!
//! # Thread Safety
//!
//! `TDigest` is `Send` but **not `Sync`** due to the internal `RefCell`
//! used for lazy buffer compression. Share it behind a mutex, as
//! [`Distribution`](crate::concurrent::Distribution) does per stripe.

use crate::math;
use crate::traits::{DecodeError, EncodableSketch, MergeError, QuantileSketch, Sketch};
use core::cell::RefCell;

#[cfg(feature = "std")]
use std::vec::Vec;

#[cfg(not(feature = "std"))]
extern crate alloc;
#[cfg(not(feature = "std"))]
use alloc::vec::Vec;

// Helper macro for format! in both std and no_std
macro_rules! fmt {
    ($($arg:tt)*) => {{
        #[cfg(feature = "std")]
        { format!($($arg)*) }
        #[cfg(not(feature = "std"))]
        { alloc::format!($($arg)*) }
    }};
}

/// Version tag of the full-precision encoding: absolute f64 means
const VERBOSE_ENCODING: u8 = 1;

/// Version tag of the compact ("small") encoding: f32 mean deltas
const SMALL_ENCODING: u8 = 2;

/// version + compression + min + max + centroid count, shared by both encodings
const SMALL_HEADER_LEN: usize = 1 + 4 + 8 + 8 + 4;

/// A centroid in the t-digest
///
/// Centroids represent clusters of values with a mean and count.
#[derive(Clone, Debug, PartialEq)]
pub struct Centroid {
    /// Mean value of the centroid
    pub mean: f64,
    /// Number of values in the centroid
    pub weight: u64,
}

impl Centroid {
    /// Create a new centroid
    pub fn new(mean: f64, weight: u64) -> Self {
        Self { mean, weight }
    }

    /// Fold `count` copies of `value` into the centroid's weighted mean
    pub fn add(&mut self, value: f64, count: u64) {
        let new_weight = self.weight + count;
        self.mean = (self.mean * self.weight as f64 + value * count as f64) / new_weight as f64;
        self.weight = new_weight;
    }
}

/// Centroids plus the not-yet-clustered samples.
///
/// Kept apart from the outer struct so queries on `&self` can compress
/// through the `RefCell`.
#[derive(Clone, Debug, Default)]
struct Clusters {
    centroids: Vec<Centroid>,
    buffer: Vec<f64>,
}

impl Clusters {
    fn with_capacity(centroids: usize, buffer: usize) -> Self {
        Self {
            centroids: Vec::with_capacity(centroids),
            buffer: Vec::with_capacity(buffer),
        }
    }

    /// Sort the buffered samples into the centroid list and recluster.
    fn compress(&mut self, compression: f64) {
        if self.buffer.is_empty() {
            return;
        }

        let mut sorted: Vec<Centroid> = self
            .buffer
            .drain(..)
            .map(|v| Centroid::new(v, 1))
            .collect();
        sorted.append(&mut self.centroids);
        sorted.sort_by(|a, b| a.mean.total_cmp(&b.mean));

        self.centroids = cluster(sorted, compression);
    }
}

/// Greedily fold adjacent centroids while they fit inside one unit of the
/// scale function.
fn cluster(sorted: Vec<Centroid>, compression: f64) -> Vec<Centroid> {
    let mut iter = sorted.into_iter();
    let Some(mut current) = iter.next() else {
        return Vec::new();
    };

    let rest: Vec<Centroid> = iter.collect();
    let total_weight = current.weight + rest.iter().map(|c| c.weight).sum::<u64>();
    let mut result = Vec::with_capacity((compression * 2.0) as usize);
    let mut weight_so_far = 0u64;

    for centroid in rest {
        let proposed = current.weight + centroid.weight;
        let q0 = weight_so_far as f64 / total_weight as f64;
        let q1 = (weight_so_far + proposed) as f64 / total_weight as f64;

        if scale(q1, compression) - scale(q0, compression) <= 1.0 {
            current.add(centroid.mean, centroid.weight);
        } else {
            weight_so_far += current.weight;
            result.push(current);
            current = centroid;
        }
    }

    result.push(current);
    result
}

/// Arcsin scale function; the argument is clamped so float drift never
/// produces NaN.
#[inline]
fn scale(q: f64, compression: f64) -> f64 {
    let x = (2.0 * q - 1.0).clamp(-1.0, 1.0);
    compression * (math::asin(x) / core::f64::consts::PI + 0.5)
}

/// t-digest quantile sketch
///
/// - O(1) amortized insertion
/// - accurate tails
/// - mergeable
/// - memory bounded by the compression parameter
///
/// # Compression Parameter
///
/// Higher compression keeps more centroids: better accuracy, more memory.
/// The default of 100 keeps p99 error under about 2% for long-tailed
/// (Pareto-like) data.
///
/// # Example
///
/// ```
/// use flowstats_distribution::quantiles::TDigest;
/// use flowstats_distribution::traits::QuantileSketch;
///
/// let mut digest = TDigest::new(100.0);
/// for i in 1..=1000 {
///     digest.add(i as f64);
/// }
///
/// let p99 = digest.quantile(0.99).unwrap();
/// assert!(p99 > 950.0);
/// ```
#[derive(Debug)]
pub struct TDigest {
    compression: f64,
    clusters: RefCell<Clusters>,
    /// Buffered samples before a forced compression
    buffer_capacity: usize,
    count: u64,
    min: f64,
    max: f64,
}

impl Clone for TDigest {
    fn clone(&self) -> Self {
        Self {
            compression: self.compression,
            clusters: RefCell::new(self.clusters.borrow().clone()),
            buffer_capacity: self.buffer_capacity,
            count: self.count,
            min: self.min,
            max: self.max,
        }
    }
}

impl TDigest {
    /// Create a new t-digest with the given compression parameter
    ///
    /// # Panics
    ///
    /// Panics if `compression` is not finite or not positive.
    pub fn new(compression: f64) -> Self {
        assert!(
            compression.is_finite() && compression > 0.0,
            "compression must be finite and positive, got {}",
            compression
        );

        let buffer_capacity = (compression * 2.0) as usize;
        Self {
            compression,
            clusters: RefCell::new(Clusters::with_capacity(compression as usize, buffer_capacity)),
            buffer_capacity,
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    /// Get the compression parameter
    pub fn compression(&self) -> f64 {
        self.compression
    }

    /// Number of compressed centroids, not counting buffered samples
    pub fn num_centroids(&self) -> usize {
        self.clusters.borrow().centroids.len()
    }

    /// Force compression of the buffer into centroids
    pub fn compress(&mut self) {
        self.clusters.get_mut().compress(self.compression);
    }

    /// NaN values are ignored to prevent corrupting the digest.
    fn push(&mut self, value: f64) {
        if value.is_nan() {
            return;
        }

        let clusters = self.clusters.get_mut();
        clusters.buffer.push(value);
        self.count += 1;
        self.min = self.min.min(value);
        self.max = self.max.max(value);

        if clusters.buffer.len() >= self.buffer_capacity {
            clusters.compress(self.compression);
        }
    }

    fn ensure_compressed(&self) {
        if self.clusters.borrow().buffer.is_empty() {
            return;
        }
        self.clusters.borrow_mut().compress(self.compression);
    }

    /// Piecewise linear CDF through each centroid's midpoint, anchored at
    /// (0, min) and (count, max).
    fn quantile_impl(&self, centroids: &[Centroid], q: f64) -> Option<f64> {
        if self.count == 0 {
            return None;
        }

        let q = q.clamp(0.0, 1.0);
        if centroids.is_empty() {
            return Some(self.min + (self.max - self.min) * q);
        }
        if q <= 0.0 {
            return Some(self.min);
        }
        if q >= 1.0 {
            return Some(self.max);
        }

        let target = q * self.count as f64;
        let mut prev_rank = 0.0_f64;
        let mut prev_mean = self.min;
        let mut cumulative = 0.0_f64;

        for centroid in centroids {
            let mid_rank = cumulative + centroid.weight as f64 / 2.0;
            if target < mid_rank {
                let denom = mid_rank - prev_rank;
                if denom <= 0.0 {
                    return Some(prev_mean);
                }
                let t = (target - prev_rank) / denom;
                return Some(prev_mean + t * (centroid.mean - prev_mean));
            }
            cumulative += centroid.weight as f64;
            prev_rank = mid_rank;
            prev_mean = centroid.mean;
        }

        let denom = self.count as f64 - prev_rank;
        if denom <= 0.0 {
            return Some(self.max);
        }
        let t = (target - prev_rank) / denom;
        Some(prev_mean + t * (self.max - prev_mean))
    }

    /// Inverse of `quantile_impl` over the same piecewise linear model.
    fn rank_impl(&self, centroids: &[Centroid], value: f64) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        // max first: when every sample is equal, P(X <= x) is 1.0
        if value >= self.max {
            return 1.0;
        }
        if value <= self.min {
            return 0.0;
        }

        let count = self.count as f64;
        if centroids.is_empty() {
            let denom = self.max - self.min;
            if denom <= 0.0 {
                return 0.5;
            }
            return (value - self.min) / denom;
        }

        let mut prev_rank = 0.0_f64;
        let mut prev_mean = self.min;
        let mut cumulative = 0.0_f64;

        for centroid in centroids {
            let mid_rank = cumulative + centroid.weight as f64 / 2.0;
            if value < centroid.mean {
                let denom = centroid.mean - prev_mean;
                if denom <= 0.0 {
                    return prev_rank / count;
                }
                let t = (value - prev_mean) / denom;
                return (prev_rank + t * (mid_rank - prev_rank)) / count;
            }
            cumulative += centroid.weight as f64;
            prev_rank = mid_rank;
            prev_mean = centroid.mean;
        }

        let denom = self.max - prev_mean;
        if denom <= 0.0 {
            return 1.0;
        }
        let t = (value - prev_mean) / denom;
        (prev_rank + t * (count - prev_rank)) / count
    }
}

impl Default for TDigest {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl Sketch for TDigest {
    type Item = f64;

    fn update(&mut self, item: &f64) {
        self.push(*item);
    }

    fn merge(&mut self, other: &Self) -> Result<(), MergeError> {
        // Relative tolerance absorbs the f32 compression stored by the
        // compact encoding.
        let avg = (self.compression + other.compression) * 0.5;
        let diff = self.compression - other.compression;
        let abs_diff = if diff < 0.0 { -diff } else { diff };
        if avg > 0.0 && abs_diff / avg > 1e-6 {
            return Err(MergeError::IncompatibleConfig {
                expected: fmt!("compression={}", self.compression),
                found: fmt!("compression={}", other.compression),
            });
        }

        if other.count == 0 {
            return Ok(());
        }

        let compression = self.compression;
        let mine = self.clusters.get_mut();
        let theirs = other.clusters.borrow();

        let mut all = core::mem::take(&mut mine.centroids);
        all.extend(theirs.centroids.iter().cloned());
        all.extend(mine.buffer.drain(..).map(|v| Centroid::new(v, 1)));
        all.extend(theirs.buffer.iter().map(|&v| Centroid::new(v, 1)));
        all.sort_by(|a, b| a.mean.total_cmp(&b.mean));

        mine.centroids = cluster(all, compression);
        self.count += other.count;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);

        Ok(())
    }

    fn clear(&mut self) {
        let clusters = self.clusters.get_mut();
        clusters.centroids.clear();
        clusters.buffer.clear();
        self.count = 0;
        self.min = f64::INFINITY;
        self.max = f64::NEG_INFINITY;
    }

    fn size_bytes(&self) -> usize {
        let clusters = self.clusters.borrow();
        core::mem::size_of::<Self>()
            + clusters.centroids.capacity() * core::mem::size_of::<Centroid>()
            + clusters.buffer.capacity() * core::mem::size_of::<f64>()
    }

    fn count(&self) -> u64 {
        self.count
    }
}

impl QuantileSketch for TDigest {
    type Value = f64;

    fn add(&mut self, value: f64) {
        self.push(value);
    }

    fn quantile(&self, rank: f64) -> Option<f64> {
        self.ensure_compressed();
        let clusters = self.clusters.borrow();
        self.quantile_impl(&clusters.centroids, rank)
    }

    fn rank(&self, value: &f64) -> f64 {
        self.ensure_compressed();
        let clusters = self.clusters.borrow();
        self.rank_impl(&clusters.centroids, *value)
    }

    fn min(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min)
    }

    fn max(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max)
    }
}

/// Compact encoding, little endian:
///
/// ```text
/// u8   version (2)
/// f32  compression
/// f64  min
/// f64  max
/// u32  centroid count
/// per centroid: f32 mean delta from the previous centroid, varint weight
/// ```
///
/// When some delta does not fit an `f32` (samples beyond `f32::MAX`, or
/// infinities) the digest is written with version 1 instead: same header,
/// but each centroid carries its absolute mean as an `f64`.
impl EncodableSketch for TDigest {
    fn to_bytes(&self) -> Vec<u8> {
        self.ensure_compressed();
        let clusters = self.clusters.borrow();
        let deltas = small_deltas(&clusters.centroids);
        let version = if deltas.is_some() {
            SMALL_ENCODING
        } else {
            VERBOSE_ENCODING
        };

        let mut out = Vec::with_capacity(SMALL_HEADER_LEN + clusters.centroids.len() * 6);
        out.push(version);
        out.extend_from_slice(&(self.compression as f32).to_le_bytes());
        out.extend_from_slice(&self.min.to_le_bytes());
        out.extend_from_slice(&self.max.to_le_bytes());
        out.extend_from_slice(&(clusters.centroids.len() as u32).to_le_bytes());

        match deltas {
            Some(deltas) => {
                for (delta, centroid) in deltas.iter().zip(&clusters.centroids) {
                    out.extend_from_slice(&delta.to_le_bytes());
                    write_varint(&mut out, centroid.weight);
                }
            }
            None => {
                for centroid in &clusters.centroids {
                    out.extend_from_slice(&centroid.mean.to_le_bytes());
                    write_varint(&mut out, centroid.weight);
                }
            }
        }

        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < SMALL_HEADER_LEN {
            return Err(DecodeError::BufferTooShort {
                expected: SMALL_HEADER_LEN,
                found: bytes.len(),
            });
        }
        let version = bytes[0];
        if version != SMALL_ENCODING && version != VERBOSE_ENCODING {
            return Err(DecodeError::UnsupportedVersion(version as u32));
        }

        let mut reader = Reader { bytes, pos: 1 };
        let compression = f32::from_le_bytes(reader.array()?) as f64;
        if !(compression.is_finite() && compression > 0.0) {
            return Err(DecodeError::Corrupted(fmt!("compression={}", compression)));
        }
        let min = f64::from_le_bytes(reader.array()?);
        let max = f64::from_le_bytes(reader.array()?);
        let len = u32::from_le_bytes(reader.array()?) as usize;

        let mut digest = TDigest::new(compression);
        let mut centroids = Vec::with_capacity(len.min(bytes.len()));
        let mut prev = 0.0_f64;
        let mut count = 0u64;
        for _ in 0..len {
            let mean = if version == SMALL_ENCODING {
                prev += f32::from_le_bytes(reader.array()?) as f64;
                prev
            } else {
                f64::from_le_bytes(reader.array()?)
            };
            let weight = reader.varint()?;
            if weight == 0 {
                return Err(DecodeError::Corrupted(fmt!("zero weight centroid")));
            }
            count = count
                .checked_add(weight)
                .ok_or_else(|| DecodeError::Corrupted(fmt!("total weight overflow")))?;
            centroids.push(Centroid::new(mean, weight));
        }
        if reader.pos != bytes.len() {
            return Err(DecodeError::Corrupted(fmt!(
                "{} trailing bytes",
                bytes.len() - reader.pos
            )));
        }

        if count > 0 {
            digest.min = min;
            digest.max = max;
        }
        digest.count = count;
        digest.clusters.get_mut().centroids = centroids;
        Ok(digest)
    }
}

/// f32 deltas for the small encoding, or `None` if one would overflow.
///
/// Each delta is taken against the decoded previous mean so f32 rounding
/// does not accumulate along the list.
fn small_deltas(centroids: &[Centroid]) -> Option<Vec<f32>> {
    let mut prev = 0.0_f64;
    let mut deltas = Vec::with_capacity(centroids.len());
    for centroid in centroids {
        let delta = (centroid.mean - prev) as f32;
        if !delta.is_finite() {
            return None;
        }
        deltas.push(delta);
        prev += delta as f64;
    }
    Some(deltas)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let slice = self.bytes.get(self.pos..end).ok_or(DecodeError::BufferTooShort {
            expected: end,
            found: self.bytes.len(),
        })?;
        self.pos = end;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn varint(&mut self) -> Result<u64, DecodeError> {
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let [byte] = self.array::<1>()?;
            value |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(DecodeError::Corrupted(fmt!("varint longer than 10 bytes")))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for TDigest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let clusters = self.clusters.borrow();
        let mut state = serializer.serialize_struct("TDigest", 6)?;
        state.serialize_field("compression", &self.compression)?;
        state.serialize_field("centroids", &clusters.centroids)?;
        state.serialize_field("buffer", &clusters.buffer)?;
        state.serialize_field("count", &self.count)?;
        state.serialize_field("min", &self.min)?;
        state.serialize_field("max", &self.max)?;
        state.end()
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Centroid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeTuple;
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.mean)?;
        tuple.serialize_element(&self.weight)?;
        tuple.end()
    }
}

// ============================================================================
// Tests
// ============================================================================
