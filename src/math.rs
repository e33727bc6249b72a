//! Math function wrappers for std/no_std compatibility
//!
//! Uses standard library math when available, falls back to libm for no_std.

#[cfg(feature = "std")]
#[inline]
pub fn asin(x: f64) -> f64 {
    x.asin()
}

#[cfg(not(feature = "std"))]
#[inline]
pub fn asin(x: f64) -> f64 {
    libm::asin(x)
}
