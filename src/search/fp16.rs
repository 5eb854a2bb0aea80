//! Half-precision conversion for blob payloads.
//!
//! Conversions go through [`half::f16`], which rounds to nearest with ties to
//! even. Special values keep their class:
//!
//! - NaN becomes a quiet NaN (`0x7E00`-class payload) with the sign preserved
//! - ±Inf and values beyond the half range become `0x7C00 | sign`
//! - ±0 stays a signed zero
//! - magnitudes below the smallest normal half are encoded as subnormals
//!
//! fp16 is lossy. For components in `[-1, 1]` the absolute error after a
//! round trip stays below 1e-3, which keeps cosine rankings stable.

use half::f16;

/// Convert one f32 to its IEEE-754 binary16 bit pattern.
#[inline]
pub fn f32_to_half_bits(value: f32) -> u16 {
    f16::from_f32(value).to_bits()
}

/// Convert one binary16 bit pattern back to f32.
#[inline]
pub fn half_bits_to_f32(bits: u16) -> f32 {
    f16::from_bits(bits).to_f32()
}

pub fn to_half(values: &[f32]) -> Vec<u16> {
    values.iter().map(|v| f32_to_half_bits(*v)).collect()
}

pub fn from_half(bits: &[u16]) -> Vec<f32> {
    bits.iter().map(|b| half_bits_to_f32(*b)).collect()
}
