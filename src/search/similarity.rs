//! Norms, normalization and cosine scoring.

use wide::f32x8;

/// Euclidean norm.
pub fn l2_norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// Below this the sum of squares may have lost precision to underflow.
const MIN_DIRECT_NORM: f32 = 1e-18;

/// Scale `v` to unit length. The zero vector is left unchanged.
///
/// Vectors whose squared norm overflows or underflows f32 are first divided
/// by their largest magnitude component. Vectors holding NaN or infinite
/// components are left unchanged.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm = l2_norm(v);
    if norm.is_finite() && norm >= MIN_DIRECT_NORM {
        scale(v, 1.0 / norm);
        return;
    }

    if v.iter().any(|x| !x.is_finite()) {
        return;
    }
    let max_abs = v.iter().fold(0.0_f32, |m, x| m.max(x.abs()));
    if max_abs == 0.0 {
        return;
    }
    for x in v.iter_mut() {
        *x /= max_abs;
    }
    let norm = l2_norm(v);
    scale(v, 1.0 / norm);
}

#[inline]
fn scale(v: &mut [f32], factor: f32) {
    for x in v.iter_mut() {
        *x *= factor;
    }
}

/// Cosine similarity of two unit vectors.
///
/// This is a plain dot product; callers normalize both sides first.
#[inline]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    dot_product(a, b)
}

pub fn is_unit(v: &[f32], tolerance: f32) -> bool {
    (l2_norm(v) - 1.0).abs() <= tolerance
}

#[inline]
fn dot_product_scalar(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// 8-lane dot product. Reordering the additions gives ~1e-7 relative error
/// versus the scalar loop, which never changes a ranking in practice.
#[inline]
fn dot_product_simd(a: &[f32], b: &[f32]) -> f32 {
    let chunks_a = a.chunks_exact(8);
    let chunks_b = b.chunks_exact(8);
    let remainder_a = chunks_a.remainder();
    let remainder_b = chunks_b.remainder();

    let mut sum = f32x8::ZERO;
    for (ca, cb) in chunks_a.zip(chunks_b) {
        let mut arr_a = [0.0_f32; 8];
        let mut arr_b = [0.0_f32; 8];
        arr_a.copy_from_slice(ca);
        arr_b.copy_from_slice(cb);
        sum += f32x8::from(arr_a) * f32x8::from(arr_b);
    }

    let mut scalar_sum: f32 = sum.reduce_add();
    for (x, y) in remainder_a.iter().zip(remainder_b) {
        scalar_sum += x * y;
    }
    scalar_sum
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() >= 8 {
        dot_product_simd(a, b)
    } else {
        dot_product_scalar(a, b)
    }
}

/// Bench-only wrapper for the scalar dot product.
#[doc(hidden)]
pub fn dot_product_scalar_bench(a: &[f32], b: &[f32]) -> f32 {
    dot_product_scalar(a, b)
}

/// Bench-only wrapper for the SIMD dot product.
#[doc(hidden)]
pub fn dot_product_simd_bench(a: &[f32], b: &[f32]) -> f32 {
    dot_product_simd(a, b)
}
