//! Distance metrics over `f32` vectors.
//!
//! Every function accumulates in `f64` and follows the same convention:
//! smaller means more similar. A vector containing NaN is infinitely far
//! from everything, and any non-finite result is reported as
//! `f64::INFINITY` so callers can sort without special cases.

use crate::{ConfigError, Metric, ValidationError};

pub type DistanceFn = fn(&[f32], &[f32]) -> Result<f64, ValidationError>;

/// Resolves a metric name to its distance function.
pub fn resolve_metric(name: &str) -> Result<DistanceFn, ConfigError> {
    Ok(name.parse::<Metric>()?.distance_fn())
}

#[inline]
pub fn distance(a: &[f32], b: &[f32], metric: Metric) -> Result<f64, ValidationError> {
    (metric.distance_fn())(a, b)
}

#[inline]
fn check_dims(a: &[f32], b: &[f32]) -> Result<(), ValidationError> {
    if a.len() != b.len() {
        return Err(ValidationError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    Ok(())
}

#[inline]
fn has_nan(a: &[f32], b: &[f32]) -> bool {
    a.iter().chain(b).any(|x| x.is_nan())
}

#[inline]
fn finite_or_inf(d: f64) -> f64 {
    if d.is_finite() {
        d
    } else {
        f64::INFINITY
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| f64::from(x) * f64::from(y))
        .sum()
}

#[inline]
fn norm(a: &[f32]) -> f64 {
    a.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt()
}

pub fn l2_distance(a: &[f32], b: &[f32]) -> Result<f64, ValidationError> {
    check_dims(a, b)?;
    if has_nan(a, b) {
        return Ok(f64::INFINITY);
    }
    let mut s = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let d = f64::from(x) - f64::from(y);
        s += d * d;
    }
    Ok(finite_or_inf(s.sqrt()))
}

/// Cosine similarity clamped to `[-1, 1]`; `0.0` when either norm is zero.
///
/// NaN inputs produce NaN here; [`cosine_distance`] is the NaN-safe entry
/// point used for ranking.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f64, ValidationError> {
    check_dims(a, b)?;
    let na = norm(a);
    let nb = norm(b);
    if na == 0.0 || nb == 0.0 {
        return Ok(0.0);
    }
    Ok((dot(a, b) / (na * nb)).clamp(-1.0, 1.0))
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f64, ValidationError> {
    check_dims(a, b)?;
    if has_nan(a, b) {
        return Ok(f64::INFINITY);
    }
    let na = norm(a);
    let nb = norm(b);
    if na == 0.0 || nb == 0.0 {
        return Ok(1.0);
    }
    if na.is_infinite() || nb.is_infinite() {
        return Ok(f64::INFINITY);
    }
    let sim = (dot(a, b) / (na * nb)).clamp(-1.0, 1.0);
    Ok(finite_or_inf(1.0 - sim))
}

/// Negated inner product, so better-aligned vectors sort first.
pub fn dot_distance(a: &[f32], b: &[f32]) -> Result<f64, ValidationError> {
    check_dims(a, b)?;
    if has_nan(a, b) {
        return Ok(f64::INFINITY);
    }
    let d = dot(a, b);
    Ok(if d.is_finite() { -d } else { f64::INFINITY })
}
