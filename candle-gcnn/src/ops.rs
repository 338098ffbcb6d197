//! Tensor primitives shared by the normalization layers.
use candle::{Result, Tensor};

/// Batch normalization with precomputed statistics.
///
/// `mean`, `variance`, `offset` and `scale` have to broadcast against `xs`. This computes
/// `(xs - mean) / sqrt(variance + eps) * scale + offset` in the same operation order as the
/// tensorflow primitive so that inference results match saved models bit for bit.
pub fn batch_normalization(
    xs: &Tensor,
    mean: &Tensor,
    variance: &Tensor,
    offset: &Tensor,
    scale: &Tensor,
    eps: f64,
) -> Result<Tensor> {
    let inv = (variance + eps)?.sqrt()?.recip()?.broadcast_mul(scale)?;
    let shift = offset.broadcast_sub(&mean.broadcast_mul(&inv)?)?;
    xs.broadcast_mul(&inv)?.broadcast_add(&shift)
}

/// Mean and biased variance of `xs` over `axes`, the reduced dimensions are kept.
pub fn moments(xs: &Tensor, axes: &[usize]) -> Result<(Tensor, Tensor)> {
    let mean = xs.mean_keepdim(axes)?;
    let variance = xs.broadcast_sub(&mean)?.sqr()?.mean_keepdim(axes)?;
    Ok((mean, variance))
}

/// Bessel style correction of a batch variance computed over `sample_size` values.
///
/// The factor is `n / (n - (1 + eps))`. With a single value and `eps == 0` it has no finite
/// value, the batch variance is zero in that case and so is the result.
pub fn unbiased_variance(variance: &Tensor, sample_size: usize, eps: f64) -> Result<Tensor> {
    let n = sample_size as f64;
    let denom = n - (1.0 + eps);
    if denom == 0. {
        return variance.zeros_like();
    }
    variance * (n / denom)
}

/// `momentum * running + (1 - momentum) * value`.
pub fn moving_average_update(running: &Tensor, value: &Tensor, momentum: f64) -> Result<Tensor> {
    (running * momentum)? + (value * (1.0 - momentum))?
}
