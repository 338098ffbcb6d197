//! Conversions between per-orbit parameters and per-channel tensors.
//!
//! The group-convolution lays out the `order` channels of orbit `i` at positions
//! `i * order .. (i + 1) * order`, expanding and collapsing follow the same layout.
use candle::Tensor;

use crate::{Error, Group, Result};

/// Number of orbits covered by `num_channels` channels.
pub fn num_orbits(num_channels: usize, group: Group) -> Result<usize> {
    let order = group.order();
    if num_channels == 0 || num_channels % order != 0 {
        return Err(Error::ChannelMismatch {
            num_channels,
            order,
            op: "num-orbits",
        });
    }
    Ok(num_channels / order)
}

/// Replicates each orbit value `group.order()` times, `(k,)` becomes `(k * order,)`.
pub fn expand(p: &Tensor, group: Group) -> Result<Tensor> {
    let num_orbits = p.dims1()?;
    let order = group.order();
    if order == 1 {
        return Ok(p.clone());
    }
    let p = p
        .reshape((num_orbits, 1))?
        .repeat((1, order))?
        .flatten_all()?;
    Ok(p)
}

/// Averages each orbit of a per-channel vector, `(k * order,)` becomes `(k,)`.
pub fn collapse(w: &Tensor, group: Group) -> Result<Tensor> {
    let num_channels = w.dims1()?;
    let order = group.order();
    if num_channels % order != 0 {
        return Err(Error::ChannelMismatch {
            num_channels,
            order,
            op: "collapse",
        });
    }
    if order == 1 {
        return Ok(w.clone());
    }
    // Pairwise sums keep the average of a constant orbit exact for power of two orders.
    let mut w = w.reshape((num_channels / order, order))?;
    let mut width = order;
    while width % 2 == 0 {
        width /= 2;
        w = (w.narrow(1, 0, width)? + w.narrow(1, width, width)?)?;
    }
    Ok(w.sum(1)?.affine(1. / order as f64, 0.)?)
}
