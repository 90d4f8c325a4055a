//! Shape algebra: element counts, strides and broadcasting rules.
//!
//! Shapes are ordered most-significant dimension first. When two shapes of
//! different rank meet, the shorter one is left-padded with 1s.

use crate::error::{QError, QResult};

/// Total number of elements. A rank-0 shape holds one element.
pub fn numel(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Row-major strides for a contiguous layout.
pub fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0usize; shape.len()];
    let mut acc = 1usize;
    for (stride, &dim) in strides.iter_mut().zip(shape.iter()).rev() {
        *stride = acc;
        acc *= dim;
    }
    strides
}

fn padded(shape: &[usize], rank: usize) -> Vec<usize> {
    let mut dims = vec![1usize; rank - shape.len()];
    dims.extend_from_slice(shape);
    dims
}

/// NumPy-style broadcast of two shapes.
pub fn multidirectional_broadcast(a: &[usize], b: &[usize]) -> QResult<Vec<usize>> {
    let rank = a.len().max(b.len());
    let (pa, pb) = (padded(a, rank), padded(b, rank));

    pa.iter()
        .zip(pb.iter())
        .enumerate()
        .map(|(axis, (&da, &db))| {
            if da == db || db == 1 {
                Ok(da)
            } else if da == 1 {
                Ok(db)
            } else {
                Err(QError::shape_error(a, b, &format!("axis {} is {} vs {}", axis, da, db)))
            }
        })
        .collect()
}

/// Output shape of the rank-3 accumulate rule: the input with the larger
/// trailing (channel) dimension wins, ties pick `a`. The other input may only
/// differ by having a trailing dimension of exactly 1.
pub fn channel_broadcast(a: &[usize], b: &[usize]) -> QResult<Vec<usize>> {
    if a.len() != 3 || b.len() != 3 {
        return Err(QError::shape_error(a, b, "channel broadcast needs rank-3 inputs"));
    }
    let (wide, narrow) = if a[2] >= b[2] { (a, b) } else { (b, a) };
    if wide[..2] != narrow[..2] {
        return Err(QError::shape_error(a, b, "leading dimensions differ"));
    }
    if narrow[2] != wide[2] && narrow[2] != 1 {
        return Err(QError::shape_error(a, b, "trailing dimension must match or be 1"));
    }
    Ok(wide.to_vec())
}

/// Strides that walk `input` while iterating over `output`, with 0 on every
/// broadcast axis. Fails if `input` does not broadcast to `output`.
pub fn broadcast_strides(input: &[usize], output: &[usize]) -> QResult<Vec<usize>> {
    if input.len() > output.len() {
        return Err(QError::shape_error(input, output, "input rank exceeds output rank"));
    }
    let dims = padded(input, output.len());
    let strides = contiguous_strides(&dims);

    dims.iter()
        .zip(output.iter())
        .zip(strides)
        .map(|((&d, &o), s)| match (d == o, d == 1) {
            (true, _) => Ok(if d == 1 { 0 } else { s }),
            (false, true) => Ok(0),
            (false, false) => Err(QError::shape_error(input, output, "input does not broadcast to output")),
        })
        .collect()
}
