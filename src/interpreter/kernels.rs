//! Reference kernels
//!
//! Straightforward loops over NCHW data. Float kernels work on `f32`,
//! integer kernels on `u8` activations with `i8` weights and `i32` biases,
//! rescaling accumulators through a [`QuantizedMultiplier`] per output
//! channel.

use crate::convert::quantize::{QuantParams, QuantizedMultiplier};

/// Spatial geometry of a 2D convolution or pooling window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub batch: usize,
    pub in_channels: usize,
    pub in_height: usize,
    pub in_width: usize,
    pub out_channels: usize,
    pub out_height: usize,
    pub out_width: usize,
    pub kernel: usize,
    pub stride: usize,
    pub pad_top: usize,
    pub pad_left: usize,
}

impl Conv2dGeometry {
    /// Offsets `(in_y, in_x)` covered by output `(oy, ox)` and kernel `(ky, kx)`
    #[inline]
    fn input_position(&self, oy: usize, ox: usize, ky: usize, kx: usize) -> Option<(usize, usize)> {
        let y = (oy * self.stride + ky).checked_sub(self.pad_top)?;
        let x = (ox * self.stride + kx).checked_sub(self.pad_left)?;
        if y < self.in_height && x < self.in_width {
            Some((y, x))
        } else {
            None
        }
    }
}

/// Padding before the first row/column for "same" output size
pub fn same_padding(input: usize, output: usize, kernel: usize, stride: usize) -> usize {
    let needed = ((output.saturating_sub(1)) * stride + kernel).saturating_sub(input);
    needed / 2
}

/// Float convolution, weights `[out, in, k, k]`
pub fn conv2d_f32(
    geo: &Conv2dGeometry,
    input: &[f32],
    weights: &[f32],
    bias: &[f32],
    relu: bool,
    output: &mut [f32],
) {
    let k = geo.kernel;
    for n in 0..geo.batch {
        for oc in 0..geo.out_channels {
            for oy in 0..geo.out_height {
                for ox in 0..geo.out_width {
                    let mut acc = bias[oc];
                    for ic in 0..geo.in_channels {
                        let in_base = (n * geo.in_channels + ic) * geo.in_height;
                        let w_base = (oc * geo.in_channels + ic) * k;
                        for ky in 0..k {
                            for kx in 0..k {
                                if let Some((y, x)) = geo.input_position(oy, ox, ky, kx) {
                                    acc += input[(in_base + y) * geo.in_width + x]
                                        * weights[(w_base + ky) * k + kx];
                                }
                            }
                        }
                    }
                    if relu {
                        acc = acc.max(0.0);
                    }
                    let out_idx =
                        ((n * geo.out_channels + oc) * geo.out_height + oy) * geo.out_width + ox;
                    output[out_idx] = acc;
                }
            }
        }
    }
}

/// Parameters shared by the integer conv and dense kernels
#[derive(Debug, Clone)]
pub struct QuantizedKernelParams {
    pub input_zero_point: i32,
    pub output_zero_point: i32,
    pub multipliers: Vec<QuantizedMultiplier>,
    pub activation_min: i32,
    pub activation_max: i32,
}

impl QuantizedKernelParams {
    #[inline]
    fn requantize(&self, acc: i32, channel: usize) -> u8 {
        let scaled = self.multipliers[channel].apply(acc) + self.output_zero_point;
        scaled.clamp(self.activation_min, self.activation_max) as u8
    }
}

/// Integer convolution over `u8` activations and `i8` weights
///
/// Padded positions hold the input zero-point, so they add nothing to
/// the zero-centred accumulator and are skipped.
pub fn conv2d_u8(
    geo: &Conv2dGeometry,
    input: &[u8],
    weights: &[i8],
    bias: &[i32],
    params: &QuantizedKernelParams,
    output: &mut [u8],
) {
    let k = geo.kernel;
    for n in 0..geo.batch {
        for oc in 0..geo.out_channels {
            for oy in 0..geo.out_height {
                for ox in 0..geo.out_width {
                    let mut acc = bias[oc];
                    for ic in 0..geo.in_channels {
                        let in_base = (n * geo.in_channels + ic) * geo.in_height;
                        let w_base = (oc * geo.in_channels + ic) * k;
                        for ky in 0..k {
                            for kx in 0..k {
                                if let Some((y, x)) = geo.input_position(oy, ox, ky, kx) {
                                    let q_in = input[(in_base + y) * geo.in_width + x] as i32
                                        - params.input_zero_point;
                                    let q_w = weights[(w_base + ky) * k + kx] as i32;
                                    acc = acc.wrapping_add(q_in * q_w);
                                }
                            }
                        }
                    }
                    let out_idx =
                        ((n * geo.out_channels + oc) * geo.out_height + oy) * geo.out_width + ox;
                    output[out_idx] = params.requantize(acc, oc);
                }
            }
        }
    }
}

/// Max pooling, valid padding. Works on any ordered element type.
pub fn max_pool2d<T: Copy + PartialOrd>(geo: &Conv2dGeometry, input: &[T], output: &mut [T]) {
    let k = geo.kernel;
    for n in 0..geo.batch {
        for c in 0..geo.in_channels {
            let in_base = (n * geo.in_channels + c) * geo.in_height;
            for oy in 0..geo.out_height {
                for ox in 0..geo.out_width {
                    let mut best: Option<T> = None;
                    for ky in 0..k {
                        for kx in 0..k {
                            if let Some((y, x)) = geo.input_position(oy, ox, ky, kx) {
                                let v = input[(in_base + y) * geo.in_width + x];
                                match best {
                                    Some(b) if v <= b => {}
                                    _ => best = Some(v),
                                }
                            }
                        }
                    }
                    let out_idx =
                        ((n * geo.in_channels + c) * geo.out_height + oy) * geo.out_width + ox;
                    if let Some(b) = best {
                        output[out_idx] = b;
                    }
                }
            }
        }
    }
}

/// Float dense layer, weights `[out, in]`
pub fn fully_connected_f32(
    input: &[f32],
    weights: &[f32],
    bias: &[f32],
    in_features: usize,
    out_features: usize,
    relu: bool,
    output: &mut [f32],
) {
    let batch = input.len() / in_features.max(1);
    for n in 0..batch {
        let x = &input[n * in_features..(n + 1) * in_features];
        for o in 0..out_features {
            let row = &weights[o * in_features..(o + 1) * in_features];
            let mut acc = bias[o];
            for (xi, wi) in x.iter().zip(row.iter()) {
                acc += xi * wi;
            }
            if relu {
                acc = acc.max(0.0);
            }
            output[n * out_features + o] = acc;
        }
    }
}

/// Integer dense layer over `u8` activations and `i8` weights
pub fn fully_connected_u8(
    input: &[u8],
    weights: &[i8],
    bias: &[i32],
    in_features: usize,
    out_features: usize,
    params: &QuantizedKernelParams,
    output: &mut [u8],
) {
    let batch = input.len() / in_features.max(1);
    for n in 0..batch {
        let x = &input[n * in_features..(n + 1) * in_features];
        for o in 0..out_features {
            let row = &weights[o * in_features..(o + 1) * in_features];
            let mut acc = bias[o];
            for (&xi, &wi) in x.iter().zip(row.iter()) {
                acc = acc.wrapping_add((xi as i32 - params.input_zero_point) * wi as i32);
            }
            output[n * out_features + o] = params.requantize(acc, o);
        }
    }
}

/// Softmax over the last axis of length `classes`
pub fn softmax_f32(input: &[f32], classes: usize, output: &mut [f32]) {
    for (x, y) in input
        .chunks(classes.max(1))
        .zip(output.chunks_mut(classes.max(1)))
    {
        let max = x.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for (xi, yi) in x.iter().zip(y.iter_mut()) {
            *yi = (xi - max).exp();
            sum += *yi;
        }
        if sum > 0.0 {
            for yi in y.iter_mut() {
                *yi /= sum;
            }
        }
    }
}

pub fn quantize_u8(input: &[f32], params: QuantParams, output: &mut [u8]) {
    for (x, y) in input.iter().zip(output.iter_mut()) {
        *y = params.quantize(*x);
    }
}

pub fn dequantize_u8(input: &[u8], params: QuantParams, output: &mut [f32]) {
    for (x, y) in input.iter().zip(output.iter_mut()) {
        *y = params.dequantize(*x);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(
        in_size: usize,
        out_size: usize,
        kernel: usize,
        stride: usize,
        pad: usize,
    ) -> Conv2dGeometry {
        Conv2dGeometry {
            batch: 1,
            in_channels: 1,
            in_height: in_size,
            in_width: in_size,
            out_channels: 1,
            out_height: out_size,
            out_width: out_size,
            kernel,
            stride,
            pad_top: pad,
            pad_left: pad,
        }
    }

    #[test]
    fn test_same_padding() {
        assert_eq!(same_padding(8, 8, 3, 1), 1);
        assert_eq!(same_padding(8, 4, 2, 2), 0);
    }

    #[test]
    fn test_conv2d_same_box_filter() {
        let geo = geometry(3, 3, 3, 1, 1);
        let input = [1.0f32; 9];
        let mut output = [0.0f32; 9];
        conv2d_f32(&geo, &input, &[1.0; 9], &[0.0], false, &mut output);
        // corners see 4 pixels, edges 6, center 9
        assert_eq!(output, [4.0, 6.0, 4.0, 6.0, 9.0, 6.0, 4.0, 6.0, 4.0]);
    }

    #[test]
    fn test_conv2d_relu() {
        let geo = geometry(1, 1, 1, 1, 0);
        let mut output = [0.0f32];
        conv2d_f32(&geo, &[2.0], &[-1.0], &[0.5], true, &mut output);
        assert_eq!(output, [0.0]);
    }

    #[test]
    fn test_max_pool() {
        let geo = geometry(4, 2, 2, 2, 0);
        let input: Vec<u8> = (0..16).collect();
        let mut output = [0u8; 4];
        max_pool2d(&geo, &input, &mut output);
        assert_eq!(output, [5, 7, 13, 15]);
    }

    #[test]
    fn test_fully_connected_f32() {
        let mut output = [0.0f32; 2];
        let weights = [1.0, 1.0, -1.0, 0.5];
        fully_connected_f32(&[1.0, 2.0], &weights, &[0.5, 0.0], 2, 2, true, &mut output);
        assert_eq!(output, [3.5, 0.0]);
    }

    #[test]
    fn test_fully_connected_u8_identity() {
        // scales chosen so that M = 1
        let params = QuantizedKernelParams {
            input_zero_point: 10,
            output_zero_point: 3,
            multipliers: vec![QuantizedMultiplier::from_real(1.0)],
            activation_min: 0,
            activation_max: 255,
        };
        let mut output = [0u8];
        fully_connected_u8(&[15, 12], &[2, -1], &[4], 2, 1, &params, &mut output);
        // 4 + 5*2 + 2*(-1) = 12, plus zero-point 3
        assert_eq!(output, [15]);
    }

    #[test]
    fn test_softmax() {
        let mut output = [0.0f32; 3];
        softmax_f32(&[1.0, 1.0, 1.0], 3, &mut output);
        for v in output {
            assert!((v - 1.0 / 3.0).abs() < 1e-6);
        }
    }
}
