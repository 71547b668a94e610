//! Quantization arithmetic
//!
//! Affine mapping between reals and 8-bit integers:
//!
//! ```text
//! q    = clamp(round(real / scale) + zero_point)
//! real ≈ scale * (q - zero_point)
//! ```
//!
//! Activations use asymmetric `u8` per tensor, weights use symmetric `i8` per
//! output channel, biases use `i32` with `scale = input_scale * weight_scale`.
//! Integer kernels rescale their `i32` accumulators with a
//! [`QuantizedMultiplier`], so no float math runs inside them.

use serde::{Deserialize, Serialize};

/// Smallest and largest `u8` code
pub const U8_MIN: i32 = 0;
pub const U8_MAX: i32 = 255;

/// Symmetric `i8` weight range; -128 is unused
pub const I8_WEIGHT_MAX: i32 = 127;

/// Per-tensor (scale, zero-point)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    pub fn new(scale: f32, zero_point: i32) -> Self {
        Self { scale, zero_point }
    }

    /// Asymmetric `u8` parameters covering `[min, max]`
    ///
    /// The range is widened to include 0 so that zero is exactly
    /// representable, which padding and ReLU rely on. A degenerate range
    /// gets scale 1.
    pub fn from_min_max(min: f32, max: f32) -> Self {
        let min = min.min(0.0);
        let max = max.max(0.0);

        let scale = (max - min) / (U8_MAX - U8_MIN) as f32;
        if !(scale.is_finite() && scale > 0.0) {
            return Self::new(1.0, 0);
        }

        let zero_point = (U8_MIN as f32 - min / scale)
            .round()
            .clamp(U8_MIN as f32, U8_MAX as f32) as i32;

        Self::new(scale, zero_point)
    }

    /// Quantize one value to `u8`
    pub fn quantize(&self, value: f32) -> u8 {
        let q = (value / self.scale).round() as i32 + self.zero_point;
        q.clamp(U8_MIN, U8_MAX) as u8
    }

    /// Dequantize one `u8` code
    pub fn dequantize(&self, q: u8) -> f32 {
        self.scale * (q as i32 - self.zero_point) as f32
    }

    pub fn quantize_slice(&self, values: &[f32]) -> Vec<u8> {
        values.iter().map(|&v| self.quantize(v)).collect()
    }

    pub fn dequantize_slice(&self, codes: &[u8]) -> Vec<f32> {
        codes.iter().map(|&q| self.dequantize(q)).collect()
    }

    /// Smallest and largest representable reals
    pub fn representable_range(&self) -> (f32, f32) {
        (self.dequantize(U8_MIN as u8), self.dequantize(U8_MAX as u8))
    }
}

/// Symmetric per-channel `i8` weights, channels along axis 0
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelQuantized {
    pub values: Vec<i8>,
    pub scales: Vec<f32>,
}

/// Quantize `weights` (`channels` equal rows) symmetrically per row
pub fn quantize_per_channel(weights: &[f32], channels: usize) -> ChannelQuantized {
    let per_channel = weights.len() / channels.max(1);
    let mut values = Vec::with_capacity(weights.len());
    let mut scales = Vec::with_capacity(channels);

    for row in weights.chunks(per_channel.max(1)).take(channels) {
        let max_abs = row.iter().fold(0.0f32, |m, &w| m.max(w.abs()));
        let scale = if max_abs > 0.0 {
            max_abs / I8_WEIGHT_MAX as f32
        } else {
            1.0
        };
        scales.push(scale);
        values.extend(row.iter().map(|&w| {
            (w / scale)
                .round()
                .clamp(-I8_WEIGHT_MAX as f32, I8_WEIGHT_MAX as f32) as i8
        }));
    }

    ChannelQuantized { values, scales }
}

/// Inverse of [`quantize_per_channel`]
pub fn dequantize_per_channel(values: &[i8], scales: &[f32]) -> Vec<f32> {
    let per_channel = values.len() / scales.len().max(1);
    values
        .chunks(per_channel.max(1))
        .zip(scales.iter())
        .flat_map(|(row, &scale)| row.iter().map(move |&q| q as f32 * scale))
        .collect()
}

/// Quantize a bias vector with one accumulator scale per channel
pub fn quantize_bias(bias: &[f32], input_scale: f32, weight_scales: &[f32]) -> Vec<i32> {
    bias.iter()
        .zip(weight_scales.iter())
        .map(|(&b, &ws)| {
            let scale = input_scale as f64 * ws as f64;
            (b as f64 / scale)
                .round()
                .clamp(i32::MIN as f64, i32::MAX as f64) as i32
        })
        .collect()
}

/// A real multiplier `M = multiplier * 2^(shift - 31)` with a Q31 mantissa
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantizedMultiplier {
    pub multiplier: i32,
    pub shift: i32,
}

impl QuantizedMultiplier {
    /// Decompose a non-negative real multiplier
    pub fn from_real(real: f64) -> Self {
        if real <= 0.0 || !real.is_finite() {
            return Self {
                multiplier: 0,
                shift: 0,
            };
        }

        // real = mantissa * 2^shift with mantissa in [0.5, 1)
        let mut shift = real.log2().floor() as i32 + 1;
        let mut mantissa = real / 2f64.powi(shift);
        while mantissa >= 1.0 {
            mantissa /= 2.0;
            shift += 1;
        }
        while mantissa < 0.5 {
            mantissa *= 2.0;
            shift -= 1;
        }

        let mut q = (mantissa * (1i64 << 31) as f64).round() as i64;
        if q == 1i64 << 31 {
            q /= 2;
            shift += 1;
        }

        if shift < -31 {
            return Self {
                multiplier: 0,
                shift: 0,
            };
        }

        Self {
            multiplier: q as i32,
            shift: shift.min(30),
        }
    }

    /// Scale an accumulator: `round(x * M)`
    pub fn apply(&self, x: i32) -> i32 {
        let left_shift = self.shift.max(0);
        let right_shift = (-self.shift).max(0);

        let shifted = ((x as i64) << left_shift).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
        rounding_divide_by_pot(
            saturating_rounding_doubling_high_mul(shifted, self.multiplier),
            right_shift,
        )
    }

    /// The real value this multiplier stands for
    pub fn to_real(&self) -> f64 {
        self.multiplier as f64 * 2f64.powi(self.shift - 31)
    }
}

/// High 32 bits of `2 * a * b`, rounded, saturating the single overflow case
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = a as i64 * b as i64;
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// `x / 2^exponent`, rounding half away from zero
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    if exponent <= 0 {
        return x;
    }
    let exponent = exponent.min(31);
    let x = x as i64;
    let mask = (1i64 << exponent) - 1;
    let remainder = x & mask;
    let threshold = (mask >> 1) + if x < 0 { 1 } else { 0 };
    ((x >> exponent) + if remainder > threshold { 1 } else { 0 }) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_within_half_scale() {
        let params = QuantParams::from_min_max(-1.3, 4.2);
        let steps = 1000;
        for i in 0..=steps {
            let v = -1.3 + 5.5 * i as f32 / steps as f32;
            let back = params.dequantize(params.quantize(v));
            assert!(
                (back - v).abs() <= params.scale / 2.0 + 1e-6,
                "value {} came back as {} (scale {})",
                v,
                back,
                params.scale
            );
        }
    }

    #[test]
    fn test_zero_is_exact() {
        for (min, max) in [(-1.3, 4.2), (0.0, 6.0), (0.5, 3.0), (-2.0, -0.5)] {
            let params = QuantParams::from_min_max(min, max);
            assert_eq!(params.dequantize(params.quantize(0.0)), 0.0);
        }
    }

    #[test]
    fn test_degenerate_range() {
        let params = QuantParams::from_min_max(0.0, 0.0);
        assert_eq!(params, QuantParams::new(1.0, 0));
    }

    #[test]
    fn test_relu_range_has_zero_point_zero() {
        let params = QuantParams::from_min_max(0.0, 2.55);
        assert_eq!(params.zero_point, 0);
        assert!((params.scale - 0.01).abs() < 1e-7);
    }

    #[test]
    fn test_per_channel_weights() {
        let weights = [0.5, -1.0, 0.25, 0.0, 0.0, 0.0];
        let q = quantize_per_channel(&weights, 2);
        assert_eq!(q.scales.len(), 2);
        assert!((q.scales[0] - 1.0 / 127.0).abs() < 1e-9);
        assert_eq!(q.scales[1], 1.0);
        assert_eq!(q.values[1], -127);
        assert_eq!(&q.values[3..], &[0, 0, 0]);

        let back = dequantize_per_channel(&q.values, &q.scales);
        for (w, b) in weights.iter().zip(back.iter()) {
            assert!((w - b).abs() <= q.scales[0] / 2.0 + 1e-7);
        }
    }

    #[test]
    fn test_quantize_bias() {
        let bias = quantize_bias(&[0.5, -0.25], 0.1, &[0.01, 0.05]);
        assert_eq!(bias, vec![500, -50]);
    }

    #[test]
    fn test_quantized_multiplier_matches_real() {
        for real in [0.000_731, 0.02, 0.5, 0.75, 0.999_999, 1.0, 3.7] {
            let m = QuantizedMultiplier::from_real(real);
            assert!((m.to_real() - real).abs() / real < 1e-6, "{}", real);

            for x in [-40_000, -1_234, -1, 0, 1, 777, 12_345, 1_000_000] {
                let expected = (x as f64 * real).round();
                let got = m.apply(x) as f64;
                assert!((got - expected).abs() <= 1.0, "x={} real={}", x, real);
            }
        }
    }

    #[test]
    fn test_rounding_divide_by_pot() {
        assert_eq!(rounding_divide_by_pot(5, 1), 3);
        assert_eq!(rounding_divide_by_pot(-5, 1), -3);
        assert_eq!(rounding_divide_by_pot(4, 2), 1);
        assert_eq!(rounding_divide_by_pot(-6, 2), -2);
        assert_eq!(rounding_divide_by_pot(7, 0), 7);
    }

    #[test]
    fn test_saturating_high_mul() {
        assert_eq!(
            saturating_rounding_doubling_high_mul(i32::MIN, i32::MIN),
            i32::MAX
        );
        // 1 << 30 is 0.5 in Q31
        assert_eq!(saturating_rounding_doubling_high_mul(1000, 1 << 30), 500);
    }
}
