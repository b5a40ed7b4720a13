use crate::{Complex32, MAX_CHANNELS};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineMethod {
    /// root sum of squares. Magnitude only
    SumOfSquares,
    /// per-pixel dominant eigenvector of the local channel correlation
    Adaptive,
}

/// Tuning for the adaptive combination. The patch is the square neighbourhood of `2r + 1` pixels
/// on a side, cut short at the image borders.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveCombineParams {
    pub patch_radius: usize,
    pub power_iterations: usize,
}

impl Default for AdaptiveCombineParams {
    fn default() -> Self {
        Self {
            patch_radius: 2,
            power_iterations: 3,
        }
    }
}

/// Combines the `nchan` planes of `n x n` pixels in `images` into the single plane `combined`
pub fn combine(method: CombineMethod, params: &AdaptiveCombineParams, n: usize, nchan: usize, images: &[Complex32], combined: &mut [Complex32]) {
    match method {
        CombineMethod::SumOfSquares => sum_of_squares(n, nchan, images, combined),
        CombineMethod::Adaptive => adaptive_combine(params, n, nchan, images, combined),
    }
}

fn check_sizes(n: usize, nchan: usize, images: &[Complex32], combined: &[Complex32]) {
    assert!(nchan > 0 && nchan <= MAX_CHANNELS, "channel count must be in 1..={MAX_CHANNELS}");
    assert_eq!(images.len(), nchan * n * n, "unexpected channel image length");
    assert_eq!(combined.len(), n * n, "unexpected combined image length");
}

/// `sqrt(sum_c |v_c|^2)` per pixel with zero phase. A single channel is copied through unchanged
pub fn sum_of_squares(n: usize, nchan: usize, images: &[Complex32], combined: &mut [Complex32]) {
    check_sizes(n, nchan, images, combined);
    if nchan == 1 {
        combined.copy_from_slice(images);
        return;
    }
    let plane_len = n * n;
    combined.par_iter_mut().enumerate().for_each(|(i, out)| {
        let energy = (0..nchan).map(|c| images[i + c * plane_len].norm_sqr()).sum::<f32>();
        *out = Complex32::new(energy.sqrt(), 0.);
    });
}

/// Adaptive combination. For every pixel the channel correlation matrix `R = sum v v^H` is
/// accumulated over the surrounding patch, its dominant eigenvector `u` is estimated by power
/// iteration from the all-ones vector, and the pixel is projected onto it as `sum_c conj(u_c) v_c`.
/// Pixels whose patch carries no energy are zero. A single channel is copied through unchanged.
pub fn adaptive_combine(params: &AdaptiveCombineParams, n: usize, nchan: usize, images: &[Complex32], combined: &mut [Complex32]) {
    check_sizes(n, nchan, images, combined);
    if nchan == 1 {
        combined.copy_from_slice(images);
        return;
    }
    let plane_len = n * n;
    // a patch never needs to reach past the image
    let r = params.patch_radius.min(n);

    combined.par_iter_mut().enumerate().for_each(|(i, out)| {
        let x = i % n;
        let y = i / n;
        let mut corr = [Complex32::ZERO; MAX_CHANNELS * MAX_CHANNELS];
        let corr = &mut corr[..nchan * nchan];
        let mut v = [Complex32::ZERO; MAX_CHANNELS];
        let v = &mut v[..nchan];

        for py in y.saturating_sub(r)..=(y + r).min(n - 1) {
            for px in x.saturating_sub(r)..=(x + r).min(n - 1) {
                let idx = px + n * py;
                v.iter_mut().enumerate().for_each(|(c, vc)| *vc = images[idx + c * plane_len]);
                // col-maj: corr[a + nchan * b] = v_a conj(v_b)
                for b in 0..nchan {
                    let vb = v[b].conj();
                    for a in 0..nchan {
                        corr[a + nchan * b] += v[a] * vb;
                    }
                }
            }
        }

        *out = match dominant_eigenvector(nchan, corr, params.power_iterations, v) {
            Some(lambda) if lambda > 0. => (0..nchan).map(|c| v[c].conj() * images[i + c * plane_len]).sum(),
            _ => Complex32::ZERO,
        };
    });
}

/// Power iteration on the hermitian `nchan x nchan` matrix `a` starting from the all-ones vector.
/// Leaves the unit-norm estimate in `u` and returns its Rayleigh quotient, or `None` if the
/// iterate collapses to zero.
fn dominant_eigenvector(nchan: usize, a: &[Complex32], iterations: usize, u: &mut [Complex32]) -> Option<f32> {
    let mut w = [Complex32::ZERO; MAX_CHANNELS];
    let w = &mut w[..nchan];

    u.fill(Complex32::new(1., 0.));
    if !normalize(u) {
        return None;
    }
    for _ in 0..iterations {
        mat_vec(nchan, a, u, w);
        u.copy_from_slice(w);
        if !normalize(u) {
            return None;
        }
    }
    mat_vec(nchan, a, u, w);
    let lambda: Complex32 = u.iter().zip(w.iter()).map(|(ui, wi)| ui.conj() * wi).sum();
    Some(lambda.re)
}

fn mat_vec(nchan: usize, a: &[Complex32], x: &[Complex32], y: &mut [Complex32]) {
    y.iter_mut().enumerate().for_each(|(row, yi)| {
        *yi = (0..nchan).map(|col| a[row + nchan * col] * x[col]).sum();
    });
}

fn normalize(x: &mut [Complex32]) -> bool {
    let norm = x.iter().map(|v| v.norm_sqr()).sum::<f32>().sqrt();
    if norm > 0. && norm.is_finite() {
        x.iter_mut().for_each(|v| *v /= norm);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smooth_magnitude(n: usize) -> Vec<f32> {
        (0..n * n)
            .map(|i| {
                let x = (i % n) as f32 - n as f32 / 2.;
                let y = (i / n) as f32 - n as f32 / 2.;
                1. + (-(x * x + y * y) / 20.).exp()
            })
            .collect()
    }

    #[test]
    fn single_channel_is_identity() {
        let n = 4;
        let img = (0..n * n).map(|i| Complex32::new(i as f32, -(i as f32))).collect::<Vec<_>>();
        let mut out = vec![Complex32::ZERO; n * n];
        for method in [CombineMethod::SumOfSquares, CombineMethod::Adaptive] {
            combine(method, &AdaptiveCombineParams::default(), n, 1, &img, &mut out);
            assert_eq!(out, img);
        }
    }

    #[test]
    fn sum_of_squares_values() {
        let n = 2;
        let mut img = vec![Complex32::ZERO; 2 * n * n];
        img[0] = Complex32::new(3., 0.);
        img[n * n] = Complex32::new(0., 4.);
        img[1] = Complex32::new(-1., 0.);
        let mut out = vec![Complex32::new(7., 7.); n * n];
        sum_of_squares(n, 2, &img, &mut out);
        assert_eq!(out[0], Complex32::new(5., 0.));
        assert_eq!(out[1], Complex32::new(1., 0.));
        assert_eq!(out[3], Complex32::ZERO);
    }

    #[test]
    fn adaptive_recovers_rank_one_magnitude() {
        let n = 12;
        let sens = [
            Complex32::new(1., 0.5),
            Complex32::new(0.6, -0.2),
            Complex32::new(0.3, 0.9),
            Complex32::new(0.8, 0.1),
        ];
        let mag = smooth_magnitude(n);
        let mut img = vec![Complex32::ZERO; 4 * n * n];
        img.chunks_exact_mut(n * n).zip(sens.iter()).for_each(|(plane, s)| {
            plane.iter_mut().zip(&mag).for_each(|(v, &m)| *v = *s * m);
        });

        let mut adaptive = vec![Complex32::ZERO; n * n];
        let mut sos = vec![Complex32::ZERO; n * n];
        adaptive_combine(&AdaptiveCombineParams::default(), n, 4, &img, &mut adaptive);
        sum_of_squares(n, 4, &img, &mut sos);

        let sens_norm = sens.iter().map(|s| s.norm_sqr()).sum::<f32>().sqrt();
        for i in 0..n * n {
            assert!((adaptive[i].norm() - sens_norm * mag[i]).abs() < 1e-3 * mag[i]);
            assert!((sos[i].re - adaptive[i].norm()).abs() < 1e-3 * mag[i]);
        }
        // the phase reference is shared by every pixel
        let phase = adaptive[0].arg();
        assert!(adaptive.iter().all(|v| (v.arg() - phase).abs() < 1e-3));
    }

    #[test]
    fn oversized_patch_covers_whole_image() {
        let n = 6;
        let img = (0..2 * n * n)
            .map(|i| Complex32::new((i as f32 * 0.7).sin(), (i as f32 * 0.3).cos()))
            .collect::<Vec<_>>();
        let mut whole = vec![Complex32::ZERO; n * n];
        let mut huge = vec![Complex32::ZERO; n * n];
        adaptive_combine(&AdaptiveCombineParams { patch_radius: n - 1, power_iterations: 3 }, n, 2, &img, &mut whole);
        adaptive_combine(&AdaptiveCombineParams { patch_radius: usize::MAX, power_iterations: 3 }, n, 2, &img, &mut huge);
        assert_eq!(whole, huge);
    }

    #[test]
    fn empty_patch_combines_to_zero() {
        let n = 8;
        let mut img = vec![Complex32::ZERO; 2 * n * n];
        img[0] = Complex32::new(1., 0.);
        img[n * n] = Complex32::new(0., 1.);
        let mut out = vec![Complex32::new(3., 3.); n * n];
        adaptive_combine(&AdaptiveCombineParams { patch_radius: 1, power_iterations: 2 }, n, 2, &img, &mut out);
        assert!(out[0].norm() > 0.);
        assert_eq!(out[n - 1 + n * (n - 1)], Complex32::ZERO);
    }
}
