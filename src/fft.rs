use crate::fftshift::{fftshift2, ifftshift2};
use crate::Complex32;
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftDirection {
    Forward,
    Inverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizationType {
    None,
    Inverse,
    Unitary,
}

impl Default for NormalizationType {
    fn default() -> Self {
        NormalizationType::Inverse
    }
}

impl NormalizationType {
    fn scale(&self, n_elements: usize, direction: FftDirection) -> Option<f32> {
        match self {
            NormalizationType::Inverse => match direction {
                FftDirection::Inverse => Some((1. / n_elements as f64) as f32),
                FftDirection::Forward => None,
            },
            NormalizationType::Unitary => Some((1. / (n_elements as f64).sqrt()) as f32),
            NormalizationType::None => None,
        }
    }
}

/// Square 2-D c2c transform plan. The plan owns both directions and is reused for every batch of
/// planes of the same size, so each execution lane creates its plans once at start-up.
pub struct Fft2Plan {
    n: usize,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Fft2Plan {
    pub fn new(n: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);
        Self { n, forward, inverse }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// perform a batched 2-D fft on contiguous col-maj planes of size n x n, where the batch
    /// (channel) dimension varies the slowest
    pub fn execute_batch(&self, data: &mut [Complex32], direction: FftDirection, norm: NormalizationType) {
        let n = self.n;
        let plane_len = n * n;
        assert_eq!(data.len() % plane_len, 0, "data layout and data length inconsistency");

        let fft = match direction {
            FftDirection::Forward => &self.forward,
            FftDirection::Inverse => &self.inverse,
        };
        let scratch_len = fft.get_inplace_scratch_len();
        let scale = norm.scale(plane_len, direction);

        data.par_chunks_exact_mut(plane_len).for_each_init(
            || (vec![Complex32::ZERO; scratch_len], vec![Complex32::ZERO; plane_len]),
            |(scratch, transposed), plane| {
                // rows are contiguous, every n-length chunk is transformed
                fft.process_with_scratch(plane, scratch);
                transpose(n, plane, transposed);
                fft.process_with_scratch(transposed, scratch);
                transpose(n, transposed, plane);
                if let Some(s) = scale {
                    plane.iter_mut().for_each(|x| *x *= s);
                }
            },
        );
    }
}

fn transpose(n: usize, src: &[Complex32], dst: &mut [Complex32]) {
    for y in 0..n {
        for x in 0..n {
            dst[y + n * x] = src[x + n * y];
        }
    }
}

/// centered batched 2-D fft. The zero frequency (and image origin) is at index n/2 in both
/// dimensions before and after the transform.
pub fn fft2c_batch(plan: &Fft2Plan, data: &mut [Complex32], direction: FftDirection, norm: NormalizationType) {
    ifftshift2(plan.n(), data);
    plan.execute_batch(data, direction, norm);
    fftshift2(plan.n(), data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fft_consistency() {
        let n = 16;
        let plan = Fft2Plan::new(n);
        let x = (0..2 * n * n)
            .map(|i| Complex32::new((i % 7) as f32, (i % 3) as f32 - 1.))
            .collect::<Vec<_>>();
        let mut y = x.clone();
        plan.execute_batch(&mut y, FftDirection::Forward, NormalizationType::default());
        plan.execute_batch(&mut y, FftDirection::Inverse, NormalizationType::default());
        let err = x.iter().zip(&y).map(|(a, b)| (a - b).norm()).fold(0f32, f32::max);
        assert!(err < 1e-4, "fft consistency failed: max error {err}");
    }

    #[test]
    fn centered_impulse_is_flat() {
        let n = 8;
        let plan = Fft2Plan::new(n);
        let mut x = vec![Complex32::ZERO; n * n];
        x[n / 2 + n * (n / 2)] = Complex32::new(1., 0.);
        fft2c_batch(&plan, &mut x, FftDirection::Forward, NormalizationType::Unitary);
        let expected = 1. / n as f32;
        assert!(x.iter().all(|v| (v - Complex32::new(expected, 0.)).norm() < 1e-6));
    }

    #[test]
    fn unitary_preserves_energy() {
        let n = 32;
        let plan = Fft2Plan::new(n);
        let x = (0..n * n).map(|i| Complex32::new((i as f32 * 0.37).sin(), (i as f32 * 0.11).cos())).collect::<Vec<_>>();
        let mut y = x.clone();
        fft2c_batch(&plan, &mut y, FftDirection::Inverse, NormalizationType::Unitary);
        let ex = x.iter().map(|v| v.norm_sqr()).sum::<f32>();
        let ey = y.iter().map(|v| v.norm_sqr()).sum::<f32>();
        assert!((ex - ey).abs() / ex < 1e-4);
    }
}
