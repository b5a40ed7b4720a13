use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Gaussian fall-off constant. The weight at the edge of the support is exp(-3), which keeps the
/// truncation step small while leaving enough width for 2x oversampled grids.
const GAUSSIAN_FALLOFF: f32 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelProfile {
    #[default]
    Gaussian,
    KaiserBessel,
}

/// Radially symmetric interpolation kernel with compact support, evaluated on squared distance.
/// The same kernel is used for regridding, degridding and building the apodization correction.
#[derive(Debug, Clone, Copy)]
pub struct Kernel {
    profile: KernelProfile,
    width: f32,
    width_sq: f32,
    /// gaussian exponent scale or kaiser-bessel beta
    shape: f32,
    /// 1 / I0(beta) for the kaiser-bessel profile
    norm: f32,
}

impl Kernel {
    /// `width` is the support radius in grid units and `oversamp` the grid oversampling ratio
    pub fn new(profile: KernelProfile, width: f32, oversamp: f32) -> Self {
        let width_sq = width * width;
        let (shape, norm) = match profile {
            KernelProfile::Gaussian => {
                let shape = if width_sq > 0. { GAUSSIAN_FALLOFF / width_sq } else { 0. };
                (shape, 1.)
            }
            KernelProfile::KaiserBessel => {
                let beta = kaiser_bessel_beta(2. * width, oversamp);
                (beta, 1. / bessel_i0(beta))
            }
        };
        Self { profile, width, width_sq, shape, norm }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn profile(&self) -> KernelProfile {
        self.profile
    }

    /// Sum of the weights at every integer grid offset inside the support. This is the gain of
    /// the kernel at zero frequency on the grid, and the peak of its roll-off.
    pub fn footprint_sum(&self) -> f32 {
        let reach = self.width.floor() as i64;
        (-reach..=reach)
            .flat_map(|j| (-reach..=reach).map(move |i| (i * i + j * j) as f32))
            .map(|r2| self.weight(r2))
            .sum()
    }

    /// kernel weight at squared distance `r2`. Zero outside the support radius
    #[inline]
    pub fn weight(&self, r2: f32) -> f32 {
        if self.width_sq <= 0. {
            return if r2 <= 0. { 1. } else { 0. };
        }
        if r2 > self.width_sq {
            return 0.;
        }
        match self.profile {
            KernelProfile::Gaussian => (-self.shape * r2).exp(),
            KernelProfile::KaiserBessel => {
                let arg = (1. - r2 / self.width_sq).max(0.).sqrt();
                bessel_i0(self.shape * arg) * self.norm
            }
        }
    }
}

/// beta parameter for a kaiser-bessel kernel of full width `w` on a grid oversampled by `alpha`
/// (Beatty et al. 2005)
fn kaiser_bessel_beta(w: f32, alpha: f32) -> f32 {
    let t = (w / alpha) * (alpha - 0.5);
    PI * (t * t - 0.8).max(0.).sqrt()
}

/// zeroth order modified bessel function of the first kind, evaluated from its power series
fn bessel_i0(x: f32) -> f32 {
    let half = 0.5 * x as f64;
    let mut term = 1f64;
    let mut sum = 1f64;
    let mut k = 1f64;
    while term > sum * 1e-10 {
        term *= (half / k) * (half / k);
        sum += term;
        k += 1.;
    }
    sum as f32
}
