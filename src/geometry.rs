// Acquisition geometry and reconstruction plan
// derives the grid, image and readout sizes from the input array and user parameters, and
// computes where every readout sample of a profile lands on the oversampled grid

use crate::coil_combine::AdaptiveCombineParams;
use crate::kernel::{Kernel, KernelProfile};
use crate::params::RadialReconParams;
use crate::{ReconError, MAX_CHANNELS};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// golden angle increment between consecutive 2-D radial profiles (radians)
pub const GOLDEN_ANGLE: f64 = 1.9416089796736116;

/// 2-D golden means used to distribute 3-D radial profiles over the half sphere
const KOOSH_GOLDEN_MEANS: [f64; 2] = [0.4656, 0.6823];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// non-uniform samples to image (regridding)
    #[default]
    Adjoint,
    /// image to non-uniform samples (degridding)
    Forward,
}

/// How repetitions are cut out of the input array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameLayout {
    /// one continuous acquisition, each repetition is a window of profiles advanced by `dpe`
    SlidingWindow,
    /// every input repetition holds its own complete frame
    Stacked,
}

/// Per-profile geometry. The sample at readout index `r` sits at signed grid distance
/// `(r - nro/2) * sample_scale * inplane` from the grid centre along (cos, sin).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Profile {
    pub angle: f32,
    pub cos: f32,
    pub sin: f32,
    pub inplane: f32,
}

/// Immutable reconstruction plan, passed explicitly to every stage
#[derive(Debug, Clone, Serialize)]
pub struct ReconPlan {
    pub direction: Direction,
    pub layout: FrameLayout,
    pub nchan: usize,
    pub nrep: usize,
    pub nro: usize,
    /// profiles stored in the input (adjoint) or produced per repetition (forward)
    pub npe: usize,
    pub npe_per_frame: usize,
    pub dpe: usize,
    pub peskip: usize,
    /// distance in profile index between the first profiles of consecutive repetitions
    pub frame_stride: usize,
    pub ngrid: usize,
    pub nimg: usize,
    pub kernwidth: f32,
    pub grid_oversamp: f32,
    pub golden_angle: bool,
    pub post_compensate: bool,
    pub koosh: bool,
    pub kernel_profile: KernelProfile,
    pub adaptive_combine: AdaptiveCombineParams,
    /// dimensions of the host input array
    pub input_dims: [usize; 4],
}

impl ReconPlan {
    /// Derive a plan from user parameters and the input array dimensions. Input dims are
    /// `[nchan, nrep, nro, npe]` for the adjoint direction and `[nchan, nrep, nx, ny]` for the
    /// forward direction.
    pub fn derive(params: &RadialReconParams, input_dims: [usize; 4]) -> Result<Self, ReconError> {
        if input_dims.iter().any(|&d| d == 0) {
            return Err(ReconError::InvalidGeometry(format!("input array has an empty dimension: {input_dims:?}")));
        }
        if !params.kernel_width.is_finite() || params.kernel_width < 0. {
            return Err(ReconError::InvalidGeometry(format!("kernel width must be non-negative, got {}", params.kernel_width)));
        }
        let [nchan, nrep_in, n2, n3] = input_dims;

        let plan = match params.direction {
            Direction::Adjoint => {
                let nro = n2;
                let npe = n3;
                if !params.grid_oversamp.is_finite() || params.grid_oversamp < 1. {
                    return Err(ReconError::InvalidGeometry(format!("grid oversampling must be at least 1, got {}", params.grid_oversamp)));
                }
                let ngrid = (nro as f32 * params.grid_oversamp).round() as usize;
                let nimg = nro / 2;

                let (layout, npe_per_frame, dpe, nrep) = match (nrep_in, params.pe_per_frame) {
                    (1, Some(npe_per_frame)) => {
                        let dpe = params.pe_stride;
                        if dpe == 0 || npe_per_frame == 0 {
                            return Err(ReconError::InvalidGeometry("profile stride and profiles per frame must be positive".to_string()));
                        }
                        let nrep = npe.saturating_sub(npe_per_frame) / dpe;
                        if nrep < 1 {
                            return Err(ReconError::NoRepetitions { npe, npe_per_frame, dpe });
                        }
                        (FrameLayout::SlidingWindow, npe_per_frame, dpe, nrep)
                    }
                    (_, Some(npe_per_frame)) if npe_per_frame != npe => {
                        return Err(ReconError::InvalidGeometry(format!(
                            "stacked input holds {npe} profiles per repetition but {npe_per_frame} were requested"
                        )));
                    }
                    _ => (FrameLayout::Stacked, npe, npe, nrep_in),
                };

                ReconPlan {
                    direction: Direction::Adjoint,
                    layout,
                    nchan,
                    nrep,
                    nro,
                    npe,
                    npe_per_frame,
                    dpe,
                    peskip: params.pe_skip,
                    frame_stride: dpe,
                    ngrid,
                    nimg,
                    kernwidth: params.kernel_width,
                    grid_oversamp: params.grid_oversamp,
                    golden_angle: params.golden_angle,
                    post_compensate: params.post_compensate,
                    koosh: params.koosh,
                    kernel_profile: params.kernel_profile,
                    adaptive_combine: params.adaptive_combine,
                    input_dims,
                }
            }
            Direction::Forward => {
                if n2 != n3 {
                    return Err(ReconError::InvalidGeometry(format!("forward input must be square, got {n2} x {n3}")));
                }
                let nimg = n2;
                let nro = 2 * nimg;
                let npe_per_frame = params
                    .pe_per_frame
                    .unwrap_or_else(|| (0.5 * PI * nro as f64).ceil() as usize);
                if npe_per_frame == 0 {
                    return Err(ReconError::InvalidGeometry("profiles per frame must be positive".to_string()));
                }
                ReconPlan {
                    direction: Direction::Forward,
                    layout: FrameLayout::Stacked,
                    nchan,
                    nrep: nrep_in,
                    nro,
                    npe: npe_per_frame,
                    npe_per_frame,
                    dpe: npe_per_frame,
                    peskip: params.pe_skip,
                    frame_stride: npe_per_frame,
                    ngrid: nimg,
                    nimg,
                    kernwidth: params.kernel_width,
                    grid_oversamp: 1.,
                    golden_angle: params.golden_angle,
                    post_compensate: params.post_compensate,
                    koosh: params.koosh,
                    kernel_profile: params.kernel_profile,
                    adaptive_combine: params.adaptive_combine,
                    input_dims,
                }
            }
        };
        plan.validate()?;
        Ok(plan)
    }

    /// checks the plan invariants. Every size must be positive, the grid must hold the image and
    /// the channel count must be 1 or even.
    pub fn validate(&self) -> Result<(), ReconError> {
        if self.nchan != 1 && self.nchan % 2 != 0 {
            return Err(ReconError::OddChannelCount(self.nchan));
        }
        if self.nchan > MAX_CHANNELS {
            return Err(ReconError::TooManyChannels { nchan: self.nchan, max: MAX_CHANNELS });
        }
        let sizes = [
            ("nchan", self.nchan),
            ("nrep", self.nrep),
            ("nro", self.nro),
            ("npe_per_frame", self.npe_per_frame),
            ("ngrid", self.ngrid),
            ("nimg", self.nimg),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, n)| *n == 0) {
            return Err(ReconError::InvalidGeometry(format!("{name} must be positive")));
        }
        if self.ngrid < self.nimg {
            return Err(ReconError::InvalidGeometry(format!(
                "grid size {} is smaller than image size {}",
                self.ngrid, self.nimg
            )));
        }
        if !self.kernwidth.is_finite() || self.kernwidth < 0. {
            return Err(ReconError::InvalidGeometry(format!("kernel width must be non-negative, got {}", self.kernwidth)));
        }
        Ok(())
    }

    pub fn kernel(&self) -> Kernel {
        Kernel::new(self.kernel_profile, self.kernwidth, self.grid_oversamp)
    }

    /// grid units per readout sample
    pub fn sample_scale(&self) -> f32 {
        self.ngrid as f32 / self.nro as f32
    }

    /// samples in one frame of non-uniform data
    pub fn nonuniform_len(&self) -> usize {
        self.nchan * self.nro * self.npe_per_frame
    }

    pub fn grid_len(&self) -> usize {
        self.nchan * self.ngrid * self.ngrid
    }

    pub fn image_len(&self) -> usize {
        self.nchan * self.nimg * self.nimg
    }

    /// global profile index of line `pe` in repetition `rep`
    pub fn profile_index(&self, rep: usize, pe: usize) -> usize {
        rep * self.frame_stride + pe
    }

    /// Geometry of line `pe` in repetition `rep`. Angles follow the acquisition index, so a stored
    /// profile has the same geometry in every sliding window that reads it. Uniform profiles
    /// repeat with a period of one frame, which keeps every window a complete half-turn set.
    pub fn profile(&self, rep: usize, pe: usize) -> Profile {
        let index = self.profile_index(rep, pe) + self.peskip;
        let g = index as f64;
        let (angle, inplane) = if self.koosh {
            let z = (g * KOOSH_GOLDEN_MEANS[0]).fract();
            let azimuth = 2. * PI * (g * KOOSH_GOLDEN_MEANS[1]).fract();
            (azimuth, (1. - z * z).max(0.).sqrt())
        } else if self.golden_angle {
            ((GOLDEN_ANGLE * g).rem_euclid(2. * PI), 1.)
        } else {
            let period = self.npe_per_frame;
            ((index % period) as f64 * PI / period as f64, 1.)
        };
        Profile {
            angle: angle as f32,
            cos: angle.cos() as f32,
            sin: angle.sin() as f32,
            inplane: inplane as f32,
        }
    }

    /// fills the profile table for one repetition
    pub fn fill_profiles(&self, rep: usize, profiles: &mut [Profile]) {
        assert_eq!(profiles.len(), self.npe_per_frame, "profile table must have one entry per line");
        profiles.iter_mut().enumerate().for_each(|(pe, p)| *p = self.profile(rep, pe));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjoint_params(npe_per_frame: usize, dpe: usize) -> RadialReconParams {
        RadialReconParams {
            pe_per_frame: Some(npe_per_frame),
            pe_stride: dpe,
            grid_oversamp: 2.0,
            kernel_width: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn sliding_window_sizes() {
        let plan = ReconPlan::derive(&adjoint_params(64, 21), [2, 1, 128, 200]).unwrap();
        assert_eq!(plan.ngrid, 256);
        assert_eq!(plan.nimg, 64);
        assert_eq!(plan.nrep, 6);
        assert_eq!(plan.layout, FrameLayout::SlidingWindow);
        assert_eq!(plan.profile_index(2, 5), 2 * 21 + 5);
        assert_eq!(plan.sample_scale(), 2.0);
    }

    #[test]
    fn stacked_input() {
        let params = RadialReconParams::default();
        let plan = ReconPlan::derive(&params, [4, 3, 64, 100]).unwrap();
        assert_eq!(plan.layout, FrameLayout::Stacked);
        assert_eq!(plan.nrep, 3);
        assert_eq!(plan.npe_per_frame, 100);
        assert_eq!(plan.profile_index(1, 0), 100);
    }

    #[test]
    fn forward_sizes() {
        let params = RadialReconParams {
            direction: Direction::Forward,
            pe_per_frame: Some(50),
            ..Default::default()
        };
        let plan = ReconPlan::derive(&params, [2, 4, 32, 32]).unwrap();
        assert_eq!(plan.nimg, 32);
        assert_eq!(plan.nro, 64);
        assert_eq!(plan.ngrid, 32);
        assert_eq!(plan.grid_oversamp, 1.0);
        assert_eq!(plan.nrep, 4);
        assert_eq!(plan.sample_scale(), 0.5);
        assert!(ReconPlan::derive(&params, [2, 4, 32, 16]).is_err());
    }

    #[test]
    fn configuration_errors() {
        assert_eq!(
            ReconPlan::derive(&adjoint_params(64, 21), [3, 1, 128, 200]).unwrap_err(),
            ReconError::OddChannelCount(3)
        );
        assert!(ReconPlan::derive(&adjoint_params(64, 21), [1, 1, 128, 200]).is_ok());
        assert!(matches!(
            ReconPlan::derive(&adjoint_params(64, 200), [2, 1, 128, 200]),
            Err(ReconError::NoRepetitions { .. })
        ));
        assert!(matches!(
            ReconPlan::derive(&adjoint_params(300, 1), [2, 1, 128, 200]),
            Err(ReconError::NoRepetitions { .. })
        ));
        assert!(matches!(
            ReconPlan::derive(&adjoint_params(64, 21), [64, 1, 128, 200]),
            Err(ReconError::TooManyChannels { .. })
        ));
        let mut params = adjoint_params(64, 21);
        params.kernel_width = -1.;
        assert!(ReconPlan::derive(&params, [2, 1, 128, 200]).unwrap_err().is_configuration());
    }

    #[test]
    fn uniform_angles_cover_half_turn() {
        let plan = ReconPlan::derive(&adjoint_params(64, 21), [2, 1, 128, 200]).unwrap();
        assert_eq!(plan.profile(0, 0).angle, 0.);
        assert!((plan.profile(0, 63).angle - 63. * std::f32::consts::PI / 64.).abs() < 1e-6);
        // any window of one frame holds every angle of the half turn exactly once
        let mut profiles = vec![Profile::default(); 64];
        plan.fill_profiles(3, &mut profiles);
        let mut steps = profiles
            .iter()
            .map(|p| (p.angle * 64. / std::f32::consts::PI).round() as usize)
            .collect::<Vec<_>>();
        steps.sort();
        assert_eq!(steps, (0..64).collect::<Vec<_>>());
    }

    #[test]
    fn stored_profile_keeps_its_angle_across_windows() {
        for golden_angle in [false, true] {
            let mut params = adjoint_params(64, 21);
            params.golden_angle = golden_angle;
            let plan = ReconPlan::derive(&params, [2, 1, 128, 200]).unwrap();
            assert_eq!(plan.profile(0, 21), plan.profile(1, 0));
            assert_eq!(plan.profile(1, 50), plan.profile(3, 8));
        }
    }

    #[test]
    fn stacked_repetitions_share_uniform_angles() {
        let params = RadialReconParams {
            pe_skip: 5,
            ..Default::default()
        };
        let plan = ReconPlan::derive(&params, [2, 3, 64, 100]).unwrap();
        for pe in [0, 17, 99] {
            assert_eq!(plan.profile(0, pe), plan.profile(2, pe));
            assert!(plan.profile(2, pe).angle < std::f32::consts::PI);
        }
        assert_eq!(plan.profile(0, 95).angle, 0.);
    }

    #[test]
    fn golden_angles_wrap() {
        let mut params = adjoint_params(64, 21);
        params.golden_angle = true;
        params.pe_skip = 10;
        let plan = ReconPlan::derive(&params, [2, 1, 128, 200]).unwrap();
        let p = plan.profile(1, 2);
        let expected = (GOLDEN_ANGLE * (21. + 2. + 10.)).rem_euclid(2. * PI) as f32;
        assert!((p.angle - expected).abs() < 1e-5);
        assert!(p.angle >= 0. && p.angle < 2. * std::f32::consts::PI);
    }

    #[test]
    fn koosh_projection_shrinks_profiles() {
        let mut params = adjoint_params(64, 21);
        params.koosh = true;
        let plan = ReconPlan::derive(&params, [2, 1, 128, 200]).unwrap();
        let mut profiles = vec![Profile::default(); 64];
        plan.fill_profiles(0, &mut profiles);
        assert!(profiles.iter().all(|p| p.inplane > 0. && p.inplane <= 1.));
        assert!(profiles.iter().any(|p| p.inplane < 0.99));
    }
}
