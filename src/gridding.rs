// Convolution gridding between radial samples and the oversampled Cartesian grid
//
// Non-uniform frames are laid out as [nchan, nro, npe] and grids as nchan planes of
// [ngrid, ngrid], both col-maj. The regridder is written as a gather over destination grid points
// so that every point is computed independently; angular rejection keeps the per-point cost close
// to the handful of profiles that actually pass near it.

use crate::array_utils::deinterleave;
use crate::density::post_compensate;
use crate::geometry::{Profile, ReconPlan};
use crate::kernel::Kernel;
use crate::{Complex32, MAX_CHANNELS};
use rayon::prelude::*;
use std::f32::consts::{FRAC_PI_2, PI};

/// added to the angular acceptance window so that lines exactly at the kernel edge are never lost
/// to rounding
const ANGLE_SLACK: f32 = 1e-5;

/// plan constants shared by both gridding directions
#[derive(Debug, Clone, Copy)]
pub struct Gridder {
    nchan: usize,
    nro: usize,
    ngrid: usize,
    /// grid index of the k-space origin
    centre: f32,
    /// readout index of the k-space origin
    half_ro: f32,
    /// grid units per readout sample
    scale: f32,
    width: f32,
    kernel: Kernel,
    /// inverse kernel footprint sum, applied to every interpolated value
    gain: f32,
    post_compensate: bool,
}

impl Gridder {
    pub fn new(plan: &ReconPlan) -> Self {
        let kernel = plan.kernel();
        Self {
            nchan: plan.nchan,
            nro: plan.nro,
            ngrid: plan.ngrid,
            centre: (plan.ngrid / 2) as f32,
            half_ro: (plan.nro / 2) as f32,
            scale: plan.sample_scale(),
            width: plan.kernwidth,
            kernel,
            gain: 1. / kernel.footprint_sum(),
            post_compensate: plan.post_compensate,
        }
    }

    /// Computes all channels of grid point (x, y) from one frame of samples. `out` must hold
    /// `nchan` values and is fully overwritten.
    pub(crate) fn regrid_point(&self, profiles: &[Profile], samples: &[Complex32], x: usize, y: usize, out: &mut [Complex32]) {
        let nchan = self.nchan;
        let mut accum = [Complex32::ZERO; MAX_CHANNELS];
        let accum = &mut accum[..nchan];

        let dx = x as f32 - self.centre;
        let dy = y as f32 - self.centre;
        let rho = (dx * dx + dy * dy).sqrt();

        // nearest sample that could reach this point is beyond the end of every readout
        if (rho - self.width) / self.scale > self.half_ro {
            out.fill(Complex32::ZERO);
            return;
        }

        let alpha = dy.atan2(dx);
        // every line through the origin passes within rho of the point
        let tolerance = if rho <= self.width {
            FRAC_PI_2
        } else {
            self.width.atan2((rho * rho - self.width * self.width).sqrt()) + ANGLE_SLACK
        };

        let line_len = nchan * self.nro;
        let mut weight_sum = 0f32;

        for (pe, profile) in profiles.iter().enumerate() {
            // angular distance to the line, either half of it
            let d = (alpha - profile.angle).rem_euclid(PI);
            if d.min(PI - d) > tolerance {
                continue;
            }
            let step = self.scale * profile.inplane;
            if step <= 0. {
                continue;
            }
            // signed projection onto the profile. Negative values walk the antiparallel half
            let projection = dx * profile.cos + dy * profile.sin;
            let r_centre = self.half_ro + projection / step;
            let reach = self.width / step;
            let r_hi = (r_centre + reach).floor();
            if r_hi < 0. {
                continue;
            }
            let r_lo = (r_centre - reach).ceil().max(0.) as usize;
            let r_hi = (r_hi as usize).min(self.nro - 1);

            let line = &samples[pe * line_len..(pe + 1) * line_len];
            for r in r_lo..=r_hi {
                let s = (r as f32 - self.half_ro) * step;
                let ex = s * profile.cos - dx;
                let ey = s * profile.sin - dy;
                let w = self.kernel.weight(ex * ex + ey * ey);
                if w <= 0. {
                    continue;
                }
                weight_sum += w;
                let sample = &line[r * nchan..(r + 1) * nchan];
                accum.iter_mut().zip(sample).for_each(|(a, &v)| *a += v * w);
            }
        }

        if self.post_compensate {
            post_compensate(accum, weight_sum);
        } else {
            accum.iter_mut().for_each(|a| *a *= self.gain);
        }
        out.copy_from_slice(accum);
    }

    /// Interpolates all channels of readout sample `r` on `profile` from the grid planes
    pub(crate) fn degrid_sample(&self, profile: &Profile, grid: &[Complex32], r: usize, out: &mut [Complex32]) {
        let nchan = self.nchan;
        let n = self.ngrid;
        let plane_len = n * n;
        let mut accum = [Complex32::ZERO; MAX_CHANNELS];
        let accum = &mut accum[..nchan];

        let s = (r as f32 - self.half_ro) * self.scale * profile.inplane;
        let kx = self.centre + s * profile.cos;
        let ky = self.centre + s * profile.sin;

        let bounds = |k: f32| -> Option<(usize, usize)> {
            let hi = (k + self.width).floor();
            let lo = (k - self.width).ceil().max(0.);
            if hi < 0. || lo > (n - 1) as f32 {
                return None;
            }
            Some((lo as usize, (hi as usize).min(n - 1)))
        };

        if let (Some((x_lo, x_hi)), Some((y_lo, y_hi))) = (bounds(kx), bounds(ky)) {
            for y in y_lo..=y_hi {
                let ey = y as f32 - ky;
                for x in x_lo..=x_hi {
                    let ex = x as f32 - kx;
                    let w = self.kernel.weight(ex * ex + ey * ey);
                    if w <= 0. {
                        continue;
                    }
                    let idx = x + n * y;
                    accum.iter_mut().enumerate().for_each(|(c, a)| *a += grid[c * plane_len + idx] * w);
                }
            }
        }
        out.iter_mut().zip(accum.iter()).for_each(|(o, &a)| *o = a * self.gain);
    }
}

/// Regrids one frame of non-uniform samples onto the oversampled grid. Points are computed into
/// the interleaved `[nchan, ngrid, ngrid]` scratch buffer row by row in parallel and then split
/// into per-channel planes for the transform stage.
pub fn regrid(gridder: &Gridder, profiles: &[Profile], samples: &[Complex32], scratch: &mut [Complex32], grid: &mut [Complex32]) {
    let nchan = gridder.nchan;
    let n = gridder.ngrid;
    assert_eq!(samples.len(), nchan * gridder.nro * profiles.len(), "sample buffer does not match the profile table");
    assert_eq!(scratch.len(), nchan * n * n, "unexpected scratch length");
    assert_eq!(grid.len(), nchan * n * n, "unexpected grid length");

    scratch.par_chunks_exact_mut(nchan * n).enumerate().for_each(|(y, row)| {
        row.chunks_exact_mut(nchan).enumerate().for_each(|(x, out)| {
            gridder.regrid_point(profiles, samples, x, y, out);
        });
    });

    deinterleave(nchan, scratch, grid);
}

/// Interpolates one frame of non-uniform samples from the per-channel grid planes
pub fn degrid(gridder: &Gridder, profiles: &[Profile], grid: &[Complex32], samples: &mut [Complex32]) {
    let nchan = gridder.nchan;
    let nro = gridder.nro;
    assert_eq!(samples.len(), nchan * nro * profiles.len(), "sample buffer does not match the profile table");
    assert_eq!(grid.len(), nchan * gridder.ngrid * gridder.ngrid, "unexpected grid length");

    samples.par_chunks_exact_mut(nchan * nro).zip(profiles.par_iter()).for_each(|(line, profile)| {
        line.chunks_exact_mut(nchan).enumerate().for_each(|(r, out)| {
            gridder.degrid_sample(profile, grid, r, out);
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::RadialReconParams;

    fn small_plan(golden: bool, post_compensate: bool, kernel_width: f32) -> ReconPlan {
        let params = RadialReconParams {
            pe_per_frame: Some(24),
            pe_stride: 8,
            golden_angle: golden,
            post_compensate,
            kernel_width,
            ..Default::default()
        };
        ReconPlan::derive(&params, [2, 1, 32, 40]).unwrap()
    }

    fn test_samples(plan: &ReconPlan) -> Vec<Complex32> {
        (0..plan.nonuniform_len())
            .map(|i| Complex32::new((i as f32 * 0.731).sin(), (i as f32 * 0.197).cos()))
            .collect()
    }

    fn profiles(plan: &ReconPlan) -> Vec<Profile> {
        let mut p = vec![Profile::default(); plan.npe_per_frame];
        plan.fill_profiles(0, &mut p);
        p
    }

    #[test]
    fn zero_outside_support() {
        let plan = small_plan(false, false, 2.0);
        let gridder = Gridder::new(&plan);
        let samples = vec![Complex32::new(1., 1.); plan.nonuniform_len()];
        let mut out = [Complex32::new(5., 5.); 2];
        gridder.regrid_point(&profiles(&plan), &samples, 0, 0, &mut out);
        assert_eq!(out, [Complex32::ZERO; 2]);
        // a point on the first profile picks up signal
        gridder.regrid_point(&profiles(&plan), &samples, plan.ngrid / 2 + 4, plan.ngrid / 2, &mut out);
        assert!(out[0].norm() > 0.);
    }

    #[test]
    fn empty_neighbourhood_keeps_raw_accumulation() {
        // a narrow kernel leaves points between profiles without any contributing sample
        let plan = small_plan(false, true, 0.1);
        let gridder = Gridder::new(&plan);
        let samples = test_samples(&plan);
        let mut out = [Complex32::new(5., 5.); 2];
        let c = plan.ngrid / 2;
        gridder.regrid_point(&profiles(&plan), &samples, c + 5, c + 1, &mut out);
        assert_eq!(out, [Complex32::ZERO; 2]);
        assert!(out.iter().all(|v| v.re.is_finite() && v.im.is_finite()));
    }

    #[test]
    fn post_compensation_interpolates_constant_data() {
        let plan = small_plan(true, true, 2.0);
        let gridder = Gridder::new(&plan);
        let samples = vec![Complex32::new(2., -1.); plan.nonuniform_len()];
        let mut out = [Complex32::ZERO; 2];
        let c = plan.ngrid / 2;
        gridder.regrid_point(&profiles(&plan), &samples, c + 1, c + 2, &mut out);
        assert!((out[0] - Complex32::new(2., -1.)).norm() < 1e-4);
        assert!((out[1] - Complex32::new(2., -1.)).norm() < 1e-4);
    }

    #[test]
    fn regrid_is_adjoint_of_degrid() {
        let plan = small_plan(true, false, 2.0);
        let gridder = Gridder::new(&plan);
        let profiles = profiles(&plan);
        let samples = test_samples(&plan);

        let mut scratch = vec![Complex32::ZERO; plan.grid_len()];
        let mut gridded = vec![Complex32::ZERO; plan.grid_len()];
        regrid(&gridder, &profiles, &samples, &mut scratch, &mut gridded);

        let grid = (0..plan.grid_len())
            .map(|i| Complex32::new((i as f32 * 0.013).cos(), (i as f32 * 0.029).sin()))
            .collect::<Vec<_>>();
        let mut degridded = vec![Complex32::ZERO; plan.nonuniform_len()];
        degrid(&gridder, &profiles, &grid, &mut degridded);

        let lhs: Complex32 = degridded.iter().zip(&samples).map(|(a, b)| a * b.conj()).sum();
        let rhs: Complex32 = grid.iter().zip(&gridded).map(|(a, b)| a * b.conj()).sum();
        assert!((lhs - rhs).norm() <= 1e-3 * lhs.norm().max(1.), "<Ax, y> = {lhs}, <x, A^H y> = {rhs}");
    }

    #[test]
    fn degrid_preserves_constant_grid() {
        let plan = small_plan(false, false, 2.0);
        let gridder = Gridder::new(&plan);
        let profiles = profiles(&plan);
        let grid = vec![Complex32::new(1.5, -0.5); plan.grid_len()];
        let mut out = [Complex32::ZERO; 2];
        gridder.degrid_sample(&profiles[0], &grid, plan.nro / 2 + 1, &mut out);
        for v in out {
            assert!((v - Complex32::new(1.5, -0.5)).norm() < 1e-5, "unit gain expected, got {v}");
        }
    }

    #[test]
    fn degrid_on_grid_point_returns_kernel_weighted_value() {
        let plan = small_plan(false, false, 0.0);
        let gridder = Gridder::new(&plan);
        let profiles = profiles(&plan);
        let n = plan.ngrid;
        let mut grid = vec![Complex32::ZERO; plan.grid_len()];
        // first profile lies along +x; readout sample nro/2 + 1 lands 2 grid units from the centre
        let idx = (n / 2 + 2) + n * (n / 2);
        grid[idx] = Complex32::new(3., 0.);
        grid[n * n + idx] = Complex32::new(0., 4.);
        let mut out = [Complex32::ZERO; 2];
        gridder.degrid_sample(&profiles[0], &grid, plan.nro / 2 + 1, &mut out);
        assert_eq!(out, [Complex32::new(3., 0.), Complex32::new(0., 4.)]);
    }
}
