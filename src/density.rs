use crate::geometry::ReconPlan;
use crate::Complex32;
use rayon::prelude::*;
use std::f32::consts::PI;

/// Analytic density ramp for one readout index: `a * |r - nro/2| + b` with `a = (2 - 2/npe)/nro`
/// and `b = 1/npe`. This approximates the inverse sampling density of uniformly spaced radial
/// profiles. `npe` is the number of profiles in one frame.
#[inline]
pub fn ramp_weight(r: usize, nro: usize, npe: usize) -> f32 {
    let npe = npe as f32;
    let a = (2. - 2. / npe) / nro as f32;
    let b = 1. / npe;
    let dr = (r as f32 - (nro / 2) as f32).abs();
    a * dr + b
}

/// Converts the ramp, which is 1 at the end of a readout, into the k-space area a sample covers
/// measured in grid cells and scaled by `nimg / ngrid`. With this scale, regrid followed by the
/// inverse transform, crop and deapodization returns an adequately sampled image at unit gain.
pub fn density_scale(plan: &ReconPlan) -> f32 {
    let (ngrid, nimg, nro) = (plan.ngrid as f32, plan.nimg as f32, plan.nro as f32);
    PI * ngrid * nimg / (2. * plan.npe_per_frame as f32 * nro)
}

/// Applies the density ramp in place to one frame of non-uniform data laid out as
/// `[nchan, nro, npe_per_frame]`
pub fn pre_compensate(plan: &ReconPlan, samples: &mut [Complex32]) {
    let nchan = plan.nchan;
    let nro = plan.nro;
    assert_eq!(samples.len(), plan.nonuniform_len(), "unexpected non-uniform buffer length");
    let scale = density_scale(plan);
    let weights = (0..nro).map(|r| scale * ramp_weight(r, nro, plan.npe_per_frame)).collect::<Vec<f32>>();
    samples.par_chunks_exact_mut(nchan * nro).for_each(|line| {
        line.chunks_exact_mut(nchan).zip(weights.iter()).for_each(|(sample, &w)| {
            sample.iter_mut().for_each(|x| *x *= w);
        });
    });
}

/// Post-compensation of one regridded point. The accumulated values are divided by the total
/// kernel weight when it is positive. Points with no contributing weight keep their raw value.
#[inline]
pub fn post_compensate(accum: &mut [Complex32], weight_sum: f32) {
    if weight_sum > 0. {
        let scale = 1. / weight_sum;
        accum.iter_mut().for_each(|x| *x *= scale);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::RadialReconParams;

    #[test]
    fn ramp_is_monotone_in_distance_from_centre() {
        let nro = 128;
        let npe = 64;
        let mut by_distance = (0..nro)
            .map(|r| ((r as i64 - nro as i64 / 2).unsigned_abs(), ramp_weight(r, nro, npe)))
            .collect::<Vec<_>>();
        by_distance.sort_by_key(|(d, _)| *d);
        by_distance.windows(2).for_each(|w| assert!(w[1].1 >= w[0].1));
        assert!((ramp_weight(nro / 2, nro, npe) - 1. / npe as f32).abs() < 1e-7);
    }

    #[test]
    fn frame_is_scaled_per_readout_index() {
        let params = RadialReconParams { pe_per_frame: Some(4), pe_stride: 2, ..Default::default() };
        let plan = ReconPlan::derive(&params, [2, 1, 8, 12]).unwrap();
        let mut samples = vec![Complex32::new(1., -1.); plan.nonuniform_len()];
        pre_compensate(&plan, &mut samples);
        // ngrid 16, nimg 4, nro 8, 4 profiles per frame
        let scale = density_scale(&plan);
        assert!((scale - std::f32::consts::PI).abs() < 1e-6);
        for pe in 0..4 {
            for r in 0..8 {
                let w = scale * ramp_weight(r, 8, 4);
                for c in 0..2 {
                    let x = samples[c + 2 * (r + 8 * pe)];
                    assert!((x - Complex32::new(w, -w)).norm() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn zero_weight_sum_leaves_raw_accumulation() {
        let mut accum = [Complex32::new(0.5, 0.25), Complex32::new(-1., 2.)];
        let raw = accum;
        post_compensate(&mut accum, 0.);
        assert_eq!(accum, raw);
        post_compensate(&mut accum, 2.);
        assert_eq!(accum[0], Complex32::new(0.25, 0.125));
    }
}
