use crate::fft::{Fft2Plan, FftDirection, NormalizationType};
use crate::fftshift::{centre_offset, fftshift2};
use crate::geometry::ReconPlan;
use crate::kernel::Kernel;
use crate::Complex32;
use rayon::prelude::*;
use tracing::debug;

/// normalized roll-off values at or below this level are not corrected
const APOD_THRESHOLD: f32 = 0.01;

/// Builds the roll-off correction image for a plan. The kernel footprint is placed at the corners
/// of an oversampled grid (the transform origin), inverse transformed and centred. Its normalized
/// magnitude is inverted, giving a `nimg x nimg` image of values >= 1 that undoes the smoothing of
/// the gridding kernel. This runs once per plan, synchronously, before any lane starts.
pub fn apodization_image(plan: &ReconPlan) -> Vec<f32> {
    let kernel = plan.kernel();
    let ngrid = plan.ngrid;
    let mut footprint = vec![Complex32::ZERO; ngrid * ngrid];
    place_footprint(&kernel, ngrid, &mut footprint);

    let fft = Fft2Plan::new(ngrid);
    fft.execute_batch(&mut footprint, FftDirection::Inverse, NormalizationType::None);
    fftshift2(ngrid, &mut footprint);

    let mut roll_off = footprint.par_iter().map(|x| x.norm()).collect::<Vec<f32>>();
    let peak = roll_off.iter().cloned().fold(0f32, f32::max);
    debug!(ngrid, peak, "kernel roll-off computed");

    roll_off.par_iter_mut().for_each(|x| {
        let normalized = if peak > 0. { *x / peak } else { 0. };
        *x = if normalized > APOD_THRESHOLD { 1. / normalized } else { 1. };
    });

    crop_real(ngrid, plan.nimg, &roll_off)
}

/// writes kernel weights for all integer offsets within the support, wrapping negative offsets
/// to the far edges of the grid
fn place_footprint(kernel: &Kernel, ngrid: usize, grid: &mut [Complex32]) {
    let reach = kernel.width().floor() as i64;
    let n = ngrid as i64;
    for j in -reach..=reach {
        for i in -reach..=reach {
            let w = kernel.weight((i * i + j * j) as f32);
            if w > 0. {
                let idx = i.rem_euclid(n) + n * j.rem_euclid(n);
                grid[idx as usize] += Complex32::new(w, 0.);
            }
        }
    }
}

fn crop_real(outer: usize, inner: usize, src: &[f32]) -> Vec<f32> {
    let off = centre_offset(outer, inner);
    let mut dst = vec![0f32; inner * inner];
    dst.chunks_exact_mut(inner).enumerate().for_each(|(y, row)| {
        let start = off + outer * (y + off);
        row.copy_from_slice(&src[start..start + inner]);
    });
    dst
}

/// multiplies every `nimg x nimg` plane of `image` by the correction image
pub fn deapodize(apod: &[f32], image: &mut [Complex32]) {
    assert_eq!(image.len() % apod.len(), 0, "image planes and apodization image sizes disagree");
    image.par_chunks_exact_mut(apod.len()).for_each(|plane| {
        plane.iter_mut().zip(apod).for_each(|(x, &a)| *x *= a);
    });
}
