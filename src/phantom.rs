// Synthetic test objects
// images, receiver sensitivities and noisy multi-channel data for simulation and testing

use crate::Complex32;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::f32::consts::PI;

/// axis-aligned-then-rotated ellipse in normalized image coordinates (-1..1)
#[derive(Debug, Clone, Copy)]
struct Ellipse {
    intensity: f32,
    semi_axes: [f32; 2],
    centre: [f32; 2],
    rotation_deg: f32,
}

/// modified Shepp-Logan head phantom
const SHEPP_LOGAN: [Ellipse; 10] = [
    Ellipse { intensity: 1.0, semi_axes: [0.69, 0.92], centre: [0., 0.], rotation_deg: 0. },
    Ellipse { intensity: -0.8, semi_axes: [0.6624, 0.874], centre: [0., -0.0184], rotation_deg: 0. },
    Ellipse { intensity: -0.2, semi_axes: [0.11, 0.31], centre: [0.22, 0.], rotation_deg: -18. },
    Ellipse { intensity: -0.2, semi_axes: [0.16, 0.41], centre: [-0.22, 0.], rotation_deg: 18. },
    Ellipse { intensity: 0.1, semi_axes: [0.21, 0.25], centre: [0., 0.35], rotation_deg: 0. },
    Ellipse { intensity: 0.1, semi_axes: [0.046, 0.046], centre: [0., 0.1], rotation_deg: 0. },
    Ellipse { intensity: 0.1, semi_axes: [0.046, 0.046], centre: [0., -0.1], rotation_deg: 0. },
    Ellipse { intensity: 0.1, semi_axes: [0.046, 0.023], centre: [-0.08, -0.605], rotation_deg: 0. },
    Ellipse { intensity: 0.1, semi_axes: [0.023, 0.023], centre: [0., -0.606], rotation_deg: 0. },
    Ellipse { intensity: 0.1, semi_axes: [0.023, 0.046], centre: [0.06, -0.605], rotation_deg: 0. },
];

#[inline]
fn normalized_coord(i: usize, n: usize) -> f32 {
    (i as f32 - (n / 2) as f32) / (n as f32 / 2.)
}

/// `n x n` Shepp-Logan phantom, col-maj
pub fn shepp_logan(n: usize) -> Vec<Complex32> {
    let mut img = vec![Complex32::ZERO; n * n];
    img.par_iter_mut().enumerate().for_each(|(i, px)| {
        let x = normalized_coord(i % n, n);
        let y = normalized_coord(i / n, n);
        let value = SHEPP_LOGAN
            .iter()
            .filter(|e| {
                let (s, c) = (e.rotation_deg * PI / 180.).sin_cos();
                let dx = x - e.centre[0];
                let dy = y - e.centre[1];
                let u = (dx * c + dy * s) / e.semi_axes[0];
                let v = (-dx * s + dy * c) / e.semi_axes[1];
                u * u + v * v <= 1.
            })
            .map(|e| e.intensity)
            .sum::<f32>();
        *px = Complex32::new(value, 0.);
    });
    img
}

/// smooth centred gaussian blob with standard deviation `sigma` pixels and unit peak
pub fn gaussian_blob(n: usize, sigma: f32) -> Vec<Complex32> {
    let c = (n / 2) as f32;
    (0..n * n)
        .map(|i| {
            let x = (i % n) as f32 - c;
            let y = (i / n) as f32 - c;
            Complex32::new((-(x * x + y * y) / (2. * sigma * sigma)).exp(), 0.)
        })
        .collect()
}

/// Smooth receiver sensitivities for `nchan` coils spaced evenly around the object. Returned as
/// `nchan` planes of `n x n`. Each coil has a gaussian magnitude fall-off and a slow phase ramp.
pub fn coil_sensitivities(n: usize, nchan: usize) -> Vec<Complex32> {
    let mut sens = vec![Complex32::ZERO; nchan * n * n];
    sens.par_chunks_exact_mut(n * n).enumerate().for_each(|(ch, plane)| {
        let phi = 2. * PI * ch as f32 / nchan as f32;
        let (cx, cy) = (1.5 * phi.cos(), 1.5 * phi.sin());
        plane.iter_mut().enumerate().for_each(|(i, s)| {
            let x = normalized_coord(i % n, n);
            let y = normalized_coord(i / n, n);
            let d2 = (x - cx) * (x - cx) + (y - cy) * (y - cy);
            let mag = (-d2 / 2.).exp();
            let phase = 0.5 * (x * phi.cos() + y * phi.sin()) + phi;
            *s = Complex32::from_polar(mag, phase);
        });
    });
    sens
}

/// Weights `image` by every coil sensitivity, giving the `[nchan, n, n]` channel-interleaved
/// layout expected as one repetition of forward input
pub fn multi_channel(image: &[Complex32], sensitivities: &[Complex32], nchan: usize) -> Vec<Complex32> {
    let npix = image.len();
    assert_eq!(sensitivities.len(), nchan * npix, "sensitivities must hold one plane per channel");
    let mut out = vec![Complex32::ZERO; nchan * npix];
    out.par_chunks_exact_mut(nchan).enumerate().for_each(|(i, px)| {
        px.iter_mut().enumerate().for_each(|(c, v)| *v = image[i] * sensitivities[i + c * npix]);
    });
    out
}

/// Adds circular complex gaussian noise with standard deviation `sigma` per component.
/// The same seed always produces the same noise.
pub fn add_noise(data: &mut [Complex32], sigma: f32, seed: u64) {
    if sigma <= 0. {
        return;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    data.iter_mut().for_each(|x| {
        // box-muller
        let u1: f32 = rng.random::<f32>().max(f32::MIN_POSITIVE);
        let u2: f32 = rng.random();
        let r = sigma * (-2. * u1.ln()).sqrt();
        let theta = 2. * PI * u2;
        *x += Complex32::new(r * theta.cos(), r * theta.sin());
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phantom_values() {
        let n = 64;
        let img = shepp_logan(n);
        // background outside the skull
        assert_eq!(img[0], Complex32::ZERO);
        // brain tissue near the centre
        let centre = img[n / 2 + n * (n / 2 - 8)];
        assert!((centre.re - 0.2).abs() < 1e-5, "unexpected centre value {centre}");
    }

    #[test]
    fn coils_are_smooth_and_distinct() {
        let n = 16;
        let sens = coil_sensitivities(n, 4);
        assert_eq!(sens.len(), 4 * n * n);
        assert!(sens.iter().all(|s| s.norm() > 0. && s.norm() <= 1.));
        assert_ne!(sens[0], sens[n * n]);
    }

    #[test]
    fn noise_is_seeded() {
        let mut a = vec![Complex32::ZERO; 1000];
        let mut b = a.clone();
        add_noise(&mut a, 0.5, 7);
        add_noise(&mut b, 0.5, 7);
        assert_eq!(a, b);
        let var = a.iter().map(|x| x.re * x.re).sum::<f32>() / a.len() as f32;
        assert!((var - 0.25).abs() < 0.05, "noise variance {var}");
    }

    #[test]
    fn channels_are_interleaved() {
        let img = vec![Complex32::new(2., 0.); 4];
        let sens = (0..8).map(|i| Complex32::new(i as f32, 0.)).collect::<Vec<_>>();
        let mc = multi_channel(&img, &sens, 2);
        assert_eq!(mc[0], Complex32::new(0., 0.));
        assert_eq!(mc[1], Complex32::new(8., 0.));
        assert_eq!(mc[2], Complex32::new(2., 0.));
    }
}
