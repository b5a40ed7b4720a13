use crate::Complex32;
use rayon::prelude::*;

fn coord_to_col_maj_index(coords: &[i32; 2], dims: &[usize; 2]) -> usize {
    let x = coords[0].rem_euclid(dims[0] as i32) as usize;
    let y = coords[1].rem_euclid(dims[1] as i32) as usize;
    x + dims[0] * y
}

/// circular shift of a single col-maj 2-D plane
fn circshift2_col_maj<T: Copy + Send + Sync>(dims: &[usize; 2], shift: &[i32; 2], data: &mut [T]) {
    assert_eq!(dims[0] * dims[1], data.len(), "dims and source size must agree");
    let result = (0..data.len())
        .into_par_iter()
        .map(|final_idx| {
            // reverse the shift to find the original source coordinate
            let x = (final_idx % dims[0]) as i32 - shift[0];
            let y = (final_idx / dims[0]) as i32 - shift[1];
            data[coord_to_col_maj_index(&[x, y], dims)]
        })
        .collect::<Vec<_>>();
    data.copy_from_slice(&result);
}

/// swaps diagonal quadrant pairs of an even-sized square plane in place
fn swap_quadrants<T: Copy>(n: usize, plane: &mut [T]) {
    let h = n / 2;
    for y in 0..h {
        for x in 0..n {
            // (x, y) in the lower half pairs with (x +- h, y + h) in the upper half
            let xs = (x + h) % n;
            plane.swap(x + n * y, xs + n * (y + h));
        }
    }
}

fn shift_planes<T: Copy + Send + Sync>(n: usize, data: &mut [T], shift: i32) {
    let plane_len = n * n;
    assert_eq!(data.len() % plane_len, 0, "data must hold a whole number of {n} x {n} planes");
    if n % 2 == 0 {
        data.par_chunks_exact_mut(plane_len).for_each(|plane| swap_quadrants(n, plane));
    } else {
        data.chunks_exact_mut(plane_len).for_each(|plane| circshift2_col_maj(&[n, n], &[shift, shift], plane));
    }
}

/// forward fft shift of a batch of square col-maj planes. Moves the zero frequency from index 0
/// to index n/2.
pub fn fftshift2<T: Copy + Send + Sync>(n: usize, data: &mut [T]) {
    shift_planes(n, data, (n / 2) as i32);
}

/// inverse fft shift of a batch of square col-maj planes. Moves index n/2 back to index 0.
pub fn ifftshift2<T: Copy + Send + Sync>(n: usize, data: &mut [T]) {
    shift_planes(n, data, ((n + 1) / 2) as i32);
}

/// offset of the centred `inner` region inside an `outer` sized plane. The centre pixels
/// `outer/2` and `inner/2` coincide.
#[inline]
pub fn centre_offset(outer: usize, inner: usize) -> usize {
    outer / 2 - inner / 2
}

/// extracts the centred `inner x inner` region of each `outer x outer` plane
pub fn crop_center(outer: usize, inner: usize, src: &[Complex32], dst: &mut [Complex32]) {
    assert!(inner <= outer, "crop size must not exceed plane size");
    let n_planes = src.len() / (outer * outer);
    assert_eq!(dst.len(), n_planes * inner * inner, "crop destination has unexpected length");
    let off = centre_offset(outer, inner);
    dst.par_chunks_exact_mut(inner * inner).zip(src.par_chunks_exact(outer * outer)).for_each(|(d, s)| {
        d.chunks_exact_mut(inner).enumerate().for_each(|(y, row)| {
            let start = off + outer * (y + off);
            row.copy_from_slice(&s[start..start + inner]);
        });
    });
}

/// embeds each `inner x inner` plane in the centre of a zero-filled `outer x outer` plane
pub fn pad_center(inner: usize, outer: usize, src: &[Complex32], dst: &mut [Complex32]) {
    assert!(inner <= outer, "pad size must not be smaller than plane size");
    let n_planes = src.len() / (inner * inner);
    assert_eq!(dst.len(), n_planes * outer * outer, "pad destination has unexpected length");
    let off = centre_offset(outer, inner);
    dst.par_chunks_exact_mut(outer * outer).zip(src.par_chunks_exact(inner * inner)).for_each(|(d, s)| {
        d.fill(Complex32::ZERO);
        s.chunks_exact(inner).enumerate().for_each(|(y, row)| {
            let start = off + outer * (y + off);
            d[start..start + inner].copy_from_slice(row);
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_wraps() {
        let dims = [256, 128];
        assert_eq!(coord_to_col_maj_index(&[0, -1], &dims), 256 * 127);
        assert_eq!(coord_to_col_maj_index(&[-1, 0], &dims), 255);
    }

    #[test]
    fn even_shift_moves_dc_to_centre() {
        let n = 8;
        let mut x = vec![0u32; 2 * n * n];
        x[0] = 1;
        x[n * n] = 2;
        fftshift2(n, &mut x);
        assert_eq!(x[n / 2 + n * (n / 2)], 1);
        assert_eq!(x[n * n + n / 2 + n * (n / 2)], 2);
        ifftshift2(n, &mut x);
        assert_eq!(x[0], 1);
        assert_eq!(x[n * n], 2);
    }

    #[test]
    fn quadrant_swap_matches_circshift() {
        let n = 6;
        let mut a = (0..n * n).collect::<Vec<usize>>();
        let mut b = a.clone();
        swap_quadrants(n, &mut a);
        circshift2_col_maj(&[n, n], &[3, 3], &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn odd_shift_round_trip() {
        let n = 5;
        let orig = (0..n * n).collect::<Vec<usize>>();
        let mut x = orig.clone();
        fftshift2(n, &mut x);
        assert_eq!(x[n / 2 + n * (n / 2)], 0);
        ifftshift2(n, &mut x);
        assert_eq!(x, orig);
    }

    #[test]
    fn crop_then_pad_keeps_centre() {
        let outer = 8;
        let inner = 4;
        let src = (0..outer * outer).map(|i| Complex32::new(i as f32, 0.)).collect::<Vec<_>>();
        let mut cropped = vec![Complex32::ZERO; inner * inner];
        crop_center(outer, inner, &src, &mut cropped);
        // centre pixel (4, 4) of the outer plane is (2, 2) of the inner plane
        assert_eq!(cropped[2 + inner * 2], src[4 + outer * 4]);
        let mut padded = vec![Complex32::new(9., 9.); outer * outer];
        pad_center(inner, outer, &cropped, &mut padded);
        assert_eq!(padded[4 + outer * 4], src[4 + outer * 4]);
        assert_eq!(padded[0], Complex32::ZERO);
        assert_eq!(padded[7 + outer * 7], Complex32::ZERO);
    }
}
