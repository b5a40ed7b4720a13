// Array utilities for column-major memory layouts

use rayon::prelude::*;

#[inline(always)]
pub fn index_to_subscript_col_maj2(index: usize, size: &[usize; 2]) -> [usize; 2] {
    [index % size[0], index / size[0]]
}

#[inline(always)]
pub fn subscript_to_index_col_maj4(subscript: &[usize; 4], size: &[usize; 4]) -> usize {
    let [i0, i1, i2, i3] = *subscript;
    i0 + size[0] * (i1 + size[1] * (i2 + size[2] * i3))
}

/// Copies one slab of a 4-D col-major array `[n0, n1, n2, n3]` into a contiguous buffer laid out as
/// `[n0, n2, n3_len]`. The slab is fixed at index `i1` of the second dimension and covers
/// `i3_start..i3_start + n3_len` of the last. This is used to stage a single repetition (or a
/// window of phase encodes) out of an interleaved host array.
pub fn gather_slab<T: Copy>(src: &[T], size: &[usize; 4], i1: usize, i3_start: usize, n3_len: usize, dst: &mut [T]) {
    let [n0, n1, n2, n3] = *size;
    assert!(i1 < n1, "slab index out of range");
    assert!(i3_start + n3_len <= n3, "slab range exceeds array dimension");
    assert_eq!(dst.len(), n0 * n2 * n3_len, "destination buffer has unexpected length");
    dst.chunks_exact_mut(n0).enumerate().for_each(|(idx, run)| {
        let i2 = idx % n2;
        let i3 = i3_start + idx / n2;
        let start = subscript_to_index_col_maj4(&[0, i1, i2, i3], size);
        run.copy_from_slice(&src[start..start + n0]);
    });
}

/// Inverse of [gather_slab] for a full-length last dimension: scatters a contiguous `[n0, n2, n3]`
/// buffer back into a 4-D col-major array at index `i1` of the second dimension.
pub fn scatter_slab<T: Copy>(src: &[T], size: &[usize; 4], i1: usize, dst: &mut [T]) {
    let [n0, n1, n2, n3] = *size;
    assert!(i1 < n1, "slab index out of range");
    assert_eq!(src.len(), n0 * n2 * n3, "source buffer has unexpected length");
    src.chunks_exact(n0).enumerate().for_each(|(idx, run)| {
        let start = subscript_to_index_col_maj4(&[0, i1, idx % n2, idx / n2], size);
        dst[start..start + n0].copy_from_slice(run);
    });
}

/// Splits a channel-interleaved `[nchan, npix]` buffer into `nchan` contiguous planes of `npix`
pub fn deinterleave<T: Copy + Send + Sync>(nchan: usize, src: &[T], dst: &mut [T]) {
    assert_eq!(src.len(), dst.len(), "source and destination lengths differ");
    assert_eq!(src.len() % nchan, 0, "buffer does not hold whole channels");
    let npix = src.len() / nchan;
    dst.par_chunks_exact_mut(npix).enumerate().for_each(|(c, plane)| {
        plane.iter_mut().enumerate().for_each(|(i, v)| *v = src[c + nchan * i]);
    });
}

/// Inverse of [deinterleave]. Channel planes are written back with channel varying fastest
pub fn interleave<T: Copy + Send + Sync>(nchan: usize, src: &[T], dst: &mut [T]) {
    assert_eq!(src.len(), dst.len(), "source and destination lengths differ");
    assert_eq!(src.len() % nchan, 0, "buffer does not hold whole channels");
    let size = [nchan, src.len() / nchan];
    dst.par_iter_mut().enumerate().for_each(|(i, v)| {
        let [c, pix] = index_to_subscript_col_maj2(i, &size);
        *v = src[pix + size[1] * c];
    });
}
