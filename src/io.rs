// cfl array boundary and run summaries

use crate::engine::ReconOutput;
use crate::geometry::ReconPlan;
use crate::pipeline::Pipeline;
use crate::{Complex32, ReconError};
use cfl::ndarray::{ArrayD, ShapeBuilder};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Reads a cfl array as a flat col-maj buffer with four dimensions. Missing trailing dimensions
/// are 1; arrays with more than four non-singleton dimensions are rejected.
pub fn read_cfl(path: impl AsRef<Path>) -> Result<(Vec<Complex32>, [usize; 4]), ReconError> {
    let path = path.as_ref();
    let array = cfl::to_array(path, true).map_err(|e| ReconError::Io(format!("failed to read {}: {e:?}", path.display())))?;

    let shape = array.shape();
    if shape.iter().skip(4).any(|&d| d != 1) {
        return Err(ReconError::Io(format!("{} has more than 4 dimensions: {shape:?}", path.display())));
    }
    let mut dims = [1usize; 4];
    dims.iter_mut().zip(shape).for_each(|(d, &s)| *d = s);

    // cfl arrays are col-maj, so memory order is the flat layout we need
    let data = match array.as_slice_memory_order() {
        Some(s) => s.iter().map(|x| Complex32::new(x.re, x.im)).collect(),
        None => array.t().iter().map(|x| Complex32::new(x.re, x.im)).collect(),
    };
    Ok((data, dims))
}

/// Writes a flat col-maj buffer as a cfl array
pub fn write_cfl(path: impl AsRef<Path>, data: &[Complex32], dims: &[usize; 4]) -> Result<(), ReconError> {
    let path = path.as_ref();
    if data.len() != dims.iter().product::<usize>() {
        return Err(ReconError::Io(format!("buffer of {} samples does not match dims {dims:?}", data.len())));
    }
    let mut array = ArrayD::<cfl::num_complex::Complex32>::zeros(dims.as_slice().f());
    let dst = array
        .as_slice_memory_order_mut()
        .ok_or_else(|| ReconError::Io("output array is not contiguous".to_string()))?;
    dst.iter_mut().zip(data).for_each(|(d, s)| *d = cfl::num_complex::Complex32::new(s.re, s.im));
    cfl::from_array(path, &array).map_err(|e| ReconError::Io(format!("failed to write {}: {e:?}", path.display())))
}

/// Description of a finished run, written as json next to the output array
#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub plan: &'a ReconPlan,
    pub pipeline: String,
    pub output_dims: [usize; 4],
    pub lanes: usize,
    pub devices: usize,
    pub elapsed_secs: f32,
}

impl<'a> RunSummary<'a> {
    pub fn new(plan: &'a ReconPlan, pipeline: &Pipeline, output: &ReconOutput, lanes: usize, devices: usize, elapsed_secs: f32) -> Self {
        Self {
            plan,
            pipeline: pipeline.to_string(),
            output_dims: output.dims,
            lanes,
            devices,
            elapsed_secs,
        }
    }

    /// writes the summary to `path` with a json extension
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), ReconError> {
        let path = path.as_ref().with_extension("json");
        let s = serde_json::to_string_pretty(self).map_err(|e| ReconError::Io(format!("failed to serialize run summary: {e}")))?;
        let mut f = File::create(&path).map_err(|e| ReconError::Io(format!("failed to create {}: {e}", path.display())))?;
        f.write_all(s.as_bytes())
            .map_err(|e| ReconError::Io(format!("failed to write {}: {e}", path.display())))
    }
}
