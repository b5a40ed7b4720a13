use crate::coil_combine::AdaptiveCombineParams;
use crate::geometry::Direction;
use crate::kernel::KernelProfile;
use crate::pipeline::Pipeline;
use crate::ReconError;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// User-facing reconstruction parameters. These are written to and read from a toml file by the
/// `radial-recon-params` and `radial-recon` binaries. Array sizes are not part of the parameters;
/// they come from the input array and are combined with these values in [crate::ReconPlan::derive].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadialReconParams {
    /// adjoint (regrid samples to an image) or forward (degrid an image to samples)
    pub direction: Direction,
    /// profiles are rotated by the golden angle instead of spread uniformly over a half turn
    pub golden_angle: bool,
    /// 3-D radial (koosh ball) profiles, reconstructed as the central transverse slice
    pub koosh: bool,
    /// kernel support radius in oversampled grid units
    pub kernel_width: f32,
    pub kernel_profile: KernelProfile,
    /// grid oversampling ratio, ignored in the forward direction
    pub grid_oversamp: f32,
    /// number of profiles discarded before the first stored profile
    pub pe_skip: usize,
    /// profile stride between repetitions for sliding-window reconstructions
    pub pe_stride: usize,
    /// profiles per frame. Required for sliding-window reconstructions
    pub pe_per_frame: Option<usize>,
    /// normalize regridded points by their accumulated kernel weight
    pub post_compensate: bool,
    /// number of concurrent execution lanes
    pub lanes: usize,
    /// number of compute devices lanes are spread over
    pub devices: usize,
    /// custom stage sequence. The direction's default pipeline is used if this is not set
    pub pipeline: Option<String>,
    pub adaptive_combine: AdaptiveCombineParams,
}

impl Default for RadialReconParams {
    fn default() -> Self {
        Self {
            direction: Direction::Adjoint,
            golden_angle: false,
            koosh: false,
            kernel_width: 2.0,
            kernel_profile: KernelProfile::Gaussian,
            grid_oversamp: 2.0,
            pe_skip: 0,
            pe_stride: 1,
            pe_per_frame: None,
            post_compensate: false,
            lanes: 2,
            devices: 1,
            pipeline: None,
            adaptive_combine: AdaptiveCombineParams::default(),
        }
    }
}

impl RadialReconParams {
    /// reads parameters from a toml file. The extension is forced to `.toml`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ReconError> {
        let path = path.as_ref().with_extension("toml");
        let mut toml_str = String::new();
        File::open(&path)
            .and_then(|mut f| f.read_to_string(&mut toml_str))
            .map_err(|e| ReconError::Io(format!("failed to open config file {}: {e}", path.display())))?;
        toml::from_str(&toml_str).map_err(|e| ReconError::Io(format!("failed to parse {}: {e}", path.display())))
    }

    /// writes parameters as toml and returns the path written
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<PathBuf, ReconError> {
        let path = path.as_ref().with_extension("toml");
        let mut toml_string = toml::to_string(self).map_err(|e| ReconError::Io(format!("can't serialize parameters: {e}")))?;
        toml_string.push('\n');
        File::create(&path)
            .and_then(|mut f| f.write_all(toml_string.as_bytes()))
            .map_err(|e| ReconError::Io(format!("can't write {}: {e}", path.display())))?;
        Ok(path)
    }

    /// the configured stage sequence, or the default one for the direction
    pub fn pipeline(&self) -> Result<Pipeline, ReconError> {
        Pipeline::from_option(self.pipeline.as_deref(), self.direction)
    }
}
