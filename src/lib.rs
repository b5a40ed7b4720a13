pub mod apodization;
mod array_utils;
pub mod coil_combine;
pub mod density;
pub mod engine;
pub mod fft;
pub mod fftshift;
pub mod geometry;
pub mod gridding;
pub mod io;
pub mod kernel;
pub mod params;
pub mod phantom;
pub mod pipeline;

use std::fmt;

pub use engine::{ExecutionEngine, ReconOutput};
pub use geometry::{Direction, ReconPlan};
pub use params::RadialReconParams;
pub use pipeline::{Pipeline, Stage};
pub use rustfft::num_complex::Complex32;

/// Upper bound on receiver channels. Per-pixel scratch in the gridding and combination kernels is
/// stack allocated with this length.
pub const MAX_CHANNELS: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconError {
    /// dimensions or flags that cannot describe a valid reconstruction
    InvalidGeometry(String),
    /// engine or pipeline settings outside their valid range
    InvalidParameter(String),
    /// channel count must be 1 or even
    OddChannelCount(usize),
    TooManyChannels { nchan: usize, max: usize },
    /// the requested frame layout leaves no complete repetition
    NoRepetitions { npe: usize, npe_per_frame: usize, dpe: usize },
    UnknownStage(String),
    /// a stage was asked to run on data it does not accept
    StageMismatch { stage: String, domain: String },
    /// thread pool or lane start-up failure
    Resource(String),
    /// a lane failed while executing a stage
    Lane { lane: usize, message: String },
    Io(String),
}

impl ReconError {
    /// true for errors that are detected before any lane resource is allocated
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ReconError::InvalidGeometry(_)
                | ReconError::InvalidParameter(_)
                | ReconError::OddChannelCount(_)
                | ReconError::TooManyChannels { .. }
                | ReconError::NoRepetitions { .. }
                | ReconError::UnknownStage(_)
                | ReconError::StageMismatch { .. }
        )
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconError::InvalidGeometry(msg) => write!(f, "invalid geometry: {msg}"),
            ReconError::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            ReconError::OddChannelCount(n) => write!(f, "channel count must be 1 or even, got {n}"),
            ReconError::TooManyChannels { nchan, max } => {
                write!(f, "{nchan} channels exceeds the supported maximum of {max}")
            }
            ReconError::NoRepetitions { npe, npe_per_frame, dpe } => write!(
                f,
                "no complete repetition fits in {npe} phase encodes with {npe_per_frame} per frame and stride {dpe}"
            ),
            ReconError::UnknownStage(token) => write!(f, "unknown pipeline stage '{token}'"),
            ReconError::StageMismatch { stage, domain } => {
                write!(f, "stage '{stage}' cannot be applied to {domain} data")
            }
            ReconError::Resource(msg) => write!(f, "resource error: {msg}"),
            ReconError::Lane { lane, message } => write!(f, "lane {lane} failed: {message}"),
            ReconError::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl std::error::Error for ReconError {}
