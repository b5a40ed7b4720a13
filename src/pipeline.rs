// Stage sequences
// a pipeline is parsed once from a token string and type-checked against the kind of data each
// stage consumes and produces, so that nothing is allocated for a sequence that cannot run

use crate::coil_combine::CombineMethod;
use crate::geometry::Direction;
use crate::ReconError;
use std::fmt;

pub const DEFAULT_ADJOINT: &str = "dgicsx";
pub const DEFAULT_FORWARD: &str = "xpfr";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PreCompensate,
    Regrid,
    Degrid,
    InverseFft,
    ForwardFft,
    Crop,
    Pad,
    Combine(CombineMethod),
    Deapodize,
}

/// Kind of data held by a lane between stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    /// one frame of radial samples `[nchan, nro, npe_per_frame]`
    NonUniform,
    /// channel planes of the oversampled grid
    Grid,
    /// channel planes of the final image size
    Image,
    /// single combined image plane
    Combined,
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Domain::NonUniform => "non-uniform",
            Domain::Grid => "grid",
            Domain::Image => "image",
            Domain::Combined => "combined image",
        };
        f.write_str(s)
    }
}

impl Domain {
    /// domain of the data a lane is handed before the first stage
    pub fn initial(direction: Direction) -> Self {
        match direction {
            Direction::Adjoint => Domain::NonUniform,
            Direction::Forward => Domain::Image,
        }
    }
}

const STAGES: [Stage; 10] = [
    Stage::PreCompensate,
    Stage::Regrid,
    Stage::Degrid,
    Stage::InverseFft,
    Stage::ForwardFft,
    Stage::Crop,
    Stage::Pad,
    Stage::Combine(CombineMethod::SumOfSquares),
    Stage::Combine(CombineMethod::Adaptive),
    Stage::Deapodize,
];

impl Stage {
    pub fn word(&self) -> &'static str {
        match self {
            Stage::PreCompensate => "precomp",
            Stage::Regrid => "regrid",
            Stage::Degrid => "degrid",
            Stage::InverseFft => "ifft",
            Stage::ForwardFft => "fft",
            Stage::Crop => "crop",
            Stage::Pad => "pad",
            Stage::Combine(CombineMethod::SumOfSquares) => "sos",
            Stage::Combine(CombineMethod::Adaptive) => "adaptive",
            Stage::Deapodize => "deapod",
        }
    }

    pub fn symbol(&self) -> char {
        match self {
            Stage::PreCompensate => 'd',
            Stage::Regrid => 'g',
            Stage::Degrid => 'r',
            Stage::InverseFft => 'i',
            Stage::ForwardFft => 'f',
            Stage::Crop => 'c',
            Stage::Pad => 'p',
            Stage::Combine(CombineMethod::SumOfSquares) => 's',
            Stage::Combine(CombineMethod::Adaptive) => 'a',
            Stage::Deapodize => 'x',
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        STAGES.iter().copied().find(|s| s.word() == word)
    }

    fn from_symbol(symbol: char) -> Option<Self> {
        STAGES.iter().copied().find(|s| s.symbol() == symbol)
    }

    /// domain produced by this stage from `input`, or a mismatch error
    pub fn output_domain(&self, input: Domain) -> Result<Domain, ReconError> {
        let out = match (self, input) {
            (Stage::PreCompensate, Domain::NonUniform) => Domain::NonUniform,
            (Stage::Regrid, Domain::NonUniform) => Domain::Grid,
            (Stage::Degrid, Domain::Grid) => Domain::NonUniform,
            (Stage::InverseFft | Stage::ForwardFft, Domain::Grid) => Domain::Grid,
            (Stage::InverseFft | Stage::ForwardFft, Domain::Image) => Domain::Image,
            (Stage::Crop, Domain::Grid) => Domain::Image,
            (Stage::Pad, Domain::Image) => Domain::Grid,
            (Stage::Combine(_), Domain::Image) => Domain::Combined,
            (Stage::Deapodize, Domain::Image | Domain::Combined) => input,
            _ => {
                return Err(ReconError::StageMismatch {
                    stage: self.word().to_string(),
                    domain: input.to_string(),
                })
            }
        };
        Ok(out)
    }
}

/// Ordered stage sequence executed by every lane for every repetition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Parses a stage string. It is either a list of stage words separated by commas or
    /// whitespace, or a single run of stage symbols: "dgicsx" and
    /// "precomp, regrid, ifft, crop, sos, deapod" describe the same pipeline. In a list every
    /// token must be a word, so a misspelt word is reported rather than read as symbols.
    pub fn parse(s: &str) -> Result<Self, ReconError> {
        let tokens = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_ascii_lowercase())
            .collect::<Vec<_>>();
        let stages = match tokens.as_slice() {
            [] => return Err(ReconError::InvalidParameter("pipeline has no stages".to_string())),
            [token] if Stage::from_word(token).is_none() => token
                .chars()
                .map(|c| Stage::from_symbol(c).ok_or_else(|| ReconError::UnknownStage(c.to_string())))
                .collect::<Result<Vec<_>, _>>()?,
            _ => tokens
                .iter()
                .map(|t| Stage::from_word(t).ok_or_else(|| ReconError::UnknownStage(t.clone())))
                .collect::<Result<Vec<_>, _>>()?,
        };
        Ok(Self { stages })
    }

    pub fn default_for(direction: Direction) -> Self {
        let s = match direction {
            Direction::Adjoint => DEFAULT_ADJOINT,
            Direction::Forward => DEFAULT_FORWARD,
        };
        Self {
            stages: s.chars().filter_map(Stage::from_symbol).collect(),
        }
    }

    /// the user's pipeline string if there is one, otherwise the direction's default
    pub fn from_option(s: Option<&str>, direction: Direction) -> Result<Self, ReconError> {
        match s {
            Some(s) => Self::parse(s),
            None => Ok(Self::default_for(direction)),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Walks the domain of the lane data through every stage and returns the final domain
    pub fn check(&self, direction: Direction) -> Result<Domain, ReconError> {
        self.stages.iter().try_fold(Domain::initial(direction), |domain, stage| stage.output_domain(domain))
    }

    /// every stage paired with the domain of the data it receives
    pub fn steps(&self, direction: Direction) -> Result<Vec<(Stage, Domain)>, ReconError> {
        let mut domain = Domain::initial(direction);
        self.stages
            .iter()
            .map(|&stage| {
                let input = domain;
                domain = stage.output_domain(input)?;
                Ok((stage, input))
            })
            .collect()
    }

    pub fn uses(&self, pred: impl Fn(&Stage) -> bool) -> bool {
        self.stages.iter().any(pred)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.stages.iter().try_for_each(|s| write!(f, "{}", s.symbol()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_and_symbols_agree() {
        let a = Pipeline::parse("dgicsx").unwrap();
        let b = Pipeline::parse("precomp, regrid ifft,crop sos deapod").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, Pipeline::default_for(Direction::Adjoint));
        assert_eq!(a.to_string(), DEFAULT_ADJOINT);
        let c = Pipeline::parse("Regrid IFFT crop adaptive").unwrap();
        assert_eq!(c.stages(), &[Stage::Regrid, Stage::InverseFft, Stage::Crop, Stage::Combine(CombineMethod::Adaptive)]);
        assert_eq!(Pipeline::parse("deapod").unwrap().stages(), &[Stage::Deapodize]);
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert_eq!(Pipeline::parse("dgiqsx").unwrap_err(), ReconError::UnknownStage("q".to_string()));
        assert!(Pipeline::parse("regrid, sharpen").unwrap_err().is_configuration());
        assert!(Pipeline::parse(" , ").is_err());
        // a misspelt word in a list is not read as a run of symbols
        assert_eq!(Pipeline::parse("regrid, fix").unwrap_err(), ReconError::UnknownStage("fix".to_string()));
        assert_eq!(Pipeline::parse("precomp scar ifft").unwrap_err(), ReconError::UnknownStage("scar".to_string()));
        assert_eq!(Pipeline::parse("dg ic").unwrap_err(), ReconError::UnknownStage("dg".to_string()));
    }

    #[test]
    fn default_pipelines_type_check() {
        assert_eq!(Pipeline::default_for(Direction::Adjoint).check(Direction::Adjoint), Ok(Domain::Combined));
        assert_eq!(Pipeline::default_for(Direction::Forward).check(Direction::Forward), Ok(Domain::NonUniform));
        assert_eq!(Pipeline::parse("gic").unwrap().check(Direction::Adjoint), Ok(Domain::Image));
        assert_eq!(Pipeline::parse("xpfrgic").unwrap().check(Direction::Forward), Ok(Domain::Image));
    }

    #[test]
    fn domain_mismatch_is_rejected() {
        let err = Pipeline::parse("gics").unwrap().check(Direction::Forward).unwrap_err();
        assert_eq!(
            err,
            ReconError::StageMismatch {
                stage: "regrid".to_string(),
                domain: "image".to_string()
            }
        );
        assert!(Pipeline::parse("gsx").unwrap().check(Direction::Adjoint).is_err());
        assert!(Pipeline::parse("gicss").unwrap().check(Direction::Adjoint).is_err());
        assert!(Pipeline::parse("gd").unwrap().check(Direction::Adjoint).is_err());
    }
}
