use color_eyre::{Help, Report};
use eyre::WrapErr;
use serde::Deserialize;
use std::fmt;
use std::fs::File;

pub mod biased;
pub mod combinatorics;
pub mod fiducials;
pub mod integrands;
pub mod kernels;
pub mod power;
pub mod workspace;

pub use fiducials::{
    BiasParams, BootstrapParams, ConstantFiducials, CounterTermParams, FiducialProvider,
    FiducialSet, LcdmParams, RsdParams, SurveyParams,
};
pub use kernels::Kernel;
pub use power::{LinearPower, PowerLaw, TabulatedPower};

/// Absolute tolerance below which a partial-sum scale is treated as zero.
///
/// Two base wavevectors cancelling exactly is a measure-zero configuration of
/// the loop integrals; the summed scale is floored at this value and the
/// dependent angles default to zero so that downstream arithmetic stays
/// finite.
pub const ABS_TOL: f64 = 1e-12;

/// Largest kernel order a [`Kernel`] may be constructed with.
///
/// The combinatorial ranks and table sizes are evaluated in unchecked `u64`
/// arithmetic which is exact far beyond this bound; the limit mostly guards
/// against absurd allocations (the cosine table grows as `3^n`).
pub const MAX_KERN_ORDER: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("wavevector slot {index} out of range for a kernel holding {len} wavevectors")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("the angle of wavevector {index} with itself is always one and is not stored")]
    DiagonalAngle { index: usize },

    #[error("working buffers of order {requested} requested from a kernel of order {available}")]
    InvalidOrder { requested: usize, available: usize },

    #[error("kernel order {order} not supported (must be in 1..={max})")]
    UnsupportedOrder { order: usize, max: usize },

    #[error(
        "linear power spectrum evaluated at k = {k:e} outside the tabulated range \
         [{min:e}, {max:e}] and no extrapolation is configured"
    )]
    ExtrapolationUnavailable { k: f64, min: f64, max: f64 },

    #[error("interpolation table needs at least {needed} distinct nodes, got {got}")]
    Data { needed: usize, got: usize },
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub enum Integrator {
    #[serde(rename = "vegas")]
    Vegas,
    #[serde(rename = "suave")]
    Suave,
    #[serde(rename = "cuhre")]
    Cuhre,
}

impl Default for Integrator {
    fn default() -> Integrator {
        Integrator::Vegas
    }
}

impl fmt::Display for Integrator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Integrator::Vegas => write!(f, "vegas"),
            Integrator::Suave => write!(f, "suave"),
            Integrator::Cuhre => write!(f, "cuhre"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub integrator: Integrator,
    pub n_start: usize,
    pub n_increase: usize,
    pub n_max: usize,
    pub n_vec: usize,
    pub n_new: usize,
    pub n_min: usize,
    pub flatness: f64,
    pub eps_rel: f64,
    pub eps_abs: f64,
    pub border: f64,
    pub seed: i32,
}

impl Default for IntegratorSettings {
    fn default() -> IntegratorSettings {
        IntegratorSettings {
            integrator: Integrator::Vegas,
            n_start: 10000,
            n_increase: 5000,
            n_max: 1000000,
            n_vec: 1,
            n_new: 1000,
            n_min: 2,
            flatness: 50.,
            eps_rel: 1e-4,
            eps_abs: 0.,
            border: 1e-12,
            seed: 1,
        }
    }
}

/// Bounds and sampling of the one-loop integral and the external k grid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopSettings {
    /// Lower cutoff of the loop-momentum magnitude.
    pub q_min: f64,
    /// Upper cutoff of the loop-momentum magnitude.
    pub q_max: f64,
    /// External wavevectors the binary evaluates the spectrum at.
    pub k_bins: Vec<f64>,
    /// Line-of-sight cosine of the external wavevector.
    pub mu: f64,
    /// Redshift the fiducials are evaluated at.
    pub z: f64,
}

impl Default for LoopSettings {
    fn default() -> LoopSettings {
        LoopSettings {
            q_min: 1e-4,
            q_max: 10.,
            k_bins: vec![0.1],
            mu: 0.5,
            z: 0.,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Prefix for result files written by the `integrate` subcommand.
    pub res_file_prefix: String,
    pub debug: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(rename = "General", default)]
    pub general: GeneralSettings,
    #[serde(rename = "Integrator", default)]
    pub integrator: IntegratorSettings,
    #[serde(rename = "Loop", default)]
    pub loop_integral: LoopSettings,
    #[serde(rename = "Fiducials", default)]
    pub fiducials: ConstantFiducials,
}

impl Settings {
    pub fn from_file(filename: &str) -> Result<Settings, Report> {
        let f = File::open(filename)
            .wrap_err_with(|| format!("Could not open settings file {}", filename))
            .suggestion("Does the path exist?")?;
        serde_yaml::from_reader(f)
            .wrap_err("Could not parse settings file")
            .suggestion("Is it a correct yaml file")
    }
}
