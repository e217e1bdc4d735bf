//! Fiducial cosmology, bootstrap, bias, redshift-space and survey parameter
//! sets, plus the provider seam that refreshes them on a redshift change.
//!
//! The provider is injected into [`crate::Kernel::set_z`], so swapping in a
//! table-interpolated or externally computed set of fiducials needs no
//! global state.

use serde::Deserialize;

/// Speed of light in km/s.
const C_LIGHT: f64 = 2.99792458e5;

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LcdmParams {
    /// Matter density today.
    pub omega_m0: f64,
    /// Scalar spectral index.
    pub ns: f64,
    /// Growth index gamma in f = Omega_m(z)^gamma.
    pub growth_index: f64,
}

impl Default for LcdmParams {
    fn default() -> LcdmParams {
        LcdmParams {
            omega_m0: 0.3153,
            ns: 0.9649,
            growth_index: 6. / 11.,
        }
    }
}

/// Bootstrap coefficients of the second- and third-order coupling kernels.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BootstrapParams {
    pub a2_ga: f64,
    pub d2_ga: f64,
    pub a3_ga_a: f64,
    pub a3_ga_b: f64,
    pub d3_ga_a: f64,
    pub d3_ga_b: f64,
    pub h: f64,
}

impl Default for BootstrapParams {
    fn default() -> BootstrapParams {
        // standard gravitational clustering
        BootstrapParams {
            a2_ga: 34. / 21.,
            d2_ga: 26. / 21.,
            a3_ga_a: 409. / 189.,
            a3_ga_b: 51. / 162.,
            d3_ga_a: 1. / 3.,
            d3_ga_b: 0.,
            h: 34. / 21. - 1.,
        }
    }
}

/// Galaxy bias coefficients.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BiasParams {
    pub b1: f64,
    pub b2: f64,
    pub b_g2: f64,
    pub c2_ga: f64,
    pub b_gam3: f64,
}

impl Default for BiasParams {
    fn default() -> BiasParams {
        BiasParams {
            b1: 1.,
            b2: 0.,
            b_g2: 0.,
            c2_ga: 0.,
            b_gam3: 0.,
        }
    }
}

/// Redshift-space distortion parameters: growth rate and the velocity /
/// spectroscopic-error dispersions entering the smoothing factor.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct RsdParams {
    pub f: f64,
    pub sigv: f64,
    pub sigs: f64,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct CounterTermParams {
    pub c0: f64,
    pub c2: f64,
    pub c4: f64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct SurveyParams {
    /// Mean galaxy number density.
    pub n: f64,
    /// Shot noise.
    pub sn: f64,
    /// Survey volume.
    pub v: f64,
}

impl Default for SurveyParams {
    fn default() -> SurveyParams {
        SurveyParams {
            n: 1e-3,
            sn: 0.,
            v: 1e9,
        }
    }
}

/// One complete set of fiducials at a fixed redshift, owned by a kernel and
/// replaced as a unit whenever the redshift changes.
#[derive(Debug, Clone, Copy)]
pub struct FiducialSet {
    pub growth: f64,
    pub lcdm: LcdmParams,
    pub btst: BootstrapParams,
    pub bias: BiasParams,
    pub rsd: RsdParams,
    pub ctr: CounterTermParams,
    pub surv: SurveyParams,
}

/// Source of fiducials, invoked once per redshift change.
pub trait FiducialProvider {
    fn at_z(&self, z: f64) -> FiducialSet;
}

/// Redshift-independent base parameters with the standard z-scalings applied
/// on demand: the growth rate from the LCDM closed form (unless pinned), the
/// velocity dispersion divided by sqrt(2) and the spectroscopic error scaled
/// by (1 + z)/H(z).
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ConstantFiducials {
    pub lcdm: LcdmParams,
    pub btst: BootstrapParams,
    pub bias: BiasParams,
    pub rsd: RsdParams,
    pub ctr: CounterTermParams,
    pub surv: SurveyParams,
    /// Use `rsd.f` as given instead of the LCDM growth rate.
    pub pin_growth_rate: bool,
}

impl Default for ConstantFiducials {
    fn default() -> ConstantFiducials {
        ConstantFiducials {
            lcdm: LcdmParams::default(),
            btst: BootstrapParams::default(),
            bias: BiasParams::default(),
            rsd: RsdParams::default(),
            ctr: CounterTermParams::default(),
            surv: SurveyParams::default(),
            pin_growth_rate: false,
        }
    }
}

impl FiducialProvider for ConstantFiducials {
    fn at_z(&self, z: f64) -> FiducialSet {
        let mut rsd = self.rsd;

        if !self.pin_growth_rate {
            rsd.f = growth_rate(z, &self.lcdm);
        }
        rsd.sigv /= f64::sqrt(2.);
        rsd.sigs *= (1. + z) / hubble(z, &self.lcdm);

        FiducialSet {
            growth: growth_factor(z, &self.lcdm),
            lcdm: self.lcdm,
            btst: self.btst,
            bias: self.bias,
            rsd,
            ctr: self.ctr,
            surv: self.surv,
        }
    }
}

/// Redshift-dependent matter density.
pub fn omega_m(z: f64, lcdm: &LcdmParams) -> f64 {
    let a3 = (1. + z).powi(3);
    lcdm.omega_m0 * a3 / (lcdm.omega_m0 * a3 + 1. - lcdm.omega_m0)
}

/// Hubble function in units of h/Mpc.
pub fn hubble(z: f64, lcdm: &LcdmParams) -> f64 {
    (lcdm.omega_m0 * (1. + z).powi(3) + 1. - lcdm.omega_m0).sqrt() / (C_LIGHT * 1e-5)
}

/// Linear growth rate f(z) = dlog D / dlog a = Omega_m(z)^gamma.
pub fn growth_rate(z: f64, lcdm: &LcdmParams) -> f64 {
    omega_m(z, lcdm).powf(lcdm.growth_index)
}

/// Linear growth factor D1(z) = exp(-int_0^z f(z') / (1 + z') dz'),
/// normalised to one today. Composite Simpson over a fixed grid; the
/// integrand is smooth and slowly varying, so this is exact to well below
/// the accuracy of any fiducial table.
pub fn growth_factor(z: f64, lcdm: &LcdmParams) -> f64 {
    if z == 0. {
        return 1.;
    }

    let steps = 256;
    let h = z / (2 * steps) as f64;
    let g = |zp: f64| growth_rate(zp, lcdm) / (1. + zp);

    let mut sum = g(0.) + g(z);
    for i in 1..2 * steps {
        sum += g(i as f64 * h) * if i % 2 == 0 { 2. } else { 4. };
    }

    (-sum * h / 3.).exp()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_rate_limits() {
        let lcdm = LcdmParams {
            omega_m0: 1.,
            ns: 1.,
            growth_index: 6. / 11.,
        };

        // Einstein-de-Sitter: f = 1 at all redshifts
        assert!((growth_rate(0., &lcdm) - 1.).abs() < 1e-14);
        assert!((growth_rate(3., &lcdm) - 1.).abs() < 1e-14);

        // and D1 = 1/(1+z)
        assert!((growth_factor(1., &lcdm) - 0.5).abs() < 1e-8);
        assert!((growth_factor(3., &lcdm) - 0.25).abs() < 1e-8);
    }

    #[test]
    fn provider_scales_dispersions() {
        let mut base = ConstantFiducials::default();
        base.rsd.sigv = 4.;
        base.rsd.sigs = 1.;

        let fid = base.at_z(0.5);
        assert!((fid.rsd.sigv - 4. / f64::sqrt(2.)).abs() < 1e-14);
        assert!((fid.rsd.sigs - 1.5 / hubble(0.5, &base.lcdm)).abs() < 1e-14);
        assert!((fid.rsd.f - growth_rate(0.5, &base.lcdm)).abs() < 1e-14);
    }
}
