//! Kernel evaluation context and the bootstrap coupling kernels.
//!
//! A [`Kernel`] holds the base wavevectors of one spectrum evaluation (their
//! magnitudes, line-of-sight cosines and pairwise cosines), the fiducial
//! parameter sets of the current redshift and a hierarchy of working buffers
//! caching every partial-sum scale and angle the assemblers read. One
//! context is created per integration worker and re-used across all samples;
//! contexts are not shareable across threads mid-evaluation.

use log::debug;

use crate::fiducials::{
    BiasParams, BootstrapParams, CounterTermParams, FiducialProvider, LcdmParams, RsdParams,
    SurveyParams,
};
use crate::workspace::Workspace;
use crate::{Error, ABS_TOL, MAX_KERN_ORDER};

/// Density (`f`) and velocity (`g`) components of a bootstrap kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FgPair {
    pub f: f64,
    pub g: f64,
}

/*  ----------------------------------------------------  */
/*  -----------------   Basis kernels   ----------------  */
/*  ----------------------------------------------------  */

/// Antisymmetric alpha kernel, `nu12/2 (k2/k1 - k1/k2)`.
#[inline]
pub fn alpha(k1: f64, k2: f64, nu12: f64) -> f64 {
    nu12 / 2. * (k2 / k1 - k1 / k2)
}

/// Derivative of `alpha` w.r.t. its first scale. The derivative w.r.t. the
/// second scale is `-dalpha_k(k2, k1, nu12)` by antisymmetry.
#[inline]
pub fn dalpha_k(k1: f64, k2: f64, nu12: f64) -> f64 {
    -nu12 / 2. * (k2 / k1 + k1 / k2) / k1
}

#[inline]
pub fn dalpha_nu(k1: f64, k2: f64, _nu12: f64) -> f64 {
    0.5 * (k2 / k1 - k1 / k2)
}

/// Symmetric beta kernel, `nu12 (nu12 + (k1/k2 + k2/k1)/2)`.
#[inline]
pub fn beta(k1: f64, k2: f64, nu12: f64) -> f64 {
    nu12 * (nu12 + (k1 / k2 + k2 / k1) / 2.)
}

/// Derivative of `beta` w.r.t. its first scale. The derivative w.r.t. the
/// second scale is `dbeta_k(k2, k1, nu12)`.
#[inline]
pub fn dbeta_k(k1: f64, k2: f64, nu12: f64) -> f64 {
    nu12 / 2. * (k1 / k2 - k2 / k1) / k1
}

#[inline]
pub fn dbeta_nu(k1: f64, k2: f64, nu12: f64) -> f64 {
    2. * nu12 + (k1 / k2 + k2 / k1) / 2.
}

/// Gamma kernel, `1 - nu12^2`.
#[inline]
pub fn gamma(nu12: f64) -> f64 {
    1. - nu12 * nu12
}

#[inline]
pub fn dgamma_nu(nu12: f64) -> f64 {
    -2. * nu12
}

/*  ----------------------------------------------------  */
/*  ----------------   Kernel context   ----------------  */
/*  ----------------------------------------------------  */

#[derive(Debug, Clone)]
pub struct Kernel {
    /// Number of external wavevectors of the observable (2 for the power
    /// spectrum, 3 for the bispectrum).
    pub(crate) spec_order: usize,
    /// Number of base wavevectors actually tracked; exceeds `spec_order`
    /// for loop integrals.
    pub(crate) kern_order: usize,
    /// max(spec_order, kern_order), sizing the flat base arrays.
    pub(crate) max_order: usize,

    pub(crate) z: f64,
    pub(crate) growth: f64,

    pub(crate) k: Vec<f64>,
    pub(crate) mu: Vec<f64>,
    pub(crate) nu: Vec<f64>,

    pub lcdm: LcdmParams,
    pub btst: BootstrapParams,
    pub bias: BiasParams,
    pub rsd: RsdParams,
    pub ctr: CounterTermParams,
    pub surv: SurveyParams,

    pub(crate) work: Vec<Workspace>,
    pub(crate) compute_work: bool,
}

impl Kernel {
    /// Context for a `spec_order`-point spectrum at `loop_order` loops,
    /// tracking `kern_order = spec_order + 2 loop_order - 1` wavevectors.
    pub fn new(spec_order: usize, loop_order: usize) -> Result<Kernel, Error> {
        Kernel::with_order(spec_order, spec_order + 2 * loop_order - 1)
    }

    /// Context with an explicit kernel order.
    pub fn with_order(spec_order: usize, kern_order: usize) -> Result<Kernel, Error> {
        if kern_order == 0 || kern_order > MAX_KERN_ORDER {
            return Err(Error::UnsupportedOrder {
                order: kern_order,
                max: MAX_KERN_ORDER,
            });
        }
        if kern_order < spec_order {
            return Err(Error::InvalidOrder {
                requested: spec_order,
                available: kern_order,
            });
        }

        let max_order = spec_order.max(kern_order);

        Ok(Kernel {
            spec_order,
            kern_order,
            max_order,
            z: 0.,
            growth: 0.,
            k: vec![0.; max_order],
            mu: vec![0.; max_order],
            nu: vec![0.; max_order * (max_order - 1) / 2],
            lcdm: LcdmParams::default(),
            btst: BootstrapParams::default(),
            bias: BiasParams::default(),
            rsd: RsdParams::default(),
            ctr: CounterTermParams::default(),
            surv: SurveyParams::default(),
            work: (1..=kern_order).map(Workspace::new).collect(),
            compute_work: true,
        })
    }

    pub fn spec_order(&self) -> usize {
        self.spec_order
    }

    pub fn kern_order(&self) -> usize {
        self.kern_order
    }

    pub fn growth(&self) -> f64 {
        self.growth
    }

    /*  ------------------------------------------------  */

    /// Set the redshift and refresh every fiducial set from the provider.
    pub fn set_z(&mut self, z: f64, fiducials: &dyn FiducialProvider) {
        debug!("refreshing fiducials at z = {}", z);

        let fid = fiducials.at_z(z);

        self.z = z;
        self.growth = fid.growth;
        self.lcdm = fid.lcdm;
        self.btst = fid.btst;
        self.bias = fid.bias;
        self.rsd = fid.rsd;
        self.ctr = fid.ctr;
        self.surv = fid.surv;
    }

    pub fn get_z(&self) -> f64 {
        self.z
    }

    /*  ------------------------------------------------  */

    fn check_slot(&self, index: usize) -> Result<(), Error> {
        if index >= self.max_order {
            return Err(Error::IndexOutOfRange {
                index,
                len: self.max_order,
            });
        }
        Ok(())
    }

    pub fn set_k(&mut self, index: usize, k: f64) -> Result<(), Error> {
        self.check_slot(index)?;
        self.k[index] = k;
        Ok(())
    }

    /// Fast-path setter: the slot is not validated. Misuse is a logic error
    /// (and panics on an out-of-range slot).
    #[inline]
    pub fn qset_k(&mut self, index: usize, k: f64) {
        self.k[index] = k;
    }

    pub fn set_mu(&mut self, index: usize, mu: f64) -> Result<(), Error> {
        self.check_slot(index)?;
        self.mu[index] = mu;
        Ok(())
    }

    #[inline]
    pub fn qset_mu(&mut self, index: usize, mu: f64) {
        self.mu[index] = mu;
    }

    pub fn set_nu(&mut self, index1: usize, index2: usize, nu: f64) -> Result<(), Error> {
        if index1 == index2 {
            return Err(Error::DiagonalAngle { index: index1 });
        }
        self.check_slot(index1)?;
        self.check_slot(index2)?;
        self.nu[crate::combinatorics::pair_offset(self.max_order, index1, index2)] = nu;
        Ok(())
    }

    #[inline]
    pub fn qset_nu(&mut self, index1: usize, index2: usize, nu: f64) {
        self.nu[crate::combinatorics::pair_offset(self.max_order, index1, index2)] = nu;
    }

    pub fn get_k(&self, index: usize) -> Result<f64, Error> {
        self.check_slot(index)?;
        Ok(self.k[index])
    }

    #[inline]
    pub fn qget_k(&self, index: usize) -> f64 {
        self.k[index]
    }

    pub fn get_mu(&self, index: usize) -> Result<f64, Error> {
        self.check_slot(index)?;
        Ok(self.mu[index])
    }

    #[inline]
    pub fn qget_mu(&self, index: usize) -> f64 {
        self.mu[index]
    }

    pub fn get_nu(&self, index1: usize, index2: usize) -> Result<f64, Error> {
        if index1 == index2 {
            return Err(Error::DiagonalAngle { index: index1 });
        }
        self.check_slot(index1)?;
        self.check_slot(index2)?;
        Ok(self.nu[crate::combinatorics::pair_offset(self.max_order, index1, index2)])
    }

    #[inline]
    pub fn qget_nu(&self, index1: usize, index2: usize) -> f64 {
        self.nu[crate::combinatorics::pair_offset(self.max_order, index1, index2)]
    }

    /*  ------------------------------------------------  */

    /// Populate the working buffers of orders `1..=upto` from the base
    /// wavevectors: full enumeration for the top buffer, copy-down for the
    /// rest.
    pub(crate) fn populate_work(&mut self, upto: usize) -> Result<(), Error> {
        if upto == 0 || upto > self.kern_order {
            return Err(Error::InvalidOrder {
                requested: upto,
                available: self.kern_order,
            });
        }

        let (lower, top) = self.work.split_at_mut(upto - 1);
        let top = &mut top[0];

        top.fill(&self.k, &self.mu, &self.nu, self.max_order);
        for ws in lower.iter_mut() {
            ws.copy_from(top);
        }

        self.compute_work = false;
        Ok(())
    }

    /// Refresh the working buffers if the context is marked dirty.
    ///
    /// Returns the flag value to hand back to [`Kernel::finish_work`]; while
    /// the evaluation is in flight the flag is lowered so nested assembler
    /// calls share the same population.
    #[inline]
    pub(crate) fn prepare_work(&mut self, upto: usize) -> Result<bool, Error> {
        if self.compute_work {
            self.populate_work(upto)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    #[inline]
    pub(crate) fn finish_work(&mut self, refreshed: bool) {
        self.compute_work = refreshed;
    }

    /*  ------------------------------------------------  */
    /*  Second order bootstrap kernels                    */
    /*  ------------------------------------------------  */

    /// Second-order bootstrap kernels,
    /// `F2 = beta + a2Ga/2 gamma` and `G2 = beta + d2Ga/2 gamma`.
    pub fn h2(&mut self) -> Result<FgPair, Error> {
        let refreshed = self.prepare_work(2)?;
        let w2 = &self.work[1];

        let beta = beta(w2.k[0], w2.k[1], w2.nu[0]);
        let gamma = gamma(w2.nu[0]);

        let out = FgPair {
            f: beta + 0.5 * self.btst.a2_ga * gamma,
            g: beta + 0.5 * self.btst.d2_ga * gamma,
        };

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Derivative of `H2` w.r.t. the first scale; swap the two base slots to
    /// differentiate w.r.t. the second.
    pub fn dh2_k(&mut self) -> Result<FgPair, Error> {
        let refreshed = self.prepare_work(2)?;
        let w2 = &self.work[1];

        let dbeta = dbeta_k(w2.k[0], w2.k[1], w2.nu[0]);

        self.finish_work(refreshed);
        Ok(FgPair { f: dbeta, g: dbeta })
    }

    pub fn dh2_nu(&mut self) -> Result<FgPair, Error> {
        let refreshed = self.prepare_work(2)?;
        let w2 = &self.work[1];

        let dbeta = dbeta_nu(w2.k[0], w2.k[1], w2.nu[0]);
        let dgamma = dgamma_nu(w2.nu[0]);

        let out = FgPair {
            f: dbeta + 0.5 * self.btst.a2_ga * dgamma,
            g: dbeta + 0.5 * self.btst.d2_ga * dgamma,
        };

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dh2_a2ga(&mut self) -> Result<FgPair, Error> {
        let refreshed = self.prepare_work(2)?;
        let w2 = &self.work[1];

        let gamma = gamma(w2.nu[0]);

        self.finish_work(refreshed);
        Ok(FgPair {
            f: 0.5 * gamma,
            g: 0.,
        })
    }

    pub fn dh2_d2ga(&mut self) -> Result<FgPair, Error> {
        let refreshed = self.prepare_work(2)?;
        let w2 = &self.work[1];

        let gamma = gamma(w2.nu[0]);

        self.finish_work(refreshed);
        Ok(FgPair {
            f: 0.,
            g: 0.5 * gamma,
        })
    }

    /*  ------------------------------------------------  */
    /*  Third order bootstrap kernels                     */
    /*  ------------------------------------------------  */

    /// Third-order bootstrap kernels `F3`, `G3`: a sum over the three
    /// unordered base pairs of singleton-kernel times summed-kernel
    /// products, weighted by the bootstrap coefficient combinations.
    ///
    /// Reads the order-3 buffer in its fixed layout
    /// `k = {k1, k2, k3, k12, k13, k23, k123}`,
    /// `nu = {nu12, nu13, nu23, nu12_3, nu13_2, nu23_1}`; a vanishing summed
    /// scale skips its term.
    pub fn h3(&mut self) -> Result<FgPair, Error> {
        let refreshed = self.prepare_work(3)?;
        let btst = self.btst;
        let w3 = &self.work[2];

        let mut out = FgPair::default();
        let mut index = 0;

        for i in 0..2usize {
            for j in i..2usize {
                if w3.k[3 + index] <= ABS_TOL {
                    index += 1;
                    continue;
                }

                // singleton pair (ki_, kj_)
                let beta_sin = beta(w3.k[i], w3.k[j + 1], w3.nu[index]);
                let gamma_sin = gamma(w3.nu[index]);

                // summed pair (kij_, kl_) with l the remaining vector
                let k_sum = w3.k[3 + index];
                let k_thd = w3.k[2 - index];
                let nu_sum = w3.nu[3 + index];

                let beta_sum = beta(k_sum, k_thd, nu_sum);
                let alpha_sum = alpha(k_sum, k_thd, nu_sum);
                let gamma_sum = gamma(nu_sum);

                out.f += 1. / 3. * (beta_sum * beta_sin)
                    + (btst.a3_ga_a / 2. + btst.a3_ga_b) / 6. * (gamma_sum * gamma_sin)
                    + (btst.a3_ga_a / 2. - btst.a3_ga_b) / 6. * (alpha_sum * gamma_sin)
                    - (btst.a3_ga_a / 2. - btst.a3_ga_b - 2. * btst.h) / 6.
                        * (beta_sum * gamma_sin)
                    + (btst.a3_ga_a / 2. - btst.a3_ga_b + btst.a2_ga - btst.h) / 3.
                        * (gamma_sum * beta_sin);

                out.g += 1. / 3. * (beta_sum * beta_sin)
                    + (btst.d3_ga_a / 2. + btst.d3_ga_b) / 6. * (gamma_sum * gamma_sin)
                    + (btst.d3_ga_a / 2. - btst.d3_ga_b) / 6. * (alpha_sum * gamma_sin)
                    - (btst.d3_ga_a / 2. - btst.d3_ga_b - 2. * btst.h) / 6.
                        * (beta_sum * gamma_sin)
                    + (btst.d3_ga_a / 2. - btst.d3_ga_b + btst.d2_ga - btst.h) / 3.
                        * (gamma_sum * beta_sin);

                index += 1;
            }
        }

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Derivative of `H3` w.r.t. the first scale `k1`.
    ///
    /// Only the pairs containing vector 1 pick up singleton derivatives; the
    /// summed kernels are chained through `dk12/dk1 = (k1 + k2 nu12)/k12`
    /// and `dnu12_3/dk1 = (nu13 - nu12_3 dk12/dk1)/k12`. For the pair
    /// `(k23_, k1_)` the derivative acts on the second slot of the summed
    /// kernels, so the arguments are swapped (`beta` is symmetric, `alpha`
    /// picks up a sign).
    pub fn dh3_k(&mut self) -> Result<FgPair, Error> {
        let refreshed = self.prepare_work(3)?;
        let btst = self.btst;
        let w3 = &self.work[2];

        let mut out = FgPair::default();
        let mut index = 0;

        for i in 0..2usize {
            for j in i..2usize {
                if w3.k[3 + index] <= ABS_TOL {
                    index += 1;
                    continue;
                }

                let k1 = w3.k[i];
                let k2 = w3.k[j + 1];
                let nu12 = w3.nu[index];

                let beta_sin = beta(k1, k2, nu12);
                let dbeta_sin = if i == 0 { dbeta_k(k1, k2, nu12) } else { 0. };
                let gamma_sin = gamma(nu12);

                let k_sum = w3.k[3 + index];
                let k_thd = w3.k[2 - index];
                let nu_sum = w3.nu[3 + index];

                let dk = if i == 0 { (k1 + k2 * nu12) / k_sum } else { 0. };
                let dnu = if i == 0 {
                    (w3.nu[1 - index] - dk * nu_sum) / k_sum
                } else {
                    0.
                };

                let (beta_sum, dbeta_sum, dalpha_sum, gamma_sum, dgamma_sum) = if i == 0 {
                    (
                        beta(k_sum, k_thd, nu_sum),
                        dbeta_k(k_sum, k_thd, nu_sum) * dk + dbeta_nu(k_sum, k_thd, nu_sum) * dnu,
                        dalpha_k(k_sum, k_thd, nu_sum) * dk
                            + dalpha_nu(k_sum, k_thd, nu_sum) * dnu,
                        gamma(nu_sum),
                        dgamma_nu(nu_sum) * dnu,
                    )
                } else {
                    // derivative acts on k1_ sitting in the second slot of
                    // (k23_, k1_); beta is symmetric, alpha flips sign
                    (
                        beta(k_thd, k_sum, nu_sum),
                        dbeta_k(k_thd, k_sum, nu_sum),
                        -dalpha_k(k_thd, k_sum, nu_sum),
                        gamma(nu_sum),
                        0.,
                    )
                };

                out.f += 1. / 3. * (dbeta_sum * beta_sin + beta_sum * dbeta_sin)
                    + (btst.a3_ga_a / 2. + btst.a3_ga_b) / 6. * (dgamma_sum * gamma_sin)
                    + (btst.a3_ga_a / 2. - btst.a3_ga_b) / 6. * (dalpha_sum * gamma_sin)
                    - (btst.a3_ga_a / 2. - btst.a3_ga_b - 2. * btst.h) / 6.
                        * (dbeta_sum * gamma_sin)
                    + (btst.a3_ga_a / 2. - btst.a3_ga_b + btst.a2_ga - btst.h) / 3.
                        * (dgamma_sum * beta_sin + gamma_sum * dbeta_sin);

                out.g += 1. / 3. * (dbeta_sum * beta_sin + beta_sum * dbeta_sin)
                    + (btst.d3_ga_a / 2. + btst.d3_ga_b) / 6. * (dgamma_sum * gamma_sin)
                    + (btst.d3_ga_a / 2. - btst.d3_ga_b) / 6. * (dalpha_sum * gamma_sin)
                    - (btst.d3_ga_a / 2. - btst.d3_ga_b - 2. * btst.h) / 6.
                        * (dbeta_sum * gamma_sin)
                    + (btst.d3_ga_a / 2. - btst.d3_ga_b + btst.d2_ga - btst.h) / 3.
                        * (dgamma_sum * beta_sin + gamma_sum * dbeta_sin);

                index += 1;
            }
        }

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Derivative of `H3` w.r.t. the base cosine `nu12`.
    pub fn dh3_nu(&mut self) -> Result<FgPair, Error> {
        let refreshed = self.prepare_work(3)?;
        let btst = self.btst;
        let w3 = &self.work[2];

        let mut out = FgPair::default();
        let mut index = 0;

        for i in 0..2usize {
            for j in i..2usize {
                if w3.k[3 + index] <= ABS_TOL {
                    index += 1;
                    continue;
                }

                let k1 = w3.k[i];
                let k2 = w3.k[j + 1];
                let nu12 = w3.nu[index];

                let beta_sin = beta(k1, k2, nu12);
                let dbeta_sin = if j == 0 { dbeta_nu(k1, k2, nu12) } else { 0. };
                let gamma_sin = gamma(nu12);
                let dgamma_sin = if j == 0 { dgamma_nu(nu12) } else { 0. };

                let k_sum = w3.k[3 + index];
                let k_thd = w3.k[2 - index];
                let nu_sum = w3.nu[3 + index];

                // dk12/dnu12 = k1 k2 / k12 for the (1,2) pair, zero for the
                // others; the summed cosine of the other pairs still shifts,
                // dnu13_2/dnu12 = k1/k13 and dnu23_1/dnu12 = k2/k23
                let dk = if j == 0 { k1 * k2 / k_sum } else { 0. };
                let dnu = if j == 0 {
                    -nu_sum * dk / k_sum
                } else {
                    w3.k[index - 1] / k_sum
                };

                let beta_sum = beta(k_sum, k_thd, nu_sum);
                let dbeta_sum = if j == 0 {
                    dbeta_k(k_sum, k_thd, nu_sum) * dk + dbeta_nu(k_sum, k_thd, nu_sum) * dnu
                } else {
                    dbeta_nu(k_sum, k_thd, nu_sum) * dnu
                };

                let alpha_sum = alpha(k_sum, k_thd, nu_sum);
                let dalpha_sum = if j == 0 {
                    dalpha_k(k_sum, k_thd, nu_sum) * dk + dalpha_nu(k_sum, k_thd, nu_sum) * dnu
                } else {
                    dalpha_nu(k_sum, k_thd, nu_sum) * dnu
                };

                let gamma_sum = gamma(nu_sum);
                let dgamma_sum = dgamma_nu(nu_sum) * dnu;

                out.f += 1. / 3. * (dbeta_sum * beta_sin + beta_sum * dbeta_sin)
                    + (btst.a3_ga_a / 2. + btst.a3_ga_b) / 6.
                        * (dgamma_sum * gamma_sin + gamma_sum * dgamma_sin)
                    + (btst.a3_ga_a / 2. - btst.a3_ga_b) / 6.
                        * (dalpha_sum * gamma_sin + alpha_sum * dgamma_sin)
                    - (btst.a3_ga_a / 2. - btst.a3_ga_b - 2. * btst.h) / 6.
                        * (dbeta_sum * gamma_sin + beta_sum * dgamma_sin)
                    + (btst.a3_ga_a / 2. - btst.a3_ga_b + btst.a2_ga - btst.h) / 3.
                        * (dgamma_sum * beta_sin + gamma_sum * dbeta_sin);

                out.g += 1. / 3. * (dbeta_sum * beta_sin + beta_sum * dbeta_sin)
                    + (btst.d3_ga_a / 2. + btst.d3_ga_b) / 6.
                        * (dgamma_sum * gamma_sin + gamma_sum * dgamma_sin)
                    + (btst.d3_ga_a / 2. - btst.d3_ga_b) / 6.
                        * (dalpha_sum * gamma_sin + alpha_sum * dgamma_sin)
                    - (btst.d3_ga_a / 2. - btst.d3_ga_b - 2. * btst.h) / 6.
                        * (dbeta_sum * gamma_sin + beta_sum * dgamma_sin)
                    + (btst.d3_ga_a / 2. - btst.d3_ga_b + btst.d2_ga - btst.h) / 3.
                        * (dgamma_sum * beta_sin + gamma_sum * dbeta_sin);

                index += 1;
            }
        }

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Shared shape of the parameter derivatives of `H3`: accumulate the
    /// five singleton/summed products and weight them per parameter.
    fn dh3_terms(&mut self) -> Result<[f64; 4], Error> {
        let refreshed = self.prepare_work(3)?;
        let w3 = &self.work[2];

        // sums of gammaSum*gammaSin, alphaSum*gammaSin, betaSum*gammaSin,
        // gammaSum*betaSin over the three pairs
        let mut terms = [0.; 4];
        let mut index = 0;

        for i in 0..2usize {
            for j in i..2usize {
                if w3.k[3 + index] <= ABS_TOL {
                    index += 1;
                    continue;
                }

                let beta_sin = beta(w3.k[i], w3.k[j + 1], w3.nu[index]);
                let gamma_sin = gamma(w3.nu[index]);

                let k_sum = w3.k[3 + index];
                let k_thd = w3.k[2 - index];
                let nu_sum = w3.nu[3 + index];

                terms[0] += gamma(nu_sum) * gamma_sin;
                terms[1] += alpha(k_sum, k_thd, nu_sum) * gamma_sin;
                terms[2] += beta(k_sum, k_thd, nu_sum) * gamma_sin;
                terms[3] += gamma(nu_sum) * beta_sin;

                index += 1;
            }
        }

        self.finish_work(refreshed);
        Ok(terms)
    }

    /// `dF3/da2Ga = 1/3 sum gammaSum betaSin`, `dG3/da2Ga = 0`.
    pub fn dh3_a2ga(&mut self) -> Result<FgPair, Error> {
        let terms = self.dh3_terms()?;
        Ok(FgPair {
            f: terms[3] / 3.,
            g: 0.,
        })
    }

    pub fn dh3_d2ga(&mut self) -> Result<FgPair, Error> {
        let terms = self.dh3_terms()?;
        Ok(FgPair {
            f: 0.,
            g: terms[3] / 3.,
        })
    }

    /// Both components: `1/3 sum betaSum gammaSin - 1/3 sum gammaSum betaSin`.
    pub fn dh3_h(&mut self) -> Result<FgPair, Error> {
        let terms = self.dh3_terms()?;
        let d = terms[2] / 3. - terms[3] / 3.;
        Ok(FgPair { f: d, g: d })
    }

    pub fn dh3_a3gaa(&mut self) -> Result<FgPair, Error> {
        let terms = self.dh3_terms()?;
        Ok(FgPair {
            f: terms[0] / 12. + terms[1] / 12. - terms[2] / 12. + terms[3] / 6.,
            g: 0.,
        })
    }

    pub fn dh3_a3gab(&mut self) -> Result<FgPair, Error> {
        let terms = self.dh3_terms()?;
        Ok(FgPair {
            f: terms[0] / 6. - terms[1] / 6. + terms[2] / 6. - terms[3] / 3.,
            g: 0.,
        })
    }

    pub fn dh3_d3gaa(&mut self) -> Result<FgPair, Error> {
        let terms = self.dh3_terms()?;
        Ok(FgPair {
            f: 0.,
            g: terms[0] / 12. + terms[1] / 12. - terms[2] / 12. + terms[3] / 6.,
        })
    }

    pub fn dh3_d3gab(&mut self) -> Result<FgPair, Error> {
        let terms = self.dh3_terms()?;
        Ok(FgPair {
            f: 0.,
            g: terms[0] / 6. - terms[1] / 6. + terms[2] / 6. - terms[3] / 3.,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basis_kernel_symmetries() {
        let (k1, k2, nu) = (0.13, 0.41, 0.37);

        assert_eq!(beta(k1, k2, nu), beta(k2, k1, nu));
        assert_eq!(alpha(k1, k2, nu), -alpha(k2, k1, nu));
        assert_eq!(gamma(nu), gamma(-nu));
    }

    #[test]
    fn context_orders() {
        let kern = Kernel::new(2, 1).unwrap();
        assert_eq!(kern.kern_order(), 3);
        assert_eq!(kern.spec_order(), 2);

        assert!(Kernel::with_order(3, 2).is_err());
        assert!(Kernel::with_order(2, MAX_KERN_ORDER + 1).is_err());
    }

    #[test]
    fn checked_accessors_reject_bad_slots() {
        let mut kern = Kernel::with_order(2, 2).unwrap();

        assert!(kern.set_k(2, 0.1).is_err());
        assert!(kern.set_nu(1, 1, 0.5).is_err());
        assert!(kern.get_nu(0, 1).is_ok());
    }

    #[test]
    fn populate_rejects_excessive_order() {
        let mut kern = Kernel::with_order(2, 2).unwrap();
        assert!(matches!(
            kern.populate_work(3),
            Err(Error::InvalidOrder {
                requested: 3,
                available: 2
            })
        ));
    }

    #[test]
    fn h2_matches_closed_form() {
        let mut kern = Kernel::with_order(2, 2).unwrap();
        kern.btst.a2_ga = 1.7;
        kern.btst.d2_ga = 1.2;

        kern.qset_k(0, 0.1);
        kern.qset_k(1, 0.2);
        kern.qset_nu(0, 1, 0.3);

        let h2 = kern.h2().unwrap();
        let b = beta(0.1, 0.2, 0.3);
        let g = gamma(0.3);

        assert!((h2.f - (b + 0.85 * g)).abs() < 1e-15);
        assert!((h2.g - (b + 0.6 * g)).abs() < 1e-15);

        // the dirty flag is restored, so the next call repopulates
        assert!(kern.compute_work);
    }
}
