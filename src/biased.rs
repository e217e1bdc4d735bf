//! Biased redshift-space kernels Z1, Z2, Z3, the phenomenological smoothing
//! factor, and their analytic derivatives with respect to every bias, RSD
//! and bootstrap parameter.
//!
//! The third-order assembler walks the three unordered base pairs exactly
//! like the bootstrap H3 kernel, evaluating for each pair the second-order
//! kernels at the pair plus an inner "Z2-prime" kernel whose
//! `k123 mu123 / 4` coupling ties it to the full triplet. Derivatives follow
//! the product rule through that structure; the chain factors
//! (`dk12/dk1 = (k1 + k2 nu12)/k12` and friends) are spelled out at the
//! point of use.

use crate::kernels::{
    beta, dbeta_k, dbeta_nu, dgamma_nu, gamma, FgPair, Kernel,
};
use crate::Error;

impl Kernel {
    /*  ------------------------------------------------  */
    /*  Scratch-free second order pieces                  */
    /*  ------------------------------------------------  */

    #[inline]
    pub(crate) fn z1_of(&self, mu: f64) -> f64 {
        self.bias.b1 + self.rsd.f * mu * mu
    }

    #[inline]
    fn dz1_mu_of(&self, mu: f64) -> f64 {
        2. * self.rsd.f * mu
    }

    /// `H2` evaluated at an explicit scale/angle triplet, used by the
    /// third-order assemblers which sweep all three base pairs.
    #[inline]
    pub(crate) fn h2_of(&self, k1: f64, k2: f64, nu12: f64) -> FgPair {
        let beta = beta(k1, k2, nu12);
        let gamma = gamma(nu12);

        FgPair {
            f: beta + 0.5 * self.btst.a2_ga * gamma,
            g: beta + 0.5 * self.btst.d2_ga * gamma,
        }
    }

    #[inline]
    fn dh2_k_of(&self, k1: f64, k2: f64, nu12: f64) -> FgPair {
        let dbeta = dbeta_k(k1, k2, nu12);
        FgPair { f: dbeta, g: dbeta }
    }

    #[inline]
    fn dh2_nu_of(&self, k1: f64, k2: f64, nu12: f64) -> FgPair {
        let dbeta = dbeta_nu(k1, k2, nu12);
        let dgamma = dgamma_nu(nu12);

        FgPair {
            f: dbeta + 0.5 * self.btst.a2_ga * dgamma,
            g: dbeta + 0.5 * self.btst.d2_ga * dgamma,
        }
    }

    /*  ------------------------------------------------  */
    /*  Smoothing                                         */
    /*  ------------------------------------------------  */

    /// Finger-of-god and spectroscopic-error damping,
    /// `exp(-(sum (ki mui)^2) sigv^2 / 2) exp(-(sum (ki mui)^2) sigs^2 / 2)`
    /// over the external wavevectors; vanished scales contribute nothing.
    pub fn smooth(&self) -> f64 {
        let mut arg = 0.;
        for i in 0..self.spec_order {
            arg += if self.k[i] == 0. {
                0.
            } else {
                (self.k[i] * self.mu[i]).powi(2)
            };
        }

        (-0.5 * arg * self.rsd.sigv.powi(2)).exp() * (-0.5 * arg * self.rsd.sigs.powi(2)).exp()
    }

    pub fn dsmooth_sigv(&self) -> f64 {
        let mut arg = 0.;
        for i in 0..self.spec_order {
            arg += if self.k[i] == 0. {
                0.
            } else {
                (self.k[i] * self.mu[i]).powi(2)
            };
        }

        -arg * self.rsd.sigv
            * (-0.5 * arg * self.rsd.sigv.powi(2)).exp()
            * (-0.5 * arg * self.rsd.sigs.powi(2)).exp()
    }

    /*  ------------------------------------------------  */
    /*  First order                                       */
    /*  ------------------------------------------------  */

    /// `Z1 = b1 + f mu^2`.
    pub fn z1(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(1)?;
        let out = self.z1_of(self.work[0].mu[0]);
        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz1_mu(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(1)?;
        let out = self.dz1_mu_of(self.work[0].mu[0]);
        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz1_b1(&self) -> f64 {
        1.
    }

    pub fn dz1_f(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(1)?;
        let mu = self.work[0].mu[0];
        self.finish_work(refreshed);
        Ok(mu * mu)
    }

    /*  ------------------------------------------------  */
    /*  Second order                                      */
    /*  ------------------------------------------------  */

    /// `Z2 = b1 F2 + f mu12^2 G2
    ///       + f k12 mu12 / 2 (mu2/k2 Z1(mu1) + mu1/k1 Z1(mu2))
    ///       - (b1 a2Ga - c2Ga)/2 gamma + b2/2`.
    pub fn z2(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let h2 = self.h2()?;

        let w2 = &self.work[1];
        let (k1, k2, k12) = (w2.k[0], w2.k[1], w2.k[2]);
        let (mu1, mu2, mu12) = (w2.mu[0], w2.mu[1], w2.mu[2]);
        let gamma = gamma(w2.nu[0]);

        let z1_1 = self.z1_of(mu1);
        let z1_2 = self.z1_of(mu2);

        let out = self.bias.b1 * h2.f
            + self.rsd.f * (mu12 * mu12) * h2.g
            + self.rsd.f * mu12 * k12 / 2. * (mu2 / k2 * z1_1 + mu1 / k1 * z1_2)
            - (self.bias.b1 * self.btst.a2_ga - self.bias.c2_ga) / 2. * gamma
            + self.bias.b2 / 2.;

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Derivative of `Z2` w.r.t. the first scale, with
    /// `dk12/dk1 = (k1 + k2 nu12)/k12`, `dmu12/dk1 = (mu1 - mu12 dk12)/k12`
    /// and `d(k12 mu12)/dk1 = mu1`.
    pub fn dz2_k(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let h2 = self.h2()?;
        let dh2 = self.dh2_k()?;

        let w2 = &self.work[1];
        let (k1, k2, k12) = (w2.k[0], w2.k[1], w2.k[2]);
        let (mu1, mu2, mu12) = (w2.mu[0], w2.mu[1], w2.mu[2]);

        let dk12 = (k1 + k2 * w2.nu[0]) / k12;
        let dmu12 = (mu1 - mu12 * dk12) / k12;

        let z1_1 = self.z1_of(mu1);
        let z1_2 = self.z1_of(mu2);

        let out = self.bias.b1 * dh2.f
            + self.rsd.f * mu12 * (2. * dmu12 * h2.g + mu12 * dh2.g)
            + self.rsd.f * mu1 / 2.
                * (mu2 / k2 * z1_1 + (mu1 - mu12 * k12 / k1) / k1 * z1_2);

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz2_nu(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let h2 = self.h2()?;
        let dh2 = self.dh2_nu()?;

        let w2 = &self.work[1];
        let (k1, k2, k12) = (w2.k[0], w2.k[1], w2.k[2]);
        let mu12 = w2.mu[2];

        let dk12 = k1 * k2 / k12;
        let dmu12 = -mu12 * dk12 / k12;
        let dgamma = dgamma_nu(w2.nu[0]);

        let out = self.bias.b1 * dh2.f
            + self.rsd.f * mu12 * (2. * dmu12 * h2.g + mu12 * dh2.g)
            - (self.bias.b1 * self.btst.a2_ga - self.bias.c2_ga) / 2. * dgamma;

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz2_mu(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let h2 = self.h2()?;

        let w2 = &self.work[1];
        let (k1, k2, k12) = (w2.k[0], w2.k[1], w2.k[2]);
        let (mu1, mu2, mu12) = (w2.mu[0], w2.mu[1], w2.mu[2]);

        let dmu12 = k1 / k12;

        let z1_1 = self.z1_of(mu1);
        let dz1_1 = self.dz1_mu_of(mu1);
        let z1_2 = self.z1_of(mu2);

        let out = 2. * self.rsd.f * mu12 * dmu12 * h2.g
            + self.rsd.f * k1 / 2. * (mu2 / k2 * z1_1 + mu1 / k1 * z1_2)
            + self.rsd.f * k12 * mu12 / 2. * (mu2 / k2 * dz1_1 + 1. / k1 * z1_2);

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz2_a2ga(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let dh2 = self.dh2_a2ga()?;

        let w2 = &self.work[1];
        let mu12 = w2.mu[2];
        let gamma = gamma(w2.nu[0]);

        let out = self.bias.b1 * dh2.f + self.rsd.f * (mu12 * mu12) * dh2.g
            - self.bias.b1 / 2. * gamma;

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz2_d2ga(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let dh2 = self.dh2_d2ga()?;

        let mu12 = self.work[1].mu[2];

        let out = self.bias.b1 * dh2.f + self.rsd.f * (mu12 * mu12) * dh2.g;

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz2_b1(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let h2 = self.h2()?;

        let w2 = &self.work[1];
        let (k1, k2, k12) = (w2.k[0], w2.k[1], w2.k[2]);
        let (mu1, mu2, mu12) = (w2.mu[0], w2.mu[1], w2.mu[2]);
        let gamma = gamma(w2.nu[0]);

        let out = h2.f
            + self.rsd.f * mu12 * k12 / 2. * (mu2 / k2 + mu1 / k1)
            - self.btst.a2_ga / 2. * gamma;

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz2_b2(&self) -> f64 {
        0.5
    }

    pub fn dz2_f(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let h2 = self.h2()?;

        let w2 = &self.work[1];
        let (k1, k2, k12) = (w2.k[0], w2.k[1], w2.k[2]);
        let (mu1, mu2, mu12) = (w2.mu[0], w2.mu[1], w2.mu[2]);

        let z1_1 = self.z1_of(mu1);
        let z1_2 = self.z1_of(mu2);

        let out = (mu12 * mu12) * h2.g
            + mu12 * k12 / 2. * (mu2 / k2 * z1_1 + mu1 / k1 * z1_2)
            + self.rsd.f * mu12 * k12 / 2.
                * (mu2 / k2 * (mu1 * mu1) + mu1 / k1 * (mu2 * mu2));

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz2_c2ga(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(2)?;
        let gamma = gamma(self.work[1].nu[0]);
        self.finish_work(refreshed);
        Ok(gamma / 2.)
    }

    /*  ------------------------------------------------  */
    /*  Third order                                       */
    /*  ------------------------------------------------  */

    /// Per-pair ingredients of the third-order assembler, read from the
    /// order-3 buffer layout `k = {k1, k2, k3, k12, k13, k23, k123}`.
    #[inline]
    fn pair_vars(&self, i: usize, j: usize, index: usize) -> (f64, f64, f64, f64, f64, f64) {
        let w3 = &self.work[2];
        (
            w3.k[i],
            w3.mu[i],
            w3.k[j + 1],
            w3.mu[j + 1],
            w3.nu[index],
            w3.nu[3 + index],
        )
    }

    /// The inner "Z2-prime" kernel of the pair `(i, j+1)`; differs from a
    /// plain `Z2` through the `k123 mu123 / 4` coupling to the full triplet.
    #[inline]
    fn z2_prime(
        &self,
        h2: FgPair,
        gamma_sin: f64,
        mu_sum: f64,
        z1_first: f64,
        z1_second: f64,
        k1: f64,
        mu1: f64,
        k2: f64,
        mu2: f64,
    ) -> f64 {
        let w3 = &self.work[2];

        self.bias.b1 * h2.f + self.rsd.f * (mu_sum * mu_sum) * h2.g
            + self.rsd.f * w3.k[6] * w3.mu[6] / 4.
                * (mu1 / k1 * z1_second + mu2 / k2 * z1_first)
            - (self.bias.b1 * self.btst.a2_ga - self.bias.c2_ga) / 2. * gamma_sin
            + self.bias.b2 / 2.
    }

    /// `Z3`: bootstrap `H3` plus the pair sweep combining `Z2'`, `G2 Z1`,
    /// `b2`, tidal and `bGam3` contributions.
    pub fn z3(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let h3 = self.h3()?;

        let w3 = &self.work[2];
        let z1s = [
            self.z1_of(w3.mu[0]),
            self.z1_of(w3.mu[1]),
            self.z1_of(w3.mu[2]),
        ];

        let mut h2s = [FgPair::default(); 3];
        let mut gamma_sum = [0.; 3];
        let mut z2s = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, mu1, k2, mu2, nu_sin, nu_sum) = self.pair_vars(i, j, index);

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                let gamma_sin = gamma(nu_sin);

                z2s[index] = self.z2_prime(
                    h2s[index],
                    gamma_sin,
                    self.work[2].mu[3 + index],
                    z1s[i],
                    z1s[j + 1],
                    k1,
                    mu1,
                    k2,
                    mu2,
                );

                gamma_sum[index] = gamma(nu_sum);

                index += 1;
            }
        }

        let w3 = &self.work[2];
        let (k123, mu123) = (w3.k[6], w3.mu[6]);

        let out = self.bias.b1 * h3.f + self.rsd.f * (mu123 * mu123) * h3.g
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[2] / w3.k[2] * z2s[0]
                    + w3.mu[1] / w3.k[1] * z2s[1]
                    + w3.mu[0] / w3.k[0] * z2s[2])
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[3] / w3.k[3] * h2s[0].g * z1s[2]
                    + w3.mu[4] / w3.k[4] * h2s[1].g * z1s[1]
                    + w3.mu[5] / w3.k[5] * h2s[2].g * z1s[0])
            + self.bias.b2 / 3. * (h2s[0].f + h2s[1].f + h2s[2].f)
            - (self.bias.b1 * self.btst.a2_ga - self.bias.c2_ga) / 3.
                * (gamma_sum[0] * h2s[0].f
                    + gamma_sum[1] * h2s[1].f
                    + gamma_sum[2] * h2s[2].f)
            - 2. * self.bias.b_gam3 / 3.
                * (gamma_sum[0] * (h2s[0].f - h2s[0].g)
                    + gamma_sum[1] * (h2s[1].f - h2s[1].g)
                    + gamma_sum[2] * (h2s[2].f - h2s[2].g));

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Derivative of `Z3` w.r.t. the first scale `k1`.
    pub fn dz3_k(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let h3 = self.h3()?;
        let dh3 = self.dh3_k()?;

        let w3 = &self.work[2];
        let (k123, mu123) = (w3.k[6], w3.mu[6]);

        let dk123 = (w3.k[0] + w3.k[1] * w3.nu[0] + w3.k[2] * w3.nu[1]) / k123;
        let dmu123 = (w3.mu[0] - mu123 * dk123) / k123;

        let z1s = [
            self.z1_of(w3.mu[0]),
            self.z1_of(w3.mu[1]),
            self.z1_of(w3.mu[2]),
        ];

        let mut h2s = [FgPair::default(); 3];
        let mut dh2s = [FgPair::default(); 3];
        let mut gamma_sum = [0.; 3];
        let mut dgamma_sum = [0.; 3];
        let mut z2s = [0.; 3];
        let mut dz2s = [0.; 3];
        let mut dk = [0.; 3];
        let mut dmu = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, mu1, k2, mu2, nu_sin, nu_sum) = self.pair_vars(i, j, index);
                let w3 = &self.work[2];
                let (k_sum, mu_sum) = (w3.k[3 + index], w3.mu[3 + index]);

                dk[index] = if i == 0 {
                    (k1 + k2 * w3.nu[j]) / k_sum
                } else {
                    0.
                };
                dmu[index] = if i == 0 {
                    (mu1 - mu_sum * dk[index]) / k_sum
                } else {
                    0.
                };
                let dnu = if i == 0 {
                    (w3.nu[1 - j] - nu_sum * dk[index]) / k_sum
                } else {
                    0.
                };

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                dh2s[index] = if i == 0 {
                    self.dh2_k_of(k1, k2, nu_sin)
                } else {
                    FgPair::default()
                };

                let gamma_sin = gamma(nu_sin);

                z2s[index] = self.z2_prime(
                    h2s[index], gamma_sin, mu_sum, z1s[i], z1s[j + 1], k1, mu1, k2, mu2,
                );

                // d(k123 mu123)/dk1 = mu1 hits every pair; the pairs
                // containing vector 1 pick up the remaining product-rule
                // terms
                dz2s[index] = self.rsd.f * w3.mu[0] / 4.
                    * (mu1 / k1 * z1s[j + 1] + mu2 / k2 * z1s[i]);
                if i == 0 {
                    dz2s[index] += self.bias.b1 * dh2s[index].f
                        + self.rsd.f
                            * mu_sum
                            * (2. * dmu[index] * h2s[index].g + mu_sum * dh2s[index].g)
                        - self.rsd.f * w3.k[6] * w3.mu[6] / 4. * mu1 / (k1 * k1)
                            * z1s[j + 1];
                }

                gamma_sum[index] = gamma(nu_sum);
                dgamma_sum[index] = dgamma_nu(nu_sum) * dnu;

                index += 1;
            }
        }

        let w3 = &self.work[2];

        let out = self.bias.b1 * dh3.f
            + self.rsd.f * mu123 * (2. * dmu123 * h3.g + mu123 * dh3.g)
            + self.rsd.f * w3.mu[0] / 3.
                * (w3.mu[2] / w3.k[2] * z2s[0]
                    + w3.mu[1] / w3.k[1] * z2s[1]
                    + w3.mu[0] / w3.k[0] * z2s[2])
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[2] / w3.k[2] * dz2s[0]
                    + w3.mu[1] / w3.k[1] * dz2s[1]
                    + w3.mu[0] / w3.k[0] * dz2s[2]
                    - w3.mu[0] / (w3.k[0] * w3.k[0]) * z2s[2])
            + self.rsd.f * w3.mu[0] / 3.
                * (w3.mu[3] / w3.k[3] * h2s[0].g * z1s[2]
                    + w3.mu[4] / w3.k[4] * h2s[1].g * z1s[1]
                    + w3.mu[5] / w3.k[5] * h2s[2].g * z1s[0])
            + self.rsd.f * mu123 * k123 / 3.
                * (((dmu[0] - w3.mu[3] * dk[0] / w3.k[3]) / w3.k[3] * h2s[0].g
                    + w3.mu[3] / w3.k[3] * dh2s[0].g)
                    * z1s[2]
                    + ((dmu[1] - w3.mu[4] * dk[1] / w3.k[4]) / w3.k[4] * h2s[1].g
                        + w3.mu[4] / w3.k[4] * dh2s[1].g)
                        * z1s[1])
            + self.bias.b2 / 3. * (dh2s[0].f + dh2s[1].f)
            - (self.bias.b1 * self.btst.a2_ga - self.bias.c2_ga) / 3.
                * (dgamma_sum[0] * h2s[0].f
                    + gamma_sum[0] * dh2s[0].f
                    + dgamma_sum[1] * h2s[1].f
                    + gamma_sum[1] * dh2s[1].f)
            - 2. * self.bias.b_gam3 / 3.
                * (dgamma_sum[0] * (h2s[0].f - h2s[0].g)
                    + gamma_sum[0] * (dh2s[0].f - dh2s[0].g)
                    + dgamma_sum[1] * (h2s[1].f - h2s[1].g)
                    + gamma_sum[1] * (dh2s[1].f - dh2s[1].g));

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Derivative of `Z3` w.r.t. the base cosine `nu12`.
    pub fn dz3_nu(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let h3 = self.h3()?;
        let dh3 = self.dh3_nu()?;

        let w3 = &self.work[2];
        let (k123, mu123) = (w3.k[6], w3.mu[6]);

        let dk123 = w3.k[0] * w3.k[1] / k123;
        let dmu123 = -mu123 * dk123 / k123;

        let z1s = [
            self.z1_of(w3.mu[0]),
            self.z1_of(w3.mu[1]),
            self.z1_of(w3.mu[2]),
        ];

        let mut h2s = [FgPair::default(); 3];
        let mut dh2s = [FgPair::default(); 3];
        let mut gamma_sum = [0.; 3];
        let mut dgamma_sum = [0.; 3];
        let mut dz2s = [0.; 3];
        let mut dk = [0.; 3];
        let mut dmu = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, _mu1, k2, _mu2, nu_sin, nu_sum) = self.pair_vars(i, j, index);
                let w3 = &self.work[2];
                let (k_sum, mu_sum) = (w3.k[3 + index], w3.mu[3 + index]);

                // only the (1,2) pair sees nu12 directly; the summed
                // cosines of the other pairs shift through
                // dnu13_2/dnu12 = k1/k13 and dnu23_1/dnu12 = k2/k23
                dk[index] = if j == 0 { k1 * k2 / k_sum } else { 0. };
                dmu[index] = if j == 0 {
                    -mu_sum * dk[index] / k_sum
                } else {
                    0.
                };
                let dnu = if j == 0 {
                    -nu_sum * dk[index] / k_sum
                } else {
                    w3.k[index - 1] / k_sum
                };

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                dh2s[index] = if j == 0 {
                    self.dh2_nu_of(k1, k2, nu_sin)
                } else {
                    FgPair::default()
                };

                let dgamma_sin = if j == 0 { dgamma_nu(nu_sin) } else { 0. };

                dz2s[index] = if j == 0 {
                    self.bias.b1 * dh2s[index].f
                        + self.rsd.f
                            * mu_sum
                            * (2. * dmu[index] * h2s[index].g + mu_sum * dh2s[index].g)
                        - (self.bias.b1 * self.btst.a2_ga - self.bias.c2_ga) / 2. * dgamma_sin
                } else {
                    0.
                };

                gamma_sum[index] = gamma(nu_sum);
                dgamma_sum[index] = dgamma_nu(nu_sum) * dnu;

                index += 1;
            }
        }

        let w3 = &self.work[2];

        let out = self.bias.b1 * dh3.f
            + self.rsd.f * mu123 * (2. * dmu123 * h3.g + mu123 * dh3.g)
            + self.rsd.f * mu123 * k123 / 3. * (w3.mu[2] / w3.k[2] * dz2s[0])
            + self.rsd.f * mu123 * k123 / 3.
                * (((dmu[0] - w3.mu[3] * dk[0] / w3.k[3]) / w3.k[3] * h2s[0].g
                    + w3.mu[3] / w3.k[3] * dh2s[0].g)
                    * z1s[2])
            + self.bias.b2 / 3. * dh2s[0].f
            - (self.bias.b1 * self.btst.a2_ga - self.bias.c2_ga) / 3.
                * (dgamma_sum[0] * h2s[0].f
                    + gamma_sum[0] * dh2s[0].f
                    + dgamma_sum[1] * h2s[1].f
                    + dgamma_sum[2] * h2s[2].f)
            - 2. * self.bias.b_gam3 / 3.
                * (dgamma_sum[0] * (h2s[0].f - h2s[0].g)
                    + gamma_sum[0] * (dh2s[0].f - dh2s[0].g)
                    + dgamma_sum[1] * (h2s[1].f - h2s[1].g)
                    + dgamma_sum[2] * (h2s[2].f - h2s[2].g));

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Derivative of `Z3` w.r.t. the first line-of-sight cosine `mu1`.
    pub fn dz3_mu(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let h3 = self.h3()?;

        let w3 = &self.work[2];
        let (k123, mu123) = (w3.k[6], w3.mu[6]);
        let dmu123 = w3.k[0] / k123;

        let z1s = [
            self.z1_of(w3.mu[0]),
            self.z1_of(w3.mu[1]),
            self.z1_of(w3.mu[2]),
        ];
        let dz1s = [self.dz1_mu_of(w3.mu[0]), 0., 0.];

        let mut h2s = [FgPair::default(); 3];
        let mut z2s = [0.; 3];
        let mut dz2s = [0.; 3];
        let mut dmu = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, mu1, k2, mu2, nu_sin, _nu_sum) = self.pair_vars(i, j, index);
                let w3 = &self.work[2];
                let mu_sum = w3.mu[3 + index];

                dmu[index] = k1 / w3.k[3 + index];

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                let gamma_sin = gamma(nu_sin);

                z2s[index] = self.z2_prime(
                    h2s[index], gamma_sin, mu_sum, z1s[i], z1s[j + 1], k1, mu1, k2, mu2,
                );

                // d(k123 mu123)/dmu1 = k1 hits every pair's Z2'
                dz2s[index] = self.rsd.f * w3.k[0] / 4.
                    * (mu1 / k1 * z1s[j + 1] + mu2 / k2 * z1s[i]);
                if i == 0 {
                    dz2s[index] += 2. * self.rsd.f * mu_sum * dmu[index] * h2s[index].g
                        + self.rsd.f * w3.k[6] * w3.mu[6] / 4.
                            * (1. / k1 * z1s[j + 1] + mu2 / k2 * dz1s[i]);
                }

                index += 1;
            }
        }

        let w3 = &self.work[2];

        let out = 2. * self.rsd.f * mu123 * dmu123 * h3.g
            + self.rsd.f * w3.k[0] / 3.
                * (w3.mu[2] / w3.k[2] * z2s[0]
                    + w3.mu[1] / w3.k[1] * z2s[1]
                    + w3.mu[0] / w3.k[0] * z2s[2])
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[2] / w3.k[2] * dz2s[0]
                    + w3.mu[1] / w3.k[1] * dz2s[1]
                    + w3.mu[0] / w3.k[0] * dz2s[2]
                    + 1. / w3.k[0] * z2s[2])
            + self.rsd.f * w3.k[0] / 3.
                * (w3.mu[3] / w3.k[3] * h2s[0].g * z1s[2]
                    + w3.mu[4] / w3.k[4] * h2s[1].g * z1s[1]
                    + w3.mu[5] / w3.k[5] * h2s[2].g * z1s[0])
            + self.rsd.f * mu123 * k123 / 3.
                * (dmu[0] / w3.k[3] * h2s[0].g * z1s[2]
                    + dmu[1] / w3.k[4] * h2s[1].g * z1s[1]
                    + w3.mu[5] / w3.k[5] * h2s[2].g * dz1s[0]);

        self.finish_work(refreshed);
        Ok(out)
    }

    /// Shared pair sweep of the `a2Ga`/`d2Ga` derivatives: the `Z2'`
    /// derivative reduces to the `dH2` pieces, plus `-b1/2 gamma` for
    /// `a2Ga`, which also enters `Z2'` and `Z3` through the tidal term.
    fn dz3_bootstrap(&mut self, dh3: FgPair, wrt_a2ga: bool) -> Result<f64, Error> {
        let w3 = &self.work[2];

        let z1s = [
            self.z1_of(w3.mu[0]),
            self.z1_of(w3.mu[1]),
            self.z1_of(w3.mu[2]),
        ];

        let mut h2s = [FgPair::default(); 3];
        let mut dh2s = [FgPair::default(); 3];
        let mut gamma_sum = [0.; 3];
        let mut dz2s = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, _mu1, k2, _mu2, nu_sin, nu_sum) = self.pair_vars(i, j, index);
                let mu_sum = self.work[2].mu[3 + index];

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                let gamma_sin = gamma(nu_sin);
                dh2s[index] = if wrt_a2ga {
                    FgPair {
                        f: 0.5 * gamma_sin,
                        g: 0.,
                    }
                } else {
                    FgPair {
                        f: 0.,
                        g: 0.5 * gamma_sin,
                    }
                };

                dz2s[index] = self.bias.b1 * dh2s[index].f
                    + self.rsd.f * (mu_sum * mu_sum) * dh2s[index].g;
                if wrt_a2ga {
                    dz2s[index] -= self.bias.b1 / 2. * gamma_sin;
                }

                gamma_sum[index] = gamma(nu_sum);

                index += 1;
            }
        }

        let w3 = &self.work[2];
        let (k123, mu123) = (w3.k[6], w3.mu[6]);

        let mut out = self.bias.b1 * dh3.f + self.rsd.f * (mu123 * mu123) * dh3.g
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[2] / w3.k[2] * dz2s[0]
                    + w3.mu[1] / w3.k[1] * dz2s[1]
                    + w3.mu[0] / w3.k[0] * dz2s[2])
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[3] / w3.k[3] * dh2s[0].g * z1s[2]
                    + w3.mu[4] / w3.k[4] * dh2s[1].g * z1s[1]
                    + w3.mu[5] / w3.k[5] * dh2s[2].g * z1s[0])
            + self.bias.b2 / 3. * (dh2s[0].f + dh2s[1].f + dh2s[2].f)
            - (self.bias.b1 * self.btst.a2_ga - self.bias.c2_ga) / 3.
                * (gamma_sum[0] * dh2s[0].f
                    + gamma_sum[1] * dh2s[1].f
                    + gamma_sum[2] * dh2s[2].f)
            - 2. * self.bias.b_gam3 / 3.
                * (gamma_sum[0] * (dh2s[0].f - dh2s[0].g)
                    + gamma_sum[1] * (dh2s[1].f - dh2s[1].g)
                    + gamma_sum[2] * (dh2s[2].f - dh2s[2].g));

        if wrt_a2ga {
            out -= self.bias.b1 / 3.
                * (gamma_sum[0] * h2s[0].f
                    + gamma_sum[1] * h2s[1].f
                    + gamma_sum[2] * h2s[2].f);
        }

        Ok(out)
    }

    pub fn dz3_a2ga(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let dh3 = self.dh3_a2ga()?;
        let out = self.dz3_bootstrap(dh3, true);
        self.finish_work(refreshed);
        out
    }

    pub fn dz3_d2ga(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let dh3 = self.dh3_d2ga()?;
        let out = self.dz3_bootstrap(dh3, false);
        self.finish_work(refreshed);
        out
    }

    /// `dZ3/dh = b1 dF3/dh + f mu123^2 dG3/dh`; nothing else in `Z3`
    /// carries `h`.
    pub fn dz3_h(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let dh3 = self.dh3_h()?;
        let mu123 = self.work[2].mu[6];
        let out = self.bias.b1 * dh3.f + self.rsd.f * (mu123 * mu123) * dh3.g;
        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz3_a3gaa(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let dh3 = self.dh3_a3gaa()?;
        let mu123 = self.work[2].mu[6];
        let out = self.bias.b1 * dh3.f + self.rsd.f * (mu123 * mu123) * dh3.g;
        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz3_a3gab(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let dh3 = self.dh3_a3gab()?;
        let mu123 = self.work[2].mu[6];
        let out = self.bias.b1 * dh3.f + self.rsd.f * (mu123 * mu123) * dh3.g;
        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz3_d3gaa(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let dh3 = self.dh3_d3gaa()?;
        let mu123 = self.work[2].mu[6];
        let out = self.bias.b1 * dh3.f + self.rsd.f * (mu123 * mu123) * dh3.g;
        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz3_d3gab(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let dh3 = self.dh3_d3gab()?;
        let mu123 = self.work[2].mu[6];
        let out = self.bias.b1 * dh3.f + self.rsd.f * (mu123 * mu123) * dh3.g;
        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz3_b1(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let h3 = self.h3()?;

        let w3 = &self.work[2];
        let (k123, mu123) = (w3.k[6], w3.mu[6]);

        let mut h2s = [FgPair::default(); 3];
        let mut gamma_sum = [0.; 3];
        let mut dz2s = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, mu1, k2, mu2, nu_sin, nu_sum) = self.pair_vars(i, j, index);
                let w3 = &self.work[2];

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                let gamma_sin = gamma(nu_sin);

                // dZ1/db1 = 1 for every argument
                dz2s[index] = h2s[index].f
                    + self.rsd.f * w3.k[6] * w3.mu[6] / 4. * (mu1 / k1 + mu2 / k2)
                    - self.btst.a2_ga / 2. * gamma_sin;

                gamma_sum[index] = gamma(nu_sum);

                index += 1;
            }
        }

        let w3 = &self.work[2];

        let out = h3.f
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[2] / w3.k[2] * dz2s[0]
                    + w3.mu[1] / w3.k[1] * dz2s[1]
                    + w3.mu[0] / w3.k[0] * dz2s[2])
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[3] / w3.k[3] * h2s[0].g
                    + w3.mu[4] / w3.k[4] * h2s[1].g
                    + w3.mu[5] / w3.k[5] * h2s[2].g)
            - self.btst.a2_ga / 3.
                * (gamma_sum[0] * h2s[0].f
                    + gamma_sum[1] * h2s[1].f
                    + gamma_sum[2] * h2s[2].f);

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz3_c2ga(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;

        let mut h2s = [FgPair::default(); 3];
        let mut gamma_sum = [0.; 3];
        let mut dz2s = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, _mu1, k2, _mu2, nu_sin, nu_sum) = self.pair_vars(i, j, index);

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                dz2s[index] = gamma(nu_sin) / 2.;
                gamma_sum[index] = gamma(nu_sum);

                index += 1;
            }
        }

        let w3 = &self.work[2];

        let out = self.rsd.f * w3.mu[6] * w3.k[6] / 3.
            * (w3.mu[2] / w3.k[2] * dz2s[0]
                + w3.mu[1] / w3.k[1] * dz2s[1]
                + w3.mu[0] / w3.k[0] * dz2s[2])
            + 1. / 3.
                * (gamma_sum[0] * h2s[0].f
                    + gamma_sum[1] * h2s[1].f
                    + gamma_sum[2] * h2s[2].f);

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz3_bgam3(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;

        let mut h2s = [FgPair::default(); 3];
        let mut gamma_sum = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, _mu1, k2, _mu2, nu_sin, nu_sum) = self.pair_vars(i, j, index);

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                gamma_sum[index] = gamma(nu_sum);

                index += 1;
            }
        }

        let out = -2. / 3.
            * (gamma_sum[0] * (h2s[0].f - h2s[0].g)
                + gamma_sum[1] * (h2s[1].f - h2s[1].g)
                + gamma_sum[2] * (h2s[2].f - h2s[2].g));

        self.finish_work(refreshed);
        Ok(out)
    }

    pub fn dz3_f(&mut self) -> Result<f64, Error> {
        let refreshed = self.prepare_work(3)?;
        let h3 = self.h3()?;

        let w3 = &self.work[2];
        let (k123, mu123) = (w3.k[6], w3.mu[6]);

        let z1s = [
            self.z1_of(w3.mu[0]),
            self.z1_of(w3.mu[1]),
            self.z1_of(w3.mu[2]),
        ];
        let dz1s = [
            w3.mu[0] * w3.mu[0],
            w3.mu[1] * w3.mu[1],
            w3.mu[2] * w3.mu[2],
        ];

        let mut h2s = [FgPair::default(); 3];
        let mut z2s = [0.; 3];
        let mut dz2s = [0.; 3];

        let mut index = 0;
        for i in 0..2usize {
            for j in i..2usize {
                let (k1, mu1, k2, mu2, nu_sin, _nu_sum) = self.pair_vars(i, j, index);
                let w3 = &self.work[2];
                let mu_sum = w3.mu[3 + index];

                h2s[index] = self.h2_of(k1, k2, nu_sin);
                let gamma_sin = gamma(nu_sin);

                z2s[index] = self.z2_prime(
                    h2s[index], gamma_sin, mu_sum, z1s[i], z1s[j + 1], k1, mu1, k2, mu2,
                );

                dz2s[index] = (mu_sum * mu_sum) * h2s[index].g
                    + w3.k[6] * w3.mu[6] / 4. * (mu1 / k1 * z1s[j + 1] + mu2 / k2 * z1s[i])
                    + self.rsd.f * w3.k[6] * w3.mu[6] / 4.
                        * (mu1 / k1 * dz1s[j + 1] + mu2 / k2 * dz1s[i]);

                index += 1;
            }
        }

        let w3 = &self.work[2];

        let out = (mu123 * mu123) * h3.g
            + mu123 * k123 / 3.
                * (w3.mu[2] / w3.k[2] * z2s[0]
                    + w3.mu[1] / w3.k[1] * z2s[1]
                    + w3.mu[0] / w3.k[0] * z2s[2])
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[2] / w3.k[2] * dz2s[0]
                    + w3.mu[1] / w3.k[1] * dz2s[1]
                    + w3.mu[0] / w3.k[0] * dz2s[2])
            + mu123 * k123 / 3.
                * (w3.mu[3] / w3.k[3] * h2s[0].g * z1s[2]
                    + w3.mu[4] / w3.k[4] * h2s[1].g * z1s[1]
                    + w3.mu[5] / w3.k[5] * h2s[2].g * z1s[0])
            + self.rsd.f * mu123 * k123 / 3.
                * (w3.mu[3] / w3.k[3] * h2s[0].g * dz1s[2]
                    + w3.mu[4] / w3.k[4] * h2s[1].g * dz1s[1]
                    + w3.mu[5] / w3.k[5] * h2s[2].g * dz1s[0]);

        self.finish_work(refreshed);
        Ok(out)
    }
}
