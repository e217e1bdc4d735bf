//! One-loop power-spectrum integrands and their parameter derivatives.
//!
//! The integrand binds a [`Kernel`] with spectrum order 2 and kernel order 3
//! to a linear power spectrum. Slot 0 of the context carries the external
//! wavevector `(k, mu)`; the loop momentum and its reflection occupy slots 1
//! and 2. Integration variables are `(q, nu, phi)`: loop magnitude, cosine
//! against the external vector and azimuth. The slot assignments below are
//! load-bearing; a transposition produces a wrong but finite number.
//!
//! P22 carries the `Z2(-q, q)` renormalisation subtraction; the P13 family
//! zeroes `b2` around the `Z3` evaluation and restores it afterwards.

use crate::kernels::Kernel;
use crate::power::LinearPower;
use crate::Error;

pub struct LoopIntegrand<'a, P: LinearPower> {
    kern: &'a mut Kernel,
    power: &'a P,
}

/// Slot geometry of a P22-style sample: external scale/angle plus the
/// derived `|k - q|` quantities.
struct P22Vars {
    k: f64,
    mu: f64,
    q: f64,
    nu: f64,
    muq: f64,
    kq: f64,
    mukq: f64,
    nukq: f64,
    cphi: f64,
}

/// Slot geometry of a P13-style sample.
struct P13Vars {
    k: f64,
    mu: f64,
    q: f64,
    nu: f64,
    muq: f64,
    cphi: f64,
}

impl<'a, P: LinearPower> LoopIntegrand<'a, P> {
    pub fn new(kern: &'a mut Kernel, power: &'a P) -> Result<LoopIntegrand<'a, P>, Error> {
        if kern.spec_order() != 2 || kern.kern_order() < 3 {
            return Err(Error::InvalidOrder {
                requested: 3,
                available: kern.kern_order(),
            });
        }

        Ok(LoopIntegrand { kern, power })
    }

    pub fn kernel(&mut self) -> &mut Kernel {
        self.kern
    }

    /*  ------------------------------------------------  */
    /*  Slot assignment                                   */
    /*  ------------------------------------------------  */

    /// P22 configuration: slot 0 becomes `k_ - q_`, slot 1 the loop
    /// momentum `q_`.
    fn assign_p22(&mut self, var: [f64; 3]) -> P22Vars {
        let k = self.kern.qget_k(0);
        let mu = self.kern.qget_mu(0);

        let q = var[0];
        let nu = var[1];
        let cphi = var[2].cos();

        self.kern.qset_k(1, q);

        let muq = ((1. - mu * mu) * (1. - nu * nu)).sqrt() * cphi + mu * nu;
        self.kern.qset_mu(1, muq);

        let kq = (q * q + k * k - 2. * k * q * nu).sqrt();
        self.kern.qset_k(0, kq);

        let mukq = (k * mu - q * muq) / kq;
        self.kern.qset_mu(0, mukq);

        let nukq = (k * nu - q) / kq;
        self.kern.qset_nu(0, 1, nukq);

        P22Vars {
            k,
            mu,
            q,
            nu,
            muq,
            kq,
            mukq,
            nukq,
            cphi,
        }
    }

    /// Move slot 0 to the renormalisation point `(-q_, q_)`.
    fn assign_p22_renorm(&mut self, vars: &P22Vars) {
        self.kern.qset_k(0, vars.q);
        self.kern.qset_mu(0, -vars.muq);
        self.kern.qset_nu(0, 1, -1.);
    }

    /// Restore the external wavevector in slot 0.
    fn restore_external(&mut self, k: f64, mu: f64) {
        self.kern.qset_k(0, k);
        self.kern.qset_mu(0, mu);
    }

    /// P13 configuration: slots 1 and 2 become `q_` and `-q_`.
    fn assign_p13(&mut self, var: [f64; 3]) -> P13Vars {
        let k = self.kern.qget_k(0);
        let mu = self.kern.qget_mu(0);

        let q = var[0];
        let nu = var[1];
        let cphi = var[2].cos();

        self.kern.qset_k(1, q);
        self.kern.qset_k(2, q);

        self.kern.qset_nu(0, 1, nu);
        self.kern.qset_nu(0, 2, -nu);
        self.kern.qset_nu(1, 2, -1.);

        let muq = ((1. - mu * mu) * (1. - nu * nu)).sqrt() * cphi + mu * nu;
        self.kern.qset_mu(1, muq);
        self.kern.qset_mu(2, -muq);

        P13Vars {
            k,
            mu,
            q,
            nu,
            muq,
            cphi,
        }
    }

    /*  ------------------------------------------------  */
    /*  Values                                            */
    /*  ------------------------------------------------  */

    /// Full one-loop integrand, `P22 + P13`.
    pub fn pnl(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        Ok(self.p22(var)? + self.p13(var)?)
    }

    /// `q^2 P(q) (Z2(k_-q_, q_)^2 P(|k_-q_|) - Z2(-q_, q_)^2 P(q))`; the
    /// subtraction renormalises the constant `b2/2` piece of `Z2`.
    pub fn p22(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p22(var);

        let pq = self.power.eval(vars.q)?;
        let pkq = self.power.eval(vars.kq)?;

        let z2 = self.kern.z2()?;

        self.assign_p22_renorm(&vars);
        let z2_re = self.kern.z2()?;

        let result = vars.q * vars.q * pq * (z2 * z2 * pkq - z2_re * z2_re * pq);

        self.restore_external(vars.k, vars.mu);
        Ok(result)
    }

    /// `3 q^2 P(q) Z3(k_, q_, -q_) Z1(k_) P(k)` with `b2` renormalised to
    /// zero inside `Z3`.
    pub fn p13(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p13(var);

        let pk = self.power.eval(vars.k)?;
        let pq = self.power.eval(vars.q)?;

        let b2 = self.kern.bias.b2;
        self.kern.bias.b2 = 0.;

        let z1 = self.kern.z1()?;
        let z3 = self.kern.z3()?;

        self.kern.bias.b2 = b2;

        Ok(3. * vars.q * vars.q * pq * z3 * z1 * pk)
    }

    /*  ------------------------------------------------  */
    /*  P22 parameter derivatives                         */
    /*  ------------------------------------------------  */

    /// `2 q^2 P(q) dZ2 Z2 P(|k-q|)` for a parameter derivative without a
    /// renormalisation term.
    fn dp22_plain(
        &mut self,
        var: [f64; 3],
        dz2: fn(&mut Kernel) -> Result<f64, Error>,
    ) -> Result<f64, Error> {
        let vars = self.assign_p22(var);

        let pq = self.power.eval(vars.q)?;
        let pkq = self.power.eval(vars.kq)?;

        let z2 = self.kern.z2()?;
        let dz2 = dz2(self.kern)?;

        let result = 2. * vars.q * vars.q * pq * z2 * dz2 * pkq;

        self.restore_external(vars.k, vars.mu);
        Ok(result)
    }

    pub fn dp22_a2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp22_plain(var, Kernel::dz2_a2ga)
    }

    pub fn dp22_d2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp22_plain(var, Kernel::dz2_d2ga)
    }

    pub fn dp22_b1(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp22_plain(var, Kernel::dz2_b1)
    }

    pub fn dp22_f(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp22_plain(var, Kernel::dz2_f)
    }

    pub fn dp22_c2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp22_plain(var, Kernel::dz2_c2ga)
    }

    /// The `b2` derivative keeps the renormalisation subtraction since
    /// `dZ2/db2 = 1/2` at the subtraction point as well.
    pub fn dp22_b2(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p22(var);

        let pq = self.power.eval(vars.q)?;
        let pkq = self.power.eval(vars.kq)?;

        let z2 = self.kern.z2()?;
        let dz2 = self.kern.dz2_b2();

        self.assign_p22_renorm(&vars);
        let z2_re = self.kern.z2()?;
        let dz2_re = self.kern.dz2_b2();

        let result = 2. * vars.q * vars.q * pq * (z2 * dz2 * pkq - z2_re * dz2_re * pq);

        self.restore_external(vars.k, vars.mu);
        Ok(result)
    }

    /// External-scale derivative; chains through `|k-q|`, the shifted
    /// cosines and the linear power slope.
    pub fn dp22_k(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p22(var);

        let dkq = (vars.k - vars.q * vars.nu) / vars.kq;
        let dmukq = (vars.mu - vars.mukq * dkq) / vars.kq;
        let dnukq = (vars.nu - vars.nukq * dkq) / vars.kq;

        let pq = self.power.eval(vars.q)?;
        let pkq = self.power.eval(vars.kq)?;
        let dpkq = self.power.deriv(vars.kq)? * dkq;

        let z2 = self.kern.z2()?;
        let dz2 = self.kern.dz2_k()? * dkq
            + self.kern.dz2_nu()? * dnukq
            + self.kern.dz2_mu()? * dmukq;

        let result = vars.q * vars.q * pq * z2 * (2. * dz2 * pkq + z2 * dpkq);

        self.restore_external(vars.k, vars.mu);
        Ok(result)
    }

    /// External-angle derivative; `muq` depends on `mu` as well, so after
    /// the `(k_-q_, q_)` contribution the slots are re-pointed to
    /// `(q_, k_-q_)` for the partner term.
    pub fn dp22_mu(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p22(var);

        let dmuq =
            -vars.mu * ((1. - vars.nu * vars.nu) / (1. - vars.mu * vars.mu)).sqrt() * vars.cphi
                + vars.nu;
        let dmukq = (vars.k - vars.q * dmuq) / vars.kq;

        let pq = self.power.eval(vars.q)?;
        let pkq = self.power.eval(vars.kq)?;

        let z2 = self.kern.z2()?;
        let mut dz2 = self.kern.dz2_mu()? * dmukq;

        // derivative through muq with the roles swapped
        self.kern.qset_k(0, vars.q);
        self.kern.qset_k(1, vars.kq);
        self.kern.qset_mu(0, vars.muq);
        self.kern.qset_mu(1, vars.mukq);

        dz2 += self.kern.dz2_mu()? * dmuq;

        let result = 2. * vars.q * vars.q * pq * z2 * dz2 * pkq;

        self.kern.qset_k(1, vars.q);
        self.kern.qset_mu(1, vars.muq);
        self.restore_external(vars.k, vars.mu);
        Ok(result)
    }

    /*  ------------------------------------------------  */
    /*  P13 parameter derivatives                         */
    /*  ------------------------------------------------  */

    /// `3 q^2 P(q) dZ3 Z1 P(k)` with `b2` zeroed around the evaluation.
    fn dp13_plain(
        &mut self,
        var: [f64; 3],
        dz3: fn(&mut Kernel) -> Result<f64, Error>,
    ) -> Result<f64, Error> {
        let vars = self.assign_p13(var);

        let pk = self.power.eval(vars.k)?;
        let pq = self.power.eval(vars.q)?;

        let b2 = self.kern.bias.b2;
        self.kern.bias.b2 = 0.;

        let z1 = self.kern.z1()?;
        let dz3 = dz3(self.kern)?;

        self.kern.bias.b2 = b2;

        Ok(3. * vars.q * vars.q * pq * dz3 * z1 * pk)
    }

    /// Includes the `h = a2Ga - 1` chain term, `dZ3/da2Ga + dZ3/dh`.
    pub fn dp13_a2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, |kern: &mut Kernel| Ok(kern.dz3_a2ga()? + kern.dz3_h()?))
    }

    pub fn dp13_d2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, Kernel::dz3_d2ga)
    }

    pub fn dp13_h(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, Kernel::dz3_h)
    }

    pub fn dp13_a3gaa(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, Kernel::dz3_a3gaa)
    }

    pub fn dp13_a3gab(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, Kernel::dz3_a3gab)
    }

    pub fn dp13_d3gaa(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, Kernel::dz3_d3gaa)
    }

    pub fn dp13_d3gab(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, Kernel::dz3_d3gab)
    }

    pub fn dp13_c2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, Kernel::dz3_c2ga)
    }

    pub fn dp13_bgam3(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_plain(var, Kernel::dz3_bgam3)
    }

    /// `b1` also enters through the external `Z1(k_)` prefactor.
    pub fn dp13_b1(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p13(var);

        let pk = self.power.eval(vars.k)?;
        let pq = self.power.eval(vars.q)?;

        let b2 = self.kern.bias.b2;
        self.kern.bias.b2 = 0.;

        let z1 = self.kern.z1()?;
        let dz1 = self.kern.dz1_b1();
        let z3 = self.kern.z3()?;
        let dz3 = self.kern.dz3_b1()?;

        self.kern.bias.b2 = b2;

        Ok(3. * vars.q * vars.q * pq * (dz3 * z1 + z3 * dz1) * pk)
    }

    pub fn dp13_f(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p13(var);

        let pk = self.power.eval(vars.k)?;
        let pq = self.power.eval(vars.q)?;

        let b2 = self.kern.bias.b2;
        self.kern.bias.b2 = 0.;

        let z1 = self.kern.z1()?;
        let dz1 = self.kern.dz1_f()?;
        let z3 = self.kern.z3()?;
        let dz3 = self.kern.dz3_f()?;

        self.kern.bias.b2 = b2;

        Ok(3. * vars.q * vars.q * pq * (dz3 * z1 + z3 * dz1) * pk)
    }

    pub fn dp13_k(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p13(var);

        let pk = self.power.eval(vars.k)?;
        let dpk = self.power.deriv(vars.k)?;
        let pq = self.power.eval(vars.q)?;

        let b2 = self.kern.bias.b2;
        self.kern.bias.b2 = 0.;

        let z1 = self.kern.z1()?;
        let z3 = self.kern.z3()?;
        let dz3 = self.kern.dz3_k()?;

        self.kern.bias.b2 = b2;

        Ok(3. * vars.q * vars.q * pq * (dz3 * pk + z3 * dpk) * z1)
    }

    /// The `+-muq` slots both depend on `mu`; each contributes its own
    /// `dZ3/dmu` term with the loop momentum rotated into slot 0. The two
    /// contributions are not equal and opposite, so neither can be folded
    /// into the other.
    pub fn dp13_mu(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        let vars = self.assign_p13(var);

        let dmuq =
            -vars.mu * ((1. - vars.nu * vars.nu) / (1. - vars.mu * vars.mu)).sqrt() * vars.cphi
                + vars.nu;

        let pk = self.power.eval(vars.k)?;
        let pq = self.power.eval(vars.q)?;

        let b2 = self.kern.bias.b2;
        self.kern.bias.b2 = 0.;

        let z1 = self.kern.z1()?;
        let dz1 = self.kern.dz1_mu()?;

        let z3 = self.kern.z3()?;
        let mut dz3 = self.kern.dz3_mu()?;

        // derivative through +muq: configuration (q_, k_, -q_)
        self.kern.qset_k(0, vars.q);
        self.kern.qset_k(1, vars.k);
        self.kern.qset_k(2, vars.q);

        self.kern.qset_mu(0, vars.muq);
        self.kern.qset_mu(1, vars.mu);
        self.kern.qset_mu(2, -vars.muq);

        self.kern.qset_nu(0, 1, vars.nu);
        self.kern.qset_nu(0, 2, -1.);
        self.kern.qset_nu(1, 2, -vars.nu);

        dz3 += self.kern.dz3_mu()? * dmuq;

        // derivative through -muq: configuration (-q_, k_, q_)
        self.kern.qset_mu(0, -vars.muq);
        self.kern.qset_mu(2, vars.muq);

        self.kern.qset_nu(0, 1, -vars.nu);
        self.kern.qset_nu(1, 2, vars.nu);

        dz3 -= self.kern.dz3_mu()? * dmuq;

        let result = 3. * vars.q * vars.q * pq * (dz3 * z1 + z3 * dz1) * pk;

        self.restore_external(vars.k, vars.mu);
        self.kern.bias.b2 = b2;
        Ok(result)
    }

    /*  ------------------------------------------------  */
    /*  Combined derivatives                              */
    /*  ------------------------------------------------  */

    pub fn dpnl_a2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        Ok(self.dp22_a2ga(var)? + self.dp13_a2ga(var)?)
    }

    pub fn dpnl_d2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        Ok(self.dp22_d2ga(var)? + self.dp13_d2ga(var)?)
    }

    /// `dZ2/dh = 0`, so only P13 contributes.
    pub fn dpnl_h(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_h(var)
    }

    pub fn dpnl_a3gaa(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_a3gaa(var)
    }

    pub fn dpnl_a3gab(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_a3gab(var)
    }

    pub fn dpnl_d3gaa(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_d3gaa(var)
    }

    pub fn dpnl_d3gab(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_d3gab(var)
    }

    pub fn dpnl_b1(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        Ok(self.dp22_b1(var)? + self.dp13_b1(var)?)
    }

    /// `dZ3/db2 = 0` after renormalisation, so only P22 contributes.
    pub fn dpnl_b2(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp22_b2(var)
    }

    pub fn dpnl_f(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        Ok(self.dp22_f(var)? + self.dp13_f(var)?)
    }

    pub fn dpnl_c2ga(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        Ok(self.dp22_c2ga(var)? + self.dp13_c2ga(var)?)
    }

    pub fn dpnl_bgam3(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        self.dp13_bgam3(var)
    }

    pub fn dpnl_k(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        Ok(self.dp22_k(var)? + self.dp13_k(var)?)
    }

    pub fn dpnl_mu(&mut self, var: [f64; 3]) -> Result<f64, Error> {
        Ok(self.dp22_mu(var)? + self.dp13_mu(var)?)
    }
}
