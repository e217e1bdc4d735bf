//! Linear power spectrum interface consumed by the loop integrands.
//!
//! The integrals only need `P(k)` and `dP/dk` as total functions over the
//! sampled domain; anything fancier (full spline machinery, file formats)
//! lives outside this crate.

use crate::Error;

/// Extrapolation hook invoked for wavevectors outside a tabulated domain.
pub type Extrapolation = Box<dyn Fn(f64) -> f64 + Send + Sync>;

pub trait LinearPower {
    fn eval(&self, k: f64) -> Result<f64, Error>;
    fn deriv(&self, k: f64) -> Result<f64, Error>;
}

/// Pure power law `P(k) = amp * k^ns`, handy for tests and benchmarks.
#[derive(Debug, Clone, Copy)]
pub struct PowerLaw {
    pub amp: f64,
    pub ns: f64,
}

impl LinearPower for PowerLaw {
    fn eval(&self, k: f64) -> Result<f64, Error> {
        Ok(self.amp * k.powf(self.ns))
    }

    fn deriv(&self, k: f64) -> Result<f64, Error> {
        Ok(self.amp * self.ns * k.powf(self.ns - 1.))
    }
}

/// Tabulated linear power spectrum, interpolated linearly in log-log space.
///
/// Inside a segment `P(k) = P_i (k / k_i)^s` with
/// `s = log(P_{i+1}/P_i) / log(k_{i+1}/k_i)`, so the derivative is analytic.
/// Out-of-domain evaluations go through the injected extrapolation, or fail
/// with [`Error::ExtrapolationUnavailable`] when none is configured.
pub struct TabulatedPower {
    k: Vec<f64>,
    p: Vec<f64>,
    extrapolation: Option<Extrapolation>,
}

impl TabulatedPower {
    /// Build from strictly increasing positive nodes; duplicate abscissas
    /// are collapsed. At least two distinct nodes are required.
    pub fn new(k: Vec<f64>, p: Vec<f64>) -> Result<TabulatedPower, Error> {
        debug_assert_eq!(k.len(), p.len());

        let mut nodes: Vec<(f64, f64)> = k.into_iter().zip(p).collect();
        nodes.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());
        nodes.dedup_by(|a, b| a.0 == b.0);

        if nodes.len() < 2 {
            return Err(Error::Data {
                needed: 2,
                got: nodes.len(),
            });
        }

        Ok(TabulatedPower {
            k: nodes.iter().map(|n| n.0).collect(),
            p: nodes.iter().map(|n| n.1).collect(),
            extrapolation: None,
        })
    }

    pub fn with_extrapolation(mut self, extrapolation: Extrapolation) -> TabulatedPower {
        self.extrapolation = Some(extrapolation);
        self
    }

    pub fn k_min(&self) -> f64 {
        self.k[0]
    }

    pub fn k_max(&self) -> f64 {
        *self.k.last().unwrap()
    }

    /// Segment index such that `k` lies in `[k_i, k_{i+1}]`, or an error for
    /// out-of-domain `k` without extrapolation.
    fn segment(&self, k: f64) -> Result<usize, Error> {
        if k < self.k_min() || k > self.k_max() {
            return Err(Error::ExtrapolationUnavailable {
                k,
                min: self.k_min(),
                max: self.k_max(),
            });
        }

        Ok(match self.k.partition_point(|&node| node <= k) {
            0 => 0,
            i if i >= self.k.len() => self.k.len() - 2,
            i => i - 1,
        })
    }

    fn slope(&self, i: usize) -> f64 {
        (self.p[i + 1] / self.p[i]).ln() / (self.k[i + 1] / self.k[i]).ln()
    }
}

impl LinearPower for TabulatedPower {
    fn eval(&self, k: f64) -> Result<f64, Error> {
        let i = match self.segment(k) {
            Ok(i) => i,
            Err(err) => {
                return match &self.extrapolation {
                    Some(extrap) => Ok(extrap(k)),
                    None => Err(err),
                }
            }
        };

        Ok(self.p[i] * (k / self.k[i]).powf(self.slope(i)))
    }

    fn deriv(&self, k: f64) -> Result<f64, Error> {
        let i = self.segment(k)?;
        let s = self.slope(i);

        Ok(self.p[i] * s * (k / self.k[i]).powf(s - 1.) / self.k[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TabulatedPower {
        // samples of P(k) = 2 k^0.96; log-log linear interpolation is exact
        // on a power law
        let k: Vec<f64> = (1..=50).map(|i| 1e-3 * 1.2f64.powi(i)).collect();
        let p: Vec<f64> = k.iter().map(|&k| 2. * k.powf(0.96)).collect();
        TabulatedPower::new(k, p).unwrap()
    }

    #[test]
    fn reproduces_power_law() {
        let table = table();
        let k = 0.05;
        assert!((table.eval(k).unwrap() - 2. * k.powf(0.96)).abs() / table.eval(k).unwrap() < 1e-12);
        assert!(
            (table.deriv(k).unwrap() - 2. * 0.96 * k.powf(-0.04)).abs() / table.deriv(k).unwrap()
                < 1e-10
        );
    }

    #[test]
    fn out_of_domain_is_typed() {
        let table = table();
        match table.eval(1e3) {
            Err(Error::ExtrapolationUnavailable { .. }) => {}
            other => panic!("expected extrapolation error, got {:?}", other.ok()),
        }

        let table = table.with_extrapolation(Box::new(|_| 0.));
        assert_eq!(table.eval(1e3).unwrap(), 0.);
    }

    #[test]
    fn too_few_nodes_is_a_data_error() {
        match TabulatedPower::new(vec![0.1, 0.1], vec![1., 1.]) {
            Err(Error::Data { needed: 2, got: 1 }) => {}
            _ => panic!("expected a data error"),
        }
    }
}
