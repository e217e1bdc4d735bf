//! Per-order working buffers holding every partial-sum scale, line-of-sight
//! cosine and pairwise cosine a kernel of that order can ask for.
//!
//! A buffer of order `n` is populated once per evaluation from the `n` base
//! wavevectors: singletons first, then each larger subset via the law of
//! cosines from two already-known smaller sums, and each pairwise cosine via
//! a closed-form combination of three already-known smaller-subset cosines.
//! The enumeration is a pair of mutually recursive depth-first walks whose
//! write order coincides with the ranks computed in [`crate::combinatorics`];
//! correctness relies on every subset size being completed before the next
//! larger one is attempted.

use smallvec::SmallVec;

use crate::combinatorics::{angle_count, angle_offset, pair_offset, scale_count, scale_offset};
use crate::{ABS_TOL, MAX_KERN_ORDER};

type IndexBuf = SmallVec<[usize; MAX_KERN_ORDER + 1]>;

/// Enumeration state: the two subset buffers, the hole-skipping cursor of
/// the partner walk and the sequential write offsets.
struct Cursors {
    sum_set: IndexBuf,
    pair_set: IndexBuf,
    pair_cursor: IndexBuf,
    k_off: usize,
    nu_off: usize,
}

impl Cursors {
    fn new(order: usize) -> Cursors {
        let mut buf = IndexBuf::new();
        buf.resize(order + 1, 0);

        Cursors {
            sum_set: buf.clone(),
            pair_set: buf.clone(),
            pair_cursor: buf,
            k_off: 0,
            nu_off: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workspace {
    pub order: usize,
    pub k: Vec<f64>,
    pub mu: Vec<f64>,
    pub nu: Vec<f64>,
}

impl Workspace {
    pub fn new(order: usize) -> Workspace {
        Workspace {
            order,
            k: vec![0.; scale_count(order)],
            mu: vec![0.; scale_count(order)],
            nu: vec![0.; angle_count(order)],
        }
    }

    /// Populate every slot from the base scales/angles of the owning kernel.
    ///
    /// `base_order` is the owning kernel's `max_order`, which fixes the
    /// layout of the flat `base_nu` array.
    pub fn fill(&mut self, base_k: &[f64], base_mu: &[f64], base_nu: &[f64], base_order: usize) {
        let mut cur = Cursors::new(self.order);

        // singletons and base pairs
        for i in 0..self.order {
            self.k[cur.k_off] = base_k[i];
            self.mu[cur.k_off] = base_mu[i];
            cur.k_off += 1;

            for j in i + 1..self.order {
                self.nu[cur.nu_off] = base_nu[pair_offset(base_order, i, j)];
                cur.nu_off += 1;
            }
        }

        // every larger subset, strictly by increasing size
        for m1 in 2..=self.order {
            self.fill_scales(&mut cur, m1, 0);
        }
    }

    /// Recursive walk over the strictly increasing index subsets of size
    /// `m1`; at full depth the partial sum lands at the next scale slot and
    /// every cosine against a not-larger partner subset follows.
    fn fill_scales(&mut self, cur: &mut Cursors, m1: usize, depth: usize) {
        if depth < m1 {
            let ini = if depth == 0 { 0 } else { cur.sum_set[depth - 1] + 1 };

            for i in ini..self.order {
                cur.sum_set[depth] = i;
                self.fill_scales(cur, m1, depth + 1);
            }

            return;
        }

        // k(I) from k(I \ last) and the last singleton via the law of
        // cosines; an exactly cancelling pair floors at the tolerance and
        // zeroes the dependent cosine
        let head_off = scale_offset(self.order, &cur.sum_set[..m1 - 1]);
        let last = cur.sum_set[m1 - 1];
        let nu12_off = angle_offset(self.order, &cur.sum_set[..m1 - 1], &[last]);

        let k1 = self.k[head_off];
        let k2 = self.k[last];
        let nu12 = self.nu[nu12_off];

        self.k[cur.k_off] = if (k1 - k2).abs() > ABS_TOL || (nu12 + 1.).abs() > ABS_TOL {
            (k1 * k1 + k2 * k2 + 2. * k1 * k2 * nu12).abs().sqrt()
        } else {
            ABS_TOL
        };
        self.mu[cur.k_off] = if self.k[cur.k_off] > ABS_TOL {
            (k1 * self.mu[head_off] + k2 * self.mu[last]) / self.k[cur.k_off]
        } else {
            0.
        };

        // partner subsets are restricted to m2 <= m1, which is exactly the
        // stored orientation of the cosine table
        for m2 in 1..=m1 {
            self.fill_angles(cur, m1, m2, 0);
        }

        cur.k_off += 1;
    }

    /// Recursive walk over the partner subsets of size `m2`, skipping the
    /// indices occupied by the current `sum_set`; for equal sizes the
    /// partner must lead past `sum_set[0]` so each unordered pair is visited
    /// once.
    fn fill_angles(&mut self, cur: &mut Cursors, m1: usize, m2: usize, depth: usize) {
        if depth < m2 {
            let mut i = if depth == 0 {
                if m1 == m2 {
                    1
                } else {
                    0
                }
            } else {
                cur.pair_cursor[depth]
            };

            let ini = if depth == 0 {
                if m1 == m2 {
                    cur.sum_set[0] + 1
                } else {
                    0
                }
            } else {
                cur.pair_set[depth - 1] + 1
            };

            for j in ini..self.order {
                if i < m1 && j == cur.sum_set[i] {
                    i += 1;
                    continue;
                }

                cur.pair_set[depth] = j;
                cur.pair_cursor[depth + 1] = i;
                self.fill_angles(cur, m1, m2, depth + 1);
            }

            return;
        }

        // undefined angle against a vanishing sum
        if self.k[cur.k_off] <= ABS_TOL {
            self.nu[cur.nu_off] = 0.;
            cur.nu_off += 1;
            return;
        }

        if m1 > m2 {
            // nu(I, J) = (nu(I', J) k(I') + nu({last}, J) k_last) / k(I)
            // with I' = I \ last
            let head_off = scale_offset(self.order, &cur.sum_set[..m1 - 1]);
            let last = cur.sum_set[m1 - 1];

            let nu13_off =
                angle_offset(self.order, &cur.sum_set[..m1 - 1], &cur.pair_set[..m2]);
            let nu23_off = angle_offset(self.order, &[last], &cur.pair_set[..m2]);

            self.nu[cur.nu_off] = (self.nu[nu13_off] * self.k[head_off]
                + self.nu[nu23_off] * self.k[last])
                / self.k[cur.k_off];
        } else {
            // equal most-recent sizes: split the partner instead,
            // nu(I, J) = (nu(I, J') k(J') + nu(I, {j_last}) k_last) / |J|
            // where |J| is rebuilt from k(J'), k_last and nu(J', {j_last})
            let k2_off = scale_offset(self.order, &cur.pair_set[..m2 - 1]);
            let j_last = cur.pair_set[m2 - 1];

            let nu12_off =
                angle_offset(self.order, &cur.sum_set[..m1], &cur.pair_set[..m2 - 1]);
            let nu13_off = angle_offset(self.order, &cur.sum_set[..m1], &[j_last]);
            let nu23 =
                self.nu[angle_offset(self.order, &cur.pair_set[..m2 - 1], &[j_last])];

            let k2 = self.k[k2_off];
            let k3 = self.k[j_last];
            let k23 = (k2 * k2 + k3 * k3 + 2. * k2 * k3 * nu23).sqrt();

            self.nu[cur.nu_off] =
                (self.nu[nu12_off] * k2 + self.nu[nu13_off] * k3) / k23;
        }

        cur.nu_off += 1;
    }

    /// Populate this buffer by copying out of a higher-order one instead of
    /// recomputing; the top buffer's enumeration is a superset of every
    /// lower buffer's needs.
    pub fn copy_from(&mut self, top: &Workspace) {
        debug_assert!(top.order >= self.order);

        let mut cur = Cursors::new(self.order);

        for m1 in 1..=self.order {
            self.copy_scales(top, &mut cur, m1, 0);
        }
    }

    fn copy_scales(&mut self, top: &Workspace, cur: &mut Cursors, m1: usize, depth: usize) {
        if depth < m1 {
            let ini = if depth == 0 { 0 } else { cur.sum_set[depth - 1] + 1 };

            for i in ini..self.order {
                cur.sum_set[depth] = i;
                self.copy_scales(top, cur, m1, depth + 1);
            }

            return;
        }

        let index = scale_offset(top.order, &cur.sum_set[..m1]);
        self.k[cur.k_off] = top.k[index];
        self.mu[cur.k_off] = top.mu[index];

        for m2 in 1..=m1 {
            self.copy_angles(top, cur, m1, m2, 0);
        }

        cur.k_off += 1;
    }

    fn copy_angles(
        &mut self,
        top: &Workspace,
        cur: &mut Cursors,
        m1: usize,
        m2: usize,
        depth: usize,
    ) {
        if depth < m2 {
            let mut i = if depth == 0 {
                if m1 == m2 {
                    1
                } else {
                    0
                }
            } else {
                cur.pair_cursor[depth]
            };

            let ini = if depth == 0 {
                if m1 == m2 {
                    cur.sum_set[0] + 1
                } else {
                    0
                }
            } else {
                cur.pair_set[depth - 1] + 1
            };

            for j in ini..self.order {
                if i < m1 && j == cur.sum_set[i] {
                    i += 1;
                    continue;
                }

                cur.pair_set[depth] = j;
                cur.pair_cursor[depth + 1] = i;
                self.copy_angles(top, cur, m1, m2, depth + 1);
            }

            return;
        }

        self.nu[cur.nu_off] =
            top.nu[angle_offset(top.order, &cur.sum_set[..m1], &cur.pair_set[..m2])];
        cur.nu_off += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn third_order_fill_matches_documented_layout() {
        // k[] = {k1, k2, k3, k12, k13, k23, k123},
        // nu[] = {nu12, nu13, nu23, nu12_3, nu13_2, nu23_1}
        let base_k = [0.1, 0.2, 0.3];
        let base_mu = [0.5, -0.3, 0.7];
        let base_nu = [0.25, -0.4, 0.6];

        let mut ws = Workspace::new(3);
        ws.fill(&base_k, &base_mu, &base_nu, 3);

        let k12 = (0.1f64 * 0.1 + 0.2 * 0.2 + 2. * 0.1 * 0.2 * 0.25).sqrt();
        let k13 = (0.1f64 * 0.1 + 0.3 * 0.3 + 2. * 0.1 * 0.3 * (-0.4)).sqrt();
        let k23 = (0.2f64 * 0.2 + 0.3 * 0.3 + 2. * 0.2 * 0.3 * 0.6).sqrt();

        assert!((ws.k[3] - k12).abs() < 1e-14);
        assert!((ws.k[4] - k13).abs() < 1e-14);
        assert!((ws.k[5] - k23).abs() < 1e-14);

        // nu(k12_, k3_) = (nu13 k1 + nu23 k2) / k12
        let nu12_3 = ((-0.4) * 0.1 + 0.6 * 0.2) / k12;
        assert!((ws.nu[3] - nu12_3).abs() < 1e-14);

        // mu12 = (k1 mu1 + k2 mu2) / k12
        assert!((ws.mu[3] - (0.1 * 0.5 + 0.2 * (-0.3)) / k12).abs() < 1e-14);

        // |k1_ + k2_ + k3_| via either decomposition
        let k123 = (k12 * k12 + 0.3 * 0.3 + 2. * k12 * 0.3 * nu12_3).sqrt();
        assert!((ws.k[6] - k123).abs() < 1e-12);
    }

    #[test]
    fn copy_reproduces_direct_fill() {
        let base_k = [0.11, 0.23, 0.37];
        let base_mu = [0.2, -0.6, 0.4];
        let base_nu = [0.3, -0.2, 0.1];

        let mut top = Workspace::new(3);
        top.fill(&base_k, &base_mu, &base_nu, 3);

        let mut direct = Workspace::new(2);
        direct.fill(&base_k[..2], &base_mu[..2], &base_nu, 3);

        let mut copied = Workspace::new(2);
        copied.copy_from(&top);

        for (a, b) in direct.k.iter().zip(&copied.k) {
            assert!((a - b).abs() < 1e-15);
        }
        for (a, b) in direct.nu.iter().zip(&copied.nu) {
            assert!((a - b).abs() < 1e-15);
        }
    }
}
