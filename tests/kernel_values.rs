//! Closed-form values and degenerate-geometry behaviour of the kernels.

use bpt::kernels::{alpha, beta, gamma};
use bpt::Kernel;

/// Symmetric configuration used by the end-to-end checks: unit linear bias,
/// standard-gravity second order, vanishing third-order bootstrap terms.
fn reference_kernel(spec_order: usize, kern_order: usize) -> Kernel {
    let mut kern = Kernel::with_order(spec_order, kern_order).unwrap();

    kern.bias.b1 = 1.;
    kern.bias.b2 = 0.;
    kern.bias.b_g2 = 0.;
    kern.bias.c2_ga = 0.;
    kern.bias.b_gam3 = 0.;

    kern.rsd.f = 0.5;

    kern.btst.a2_ga = 1.;
    kern.btst.d2_ga = 1.;
    kern.btst.h = 0.;
    kern.btst.a3_ga_a = 0.;
    kern.btst.a3_ga_b = 0.;
    kern.btst.d3_ga_a = 0.;
    kern.btst.d3_ga_b = 0.;

    kern
}

#[test]
fn basis_symmetries() {
    for &(k1, k2, nu) in &[(0.1, 0.2, 0.5), (0.31, 0.11, -0.73), (1.7, 0.09, 0.02)] {
        assert_eq!(beta(k1, k2, nu), beta(k2, k1, nu));
        assert_eq!(alpha(k1, k2, nu), -alpha(k2, k1, nu));
        assert_eq!(gamma(nu), 1. - nu * nu);
    }
}

#[test]
fn z1_closed_form() {
    let mut kern = reference_kernel(2, 2);

    kern.qset_k(0, 0.1);
    kern.qset_mu(0, 0.5);

    // b1 + f mu^2 = 1 + 0.5 * 0.25
    assert_eq!(kern.z1().unwrap(), 1.125);
}

#[test]
fn z2_symmetric_configuration() {
    let mut kern = reference_kernel(2, 2);

    kern.qset_k(0, 0.1);
    kern.qset_k(1, 0.1);
    kern.qset_nu(0, 1, 0.);
    kern.qset_mu(0, 0.);
    kern.qset_mu(1, 0.);

    // F2 = beta(0.1, 0.1, 0) + gamma(0)/2 = 1/2; every RSD term carries a
    // factor mu12 = 0, and the tidal term subtracts b1 a2Ga/2 = 1/2
    assert!(kern.z2().unwrap().abs() < 1e-15);
}

/// Squeezed limit used by the P22 renormalisation subtraction: for exactly
/// opposite wavevectors only the constant `b2/2` piece of `Z2` survives.
#[test]
fn z2_squeezed_limit_is_half_b2() {
    let mut kern = reference_kernel(2, 2);
    kern.bias.b2 = 0.86;

    for &mu in &[0., 0.3, -0.9] {
        kern.qset_k(0, 0.17);
        kern.qset_k(1, 0.17);
        kern.qset_nu(0, 1, -1.);
        kern.qset_mu(0, mu);
        kern.qset_mu(1, -mu);

        assert_eq!(kern.z2().unwrap(), 0.43);
    }
}

/// Exactly cancelling base vectors must not poison any scale, angle or
/// kernel value.
#[test]
fn zero_scale_configurations_stay_finite() {
    let mut kern = reference_kernel(3, 3);
    kern.bias.b2 = 0.3;
    kern.btst.a3_ga_a = 1.1;
    kern.btst.a3_ga_b = 0.2;

    kern.qset_k(0, 0.2);
    kern.qset_k(1, 0.2);
    kern.qset_k(2, 0.37);
    kern.qset_nu(0, 1, -1.);
    kern.qset_nu(0, 2, 0.42);
    kern.qset_nu(1, 2, -0.42);
    kern.qset_mu(0, 0.6);
    kern.qset_mu(1, -0.6);
    kern.qset_mu(2, 0.2);

    assert!(kern.z1().unwrap().is_finite());
    assert!(kern.z2().unwrap().is_finite());
    assert!(kern.z3().unwrap().is_finite());

    let h3 = kern.h3().unwrap();
    assert!(h3.f.is_finite());
    assert!(h3.g.is_finite());

    assert!(kern.smooth().is_finite());
}

#[test]
fn smooth_closed_form() {
    let mut kern = reference_kernel(2, 2);
    kern.rsd.sigv = 2.;
    kern.rsd.sigs = 1.;

    kern.qset_k(0, 0.3);
    kern.qset_mu(0, 0.5);
    kern.qset_k(1, 0.1);
    kern.qset_mu(1, -0.4);

    let arg: f64 = (0.3f64 * 0.5).powi(2) + (0.1f64 * 0.4).powi(2);
    let expected = (-0.5 * arg * 4.).exp() * (-0.5 * arg).exp();
    assert!((kern.smooth() - expected).abs() < 1e-15);

    // vanished scales contribute nothing
    kern.qset_k(0, 0.);
    kern.qset_k(1, 0.);
    assert_eq!(kern.smooth(), 1.);
}
