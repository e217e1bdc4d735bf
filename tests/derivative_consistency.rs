//! Finite-difference checks of every analytic derivative: central
//! differences over random non-degenerate configurations must agree with
//! the closed forms to high relative accuracy.

use rand::prelude::*;

use bpt::kernels::{self, Kernel};

const STEP: f64 = 1e-5;
const TOL: f64 = 5e-6;

fn check(analytic: f64, numeric: f64, label: &str) {
    let scale = analytic.abs().max(1.);
    assert!(
        (analytic - numeric).abs() < TOL * scale,
        "{}: analytic {:e} vs finite difference {:e}",
        label,
        analytic,
        numeric
    );
}

/// Central difference of `eval` under the setter, restoring the base value.
fn central(
    kern: &mut Kernel,
    x0: f64,
    set: impl Fn(&mut Kernel, f64),
    eval: impl Fn(&mut Kernel) -> f64,
) -> f64 {
    let h = STEP * x0.abs().max(1.);

    set(kern, x0 + h);
    let plus = eval(kern);
    set(kern, x0 - h);
    let minus = eval(kern);
    set(kern, x0);

    (plus - minus) / (2. * h)
}

fn rng() -> StdRng {
    StdRng::seed_from_u64(0x10a)
}

/// Generic, non-degenerate parameter values.
fn configure(kern: &mut Kernel) {
    kern.btst.a2_ga = 1.6;
    kern.btst.d2_ga = 1.3;
    kern.btst.a3_ga_a = 2.1;
    kern.btst.a3_ga_b = 0.3;
    kern.btst.d3_ga_a = 0.4;
    kern.btst.d3_ga_b = 0.2;
    kern.btst.h = 0.6;

    kern.bias.b1 = 1.1;
    kern.bias.b2 = 0.4;
    kern.bias.c2_ga = 0.3;
    kern.bias.b_gam3 = 0.25;

    kern.rsd.f = 0.77;
    kern.rsd.sigv = 3.;
    kern.rsd.sigs = 1.5;
}

fn random_kernel2(rng: &mut StdRng) -> Kernel {
    let mut kern = Kernel::with_order(2, 2).unwrap();
    configure(&mut kern);

    for i in 0..2 {
        kern.qset_k(i, rng.gen_range(0.05..0.5));
        kern.qset_mu(i, rng.gen_range(-0.9..0.9));
    }
    kern.qset_nu(0, 1, rng.gen_range(-0.8..0.8));

    kern
}

fn random_kernel3(rng: &mut StdRng) -> Kernel {
    let mut kern = Kernel::with_order(3, 3).unwrap();
    configure(&mut kern);

    for i in 0..3 {
        kern.qset_k(i, rng.gen_range(0.05..0.5));
        kern.qset_mu(i, rng.gen_range(-0.9..0.9));
    }
    kern.qset_nu(0, 1, rng.gen_range(-0.8..0.8));
    kern.qset_nu(0, 2, rng.gen_range(-0.8..0.8));
    kern.qset_nu(1, 2, rng.gen_range(-0.8..0.8));

    kern
}

#[test]
fn basis_kernels() {
    let (k1, k2, nu) = (0.13, 0.41, 0.37);
    let h = 1e-6;

    check(
        kernels::dalpha_k(k1, k2, nu),
        (kernels::alpha(k1 + h, k2, nu) - kernels::alpha(k1 - h, k2, nu)) / (2. * h),
        "dalpha/dk1",
    );
    check(
        kernels::dalpha_nu(k1, k2, nu),
        (kernels::alpha(k1, k2, nu + h) - kernels::alpha(k1, k2, nu - h)) / (2. * h),
        "dalpha/dnu",
    );
    check(
        kernels::dbeta_k(k1, k2, nu),
        (kernels::beta(k1 + h, k2, nu) - kernels::beta(k1 - h, k2, nu)) / (2. * h),
        "dbeta/dk1",
    );
    check(
        kernels::dbeta_nu(k1, k2, nu),
        (kernels::beta(k1, k2, nu + h) - kernels::beta(k1, k2, nu - h)) / (2. * h),
        "dbeta/dnu",
    );
    check(
        kernels::dgamma_nu(nu),
        (kernels::gamma(nu + h) - kernels::gamma(nu - h)) / (2. * h),
        "dgamma/dnu",
    );

    // derivatives w.r.t. the second scale via the documented swaps
    check(
        -kernels::dalpha_k(k2, k1, nu),
        (kernels::alpha(k1, k2 + h, nu) - kernels::alpha(k1, k2 - h, nu)) / (2. * h),
        "dalpha/dk2",
    );
    check(
        kernels::dbeta_k(k2, k1, nu),
        (kernels::beta(k1, k2 + h, nu) - kernels::beta(k1, k2 - h, nu)) / (2. * h),
        "dbeta/dk2",
    );
}

#[test]
fn h2_derivatives() {
    let mut rng = rng();

    for _ in 0..3 {
        let mut kern = random_kernel2(&mut rng);

        let k0 = kern.qget_k(0);
        let analytic = kern.dh2_k().unwrap();
        let fd_f = central(&mut kern, k0, |k, x| k.qset_k(0, x), |k| k.h2().unwrap().f);
        let fd_g = central(&mut kern, k0, |k, x| k.qset_k(0, x), |k| k.h2().unwrap().g);
        check(analytic.f, fd_f, "dF2/dk1");
        check(analytic.g, fd_g, "dG2/dk1");

        let nu = kern.qget_nu(0, 1);
        let analytic = kern.dh2_nu().unwrap();
        let fd_f = central(
            &mut kern,
            nu,
            |k, x| k.qset_nu(0, 1, x),
            |k| k.h2().unwrap().f,
        );
        check(analytic.f, fd_f, "dF2/dnu12");

        let a2 = kern.btst.a2_ga;
        let analytic = kern.dh2_a2ga().unwrap();
        let fd_f = central(
            &mut kern,
            a2,
            |k, x| k.btst.a2_ga = x,
            |k| k.h2().unwrap().f,
        );
        let fd_g = central(
            &mut kern,
            a2,
            |k, x| k.btst.a2_ga = x,
            |k| k.h2().unwrap().g,
        );
        check(analytic.f, fd_f, "dF2/da2ga");
        check(analytic.g, fd_g, "dG2/da2ga");

        let d2 = kern.btst.d2_ga;
        let analytic = kern.dh2_d2ga().unwrap();
        let fd_g = central(
            &mut kern,
            d2,
            |k, x| k.btst.d2_ga = x,
            |k| k.h2().unwrap().g,
        );
        check(analytic.g, fd_g, "dG2/dd2ga");
    }
}

#[test]
fn h3_scale_and_angle() {
    let mut rng = rng();

    for _ in 0..3 {
        let mut kern = random_kernel3(&mut rng);

        let k0 = kern.qget_k(0);
        let analytic = kern.dh3_k().unwrap();
        let fd_f = central(&mut kern, k0, |k, x| k.qset_k(0, x), |k| k.h3().unwrap().f);
        let fd_g = central(&mut kern, k0, |k, x| k.qset_k(0, x), |k| k.h3().unwrap().g);
        check(analytic.f, fd_f, "dF3/dk1");
        check(analytic.g, fd_g, "dG3/dk1");

        let nu = kern.qget_nu(0, 1);
        let analytic = kern.dh3_nu().unwrap();
        let fd_f = central(
            &mut kern,
            nu,
            |k, x| k.qset_nu(0, 1, x),
            |k| k.h3().unwrap().f,
        );
        let fd_g = central(
            &mut kern,
            nu,
            |k, x| k.qset_nu(0, 1, x),
            |k| k.h3().unwrap().g,
        );
        check(analytic.f, fd_f, "dF3/dnu12");
        check(analytic.g, fd_g, "dG3/dnu12");
    }
}

#[test]
fn h3_parameters() {
    let mut rng = rng();
    let mut kern = random_kernel3(&mut rng);

    let cases: [(&str, fn(&mut Kernel, f64), fn(&Kernel) -> f64, fn(&mut Kernel) -> kernels::FgPair); 7] = [
        (
            "a2ga",
            |k, x| k.btst.a2_ga = x,
            |k| k.btst.a2_ga,
            |k| k.dh3_a2ga().unwrap(),
        ),
        (
            "d2ga",
            |k, x| k.btst.d2_ga = x,
            |k| k.btst.d2_ga,
            |k| k.dh3_d2ga().unwrap(),
        ),
        (
            "h",
            |k, x| k.btst.h = x,
            |k| k.btst.h,
            |k| k.dh3_h().unwrap(),
        ),
        (
            "a3gaa",
            |k, x| k.btst.a3_ga_a = x,
            |k| k.btst.a3_ga_a,
            |k| k.dh3_a3gaa().unwrap(),
        ),
        (
            "a3gab",
            |k, x| k.btst.a3_ga_b = x,
            |k| k.btst.a3_ga_b,
            |k| k.dh3_a3gab().unwrap(),
        ),
        (
            "d3gaa",
            |k, x| k.btst.d3_ga_a = x,
            |k| k.btst.d3_ga_a,
            |k| k.dh3_d3gaa().unwrap(),
        ),
        (
            "d3gab",
            |k, x| k.btst.d3_ga_b = x,
            |k| k.btst.d3_ga_b,
            |k| k.dh3_d3gab().unwrap(),
        ),
    ];

    for (name, set, get, deriv) in cases {
        let x0 = get(&kern);
        let analytic = deriv(&mut kern);
        let fd_f = central(&mut kern, x0, set, |k| k.h3().unwrap().f);
        let fd_g = central(&mut kern, x0, set, |k| k.h3().unwrap().g);
        check(analytic.f, fd_f, &format!("dF3/d{}", name));
        check(analytic.g, fd_g, &format!("dG3/d{}", name));
    }
}

#[test]
fn z1_derivatives() {
    let mut rng = rng();
    let mut kern = random_kernel2(&mut rng);

    let mu = kern.qget_mu(0);
    let analytic = kern.dz1_mu().unwrap();
    let fd = central(&mut kern, mu, |k, x| k.qset_mu(0, x), |k| k.z1().unwrap());
    check(analytic, fd, "dZ1/dmu");

    let b1 = kern.bias.b1;
    let fd = central(&mut kern, b1, |k, x| k.bias.b1 = x, |k| k.z1().unwrap());
    check(kern.dz1_b1(), fd, "dZ1/db1");

    let f = kern.rsd.f;
    let analytic = kern.dz1_f().unwrap();
    let fd = central(&mut kern, f, |k, x| k.rsd.f = x, |k| k.z1().unwrap());
    check(analytic, fd, "dZ1/df");
}

#[test]
fn z2_derivatives() {
    let mut rng = rng();

    for _ in 0..3 {
        let mut kern = random_kernel2(&mut rng);

        let k0 = kern.qget_k(0);
        let analytic = kern.dz2_k().unwrap();
        let fd = central(&mut kern, k0, |k, x| k.qset_k(0, x), |k| k.z2().unwrap());
        check(analytic, fd, "dZ2/dk1");

        let nu = kern.qget_nu(0, 1);
        let analytic = kern.dz2_nu().unwrap();
        let fd = central(
            &mut kern,
            nu,
            |k, x| k.qset_nu(0, 1, x),
            |k| k.z2().unwrap(),
        );
        check(analytic, fd, "dZ2/dnu12");

        let mu = kern.qget_mu(0);
        let analytic = kern.dz2_mu().unwrap();
        let fd = central(&mut kern, mu, |k, x| k.qset_mu(0, x), |k| k.z2().unwrap());
        check(analytic, fd, "dZ2/dmu1");
    }
}

#[test]
fn z2_parameters() {
    let mut rng = rng();
    let mut kern = random_kernel2(&mut rng);

    let cases: [(&str, fn(&mut Kernel, f64), fn(&Kernel) -> f64, fn(&mut Kernel) -> f64); 6] = [
        (
            "a2ga",
            |k, x| k.btst.a2_ga = x,
            |k| k.btst.a2_ga,
            |k| k.dz2_a2ga().unwrap(),
        ),
        (
            "d2ga",
            |k, x| k.btst.d2_ga = x,
            |k| k.btst.d2_ga,
            |k| k.dz2_d2ga().unwrap(),
        ),
        (
            "b1",
            |k, x| k.bias.b1 = x,
            |k| k.bias.b1,
            |k| k.dz2_b1().unwrap(),
        ),
        (
            "b2",
            |k, x| k.bias.b2 = x,
            |k| k.bias.b2,
            |k| k.dz2_b2(),
        ),
        (
            "f",
            |k, x| k.rsd.f = x,
            |k| k.rsd.f,
            |k| k.dz2_f().unwrap(),
        ),
        (
            "c2ga",
            |k, x| k.bias.c2_ga = x,
            |k| k.bias.c2_ga,
            |k| k.dz2_c2ga().unwrap(),
        ),
    ];

    for (name, set, get, deriv) in cases {
        let x0 = get(&kern);
        let analytic = deriv(&mut kern);
        let fd = central(&mut kern, x0, set, |k| k.z2().unwrap());
        check(analytic, fd, &format!("dZ2/d{}", name));
    }
}

#[test]
fn z3_scale_angle_mu() {
    let mut rng = rng();

    for _ in 0..3 {
        let mut kern = random_kernel3(&mut rng);

        let k0 = kern.qget_k(0);
        let analytic = kern.dz3_k().unwrap();
        let fd = central(&mut kern, k0, |k, x| k.qset_k(0, x), |k| k.z3().unwrap());
        check(analytic, fd, "dZ3/dk1");

        let nu = kern.qget_nu(0, 1);
        let analytic = kern.dz3_nu().unwrap();
        let fd = central(
            &mut kern,
            nu,
            |k, x| k.qset_nu(0, 1, x),
            |k| k.z3().unwrap(),
        );
        check(analytic, fd, "dZ3/dnu12");

        let mu = kern.qget_mu(0);
        let analytic = kern.dz3_mu().unwrap();
        let fd = central(&mut kern, mu, |k, x| k.qset_mu(0, x), |k| k.z3().unwrap());
        check(analytic, fd, "dZ3/dmu1");
    }
}

#[test]
fn z3_parameters() {
    let mut rng = rng();
    let mut kern = random_kernel3(&mut rng);

    let cases: [(&str, fn(&mut Kernel, f64), fn(&Kernel) -> f64, fn(&mut Kernel) -> f64); 11] = [
        (
            "a2ga",
            |k, x| k.btst.a2_ga = x,
            |k| k.btst.a2_ga,
            |k| k.dz3_a2ga().unwrap(),
        ),
        (
            "d2ga",
            |k, x| k.btst.d2_ga = x,
            |k| k.btst.d2_ga,
            |k| k.dz3_d2ga().unwrap(),
        ),
        (
            "h",
            |k, x| k.btst.h = x,
            |k| k.btst.h,
            |k| k.dz3_h().unwrap(),
        ),
        (
            "a3gaa",
            |k, x| k.btst.a3_ga_a = x,
            |k| k.btst.a3_ga_a,
            |k| k.dz3_a3gaa().unwrap(),
        ),
        (
            "a3gab",
            |k, x| k.btst.a3_ga_b = x,
            |k| k.btst.a3_ga_b,
            |k| k.dz3_a3gab().unwrap(),
        ),
        (
            "d3gaa",
            |k, x| k.btst.d3_ga_a = x,
            |k| k.btst.d3_ga_a,
            |k| k.dz3_d3gaa().unwrap(),
        ),
        (
            "d3gab",
            |k, x| k.btst.d3_ga_b = x,
            |k| k.btst.d3_ga_b,
            |k| k.dz3_d3gab().unwrap(),
        ),
        (
            "b1",
            |k, x| k.bias.b1 = x,
            |k| k.bias.b1,
            |k| k.dz3_b1().unwrap(),
        ),
        (
            "c2ga",
            |k, x| k.bias.c2_ga = x,
            |k| k.bias.c2_ga,
            |k| k.dz3_c2ga().unwrap(),
        ),
        (
            "bgam3",
            |k, x| k.bias.b_gam3 = x,
            |k| k.bias.b_gam3,
            |k| k.dz3_bgam3().unwrap(),
        ),
        (
            "f",
            |k, x| k.rsd.f = x,
            |k| k.rsd.f,
            |k| k.dz3_f().unwrap(),
        ),
    ];

    for (name, set, get, deriv) in cases {
        let x0 = get(&kern);
        let analytic = deriv(&mut kern);
        let fd = central(&mut kern, x0, set, |k| k.z3().unwrap());
        check(analytic, fd, &format!("dZ3/d{}", name));
    }
}

#[test]
fn smooth_derivative() {
    let mut rng = rng();
    let mut kern = random_kernel2(&mut rng);

    let sigv = kern.rsd.sigv;
    let analytic = kern.dsmooth_sigv();
    let fd = central(&mut kern, sigv, |k, x| k.rsd.sigv = x, |k| k.smooth());
    check(analytic, fd, "dsmooth/dsigv");
}
