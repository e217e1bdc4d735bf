//! Consistency of the one-loop power-spectrum integrands: the split into
//! P22 and P13, finite-difference agreement of the parameter-derivative
//! integrands, and the typed out-of-domain behaviour of the power table.

use bpt::integrands::LoopIntegrand;
use bpt::{Error, Kernel, PowerLaw, TabulatedPower};

const POWER: PowerLaw = PowerLaw { amp: 2., ns: 0.96 };
const VAR: [f64; 3] = [0.09, 0.3, 1.1];

fn loop_kernel() -> Kernel {
    let mut kern = Kernel::new(2, 1).unwrap();

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

    kern.qset_k(0, 0.1);
    kern.qset_mu(0, 0.4);

    kern
}

fn check(analytic: f64, numeric: f64, label: &str) {
    let scale = analytic.abs().max(1e-8);
    assert!(
        (analytic - numeric).abs() < 1e-5 * scale,
        "{}: analytic {:e} vs finite difference {:e}",
        label,
        analytic,
        numeric
    );
}

/// Central difference of the full one-loop integrand under a parameter
/// shift.
fn central(kern: &mut Kernel, x0: f64, set: impl Fn(&mut Kernel, f64)) -> f64 {
    let h = 1e-6 * x0.abs().max(1.);

    set(kern, x0 + h);
    let plus = LoopIntegrand::new(kern, &POWER).unwrap().pnl(VAR).unwrap();
    set(kern, x0 - h);
    let minus = LoopIntegrand::new(kern, &POWER).unwrap().pnl(VAR).unwrap();
    set(kern, x0);

    (plus - minus) / (2. * h)
}

#[test]
fn pnl_is_p22_plus_p13() {
    let mut kern = loop_kernel();
    let mut integrand = LoopIntegrand::new(&mut kern, &POWER).unwrap();

    let p22 = integrand.p22(VAR).unwrap();
    let p13 = integrand.p13(VAR).unwrap();
    let pnl = integrand.pnl(VAR).unwrap();

    assert!((pnl - (p22 + p13)).abs() <= 1e-15 * pnl.abs().max(1.));
    assert!(p22.is_finite() && p13.is_finite());
}

#[test]
fn external_slots_are_restored() {
    let mut kern = loop_kernel();
    let mut integrand = LoopIntegrand::new(&mut kern, &POWER).unwrap();
    integrand.pnl(VAR).unwrap();
    integrand.dpnl_mu(VAR).unwrap();

    assert_eq!(kern.qget_k(0), 0.1);
    assert_eq!(kern.qget_mu(0), 0.4);
}

#[test]
fn parameter_derivative_integrands() {
    let mut kern = loop_kernel();

    // the derivative integrand ties h = a2Ga - 1, so the finite difference
    // shifts both together
    let a2 = kern.btst.a2_ga;
    let analytic = LoopIntegrand::new(&mut kern, &POWER)
        .unwrap()
        .dpnl_a2ga(VAR)
        .unwrap();
    let fd = central(&mut kern, a2, |k, x| {
        k.btst.h += x - k.btst.a2_ga;
        k.btst.a2_ga = x;
    });
    check(analytic, fd, "dPnl/da2ga");

    let cases: [(&str, fn(&mut Kernel, f64), fn(&Kernel) -> f64); 10] = [
        ("d2ga", |k, x| k.btst.d2_ga = x, |k| k.btst.d2_ga),
        ("h", |k, x| k.btst.h = x, |k| k.btst.h),
        ("a3gaa", |k, x| k.btst.a3_ga_a = x, |k| k.btst.a3_ga_a),
        ("a3gab", |k, x| k.btst.a3_ga_b = x, |k| k.btst.a3_ga_b),
        ("d3gaa", |k, x| k.btst.d3_ga_a = x, |k| k.btst.d3_ga_a),
        ("d3gab", |k, x| k.btst.d3_ga_b = x, |k| k.btst.d3_ga_b),
        ("b1", |k, x| k.bias.b1 = x, |k| k.bias.b1),
        ("b2", |k, x| k.bias.b2 = x, |k| k.bias.b2),
        ("f", |k, x| k.rsd.f = x, |k| k.rsd.f),
        ("bgam3", |k, x| k.bias.b_gam3 = x, |k| k.bias.b_gam3),
    ];

    for (name, set, get) in cases {
        let x0 = get(&kern);
        let mut integrand = LoopIntegrand::new(&mut kern, &POWER).unwrap();
        let analytic = match name {
            "d2ga" => integrand.dpnl_d2ga(VAR),
            "h" => integrand.dpnl_h(VAR),
            "a3gaa" => integrand.dpnl_a3gaa(VAR),
            "a3gab" => integrand.dpnl_a3gab(VAR),
            "d3gaa" => integrand.dpnl_d3gaa(VAR),
            "d3gab" => integrand.dpnl_d3gab(VAR),
            "b1" => integrand.dpnl_b1(VAR),
            "b2" => integrand.dpnl_b2(VAR),
            "f" => integrand.dpnl_f(VAR),
            "bgam3" => integrand.dpnl_bgam3(VAR),
            _ => unreachable!(),
        }
        .unwrap();

        let fd = central(&mut kern, x0, set);
        check(analytic, fd, &format!("dPnl/d{}", name));
    }

    let c2 = kern.bias.c2_ga;
    let analytic = LoopIntegrand::new(&mut kern, &POWER)
        .unwrap()
        .dpnl_c2ga(VAR)
        .unwrap();
    let fd = central(&mut kern, c2, |k, x| k.bias.c2_ga = x);
    check(analytic, fd, "dPnl/dc2ga");
}

#[test]
fn external_scale_and_angle_derivatives() {
    let mut kern = loop_kernel();

    let k0 = kern.qget_k(0);
    let analytic = LoopIntegrand::new(&mut kern, &POWER)
        .unwrap()
        .dpnl_k(VAR)
        .unwrap();
    let fd = central(&mut kern, k0, |k, x| k.qset_k(0, x));
    check(analytic, fd, "dPnl/dk");

    let mu0 = kern.qget_mu(0);
    let analytic = LoopIntegrand::new(&mut kern, &POWER)
        .unwrap()
        .dpnl_mu(VAR)
        .unwrap();
    let fd = central(&mut kern, mu0, |k, x| k.qset_mu(0, x));
    check(analytic, fd, "dPnl/dmu");
}

#[test]
fn out_of_domain_power_is_surfaced() {
    // table too narrow for the sampled loop momentum
    let k: Vec<f64> = (0..10).map(|i| 0.05 + 0.01 * i as f64).collect();
    let p: Vec<f64> = k.iter().map(|&k| 2. * k).collect();
    let table = TabulatedPower::new(k, p).unwrap();

    let mut kern = loop_kernel();
    let mut integrand = LoopIntegrand::new(&mut kern, &table).unwrap();

    match integrand.p22([0.4, 0.3, 1.1]) {
        Err(Error::ExtrapolationUnavailable { .. }) => {}
        other => panic!("expected an extrapolation error, got {:?}", other.ok()),
    }
}

#[test]
fn loop_integrand_requires_third_order_context() {
    let mut kern = Kernel::with_order(2, 2).unwrap();
    assert!(LoopIntegrand::new(&mut kern, &POWER).is_err());
}
