use clap::{App, Arg, ArgMatches, SubCommand};
use color_eyre::{Help, Report};
use colored::Colorize;
use cuba::{CubaIntegrator, CubaResult, CubaVerbosity};
use eyre::WrapErr;
use log::info;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::str::FromStr;
use std::time::Instant;

use bpt::integrands::LoopIntegrand;
use bpt::{Integrator, Kernel, LinearPower, Settings, TabulatedPower};

#[derive(Serialize, Deserialize)]
struct CubaResultDef {
    pub neval: i64,
    pub fail: i32,
    pub result: Vec<f64>,
    pub error: Vec<f64>,
    pub prob: Vec<f64>,
}

impl CubaResultDef {
    fn new(o: &CubaResult) -> CubaResultDef {
        CubaResultDef {
            neval: o.neval,
            fail: o.fail,
            result: o.result.clone(),
            error: o.error.clone(),
            prob: o.prob.clone(),
        }
    }
}

struct UserData {
    kern: Kernel,
    power: TabulatedPower,
    q_min: f64,
    q_max: f64,
    observable: String,
}

/// Evaluate the named integrand; unknown names are a usage error.
fn evaluate_named<P: LinearPower>(
    integrand: &mut LoopIntegrand<P>,
    name: &str,
    var: [f64; 3],
) -> Result<f64, bpt::Error> {
    match name {
        "pnl" => integrand.pnl(var),
        "p22" => integrand.p22(var),
        "p13" => integrand.p13(var),
        "a2ga" => integrand.dpnl_a2ga(var),
        "d2ga" => integrand.dpnl_d2ga(var),
        "h" => integrand.dpnl_h(var),
        "a3gaa" => integrand.dpnl_a3gaa(var),
        "a3gab" => integrand.dpnl_a3gab(var),
        "d3gaa" => integrand.dpnl_d3gaa(var),
        "d3gab" => integrand.dpnl_d3gab(var),
        "b1" => integrand.dpnl_b1(var),
        "b2" => integrand.dpnl_b2(var),
        "f" => integrand.dpnl_f(var),
        "c2ga" => integrand.dpnl_c2ga(var),
        "bgam3" => integrand.dpnl_bgam3(var),
        "k" => integrand.dpnl_k(var),
        "mu" => integrand.dpnl_mu(var),
        _ => panic!("Unknown observable {}", name),
    }
}

/// Map a unit-hypercube sample to `(q, nu, phi)` and evaluate, including
/// the jacobian and the `1/(2 pi)^3` of the loop measure (the `q^2` of
/// `d^3q` already lives in the integrand).
fn evaluate_sample(user_data: &mut UserData, x: &[f64]) -> Result<f64, bpt::Error> {
    let q = user_data.q_min + x[0] * (user_data.q_max - user_data.q_min);
    let nu = -1. + 2. * x[1];
    let phi = 2. * std::f64::consts::PI * x[2];

    let jacobian = (user_data.q_max - user_data.q_min) * 2. * 2. * std::f64::consts::PI
        / (2. * std::f64::consts::PI).powi(3);

    let mut integrand = LoopIntegrand::new(&mut user_data.kern, &user_data.power)?;

    Ok(jacobian * evaluate_named(&mut integrand, &user_data.observable, [q, nu, phi])?)
}

#[inline(always)]
fn vegas_integrand(
    x: &[f64],
    f: &mut [f64],
    user_data: &mut UserData,
    _nvec: usize,
    _core: i32,
    _weight: &[f64],
    _iter: usize,
) -> Result<(), &'static str> {
    for (y, fi) in x.chunks(3).zip(f.iter_mut()) {
        *fi = evaluate_sample(user_data, y).map_err(|_| "integrand evaluation failed")?;
    }
    Ok(())
}

#[inline(always)]
fn suave_integrand(
    x: &[f64],
    f: &mut [f64],
    user_data: &mut UserData,
    nvec: usize,
    core: i32,
    _weight: &[f64],
    _iter: usize,
) -> Result<(), &'static str> {
    cuhre_integrand(x, f, user_data, nvec, core)
}

#[inline(always)]
fn cuhre_integrand(
    x: &[f64],
    f: &mut [f64],
    user_data: &mut UserData,
    _nvec: usize,
    _core: i32,
) -> Result<(), &'static str> {
    for (y, fi) in x.chunks(3).zip(f.iter_mut()) {
        *fi = evaluate_sample(user_data, y).map_err(|_| "integrand evaluation failed")?;
    }
    Ok(())
}

/// Load a two-column (k, P) table, skipping blank lines and `#` comments.
fn load_power_table(filename: &str) -> Result<TabulatedPower, Report> {
    let f = File::open(filename)
        .wrap_err_with(|| format!("Could not open power spectrum table {}", filename))
        .suggestion("Does the path exist?")?;

    let mut ks = vec![];
    let mut ps = vec![];

    for line in BufReader::new(f).lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut cols = line.split_whitespace();
        match (cols.next(), cols.next()) {
            (Some(k), Some(p)) => {
                ks.push(f64::from_str(k).wrap_err("Could not parse wavevector column")?);
                ps.push(f64::from_str(p).wrap_err("Could not parse power column")?);
            }
            _ => panic!("Malformed line in {}: {}", filename, line),
        }
    }

    TabulatedPower::new(ks, ps).wrap_err("Could not build the power spectrum interpolation")
}

fn build_kernel(settings: &Settings) -> Result<Kernel, Report> {
    // one-loop power spectrum: two external slots, three tracked wavevectors
    let mut kern = Kernel::new(2, 1).wrap_err("Could not create the kernel context")?;
    kern.set_z(settings.loop_integral.z, &settings.fiducials);
    Ok(kern)
}

fn integrate(settings: &Settings, power_file: &str, observable: &str) -> Result<(), Report> {
    let kern = build_kernel(settings)?;

    let mut ci = CubaIntegrator::new();
    ci.set_nstart(settings.integrator.n_start as i64)
        .set_nincrease(settings.integrator.n_increase as i64)
        .set_maxeval(settings.integrator.n_max as i64)
        .set_epsrel(settings.integrator.eps_rel)
        .set_epsabs(settings.integrator.eps_abs)
        .set_border(settings.integrator.border)
        .set_seed(settings.integrator.seed);

    let f = File::create(format!(
        "{}{}_res.dat",
        settings.general.res_file_prefix, observable
    ))
    .wrap_err("Unable to create result file")?;
    let mut result_file = BufWriter::new(f);

    for &k in &settings.loop_integral.k_bins {
        // cuba consumes the user data, so the table is reloaded per bin;
        // the kernel is cloned from the template instead
        let mut user_data = UserData {
            kern: kern.clone(),
            power: load_power_table(power_file)?,
            q_min: settings.loop_integral.q_min,
            q_max: settings.loop_integral.q_max,
            observable: observable.to_owned(),
        };
        user_data.kern.qset_k(0, k);
        user_data.kern.qset_mu(0, settings.loop_integral.mu);

        let start = Instant::now();
        let cuba_result = match settings.integrator.integrator {
            Integrator::Vegas => ci.vegas(
                3,
                1,
                settings.integrator.n_vec,
                CubaVerbosity::Progress,
                0,
                vegas_integrand,
                user_data,
            ),
            Integrator::Suave => ci.suave(
                3,
                1,
                settings.integrator.n_vec,
                settings.integrator.n_new,
                settings.integrator.n_min,
                settings.integrator.flatness,
                CubaVerbosity::Progress,
                suave_integrand,
                user_data,
            ),
            Integrator::Cuhre => ci.cuhre(
                3,
                1,
                settings.integrator.n_vec,
                CubaVerbosity::Progress,
                cuhre_integrand,
                user_data,
            ),
        };

        info!(
            "k = {:.4}: integrated {} samples in {:#?}",
            k,
            cuba_result.neval,
            start.elapsed()
        );

        println!(
            "{} at k = {:.4e}, mu = {:.3}: {} +- {:.3e}",
            observable.green(),
            k,
            settings.loop_integral.mu,
            format!("{:.6e}", cuba_result.result[0]).bold(),
            cuba_result.error[0],
        );

        writeln!(
            &mut result_file,
            "{}",
            serde_yaml::to_string(&CubaResultDef::new(&cuba_result))?
        )?;
        writeln!(&mut result_file, "...")?;
    }

    Ok(())
}

fn inspect(settings: &Settings, power_file: &str, matches: &ArgMatches) -> Result<(), Report> {
    let power = load_power_table(power_file)?;
    let mut kern = build_kernel(settings)?;

    let pt: Vec<f64> = matches
        .values_of("point")
        .unwrap()
        .map(|x| f64::from_str(x.trim_end_matches(',')).unwrap())
        .collect();
    if pt.len() != 3 {
        panic!(
            "Dimension of the input point is incorrect. It should be 3 but is {}.",
            pt.len()
        );
    }

    let observable = matches.value_of("observable").unwrap();

    kern.qset_k(0, settings.loop_integral.k_bins[0]);
    kern.qset_mu(0, settings.loop_integral.mu);

    let mut integrand = LoopIntegrand::new(&mut kern, &power)?;
    let result = evaluate_named(&mut integrand, observable, [pt[0], pt[1], pt[2]])
        .wrap_err("Could not evaluate the integrand")?;

    println!("result={:e}\n  | x={:?}\n", result, pt);
    Ok(())
}

fn bench(settings: &Settings, power_file: &str, matches: &ArgMatches) -> Result<(), Report> {
    let samples = usize::from_str(matches.value_of("samples").unwrap())
        .wrap_err("Could not parse the number of samples")?;

    let power = load_power_table(power_file)?;
    let mut kern = build_kernel(settings)?;
    kern.qset_k(0, settings.loop_integral.k_bins[0]);
    kern.qset_mu(0, settings.loop_integral.mu);

    let start = Instant::now();

    // one cloned context per worker; a context is stateful and must never
    // be shared across threads mid-evaluation
    let sum: f64 = (0..samples)
        .into_par_iter()
        .map_init(
            || kern.clone(),
            |kern, i| {
                let x = (i as f64 + 0.5) / samples as f64;
                let mut integrand = LoopIntegrand::new(kern, &power).unwrap();
                integrand
                    .pnl([
                        1e-4 + x * 0.3,
                        -0.99 + 1.98 * x,
                        2. * std::f64::consts::PI * x,
                    ])
                    .unwrap()
            },
        )
        .sum();

    println!(
        "{} samples in {:#?} (anti-optimizer sum: {:e})",
        samples,
        start.elapsed(),
        sum
    );
    Ok(())
}

fn main() -> Result<(), Report> {
    env_logger::init();

    let matches = App::new("One-loop galaxy power spectrum integrator")
        .version("0.1")
        .about("Numerically integrate bootstrap perturbation-theory loop corrections")
        .arg(
            Arg::with_name("config")
                .short("f")
                .long("config")
                .value_name("CONFIG_FILE")
                .default_value("settings.yaml")
                .help("Set the configuration file"),
        )
        .arg(
            Arg::with_name("power")
                .short("p")
                .long("power")
                .value_name("POWER_FILE")
                .default_value("pk.dat")
                .help("Set the tabulated linear power spectrum"),
        )
        .arg(
            Arg::with_name("observable")
                .short("o")
                .long("observable")
                .value_name("OBSERVABLE")
                .default_value("pnl")
                .help("Observable to integrate (pnl, p22, p13, or a parameter derivative)"),
        )
        .subcommand(
            SubCommand::with_name("bench").about("Run a benchmark").arg(
                Arg::with_name("samples")
                    .required(true)
                    .long("samples")
                    .short("s")
                    .value_name("SAMPLES")
                    .help("Number of samples for benchmark"),
            ),
        )
        .subcommand(
            SubCommand::with_name("inspect")
                .about("Inspect a single input point")
                .arg(
                    Arg::with_name("observable")
                        .short("o")
                        .long("observable")
                        .default_value("pnl")
                        .help("Observable to evaluate"),
                )
                .arg(
                    Arg::with_name("point")
                        .short("p")
                        .required(true)
                        .min_values(3)
                        .allow_hyphen_values(true)
                        .help("Integration sample point (q, nu, phi)"),
                ),
        )
        .get_matches();

    let settings = Settings::from_file(matches.value_of("config").unwrap())?;
    let power_file = matches.value_of("power").unwrap();

    match matches.subcommand() {
        ("bench", Some(sub)) => bench(&settings, power_file, sub),
        ("inspect", Some(sub)) => inspect(&settings, power_file, sub),
        _ => integrate(
            &settings,
            power_file,
            matches.value_of("observable").unwrap(),
        ),
    }
}
