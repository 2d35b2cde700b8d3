//! Example of recovering simulated subject response curves.
//!
//! Each subject's response to an event is described by a Legendre basis. The
//! example:
//! 1. Simulates subjects whose basis weights scatter around a group curve
//! 2. Fits the hierarchical model to recover the per-subject weights
//! 3. Converts true and estimated weights to response time courses and
//!    compares them at every timepoint

use hierarchical_deconv::{
    BasisSet, HierarchicalRegression, PriorScales, ResponseBasis, Simulation,
};
use ndarray::{Axis, array};
use std::error::Error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let basis = ResponseBasis::new(BasisSet::Legendre, (0.0, 12.0), 2.0, 3)?;
    println!("Basis regressors: {:?}", basis.labels());

    // Group curve and the subject-to-subject spread of its weights
    let group_mean = array![1.0, -0.6, 0.3];
    let group_sd = array![0.4, 0.3, 0.2];
    let experiment = Simulation::new(12, 60, group_mean.clone(), group_sd)
        .with_noise_sd(0.8)
        .with_intercept(false)
        .simulate(7)?;

    let results = HierarchicalRegression::new(
        experiment.data.clone(),
        PriorScales::default(),
        4,
        11,
    )?
    .run(1000, 1000)?;
    results.summary();

    // Posterior mean weights per subject, [subject, regressor]
    let beta = results.beta_subject_samples();
    let (chains, draws, j, m) = beta.dim();
    let estimated = beta
        .to_shape((chains * draws, j, m))?
        .mean_axis(Axis(0))
        .ok_or("no posterior draws")?;

    let true_curves = basis.timecourses(experiment.beta_subject.view())?;
    let fitted_curves = basis.timecourses(estimated.view())?;
    let group_curve = basis.timecourse(group_mean.view())?;

    println!("\n{:>8} {:>12} {:>12}", "Subject", "Max |error|", "Peak (true)");
    for s in 0..j {
        let error = (&fitted_curves.row(s) - &true_curves.row(s))
            .mapv(f64::abs)
            .fold(0.0_f64, |acc, &v| acc.max(v));
        let peak = true_curves.row(s).fold(f64::NEG_INFINITY, |acc, &v| acc.max(v));
        println!("{:>8} {:>12.4} {:>12.4}", s + 1, error, peak);
    }
    println!("\nGroup curve: {:.3}", group_curve);
    if let Some(rhat) = results.max_split_rhat() {
        println!("Max split R-hat: {:.3}", rhat);
    }
    Ok(())
}
