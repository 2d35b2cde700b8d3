//! End-to-end runs of the Gibbs sampler on small problems with known answers.

use hierarchical_deconv::{
    HierarchicalRegression, HierarchicalResults, ObservationSet, PriorScales, Simulation,
};
use ndarray::{Array1, Array2, array};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;
use std::f64::consts::PI;

fn median(mut draws: Vec<f64>) -> f64 {
    draws.sort_by(f64::total_cmp);
    let mid = draws.len() / 2;
    if draws.len() % 2 == 0 {
        0.5 * (draws[mid - 1] + draws[mid])
    } else {
        draws[mid]
    }
}

fn posterior_median(results: &HierarchicalResults, name: &str) -> f64 {
    median(
        results
            .get_posterior_samples(name)
            .unwrap_or_else(|| panic!("unknown parameter {name}")),
    )
}

fn fit(data: ObservationSet, chains: usize, seed: u64, burn_in: usize, samples: usize) -> HierarchicalResults {
    HierarchicalRegression::new(data, PriorScales::default(), chains, seed)
        .unwrap()
        .run(burn_in, samples)
        .unwrap()
}

#[test]
fn two_subjects_separate_around_group_mean() {
    let data = ObservationSet::new(
        4,
        1,
        2,
        array![1.0, 1.2, 3.0, 3.2],
        array![[1.0], [1.0], [1.0], [1.0]],
        vec![1, 1, 2, 2],
    )
    .unwrap();
    let results = fit(data, 4, 2024, 2_000, 2_000);

    assert_eq!(results.samples.shape(), &[4, 2_000, 6]);
    assert!(results.samples.iter().all(|v| v.is_finite()));

    let subject_one = posterior_median(&results, "beta_subject[1,1]");
    let subject_two = posterior_median(&results, "beta_subject[2,1]");
    let group = posterior_median(&results, "beta_group[1]");
    assert!((subject_one - 1.1).abs() < 0.35, "subject 1: {subject_one}");
    assert!((subject_two - 3.1).abs() < 0.35, "subject 2: {subject_two}");
    // N(0, 2.5) priors with two subjects pull the group mean towards zero,
    // well below the midpoint 2.1 of the subject means.
    assert!(subject_one < group && group < subject_two, "group: {group}");
    assert!((group - 1.45).abs() < 0.15, "group: {group}");
    for s in 1..=2 {
        let eps = posterior_median(&results, &format!("eps[{s}]"));
        assert!(eps > 0.0 && eps < 1.0, "eps[{s}]: {eps}");
    }

    let gsd = results.group_sd_samples();
    assert!(gsd.iter().all(|&v| v >= 0.0));
}

#[test]
fn derived_coefficients_follow_every_draw() {
    let data = ObservationSet::new(
        6,
        2,
        3,
        array![0.3, 1.1, -0.4, 2.2, 1.9, 0.0],
        array![[1.0, 0.2], [1.0, -1.0], [1.0, 0.5], [1.0, 1.5], [1.0, -0.3], [1.0, 0.9]],
        vec![1, 2, 3, 1, 2, 3],
    )
    .unwrap();
    let results = fit(data, 2, 3, 50, 100);

    let beta = results.beta_subject_samples();
    for chain in 0..2 {
        for draw in [0, 37, 99] {
            let params = results.draw(chain, draw).unwrap();
            let expected = params.beta_subject();
            for s in 0..3 {
                for k in 0..2 {
                    assert_eq!(beta[[chain, draw, s, k]], expected[[s, k]]);
                }
            }
        }
    }
    assert_eq!(results.parameter_summaries().len(), results.layout.dim() + 6);
}

#[test]
fn one_subject_per_observation_stays_finite() {
    let n = 5;
    let data = ObservationSet::new(
        n,
        1,
        n,
        array![0.5, -1.0, 2.0, 0.1, 1.3],
        Array2::ones((n, 1)),
        (1..=n).collect(),
    )
    .unwrap();
    let results = fit(data, 2, 11, 500, 500);
    assert!(results.samples.iter().all(|v| v.is_finite()));
    assert!(results.eps_samples().iter().all(|&v| v > 0.0));
}

fn mean_and_sd(draws: &[f64]) -> (f64, f64) {
    let n = draws.len() as f64;
    let mean = draws.iter().sum::<f64>() / n;
    let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}

#[test]
fn without_observations_every_parameter_follows_its_prior() {
    // Half-normal with scale 2.5: mean 2.5·√(2/π), sd 2.5·√(1 - 2/π)
    let half_normal = (2.5 * (2.0 / PI).sqrt(), 2.5 * (1.0 - 2.0 / PI).sqrt());
    let normal = (0.0, 2.5);

    for collapsed in [true, false] {
        let data = ObservationSet::new(0, 1, 3, Array1::zeros(0), Array2::zeros((0, 1)), vec![])
            .unwrap();
        let results = HierarchicalRegression::new(data, PriorScales::default(), 4, 31)
            .unwrap()
            .with_collapsed_updates(collapsed)
            .run(1_000, 20_000)
            .unwrap();

        let mut expectations = vec![
            ("beta_group[1]".to_string(), normal),
            ("group_sd[1]".to_string(), half_normal),
        ];
        for s in 1..=3 {
            expectations.push((format!("eps[{s}]"), half_normal));
            expectations.push((format!("beta_subject_offset[{s},1]"), normal));
        }
        for (name, (want_mean, want_sd)) in expectations {
            let (mean, sd) = mean_and_sd(&results.get_posterior_samples(&name).unwrap());
            assert!(
                (mean - want_mean).abs() < 0.1,
                "collapsed = {collapsed}, {name}: mean {mean} vs {want_mean}"
            );
            assert!(
                (sd - want_sd).abs() < 0.1,
                "collapsed = {collapsed}, {name}: sd {sd} vs {want_sd}"
            );
        }
        assert!(results.max_split_rhat().unwrap() < 1.05);
    }
}

/// Ordinary least squares for a two-column design.
fn ols_two_columns(x: &Array2<f64>, y: &Array1<f64>) -> (f64, f64, f64) {
    let xtx = x.t().dot(x);
    let xty = x.t().dot(y);
    let det = xtx[[0, 0]] * xtx[[1, 1]] - xtx[[0, 1]] * xtx[[1, 0]];
    let b0 = (xtx[[1, 1]] * xty[0] - xtx[[0, 1]] * xty[1]) / det;
    let b1 = (xtx[[0, 0]] * xty[1] - xtx[[1, 0]] * xty[0]) / det;
    let resid = y - &x.dot(&array![b0, b1]);
    let sigma = (resid.mapv(|r| r * r).sum() / (y.len() as f64 - 2.0)).sqrt();
    (b0, b1, sigma)
}

#[test]
fn single_subject_matches_pooled_regression() {
    let n = 60;
    let mut rng = ChaCha8Rng::seed_from_u64(8);
    let x = Array2::from_shape_fn((n, 2), |(_, k)| {
        if k == 0 { 1.0 } else { rng.sample(Normal::standard()) }
    });
    let y = Array1::from_shape_fn(n, |i| {
        0.8 - 1.5 * x[[i, 1]] + 0.5 * rng.sample::<f64, _>(Normal::standard())
    });
    let (b0, b1, sigma) = ols_two_columns(&x, &y);

    let data = ObservationSet::new(n, 2, 1, y, x, vec![1; n]).unwrap();
    let results = fit(data, 4, 5, 1_000, 1_500);

    let intercept = posterior_median(&results, "beta_subject[1,1]");
    let slope = posterior_median(&results, "beta_subject[1,2]");
    let eps = posterior_median(&results, "eps[1]");
    assert!((intercept - b0).abs() < 0.1, "intercept {intercept} vs {b0}");
    assert!((slope - b1).abs() < 0.1, "slope {slope} vs {b1}");
    assert!((eps - sigma).abs() < 0.15, "eps {eps} vs {sigma}");
}

#[test]
fn recovers_simulated_subject_effects() {
    let truth = Simulation::new(8, 40, array![1.0, -0.5], array![0.5, 0.3])
        .simulate(99)
        .unwrap();
    let results = fit(truth.data.clone(), 4, 1, 1_000, 1_000);

    let beta = results.beta_subject_samples();
    let (chains, draws, j, m) = beta.dim();
    let pooled = beta.to_shape((chains * draws, j, m)).unwrap();
    let mean = pooled.mean_axis(ndarray::Axis(0)).unwrap();

    let mean_abs_error =
        (&mean - &truth.beta_subject).mapv(f64::abs).sum() / (j * m) as f64;
    assert!(mean_abs_error < 0.3, "mean absolute error {mean_abs_error}");

    let group = results.beta_group_samples();
    let sample_group_mean = truth.beta_subject.mean_axis(ndarray::Axis(0)).unwrap();
    for k in 0..m {
        let draws: Vec<f64> = group.index_axis(ndarray::Axis(2), k).iter().copied().collect();
        let estimate = median(draws);
        assert!(
            (estimate - sample_group_mean[k]).abs() < 0.4,
            "beta_group[{k}] {estimate} vs {}",
            sample_group_mean[k]
        );
    }

    let rhat = results.max_split_rhat().unwrap();
    assert!(rhat < 1.1, "max split R-hat {rhat}");
}

#[test]
fn same_seed_gives_same_draws() {
    let data = Simulation::new(3, 10, array![0.5], array![1.0])
        .simulate(4)
        .unwrap()
        .data;
    let a = fit(data.clone(), 2, 77, 20, 30);
    let b = fit(data, 2, 77, 20, 30);
    assert_eq!(a.samples, b.samples);
}

#[test]
fn plain_full_conditionals_agree_with_collapsed_updates() {
    let data = Simulation::new(5, 25, array![2.0], array![1.0])
        .simulate(12)
        .unwrap()
        .data;
    let collapsed = fit(data.clone(), 2, 21, 1_000, 2_000);
    let plain = HierarchicalRegression::new(data, PriorScales::default(), 2, 21)
        .unwrap()
        .with_collapsed_updates(false)
        .run(1_000, 2_000)
        .unwrap();

    for s in 1..=5 {
        let name = format!("beta_subject[{s},1]");
        let a = posterior_median(&collapsed, &name);
        let b = posterior_median(&plain, &name);
        assert!((a - b).abs() < 0.15, "{name}: {a} vs {b}");
    }
}
