//! Convergence diagnostics and posterior summaries for scalar chains.

use ndarray::{ArrayView2, Axis};

/// Lag-`k` autocorrelation for a scalar chain.
pub fn autocorrelation(series: &[f64], lag: usize) -> f64 {
    if series.is_empty() || lag >= series.len() {
        return 0.0;
    }
    let mean = series.iter().sum::<f64>() / series.len() as f64;
    let denominator: f64 = series.iter().map(|v| (v - mean) * (v - mean)).sum();
    if denominator <= 0.0 {
        return 0.0;
    }
    let numerator: f64 = series
        .iter()
        .zip(&series[lag..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum();
    numerator / denominator
}

/// Effective sample size of one chain, truncating the autocorrelation sum at the
/// first non-positive lag.
pub fn effective_sample_size(series: &[f64]) -> f64 {
    let n = series.len();
    if n < 2 {
        return n as f64;
    }
    let mut rho_sum = 0.0;
    for lag in 1..n {
        let rho = autocorrelation(series, lag);
        if rho <= 0.0 {
            break;
        }
        rho_sum += rho;
    }
    n as f64 / (1.0 + 2.0 * rho_sum).max(1.0)
}

/// Effective sample size pooled over chains (`[chain, draw]`): the sum of the
/// per-chain estimates.
pub fn multi_chain_ess(chains: ArrayView2<'_, f64>) -> f64 {
    chains
        .axis_iter(Axis(0))
        .map(|chain| effective_sample_size(&chain.to_vec()))
        .sum()
}

/// Split-R-hat (Gelman et al., BDA3) for draws laid out `[chain, draw]`.
///
/// Each chain is cut in half and the halves are treated as separate chains.
/// Returns `None` when fewer than four draws per chain are available or when
/// every draw is identical.
pub fn split_rhat(chains: ArrayView2<'_, f64>) -> Option<f64> {
    let (n_chains, n_draws) = chains.dim();
    let half = n_draws / 2;
    if n_chains == 0 || half < 2 {
        return None;
    }

    let halves: Vec<Vec<f64>> = chains
        .axis_iter(Axis(0))
        .flat_map(|chain| {
            let draws = chain.to_vec();
            [draws[..half].to_vec(), draws[n_draws - half..].to_vec()]
        })
        .collect();

    let n = half as f64;
    let means: Vec<f64> = halves.iter().map(|h| h.iter().sum::<f64>() / n).collect();
    let variances: Vec<f64> = halves
        .iter()
        .zip(&means)
        .map(|(h, m)| h.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / (n - 1.0))
        .collect();

    let k = halves.len() as f64;
    let grand_mean = means.iter().sum::<f64>() / k;
    let between = n / (k - 1.0) * means.iter().map(|m| (m - grand_mean).powi(2)).sum::<f64>();
    let within = variances.iter().sum::<f64>() / k;
    if !(within > 0.0) {
        return None;
    }
    let var_plus = (n - 1.0) / n * within + between / n;
    Some((var_plus / within).sqrt())
}

/// Empirical quantile with linear interpolation between order statistics.
///
/// `sorted` must be in ascending order.
pub fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        len => {
            let pos = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Posterior summary of one scalar quantity.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    /// 2.5% quantile
    pub q025: f64,
    pub median: f64,
    /// 97.5% quantile
    pub q975: f64,
    pub ess: f64,
    pub split_rhat: Option<f64>,
}

/// Summarise the draws of one quantity laid out `[chain, draw]`.
pub fn summarize(name: impl Into<String>, chains: ArrayView2<'_, f64>) -> ParameterSummary {
    let mut pooled: Vec<f64> = chains.iter().copied().collect();
    let len = pooled.len() as f64;
    let mean = pooled.iter().sum::<f64>() / len;
    let sd = if pooled.len() > 1 {
        (pooled.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (len - 1.0)).sqrt()
    } else {
        0.0
    };
    pooled.sort_by(f64::total_cmp);

    ParameterSummary {
        name: name.into(),
        mean,
        sd,
        q025: quantile(&pooled, 0.025),
        median: quantile(&pooled, 0.5),
        q975: quantile(&pooled, 0.975),
        ess: multi_chain_ess(chains),
        split_rhat: split_rhat(chains),
    }
}
