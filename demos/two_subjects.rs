//! Example of hierarchical regression on the smallest interesting data set.
//!
//! Two subjects with two measurements each, an intercept-only design:
//! subject 1 measures about 1.1 and subject 2 about 3.1. The example:
//! 1. Builds and validates the observation table
//! 2. Fits the non-centred hierarchical model with four chains
//! 3. Prints posterior summaries, including the derived `beta_subject`
//!
//! Run with `RUST_LOG=debug` to see the sampler's diagnostics.

use hierarchical_deconv::regression::HierarchicalRegression;
use hierarchical_deconv::{ObservationSet, PriorScales};
use ndarray::array;
use std::error::Error;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let data = ObservationSet::new(
        4,
        1,
        2,
        array![1.0, 1.2, 3.0, 3.2],
        array![[1.0], [1.0], [1.0], [1.0]],
        vec![1, 1, 2, 2],
    )?;

    // Configure and run the sampler
    let n_chains = 4;
    let burnin = 1000;
    let samples = 2000;
    let seed = 42;

    let model = HierarchicalRegression::new(data, PriorScales::default(), n_chains, seed)?;
    let results = model.run(burnin, samples)?;

    // Print summary
    results.summary();
    println!("\nDetailed results:");
    println!("----------------");
    println!("{}", results.run_stats);
    Ok(())
}
