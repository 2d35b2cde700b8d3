use criterion::{Criterion, criterion_group, criterion_main};
use hierarchical_deconv::{HierarchicalRegression, PriorScales, Simulation};
use ndarray::array;
use std::time::Duration;

fn bench_gibbs(cr: &mut Criterion) {
    let subjects = [2, 10, 40];
    let per_subject = 50;

    let mut group = cr.benchmark_group("gibbs_sweeps");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(20));

    for &j in &subjects {
        let data = Simulation::new(j, per_subject, array![1.0, -0.5], array![0.5, 0.3])
            .simulate(42)
            .unwrap()
            .data;
        for collapsed in [true, false] {
            let bench_name = format!("run_j{}_n{}_collapsed_{}", j, j * per_subject, collapsed);
            group.bench_function(&bench_name, |bench| {
                bench.iter(|| {
                    HierarchicalRegression::new(data.clone(), PriorScales::default(), 1, 7)
                        .unwrap()
                        .with_collapsed_updates(collapsed)
                        .run(100, 100)
                        .unwrap()
                });
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_gibbs);
criterion_main!(benches);
