use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use sap::{test_utils::*, *};

fn stack_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("Box Stack");

    for n in [4, 16, 64] {
        let problem = make_box_stack_problem(n).unwrap();

        for linear_solver in [
            LinearSolverType::Dense,
            LinearSolverType::Supernodal,
            LinearSolverType::SparseLdl,
        ] {
            let solver = SapSolver::new(SapSolverParameters {
                linear_solver,
                ..Default::default()
            })
            .unwrap();
            group.bench_function(BenchmarkId::new(format!("{:?}", linear_solver), n), |b| {
                b.iter(|| solver.solve(&problem).is_ok())
            });
        }
    }

    group.finish();
}

fn model_bench(c: &mut Criterion) {
    let mut group = c.benchmark_group("SAP Model");

    for n in [16, 64] {
        let problem = make_box_stack_problem(n).unwrap();
        let model = SapModel::new(&problem).unwrap();
        let v = model.v_star().clone();

        group.bench_function(BenchmarkId::new("Hessian", n), |b| {
            b.iter(|| model.calc_hessian(&v).size())
        });
    }

    group.finish();
}

criterion_group!(benches, stack_bench, model_bench);
criterion_main!(benches);
