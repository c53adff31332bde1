use bakeoff::assembly::GatherScatter;
use bakeoff::comm::SingleProcess;
use bakeoff::gs::{gather_vec, ReduceOp};
use bakeoff::mesh::BoxMesh;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;

fn gather_add(c: &mut Criterion) {
    let mesh = BoxMesh::<f64>::box_hex(7, 8, 0, 1).unwrap();
    let q: Vec<f64> = (0..mesh.nlocal).map(|i| (i % 17) as f64).collect();
    let mut gathered = vec![0.0; mesh.gather.num_groups()];
    c.bench_function("gather add (N=7, 8^3 elements)", |b| {
        b.iter(|| gather_vec(ReduceOp::Add, 1, &mesh.gather, &q, &mut gathered))
    });
}

fn assemble_add(c: &mut Criterion) {
    let mesh = BoxMesh::<f64>::box_hex(7, 8, 0, 1).unwrap();
    let nlocal = mesh.nlocal;
    let gs = GatherScatter::for_mesh(&mesh, Arc::new(SingleProcess));
    let q: Vec<f64> = (0..nlocal).map(|i| (i % 17) as f64).collect();
    c.bench_function("assemble add (N=7, 8^3 elements)", |b| {
        b.iter_batched(
            || q.clone(),
            |mut q| gs.assemble(ReduceOp::Add, 1, nlocal, &mut q),
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, gather_add, assemble_add);
criterion_main!(benches);
