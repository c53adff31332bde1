//! Benchmark harness: reads a setup file, builds the partitioned problem,
//! runs a warm-up solve with a correctness check against the manufactured
//! solution, then times repeated solves and reports throughput.

use bakeoff::assembly::GatherScatter;
use bakeoff::comm::{run_on_local_cluster, Communicator, SingleProcess};
use bakeoff::config::Setup;
use bakeoff::context::SolverContext;
use bakeoff::gs::ReduceOp;
use bakeoff::mesh::{exact_solution, BoxMesh};
use bakeoff::operator::HelmholtzOperator;
use bakeoff::precond::{IdentityPreconditioner, JacobiPreconditioner, Preconditioner};
use bakeoff::report::{performance_summary, profiling_breakdown, TrialStats};
use bakeoff::solver::{solve, Pcg};
use eyre::{bail, ensure};
use log::info;
use nalgebra::DVector;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone)]
struct BenchConfig {
    degree: usize,
    nel_per_dim: usize,
    nfields: usize,
    lambda1: f64,
    tolerance: f64,
    max_iterations: usize,
    repetitions: usize,
    fixed_count: bool,
    overlap: bool,
    profiling: bool,
    jacobi: bool,
    partitions: usize,
}

fn main() -> eyre::Result<()> {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 2 {
        eprintln!("usage: {} <setup file>", args[0]);
        std::process::exit(1);
    }

    let setup = Setup::from_file(&args[1])?;
    let config = bench_config(&setup)?;

    if config.partitions == 1 {
        run_partition(&config, Arc::new(SingleProcess))
    } else {
        // One thread per slab partition over the in-process cluster
        let results = run_on_local_cluster::<f64, _, _>(config.partitions, |comm| {
            run_partition(&config, Arc::new(comm))
        });
        results.into_iter().collect()
    }
}

fn bench_config(setup: &Setup) -> eyre::Result<BenchConfig> {
    if let Some(krylov) = setup.get("KRYLOV SOLVER") {
        ensure!(
            krylov.eq_ignore_ascii_case("PCG"),
            "unsupported Krylov solver {:?}",
            krylov
        );
    }

    let degree: usize = setup.parsed("POLYNOMIAL DEGREE")?;
    let tolerance: f64 = setup.parsed_or("SOLVER TOLERANCE", 1e-8)?;
    let fixed_count = setup.flag("FIXED ITERATION COUNT") || tolerance <= 0.0;

    let jacobi = match setup.get("PRECONDITIONER") {
        None => true,
        Some(p) if p.eq_ignore_ascii_case("JACOBI") => true,
        Some(p) if p.eq_ignore_ascii_case("NONE") => false,
        Some(p) => bail!("unsupported preconditioner {:?}", p),
    };

    // Kernel 1 is the split (overlapped) operator apply
    let kernel_id: usize = setup.parsed_or("KERNEL ID", 0)?;
    let overlap = setup.flag("OVERLAP") || kernel_id == 1;

    Ok(BenchConfig {
        degree,
        nel_per_dim: setup.parsed_or("BOX NELEMENTS", 8)?,
        nfields: setup.parsed_or("NFIELDS", 1)?,
        lambda1: setup.parsed_or("LAMBDA", 1.0)?,
        tolerance,
        max_iterations: setup.parsed_or("MAXIMUM ITERATIONS", 1000)?,
        repetitions: setup.parsed_or("NREPETITIONS", 10)?,
        fixed_count,
        overlap,
        profiling: setup.flag("PROFILING"),
        jacobi,
        partitions: setup.parsed_or("PARTITIONS", 1)?,
    })
}

fn run_partition(config: &BenchConfig, comm: Arc<dyn Communicator<f64>>) -> eyre::Result<()> {
    let rank = comm.rank();
    let lambda0 = 1.0;
    let all_neumann = config.lambda1 == 0.0;

    let mesh = Arc::new(BoxMesh::box_hex(
        config.degree,
        config.nel_per_dim,
        rank,
        comm.size(),
    )?);
    info!(
        "rank {}: {} local elements, {} local DOFs",
        rank, mesh.nelements, mesh.nlocal
    );

    let gs = GatherScatter::for_mesh(&mesh, Arc::clone(&comm));
    let mut ctx = SolverContext::new(gs, Arc::clone(&comm), config.nfields)
        .with_all_neumann(all_neumann)
        .with_overlap(config.overlap)
        .with_profiling(config.profiling);

    let operator = HelmholtzOperator::new(Arc::clone(&mesh), lambda0, config.lambda1);
    let preconditioner: Box<dyn Preconditioner<f64>> = if config.jacobi {
        Box::new(JacobiPreconditioner::from_operator(&operator, &ctx.gs))
    } else {
        Box::new(IdentityPreconditioner)
    };

    // Assembled manufactured RHS, identical across fields
    let local_rhs = mesh.manufactured_rhs(lambda0, config.lambda1);
    let mut rhs = DVector::zeros(config.nfields * ctx.field_offset);
    for f in 0..config.nfields {
        rhs.as_mut_slice()[f * ctx.field_offset..f * ctx.field_offset + mesh.nlocal]
            .copy_from_slice(&local_rhs);
    }
    ctx.gs
        .assemble(ReduceOp::Add, config.nfields, ctx.field_offset, rhs.as_mut_slice());

    let mut pcg = Pcg::new()
        .with_tolerance(config.tolerance)
        .with_max_iterations(config.max_iterations);

    // Warm-up solve and correctness check
    ctx.reset(&rhs);
    let mut iterations = solve(&mut pcg, &mut ctx, &operator, &*preconditioner)?;
    let mut max_error: f64 = 0.0;
    for f in 0..config.nfields {
        for (dof, p) in mesh.coords.iter().enumerate() {
            let error = (exact_solution(p) - ctx.x[f * ctx.field_offset + dof]).abs();
            max_error = max_error.max(error);
        }
    }
    let global_max_error = comm.all_reduce(ReduceOp::Max, max_error);
    if rank == 0 {
        println!(
            "correctness check: maxError = {:e} in {} iterations",
            global_max_error, iterations
        );
    }

    // Timed trials; fixed-iteration mode runs the full iteration budget
    if config.fixed_count {
        pcg = pcg.with_tolerance(0.0);
    }
    ctx.profiler.reset();
    let mut elapsed = Duration::ZERO;
    for _ in 0..config.repetitions {
        ctx.reset(&rhs);
        comm.barrier();
        let start = Instant::now();
        iterations = solve(&mut pcg, &mut ctx, &operator, &*preconditioner)?;
        comm.barrier();
        elapsed += start.elapsed();
    }
    elapsed /= config.repetitions as u32;

    let stats = TrialStats {
        partitions: comm.size(),
        degree: config.degree,
        local_elements: mesh.nelements,
        nfields: config.nfields,
        iterations,
        repetitions: config.repetitions,
        elapsed,
    };
    let summary = performance_summary(&stats, &*comm);
    if rank == 0 {
        println!("\n{}", summary);
        if config.profiling {
            println!("\n{}", profiling_breakdown(&ctx.profiler, config.overlap));
        }
    }
    Ok(())
}
