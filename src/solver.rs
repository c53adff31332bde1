//! Preconditioned conjugate-gradient driver.
//!
//! The driver orchestrates operator applies, assemblies, preconditioner
//! applies and global dot-product reductions over the blocked multi-field
//! vectors of a [`SolverContext`]. All `nfields` right-hand sides share one
//! operator apply and one assembly per iteration, amortizing communication
//! latency across fields.
//!
//! Two termination policies: tolerance-based (stop once the global residual
//! norm satisfies the relative/absolute criterion, hard-capped at the
//! iteration limit), or fixed-count when the tolerance is non-positive (run
//! exactly the iteration limit, no residual test). Exhausting the cap is not
//! an error; callers judge convergence from the returned count.

use crate::context::SolverContext;
use crate::nullspace;
use crate::operator::EllipticOperator;
use crate::precond::Preconditioner;
use bakeoff_gs::ReduceOp;
use log::debug;
use nalgebra::{DVector, RealField};
use std::fmt;

/// Breakdown conditions of the CG iteration. These indicate a problem-setup
/// contract violation (non-SPD operator or preconditioner), unlike plain
/// non-convergence, which is reported through the iteration count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveError {
    /// Encountered `<p, A p> <= 0`.
    IndefiniteOperator,
    /// Encountered `<r, M^-1 r> < 0`.
    IndefinitePreconditioner,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::IndefiniteOperator => {
                write!(f, "operator is not positive definite")
            }
            SolveError::IndefinitePreconditioner => {
                write!(f, "preconditioner is not positive definite")
            }
        }
    }
}

impl std::error::Error for SolveError {}

/// The PCG iteration with reusable workspace.
///
/// Workspace vectors survive across solves, so repeated benchmark trials
/// allocate nothing after the first.
pub struct Pcg<T: RealField> {
    tolerance: T,
    max_iterations: usize,
    p: DVector<T>,
    z: DVector<T>,
    ap: DVector<T>,
}

impl<T: RealField + Copy> Default for Pcg<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: RealField + Copy> Pcg<T> {
    pub fn new() -> Self {
        Self {
            tolerance: nalgebra::convert(1e-8),
            max_iterations: 1000,
            p: DVector::zeros(0),
            z: DVector::zeros(0),
            ap: DVector::zeros(0),
        }
    }

    /// A non-positive tolerance selects fixed-iteration mode: exactly
    /// `max_iterations` iterations, no residual test.
    pub fn with_tolerance(mut self, tolerance: T) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Runs the iteration on `ctx.x`/`ctx.r` and returns the number of
    /// iterations performed.
    ///
    /// On entry `ctx.r` must hold the consistent (assembled) residual of the
    /// initial guess `ctx.x`. On return `ctx.x` holds the approximate
    /// solution and `ctx.r` the final residual.
    pub fn solve(
        &mut self,
        ctx: &mut SolverContext<T>,
        op: &dyn EllipticOperator<T>,
        precond: &dyn Preconditioner<T>,
    ) -> Result<usize, SolveError> {
        let nfields = ctx.nfields;
        let offset = ctx.field_offset;
        let n = nfields * offset;
        assert_eq!(op.num_local_dofs(), ctx.nlocal);
        assert_eq!(ctx.x.len(), n);
        assert_eq!(ctx.r.len(), n);
        if self.p.len() != n {
            self.p = DVector::zeros(n);
            self.z = DVector::zeros(n);
            self.ap = DVector::zeros(n);
        }

        let fixed_count = self.tolerance <= T::zero();

        ctx.profiler.time("preco", || {
            precond.apply(nfields, offset, ctx.r.as_slice(), self.z.as_mut_slice())
        });
        let (mut rz, rdotr0) = ctx.weighted_dot2(self.z.as_slice(), ctx.r.as_slice());
        self.p.copy_from(&self.z);

        let target = {
            let t2 = self.tolerance * self.tolerance;
            (t2 * rdotr0).max(t2)
        };
        let mut rdotr = rdotr0;
        debug!("pcg: initial rdotr {:?}, target {:?}", rdotr0, target);

        let mut iterations = 0;
        while iterations < self.max_iterations {
            if !fixed_count && rdotr <= target {
                break;
            }

            // ap = A p, assembled across duplicates
            if ctx.overlap {
                ctx.profiler.time("Ax1", || {
                    op.apply_boundary(nfields, offset, self.p.as_slice(), self.ap.as_mut_slice())
                });
                ctx.profiler.time("AxGs", || {
                    ctx.gs
                        .assemble_begin(ReduceOp::Add, nfields, offset, self.ap.as_slice());
                    ctx.profiler.time("Ax2", || {
                        op.apply_interior(nfields, offset, self.p.as_slice(), self.ap.as_mut_slice())
                    });
                    ctx.gs.assemble_finish(self.ap.as_mut_slice());
                });
            } else {
                ctx.profiler.time("Ax", || {
                    op.apply(nfields, offset, self.p.as_slice(), self.ap.as_mut_slice())
                });
                ctx.profiler.time("gs", || {
                    ctx.gs
                        .assemble(ReduceOp::Add, nfields, offset, self.ap.as_mut_slice())
                });
            }

            let p_ap = ctx
                .profiler
                .time("dot1", || ctx.weighted_dot(self.p.as_slice(), self.ap.as_slice()));
            if p_ap <= T::zero() {
                return Err(SolveError::IndefiniteOperator);
            }

            let alpha = rz / p_ap;
            ctx.profiler.time("updatePCG", || {
                ctx.x.axpy(alpha, &self.p, T::one());
                ctx.r.axpy(-alpha, &self.ap, T::one());
            });

            ctx.profiler.time("preco", || {
                precond.apply(nfields, offset, ctx.r.as_slice(), self.z.as_mut_slice())
            });
            let (rz_new, new_rdotr) = ctx
                .profiler
                .time("dot2", || ctx.weighted_dot2(self.z.as_slice(), ctx.r.as_slice()));
            if rz_new < T::zero() {
                return Err(SolveError::IndefinitePreconditioner);
            }

            let beta = if rz > T::zero() { rz_new / rz } else { T::zero() };
            rz = rz_new;
            rdotr = new_rdotr;
            ctx.profiler
                .time("updatePCG", || self.p.axpy(T::one(), &self.z, beta));

            iterations += 1;
            debug!("pcg iteration {}: rdotr {:?}", iterations, rdotr);
        }

        Ok(iterations)
    }
}

/// A full benchmark solve: null-space projection of the right-hand side (for
/// singular all-Neumann systems), the PCG iteration, then projection of the
/// solution.
pub fn solve<T: RealField + Copy>(
    pcg: &mut Pcg<T>,
    ctx: &mut SolverContext<T>,
    op: &dyn EllipticOperator<T>,
    precond: &dyn Preconditioner<T>,
) -> Result<usize, SolveError> {
    if ctx.all_neumann {
        nullspace::remove_rhs_mean(ctx);
    }
    let iterations = pcg.solve(ctx, op, precond)?;
    if ctx.all_neumann {
        nullspace::remove_solution_mean(ctx);
    }
    Ok(iterations)
}
