//! Constant null-space correction for singular (all-Neumann) systems.
//!
//! With pure Neumann boundaries the constant vector spans the operator's
//! null space: the system is solvable only for zero-mean right-hand sides,
//! and the solution is determined up to an additive constant. The benchmark
//! projects the mean out of the RHS before the solve and out of the
//! solution after it.

use crate::comm::Communicator;
use crate::context::SolverContext;
use bakeoff_gs::ReduceOp;
use nalgebra::RealField;

/// Subtracts each field's global mean, weighting duplicated DOFs by their
/// inverse multiplicity so the mean is taken over distinct global DOFs.
///
/// Idempotent up to rounding: correcting a zero-mean field changes nothing.
pub fn zero_mean<T: RealField + Copy>(
    comm: &dyn Communicator<T>,
    inv_degree: &[T],
    global_dofs: T,
    nfields: usize,
    field_offset: usize,
    q: &mut [T],
) {
    let nlocal = inv_degree.len();
    for f in 0..nfields {
        let field = &mut q[f * field_offset..f * field_offset + nlocal];
        let mut local = T::zero();
        for (v, &w) in field.iter().zip(inv_degree) {
            local += w * *v;
        }
        let mean = comm.all_reduce(ReduceOp::Add, local) / global_dofs;
        for v in field.iter_mut() {
            *v -= mean;
        }
    }
}

/// Projects the constant component out of the context's residual fields.
pub fn remove_rhs_mean<T: RealField + Copy>(ctx: &mut SolverContext<T>) {
    zero_mean(
        &*ctx.comm,
        &ctx.inv_degree,
        ctx.global_dofs,
        ctx.nfields,
        ctx.field_offset,
        ctx.r.as_mut_slice(),
    );
}

/// Projects the constant component out of the context's solution fields.
pub fn remove_solution_mean<T: RealField + Copy>(ctx: &mut SolverContext<T>) {
    zero_mean(
        &*ctx.comm,
        &ctx.inv_degree,
        ctx.global_dofs,
        ctx.nfields,
        ctx.field_offset,
        ctx.x.as_mut_slice(),
    );
}
