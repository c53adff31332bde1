//! Per-solve state: field buffers, dot-product weights and the handles the
//! PCG driver needs.
//!
//! The context is an explicit, passed-by-reference struct rather than
//! process-wide state, so independent solves (and tests) never couple
//! through hidden globals. One context is reused across repeated benchmark
//! trials by resetting `x` and `r`.

use crate::assembly::GatherScatter;
use crate::comm::Communicator;
use crate::timing::Profiler;
use bakeoff_gs::ReduceOp;
use itertools::izip;
use nalgebra::{DVector, RealField};
use std::sync::Arc;

/// Pads a field length so each field block starts on a 64-byte line
/// (8 doubles).
pub fn padded_offset(nlocal: usize) -> usize {
    (nlocal + 7) / 8 * 8
}

pub struct SolverContext<T> {
    /// Independent right-hand sides stacked in one blocked vector.
    pub nfields: usize,
    /// Stride between field blocks; at least `nlocal`.
    pub field_offset: usize,
    pub nlocal: usize,
    /// Singular (all-Neumann) system: project out the constant null space.
    pub all_neumann: bool,
    /// Overlap interior computation with the boundary exchange.
    pub overlap: bool,

    /// Inverse global multiplicity per local DOF. Weights local dot-product
    /// contributions so duplicated DOFs count once globally.
    pub inv_degree: Vec<T>,
    /// Number of distinct global DOFs across all partitions.
    pub global_dofs: T,

    pub gs: GatherScatter<T>,
    pub comm: Arc<dyn Communicator<T>>,
    pub profiler: Profiler,

    /// Solution fields.
    pub x: DVector<T>,
    /// Residual (initially right-hand-side) fields.
    pub r: DVector<T>,
}

impl<T: RealField + Copy> SolverContext<T> {
    pub fn new(gs: GatherScatter<T>, comm: Arc<dyn Communicator<T>>, nfields: usize) -> Self {
        assert!(nfields >= 1);
        let nlocal = gs.num_local_dofs();
        let field_offset = padded_offset(nlocal);

        let inv_degree: Vec<T> = gs.multiplicity().iter().map(|&d| T::one() / d).collect();
        let local_unique: T = inv_degree.iter().fold(T::zero(), |acc, &w| acc + w);
        let global_dofs = comm.all_reduce(ReduceOp::Add, local_unique);

        Self {
            nfields,
            field_offset,
            nlocal,
            all_neumann: false,
            overlap: false,
            inv_degree,
            global_dofs,
            gs,
            comm,
            profiler: Profiler::new(false),
            x: DVector::zeros(nfields * field_offset),
            r: DVector::zeros(nfields * field_offset),
        }
    }

    pub fn with_all_neumann(mut self, all_neumann: bool) -> Self {
        self.all_neumann = all_neumann;
        self
    }

    pub fn with_overlap(mut self, overlap: bool) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_profiling(mut self, enabled: bool) -> Self {
        self.profiler = Profiler::new(enabled);
        self
    }

    /// Resets the solution to zero and the residual to `rhs`, for the next
    /// benchmark trial.
    pub fn reset(&mut self, rhs: &DVector<T>) {
        self.x.fill(T::zero());
        self.r.copy_from(rhs);
    }

    /// Globally reduced inverse-multiplicity-weighted dot product over all
    /// fields. Equals the dot product over distinct global DOFs when both
    /// vectors are consistent.
    pub fn weighted_dot(&self, a: &[T], b: &[T]) -> T {
        let mut local = T::zero();
        for f in 0..self.nfields {
            let base = f * self.field_offset;
            for (&w, &ai, &bi) in izip!(&self.inv_degree, &a[base..], &b[base..]) {
                local += w * ai * bi;
            }
        }
        self.comm.all_reduce(ReduceOp::Add, local)
    }

    /// Fused pass computing `<a, b>` and `<b, b>` together (one sweep over
    /// the data, two scalar reductions).
    pub fn weighted_dot2(&self, a: &[T], b: &[T]) -> (T, T) {
        let mut ab = T::zero();
        let mut bb = T::zero();
        for f in 0..self.nfields {
            let base = f * self.field_offset;
            for (&w, &ai, &bi) in izip!(&self.inv_degree, &a[base..], &b[base..]) {
                ab += w * ai * bi;
                bb += w * bi * bi;
            }
        }
        (
            self.comm.all_reduce(ReduceOp::Add, ab),
            self.comm.all_reduce(ReduceOp::Add, bb),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcess;

    #[test]
    fn field_offset_is_padded_to_eight() {
        assert_eq!(padded_offset(1), 8);
        assert_eq!(padded_offset(8), 8);
        assert_eq!(padded_offset(9), 16);
        assert_eq!(padded_offset(27), 32);
    }

    #[test]
    fn identity_map_weights_are_unit() {
        let gs = GatherScatter::<f64>::identity(5, Arc::new(SingleProcess));
        let ctx = SolverContext::new(gs, Arc::new(SingleProcess), 1);
        assert_eq!(ctx.inv_degree, vec![1.0; 5]);
        assert_eq!(ctx.global_dofs, 5.0);
        assert_eq!(ctx.field_offset, 8);
    }

    #[test]
    fn weighted_dot_counts_duplicates_once() {
        // Groups {0, 2} and {1}: entry 0/2 is one global DOF
        let (map, _) = bakeoff_gs::GatherMap::from_keys(&[5, 9, 5]);
        let gs = GatherScatter::new(map, Vec::new(), Vec::new(), Arc::new(SingleProcess));
        let ctx = SolverContext::new(gs, Arc::new(SingleProcess), 1);
        assert_eq!(ctx.global_dofs, 2.0);

        let offset = ctx.field_offset;
        let mut a = vec![0.0; offset];
        a[..3].copy_from_slice(&[2.0, 3.0, 2.0]);
        // Consistent vector: dot = 2*2 + 3*3 over unique DOFs
        assert_eq!(ctx.weighted_dot(&a, &a), 13.0);

        let (ab, bb) = ctx.weighted_dot2(&a, &a);
        assert_eq!(ab, 13.0);
        assert_eq!(bb, 13.0);
    }

    #[test]
    fn reset_restores_trial_state() {
        let gs = GatherScatter::<f64>::identity(3, Arc::new(SingleProcess));
        let mut ctx = SolverContext::new(gs, Arc::new(SingleProcess), 1);
        let rhs = DVector::from_element(ctx.nfields * ctx.field_offset, 2.5);
        ctx.x.fill(9.0);
        ctx.reset(&rhs);
        assert!(ctx.x.iter().all(|&v| v == 0.0));
        assert_eq!(ctx.r, rhs);
    }
}
