//! Preconditioners for the conjugate-gradient iteration.

use crate::assembly::GatherScatter;
use crate::operator::EllipticOperator;
use bakeoff_gs::ReduceOp;
use nalgebra::RealField;

/// Application of an (approximate) inverse `z = M^-1 r`, per field block.
///
/// Opaque to the solver; the only requirement is symmetric positive
/// definiteness so that `<r, z>` stays a valid inner product.
pub trait Preconditioner<T> {
    fn apply(&self, nfields: usize, field_offset: usize, r: &[T], z: &mut [T]);
}

/// No preconditioning: `z = r`.
#[derive(Debug, Default)]
pub struct IdentityPreconditioner;

impl<T: RealField + Copy> Preconditioner<T> for IdentityPreconditioner {
    fn apply(&self, nfields: usize, field_offset: usize, r: &[T], z: &mut [T]) {
        z[..nfields * field_offset].copy_from_slice(&r[..nfields * field_offset]);
    }
}

/// Point Jacobi: `z = diag(A)^-1 r`, with the diagonal assembled across
/// duplicated DOFs so every copy divides by the same global value.
pub struct JacobiPreconditioner<T> {
    inv_diag: Vec<T>,
}

impl<T: RealField + Copy> JacobiPreconditioner<T> {
    pub fn from_operator(op: &dyn EllipticOperator<T>, gs: &GatherScatter<T>) -> Self {
        let mut diag = op.diagonal();
        assert_eq!(diag.len(), gs.num_local_dofs());
        gs.assemble(ReduceOp::Add, 1, diag.len(), &mut diag);
        let inv_diag = diag.iter().map(|&d| T::one() / d).collect();
        Self { inv_diag }
    }
}

impl<T: RealField + Copy> Preconditioner<T> for JacobiPreconditioner<T> {
    fn apply(&self, nfields: usize, field_offset: usize, r: &[T], z: &mut [T]) {
        let nlocal = self.inv_diag.len();
        for f in 0..nfields {
            for i in 0..nlocal {
                z[f * field_offset + i] = self.inv_diag[i] * r[f * field_offset + i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::SingleProcess;
    use crate::mesh::BoxMesh;
    use crate::operator::HelmholtzOperator;
    use std::sync::Arc;

    #[test]
    fn identity_copies_fields() {
        let r = vec![1.0, 2.0, 3.0, 4.0];
        let mut z = vec![0.0; 4];
        IdentityPreconditioner.apply(2, 2, &r, &mut z);
        assert_eq!(z, r);
    }

    #[test]
    fn jacobi_inverts_the_assembled_diagonal() {
        let mesh = Arc::new(BoxMesh::box_hex(2, 2, 0, 1).unwrap());
        let gs = GatherScatter::new(
            mesh.gather.clone(),
            mesh.shared_slots.clone(),
            mesh.shared_gids.clone(),
            Arc::new(SingleProcess),
        );
        let op = HelmholtzOperator::new(Arc::clone(&mesh), 1.0, 1.0);
        let precond = JacobiPreconditioner::from_operator(&op, &gs);

        let n = mesh.nlocal;
        let r = vec![1.0; n];
        let mut z = vec![0.0; n];
        precond.apply(1, n, &r, &mut z);

        // z must be consistent (duplicates agree) and strictly positive
        for g in 0..mesh.gather.num_groups() {
            let members = mesh.gather.group(g);
            for &dof in members {
                assert!(z[dof] > 0.0);
                assert_eq!(z[dof], z[members[0]]);
            }
        }
    }
}
