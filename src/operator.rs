//! Matrix-free application of the discretized Helmholtz operator
//! `w = lambda0 * K u + lambda1 * M u`.
//!
//! The apply is the local, per-element tensor-product action on GLL nodes:
//! differentiate along each reference direction with the 1-D spectral
//! differentiation matrix, contract with the packed geometric factors, and
//! apply the transposed differentiation. The result is inconsistent across
//! duplicated DOFs and must be passed through gather-scatter assembly (add)
//! before it is used as the true operator output.
//!
//! Elements are processed in parallel with rayon; every worker thread keeps
//! its own derivative scratch buffers in a [`ThreadLocal`].

use crate::mesh::{BoxMesh, GWJ};
use nalgebra::RealField;
use rayon::prelude::*;
use std::cell::RefCell;
use std::sync::Arc;
use thread_local::ThreadLocal;

/// The local (unassembled) action of an elliptic operator on blocked
/// multi-field vectors.
///
/// The boundary/interior split supports communication overlap: applying on
/// the boundary elements and then on the interior elements writes every
/// entry exactly once, producing the same result as one full [`apply`].
/// Operators without a partition interface may keep the defaults, which
/// fold everything into the boundary phase so the overlapped schedule stays
/// correct.
///
/// [`apply`]: EllipticOperator::apply
pub trait EllipticOperator<T>: Send + Sync {
    /// Number of local DOFs per field.
    fn num_local_dofs(&self) -> usize;

    /// `w = A u` on every local element, per field block.
    fn apply(&self, nfields: usize, field_offset: usize, u: &[T], w: &mut [T]);

    /// `w = A u` restricted to the partition-interface elements.
    fn apply_boundary(&self, nfields: usize, field_offset: usize, u: &[T], w: &mut [T]) {
        self.apply(nfields, field_offset, u, w);
    }

    /// `w = A u` restricted to the elements away from partition interfaces.
    fn apply_interior(&self, _nfields: usize, _field_offset: usize, _u: &[T], _w: &mut [T]) {}

    /// The unassembled operator diagonal of one field, for Jacobi-type
    /// preconditioning. Duplicated DOFs carry partial values; assembling
    /// with add yields the true global diagonal.
    fn diagonal(&self) -> Vec<T>;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ElementSet {
    All,
    Boundary,
    Interior,
}

impl ElementSet {
    #[inline]
    fn selects(self, on_boundary: bool) -> bool {
        match self {
            ElementSet::All => true,
            ElementSet::Boundary => on_boundary,
            ElementSet::Interior => !on_boundary,
        }
    }
}

struct AxScratch<T> {
    ur: Vec<T>,
    us: Vec<T>,
    ut: Vec<T>,
}

impl<T> Default for AxScratch<T> {
    fn default() -> Self {
        Self {
            ur: Vec::new(),
            us: Vec::new(),
            ut: Vec::new(),
        }
    }
}

pub struct HelmholtzOperator<T: nalgebra::Scalar + Send> {
    mesh: Arc<BoxMesh<T>>,
    lambda0: T,
    lambda1: T,
    scratch: ThreadLocal<RefCell<AxScratch<T>>>,
}

impl<T: RealField + Copy> HelmholtzOperator<T> {
    pub fn new(mesh: Arc<BoxMesh<T>>, lambda0: T, lambda1: T) -> Self {
        Self {
            mesh,
            lambda0,
            lambda1,
            scratch: ThreadLocal::new(),
        }
    }

    /// One element's tensor-product apply: `u` and `w` are the element's
    /// `np` nodal values.
    fn apply_element(&self, e: usize, u: &[T], w: &mut [T], scratch: &mut AxScratch<T>) {
        let nq = self.mesh.nq;
        let np = self.mesh.np;
        let dmat = &self.mesh.dmat;
        let AxScratch { ur, us, ut } = scratch;
        ur.resize(np, T::zero());
        us.resize(np, T::zero());
        ut.resize(np, T::zero());

        // Reference-space gradient
        for k in 0..nq {
            for j in 0..nq {
                for i in 0..nq {
                    let n = (k * nq + j) * nq + i;
                    let mut dr = T::zero();
                    let mut ds = T::zero();
                    let mut dt = T::zero();
                    for m in 0..nq {
                        dr += dmat[i * nq + m] * u[(k * nq + j) * nq + m];
                        ds += dmat[j * nq + m] * u[(k * nq + m) * nq + i];
                        dt += dmat[k * nq + m] * u[(m * nq + j) * nq + i];
                    }
                    ur[n] = dr;
                    us[n] = ds;
                    ut[n] = dt;
                }
            }
        }

        // Metric contraction, in place
        for n in 0..np {
            let g = self.mesh.geo_at(e * np + n);
            let (dr, ds, dt) = (ur[n], us[n], ut[n]);
            ur[n] = g[0] * dr + g[1] * ds + g[2] * dt;
            us[n] = g[1] * dr + g[3] * ds + g[4] * dt;
            ut[n] = g[2] * dr + g[4] * ds + g[5] * dt;
        }

        // Transposed differentiation plus the mass term
        for k in 0..nq {
            for j in 0..nq {
                for i in 0..nq {
                    let n = (k * nq + j) * nq + i;
                    let mut a = T::zero();
                    for m in 0..nq {
                        a += dmat[m * nq + i] * ur[(k * nq + j) * nq + m]
                            + dmat[m * nq + j] * us[(k * nq + m) * nq + i]
                            + dmat[m * nq + k] * ut[(m * nq + j) * nq + i];
                    }
                    let gwj = self.mesh.geo_at(e * np + n)[GWJ];
                    w[n] = self.lambda0 * a + self.lambda1 * gwj * u[n];
                }
            }
        }
    }
}

impl<T: RealField + Copy + Send + Sync> HelmholtzOperator<T> {
    fn apply_set(&self, set: ElementSet, nfields: usize, field_offset: usize, u: &[T], w: &mut [T]) {
        let np = self.mesh.np;
        let nlocal = self.mesh.nlocal;
        assert!(field_offset >= nlocal);

        for f in 0..nfields {
            let uf = &u[f * field_offset..f * field_offset + nlocal];
            let wf = &mut w[f * field_offset..f * field_offset + nlocal];
            wf.par_chunks_mut(np).enumerate().for_each(|(e, we)| {
                if set.selects(self.mesh.boundary_mask[e]) {
                    let scratch = self.scratch.get_or_default();
                    self.apply_element(e, &uf[e * np..(e + 1) * np], we, &mut scratch.borrow_mut());
                }
            });
        }
    }
}

impl<T: RealField + Copy + Send + Sync> EllipticOperator<T> for HelmholtzOperator<T> {
    fn num_local_dofs(&self) -> usize {
        self.mesh.nlocal
    }

    fn apply(&self, nfields: usize, field_offset: usize, u: &[T], w: &mut [T]) {
        self.apply_set(ElementSet::All, nfields, field_offset, u, w);
    }

    fn apply_boundary(&self, nfields: usize, field_offset: usize, u: &[T], w: &mut [T]) {
        self.apply_set(ElementSet::Boundary, nfields, field_offset, u, w);
    }

    fn apply_interior(&self, nfields: usize, field_offset: usize, u: &[T], w: &mut [T]) {
        self.apply_set(ElementSet::Interior, nfields, field_offset, u, w);
    }

    fn diagonal(&self) -> Vec<T> {
        let mesh = &self.mesh;
        let nq = mesh.nq;
        let np = mesh.np;
        let dmat = &mesh.dmat;
        let mut diag = vec![T::zero(); mesh.nlocal];

        for e in 0..mesh.nelements {
            for k in 0..nq {
                for j in 0..nq {
                    for i in 0..nq {
                        let n = (k * nq + j) * nq + i;
                        let dof = e * np + n;
                        let g = mesh.geo_at(dof);

                        let mut a = T::zero();
                        for m in 0..nq {
                            let g00 = mesh.geo_at(e * np + (k * nq + j) * nq + m)[0];
                            let g11 = mesh.geo_at(e * np + (k * nq + m) * nq + i)[3];
                            let g22 = mesh.geo_at(e * np + (m * nq + j) * nq + i)[5];
                            let dmi = dmat[m * nq + i];
                            let dmj = dmat[m * nq + j];
                            let dmk = dmat[m * nq + k];
                            a += dmi * dmi * g00 + dmj * dmj * g11 + dmk * dmk * g22;
                        }
                        // Off-diagonal metric couplings hit the diagonal
                        // only through the nodal derivative entries
                        let dii = dmat[i * nq + i];
                        let djj = dmat[j * nq + j];
                        let dkk = dmat[k * nq + k];
                        let two: T = nalgebra::convert(2.0);
                        a += two * (g[1] * dii * djj + g[2] * dii * dkk + g[4] * djj * dkk);

                        diag[dof] = self.lambda0 * a + self.lambda1 * g[GWJ];
                    }
                }
            }
        }
        diag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixcompare::assert_scalar_eq;

    fn operator(degree: usize, nel: usize, lambda0: f64, lambda1: f64) -> HelmholtzOperator<f64> {
        let mesh = Arc::new(BoxMesh::box_hex(degree, nel, 0, 1).unwrap());
        HelmholtzOperator::new(mesh, lambda0, lambda1)
    }

    #[test]
    fn stiffness_annihilates_constants() {
        let op = operator(4, 2, 1.0, 0.0);
        let n = op.num_local_dofs();
        let u = vec![1.0; n];
        let mut w = vec![f64::NAN; n];
        op.apply(1, n, &u, &mut w);
        for &v in &w {
            assert_scalar_eq!(v, 0.0, comp = abs, tol = 1e-12);
        }
    }

    #[test]
    fn mass_term_scales_by_weighted_jacobian() {
        let op = operator(3, 2, 0.0, 1.0);
        let n = op.num_local_dofs();
        let u = vec![1.0; n];
        let mut w = vec![0.0; n];
        op.apply(1, n, &u, &mut w);
        for (dof, &v) in w.iter().enumerate() {
            assert_scalar_eq!(v, op.mesh.geo_at(dof)[GWJ], comp = abs, tol = 1e-14);
        }
    }

    #[test]
    fn energy_of_linear_field_equals_box_volume() {
        // For u = x the bilinear form sums |grad u|^2 = 1 over [-1, 1]^3,
        // and the quadrature is exact for it, so <u, K u> = 8 even before
        // assembly (the unassembled form sums element integrals).
        let op = operator(3, 2, 1.0, 0.0);
        let n = op.num_local_dofs();
        let u: Vec<f64> = op.mesh.coords.iter().map(|p| p.x).collect();
        let mut w = vec![0.0; n];
        op.apply(1, n, &u, &mut w);
        let energy: f64 = u.iter().zip(&w).map(|(a, b)| a * b).sum();
        assert_scalar_eq!(energy, 8.0, comp = abs, tol = 1e-12);
    }

    #[test]
    fn apply_is_symmetric() {
        let op = operator(2, 2, 1.0, 0.7);
        let n = op.num_local_dofs();
        let u: Vec<f64> = (0..n).map(|i| ((i * 7 + 3) % 13) as f64 - 6.0).collect();
        let v: Vec<f64> = (0..n).map(|i| ((i * 5 + 1) % 11) as f64 - 5.0).collect();
        let mut au = vec![0.0; n];
        let mut av = vec![0.0; n];
        op.apply(1, n, &u, &mut au);
        op.apply(1, n, &v, &mut av);
        let vau: f64 = v.iter().zip(&au).map(|(a, b)| a * b).sum();
        let uav: f64 = u.iter().zip(&av).map(|(a, b)| a * b).sum();
        assert_scalar_eq!(vau, uav, comp = abs, tol = 1e-9 * vau.abs().max(1.0));
    }

    #[test]
    fn diagonal_matches_unit_vector_applies() {
        let op = operator(2, 1, 1.0, 0.5);
        let n = op.num_local_dofs();
        let diag = op.diagonal();
        let mut u = vec![0.0; n];
        let mut w = vec![0.0; n];
        for dof in 0..n {
            u[dof] = 1.0;
            op.apply(1, n, &u, &mut w);
            assert_scalar_eq!(diag[dof], w[dof], comp = abs, tol = 1e-12);
            u[dof] = 0.0;
        }
    }

    #[test]
    fn boundary_plus_interior_covers_every_element_once() {
        let mesh = Arc::new(BoxMesh::box_hex(2, 4, 0, 2).unwrap());
        assert!(mesh.num_boundary_elements > 0);
        assert!(mesh.num_boundary_elements < mesh.nelements);
        let op = HelmholtzOperator::new(mesh, 1.0, 1.0);
        let n = op.num_local_dofs();
        let u: Vec<f64> = (0..n).map(|i| ((i * 3 + 2) % 17) as f64).collect();

        let mut fused = vec![0.0; n];
        op.apply(1, n, &u, &mut fused);

        let mut split = vec![f64::NAN; n];
        op.apply_boundary(1, n, &u, &mut split);
        op.apply_interior(1, n, &u, &mut split);
        assert_eq!(split, fused);
    }

    #[test]
    fn multi_field_apply_treats_fields_independently() {
        let op = operator(2, 2, 1.0, 1.0);
        let n = op.num_local_dofs();
        let offset = n + 8;
        let base: Vec<f64> = (0..n).map(|i| ((i * 11 + 5) % 19) as f64 - 9.0).collect();

        let mut single = vec![0.0; n];
        op.apply(1, n, &base, &mut single);

        let mut u = vec![0.0; 2 * offset];
        u[..n].copy_from_slice(&base);
        u[offset..offset + n].copy_from_slice(&base);
        let mut w = vec![0.0; 2 * offset];
        op.apply(2, offset, &u, &mut w);
        assert_eq!(&w[..n], single.as_slice());
        assert_eq!(&w[offset..offset + n], single.as_slice());
    }
}
