//! Partitioned box mesh for the bake-off benchmark.
//!
//! The benchmark domain is the cube `[-1, 1]^3` discretized with a uniform
//! grid of hexahedral spectral elements carrying degree-`N` GLL nodes.
//! Partitions are slabs of element layers along the z axis, one slab per
//! rank. Each partition stores its degrees of freedom element-by-element
//! (`dof = element * np + node`), so nodes on shared faces, edges and
//! corners are duplicated; the gather map built here groups those
//! duplicates, and the shared-group tables identify the groups that also
//! have copies on neighboring slabs.

use crate::quadrature;
use bakeoff_gs::GatherMap;
use eyre::ensure;
use log::debug;
use nalgebra::{Point3, RealField};

/// Number of packed geometric factors per node:
/// G00, G01, G02, G11, G12, G22 (symmetric metric) followed by the
/// quadrature-weighted Jacobian GWJ.
pub const NGEO: usize = 7;

/// Index of the quadrature-weighted Jacobian within a geometric-factor pack.
pub const GWJ: usize = 6;

pub struct BoxMesh<T: nalgebra::Scalar> {
    /// Polynomial degree N.
    pub degree: usize,
    /// Nodes per direction per element (N + 1).
    pub nq: usize,
    /// Nodes per element (nq^3).
    pub np: usize,
    /// Elements per axis of the global box.
    pub nel_per_dim: usize,
    /// Local element count.
    pub nelements: usize,
    /// Local DOF count (np * nelements).
    pub nlocal: usize,
    pub rank: usize,
    pub size: usize,
    /// First global element layer owned by this slab.
    pub slab_start: usize,
    /// Number of element layers owned by this slab.
    pub slab_depth: usize,

    /// Node coordinates, one per local DOF.
    pub coords: Vec<Point3<T>>,
    /// Packed geometric factors, `NGEO` per local DOF.
    pub geo: Vec<T>,
    /// 1-D differentiation matrix, row-major `nq x nq`.
    pub dmat: Vec<T>,
    pub gll_weights: Vec<T>,

    /// Groups of duplicated local DOFs, ordered by global node id.
    pub gather: GatherMap,
    /// Indices (into the gather map's groups) of groups that also have
    /// duplicates on a neighboring partition.
    pub shared_slots: Vec<usize>,
    /// Global node ids of the shared groups, aligned with `shared_slots`.
    pub shared_gids: Vec<u64>,

    /// Per-element flag: true if the element touches a partition interface.
    pub boundary_mask: Vec<bool>,
    pub num_boundary_elements: usize,
}

impl<T: RealField + Copy> BoxMesh<T> {
    /// Builds this rank's slab of the `[-1, 1]^3` box with `nel_per_dim`
    /// elements per axis at polynomial degree `degree`.
    pub fn box_hex(degree: usize, nel_per_dim: usize, rank: usize, size: usize) -> eyre::Result<Self> {
        ensure!(degree >= 1, "polynomial degree must be at least 1");
        ensure!(nel_per_dim >= 1, "the box needs at least one element per axis");
        ensure!(rank < size, "rank {} out of range for {} partitions", rank, size);
        ensure!(
            size <= nel_per_dim,
            "cannot split {} element layers across {} partitions",
            nel_per_dim,
            size
        );

        let nq = degree + 1;
        let np = nq * nq * nq;

        // Slab decomposition of the z element layers
        let base = nel_per_dim / size;
        let remainder = nel_per_dim % size;
        let slab_depth = base + usize::from(rank < remainder);
        let slab_start = rank * base + rank.min(remainder);

        let nelements = nel_per_dim * nel_per_dim * slab_depth;
        let nlocal = np * nelements;

        let (weights_f64, points_f64) = quadrature::gauss_lobatto(nq);
        let dmat_f64 = quadrature::derivative_matrix(&points_f64);
        let from = |v: f64| -> T { nalgebra::convert(v) };
        let gll_weights: Vec<T> = weights_f64.iter().copied().map(from).collect();
        let dmat: Vec<T> = dmat_f64.iter().copied().map(from).collect();

        let h = 2.0 / nel_per_dim as f64;
        // Metric of the affine map onto [-1, 1]^3: diagonal for an
        // axis-aligned box, each entry h/2 times the nodal quadrature
        // weight; the weighted Jacobian is (h/2)^3 times the weight.
        let g_diag = h / 2.0;
        let wj = g_diag * g_diag * g_diag;

        let mut coords = Vec::with_capacity(nlocal);
        let mut geo = vec![T::zero(); nlocal * NGEO];
        let mut gids = Vec::with_capacity(nlocal);

        let nodes_per_dim = (nel_per_dim * degree + 1) as u64;
        let mut dof = 0;
        for ez in 0..slab_depth {
            let gez = slab_start + ez;
            for ey in 0..nel_per_dim {
                for ex in 0..nel_per_dim {
                    for k in 0..nq {
                        for j in 0..nq {
                            for i in 0..nq {
                                let x = -1.0 + h * (ex as f64 + 0.5 * (points_f64[i] + 1.0));
                                let y = -1.0 + h * (ey as f64 + 0.5 * (points_f64[j] + 1.0));
                                let z = -1.0 + h * (gez as f64 + 0.5 * (points_f64[k] + 1.0));
                                coords.push(Point3::new(from(x), from(y), from(z)));

                                let w = weights_f64[i] * weights_f64[j] * weights_f64[k];
                                let g = &mut geo[dof * NGEO..(dof + 1) * NGEO];
                                g[0] = from(g_diag * w);
                                g[3] = from(g_diag * w);
                                g[5] = from(g_diag * w);
                                g[GWJ] = from(wj * w);

                                let gx = (ex * degree + i) as u64;
                                let gy = (ey * degree + j) as u64;
                                let gz = (gez * degree + k) as u64;
                                gids.push((gz * nodes_per_dim + gy) * nodes_per_dim + gx);
                                dof += 1;
                            }
                        }
                    }
                }
            }
        }

        let (gather, group_gids) = GatherMap::from_keys(&gids);

        // Groups whose global node lies on a slab interface plane are
        // duplicated on the neighboring rank as well.
        let lower_plane = (slab_start * degree) as u64;
        let upper_plane = ((slab_start + slab_depth) * degree) as u64;
        let mut shared_slots = Vec::new();
        let mut shared_gids = Vec::new();
        for (slot, &gid) in group_gids.iter().enumerate() {
            let gz = gid / (nodes_per_dim * nodes_per_dim);
            let on_lower = rank > 0 && gz == lower_plane;
            let on_upper = rank + 1 < size && gz == upper_plane;
            if on_lower || on_upper {
                shared_slots.push(slot);
                shared_gids.push(gid);
            }
        }

        let mut boundary_mask = vec![false; nelements];
        for ez in 0..slab_depth {
            let touches_lower = rank > 0 && ez == 0;
            let touches_upper = rank + 1 < size && ez + 1 == slab_depth;
            if touches_lower || touches_upper {
                let layer = ez * nel_per_dim * nel_per_dim;
                for e in layer..layer + nel_per_dim * nel_per_dim {
                    boundary_mask[e] = true;
                }
            }
        }
        let num_boundary_elements = boundary_mask.iter().filter(|&&b| b).count();

        debug!(
            "rank {}/{}: slab layers {}..{}, {} elements ({} on interfaces), {} local DOFs, {} gather groups ({} shared)",
            rank,
            size,
            slab_start,
            slab_start + slab_depth,
            nelements,
            num_boundary_elements,
            nlocal,
            gather.num_groups(),
            shared_slots.len()
        );

        Ok(Self {
            degree,
            nq,
            np,
            nel_per_dim,
            nelements,
            nlocal,
            rank,
            size,
            slab_start,
            slab_depth,
            coords,
            geo,
            dmat,
            gll_weights,
            gather,
            shared_slots,
            shared_gids,
            boundary_mask,
            num_boundary_elements,
        })
    }

    /// The packed geometric factors of one local DOF.
    #[inline]
    pub fn geo_at(&self, dof: usize) -> &[T] {
        &self.geo[dof * NGEO..(dof + 1) * NGEO]
    }

    /// Number of distinct global nodes across all partitions.
    pub fn global_node_count(&self) -> u64 {
        let n = (self.nel_per_dim * self.degree + 1) as u64;
        n * n * n
    }

    /// Unassembled right-hand side `r = M f` for the manufactured solution,
    /// with `f = (3 pi^2 lambda0 + lambda1) cos(pi x) cos(pi y) cos(pi z)`.
    /// Duplicated DOFs carry partial mass contributions; assembling with add
    /// yields the consistent RHS.
    pub fn manufactured_rhs(&self, lambda0: T, lambda1: T) -> Vec<T> {
        let pi = T::pi();
        let three: T = nalgebra::convert(3.0);
        let coeff = three * pi * pi * lambda0 + lambda1;
        (0..self.nlocal)
            .map(|dof| coeff * exact_solution(&self.coords[dof]) * self.geo_at(dof)[GWJ])
            .collect()
    }
}

/// The manufactured solution of the benchmark problem (first cosine mode).
pub fn exact_solution<T: RealField + Copy>(p: &Point3<T>) -> T {
    let pi = T::pi();
    (pi * p.x).cos() * (pi * p.y).cos() * (pi * p.z).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_rank_groups_cover_global_nodes() {
        let mesh = BoxMesh::<f64>::box_hex(2, 3, 0, 1).unwrap();
        let nodes_per_dim = 3 * 2 + 1;
        assert_eq!(mesh.gather.num_groups() as u64, mesh.global_node_count());
        assert_eq!(mesh.global_node_count(), (nodes_per_dim as u64).pow(3));
        assert_eq!(mesh.gather.num_ids(), mesh.nlocal);
        assert!(mesh.shared_slots.is_empty());
        assert_eq!(mesh.num_boundary_elements, 0);
    }

    #[test]
    fn interior_vertex_has_eight_duplicates() {
        let mesh = BoxMesh::<f64>::box_hex(2, 2, 0, 1).unwrap();
        let max_degree = (0..mesh.gather.num_groups())
            .map(|g| mesh.gather.group(g).len())
            .max()
            .unwrap();
        assert_eq!(max_degree, 8);
    }

    #[test]
    fn duplicates_share_coordinates() {
        let mesh = BoxMesh::<f64>::box_hex(3, 2, 0, 1).unwrap();
        for g in 0..mesh.gather.num_groups() {
            let members = mesh.gather.group(g);
            let first = mesh.coords[members[0]];
            for &dof in members {
                assert!((mesh.coords[dof] - first).norm() < 1e-12);
            }
        }
    }

    #[test]
    fn two_rank_slabs_tile_the_box_and_agree_on_shared_nodes() {
        let lower = BoxMesh::<f64>::box_hex(2, 4, 0, 2).unwrap();
        let upper = BoxMesh::<f64>::box_hex(2, 4, 1, 2).unwrap();

        assert_eq!(lower.slab_depth + upper.slab_depth, 4);
        assert_eq!(upper.slab_start, lower.slab_depth);

        // Both sides list exactly the interface plane, with identical ids
        assert_eq!(lower.shared_gids, upper.shared_gids);
        let plane = (4 * 2 + 1) * (4 * 2 + 1);
        assert_eq!(lower.shared_gids.len(), plane);

        // Only the element layers at the interface are boundary elements
        assert_eq!(lower.num_boundary_elements, 16);
        assert_eq!(upper.num_boundary_elements, 16);
    }

    #[test]
    fn poisson_rhs_has_zero_global_mean() {
        // With lambda1 = 0 the manufactured forcing integrates to zero over
        // the box, and the quadrature reproduces that exactly up to rounding.
        let mesh = BoxMesh::<f64>::box_hex(5, 2, 0, 1).unwrap();
        let rhs = mesh.manufactured_rhs(1.0, 0.0);
        let total: f64 = rhs.iter().sum();
        assert!(total.abs() < 1e-10);
    }

    #[test]
    fn weighted_jacobians_sum_to_box_volume() {
        let mesh = BoxMesh::<f64>::box_hex(4, 2, 0, 1).unwrap();
        let volume: f64 = (0..mesh.nlocal).map(|dof| mesh.geo_at(dof)[GWJ]).sum();
        assert!((volume - 8.0).abs() < 1e-12);
    }
}
