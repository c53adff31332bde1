//! Gather-scatter assembly: makes every duplicate copy of a shared DOF hold
//! the value reduced over all of its copies, local and off-partition.
//!
//! Assembly is three phases: a local segmented gather over the partition's
//! gather map, an exchange of partial group values with the partitions that
//! share a group, and a scatter broadcasting the folded value back to every
//! local duplicate. The exchange goes through the injected
//! [`Communicator`], so the same code serves the single-process and
//! distributed cases.
//!
//! The split [`GatherScatter::assemble_begin`]/[`GatherScatter::assemble_finish`]
//! pair exists for communication/computation overlap. `assemble_begin` reads
//! only the members of partition-boundary groups (nodes on interface
//! elements) and runs the cross-partition exchange; the rest of the vector
//! may still be written (interior-element operator application) until the
//! matching `assemble_finish`, which performs the full local fold and
//! scatter.

use crate::comm::Communicator;
use bakeoff_gs::{gather_vec, scatter_vec, GatherMap, ReduceOp};
use nalgebra::RealField;
use std::cell::RefCell;
use std::sync::Arc;

struct GsScratch<T> {
    // One value per (field, group); field-major blocks
    gathered: Vec<T>,
    // One value per (shared group, field); group-major for the exchange
    shared: Vec<T>,
    weighted: Vec<T>,
    in_flight: Option<InFlight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct InFlight {
    op: ReduceOp,
    nfields: usize,
    field_offset: usize,
}

pub struct GatherScatter<T> {
    map: GatherMap,
    shared_slots: Vec<usize>,
    shared_gids: Vec<u64>,
    comm: Arc<dyn Communicator<T>>,
    // Buffers reused across calls to avoid per-assembly allocation
    scratch: RefCell<GsScratch<T>>,
}

impl<T: RealField + Copy> GatherScatter<T> {
    pub fn new(
        map: GatherMap,
        shared_slots: Vec<usize>,
        shared_gids: Vec<u64>,
        comm: Arc<dyn Communicator<T>>,
    ) -> Self {
        assert_eq!(shared_slots.len(), shared_gids.len());
        Self {
            map,
            shared_slots,
            shared_gids,
            comm,
            scratch: RefCell::new(GsScratch {
                gathered: Vec::new(),
                shared: Vec::new(),
                weighted: Vec::new(),
                in_flight: None,
            }),
        }
    }

    /// Wires a mesh partition's gather map and shared-group tables to a
    /// transport.
    pub fn for_mesh(mesh: &crate::mesh::BoxMesh<T>, comm: Arc<dyn Communicator<T>>) -> Self {
        Self::new(
            mesh.gather.clone(),
            mesh.shared_slots.clone(),
            mesh.shared_gids.clone(),
            comm,
        )
    }

    /// A gather-scatter over `n` DOFs with no duplicates: every assembly is
    /// the identity. Used to wire operators without shared DOFs (e.g. dense
    /// surrogates in tests) through the same solver path.
    pub fn identity(n: usize, comm: Arc<dyn Communicator<T>>) -> Self {
        let starts = (0..=n).collect();
        let ids = (0..n).collect();
        Self::new(GatherMap::from_offsets_and_ids(starts, ids), Vec::new(), Vec::new(), comm)
    }

    #[inline]
    pub fn num_local_dofs(&self) -> usize {
        self.map.num_ids()
    }

    #[inline]
    pub fn map(&self) -> &GatherMap {
        &self.map
    }

    /// Assembles `nfields` blocked fields of `q` in place, folding duplicate
    /// copies with `op` across all partitions.
    pub fn assemble(&self, op: ReduceOp, nfields: usize, field_offset: usize, q: &mut [T]) {
        self.assemble_begin(op, nfields, field_offset, q);
        self.assemble_finish(q);
    }

    /// First half of an overlapped assembly: folds the members of every
    /// partition-boundary group and exchanges the partial values with the
    /// neighboring partitions.
    ///
    /// Only the boundary groups' member DOFs of `q` are read here; entries
    /// outside those groups may still be written by the caller until the
    /// matching [`Self::assemble_finish`].
    pub fn assemble_begin(&self, op: ReduceOp, nfields: usize, field_offset: usize, q: &[T]) {
        let nlocal = self.map.num_ids();
        assert!(field_offset >= nlocal);
        assert!(q.len() >= nfields * field_offset);

        let scratch = &mut *self.scratch.borrow_mut();
        assert!(scratch.in_flight.is_none(), "assembly already in flight");
        scratch.shared.resize(self.shared_slots.len() * nfields, T::zero());

        for (s, &slot) in self.shared_slots.iter().enumerate() {
            let group = self.map.group(slot);
            for f in 0..nfields {
                let field = &q[f * field_offset..f * field_offset + nlocal];
                let mut acc = field[group[0]];
                for &id in &group[1..] {
                    acc = op.fold(acc, field[id]);
                }
                scratch.shared[s * nfields + f] = acc;
            }
        }
        self.comm
            .exchange(op, nfields, &self.shared_gids, &mut scratch.shared);
        scratch.in_flight = Some(InFlight {
            op,
            nfields,
            field_offset,
        });
    }

    /// Second half of an overlapped assembly: full local fold, with the
    /// boundary groups overridden by the exchanged cross-partition values,
    /// then scatter back to every local duplicate.
    pub fn assemble_finish(&self, q: &mut [T]) {
        let nlocal = self.map.num_ids();
        let ngroups = self.map.num_groups();

        let scratch = &mut *self.scratch.borrow_mut();
        let InFlight {
            op,
            nfields,
            field_offset,
        } = scratch.in_flight.take().expect("no assembly in flight");

        scratch.gathered.resize(nfields * ngroups, T::zero());
        for f in 0..nfields {
            let field = &q[f * field_offset..f * field_offset + nlocal];
            let gathered = &mut scratch.gathered[f * ngroups..(f + 1) * ngroups];
            gather_vec(op, 1, &self.map, field, gathered);
        }
        // The exchanged value already folds this partition's own partial.
        for (s, &slot) in self.shared_slots.iter().enumerate() {
            for f in 0..nfields {
                scratch.gathered[f * ngroups + slot] = scratch.shared[s * nfields + f];
            }
        }

        for f in 0..nfields {
            let field = &mut q[f * field_offset..f * field_offset + nlocal];
            let gathered = &scratch.gathered[f * ngroups..(f + 1) * ngroups];
            scatter_vec(1, &self.map, gathered, field);
        }
    }

    /// Averaging assembly: sums inverse-multiplicity-weighted duplicates, so
    /// every copy ends up holding the multiplicity-weighted mean of the
    /// copies. Unlike the plain additive assembly this operation is
    /// idempotent (a projection onto consistent vectors): re-assembling an
    /// already-consistent vector reproduces it up to rounding.
    pub fn average(&self, nfields: usize, field_offset: usize, inv_degree: &[T], q: &mut [T]) {
        let nlocal = self.map.num_ids();
        assert_eq!(inv_degree.len(), nlocal);

        // Take the buffer out of the scratch cell so the nested assemble
        // call can borrow the scratch itself.
        let mut weighted = std::mem::take(&mut self.scratch.borrow_mut().weighted);
        weighted.resize(nfields * field_offset, T::zero());
        for f in 0..nfields {
            for i in 0..nlocal {
                weighted[f * field_offset + i] = q[f * field_offset + i] * inv_degree[i];
            }
        }
        self.assemble(ReduceOp::Add, nfields, field_offset, &mut weighted);
        for f in 0..nfields {
            for i in 0..nlocal {
                q[f * field_offset + i] = weighted[f * field_offset + i];
            }
        }
        self.scratch.borrow_mut().weighted = weighted;
    }

    /// Per-DOF global multiplicity: how many copies (on any partition) each
    /// local DOF's gather group has.
    pub fn multiplicity(&self) -> Vec<T> {
        let nlocal = self.map.num_ids();
        let mut counts = vec![T::one(); nlocal];
        self.assemble(ReduceOp::Add, 1, nlocal, &mut counts);
        counts
    }
}
