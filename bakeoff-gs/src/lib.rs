//! Segmented reductions over groups of duplicated degree-of-freedom indices.
//!
//! Continuous high-order discretizations duplicate nodes at element and
//! partition boundaries. This crate provides the pure reduction kernel that
//! folds every group of duplicates down to a single value (*gather*) and
//! broadcasts an assembled value back to all duplicates (*scatter*).
//!
//! The group structure is a CSR-style arena ([`GatherMap`]): a monotonic
//! offset array into a flat array of member indices. Reduction order within a
//! group follows the member order of the map exactly (a plain left fold, not
//! a tree reduction), so results are bit-reproducible for a fixed map.

use num::{One, Zero};
use std::ops::Mul;

/// The reduction applied within a gather group.
///
/// Selected at call time rather than baked into the map, since the same map
/// is used with different operators (sum for operator assembly, min/max for
/// flag propagation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Add,
    Mul,
    Min,
    Max,
}

impl ReduceOp {
    /// Folds one value into an accumulator.
    ///
    /// Min/max use strict comparisons, so on ties the earlier-encountered
    /// value is kept. This makes the result a deterministic function of the
    /// fold order, not just of the multiset of values. Callers must ensure
    /// no NaNs are present.
    #[inline]
    pub fn fold<T>(self, acc: T, value: T) -> T
    where
        T: Copy + PartialOrd + Mul<Output = T> + Zero + One,
    {
        match self {
            ReduceOp::Add => acc + value,
            ReduceOp::Mul => acc * value,
            ReduceOp::Min => {
                if value < acc {
                    value
                } else {
                    acc
                }
            }
            ReduceOp::Max => {
                if value > acc {
                    value
                } else {
                    acc
                }
            }
        }
    }

    /// The identity element, where one exists.
    ///
    /// Min and max have no identity for an unbounded scalar type; folds for
    /// those operators must be seeded from the group's first member instead
    /// (groups are guaranteed non-empty).
    #[inline]
    pub fn identity<T: Zero + One>(self) -> Option<T> {
        match self {
            ReduceOp::Add => Some(T::zero()),
            ReduceOp::Mul => Some(T::one()),
            ReduceOp::Min | ReduceOp::Max => None,
        }
    }
}

/// An ordered partition of local DOF indices into groups of duplicates.
///
/// Stored as two owned contiguous arrays (offsets + concatenated member
/// indices) rather than per-group allocations. The map is immutable once
/// built and safe to share across repeated gather/scatter calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherMap {
    starts: Vec<usize>,
    ids: Vec<usize>,
}

impl GatherMap {
    /// Builds a map from CSR offsets and concatenated member indices.
    ///
    /// # Panics
    ///
    /// Panics if the offsets are not monotonic, do not span `ids`, or if any
    /// group is empty. A malformed map is a programming-contract violation
    /// upstream (mesh/partition construction), not a runtime error.
    pub fn from_offsets_and_ids(starts: Vec<usize>, ids: Vec<usize>) -> Self {
        assert!(!starts.is_empty(), "offset array must contain at least one entry");
        assert_eq!(starts[0], 0, "first offset must be zero");
        assert_eq!(
            *starts.last().unwrap(),
            ids.len(),
            "last offset must equal the number of member indices"
        );
        for g in 0..starts.len() - 1 {
            assert!(starts[g] < starts[g + 1], "group {} is empty or offsets are non-monotonic", g);
        }
        Self { starts, ids }
    }

    /// Groups the indices `0..keys.len()` by key, one group per distinct key.
    ///
    /// Groups are ordered by ascending key; within a group, members keep
    /// ascending index order. Returns the map together with the distinct
    /// keys, in group order.
    pub fn from_keys(keys: &[u64]) -> (Self, Vec<u64>) {
        let mut order: Vec<usize> = (0..keys.len()).collect();
        order.sort_by_key(|&i| (keys[i], i));

        let mut starts = Vec::new();
        let mut group_keys = Vec::new();
        starts.push(0);
        for (pos, &i) in order.iter().enumerate() {
            if group_keys.last() != Some(&keys[i]) {
                if pos > 0 {
                    starts.push(pos);
                }
                group_keys.push(keys[i]);
            }
        }
        starts.push(order.len());
        if keys.is_empty() {
            // Degenerate map with zero groups
            starts.truncate(1);
        }

        (Self { starts, ids: order }, group_keys)
    }

    #[inline]
    pub fn num_groups(&self) -> usize {
        self.starts.len() - 1
    }

    /// Total number of member indices across all groups.
    #[inline]
    pub fn num_ids(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn group(&self, g: usize) -> &[usize] {
        &self.ids[self.starts[g]..self.starts[g + 1]]
    }

    #[inline]
    pub fn offsets(&self) -> &[usize] {
        &self.starts
    }

    #[inline]
    pub fn ids(&self) -> &[usize] {
        &self.ids
    }
}

/// Segmented gather: reduce every group of `map` into one value per group
/// and component.
///
/// The input is addressed as `q[id * nentries + k]` for component `k`; the
/// output is densely packed as `gatherq[g * nentries + k]`, independent of
/// how sparse the member indices are. This is the seam between the local
/// address space (by DOF id) and the gathered address space (by group).
///
/// Pure: never mutates `q` or the map, writes only `gatherq`.
pub fn gather_vec<T>(op: ReduceOp, nentries: usize, map: &GatherMap, q: &[T], gatherq: &mut [T])
where
    T: Copy + PartialOrd + Mul<Output = T> + Zero + One,
{
    assert_eq!(
        gatherq.len(),
        map.num_groups() * nentries,
        "output must hold one value per group and component"
    );

    for g in 0..map.num_groups() {
        let members = map.group(g);
        for k in 0..nentries {
            let mut acc = match op.identity::<T>() {
                Some(id) => op.fold(id, q[members[0] * nentries + k]),
                // Non-empty group: seed min/max from the first member
                None => q[members[0] * nentries + k],
            };
            for &id in &members[1..] {
                acc = op.fold(acc, q[id * nentries + k]);
            }
            gatherq[g * nentries + k] = acc;
        }
    }
}

/// Segmented scatter: broadcast each group value back to all of the group's
/// member indices.
pub fn scatter_vec<T: Copy>(nentries: usize, map: &GatherMap, gatherq: &[T], q: &mut [T]) {
    assert_eq!(
        gatherq.len(),
        map.num_groups() * nentries,
        "input must hold one value per group and component"
    );

    for g in 0..map.num_groups() {
        for &id in map.group(g) {
            for k in 0..nentries {
                q[id * nentries + k] = gatherq[g * nentries + k];
            }
        }
    }
}
