//! Cross-partition communication abstraction.
//!
//! The solver core only needs two collective primitives: a scalar
//! all-reduce (dot products, error norms, means) and an exchange that folds
//! partial gather-group values across the partitions sharing a global group
//! id. Both are injected behind [`Communicator`] so the core can run
//! single-process, over an in-process cluster of threads, or over a real
//! transport, without changing the numerics.
//!
//! Every partition participating in a solve must invoke the collectives in
//! the same order; there is no cancellation and no timeout.

use bakeoff_gs::ReduceOp;
use nalgebra::RealField;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Barrier};

pub trait Communicator<T>: Send + Sync {
    /// This partition's index.
    fn rank(&self) -> usize;

    /// Total number of partitions.
    fn size(&self) -> usize;

    fn barrier(&self);

    /// Reduces a scalar across all partitions; every partition receives the
    /// same result. Contributions are folded in rank order, so the result is
    /// deterministic for a fixed partitioning.
    fn all_reduce(&self, op: ReduceOp, value: T) -> T;

    /// Folds partial gather-group values across all partitions that share a
    /// global group id.
    ///
    /// `partials` holds `nentries` components per shared group, in the order
    /// of `global_ids`; on return each slot holds the value folded over every
    /// partition's contribution (rank order, same as `all_reduce`). Groups
    /// whose id appears on a single partition pass through unchanged.
    fn exchange(&self, op: ReduceOp, nentries: usize, global_ids: &[u64], partials: &mut [T]);
}

/// Degenerate single-partition communicator: every collective is a no-op
/// pass-through.
#[derive(Debug, Default)]
pub struct SingleProcess;

impl<T: RealField + Copy> Communicator<T> for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn all_reduce(&self, _op: ReduceOp, value: T) -> T {
        value
    }

    fn exchange(&self, _op: ReduceOp, _nentries: usize, _global_ids: &[u64], _partials: &mut [T]) {
        // No neighboring partitions, nothing to fold.
    }
}

struct ClusterState<T> {
    size: usize,
    barrier: Barrier,
    scalars: Mutex<Vec<Option<T>>>,
    // global group id -> contributions tagged with the contributing rank
    table: Mutex<FxHashMap<u64, Vec<(usize, Vec<T>)>>>,
}

/// In-process cluster of partitions, one thread per rank.
///
/// Collectives rendezvous on a [`Barrier`]; contributions are folded in rank
/// order on every rank, so all ranks observe bit-identical results. This is
/// the "fake transport" used by the multi-partition harness path and by the
/// integration tests; it simulates distributed assembly without MPI.
pub struct LocalCluster<T> {
    rank: usize,
    state: Arc<ClusterState<T>>,
}

impl<T: RealField + Copy> LocalCluster<T> {
    /// Creates one connected communicator per rank.
    pub fn group(size: usize) -> Vec<Self> {
        assert!(size > 0, "cluster must have at least one rank");
        let state = Arc::new(ClusterState {
            size,
            barrier: Barrier::new(size),
            scalars: Mutex::new(vec![None; size]),
            table: Mutex::new(FxHashMap::default()),
        });
        (0..size)
            .map(|rank| Self {
                rank,
                state: Arc::clone(&state),
            })
            .collect()
    }
}

impl<T: RealField + Copy + Send + Sync> Communicator<T> for LocalCluster<T> {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.state.size
    }

    fn barrier(&self) {
        self.state.barrier.wait();
    }

    fn all_reduce(&self, op: ReduceOp, value: T) -> T {
        self.state.scalars.lock()[self.rank] = Some(value);
        self.state.barrier.wait();

        let result = {
            let slots = self.state.scalars.lock();
            let mut acc = slots[0].expect("every rank must contribute");
            for slot in &slots[1..] {
                acc = op.fold(acc, slot.expect("every rank must contribute"));
            }
            acc
        };

        // All ranks have read before any slot is reused
        self.state.barrier.wait();
        if self.rank == 0 {
            self.state.scalars.lock().fill(None);
        }
        self.state.barrier.wait();
        result
    }

    fn exchange(&self, op: ReduceOp, nentries: usize, global_ids: &[u64], partials: &mut [T]) {
        assert_eq!(partials.len(), global_ids.len() * nentries);

        {
            let mut table = self.state.table.lock();
            for (s, &gid) in global_ids.iter().enumerate() {
                let values = partials[s * nentries..(s + 1) * nentries].to_vec();
                table.entry(gid).or_default().push((self.rank, values));
            }
        }
        self.state.barrier.wait();

        {
            let mut table = self.state.table.lock();
            // Rank-ordered fold per id; sorting here (under the lock) keeps
            // the fold order independent of thread scheduling.
            for contributions in table.values_mut() {
                contributions.sort_unstable_by_key(|&(rank, _)| rank);
            }
            for (s, &gid) in global_ids.iter().enumerate() {
                let contributions = &table[&gid];
                for k in 0..nentries {
                    let mut acc = contributions[0].1[k];
                    for (_, values) in &contributions[1..] {
                        acc = op.fold(acc, values[k]);
                    }
                    partials[s * nentries + k] = acc;
                }
            }
        }

        self.state.barrier.wait();
        if self.rank == 0 {
            self.state.table.lock().clear();
        }
        self.state.barrier.wait();
    }
}

/// Runs `f` once per rank on its own thread, returning the per-rank results
/// in rank order.
pub fn run_on_local_cluster<T, R, F>(size: usize, f: F) -> Vec<R>
where
    T: RealField + Copy + Send + Sync,
    R: Send,
    F: Fn(LocalCluster<T>) -> R + Sync,
{
    let comms = LocalCluster::group(size);
    let f = &f;
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| scope.spawn(move || f(comm)))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("cluster rank panicked"))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_all_reduce_passes_through() {
        let comm = SingleProcess;
        assert_eq!(Communicator::<f64>::all_reduce(&comm, ReduceOp::Add, 42.0), 42.0);
        assert_eq!(Communicator::<f64>::all_reduce(&comm, ReduceOp::Max, -1.5), -1.5);
    }

    #[test]
    fn cluster_all_reduce_sums_every_rank() {
        let sums = run_on_local_cluster::<f64, _, _>(4, |comm| {
            comm.all_reduce(ReduceOp::Add, (comm.rank() + 1) as f64)
        });
        assert_eq!(sums, vec![10.0; 4]);
    }

    #[test]
    fn cluster_all_reduce_max() {
        let maxs = run_on_local_cluster::<f64, _, _>(3, |comm| {
            comm.all_reduce(ReduceOp::Max, comm.rank() as f64)
        });
        assert_eq!(maxs, vec![2.0; 3]);
    }

    #[test]
    fn cluster_exchange_folds_shared_ids_only() {
        // Ranks 0 and 1 share id 7; id 100 + rank is private to each rank.
        let results = run_on_local_cluster::<f64, _, _>(2, |comm| {
            let gids = [7u64, 100 + comm.rank() as u64];
            let mut partials = [(comm.rank() + 1) as f64, 0.5];
            comm.exchange(ReduceOp::Add, 1, &gids, &mut partials);
            partials
        });
        assert_eq!(results[0], [3.0, 0.5]);
        assert_eq!(results[1], [3.0, 0.5]);
    }

    #[test]
    fn cluster_exchange_repeated_calls_reuse_table() {
        let results = run_on_local_cluster::<f64, _, _>(2, |comm| {
            let gids = [1u64];
            let mut a = [comm.rank() as f64];
            comm.exchange(ReduceOp::Add, 1, &gids, &mut a);
            let mut b = [1.0 + comm.rank() as f64];
            comm.exchange(ReduceOp::Add, 1, &gids, &mut b);
            (a[0], b[0])
        });
        assert_eq!(results, vec![(1.0, 3.0); 2]);
    }
}
