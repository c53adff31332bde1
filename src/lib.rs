//! Distributed-memory spectral-element bake-off (BP) benchmark solver.
//!
//! The crate applies a matrix-free Helmholtz operator over mesh partitions
//! whose degrees of freedom are duplicated at element and partition
//! boundaries, assembles the duplicates through a segmented gather-scatter,
//! and drives a preconditioned conjugate-gradient iteration with optional
//! communication/computation overlap. Cross-partition transport is an
//! injected capability, so the same solver runs single-process, over the
//! in-process [`comm::LocalCluster`], or (in principle) over a real
//! message-passing backend.

pub mod assembly;
pub mod comm;
pub mod config;
pub mod context;
pub mod mesh;
pub mod nullspace;
pub mod operator;
pub mod precond;
pub mod quadrature;
pub mod report;
pub mod solver;
pub mod timing;

pub mod gs {
    pub use bakeoff_gs::*;
}

pub extern crate nalgebra;
