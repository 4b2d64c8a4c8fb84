//! Two-dimensional relativistic electromagnetic particle-in-cell simulation.
//!
//! The simulation domain is a horizontal stack of [`region::Region`] slabs,
//! each owning staggered electromagnetic fields, a current accumulator and
//! the macro-particles living inside the slab. A time step runs as a small
//! pipeline of data-parallel kernels (field solve, particle push + current
//! deposition, boundary transfer, bucket sort) sequenced by the
//! [`schedule`] task graph across a CPU worker pool and emulated
//! accelerator queues.
#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;

pub mod errors;
pub mod fields;
pub mod grid;
pub mod output;
pub mod particles;
pub mod region;
pub mod schedule;
pub mod settings;
pub mod simulation;

/// Floating point type used for fields and particle coordinates.
pub type Float = f64;
