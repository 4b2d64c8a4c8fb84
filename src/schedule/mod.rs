//! Heterogeneous task scheduling: executor back-ends and the per-step
//! region pipeline.

pub mod executor;
pub mod pipeline;

pub use self::executor::{CpuExecutor, DeviceExecutor, Executor};
pub use self::pipeline::{Lane, Pipeline};
