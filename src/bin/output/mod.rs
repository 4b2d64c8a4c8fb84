//! Run directory handling and the asynchronous diagnostic writer.

pub mod path;
pub mod worker;
