//! Macro-particle storage, advance, boundary transfer and sorting.

pub mod boundary;
pub mod pusher;
pub mod sorter;
pub mod species;

pub use self::species::{DensityProfile, Species, SpeciesParams, Transfer};
