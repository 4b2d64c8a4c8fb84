//! Staggered electromagnetic field state and current accumulator.

pub mod current;
pub mod emf;

pub use self::current::{Current, SmoothType};
pub use self::emf::{Emf, Laser, LaserKind};
