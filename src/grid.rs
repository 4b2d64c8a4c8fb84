//! Grid algebra for staggered 2D fields with guard cells.
//!
//! A region slab is a rectangle of `nx[0]` columns and `nx[1]` rows
//! surrounded by guard margins `gc[axis][lower/upper]`. Addressing is
//! signed: `(0, 0)` is the first interior cell and guard cells carry
//! negative indices, so the Yee update stencils can reach across the slab
//! edge without special cases.

use crate::Float;
use derive_more::{Add, AddAssign, Neg, Sub, SubAssign};
use ndarray::Array2;
use num_traits::Zero;
use std::ops::{AddAssign as AddAssignOp, Mul, Range};

/// Value of a vector field in one cell, components `(x, y, z)`.
#[derive(
    Debug, Clone, Copy, PartialEq, Default, Add, Sub, AddAssign, SubAssign, Neg,
)]
pub struct Vec3 {
    pub x: Float,
    pub y: Float,
    pub z: Float,
}

impl Vec3 {
    pub fn new(x: Float, y: Float, z: Float) -> Vec3 {
        Vec3 { x, y, z }
    }

    pub fn norm_sqr(&self) -> Float {
        self.x * self.x + self.y * self.y + self.z * self.z
    }
}

impl Mul<Float> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: Float) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Zero for Vec3 {
    fn zero() -> Vec3 {
        Vec3::default()
    }

    fn is_zero(&self) -> bool {
        self.x == 0. && self.y == 0. && self.z == 0.
    }
}

/// Geometry of one region slab.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    /// Interior cells per axis, `[columns, rows]`.
    pub nx: [usize; 2],
    /// Guard cells on each side, `gc[axis][0]` below and `gc[axis][1]` above.
    pub gc: [[usize; 2]; 2],
    /// Cell size per axis.
    pub dx: [Float; 2],
    /// Offset of this slab's cell `(0, 0)` in the global grid.
    pub off: [usize; 2],
}

impl GridLayout {
    /// Layout with the standard `{1, 2}` guard margins on both axes.
    pub fn new(nx: [usize; 2], dx: [Float; 2], off: [usize; 2]) -> GridLayout {
        GridLayout {
            nx,
            gc: [[1, 2], [1, 2]],
            dx,
            off,
        }
    }

    /// Row stride including guards.
    pub fn nrow(&self) -> usize {
        self.gc[0][0] + self.nx[0] + self.gc[0][1]
    }

    /// Total number of rows including guards.
    pub fn rows_total(&self) -> usize {
        self.gc[1][0] + self.nx[1] + self.gc[1][1]
    }

    pub fn cell_area(&self) -> Float {
        self.dx[0] * self.dx[1]
    }

    /// Column index range including guards.
    pub fn x_range(&self) -> Range<isize> {
        -(self.gc[0][0] as isize)..(self.nx[0] + self.gc[0][1]) as isize
    }

    /// Row index range including guards.
    pub fn y_range(&self) -> Range<isize> {
        -(self.gc[1][0] as isize)..(self.nx[1] + self.gc[1][1]) as isize
    }
}

/// A 2D field over one slab, with guard cells on all sides.
///
/// Generic over the cell value so the same indexing serves the vector
/// fields `E`, `B`, `J` and scalar diagnostics like charge density.
#[derive(Debug, Clone)]
pub struct Field<T> {
    pub layout: GridLayout,
    data: Array2<T>,
}

/// Three-component field (`E`, `B`, `J`).
pub type VecField = Field<Vec3>;
/// Scalar field (charge density diagnostic).
pub type ScalarField = Field<Float>;

impl<T: Copy + Zero + AddAssignOp<T>> Field<T> {
    /// A field of the given geometry, logically zero everywhere.
    pub fn new(layout: GridLayout) -> Field<T> {
        Field {
            layout,
            data: Array2::from_elem((layout.rows_total(), layout.nrow()), T::zero()),
        }
    }

    #[inline]
    fn index(&self, i: isize, j: isize) -> (usize, usize) {
        debug_assert!(self.layout.x_range().contains(&i), "column {} out of range", i);
        debug_assert!(self.layout.y_range().contains(&j), "row {} out of range", j);
        (
            (j + self.layout.gc[1][0] as isize) as usize,
            (i + self.layout.gc[0][0] as isize) as usize,
        )
    }

    #[inline]
    pub fn get(&self, i: isize, j: isize) -> T {
        self.data[self.index(i, j)]
    }

    #[inline]
    pub fn at_mut(&mut self, i: isize, j: isize) -> &mut T {
        let idx = self.index(i, j);
        &mut self.data[idx]
    }

    pub fn zero(&mut self) {
        for v in self.data.iter_mut() {
            *v = T::zero();
        }
    }

    /// Copies the wrapped interior into the x guard columns (periodic x).
    pub fn wrap_x_guards(&mut self) {
        self.wrap_x_guards_rows(self.layout.y_range());
    }

    /// Periodic x wrap restricted to `rows`; used after a y-band exchange
    /// refreshes guard rows so their corners wrap too.
    pub fn wrap_x_guards_rows(&mut self, rows: Range<isize>) {
        let nx = self.layout.nx[0] as isize;
        for j in rows {
            for i in -(self.layout.gc[0][0] as isize)..0 {
                *self.at_mut(i, j) = self.get(i + nx, j);
            }
            for i in nx..nx + self.layout.gc[0][1] as isize {
                *self.at_mut(i, j) = self.get(i - nx, j);
            }
        }
    }

    /// Adds the x guard columns into the wrapped interior, then refreshes
    /// the guards with the folded values (periodic x).
    pub fn fold_x_guards(&mut self) {
        let nx = self.layout.nx[0] as isize;
        for j in self.layout.y_range() {
            for i in -(self.layout.gc[0][0] as isize)..0 {
                let v = self.get(i, j);
                *self.at_mut(i + nx, j) += v;
            }
            for i in nx..nx + self.layout.gc[0][1] as isize {
                let v = self.get(i, j);
                *self.at_mut(i - nx, j) += v;
            }
        }
        self.wrap_x_guards();
    }

    /// Reads `rows` restricted to the interior columns, row-major.
    pub fn read_rows(&self, rows: Range<isize>) -> Vec<T> {
        let mut out = Vec::with_capacity((rows.end - rows.start) as usize * self.layout.nx[0]);
        for j in rows {
            for i in 0..self.layout.nx[0] as isize {
                out.push(self.get(i, j));
            }
        }
        out
    }

    /// Writes a band read by [`Field::read_rows`] starting at row `start`.
    pub fn write_rows(&mut self, start: isize, band: &[T]) {
        let nx = self.layout.nx[0];
        debug_assert_eq!(band.len() % nx, 0);
        for (k, v) in band.iter().enumerate() {
            *self.at_mut((k % nx) as isize, start + (k / nx) as isize) = *v;
        }
    }

    /// Accumulates a band read by [`Field::read_rows`] starting at row `start`.
    pub fn add_rows(&mut self, start: isize, band: &[T]) {
        let nx = self.layout.nx[0];
        debug_assert_eq!(band.len() % nx, 0);
        for (k, v) in band.iter().enumerate() {
            *self.at_mut((k % nx) as isize, start + (k / nx) as isize) += *v;
        }
    }

    /// Shifts every row left by one cell and zeroes the cells at the right
    /// edge that no longer have a source (moving-window advance).
    pub fn shift_left(&mut self) {
        let xs = self.layout.x_range();
        let zero_from = self.layout.nx[0] as isize - 1;
        for j in self.layout.y_range() {
            for i in xs.start..xs.end - 1 {
                *self.at_mut(i, j) = self.get(i + 1, j);
            }
            for i in zero_from..xs.end {
                *self.at_mut(i, j) = T::zero();
            }
        }
    }
}

impl VecField {
    /// Per-component field energy `Σ F_c² / 2 · dA` over the interior.
    pub fn energy(&self) -> Vec3 {
        let mut acc = Vec3::zero();
        for j in 0..self.layout.nx[1] as isize {
            for i in 0..self.layout.nx[0] as isize {
                let v = self.get(i, j);
                acc.x += v.x * v.x;
                acc.y += v.y * v.y;
                acc.z += v.z * v.z;
            }
        }
        acc * (0.5 * self.layout.cell_area())
    }
}
