//! Per-region current density accumulator.
//!
//! `J` shares the slab geometry of `E`. It is cleared at the start of every
//! step, filled additively by the depositor, reduced across guard cells and
//! optionally smoothed before the E solver reads it.

use crate::grid::{GridLayout, Vec3, VecField};
use crate::Float;
use num_traits::Zero;
use serde_derive::{Deserialize, Serialize};

/// Digital filtering applied to `J` along x before the field solve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SmoothType {
    None,
    Binomial { passes: u32 },
    Compensated { passes: u32 },
}

impl Default for SmoothType {
    fn default() -> SmoothType {
        SmoothType::None
    }
}

#[derive(Debug, Clone)]
pub struct Current {
    pub j: VecField,
    smooth: SmoothType,
    moving_window: bool,
}

impl Current {
    pub fn new(layout: GridLayout, smooth: SmoothType, moving_window: bool) -> Current {
        Current {
            j: VecField::new(layout),
            smooth,
            moving_window,
        }
    }

    /// Clears the accumulator at the start of a step.
    pub fn zero(&mut self) {
        self.j.zero();
    }

    /// Folds deposits that landed in the x guard columns back into the
    /// wrapped interior. With the moving window active there is nothing to
    /// wrap; deposits outside the window are simply dropped.
    pub fn reduce_x(&mut self) {
        if !self.moving_window {
            self.j.fold_x_guards();
        }
    }

    /// Deposits that landed in the lower y guard rows, interior columns.
    pub fn lower_guard_band(&self) -> Vec<Vec3> {
        let gc = self.j.layout.gc[1][0] as isize;
        self.j.read_rows(-gc..0)
    }

    /// Deposits that landed in the upper y guard rows, interior columns.
    pub fn upper_guard_band(&self) -> Vec<Vec3> {
        let ny = self.j.layout.nx[1] as isize;
        let gc = self.j.layout.gc[1][1] as isize;
        self.j.read_rows(ny..ny + gc)
    }

    /// Accumulates a neighbor's guard band into the interior rows starting
    /// at `start`.
    pub fn add_interior(&mut self, start: isize, band: &[Vec3]) {
        self.j.add_rows(start, band);
    }

    /// Reduced interior rows, for refreshing a neighbor's guard rows.
    pub fn interior_band(&self, rows: std::ops::Range<isize>) -> Vec<Vec3> {
        self.j.read_rows(rows)
    }

    /// Replaces guard rows with a neighbor's reduced interior band.
    pub fn write_guard_rows(&mut self, start: isize, band: &[Vec3]) {
        self.j.write_rows(start, band);
    }

    /// Applies the configured x-direction filter.
    ///
    /// Smoothing is purely row-local, so running it over the guard rows as
    /// well keeps them equal to the neighbor's smoothed interior without a
    /// second exchange.
    pub fn filter(&mut self) {
        match self.smooth {
            SmoothType::None => {}
            SmoothType::Binomial { passes } => {
                for _ in 0..passes {
                    self.smooth_pass_x(0.25, 0.5);
                }
            }
            SmoothType::Compensated { passes } => {
                for _ in 0..passes {
                    self.smooth_pass_x(0.25, 0.5);
                }
                // compensator kernel restoring the long-wavelength response
                let sa = -1.;
                let sb = 4. + 2. * passes as Float;
                let norm = 2. * sa + sb;
                self.smooth_pass_x(sa / norm, sb / norm);
            }
        }
    }

    fn smooth_pass_x(&mut self, sa: Float, sb: Float) {
        let nx = self.j.layout.nx[0];
        let mut scratch = vec![Vec3::zero(); nx];

        for j in self.j.layout.y_range() {
            for i in 0..nx as isize {
                scratch[i as usize] = self.j.get(i - 1, j) * sa
                    + self.j.get(i, j) * sb
                    + self.j.get(i + 1, j) * sa;
            }
            for i in 0..nx as isize {
                *self.j.at_mut(i, j) = scratch[i as usize];
            }
        }

        if !self.moving_window {
            self.j.wrap_x_guards();
        }
    }
}
