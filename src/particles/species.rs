//! Tiled structure-of-arrays particle storage for one species in one region.
//!
//! Particles are grouped into square tiles of `T` cells; each tile is a
//! contiguous run in the arrays described by an exclusive prefix-sum offset
//! table. The sorter maintains that grouping after every step.

use crate::errors::*;
use crate::grid::{GridLayout, ScalarField};
use crate::Float;
use itertools::iproduct;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_pcg::Pcg64;
use serde_derive::{Deserialize, Serialize};
use std::ops::Range;

/// Particle storage alignment; capacities are rounded up to this.
const ALIGN: usize = 64;

/// Headroom factor for the transfer buffers, in units of one boundary row
/// worth of particles.
const TRANSFER_SAFETY: usize = 4;

/// A particle in flight between regions, or freshly injected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transfer {
    pub ix: i32,
    pub iy: i32,
    pub x: Float,
    pub y: Float,
    pub ux: Float,
    pub uy: Float,
    pub uz: Float,
}

/// Structure-of-arrays particle store. All arrays share the same length;
/// `invalid[k]` marks slot `k` as logically empty until the sorter reclaims
/// it.
#[derive(Debug, Clone, Default)]
pub struct ParticleStore {
    pub ix: Vec<i32>,
    pub iy: Vec<i32>,
    pub x: Vec<Float>,
    pub y: Vec<Float>,
    pub ux: Vec<Float>,
    pub uy: Vec<Float>,
    pub uz: Vec<Float>,
    pub invalid: Vec<bool>,
    len: usize,
}

impl ParticleStore {
    /// Number of slots covered by the tile offset table.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated slots.
    pub fn slots(&self) -> usize {
        self.ix.len()
    }

    pub(crate) fn set_len(&mut self, n: usize) {
        debug_assert!(n <= self.slots());
        self.len = n;
    }

    /// Appends a valid particle; only used while loading, before the first
    /// sort establishes the tile runs.
    pub fn push(&mut self, t: Transfer) {
        debug_assert_eq!(self.len, self.slots());
        self.ix.push(t.ix);
        self.iy.push(t.iy);
        self.x.push(t.x);
        self.y.push(t.y);
        self.ux.push(t.ux);
        self.uy.push(t.uy);
        self.uz.push(t.uz);
        self.invalid.push(false);
        self.len += 1;
    }

    pub fn get(&self, k: usize) -> Transfer {
        Transfer {
            ix: self.ix[k],
            iy: self.iy[k],
            x: self.x[k],
            y: self.y[k],
            ux: self.ux[k],
            uy: self.uy[k],
            uz: self.uz[k],
        }
    }

    /// Grows the arrays (aligned) so that at least `n` slots exist. New
    /// slots are invalid.
    pub fn grow_to(&mut self, n: usize) -> Result<()> {
        if n <= self.slots() {
            return Ok(());
        }
        let target = (n + ALIGN - 1) / ALIGN * ALIGN;
        let add = target - self.slots();

        if self.ix.try_reserve(add).is_err()
            || self.iy.try_reserve(add).is_err()
            || self.x.try_reserve(add).is_err()
            || self.y.try_reserve(add).is_err()
            || self.ux.try_reserve(add).is_err()
            || self.uy.try_reserve(add).is_err()
            || self.uz.try_reserve(add).is_err()
            || self.invalid.try_reserve(add).is_err()
        {
            bail!(ErrorKind::Alloc(format!("particle storage ({} slots)", target)));
        }

        self.ix.resize(target, 0);
        self.iy.resize(target, 0);
        self.x.resize(target, 0.);
        self.y.resize(target, 0.);
        self.ux.resize(target, 0.);
        self.uy.resize(target, 0.);
        self.uz.resize(target, 0.);
        self.invalid.resize(target, true);
        Ok(())
    }
}

/// The tile partition of one slab.
#[derive(Debug, Clone)]
pub struct TileGrid {
    /// Tile edge in cells (power of two).
    pub size: usize,
    /// Tiles per axis, `[x, y]`.
    pub n: [usize; 2],
    /// Exclusive prefix-sum offsets, `n_tiles + 1` entries.
    pub offset: Vec<usize>,
}

impl TileGrid {
    pub fn new(layout: &GridLayout, size: usize) -> Result<TileGrid> {
        if !size.is_power_of_two() {
            bail!(ErrorKind::Config(format!("tile size {} is not a power of two", size)));
        }
        if layout.nx[0] % size != 0 || layout.nx[1] % size != 0 {
            bail!(ErrorKind::Config(format!(
                "slab of {}x{} cells is not divisible into {0}-cell tiles",
                layout.nx[0], layout.nx[1]
            )));
        }
        let n = [layout.nx[0] / size, layout.nx[1] / size];
        Ok(TileGrid {
            size,
            n,
            offset: vec![0; n[0] * n[1] + 1],
        })
    }

    pub fn n_tiles(&self) -> usize {
        self.n[0] * self.n[1]
    }

    /// Tile owning the cell `(ix, iy_local)`.
    #[inline]
    pub fn tile_of(&self, ix: i32, iy_local: i32) -> usize {
        debug_assert!(ix >= 0 && iy_local >= 0);
        (iy_local as usize / self.size) * self.n[0] + ix as usize / self.size
    }

    /// Grid coordinates `(tx, ty)` of tile `t`.
    pub fn coords(&self, t: usize) -> (usize, usize) {
        (t % self.n[0], t / self.n[0])
    }

    /// Slot range of tile `t`.
    pub fn range(&self, t: usize) -> Range<usize> {
        self.offset[t]..self.offset[t + 1]
    }
}

/// Initial density as a function of the global x coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DensityProfile {
    Uniform { n: Float },
    Step { n: Float, start: Float },
    Slab { n: Float, start: Float, end: Float },
}

impl DensityProfile {
    /// Reference density, used for the macro-particle charge.
    pub fn reference(&self) -> Float {
        match *self {
            DensityProfile::Uniform { n } => n,
            DensityProfile::Step { n, .. } => n,
            DensityProfile::Slab { n, .. } => n,
        }
    }

    pub fn value(&self, x: Float) -> Float {
        match *self {
            DensityProfile::Uniform { n } => n,
            DensityProfile::Step { n, start } => {
                if x >= start {
                    n
                } else {
                    0.
                }
            }
            DensityProfile::Slab { n, start, end } => {
                if x >= start && x < end {
                    n
                } else {
                    0.
                }
            }
        }
    }
}

/// Externally supplied species description.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeciesParams {
    pub name: String,
    /// Mass over charge ratio in simulation units (electrons: -1).
    pub m_q: Float,
    /// Particles per cell, `[x, y]`.
    pub ppc: [usize; 2],
    /// Initial fluid momentum.
    #[serde(default)]
    pub ufl: [Float; 3],
    /// Initial thermal momentum spread.
    #[serde(default)]
    pub uth: [Float; 3],
    #[serde(default)]
    pub seed: u64,
    // table-valued, so it stays behind the scalar fields for TOML output
    pub density: DensityProfile,
}

/// One species inside one region slab.
#[derive(Debug, Clone)]
pub struct Species {
    pub name: String,
    pub m_q: Float,
    /// Macro-particle charge.
    pub q: Float,
    pub ppc: [usize; 2],
    ufl: [Float; 3],
    uth: [Float; 3],
    profile: DensityProfile,
    pub dt: Float,
    pub moving_window: bool,
    pub n_move: u64,
    pub iter: u64,
    pub layout: GridLayout,
    /// Rows of the whole domain, for the periodic y wrap.
    pub ny_global: usize,
    pub store: ParticleStore,
    pub tiles: TileGrid,
    /// `[0]`: arriving from the region below, `[1]`: from above,
    /// `[2]`: moving-window edge injection.
    pub incoming: [Vec<Transfer>; 3],
    /// Reserved headroom for each transfer buffer.
    pub transfer_headroom: usize,
    thermal: Normal<Float>,
    rng: Pcg64,
}

impl Species {
    pub fn new(
        params: &SpeciesParams,
        layout: GridLayout,
        ny_global: usize,
        dt: Float,
        moving_window: bool,
        tile_size: usize,
        region_id: usize,
    ) -> Result<Species> {
        let tiles = TileGrid::new(&layout, tile_size)?;
        let ppc_cell = params.ppc[0] * params.ppc[1];
        if ppc_cell == 0 {
            bail!(ErrorKind::Config(format!(
                "species '{}' has no particles per cell",
                params.name
            )));
        }

        let q = params.m_q.signum() * params.density.reference() / ppc_cell as Float;
        let headroom = ppc_cell * layout.nx[0] * TRANSFER_SAFETY;

        let mut species = Species {
            name: params.name.clone(),
            m_q: params.m_q,
            q,
            ppc: params.ppc,
            ufl: params.ufl,
            uth: params.uth,
            profile: params.density,
            dt,
            moving_window,
            n_move: 0,
            iter: 0,
            layout,
            ny_global,
            store: ParticleStore::default(),
            tiles,
            incoming: [
                Vec::with_capacity(headroom),
                Vec::with_capacity(headroom),
                Vec::with_capacity(headroom),
            ],
            transfer_headroom: headroom,
            thermal: Normal::new(0., 1.).expect("unit normal"),
            rng: Pcg64::seed_from_u64(
                params.seed ^ (region_id as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15),
            ),
        };

        // load the initial plasma over the whole slab
        let (y_lo, y_hi) = species.y_bounds();
        let mut cell = Vec::with_capacity(ppc_cell);
        for iy in y_lo..y_hi {
            for ix in 0..species.layout.nx[0] as i32 {
                species.cell_particles(ix, iy, &mut cell);
                for t in cell.drain(..) {
                    species.store.push(t);
                }
            }
        }
        crate::particles::sorter::full_sort(&mut species)?;

        Ok(species)
    }

    /// Global row bounds `[y_lo, y_hi)` of the slab.
    pub fn y_bounds(&self) -> (i32, i32) {
        let lo = self.layout.off[1] as i32;
        (lo, lo + self.layout.nx[1] as i32)
    }

    /// Number of valid particles.
    pub fn n_valid(&self) -> usize {
        (0..self.store.len())
            .filter(|&k| !self.store.invalid[k])
            .count()
    }

    /// Whether the moving window must advance this step.
    pub fn window_due(&self) -> bool {
        self.moving_window
            && self.iter as Float * self.dt > self.layout.dx[0] * (self.n_move + 1) as Float
    }

    /// Shifts all particles one cell left and injects fresh plasma into the
    /// rightmost column, following the density profile.
    pub fn advance_window(&mut self) {
        for k in 0..self.store.len() {
            self.store.ix[k] -= 1;
        }
        self.n_move += 1;

        let col = self.layout.nx[0] as i32 - 1;
        let (y_lo, y_hi) = self.y_bounds();
        let mut cell = Vec::with_capacity(self.ppc[0] * self.ppc[1]);
        for iy in y_lo..y_hi {
            self.cell_particles(col, iy, &mut cell);
            self.incoming[2].append(&mut cell);
        }
    }

    /// Particles to load into cell `(ix, iy)` (global row), or nothing where
    /// the density profile vanishes.
    fn cell_particles(&mut self, ix: i32, iy: i32, out: &mut Vec<Transfer>) {
        let gx = (ix as Float + self.n_move as Float + 0.5) * self.layout.dx[0];
        if self.profile.value(gx) <= 0. {
            return;
        }

        for (k1, k0) in iproduct!(0..self.ppc[1], 0..self.ppc[0]) {
            let u = self.sample_momentum();
            out.push(Transfer {
                ix,
                iy,
                x: (k0 as Float + 0.5) / self.ppc[0] as Float,
                y: (k1 as Float + 0.5) / self.ppc[1] as Float,
                ux: u[0],
                uy: u[1],
                uz: u[2],
            });
        }
    }

    fn sample_momentum(&mut self) -> [Float; 3] {
        let mut u = [0.; 3];
        for c in 0..3 {
            u[c] = self.ufl[c]
                + if self.uth[c] != 0. {
                    self.uth[c] * self.thermal.sample(&mut self.rng)
                } else {
                    0.
                };
        }
        u
    }

    /// Charge density on the slab nodes by linear (area) weighting. Guard
    /// cells carry the contributions that belong to neighbors; the caller
    /// folds them.
    pub fn charge_density(&self) -> ScalarField {
        let mut rho = ScalarField::new(self.layout);
        let y_lo = self.layout.off[1] as i32;

        for k in 0..self.store.len() {
            if self.store.invalid[k] {
                continue;
            }
            let i = self.store.ix[k] as isize;
            let j = (self.store.iy[k] - y_lo) as isize;
            let x = self.store.x[k];
            let y = self.store.y[k];

            *rho.at_mut(i, j) += self.q * (1. - x) * (1. - y);
            *rho.at_mut(i + 1, j) += self.q * x * (1. - y);
            *rho.at_mut(i, j + 1) += self.q * (1. - x) * y;
            *rho.at_mut(i + 1, j + 1) += self.q * x * y;
        }
        rho
    }

    /// Total kinetic energy `Σ m (γ - 1)` of the valid particles.
    pub fn kinetic_energy(&self) -> Float {
        let mass = (self.m_q * self.q).abs();
        (0..self.store.len())
            .filter(|&k| !self.store.invalid[k])
            .map(|k| {
                let u2 = self.store.ux[k] * self.store.ux[k]
                    + self.store.uy[k] * self.store.uy[k]
                    + self.store.uz[k] * self.store.uz[k];
                mass * ((1. + u2).sqrt() - 1.)
            })
            .sum()
    }
}

/// Disjoint mutable views of the per-tile runs of a store.
pub(crate) struct TileSliceMut<'a> {
    pub tile: usize,
    /// Slot index of the first entry.
    pub start: usize,
    pub ix: &'a mut [i32],
    pub iy: &'a mut [i32],
    pub x: &'a mut [Float],
    pub y: &'a mut [Float],
    pub ux: &'a mut [Float],
    pub uy: &'a mut [Float],
    pub uz: &'a mut [Float],
    pub invalid: &'a mut [bool],
}

impl<'a> TileSliceMut<'a> {
    pub fn len(&self) -> usize {
        self.ix.len()
    }
}

/// Splits a store along the tile offset table.
pub(crate) fn tile_slices<'a>(
    store: &'a mut ParticleStore,
    offsets: &[usize],
) -> Vec<TileSliceMut<'a>> {
    let n = offsets.len() - 1;
    let covered = offsets[n];

    let mut ix = &mut store.ix[..covered];
    let mut iy = &mut store.iy[..covered];
    let mut x = &mut store.x[..covered];
    let mut y = &mut store.y[..covered];
    let mut ux = &mut store.ux[..covered];
    let mut uy = &mut store.uy[..covered];
    let mut uz = &mut store.uz[..covered];
    let mut invalid = &mut store.invalid[..covered];

    let mut out = Vec::with_capacity(n);
    for t in 0..n {
        let w = offsets[t + 1] - offsets[t];
        let (h_ix, r_ix) = ix.split_at_mut(w);
        let (h_iy, r_iy) = iy.split_at_mut(w);
        let (h_x, r_x) = x.split_at_mut(w);
        let (h_y, r_y) = y.split_at_mut(w);
        let (h_ux, r_ux) = ux.split_at_mut(w);
        let (h_uy, r_uy) = uy.split_at_mut(w);
        let (h_uz, r_uz) = uz.split_at_mut(w);
        let (h_invalid, r_invalid) = invalid.split_at_mut(w);
        ix = r_ix;
        iy = r_iy;
        x = r_x;
        y = r_y;
        ux = r_ux;
        uy = r_uy;
        uz = r_uz;
        invalid = r_invalid;

        out.push(TileSliceMut {
            tile: t,
            start: offsets[t],
            ix: h_ix,
            iy: h_iy,
            x: h_x,
            y: h_y,
            ux: h_ux,
            uy: h_uy,
            uz: h_uz,
            invalid: h_invalid,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SpeciesParams {
        SpeciesParams {
            name: "electrons".to_string(),
            m_q: -1.0,
            ppc: [2, 2],
            ufl: [0., 0., 0.],
            uth: [0., 0., 0.],
            density: DensityProfile::Uniform { n: 1.0 },
            seed: 42,
        }
    }

    fn slab() -> GridLayout {
        GridLayout::new([16, 8], [0.1, 0.1], [0, 8])
    }

    #[test]
    fn uniform_loading_fills_every_cell() {
        let s = Species::new(&params(), slab(), 16, 0.01, false, 4, 1).unwrap();
        assert_eq!(s.n_valid(), 16 * 8 * 4);
        // macro charge carries the sign of m_q
        assert!((s.q - -0.25).abs() < 1e-12);
    }

    #[test]
    fn tile_invariant_after_loading() {
        let s = Species::new(&params(), slab(), 16, 0.01, false, 4, 1).unwrap();
        let y_lo = s.layout.off[1] as i32;
        for t in 0..s.tiles.n_tiles() {
            for k in s.tiles.range(t) {
                assert!(!s.store.invalid[k]);
                assert_eq!(s.tiles.tile_of(s.store.ix[k], s.store.iy[k] - y_lo), t);
            }
        }
        assert_eq!(*s.tiles.offset.last().unwrap(), s.store.len());
    }

    #[test]
    fn slab_profile_restricts_loading() {
        let mut p = params();
        p.density = DensityProfile::Slab {
            n: 1.0,
            start: 0.4,
            end: 0.8,
        };
        let s = Species::new(&p, slab(), 16, 0.01, false, 4, 0).unwrap();
        // columns with centers in [0.4, 0.8): ix = 4..7 inclusive
        assert_eq!(s.n_valid(), 4 * 8 * 4);
        for k in 0..s.store.len() {
            if !s.store.invalid[k] {
                assert!(s.store.ix[k] >= 4 && s.store.ix[k] < 8);
            }
        }
    }

    #[test]
    fn window_advance_injects_right_edge_column() {
        let mut s = Species::new(&params(), slab(), 16, 0.05, true, 4, 0).unwrap();
        s.iter = 3; // t = 0.15 > dx
        assert!(s.window_due());
        let before = s.n_valid();
        s.advance_window();

        assert_eq!(s.n_move, 1);
        assert_eq!(s.incoming[2].len(), 8 * 4);
        assert!(s.incoming[2].iter().all(|t| t.ix == 15));
        assert_eq!(s.n_valid(), before);
    }

    #[test]
    fn thermal_sampling_is_reproducible() {
        let mut p = params();
        p.uth = [0.01, 0.01, 0.01];
        let a = Species::new(&p, slab(), 16, 0.01, false, 4, 3).unwrap();
        let b = Species::new(&p, slab(), 16, 0.01, false, 4, 3).unwrap();
        assert_eq!(a.store.ux, b.store.ux);

        let c = Species::new(&p, slab(), 16, 0.01, false, 4, 4).unwrap();
        assert_ne!(a.store.ux, c.store.ux);
    }

    #[test]
    fn charge_density_sums_to_total_charge() {
        let s = Species::new(&params(), slab(), 16, 0.01, false, 4, 1).unwrap();
        let mut rho = s.charge_density();
        rho.fold_x_guards();

        // the y guard rows still hold the edge contributions, so summing
        // every row of the slab accounts for all deposited charge
        let mut total = 0.;
        for j in rho.layout.y_range() {
            for i in 0..16 {
                total += rho.get(i, j);
            }
        }
        let expected = s.q * s.n_valid() as Float;
        assert!((total - expected).abs() < 1e-9 * expected.abs());
    }
}
