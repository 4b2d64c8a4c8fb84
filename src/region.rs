//! A horizontal slab of the domain owning one `EMF` + `J` + species set.
//!
//! Regions expose the per-step kernels; the [`crate::schedule`] pipeline
//! sequences them and performs the guard-band exchanges between adjacent
//! slabs.

use crate::errors::*;
use crate::fields::{Current, Emf, Laser, SmoothType};
use crate::grid::{GridLayout, Vec3};
use crate::particles::boundary::{self, Outgoing};
use crate::particles::{pusher, sorter, Species, SpeciesParams};
use crate::Float;
use log::warn;
use std::ops::Range;

/// Domain-wide parameters shared by all regions.
#[derive(Debug, Clone)]
pub struct DomainConfig {
    /// Global grid cells, `[columns, rows]`.
    pub nx: [usize; 2],
    /// Physical box size.
    pub box_size: [Float; 2],
    pub dt: Float,
    pub n_regions: usize,
    /// Tile edge in cells.
    pub tile_size: usize,
    pub smooth: SmoothType,
    pub moving_window: bool,
}

impl DomainConfig {
    pub fn dx(&self) -> [Float; 2] {
        [
            self.box_size[0] / self.nx[0] as Float,
            self.box_size[1] / self.nx[1] as Float,
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if self.nx[0] == 0 || self.nx[1] == 0 {
            bail!(ErrorKind::Config("grid must have at least one cell".into()));
        }
        if self.box_size[0] <= 0. || self.box_size[1] <= 0. {
            bail!(ErrorKind::Config(format!(
                "box size must be positive, got {:?}",
                self.box_size
            )));
        }
        if self.dt <= 0. {
            bail!(ErrorKind::Config(format!(
                "time step must be positive, got {}",
                self.dt
            )));
        }
        if self.n_regions == 0 {
            bail!(ErrorKind::Config("need at least one region".into()));
        }
        if self.nx[1] % self.n_regions != 0 {
            bail!(ErrorKind::Config(format!(
                "{} rows cannot be split into {} equal regions",
                self.nx[1], self.n_regions
            )));
        }
        let slab_rows = self.nx[1] / self.n_regions;
        if self.nx[0] % self.tile_size != 0 || slab_rows % self.tile_size != 0 {
            bail!(ErrorKind::Config(format!(
                "region of {}x{} cells is not divisible into {}-cell tiles",
                self.nx[0], slab_rows, self.tile_size
            )));
        }

        let dx = self.dx();
        let cfl = 1. / (1. / (dx[0] * dx[0]) + 1. / (dx[1] * dx[1])).sqrt();
        if self.dt >= cfl {
            warn!(
                "dt = {} is at or above the CFL limit {:.6}; expect a numeric overrun",
                self.dt, cfl
            );
        }
        Ok(())
    }
}

/// One slab of rows `[y_lo, y_hi)` with its fields and particles.
pub struct Region {
    pub id: usize,
    pub layout: GridLayout,
    pub emf: Emf,
    pub current: Current,
    pub species: Vec<Species>,
}

impl Region {
    pub fn new(id: usize, cfg: &DomainConfig, species_params: &[SpeciesParams]) -> Result<Region> {
        cfg.validate()?;
        let slab_rows = cfg.nx[1] / cfg.n_regions;
        let layout = GridLayout::new(
            [cfg.nx[0], slab_rows],
            cfg.dx(),
            [0, id * slab_rows],
        );

        let species = species_params
            .iter()
            .map(|p| {
                Species::new(
                    p,
                    layout,
                    cfg.nx[1],
                    cfg.dt,
                    cfg.moving_window,
                    cfg.tile_size,
                    id,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Region {
            id,
            layout,
            emf: Emf::new(layout, cfg.dt, cfg.moving_window),
            current: Current::new(layout, cfg.smooth, cfg.moving_window),
            species,
        })
    }

    /// Rows of this slab, `[y_lo, y_hi)`.
    pub fn y_range(&self) -> (usize, usize) {
        let lo = self.layout.off[1];
        (lo, lo + self.layout.nx[1])
    }

    pub fn add_laser(&mut self, laser: &Laser) -> Result<()> {
        self.emf.add_laser(laser)
    }

    pub fn total_particles(&self) -> usize {
        self.species.iter().map(Species::n_valid).sum()
    }

    // ---- step kernels, sequenced by the pipeline ----

    pub fn reset_current(&mut self) {
        self.current.zero();
    }

    pub fn advance_deposit(&mut self, tiled: bool) -> Result<()> {
        for s in &mut self.species {
            if tiled {
                pusher::advance_deposit_tiled(s, &self.emf, &mut self.current)?;
            } else {
                pusher::advance_deposit(s, &self.emf, &mut self.current)?;
            }
        }
        Ok(())
    }

    pub fn reduce_current_x(&mut self) {
        self.current.reduce_x();
    }

    pub fn filter_current(&mut self) {
        self.current.filter();
    }

    pub fn advance_emf(&mut self) {
        self.emf.advance(&self.current);
    }

    /// Boundary pass of every species; the returned leavers are owned by
    /// the adjacent regions.
    pub fn boundary(&mut self) -> Result<Vec<Outgoing>> {
        self.species.iter_mut().map(boundary::process).collect()
    }

    pub fn sort(&mut self) -> Result<()> {
        for s in &mut self.species {
            sorter::sort(s)?;
        }
        Ok(())
    }

    // ---- guard-band plumbing used by the exchanges ----

    /// Copies `E` and `B` over `rows`, interior columns only.
    pub fn emf_band(&self, rows: Range<isize>) -> (Vec<Vec3>, Vec<Vec3>) {
        (self.emf.e.read_rows(rows.clone()), self.emf.b.read_rows(rows))
    }

    pub fn emf_write_rows(&mut self, start: isize, e: &[Vec3], b: &[Vec3]) {
        self.emf.e.write_rows(start, e);
        self.emf.b.write_rows(start, b);

        // the corners of the refreshed rows wrap too (the interpolator can
        // reach them); with the moving window the x guards stay as shifted
        if !self.emf.moving_window() {
            let rows = start..start + (e.len() / self.layout.nx[0]) as isize;
            self.emf.e.wrap_x_guards_rows(rows.clone());
            self.emf.b.wrap_x_guards_rows(rows);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::DensityProfile;

    fn config() -> DomainConfig {
        DomainConfig {
            nx: [16, 16],
            box_size: [1.6, 1.6],
            dt: 0.05,
            n_regions: 2,
            tile_size: 4,
            smooth: SmoothType::None,
            moving_window: false,
        }
    }

    fn electrons() -> SpeciesParams {
        SpeciesParams {
            name: "electrons".to_string(),
            m_q: -1.0,
            ppc: [2, 2],
            ufl: [0., 0., 0.],
            uth: [0., 0., 0.],
            density: DensityProfile::Uniform { n: 1.0 },
            seed: 1,
        }
    }

    #[test]
    fn slabs_partition_the_domain() {
        let cfg = config();
        let r0 = Region::new(0, &cfg, &[electrons()]).unwrap();
        let r1 = Region::new(1, &cfg, &[electrons()]).unwrap();

        assert_eq!(r0.y_range(), (0, 8));
        assert_eq!(r1.y_range(), (8, 16));
        assert_eq!(r0.total_particles(), 16 * 8 * 4);
        assert_eq!(r1.total_particles(), 16 * 8 * 4);
    }

    #[test]
    fn indivisible_configurations_are_rejected() {
        let mut cfg = config();
        cfg.n_regions = 3;
        assert!(Region::new(0, &cfg, &[]).is_err());

        let mut cfg = config();
        cfg.tile_size = 5;
        assert!(Region::new(0, &cfg, &[]).is_err());

        let mut cfg = config();
        cfg.dt = 0.;
        assert!(Region::new(0, &cfg, &[]).is_err());
    }

    #[test]
    fn full_step_kernels_in_sequence() {
        let mut cfg = config();
        cfg.n_regions = 1;
        let mut r = Region::new(0, &cfg, &[electrons()]).unwrap();
        let before = r.total_particles();

        r.reset_current();
        r.advance_deposit(false).unwrap();
        r.reduce_current_x();
        r.filter_current();
        r.advance_emf();
        let out = r.boundary().unwrap();
        // cold uniform plasma goes nowhere
        assert!(out[0].up.is_empty() && out[0].down.is_empty());
        r.sort().unwrap();

        assert_eq!(r.total_particles(), before);
        assert_eq!(r.emf.iter, 1);
    }
}
