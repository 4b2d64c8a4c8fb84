//! Yee finite-difference time-domain solver for one region slab.
//!
//! `E` lives at face centers and `B` at edge centers. One advance runs the
//! half-B, full-E, half-B pattern so that `E` and `B` end up co-centered in
//! time for the particle pusher. Guard cells in x are periodic wraps (unless
//! the moving window is active); guard rows in y are exchanged with the
//! neighboring slabs by the pipeline.

use crate::errors::*;
use crate::fields::current::Current;
use crate::grid::{GridLayout, Vec3, VecField};
use crate::Float;
use serde_derive::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;

/// Electromagnetic field state of one region.
#[derive(Debug, Clone)]
pub struct Emf {
    pub e: VecField,
    pub b: VecField,
    layout: GridLayout,
    dt: Float,
    moving_window: bool,
    /// Number of cells the moving window has advanced.
    pub n_move: u64,
    /// Count of completed field advances.
    pub iter: u64,
}

impl Emf {
    pub fn new(layout: GridLayout, dt: Float, moving_window: bool) -> Emf {
        Emf {
            e: VecField::new(layout),
            b: VecField::new(layout),
            layout,
            dt,
            moving_window,
            n_move: 0,
            iter: 0,
        }
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    pub fn moving_window(&self) -> bool {
        self.moving_window
    }

    /// Advances `E` and `B` by one full time step.
    ///
    /// Values computed in guard cells are provisional; the x wrap below and
    /// the y exchange run by the pipeline replace them before anything
    /// reads them.
    pub fn advance(&mut self, current: &Current) {
        let dt = self.dt;

        self.yee_b(0.5 * dt);
        self.yee_e(current, dt);
        self.yee_b(0.5 * dt);

        self.iter += 1;

        if self.moving_window {
            if self.iter as Float * dt > self.layout.dx[0] * (self.n_move + 1) as Float {
                self.e.shift_left();
                self.b.shift_left();
                self.n_move += 1;
            }
        } else {
            self.e.wrap_x_guards();
            self.b.wrap_x_guards();
        }
    }

    fn yee_b(&mut self, dt: Float) {
        let dtx = dt / self.layout.dx[0];
        let dty = dt / self.layout.dx[1];
        let nx = self.layout.nx[0] as isize;
        let ny = self.layout.nx[1] as isize;

        for j in -1..=ny {
            for i in -1..=nx {
                let e00 = self.e.get(i, j);
                let e10 = self.e.get(i + 1, j);
                let e01 = self.e.get(i, j + 1);

                let b = self.b.at_mut(i, j);
                b.x += -dty * (e01.z - e00.z);
                b.y += dtx * (e10.z - e00.z);
                b.z += -dtx * (e10.y - e00.y) + dty * (e01.x - e00.x);
            }
        }
    }

    fn yee_e(&mut self, current: &Current, dt: Float) {
        let dtx = dt / self.layout.dx[0];
        let dty = dt / self.layout.dx[1];
        let nx = self.layout.nx[0] as isize;
        let ny = self.layout.nx[1] as isize;

        for j in 0..=ny {
            for i in 0..=nx {
                let b00 = self.b.get(i, j);
                let bm0 = self.b.get(i - 1, j);
                let b0m = self.b.get(i, j - 1);
                let j00 = current.j.get(i, j);

                let e = self.e.at_mut(i, j);
                e.x += dty * (b00.z - b0m.z) - dt * j00.x;
                e.y += -dtx * (b00.z - bm0.z) - dt * j00.y;
                e.z += dtx * (b00.y - bm0.y) - dty * (b00.x - b0m.x) - dt * j00.z;
            }
        }
    }

    /// Adds a laser pulse to the current field state (done once, at t = 0).
    pub fn add_laser(&mut self, laser: &Laser) -> Result<()> {
        let l = laser.resolved()?;
        let amp = l.omega0 * l.a0;
        let (sin_pol, cos_pol) = l.polarization.sin_cos();
        let dx = self.layout.dx[0];
        let dy = self.layout.dx[1];
        let y_off = self.layout.off[1] as Float * dy;

        for j in self.layout.y_range() {
            let y = y_off + j as Float * dy;
            for i in self.layout.x_range() {
                let z = i as Float * dx;
                let z_h = z + 0.5 * dx;

                let (ey, ez, by, bz) = match l.kind {
                    LaserKind::PlaneWave => {
                        let f = |z: Float| {
                            amp * l.lon_env(z) * (l.omega0 * (z - l.start)).cos()
                        };
                        (f(z), f(z), -f(z_h), f(z_h))
                    }
                    LaserKind::Gaussian => {
                        let f = |z: Float, r: Float| {
                            amp * l.lon_env(z) * l.gauss_phase(z - l.focus, r)
                        };
                        let r = y - l.axis;
                        let r_h = r + 0.5 * dy;
                        (f(z, r_h), f(z, r), -f(z_h, r), f(z_h, r_h))
                    }
                };

                let e = self.e.at_mut(i, j);
                e.y += ey * cos_pol;
                e.z += ez * sin_pol;
                let b = self.b.at_mut(i, j);
                b.y += by * sin_pol;
                b.z += bz * cos_pol;
            }
        }

        Ok(())
    }

    /// Per-component energies of `E` and `B` over the interior.
    pub fn energy(&self) -> (Vec3, Vec3) {
        (self.e.energy(), self.b.energy())
    }
}

/// Laser pulse injected into the initial field state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Laser {
    #[serde(rename = "type")]
    pub kind: LaserKind,
    /// Front edge position of the pulse.
    pub start: Float,
    /// Shorthand setting `rise = fall = fwhm / 2`, `flat = 0`.
    #[serde(default)]
    pub fwhm: Float,
    #[serde(default)]
    pub rise: Float,
    #[serde(default)]
    pub flat: Float,
    #[serde(default)]
    pub fall: Float,
    /// Normalized peak vector potential.
    pub a0: Float,
    /// Carrier frequency in simulation units.
    pub omega0: Float,
    /// Polarization angle in radians; 0 keeps `E` in the plane.
    #[serde(default)]
    pub polarization: Float,
    /// Gaussian beam waist.
    #[serde(default)]
    pub w0: Float,
    /// Gaussian focal plane position.
    #[serde(default)]
    pub focus: Float,
    /// Gaussian propagation axis (y position).
    #[serde(default)]
    pub axis: Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaserKind {
    PlaneWave,
    Gaussian,
}

impl Laser {
    /// Validates the parameters and resolves `fwhm` into rise/flat/fall.
    pub fn resolved(&self) -> Result<Laser> {
        let mut l = self.clone();

        if l.fwhm != 0. {
            if l.fwhm <= 0. {
                bail!(ErrorKind::Config(format!(
                    "laser fwhm must be positive, got {}",
                    l.fwhm
                )));
            }
            l.rise = l.fwhm / 2.;
            l.fall = l.fwhm / 2.;
            l.flat = 0.;
        }

        if l.rise <= 0. || l.fall <= 0. {
            bail!(ErrorKind::Config(format!(
                "laser rise/fall must be positive, got rise = {}, fall = {}",
                l.rise, l.fall
            )));
        }
        if l.flat < 0. {
            bail!(ErrorKind::Config(format!(
                "laser flat must not be negative, got {}",
                l.flat
            )));
        }
        if l.kind == LaserKind::Gaussian && l.w0 <= 0. {
            bail!(ErrorKind::Config(format!(
                "gaussian laser waist must be positive, got {}",
                l.w0
            )));
        }

        Ok(l)
    }

    /// Longitudinal sin² envelope; the pulse front sits at `start` and the
    /// pulse extends backwards over rise + flat + fall.
    fn lon_env(&self, z: Float) -> Float {
        if z > self.start {
            0.
        } else if z > self.start - self.rise {
            let csi = z - self.start;
            let e = (FRAC_PI_2 * csi / self.rise).sin();
            e * e
        } else if z > self.start - (self.rise + self.flat) {
            1.
        } else if z > self.start - (self.rise + self.flat + self.fall) {
            let csi = z - (self.start - self.rise - self.flat - self.fall);
            let e = (FRAC_PI_2 * csi / self.fall).sin();
            e * e
        } else {
            0.
        }
    }

    /// Transverse Gaussian beam profile with curvature and Gouy phase,
    /// carrier included. `z` is measured from the focal plane.
    fn gauss_phase(&self, z: Float, r: Float) -> Float {
        let z0 = self.omega0 * self.w0 * self.w0 / 2.;
        let rho2 = r * r;
        let curv = rho2 * z / (z0 * z0 + z * z) / 2.;
        let r_wl2 = z0 * z0 / (z0 * z0 + z * z);
        let gouy_shift = z.atan2(z0);

        r_wl2.sqrt().sqrt()
            * (-rho2 * r_wl2 / (self.w0 * self.w0)).exp()
            * (self.omega0 * (z + curv) - gouy_shift).cos()
    }
}
