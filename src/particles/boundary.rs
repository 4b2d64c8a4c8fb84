//! Periodic x wrap, moving-window culling and inter-region y transfer.

use crate::errors::*;
use crate::particles::species::{tile_slices, Species, Transfer};
use rayon::prelude::*;

/// Particles leaving the slab this step. The vectors are owned by the
/// adjacent regions, which merge them during their own sort.
#[derive(Debug, Default)]
pub struct Outgoing {
    /// Heading to the region above (`iy >= y_hi`).
    pub up: Vec<Transfer>,
    /// Heading to the region below (`iy < y_lo`).
    pub down: Vec<Transfer>,
}

/// Post-advance boundary pass over one species.
///
/// Advances the moving window first when it is due (shifting all particles
/// one cell left and injecting fresh plasma at the right edge), then wraps
/// or culls x leavers and collects y leavers for the neighbors, marking
/// their slots invalid.
pub fn process(species: &mut Species) -> Result<Outgoing> {
    if species.window_due() {
        species.advance_window();
    }

    let nx = species.layout.nx[0] as i32;
    let (y_lo, y_hi) = species.y_bounds();
    let ny_global = species.ny_global as i32;
    let moving = species.moving_window;

    let slices = tile_slices(&mut species.store, &species.tiles.offset);
    let per_tile: Vec<Outgoing> = slices
        .into_par_iter()
        .map(|mut tile| {
            let mut out = Outgoing::default();
            for k in 0..tile.len() {
                if tile.invalid[k] {
                    continue;
                }

                let ix = tile.ix[k];
                if moving {
                    // outside the window there is nothing to come back to
                    if ix < 0 || ix >= nx {
                        tile.invalid[k] = true;
                        continue;
                    }
                } else if ix < 0 {
                    tile.ix[k] = ix + nx;
                } else if ix >= nx {
                    tile.ix[k] = ix - nx;
                }

                let iy = tile.iy[k];
                if iy >= y_lo && iy < y_hi {
                    continue;
                }
                let mut t = Transfer {
                    ix: tile.ix[k],
                    iy,
                    x: tile.x[k],
                    y: tile.y[k],
                    ux: tile.ux[k],
                    uy: tile.uy[k],
                    uz: tile.uz[k],
                };
                if iy < y_lo {
                    if t.iy < 0 {
                        t.iy += ny_global;
                    }
                    out.down.push(t);
                } else {
                    if t.iy >= ny_global {
                        t.iy -= ny_global;
                    }
                    out.up.push(t);
                }
                tile.invalid[k] = true;
            }
            out
        })
        .collect();

    let mut out = Outgoing::default();
    for mut o in per_tile {
        out.up.append(&mut o.up);
        out.down.append(&mut o.down);
    }

    if out.up.len() > species.transfer_headroom || out.down.len() > species.transfer_headroom {
        bail!(ErrorKind::CapacityExceeded(format!(
            "outgoing transfer of species '{}'",
            species.name
        )));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLayout;
    use crate::particles::sorter;
    use crate::particles::species::{DensityProfile, SpeciesParams};

    fn species(moving_window: bool, off_y: usize) -> Species {
        let params = SpeciesParams {
            name: "ions".to_string(),
            m_q: 1.0,
            ppc: [1, 1],
            ufl: [0., 0., 0.],
            uth: [0., 0., 0.],
            density: DensityProfile::Slab {
                n: 1.0,
                start: -2.,
                end: -1.,
            },
            seed: 0,
        };
        let layout = GridLayout::new([8, 8], [0.1, 0.1], [0, off_y]);
        Species::new(&params, layout, 16, 0.01, moving_window, 4, 0).unwrap()
    }

    fn add(s: &mut Species, ix: i32, iy: i32) {
        s.store.push(Transfer {
            ix,
            iy,
            x: 0.5,
            y: 0.5,
            ux: 0.,
            uy: 0.,
            uz: 0.,
        });
    }

    #[test]
    fn periodic_x_wrap() {
        let mut s = species(false, 0);
        add(&mut s, 0, 2);
        add(&mut s, 7, 3);
        sorter::full_sort(&mut s).unwrap();
        // nudge them across the x edges, as the pusher would have
        for k in 0..s.store.len() {
            s.store.ix[k] = if s.store.ix[k] == 0 { -1 } else { 8 };
        }
        let out = process(&mut s).unwrap();

        assert!(out.up.is_empty() && out.down.is_empty());
        let cols: Vec<i32> = (0..s.store.len())
            .filter(|&k| !s.store.invalid[k])
            .map(|k| s.store.ix[k])
            .collect();
        assert!(cols.contains(&7));
        assert!(cols.contains(&0));
    }

    #[test]
    fn moving_window_culls_x_leavers() {
        let mut s = species(true, 0);
        add(&mut s, 0, 2);
        add(&mut s, 3, 3);
        sorter::full_sort(&mut s).unwrap();
        for k in 0..s.store.len() {
            if s.store.ix[k] == 0 {
                s.store.ix[k] = -1;
            }
        }
        let out = process(&mut s).unwrap();

        assert!(out.up.is_empty() && out.down.is_empty());
        assert_eq!(s.n_valid(), 1);
    }

    #[test]
    fn y_leavers_are_handed_off() {
        // middle slab rows [8, 16) of a 16-row domain
        let mut s = species(false, 8);
        add(&mut s, 1, 8);
        add(&mut s, 2, 15);
        add(&mut s, 3, 12);
        sorter::full_sort(&mut s).unwrap();
        for k in 0..s.store.len() {
            match s.store.iy[k] {
                8 => s.store.iy[k] = 7,   // stepped below
                15 => s.store.iy[k] = 16, // stepped above
                _ => {}
            }
        }
        let out = process(&mut s).unwrap();

        assert_eq!(out.down.len(), 1);
        assert_eq!(out.down[0].iy, 7);
        assert_eq!(out.up.len(), 1);
        assert_eq!(out.up[0].iy, 16);
        assert_eq!(s.n_valid(), 1);
    }

    #[test]
    fn y_wraps_around_the_global_domain() {
        let mut s = species(false, 0);
        add(&mut s, 1, 0);
        sorter::full_sort(&mut s).unwrap();
        s.store.iy[0] = -1;
        let out = process(&mut s).unwrap();

        assert_eq!(out.down.len(), 1);
        assert_eq!(out.down[0].iy, 15);
    }
}
