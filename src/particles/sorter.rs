//! Bucket-sort maintenance of the tile partition.
//!
//! After each step the survivors are re-bucketed into their tiles and the
//! incoming transfer buffers are merged: a destination histogram, an
//! exclusive prefix sum over the tile counts, then a two-phase
//! gather/scatter that only touches the particles that actually moved.
//! Within a tile the order of particles is irrelevant.

use crate::particles::species::{tile_slices, Species, Transfer};
use crate::errors::*;
use rayon::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Block width of the Blelloch scan, one warp worth of elements.
const SCAN_BLOCK: usize = 32;

/// In-place exclusive prefix sum; returns the total.
///
/// Blelloch up-sweep + down-sweep per block; arrays longer than one block
/// recurse through a second scan over the block totals.
pub fn exclusive_prefix_sum(a: &mut [usize]) -> usize {
    if a.is_empty() {
        return 0;
    }

    let mut totals: Vec<usize> = a.chunks_mut(SCAN_BLOCK).map(scan_block).collect();
    if totals.len() == 1 {
        return totals[0];
    }

    let total = exclusive_prefix_sum(&mut totals);
    for (block, off) in a.chunks_mut(SCAN_BLOCK).zip(&totals) {
        for v in block.iter_mut() {
            *v += off;
        }
    }
    total
}

fn scan_block(a: &mut [usize]) -> usize {
    let n = a.len().next_power_of_two();
    let mut buf = vec![0usize; n];
    buf[..a.len()].copy_from_slice(a);

    // up-sweep
    let mut d = 1;
    while d < n {
        let mut i = 2 * d - 1;
        while i < n {
            buf[i] += buf[i - d];
            i += 2 * d;
        }
        d *= 2;
    }

    let total = buf[n - 1];
    buf[n - 1] = 0;

    // down-sweep
    let mut d = n / 2;
    while d > 0 {
        let mut i = 2 * d - 1;
        while i < n {
            let t = buf[i - d];
            buf[i - d] = buf[i];
            buf[i] += t;
            i += 2 * d;
        }
        d /= 2;
    }

    a.copy_from_slice(&buf[..a.len()]);
    total
}

/// Per-step sort: re-buckets out-of-tile survivors and merges the incoming
/// buffers, leaving particles already in place untouched.
pub fn sort(species: &mut Species) -> Result<()> {
    rebucket(species, false)
}

/// Startup sort: every particle goes through the scratch pass, so the
/// offset table may be arbitrary on entry.
pub fn full_sort(species: &mut Species) -> Result<()> {
    rebucket(species, true)
}

fn rebucket(species: &mut Species, move_everything: bool) -> Result<()> {
    let n_tiles = species.tiles.n_tiles();
    let y_lo = species.layout.off[1] as i32;
    let old_len = species.store.len();

    // 1. histogram of destination tiles, survivors plus incoming
    let hist: Vec<AtomicUsize> = (0..n_tiles).map(|_| AtomicUsize::new(0)).collect();
    {
        let store = &species.store;
        let tiles = &species.tiles;
        (0..old_len).into_par_iter().for_each(|k| {
            if !store.invalid[k] {
                let t = tiles.tile_of(store.ix[k], store.iy[k] - y_lo);
                hist[t].fetch_add(1, Ordering::Relaxed);
            }
        });
        for inc in &species.incoming {
            for p in inc {
                hist[tiles.tile_of(p.ix, p.iy - y_lo)].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    // 2. exclusive prefix sum over the counts gives the new offsets; the
    //    appended total is the new size
    let mut offsets: Vec<usize> = hist.into_iter().map(|c| c.into_inner()).collect();
    let new_len = exclusive_prefix_sum(&mut offsets);
    offsets.push(new_len);

    // 3. make room if survivors plus incoming outgrew the arrays
    species.store.grow_to(new_len)?;

    // 4. a particle keeps its slot iff the slot lies inside its tile's new
    //    range; every other occupied slot moves
    let keep: Vec<bool> = {
        let store = &species.store;
        let tiles = &species.tiles;
        (0..store.slots())
            .into_par_iter()
            .map(|k| {
                if move_everything || k >= old_len || store.invalid[k] {
                    return false;
                }
                let t = tiles.tile_of(store.ix[k], store.iy[k] - y_lo);
                offsets[t] <= k && k < offsets[t + 1]
            })
            .collect()
    };

    // 5. two-phase move: gather movers and incoming per destination tile,
    //    then fill each tile's holes in parallel
    let mut arrivals: Vec<Vec<Transfer>> = vec![Vec::new(); n_tiles];
    for k in 0..old_len {
        if !species.store.invalid[k] && !keep[k] {
            let p = species.store.get(k);
            arrivals[species.tiles.tile_of(p.ix, p.iy - y_lo)].push(p);
        }
    }
    for inc in species.incoming.iter_mut() {
        for p in inc.drain(..) {
            arrivals[species.tiles.tile_of(p.ix, p.iy - y_lo)].push(p);
        }
    }

    species.store.set_len(new_len);
    species.tiles.offset = offsets;

    let slices = tile_slices(&mut species.store, &species.tiles.offset);
    slices
        .into_par_iter()
        .zip(arrivals.into_par_iter())
        .for_each(|(mut tile, arr)| {
            let mut fill = arr.into_iter();
            for k in 0..tile.len() {
                if !keep[tile.start + k] {
                    let p = fill.next().expect("tile histogram does not match its holes");
                    tile.ix[k] = p.ix;
                    tile.iy[k] = p.iy;
                    tile.x[k] = p.x;
                    tile.y[k] = p.y;
                    tile.ux[k] = p.ux;
                    tile.uy[k] = p.uy;
                    tile.uz[k] = p.uz;
                }
                tile.invalid[k] = false;
            }
            debug_assert!(fill.next().is_none(), "arrivals left over after scatter");
        });

    // 6. everything beyond the new size is reclaimable
    for v in &mut species.store.invalid[new_len..] {
        *v = true;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLayout;
    use crate::particles::species::{DensityProfile, SpeciesParams};
    use quickcheck::quickcheck;

    #[test]
    fn prefix_sum_small() {
        let mut a = vec![3, 0, 2, 5];
        let total = exclusive_prefix_sum(&mut a);
        assert_eq!(a, vec![0, 3, 3, 5]);
        assert_eq!(total, 10);
    }

    #[test]
    fn prefix_sum_spans_blocks() {
        let mut a: Vec<usize> = (0..100).map(|i| (i * 7 + 3) % 11).collect();
        let reference: Vec<usize> = {
            let mut acc = 0;
            a.iter()
                .map(|&v| {
                    let r = acc;
                    acc += v;
                    r
                })
                .collect()
        };
        let expected_total: usize = a.iter().sum();

        let total = exclusive_prefix_sum(&mut a);
        assert_eq!(a, reference);
        assert_eq!(total, expected_total);
    }

    quickcheck! {
        fn prefix_sum_law(input: Vec<u16>) -> bool {
            let mut a: Vec<usize> = input.iter().map(|&v| v as usize).collect();
            let expected: Vec<usize> = {
                let mut acc = 0usize;
                input.iter().map(|&v| { let r = acc; acc += v as usize; r }).collect()
            };
            let expected_total: usize = input.iter().map(|&v| v as usize).sum();

            let total = exclusive_prefix_sum(&mut a);
            a == expected && total == expected_total
        }
    }

    fn uniform_species() -> Species {
        let params = SpeciesParams {
            name: "electrons".to_string(),
            m_q: -1.0,
            ppc: [1, 1],
            ufl: [0., 0., 0.],
            uth: [0., 0., 0.],
            density: DensityProfile::Uniform { n: 1.0 },
            seed: 11,
        };
        let layout = GridLayout::new([16, 16], [0.1, 0.1], [0, 0]);
        Species::new(&params, layout, 16, 0.01, false, 4, 0).unwrap()
    }

    fn assert_tile_invariant(s: &Species) {
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
    fn rebuckets_wanderers_and_reclaims_holes() {
        let mut s = uniform_species();
        let before = s.n_valid();

        // scatter a few particles into foreign tiles and kill a few others
        for k in (0..s.store.len()).step_by(37) {
            s.store.ix[k] = (s.store.ix[k] + 7) % 16;
            s.store.iy[k] = (s.store.iy[k] + 5) % 16;
        }
        for k in (0..s.store.len()).step_by(41) {
            s.store.invalid[k] = true;
        }
        let killed = (0..s.store.len()).step_by(41).count();

        sort(&mut s).unwrap();

        assert_tile_invariant(&s);
        assert_eq!(s.n_valid(), before - killed);
        assert_eq!(s.store.len(), before - killed);
    }

    #[test]
    fn sort_is_idempotent() {
        let mut s = uniform_species();
        for k in (0..s.store.len()).step_by(23) {
            s.store.ix[k] = (s.store.ix[k] + 3) % 16;
        }
        sort(&mut s).unwrap();

        let ix = s.store.ix.clone();
        let x = s.store.x.clone();
        let ux = s.store.ux.clone();
        let offsets = s.tiles.offset.clone();

        sort(&mut s).unwrap();

        assert_eq!(s.store.ix, ix);
        assert_eq!(s.store.x, x);
        assert_eq!(s.store.ux, ux);
        assert_eq!(s.tiles.offset, offsets);
    }

    #[test]
    fn merges_incoming_buffers() {
        let mut s = uniform_species();
        let before = s.n_valid();

        s.incoming[0].push(Transfer {
            ix: 2,
            iy: 2,
            x: 0.1,
            y: 0.2,
            ux: 0.5,
            uy: 0.,
            uz: 0.,
        });
        s.incoming[1].push(Transfer {
            ix: 13,
            iy: 14,
            x: 0.9,
            y: 0.8,
            ux: -0.5,
            uy: 0.,
            uz: 0.,
        });

        sort(&mut s).unwrap();

        assert_tile_invariant(&s);
        assert_eq!(s.n_valid(), before + 2);
        assert!(s.incoming.iter().all(|v| v.is_empty()));

        // the merged particles sit in the tiles owning their cells
        let t = s.tiles.tile_of(2, 2);
        let found = s
            .tiles
            .range(t)
            .any(|k| s.store.ix[k] == 2 && s.store.iy[k] == 2 && s.store.ux[k] == 0.5);
        assert!(found);
    }

    #[test]
    fn grows_storage_for_large_influx() {
        let mut s = uniform_species();
        let slots = s.store.slots();

        for i in 0..slots {
            s.incoming[0].push(Transfer {
                ix: (i % 16) as i32,
                iy: ((i / 16) % 16) as i32,
                x: 0.5,
                y: 0.5,
                ux: 0.,
                uy: 0.,
                uz: 0.,
            });
        }
        sort(&mut s).unwrap();

        assert_tile_invariant(&s);
        assert!(s.store.slots() >= 2 * slots);
        assert_eq!(s.n_valid(), 2 * slots);
    }

    #[test]
    fn tile_runs_partition_the_store() {
        let s = uniform_species();
        let mut covered = 0;
        for t in 0..s.tiles.n_tiles() {
            let r = s.tiles.range(t);
            assert_eq!(r.start, covered);
            covered = r.end;
        }
        assert_eq!(covered, s.store.len());
    }
}
