//! The per-step task graph across the region stack.
//!
//! Every kernel of every region becomes one task with explicit dependency
//! edges. Within a region: current reset → advance/deposit → guard
//! reductions → filter → field advance; the boundary pass and the sort hang
//! off the advance. Across regions, the y guard exchanges and the particle
//! transfer depend on the adjacent slabs' progress; siblings overlap
//! freely. Ready tasks are dispatched to the executor owning the region —
//! first the emulated accelerator queues, then the CPU pool — and
//! completions come back over a channel.

use crate::errors::*;
use crate::region::Region;
use crate::schedule::executor::{CpuExecutor, DeviceExecutor, Executor, Job};
use log::debug;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};

/// Kernels of one region step, in intra-region order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    CurrentReset,
    AdvanceDeposit,
    CurrentReduceX,
    CurrentReduceY,
    CurrentGuardY,
    CurrentFilter,
    EmfAdvance,
    EmfGuardY,
    Boundary,
    Sort,
}

const KERNELS: [Kernel; 10] = [
    Kernel::CurrentReset,
    Kernel::AdvanceDeposit,
    Kernel::CurrentReduceX,
    Kernel::CurrentReduceY,
    Kernel::CurrentGuardY,
    Kernel::CurrentFilter,
    Kernel::EmfAdvance,
    Kernel::EmfGuardY,
    Kernel::Boundary,
    Kernel::Sort,
];

fn kernel_index(k: Kernel) -> usize {
    KERNELS.iter().position(|&x| x == k).unwrap()
}

/// Which executor a region is pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Cpu,
    Device(usize),
}

pub struct Pipeline {
    regions: Arc<Vec<Mutex<Region>>>,
    cpu: CpuExecutor,
    device: DeviceExecutor,
    lanes: Vec<Lane>,
}

impl Pipeline {
    /// Wraps the region stack, pinning the first `n_device_regions` regions
    /// to the accelerator queues (round-robin) and the rest to the CPU
    /// pool.
    pub fn new(
        regions: Vec<Region>,
        n_device_regions: usize,
        n_queues: usize,
        cpu_threads: Option<usize>,
    ) -> Result<Pipeline> {
        let n_queues = n_queues.max(1);
        let lanes: Vec<Lane> = (0..regions.len())
            .map(|r| {
                if r < n_device_regions {
                    Lane::Device(r % n_queues)
                } else {
                    Lane::Cpu
                }
            })
            .collect();
        debug!("region executor assignment: {:?}", lanes);

        Ok(Pipeline {
            regions: Arc::new(regions.into_iter().map(Mutex::new).collect()),
            cpu: CpuExecutor::new(cpu_threads)?,
            device: DeviceExecutor::new(n_queues)?,
            lanes,
        })
    }

    pub fn regions(&self) -> &Arc<Vec<Mutex<Region>>> {
        &self.regions
    }

    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Runs one full step of every region under the task dependencies.
    /// Returns after all regions have sorted, so the next step starts from
    /// a settled state.
    pub fn step(&self) -> Result<()> {
        let n = self.regions.len();
        let n_tasks = n * KERNELS.len();

        let mut remaining = Vec::with_capacity(n_tasks);
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n_tasks];
        for r in 0..n {
            for &k in KERNELS.iter() {
                let id = r * KERNELS.len() + kernel_index(k);
                let d = deps(n, r, k);
                remaining.push(d.len());
                for dep in d {
                    dependents[dep].push(id);
                }
            }
        }

        let (done_tx, done_rx) = mpsc::channel::<(usize, Result<()>)>();
        let mut ready: Vec<usize> = (0..n_tasks).filter(|&id| remaining[id] == 0).collect();
        let mut inflight = 0usize;
        let mut failure: Option<Error> = None;

        loop {
            if failure.is_none() {
                for id in ready.drain(..) {
                    self.submit(id, done_tx.clone());
                    inflight += 1;
                }
            } else {
                ready.clear();
            }
            if inflight == 0 {
                break;
            }

            let (id, res) = done_rx
                .recv()
                .expect("task completion channel closed early");
            inflight -= 1;
            match res {
                Ok(()) => {
                    for &dep in &dependents[id] {
                        remaining[dep] -= 1;
                        if remaining[dep] == 0 {
                            ready.push(dep);
                        }
                    }
                }
                Err(e) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
            }
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn submit(&self, id: usize, done: mpsc::Sender<(usize, Result<()>)>) {
        let r = id / KERNELS.len();
        let k = KERNELS[id % KERNELS.len()];
        let lane = self.lanes[r];
        let regions = self.regions.clone();

        let job: Job = Box::new(move || {
            let res = run_kernel(&regions, r, k, lane);
            let _ = done.send((id, res));
        });
        match lane {
            Lane::Cpu => self.cpu.enqueue(0, job),
            Lane::Device(q) => self.device.enqueue(q, job),
        }
    }
}

/// Dependency edges of kernel `k` of region `r` within one step.
fn deps(n: usize, r: usize, k: Kernel) -> Vec<usize> {
    let up = (r + 1) % n;
    let down = (r + n - 1) % n;
    let t = |r: usize, k: Kernel| r * KERNELS.len() + kernel_index(k);

    let mut d = match k {
        Kernel::CurrentReset => vec![],
        Kernel::AdvanceDeposit => vec![t(r, Kernel::CurrentReset)],
        Kernel::CurrentReduceX => vec![t(r, Kernel::AdvanceDeposit)],
        // the guard bands read here are stable once all three deposits done
        Kernel::CurrentReduceY => vec![
            t(down, Kernel::CurrentReduceX),
            t(r, Kernel::CurrentReduceX),
            t(up, Kernel::CurrentReduceX),
        ],
        Kernel::CurrentGuardY => vec![
            t(down, Kernel::CurrentReduceY),
            t(r, Kernel::CurrentReduceY),
            t(up, Kernel::CurrentReduceY),
        ],
        Kernel::CurrentFilter => vec![t(r, Kernel::CurrentGuardY)],
        Kernel::EmfAdvance => vec![t(r, Kernel::CurrentFilter)],
        Kernel::EmfGuardY => vec![t(r, Kernel::EmfAdvance), t(up, Kernel::EmfAdvance)],
        Kernel::Boundary => vec![t(r, Kernel::AdvanceDeposit)],
        Kernel::Sort => vec![
            t(down, Kernel::Boundary),
            t(r, Kernel::Boundary),
            t(up, Kernel::Boundary),
        ],
    };
    d.sort_unstable();
    d.dedup();
    d
}

/// Executes one kernel. Region locks are held one at a time; bands and
/// transfer lists are copied out, then applied, so no two locks nest.
fn run_kernel(regions: &[Mutex<Region>], r: usize, k: Kernel, lane: Lane) -> Result<()> {
    let n = regions.len();
    let up = (r + 1) % n;
    let down = (r + n - 1) % n;

    match k {
        Kernel::CurrentReset => regions[r].lock().unwrap().reset_current(),
        Kernel::AdvanceDeposit => {
            let tiled = matches!(lane, Lane::Device(_));
            regions[r].lock().unwrap().advance_deposit(tiled)?;
        }
        Kernel::CurrentReduceX => regions[r].lock().unwrap().reduce_current_x(),
        Kernel::CurrentReduceY => {
            // deposits that fell into the neighbors' guard rows belong to
            // this slab's edge rows
            let from_below = regions[down].lock().unwrap().current.upper_guard_band();
            let from_above = regions[up].lock().unwrap().current.lower_guard_band();

            let mut me = regions[r].lock().unwrap();
            let ny = me.layout.nx[1] as isize;
            me.current.add_interior(0, &from_below);
            me.current.add_interior(ny - 1, &from_above);
        }
        Kernel::CurrentGuardY => {
            let below_edge = {
                let below = regions[down].lock().unwrap();
                let ny = below.layout.nx[1] as isize;
                below.current.interior_band(ny - 1..ny)
            };
            let above_edge = regions[up].lock().unwrap().current.interior_band(0..2);

            let mut me = regions[r].lock().unwrap();
            let ny = me.layout.nx[1] as isize;
            me.current.write_guard_rows(-1, &below_edge);
            me.current.write_guard_rows(ny, &above_edge);
        }
        Kernel::CurrentFilter => regions[r].lock().unwrap().filter_current(),
        Kernel::EmfAdvance => regions[r].lock().unwrap().advance_emf(),
        Kernel::EmfGuardY => {
            // half-duplex exchange with the region above
            let (e_top, b_top) = {
                let me = regions[r].lock().unwrap();
                let ny = me.layout.nx[1] as isize;
                me.emf_band(ny - 1..ny)
            };
            let (e_bot, b_bot) = regions[up].lock().unwrap().emf_band(0..2);

            {
                let mut me = regions[r].lock().unwrap();
                let ny = me.layout.nx[1] as isize;
                me.emf_write_rows(ny, &e_bot, &b_bot);
            }
            regions[up].lock().unwrap().emf_write_rows(-1, &e_top, &b_top);
        }
        Kernel::Boundary => {
            let outgoing = regions[r].lock().unwrap().boundary()?;
            for (si, o) in outgoing.into_iter().enumerate() {
                if !o.down.is_empty() {
                    let mut below = regions[down].lock().unwrap();
                    below.species[si].incoming[1].extend(o.down);
                }
                if !o.up.is_empty() {
                    let mut above = regions[up].lock().unwrap();
                    above.species[si].incoming[0].extend(o.up);
                }
            }
        }
        Kernel::Sort => regions[r].lock().unwrap().sort()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::SmoothType;
    use crate::particles::sorter;
    use crate::particles::species::{DensityProfile, SpeciesParams, Transfer};
    use crate::region::DomainConfig;

    fn config(n_regions: usize) -> DomainConfig {
        DomainConfig {
            nx: [16, 16],
            box_size: [1.6, 1.6],
            dt: 0.05,
            n_regions,
            tile_size: 4,
            smooth: SmoothType::None,
            moving_window: false,
        }
    }

    fn empty_species() -> SpeciesParams {
        SpeciesParams {
            name: "electrons".to_string(),
            m_q: -1.0,
            ppc: [1, 1],
            ufl: [0., 0., 0.],
            uth: [0., 0., 0.],
            density: DensityProfile::Slab {
                n: 1.0,
                start: -2.,
                end: -1.,
            },
            seed: 0,
        }
    }

    fn uniform_species() -> SpeciesParams {
        SpeciesParams {
            density: DensityProfile::Uniform { n: 1.0 },
            ppc: [2, 1],
            ..empty_species()
        }
    }

    fn build(cfg: &DomainConfig, sp: &SpeciesParams, n_device: usize) -> Pipeline {
        let regions = (0..cfg.n_regions)
            .map(|id| Region::new(id, cfg, std::slice::from_ref(sp)).unwrap())
            .collect();
        Pipeline::new(regions, n_device, 1, Some(2)).unwrap()
    }

    fn total_particles(p: &Pipeline) -> usize {
        p.regions()
            .iter()
            .map(|r| r.lock().unwrap().total_particles())
            .sum()
    }

    #[test]
    fn handoff_between_stacked_regions() {
        let cfg = config(2);
        let p = build(&cfg, &empty_species(), 0);

        // one particle in region 0, one row below the slab boundary, moving
        // up fast enough to cross within a step
        {
            let mut r0 = p.regions()[0].lock().unwrap();
            r0.species[0].store.push(Transfer {
                ix: 5,
                iy: 7,
                x: 0.5,
                y: 0.9,
                ux: 0.,
                uy: 20.,
                uz: 0.,
            });
            sorter::full_sort(&mut r0.species[0]).unwrap();
        }

        p.step().unwrap();

        let r0 = p.regions()[0].lock().unwrap();
        let r1 = p.regions()[1].lock().unwrap();
        assert_eq!(r0.total_particles(), 0);
        assert_eq!(r1.total_particles(), 1);

        // landed in the tile that owns its cell, no stale slot anywhere
        let s = &r1.species[0];
        let k = (0..s.store.len()).find(|&k| !s.store.invalid[k]).unwrap();
        assert_eq!(s.store.iy[k], 8);
        let t = s.tiles.tile_of(s.store.ix[k], s.store.iy[k] - 8);
        assert!(s.tiles.range(t).contains(&k));
        assert_eq!(r0.species[0].store.len(), 0);
    }

    #[test]
    fn particles_conserved_across_steps() {
        let cfg = config(4);
        let sp = SpeciesParams {
            ufl: [0.2, 0.4, 0.],
            ..uniform_species()
        };
        let p = build(&cfg, &sp, 0);
        let before = total_particles(&p);

        for _ in 0..5 {
            p.step().unwrap();
        }
        assert_eq!(total_particles(&p), before);
    }

    #[test]
    fn mixed_executors_agree_with_cpu_only() {
        let cfg = config(2);
        let sp = SpeciesParams {
            ufl: [0.3, -0.2, 0.1],
            ..uniform_species()
        };
        let cpu_only = build(&cfg, &sp, 0);
        let mixed = build(&cfg, &sp, 1);
        assert_eq!(mixed.lanes()[0], Lane::Device(0));
        assert_eq!(mixed.lanes()[1], Lane::Cpu);

        for _ in 0..3 {
            cpu_only.step().unwrap();
            mixed.step().unwrap();
        }

        // per-cell occupancy is executor-independent
        let histogram = |p: &Pipeline| {
            let mut h = vec![0usize; 16 * 16];
            for region in p.regions().iter() {
                let region = region.lock().unwrap();
                let s = &region.species[0];
                for k in 0..s.store.len() {
                    if !s.store.invalid[k] {
                        h[s.store.iy[k] as usize * 16 + s.store.ix[k] as usize] += 1;
                    }
                }
            }
            h
        };
        assert_eq!(histogram(&cpu_only), histogram(&mixed));
    }

    #[test]
    fn field_guards_periodic_after_step() {
        let cfg = config(2);
        let p = build(&cfg, &uniform_species(), 0);
        p.step().unwrap();

        // x guards wrap inside each region
        for region in p.regions().iter() {
            let region = region.lock().unwrap();
            for j in 0..8isize {
                assert_eq!(region.emf.e.get(-1, j), region.emf.e.get(15, j));
                assert_eq!(region.emf.e.get(16, j), region.emf.e.get(0, j));
            }
        }

        // y guards mirror the neighbor's interior
        let r0 = p.regions()[0].lock().unwrap();
        let r1 = p.regions()[1].lock().unwrap();
        for i in 0..16isize {
            assert_eq!(r0.emf.e.get(i, 8), r1.emf.e.get(i, 0));
            assert_eq!(r0.emf.e.get(i, 9), r1.emf.e.get(i, 1));
            assert_eq!(r1.emf.e.get(i, -1), r0.emf.e.get(i, 7));
            assert_eq!(r0.emf.b.get(i, -1), r1.emf.b.get(i, 7));
        }
    }
}
