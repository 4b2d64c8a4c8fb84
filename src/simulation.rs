//! Simulation driver: builds the region stack, steps the pipeline and
//! assembles domain-wide diagnostics.

use crate::errors::*;
use crate::output::{AxisInfo, GridRecord};
use crate::region::Region;
use crate::schedule::Pipeline;
use crate::settings::Settings;
use crate::Float;
use log::info;

/// Main data structure representing the simulation.
pub struct Simulation {
    settings: Settings,
    pipeline: Pipeline,
    /// Count of completed steps.
    iter: u64,
}

/// Field and particle energies of the whole domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyReport {
    pub e: [Float; 3],
    pub b: [Float; 3],
    pub kinetic: Float,
}

impl EnergyReport {
    pub fn field(&self) -> Float {
        self.e.iter().sum::<Float>() + self.b.iter().sum::<Float>()
    }

    pub fn total(&self) -> Float {
        self.field() + self.kinetic
    }
}

impl Simulation {
    /// Builds the region stack from the settings, injects the laser and
    /// wires the pipeline.
    pub fn new(settings: Settings) -> Result<Simulation> {
        settings.check()?;
        let cfg = settings.domain();

        let mut regions = (0..cfg.n_regions)
            .map(|id| Region::new(id, &cfg, &settings.species))
            .collect::<Result<Vec<Region>>>()?;

        if let Some(laser) = &settings.laser {
            for r in &mut regions {
                r.add_laser(laser)?;
            }
        }

        let n_device = settings.n_device_regions();
        info!(
            "{} regions ({} on the accelerator), {} species, {} total particles",
            cfg.n_regions,
            n_device,
            settings.species.len(),
            regions.iter().map(Region::total_particles).sum::<usize>()
        );

        let pipeline = Pipeline::new(
            regions,
            n_device,
            settings.simulation.n_gpu_queues,
            settings.simulation.cpu_threads,
        )?;

        Ok(Simulation {
            settings,
            pipeline,
            iter: 0,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The shared region stack; locking a region between steps is safe.
    pub fn regions(&self) -> &std::sync::Arc<Vec<std::sync::Mutex<Region>>> {
        self.pipeline.regions()
    }

    pub fn iteration(&self) -> u64 {
        self.iter
    }

    pub fn time(&self) -> Float {
        self.iter as Float * self.settings.simulation.dt
    }

    pub fn done(&self) -> bool {
        self.time() >= self.settings.simulation.tmax
    }

    /// Runs one full step of every region.
    pub fn step(&mut self) -> Result<u64> {
        self.pipeline.step()?;
        self.iter += 1;
        Ok(self.iter)
    }

    /// Valid particles over all regions.
    pub fn total_particles(&self) -> usize {
        self.pipeline
            .regions()
            .iter()
            .map(|r| r.lock().unwrap().total_particles())
            .sum()
    }

    pub fn energy(&self) -> EnergyReport {
        let mut report = EnergyReport::default();
        for region in self.pipeline.regions().iter() {
            let r = region.lock().unwrap();
            let (ue, ub) = r.emf.energy();
            report.e[0] += ue.x;
            report.e[1] += ue.y;
            report.e[2] += ue.z;
            report.b[0] += ub.x;
            report.b[1] += ub.y;
            report.b[2] += ub.z;
            report.kinetic += r.species.iter().map(|s| s.kinetic_energy()).sum::<Float>();
        }
        report
    }

    /// Grid snapshots: the six field components, the out-of-plane current
    /// and one charge-density grid per species.
    pub fn grid_records(&self) -> Vec<GridRecord> {
        let sim = &self.settings.simulation;
        let (nx, ny) = (sim.nx[0], sim.nx[1]);
        let cells = nx * ny;
        let dx0 = sim.box_size[0] / nx as Float;

        let mut e = [vec![0.; cells], vec![0.; cells], vec![0.; cells]];
        let mut b = [vec![0.; cells], vec![0.; cells], vec![0.; cells]];
        let mut jz = vec![0.; cells];
        let mut charge: Vec<(String, Vec<Float>)> = self
            .settings
            .species
            .iter()
            .map(|s| (s.name.clone(), vec![0.; cells]))
            .collect();
        let mut n_move = 0;

        for region in self.pipeline.regions().iter() {
            let r = region.lock().unwrap();
            n_move = r.emf.n_move;
            let (y_lo, y_hi) = r.y_range();

            for j in 0..(y_hi - y_lo) {
                for i in 0..nx {
                    let g = (y_lo + j) * nx + i;
                    let ev = r.emf.e.get(i as isize, j as isize);
                    let bv = r.emf.b.get(i as isize, j as isize);
                    e[0][g] = ev.x;
                    e[1][g] = ev.y;
                    e[2][g] = ev.z;
                    b[0][g] = bv.x;
                    b[1][g] = bv.y;
                    b[2][g] = bv.z;
                    jz[g] = r.current.j.get(i as isize, j as isize).z;
                }
            }

            // charge deposits reach into the guard rows; fold them onto the
            // periodic global grid
            for (si, s) in r.species.iter().enumerate() {
                let mut rho = s.charge_density();
                rho.fold_x_guards();
                for j in rho.layout.y_range() {
                    let gj = (y_lo as isize + j).rem_euclid(ny as isize) as usize;
                    for i in 0..nx {
                        charge[si].1[gj * nx + i] += rho.get(i as isize, j);
                    }
                }
            }
        }

        let x0 = n_move as Float * dx0;
        let field_units = "m_e c \\omega_p / e";
        let mut records = Vec::new();
        let named = |name: &str, units: &str, data: Vec<Float>| GridRecord {
            name: name.to_string(),
            iteration: self.iter,
            time: self.time(),
            units: units.to_string(),
            axes: [
                AxisInfo {
                    label: "x_1".to_string(),
                    units: "c/\\omega_p".to_string(),
                    min: x0,
                    max: x0 + sim.box_size[0],
                },
                AxisInfo {
                    label: "x_2".to_string(),
                    units: "c/\\omega_p".to_string(),
                    min: 0.,
                    max: sim.box_size[1],
                },
            ],
            shape: [nx, ny],
            data,
        };

        let [e1, e2, e3] = e;
        records.push(named("e1", field_units, e1));
        records.push(named("e2", field_units, e2));
        records.push(named("e3", field_units, e3));
        let [b1, b2, b3] = b;
        records.push(named("b1", field_units, b1));
        records.push(named("b2", field_units, b2));
        records.push(named("b3", field_units, b3));
        records.push(named("j3", field_units, jz));
        for (name, data) in charge {
            records.push(named(&format!("{}-charge", name), "n_0", data));
        }
        records
    }
}

impl Iterator for Simulation {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Result<u64>> {
        if self.done() {
            None
        } else {
            Some(self.step())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields::{LaserKind, Laser};
    use crate::particles::{DensityProfile, SpeciesParams};
    use crate::settings::{OutputSettings, SimulationSettings};

    fn vacuum_settings() -> Settings {
        Settings {
            simulation: SimulationSettings {
                nx: [32, 32],
                box_size: [3.2, 3.2],
                dt: 0.05,
                tmax: 0.5,
                ndump: 0,
                n_regions: 2,
                gpu_fraction: 0.,
                n_gpu_regions: None,
                n_gpu_queues: 1,
                cpu_threads: Some(2),
                tile_size: 8,
                smooth: Default::default(),
                moving_window: false,
            },
            output: OutputSettings::default(),
            species: vec![],
            laser: None,
        }
    }

    #[test]
    fn laser_energy_survives_propagation() {
        let mut settings = vacuum_settings();
        settings.laser = Some(Laser {
            kind: LaserKind::PlaneWave,
            start: 2.4,
            fwhm: 0.8,
            rise: 0.,
            flat: 0.,
            fall: 0.,
            a0: 1.0,
            omega0: 10.0,
            polarization: 0.,
            w0: 0.,
            focus: 0.,
            axis: 0.,
        });
        let mut sim = Simulation::new(settings).unwrap();

        let u0 = sim.energy().field();
        assert!(u0 > 0.);
        for _ in 0..10 {
            sim.step().unwrap();
        }
        let u1 = sim.energy().field();
        assert!((u1 - u0).abs() / u0 < 1e-2, "u0 = {}, u1 = {}", u0, u1);
    }

    #[test]
    fn grid_records_cover_the_domain() {
        let mut settings = vacuum_settings();
        settings.species = vec![SpeciesParams {
            name: "electrons".to_string(),
            m_q: -1.0,
            ppc: [1, 1],
            ufl: [0., 0., 0.],
            uth: [0., 0., 0.],
            density: DensityProfile::Uniform { n: 1.0 },
            seed: 5,
        }];
        let mut sim = Simulation::new(settings).unwrap();
        sim.step().unwrap();

        let records = sim.grid_records();
        let names: Vec<&str> = records.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["e1", "e2", "e3", "b1", "b2", "b3", "j3", "electrons-charge"]
        );
        for r in &records {
            assert_eq!(r.shape, [32, 32]);
            assert_eq!(r.data.len(), 32 * 32);
            assert_eq!(r.iteration, 1);
            assert_eq!(r.axes[0].label, "x_1");
        }

        // a uniform neutralizing-background-free plasma has uniform charge
        let rho = &records[7];
        let expected = -1.0 * 1.0; // q * n
        assert!(rho.data.iter().all(|&v| (v - expected).abs() < 1e-9));
    }

    #[test]
    fn run_loop_stops_at_tmax() {
        let settings = vacuum_settings();
        let mut sim = Simulation::new(settings).unwrap();
        let mut steps = 0;
        while !sim.done() {
            sim.step().unwrap();
            steps += 1;
        }
        assert_eq!(steps, 10);
        assert!(sim.time() >= 0.5);
    }
}
