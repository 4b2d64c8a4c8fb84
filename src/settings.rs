//! TOML parameter files defining an experiment.

use crate::errors::*;
use crate::fields::{Laser, SmoothType};
use crate::output::OutputFormat;
use crate::particles::SpeciesParams;
use crate::region::DomainConfig;
use crate::Float;
use serde_derive::{Deserialize, Serialize};
use std::fs::File;
use std::io::prelude::*;

/// Structure that holds settings, which are defined externally in a TOML
/// file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub species: Vec<SpeciesParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub laser: Option<Laser>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulationSettings {
    /// Global grid cells, `[columns, rows]`.
    pub nx: [usize; 2],
    /// Physical box size in units of c/ωp.
    #[serde(rename = "box")]
    pub box_size: [Float; 2],
    pub dt: Float,
    pub tmax: Float,
    /// Diagnostic dump interval in steps; 0 disables dumps.
    #[serde(default)]
    pub ndump: u64,
    #[serde(default = "one")]
    pub n_regions: usize,
    /// Fraction of the regions pinned to the accelerator.
    #[serde(default)]
    pub gpu_fraction: Float,
    /// Explicit accelerator region count; takes precedence over
    /// `gpu_fraction`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_gpu_regions: Option<usize>,
    #[serde(default = "one")]
    pub n_gpu_queues: usize,
    /// CPU pool width; defaults to the machine's cores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_threads: Option<usize>,
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
    #[serde(default)]
    pub moving_window: bool,
    // table-valued, so it stays behind the scalar fields for TOML output
    #[serde(default)]
    pub smooth: SmoothType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSettings {
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub format: OutputFormat,
    /// Backlog of the asynchronous IO thread before appends block.
    #[serde(default = "default_io_queue_size")]
    pub io_queue_size: usize,
}

impl Default for OutputSettings {
    fn default() -> OutputSettings {
        OutputSettings {
            prefix: default_prefix(),
            format: OutputFormat::default(),
            io_queue_size: default_io_queue_size(),
        }
    }
}

fn default_io_queue_size() -> usize {
    64
}

fn one() -> usize {
    1
}

fn default_tile_size() -> usize {
    16
}

fn default_prefix() -> String {
    "sim".to_string()
}

impl Settings {
    pub fn domain(&self) -> DomainConfig {
        DomainConfig {
            nx: self.simulation.nx,
            box_size: self.simulation.box_size,
            dt: self.simulation.dt,
            n_regions: self.simulation.n_regions,
            tile_size: self.simulation.tile_size,
            smooth: self.simulation.smooth,
            moving_window: self.simulation.moving_window,
        }
    }

    /// Number of regions pinned to the accelerator queues.
    pub fn n_device_regions(&self) -> usize {
        self.simulation
            .n_gpu_regions
            .unwrap_or_else(|| {
                (self.simulation.n_regions as Float * self.simulation.gpu_fraction).round()
                    as usize
            })
            .min(self.simulation.n_regions)
    }

    pub fn check(&self) -> Result<()> {
        self.domain().validate()?;

        if self.simulation.tmax < 0. {
            bail!(ErrorKind::Config(format!(
                "tmax must not be negative, got {}",
                self.simulation.tmax
            )));
        }
        if self.simulation.gpu_fraction < 0. || self.simulation.gpu_fraction > 1. {
            bail!(ErrorKind::Config(format!(
                "gpu_fraction must lie in [0, 1], got {}",
                self.simulation.gpu_fraction
            )));
        }
        if let Some(laser) = &self.laser {
            laser.resolved()?;
        }
        Ok(())
    }
}

/// Reads the content of a file `filename` into a string and returns it.
fn read_from_file(filename: &str) -> Result<String> {
    let mut f = File::open(filename).chain_err(|| "Unable to open file.")?;
    let mut content = String::new();

    f.read_to_string(&mut content)
        .chain_err(|| "Unable to read file.")?;

    Ok(content)
}

/// Reads the content of a file `param_file`, that should point to a valid
/// TOML file, and parses it. Then returns the deserialized data in form of
/// a Settings struct.
pub fn read_parameter_file(param_file: &str) -> Result<Settings> {
    let toml_string = read_from_file(param_file).chain_err(|| "Unable to read parameter file.")?;

    let settings: Settings =
        toml::from_str(&toml_string).chain_err(|| "Unable to parse parameter file.")?;

    settings.check()?;

    Ok(settings)
}

impl Settings {
    /// Writes the resolved settings next to the simulation output.
    pub fn save_to_file(&self, filename: &str) -> Result<()> {
        let s = toml::to_string(self).chain_err(|| "Unable to serialize settings.")?;
        let mut f = File::create(filename).chain_err(|| "Unable to create settings file.")?;
        f.write_all(s.as_bytes())
            .chain_err(|| "Unable to write settings file.")?;
        Ok(())
    }
}
