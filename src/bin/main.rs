#![crate_type = "bin"]
#![recursion_limit = "1024"]

#[macro_use]
extern crate error_chain;

mod errors {
    // Create the Error, ErrorKind, ResultExt, and Result types
    error_chain! {
        links {
            Lib(empic::errors::Error, empic::errors::ErrorKind);
        }
        foreign_links {
            Io(std::io::Error);
        }
    }
}
mod output;
mod timedisplay;

use crate::errors::*;
use crate::output::path::OutputPath;
use crate::output::worker::Worker;
use clap::load_yaml;
use clap::App;
use colored::*;
use empic::settings;
use empic::simulation::Simulation;
use log::{error, info};
use pbr::ProgressBar;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() {
    // initialize the env_logger implementation
    env_logger::init();

    // error handling of runner
    if let Err(ref e) = run() {
        error!("{}: {}", "error".red(), e);

        for e in e.iter().skip(1) {
            error!("caused by: {}", e);
        }

        // The backtrace is not always generated. Try to run this with
        // `RUST_BACKTRACE=1`.
        if let Some(backtrace) = e.backtrace() {
            error!("backtrace: {:?}", backtrace);
        }

        ::std::process::exit(1);
    }

    ::std::process::exit(0);
}

/// Main function
fn run() -> Result<()> {
    // Parse command line
    let yaml = load_yaml!("cli.yml");
    let cli_matches = App::from_yaml(yaml).version(VERSION).get_matches();

    let settings_file_name = cli_matches.value_of("parameter_file").unwrap();
    let settings = settings::read_parameter_file(settings_file_name)
        .chain_err(|| "Error reading parameter file.")?;

    let output_dir = Path::new(cli_matches.value_of("output_directory").unwrap());
    let path = OutputPath::new(output_dir, &settings.output.prefix);
    path.create().chain_err(|| "Cannot create output directory")?;

    let param_name = path.with_extension("toml");
    settings
        .save_to_file(param_name.to_str().unwrap())
        .chain_err(|| "Unable to save resolved parameter file.")?;

    let mut simulation = Simulation::new(settings.clone())
        .chain_err(|| "Error during initialization of simulation.")?;

    let worker = Worker::new(&path, settings.output.format, settings.output.io_queue_size)
        .chain_err(|| "Unable to create output thread.")?;
    worker
        .write_metadata(&settings, VERSION)
        .chain_err(|| "Unable to write metadata to output.")?;

    let show_progress = cli_matches.is_present("progress_bar");

    run_simulation(&mut simulation, worker, show_progress)
}

/// Drives the simulation loop, dumping diagnostics every `ndump` steps.
fn run_simulation(simulation: &mut Simulation, out: Worker, show_progress: bool) -> Result<()> {
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let flag = interrupted.clone();
        ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
            .chain_err(|| "Unable to install the interrupt handler.")?;
    }

    let dt = simulation.settings().simulation.dt;
    let tmax = simulation.settings().simulation.tmax;
    let ndump = simulation.settings().simulation.ndump;
    let n_steps = (tmax / dt).ceil() as u64;

    let mut pb = ProgressBar::new(n_steps);
    pb.format("┫██░┣");

    // only show bar, if flag was present
    pb.show_bar = show_progress;
    pb.show_counter = show_progress;
    pb.show_percent = show_progress;
    pb.show_speed = show_progress;
    pb.show_time_left = show_progress;
    pb.show_message = show_progress;

    let start_time = Instant::now();

    // the initial condition is a dump of its own
    if ndump > 0 {
        info!("Saving initial condition.");
        for record in simulation.grid_records() {
            out.append(record)
                .chain_err(|| "Unable to append initial condition.")?;
        }
    }

    while !simulation.done() {
        pb.inc();
        simulation.step()?;

        if ndump > 0 && simulation.iteration() % ndump == 0 {
            let u = simulation.energy();
            info!(
                "Timestep {}: field energy {:.6e}, kinetic energy {:.6e}, {} particles",
                simulation.iteration(),
                u.field(),
                u.kinetic,
                simulation.total_particles()
            );
            for record in simulation.grid_records() {
                match out.append(record) {
                    Ok(_) => (),
                    Err(_) => return out.emergency_join(),
                };
            }
        }

        if interrupted.load(Ordering::SeqCst) {
            info!("Interrupted, stopping after step {}.", simulation.iteration());
            break;
        }
    }

    pb.finish_print(&format!("✓ {} ", "DONE".green().bold()));
    println!("");

    print!("Writing buffer to disk… ");
    let opath = out.dir().display().to_string();

    out.quit()?;

    println!("DONE '{}'.", opath);

    println!(
        "Elapsed time: {}",
        timedisplay::pretty_print_duration(start_time.elapsed())
    );

    Ok(())
}
