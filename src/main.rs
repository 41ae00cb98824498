use std::path::Path;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info};

use rga_rust::drm::DrmDevice;
use rga_rust::scenario::{self, NoPause, Pacer, ScenarioConfig, StdinPacer};
use rga_rust::{config, logging, Cli};

fn main() -> ExitCode {
    // Parse CLI arguments; clap exits with a usage error on bad input
    let cli = Cli::parse();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("*[RGA ERROR]*: {}", err);
            for cause in err.chain().skip(1) {
                debug!("  caused by: {}", cause);
            }
            // The logger may not be installed yet
            if log::max_level() == log::LevelFilter::Off {
                eprintln!("*[RGA ERROR]*: {:#}", err);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration file, then merge CLI options on top
    let options = config::load_config(cli.config.as_deref())?;
    let options = cli.merge_into_options(options)?;

    logging::init(options.log_level(), options.log_file.as_deref().map(Path::new))?;
    info!("rga-test starting");
    debug!("options: {:?}", options);

    let device = DrmDevice::open(options.driver(), options.device_config())
        .with_context(|| format!("Failed to open {} drm device", options.driver()))?;
    info!("opened drm device {}", device.name());

    let mut pacer: Box<dyn Pacer> = if options.pause() {
        Box::new(StdinPacer)
    } else {
        Box::new(NoPause)
    };

    let config = ScenarioConfig::from_options(&options);
    let report = scenario::run(&device, &cli.connector, &config, pacer.as_mut())?;

    info!(
        "ran {} scenarios on connector {} crtc {} ({})",
        report.timings.len(),
        report.selection.connector_id,
        report.selection.crtc_id,
        report.selection.mode
    );
    for timing in &report.timings {
        info!(
            "  {:<10} {:>4} x {:>8} usecs",
            timing.stage.to_string(),
            timing.iterations,
            timing.usecs_per_iteration()
        );
    }
    Ok(())
}
