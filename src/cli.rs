use crate::config::Options;
use crate::drm::ConnectorSpec;
use crate::logging::LogLevel;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

/// Rockchip RGA test - exercises fill, copy, scale, rotate and blend on the 2D engine
#[derive(Parser, Debug)]
#[command(name = "rga-test")]
#[command(version)]
#[command(about = "Run the RGA fill/copy/scale/rotate/blend scenarios on a display output", long_about = None)]
pub struct Cli {
    /// Output to use, e.g. 31@29:1920x1080 or 31:1280x720
    #[arg(short = 's', long = "connector", value_name = "CONNECTOR[@CRTC]:MODE")]
    pub connector: ConnectorSpec,

    /// Configuration file (rga.cfg)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Executions per timed scenario
    #[arg(short = 'n', long, value_name = "N")]
    pub iterations: Option<u32>,

    /// Run all scenarios without waiting for <ENTER>
    #[arg(long)]
    pub no_pause: bool,

    /// Write the final scanout to a PNG file
    #[arg(long, value_name = "PNG")]
    pub dump: Option<PathBuf>,

    /// Log level (nothing, error, warning, info, debug, all)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log file path
    #[arg(short, long = "log-file", value_name = "FILE")]
    pub logfile: Option<String>,

    /// Seed for the random fill colours
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,
}

impl Cli {
    /// Merge CLI arguments into the options struct
    pub fn merge_into_options(&self, mut opts: Options) -> Result<Options> {
        opts.connector = Some(self.connector.clone());

        if let Some(iterations) = self.iterations {
            if iterations == 0 {
                anyhow::bail!("Iterations must be at least 1");
            }
            opts.iterations = Some(iterations);
        }

        if self.no_pause {
            opts.pause = Some(false);
        }

        if let Some(ref dump) = self.dump {
            opts.dump = Some(dump.clone());
        }

        if let Some(ref level) = self.log_level {
            let level: LogLevel = level
                .parse()
                .map_err(anyhow::Error::msg)
                .context("Invalid log level")?;
            opts.log_level = Some(level);
        }

        if let Some(ref log_file) = self.logfile {
            opts.log_file = Some(log_file.clone());
        }

        if let Some(seed) = self.seed {
            opts.seed = Some(seed);
        }

        Ok(opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("rga-test").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_connector_required() {
        assert!(Cli::try_parse_from(["rga-test"]).is_err());
    }

    #[test]
    fn test_malformed_connector_is_usage_error() {
        let err = Cli::try_parse_from(["rga-test", "-s", "hdmi"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_parse_connector() {
        let cli = parse(&["-s", "31@29:1920x1080"]);
        assert_eq!(cli.connector.connector_id, 31);
        assert_eq!(cli.connector.crtc_id, Some(29));
        assert_eq!(cli.connector.mode_name, "1920x1080");
    }

    #[test]
    fn test_merge_overrides_config() {
        let cli = parse(&[
            "-s",
            "31:640x480",
            "-n",
            "3",
            "--no-pause",
            "--log-level",
            "debug",
            "--seed",
            "7",
        ]);
        let file_opts = Options {
            iterations: Some(20),
            pause: Some(true),
            ..Options::default()
        };
        let opts = cli.merge_into_options(file_opts).unwrap();
        assert_eq!(opts.iterations(), 3);
        assert!(!opts.pause());
        assert_eq!(opts.log_level(), LogLevel::Debug);
        assert_eq!(opts.seed, Some(7));
        assert_eq!(opts.connector.unwrap().to_string(), "31:640x480");
    }

    #[test]
    fn test_merge_keeps_config_when_unset() {
        let cli = parse(&["-s", "31:640x480"]);
        let file_opts = Options {
            iterations: Some(20),
            ..Options::default()
        };
        let opts = cli.merge_into_options(file_opts).unwrap();
        assert_eq!(opts.iterations(), 20);
        assert!(opts.pause());
    }

    #[test]
    fn test_invalid_log_level() {
        let cli = parse(&["-s", "31:640x480", "--log-level", "loud"]);
        assert!(cli.merge_into_options(Options::default()).is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let cli = parse(&["-s", "31:640x480", "-n", "0"]);
        assert!(cli.merge_into_options(Options::default()).is_err());
    }
}
