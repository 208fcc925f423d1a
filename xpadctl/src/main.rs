/*!
# XPAD Detector Control

Command-line control of an XPAD detector server: an interactive numbered menu
plus one-shot subcommands for scripting.

## Usage

### Interactive menu (default)
```bash
xpadctl --host 192.168.0.15
```

### One-shot commands
```bash
xpadctl status
xpadctl expose --images 10 --exposure-us 5000 --async
xpadctl calibrate otn --speed 0
xpadctl save-calibration otn_slow
```

### Configuration file
```bash
xpadctl config --output xpadctl.toml
```
*/

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use xpad::CalibrationSpeed;

mod actions;
mod config;
mod exposure;
mod menu;
mod writer;

use actions::Calibration;
use config::AppConfig;
use exposure::AbortSwitch;
use menu::Menu;
use writer::ImageFormat;

#[derive(Parser)]
#[command(name = "xpadctl")]
#[command(about = "Control an XPAD detector through its server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "xpadctl.toml")]
    config: PathBuf,

    /// Server host, overrides the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Server port, overrides the configuration file
    #[arg(long)]
    port: Option<u16>,

    /// Image file format, overrides the configuration file
    #[arg(long, value_enum)]
    format: Option<ImageFormat>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive numbered menu
    Menu,

    /// Print the detector status
    Status,

    /// Print detector identification and settings
    Info {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run one exposure and save every image
    Expose {
        /// Number of images
        #[arg(short, long)]
        images: Option<u32>,

        /// Exposure time in microseconds
        #[arg(short, long)]
        exposure_us: Option<u64>,

        /// Poll the status channel while a worker thread collects images
        #[arg(long = "async")]
        asynchronous: bool,
    },

    /// Run the digital test and save its image
    DigitalTest {
        /// Test pattern
        #[arg(default_value = "gradient")]
        mode: String,
    },

    /// Run a calibration procedure
    Calibrate {
        #[command(subcommand)]
        kind: CalibrateKind,
    },

    /// Save the current calibration under the calibration directory
    SaveCalibration { name: String },

    /// Load a calibration from the calibration directory
    LoadCalibration { name: String },

    /// Abort the current process
    Abort,

    /// Reset the detector
    Reset,

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "xpadctl.toml")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum CalibrateKind {
    /// Over-the-noise calibration
    Otn {
        /// Preamplifier speed: 0 slow, 1 medium, 2 fast
        #[arg(short, long, default_value = "0")]
        speed: CalibrationSpeed,
    },

    /// Over-the-noise calibration with test pulses
    OtnPulse {
        #[arg(short, long, default_value = "0")]
        speed: CalibrationSpeed,
    },

    /// Beam calibration
    Beam {
        /// Exposure time in microseconds
        #[arg(short, long)]
        exposure_us: u64,

        /// Highest threshold to scan
        #[arg(short, long, default_value = "100")]
        ithl_max: u32,

        #[arg(short, long, default_value = "1")]
        speed: CalibrationSpeed,
    },
}

impl From<CalibrateKind> for Calibration {
    fn from(kind: CalibrateKind) -> Self {
        match kind {
            CalibrateKind::Otn { speed } => Calibration::Otn(speed),
            CalibrateKind::OtnPulse { speed } => Calibration::OtnPulse(speed),
            CalibrateKind::Beam {
                exposure_us,
                ithl_max,
                speed,
            } => Calibration::Beam {
                exposure_us,
                ithl_max,
                speed,
            },
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging goes to stderr; stdout carries menu and command output
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(io::stderr)
        .init();

    let command = match cli.command.unwrap_or(Commands::Menu) {
        Commands::Config { output } => return generate_config_file(output),
        command => command,
    };

    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(format) = cli.format {
        config.storage.image_format = format;
    }

    let mut session = actions::connect(&config)?;
    let abort = AbortSwitch::install(session.status_handle())?;

    // Status and abort must work on a busy detector, so they skip Init
    match command {
        Commands::Status => actions::status(&session),
        Commands::Abort => actions::abort(&session)?,
        command => {
            actions::initialise(&mut session, &config)?;
            run_command(command, &mut session, &config, &abort)?;
        }
    }

    session.close()?;
    info!("Closed TCP connection");
    Ok(())
}

fn run_command(
    command: Commands,
    session: &mut xpad::DeviceSession,
    config: &AppConfig,
    abort: &AbortSwitch,
) -> Result<()> {
    match command {
        Commands::Menu => {
            actions::status(session);
            let stdin = io::stdin();
            Menu::new(session, config, abort).run(&mut stdin.lock())
        }
        Commands::Info { json } => actions::info(session, json),
        Commands::Expose {
            images,
            exposure_us,
            asynchronous,
        } => {
            actions::set_exposure_parameters(session, exposure_us, images)?;
            actions::expose(session, config, abort, asynchronous)
        }
        Commands::DigitalTest { mode } => actions::digital_test(session, config, &mode),
        Commands::Calibrate { kind } => actions::calibrate(session, abort, kind.into()),
        Commands::SaveCalibration { name } => actions::save_calibration(session, config, &name),
        Commands::LoadCalibration { name } => actions::load_calibration(session, config, &name),
        Commands::Reset => actions::reset(session),
        Commands::Status => {
            actions::status(session);
            Ok(())
        }
        Commands::Abort => actions::abort(session),
        Commands::Config { output } => generate_config_file(output),
    }
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   xpadctl --config {}", output_path.display());

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_expose() {
        let cli = Cli::try_parse_from([
            "xpadctl", "--host", "10.0.0.2", "expose", "--images", "3", "--exposure-us", "5000",
            "--async",
        ])
        .unwrap();
        assert_eq!(cli.host.as_deref(), Some("10.0.0.2"));
        match cli.command {
            Some(Commands::Expose {
                images,
                exposure_us,
                asynchronous,
            }) => {
                assert_eq!(images, Some(3));
                assert_eq!(exposure_us, Some(5000));
                assert!(asynchronous);
            }
            _ => panic!("expected expose"),
        }
    }

    #[test]
    fn test_parse_calibrate() {
        let cli = Cli::try_parse_from(["xpadctl", "calibrate", "beam", "--exposure-us", "1000"])
            .unwrap();
        match cli.command {
            Some(Commands::Calibrate { kind }) => assert_eq!(
                Calibration::from(kind),
                Calibration::Beam {
                    exposure_us: 1000,
                    ithl_max: 100,
                    speed: CalibrationSpeed::Medium,
                }
            ),
            _ => panic!("expected calibrate"),
        }

        assert!(Cli::try_parse_from(["xpadctl", "calibrate", "otn", "--speed", "7"]).is_err());
    }

    #[test]
    fn test_default_is_menu() {
        let cli = Cli::try_parse_from(["xpadctl", "--format", "bin"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.format, Some(ImageFormat::Bin));
    }

    #[test]
    fn test_generate_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("xpadctl.toml");
        generate_config_file(path.clone()).unwrap();
        assert_eq!(AppConfig::load_from_file(&path).unwrap(), AppConfig::new());
    }
}
