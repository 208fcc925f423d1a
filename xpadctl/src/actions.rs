/*!
Detector operations shared by the subcommands and the interactive menu.
*/

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use xpad::{
    AcqMode, CalibrationSpeed, DetInformation, DeviceSession, ExposureSettings, SessionOptions,
};

use crate::config::AppConfig;
use crate::exposure::{self, AbortSwitch};
use crate::writer;

/// Which calibration procedure to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calibration {
    Otn(CalibrationSpeed),
    OtnPulse(CalibrationSpeed),
    Beam {
        exposure_us: u64,
        ithl_max: u32,
        speed: CalibrationSpeed,
    },
}

impl Calibration {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Otn(_) => "OTN",
            Self::OtnPulse(_) => "OTN Pulse",
            Self::Beam { .. } => "Beam",
        }
    }
}

/// Open both channels to the configured server
pub fn connect(config: &AppConfig) -> Result<DeviceSession> {
    let addr = config.server_addr();
    let options: SessionOptions = config.session_options();
    let session = DeviceSession::connect(addr.as_str(), options)
        .with_context(|| format!("Can not connect to the server at {}", addr))?;
    println!("🔌 Connected on XPAD server {}", addr);
    Ok(session)
}

/// `Init`, then apply the configured acquisition defaults
///
/// Failures of individual defaults are reported and skipped.
pub fn initialise(session: &mut DeviceSession, config: &AppConfig) -> Result<()> {
    session.init().context("Detector init failed")?;

    let defaults = &config.defaults;
    let results = [
        (
            "geometrical correction flag",
            session.set_geometrical_correction_flag(defaults.geometrical_correction),
        ),
        (
            "flat field correction flag",
            session.set_flat_field_correction_flag(defaults.flat_field_correction),
        ),
        ("output signal", session.set_output_signal(defaults.output_signal)),
        (
            "acquisition mode",
            session.set_acquisition_mode(defaults.acquisition_mode),
        ),
    ];
    for (what, result) in results {
        if let Err(e) = result {
            warn!("Setting default {} failed: {}", what, e);
        }
    }
    Ok(())
}

pub fn status(session: &DeviceSession) {
    println!("Detector Status is : {}", session.get_detector_status());
}

pub fn ask_ready(session: &mut DeviceSession) -> Result<()> {
    session.ask_ready()?;
    let modules = session.get_module_number()?;
    println!("Numbers of modules activated : {}", modules);
    Ok(())
}

/// Run the digital test and save its image as `DigitalTest`
pub fn digital_test(session: &mut DeviceSession, config: &AppConfig, mode: &str) -> Result<()> {
    println!("Digital Test in progress");
    let frame = session.digital_test(mode)?;
    writer::ensure_dir(&config.storage.images_dir)?;
    let path = writer::write_image(
        &config.storage.images_dir,
        "DigitalTest",
        config.storage.image_format,
        &frame,
    )?;
    println!("✅ Digital Test Done, file saved in: {}", path.display());
    Ok(())
}

pub fn calibrate(session: &mut DeviceSession, abort: &AbortSwitch, calibration: Calibration) -> Result<()> {
    println!("Calibration {} in progress", calibration.label());
    let code = {
        let _armed = abort.arm();
        match calibration {
            Calibration::Otn(speed) => session.calibration_otn(speed)?,
            Calibration::OtnPulse(speed) => session.calibration_otn_pulse(speed)?,
            Calibration::Beam {
                exposure_us,
                ithl_max,
                speed,
            } => session.calibration_beam(exposure_us, ithl_max, speed)?,
        }
    };
    match code {
        0 => println!("✅ Calibration {} Done", calibration.label()),
        1 => println!("🛑 Calibration {} Aborted", calibration.label()),
        other => println!("Calibration {} returned {}", calibration.label(), other),
    }
    Ok(())
}

pub fn reset(session: &mut DeviceSession) -> Result<()> {
    session.reset_detector()?;
    println!("✅ Reset Detector done");
    Ok(())
}

pub fn set_exposure_parameters(
    session: &mut DeviceSession,
    exposure_us: Option<u64>,
    images: Option<u32>,
) -> Result<()> {
    if let Some(time) = exposure_us {
        session.set_exposure_time(time)?;
    }
    if let Some(count) = images {
        session.set_image_number(count)?;
    }
    Ok(())
}

/// Run one exposure into the configured images directory
pub fn expose(
    session: &mut DeviceSession,
    config: &AppConfig,
    abort: &AbortSwitch,
    asynchronous: bool,
) -> Result<()> {
    let storage = &config.storage;
    let dir = writer::session_dir(&storage.images_dir, storage.timestamped_sessions)?;
    info!("Images go to {}", dir.display());

    let _armed = abort.arm();
    let report = if asynchronous {
        exposure::expose_async(session, &dir, storage.image_format, &config.polling)?
    } else {
        exposure::expose(session, &dir, storage.image_format)?
    };
    report.print();
    Ok(())
}

fn calibration_stem(config: &AppConfig, name: &str) -> Result<PathBuf> {
    writer::ensure_dir(&config.storage.calibration_dir)?;
    Ok(config.storage.calibration_dir.join(name))
}

pub fn save_calibration(session: &mut DeviceSession, config: &AppConfig, name: &str) -> Result<()> {
    let stem = calibration_stem(config, name)?;
    session.save_calibration(&stem)?;
    println!("✅ Save Calibration done: {}", stem.display());
    Ok(())
}

pub fn load_calibration(session: &mut DeviceSession, config: &AppConfig, name: &str) -> Result<()> {
    let stem = calibration_stem(config, name)?;
    println!("Load Calibration in progress .....");
    if session.load_calibration(&stem)? {
        println!("✅ Load Calibration done");
    } else {
        println!("Global configuration not accepted, local configuration skipped");
    }
    Ok(())
}

pub fn abort(session: &DeviceSession) -> Result<()> {
    session.abort_current_process()?;
    println!("✅ Abort Current Process done");
    Ok(())
}

pub fn read_ctn(session: &mut DeviceSession) -> Result<()> {
    for (sensor, value) in session.read_ctn_temperature()? {
        println!("{} = {}", sensor, value);
    }
    Ok(())
}

/// Identification and configuration snapshot of the detector
#[derive(Debug, Serialize)]
pub struct DetectorInfo {
    pub status: String,
    pub detector_type: String,
    pub detector_model: String,
    pub firmware_id: String,
    pub module_mask: i64,
    pub module_number: i64,
    pub image_size: String,
    pub serial_number: Option<String>,
    pub temperature: Option<String>,
    pub acquisition_mode: Option<String>,
    pub settings: ExposureSettings,
}

impl DetectorInfo {
    pub fn collect(session: &mut DeviceSession) -> Result<Self> {
        let mode: AcqMode = session.settings().acquisition_mode;
        Ok(Self {
            status: session.get_detector_status().to_string(),
            detector_type: session.get_detector_type()?,
            detector_model: session.get_detector_model()?,
            firmware_id: session.get_firmware_id()?,
            module_mask: session.get_module_mask()?,
            module_number: session.get_module_number()?,
            image_size: session.get_image_size()?,
            // Optional fields: older servers do not know these commands
            serial_number: session
                .get_detector_information(DetInformation::SerialNumber)
                .ok(),
            temperature: session.read_detector_temperature().ok(),
            acquisition_mode: session.get_acquisition_mode(mode).ok(),
            settings: session.settings().clone(),
        })
    }

    pub fn print(&self) {
        println!("Status           : {}", self.status);
        println!("Detector type    : {}", self.detector_type);
        println!("Detector model   : {}", self.detector_model);
        println!("Firmware         : {}", self.firmware_id);
        println!("Module mask      : {:#x}", self.module_mask);
        println!("Modules          : {}", self.module_number);
        println!("Image size       : {}", self.image_size);
        if let Some(serial) = &self.serial_number {
            println!("Serial number    : {}", serial);
        }
        if let Some(temperature) = &self.temperature {
            println!("Temperature      : {}", temperature);
        }
        if let Some(mode) = &self.acquisition_mode {
            println!("Acquisition mode : {}", mode);
        }
    }
}

pub fn info(session: &mut DeviceSession, json: bool) -> Result<()> {
    let info = DetectorInfo::collect(session)?;
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&info).context("Failed to serialize detector info")?
        );
    } else {
        info.print();
    }
    Ok(())
}
