/*!
Detector command surface over the two server channels.

The command channel carries every request plus the binary image stream of an
exposure. The status channel is used only for status polling and aborts, so it
stays responsive while a long exposure occupies the command channel. It lives
behind a [`StatusHandle`] that can be cloned into another thread.

Configuration setters cache the new value in [`ExposureSettings`] before the
round trip; the cache is never re-read from the server.
*/

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::ack::{Ack, ACK_TERMINATOR};
use crate::channel::{Channel, SocketOptions};
use crate::codec::{self, Command};
use crate::error::{Result, XpadError};
use crate::frame::ImageFrame;
use crate::transport::Transport;
use crate::types::{
    AcqMode, CalibrationSpeed, DetInformation, DetectorStatus, GlobalRegister, OutSignal,
    TriggerMode,
};

pub const COMMAND_CHANNEL: &str = "command";
pub const STATUS_CHANNEL: &str = "status";

/// Session-wide tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub socket: SocketOptions,
    /// Status polls made while waiting for the detector to return to idle
    pub idle_poll_attempts: u32,
    pub idle_poll_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            socket: SocketOptions::default(),
            idle_poll_attempts: 10,
            idle_poll_interval: Duration::from_millis(200),
        }
    }
}

/// Last-known exposure and acquisition configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExposureSettings {
    pub image_count: u32,
    pub exposure_time_us: u64,
    pub waiting_time_us: u64,
    pub overflow_time_us: u64,
    pub input_signal: TriggerMode,
    pub output_signal: OutSignal,
    pub geometrical_correction: bool,
    pub flat_field_correction: bool,
    pub noisy_pixel_correction: bool,
    pub dead_pixel_correction: bool,
    pub image_transfer: bool,
    pub output_file_format: i32,
    pub acquisition_mode: AcqMode,
    pub stack_count: u32,
    pub output_server_path: String,
}

impl Default for ExposureSettings {
    fn default() -> Self {
        Self {
            image_count: 1,
            exposure_time_us: 1_000_000,
            waiting_time_us: 10_000,
            overflow_time_us: 4_000,
            input_signal: TriggerMode::Internal,
            output_signal: OutSignal::ExposureBusy,
            geometrical_correction: true,
            flat_field_correction: true,
            noisy_pixel_correction: false,
            dead_pixel_correction: false,
            image_transfer: true,
            output_file_format: 0,
            acquisition_mode: AcqMode::Standard,
            stack_count: 1,
            output_server_path: "/opt/cegitek/tmp_corrected/".to_string(),
        }
    }
}

/// How the server closed an exposure sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExposureOutcome {
    Done,
    Aborted,
    /// Closing acknowledgement this client does not interpret
    Other(String),
}

impl ExposureOutcome {
    fn from_payload(payload: &str) -> Self {
        match payload.trim() {
            "0" => Self::Done,
            "1" => Self::Aborted,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Cloneable access to the status/abort channel
pub struct StatusHandle<T: Transport = TcpStream> {
    channel: Arc<Mutex<Channel<T>>>,
}

impl<T: Transport> Clone for StatusHandle<T> {
    fn clone(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<T: Transport> StatusHandle<T> {
    fn new(channel: Channel<T>) -> Self {
        Self {
            channel: Arc::new(Mutex::new(channel)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Channel<T>> {
        self.channel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a command on the status channel and decode its acknowledgement
    pub fn request(&self, command: &Command) -> Result<Ack> {
        self.lock().request(command)
    }

    /// Query the detector status, propagating failures
    pub fn try_detector_status(&self) -> Result<DetectorStatus> {
        let payload = self
            .request(&Command::new("GetDetectorStatus"))?
            .into_value()?;
        Ok(DetectorStatus::from_wire(&payload))
    }

    /// Query the detector status; failures degrade to [`DetectorStatus::Unavailable`]
    pub fn detector_status(&self) -> DetectorStatus {
        match self.try_detector_status() {
            Ok(status) => status,
            Err(e) => {
                warn!("Status query failed: {}", e);
                DetectorStatus::Unavailable
            }
        }
    }

    /// Abort whatever the detector is doing
    ///
    /// Succeeds once the acknowledgement round trip completes, whatever its
    /// content.
    pub fn abort(&self) -> Result<()> {
        let mut channel = self.lock();
        channel.drain_nonblocking()?;
        channel.send_command(&Command::new("AbortCurrentProcess"))?;
        let reply = channel.recv_until_terminator(ACK_TERMINATOR)?;
        info!(
            "Abort acknowledged: {}",
            String::from_utf8_lossy(&reply).trim()
        );
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut channel = self.lock();
        channel.send_command(&Command::new("Exit"))?;
        channel.shutdown()
    }
}

/// A connected detector
pub struct DeviceSession<T: Transport = TcpStream> {
    command: Channel<T>,
    status: StatusHandle<T>,
    options: SessionOptions,
    settings: ExposureSettings,
    module_mask: Option<i64>,
    last_frame_dimensions: Option<(i32, i32)>,
}

impl DeviceSession<TcpStream> {
    /// Open the command and status connections to one server
    pub fn connect<A: ToSocketAddrs>(addr: A, options: SessionOptions) -> Result<Self> {
        let addrs: Vec<SocketAddr> = addr
            .to_socket_addrs()
            .map_err(|e| XpadError::connection(COMMAND_CHANNEL, e))?
            .collect();

        let command = Channel::connect(&addrs[..], COMMAND_CHANNEL, &options.socket)?;
        let status = Channel::connect(&addrs[..], STATUS_CHANNEL, &options.socket)?;
        Ok(Self::from_channels(command, status, options))
    }
}

impl<T: Transport> DeviceSession<T> {
    /// Build a session over two already connected channels
    pub fn from_channels(command: Channel<T>, status: Channel<T>, options: SessionOptions) -> Self {
        Self {
            command,
            status: StatusHandle::new(status),
            options,
            settings: ExposureSettings::default(),
            module_mask: None,
            last_frame_dimensions: None,
        }
    }

    pub fn settings(&self) -> &ExposureSettings {
        &self.settings
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Module mask from the last `getModuleMask` call
    pub fn module_mask(&self) -> Option<i64> {
        self.module_mask
    }

    /// Height and width of the most recently read frame
    pub fn last_frame_dimensions(&self) -> Option<(i32, i32)> {
        self.last_frame_dimensions
    }

    /// Handle for polling and aborting from another thread
    pub fn status_handle(&self) -> StatusHandle<T> {
        self.status.clone()
    }

    pub(crate) fn command_channel(&mut self) -> &mut Channel<T> {
        &mut self.command
    }

    pub(crate) fn request(&mut self, command: &Command) -> Result<Ack> {
        self.command.request(command)
    }

    pub(crate) fn request_value(&mut self, command: &Command) -> Result<String> {
        self.request(command)?.into_value()
    }

    pub(crate) fn request_int(&mut self, command: &Command) -> Result<i64> {
        self.request(command)?.int_value(command.name())
    }

    /// Integer reply where -1 means the command was not recognized
    fn request_checked_int(&mut self, command: &Command) -> Result<i64> {
        match self.request_int(command)? {
            -1 => Err(XpadError::rejected(command.name(), "-1")),
            value => Ok(value),
        }
    }

    fn request_flag(&mut self, command: &Command) -> Result<bool> {
        let value = self.request_value(command)?;
        match value.trim() {
            "true" | "True" => Ok(true),
            "false" | "False" => Ok(false),
            "-1" => Err(XpadError::rejected(command.name(), "-1")),
            other => other
                .parse::<i64>()
                .map(|v| v != 0)
                .map_err(|_| XpadError::invalid_value(command.name(), value.clone())),
        }
    }

    /// Success only on a literal `0`
    fn expect_zero(&mut self, command: &Command) -> Result<()> {
        let value = self.request_value(command)?;
        if value.trim() == "0" {
            Ok(())
        } else {
            Err(XpadError::rejected(command.name(), value))
        }
    }

    /// Success on any non-negative integer
    fn expect_accepted(&mut self, command: &Command) -> Result<()> {
        let value = self.request_value(command)?;
        match value.trim().parse::<i64>() {
            Ok(v) if v > -1 => Ok(()),
            _ => Err(XpadError::rejected(command.name(), value)),
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Initialise the detector on both channels
    pub fn init(&mut self) -> Result<()> {
        let init = Command::new("Init");
        let value = self.request_value(&init)?;

        match self.status.request(&init).and_then(Ack::into_value) {
            Ok(status_value) if status_value.trim() != "0" => {
                warn!("Status channel Init replied {}", status_value)
            }
            Ok(_) => {}
            Err(e) => warn!("Status channel Init failed: {}", e),
        }

        if value.trim() == "0" {
            info!("Detector initialised");
            Ok(())
        } else {
            Err(XpadError::NoModulesConnected)
        }
    }

    /// Send `Exit` on both channels and close them
    pub fn close(mut self) -> Result<()> {
        let command_result = self
            .command
            .send_command(&Command::new("Exit"))
            .and_then(|_| self.command.shutdown());
        let status_result = self.status.close();
        info!("Session closed");
        command_result.and(status_result)
    }

    pub fn ask_ready(&mut self) -> Result<()> {
        if self.request_int(&Command::new("AskReady"))? > -1 {
            Ok(())
        } else {
            Err(XpadError::NoModulesConnected)
        }
    }

    pub fn get_module_mask(&mut self) -> Result<i64> {
        let mask = self.request_int(&Command::new("getModuleMask"))?;
        self.module_mask = Some(mask);
        Ok(mask)
    }

    pub fn get_module_number(&mut self) -> Result<i64> {
        self.request_int(&Command::new("GetModuleNumber"))
    }

    pub fn reset_detector(&mut self) -> Result<()> {
        self.expect_zero(&Command::new("ResetDetector"))
    }

    pub fn set_debug_mode(&mut self, enabled: bool) -> Result<String> {
        let flag = if enabled { "True" } else { "False" };
        self.request_value(&Command::new("setdebugmode").arg(flag))
    }

    pub fn get_firmware_id(&mut self) -> Result<String> {
        self.request_value(&Command::new("getfirmwareID"))
    }

    pub fn get_detector_type(&mut self) -> Result<String> {
        self.request_value(&Command::new("GetDetectorType"))
    }

    pub fn get_detector_model(&mut self) -> Result<String> {
        self.request_value(&Command::new("GetDetectorModel"))
    }

    pub fn get_image_size(&mut self) -> Result<String> {
        self.request_value(&Command::new("GetImageSize"))
    }

    // ------------------------------------------------------------------
    // Status channel
    // ------------------------------------------------------------------

    /// Current detector status; never fails, see [`StatusHandle::detector_status`]
    pub fn get_detector_status(&self) -> DetectorStatus {
        self.status.detector_status()
    }

    pub fn abort_current_process(&self) -> Result<()> {
        self.status.abort()
    }

    /// Poll the status channel until the detector is idle
    ///
    /// Gives up silently after the configured number of attempts and reports
    /// whether idle was reached.
    pub fn wait_for_idle(&self) -> bool {
        for attempt in 1..=self.options.idle_poll_attempts {
            let status = self.status.detector_status();
            if status.is_idle() {
                return true;
            }
            debug!("Waiting for idle ({}/{}): {}", attempt, self.options.idle_poll_attempts, status);
            thread::sleep(self.options.idle_poll_interval);
        }
        warn!(
            "Detector not idle after {} status polls",
            self.options.idle_poll_attempts
        );
        false
    }

    // ------------------------------------------------------------------
    // Exposure
    // ------------------------------------------------------------------

    /// Start an exposure; frames are then collected with [`Self::read_one_image`]
    pub fn start_exposure(&mut self) -> Result<()> {
        self.command.drain_nonblocking()?;
        self.command.send_command(&Command::new("StartExposure"))?;
        info!("Exposure started");
        Ok(())
    }

    /// Read the next frame of the running exposure
    pub fn read_one_image(&mut self) -> Result<ImageFrame> {
        let frame = codec::read_image_frame(&mut self.command)?;
        self.last_frame_dimensions = Some((frame.height(), frame.width()));
        Ok(frame)
    }

    /// Read the acknowledgement closing an exposure sequence
    pub fn end_exposure(&mut self) -> Result<ExposureOutcome> {
        let line = self.command.recv_until_terminator(ACK_TERMINATOR)?;
        let outcome = match Ack::parse(&line) {
            Ok(ack) => ExposureOutcome::from_payload(&ack.into_value()?),
            Err(_) => ExposureOutcome::Other(String::from_utf8_lossy(&line).trim().to_string()),
        };
        info!("Exposure finished: {:?}", outcome);
        Ok(outcome)
    }

    /// Run a complete exposure, handing every frame to `on_frame`
    ///
    /// The frame loop stops early when the server aborts the acquisition;
    /// the closing acknowledgement is read in every case.
    pub fn acquire<F, E>(&mut self, mut on_frame: F) -> std::result::Result<ExposureOutcome, E>
    where
        F: FnMut(usize, ImageFrame) -> std::result::Result<(), E>,
        E: From<XpadError>,
    {
        let count = self.get_image_number()?;
        self.start_exposure()?;

        for index in 0..count.max(0) as usize {
            match self.read_one_image() {
                Ok(frame) => on_frame(index, frame)?,
                Err(e) if e.is_aborted() => {
                    warn!("Exposure aborted after {} of {} images", index, count);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(self.end_exposure()?)
    }

    /// Run the digital test and return its image
    ///
    /// Geometrical correction is disabled for the test and restored afterwards.
    pub fn digital_test(&mut self, mode: &str) -> Result<ImageFrame> {
        let previous = self.settings.geometrical_correction;
        if let Err(e) = self.set_geometrical_correction_flag(false) {
            self.settings.geometrical_correction = previous;
            return Err(e);
        }

        self.command.drain_nonblocking()?;
        self.command
            .send_command(&Command::new("DigitalTest").arg(mode))?;

        let frame = match self.read_one_image() {
            Ok(frame) => {
                let closing = self.command.recv_until_terminator(ACK_TERMINATOR)?;
                debug!(
                    "Digital test closing reply: {}",
                    String::from_utf8_lossy(&closing).trim()
                );
                Some(frame)
            }
            Err(e) if e.is_aborted() => None,
            Err(e) => return Err(e),
        };

        self.wait_for_idle();
        self.set_geometrical_correction_flag(previous)?;

        match frame {
            Some(frame) if !frame.is_empty() => Ok(frame),
            _ => Err(XpadError::DigitalTestFailed),
        }
    }

    /// Push the whole cached configuration in one command
    pub fn set_exposure_parameters(&mut self) -> Result<i64> {
        let s = &self.settings;
        let flag = |b: bool| if b { 1 } else { 0 };
        let command = Command::new("SetExposureParameters")
            .arg(s.image_count)
            .arg(s.exposure_time_us)
            .arg(s.waiting_time_us)
            .arg(s.overflow_time_us)
            .arg(s.input_signal)
            .arg(s.output_signal)
            .arg(flag(s.geometrical_correction))
            .arg(flag(s.flat_field_correction))
            .arg(flag(s.image_transfer))
            .arg(s.output_file_format)
            .arg(s.acquisition_mode)
            .arg(s.stack_count)
            .arg(&s.output_server_path);
        self.request_checked_int(&command)
    }

    // ------------------------------------------------------------------
    // Calibration procedures
    // ------------------------------------------------------------------

    fn calibration(&mut self, command: Command, label: &str) -> Result<i64> {
        info!("Calibration {} started", label);
        match self.request_int(&command)? {
            -1 => Err(XpadError::CalibrationFailed(label.to_string())),
            code => Ok(code),
        }
    }

    /// Over-the-noise calibration; returns 0 when done, 1 when aborted
    pub fn calibration_otn(&mut self, speed: CalibrationSpeed) -> Result<i64> {
        self.calibration(Command::new("CalibrationOTN").arg(speed), "OTN")
    }

    pub fn calibration_otn_pulse(&mut self, speed: CalibrationSpeed) -> Result<i64> {
        self.calibration(Command::new("CalibrationOTNPulse").arg(speed), "OTN Pulse")
    }

    pub fn calibration_beam(
        &mut self,
        exposure_time_us: u64,
        ithl_max: u32,
        speed: CalibrationSpeed,
    ) -> Result<i64> {
        let command = Command::new("CalibrationBEAM")
            .arg(exposure_time_us)
            .arg(ithl_max)
            .arg(speed);
        self.calibration(command, "Beam")
    }

    // ------------------------------------------------------------------
    // Global registers
    // ------------------------------------------------------------------

    pub fn load_config_g(&mut self, register: GlobalRegister, value: u32) -> Result<String> {
        self.request_value(&Command::new("LoadConfigG").arg(register).arg(value))
    }

    pub fn read_config_g(&mut self, register: GlobalRegister) -> Result<String> {
        self.request_value(&Command::new("ReadConfigG").arg(register))
    }

    pub fn ithl_increase(&mut self) -> Result<bool> {
        Ok(self.request_value(&Command::new("ITHLIncrease"))?.trim() == "0")
    }

    pub fn ithl_decrease(&mut self) -> Result<()> {
        self.expect_accepted(&Command::new("ITHLDecrease"))
    }

    pub fn load_flat_config_l(&mut self, value: u32) -> Result<()> {
        self.expect_zero(&Command::new("LoadFlatConfigL").arg(value))
    }

    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    pub fn get_burst_number(&mut self) -> Result<i64> {
        self.request_int(&Command::new("GetBurstNumber"))
    }

    pub fn get_image_number(&mut self) -> Result<i64> {
        self.request_checked_int(&Command::new("GetImageNumber"))
    }

    pub fn get_exposure_time(&mut self) -> Result<i64> {
        self.request_int(&Command::new("GetExposureTime"))
    }

    pub fn get_waiting_time_between_images(&mut self) -> Result<i64> {
        self.request_checked_int(&Command::new("GetWaitingTimeBetweenImages"))
    }

    pub fn get_geometrical_correction_flag(&mut self) -> Result<bool> {
        self.request_flag(&Command::new("GetGeometricalCorrectionFlag"))
    }

    pub fn get_flat_field_correction_flag(&mut self) -> Result<bool> {
        self.request_flag(&Command::new("GetFlatFieldCorrectionFlag"))
    }

    pub fn get_noisy_pixel_correction_flag(&mut self) -> Result<bool> {
        self.request_flag(&Command::new("GetNoisyPixelCorrectionFlag"))
    }

    pub fn get_dead_pixel_correction_flag(&mut self) -> Result<bool> {
        self.request_flag(&Command::new("GetDeadPixelCorrectionFlag"))
    }

    pub fn get_image_transfer_flag(&mut self) -> Result<bool> {
        self.request_flag(&Command::new("GetImageTransferFlag"))
    }

    /// `GetAcquisitionMode` carries the mode being asked about
    pub fn get_acquisition_mode(&mut self, mode: AcqMode) -> Result<String> {
        self.request_value(&Command::new("GetAcquisitionMode").arg(mode))
    }

    pub fn get_output_file_format(&mut self) -> Result<String> {
        self.request_value(&Command::new("GetOutputFileFormat"))
    }

    pub fn get_output_file_path(&mut self) -> Result<String> {
        self.request_value(&Command::new("GetOutputFilePath"))
    }

    pub fn get_input_signal(&mut self) -> Result<String> {
        self.request_value(&Command::new("GetInputSignal"))
    }

    pub fn get_output_signal(&mut self) -> Result<String> {
        self.request_value(&Command::new("GetOutputSignal"))
    }

    // ------------------------------------------------------------------
    // Setters
    // ------------------------------------------------------------------

    pub fn set_image_number(&mut self, count: u32) -> Result<()> {
        self.settings.image_count = count;
        self.expect_accepted(&Command::new("SetImageNumber").arg(count))
    }

    pub fn set_exposure_time(&mut self, time_us: u64) -> Result<()> {
        self.settings.exposure_time_us = time_us;
        self.expect_accepted(&Command::new("SetExposureTime").arg(time_us))
    }

    pub fn set_waiting_time_between_images(&mut self, time_us: u64) -> Result<()> {
        self.settings.waiting_time_us = time_us;
        self.expect_accepted(&Command::new("SetWaitingTimeBetweenImages").arg(time_us))
    }

    pub fn set_overflow_time(&mut self, time_us: u64) -> Result<()> {
        self.settings.overflow_time_us = time_us;
        self.expect_accepted(&Command::new("SetOverflowTime").arg(time_us))
    }

    pub fn set_geometrical_correction_flag(&mut self, enabled: bool) -> Result<()> {
        self.settings.geometrical_correction = enabled;
        self.expect_accepted(&Command::new("SetGeometricalCorrectionFlag").arg(enabled))
    }

    pub fn set_flat_field_correction_flag(&mut self, enabled: bool) -> Result<()> {
        self.settings.flat_field_correction = enabled;
        self.expect_accepted(&Command::new("SetFlatFieldCorrectionFlag").arg(enabled))
    }

    pub fn set_noisy_pixel_correction_flag(&mut self, enabled: bool) -> Result<()> {
        self.settings.noisy_pixel_correction = enabled;
        self.expect_accepted(&Command::new("SetNoisyPixelCorrectionFlag").arg(enabled))
    }

    pub fn set_dead_pixel_correction_flag(&mut self, enabled: bool) -> Result<()> {
        self.settings.dead_pixel_correction = enabled;
        self.expect_accepted(&Command::new("SetDeadPixelCorrectionFlag").arg(enabled))
    }

    pub fn set_image_transfer_flag(&mut self, enabled: bool) -> Result<()> {
        self.settings.image_transfer = enabled;
        self.expect_accepted(&Command::new("SetImageTransferFlag").arg(enabled))
    }

    pub fn set_acquisition_mode(&mut self, mode: AcqMode) -> Result<()> {
        self.settings.acquisition_mode = mode;
        self.expect_accepted(&Command::new("SetAcquisitionMode").arg(mode))
    }

    pub fn set_input_signal(&mut self, mode: TriggerMode) -> Result<()> {
        self.settings.input_signal = mode;
        self.expect_accepted(&Command::new("SetInputSignal").arg(mode))
    }

    pub fn set_output_signal(&mut self, signal: OutSignal) -> Result<()> {
        self.settings.output_signal = signal;
        self.expect_accepted(&Command::new("SetOutputSignal").arg(signal))
    }

    pub fn set_output_file_path(&mut self, path: &str) -> Result<()> {
        self.settings.output_server_path = path.to_string();
        self.expect_accepted(&Command::new("SetOutputFilePath").arg(path))
    }

    pub fn set_output_file_format(&mut self, format: i32) -> Result<()> {
        self.settings.output_file_format = format;
        self.expect_accepted(&Command::new("SetOutputFileFormat").arg(format))
    }

    // ------------------------------------------------------------------
    // White images
    // ------------------------------------------------------------------

    pub fn create_white_image(&mut self, name: &str) -> Result<()> {
        self.expect_accepted(&Command::new("CreateWhiteImage").arg(name))
    }

    pub fn set_white_image(&mut self, name: &str) -> Result<()> {
        self.expect_accepted(&Command::new("SetWhiteImage").arg(name))
    }

    /// Delete a white image; the server follows up with a second line
    pub fn delete_white_image(&mut self, name: &str) -> Result<()> {
        let command = Command::new("DeleteWhiteImage").arg(name);
        let value = self.request_value(&command)?;
        let follow_up = self.command.recv_until_terminator(ACK_TERMINATOR)?;
        let follow_up = String::from_utf8_lossy(&follow_up);
        if value.trim() == "0" {
            Ok(())
        } else {
            let reason = follow_up.split('.').next().unwrap_or_default().trim();
            Err(XpadError::rejected(command.name(), reason))
        }
    }

    /// White image listing, `None` when the directory is empty
    pub fn get_white_images_in_dir(&mut self) -> Result<Option<String>> {
        let value = self.request_value(&Command::new("GetWhiteImagesInDir"))?;
        if value == "Empty directory" {
            let closing = self.command.recv_ack()?;
            debug!("White image listing closed with {:?}", closing);
            Ok(None)
        } else {
            Ok(Some(value))
        }
    }

    // ------------------------------------------------------------------
    // Environment and identification
    // ------------------------------------------------------------------

    pub fn read_detector_temperature(&mut self) -> Result<String> {
        self.request_value(&Command::new("ReadDetectorTemperature"))
    }

    /// CTN temperatures as `(sensor, value)` pairs
    pub fn read_ctn_temperature(&mut self) -> Result<Vec<(String, String)>> {
        let value = self.request_value(&Command::new("readCtnTemperature"))?;
        Ok(parse_key_values(&value))
    }

    pub fn get_detector_information(&mut self, field: DetInformation) -> Result<String> {
        self.request_value(&Command::new("GetDetInformation").arg(field))
    }

    pub fn set_detector_information(&mut self, field: DetInformation, value: &str) -> Result<()> {
        self.expect_accepted(&Command::new("SetDetInformation").arg(field).arg(value))
    }

    /// Set the high-voltage DAC, then reset the detector to apply it
    pub fn set_dac_hv(&mut self, value: u32) -> Result<()> {
        self.expect_accepted(&Command::new("SetHvValue").arg(value))?;
        self.reset_detector()
    }
}

/// Split `name=value;name=value;` into pairs
fn parse_key_values(text: &str) -> Vec<(String, String)> {
    text.split(';')
        .filter_map(|segment| segment.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect()
}
