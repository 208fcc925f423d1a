/*!
Interactive numbered menu.

Every choice except exit and abort is refused while the detector is busy.
*/

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use xpad::{CalibrationSpeed, DeviceSession};

use crate::actions::{self, Calibration};
use crate::config::AppConfig;
use crate::exposure::AbortSwitch;

const MENU: &str = "
**********************************
******        MENU          ******
**********************************

    1. Detector status
    2. Ask Ready
    3. Digital Test
    4. Calibration OTN
    5. Calibration OTN Pulse
    6. Calibration Beam
    7. Reset Detector
    8. Expose parameters
    9. Start exposure
    10.Save Calibration
    11.Load Calibration
    12.Abort Current Process
    13.Help
    14.Async Exposure
    15.Read CTN
    0. Exit/Quit
";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Exit,
    Status,
    AskReady,
    DigitalTest,
    CalibrationOtn,
    CalibrationOtnPulse,
    CalibrationBeam,
    Reset,
    ExposeParameters,
    Expose,
    SaveCalibration,
    LoadCalibration,
    Abort,
    Help,
    AsyncExpose,
    ReadCtn,
}

impl MenuChoice {
    /// Choices allowed while the detector is busy
    pub fn allowed_when_busy(self) -> bool {
        matches!(self, Self::Exit | Self::Abort)
    }
}

impl FromStr for MenuChoice {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let choice = match s.trim() {
            "0" => Self::Exit,
            "1" => Self::Status,
            "2" => Self::AskReady,
            "3" => Self::DigitalTest,
            "4" => Self::CalibrationOtn,
            "5" => Self::CalibrationOtnPulse,
            "6" => Self::CalibrationBeam,
            "7" => Self::Reset,
            "8" => Self::ExposeParameters,
            "9" => Self::Expose,
            "10" => Self::SaveCalibration,
            "11" => Self::LoadCalibration,
            "12" => Self::Abort,
            "13" => Self::Help,
            "14" => Self::AsyncExpose,
            "15" => Self::ReadCtn,
            other => bail!("Not a menu choice: {:?}", other),
        };
        Ok(choice)
    }
}

/// Ask a question and read one trimmed answer; `None` at end of input
pub fn prompt<R: BufRead>(input: &mut R, question: &str) -> Result<Option<String>> {
    print!("{}", question);
    io::stdout().flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

fn prompt_parsed<R, T>(input: &mut R, question: &str) -> Result<Option<T>>
where
    R: BufRead,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match prompt(input, question)? {
        Some(answer) => answer
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid answer {:?}", answer)),
        None => Ok(None),
    }
}

/// Menu loop over one connected session
pub struct Menu<'a> {
    session: &'a mut DeviceSession,
    config: &'a AppConfig,
    abort: &'a AbortSwitch,
}

impl<'a> Menu<'a> {
    pub fn new(session: &'a mut DeviceSession, config: &'a AppConfig, abort: &'a AbortSwitch) -> Self {
        Self {
            session,
            config,
            abort,
        }
    }

    /// Run until the user exits or the input ends
    pub fn run<R: BufRead>(&mut self, input: &mut R) -> Result<()> {
        loop {
            println!("{}", MENU);
            let Some(answer) = prompt(input, "What would you like to do ?  ")? else {
                return Ok(());
            };
            let choice = match answer.parse::<MenuChoice>() {
                Ok(choice) => choice,
                Err(_) => {
                    println!("\n Not Valid Choice Try again");
                    continue;
                }
            };

            let status = self.session.get_detector_status();
            if !status.is_idle() && !choice.allowed_when_busy() {
                println!("\nDetector BUSY !!!");
                println!("Status is : {} !!!", status);
                println!("Try later or Abort current process.");
                continue;
            }

            if choice == MenuChoice::Exit {
                println!("\n Goodbye");
                return Ok(());
            }

            if let Err(e) = self.dispatch(choice, input) {
                // Transport faults are fatal for the session
                if let Some(xpad_error) = e.downcast_ref::<xpad::XpadError>() {
                    if xpad_error.is_connection() {
                        return Err(e);
                    }
                }
                println!("❌ {:#}", e);
            }
        }
    }

    fn dispatch<R: BufRead>(&mut self, choice: MenuChoice, input: &mut R) -> Result<()> {
        let session = &mut *self.session;
        match choice {
            MenuChoice::Exit => {}
            MenuChoice::Status => actions::status(session),
            MenuChoice::AskReady => actions::ask_ready(session)?,
            MenuChoice::DigitalTest => actions::digital_test(session, self.config, "gradient")?,
            MenuChoice::CalibrationOtn => {
                actions::calibrate(session, self.abort, Calibration::Otn(CalibrationSpeed::Slow))?
            }
            MenuChoice::CalibrationOtnPulse => actions::calibrate(
                session,
                self.abort,
                Calibration::OtnPulse(CalibrationSpeed::Slow),
            )?,
            MenuChoice::CalibrationBeam => {
                let Some(exposure_us) =
                    prompt_parsed(input, "What would you like expose time in us  = ")?
                else {
                    return Ok(());
                };
                let Some(ithl_max) =
                    prompt_parsed(input, "What would you like th max max value 100 = ")?
                else {
                    return Ok(());
                };
                let speed = match prompt(input, "What would you like speed of preamp (default 1) : ")? {
                    Some(answer) if !answer.is_empty() => answer.parse::<CalibrationSpeed>()?,
                    _ => CalibrationSpeed::Medium,
                };
                actions::calibrate(
                    session,
                    self.abort,
                    Calibration::Beam {
                        exposure_us,
                        ithl_max,
                        speed,
                    },
                )?
            }
            MenuChoice::Reset => actions::reset(session)?,
            MenuChoice::ExposeParameters => {
                let exposure_us = prompt_parsed(input, "What would you like expose time in us  = ")?;
                let images = prompt_parsed(input, "What would you like Numbers of images = ")?;
                actions::set_exposure_parameters(session, exposure_us, images)?
            }
            MenuChoice::Expose => actions::expose(session, self.config, self.abort, false)?,
            MenuChoice::SaveCalibration => {
                if let Some(name) = prompt(input, "What would you like Calibration name : ")? {
                    actions::save_calibration(session, self.config, &name)?
                }
            }
            MenuChoice::LoadCalibration => {
                if let Some(name) = prompt(input, "What would you like Load Calibration name : ")? {
                    actions::load_calibration(session, self.config, &name)?
                }
            }
            MenuChoice::Abort => actions::abort(session)?,
            MenuChoice::Help => print_help(),
            MenuChoice::AsyncExpose => actions::expose(session, self.config, self.abort, true)?,
            MenuChoice::ReadCtn => actions::read_ctn(session)?,
        }
        Ok(())
    }
}

fn print_help() {
    println!("\n\nHelp menu : ");
    println!("For more information see the XPAD server documentation.");
    println!("Every choice except 0 and 12 needs an idle detector.");
}
