//! Calibration files: saving and restoring detector configuration.
//!
//! A calibration named `stem` lives in two files next to each other:
//! `stem.cfg` holds the global registers of every module as text lines
//! (`<module mask> <register code> <value> x7`), `stem.cfl` holds the
//! per-pixel configuration exactly as the server hands it out.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::ack::ACK_TERMINATOR;
use crate::codec::{self, Command, OK_REPLY};
use crate::error::{Result, XpadError};
use crate::session::DeviceSession;
use crate::transport::Transport;
use crate::types::GlobalRegister;

pub const GLOBAL_EXTENSION: &str = "cfg";
pub const LOCAL_EXTENSION: &str = "cfl";

/// Register value repeated once per chip on each `.cfg` line
const CHIPS_PER_MODULE: usize = 7;

/// `stem` with `.extension` appended, keeping any dots already in it
pub fn calibration_path(stem: &Path, extension: &str) -> PathBuf {
    let mut name = OsString::from(stem.as_os_str());
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

/// Turn a `ReadConfigG` reply into `.cfg` lines
///
/// The reply looks like `Module_0: 31; Module_1: 31;`. Text after the last
/// `;` is ignored.
pub fn format_global_register(reply: &str, nominal: u32) -> Result<Vec<String>> {
    let segments: Vec<&str> = reply.split(';').collect();
    if segments.len() == 1 {
        return Err(XpadError::CalibrationFailed(format!(
            "unexpected global register reply: {}",
            reply
        )));
    }

    let mut lines = Vec::with_capacity(segments.len() - 1);
    let mut index = 0;
    for segment in &segments[..segments.len() - 1] {
        let cleaned = segment.replace('_', " ").replace(':', "");
        let tokens: Vec<&str> = cleaned.split_whitespace().collect();

        // The "Module" position carries over to segments that lack it
        if let Some(pos) = tokens
            .iter()
            .take(tokens.len().saturating_sub(1))
            .position(|t| *t == "Module")
        {
            index = pos;
        }

        let bad_segment = || XpadError::invalid_value("ReadConfigG", segment.trim());
        let module: u32 = tokens
            .get(index + 1)
            .and_then(|t| t.parse().ok())
            .ok_or_else(bad_segment)?;
        let value = tokens.get(index + 2).ok_or_else(bad_segment)?;
        let mask = 1u64.checked_shl(module).ok_or_else(bad_segment)?;

        let mut line = format!("{} {}", mask, nominal);
        for _ in 0..CHIPS_PER_MODULE {
            line.push(' ');
            line.push_str(value);
        }
        lines.push(line);
    }
    Ok(lines)
}

impl<T: Transport> DeviceSession<T> {
    /// Write every global register to `stem.cfg`
    ///
    /// The file is only created once all registers were read.
    pub fn save_config_g(&mut self, stem: &Path) -> Result<PathBuf> {
        let mut contents = String::new();
        for register in GlobalRegister::ALL.iter().copied() {
            let reply =
                self.request_value(&Command::new("ReadConfigG").arg(register.read_name()))?;
            let lines = format_global_register(&reply, register.nominal_value()).map_err(|e| {
                match e {
                    XpadError::CalibrationFailed(_) => XpadError::CalibrationFailed(format!(
                        "read global register {}",
                        register
                    )),
                    other => other,
                }
            })?;
            for line in lines {
                contents.push_str(&line);
                contents.push('\n');
            }
        }

        let path = calibration_path(stem, GLOBAL_EXTENSION);
        fs::write(&path, contents)?;
        debug!("Global configuration written to {}", path.display());
        Ok(path)
    }

    /// Download the per-pixel configuration into `stem.cfl`
    pub fn save_config_l(&mut self, stem: &Path) -> Result<PathBuf> {
        let channel = self.command_channel();
        channel.drain_nonblocking()?;
        channel.send_command(&Command::new("ReadConfigL"))?;

        let data_size = channel.read_i32_le()?;
        let file_size = channel.read_i32_le()?;
        let len = usize::try_from(file_size)
            .map_err(|_| XpadError::invalid_value("ReadConfigL", file_size.to_string()))?;
        debug!("Local configuration: data size {}, file size {}", data_size, len);
        let contents = channel.read_exactly(len)?;
        channel.send(OK_REPLY)?;

        let path = calibration_path(stem, LOCAL_EXTENSION);
        fs::write(&path, &contents)?;

        if channel.recv_ack()?.int_value("ReadConfigL")? == -1 {
            return Err(XpadError::CalibrationFailed(format!(
                "save local configuration {}",
                path.display()
            )));
        }
        debug!("Local configuration written to {}", path.display());
        Ok(path)
    }

    /// Save `stem.cfg` then `stem.cfl`
    pub fn save_calibration(&mut self, stem: &Path) -> Result<()> {
        self.save_config_g(stem)?;
        self.save_config_l(stem)?;
        info!("Calibration saved as {}", stem.display());
        Ok(())
    }

    fn push_configuration_file(&mut self, path: &Path, command: &str) -> Result<()> {
        if !path.is_file() {
            return Err(XpadError::CalibrationFileMissing(path.to_path_buf()));
        }
        let contents = fs::read(path)?;
        let blob = codec::encode_length_prefixed_blob(&contents)?;

        let channel = self.command_channel();
        channel.drain_nonblocking()?;
        channel.send_command(&Command::new(command))?;
        channel.send(&blob)?;
        debug!("Pushed {} bytes from {}", contents.len(), path.display());
        Ok(())
    }

    /// Upload `stem.cfg`; returns the server's status code
    pub fn load_global_configuration(&mut self, stem: &Path) -> Result<i64> {
        let path = calibration_path(stem, GLOBAL_EXTENSION);
        self.push_configuration_file(&path, "LoadConfigGFromFile")?;

        match self.command_channel().recv_ack()?.int_value("LoadConfigGFromFile")? {
            -1 => Err(XpadError::CalibrationFailed(format!(
                "load global configuration {}",
                path.display()
            ))),
            code => Ok(code),
        }
    }

    /// Upload `stem.cfl`; returns the server's status code
    ///
    /// The server sends a progress reply before the final acknowledgement.
    pub fn load_local_configuration(&mut self, stem: &Path) -> Result<i64> {
        let path = calibration_path(stem, LOCAL_EXTENSION);
        self.push_configuration_file(&path, "LoadConfigLFromFile")?;

        let channel = self.command_channel();
        let progress = channel.recv_until_terminator(ACK_TERMINATOR)?;
        debug!(
            "Local configuration progress: {}",
            String::from_utf8_lossy(&progress).trim()
        );

        match channel.recv_ack()?.int_value("LoadConfigLFromFile")? {
            -1 => Err(XpadError::CalibrationFailed(format!(
                "load local configuration {}",
                path.display()
            ))),
            code => Ok(code),
        }
    }

    /// Upload a whole calibration
    ///
    /// The local configuration is only pushed when the global one was
    /// accepted with code 0. Returns whether both legs were loaded.
    pub fn load_calibration(&mut self, stem: &Path) -> Result<bool> {
        let global = self.load_global_configuration(stem)?;
        if global != 0 {
            warn!(
                "Global configuration returned {}, local configuration not loaded",
                global
            );
            return Ok(false);
        }
        self.load_local_configuration(stem)?;
        info!("Calibration {} loaded", stem.display());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::session;
    use crate::transport::mock::MockTransport;

    #[test]
    fn test_calibration_path() {
        assert_eq!(
            calibration_path(Path::new("Calib/run.v2"), GLOBAL_EXTENSION),
            PathBuf::from("Calib/run.v2.cfg")
        );
        assert_eq!(
            calibration_path(Path::new("otn"), LOCAL_EXTENSION),
            PathBuf::from("otn.cfl")
        );
    }

    #[test]
    fn test_format_global_register() {
        let lines = format_global_register("Module_0: 31; Module_1: 31;", 31).unwrap();
        assert_eq!(
            lines,
            vec!["1 31 31 31 31 31 31 31 31", "2 31 31 31 31 31 31 31 31"]
        );

        let lines = format_global_register("Module_3: 120;", 62).unwrap();
        assert_eq!(lines, vec!["8 62 120 120 120 120 120 120 120"]);
    }

    #[test]
    fn test_format_global_register_rejects_bad_replies() {
        assert!(matches!(
            format_global_register("no separator", 31),
            Err(XpadError::CalibrationFailed(_))
        ));
        assert!(matches!(
            format_global_register("Module_x: 3;", 31),
            Err(XpadError::InvalidValue { .. })
        ));
        assert!(format_global_register("Module_0:;", 31).is_err());
    }

    #[test]
    fn test_save_config_g() {
        let dir = tempfile::tempdir().unwrap();
        let mut command = MockTransport::new();
        for _ in GlobalRegister::ALL {
            command = command.reply("* \"Module_0: 10; Module_1: 11;\">");
        }
        let mut xpad = session(&command, &MockTransport::new());

        let path = xpad.save_config_g(&dir.path().join("run")).unwrap();
        assert_eq!(path, dir.path().join("run.cfg"));

        let written = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = written.lines().collect();
        assert_eq!(lines.len(), 14);
        assert_eq!(lines[0], "1 31 10 10 10 10 10 10 10");
        assert_eq!(lines[1], "2 31 11 11 11 11 11 11 11");
        assert_eq!(lines[13], "2 64 11 11 11 11 11 11 11");
        assert_eq!(
            command.sent_lines(),
            vec![
                "ReadConfigG AMPTP",
                "ReadConfigG IMFP",
                "ReadConfigG IOTA",
                "ReadConfigG IPRE",
                "ReadConfigG ITHL",
                "ReadConfigG ITUNE",
                "ReadConfigG IBUFF",
            ]
        );
    }

    #[test]
    fn test_save_config_g_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let command = MockTransport::new()
            .reply("* \"Module_0: 10;\">")
            .reply("* \"garbled\">");
        let mut xpad = session(&command, &MockTransport::new());

        let err = xpad.save_config_g(&dir.path().join("run")).unwrap_err();
        match err {
            XpadError::CalibrationFailed(msg) => assert!(msg.contains("IMFP")),
            other => panic!("expected calibration failure, got {:?}", other),
        }
        assert!(!dir.path().join("run.cfg").exists());
    }

    #[test]
    fn test_save_config_l() {
        let dir = tempfile::tempdir().unwrap();
        let contents = b"0 0 12 12 12\n1 0 12 12 12\n";
        let mut reply = Vec::new();
        reply.extend_from_slice(&(contents.len() as i32 * 2).to_le_bytes());
        reply.extend_from_slice(&(contents.len() as i32).to_le_bytes());
        reply.extend_from_slice(contents);

        let command = MockTransport::new().reply(reply).reply("* 0>");
        let mut xpad = session(&command, &MockTransport::new());

        let path = xpad.save_config_l(&dir.path().join("run")).unwrap();
        assert_eq!(fs::read(&path).unwrap(), contents);
        assert_eq!(command.sent_lines(), vec!["ReadConfigL", "OK"]);
    }

    #[test]
    fn test_save_config_l_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut reply = Vec::new();
        reply.extend_from_slice(&2i32.to_le_bytes());
        reply.extend_from_slice(&1i32.to_le_bytes());
        reply.push(b'x');

        let command = MockTransport::new().reply(reply).reply("* -1>");
        let mut xpad = session(&command, &MockTransport::new());

        assert!(matches!(
            xpad.save_config_l(&dir.path().join("run")),
            Err(XpadError::CalibrationFailed(_))
        ));
    }

    #[test]
    fn test_load_local_configuration_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("run");
        fs::write(calibration_path(&stem, LOCAL_EXTENSION), "l").unwrap();

        let command = MockTransport::new().reply("").reply("* 1>* -1>");
        let mut xpad = session(&command, &MockTransport::new());

        assert!(matches!(
            xpad.load_local_configuration(&stem),
            Err(XpadError::CalibrationFailed(_))
        ));
        assert_eq!(command.sent_lines()[0], "LoadConfigLFromFile");
    }

    #[test]
    fn test_load_global_configuration_pushes_blob() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("run");
        fs::write(calibration_path(&stem, GLOBAL_EXTENSION), "1 31 10 10 10 10 10 10 10\n").unwrap();

        let command = MockTransport::new().reply("").reply("* 0>");
        let mut xpad = session(&command, &MockTransport::new());

        assert_eq!(xpad.load_global_configuration(&stem).unwrap(), 0);
        let writes = command.writes();
        assert_eq!(writes[0], b"LoadConfigGFromFile\n");
        assert_eq!(&writes[1][..4], &26i32.to_le_bytes());
        assert_eq!(&writes[1][4..], b"1 31 10 10 10 10 10 10 10\n");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let command = MockTransport::new();
        let mut xpad = session(&command, &MockTransport::new());

        match xpad.load_calibration(&dir.path().join("absent")) {
            Err(XpadError::CalibrationFileMissing(path)) => {
                assert_eq!(path, dir.path().join("absent.cfg"))
            }
            other => panic!("expected missing file, got {:?}", other),
        }
        // Nothing is sent for a missing file
        assert!(command.writes().is_empty());
    }

    #[test]
    fn test_load_calibration_both_legs() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("run");
        fs::write(calibration_path(&stem, GLOBAL_EXTENSION), "g").unwrap();
        fs::write(calibration_path(&stem, LOCAL_EXTENSION), "l").unwrap();

        let command = MockTransport::new()
            .reply("")
            .reply("* 0>")
            .reply("")
            .reply("* 1>* 0>");
        let mut xpad = session(&command, &MockTransport::new());

        assert!(xpad.load_calibration(&stem).unwrap());
        assert_eq!(
            command.sent_lines(),
            vec![
                "LoadConfigGFromFile",
                "\u{1}\0\0\0g",
                "LoadConfigLFromFile",
                "\u{1}\0\0\0l",
            ]
        );
    }

    #[test]
    fn test_load_calibration_skips_local_after_global_failure() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("run");
        fs::write(calibration_path(&stem, GLOBAL_EXTENSION), "g").unwrap();
        fs::write(calibration_path(&stem, LOCAL_EXTENSION), "l").unwrap();

        let command = MockTransport::new().reply("").reply("* 1>");
        let mut xpad = session(&command, &MockTransport::new());

        assert!(!xpad.load_calibration(&stem).unwrap());
        assert_eq!(command.writes().len(), 2);
    }
}
