/*!
Symbolic values exchanged with the detector server.

Each enumeration maps one-to-one onto the literal strings the server expects
as command arguments or sends back in acknowledgements. Values are validated
only by the server; the client just guarantees the spelling.
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::XpadError;

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident => $wire:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $( $(#[$vmeta])* #[serde(rename = $wire)] $variant ),+
        }

        impl $name {
            /// Every value, in protocol order
            pub const ALL: &'static [$name] = &[ $( $name::$variant ),+ ];

            /// Literal used on the wire
            pub fn as_str(self) -> &'static str {
                match self {
                    $( $name::$variant => $wire ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = XpadError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $name::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
                    .ok_or_else(|| XpadError::invalid_value(stringify!($name), s))
            }
        }
    };
}

wire_enum! {
    /// Acquisition mode
    AcqMode {
        Standard => "standard",
        DetectorBurst => "detector_burst",
        ComputerBurst => "computer_burst",
        Stacking16Bits => "stacking_16_bits",
        Stacking32Bits => "stacking_32_bits",
        SingleBunch16Bits => "single_bunch_16_bits",
        SingleBunch32Bits => "single_bunch_32_bits",
    }
}

wire_enum! {
    /// Input signal selector (trigger mode)
    TriggerMode {
        Internal => "internal",
        ExternalTriggerSingle => "external_trigger_single",
        ExternalTriggerMultiple => "external_trigger_multiple",
        /// Also used for external gating
        ExternalStackTrigger => "external_stack_trigger",
    }
}

wire_enum! {
    /// Signal routed to the detector's output connector
    OutSignal {
        ExposureBusy => "ExposureBusy",
        ShutterBusy => "shutter_busy",
        BusyUpdateOverflow => "busy_update_overflow",
        PixelCounterEnabled => "pixel_counter_enabled",
        ExternalGate => "external_gate",
        ExposureReadDone => "exposure_read_done",
        DataTransfer => "data_transfer",
        RamReadyImageBusy => "RAM_ready_image_busy",
        XpadToLocalDdr => "XPAD_to_Local-DDR",
        LocalDdrToPc => "Local-DDR_to_PC",
    }
}

wire_enum! {
    /// Calibration speed of the preamplifier scan
    CalibrationSpeed {
        Slow => "0",
        Medium => "1",
        Fast => "2",
    }
}

wire_enum! {
    /// Global (per-module) configuration register
    GlobalRegister {
        Amptp => "AMPTP",
        Imfp => "IMFP",
        Itoa => "ITOA",
        Ipre => "IPRE",
        Ithl => "ITHL",
        Itune => "ITUNE",
        Ibuff => "IBUFF",
    }
}

wire_enum! {
    /// Detector identification fields
    DetInformation {
        SerialNumber => "serialNumber",
        PartId => "partid",
        HvConsigne => "HVConsigne",
        DacHv => "DacHV",
    }
}

impl GlobalRegister {
    /// Register code written as the second field of each `.cfg` line
    pub fn nominal_value(self) -> u32 {
        match self {
            Self::Amptp => 31,
            Self::Imfp => 59,
            Self::Itoa => 60,
            Self::Ipre => 61,
            Self::Ithl => 62,
            Self::Itune => 63,
            Self::Ibuff => 64,
        }
    }

    /// Name queried by `ReadConfigG` when dumping the registers to a `.cfg` file
    ///
    /// The dump reads the third register back as `IOTA`.
    pub fn read_name(self) -> &'static str {
        match self {
            Self::Itoa => "IOTA",
            other => other.as_str(),
        }
    }
}

/// Detector state as reported by `GetDetectorStatus`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorStatus {
    Idle,
    Acquiring,
    LoadingSavingCalibration,
    Calibrating,
    DigitalTest,
    Resetting,
    /// A status string this client does not know
    Unknown(String),
    /// Status could not be read at all
    Unavailable,
}

impl DetectorStatus {
    /// Sentinel shown when the status query itself failed
    pub const UNAVAILABLE: &'static str = "ERROR STATUS";

    /// Decode the acknowledgement payload of a status query
    pub fn from_wire(payload: &str) -> Self {
        match payload.trim() {
            "Idle." => Self::Idle,
            "Acquiring." => Self::Acquiring,
            "Loading/Saving_calibration." => Self::LoadingSavingCalibration,
            "Calibrating." => Self::Calibrating,
            "Digital_Test." => Self::DigitalTest,
            "Resetting" | "Resetting." => Self::Resetting,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Idle => "Idle.",
            Self::Acquiring => "Acquiring.",
            Self::LoadingSavingCalibration => "Loading/Saving_calibration.",
            Self::Calibrating => "Calibrating.",
            Self::DigitalTest => "Digital_Test.",
            Self::Resetting => "Resetting",
            Self::Unknown(s) => s,
            Self::Unavailable => Self::UNAVAILABLE,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for DetectorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_spelling() {
        assert_eq!(AcqMode::Stacking16Bits.as_str(), "stacking_16_bits");
        assert_eq!(TriggerMode::ExternalTriggerMultiple.to_string(), "external_trigger_multiple");
        assert_eq!(OutSignal::XpadToLocalDdr.as_str(), "XPAD_to_Local-DDR");
        assert_eq!(CalibrationSpeed::Fast.to_string(), "2");
        assert_eq!(OutSignal::ALL.len(), 10);
        assert_eq!(AcqMode::ALL.len(), 7);
    }

    #[test]
    fn test_from_str() {
        assert_eq!("detector_burst".parse::<AcqMode>().unwrap(), AcqMode::DetectorBurst);
        assert_eq!("exposurebusy".parse::<OutSignal>().unwrap(), OutSignal::ExposureBusy);
        assert_eq!("1".parse::<CalibrationSpeed>().unwrap(), CalibrationSpeed::Medium);
        assert!("turbo".parse::<AcqMode>().is_err());
    }

    #[test]
    fn test_global_register_table() {
        let table: Vec<_> = GlobalRegister::ALL
            .iter()
            .map(|r| (r.as_str(), r.nominal_value()))
            .collect();
        assert_eq!(
            table,
            vec![
                ("AMPTP", 31),
                ("IMFP", 59),
                ("ITOA", 60),
                ("IPRE", 61),
                ("ITHL", 62),
                ("ITUNE", 63),
                ("IBUFF", 64),
            ]
        );

        let read_names: Vec<_> = GlobalRegister::ALL.iter().map(|r| r.read_name()).collect();
        assert_eq!(
            read_names,
            vec!["AMPTP", "IMFP", "IOTA", "IPRE", "ITHL", "ITUNE", "IBUFF"]
        );
    }

    #[test]
    fn test_detector_status() {
        assert!(DetectorStatus::from_wire("Idle.").is_idle());
        assert_eq!(DetectorStatus::from_wire(" Acquiring. "), DetectorStatus::Acquiring);
        assert_eq!(DetectorStatus::from_wire("Resetting"), DetectorStatus::Resetting);
        assert_eq!(
            DetectorStatus::from_wire("Warming_up."),
            DetectorStatus::Unknown("Warming_up.".to_string())
        );
        assert_eq!(DetectorStatus::Unavailable.to_string(), "ERROR STATUS");
        assert_eq!(DetectorStatus::LoadingSavingCalibration.as_str(), "Loading/Saving_calibration.");
    }
}
