use embedded_hal::digital::{Error, ErrorKind, ErrorType, OutputPin};
use serde::{Deserialize, Serialize};
use std::{
    ffi::OsStr,
    fmt, fs, io,
    path::{Path, PathBuf},
};
use strum_macros::IntoStaticStr;
use uuid::Uuid;

/// Configuration for the stage lamp bank. The GPIO line numbers are
/// fixed by the rig wiring harness; the indicator lamp is the blue
/// status LED visible through the incubator window.
#[derive(Deserialize, Serialize, PartialEq, Eq, Debug)]
pub struct LightBankConfig {
    /// GPIO line driving the brightfield lamp.
    brightfield_line: u32,
    /// GPIO line driving the darkfield ring lamp.
    darkfield_line: u32,
    /// GPIO line driving the indicator lamp.
    indicator_line: u32,
}

impl LightBankConfig {
    /// Lamp bank configuration from explicit line numbers.
    pub fn new(brightfield_line: u32, darkfield_line: u32, indicator_line: u32) -> Self {
        Self {
            brightfield_line,
            darkfield_line,
            indicator_line,
        }
    }

    /// Build the config by reading a file, this is a helper function.
    ///
    /// * `filepath`: path to config.
    pub fn from_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        let file = Path::new(&filepath);
        if file.is_file() {
            let config_file = config::Config::builder()
                .add_source(config::File::new(
                    &file.to_string_lossy(),
                    config::FileFormat::Yaml,
                ))
                .build()
                .expect("Failed read config");

            config_file
                .try_deserialize::<LightBankConfig>()
                .expect("Failed to parse config file into struct")
        } else {
            panic!("Could not locate the config file {:?}", file);
        }
    }
}

/// One lamp action performed on an illumination phase change. Each
/// transition of the sequence maps to exactly one of these.
#[derive(IntoStaticStr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum LampSwitch {
    /// Switch the brightfield lamp on.
    BrightfieldOn,
    /// Switch the brightfield lamp off.
    BrightfieldOff,
    /// Switch the darkfield ring on.
    DarkfieldOn,
    /// Switch the darkfield ring off.
    DarkfieldOff,
}

/// The three stage lamps behind one device seam. Generic over the pin
/// implementation so the sequence logic can be exercised against
/// recording pins while the deployed rig drives sysfs lines.
pub struct LightBank<P: OutputPin> {
    /// Unique identifier, helpful for trouble shooting and logging.
    uuid: Uuid,
    /// Brightfield lamp output.
    brightfield: P,
    /// Darkfield ring output.
    darkfield: P,
    /// Indicator lamp output.
    indicator: P,
}

impl<P: OutputPin> LightBank<P> {
    /// Assemble a bank from already constructed pins.
    pub fn new(brightfield: P, darkfield: P, indicator: P) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            brightfield,
            darkfield,
            indicator,
        }
    }

    /// Return the unique identifier of the lamp bank.
    pub fn get_uuid(&self) -> Uuid {
        self.uuid
    }

    /// Perform one lamp action.
    pub fn apply(&mut self, switch: LampSwitch) -> Result<(), P::Error> {
        match switch {
            LampSwitch::BrightfieldOn => self.brightfield.set_high(),
            LampSwitch::BrightfieldOff => self.brightfield.set_low(),
            LampSwitch::DarkfieldOn => self.darkfield.set_high(),
            LampSwitch::DarkfieldOff => self.darkfield.set_low(),
        }
    }

    /// Drive every lamp on, indicator included. Used while the operator
    /// mounts the specimen.
    pub fn all_lamps_on(&mut self) -> Result<(), P::Error> {
        self.brightfield.set_high()?;
        self.darkfield.set_high()?;
        self.indicator.set_high()
    }

    /// Drive every lamp off, indicator included.
    pub fn all_lamps_off(&mut self) -> Result<(), P::Error> {
        self.brightfield.set_low()?;
        self.darkfield.set_low()?;
        self.indicator.set_low()
    }

    /// Drive only the indicator lamp.
    pub fn set_indicator(&mut self, on: bool) -> Result<(), P::Error> {
        if on {
            self.indicator.set_high()
        } else {
            self.indicator.set_low()
        }
    }
}

impl LightBank<SysfsGpio> {
    /// Generate a new lamp bank by consuming a config.
    ///
    /// * `config`: `LightBankConfig`
    pub fn from_config(config: LightBankConfig) -> Self {
        Self::new(
            SysfsGpio::export(config.brightfield_line).expect("Failed to export brightfield line"),
            SysfsGpio::export(config.darkfield_line).expect("Failed to export darkfield line"),
            SysfsGpio::export(config.indicator_line).expect("Failed to export indicator line"),
        )
    }

    /// Generate a new lamp bank by consuming the config stored
    /// in a file.
    ///
    /// * `filepath`: filepath to a config.
    pub fn from_config_file<F: AsRef<OsStr>>(filepath: F) -> Self {
        Self::from_config(LightBankConfig::from_file(filepath))
    }
}

/// Error raised when a sysfs line cannot be exported or written.
#[derive(Debug)]
pub struct GpioError {
    /// GPIO line the failure occurred on.
    line: u32,
    /// Underlying filesystem error.
    source: io::Error,
}

impl fmt::Display for GpioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gpio line {} failed: {}", self.line, self.source)
    }
}

impl std::error::Error for GpioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

impl Error for GpioError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// An output line driven through the kernel sysfs GPIO interface. The
/// rig's single board computer exposes the lamp relays this way, so no
/// vendor driver is needed beyond the filesystem.
pub struct SysfsGpio {
    /// GPIO line number as the kernel counts them.
    line: u32,
    /// Cached `/sys/class/gpio/gpioN/value` path.
    value_path: PathBuf,
}

impl SysfsGpio {
    /// Export a line and set it as an output. Exporting an already
    /// exported line is not an error; the rig may have been restarted
    /// without a power cycle.
    pub fn export(line: u32) -> Result<Self, GpioError> {
        let base = Path::new("/sys/class/gpio");
        let line_dir = base.join(format!("gpio{line}"));
        if !line_dir.exists() {
            fs::write(base.join("export"), line.to_string())
                .map_err(|source| GpioError { line, source })?;
        }
        fs::write(line_dir.join("direction"), "out")
            .map_err(|source| GpioError { line, source })?;
        Ok(Self {
            line,
            value_path: line_dir.join("value"),
        })
    }

    fn write_value(&mut self, value: &str) -> Result<(), GpioError> {
        fs::write(&self.value_path, value).map_err(|source| GpioError {
            line: self.line,
            source,
        })
    }
}

impl ErrorType for SysfsGpio {
    type Error = GpioError;
}

impl OutputPin for SysfsGpio {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.write_value("0")
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.write_value("1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::convert::Infallible;
    use std::fs::OpenOptions;

    /// Pin that records every level written to it.
    #[derive(Default)]
    struct RecordingPin {
        level: bool,
        writes: Vec<bool>,
    }

    impl ErrorType for RecordingPin {
        type Error = Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.level = false;
            self.writes.push(false);
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.level = true;
            self.writes.push(true);
            Ok(())
        }
    }

    fn recording_bank() -> LightBank<RecordingPin> {
        LightBank::new(
            RecordingPin::default(),
            RecordingPin::default(),
            RecordingPin::default(),
        )
    }

    #[test]
    fn test_each_switch_drives_only_its_lamp() {
        let mut bank = recording_bank();

        bank.apply(LampSwitch::BrightfieldOn).unwrap();
        assert!(bank.brightfield.level);
        assert!(bank.darkfield.writes.is_empty());
        assert!(bank.indicator.writes.is_empty());

        bank.apply(LampSwitch::BrightfieldOff).unwrap();
        bank.apply(LampSwitch::DarkfieldOn).unwrap();
        assert!(!bank.brightfield.level);
        assert!(bank.darkfield.level);

        bank.apply(LampSwitch::DarkfieldOff).unwrap();
        assert_eq!(bank.brightfield.writes, vec![true, false]);
        assert_eq!(bank.darkfield.writes, vec![true, false]);
        assert!(bank.indicator.writes.is_empty());
    }

    #[test]
    fn test_mounting_drive_reaches_all_lamps() {
        let mut bank = recording_bank();

        bank.all_lamps_on().unwrap();
        assert!(bank.brightfield.level && bank.darkfield.level && bank.indicator.level);

        bank.all_lamps_off().unwrap();
        assert!(!bank.brightfield.level && !bank.darkfield.level && !bank.indicator.level);

        bank.set_indicator(true).unwrap();
        assert!(bank.indicator.level);
        assert!(!bank.brightfield.level);
    }

    #[test]
    #[serial]
    fn test_write_device_config_to_file() {
        let config = LightBankConfig::new(4, 2, 17);

        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .open(Path::new(&format!(
                "{}/config/devices/microscope/light_bank.yaml",
                env!("CARGO_MANIFEST_DIR")
            )))
            .expect("Faile to open file");
        serde_yaml::to_writer(file, &config).expect("Failed to write yaml");

        let read_config = LightBankConfig::from_file(Path::new(&format!(
            "{}/config/devices/microscope/light_bank.yaml",
            env!("CARGO_MANIFEST_DIR")
        )));
        assert_eq!(config, read_config, "Failed to read write bank config");
    }
}
