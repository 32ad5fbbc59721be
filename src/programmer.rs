//! Programming boards through avrdude

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};

use log::{debug, info};
use thiserror::Error;

/// The programmer executable used when none is configured
pub const DEFAULT_PROGRAMMER: &str = "avrdude";

/// Fuse settings of the SYZYGY AVR - internal 8MHz oscillator, brown-out detection at 2.7V
const FUSES: [&str; 3] = ["efuse:w:0xFE:m", "hfuse:w:0xDD:m", "lfuse:w:0xE2:m"];

/// The ISP bit clock period, fuses have to be written slowly on an unconfigured part
const FUSE_BIT_CLOCK: &str = "20";
const PROGRAM_BIT_CLOCK: &str = "1";

/// Connection settings passed to the programmer
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProgrammerSettings {
    /// The AVR part number
    pub part: String,
    /// The programmer hardware type
    pub programmer: String,
    pub port: String,
}

impl Default for ProgrammerSettings {
    fn default() -> ProgrammerSettings {
        ProgrammerSettings {
            part: "t44".to_owned(),
            programmer: "atmelice_isp".to_owned(),
            port: "usb".to_owned(),
        }
    }
}

/// One programmer invocation
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Stage {
    Fuses,
    Flash(PathBuf),
    Eeprom(PathBuf),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Fuses => "fuse bits",
            Stage::Flash(_) => "flash",
            Stage::Eeprom(_) => "EEPROM",
        }
    }
}

#[derive(Error, Debug)]
pub enum ProgrammerError {
    #[error("Could not run {}: {}", _0, _1)]
    SpawnError(String, io::Error),
    #[error("Error programming {}: {} exited with {}", stage, program, status)]
    StageFailed {
        stage: &'static str,
        program: String,
        status: ExitStatus,
    },
}

/// Builds an avrdude memory operation argument that writes `path` in Intel HEX format
fn write_memory_arg(memory: &str, path: &Path) -> OsString {
    let mut arg = OsString::from(format!("{}:w:", memory));

    arg.push(path.as_os_str());
    arg.push(":i");

    arg
}

/// Runs the programmer stages for a single board
#[derive(Debug, Clone)]
pub struct Programmer {
    executable: OsString,
    settings: ProgrammerSettings,
}

impl Programmer {
    pub fn new<S: AsRef<OsStr>>(executable: S, settings: ProgrammerSettings) -> Programmer {
        Programmer {
            executable: executable.as_ref().to_owned(),
            settings,
        }
    }

    /// Returns the arguments the programmer is invoked with for `stage`
    pub fn stage_args(&self, stage: &Stage) -> Vec<OsString> {
        let bit_clock = match stage {
            Stage::Fuses => FUSE_BIT_CLOCK,
            _ => PROGRAM_BIT_CLOCK,
        };

        let mut args: Vec<OsString> = vec![
            "-p".into(),
            self.settings.part.as_str().into(),
            "-c".into(),
            self.settings.programmer.as_str().into(),
            "-B".into(),
            bit_clock.into(),
            "-P".into(),
            self.settings.port.as_str().into(),
        ];

        match stage {
            Stage::Fuses => {
                // Don't let avrdude "fix" the fuses when they don't read back as written
                args.push("-u".into());

                for fuse in FUSES.iter() {
                    args.push("-U".into());
                    args.push((*fuse).into());
                }
            }
            Stage::Flash(path) => {
                // Flash has to be erased before it's written
                args.push("-e".into());
                args.push("-U".into());
                args.push(write_memory_arg("flash", path));
            }
            Stage::Eeprom(path) => {
                args.push("-U".into());
                args.push(write_memory_arg("eeprom", path));
            }
        }

        args
    }

    /// Runs a single `stage`, returns `ProgrammerError::StageFailed` on a non-zero exit status
    pub fn run_stage(&self, stage: &Stage) -> Result<(), ProgrammerError> {
        let program = self.executable.to_string_lossy().into_owned();
        let args = self.stage_args(stage);

        info!("Programming {}", stage.name());
        debug!("Running {} {:?}", program, args);

        let status = Command::new(&self.executable)
            .args(&args)
            .status()
            .map_err(|err| ProgrammerError::SpawnError(program.clone(), err))?;

        if !status.success() {
            return Err(ProgrammerError::StageFailed {
                stage: stage.name(),
                program,
                status,
            });
        }

        Ok(())
    }

    /// Sets the fuses, then writes the flash and - when given - the EEPROM image
    ///
    /// The first failing stage aborts the remaining ones.
    pub fn program(&self, firmware_hex: &Path, eeprom_hex: Option<&Path>) -> Result<(), ProgrammerError> {
        let mut stages = vec![Stage::Fuses, Stage::Flash(firmware_hex.to_owned())];

        if let Some(eeprom_hex) = eeprom_hex {
            stages.push(Stage::Eeprom(eeprom_hex.to_owned()));
        }

        for stage in &stages {
            self.run_stage(stage)?;
        }

        Ok(())
    }
}
