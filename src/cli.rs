use std::num::ParseIntError;
use std::path::PathBuf;

use structopt::StructOpt;

use szg::image::Layout;
use szg::programmer::ProgrammerSettings;

/// Parses a decimal or `0x` prefixed hexadecimal number
fn parse_number(s: &str) -> Result<u32, ParseIntError> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    }
}

#[derive(StructOpt, Debug)]
pub enum Command {
    /// Encode the DNA of a board and print it
    Dna(DnaOpts),
    /// Encode the power sequencer table of a board and print it
    Sequencer(SequencerOpts),
    /// Patch the DNA into the firmware and program one or more boards
    Program(ProgramOpts),
    /// Decode a binary written with --dna-binary-out or --sequence-binary-out
    Inspect(InspectCommand),
}

#[derive(StructOpt, Debug)]
pub struct DnaOpts {
    /// The DNA JSON file of the board
    pub board: PathBuf,
    /// The serial number of the board, defaults to the one in the DNA JSON file
    #[structopt(short = "s", long = "serial")]
    pub serial: Option<String>,
    /// Write the DNA binary to this file
    #[structopt(short = "o", long = "out")]
    pub out: Option<PathBuf>,
}

#[derive(StructOpt, Debug)]
pub struct SequencerOpts {
    /// The DNA JSON file of the board
    pub board: PathBuf,
    /// Write the power sequence binary to this file
    #[structopt(short = "o", long = "out")]
    pub out: Option<PathBuf>,
}

#[derive(StructOpt, Debug)]
pub struct ProgramOpts {
    /// The DNA JSON file of the board
    #[structopt(short = "d", long = "dna")]
    pub board: PathBuf,
    /// The serial of the board. In barcode scan mode this is the serial prefix, a date based
    /// prefix is used when it's left out
    #[structopt(short = "s", long = "serial")]
    pub serial: Option<String>,
    /// The SYZYGY firmware Intel HEX file to patch the DNA into
    #[structopt(short = "f", long = "firmware")]
    pub firmware: Option<PathBuf>,
    /// Program a board for every scanned serial label, until `q` is entered
    #[structopt(short = "b", long = "barcode-scan-mode")]
    pub barcode_scan_mode: bool,
    /// Write the DNA binary to this file
    #[structopt(long = "dna-binary-out")]
    pub dna_binary_out: Option<PathBuf>,
    /// Write the power sequence binary to this file
    #[structopt(long = "sequence-binary-out")]
    pub sequence_binary_out: Option<PathBuf>,
    /// Write the combined firmware to this file instead of programming a board
    #[structopt(long = "firmware-out")]
    pub firmware_out: Option<PathBuf>,

    #[structopt(flatten)]
    pub layout: LayoutOpts,
    #[structopt(flatten)]
    pub programmer: ProgrammerOpts,
}

/// Where the payloads are placed in flash and EEPROM
#[derive(StructOpt, Debug)]
pub struct LayoutOpts {
    /// Flash address of the DNA
    #[structopt(long = "dna-offset", default_value = "0xC00", parse(try_from_str = parse_number))]
    pub dna_offset: u32,
    /// Size of the EEPROM in bytes
    #[structopt(long = "eeprom-size", default_value = "256", parse(try_from_str = parse_number))]
    pub eeprom_size: u32,
    /// Number of bytes reserved for the power sequence at the end of the EEPROM
    #[structopt(long = "eeprom-reserved", default_value = "9", parse(try_from_str = parse_number))]
    pub eeprom_reserved: u32,
}

impl LayoutOpts {
    pub fn layout(&self) -> Layout {
        Layout {
            dna_flash_offset: self.dna_offset,
            eeprom_size: self.eeprom_size,
            eeprom_reserved: self.eeprom_reserved,
            ..Layout::default()
        }
    }
}

/// How avrdude is invoked
#[derive(StructOpt, Debug)]
pub struct ProgrammerOpts {
    /// The avrdude executable
    #[structopt(env = "AVRDUDE", long = "avrdude", default_value = "avrdude")]
    pub executable: String,
    /// The AVR part number passed to avrdude
    #[structopt(env = "AVR_PART", long = "part", default_value = "t44")]
    pub part: String,
    /// The programmer type passed to avrdude
    #[structopt(env = "AVR_PROGRAMMER", long = "programmer", default_value = "atmelice_isp")]
    pub programmer: String,
    /// The port the programmer is connected to
    #[structopt(env = "AVR_PORT", short = "P", long = "port", default_value = "usb")]
    pub port: String,
}

impl ProgrammerOpts {
    pub fn settings(&self) -> ProgrammerSettings {
        ProgrammerSettings {
            part: self.part.clone(),
            programmer: self.programmer.clone(),
            port: self.port.clone(),
        }
    }
}

#[derive(StructOpt, Debug)]
pub enum InspectCommand {
    /// Decode and verify a DNA binary
    Dna {
        /// The DNA binary
        #[structopt(required = true)]
        filename: PathBuf,
    },
    /// Decode a power sequence binary
    Sequencer {
        /// The power sequence binary
        #[structopt(required = true)]
        filename: PathBuf,
    },
}

#[derive(StructOpt, Debug)]
#[structopt(about = "Generates SYZYGY DNA and power sequence data and programs it to boards")]
pub struct Opts {
    #[structopt(subcommand)]
    pub command: Command,
}
