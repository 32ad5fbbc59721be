pub mod board;
mod error;
pub mod image;
pub mod programmer;
pub mod serial;
pub mod szg;

use std::fmt;

pub use error::{Error, ErrorKind};

use board::BoardDescription;
use image::{Image, Layout};
use log::{debug, info};
use szg::{Dna, SequencerTable};

/// Number of bytes per line of a `HexDump`
const HEX_DUMP_WIDTH: usize = 16;

/// Displays bytes as rows of upper case hex pairs
///
/// # Examples
///
/// ```
/// use szg::HexDump;
///
/// assert_eq!(HexDump(&[0x50, 0x00, 0x28]).to_string(), "50 00 28 \n");
/// ```
#[derive(Debug, Copy, Clone)]
pub struct HexDump<'a>(pub &'a [u8]);

impl fmt::Display for HexDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.0.chunks(HEX_DUMP_WIDTH) {
            for byte in row {
                write!(f, "{:02X} ", byte)?;
            }

            writeln!(f)?;
        }

        Ok(())
    }
}

/// Everything that is written to a single board
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Provisioning {
    pub serial: String,
    /// The encoded DNA blob
    pub dna: Vec<u8>,
    /// `None` when the board doesn't use the power sequencer
    pub sequencer: Option<SequencerTable>,
}

impl Provisioning {
    /// Encodes the DNA and the sequencer table of `board` with the given `serial`
    ///
    /// Both payloads are encoded before anything is returned, so a failure never leaves half of
    /// them behind.
    pub fn encode(board: &BoardDescription, serial: &str) -> Result<Provisioning, Error> {
        let dna = Dna::from_board(board, serial)?.to_bytes()?;
        let sequencer = SequencerTable::from_board(board)?;

        info!(
            "Encoded {} bytes of DNA for {} {} with serial {}",
            dna.len(),
            board.manufacturer_name,
            board.product_model,
            serial
        );

        if sequencer.is_none() {
            debug!("Board has no power sequencer configuration");
        }

        Ok(Provisioning {
            serial: serial.to_owned(),
            dna,
            sequencer,
        })
    }

    /// Returns a copy of `firmware` with the DNA placed in it
    pub fn firmware_image(&self, firmware: &Image, layout: &Layout) -> Result<Image, Error> {
        let mut patched = firmware.clone();

        image::patch_firmware(&mut patched, &self.dna, layout)?;

        Ok(patched)
    }

    /// Returns the EEPROM image holding the sequencer table, if the board has one
    pub fn eeprom_image(&self, layout: &Layout) -> Result<Option<Image>, Error> {
        match &self.sequencer {
            Some(table) => Ok(Some(image::eeprom_image(table.as_bytes(), layout)?)),
            None => Ok(None),
        }
    }
}
