//! Board description records as they are read from the DNA JSON files

use std::convert::TryFrom;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use log::{debug, warn};
use serde::Deserialize;
use thiserror::Error;

/// Number of SmartVIO ranges stored in the DNA header
pub const SZG_MAX_DNA_RANGES: usize = 4;

/// Number of enable outputs handled by the power sequencer
pub const SEQUENCER_CHANNELS: usize = 3;

/// Errors that indicate that a board description could not be loaded
#[derive(Error, Debug)]
pub enum BoardError {
    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
    #[error("Invalid board description: {}", _0)]
    JsonError(#[from] serde_json::Error),
    #[error("Board description has {} VIO ranges, expected {}", _0, SZG_MAX_DNA_RANGES)]
    MissingVioRanges(usize),
    #[error("Board description has `sequencer_enable_config` but no `sequencer_threshold_mv`")]
    MissingSequencerThresholds,
}

/// A SmartVIO voltage range supported by the peripheral
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Deserialize)]
pub struct VioRange {
    pub min: u16,
    pub max: u16,
}

/// Configuration of a single sequencer enable output
///
/// Everything but `enabled` may be left out for a disabled channel.
#[derive(Debug, Copy, Clone, PartialEq, Deserialize)]
pub struct ChannelConfig {
    pub enabled: bool,
    /// Delay before asserting the enable output, in milliseconds
    pub delay_ms: Option<f64>,
    pub active_high: Option<bool>,
    /// Bitmask of the inputs this output waits on
    pub input_dependency: Option<u8>,
}

/// A sequencer channel - the threshold of its input together with the config of its output
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SequencerChannel {
    pub threshold_mv: f64,
    pub config: ChannelConfig,
}

/// The power sequencing sub-record of a board description
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SequencerConfig {
    pub channels: [SequencerChannel; SEQUENCER_CHANNELS],
}

/// The board description in the layout of the JSON file
#[derive(Debug, Deserialize)]
struct RawBoardDescription {
    is_lvds: bool,
    is_doublewide: bool,
    is_txr4: Option<bool>,
    max_5v_load: u16,
    max_3v3_load: u16,
    max_vio_load: u16,
    vio: Vec<VioRange>,
    manufacturer_name: String,
    product_name: String,
    product_model: String,
    product_version: String,
    serial: Option<String>,
    sequencer_threshold_mv: Option<[f64; SEQUENCER_CHANNELS]>,
    sequencer_enable_config: Option<[ChannelConfig; SEQUENCER_CHANNELS]>,
}

/// Describes a SYZYGY peripheral - everything that ends up in its DNA and sequencer table
#[derive(Debug, Clone, PartialEq)]
pub struct BoardDescription {
    pub is_lvds: bool,
    pub is_doublewide: bool,
    /// `None` when the description doesn't mention TXR4 at all
    pub is_txr4: Option<bool>,
    /// Maximum load on the 5V rail, in mA
    pub max_5v_load: u16,
    /// Maximum load on the 3.3V rail, in mA
    pub max_3v3_load: u16,
    /// Maximum load on the VIO rail, in mA
    pub max_vio_load: u16,
    pub vio: [VioRange; SZG_MAX_DNA_RANGES],
    pub manufacturer_name: String,
    pub product_name: String,
    pub product_model: String,
    pub product_version: String,
    /// Serial number baked into the description, used when none is given on the command line
    pub serial: Option<String>,
    pub sequencer: Option<SequencerConfig>,
}

impl TryFrom<RawBoardDescription> for BoardDescription {
    type Error = BoardError;

    fn try_from(raw: RawBoardDescription) -> Result<Self, BoardError> {
        if raw.vio.len() < SZG_MAX_DNA_RANGES {
            return Err(BoardError::MissingVioRanges(raw.vio.len()));
        }

        if raw.vio.len() > SZG_MAX_DNA_RANGES {
            warn!(
                "Board description has {} VIO ranges, only the first {} are used",
                raw.vio.len(),
                SZG_MAX_DNA_RANGES
            );
        }

        let mut vio = [VioRange::default(); SZG_MAX_DNA_RANGES];
        vio.copy_from_slice(&raw.vio[..SZG_MAX_DNA_RANGES]);

        // The enable config decides whether the board has a sequencer, the thresholds have to
        // come along with it
        let sequencer = match (raw.sequencer_enable_config, raw.sequencer_threshold_mv) {
            (None, _) => None,
            (Some(_), None) => return Err(BoardError::MissingSequencerThresholds),
            (Some(configs), Some(thresholds)) => {
                let mut channels = [SequencerChannel {
                    threshold_mv: 0.0,
                    config: configs[0],
                }; SEQUENCER_CHANNELS];

                for (i, channel) in channels.iter_mut().enumerate() {
                    channel.threshold_mv = thresholds[i];
                    channel.config = configs[i];
                }

                Some(SequencerConfig { channels })
            }
        };

        Ok(BoardDescription {
            is_lvds: raw.is_lvds,
            is_doublewide: raw.is_doublewide,
            is_txr4: raw.is_txr4,
            max_5v_load: raw.max_5v_load,
            max_3v3_load: raw.max_3v3_load,
            max_vio_load: raw.max_vio_load,
            vio,
            manufacturer_name: raw.manufacturer_name,
            product_name: raw.product_name,
            product_model: raw.product_model,
            product_version: raw.product_version,
            serial: raw.serial,
            sequencer,
        })
    }
}

impl BoardDescription {
    /// Reads and parses a JSON board description from `reader`
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, BoardError> {
        let raw: RawBoardDescription = serde_json::from_reader(reader)?;

        BoardDescription::try_from(raw)
    }

    /// Opens and parses the JSON board description at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, BoardError> {
        debug!("Reading board description {}", path.as_ref().display());

        let file = File::open(path)?;

        BoardDescription::from_reader(BufReader::new(file))
    }
}

impl FromStr for BoardDescription {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, BoardError> {
        let raw: RawBoardDescription = serde_json::from_str(s)?;

        BoardDescription::try_from(raw)
    }
}
