use std::fmt;

use log::{debug, trace};
use thiserror::Error;

use crate::board::{BoardDescription, ChannelConfig, SequencerConfig, SEQUENCER_CHANNELS};

/// The sequencer configuration is stored in 9 bytes of the AVR EEPROM
pub const SEQ_DATA_LENGTH: usize = 9;

const SEQ_THRESHOLD_OFFSET: usize = 0;
const SEQ_DELAY_OFFSET: usize = 3;
const SEQ_ENABLE_CONFIG_OFFSET: usize = 6;

/// Millivolts per threshold step, 0 - 3.3V quantized to 8 bits
const THRESHOLD_SCALE: f64 = 3300.0 / 256.0;

/// The granularity of the enable output delay, in milliseconds
const DELAY_STEP_MS: f64 = 10.0;

pub const ENABLE_ACTIVE_LOW: u8 = 1 << 3;
pub const ENABLE_DISABLED: u8 = 1 << 4;

/// Delay and enable config value of a channel that is not in use
const CHANNEL_UNUSED: u8 = 0xFF;

#[derive(Error, Debug, PartialEq)]
pub enum SequencerError {
    #[error("Channel {} threshold of {} mV is out of range", channel, threshold_mv)]
    ThresholdOutOfRange { channel: usize, threshold_mv: f64 },
    #[error("Channel {} delay of {} ms is out of range (0 - 2559 ms)", channel, delay_ms)]
    DelayOutOfRange { channel: usize, delay_ms: f64 },
    #[error("Channel {} is enabled but has no `{}` value", channel, field)]
    MissingField { channel: usize, field: &'static str },
}

/// The power sequencer register table read by the SYZYGY AVR firmware
///
/// Values are grouped by kind - all thresholds first, then all delays, then all enable configs.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SequencerTable([u8; SEQ_DATA_LENGTH]);

/// A decoded channel of a `SequencerTable`
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ChannelEntry {
    /// The threshold voltage, rounded to the nearest step
    pub threshold_mv: f64,
    /// `None` when the channel is disabled
    pub delay_ms: Option<u16>,
    pub active_high: bool,
    pub input_dependency: u8,
}

/// Quantizes `threshold_mv` to a threshold register value, clamping at the top of the range
fn threshold_to_register(channel: usize, threshold_mv: f64) -> Result<u8, SequencerError> {
    if !threshold_mv.is_finite() || threshold_mv < 0.0 {
        return Err(SequencerError::ThresholdOutOfRange {
            channel,
            threshold_mv,
        });
    }

    let steps = (threshold_mv / THRESHOLD_SCALE).round();

    Ok(steps.min(255.0) as u8)
}

/// Returns the delay and enable config registers of an enabled channel
fn enable_config_to_registers(
    channel: usize,
    config: &ChannelConfig,
) -> Result<(u8, u8), SequencerError> {
    let missing = |field| SequencerError::MissingField { channel, field };

    let delay_ms = config.delay_ms.ok_or_else(|| missing("delay_ms"))?;
    let active_high = config.active_high.ok_or_else(|| missing("active_high"))?;
    let input_dependency = config
        .input_dependency
        .ok_or_else(|| missing("input_dependency"))?;

    // Partial steps are dropped, rounding towards zero
    let steps = (delay_ms / DELAY_STEP_MS).trunc();

    if !steps.is_finite() || steps < 0.0 || steps > u8::MAX as f64 {
        return Err(SequencerError::DelayOutOfRange { channel, delay_ms });
    }

    let delay = steps as u8;

    let mut enable_config = input_dependency;

    if !active_high {
        enable_config |= ENABLE_ACTIVE_LOW;
    }

    Ok((delay, enable_config))
}

impl SequencerTable {
    /// Builds the sequencer table for `board`
    ///
    /// Returns `Ok(None)` when the board doesn't use the power sequencer.
    pub fn from_board(board: &BoardDescription) -> Result<Option<SequencerTable>, SequencerError> {
        match &board.sequencer {
            Some(config) => SequencerTable::from_config(config).map(Some),
            None => {
                debug!("Board description has no power sequencer config");

                Ok(None)
            }
        }
    }

    /// Builds the sequencer table from the given channel `config`
    pub fn from_config(config: &SequencerConfig) -> Result<SequencerTable, SequencerError> {
        let mut data = [0u8; SEQ_DATA_LENGTH];

        for (i, channel) in config.channels.iter().enumerate() {
            data[SEQ_THRESHOLD_OFFSET + i] = threshold_to_register(i, channel.threshold_mv)?;

            let (delay, enable_config) = if channel.config.enabled {
                enable_config_to_registers(i, &channel.config)?
            } else {
                (CHANNEL_UNUSED, CHANNEL_UNUSED)
            };

            data[SEQ_DELAY_OFFSET + i] = delay;
            data[SEQ_ENABLE_CONFIG_OFFSET + i] = enable_config;

            trace!(
                "Sequencer channel {}: threshold {:#04x}, delay {:#04x}, config {:#04x}",
                i,
                data[SEQ_THRESHOLD_OFFSET + i],
                delay,
                enable_config
            );
        }

        Ok(SequencerTable(data))
    }

    pub fn from_bytes(bytes: [u8; SEQ_DATA_LENGTH]) -> SequencerTable {
        SequencerTable(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Decodes the registers of channel `index`
    pub fn channel(&self, index: usize) -> ChannelEntry {
        let threshold = self.0[SEQ_THRESHOLD_OFFSET + index];
        let delay = self.0[SEQ_DELAY_OFFSET + index];
        let config = self.0[SEQ_ENABLE_CONFIG_OFFSET + index];
        let enabled = config & ENABLE_DISABLED == 0;

        ChannelEntry {
            threshold_mv: threshold as f64 * THRESHOLD_SCALE,
            delay_ms: if enabled {
                Some(delay as u16 * DELAY_STEP_MS as u16)
            } else {
                None
            },
            active_high: config & ENABLE_ACTIVE_LOW == 0,
            input_dependency: config & !(ENABLE_ACTIVE_LOW | ENABLE_DISABLED),
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = ChannelEntry> + '_ {
        (0..SEQUENCER_CHANNELS).map(move |i| self.channel(i))
    }
}

impl fmt::Display for ChannelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "threshold {:.0} mV, ", self.threshold_mv)?;

        match self.delay_ms {
            Some(delay_ms) => write!(
                f,
                "delay {} ms, active {}, inputs {:#05b}",
                delay_ms,
                if self.active_high { "high" } else { "low" },
                self.input_dependency
            ),
            None => write!(f, "disabled"),
        }
    }
}
