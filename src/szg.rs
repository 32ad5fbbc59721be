//! SYZYGY DNA and power sequencer encoding

pub mod crc;
mod dna;
mod sequencer;

pub use dna::{
    Attribute, Attributes, DecodeError, Dna, EncodeError, Version, SVIO_IMPL_VERSION,
    SZG_DNA_HEADER_LENGTH_V1,
};
pub use sequencer::{
    ChannelEntry, SequencerError, SequencerTable, ENABLE_ACTIVE_LOW, ENABLE_DISABLED,
    SEQ_DATA_LENGTH,
};
