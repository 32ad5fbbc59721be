use std::io;

use thiserror::Error;

use crate::board::BoardError;
use crate::image::ihex::HexError;
use crate::image::ImageError;
use crate::programmer::ProgrammerError;
use crate::szg::{DecodeError, EncodeError, SequencerError};

/// Broad classes of failures, independent of the module that reported them
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorKind {
    /// The board description is missing a field or is malformed
    InputValidation,
    /// A value doesn't fit the field it's encoded in
    Range,
    /// The firmware already occupies the region a payload goes to
    Collision,
    /// The device programmer failed or couldn't be started
    ExternalTool,
    /// An input file is not in the expected format
    Format,
    Io,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{}", _0)]
    Board(#[from] BoardError),
    #[error("Could not encode DNA: {}", _0)]
    Encode(#[from] EncodeError),
    #[error("Could not decode DNA: {}", _0)]
    Decode(#[from] DecodeError),
    #[error("Could not encode power sequence: {}", _0)]
    Sequencer(#[from] SequencerError),
    #[error("{}", _0)]
    Image(#[from] ImageError),
    #[error("Intel HEX error: {}", _0)]
    Hex(#[from] HexError),
    #[error("{}", _0)]
    Programmer(#[from] ProgrammerError),
    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Board(BoardError::IoError(_)) => ErrorKind::Io,
            Error::Board(_) => ErrorKind::InputValidation,
            Error::Encode(EncodeError::FieldTooLong(..)) => ErrorKind::Range,
            Error::Encode(EncodeError::IoError(_)) => ErrorKind::Io,
            Error::Decode(DecodeError::IoError(_)) => ErrorKind::Io,
            Error::Decode(_) => ErrorKind::Format,
            Error::Sequencer(SequencerError::MissingField { .. }) => ErrorKind::InputValidation,
            Error::Sequencer(_) => ErrorKind::Range,
            Error::Image(ImageError::Collision { .. }) => ErrorKind::Collision,
            Error::Image(ImageError::InvalidLayout(..)) => ErrorKind::InputValidation,
            Error::Image(_) => ErrorKind::Range,
            Error::Hex(HexError::IoError(_)) => ErrorKind::Io,
            Error::Hex(_) => ErrorKind::Format,
            Error::Programmer(_) => ErrorKind::ExternalTool,
            Error::IoError(_) => ErrorKind::Io,
        }
    }
}
