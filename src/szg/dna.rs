use std::fmt;
use std::io::{self, Cursor, Read, Write};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, trace};
use num_enum::IntoPrimitive;
use thiserror::Error;

use super::crc;
use crate::board::{BoardDescription, VioRange, SZG_MAX_DNA_RANGES};

/// Length of the fixed part of a version 1 DNA blob
pub const SZG_DNA_HEADER_LENGTH_V1: usize = 40;

const SZG_DNA_PTR_FULL_LENGTH: usize = 0;
const SZG_DNA_CRC16_HIGH: usize = 38;

/// Longest string that fits in one of the DNA length fields
const SZG_DNA_MAX_STRING_LENGTH: usize = 0xFF;

/// The DNA format version implemented by this crate
pub const SVIO_IMPL_VERSION: Version = Version::new(1, 1);

/// The first DNA format version that knows about TXR4 peripherals
const TXR4_MIN_VERSION: Version = Version::new(1, 1);

/// A DNA format version
///
/// Versions order by major first, then minor.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
}

impl Version {
    pub const fn new(major: u8, minor: u8) -> Version {
        Version { major, minor }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// A single peripheral attribute flag in the DNA header
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
pub enum Attribute {
    Lvds = 0x01,
    Doublewide = 0x02,
    Txr4 = 0x04,
}

/// The attribute bit field of the DNA header
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Attributes(u8);

impl Attributes {
    pub fn from_bits(bits: u8) -> Attributes {
        Attributes(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn insert(&mut self, attribute: Attribute) {
        self.0 |= u8::from(attribute);
    }

    pub fn contains(self, attribute: Attribute) -> bool {
        self.0 & u8::from(attribute) != 0
    }
}

#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("The {} field is {} bytes long, at most 255 bytes fit in the DNA", _0, _1)]
    FieldTooLong(&'static str, usize),
    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported DNA header length {}, expected 40", _0)]
    InvalidHeaderLength(u16),
    #[error("DNA header checksum is {:#06x}, but the header hashes to {:#06x}", stored, computed)]
    ChecksumMismatch { stored: u16, computed: u16 },
    #[error("DNA length is {} but the header and strings add up to {}", total, expected)]
    LengthMismatch { total: u16, expected: u16 },
    #[error("The {} string is not valid UTF-8", _0)]
    InvalidString(&'static str),
    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
}

/// The names of the DNA strings, in the order they are stored
const STRING_FIELDS: [&str; 5] = [
    "manufacturer_name",
    "product_name",
    "product_model",
    "product_version",
    "serial",
];

/// A SYZYGY DNA blob
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Dna {
    /// The DNA format version this blob was written for
    pub version: Version,
    /// The oldest DNA parser version that is able to read this blob
    pub required_version: Version,
    pub max_5v_load: u16,
    pub max_3v3_load: u16,
    pub max_vio_load: u16,
    pub attributes: Attributes,
    pub vio: [VioRange; SZG_MAX_DNA_RANGES],
    pub manufacturer_name: String,
    pub product_name: String,
    pub product_model: String,
    pub product_version: String,
    pub serial: String,
}

impl Dna {
    /// Creates the DNA for `board` with the given `serial`
    ///
    /// Fails with `EncodeError::FieldTooLong` if any of the strings doesn't fit its length field.
    pub fn from_board(board: &BoardDescription, serial: &str) -> Result<Dna, EncodeError> {
        let mut attributes = Attributes::default();
        // Readable by every DNA parser unless a feature needs a newer one
        let mut required_version = Version::default();

        if board.is_lvds {
            attributes.insert(Attribute::Lvds);
        }

        if board.is_doublewide {
            attributes.insert(Attribute::Doublewide);
        }

        // A description without the key never sets the TXR4 bit
        if let Some(true) = board.is_txr4 {
            attributes.insert(Attribute::Txr4);
            required_version = required_version.max(TXR4_MIN_VERSION);
        }

        let dna = Dna {
            version: SVIO_IMPL_VERSION,
            required_version,
            max_5v_load: board.max_5v_load,
            max_3v3_load: board.max_3v3_load,
            max_vio_load: board.max_vio_load,
            attributes,
            vio: board.vio,
            manufacturer_name: board.manufacturer_name.clone(),
            product_name: board.product_name.clone(),
            product_model: board.product_model.clone(),
            product_version: board.product_version.clone(),
            serial: serial.to_owned(),
        };

        dna.string_lengths()?;

        Ok(dna)
    }

    fn strings(&self) -> [&str; 5] {
        [
            self.manufacturer_name.as_str(),
            self.product_name.as_str(),
            self.product_model.as_str(),
            self.product_version.as_str(),
            self.serial.as_str(),
        ]
    }

    /// Returns the UTF-8 byte length of each string, in storage order
    fn string_lengths(&self) -> Result<[u8; 5], EncodeError> {
        let mut lengths = [0u8; 5];

        for (i, string) in self.strings().iter().enumerate() {
            if string.len() > SZG_DNA_MAX_STRING_LENGTH {
                return Err(EncodeError::FieldTooLong(STRING_FIELDS[i], string.len()));
            }

            lengths[i] = string.len() as u8;
        }

        Ok(lengths)
    }

    /// The length of the complete blob, header and strings
    pub fn total_length(&self) -> Result<u16, EncodeError> {
        let lengths = self.string_lengths()?;

        Ok(lengths
            .iter()
            .fold(SZG_DNA_HEADER_LENGTH_V1 as u16, |acc, len| acc + *len as u16))
    }

    /// Builds the fixed size header, including the checksum
    pub fn header(&self) -> Result<[u8; SZG_DNA_HEADER_LENGTH_V1], EncodeError> {
        let mut header = [0u8; SZG_DNA_HEADER_LENGTH_V1];
        let lengths = self.string_lengths()?;

        {
            let mut writer = Cursor::new(&mut header[..]);

            // The full length is filled in once the string lengths are known
            writer.write_u16::<LittleEndian>(0)?;
            writer.write_u16::<LittleEndian>(SZG_DNA_HEADER_LENGTH_V1 as u16)?;

            writer.write_u8(self.version.major)?;
            writer.write_u8(self.version.minor)?;
            writer.write_u8(self.required_version.major)?;
            writer.write_u8(self.required_version.minor)?;

            writer.write_u16::<LittleEndian>(self.max_5v_load)?;
            writer.write_u16::<LittleEndian>(self.max_3v3_load)?;
            writer.write_u16::<LittleEndian>(self.max_vio_load)?;

            // The attribute field is 16 bits wide, only the low byte is in use
            writer.write_u8(self.attributes.bits())?;
            writer.write_u8(0)?;

            for range in &self.vio {
                writer.write_u16::<LittleEndian>(range.min)?;
                writer.write_u16::<LittleEndian>(range.max)?;
            }

            writer.write_all(&lengths)?;

            writer.set_position(SZG_DNA_PTR_FULL_LENGTH as u64);
            writer.write_u16::<LittleEndian>(self.total_length()?)?;
        }

        // The checksum covers the header only, and has to be calculated last
        let crc = crc::compute(&header);

        {
            let mut writer = Cursor::new(&mut header[..]);

            writer.set_position(SZG_DNA_CRC16_HIGH as u64);
            writer.write_u16::<BigEndian>(crc)?;
        }

        trace!("DNA header checksum: {:#06x}", crc);

        Ok(header)
    }

    /// Writes the DNA blob to the given `writer`
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), EncodeError> {
        let header = self.header()?;

        writer.write_all(&header)?;

        for string in self.strings().iter() {
            writer.write_all(string.as_bytes())?;
        }

        Ok(())
    }

    /// Returns the DNA blob as a vector of bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = Vec::with_capacity(self.total_length()? as usize);

        self.write_to(&mut buf)?;

        debug!("Encoded {} bytes of DNA", buf.len());

        Ok(buf)
    }

    /// Reads and validates a DNA blob from `reader`
    pub fn from_reader<R: Read>(reader: &mut R) -> Result<Dna, DecodeError> {
        let mut header = [0u8; SZG_DNA_HEADER_LENGTH_V1];

        reader.read_exact(&mut header)?;

        let mut cursor = Cursor::new(&header[..]);

        let total_length = cursor.read_u16::<LittleEndian>()?;
        let header_length = cursor.read_u16::<LittleEndian>()?;

        if header_length as usize != SZG_DNA_HEADER_LENGTH_V1 {
            return Err(DecodeError::InvalidHeaderLength(header_length));
        }

        let stored = Cursor::new(&header[SZG_DNA_CRC16_HIGH..]).read_u16::<BigEndian>()?;
        let computed = crc::compute(&header);

        if stored != computed {
            return Err(DecodeError::ChecksumMismatch { stored, computed });
        }

        let version = Version::new(cursor.read_u8()?, cursor.read_u8()?);
        let required_version = Version::new(cursor.read_u8()?, cursor.read_u8()?);

        let max_5v_load = cursor.read_u16::<LittleEndian>()?;
        let max_3v3_load = cursor.read_u16::<LittleEndian>()?;
        let max_vio_load = cursor.read_u16::<LittleEndian>()?;

        let attributes = Attributes::from_bits(cursor.read_u8()?);
        // Skip the unused high byte of the attributes
        cursor.read_u8()?;

        let mut vio = [VioRange::default(); SZG_MAX_DNA_RANGES];

        for range in vio.iter_mut() {
            range.min = cursor.read_u16::<LittleEndian>()?;
            range.max = cursor.read_u16::<LittleEndian>()?;
        }

        let mut lengths = [0u8; 5];
        cursor.read_exact(&mut lengths)?;

        let expected = lengths
            .iter()
            .fold(SZG_DNA_HEADER_LENGTH_V1 as u16, |acc, len| acc + *len as u16);

        if total_length != expected {
            return Err(DecodeError::LengthMismatch {
                total: total_length,
                expected,
            });
        }

        let mut read_string = |index: usize| -> Result<String, DecodeError> {
            let mut buf = vec![0u8; lengths[index] as usize];
            reader.read_exact(&mut buf)?;

            String::from_utf8(buf).map_err(|_| DecodeError::InvalidString(STRING_FIELDS[index]))
        };

        let manufacturer_name = read_string(0)?;
        let product_name = read_string(1)?;
        let product_model = read_string(2)?;
        let product_version = read_string(3)?;
        let serial = read_string(4)?;

        Ok(Dna {
            version,
            required_version,
            max_5v_load,
            max_3v3_load,
            max_vio_load,
            attributes,
            vio,
            manufacturer_name,
            product_name,
            product_model,
            product_version,
            serial,
        })
    }

    /// Parses and validates a DNA blob from a slice of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Dna, DecodeError> {
        let mut cursor = Cursor::new(bytes);

        Dna::from_reader(&mut cursor)
    }
}

#[cfg(test)]
mod tests {
    use assert_hex::*;
    use hex_literal::hex;

    use super::*;

    const TEST_JSON: &str = include_str!("../../test/szg-test.json");
    const SENSOR_JSON: &str = include_str!("../../test/szg-sensor.json");

    const REFERENCE_DNA: [u8; 80] = hex!("50 00 28 00 01 01 00 00 00 00 96 00 C8 00 01 00 78 00 4A 01 00 00 00 00 00 00 00 00 00 00 00 00 0A 08 0B 01 0A 00 B6 E7 4F 70 61 6C 20 4B 65 6C 6C 79 53 5A 47 2D 54 45 53 54 53 5A 47 2D 54 45 53 54 2D 30 31 41 32 31 34 32 30 30 30 41 42 43");

    fn test_board() -> BoardDescription {
        TEST_JSON.parse().unwrap()
    }

    #[test]
    fn it_should_encode_reference_dna() {
        let dna = Dna::from_board(&test_board(), "2142000ABC").unwrap();

        assert_eq_hex!(&dna.to_bytes().unwrap()[..], &REFERENCE_DNA[..]);
    }

    #[test]
    fn it_should_encode_sensor_header() {
        let board: BoardDescription = SENSOR_JSON.parse().unwrap();
        let dna = Dna::from_board(&board, "SN0001").unwrap();
        let bytes = dna.to_bytes().unwrap();

        assert_eq_hex!(
            &bytes[..SZG_DNA_HEADER_LENGTH_V1],
            &hex!("50 00 28 00 01 01 00 00 64 00 FA 00 32 00 02 00 78 00 B4 00 FA 00 4A 01 00 00 00 00 00 00 00 00 0A 0A 0D 01 06 00 F1 D7")[..]
        );
        assert_eq!(
            &bytes[SZG_DNA_HEADER_LENGTH_V1..],
            b"Opal KellySZG-SENSORSZG-SENSOR-R1BSN0001"
        );
    }

    #[test]
    fn it_should_store_the_total_length() {
        let dna = Dna::from_board(&test_board(), "1").unwrap();
        let bytes = dna.to_bytes().unwrap();
        let expected = 40 + "Opal Kelly".len() + "SZG-TEST".len() + "SZG-TEST-01".len() + 1 + 1;

        assert_eq!(bytes.len(), expected);
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]) as usize, expected);
        assert_eq!(dna.total_length().unwrap() as usize, expected);
    }

    #[test]
    fn it_should_store_length_little_endian_and_checksum_big_endian() {
        let header = Dna::from_board(&test_board(), "2142000ABC")
            .unwrap()
            .header()
            .unwrap();

        assert_eq_hex!(&header[0..2], &[0x50u8, 0x00][..]);
        assert_eq_hex!(&header[38..40], &[0xB6u8, 0xE7][..]);
        assert!(crc::verify(&header));
    }

    #[test]
    fn it_should_count_utf8_bytes() {
        let mut board = test_board();
        board.manufacturer_name = "Ünïcödé".to_owned();

        let bytes = Dna::from_board(&board, "").unwrap().to_bytes().unwrap();

        assert_eq!(bytes[32], 11);
        assert_eq!(bytes[36], 0);
    }

    #[test]
    fn it_should_set_txr4_attribute_and_required_version() {
        let mut board = test_board();
        board.is_txr4 = Some(true);

        let header = Dna::from_board(&board, "2142000ABC")
            .unwrap()
            .header()
            .unwrap();

        assert_eq_hex!(
            &header[..],
            &hex!("50 00 28 00 01 01 01 01 00 00 96 00 C8 00 05 00 78 00 4A 01 00 00 00 00 00 00 00 00 00 00 00 00 0A 08 0B 01 0A 00 BD 84")[..]
        );
    }

    #[test]
    fn it_should_not_set_txr4_when_key_is_absent_or_false() {
        let mut board = test_board();

        for is_txr4 in [None, Some(false)].iter() {
            board.is_txr4 = *is_txr4;

            let dna = Dna::from_board(&board, "X").unwrap();
            let header = dna.header().unwrap();

            assert!(!dna.attributes.contains(Attribute::Txr4));
            assert_eq!(dna.required_version, Version::new(0, 0));
            assert_eq!(header[14] & 0x04, 0);
            assert_eq!(header[6..8], [0, 0]);
        }
    }

    #[test]
    fn it_should_pack_lvds_and_doublewide_bits() {
        let mut board = test_board();
        let header = Dna::from_board(&board, "X").unwrap().header().unwrap();

        assert_eq_hex!(header[14], 0x01);

        board.is_lvds = false;
        board.is_doublewide = true;
        let header = Dna::from_board(&board, "X").unwrap().header().unwrap();

        assert_eq_hex!(header[14], 0x02);
    }

    #[test]
    fn it_should_never_lower_the_required_version() {
        assert_eq!(Version::new(2, 0).max(TXR4_MIN_VERSION), Version::new(2, 0));
        assert_eq!(Version::new(1, 3).max(TXR4_MIN_VERSION), Version::new(1, 3));
        assert_eq!(Version::new(1, 0).max(TXR4_MIN_VERSION), Version::new(1, 1));
    }

    #[test]
    fn it_should_reject_long_serial() {
        let serial = "A".repeat(256);
        let result = Dna::from_board(&test_board(), &serial);

        assert!(matches!(result, Err(EncodeError::FieldTooLong("serial", 256))));
        assert!(Dna::from_board(&test_board(), &serial[..255]).is_ok());
    }

    #[test]
    fn it_should_reject_long_product_name() {
        let mut board = test_board();
        board.product_name = "N".repeat(300);

        let result = Dna::from_board(&board, "1");

        assert!(matches!(
            result,
            Err(EncodeError::FieldTooLong("product_name", 300))
        ));
    }

    #[test]
    fn it_should_be_deterministic() {
        let board = test_board();
        let first = Dna::from_board(&board, "42").unwrap().to_bytes().unwrap();
        let second = Dna::from_board(&board, "42").unwrap().to_bytes().unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn it_should_read_reference_dna() {
        let dna = Dna::from_bytes(&REFERENCE_DNA).unwrap();

        assert_eq!(dna.version, SVIO_IMPL_VERSION);
        assert_eq!(dna.max_vio_load, 200);
        assert!(dna.attributes.contains(Attribute::Lvds));
        assert_eq!(dna.vio[0], VioRange { min: 120, max: 330 });
        assert_eq!(dna.product_model, "SZG-TEST-01");
        assert_eq!(dna.serial, "2142000ABC");
        assert_eq!(dna, Dna::from_board(&test_board(), "2142000ABC").unwrap());
    }

    #[test]
    fn it_should_reject_corrupted_header() {
        let mut bytes = REFERENCE_DNA;
        bytes[10] = 0x97;

        assert!(matches!(
            Dna::from_bytes(&bytes),
            Err(DecodeError::ChecksumMismatch {
                stored: 0xB6E7,
                ..
            })
        ));
    }

    #[test]
    fn it_should_reject_truncated_strings() {
        let result = Dna::from_bytes(&REFERENCE_DNA[..70]);

        assert!(matches!(result, Err(DecodeError::IoError(_))));
    }

    #[test]
    fn it_should_reject_inconsistent_total_length() {
        let mut header = REFERENCE_DNA;
        header[0] = 0x51;
        let crc = crc::compute(&header[..SZG_DNA_HEADER_LENGTH_V1]);
        header[38..40].copy_from_slice(&crc.to_be_bytes());

        assert!(matches!(
            Dna::from_bytes(&header),
            Err(DecodeError::LengthMismatch {
                total: 0x51,
                expected: 0x50
            })
        ));
    }
}
