use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ::ihex::{create_object_file_representation, ReaderError, Record, WriterError};
use log::{debug, trace};
use thiserror::Error;

use super::Image;

/// Number of data bytes written per data record
const BYTES_PER_RECORD: usize = 16;

/// Errors that indicate what went wrong while reading or writing an Intel HEX file
#[derive(Debug, Error)]
pub enum HexError {
    #[error("Line {}: {}", line, source)]
    InvalidRecord {
        line: usize,
        #[source]
        source: ReaderError,
    },
    #[error("Input ended without an end of file record")]
    MissingEndOfFile,
    #[error("Could not write records: {}", _0)]
    WriteError(#[from] WriterError),
    #[error("I/O error: {}", _0)]
    IoError(#[from] io::Error),
}

/// Reads Intel HEX records from `input` up to the end of file record
///
/// Addresses that no data record covers read as `padding`.
pub fn parse(input: &str, padding: u8) -> Result<Image, HexError> {
    let mut image = Image::new(padding);
    // Added to the offset of every data record
    let mut base: u32 = 0;

    for (i, line) in input.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        let record = Record::from_record_string(line)
            .map_err(|source| HexError::InvalidRecord { line: i + 1, source })?;

        match record {
            Record::Data { offset, value } => {
                let address = base.wrapping_add(offset as u32);

                for (n, byte) in value.iter().enumerate() {
                    image.set(address.wrapping_add(n as u32), *byte);
                }
            }
            Record::EndOfFile => {
                debug!("Read {} bytes of Intel HEX data", image.len());

                return Ok(image);
            }
            Record::ExtendedSegmentAddress(segment) => {
                base = (segment as u32) << 4;
                trace!("Base address is now {:#010x}", base);
            }
            Record::ExtendedLinearAddress(upper) => {
                base = (upper as u32) << 16;
                trace!("Base address is now {:#010x}", base);
            }
            Record::StartSegmentAddress { .. } | Record::StartLinearAddress(_) => {
                // Entry point records mean nothing for a flash image
                trace!("Ignoring start address record on line {}", i + 1);
            }
        }
    }

    Err(HexError::MissingEndOfFile)
}

/// Converts `image` into records
///
/// Data records never cross a 16 byte boundary, an extended linear address record is emitted
/// whenever the upper 16 address bits change.
pub fn to_records(image: &Image) -> Vec<Record> {
    let mut records = Vec::new();
    let mut upper: u16 = 0;

    for (start, bytes) in image.segments() {
        let mut address = start;
        let mut remaining = &bytes[..];

        while !remaining.is_empty() {
            let row_upper = (address >> 16) as u16;

            if row_upper != upper {
                records.push(Record::ExtendedLinearAddress(row_upper));
                upper = row_upper;
            }

            let row_len =
                (BYTES_PER_RECORD - address as usize % BYTES_PER_RECORD).min(remaining.len());

            records.push(Record::Data {
                offset: address as u16,
                value: remaining[..row_len].to_vec(),
            });

            address = address.wrapping_add(row_len as u32);
            remaining = &remaining[row_len..];
        }
    }

    records.push(Record::EndOfFile);

    records
}

/// Writes `image` to `writer` as Intel HEX
pub fn write_hex<W: Write>(image: &Image, mut writer: W) -> Result<(), HexError> {
    let text = create_object_file_representation(&to_records(image))?;

    writer.write_all(text.as_bytes())?;

    if !text.ends_with('\n') {
        writeln!(writer)?;
    }

    Ok(())
}

/// Reads the Intel HEX file at `path`
pub fn load<P: AsRef<Path>>(path: P, padding: u8) -> Result<Image, HexError> {
    debug!("Reading Intel HEX file {}", path.as_ref().display());

    let input = fs::read_to_string(path)?;

    parse(&input, padding)
}

/// Writes `image` to the Intel HEX file at `path`
pub fn save<P: AsRef<Path>>(image: &Image, path: P) -> Result<(), HexError> {
    debug!("Writing Intel HEX file {}", path.as_ref().display());

    let mut writer = BufWriter::new(File::create(path)?);

    write_hex(image, &mut writer)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_hex_lines(image: &Image) -> Vec<String> {
        let mut buf: Vec<u8> = Vec::new();

        write_hex(image, &mut buf).unwrap();

        String::from_utf8(buf)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    #[test]
    fn it_should_read_data_records() {
        let image = parse(
            ":10000000000102030405060708090A0B0C0D0E0F78\n:020010001011CD\n:00000001FF\n",
            0xFF,
        )
        .unwrap();

        assert_eq!(image.len(), 18);
        assert_eq!(image.get(0x0F), 0x0F);
        assert_eq!(image.get(0x11), 0x11);
        assert_eq!(image.get(0x12), 0xFF);
        assert!(!image.contains(0x12));
    }

    #[test]
    fn it_should_apply_extended_addresses() {
        let image = parse(
            ":020000040001F9\r\n:0100000042BD\r\n:020000022000DC\r\n:010000009966\r\n:00000001FF\r\n",
            0xFF,
        )
        .unwrap();

        assert_eq!(image.len(), 2);
        assert_eq!(image.get(0x0001_0000), 0x42);
        assert_eq!(image.get(0x0002_0000), 0x99);
        assert_eq!(image.get(0x0000_0000), 0xFF);
    }

    #[test]
    fn it_should_ignore_start_address_records() {
        let image = parse(":0400000300000000F9\n:0100000042BD\n:00000001FF\n", 0xFF).unwrap();

        assert_eq!(image.get(0), 0x42);
    }

    #[test]
    fn it_should_report_the_line_of_a_bad_record() {
        assert!(matches!(
            parse(":00000001FF\n", 0xFF).map(|image| image.len()),
            Ok(0)
        ));
        assert!(matches!(
            parse("\n:0100000042BE\n:00000001FF\n", 0xFF),
            Err(HexError::InvalidRecord { line: 2, .. })
        ));
        assert!(matches!(
            parse("0100000042BD\n", 0xFF),
            Err(HexError::InvalidRecord { line: 1, .. })
        ));
    }

    #[test]
    fn it_should_require_end_of_file_record() {
        assert!(matches!(
            parse(":0100000042BD\n", 0xFF),
            Err(HexError::MissingEndOfFile)
        ));
    }

    #[test]
    fn it_should_split_rows_on_16_byte_boundaries() {
        let mut image = Image::new(0xFF);
        image.write(0xBFE, &[0x01, 0x02, 0x03, 0x04]).unwrap();

        assert_eq!(
            to_records(&image),
            vec![
                Record::Data {
                    offset: 0xBFE,
                    value: vec![0x01, 0x02]
                },
                Record::Data {
                    offset: 0xC00,
                    value: vec![0x03, 0x04]
                },
                Record::EndOfFile,
            ]
        );
    }

    #[test]
    fn it_should_write_extended_linear_address_records() {
        let mut image = Image::new(0xFF);
        image.set(0x0001_0000, 0x42);

        assert_eq!(
            to_hex_lines(&image),
            vec![":020000040001F9", ":0100000042BD", ":00000001FF"]
        );
    }

    #[test]
    fn it_should_read_back_what_it_writes() {
        let mut image = Image::new(0xFF);
        image.write(0x0000, &[0x0C, 0x94, 0x34, 0x00]).unwrap();
        image.write(0xFFFE, &[0x01, 0x02, 0x03, 0x04]).unwrap();

        let lines = to_hex_lines(&image);

        assert_eq!(
            lines,
            vec![
                ":040000000C94340028",
                ":02FFFE000102FE",
                ":020000040001F9",
                ":020000000304F7",
                ":00000001FF"
            ]
        );
        assert_eq!(parse(&lines.join("\n"), 0xFF).unwrap(), image);
    }
}
