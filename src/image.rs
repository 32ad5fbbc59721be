//! Sparse flash and EEPROM images, and placement of the DNA and sequencer payloads in them

pub mod ihex;

use std::collections::BTreeMap;
use std::convert::TryFrom;
use std::ops::Range;

use log::debug;
use thiserror::Error;

/// The value of an unprogrammed flash or EEPROM cell
pub const ERASED_BYTE: u8 = 0xFF;

/// Flash address the DNA firmware reads the DNA from
pub const DNA_FLASH_OFFSET: u32 = 0xC00;

/// Total size of the AVR EEPROM
pub const FW_BYTES_EEPROM: u32 = 256;

/// EEPROM bytes at the end of the address space reserved for the sequencer table
pub const FW_RESERVED_BYTES: u32 = 9;

/// Where payloads go, for a given carrier build
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Layout {
    /// Value of an unprogrammed cell, also used to detect collisions
    pub erased: u8,
    pub dna_flash_offset: u32,
    pub eeprom_size: u32,
    pub eeprom_reserved: u32,
}

impl Default for Layout {
    fn default() -> Layout {
        Layout {
            erased: ERASED_BYTE,
            dna_flash_offset: DNA_FLASH_OFFSET,
            eeprom_size: FW_BYTES_EEPROM,
            eeprom_reserved: FW_RESERVED_BYTES,
        }
    }
}

impl Layout {
    /// The EEPROM region reserved for the sequencer table
    pub fn reserved_eeprom_region(&self) -> Result<Range<u32>, ImageError> {
        if self.eeprom_reserved > self.eeprom_size {
            return Err(ImageError::InvalidLayout(
                self.eeprom_reserved,
                self.eeprom_size,
            ));
        }

        Ok(self.eeprom_size - self.eeprom_reserved..self.eeprom_size)
    }
}

#[derive(Error, Debug, Eq, PartialEq)]
pub enum ImageError {
    #[error(
        "The firmware already has data ({:#04x}) at {:#06x}, where the DNA is stored - firmware too large?",
        value,
        address
    )]
    Collision { address: u32, value: u8 },
    #[error("{} bytes don't fit in the {} byte reserved EEPROM region", _0, _1)]
    ReservedRegionOverflow(usize, u32),
    #[error("{} reserved EEPROM bytes don't fit in a {} byte EEPROM", _0, _1)]
    InvalidLayout(u32, u32),
    #[error("{} bytes at {:#010x} run past the end of the address space", len, address)]
    AddressOverflow { address: u32, len: usize },
}

/// A sparse byte addressable memory image
///
/// Reading an address that was never written returns the padding value.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Image {
    data: BTreeMap<u32, u8>,
    padding: u8,
}

impl Image {
    pub fn new(padding: u8) -> Image {
        Image {
            data: BTreeMap::new(),
            padding,
        }
    }

    pub fn get(&self, address: u32) -> u8 {
        self.data.get(&address).copied().unwrap_or(self.padding)
    }

    /// Returns true if `address` has been written
    pub fn contains(&self, address: u32) -> bool {
        self.data.contains_key(&address)
    }

    pub fn set(&mut self, address: u32, value: u8) {
        self.data.insert(address, value);
    }

    /// Returns the addresses `bytes` would occupy when written at `address`
    fn span(address: u32, bytes: &[u8]) -> Result<Range<u32>, ImageError> {
        let overflow = || ImageError::AddressOverflow {
            address,
            len: bytes.len(),
        };
        let len = u32::try_from(bytes.len()).map_err(|_| overflow())?;
        let end = address.checked_add(len).ok_or_else(overflow)?;

        Ok(address..end)
    }

    /// Writes `bytes` starting at `address`, overwriting whatever is there
    pub fn write(&mut self, address: u32, bytes: &[u8]) -> Result<(), ImageError> {
        for (address, byte) in Image::span(address, bytes)?.zip(bytes) {
            self.set(address, *byte);
        }

        Ok(())
    }

    /// Writes `bytes` starting at `address`, only if every destination still reads as `erased`
    ///
    /// Nothing is written when a collision is found.
    pub fn write_erased(&mut self, address: u32, bytes: &[u8], erased: u8) -> Result<(), ImageError> {
        let span = Image::span(address, bytes)?;

        if let Some(address) = span.clone().find(|address| self.get(*address) != erased) {
            return Err(ImageError::Collision {
                address,
                value: self.get(address),
            });
        }

        self.write(span.start, bytes)
    }

    pub fn fill(&mut self, range: Range<u32>, value: u8) {
        for address in range {
            self.set(address, value);
        }
    }

    /// The number of written bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the written bytes as runs of contiguous addresses, in ascending order
    pub fn segments(&self) -> Vec<(u32, Vec<u8>)> {
        let mut segments: Vec<(u32, Vec<u8>)> = Vec::new();

        for (address, byte) in &self.data {
            match segments.last_mut() {
                Some((start, bytes)) if start.wrapping_add(bytes.len() as u32) == *address => {
                    bytes.push(*byte)
                }
                _ => segments.push((*address, vec![*byte])),
            }
        }

        segments
    }
}

/// Places the `dna` blob in the `firmware` flash image
///
/// Fails with `ImageError::Collision` when the firmware already occupies any of the DNA bytes, in
/// which case `firmware` is left untouched.
pub fn patch_firmware(firmware: &mut Image, dna: &[u8], layout: &Layout) -> Result<(), ImageError> {
    debug!(
        "Writing {} bytes of DNA to flash at {:#06x}",
        dna.len(),
        layout.dna_flash_offset
    );

    firmware.write_erased(layout.dna_flash_offset, dna, layout.erased)
}

/// Creates the EEPROM image holding the sequencer `table`
///
/// The whole EEPROM is erased, the table is written at the start of the reserved region.
pub fn eeprom_image(table: &[u8], layout: &Layout) -> Result<Image, ImageError> {
    let reserved = layout.reserved_eeprom_region()?;

    if table.len() > (reserved.end - reserved.start) as usize {
        return Err(ImageError::ReservedRegionOverflow(
            table.len(),
            layout.eeprom_reserved,
        ));
    }

    let mut eeprom = Image::new(layout.erased);

    eeprom.fill(0..reserved.end, layout.erased);
    eeprom.write(reserved.start, table)?;

    debug!(
        "Wrote {} bytes of sequencer data to EEPROM at {:#04x}",
        table.len(),
        reserved.start
    );

    Ok(eeprom)
}
