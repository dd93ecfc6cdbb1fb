//! Slot layout
//!
//! Tag and length prefix of every region in a heap file.

use crate::error::{Result, VaultError};

/// Liveness tag stored in the first byte of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotTag {
    Live = b' ',
    Free = b'*',
}

impl SlotTag {
    pub fn from_byte(byte: u8, address: u64) -> Result<Self> {
        match byte {
            b' ' => Ok(SlotTag::Live),
            b'*' => Ok(SlotTag::Free),
            other => Err(VaultError::Corruption(format!(
                "unrecognized slot tag 0x{:02x} at address {}",
                other, address
            ))),
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// Decoded slot prefix
#[derive(Debug, Clone, Copy)]
pub(super) struct SlotHeader {
    pub address: u64,
    pub tag: SlotTag,
    /// Bytes available for the payload (the on-disk length field)
    pub capacity: usize,
}

impl SlotHeader {
    pub fn parse(address: u64, raw: [u8; 3]) -> Result<Self> {
        Ok(Self {
            address,
            tag: SlotTag::from_byte(raw[0], address)?,
            capacity: u16::from_be_bytes([raw[1], raw[2]]) as usize,
        })
    }

    /// Address of the first payload byte (also where the next pointer lives)
    pub fn payload_offset(&self) -> u64 {
        self.address + super::SLOT_HEADER_SIZE
    }

    /// Address one past the end of this slot
    pub fn end(&self) -> u64 {
        self.payload_offset() + self.capacity as u64
    }
}
