//! Payload codec helpers
//!
//! Big-endian primitives shared by every entity schema. Strings are written
//! as a u16 byte length followed by UTF-8; repeated groups as an i32 count.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, VaultError};

/// Appends fields to a payload buffer
#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: BytesMut,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    /// Write a u16-length-prefixed UTF-8 string
    pub fn put_str(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len()).map_err(|_| {
            VaultError::Encoding(format!(
                "string of {} bytes exceeds the {} byte field limit",
                value.len(),
                u16::MAX
            ))
        })?;
        self.buf.put_u16(len);
        self.buf.put_slice(value.as_bytes());
        Ok(())
    }

    /// Write the element count of a repeated group
    pub fn put_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count)
            .map_err(|_| VaultError::Encoding(format!("group of {} elements is too large", count)))?;
        self.buf.put_i32(count);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Reads fields back out of a payload, checking bounds on every step
#[derive(Debug)]
pub struct PayloadReader<'a> {
    buf: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn need(&self, bytes: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < bytes {
            return Err(VaultError::Encoding(format!(
                "payload underflow reading {}: need {} bytes, have {}",
                what,
                bytes,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn i32(&mut self) -> Result<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32())
    }

    pub fn f32(&mut self) -> Result<f32> {
        self.need(4, "f32")?;
        Ok(self.buf.get_f32())
    }

    pub fn string(&mut self) -> Result<String> {
        self.need(2, "string length")?;
        let len = self.buf.get_u16() as usize;
        self.need(len, "string body")?;
        let text = std::str::from_utf8(&self.buf[..len])
            .map_err(|e| VaultError::Encoding(format!("invalid UTF-8 in string field: {}", e)))?
            .to_string();
        self.buf.advance(len);
        Ok(text)
    }

    /// Read a repeated-group count; negative counts are rejected
    pub fn count(&mut self) -> Result<usize> {
        let count = self.i32()?;
        usize::try_from(count)
            .map_err(|_| VaultError::Encoding(format!("negative group count {}", count)))
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Accept only zero padding after the last field.
    ///
    /// Slots keep their original capacity after a shorter rewrite, so a
    /// payload read back from the heap may carry a zeroed tail.
    pub fn finish(self) -> Result<()> {
        if self.buf.iter().any(|&b| b != 0) {
            return Err(VaultError::Encoding(format!(
                "{} unexpected trailing bytes after last field",
                self.buf.len()
            )));
        }
        Ok(())
    }
}
