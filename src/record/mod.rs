//! Record Module
//!
//! The contract every stored entity fulfils.
//!
//! ## Responsibilities
//! - Expose a mutable integer identity assigned by the store
//! - Encode to / decode from a payload the entity fully controls
//!
//! The heap file only sees opaque bytes; the length prefix it writes is the
//! only framing a payload gets.

mod codec;

pub use codec::{PayloadReader, PayloadWriter};

use crate::error::Result;

/// A typed entity that can live in a heap file
pub trait Record: Sized {
    /// Entity name used in file names, logs and validation messages
    const ENTITY: &'static str;

    /// Store-assigned identity (0 until the record is created)
    fn id(&self) -> i32;

    fn set_id(&mut self, id: i32);

    /// Write the fields in the entity's fixed order
    fn encode(&self, out: &mut PayloadWriter) -> Result<()>;

    /// Read the fields back in the same order
    fn decode(input: &mut PayloadReader<'_>) -> Result<Self>;

    /// Encode into a fresh payload buffer
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = PayloadWriter::new();
        self.encode(&mut out)?;
        Ok(out.into_vec())
    }

    /// Decode a full payload, tolerating the zero tail of a widened slot
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut input = PayloadReader::new(bytes);
        let record = Self::decode(&mut input)?;
        input.finish()?;
        Ok(record)
    }
}
