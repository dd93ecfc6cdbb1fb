//! Entity Schemas
//!
//! The four record types stored by petvault. Each one owns its payload
//! layout; the heap file never looks inside.
//!
//! ```text
//! Customer ──< Pet ──< Booking >── Service
//! ```

mod booking;
mod customer;
mod pet;
mod service;

pub use booking::Booking;
pub use customer::Customer;
pub use pet::Pet;
pub use service::Service;

use crate::error::{Result, ValidationError};

/// Reject blank required text fields
pub(crate) fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Invalid(format!("{} must not be empty", field)).into());
    }
    Ok(())
}
