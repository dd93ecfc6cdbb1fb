use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError, VaultError};
use crate::record::{PayloadReader, PayloadWriter, Record};

/// ISO calendar date as written in the payload
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A pet booked for a service on a given day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: i32,
    pub date: NaiveDate,
    pub pet_id: i32,
    pub service_id: i32,
}

impl Booking {
    pub fn new(date: NaiveDate, pet_id: i32, service_id: i32) -> Self {
        Self {
            id: 0,
            date,
            pet_id,
            service_id,
        }
    }

    /// Parse a `YYYY-MM-DD` date
    pub fn parse_date(text: &str) -> Result<NaiveDate> {
        NaiveDate::parse_from_str(text.trim(), DATE_FORMAT)
            .map_err(|e| ValidationError::Invalid(format!("'{}' is not a date: {}", text, e)).into())
    }

    /// Tree key: pet first so one pet's bookings are contiguous
    pub fn key(&self) -> (i32, i32, i32) {
        (self.pet_id, self.service_id, self.date.num_days_from_ce())
    }
}

impl Record for Booking {
    const ENTITY: &'static str = "booking";

    fn id(&self) -> i32 {
        self.id
    }

    fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    fn encode(&self, out: &mut PayloadWriter) -> Result<()> {
        out.put_i32(self.id);
        out.put_str(&self.date.format(DATE_FORMAT).to_string())?;
        out.put_i32(self.pet_id);
        out.put_i32(self.service_id);
        Ok(())
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self> {
        let id = input.i32()?;
        let text = input.string()?;
        let date = NaiveDate::parse_from_str(&text, DATE_FORMAT)
            .map_err(|e| VaultError::Encoding(format!("booking {} has bad date '{}': {}", id, text, e)))?;
        Ok(Self {
            id,
            date,
            pet_id: input.i32()?,
            service_id: input.i32()?,
        })
    }
}
