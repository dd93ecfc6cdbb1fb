use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::record::{PayloadReader, PayloadWriter, Record};

/// Something a pet can be booked for; names are unique ignoring case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: i32,
    pub name: String,
    /// Price in cents
    pub price: i32,
}

impl Service {
    pub fn new(name: &str, price: i32) -> Self {
        Self {
            id: 0,
            name: name.trim().to_string(),
            price,
        }
    }

    /// Form used for the uniqueness check
    pub fn normalized_name(&self) -> String {
        self.name.trim().to_lowercase()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        super::require("service name", &self.name)?;
        if self.price < 0 {
            return Err(ValidationError::Invalid(format!("price {} is negative", self.price)).into());
        }
        Ok(())
    }
}

impl Record for Service {
    const ENTITY: &'static str = "service";

    fn id(&self) -> i32 {
        self.id
    }

    fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    fn encode(&self, out: &mut PayloadWriter) -> Result<()> {
        out.put_i32(self.id);
        out.put_str(&self.name)?;
        out.put_i32(self.price);
        Ok(())
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            id: input.i32()?,
            name: input.string()?,
            price: input.i32()?,
        })
    }
}
