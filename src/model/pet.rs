use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::record::{PayloadReader, PayloadWriter, Record};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pet {
    pub id: i32,
    pub name: String,
    pub species: String,
    pub breed: String,
    /// Kilograms
    pub weight: f32,
    /// Customer id
    pub owner_id: i32,
}

impl Pet {
    pub fn new(name: &str, species: &str, breed: &str, weight: f32, owner_id: i32) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            species: species.to_string(),
            breed: breed.to_string(),
            weight,
            owner_id,
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        super::require("pet name", &self.name)?;
        if !self.weight.is_finite() || self.weight < 0.0 {
            return Err(ValidationError::Invalid(format!("weight {} is not a valid weight", self.weight)).into());
        }
        Ok(())
    }
}

impl Record for Pet {
    const ENTITY: &'static str = "pet";

    fn id(&self) -> i32 {
        self.id
    }

    fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    fn encode(&self, out: &mut PayloadWriter) -> Result<()> {
        out.put_i32(self.id);
        out.put_str(&self.name)?;
        out.put_str(&self.species)?;
        out.put_str(&self.breed)?;
        out.put_f32(self.weight);
        out.put_i32(self.owner_id);
        Ok(())
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self> {
        Ok(Self {
            id: input.i32()?,
            name: input.string()?,
            species: input.string()?,
            breed: input.string()?,
            weight: input.f32()?,
            owner_id: input.i32()?,
        })
    }
}
