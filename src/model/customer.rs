use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::record::{PayloadReader, PayloadWriter, Record};

/// A pet owner, identified naturally by CPF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: i32,
    /// Digits only, see [`Customer::normalize_cpf`]
    pub cpf: String,
    pub name: String,
    pub email: String,
    pub phones: Vec<String>,
}

impl Customer {
    pub fn new(cpf: &str, name: &str, email: &str, phones: Vec<String>) -> Self {
        Self {
            id: 0,
            cpf: Self::normalize_cpf(cpf),
            name: name.to_string(),
            email: email.to_string(),
            phones,
        }
    }

    /// Strip punctuation so `123.456.789-00` and `12345678900` collide
    pub fn normalize_cpf(cpf: &str) -> String {
        cpf.chars().filter(char::is_ascii_digit).collect()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.cpf.is_empty() {
            return Err(ValidationError::Invalid("cpf must contain digits".to_string()).into());
        }
        super::require("customer name", &self.name)
    }
}

impl Record for Customer {
    const ENTITY: &'static str = "customer";

    fn id(&self) -> i32 {
        self.id
    }

    fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    fn encode(&self, out: &mut PayloadWriter) -> Result<()> {
        out.put_i32(self.id);
        out.put_str(&self.cpf)?;
        out.put_str(&self.name)?;
        out.put_str(&self.email)?;
        out.put_count(self.phones.len())?;
        for phone in &self.phones {
            out.put_str(phone)?;
        }
        Ok(())
    }

    fn decode(input: &mut PayloadReader<'_>) -> Result<Self> {
        let id = input.i32()?;
        let cpf = input.string()?;
        let name = input.string()?;
        let email = input.string()?;
        let count = input.count()?;
        let phones = (0..count).map(|_| input.string()).collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id,
            cpf,
            name,
            email,
            phones,
        })
    }
}
