use std::path::Path;

use crate::cipher::FieldCipher;
use crate::config::Config;
use crate::error::{Result, ValidationError, VaultError};
use crate::index::hash::{text_key, HashIndex};
use crate::model::Customer;
use crate::record::Record;
use crate::search::TextMatcher;

use super::{check_hash_index, open_hash_index, rebuild_hash_index, EntityFile, EntityReport, EntityStats};

/// Customers, unique by CPF
///
/// The e-mail field is enciphered on the way into the heap file and
/// deciphered on the way out; callers only ever see plain text.
pub struct CustomerRepository {
    file: EntityFile<Customer>,
    by_cpf: HashIndex,
    cipher: Box<dyn FieldCipher>,
}

fn cpf_key(customer: &Customer) -> u32 {
    text_key(&customer.cpf)
}

impl CustomerRepository {
    pub fn open(dir: &Path, config: &Config, cipher: Box<dyn FieldCipher>) -> Result<Self> {
        Ok(Self {
            file: EntityFile::open(dir, "customers", config.sync_strategy)?,
            by_cpf: open_hash_index(dir, "customers_cpf", config)?,
            cipher,
        })
    }

    /// Store a new customer; fails if the CPF is already registered
    pub fn create(&mut self, mut customer: Customer) -> Result<Customer> {
        customer.cpf = Customer::normalize_cpf(&customer.cpf);
        customer.validate()?;
        if self.find_by_cpf(&customer.cpf)?.is_some() {
            return Err(duplicate(&customer.cpf));
        }

        let mut stored = self.seal(&customer)?;
        let id = self.file.create(&mut stored)?;
        self.by_cpf.insert(cpf_key(&customer), id)?;

        customer.id = id;
        Ok(customer)
    }

    pub fn read(&mut self, id: i32) -> Result<Option<Customer>> {
        self.file.read(id)?.map(|c| self.open_sealed(c)).transpose()
    }

    /// Customer registered under `cpf`, punctuation ignored
    ///
    /// Hash candidates are confirmed against the stored CPF, so crc32
    /// collisions never produce a false match.
    pub fn find_by_cpf(&mut self, cpf: &str) -> Result<Option<Customer>> {
        let cpf = Customer::normalize_cpf(cpf);
        for id in self.by_cpf.lookup(text_key(&cpf)) {
            if let Some(customer) = self.file.read(id)? {
                if customer.cpf == cpf {
                    return self.open_sealed(customer).map(Some);
                }
            }
        }
        Ok(None)
    }

    /// Rewrite a customer; returns false if it does not exist
    ///
    /// A changed CPF must not belong to another customer.
    pub fn update(&mut self, customer: &Customer) -> Result<bool> {
        let mut customer = customer.clone();
        customer.cpf = Customer::normalize_cpf(&customer.cpf);
        customer.validate()?;
        let Some(current) = self.file.read(customer.id)? else {
            return Ok(false);
        };

        let cpf_changed = current.cpf != customer.cpf;
        if cpf_changed {
            if let Some(owner) = self.find_by_cpf(&customer.cpf)? {
                if owner.id != customer.id {
                    return Err(duplicate(&customer.cpf));
                }
            }
        }

        let stored = self.seal(&customer)?;
        if !self.file.update(&stored)? {
            return Ok(false);
        }
        if cpf_changed {
            self.by_cpf.delete(cpf_key(&current), customer.id)?;
            self.by_cpf.insert(cpf_key(&customer), customer.id)?;
        }
        Ok(true)
    }

    pub fn delete(&mut self, id: i32) -> Result<Option<Customer>> {
        let Some(removed) = self.file.delete(id)? else {
            return Ok(None);
        };
        self.by_cpf.delete(cpf_key(&removed), id)?;
        self.open_sealed(removed).map(Some)
    }

    pub fn exists(&self, id: i32) -> bool {
        self.file.exists(id)
    }

    pub fn all(&mut self) -> Result<Vec<Customer>> {
        self.file
            .scan()?
            .into_iter()
            .map(|c| self.open_sealed(c))
            .collect()
    }

    /// Customers whose name matches `needle`
    pub fn search_by_name(&mut self, matcher: &dyn TextMatcher, needle: &str) -> Result<Vec<Customer>> {
        Ok(self
            .all()?
            .into_iter()
            .filter(|c| matcher.matches(&c.name, needle))
            .collect())
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn rebuild_indexes(&mut self) -> Result<()> {
        self.file.rebuild_index()?;
        rebuild_hash_index(&mut self.file, &mut self.by_cpf, cpf_key)?;
        Ok(())
    }

    pub fn check(&mut self) -> Result<EntityReport> {
        let mut report = self.file.check()?;
        check_hash_index(&mut self.file, &self.by_cpf, cpf_key, &mut report.issues)?;
        Ok(report)
    }

    pub fn stats(&mut self) -> Result<EntityStats> {
        self.file.stats()
    }

    pub fn cpf_index(&self) -> &HashIndex {
        &self.by_cpf
    }

    pub fn heap_len(&self) -> u64 {
        self.file.heap_len()
    }

    pub fn cipher_name(&self) -> &'static str {
        self.cipher.name()
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()?;
        self.by_cpf.sync()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Copy with the e-mail enciphered, as it is written to disk
    fn seal(&self, customer: &Customer) -> Result<Customer> {
        let mut stored = customer.clone();
        stored.email = self.cipher.encrypt(&customer.email)?;
        Ok(stored)
    }

    fn open_sealed(&self, mut stored: Customer) -> Result<Customer> {
        stored.email = self.cipher.decrypt(&stored.email)?;
        Ok(stored)
    }
}

fn duplicate(cpf: &str) -> VaultError {
    ValidationError::Duplicate {
        entity: Customer::ENTITY,
        key: cpf.to_string(),
    }
    .into()
}
