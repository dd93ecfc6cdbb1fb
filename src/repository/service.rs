use std::path::Path;

use crate::config::Config;
use crate::error::{Result, ValidationError};
use crate::index::hash::{text_key, HashIndex, HashKey};
use crate::model::Service;
use crate::record::Record;
use crate::search::TextMatcher;

use super::{check_hash_index, open_hash_index, rebuild_hash_index, EntityFile, EntityReport, EntityStats};

/// Services, unique by name ignoring case
pub struct ServiceRepository {
    file: EntityFile<Service>,
    by_name: HashIndex,
}

fn name_key(service: &Service) -> HashKey {
    text_key(&service.normalized_name())
}

impl ServiceRepository {
    pub fn open(dir: &Path, config: &Config) -> Result<Self> {
        Ok(Self {
            file: EntityFile::open(dir, "services", config.sync_strategy)?,
            by_name: open_hash_index(dir, "services_name", config)?,
        })
    }

    pub fn create(&mut self, mut service: Service) -> Result<Service> {
        service.name = service.name.trim().to_string();
        service.validate()?;
        self.ensure_name_free(&service)?;

        let id = self.file.create(&mut service)?;
        self.by_name.insert(name_key(&service), id)?;
        Ok(service)
    }

    pub fn read(&mut self, id: i32) -> Result<Option<Service>> {
        self.file.read(id)
    }

    /// Service called `name`, ignoring case and surrounding spaces
    pub fn find_by_name(&mut self, name: &str) -> Result<Option<Service>> {
        let wanted = name.trim().to_lowercase();
        for id in self.by_name.lookup(text_key(&wanted)) {
            if let Some(service) = self.file.read(id)? {
                if service.normalized_name() == wanted {
                    return Ok(Some(service));
                }
            }
        }
        Ok(None)
    }

    pub fn update(&mut self, service: &Service) -> Result<bool> {
        let mut service = service.clone();
        service.name = service.name.trim().to_string();
        service.validate()?;
        let Some(current) = self.file.read(service.id)? else {
            return Ok(false);
        };

        let renamed = current.normalized_name() != service.normalized_name();
        if renamed {
            self.ensure_name_free(&service)?;
        }
        if !self.file.update(&service)? {
            return Ok(false);
        }
        if renamed {
            self.by_name.delete(name_key(&current), service.id)?;
            self.by_name.insert(name_key(&service), service.id)?;
        }
        Ok(true)
    }

    pub fn delete(&mut self, id: i32) -> Result<Option<Service>> {
        let removed = self.file.delete(id)?;
        if let Some(service) = &removed {
            self.by_name.delete(name_key(service), id)?;
        }
        Ok(removed)
    }

    pub fn exists(&self, id: i32) -> bool {
        self.file.exists(id)
    }

    pub fn all(&mut self) -> Result<Vec<Service>> {
        self.file.scan()
    }

    pub fn search_by_name(&mut self, matcher: &dyn TextMatcher, needle: &str) -> Result<Vec<Service>> {
        self.file.find_all(|s| matcher.matches(&s.name, needle))
    }

    pub fn rebuild_indexes(&mut self) -> Result<()> {
        self.file.rebuild_index()?;
        rebuild_hash_index(&mut self.file, &mut self.by_name, name_key)?;
        Ok(())
    }

    pub fn check(&mut self) -> Result<EntityReport> {
        let mut report = self.file.check()?;
        check_hash_index(&mut self.file, &self.by_name, name_key, &mut report.issues)?;
        Ok(report)
    }

    pub fn stats(&mut self) -> Result<EntityStats> {
        self.file.stats()
    }

    pub fn name_index(&self) -> &HashIndex {
        &self.by_name
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()?;
        self.by_name.sync()
    }

    fn ensure_name_free(&mut self, service: &Service) -> Result<()> {
        match self.find_by_name(&service.name)? {
            Some(other) if other.id != service.id => Err(ValidationError::Duplicate {
                entity: Service::ENTITY,
                key: service.name.clone(),
            }
            .into()),
            _ => Ok(()),
        }
    }
}
