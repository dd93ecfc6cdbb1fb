use std::path::Path;

use crate::config::Config;
use crate::error::Result;
use crate::index::hash::{id_key, HashIndex, HashKey};
use crate::model::Pet;
use crate::search::TextMatcher;

use super::{check_hash_index, open_hash_index, rebuild_hash_index, EntityFile, EntityReport, EntityStats};

/// Pets, grouped by owner
///
/// The owner index is keyed by the owner id alone, so listing one owner's
/// pets is a single bucket walk.
pub struct PetRepository {
    file: EntityFile<Pet>,
    by_owner: HashIndex,
}

fn owner_key(pet: &Pet) -> HashKey {
    id_key(pet.owner_id)
}

impl PetRepository {
    pub fn open(dir: &Path, config: &Config) -> Result<Self> {
        Ok(Self {
            file: EntityFile::open(dir, "pets", config.sync_strategy)?,
            by_owner: open_hash_index(dir, "pets_owner", config)?,
        })
    }

    pub fn create(&mut self, mut pet: Pet) -> Result<Pet> {
        pet.validate()?;
        let id = self.file.create(&mut pet)?;
        self.by_owner.insert(owner_key(&pet), id)?;
        Ok(pet)
    }

    pub fn read(&mut self, id: i32) -> Result<Option<Pet>> {
        self.file.read(id)
    }

    /// Every pet of `owner_id`, ascending by id
    pub fn pets_of(&mut self, owner_id: i32) -> Result<Vec<Pet>> {
        let mut ids = self.by_owner.lookup(id_key(owner_id));
        ids.sort_unstable();

        let mut pets = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(pet) = self.file.read(id)? {
                pets.push(pet);
            }
        }
        Ok(pets)
    }

    /// Rewrite a pet, moving its owner entry if the owner changed
    pub fn update(&mut self, pet: &Pet) -> Result<bool> {
        pet.validate()?;
        let Some(current) = self.file.read(pet.id)? else {
            return Ok(false);
        };
        if !self.file.update(pet)? {
            return Ok(false);
        }
        if current.owner_id != pet.owner_id {
            self.by_owner.delete(owner_key(&current), pet.id)?;
            self.by_owner.insert(owner_key(pet), pet.id)?;
        }
        Ok(true)
    }

    pub fn delete(&mut self, id: i32) -> Result<Option<Pet>> {
        let removed = self.file.delete(id)?;
        if let Some(pet) = &removed {
            self.by_owner.delete(owner_key(pet), id)?;
        }
        Ok(removed)
    }

    pub fn exists(&self, id: i32) -> bool {
        self.file.exists(id)
    }

    pub fn all(&mut self) -> Result<Vec<Pet>> {
        self.file.scan()
    }

    pub fn search_by_name(&mut self, matcher: &dyn TextMatcher, needle: &str) -> Result<Vec<Pet>> {
        self.file.find_all(|p| matcher.matches(&p.name, needle))
    }

    pub fn rebuild_indexes(&mut self) -> Result<()> {
        self.file.rebuild_index()?;
        rebuild_hash_index(&mut self.file, &mut self.by_owner, owner_key)?;
        Ok(())
    }

    pub fn check(&mut self) -> Result<EntityReport> {
        let mut report = self.file.check()?;
        check_hash_index(&mut self.file, &self.by_owner, owner_key, &mut report.issues)?;
        Ok(report)
    }

    pub fn stats(&mut self) -> Result<EntityStats> {
        self.file.stats()
    }

    pub fn owner_index(&self) -> &HashIndex {
        &self.by_owner
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()?;
        self.by_owner.sync()
    }
}
