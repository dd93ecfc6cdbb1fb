use std::path::Path;

use crate::config::Config;
use crate::error::{Result, ValidationError, VaultError};
use crate::index::TreeIndex;
use crate::model::Booking;
use crate::record::Record;

use super::{EntityFile, EntityReport, EntityStats};

/// `(pet id, service id, day number)`
pub type BookingKey = (i32, i32, i32);

/// Bookings, unique per pet, service and day
pub struct BookingRepository {
    file: EntityFile<Booking>,
    by_key: TreeIndex<BookingKey>,
}

impl BookingRepository {
    pub fn open(dir: &Path, config: &Config) -> Result<Self> {
        Ok(Self {
            file: EntityFile::open(dir, "bookings", config.sync_strategy)?,
            by_key: TreeIndex::open(&dir.join("bookings_key"), config.tree_order, config.sync_strategy)?,
        })
    }

    pub fn create(&mut self, mut booking: Booking) -> Result<Booking> {
        let key = booking.key();
        if self.by_key.contains(&key) {
            return Err(duplicate(&booking));
        }

        let id = self.file.create(&mut booking)?;
        self.by_key.insert(key, id)?;
        Ok(booking)
    }

    pub fn read(&mut self, id: i32) -> Result<Option<Booking>> {
        self.file.read(id)
    }

    /// The booking for this pet, service and day, if any
    pub fn find_by_key(&mut self, key: &BookingKey) -> Result<Option<Booking>> {
        match self.by_key.lookup(key) {
            Some(id) => self.file.read(id),
            None => Ok(None),
        }
    }

    /// Every booking of one pet, ordered by service then date
    pub fn bookings_for_pet(&mut self, pet_id: i32) -> Result<Vec<Booking>> {
        let lo = (pet_id, i32::MIN, i32::MIN);
        let hi = (pet_id, i32::MAX, i32::MAX);

        let mut bookings = Vec::new();
        for (_, id) in self.by_key.range(&lo, &hi) {
            if let Some(booking) = self.file.read(id)? {
                bookings.push(booking);
            }
        }
        Ok(bookings)
    }

    /// Bookings of one service; a full scan
    pub fn bookings_for_service(&mut self, service_id: i32) -> Result<Vec<Booking>> {
        self.file.find_all(|b| b.service_id == service_id)
    }

    /// Rewrite a booking; a changed key must still be unique
    pub fn update(&mut self, booking: &Booking) -> Result<bool> {
        let Some(current) = self.file.read(booking.id)? else {
            return Ok(false);
        };

        let moved = current.key() != booking.key();
        if moved && self.by_key.contains(&booking.key()) {
            return Err(duplicate(booking));
        }
        if !self.file.update(booking)? {
            return Ok(false);
        }
        if moved {
            self.by_key.delete(&current.key())?;
            self.by_key.insert(booking.key(), booking.id)?;
        }
        Ok(true)
    }

    pub fn delete(&mut self, id: i32) -> Result<Option<Booking>> {
        let removed = self.file.delete(id)?;
        if let Some(booking) = &removed {
            self.by_key.delete(&booking.key())?;
        }
        Ok(removed)
    }

    pub fn exists(&self, id: i32) -> bool {
        self.file.exists(id)
    }

    pub fn all(&mut self) -> Result<Vec<Booking>> {
        self.file.scan()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    pub fn rebuild_indexes(&mut self) -> Result<()> {
        self.file.rebuild_index()?;
        self.by_key.clear()?;
        let bookings = self.file.scan()?;
        for booking in &bookings {
            if !self.by_key.insert(booking.key(), booking.id)? {
                tracing::warn!("Booking {} repeats key {:?}; left out of the tree", booking.id, booking.key());
            }
        }
        tracing::debug!("Rebuilt booking tree index ({} entries)", self.by_key.len());
        Ok(())
    }

    pub fn check(&mut self) -> Result<EntityReport> {
        let mut report = self.file.check()?;
        let bookings = self.file.scan()?;

        for booking in &bookings {
            match self.by_key.lookup(&booking.key()) {
                Some(id) if id == booking.id => {}
                Some(id) => report.issues.push(format!(
                    "booking {} key {:?} is indexed to booking {}",
                    booking.id,
                    booking.key(),
                    id
                )),
                None => report
                    .issues
                    .push(format!("booking {} is missing from the tree index", booking.id)),
            }
        }
        if self.by_key.len() != bookings.len() {
            report.issues.push(format!(
                "tree index holds {} entries for {} bookings",
                self.by_key.len(),
                bookings.len()
            ));
        }

        let keys: Vec<BookingKey> = self.by_key.iter().map(|(k, _)| k).collect();
        if keys.windows(2).any(|w| w[0] >= w[1]) {
            report.issues.push("tree leaves are out of order".to_string());
        }
        Ok(report)
    }

    pub fn stats(&mut self) -> Result<EntityStats> {
        self.file.stats()
    }

    pub fn key_index(&self) -> &TreeIndex<BookingKey> {
        &self.by_key
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync()?;
        self.by_key.sync()
    }
}

fn duplicate(booking: &Booking) -> VaultError {
    ValidationError::Duplicate {
        entity: Booking::ENTITY,
        key: format!(
            "pet {} / service {} / {}",
            booking.pet_id, booking.service_id, booking.date
        ),
    }
    .into()
}
