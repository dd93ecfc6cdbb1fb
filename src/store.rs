//! Store Module
//!
//! Owns one repository per entity and enforces the rules that cross entity
//! boundaries.
//!
//! ## Responsibilities
//! - Reject records whose parents do not exist
//! - Cascade deletes from parents to their dependents
//! - Whole-store integrity checks, index rebuilds and statistics
//!
//! Every check runs before the first file is touched, so a rejected call
//! leaves the data directory byte-for-byte unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::cipher::{FieldCipher, KeyRing, PlainCipher, XorHexCipher};
use crate::config::Config;
use crate::error::{Result, ValidationError, VaultError};
use crate::model::{Booking, Customer, Pet, Service};
use crate::record::Record;
use crate::repository::{
    BookingRepository, CustomerRepository, EntityReport, EntityStats, PetRepository, ServiceRepository,
};
use crate::search::TextMatcher;

/// Records removed by one delete call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Removed {
    pub customers: usize,
    pub pets: usize,
    pub services: usize,
    pub bookings: usize,
}

impl Removed {
    pub fn total(&self) -> usize {
        self.customers + self.pets + self.services + self.bookings
    }
}

/// Outcome of [`Store::check`]
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub entities: Vec<EntityReport>,
    /// Dangling references between entities
    pub references: Vec<String>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.references.is_empty() && self.entities.iter().all(EntityReport::is_clean)
    }

    /// Every problem found, entity issues first
    pub fn issues(&self) -> impl Iterator<Item = &String> {
        self.entities
            .iter()
            .flat_map(|e| e.issues.iter())
            .chain(self.references.iter())
    }
}

/// Outcome of [`Store::stats`]
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    pub entities: Vec<EntityStats>,
    pub cpf_depth: u8,
    pub owner_depth: u8,
    pub owner_buckets: usize,
    pub service_name_depth: u8,
    pub booking_tree_height: usize,
    pub cipher: &'static str,
}

/// The embedded record store
///
/// ## Data Directory
/// ```text
///   {data_dir}/
///     ├── customers/   customers.db, customers.idx, customers_cpf.hdir/.hbkt
///     ├── pets/        pets.db, pets.idx, pets_owner.hdir/.hbkt
///     ├── services/    services.db, services.idx, services_name.hdir/.hbkt
///     ├── bookings/    bookings.db, bookings.idx, bookings_key.bpt
///     ├── keys/        field.key
///     └── field_cipher name of the cipher the e-mail field was written with
/// ```
///
/// Single writer: callers must not share one store across threads without
/// their own locking.
pub struct Store {
    config: Config,
    customers: CustomerRepository,
    pets: PetRepository,
    services: ServiceRepository,
    bookings: BookingRepository,
}

impl Store {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const CUSTOMER_DIR: &'static str = "customers";
    const PET_DIR: &'static str = "pets";
    const SERVICE_DIR: &'static str = "services";
    const BOOKING_DIR: &'static str = "bookings";
    const KEY_FILE: &'static str = "keys/field.key";
    const CIPHER_FILE: &'static str = "field_cipher";

    /// Open or create a store
    ///
    /// With `encrypt_fields` on, the key ring under `keys/` is loaded, or
    /// generated on first open. A store written with the other setting is
    /// rejected with [`VaultError::Config`].
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let wanted = if config.encrypt_fields {
            XorHexCipher::NAME
        } else {
            PlainCipher::NAME
        };
        Self::claim_cipher(&config.data_dir, wanted)?;

        let cipher: Box<dyn FieldCipher> = if config.encrypt_fields {
            let ring = KeyRing::load_or_generate(&config.data_dir.join(Self::KEY_FILE))?;
            Box::new(XorHexCipher::new(ring))
        } else {
            Box::new(PlainCipher)
        };
        Self::open_with_cipher(config, cipher)
    }

    /// Open with the default config rooted at `path`
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config::builder().data_dir(path).build();
        Self::open(config)
    }

    /// Open with an explicitly supplied field cipher
    ///
    /// The cipher's name must match the one the store was created with.
    pub fn open_with_cipher(config: Config, cipher: Box<dyn FieldCipher>) -> Result<Self> {
        config.validate()?;
        let root = config.data_dir.clone();
        Self::claim_cipher(&root, cipher.name())?;

        // Step 1: Open every repository (creates missing files)
        let customers = CustomerRepository::open(&root.join(Self::CUSTOMER_DIR), &config, cipher)?;
        let pets = PetRepository::open(&root.join(Self::PET_DIR), &config)?;
        let services = ServiceRepository::open(&root.join(Self::SERVICE_DIR), &config)?;
        let bookings = BookingRepository::open(&root.join(Self::BOOKING_DIR), &config)?;

        let store = Self {
            config,
            customers,
            pets,
            services,
            bookings,
        };

        // Step 2: Report what was found
        tracing::info!(
            "Opened store at {} (cipher: {})",
            root.display(),
            store.customers.cipher_name()
        );
        Ok(store)
    }

    /// Record `name` as the store's field cipher, or check it against the
    /// one already recorded
    ///
    /// Stores without a marker but with a key file were written enciphered.
    fn claim_cipher(root: &Path, name: &str) -> Result<()> {
        let marker = root.join(Self::CIPHER_FILE);
        let recorded = if marker.exists() {
            Some(fs::read_to_string(&marker)?.trim().to_string())
        } else if root.join(Self::KEY_FILE).exists() {
            Some(XorHexCipher::NAME.to_string())
        } else {
            None
        };

        match recorded {
            Some(recorded) if recorded != name => Err(VaultError::Config(format!(
                "{} was written with field cipher '{}', cannot open it with '{}'",
                root.display(),
                recorded,
                name
            ))),
            Some(_) if marker.exists() => Ok(()),
            _ => {
                fs::create_dir_all(root)?;
                fs::write(&marker, format!("{}\n", name))?;
                Ok(())
            }
        }
    }

    // =========================================================================
    // Customers
    // =========================================================================

    pub fn add_customer(&mut self, customer: Customer) -> Result<Customer> {
        self.customers.create(customer)
    }

    pub fn customer(&mut self, id: i32) -> Result<Option<Customer>> {
        self.customers.read(id)
    }

    pub fn customer_by_cpf(&mut self, cpf: &str) -> Result<Option<Customer>> {
        self.customers.find_by_cpf(cpf)
    }

    pub fn customers(&mut self) -> Result<Vec<Customer>> {
        self.customers.all()
    }

    pub fn update_customer(&mut self, customer: &Customer) -> Result<()> {
        if !self.customers.update(customer)? {
            return Err(not_found::<Customer>(customer.id));
        }
        Ok(())
    }

    /// Delete a customer together with their pets and those pets' bookings
    pub fn delete_customer(&mut self, id: i32) -> Result<Removed> {
        if !self.customers.exists(id) {
            return Err(not_found::<Customer>(id));
        }

        let mut removed = Removed::default();
        for pet in self.pets.pets_of(id)? {
            self.remove_pet(pet.id, &mut removed)?;
        }
        if self.customers.delete(id)?.is_some() {
            removed.customers += 1;
        }

        tracing::debug!(
            "Deleted customer {} with {} pets and {} bookings",
            id,
            removed.pets,
            removed.bookings
        );
        Ok(removed)
    }

    // =========================================================================
    // Pets
    // =========================================================================

    pub fn add_pet(&mut self, pet: Pet) -> Result<Pet> {
        self.require_customer(pet.owner_id)?;
        self.pets.create(pet)
    }

    pub fn pet(&mut self, id: i32) -> Result<Option<Pet>> {
        self.pets.read(id)
    }

    /// All pets of one owner, through the owner hash index
    pub fn pets_of(&mut self, owner_id: i32) -> Result<Vec<Pet>> {
        self.pets.pets_of(owner_id)
    }

    pub fn pets(&mut self) -> Result<Vec<Pet>> {
        self.pets.all()
    }

    pub fn update_pet(&mut self, pet: &Pet) -> Result<()> {
        if !self.pets.exists(pet.id) {
            return Err(not_found::<Pet>(pet.id));
        }
        self.require_customer(pet.owner_id)?;
        if !self.pets.update(pet)? {
            return Err(not_found::<Pet>(pet.id));
        }
        Ok(())
    }

    /// Delete a pet and its bookings
    pub fn delete_pet(&mut self, id: i32) -> Result<Removed> {
        if !self.pets.exists(id) {
            return Err(not_found::<Pet>(id));
        }
        let mut removed = Removed::default();
        self.remove_pet(id, &mut removed)?;
        Ok(removed)
    }

    // =========================================================================
    // Services
    // =========================================================================

    pub fn add_service(&mut self, service: Service) -> Result<Service> {
        self.services.create(service)
    }

    pub fn service(&mut self, id: i32) -> Result<Option<Service>> {
        self.services.read(id)
    }

    pub fn service_by_name(&mut self, name: &str) -> Result<Option<Service>> {
        self.services.find_by_name(name)
    }

    pub fn services(&mut self) -> Result<Vec<Service>> {
        self.services.all()
    }

    pub fn update_service(&mut self, service: &Service) -> Result<()> {
        if !self.services.update(service)? {
            return Err(not_found::<Service>(service.id));
        }
        Ok(())
    }

    /// Delete a service and every booking made for it
    pub fn delete_service(&mut self, id: i32) -> Result<Removed> {
        if !self.services.exists(id) {
            return Err(not_found::<Service>(id));
        }

        let mut removed = Removed::default();
        for booking in self.bookings.bookings_for_service(id)? {
            if self.bookings.delete(booking.id)?.is_some() {
                removed.bookings += 1;
            }
        }
        if self.services.delete(id)?.is_some() {
            removed.services += 1;
        }
        Ok(removed)
    }

    // =========================================================================
    // Bookings
    // =========================================================================

    pub fn add_booking(&mut self, booking: Booking) -> Result<Booking> {
        self.require_pet(booking.pet_id)?;
        self.require_service(booking.service_id)?;
        self.bookings.create(booking)
    }

    /// Convenience over [`Store::add_booking`] taking an ISO date string
    pub fn book(&mut self, pet_id: i32, service_id: i32, date: &str) -> Result<Booking> {
        let date = Booking::parse_date(date)?;
        self.add_booking(Booking::new(date, pet_id, service_id))
    }

    pub fn booking(&mut self, id: i32) -> Result<Option<Booking>> {
        self.bookings.read(id)
    }

    pub fn booking_on(&mut self, pet_id: i32, service_id: i32, date: NaiveDate) -> Result<Option<Booking>> {
        let key = Booking::new(date, pet_id, service_id).key();
        self.bookings.find_by_key(&key)
    }

    /// Bookings of one pet, through a B+-tree range scan
    pub fn bookings_for_pet(&mut self, pet_id: i32) -> Result<Vec<Booking>> {
        self.bookings.bookings_for_pet(pet_id)
    }

    pub fn bookings(&mut self) -> Result<Vec<Booking>> {
        self.bookings.all()
    }

    pub fn update_booking(&mut self, booking: &Booking) -> Result<()> {
        if !self.bookings.exists(booking.id) {
            return Err(not_found::<Booking>(booking.id));
        }
        self.require_pet(booking.pet_id)?;
        self.require_service(booking.service_id)?;
        if !self.bookings.update(booking)? {
            return Err(not_found::<Booking>(booking.id));
        }
        Ok(())
    }

    pub fn delete_booking(&mut self, id: i32) -> Result<Removed> {
        match self.bookings.delete(id)? {
            Some(_) => Ok(Removed {
                bookings: 1,
                ..Removed::default()
            }),
            None => Err(not_found::<Booking>(id)),
        }
    }

    // =========================================================================
    // Search
    // =========================================================================

    pub fn search_customers(&mut self, matcher: &dyn TextMatcher, needle: &str) -> Result<Vec<Customer>> {
        self.customers.search_by_name(matcher, needle)
    }

    pub fn search_pets(&mut self, matcher: &dyn TextMatcher, needle: &str) -> Result<Vec<Pet>> {
        self.pets.search_by_name(matcher, needle)
    }

    pub fn search_services(&mut self, matcher: &dyn TextMatcher, needle: &str) -> Result<Vec<Service>> {
        self.services.search_by_name(matcher, needle)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Verify every file and every cross-entity reference
    pub fn check(&mut self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport {
            entities: vec![
                self.customers.check()?,
                self.pets.check()?,
                self.services.check()?,
                self.bookings.check()?,
            ],
            references: Vec::new(),
        };

        for pet in self.pets.all()? {
            if !self.customers.exists(pet.owner_id) {
                report
                    .references
                    .push(format!("pet {} belongs to missing customer {}", pet.id, pet.owner_id));
            }
        }
        for booking in self.bookings.all()? {
            if !self.pets.exists(booking.pet_id) {
                report
                    .references
                    .push(format!("booking {} names missing pet {}", booking.id, booking.pet_id));
            }
            if !self.services.exists(booking.service_id) {
                report.references.push(format!(
                    "booking {} names missing service {}",
                    booking.id, booking.service_id
                ));
            }
        }

        for issue in report.issues() {
            tracing::warn!("Integrity: {}", issue);
        }
        Ok(report)
    }

    /// Rebuild every primary and secondary index from the heap files
    pub fn rebuild_indexes(&mut self) -> Result<()> {
        self.customers.rebuild_indexes()?;
        self.pets.rebuild_indexes()?;
        self.services.rebuild_indexes()?;
        self.bookings.rebuild_indexes()?;
        tracing::info!("Rebuilt all indexes under {}", self.config.data_dir.display());
        Ok(())
    }

    pub fn stats(&mut self) -> Result<StoreStats> {
        Ok(StoreStats {
            entities: vec![
                self.customers.stats()?,
                self.pets.stats()?,
                self.services.stats()?,
                self.bookings.stats()?,
            ],
            cpf_depth: self.customers.cpf_index().global_depth(),
            owner_depth: self.pets.owner_index().global_depth(),
            owner_buckets: self.pets.owner_index().bucket_count(),
            service_name_depth: self.services.name_index().global_depth(),
            booking_tree_height: self.bookings.key_index().height(),
            cipher: self.customers.cipher_name(),
        })
    }

    /// Flush every file to disk
    pub fn sync(&mut self) -> Result<()> {
        self.customers.sync()?;
        self.pets.sync()?;
        self.services.sync()?;
        self.bookings.sync()
    }

    /// Close the store, syncing every file
    pub fn close(mut self) -> Result<()> {
        self.sync()?;
        tracing::info!("Closed store at {}", self.config.data_dir.display());
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directory holding one entity's files
    pub fn entity_dir(&self, entity: &str) -> Option<PathBuf> {
        [
            (Customer::ENTITY, Self::CUSTOMER_DIR),
            (Pet::ENTITY, Self::PET_DIR),
            (Service::ENTITY, Self::SERVICE_DIR),
            (Booking::ENTITY, Self::BOOKING_DIR),
        ]
        .into_iter()
        .find(|(name, _)| *name == entity)
        .map(|(_, dir)| self.config.data_dir.join(dir))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn remove_pet(&mut self, id: i32, removed: &mut Removed) -> Result<()> {
        for booking in self.bookings.bookings_for_pet(id)? {
            if self.bookings.delete(booking.id)?.is_some() {
                removed.bookings += 1;
            }
        }
        if self.pets.delete(id)?.is_some() {
            removed.pets += 1;
        }
        Ok(())
    }

    fn require_customer(&self, id: i32) -> Result<()> {
        if self.customers.exists(id) {
            Ok(())
        } else {
            Err(missing::<Customer>(id))
        }
    }

    fn require_pet(&self, id: i32) -> Result<()> {
        if self.pets.exists(id) {
            Ok(())
        } else {
            Err(missing::<Pet>(id))
        }
    }

    fn require_service(&self, id: i32) -> Result<()> {
        if self.services.exists(id) {
            Ok(())
        } else {
            Err(missing::<Service>(id))
        }
    }
}

fn not_found<T: Record>(id: i32) -> VaultError {
    ValidationError::NotFound { entity: T::ENTITY, id }.into()
}

fn missing<T: Record>(id: i32) -> VaultError {
    ValidationError::MissingReference { entity: T::ENTITY, id }.into()
}
