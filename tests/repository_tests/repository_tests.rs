//! Tests for the per-entity repositories
//!
//! These tests verify:
//! - Id assignment and CRUD through heap file plus primary index
//! - Relocation on growth repoints the primary index
//! - Secondary indexes (CPF, owner, service name, booking key)
//! - Uniqueness checks run before any file is touched
//! - Field enciphering of customer e-mail addresses
//! - Index rebuild and consistency checks

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use petvault::cipher::{KeyRing, PlainCipher, XorHexCipher};
use petvault::config::{Config, SyncStrategy};
use petvault::heap::{HeapFile, SlotTag};
use petvault::index::PrimaryIndex;
use petvault::model::{Booking, Customer, Pet, Service};
use petvault::repository::{BookingRepository, CustomerRepository, EntityFile, PetRepository, ServiceRepository};
use petvault::search::ContainsMatcher;
use petvault::{ValidationError, VaultError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("entity");
    (temp_dir, dir)
}

fn config() -> Config {
    Config::builder().bucket_capacity(4).max_global_depth(8).tree_order(4).build()
}

fn plain_customers(dir: &Path) -> CustomerRepository {
    CustomerRepository::open(dir, &config(), Box::new(PlainCipher)).unwrap()
}

fn customer(cpf: &str, name: &str) -> Customer {
    Customer::new(cpf, name, &format!("{}@example.com", name.to_lowercase()), vec!["555-0100".to_string()])
}

fn date(text: &str) -> NaiveDate {
    Booking::parse_date(text).unwrap()
}

fn primary_address(dir: &Path, name: &str, id: i32) -> Option<u64> {
    PrimaryIndex::open(&dir.join(format!("{}.idx", name)), SyncStrategy::OnClose)
        .unwrap()
        .lookup(id)
}

fn is_duplicate(err: &VaultError) -> bool {
    matches!(err, VaultError::Validation(ValidationError::Duplicate { .. }))
}

// =============================================================================
// Entity File
// =============================================================================

#[test]
fn test_entity_file_crud_and_scans() {
    let (_temp, dir) = setup_temp_dir();
    let mut file: EntityFile<Service> = EntityFile::open(&dir, "services", SyncStrategy::OnClose).unwrap();

    let mut bath = Service::new("Banho", 3000);
    let mut cut = Service::new("Tosa", 2500);
    let mut shot = Service::new("Vacina", 9000);
    for service in [&mut bath, &mut cut, &mut shot] {
        let id = file.create(service).unwrap();
        assert_eq!(service.id, id);
    }

    assert!(dir.join("services.db").exists());
    assert!(dir.join("services.idx").exists());
    assert_eq!(file.ids(), vec![1, 2, 3]);
    assert_eq!(file.read(2).unwrap().unwrap(), cut);

    let cheap = file.find_all(|s| s.price < 5000).unwrap();
    assert_eq!(cheap, vec![bath.clone(), cut.clone()]);
    assert_eq!(file.find_first(|s| s.price > 5000).unwrap(), Some(shot.clone()));
    assert_eq!(file.find_first(|s| s.price > 10_000).unwrap(), None);

    assert_eq!(file.delete(1).unwrap(), Some(bath));
    assert_eq!(file.read(1).unwrap(), None);
    assert!(!file.exists(1));
    assert_eq!(file.delete(1).unwrap(), None);
    assert_eq!(file.len(), 2);
}

#[test]
fn test_failed_create_keeps_caller_id() {
    let (_temp, dir) = setup_temp_dir();
    let mut file: EntityFile<Service> = EntityFile::open(&dir, "services", SyncStrategy::OnClose).unwrap();
    file.create(&mut Service::new("Banho", 3000)).unwrap();
    let heap_before = file.heap_len();

    // The name fits a string field but the whole payload outgrows a slot
    let mut huge = Service::new(&"x".repeat(65_530), 100);
    huge.id = -7;
    let err = file.create(&mut huge).unwrap_err();

    assert!(matches!(err, VaultError::Encoding(_)));
    assert_eq!(huge.id, -7);
    assert_eq!(file.ids(), vec![1]);
    assert_eq!(file.heap_len(), heap_before);
    assert_eq!(file.create(&mut Service::new("Tosa", 2500)).unwrap(), 2);
}

// =============================================================================
// Customer Repository
// =============================================================================

#[test]
fn test_customer_ids_are_sequential() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);

    let a = repo.create(customer("111", "Ana")).unwrap();
    let b = repo.create(customer("222", "Bruno")).unwrap();

    assert_eq!((a.id, b.id), (1, 2));
    assert_eq!(repo.read(2).unwrap().unwrap(), b);
    assert_eq!(repo.read(3).unwrap(), None);
}

#[test]
fn test_ids_not_reused_after_delete() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);

    repo.create(customer("111", "Ana")).unwrap();
    let b = repo.create(customer("222", "Bruno")).unwrap();
    repo.delete(b.id).unwrap();

    let c = repo.create(customer("333", "Carla")).unwrap();
    assert_eq!(c.id, 3);
}

#[test]
fn test_cpf_lookup_ignores_punctuation() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);

    let ana = repo.create(customer("123.456.789-00", "Ana")).unwrap();

    assert_eq!(ana.cpf, "12345678900");
    assert_eq!(repo.find_by_cpf("12345678900").unwrap().unwrap().id, ana.id);
    assert_eq!(repo.find_by_cpf("123 456 789 00").unwrap().unwrap().id, ana.id);
    assert_eq!(repo.find_by_cpf("999").unwrap(), None);
}

#[test]
fn test_duplicate_cpf_leaves_files_untouched() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);
    repo.create(customer("123.456.789-00", "Ana")).unwrap();

    let heap_before = repo.heap_len();
    let idx_before = std::fs::read(dir.join("customers.idx")).unwrap();

    let err = repo.create(customer("12345678900", "Impostor")).unwrap_err();

    assert!(is_duplicate(&err));
    assert_eq!(repo.heap_len(), heap_before);
    assert_eq!(std::fs::read(dir.join("customers.idx")).unwrap(), idx_before);
    assert_eq!(repo.all().unwrap().len(), 1);
}

#[test]
fn test_update_to_taken_cpf_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);
    repo.create(customer("111", "Ana")).unwrap();
    let mut bruno = repo.create(customer("222", "Bruno")).unwrap();

    bruno.cpf = "111".to_string();
    assert!(is_duplicate(&repo.update(&bruno).unwrap_err()));

    bruno.cpf = "333".to_string();
    assert!(repo.update(&bruno).unwrap());
    assert_eq!(repo.find_by_cpf("333").unwrap().unwrap().id, bruno.id);
    assert_eq!(repo.find_by_cpf("222").unwrap(), None);
}

#[test]
fn test_blank_name_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);

    let err = repo.create(customer("111", "   ")).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(repo.heap_len(), petvault::heap::HEADER_SIZE);
}

#[test]
fn test_growing_update_relocates_and_repoints_index() {
    let (_temp, dir) = setup_temp_dir();
    let (id, old_address) = {
        let mut repo = plain_customers(&dir);
        let ana = repo.create(customer("111", "Ana")).unwrap();
        repo.create(customer("222", "Bruno")).unwrap();
        (ana.id, primary_address(&dir, "customers", ana.id).unwrap())
    };

    let new_address = {
        let mut repo = plain_customers(&dir);
        let mut ana = repo.read(id).unwrap().unwrap();
        ana.name = "Ana Beatriz de Albuquerque Cavalcanti".to_string();
        ana.phones.push("555-0199".to_string());
        assert!(repo.update(&ana).unwrap());
        assert_eq!(repo.read(id).unwrap().unwrap(), ana);
        primary_address(&dir, "customers", id).unwrap()
    };

    assert_ne!(new_address, old_address);
    let mut heap = HeapFile::open(&dir.join("customers.db"), SyncStrategy::OnClose).unwrap();
    assert_eq!(heap.tag_at(old_address).unwrap(), SlotTag::Free);
    assert_eq!(heap.tag_at(new_address).unwrap(), SlotTag::Live);
}

#[test]
fn test_shrinking_update_stays_in_place() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);
    let mut ana = repo.create(customer("111", "Ana Beatriz")).unwrap();
    let address = primary_address(&dir, "customers", ana.id).unwrap();

    ana.name = "Ana".to_string();
    ana.phones.clear();
    assert!(repo.update(&ana).unwrap());

    assert_eq!(primary_address(&dir, "customers", ana.id), Some(address));
    assert_eq!(repo.read(ana.id).unwrap().unwrap(), ana);
}

#[test]
fn test_email_stored_enciphered() {
    let (_temp, dir) = setup_temp_dir();
    let cipher = XorHexCipher::new(KeyRing::from_bytes([0x5a; 32]));
    let mut repo = CustomerRepository::open(&dir, &config(), Box::new(cipher)).unwrap();

    let ana = repo.create(customer("111", "Ana")).unwrap();
    repo.sync().unwrap();

    let raw = std::fs::read(dir.join("customers.db")).unwrap();
    let email = ana.email.as_bytes();
    assert!(!raw.windows(email.len()).any(|w| w == email));
    assert_eq!(repo.read(ana.id).unwrap().unwrap().email, "ana@example.com");
    assert_eq!(repo.find_by_cpf("111").unwrap().unwrap().email, "ana@example.com");
    assert_eq!(repo.cipher_name(), "xor-hex");
}

#[test]
fn test_customer_search_by_name() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);
    repo.create(customer("111", "Ana Souza")).unwrap();
    repo.create(customer("222", "Bruno Souza")).unwrap();
    repo.create(customer("333", "Carla Lima")).unwrap();

    let found = repo.search_by_name(&ContainsMatcher, "souza").unwrap();
    assert_eq!(found.len(), 2);

    let exact = |h: &str, n: &str| h == n;
    let found = repo.search_by_name(&exact, "Carla Lima").unwrap();
    assert_eq!(found.len(), 1);
}

// =============================================================================
// Pet Repository
// =============================================================================

#[test]
fn test_pets_grouped_by_owner() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = PetRepository::open(&dir, &config()).unwrap();

    for i in 0..12 {
        repo.create(Pet::new(&format!("pet{}", i), "cat", "sialata", 3.5, 1 + i % 3)).unwrap();
    }

    let owner_two: Vec<i32> = repo.pets_of(2).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(owner_two, vec![2, 5, 8, 11]);
    assert!(repo.pets_of(9).unwrap().is_empty());
}

#[test]
fn test_fifty_pets_of_one_owner() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = PetRepository::open(&dir, &config()).unwrap();

    for i in 1..=50 {
        repo.create(Pet::new(&format!("pet{}", i), "dog", "mixed", 10.0, 42)).unwrap();
    }

    let ids: Vec<i32> = repo.pets_of(42).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(ids, (1..=50).collect::<Vec<_>>());
    assert!(repo.owner_index().global_depth() >= 4);
}

#[test]
fn test_pet_owner_change_moves_index_entry() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = PetRepository::open(&dir, &config()).unwrap();
    let mut rex = repo.create(Pet::new("Rex", "dog", "beagle", 12.0, 1)).unwrap();

    rex.owner_id = 2;
    assert!(repo.update(&rex).unwrap());

    assert!(repo.pets_of(1).unwrap().is_empty());
    assert_eq!(repo.pets_of(2).unwrap(), vec![rex]);
}

#[test]
fn test_negative_weight_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = PetRepository::open(&dir, &config()).unwrap();

    let err = repo.create(Pet::new("Rex", "dog", "beagle", -1.0, 1)).unwrap_err();
    assert!(err.is_validation());
}

// =============================================================================
// Service Repository
// =============================================================================

#[test]
fn test_service_names_unique_ignoring_case() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = ServiceRepository::open(&dir, &config()).unwrap();

    let bath = repo.create(Service::new("Banho", 3000)).unwrap();
    let err = repo.create(Service::new("  BANHO ", 3500)).unwrap_err();

    assert!(is_duplicate(&err));
    assert_eq!(repo.find_by_name("banho").unwrap().unwrap().id, bath.id);
}

#[test]
fn test_service_rename_frees_old_name() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = ServiceRepository::open(&dir, &config()).unwrap();
    let mut bath = repo.create(Service::new("Banho", 3000)).unwrap();

    bath.name = "Banho completo".to_string();
    assert!(repo.update(&bath).unwrap());

    assert_eq!(repo.find_by_name("banho").unwrap(), None);
    repo.create(Service::new("Banho", 2000)).unwrap();
}

#[test]
fn test_negative_price_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = ServiceRepository::open(&dir, &config()).unwrap();

    assert!(repo.create(Service::new("Tosa", -1)).unwrap_err().is_validation());
}

// =============================================================================
// Booking Repository
// =============================================================================

#[test]
fn test_same_pet_service_and_day_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = BookingRepository::open(&dir, &config()).unwrap();

    repo.create(Booking::new(date("2024-05-01"), 1, 1)).unwrap();
    let err = repo.create(Booking::new(date("2024-05-01"), 1, 1)).unwrap_err();
    assert!(is_duplicate(&err));

    // A different day or service is fine
    repo.create(Booking::new(date("2024-05-02"), 1, 1)).unwrap();
    repo.create(Booking::new(date("2024-05-01"), 1, 2)).unwrap();
    assert_eq!(repo.all().unwrap().len(), 3);
}

#[test]
fn test_bookings_for_pet_in_key_order() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = BookingRepository::open(&dir, &config()).unwrap();

    for (day, pet, service) in [
        ("2024-05-09", 2, 1),
        ("2024-05-01", 1, 2),
        ("2024-05-03", 2, 2),
        ("2024-05-02", 2, 1),
        ("2024-04-30", 3, 1),
    ] {
        repo.create(Booking::new(date(day), pet, service)).unwrap();
    }

    let keys: Vec<(i32, NaiveDate)> = repo
        .bookings_for_pet(2)
        .unwrap()
        .iter()
        .map(|b| (b.service_id, b.date))
        .collect();
    assert_eq!(
        keys,
        vec![
            (1, date("2024-05-02")),
            (1, date("2024-05-09")),
            (2, date("2024-05-03")),
        ]
    );
}

#[test]
fn test_find_by_key_and_reschedule() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = BookingRepository::open(&dir, &config()).unwrap();
    let mut booking = repo.create(Booking::new(date("2024-05-01"), 1, 1)).unwrap();

    booking.date = date("2024-06-01");
    assert!(repo.update(&booking).unwrap());

    let old_key = Booking::new(date("2024-05-01"), 1, 1).key();
    assert_eq!(repo.find_by_key(&old_key).unwrap(), None);
    assert_eq!(repo.find_by_key(&booking.key()).unwrap().unwrap().id, booking.id);
}

#[test]
fn test_booking_delete_clears_tree() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = BookingRepository::open(&dir, &config()).unwrap();
    let booking = repo.create(Booking::new(date("2024-05-01"), 1, 1)).unwrap();

    assert_eq!(repo.delete(booking.id).unwrap().unwrap(), booking);
    assert!(repo.key_index().is_empty());
    repo.create(Booking::new(date("2024-05-01"), 1, 1)).unwrap();
}

// =============================================================================
// Rebuild and Check
// =============================================================================

#[test]
fn test_check_is_clean_after_mixed_work() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = plain_customers(&dir);
    for i in 0..20 {
        repo.create(customer(&format!("{}", 1000 + i), &format!("Client {}", i))).unwrap();
    }
    for id in [3, 7, 11] {
        repo.delete(id).unwrap();
    }
    let mut c = repo.read(4).unwrap().unwrap();
    c.name = "A considerably longer client name than before".to_string();
    repo.update(&c).unwrap();

    let report = repo.check().unwrap();
    assert!(report.is_clean(), "{:?}", report.issues);
    assert_eq!(report.records, 17);
    assert_eq!(report.heap.free_slots, report.heap.free_list_len);
}

#[test]
fn test_rebuild_after_index_files_lost() {
    let (_temp, dir) = setup_temp_dir();
    {
        let mut repo = PetRepository::open(&dir, &config()).unwrap();
        for i in 0..15 {
            repo.create(Pet::new(&format!("pet{}", i), "dog", "mixed", 8.0, i % 4)).unwrap();
        }
        repo.delete(6).unwrap();
    }

    for file in ["pets.idx", "pets_owner.hdir", "pets_owner.hbkt"] {
        std::fs::remove_file(dir.join(file)).unwrap();
    }

    let mut repo = PetRepository::open(&dir, &config()).unwrap();
    assert!(!repo.check().unwrap().is_clean());

    repo.rebuild_indexes().unwrap();

    assert!(repo.check().unwrap().is_clean());
    assert_eq!(repo.read(5).unwrap().unwrap().name, "pet4");
    assert_eq!(repo.read(6).unwrap(), None);
    let owner_one: Vec<i32> = repo.pets_of(1).unwrap().iter().map(|p| p.id).collect();
    assert_eq!(owner_one, vec![2, 10, 14]);
}

#[test]
fn test_booking_rebuild_restores_tree() {
    let (_temp, dir) = setup_temp_dir();
    {
        let mut repo = BookingRepository::open(&dir, &config()).unwrap();
        for day in 1..=20 {
            repo.create(Booking::new(date(&format!("2024-03-{:02}", day)), day % 3, 1)).unwrap();
        }
    }
    std::fs::remove_file(dir.join("bookings_key.bpt")).unwrap();

    let mut repo = BookingRepository::open(&dir, &config()).unwrap();
    assert!(!repo.check().unwrap().is_clean());

    repo.rebuild_indexes().unwrap();

    let report = repo.check().unwrap();
    assert!(report.is_clean(), "{:?}", report.issues);
    assert_eq!(repo.bookings_for_pet(0).unwrap().len(), 6);
}

#[test]
fn test_stats_track_free_slots() {
    let (_temp, dir) = setup_temp_dir();
    let mut repo = ServiceRepository::open(&dir, &config()).unwrap();
    repo.create(Service::new("Banho", 3000)).unwrap();
    repo.create(Service::new("Tosa", 2500)).unwrap();
    repo.delete(1).unwrap();

    let stats = repo.stats().unwrap();
    assert_eq!(stats.entity, "service");
    assert_eq!(stats.records, 1);
    assert_eq!(stats.last_id, 2);
    assert_eq!(stats.free_slots, 1);
}
