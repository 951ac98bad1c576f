// ⚖️ Pricing Store Reconciler - transactional replace per property batch
//
// resolve inventories → pick policy (event × pricing source) → delete scope
// → bulk insert → optional lease-term audit → commit.
//
// One transaction per batch: a store failure rolls back the whole replace.
// Batches for the same property are serialized through PropertyLocks.

use parking_lot::Mutex;
use rusqlite::{Connection, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::catalog::{InventoryCatalog, InventoryRecord};
use crate::db::{self, ImportEvent, TypeScope};
use crate::error::{ImportError, UnitError, UnitErrorKind};
use crate::mismatch::{LeaseTermMismatchDetector, MismatchReport};
use crate::unit_pricing::{InventoryState, LeaseState, PricingEvent, PricingSource, UnitPricing};

// ============================================================================
// REPLACE POLICY
// ============================================================================

/// Which stored rows a batch supersedes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteScope {
    Nothing,
    /// Every row of the property with the given type scope.
    Property(TypeScopeTag),
    /// Rows of the property whose pricing type (NEW / RENEWAL) the batch
    /// carries. A renewals-only feed leaves NEW pricing alone.
    BatchPricingTypes(TypeScopeTag),
    /// Only rows of the batch's affected inventories.
    AffectedInventories(TypeScopeTag),
}

/// Serializable mirror of `db::TypeScope`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeScopeTag {
    Any,
    UnitsOnly,
    NonUnitsOnly,
}

impl From<TypeScopeTag> for TypeScope {
    fn from(tag: TypeScopeTag) -> Self {
        match tag {
            TypeScopeTag::Any => TypeScope::Any,
            TypeScopeTag::UnitsOnly => TypeScope::UnitsOnly,
            TypeScopeTag::NonUnitsOnly => TypeScope::NonUnitsOnly,
        }
    }
}

/// Which resolved rows a batch inserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertFilter {
    Nothing,
    All,
    NonUnitsOnly,
    ExcludeOccupied,
}

impl InsertFilter {
    pub fn keeps(&self, row: &UnitPricing) -> bool {
        match self {
            InsertFilter::Nothing => false,
            InsertFilter::All => true,
            InsertFilter::NonUnitsOnly => !row.inventory_type.is_unit(),
            InsertFilter::ExcludeOccupied => row.status != InventoryState::Occupied,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplacePolicy {
    pub delete: DeleteScope,
    pub insert: InsertFilter,
}

/// UNIT pricing has exactly one authoritative source per property; non-UNIT
/// pricing always comes from the internal engine.
///
/// | event                | RMS (unitPricing=true)           | Reva (unitPricing=false)          |
/// |----------------------|----------------------------------|-----------------------------------|
/// | ExternalRmsImport    | delete UNIT rows of the batch's pricing types; insert all | delete nothing; insert nothing |
/// | RevaImport           | delete non-UNIT; insert non-UNIT | delete all; insert non-OCCUPIED   |
/// | InventoryStateChange | affected non-UNIT; insert non-UNIT | affected (any); insert non-OCCUPIED |
pub fn replace_policy(event: PricingEvent, source: PricingSource) -> ReplacePolicy {
    use DeleteScope::*;

    let (delete, insert) = match (event, source) {
        (PricingEvent::ExternalRmsImport, PricingSource::Rms) => {
            (BatchPricingTypes(TypeScopeTag::UnitsOnly), InsertFilter::All)
        }
        (PricingEvent::ExternalRmsImport, PricingSource::Reva) => (Nothing, InsertFilter::Nothing),
        (PricingEvent::RevaImport, PricingSource::Rms) => (Property(TypeScopeTag::NonUnitsOnly), InsertFilter::NonUnitsOnly),
        (PricingEvent::RevaImport, PricingSource::Reva) => (Property(TypeScopeTag::Any), InsertFilter::ExcludeOccupied),
        (PricingEvent::InventoryStateChange, PricingSource::Rms) => {
            (AffectedInventories(TypeScopeTag::NonUnitsOnly), InsertFilter::NonUnitsOnly)
        }
        (PricingEvent::InventoryStateChange, PricingSource::Reva) => {
            (AffectedInventories(TypeScopeTag::Any), InsertFilter::ExcludeOccupied)
        }
    };

    ReplacePolicy { delete, insert }
}

// ============================================================================
// PER-PROPERTY LOCKS
// ============================================================================

/// Registry of per-property mutexes. Clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct PropertyLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl PropertyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entries nobody holds a handle to are dropped on the way in, so the
    /// registry stays as large as the set of properties in flight.
    pub fn lock_for(&self, property_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(property_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Properties with a live lock entry.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// BATCH & REPORT
// ============================================================================

#[derive(Debug, Clone)]
pub struct PricingBatch {
    pub property_id: String,
    pub event: PricingEvent,
    pub source: PricingSource,
    pub units: Vec<UnitPricing>,
    /// Inventories touched by an InventoryStateChange.
    pub affected_inventory_ids: Vec<String>,
    pub file_name: Option<String>,
    pub file_sha256: Option<String>,
}

impl PricingBatch {
    pub fn new(property_id: &str, event: PricingEvent, source: PricingSource, units: Vec<UnitPricing>) -> Self {
        PricingBatch {
            property_id: property_id.to_string(),
            event,
            source,
            units,
            affected_inventory_ids: Vec::new(),
            file_name: None,
            file_sha256: None,
        }
    }

    pub fn with_affected_inventories(mut self, inventory_ids: Vec<String>) -> Self {
        self.affected_inventory_ids = inventory_ids;
        self
    }

    pub fn with_file(mut self, file_name: Option<String>, file_sha256: Option<String>) -> Self {
        self.file_name = file_name;
        self.file_sha256 = file_sha256;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub property_id: String,
    pub event: PricingEvent,
    pub policy: ReplacePolicy,
    pub deleted: usize,
    pub persisted: usize,
    pub errors: Vec<UnitError>,
    pub mismatches: Vec<MismatchReport>,
    /// Nothing resolved, the store was left untouched.
    pub skipped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    pub detect_lease_term_mismatches: bool,
    pub alert_reva_term_mismatches: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            detect_lease_term_mismatches: true,
            alert_reva_term_mismatches: false,
        }
    }
}

// ============================================================================
// RECONCILER
// ============================================================================

pub struct PricingReconciler<C: InventoryCatalog> {
    catalog: C,
    locks: PropertyLocks,
    options: ReconcileOptions,
}

impl<C: InventoryCatalog> PricingReconciler<C> {
    pub fn new(catalog: C) -> Self {
        PricingReconciler {
            catalog,
            locks: PropertyLocks::new(),
            options: ReconcileOptions::default(),
        }
    }

    /// Share a lock registry with other reconcilers (one per thread/connection).
    pub fn with_locks(mut self, locks: PropertyLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn with_options(mut self, options: ReconcileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Replace the stored pricing of one property with `batch`.
    ///
    /// Unresolved units come back as `INVENTORY_NOT_FOUND` errors and do not
    /// abort the batch. Store errors roll everything back.
    pub fn save_units_pricing(&self, conn: &mut Connection, batch: PricingBatch) -> Result<ReconcileReport, ImportError> {
        let policy = replace_policy(batch.event, batch.source);

        let lock = self.locks.lock_for(&batch.property_id);
        let _guard = lock.lock();

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (resolved, errors) = self.resolve_inventories(&tx, &batch)?;

        let mut report = ReconcileReport {
            property_id: batch.property_id.clone(),
            event: batch.event,
            policy,
            deleted: 0,
            persisted: 0,
            errors,
            mismatches: Vec::new(),
            skipped: false,
        };

        let affected: HashSet<&str> = batch.affected_inventory_ids.iter().map(String::as_str).collect();
        let scoped_to_affected = matches!(policy.delete, DeleteScope::AffectedInventories(_));

        // An empty batch never wipes a property; affected-inventory scopes
        // are explicit and still apply.
        if resolved.is_empty() && !scoped_to_affected {
            warn!(property_id = %batch.property_id, event = %batch.event, "no resolved pricing, store left untouched");
            report.skipped = true;
            record_event(&tx, &batch, &report)?;
            tx.commit()?;
            return Ok(report);
        }

        report.deleted = match policy.delete {
            DeleteScope::Nothing => 0,
            DeleteScope::Property(scope) => db::delete_pricing_by_property(&tx, &batch.property_id, scope.into())?,
            DeleteScope::BatchPricingTypes(scope) => {
                let mut pricing_types: Vec<LeaseState> = resolved.iter().map(UnitPricing::pricing_type).collect();
                pricing_types.sort();
                pricing_types.dedup();
                db::delete_pricing_by_property_and_types(&tx, &batch.property_id, scope.into(), &pricing_types)?
            }
            DeleteScope::AffectedInventories(scope) => {
                db::delete_pricing_for_inventories(&tx, &batch.property_id, &batch.affected_inventory_ids, scope.into())?
            }
        };

        let to_insert: Vec<UnitPricing> = resolved
            .into_iter()
            .filter(|row| policy.insert.keeps(row))
            .filter(|row| {
                !scoped_to_affected
                    || row
                        .inventory_id
                        .as_deref()
                        .map_or(false, |id| affected.contains(id))
            })
            .collect();

        report.persisted = db::insert_units_pricing(&tx, &to_insert)?;

        let audit_enabled = self.options.detect_lease_term_mismatches
            && batch.source == PricingSource::Rms
            && batch.event == PricingEvent::ExternalRmsImport;
        if audit_enabled {
            report.mismatches = LeaseTermMismatchDetector::new(&self.catalog)
                .with_reva_term_alerts(self.options.alert_reva_term_mismatches)
                .audit(&tx, &to_insert);
        }

        record_event(&tx, &batch, &report)?;
        tx.commit()?;

        info!(
            property_id = %batch.property_id,
            event = %batch.event,
            deleted = report.deleted,
            persisted = report.persisted,
            errors = report.errors.len(),
            "pricing replaced"
        );

        Ok(report)
    }

    /// One bulk lookup. Later duplicates of the same (inventory, pricing
    /// type) replace earlier ones.
    fn resolve_inventories(
        &self,
        conn: &Connection,
        batch: &PricingBatch,
    ) -> Result<(Vec<UnitPricing>, Vec<UnitError>), ImportError> {
        let mut external_ids: Vec<String> = batch.units.iter().map(|u| u.external_id.clone()).collect();
        external_ids.sort();
        external_ids.dedup();

        let inventories = self
            .catalog
            .inventories_by_external_ids(conn, &batch.property_id, &external_ids)?;
        let by_external_id: HashMap<&str, &InventoryRecord> =
            inventories.iter().map(|inv| (inv.external_id.as_str(), inv)).collect();

        let mut resolved: Vec<UnitPricing> = Vec::with_capacity(batch.units.len());
        let mut positions: HashMap<(String, LeaseState), usize> = HashMap::new();
        let mut errors = Vec::new();

        for unit in &batch.units {
            let Some(inventory) = by_external_id.get(unit.external_id.as_str()) else {
                let message = format!("Inventory with RMS external id '{}' does not exist", unit.external_id);
                warn!(property_id = %batch.property_id, external_id = %unit.external_id, "{}", message);
                errors.push(UnitError::new(&unit.external_id, UnitErrorKind::InventoryNotFound, message));
                continue;
            };

            let row = unit
                .clone()
                .resolved(&inventory.id, inventory.inventory_type, &batch.property_id);
            let key = (inventory.id.clone(), row.pricing_type());

            match positions.get(&key) {
                Some(&index) => {
                    debug!(inventory_id = %inventory.id, "duplicate pricing in batch, keeping the last one");
                    resolved[index] = row;
                }
                None => {
                    positions.insert(key, resolved.len());
                    resolved.push(row);
                }
            }
        }

        Ok((resolved, errors))
    }
}

/// Audit row for one run, skipped runs included.
fn record_event(conn: &Connection, batch: &PricingBatch, report: &ReconcileReport) -> Result<(), ImportError> {
    let event = ImportEvent::new(batch.event, &batch.property_id, report.persisted, report.errors.len())
        .with_file(batch.file_name.clone(), batch.file_sha256.clone())
        .with_data(serde_json::json!({
            "source": batch.source,
            "policy": report.policy,
            "deleted": report.deleted,
            "mismatches": report.mismatches.len(),
            "skipped": report.skipped,
        }));
    db::insert_import_event(conn, &event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{insert_lease_term, upsert_inventory, upsert_property, PropertyRecord, SqliteCatalog};
    use crate::mismatch::TermKey;
    use crate::db::{count_pricing, import_events_for_property, setup_database, units_pricing_by_property};
    use crate::rent_matrix::{RentMatrix, TermLength};
    use crate::unit_pricing::{InventoryType, RmsProvider};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn draft(external_id: &str, status: InventoryState, rent: Decimal) -> UnitPricing {
        let mut matrix = RentMatrix::new();
        matrix.insert(TermLength::new(12), date(2024, 5, 1), date(2025, 4, 30), rent);
        UnitPricing {
            external_id: external_id.to_string(),
            inventory_id: None,
            property_id: None,
            inventory_type: InventoryType::Unit,
            status,
            avail_date: None,
            renewal_date: None,
            amenity_value: None,
            amenities: Vec::new(),
            rent_matrix: matrix,
            standard_lease_length: TermLength::new(12),
            standard_rent: rent,
            min_rent_lease_length: TermLength::new(12),
            min_rent_start_date: date(2024, 5, 1),
            min_rent_end_date: date(2025, 4, 30),
            min_rent: rent,
            rms_provider: RmsProvider::Lro,
            file_name: None,
        }
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        seed(&conn);
        conn
    }

    /// p1 with units u1..u3 (external ids E1..E3) and parking k1 (external id K1).
    fn seed(conn: &Connection) {
        setup_database(conn).unwrap();
        upsert_property(
            conn,
            &PropertyRecord {
                id: "p1".to_string(),
                rms_external_id: Some("RMS-P1".to_string()),
                name: "Parkmerced".to_string(),
                timezone: "America/Los_Angeles".to_string(),
                unit_pricing: Some(true),
            },
        )
        .unwrap();

        let inventories = [
            ("u1", "E1", InventoryType::Unit),
            ("u2", "E2", InventoryType::Unit),
            ("u3", "E3", InventoryType::Unit),
            ("k1", "K1", InventoryType::Parking),
        ];
        for (id, external_id, inventory_type) in inventories {
            let record = InventoryRecord {
                id: id.to_string(),
                external_id: external_id.to_string(),
                property_id: "p1".to_string(),
                name: id.to_string(),
                building_name: "B1".to_string(),
                inventory_type,
                state: InventoryState::VacantReady,
                state_start_date: None,
                availability_date: None,
            };
            upsert_inventory(conn, &record, "g1").unwrap();
        }
    }

    fn reconciler() -> PricingReconciler<SqliteCatalog> {
        PricingReconciler::new(SqliteCatalog).with_options(ReconcileOptions {
            detect_lease_term_mismatches: false,
            alert_reva_term_mismatches: false,
        })
    }

    fn auditing_reconciler(alert_reva_terms: bool) -> PricingReconciler<SqliteCatalog> {
        PricingReconciler::new(SqliteCatalog).with_options(ReconcileOptions {
            detect_lease_term_mismatches: true,
            alert_reva_term_mismatches: alert_reva_terms,
        })
    }

    fn all_drafts() -> Vec<UnitPricing> {
        vec![
            draft("E1", InventoryState::VacantReady, dec!(1500)),
            draft("E2", InventoryState::Occupied, dec!(1600)),
            draft("E3", InventoryState::VacantReady, dec!(1700)),
            draft("K1", InventoryState::VacantReady, dec!(100)),
        ]
    }

    #[test]
    fn test_policy_table_is_total() {
        let events = [PricingEvent::ExternalRmsImport, PricingEvent::RevaImport, PricingEvent::InventoryStateChange];
        let sources = [PricingSource::Rms, PricingSource::Reva];

        for event in events {
            for source in sources {
                let policy = replace_policy(event, source);
                if event != PricingEvent::ExternalRmsImport {
                    assert_ne!(policy.insert, InsertFilter::Nothing);
                }
            }
        }

        let ignored = replace_policy(PricingEvent::ExternalRmsImport, PricingSource::Reva);
        assert_eq!(ignored.delete, DeleteScope::Nothing);
        assert_eq!(ignored.insert, InsertFilter::Nothing);

        let external = replace_policy(PricingEvent::ExternalRmsImport, PricingSource::Rms);
        assert_eq!(external.delete, DeleteScope::BatchPricingTypes(TypeScopeTag::UnitsOnly));
        assert_eq!(external.insert, InsertFilter::All);
    }

    #[test]
    fn test_renewals_then_units_feeds_add_up() {
        let mut conn = seeded();
        let reconciler = reconciler();

        let renewals: Vec<UnitPricing> = ["E1", "E2"]
            .iter()
            .map(|id| {
                let mut row = draft(id, InventoryState::OccupiedNotice, dec!(1550));
                row.renewal_date = Some(date(2024, 8, 1));
                row
            })
            .collect();
        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, renewals);
        reconciler.save_units_pricing(&mut conn, batch).unwrap();

        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, all_drafts()[..3].to_vec());
        let report = reconciler.save_units_pricing(&mut conn, batch).unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(count_pricing(&conn, "p1", TypeScope::UnitsOnly).unwrap(), 5);
    }

    #[test]
    fn test_external_import_replaces_units_and_reports_unknown() {
        let mut conn = seeded();
        let reconciler = reconciler();

        let mut units = all_drafts();
        units.push(draft("E404", InventoryState::VacantReady, dec!(1800)));

        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, units.clone());
        let report = reconciler.save_units_pricing(&mut conn, batch).unwrap();

        assert_eq!(report.persisted, 4);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].external_id, "E404");
        assert_eq!(report.errors[0].kind, UnitErrorKind::InventoryNotFound);

        // same batch again: same count
        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, units);
        let report = reconciler.save_units_pricing(&mut conn, batch).unwrap();
        assert_eq!(report.deleted, 3);
        assert_eq!(count_pricing(&conn, "p1", TypeScope::UnitsOnly).unwrap(), 3);

        // the parking row is outside the delete scope and is superseded in place
        assert_eq!(count_pricing(&conn, "p1", TypeScope::NonUnitsOnly).unwrap(), 1);
        assert_eq!(import_events_for_property(&conn, "p1").unwrap().len(), 2);

        println!("✅ External import replace PASSED");
    }

    #[test]
    fn test_external_import_ignored_for_reva_properties() {
        let mut conn = seeded();
        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Reva, all_drafts());

        let report = reconciler().save_units_pricing(&mut conn, batch).unwrap();
        assert_eq!(report.persisted, 0);
        assert_eq!(report.deleted, 0);
        assert_eq!(count_pricing(&conn, "p1", TypeScope::Any).unwrap(), 0);
    }

    #[test]
    fn test_reva_import_for_reva_property_skips_occupied() {
        let mut conn = seeded();
        let batch = PricingBatch::new("p1", PricingEvent::RevaImport, PricingSource::Reva, all_drafts());

        let report = reconciler().save_units_pricing(&mut conn, batch).unwrap();
        assert_eq!(report.persisted, 3);

        let stored = units_pricing_by_property(&conn, "p1").unwrap();
        assert!(stored.iter().all(|s| s.pricing.external_id != "E2"));
    }

    #[test]
    fn test_reva_import_for_rms_property_touches_non_units_only() {
        let mut conn = seeded();
        let reconciler = reconciler();

        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, all_drafts()[..3].to_vec());
        reconciler.save_units_pricing(&mut conn, batch).unwrap();

        let batch = PricingBatch::new("p1", PricingEvent::RevaImport, PricingSource::Rms, all_drafts());
        let report = reconciler.save_units_pricing(&mut conn, batch).unwrap();

        assert_eq!(report.deleted, 0);
        assert_eq!(report.persisted, 1);
        assert_eq!(count_pricing(&conn, "p1", TypeScope::UnitsOnly).unwrap(), 3);
        assert_eq!(count_pricing(&conn, "p1", TypeScope::NonUnitsOnly).unwrap(), 1);
    }

    #[test]
    fn test_state_change_limited_to_affected_inventories() {
        let mut conn = seeded();
        let reconciler = reconciler();

        let batch = PricingBatch::new("p1", PricingEvent::RevaImport, PricingSource::Reva, all_drafts());
        reconciler.save_units_pricing(&mut conn, batch).unwrap();
        assert_eq!(count_pricing(&conn, "p1", TypeScope::Any).unwrap(), 3);

        // u1 became occupied
        let changed = vec![draft("E1", InventoryState::Occupied, dec!(1500))];
        let batch = PricingBatch::new("p1", PricingEvent::InventoryStateChange, PricingSource::Reva, changed)
            .with_affected_inventories(vec!["u1".to_string()]);
        let report = reconciler.save_units_pricing(&mut conn, batch).unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.persisted, 0);
        let remaining: Vec<String> = units_pricing_by_property(&conn, "p1")
            .unwrap()
            .into_iter()
            .map(|s| s.pricing.external_id)
            .collect();
        assert_eq!(remaining, vec!["E3".to_string(), "K1".to_string()]);
    }

    #[test]
    fn test_empty_batch_leaves_store_untouched() {
        let mut conn = seeded();
        let reconciler = reconciler();

        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, all_drafts());
        reconciler.save_units_pricing(&mut conn, batch).unwrap();

        let batch = PricingBatch::new(
            "p1",
            PricingEvent::ExternalRmsImport,
            PricingSource::Rms,
            vec![draft("E404", InventoryState::VacantReady, dec!(1))],
        );
        let report = reconciler.save_units_pricing(&mut conn, batch).unwrap();

        assert!(report.skipped);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(count_pricing(&conn, "p1", TypeScope::Any).unwrap(), 4);

        let events = import_events_for_property(&conn, "p1").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].persisted, 0);
        assert_eq!(events[0].errors, 1);
        assert_eq!(events[0].data["skipped"], serde_json::json!(true));
        assert_eq!(events[1].data["skipped"], serde_json::json!(false));
    }

    #[test]
    fn test_duplicate_units_keep_last() {
        let mut conn = seeded();
        let units = vec![
            draft("E1", InventoryState::VacantReady, dec!(1500)),
            draft("E1", InventoryState::VacantReady, dec!(1550)),
        ];
        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, units);

        let report = reconciler().save_units_pricing(&mut conn, batch).unwrap();
        assert_eq!(report.persisted, 1);

        let stored = units_pricing_by_property(&conn, "p1").unwrap();
        assert_eq!(stored[0].pricing.standard_rent, dec!(1550));
    }

    #[test]
    fn test_lease_term_mismatches_do_not_block_rms_import() {
        let mut conn = seeded();
        // g1 only offers 6 months, every draft prices 12
        insert_lease_term(&conn, "g1", TermLength::new(6), None).unwrap();

        let mut reports = Vec::new();
        for alert_reva_terms in [false, true] {
            let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, all_drafts());
            let report = auditing_reconciler(alert_reva_terms).save_units_pricing(&mut conn, batch).unwrap();

            assert_eq!(report.persisted, 4);
            assert!(report.errors.is_empty());
            reports.push(report.mismatches);
        }

        let mismatches = &reports[0];
        let external_ids: Vec<&str> = mismatches.iter().map(|m| m.external_id.as_str()).collect();
        assert_eq!(external_ids, vec!["E1", "E2", "E3"]);
        for mismatch in mismatches {
            assert_eq!(
                mismatch.mismatching_rms_terms,
                vec![TermKey {
                    length: TermLength::new(12),
                    state: Some(LeaseState::New),
                }]
            );
            assert_eq!(
                mismatch.mismatching_reva_terms,
                vec![TermKey {
                    length: TermLength::new(6),
                    state: None,
                }]
            );
        }
        // the Reva-side flag changes logging, not findings
        assert_eq!(reports[0], reports[1]);

        assert_eq!(count_pricing(&conn, "p1", TypeScope::Any).unwrap(), 4);
        let events = import_events_for_property(&conn, "p1").unwrap();
        assert_eq!(events[0].data["mismatches"], serde_json::json!(3));

        println!("✅ Lease term audit PASSED");
    }

    #[test]
    fn test_configured_lease_terms_report_nothing() {
        let mut conn = seeded();
        insert_lease_term(&conn, "g1", TermLength::new(12), Some(LeaseState::New)).unwrap();

        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, all_drafts());
        let report = auditing_reconciler(true).save_units_pricing(&mut conn, batch).unwrap();

        assert_eq!(report.persisted, 4);
        assert!(report.mismatches.is_empty());
    }

    #[test]
    fn test_lease_term_audit_only_runs_for_rms_imports() {
        let mut conn = seeded();
        insert_lease_term(&conn, "g1", TermLength::new(6), None).unwrap();
        let reconciler = auditing_reconciler(true);

        let pairs = [
            (PricingEvent::ExternalRmsImport, PricingSource::Reva),
            (PricingEvent::RevaImport, PricingSource::Rms),
            (PricingEvent::RevaImport, PricingSource::Reva),
            (PricingEvent::InventoryStateChange, PricingSource::Rms),
            (PricingEvent::InventoryStateChange, PricingSource::Reva),
        ];
        for (event, source) in pairs {
            let affected = ["u1", "u2", "u3", "k1"].iter().map(|id| id.to_string()).collect();
            let batch = PricingBatch::new("p1", event, source, all_drafts()).with_affected_inventories(affected);

            let report = reconciler.save_units_pricing(&mut conn, batch).unwrap();
            assert!(report.mismatches.is_empty(), "{:?}/{:?} ran the audit", event, source);
        }
    }

    #[test]
    fn test_store_failure_rolls_back_the_whole_batch() {
        let mut conn = seeded();
        let reconciler = reconciler();

        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, all_drafts());
        reconciler.save_units_pricing(&mut conn, batch).unwrap();

        conn.execute_batch(
            "CREATE TRIGGER reject_u3 BEFORE INSERT ON rms_pricing
             WHEN NEW.inventory_id = 'u3'
             BEGIN SELECT RAISE(ABORT, 'u3 rejected'); END;",
        )
        .unwrap();

        let repriced: Vec<UnitPricing> = all_drafts()
            .into_iter()
            .map(|mut row| {
                row.standard_rent += dec!(100);
                row
            })
            .collect();
        let batch = PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, repriced);

        let err = reconciler.save_units_pricing(&mut conn, batch).unwrap_err();
        assert!(matches!(err, ImportError::Store(_)));
        assert_eq!(err.kind(), "STORE_FAILED");

        // the delete and the rows inserted before u3 are undone
        let stored = units_pricing_by_property(&conn, "p1").unwrap();
        assert_eq!(stored.len(), 4);
        let e1 = stored.iter().find(|s| s.pricing.external_id == "E1").unwrap();
        assert_eq!(e1.pricing.standard_rent, dec!(1500));
        assert_eq!(import_events_for_property(&conn, "p1").unwrap().len(), 1);
    }

    #[test]
    fn test_property_locks_are_shared_per_property() {
        let locks = PropertyLocks::new();
        let clone = locks.clone();

        let held = locks.lock_for("p1");
        assert!(Arc::ptr_eq(&held, &clone.lock_for("p1")));
        assert!(!Arc::ptr_eq(&held, &locks.lock_for("p2")));
    }

    #[test]
    fn test_idle_property_locks_are_pruned() {
        let locks = PropertyLocks::new();

        let held = locks.lock_for("p1");
        for n in 0..100 {
            let _ = locks.lock_for(&format!("p{}", n + 2));
        }
        // only p1 is still referenced, plus the entry just created
        assert_eq!(locks.len(), 2);
        assert!(Arc::ptr_eq(&held, &locks.lock_for("p1")));

        drop(held);
        let _ = locks.lock_for("p2");
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_concurrent_batches_for_one_property_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pricing.db");
        seed(&Connection::open(&path).unwrap());

        let locks = PropertyLocks::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let path = path.clone();
                let locks = locks.clone();
                std::thread::spawn(move || {
                    let mut conn = Connection::open(&path).unwrap();
                    conn.busy_timeout(std::time::Duration::from_secs(10)).unwrap();
                    let reconciler = reconciler().with_locks(locks);
                    for _ in 0..3 {
                        let batch =
                            PricingBatch::new("p1", PricingEvent::ExternalRmsImport, PricingSource::Rms, all_drafts()[..3].to_vec());
                        reconciler.save_units_pricing(&mut conn, batch).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let conn = Connection::open(&path).unwrap();
        assert_eq!(count_pricing(&conn, "p1", TypeScope::UnitsOnly).unwrap(), 3);
        assert_eq!(import_events_for_property(&conn, "p1").unwrap().len(), 12);
    }
}
