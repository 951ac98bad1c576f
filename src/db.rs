// 💾 Pricing Store - SQLite schema, bulk replace primitives, reads, audit trail
//
// Decimal amounts are stored as canonical text, dates as YYYY-MM-DD,
// the rent matrix and amenity list as JSON text.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use crate::error::ImportError;
use crate::unit_pricing::{InventoryType, LeaseState, PricingEvent, UnitPricing};

const BULK_CHUNK: usize = 500;

// ============================================================================
// COLUMN HELPERS
// ============================================================================

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

/// Parse a TEXT column through `FromStr`.
pub(crate) fn parse_column<T>(idx: usize, raw: String) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    raw.parse::<T>()
        .map_err(|e| conversion_error(idx, format!("'{}': {}", raw, e)))
}

pub(crate) fn date_column(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDate>> {
    match raw.filter(|s| !s.is_empty()) {
        Some(value) => parse_column::<NaiveDate>(idx, value).map(Some),
        None => Ok(None),
    }
}

fn json_column<T: serde::de::DeserializeOwned>(idx: usize, raw: String) -> rusqlite::Result<T> {
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<(), ImportError> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Pricing table (one row per inventory and pricing type)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rms_pricing (
            id TEXT PRIMARY KEY,
            inventory_id TEXT NOT NULL,
            property_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            file_name TEXT,
            rms_provider TEXT NOT NULL,
            type TEXT NOT NULL,
            status TEXT NOT NULL,
            avail_date TEXT,
            renewal_date TEXT,
            pricing_type TEXT NOT NULL,
            amenity_value TEXT,
            amenities TEXT NOT NULL,
            rent_matrix TEXT NOT NULL,
            standard_lease_length INTEGER NOT NULL,
            standard_rent TEXT NOT NULL,
            min_rent_lease_length INTEGER NOT NULL,
            min_rent_start_date TEXT NOT NULL,
            min_rent_end_date TEXT NOT NULL,
            min_rent TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (inventory_id, pricing_type)
        )",
        [],
    )?;

    // ==========================================================================
    // Catalog tables (owned by other services, read through SqliteCatalog)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS properties (
            id TEXT PRIMARY KEY,
            rms_external_id TEXT,
            name TEXT NOT NULL DEFAULT '',
            timezone TEXT NOT NULL,
            unit_pricing INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS inventories (
            id TEXT PRIMARY KEY,
            property_id TEXT NOT NULL,
            inventory_group_id TEXT,
            rms_external_id TEXT,
            name TEXT NOT NULL DEFAULT '',
            building_name TEXT NOT NULL DEFAULT '',
            type TEXT NOT NULL,
            state TEXT NOT NULL,
            state_start_date TEXT,
            availability_date TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS lease_terms (
            inventory_group_id TEXT NOT NULL,
            term_length INTEGER NOT NULL,
            state TEXT
        )",
        [],
    )?;

    // ==========================================================================
    // Import events (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS import_events (
            event_id TEXT PRIMARY KEY,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            property_id TEXT NOT NULL,
            file_name TEXT,
            file_sha256 TEXT,
            persisted INTEGER NOT NULL,
            errors INTEGER NOT NULL,
            data TEXT NOT NULL
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rms_pricing_property ON rms_pricing(property_id, type)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inventories_external ON inventories(property_id, rms_external_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_import_events_property ON import_events(property_id, timestamp)",
        [],
    )?;

    Ok(())
}

// ============================================================================
// WRITES
// ============================================================================

/// Which inventory types a delete or count touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeScope {
    Any,
    UnitsOnly,
    NonUnitsOnly,
}

impl TypeScope {
    fn clause(&self) -> &'static str {
        match self {
            TypeScope::Any => "",
            TypeScope::UnitsOnly => " AND type = 'unit'",
            TypeScope::NonUnitsOnly => " AND type <> 'unit'",
        }
    }
}

pub fn delete_pricing_by_property(conn: &Connection, property_id: &str, scope: TypeScope) -> Result<usize, ImportError> {
    let sql = format!("DELETE FROM rms_pricing WHERE property_id = ?1{}", scope.clause());
    Ok(conn.execute(&sql, [property_id])?)
}

/// Delete the property's rows of the given pricing types only.
pub fn delete_pricing_by_property_and_types(
    conn: &Connection,
    property_id: &str,
    scope: TypeScope,
    pricing_types: &[LeaseState],
) -> Result<usize, ImportError> {
    if pricing_types.is_empty() {
        return Ok(0);
    }

    let sql = format!(
        "DELETE FROM rms_pricing WHERE property_id = ? AND pricing_type IN ({}){}",
        placeholders(pricing_types.len()),
        scope.clause()
    );
    let mut values: Vec<&str> = vec![property_id];
    for pricing_type in pricing_types {
        values.push(pricing_type.as_str());
    }
    Ok(conn.execute(&sql, params_from_iter(values))?)
}

pub fn delete_pricing_for_inventories(
    conn: &Connection,
    property_id: &str,
    inventory_ids: &[String],
    scope: TypeScope,
) -> Result<usize, ImportError> {
    let mut deleted = 0;

    for chunk in inventory_ids.chunks(BULK_CHUNK) {
        let sql = format!(
            "DELETE FROM rms_pricing WHERE property_id = ? AND inventory_id IN ({}){}",
            placeholders(chunk.len()),
            scope.clause()
        );
        let values = std::iter::once(property_id).chain(chunk.iter().map(String::as_str));
        deleted += conn.execute(&sql, params_from_iter(values))?;
    }

    Ok(deleted)
}

/// Insert resolved rows with one prepared statement. Every row must carry
/// its inventory id and property id. A row with the same inventory and
/// pricing type supersedes the stored one.
pub fn insert_units_pricing(conn: &Connection, rows: &[UnitPricing]) -> Result<usize, ImportError> {
    let mut stmt = conn.prepare(
        "INSERT OR REPLACE INTO rms_pricing (
            id, inventory_id, property_id, external_id, file_name, rms_provider,
            type, status, avail_date, renewal_date, pricing_type, amenity_value,
            amenities, rent_matrix, standard_lease_length, standard_rent,
            min_rent_lease_length, min_rent_start_date, min_rent_end_date, min_rent, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
    )?;

    let created_at = Utc::now().to_rfc3339();
    let mut inserted = 0;

    for row in rows {
        let (Some(inventory_id), Some(property_id)) = (&row.inventory_id, &row.property_id) else {
            return Err(ImportError::Store(rusqlite::Error::ToSqlConversionFailure(
                format!("pricing for {} has no resolved inventory", row.external_id).into(),
            )));
        };

        let amenities = serde_json::to_string(&row.amenities)?;
        let rent_matrix = serde_json::to_string(&row.rent_matrix)?;

        inserted += stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            inventory_id,
            property_id,
            row.external_id,
            row.file_name,
            row.rms_provider.as_str(),
            row.inventory_type.as_str(),
            row.status.as_str(),
            row.avail_date.map(|d| d.to_string()),
            row.renewal_date.map(|d| d.to_string()),
            row.pricing_type().as_str(),
            row.amenity_value.map(|v| v.to_string()),
            amenities,
            rent_matrix,
            row.standard_lease_length.months(),
            row.standard_rent.to_string(),
            row.min_rent_lease_length.months(),
            row.min_rent_start_date.to_string(),
            row.min_rent_end_date.to_string(),
            row.min_rent.to_string(),
            created_at,
        ])?;
    }

    Ok(inserted)
}

// ============================================================================
// READS
// ============================================================================

/// A persisted pricing row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPricing {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub pricing: UnitPricing,
}

const PRICING_COLUMNS: &str = "id, created_at, external_id, inventory_id, property_id, type, status,
     avail_date, renewal_date, amenity_value, amenities, rent_matrix,
     standard_lease_length, standard_rent, min_rent_lease_length,
     min_rent_start_date, min_rent_end_date, min_rent, rms_provider, file_name";

fn pricing_from_row(row: &rusqlite::Row) -> rusqlite::Result<StoredPricing> {
    let created_at: String = row.get(1)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| conversion_error(1, e.to_string()))?
        .with_timezone(&Utc);

    let amenity_value: Option<String> = row.get(9)?;
    let amenity_value = match amenity_value {
        Some(raw) => Some(parse_column::<Decimal>(9, raw)?),
        None => None,
    };

    let min_rent_start: Option<NaiveDate> = date_column(15, row.get(15)?)?;
    let min_rent_end: Option<NaiveDate> = date_column(16, row.get(16)?)?;

    Ok(StoredPricing {
        id: row.get(0)?,
        created_at,
        pricing: UnitPricing {
            external_id: row.get(2)?,
            inventory_id: row.get(3)?,
            property_id: row.get(4)?,
            inventory_type: parse_column(5, row.get::<_, String>(5)?)?,
            status: parse_column(6, row.get::<_, String>(6)?)?,
            avail_date: date_column(7, row.get(7)?)?,
            renewal_date: date_column(8, row.get(8)?)?,
            amenity_value,
            amenities: json_column(10, row.get(10)?)?,
            rent_matrix: json_column(11, row.get(11)?)?,
            standard_lease_length: crate::rent_matrix::TermLength::new(row.get(12)?),
            standard_rent: parse_column(13, row.get::<_, String>(13)?)?,
            min_rent_lease_length: crate::rent_matrix::TermLength::new(row.get(14)?),
            min_rent_start_date: min_rent_start.ok_or_else(|| conversion_error(15, "missing date".to_string()))?,
            min_rent_end_date: min_rent_end.ok_or_else(|| conversion_error(16, "missing date".to_string()))?,
            min_rent: parse_column(17, row.get::<_, String>(17)?)?,
            rms_provider: parse_column(18, row.get::<_, String>(18)?)?,
            file_name: row.get(19)?,
        },
    })
}

pub fn units_pricing_by_property(conn: &Connection, property_id: &str) -> Result<Vec<StoredPricing>, ImportError> {
    let sql = format!(
        "SELECT {} FROM rms_pricing WHERE property_id = ?1 ORDER BY external_id, pricing_type",
        PRICING_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([property_id], pricing_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn pricing_for_inventory(
    conn: &Connection,
    inventory_id: &str,
    pricing_type: LeaseState,
) -> Result<Option<StoredPricing>, ImportError> {
    let sql = format!(
        "SELECT {} FROM rms_pricing WHERE inventory_id = ?1 AND pricing_type = ?2",
        PRICING_COLUMNS
    );
    Ok(conn
        .query_row(&sql, params![inventory_id, pricing_type.as_str()], pricing_from_row)
        .optional()?)
}

pub fn count_pricing(conn: &Connection, property_id: &str, scope: TypeScope) -> Result<i64, ImportError> {
    let sql = format!("SELECT COUNT(*) FROM rms_pricing WHERE property_id = ?1{}", scope.clause());
    Ok(conn.query_row(&sql, [property_id], |row| row.get(0))?)
}

/// "Starting at" range for one property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentRange {
    pub property_id: String,
    pub min_rent: Decimal,
    pub max_standard_rent: Decimal,
}

/// Lowest `min_rent` and highest `standard_rent` over NEW pricing of one
/// inventory type. Aggregated in Rust since amounts are stored as text.
pub fn rent_range(
    conn: &Connection,
    property_ids: &[String],
    inventory_type: InventoryType,
) -> Result<Vec<RentRange>, ImportError> {
    let mut ranges: BTreeMap<String, RentRange> = BTreeMap::new();

    for chunk in property_ids.chunks(BULK_CHUNK) {
        let sql = format!(
            "SELECT property_id, min_rent, standard_rent FROM rms_pricing
             WHERE pricing_type = ? AND type = ? AND property_id IN ({})",
            placeholders(chunk.len())
        );
        let values = [LeaseState::New.as_str(), inventory_type.as_str()]
            .into_iter()
            .chain(chunk.iter().map(String::as_str));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    parse_column::<Decimal>(1, row.get(1)?)?,
                    parse_column::<Decimal>(2, row.get(2)?)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for (property_id, min_rent, standard_rent) in rows {
            ranges
                .entry(property_id.clone())
                .and_modify(|range| {
                    range.min_rent = range.min_rent.min(min_rent);
                    range.max_standard_rent = range.max_standard_rent.max(standard_rent);
                })
                .or_insert(RentRange {
                    property_id,
                    min_rent,
                    max_standard_rent: standard_rent,
                });
        }
    }

    Ok(ranges.into_values().collect())
}

// ============================================================================
// IMPORT EVENTS (audit trail)
// ============================================================================

/// One reconcile run. Skipped runs (nothing resolved) are recorded too,
/// with `persisted = 0` and `data.skipped = true`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ImportEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: PricingEvent,
    pub property_id: String,
    pub file_name: Option<String>,
    pub file_sha256: Option<String>,
    pub persisted: usize,
    pub errors: usize,
    pub data: serde_json::Value,
}

impl ImportEvent {
    pub fn new(event_type: PricingEvent, property_id: &str, persisted: usize, errors: usize) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            property_id: property_id.to_string(),
            file_name: None,
            file_sha256: None,
            persisted,
            errors,
            data: serde_json::Value::Null,
        }
    }

    pub fn with_file(mut self, file_name: Option<String>, file_sha256: Option<String>) -> Self {
        self.file_name = file_name;
        self.file_sha256 = file_sha256;
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

fn event_from_tag(idx: usize, tag: String) -> rusqlite::Result<PricingEvent> {
    match tag.as_str() {
        "EXTERNAL_RMS_IMPORT" => Ok(PricingEvent::ExternalRmsImport),
        "REVA_IMPORT" => Ok(PricingEvent::RevaImport),
        "INVENTORY_STATE_CHANGE" => Ok(PricingEvent::InventoryStateChange),
        _ => Err(conversion_error(idx, format!("unknown pricing event '{}'", tag))),
    }
}

pub fn insert_import_event(conn: &Connection, event: &ImportEvent) -> Result<(), ImportError> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO import_events (
            event_id, timestamp, event_type, property_id, file_name, file_sha256, persisted, errors, data
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type.as_str(),
            event.property_id,
            event.file_name,
            event.file_sha256,
            event.persisted as i64,
            event.errors as i64,
            data_json,
        ],
    )?;

    Ok(())
}

/// Most recent first.
pub fn import_events_for_property(conn: &Connection, property_id: &str) -> Result<Vec<ImportEvent>, ImportError> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, property_id, file_name, file_sha256, persisted, errors, data
         FROM import_events
         WHERE property_id = ?1
         ORDER BY timestamp DESC, rowid DESC",
    )?;

    let events = stmt
        .query_map([property_id], |row| {
            let timestamp: String = row.get(1)?;
            let persisted: i64 = row.get(6)?;
            let errors: i64 = row.get(7)?;

            Ok(ImportEvent {
                event_id: row.get(0)?,
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map_err(|e| conversion_error(1, e.to_string()))?
                    .with_timezone(&Utc),
                event_type: event_from_tag(2, row.get(2)?)?,
                property_id: row.get(3)?,
                file_name: row.get(4)?,
                file_sha256: row.get(5)?,
                persisted: persisted.max(0) as usize,
                errors: errors.max(0) as usize,
                data: json_column(8, row.get(8)?)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// SHA-256 of a file's bytes, hex encoded. Streams the file.
pub fn compute_file_hash(path: &Path) -> Result<String, ImportError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let read = reader.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rent_matrix::{RentMatrix, TermLength};
    use crate::unit_pricing::{InventoryState, RmsProvider};
    use rust_decimal_macros::dec;
    use std::io::Write;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn pricing(inventory_id: &str, inventory_type: InventoryType, renewal: bool, rent: Decimal) -> UnitPricing {
        let mut matrix = RentMatrix::new();
        matrix.insert(TermLength::new(12), date(2024, 5, 1), date(2025, 4, 30), rent);

        UnitPricing {
            external_id: format!("ext-{}", inventory_id),
            inventory_id: Some(inventory_id.to_string()),
            property_id: Some("p1".to_string()),
            inventory_type,
            status: InventoryState::VacantReady,
            avail_date: Some(date(2024, 5, 1)),
            renewal_date: if renewal { Some(date(2024, 8, 1)) } else { None },
            amenity_value: Some(dec!(25)),
            amenities: vec!["Balcony".to_string()],
            rent_matrix: matrix,
            standard_lease_length: TermLength::new(12),
            standard_rent: rent,
            min_rent_lease_length: TermLength::new(12),
            min_rent_start_date: date(2024, 5, 1),
            min_rent_end_date: date(2025, 4, 30),
            min_rent: rent,
            rms_provider: RmsProvider::Lro,
            file_name: Some("LROPricing_p1.xml".to_string()),
        }
    }

    fn open() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_read_back() {
        let conn = open();
        let rows = vec![
            pricing("inv-1", InventoryType::Unit, false, dec!(1500.25)),
            pricing("inv-1", InventoryType::Unit, true, dec!(1450)),
        ];

        assert_eq!(insert_units_pricing(&conn, &rows).unwrap(), 2);

        let stored = units_pricing_by_property(&conn, "p1").unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].pricing, rows[0]);

        let renewal = pricing_for_inventory(&conn, "inv-1", LeaseState::Renewal).unwrap().unwrap();
        assert_eq!(renewal.pricing.min_rent, dec!(1450));

        println!("✅ Pricing store round trip PASSED");
    }

    #[test]
    fn test_reinsert_supersedes_stored_row() {
        let conn = open();
        let row = pricing("inv-1", InventoryType::Unit, false, dec!(1500));
        insert_units_pricing(&conn, &[row.clone()]).unwrap();
        let first = pricing_for_inventory(&conn, "inv-1", LeaseState::New).unwrap().unwrap();

        let cheaper = UnitPricing {
            standard_rent: dec!(1400),
            ..row
        };
        insert_units_pricing(&conn, &[cheaper]).unwrap();
        let second = pricing_for_inventory(&conn, "inv-1", LeaseState::New).unwrap().unwrap();

        assert_eq!(count_pricing(&conn, "p1", TypeScope::Any).unwrap(), 1);
        assert_ne!(first.id, second.id);
        assert_eq!(second.pricing.standard_rent, dec!(1400));
    }

    #[test]
    fn test_unresolved_row_is_rejected() {
        let conn = open();
        let mut row = pricing("inv-1", InventoryType::Unit, false, dec!(1500));
        row.inventory_id = None;

        let err = insert_units_pricing(&conn, &[row]).unwrap_err();
        assert_eq!(err.kind(), "STORE_FAILED");
        assert_eq!(count_pricing(&conn, "p1", TypeScope::Any).unwrap(), 0);
    }

    #[test]
    fn test_scoped_deletes() {
        let conn = open();
        let rows = vec![
            pricing("inv-1", InventoryType::Unit, false, dec!(1500)),
            pricing("inv-2", InventoryType::Unit, false, dec!(1600)),
            pricing("park-1", InventoryType::Parking, false, dec!(100)),
            pricing("park-2", InventoryType::Parking, false, dec!(120)),
        ];
        insert_units_pricing(&conn, &rows).unwrap();

        let deleted = delete_pricing_for_inventories(
            &conn,
            "p1",
            &["inv-1".to_string(), "park-1".to_string()],
            TypeScope::NonUnitsOnly,
        )
        .unwrap();
        assert_eq!(deleted, 1);

        assert_eq!(delete_pricing_by_property(&conn, "p1", TypeScope::UnitsOnly).unwrap(), 2);
        assert_eq!(count_pricing(&conn, "p1", TypeScope::Any).unwrap(), 1);
        assert_eq!(count_pricing(&conn, "p1", TypeScope::NonUnitsOnly).unwrap(), 1);
    }

    #[test]
    fn test_delete_by_pricing_type_keeps_other_type() {
        let conn = open();
        let rows = vec![
            pricing("inv-1", InventoryType::Unit, false, dec!(1500)),
            pricing("inv-1", InventoryType::Unit, true, dec!(1550)),
            pricing("inv-2", InventoryType::Unit, true, dec!(1650)),
        ];
        insert_units_pricing(&conn, &rows).unwrap();

        let deleted =
            delete_pricing_by_property_and_types(&conn, "p1", TypeScope::UnitsOnly, &[LeaseState::Renewal]).unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(delete_pricing_by_property_and_types(&conn, "p1", TypeScope::UnitsOnly, &[]).unwrap(), 0);

        let remaining = units_pricing_by_property(&conn, "p1").unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].pricing.pricing_type(), LeaseState::New);
    }

    #[test]
    fn test_rent_range_uses_new_pricing_only() {
        let conn = open();
        let rows = vec![
            pricing("inv-1", InventoryType::Unit, false, dec!(1500)),
            pricing("inv-2", InventoryType::Unit, false, dec!(1800)),
            pricing("inv-3", InventoryType::Unit, true, dec!(900)),
        ];
        insert_units_pricing(&conn, &rows).unwrap();

        let ranges = rent_range(&conn, &["p1".to_string(), "p2".to_string()], InventoryType::Unit).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].min_rent, dec!(1500));
        assert_eq!(ranges[0].max_standard_rent, dec!(1800));
    }

    #[test]
    fn test_import_event_log() {
        let conn = open();

        let event = ImportEvent::new(PricingEvent::ExternalRmsImport, "p1", 17, 1)
            .with_file(Some("LROPricing_p1.xml".to_string()), Some("abc".to_string()))
            .with_data(serde_json::json!({"deleted": 3}));
        insert_import_event(&conn, &event).unwrap();

        let events = import_events_for_property(&conn, "p1").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0], event);

        println!("✅ Import event log test PASSED");
    }

    #[test]
    fn test_compute_file_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"<PhysicalProperty/>").unwrap();

        let hash1 = compute_file_hash(file.path()).unwrap();
        let hash2 = compute_file_hash(file.path()).unwrap();
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64, "SHA-256 hash should be 64 hex characters");
    }
}
