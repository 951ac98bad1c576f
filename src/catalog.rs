// 🗂️ Inventory Catalog - the narrow read contract the importer needs
// from property / inventory / lease-term data owned elsewhere.
//
// Lookups take the caller's connection so they run inside the reconcile
// transaction (rusqlite::Transaction derefs to Connection).

use chrono::NaiveDate;
use chrono_tz::Tz;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::{date_column, parse_column};
use crate::error::ImportError;
use crate::rent_matrix::TermLength;
use crate::unit_pricing::{InventoryState, InventoryType, LeaseState, PricingSource};

/// SQLite keeps the bound-parameter count bounded; lookups are chunked.
const LOOKUP_CHUNK: usize = 500;

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: String,
    pub rms_external_id: Option<String>,
    pub name: String,
    pub timezone: String,
    /// `settings.integration.import.unitPricing`; None when never configured.
    pub unit_pricing: Option<bool>,
}

impl PropertyRecord {
    pub fn timezone(&self) -> Result<Tz, ImportError> {
        self.timezone.parse::<Tz>().map_err(|_| ImportError::UnknownTimezone {
            property_id: self.id.clone(),
            timezone: self.timezone.clone(),
        })
    }

    pub fn pricing_source(&self) -> Result<PricingSource, ImportError> {
        self.unit_pricing
            .map(PricingSource::from_unit_pricing)
            .ok_or_else(|| ImportError::PricingSettingMissing(self.id.clone()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    pub id: String,
    /// RMS external id, or the inventory id when none is configured.
    pub external_id: String,
    pub property_id: String,
    pub name: String,
    pub building_name: String,
    pub inventory_type: InventoryType,
    pub state: InventoryState,
    pub state_start_date: Option<NaiveDate>,
    pub availability_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfiguredLeaseTerm {
    pub inventory_id: String,
    pub term_length: TermLength,
    /// None applies to both new leases and renewals.
    pub state: Option<LeaseState>,
}

// ============================================================================
// CONTRACT
// ============================================================================

pub trait InventoryCatalog: Send + Sync {
    fn property_by_id(&self, conn: &Connection, property_id: &str) -> Result<Option<PropertyRecord>, ImportError>;

    fn property_by_rms_external_id(&self, conn: &Connection, rms_external_id: &str) -> Result<Option<PropertyRecord>, ImportError>;

    /// One bulk lookup for a whole batch of external ids.
    fn inventories_by_external_ids(
        &self,
        conn: &Connection,
        property_id: &str,
        external_ids: &[String],
    ) -> Result<Vec<InventoryRecord>, ImportError>;

    /// Every inventory of a property, or only `inventory_ids` when given.
    fn inventories_for_property(
        &self,
        conn: &Connection,
        property_id: &str,
        inventory_ids: Option<&[String]>,
    ) -> Result<Vec<InventoryRecord>, ImportError>;

    /// Lease terms configured for each inventory's group. One bulk read.
    fn lease_terms_for_inventories(&self, conn: &Connection, inventory_ids: &[String]) -> Result<Vec<ConfiguredLeaseTerm>, ImportError>;

    fn property_timezone(&self, conn: &Connection, property_id: &str) -> Result<Tz, ImportError> {
        self.property_by_id(conn, property_id)?
            .ok_or_else(|| ImportError::PropertyNotFound(property_id.to_string()))?
            .timezone()
    }
}

// ============================================================================
// SQLITE IMPLEMENTATION
// ============================================================================

/// Catalog backed by the `properties`, `inventories`, `inventory_groups`
/// and `lease_terms` tables created by `db::setup_database`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteCatalog;

const PROPERTY_COLUMNS: &str = "id, rms_external_id, name, timezone, unit_pricing";

const INVENTORY_COLUMNS: &str = "i.id, COALESCE(NULLIF(i.rms_external_id, ''), i.id), i.property_id, i.name,
     i.building_name, i.type, i.state, i.state_start_date, i.availability_date";

fn property_from_row(row: &rusqlite::Row) -> rusqlite::Result<PropertyRecord> {
    Ok(PropertyRecord {
        id: row.get(0)?,
        rms_external_id: row.get(1)?,
        name: row.get(2)?,
        timezone: row.get(3)?,
        unit_pricing: row.get(4)?,
    })
}

fn inventory_from_row(row: &rusqlite::Row) -> rusqlite::Result<InventoryRecord> {
    Ok(InventoryRecord {
        id: row.get(0)?,
        external_id: row.get(1)?,
        property_id: row.get(2)?,
        name: row.get(3)?,
        building_name: row.get(4)?,
        inventory_type: parse_column(5, row.get::<_, String>(5)?)?,
        state: parse_column(6, row.get::<_, String>(6)?)?,
        state_start_date: date_column(7, row.get(7)?)?,
        availability_date: date_column(8, row.get(8)?)?,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl InventoryCatalog for SqliteCatalog {
    fn property_by_id(&self, conn: &Connection, property_id: &str) -> Result<Option<PropertyRecord>, ImportError> {
        let sql = format!("SELECT {} FROM properties WHERE id = ?1", PROPERTY_COLUMNS);
        Ok(conn.query_row(&sql, [property_id], property_from_row).optional()?)
    }

    fn property_by_rms_external_id(&self, conn: &Connection, rms_external_id: &str) -> Result<Option<PropertyRecord>, ImportError> {
        let sql = format!("SELECT {} FROM properties WHERE rms_external_id = ?1", PROPERTY_COLUMNS);
        Ok(conn.query_row(&sql, [rms_external_id], property_from_row).optional()?)
    }

    fn inventories_by_external_ids(
        &self,
        conn: &Connection,
        property_id: &str,
        external_ids: &[String],
    ) -> Result<Vec<InventoryRecord>, ImportError> {
        let mut found = Vec::new();

        for chunk in external_ids.chunks(LOOKUP_CHUNK) {
            let list = placeholders(chunk.len());
            let sql = format!(
                "SELECT {columns} FROM inventories i
                 WHERE i.property_id = ?
                   AND (i.rms_external_id IN ({list})
                        OR ((i.rms_external_id IS NULL OR i.rms_external_id = '') AND i.id IN ({list})))",
                columns = INVENTORY_COLUMNS,
                list = list,
            );

            let values = std::iter::once(property_id)
                .chain(chunk.iter().map(String::as_str))
                .chain(chunk.iter().map(String::as_str));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), inventory_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            found.extend(rows);
        }

        Ok(found)
    }

    fn inventories_for_property(
        &self,
        conn: &Connection,
        property_id: &str,
        inventory_ids: Option<&[String]>,
    ) -> Result<Vec<InventoryRecord>, ImportError> {
        let Some(ids) = inventory_ids else {
            let sql = format!("SELECT {} FROM inventories i WHERE i.property_id = ?1 ORDER BY i.id", INVENTORY_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([property_id], inventory_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(rows);
        };

        let mut found = Vec::new();
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT {} FROM inventories i WHERE i.property_id = ? AND i.id IN ({}) ORDER BY i.id",
                INVENTORY_COLUMNS,
                placeholders(chunk.len())
            );
            let values = std::iter::once(property_id).chain(chunk.iter().map(String::as_str));
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(values), inventory_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            found.extend(rows);
        }

        Ok(found)
    }

    fn lease_terms_for_inventories(&self, conn: &Connection, inventory_ids: &[String]) -> Result<Vec<ConfiguredLeaseTerm>, ImportError> {
        let mut terms = Vec::new();

        for chunk in inventory_ids.chunks(LOOKUP_CHUNK) {
            let sql = format!(
                "SELECT DISTINCT i.id, lt.term_length, lt.state
                 FROM inventories i
                 INNER JOIN lease_terms lt ON lt.inventory_group_id = i.inventory_group_id
                 WHERE i.id IN ({})
                 ORDER BY i.id, lt.term_length",
                placeholders(chunk.len())
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), |row| {
                    let state: Option<String> = row.get(2)?;
                    let state = match state.filter(|s| !s.is_empty()) {
                        Some(raw) => Some(parse_column::<LeaseState>(2, raw)?),
                        None => None,
                    };
                    Ok(ConfiguredLeaseTerm {
                        inventory_id: row.get(0)?,
                        term_length: TermLength::new(row.get(1)?),
                        state,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            terms.extend(rows);
        }

        Ok(terms)
    }
}

// ============================================================================
// CATALOG FIXTURES
// Seeding helpers for the CLI and tests. Catalog CRUD lives elsewhere.
// ============================================================================

pub fn upsert_property(conn: &Connection, property: &PropertyRecord) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO properties (id, rms_external_id, name, timezone, unit_pricing)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            rms_external_id = excluded.rms_external_id,
            name = excluded.name,
            timezone = excluded.timezone,
            unit_pricing = excluded.unit_pricing",
        params![
            property.id,
            property.rms_external_id,
            property.name,
            property.timezone,
            property.unit_pricing,
        ],
    )?;
    Ok(())
}

pub fn upsert_inventory(conn: &Connection, inventory: &InventoryRecord, inventory_group_id: &str) -> rusqlite::Result<()> {
    // external_id == id means "no RMS external id configured"
    let rms_external_id = if inventory.external_id == inventory.id {
        None
    } else {
        Some(inventory.external_id.as_str())
    };

    conn.execute(
        "INSERT INTO inventories (
            id, property_id, inventory_group_id, rms_external_id, name, building_name,
            type, state, state_start_date, availability_date
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            property_id = excluded.property_id,
            inventory_group_id = excluded.inventory_group_id,
            rms_external_id = excluded.rms_external_id,
            name = excluded.name,
            building_name = excluded.building_name,
            type = excluded.type,
            state = excluded.state,
            state_start_date = excluded.state_start_date,
            availability_date = excluded.availability_date",
        params![
            inventory.id,
            inventory.property_id,
            inventory_group_id,
            rms_external_id,
            inventory.name,
            inventory.building_name,
            inventory.inventory_type.as_str(),
            inventory.state.as_str(),
            inventory.state_start_date.map(|d| d.to_string()),
            inventory.availability_date.map(|d| d.to_string()),
        ],
    )?;
    Ok(())
}

pub fn insert_lease_term(
    conn: &Connection,
    inventory_group_id: &str,
    term_length: TermLength,
    state: Option<LeaseState>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO lease_terms (inventory_group_id, term_length, state) VALUES (?1, ?2, ?3)",
        params![inventory_group_id, term_length.months(), state.map(|s| s.as_str())],
    )?;
    Ok(())
}
