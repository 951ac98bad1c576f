// 🔍 Lease-Term Mismatch Detector
// Computed rent matrices vs. lease terms configured in the catalog.
//
// Audit only: findings are logged, never returned as errors, and never
// block a reconcile. One bulk catalog read per batch.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{error, warn};

use crate::catalog::{ConfiguredLeaseTerm, InventoryCatalog};
use crate::error::ImportError;
use crate::rent_matrix::TermLength;
use crate::unit_pricing::{LeaseState, UnitPricing};

/// A `(length, state)` pair. A `None` state is a wildcard on the catalog side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TermKey {
    pub length: TermLength,
    pub state: Option<LeaseState>,
}

impl fmt::Display for TermKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            Some(state) => write!(f, "{}/{}", self.length, state),
            None => write!(f, "{}/any", self.length),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MismatchReport {
    pub external_id: String,
    pub inventory_id: String,
    pub file_name: Option<String>,
    /// Priced by the feed, unknown to the catalog.
    pub mismatching_rms_terms: Vec<TermKey>,
    /// Configured in the catalog, not priced by the feed.
    pub mismatching_reva_terms: Vec<TermKey>,
}

impl MismatchReport {
    pub fn is_empty(&self) -> bool {
        self.mismatching_rms_terms.is_empty() && self.mismatching_reva_terms.is_empty()
    }
}

pub struct LeaseTermMismatchDetector<'a> {
    catalog: &'a dyn InventoryCatalog,
    alert_reva_terms: bool,
}

impl<'a> LeaseTermMismatchDetector<'a> {
    pub fn new(catalog: &'a dyn InventoryCatalog) -> Self {
        LeaseTermMismatchDetector {
            catalog,
            alert_reva_terms: false,
        }
    }

    /// Also warn about catalog terms the feed did not price.
    pub fn with_reva_term_alerts(mut self, enabled: bool) -> Self {
        self.alert_reva_terms = enabled;
        self
    }

    /// Compare resolved rows against the catalog. Only UNIT rows are audited.
    pub fn detect(&self, conn: &Connection, rows: &[UnitPricing]) -> Result<Vec<MismatchReport>, ImportError> {
        let mut inventory_ids: Vec<String> = rows
            .iter()
            .filter(|row| row.inventory_type.is_unit())
            .filter_map(|row| row.inventory_id.clone())
            .collect();
        inventory_ids.sort();
        inventory_ids.dedup();

        if inventory_ids.is_empty() {
            return Ok(Vec::new());
        }

        let configured = self.catalog.lease_terms_for_inventories(conn, &inventory_ids)?;
        Ok(compare_lease_terms(rows, &configured))
    }

    /// Run `detect` and log the findings. Store failures are logged too;
    /// the audit never fails the caller.
    pub fn audit(&self, conn: &Connection, rows: &[UnitPricing]) -> Vec<MismatchReport> {
        let reports = match self.detect(conn, rows) {
            Ok(reports) => reports,
            Err(err) => {
                warn!(error = %err, "lease term mismatch audit skipped");
                return Vec::new();
            }
        };

        let file_name = rows.iter().find_map(|row| row.file_name.clone()).unwrap_or_default();

        let rms_side: Vec<String> = reports
            .iter()
            .filter(|r| !r.mismatching_rms_terms.is_empty())
            .map(|r| format!("{}: {}", r.external_id, join_terms(&r.mismatching_rms_terms)))
            .collect();
        if !rms_side.is_empty() {
            error!(
                file_name = %file_name,
                inventories = rms_side.len(),
                mismatches = %rms_side.join(" | "),
                "lease terms mismatch between RMS and Reva"
            );
        }

        if self.alert_reva_terms {
            let reva_side: Vec<String> = reports
                .iter()
                .filter(|r| !r.mismatching_reva_terms.is_empty())
                .map(|r| format!("{}: {}", r.external_id, join_terms(&r.mismatching_reva_terms)))
                .collect();
            if !reva_side.is_empty() {
                warn!(
                    file_name = %file_name,
                    inventories = reva_side.len(),
                    mismatches = %reva_side.join(" | "),
                    "Reva lease terms not priced by RMS"
                );
            }
        }

        reports
    }
}

fn join_terms(terms: &[TermKey]) -> String {
    terms.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(", ")
}

/// Pure comparison, one report per inventory with at least one mismatch.
///
/// - RMS side: a priced `(length, type)` with no configured term of that
///   length whose state equals the type or is empty.
/// - Reva side: a configured term no priced cell satisfies. Terms scoped
///   to NEW (or RENEWAL) are ignored when the unit has no NEW (or RENEWAL)
///   pricing in the batch.
pub fn compare_lease_terms(rows: &[UnitPricing], configured: &[ConfiguredLeaseTerm]) -> Vec<MismatchReport> {
    // inventory id → (external id, file name, priced keys)
    let mut priced: BTreeMap<&str, (&str, Option<&String>, BTreeSet<TermKey>)> = BTreeMap::new();

    for row in rows.iter().filter(|row| row.inventory_type.is_unit()) {
        let Some(inventory_id) = row.inventory_id.as_deref() else {
            continue;
        };
        let entry = priced
            .entry(inventory_id)
            .or_insert_with(|| (row.external_id.as_str(), row.file_name.as_ref(), BTreeSet::new()));
        for length in row.rent_matrix.term_lengths() {
            entry.2.insert(TermKey {
                length,
                state: Some(row.pricing_type()),
            });
        }
    }

    let mut catalog_terms: BTreeMap<&str, BTreeSet<TermKey>> = BTreeMap::new();
    for term in configured {
        catalog_terms.entry(term.inventory_id.as_str()).or_default().insert(TermKey {
            length: term.term_length,
            state: term.state,
        });
    }

    let empty = BTreeSet::new();
    let mut reports = Vec::new();

    for (inventory_id, (external_id, file_name, priced_keys)) in priced {
        let known = catalog_terms.get(inventory_id).unwrap_or(&empty);

        let mismatching_rms_terms: Vec<TermKey> = priced_keys
            .iter()
            .filter(|p| !known.iter().any(|k| k.length == p.length && (k.state.is_none() || k.state == p.state)))
            .copied()
            .collect();

        let has_state = |state: LeaseState| priced_keys.iter().any(|p| p.state == Some(state));

        let mismatching_reva_terms: Vec<TermKey> = known
            .iter()
            .filter(|k| match k.state {
                Some(state) => has_state(state),
                None => true,
            })
            .filter(|k| !priced_keys.iter().any(|p| p.length == k.length && (k.state.is_none() || k.state == p.state)))
            .copied()
            .collect();

        let report = MismatchReport {
            external_id: external_id.to_string(),
            inventory_id: inventory_id.to_string(),
            file_name: file_name.cloned(),
            mismatching_rms_terms,
            mismatching_reva_terms,
        };
        if !report.is_empty() {
            reports.push(report);
        }
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{insert_lease_term, upsert_inventory, InventoryRecord, SqliteCatalog};
    use crate::db::setup_database;
    use crate::rent_matrix::RentMatrix;
    use crate::unit_pricing::{InventoryState, InventoryType, RmsProvider};
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn priced(inventory_id: &str, terms: &[u32], renewal: bool, inventory_type: InventoryType) -> UnitPricing {
        let mut matrix = RentMatrix::new();
        for term in terms {
            matrix.insert(TermLength::new(*term), date(2024, 5, 1), date(2025, 4, 30), dec!(1500));
        }
        UnitPricing {
            external_id: format!("ext-{}", inventory_id),
            inventory_id: Some(inventory_id.to_string()),
            property_id: Some("p1".to_string()),
            inventory_type,
            status: InventoryState::VacantReady,
            avail_date: None,
            renewal_date: if renewal { Some(date(2024, 8, 1)) } else { None },
            amenity_value: None,
            amenities: Vec::new(),
            rent_matrix: matrix,
            standard_lease_length: TermLength::new(12),
            standard_rent: dec!(1500),
            min_rent_lease_length: TermLength::new(12),
            min_rent_start_date: date(2024, 5, 1),
            min_rent_end_date: date(2025, 4, 30),
            min_rent: dec!(1500),
            rms_provider: RmsProvider::Lro,
            file_name: Some("LROPricing_p1.xml".to_string()),
        }
    }

    fn configured(inventory_id: &str, length: u32, state: Option<LeaseState>) -> ConfiguredLeaseTerm {
        ConfiguredLeaseTerm {
            inventory_id: inventory_id.to_string(),
            term_length: TermLength::new(length),
            state,
        }
    }

    fn key(length: u32, state: Option<LeaseState>) -> TermKey {
        TermKey {
            length: TermLength::new(length),
            state,
        }
    }

    #[test]
    fn test_matching_terms_produce_no_report() {
        let rows = vec![priced("inv-1", &[6, 12], false, InventoryType::Unit)];
        let terms = vec![configured("inv-1", 6, None), configured("inv-1", 12, Some(LeaseState::New))];

        assert!(compare_lease_terms(&rows, &terms).is_empty());
    }

    #[test]
    fn test_rms_side_mismatch() {
        let rows = vec![priced("inv-1", &[6, 9, 12], false, InventoryType::Unit)];
        let terms = vec![configured("inv-1", 6, None), configured("inv-1", 12, None)];

        let reports = compare_lease_terms(&rows, &terms);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].external_id, "ext-inv-1");
        assert_eq!(reports[0].mismatching_rms_terms, vec![key(9, Some(LeaseState::New))]);
        assert!(reports[0].mismatching_reva_terms.is_empty());
    }

    #[test]
    fn test_reva_side_ignores_states_the_batch_does_not_price() {
        let rows = vec![priced("inv-1", &[12], false, InventoryType::Unit)];
        let terms = vec![
            configured("inv-1", 12, None),
            configured("inv-1", 3, Some(LeaseState::Renewal)),
            configured("inv-1", 15, Some(LeaseState::New)),
            configured("inv-1", 18, None),
        ];

        let reports = compare_lease_terms(&rows, &terms);
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].mismatching_reva_terms,
            vec![key(15, Some(LeaseState::New)), key(18, None)]
        );
    }

    #[test]
    fn test_non_unit_rows_are_not_audited() {
        let rows = vec![priced("park-1", &[1], false, InventoryType::Parking)];
        assert!(compare_lease_terms(&rows, &[]).is_empty());
    }

    #[test]
    fn test_detect_reads_catalog_terms() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();

        let inventory = InventoryRecord {
            id: "inv-1".to_string(),
            external_id: "ext-inv-1".to_string(),
            property_id: "p1".to_string(),
            name: "101".to_string(),
            building_name: "B1".to_string(),
            inventory_type: InventoryType::Unit,
            state: InventoryState::VacantReady,
            state_start_date: None,
            availability_date: None,
        };
        upsert_inventory(&conn, &inventory, "g1").unwrap();
        insert_lease_term(&conn, "g1", TermLength::new(12), None).unwrap();

        let catalog = SqliteCatalog;
        let detector = LeaseTermMismatchDetector::new(&catalog).with_reva_term_alerts(true);
        let rows = vec![
            priced("inv-1", &[12], false, InventoryType::Unit),
            priced("inv-1", &[6, 12], true, InventoryType::Unit),
        ];

        let reports = detector.audit(&conn, &rows);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].mismatching_rms_terms, vec![key(6, Some(LeaseState::Renewal))]);
    }
}
