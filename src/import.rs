// 📥 Import Orchestration - RMS files and internal pricing into the store
//
// RMS path:   file → provider → property → parser → reconcile (ExternalRmsImport)
// Reva path:  catalog inventories + internal prices → synthesizer → reconcile
//             (RevaImport / InventoryStateChange)
//
// Files are handled strictly in series; a failing file never stops the next one.

use chrono::{NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::catalog::{InventoryCatalog, PropertyRecord};
use crate::config::ImportConfig;
use crate::db::compute_file_hash;
use crate::error::{ImportError, UnitError};
use crate::parser::{detect_provider, find_property_external_id, strip_timestamp_prefix, LroParser};
use crate::reconciliation::{PricingBatch, PricingReconciler, PropertyLocks, ReconcileOptions, ReconcileReport};
use crate::synthesizer::{group_inputs, synthesize, ComplimentaryCredit, InternalPriceRecord, SynthesisOptions};
use crate::unit_pricing::{PricingEvent, PricingSource, RmsProvider};

// ============================================================================
// REPORTS
// ============================================================================

/// Outcome of one RMS file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileImportReport {
    pub file_name: String,
    pub provider: RmsProvider,
    pub property_id: String,
    /// The property prices units internally; the file was not applied.
    pub ignored: bool,
    pub parsed_units: usize,
    pub errors: Vec<UnitError>,
    pub reconcile: Option<ReconcileReport>,
}

impl FileImportReport {
    pub fn persisted(&self) -> usize {
        self.reconcile.as_ref().map_or(0, |r| r.persisted)
    }
}

/// One failure line of a multi-file run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileError {
    pub file: String,
    pub error: String,
    pub message: String,
    pub external_id: Option<String>,
}

/// Counts and failures of a multi-file run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesReport {
    pub errors: Vec<FileError>,
    /// Files applied without any error, plus ignored files.
    pub processed: usize,
    pub uploaded: usize,
    pub failing_files: Vec<String>,
}

/// Outcome of an internal pricing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub property_id: String,
    pub event: PricingEvent,
    pub synthesized: usize,
    pub errors: Vec<UnitError>,
    pub reconcile: ReconcileReport,
}

// ============================================================================
// IMPORTER
// ============================================================================

pub struct PricingImporter<C: InventoryCatalog> {
    reconciler: PricingReconciler<C>,
    decaying_availability: bool,
    today: Option<NaiveDate>,
}

impl<C: InventoryCatalog> PricingImporter<C> {
    pub fn new(catalog: C, config: &ImportConfig) -> Self {
        let options = ReconcileOptions {
            detect_lease_term_mismatches: config.detect_lease_term_mismatches,
            alert_reva_term_mismatches: config.alert_reva_term_mismatches,
        };
        PricingImporter {
            reconciler: PricingReconciler::new(catalog).with_options(options),
            decaying_availability: config.simulate_decaying_availability,
            today: None,
        }
    }

    /// Pin "today" instead of the current date in the property's timezone.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    pub fn with_locks(mut self, locks: PropertyLocks) -> Self {
        self.reconciler = self.reconciler.with_locks(locks);
        self
    }

    fn catalog(&self) -> &C {
        self.reconciler.catalog()
    }

    fn today_for(&self, property: &PropertyRecord) -> Result<NaiveDate, ImportError> {
        match self.today {
            Some(today) => Ok(today),
            None => Ok(Utc::now().with_timezone(&property.timezone()?).date_naive()),
        }
    }

    // ------------------------------------------------------------------------
    // RMS files
    // ------------------------------------------------------------------------

    /// Parse one RMS file and replace the property's UNIT pricing with it.
    pub fn process_rms_file(&self, conn: &mut Connection, file_path: &Path) -> Result<FileImportReport, ImportError> {
        let raw_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let file_name = strip_timestamp_prefix(&raw_name).to_string();

        let provider = detect_provider(file_path).ok_or_else(|| ImportError::FileNotRecognized(raw_name.clone()))?;
        if !file_path.exists() {
            return Err(ImportError::FileNotFound(file_path.to_path_buf()));
        }

        let rms_property_id =
            find_property_external_id(file_path)?.ok_or_else(|| ImportError::PropertyIdMissing(raw_name.clone()))?;
        let property = self
            .catalog()
            .property_by_rms_external_id(conn, &rms_property_id)?
            .ok_or_else(|| ImportError::PropertyNotFound(rms_property_id.clone()))?;

        let source = property.pricing_source()?;
        if source == PricingSource::Reva {
            info!(file_name = %file_name, property_id = %property.id, "RMS file ignored, property prices units internally");
            return Ok(FileImportReport {
                file_name,
                provider,
                property_id: property.id,
                ignored: true,
                parsed_units: 0,
                errors: Vec::new(),
                reconcile: None,
            });
        }

        let parser = LroParser::new(property.timezone()?)
            .with_today(self.today_for(&property)?)
            .with_file_name(file_name.clone());
        let outcome = parser.parse_file(file_path)?;
        info!(file_name = %file_name, "{}", outcome.summary());

        let parsed_units = outcome.units.len();
        let batch = PricingBatch::new(&property.id, PricingEvent::ExternalRmsImport, source, outcome.units)
            .with_file(Some(file_name.clone()), Some(compute_file_hash(file_path)?));
        let reconcile = self.reconciler.save_units_pricing(conn, batch)?;

        let mut errors = outcome.errors;
        errors.extend(reconcile.errors.iter().cloned());

        Ok(FileImportReport {
            file_name,
            provider,
            property_id: property.id,
            ignored: false,
            parsed_units,
            errors,
            reconcile: Some(reconcile),
        })
    }

    /// Process files one after the other and aggregate the results.
    pub fn handle_rms_files(&self, conn: &mut Connection, files: &[PathBuf]) -> FilesReport {
        let mut report = FilesReport {
            uploaded: files.len(),
            ..FilesReport::default()
        };

        if files.is_empty() {
            error!("no RMS files added");
            report.errors.push(FileError {
                file: String::new(),
                error: "NO_FILES_ADDED".to_string(),
                message: "No RMS files added".to_string(),
                external_id: None,
            });
            return report;
        }

        for path in files {
            let file = path.display().to_string();

            match self.process_rms_file(conn, path) {
                Ok(file_report) => {
                    for unit_error in &file_report.errors {
                        report.errors.push(FileError {
                            file: file.clone(),
                            error: unit_error.kind.to_string(),
                            message: unit_error.messages.join("; "),
                            external_id: Some(unit_error.external_id.clone()),
                        });
                    }

                    if file_report.ignored || file_report.errors.is_empty() {
                        report.processed += 1;
                    } else {
                        report.failing_files.push(file);
                    }
                }
                Err(err) => {
                    error!(file = %file, error = %err, "handling RMS file failed");
                    report.errors.push(FileError {
                        file: file.clone(),
                        error: err.kind().to_string(),
                        message: err.to_string(),
                        external_id: None,
                    });
                    report.failing_files.push(file);
                }
            }
        }

        if !report.failing_files.is_empty() {
            error!(failing_files = ?report.failing_files, "error while importing RMS files");
        }

        report
    }

    // ------------------------------------------------------------------------
    // Internal pricing
    // ------------------------------------------------------------------------

    /// Price every inventory of the property from internal prices.
    pub fn import_reva_pricing(
        &self,
        conn: &mut Connection,
        property_id: &str,
        prices: Vec<InternalPriceRecord>,
        credits: Vec<ComplimentaryCredit>,
    ) -> Result<ImportReport, ImportError> {
        self.import_internal(conn, property_id, None, prices, credits)
    }

    /// Re-price only the inventories whose state changed.
    pub fn import_inventory_state_change(
        &self,
        conn: &mut Connection,
        property_id: &str,
        inventory_ids: &[String],
        prices: Vec<InternalPriceRecord>,
        credits: Vec<ComplimentaryCredit>,
    ) -> Result<ImportReport, ImportError> {
        self.import_internal(conn, property_id, Some(inventory_ids), prices, credits)
    }

    fn import_internal(
        &self,
        conn: &mut Connection,
        property_id: &str,
        inventory_ids: Option<&[String]>,
        prices: Vec<InternalPriceRecord>,
        credits: Vec<ComplimentaryCredit>,
    ) -> Result<ImportReport, ImportError> {
        let event = match inventory_ids {
            Some(_) => PricingEvent::InventoryStateChange,
            None => PricingEvent::RevaImport,
        };

        let property = self
            .catalog()
            .property_by_id(conn, property_id)?
            .ok_or_else(|| ImportError::PropertyNotFound(property_id.to_string()))?;
        let source = property.pricing_source()?;
        let options = SynthesisOptions::new(self.today_for(&property)?).with_decaying_availability(self.decaying_availability);

        let inventories = self.catalog().inventories_for_property(conn, property_id, inventory_ids)?;
        let inputs = group_inputs(inventories, prices, credits);
        let outcome = synthesize(&inputs, options);

        if !outcome.errors.is_empty() {
            warn!(property_id, errors = outcome.errors.len(), "the parsing of the Reva price failed for some units");
        }

        let synthesized = outcome.units.len();
        let mut batch = PricingBatch::new(property_id, event, source, outcome.units);
        if let Some(ids) = inventory_ids {
            batch = batch.with_affected_inventories(ids.to_vec());
        }

        let reconcile = self.reconciler.save_units_pricing(conn, batch)?;

        let mut errors = outcome.errors;
        errors.extend(reconcile.errors.iter().cloned());

        Ok(ImportReport {
            property_id: property_id.to_string(),
            event,
            synthesized,
            errors,
            reconcile,
        })
    }
}
