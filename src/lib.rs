// RMS Pricing - Core Library
// Rent-matrix import pipeline: feed parsing, matrix validation, unit pricing
// assembly, internal price synthesis and transactional reconciliation.

pub mod error;
pub mod rent_matrix;     // Lease-term rows and matrix validation
pub mod unit_pricing;    // UnitPricing record and domain enums
pub mod assembler;       // Rows → UnitPricing
pub mod parser;          // LRO XML stream parser
pub mod synthesizer;     // Internal prices → UnitPricing
pub mod catalog;         // Properties, inventories, configured lease terms
pub mod mismatch;        // Lease-term mismatch audit
pub mod db;              // SQLite store + import audit log
pub mod reconciliation;  // Replace policy + transactional save
pub mod import;          // File and internal-pricing orchestration
pub mod config;

// Re-export commonly used types
pub use error::{ImportError, MatrixError, UnitError, UnitErrorKind};
pub use rent_matrix::{LeaseTermRow, RentMatrix, TermLength};
pub use unit_pricing::{
    InventoryState, InventoryType, LeaseState, PricingEvent, PricingSource, RmsProvider, UnitInfo,
    UnitPricing,
};
pub use assembler::assemble;
pub use parser::{detect_provider, find_property_external_id, LroParseOutcome, LroParser};
pub use synthesizer::{
    load_complimentary_credits, load_internal_prices, synthesize, ComplimentaryCredit, InternalPriceRecord,
    SynthesisOptions,
};
pub use catalog::{ConfiguredLeaseTerm, InventoryCatalog, InventoryRecord, PropertyRecord, SqliteCatalog};
pub use mismatch::{LeaseTermMismatchDetector, MismatchReport};
pub use db::{setup_database, units_pricing_by_property, ImportEvent, StoredPricing, TypeScope};
pub use reconciliation::{PricingBatch, PricingReconciler, PropertyLocks, ReconcileReport, ReplacePolicy};
pub use import::{FileImportReport, FilesReport, ImportReport, PricingImporter};
pub use config::ImportConfig;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
