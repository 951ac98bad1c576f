// 🚨 Error Taxonomy
// File-level, unit-level, batch-level. Audit findings are never errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::rent_matrix::TermLength;

// ============================================================================
// FILE / BATCH LEVEL
// ============================================================================

/// Failures that abort a whole file or a whole reconcile batch.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("parsing failed at line {line}, column {column}: {message}")]
    ParsingFailed {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("file not recognized as an RMS feed: {0}")]
    FileNotRecognized(String),

    #[error("no property external id found in {0}")]
    PropertyIdMissing(String),

    #[error("property '{0}' does not exist")]
    PropertyNotFound(String),

    #[error("pricing setting is empty for property: {0}")]
    PricingSettingMissing(String),

    #[error("unknown timezone '{timezone}' for property {property_id}")]
    UnknownTimezone {
        property_id: String,
        timezone: String,
    },

    #[error("invalid configuration: {0}")]
    ConfigParse(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    /// Tag used when the failure is reported alongside unit errors.
    pub fn kind(&self) -> &'static str {
        match self {
            ImportError::FileNotFound(_) => "FILE_NOT_FOUND",
            ImportError::ParsingFailed { .. } => "PARSING_FAILED",
            ImportError::FileNotRecognized(_) => "FILE_NOT_RECOGNIZED",
            ImportError::PropertyIdMissing(_) => "PARSING_FAILED",
            ImportError::PropertyNotFound(_) => "PROPERTY_NOT_FOUND",
            ImportError::PricingSettingMissing(_) => "PRICING_SETTING_MISSING",
            ImportError::UnknownTimezone { .. } => "UNKNOWN_TIMEZONE",
            ImportError::ConfigParse(_) => "CONFIG_INVALID",
            ImportError::Store(_) | ImportError::Serialization(_) | ImportError::Io(_) => "STORE_FAILED",
        }
    }
}

// ============================================================================
// UNIT LEVEL
// ============================================================================

/// Rent matrix validation failure. The first failure stops the unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatrixError {
    #[error("Start date is not after previous end date for lease term {0}")]
    StartNotAfterPreviousEnd(TermLength),

    #[error("Mismatch in date ranges for lease terms {previous} - {current}")]
    DateRangeMismatch {
        previous: TermLength,
        current: TermLength,
    },

    #[error("Rent missing for a date range between lease terms {previous} - {current}")]
    RentMissing {
        previous: TermLength,
        current: TermLength,
    },

    #[error("No lease terms offered")]
    NoLeaseTerms,
}

/// A single feed row that could not be read into a `LeaseTermRow`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    #[error("Missing attribute {0}")]
    MissingAttribute(&'static str),

    #[error("Invalid {attribute} value '{value}'")]
    InvalidValue { attribute: &'static str, value: String },

    #[error("Date out of range while computing {0}")]
    DateOverflow(&'static str),

    #[error("Amount out of range while computing {0}")]
    AmountOverflow(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitErrorKind {
    ParsingFailed,
    NonZeroConcession,
    InvalidRentMatrix,
    InventoryNotFound,
    SynthesisFailed,
}

impl fmt::Display for UnitErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            UnitErrorKind::ParsingFailed => "PARSING_FAILED",
            UnitErrorKind::NonZeroConcession => "NON_ZERO_CONCESSION",
            UnitErrorKind::InvalidRentMatrix => "INVALID_RENT_MATRIX",
            UnitErrorKind::InventoryNotFound => "INVENTORY_NOT_FOUND",
            UnitErrorKind::SynthesisFailed => "SYNTHESIS_FAILED",
        };
        f.write_str(tag)
    }
}

/// Per-unit failure reported next to the successfully processed units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitError {
    pub external_id: String,
    pub messages: Vec<String>,
    pub kind: UnitErrorKind,
}

impl UnitError {
    pub fn new(external_id: impl Into<String>, kind: UnitErrorKind, message: impl Into<String>) -> Self {
        UnitError {
            external_id: external_id.into(),
            messages: vec![message.into()],
            kind,
        }
    }

    pub fn with_messages(external_id: impl Into<String>, kind: UnitErrorKind, messages: Vec<String>) -> Self {
        UnitError {
            external_id: external_id.into(),
            messages,
            kind,
        }
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.external_id, self.messages.join("; "))
    }
}
