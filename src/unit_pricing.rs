// 🏠 Unit Pricing - the storable unit + vocabularies
//
// A UnitPricing starts as a draft (no inventory id / property id) produced by
// the assembler, and is completed by the reconciler once the inventory is
// resolved. Re-imports supersede rows, they never mutate them.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::rent_matrix::{RentMatrix, TermLength};

/// Lowercase + strip everything that is not alphanumeric.
/// "On Notice", "on-notice" and "ONNOTICE" all become "onnotice".
fn normalize_token(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

// ============================================================================
// INVENTORY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InventoryType {
    Unit,
    Parking,
    Storage,
    SubUnit,
    Common,
    Appliance,
}

impl InventoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryType::Unit => "unit",
            InventoryType::Parking => "parking",
            InventoryType::Storage => "storage",
            InventoryType::SubUnit => "subUnit",
            InventoryType::Common => "common",
            InventoryType::Appliance => "appliance",
        }
    }

    /// Rentable items are everything that is not a dwelling unit.
    pub fn is_unit(&self) -> bool {
        matches!(self, InventoryType::Unit)
    }
}

impl fmt::Display for InventoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "unit" => Ok(InventoryType::Unit),
            "parking" => Ok(InventoryType::Parking),
            "storage" => Ok(InventoryType::Storage),
            "subunit" => Ok(InventoryType::SubUnit),
            "common" => Ok(InventoryType::Common),
            "appliance" => Ok(InventoryType::Appliance),
            _ => Err(format!("unknown inventory type '{}'", s)),
        }
    }
}

// ============================================================================
// INVENTORY STATE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InventoryState {
    Admin,
    Down,
    Excluded,
    Model,
    OccupiedNoticeReserved,
    OccupiedNotice,
    Occupied,
    VacantMakeReadyReserved,
    VacantReadyReserved,
    VacantMakeReady,
    VacantReady,
    VacantDown,
    Unavailable,
}

impl InventoryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryState::Admin => "admin",
            InventoryState::Down => "down",
            InventoryState::Excluded => "excluded",
            InventoryState::Model => "model",
            InventoryState::OccupiedNoticeReserved => "occupiedNoticeReserved",
            InventoryState::OccupiedNotice => "occupiedNotice",
            InventoryState::Occupied => "occupied",
            InventoryState::VacantMakeReadyReserved => "vacantMakeReadyReserved",
            InventoryState::VacantReadyReserved => "vacantReadyReserved",
            InventoryState::VacantMakeReady => "vacantMakeReady",
            InventoryState::VacantReady => "vacantReady",
            InventoryState::VacantDown => "vacantDown",
            InventoryState::Unavailable => "unavailable",
        }
    }

    /// Map an LRO `STATUS` value. LRO feeds use short human labels
    /// ("Vacant", "On Notice", "NTV"); the internal camelCase names are
    /// accepted as well.
    pub fn from_lro_status(status: &str) -> Option<Self> {
        let state = match normalize_token(status).as_str() {
            "v" | "vacant" | "available" | "vacantready" | "vacantrented" => InventoryState::VacantReady,
            "vacantnotready" | "vacantmakeready" | "vacantunrented" => InventoryState::VacantMakeReady,
            "o" | "occupied" | "occupiednonotice" => InventoryState::Occupied,
            "n" | "ntv" | "notice" | "onnotice" | "occupiednotice" | "occupiedntv" => InventoryState::OccupiedNotice,
            other => return other_state(other),
        };
        Some(state)
    }
}

fn other_state(normalized: &str) -> Option<InventoryState> {
    match normalized {
        "admin" => Some(InventoryState::Admin),
        "down" => Some(InventoryState::Down),
        "excluded" => Some(InventoryState::Excluded),
        "model" => Some(InventoryState::Model),
        "occupiednoticereserved" => Some(InventoryState::OccupiedNoticeReserved),
        "vacantmakereadyreserved" => Some(InventoryState::VacantMakeReadyReserved),
        "vacantreadyreserved" => Some(InventoryState::VacantReadyReserved),
        "vacantdown" => Some(InventoryState::VacantDown),
        "unavailable" => Some(InventoryState::Unavailable),
        _ => None,
    }
}

impl fmt::Display for InventoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InventoryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "occupiednotice" => Ok(InventoryState::OccupiedNotice),
            "occupied" => Ok(InventoryState::Occupied),
            "vacantmakeready" => Ok(InventoryState::VacantMakeReady),
            "vacantready" => Ok(InventoryState::VacantReady),
            other => other_state(other).ok_or_else(|| format!("unknown inventory state '{}'", s)),
        }
    }
}

// ============================================================================
// LEASE STATE / PRICING TYPE
// ============================================================================

/// New lease vs renewal. Also the `pricingType` of a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LeaseState {
    New,
    Renewal,
}

impl LeaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeaseState::New => "new",
            LeaseState::Renewal => "renewal",
        }
    }
}

impl fmt::Display for LeaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LeaseState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "new" => Ok(LeaseState::New),
            "renewal" => Ok(LeaseState::Renewal),
            _ => Err(format!("unknown lease state '{}'", s)),
        }
    }
}

// ============================================================================
// EVENTS, SETTINGS, PROVIDERS
// ============================================================================

/// What triggered a reconcile run. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricingEvent {
    ExternalRmsImport,
    RevaImport,
    InventoryStateChange,
}

impl PricingEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            PricingEvent::ExternalRmsImport => "EXTERNAL_RMS_IMPORT",
            PricingEvent::RevaImport => "REVA_IMPORT",
            PricingEvent::InventoryStateChange => "INVENTORY_STATE_CHANGE",
        }
    }
}

impl fmt::Display for PricingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which system is authoritative for UNIT pricing of a property.
/// Derived from the property's `unitPricing` boolean setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PricingSource {
    /// unitPricing = true
    Rms,
    /// unitPricing = false
    Reva,
}

impl PricingSource {
    pub fn from_unit_pricing(unit_pricing: bool) -> Self {
        if unit_pricing {
            PricingSource::Rms
        } else {
            PricingSource::Reva
        }
    }

    pub fn unit_pricing(&self) -> bool {
        matches!(self, PricingSource::Rms)
    }
}

/// Origin of a pricing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RmsProvider {
    Lro,
    Reva,
}

impl RmsProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            RmsProvider::Lro => "LRO",
            RmsProvider::Reva => "REVA",
        }
    }
}

impl FromStr for RmsProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_token(s).as_str() {
            "lro" => Ok(RmsProvider::Lro),
            "reva" => Ok(RmsProvider::Reva),
            _ => Err(format!("unknown rms provider '{}'", s)),
        }
    }
}

// ============================================================================
// UNIT PRICING
// ============================================================================

/// Unit/renewal metadata a source adapter hands to the assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitInfo {
    pub external_id: String,
    pub inventory_id: Option<String>,
    pub inventory_type: InventoryType,
    pub status: InventoryState,
    pub avail_date: Option<NaiveDate>,
    pub renewal_date: Option<NaiveDate>,
    pub amenity_value: Option<Decimal>,
    pub amenities: Vec<String>,
    pub rms_provider: RmsProvider,
    pub file_name: Option<String>,
}

impl UnitInfo {
    pub fn new(external_id: impl Into<String>, status: InventoryState, rms_provider: RmsProvider) -> Self {
        UnitInfo {
            external_id: external_id.into(),
            inventory_id: None,
            inventory_type: InventoryType::Unit,
            status,
            avail_date: None,
            renewal_date: None,
            amenity_value: None,
            amenities: Vec::new(),
            rms_provider,
            file_name: None,
        }
    }

    pub fn is_renewal(&self) -> bool {
        self.renewal_date.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPricing {
    pub external_id: String,
    pub inventory_id: Option<String>,
    pub property_id: Option<String>,
    #[serde(rename = "type")]
    pub inventory_type: InventoryType,
    pub status: InventoryState,
    pub avail_date: Option<NaiveDate>,
    pub renewal_date: Option<NaiveDate>,
    pub amenity_value: Option<Decimal>,
    pub amenities: Vec<String>,
    pub rent_matrix: RentMatrix,
    pub standard_lease_length: TermLength,
    pub standard_rent: Decimal,
    pub min_rent_lease_length: TermLength,
    pub min_rent_start_date: NaiveDate,
    pub min_rent_end_date: NaiveDate,
    pub min_rent: Decimal,
    pub rms_provider: RmsProvider,
    pub file_name: Option<String>,
}

impl UnitPricing {
    /// RENEWAL when a renewal date is present, NEW otherwise.
    pub fn pricing_type(&self) -> LeaseState {
        if self.renewal_date.is_some() {
            LeaseState::Renewal
        } else {
            LeaseState::New
        }
    }

    /// Complete a draft with its resolved inventory.
    pub fn resolved(self, inventory_id: &str, inventory_type: InventoryType, property_id: &str) -> Self {
        UnitPricing {
            inventory_id: Some(inventory_id.to_string()),
            inventory_type,
            property_id: Some(property_id.to_string()),
            ..self
        }
    }
}
