// 🧮 Internal Pricing Synthesizer
// Internally computed prices → synthetic lease-term rows → assembler
//
// Output is indistinguishable from an LRO import downstream: same
// UnitPricing shape, same validation. Failures are per unit, never fatal.

use chrono::{Days, Months, NaiveDate};
use rayon::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

use crate::assembler::assemble;
use crate::catalog::InventoryRecord;
use crate::error::{ImportError, RowError, UnitError, UnitErrorKind};
use crate::rent_matrix::{LeaseTermRow, TermLength};
use crate::unit_pricing::{InventoryState, LeaseState, RmsProvider, UnitInfo, UnitPricing};

/// Length of the default all-time window.
const ALL_TIME_MONTHS: u32 = 100 * 12;

/// Decaying availability: five weekly windows, +20% each.
const DECAY_WINDOWS: u64 = 5;
const DECAY_WINDOW_DAYS: u64 = 7;

// ============================================================================
// INPUTS
// ============================================================================

/// One internally computed price for an inventory and a lease term.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalPriceRecord {
    pub inventory_id: String,
    pub market_rent_monthly: Decimal,
    pub term_length: TermLength,
    pub relative_adjustment: Decimal,
    pub absolute_adjustment: Decimal,
    /// None prices both new leases and renewals.
    pub lease_state: Option<LeaseState>,
}

impl InternalPriceRecord {
    /// market + absolute + market × relative / 100, None on overflow.
    pub fn adjusted_rent(&self) -> Option<Decimal> {
        let relative = self
            .market_rent_monthly
            .checked_mul(self.relative_adjustment)?
            .checked_div(Decimal::ONE_HUNDRED)?;
        self.market_rent_monthly
            .checked_add(self.absolute_adjustment)?
            .checked_add(relative)
    }
}

/// Everything needed to price one inventory.
#[derive(Debug, Clone)]
pub struct InventoryPricingInput {
    pub inventory: InventoryRecord,
    pub prices: Vec<InternalPriceRecord>,
    pub complimentary_credits: Vec<Decimal>,
}

#[derive(Debug, Clone, Copy)]
pub struct SynthesisOptions {
    pub today: NaiveDate,
    pub decaying_availability: bool,
}

impl SynthesisOptions {
    pub fn new(today: NaiveDate) -> Self {
        SynthesisOptions {
            today,
            decaying_availability: false,
        }
    }

    pub fn with_decaying_availability(mut self, enabled: bool) -> Self {
        self.decaying_availability = enabled;
        self
    }
}

#[derive(Debug, Default)]
pub struct SynthesisOutcome {
    pub units: Vec<UnitPricing>,
    pub errors: Vec<UnitError>,
}

/// Group price records and credits with their inventories, in inventory order.
pub fn group_inputs(
    inventories: Vec<InventoryRecord>,
    prices: Vec<InternalPriceRecord>,
    credits: Vec<ComplimentaryCredit>,
) -> Vec<InventoryPricingInput> {
    let mut prices_by_inventory: HashMap<String, Vec<InternalPriceRecord>> = HashMap::new();
    for price in prices {
        prices_by_inventory.entry(price.inventory_id.clone()).or_default().push(price);
    }

    let mut credits_by_inventory: HashMap<String, Vec<Decimal>> = HashMap::new();
    for credit in credits {
        credits_by_inventory.entry(credit.inventory_id).or_default().push(credit.amount);
    }

    inventories
        .into_iter()
        .map(|inventory| InventoryPricingInput {
            prices: prices_by_inventory.remove(&inventory.id).unwrap_or_default(),
            complimentary_credits: credits_by_inventory.remove(&inventory.id).unwrap_or_default(),
            inventory,
        })
        .collect()
}

// ============================================================================
// SYNTHESIS
// ============================================================================

/// Price every inventory in parallel. Output order follows input order.
pub fn synthesize(inputs: &[InventoryPricingInput], options: SynthesisOptions) -> SynthesisOutcome {
    let results: Vec<Result<Vec<UnitPricing>, UnitError>> = inputs
        .par_iter()
        .map(|input| synthesize_inventory(input, options))
        .collect();

    let mut outcome = SynthesisOutcome::default();
    for result in results {
        match result {
            Ok(units) => outcome.units.extend(units),
            Err(err) => {
                warn!(external_id = %err.external_id, error = %err, "internal pricing synthesis failed");
                outcome.errors.push(err);
            }
        }
    }

    debug!(units = outcome.units.len(), errors = outcome.errors.len(), "internal pricing synthesized");
    outcome
}

/// New-lease pricing for the inventory, plus renewal pricing for units on
/// notice that have no availability date yet.
pub fn synthesize_inventory(input: &InventoryPricingInput, options: SynthesisOptions) -> Result<Vec<UnitPricing>, UnitError> {
    let inventory = &input.inventory;
    let fail = |message: String| UnitError::new(&inventory.external_id, UnitErrorKind::SynthesisFailed, message);

    if input.prices.is_empty() {
        debug!(inventory_id = %inventory.id, "no internal prices for inventory");
        return Ok(Vec::new());
    }

    let credits = input
        .complimentary_credits
        .iter()
        .try_fold(Decimal::ZERO, |total, credit| total.checked_add(*credit))
        .ok_or_else(|| fail(RowError::AmountOverflow("complimentary credits").to_string()))?;
    let mut units = Vec::new();

    let new_terms = prices_for_state(&input.prices, LeaseState::New);
    if !new_terms.is_empty() {
        let rows = lease_term_rows(&new_terms, credits, options).map_err(|e| fail(e.to_string()))?;
        let info = unit_info(inventory, None);
        units.push(assemble(info, rows).map_err(|e| fail(e.to_string()))?);
    }

    if inventory.state == InventoryState::OccupiedNotice && inventory.availability_date.is_none() {
        let renewal_terms = prices_for_state(&input.prices, LeaseState::Renewal);
        if !renewal_terms.is_empty() {
            let state_start = inventory
                .state_start_date
                .ok_or_else(|| fail("Missing state start date for renewal pricing".to_string()))?;
            let renewal_date = state_start
                .checked_add_months(Months::new(12))
                .ok_or_else(|| fail(RowError::DateOverflow("renewal date").to_string()))?;

            let rows = lease_term_rows(&renewal_terms, credits, options).map_err(|e| fail(e.to_string()))?;
            let info = unit_info(inventory, Some(renewal_date));
            units.push(assemble(info, rows).map_err(|e| fail(e.to_string()))?);
        }
    }

    Ok(units)
}

/// Records that apply to `state`, one per term length. A record for the
/// exact state wins over a state-less one.
fn prices_for_state(prices: &[InternalPriceRecord], state: LeaseState) -> BTreeMap<TermLength, &InternalPriceRecord> {
    let mut by_term = BTreeMap::new();

    for price in prices.iter().filter(|p| p.lease_state.is_none()) {
        by_term.insert(price.term_length, price);
    }
    for price in prices.iter().filter(|p| p.lease_state == Some(state)) {
        by_term.insert(price.term_length, price);
    }

    by_term
}

fn lease_term_rows(
    terms: &BTreeMap<TermLength, &InternalPriceRecord>,
    credits: Decimal,
    options: SynthesisOptions,
) -> Result<Vec<LeaseTermRow>, RowError> {
    let mut rows = Vec::new();

    for (term_length, price) in terms {
        let rent = price
            .adjusted_rent()
            .and_then(|rent| rent.checked_add(credits))
            .ok_or(RowError::AmountOverflow("rent"))?;

        if options.decaying_availability {
            rows.extend(decaying_windows(*term_length, rent, options.today)?);
        } else {
            let end = options
                .today
                .checked_add_months(Months::new(ALL_TIME_MONTHS))
                .ok_or(RowError::DateOverflow("end date"))?;
            rows.push(LeaseTermRow::new(*term_length, options.today, end, rent.round_dp(2)));
        }
    }

    Ok(rows)
}

fn decaying_windows(term_length: TermLength, rent: Decimal, today: NaiveDate) -> Result<Vec<LeaseTermRow>, RowError> {
    let step = Decimal::new(12, 1);
    let mut current = rent;
    let mut rows = Vec::new();

    for window in 0..DECAY_WINDOWS {
        let start = today
            .checked_add_days(Days::new(window * DECAY_WINDOW_DAYS))
            .ok_or(RowError::DateOverflow("start date"))?;
        let end = start
            .checked_add_days(Days::new(DECAY_WINDOW_DAYS - 1))
            .ok_or(RowError::DateOverflow("end date"))?;

        if window > 0 {
            current = current.checked_mul(step).ok_or(RowError::AmountOverflow("decaying rent"))?;
        }
        rows.push(LeaseTermRow::new(term_length, start, end, current.round_dp(2)));
    }

    Ok(rows)
}

fn unit_info(inventory: &InventoryRecord, renewal_date: Option<NaiveDate>) -> UnitInfo {
    let mut info = UnitInfo::new(&inventory.external_id, inventory.state, RmsProvider::Reva);
    info.inventory_id = Some(inventory.id.clone());
    info.inventory_type = inventory.inventory_type;
    info.avail_date = inventory.availability_date;
    info.renewal_date = renewal_date;
    info
}

// ============================================================================
// CSV LOADING
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceCsvRow {
    inventory_id: String,
    market_rent_monthly: Decimal,
    term_length: TermLength,
    relative_adjustment: Option<Decimal>,
    absolute_adjustment: Option<Decimal>,
    lease_state: Option<LeaseState>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplimentaryCredit {
    pub inventory_id: String,
    pub amount: Decimal,
}

/// Columns: inventoryId, marketRentMonthly, termLength, relativeAdjustment,
/// absoluteAdjustment, leaseState. Empty adjustments count as zero, an
/// empty lease state applies to both states.
pub fn load_internal_prices(csv_path: &Path) -> Result<Vec<InternalPriceRecord>, ImportError> {
    let mut rdr = open_csv(csv_path)?;
    let mut records = Vec::new();

    for (index, result) in rdr.deserialize::<PriceCsvRow>().enumerate() {
        let row = result.map_err(|e| csv_failure(index, e))?;
        records.push(InternalPriceRecord {
            inventory_id: row.inventory_id,
            market_rent_monthly: row.market_rent_monthly,
            term_length: row.term_length,
            relative_adjustment: row.relative_adjustment.unwrap_or_default(),
            absolute_adjustment: row.absolute_adjustment.unwrap_or_default(),
            lease_state: row.lease_state,
        });
    }

    Ok(records)
}

/// Columns: inventoryId, amount.
pub fn load_complimentary_credits(csv_path: &Path) -> Result<Vec<ComplimentaryCredit>, ImportError> {
    let mut rdr = open_csv(csv_path)?;
    let credits = rdr
        .deserialize::<ComplimentaryCredit>()
        .enumerate()
        .map(|(index, result)| result.map_err(|e| csv_failure(index, e)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(credits)
}

fn open_csv(csv_path: &Path) -> Result<csv::Reader<std::fs::File>, ImportError> {
    if !csv_path.exists() {
        return Err(ImportError::FileNotFound(csv_path.to_path_buf()));
    }
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .map_err(|e| csv_failure(0, e))
}

fn csv_failure(index: usize, err: csv::Error) -> ImportError {
    let line = err
        .position()
        .map(|p| p.line() as usize)
        .unwrap_or(index + 2);
    ImportError::ParsingFailed {
        line,
        column: 0,
        message: err.to_string(),
    }
}
