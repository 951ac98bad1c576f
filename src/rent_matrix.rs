// 📐 Rent Matrix - canonical per-unit pricing shape
// term length → start date → { endDate, rent }
//
// Pure data + derivations (standard rent, min rent). No I/O.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Conventional lease length used for "standard" pricing.
pub const STANDARD_TERM_LENGTH: TermLength = TermLength(12);

// ============================================================================
// TERM LENGTH
// ============================================================================

/// Lease term length in months.
///
/// Feeds carry it as a string ("12"); ordering is numeric so that "6" < "12".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TermLength(u32);

impl TermLength {
    pub const fn new(months: u32) -> Self {
        TermLength(months)
    }

    pub fn months(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TermLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TermLength {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(TermLength)
    }
}

// ============================================================================
// LEASE TERM ROW
// ============================================================================

/// One offered-term observation, as emitted by a source adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaseTermRow {
    pub term_length: TermLength,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rent: Decimal,
    pub concession: Decimal,
}

impl LeaseTermRow {
    pub fn new(term_length: TermLength, start_date: NaiveDate, end_date: NaiveDate, rent: Decimal) -> Self {
        LeaseTermRow {
            term_length,
            start_date,
            end_date,
            rent,
            concession: Decimal::ZERO,
        }
    }

    pub fn with_concession(mut self, concession: Decimal) -> Self {
        self.concession = concession;
        self
    }
}

// ============================================================================
// RENT MATRIX
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RentCell {
    pub end_date: NaiveDate,
    pub rent: Decimal,
}

/// Serialized as a single JSON object:
/// `{"12": {"2024-05-01": {"endDate": "2025-04-30", "rent": "1500"}}}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RentMatrix {
    terms: BTreeMap<TermLength, BTreeMap<NaiveDate, RentCell>>,
}

impl RentMatrix {
    pub fn new() -> Self {
        RentMatrix::default()
    }

    pub fn insert(&mut self, term_length: TermLength, start_date: NaiveDate, end_date: NaiveDate, rent: Decimal) {
        self.terms
            .entry(term_length)
            .or_default()
            .insert(start_date, RentCell { end_date, rent });
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Term lengths in ascending numeric order.
    pub fn term_lengths(&self) -> impl Iterator<Item = TermLength> + '_ {
        self.terms.keys().copied()
    }

    pub fn term(&self, term_length: TermLength) -> Option<&BTreeMap<NaiveDate, RentCell>> {
        self.terms.get(&term_length)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TermLength, &BTreeMap<NaiveDate, RentCell>)> {
        self.terms.iter()
    }

    /// Shortest offered term.
    pub fn min_term_length(&self) -> Option<TermLength> {
        self.terms.keys().next().copied()
    }

    /// Chain of `(start, end)` windows for one term length.
    pub fn date_spine(&self, term_length: TermLength) -> Vec<(NaiveDate, NaiveDate)> {
        self.terms
            .get(&term_length)
            .map(|cells| cells.iter().map(|(start, cell)| (*start, cell.end_date)).collect())
            .unwrap_or_default()
    }

    /// Rent of the earliest window of a term.
    pub fn first_rent(&self, term_length: TermLength) -> Option<Decimal> {
        self.terms
            .get(&term_length)
            .and_then(|cells| cells.values().next())
            .map(|cell| cell.rent)
    }
}

// ============================================================================
// DERIVATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardRent {
    pub lease_length: TermLength,
    pub rent: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinRent {
    pub lease_length: TermLength,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rent: Decimal,
}

/// Standard rent: the 12-month earliest-start rent when the 12-month term
/// walks the same windows as the shortest term, else the shortest term's rent.
pub fn standard_rent(matrix: &RentMatrix) -> Option<StandardRent> {
    let min_term = matrix.min_term_length()?;

    if matrix.term(STANDARD_TERM_LENGTH).is_some()
        && matrix.date_spine(STANDARD_TERM_LENGTH) == matrix.date_spine(min_term)
    {
        if let Some(rent) = matrix.first_rent(STANDARD_TERM_LENGTH) {
            return Some(StandardRent {
                lease_length: STANDARD_TERM_LENGTH,
                rent,
            });
        }
    }

    matrix.first_rent(min_term).map(|rent| StandardRent {
        lease_length: min_term,
        rent,
    })
}

/// Lowest rent over every (term, start) cell.
/// Ties keep the first cell in term-ascending, start-ascending order.
pub fn min_rent(matrix: &RentMatrix) -> Option<MinRent> {
    let mut best: Option<MinRent> = None;

    for (term_length, cells) in matrix.iter() {
        for (start_date, cell) in cells {
            let is_lower = best.as_ref().map_or(true, |b| cell.rent < b.rent);
            if is_lower {
                best = Some(MinRent {
                    lease_length: *term_length,
                    start_date: *start_date,
                    end_date: cell.end_date,
                    rent: cell.rent,
                });
            }
        }
    }

    best
}
