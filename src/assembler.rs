// 🧩 Matrix Assembler & Validator
// Raw lease-term rows → validated RentMatrix + derived rents → draft UnitPricing
//
// Shared by both source paths (LRO feed, internal pricing). Fail-fast: the
// first validation failure is returned and the unit is dropped by the caller.

use chrono::NaiveDate;
use std::collections::BTreeMap;

use crate::error::MatrixError;
use crate::rent_matrix::{min_rent, standard_rent, LeaseTermRow, RentMatrix, TermLength};
use crate::unit_pricing::{UnitInfo, UnitPricing};

/// Validate the rows of one unit and build its draft pricing.
///
/// Rules, term lengths walked in ascending order:
/// 1. Within a term, each window must start strictly after the previous one ends.
/// 2. Every term after the first must reuse the previous term's windows
///    (same start, same end) and have exactly as many of them.
///
/// # Example:
/// ```
/// use chrono::NaiveDate;
/// use rust_decimal::Decimal;
/// use rms_pricing::assembler::assemble;
/// use rms_pricing::rent_matrix::{LeaseTermRow, TermLength};
/// use rms_pricing::unit_pricing::{InventoryState, RmsProvider, UnitInfo};
///
/// let start = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
/// let end = NaiveDate::from_ymd_opt(2025, 4, 30).unwrap();
/// let rows = vec![
///     LeaseTermRow::new(TermLength::new(6), start, end, Decimal::new(1600, 0)),
///     LeaseTermRow::new(TermLength::new(12), start, end, Decimal::new(1500, 0)),
/// ];
/// let info = UnitInfo::new("01113", InventoryState::VacantReady, RmsProvider::Lro);
///
/// let pricing = assemble(info, rows).unwrap();
/// assert_eq!(pricing.standard_rent, Decimal::new(1500, 0));
/// ```
pub fn assemble(info: UnitInfo, rows: Vec<LeaseTermRow>) -> Result<UnitPricing, MatrixError> {
    let matrix = build_rent_matrix(rows)?;

    let standard = standard_rent(&matrix).ok_or(MatrixError::NoLeaseTerms)?;
    let min = min_rent(&matrix).ok_or(MatrixError::NoLeaseTerms)?;

    Ok(UnitPricing {
        external_id: info.external_id,
        inventory_id: info.inventory_id,
        property_id: None,
        inventory_type: info.inventory_type,
        status: info.status,
        avail_date: info.avail_date,
        renewal_date: info.renewal_date,
        amenity_value: info.amenity_value,
        amenities: info.amenities,
        rent_matrix: matrix,
        standard_lease_length: standard.lease_length,
        standard_rent: standard.rent,
        min_rent_lease_length: min.lease_length,
        min_rent_start_date: min.start_date,
        min_rent_end_date: min.end_date,
        min_rent: min.rent,
        rms_provider: info.rms_provider,
        file_name: info.file_name,
    })
}

/// Group rows by term length and validate the date chains.
pub fn build_rent_matrix(rows: Vec<LeaseTermRow>) -> Result<RentMatrix, MatrixError> {
    let mut by_term: BTreeMap<TermLength, Vec<LeaseTermRow>> = BTreeMap::new();
    for row in rows {
        by_term.entry(row.term_length).or_default().push(row);
    }

    if by_term.is_empty() {
        return Err(MatrixError::NoLeaseTerms);
    }

    let mut matrix = RentMatrix::new();
    let mut previous: Option<(TermLength, BTreeMap<NaiveDate, NaiveDate>)> = None;

    for (term_length, mut term_rows) in by_term {
        term_rows.sort_by_key(|row| row.start_date);

        let mut windows: BTreeMap<NaiveDate, NaiveDate> = BTreeMap::new();
        let mut previous_end: Option<NaiveDate> = None;

        for row in &term_rows {
            if let Some(end) = previous_end {
                if row.start_date <= end {
                    return Err(MatrixError::StartNotAfterPreviousEnd(term_length));
                }
            }
            previous_end = Some(row.end_date);

            if let Some((previous_term, previous_windows)) = &previous {
                if previous_windows.get(&row.start_date) != Some(&row.end_date) {
                    return Err(MatrixError::DateRangeMismatch {
                        previous: *previous_term,
                        current: term_length,
                    });
                }
            }

            windows.insert(row.start_date, row.end_date);
            matrix.insert(term_length, row.start_date, row.end_date, row.rent);
        }

        if let Some((previous_term, previous_windows)) = &previous {
            if previous_windows.len() != windows.len() {
                return Err(MatrixError::RentMissing {
                    previous: *previous_term,
                    current: term_length,
                });
            }
        }

        previous = Some((term_length, windows));
    }

    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit_pricing::{InventoryState, LeaseState, RmsProvider};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(term: u32, start: NaiveDate, end: NaiveDate, rent: Decimal) -> LeaseTermRow {
        LeaseTermRow::new(TermLength::new(term), start, end, rent)
    }

    fn info() -> UnitInfo {
        UnitInfo::new("01113", InventoryState::VacantReady, RmsProvider::Lro)
    }

    /// Two weekly windows for every requested term, rent grows with the term index.
    fn weekly_rows(terms: &[u32]) -> Vec<LeaseTermRow> {
        let mut rows = Vec::new();
        for (i, term) in terms.iter().enumerate() {
            let base = dec!(1500) + Decimal::from(i as u32 * 10);
            rows.push(row(*term, date(2024, 5, 1), date(2024, 5, 7), base));
            rows.push(row(*term, date(2024, 5, 8), date(2024, 5, 14), base + dec!(5)));
        }
        rows
    }

    #[test]
    fn test_valid_matrix_repeats_date_spine_across_terms() {
        let pricing = assemble(info(), weekly_rows(&[12, 6, 9])).unwrap();

        let matrix = &pricing.rent_matrix;
        let terms: Vec<u32> = matrix.term_lengths().map(|t| t.months()).collect();
        assert_eq!(terms, vec![6, 9, 12]);

        let spine = matrix.date_spine(TermLength::new(6));
        for term in matrix.term_lengths() {
            assert_eq!(matrix.date_spine(term), spine);
        }

        assert_eq!(pricing.standard_lease_length, TermLength::new(12));
        assert_eq!(pricing.standard_rent, dec!(1500));
        assert_eq!(pricing.min_rent, dec!(1500));
        assert_eq!(pricing.min_rent_lease_length, TermLength::new(12));
        assert_eq!(pricing.min_rent_start_date, date(2024, 5, 1));
        assert_eq!(pricing.pricing_type(), LeaseState::New);
    }

    #[test]
    fn test_unsorted_rows_are_sorted_per_term() {
        let rows = vec![
            row(12, date(2024, 5, 8), date(2024, 5, 14), dec!(1510)),
            row(12, date(2024, 5, 1), date(2024, 5, 7), dec!(1500)),
        ];

        let matrix = build_rent_matrix(rows).unwrap();
        assert_eq!(
            matrix.date_spine(TermLength::new(12)),
            vec![(date(2024, 5, 1), date(2024, 5, 7)), (date(2024, 5, 8), date(2024, 5, 14))]
        );
    }

    #[test]
    fn test_overlapping_windows_fail() {
        let rows = vec![
            row(12, date(2024, 5, 1), date(2024, 5, 7), dec!(1500)),
            row(12, date(2024, 5, 7), date(2024, 5, 14), dec!(1510)),
        ];

        let err = assemble(info(), rows).unwrap_err();
        assert_eq!(err, MatrixError::StartNotAfterPreviousEnd(TermLength::new(12)));
        assert_eq!(
            err.to_string(),
            "Start date is not after previous end date for lease term 12"
        );
    }

    #[test]
    fn test_missing_window_in_later_term_fails() {
        let mut rows = weekly_rows(&[6]);
        rows.push(row(12, date(2024, 5, 1), date(2024, 5, 7), dec!(1400)));

        let err = assemble(info(), rows).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Rent missing for a date range between lease terms 6 - 12"
        );
    }

    #[test]
    fn test_shifted_window_in_later_term_fails() {
        let mut rows = weekly_rows(&[6]);
        rows.push(row(12, date(2024, 5, 1), date(2024, 5, 7), dec!(1400)));
        rows.push(row(12, date(2024, 5, 8), date(2024, 5, 15), dec!(1400)));

        let err = assemble(info(), rows).unwrap_err();
        assert_eq!(
            err,
            MatrixError::DateRangeMismatch {
                previous: TermLength::new(6),
                current: TermLength::new(12),
            }
        );
    }

    #[test]
    fn test_no_rows_fails() {
        assert_eq!(assemble(info(), Vec::new()).unwrap_err(), MatrixError::NoLeaseTerms);
    }

    #[test]
    fn test_renewal_draft_keeps_metadata() {
        let mut renewal = info();
        renewal.renewal_date = Some(date(2024, 8, 1));
        renewal.amenities = vec!["Balcony".to_string()];

        let pricing = assemble(renewal, weekly_rows(&[12])).unwrap();
        assert_eq!(pricing.pricing_type(), LeaseState::Renewal);
        assert_eq!(pricing.amenities, vec!["Balcony".to_string()]);
        assert!(pricing.inventory_id.is_none());
        assert!(pricing.property_id.is_none());
    }
}
