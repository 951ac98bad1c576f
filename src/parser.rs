// 📡 LRO Stream Parser
// RMS XML feed → per-unit lease-term rows → draft UnitPricing
//
// Single pass over tag open/close events (quick-xml pull reader). Only the
// unit being read is held in memory. Structural XML errors abort the file;
// unit data problems are collected and the rest of the file keeps going.
//
//   <Community ID="11190">
//     <Unit ID="01113" STATUS="Vacant" AVAILDATE="2018-04-09">
//       <Amenity DESCRIPTION="Balcony"/>
//       <OfferedTerm LT="12" STARTDATE=".." ENDDATE=".." EFFECTIVERENT="1500" TOTALCONCESSION="0"/>
//     </Unit>
//     <Renewals>
//       <Renewal UNITID="04305" RENEWALDATE="2018-06-01" HASGIVENNOTICE="N">
//         <OfferedTerm LT="12" EFFECTIVERENT="1550"/>
//       </Renewal>
//     </Renewals>
//   </Community>

use chrono::{DateTime, Months, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::{BytesRef, BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, error};

use crate::assembler::assemble;
use crate::error::{ImportError, RowError, UnitError, UnitErrorKind};
use crate::rent_matrix::{LeaseTermRow, TermLength};
use crate::unit_pricing::{InventoryState, RmsProvider, UnitInfo, UnitPricing};

// ============================================================================
// PROVIDER DETECTION
// ============================================================================

/// Drop the upload timestamp prefix ("1523308802997-LROPricing_..." → "LROPricing_...").
pub fn strip_timestamp_prefix(file_name: &str) -> &str {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    let prefix = PREFIX.get_or_init(|| Regex::new(r"^\d+-").expect("valid prefix regex"));
    match prefix.find(file_name) {
        Some(m) => &file_name[m.end()..],
        None => file_name,
    }
}

/// Detect the RMS provider from the file name.
///
/// # Examples:
/// ```
/// use std::path::Path;
/// use rms_pricing::parser::detect_provider;
/// use rms_pricing::unit_pricing::RmsProvider;
///
/// let path = Path::new("1523308802997-LROPricing_11190_20180409_units.XML");
/// assert_eq!(detect_provider(path), Some(RmsProvider::Lro));
/// assert_eq!(detect_provider(Path::new("inventory.csv")), None);
/// ```
pub fn detect_provider(file_path: &Path) -> Option<RmsProvider> {
    let file_name = file_path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let name = strip_timestamp_prefix(file_name).to_lowercase();

    if name.starts_with("lropricing") && name.ends_with(".xml") {
        return Some(RmsProvider::Lro);
    }

    None
}

/// Recover the community (property) external id straight from the raw text,
/// without parsing the document. Needed before streaming starts, since the
/// property's timezone drives date handling.
pub fn find_property_external_id(file_path: &Path) -> Result<Option<String>, ImportError> {
    let file = File::open(file_path).map_err(|_| ImportError::FileNotFound(file_path.to_path_buf()))?;
    scan_property_external_id(BufReader::new(file))
}

fn scan_property_external_id<R: BufRead>(source: R) -> Result<Option<String>, ImportError> {
    static COMMUNITY_ID: OnceLock<Regex> = OnceLock::new();
    let pattern = COMMUNITY_ID.get_or_init(|| {
        Regex::new(r#"(?is)<\s*community\b[^>]*?\bID\s*=\s*["']([^"']*)["']"#).expect("valid community regex")
    });

    // The opening tag may be spread over several lines
    let mut pending = String::new();
    for line in source.lines() {
        let line = line?;
        if pending.is_empty() {
            match line.to_ascii_lowercase().find("<community") {
                Some(idx) => pending.push_str(&line[idx..]),
                None => continue,
            }
        } else {
            pending.push(' ');
            pending.push_str(&line);
        }

        if pending.contains('>') {
            if let Some(caps) = pattern.captures(&pending) {
                return Ok(caps.get(1).map(|m| m.as_str().trim().to_string()));
            }
            pending.clear();
        } else if pending.len() > 64 * 1024 {
            pending.clear();
        }
    }

    Ok(None)
}

// ============================================================================
// PARSE OUTCOME
// ============================================================================

/// Result of one feed file: the good units plus the rejected ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LroParseOutcome {
    pub property_external_id: Option<String>,
    pub units: Vec<UnitPricing>,
    pub errors: Vec<UnitError>,
}

impl LroParseOutcome {
    pub fn summary(&self) -> String {
        format!(
            "property {}: {} units parsed, {} units rejected",
            self.property_external_id.as_deref().unwrap_or("?"),
            self.units.len(),
            self.errors.len()
        )
    }
}

// ============================================================================
// PARSER
// ============================================================================

pub struct LroParser {
    timezone: Tz,
    today: NaiveDate,
    file_name: Option<String>,
}

impl LroParser {
    /// Parser whose "today" is the current date in the property's timezone.
    pub fn new(timezone: Tz) -> Self {
        LroParser {
            timezone,
            today: Utc::now().with_timezone(&timezone).date_naive(),
            file_name: None,
        }
    }

    /// Pin "today" (tests, replays).
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Stamp parsed units with the source file name.
    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn parse_file(&self, file_path: &Path) -> Result<LroParseOutcome, ImportError> {
        let file = File::open(file_path).map_err(|_| ImportError::FileNotFound(file_path.to_path_buf()))?;

        match self.parse_events(BufReader::new(file)) {
            Ok(outcome) => Ok(outcome),
            Err(failure) => {
                let reopened = File::open(file_path)?;
                let (line, column) = line_column(reopened, failure.position)?;
                Err(ImportError::ParsingFailed {
                    line,
                    column,
                    message: failure.message,
                })
            }
        }
    }

    pub fn parse_str(&self, xml: &str) -> Result<LroParseOutcome, ImportError> {
        match self.parse_events(xml.as_bytes()) {
            Ok(outcome) => Ok(outcome),
            Err(failure) => {
                let (line, column) = line_column(xml.as_bytes(), failure.position)?;
                Err(ImportError::ParsingFailed {
                    line,
                    column,
                    message: failure.message,
                })
            }
        }
    }

    fn parse_events<R: BufRead>(&self, source: R) -> Result<LroParseOutcome, FeedFailure> {
        let mut reader = Reader::from_reader(source);
        reader.config_mut().trim_text(false);

        let mut state = FeedState::new(self);
        let mut buf = Vec::new();

        loop {
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(err) => return Err(FeedFailure::at(reader.error_position() as u64, err.to_string())),
            };
            let position = reader.buffer_position() as u64;

            match event {
                Event::Start(ref tag) => {
                    let (name, attrs) = read_tag(tag).map_err(|msg| FeedFailure::at(position, msg))?;
                    state.ensure_inside_root(position)?;
                    state.open(&name, &attrs);
                    state.open_tags.push(name);
                }
                Event::Empty(ref tag) => {
                    let (name, attrs) = read_tag(tag).map_err(|msg| FeedFailure::at(position, msg))?;
                    state.ensure_inside_root(position)?;
                    state.open(&name, &attrs);
                    state.close(&name);
                    if state.open_tags.is_empty() {
                        state.root_closed = true;
                    }
                }
                Event::End(ref tag) => {
                    let name = String::from_utf8_lossy(tag.local_name().as_ref()).to_lowercase();
                    state.open_tags.pop();
                    state.close(&name);
                    if state.open_tags.is_empty() {
                        state.root_closed = true;
                    }
                }
                Event::Text(ref text) => {
                    let raw = String::from_utf8_lossy(text).to_string();
                    if state.open_tags.is_empty() && !raw.trim().is_empty() {
                        return Err(FeedFailure::at(position, "text outside of the document root".to_string()));
                    }
                    state.text(&raw);
                }
                Event::GeneralRef(ref reference) => {
                    if state.open_tags.is_empty() {
                        return Err(FeedFailure::at(position, "text outside of the document root".to_string()));
                    }
                    state.text(&resolve_reference(reference));
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        if let Some(unclosed) = state.open_tags.last() {
            let position = reader.buffer_position() as u64;
            return Err(FeedFailure::at(
                position,
                format!("unexpected end of document, <{}> is not closed", unclosed),
            ));
        }

        Ok(state.finish())
    }
}

// ============================================================================
// STATE MACHINE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    Units,
    Renewals,
}

struct UnitAccumulator {
    info: UnitInfo,
    rows: Vec<LeaseTermRow>,
    errors: Vec<(UnitErrorKind, String)>,
}

impl UnitAccumulator {
    fn reject(&mut self, kind: UnitErrorKind, message: impl Into<String>) {
        self.errors.push((kind, message.into()));
    }
}

/// An `<Amenity>` named by attribute ignores its body text.
struct PendingAmenity {
    text: String,
    from_attribute: bool,
}

struct FeedState<'p> {
    parser: &'p LroParser,
    scope: Scope,
    open_tags: Vec<String>,
    root_closed: bool,
    current: Option<UnitAccumulator>,
    pending_term: Option<Result<LeaseTermRow, RowError>>,
    pending_amenity: Option<PendingAmenity>,
    outcome: LroParseOutcome,
}

impl<'p> FeedState<'p> {
    fn new(parser: &'p LroParser) -> Self {
        FeedState {
            parser,
            scope: Scope::Units,
            open_tags: Vec::new(),
            root_closed: false,
            current: None,
            pending_term: None,
            pending_amenity: None,
            outcome: LroParseOutcome::default(),
        }
    }

    fn ensure_inside_root(&self, position: u64) -> Result<(), FeedFailure> {
        if self.root_closed {
            return Err(FeedFailure::at(position, "content after the document root".to_string()));
        }
        Ok(())
    }

    fn open(&mut self, name: &str, attrs: &HashMap<String, String>) {
        match name {
            "community" => {
                if let Some(id) = attrs.get("ID") {
                    self.outcome.property_external_id = Some(id.trim().to_string());
                }
            }
            "unit" => {
                self.scope = Scope::Units;
                self.current = Some(self.start_unit(attrs));
            }
            "renewals" => self.scope = Scope::Renewals,
            "renewal" if self.scope == Scope::Renewals => {
                self.current = Some(self.start_renewal(attrs));
            }
            "offeredterm" => {
                if let Some(acc) = &self.current {
                    let row = read_offered_term(attrs, self.scope, acc.info.renewal_date, self.parser);
                    self.pending_term = Some(row);
                }
            }
            "amenity" => {
                let description = attrs
                    .get("DESCRIPTION")
                    .or_else(|| attrs.get("NAME"))
                    .cloned()
                    .unwrap_or_default();
                self.pending_amenity = Some(PendingAmenity {
                    from_attribute: !description.trim().is_empty(),
                    text: description,
                });
            }
            _ => {}
        }
    }

    fn text(&mut self, raw: &str) {
        if let Some(amenity) = self.pending_amenity.as_mut() {
            if !amenity.from_attribute {
                amenity.text.push_str(raw);
            }
        }
    }

    fn close(&mut self, name: &str) {
        match name {
            "offeredterm" => {
                let (Some(acc), Some(row)) = (self.current.as_mut(), self.pending_term.take()) else {
                    return;
                };
                match row {
                    Ok(row) => {
                        if self.scope != Scope::Renewals && !row.concession.is_zero() {
                            acc.reject(
                                UnitErrorKind::NonZeroConcession,
                                format!("Non-zero concession for lease term {}", row.term_length),
                            );
                        }
                        acc.rows.push(row);
                    }
                    Err(err) => acc.reject(UnitErrorKind::ParsingFailed, err.to_string()),
                }
            }
            "amenity" => {
                if let (Some(acc), Some(amenity)) = (self.current.as_mut(), self.pending_amenity.take()) {
                    let amenity = amenity.text.trim();
                    if !amenity.is_empty() {
                        acc.info.amenities.push(amenity.to_string());
                    }
                }
            }
            "unit" | "renewal" => {
                if let Some(acc) = self.current.take() {
                    self.finish_unit(acc);
                }
                self.pending_term = None;
                self.pending_amenity = None;
            }
            "renewals" => self.scope = Scope::Units,
            _ => {}
        }
    }

    fn start_unit(&self, attrs: &HashMap<String, String>) -> UnitAccumulator {
        let external_id = attrs.get("ID").map(|v| v.trim().to_string()).unwrap_or_default();
        let mut errors = Vec::new();

        let status = match attrs.get("STATUS") {
            Some(raw) => InventoryState::from_lro_status(raw).unwrap_or_else(|| {
                errors.push((UnitErrorKind::ParsingFailed, format!("Unknown unit status '{}'", raw)));
                InventoryState::VacantReady
            }),
            None => {
                errors.push((UnitErrorKind::ParsingFailed, RowError::MissingAttribute("STATUS").to_string()));
                InventoryState::VacantReady
            }
        };

        let mut info = UnitInfo::new(external_id, status, RmsProvider::Lro);
        info.file_name = self.parser.file_name.clone();
        info.avail_date = optional_date(attrs, "AVAILDATE", self.parser.timezone).unwrap_or_else(|err| {
            errors.push((UnitErrorKind::ParsingFailed, err.to_string()));
            None
        });
        info.amenity_value = optional_decimal(attrs, "AMENITYVALUE").unwrap_or_else(|err| {
            errors.push((UnitErrorKind::ParsingFailed, err.to_string()));
            None
        });

        if info.external_id.is_empty() {
            errors.push((UnitErrorKind::ParsingFailed, RowError::MissingAttribute("ID").to_string()));
        }

        UnitAccumulator {
            info,
            rows: Vec::new(),
            errors,
        }
    }

    fn start_renewal(&self, attrs: &HashMap<String, String>) -> UnitAccumulator {
        let external_id = attrs
            .get("UNITID")
            .or_else(|| attrs.get("ID"))
            .map(|v| v.trim().to_string())
            .unwrap_or_default();
        let mut errors = Vec::new();

        let status = if attrs.get("HASGIVENNOTICE").map_or(false, |v| is_truthy(v)) {
            InventoryState::OccupiedNotice
        } else {
            InventoryState::Occupied
        };

        let mut info = UnitInfo::new(external_id, status, RmsProvider::Lro);
        info.file_name = self.parser.file_name.clone();
        info.amenity_value = optional_decimal(attrs, "AMENITYVALUE").unwrap_or_else(|err| {
            errors.push((UnitErrorKind::ParsingFailed, err.to_string()));
            None
        });

        match optional_date(attrs, "RENEWALDATE", self.parser.timezone) {
            Ok(Some(date)) => info.renewal_date = Some(date),
            Ok(None) => errors.push((UnitErrorKind::ParsingFailed, RowError::MissingAttribute("RENEWALDATE").to_string())),
            Err(err) => errors.push((UnitErrorKind::ParsingFailed, err.to_string())),
        }

        if info.external_id.is_empty() {
            errors.push((UnitErrorKind::ParsingFailed, RowError::MissingAttribute("UNITID").to_string()));
        }

        UnitAccumulator {
            info,
            rows: Vec::new(),
            errors,
        }
    }

    fn finish_unit(&mut self, acc: UnitAccumulator) {
        let external_id = acc.info.external_id.clone();

        if let Some((kind, _)) = acc.errors.first() {
            let kind = *kind;
            let messages: Vec<String> = acc.errors.into_iter().map(|(_, msg)| msg).collect();
            error!(external_id = %external_id, kind = %kind, messages = ?messages, "LRO unit rejected");
            self.outcome.errors.push(UnitError::with_messages(external_id, kind, messages));
            return;
        }

        match assemble(acc.info, acc.rows) {
            Ok(pricing) => {
                debug!(external_id = %external_id, renewal = pricing.renewal_date.is_some(), "LRO unit parsed");
                self.outcome.units.push(pricing);
            }
            Err(err) => {
                error!(external_id = %external_id, error = %err, "LRO unit rejected");
                self.outcome
                    .errors
                    .push(UnitError::new(external_id, UnitErrorKind::InvalidRentMatrix, err.to_string()));
            }
        }
    }

    fn finish(self) -> LroParseOutcome {
        self.outcome
    }
}

// ============================================================================
// ROW READING
// ============================================================================

/// Build one row from an `offeredterm` tag. Total: every field is filled or
/// the whole row is an error.
fn read_offered_term(
    attrs: &HashMap<String, String>,
    scope: Scope,
    renewal_date: Option<NaiveDate>,
    parser: &LroParser,
) -> Result<LeaseTermRow, RowError> {
    let term_raw = attrs.get("LT").ok_or(RowError::MissingAttribute("LT"))?;
    let term_length = TermLength::from_str(term_raw).map_err(|_| RowError::InvalidValue {
        attribute: "LT",
        value: term_raw.clone(),
    })?;

    let rent = optional_decimal(attrs, "EFFECTIVERENT")?.ok_or(RowError::MissingAttribute("EFFECTIVERENT"))?;
    let concession = optional_decimal(attrs, "TOTALCONCESSION")?.unwrap_or(Decimal::ZERO);
    let today = parser.today;

    let (start_date, end_date) = match scope {
        // Renewal feeds only carry a renewal date, not a lease window
        Scope::Renewals => {
            let renewal_date = renewal_date.ok_or(RowError::MissingAttribute("RENEWALDATE"))?;
            let end = renewal_date
                .checked_add_months(Months::new(12))
                .ok_or(RowError::DateOverflow("ENDDATE"))?;
            (today, end)
        }
        Scope::Units => {
            let start = optional_date(attrs, "STARTDATE", parser.timezone)?.unwrap_or(today);
            let end = match optional_date(attrs, "ENDDATE", parser.timezone)? {
                Some(end) => end,
                None => today
                    .checked_add_months(Months::new(12))
                    .ok_or(RowError::DateOverflow("ENDDATE"))?,
            };
            (start, end)
        }
    };

    Ok(LeaseTermRow {
        term_length,
        start_date,
        end_date,
        rent,
        concession,
    })
}

fn optional_decimal(attrs: &HashMap<String, String>, attribute: &'static str) -> Result<Option<Decimal>, RowError> {
    let Some(raw) = attrs.get(attribute) else {
        return Ok(None);
    };
    let cleaned: String = raw.trim().chars().filter(|c| *c != '$' && *c != ',').collect();
    if cleaned.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(&cleaned)
        .map(Some)
        .map_err(|_| RowError::InvalidValue {
            attribute,
            value: raw.clone(),
        })
}

fn optional_date(attrs: &HashMap<String, String>, attribute: &'static str, timezone: Tz) -> Result<Option<NaiveDate>, RowError> {
    let Some(raw) = attrs.get(attribute) else {
        return Ok(None);
    };
    if raw.trim().is_empty() {
        return Ok(None);
    }
    parse_feed_date(raw, timezone)
        .map(Some)
        .ok_or_else(|| RowError::InvalidValue {
            attribute,
            value: raw.clone(),
        })
}

/// Dates show up as plain dates, US dates, naive timestamps, or
/// offset timestamps (localized into the property's timezone).
pub fn parse_feed_date(raw: &str, timezone: Tz) -> Option<NaiveDate> {
    let value = raw.trim();

    for format in ["%Y-%m-%d", "%m/%d/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }

    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%m/%d/%Y %H:%M:%S"] {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(value, format) {
            return Some(datetime.date());
        }
    }

    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|datetime| datetime.with_timezone(&timezone).date_naive())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "y" | "yes" | "true" | "1")
}

/// Predefined entities and character references; anything else is kept verbatim.
fn resolve_reference(reference: &BytesRef) -> String {
    if let Ok(Some(ch)) = reference.resolve_char_ref() {
        return ch.to_string();
    }
    let name = String::from_utf8_lossy(reference).to_string();
    match resolve_predefined_entity(&name) {
        Some(value) => value.to_string(),
        None => format!("&{name};"),
    }
}

fn unescape(raw: &str) -> String {
    quick_xml::escape::unescape(raw)
        .map(|v| v.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Lowercased local name + attributes keyed by uppercased name.
fn read_tag(tag: &BytesStart) -> Result<(String, HashMap<String, String>), String> {
    let name = String::from_utf8_lossy(tag.local_name().as_ref()).to_lowercase();
    let mut attrs = HashMap::new();

    for attr in tag.attributes() {
        let attr = attr.map_err(|e| format!("malformed attribute in <{}>: {}", name, e))?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_uppercase();
        let value = unescape(&String::from_utf8_lossy(&attr.value));
        attrs.insert(key, value);
    }

    Ok((name, attrs))
}

// ============================================================================
// ERROR POSITIONS
// ============================================================================

struct FeedFailure {
    position: u64,
    message: String,
}

impl FeedFailure {
    fn at(position: u64, message: String) -> Self {
        FeedFailure { position, message }
    }
}

/// 1-based line/column of a byte offset, streaming the source again.
fn line_column<R: Read>(source: R, position: u64) -> Result<(usize, usize), ImportError> {
    let mut line = 1;
    let mut column = 1;

    for byte in BufReader::new(source).bytes().take(position as usize) {
        if byte? == b'\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }

    Ok((line, column))
}
