use crate::error::PipelineError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// A reporting period: a calendar year, optionally narrowed to one month.
///
/// Ordering is by year, then month, so annual and monthly periods of the
/// same year never interleave with other years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Period {
    pub year: i32,
    pub month: Option<u32>,
}

impl Period {
    pub fn annual(year: i32) -> Self {
        Self { year, month: None }
    }

    /// Returns `None` when `month` is not a calendar month.
    pub fn monthly(year: i32, month: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, 1).map(|_| Self {
            year,
            month: Some(month),
        })
    }

    /// Parse `YYYY`, `YYYY.0`, `YYYY-MM`, `YYYYMM`, `YYYYMmm` or `YYYY-MM-DD`.
    ///
    /// Full dates collapse onto their month. EIA's month `13` (annual
    /// total rows in MER tables) is rejected.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw.strip_suffix(".0").unwrap_or(raw);

        if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
            return Self::monthly(date.year(), date.month());
        }

        let digits_only = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());

        match raw.len() {
            4 if digits_only(raw) => raw.parse().ok().map(Self::annual),
            6 if digits_only(raw) => {
                let year = raw[..4].parse().ok()?;
                let month = raw[4..].parse().ok()?;
                Self::monthly(year, month)
            }
            7 if matches!(raw.as_bytes()[4], b'-' | b'M' | b'm')
                && digits_only(&raw[..4])
                && digits_only(&raw[5..]) =>
            {
                let year = raw[..4].parse().ok()?;
                let month = raw[5..].parse().ok()?;
                Self::monthly(year, month)
            }
            _ => None,
        }
    }

    pub fn to_annual(self) -> Self {
        Self::annual(self.year)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.month {
            Some(month) => write!(f, "{:04}-{:02}", self.year, month),
            None => write!(f, "{:04}", self.year),
        }
    }
}

impl From<Period> for String {
    fn from(period: Period) -> Self {
        period.to_string()
    }
}

impl TryFrom<String> for Period {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Period::parse(&raw).ok_or_else(|| format!("unrecognised period '{}'", raw))
    }
}

/// One cell as delivered by an ingestion source, before any cleaning.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
    Empty,
}

impl CellValue {
    /// Trims the text; whitespace-only text becomes `Empty`.
    pub fn from_text(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(trimmed.to_string())
        }
    }

    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            CellValue::Text(text) => Cow::Borrowed(text.as_str()),
            // Years arrive as JSON numbers from some APIs; print them without ".0"
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Cow::Owned(format!("{}", *n as i64))
            }
            CellValue::Number(n) => Cow::Owned(n.to_string()),
            CellValue::Empty => Cow::Borrowed(""),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }
}

impl From<&str> for CellValue {
    fn from(raw: &str) -> Self {
        CellValue::from_text(raw)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// One row of source data reduced to the three columns the pipeline needs.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Zero-based data row in the source table
    pub row: usize,
    pub period: String,
    pub label: String,
    pub value: CellValue,
}

/// Index of a category inside its `Taxonomy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CategoryId(pub usize);

/// The ordered, closed set of canonical categories for one dataset.
///
/// The order is the stacking order handed to rendering, so it is kept
/// exactly as configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Taxonomy {
    categories: Vec<String>,
}

impl Taxonomy {
    pub fn new<I, S>(categories: I) -> Result<Self, PipelineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let categories: Vec<String> = categories
            .into_iter()
            .map(|name| name.as_ref().trim().to_string())
            .collect();

        if categories.is_empty() {
            return Err(PipelineError::InvalidTaxonomy(
                "taxonomy has no categories".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for name in &categories {
            if name.is_empty() {
                return Err(PipelineError::InvalidTaxonomy(
                    "category names must not be empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(PipelineError::InvalidTaxonomy(format!(
                    "duplicate category '{}'",
                    name
                )));
            }
        }

        Ok(Self { categories })
    }

    /// Append `bucket` unless it is already a category; returns its id.
    pub fn with_bucket(mut self, bucket: &str) -> (Self, CategoryId) {
        let bucket = bucket.trim();
        if let Some(id) = self.position(bucket) {
            return (self, id);
        }
        self.categories.push(bucket.to_string());
        let id = CategoryId(self.categories.len() - 1);
        (self, id)
    }

    pub fn len(&self) -> usize {
        self.categories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.categories
    }

    pub fn position(&self, name: &str) -> Option<CategoryId> {
        self.categories
            .iter()
            .position(|candidate| candidate == name)
            .map(CategoryId)
    }

    pub fn name(&self, id: CategoryId) -> &str {
        &self.categories[id.0]
    }
}

/// A cleaned, mapped data point ready for aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub period: Period,
    pub category: CategoryId,
    /// Raw label the value came from; snapshot aggregation tracks it separately
    pub label: String,
    pub value: f64,
}

/// Periods in ascending order, each with one value per taxonomy category.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    taxonomy: Taxonomy,
    rows: BTreeMap<Period, Vec<f64>>,
}

impl TimeSeries {
    pub fn new(taxonomy: Taxonomy) -> Self {
        Self {
            taxonomy,
            rows: BTreeMap::new(),
        }
    }

    pub(crate) fn from_rows(taxonomy: Taxonomy, rows: BTreeMap<Period, Vec<f64>>) -> Self {
        debug_assert!(rows.values().all(|row| row.len() == taxonomy.len()));
        Self { taxonomy, rows }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn categories(&self) -> &[String] {
        self.taxonomy.names()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn periods(&self) -> impl Iterator<Item = Period> + '_ {
        self.rows.keys().copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = (Period, &[f64])> + '_ {
        self.rows.iter().map(|(period, row)| (*period, row.as_slice()))
    }

    pub fn row(&self, period: Period) -> Option<&[f64]> {
        self.rows.get(&period).map(Vec::as_slice)
    }

    pub fn row_total(&self, period: Period) -> Option<f64> {
        self.row(period).map(|row| row.iter().sum())
    }

    pub fn value(&self, period: Period, category: &str) -> Option<f64> {
        let id = self.taxonomy.position(category)?;
        self.row(period).map(|row| row[id.0])
    }

    /// All values of one category, in period order.
    pub fn column(&self, category: &str) -> Option<Vec<f64>> {
        let id = self.taxonomy.position(category)?;
        Some(self.rows.values().map(|row| row[id.0]).collect())
    }

    /// Multiply every value by `factor` (unit conversion).
    pub fn scale(&mut self, factor: f64) {
        for row in self.rows.values_mut() {
            for value in row.iter_mut() {
                *value *= factor;
            }
        }
    }

    /// Keep only periods whose year falls in `[start, end]`; returns how many were removed.
    pub fn retain_years(&mut self, start: Option<i32>, end: Option<i32>) -> usize {
        let before = self.rows.len();
        self.rows.retain(|period, _| {
            start.map_or(true, |s| period.year >= s) && end.map_or(true, |e| period.year <= e)
        });
        before - self.rows.len()
    }

    /// Keep only the most recent period; returns how many were removed.
    pub fn retain_latest(&mut self) -> usize {
        match self.rows.pop_last() {
            Some((period, row)) => {
                let removed = self.rows.len();
                self.rows.clear();
                self.rows.insert(period, row);
                removed
            }
            None => 0,
        }
    }
}

/// Per-dataset counters of everything that was dropped or defaulted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub rows_read: usize,
    pub rows_filtered: usize,
    pub unparseable_periods: usize,
    pub sentinel_cells: usize,
    pub invalid_cells: usize,
    pub missing_cells: usize,
    pub total_rows_excluded: usize,
    pub labels_excluded: usize,
    pub unmapped_bucketed: usize,
    pub unmapped_dropped: usize,
    pub unmapped_labels: BTreeMap<String, usize>,
    pub periods_out_of_range: usize,
    pub zero_total_periods: Vec<Period>,
}

impl Diagnostics {
    pub fn record_unmapped(&mut self, label: &str, bucketed: bool) {
        if bucketed {
            self.unmapped_bucketed += 1;
        } else {
            self.unmapped_dropped += 1;
        }
        *self.unmapped_labels.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn summary(&self) -> String {
        format!(
            "{} rows read, {} filtered, {} bad periods, {} sentinel / {} invalid / {} missing cells, \
             {} total rows excluded, {} labels excluded, {} unmapped bucketed, {} unmapped dropped, \
             {} periods out of range, {} zero-total periods",
            self.rows_read,
            self.rows_filtered,
            self.unparseable_periods,
            self.sentinel_cells,
            self.invalid_cells,
            self.missing_cells,
            self.total_rows_excluded,
            self.labels_excluded,
            self.unmapped_bucketed,
            self.unmapped_dropped,
            self.periods_out_of_range,
            self.zero_total_periods.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parsing() {
        assert_eq!(Period::parse("2020"), Some(Period::annual(2020)));
        assert_eq!(Period::parse(" 2020.0 "), Some(Period::annual(2020)));
        assert_eq!(Period::parse("2020-03"), Period::monthly(2020, 3));
        assert_eq!(Period::parse("202012"), Period::monthly(2020, 12));
        assert_eq!(Period::parse("2020-03-01"), Period::monthly(2020, 3));
        assert_eq!(Period::parse("1960M01"), Period::monthly(1960, 1));
        assert_eq!(Period::parse("2024m12"), Period::monthly(2024, 12));

        // MER annual-total marker and junk
        assert_eq!(Period::parse("202013"), None);
        assert_eq!(Period::parse("20x0"), None);
        assert_eq!(Period::parse(""), None);
        assert_eq!(Period::parse("Fuel Type"), None);
        // CMO units and code rows above the data
        assert_eq!(Period::parse("($/mmbtu)"), None);
        assert_eq!(Period::parse("1960M13"), None);
    }

    #[test]
    fn test_period_ordering_and_display() {
        let mut periods = vec![
            Period::monthly(2021, 1).unwrap(),
            Period::annual(2020),
            Period::monthly(2020, 12).unwrap(),
            Period::monthly(2020, 2).unwrap(),
        ];
        periods.sort();

        let labels: Vec<String> = periods.iter().map(|p| p.to_string()).collect();
        assert_eq!(labels, vec!["2020", "2020-02", "2020-12", "2021-01"]);
        assert_eq!(Period::monthly(2020, 12).unwrap().to_annual(), Period::annual(2020));
    }

    #[test]
    fn test_taxonomy_rejects_duplicates() {
        let err = Taxonomy::new(["Coal", "Wind", "Coal"]).unwrap_err();
        assert!(matches!(err, PipelineError::InvalidTaxonomy(_)));
        assert!(Taxonomy::new(Vec::<String>::new()).is_err());
        assert!(Taxonomy::new(["Coal", " "]).is_err());
    }

    #[test]
    fn test_taxonomy_bucket_is_appended_once() {
        let taxonomy = Taxonomy::new(["Coal", "Wind"]).unwrap();
        let (taxonomy, other) = taxonomy.with_bucket("Other");
        assert_eq!(other, CategoryId(2));

        let (taxonomy, again) = taxonomy.with_bucket("Other");
        assert_eq!(again, CategoryId(2));
        assert_eq!(taxonomy.names(), &["Coal", "Wind", "Other"]);
    }

    #[test]
    fn test_number_cells_render_as_periods() {
        assert_eq!(CellValue::Number(2020.0).as_text(), "2020");
        assert_eq!(CellValue::Number(1.5).as_text(), "1.5");
        assert_eq!(CellValue::from_text("   "), CellValue::Empty);
    }

    #[test]
    fn test_retain_years() {
        let taxonomy = Taxonomy::new(["Coal"]).unwrap();
        let mut rows = BTreeMap::new();
        for year in 1998..=2003 {
            rows.insert(Period::annual(year), vec![1.0]);
        }
        let mut series = TimeSeries::from_rows(taxonomy, rows);

        let removed = series.retain_years(Some(2000), Some(2002));
        assert_eq!(removed, 3);
        let years: Vec<i32> = series.periods().map(|p| p.year).collect();
        assert_eq!(years, vec![2000, 2001, 2002]);

        assert_eq!(series.retain_latest(), 2);
        assert_eq!(series.periods().collect::<Vec<_>>(), vec![Period::annual(2002)]);
        assert_eq!(series.retain_latest(), 0);
    }
}
