//! Declarative per-dataset configuration.
//!
//! A dataset descriptor carries everything one pipeline run needs: where
//! the raw table comes from and how it is laid out, how cells are
//! cleaned, how labels map onto the taxonomy and how values aggregate.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source: SourceConfig,
    #[serde(default)]
    pub cleaning: CleaningPolicy,
    pub mapping: MappingConfig,
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub period_range: Option<PeriodRange>,
    /// Also produce per-period shares of the row total
    #[serde(default)]
    pub normalize: bool,
}

impl DatasetConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading dataset descriptor {}", path.display()))?;
        Self::from_json_str(&json)
            .with_context(|| format!("parsing dataset descriptor {}", path.display()))
    }
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    Csv,
    /// A saved EIA API v2 response (`response.data` array)
    EiaJson,
    /// An `.xlsx`/`.xls`/`.ods` workbook
    Excel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub format: SourceFormat,
    /// File path or glob pattern, relative to the descriptor's directory
    pub path: String,
    /// Preamble rows to skip before the header (CSV lines or worksheet rows)
    #[serde(default)]
    pub skip_rows: usize,
    /// Worksheets to try in order; the first sheet is the last resort
    #[serde(default)]
    pub sheets: Vec<String>,
    /// Keep only EIA rows whose facet id resolves from a saved facet listing
    #[serde(default)]
    pub facets: Option<FacetSelection>,
    #[serde(flatten)]
    pub schema: SourceSchema,
}

/// Facet ids discovered by name from a saved `response.facets` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetSelection {
    /// Facet listing file, relative to the descriptor's directory
    pub path: String,
    /// Data column holding the facet id (e.g. `productId`)
    pub column: String,
    /// Names to look for, by case-insensitive containment
    pub targets: Vec<String>,
    /// Ids used, by position, for targets the listing does not resolve
    #[serde(default)]
    pub defaults: Vec<String>,
}

/// How the three logical columns (period, label, value) are found in a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSchema {
    #[serde(default)]
    pub filters: Vec<RowFilter>,
    pub layout: SourceLayout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceLayout {
    /// One row per (period, label) observation.
    Long {
        period: ColumnRef,
        label: ColumnRef,
        value: ColumnRef,
    },
    /// A label column followed by one column per period. Without an explicit
    /// list, every header that parses as a period is used.
    WideByPeriod {
        label: ColumnRef,
        #[serde(default)]
        periods: Option<Vec<ColumnRef>>,
    },
    /// A period column followed by one column per label. Without an explicit
    /// list, every column other than the period and filter columns is used.
    WideByCategory {
        period: ColumnRef,
        #[serde(default)]
        labels: Option<Vec<ColumnRef>>,
    },
}

/// A column named directly, by an ordered list of alternative names, or by position.
///
/// Names match exactly first, then ignoring case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
    Fallbacks(Vec<String>),
}

impl ColumnRef {
    pub fn resolve(&self, headers: &[String]) -> Option<usize> {
        let find = |name: &str| {
            let name = name.trim();
            headers
                .iter()
                .position(|h| h == name)
                .or_else(|| headers.iter().position(|h| h.to_lowercase() == name.to_lowercase()))
        };
        match self {
            ColumnRef::Index(idx) => (*idx < headers.len()).then_some(*idx),
            ColumnRef::Name(name) => find(name),
            ColumnRef::Fallbacks(names) => names.iter().find_map(|name| find(name)),
        }
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

impl From<usize> for ColumnRef {
    fn from(idx: usize) -> Self {
        ColumnRef::Index(idx)
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnRef::Index(idx) => write!(f, "#{}", idx),
            ColumnRef::Name(name) => write!(f, "'{}'", name),
            ColumnRef::Fallbacks(names) => write!(f, "one of {:?}", names),
        }
    }
}

/// Row predicate applied before any other stage. Comparisons trim the cell
/// and ignore ASCII case, so `false` matches both `False` and a JSON `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RowFilter {
    Equals { column: String, value: String },
    NotEquals { column: String, value: String },
    OneOf { column: String, values: Vec<String> },
}

impl RowFilter {
    pub fn column(&self) -> &str {
        match self {
            RowFilter::Equals { column, .. }
            | RowFilter::NotEquals { column, .. }
            | RowFilter::OneOf { column, .. } => column,
        }
    }

    pub fn matches(&self, cell: &str) -> bool {
        let cell = cell.trim();
        match self {
            RowFilter::Equals { value, .. } => cell.eq_ignore_ascii_case(value.trim()),
            RowFilter::NotEquals { value, .. } => !cell.eq_ignore_ascii_case(value.trim()),
            RowFilter::OneOf { values, .. } => {
                values.iter().any(|v| cell.eq_ignore_ascii_case(v.trim()))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Cleaning
// ---------------------------------------------------------------------------

/// What a sentinel or unparseable cell resolves to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuePolicy {
    #[default]
    Zero,
    /// The cell contributes nothing and does not create a data point
    Missing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningPolicy {
    #[serde(default = "default_thousands_separator")]
    pub thousands_separator: Option<char>,
    #[serde(default = "default_sentinels")]
    pub sentinels: Vec<String>,
    #[serde(default)]
    pub sentinel_policy: ValuePolicy,
    #[serde(default)]
    pub invalid_policy: ValuePolicy,
}

impl Default for CleaningPolicy {
    fn default() -> Self {
        Self {
            thousands_separator: default_thousands_separator(),
            sentinels: default_sentinels(),
            sentinel_policy: ValuePolicy::Zero,
            invalid_policy: ValuePolicy::Zero,
        }
    }
}

fn default_thousands_separator() -> Option<char> {
    Some(',')
}

fn default_sentinels() -> Vec<String> {
    ["", "-", "--", "NA", "N/A", "Not Available", "nan"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

// ---------------------------------------------------------------------------
// Mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Canonical categories in stacking order
    pub categories: Vec<String>,
    /// Exact raw label -> category
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Ordered rules; exact rules join the lookup table, the rest are tried in order
    #[serde(default)]
    pub rules: Vec<MappingRule>,
    #[serde(default)]
    pub unmapped: UnmappedPolicy,
    #[serde(default = "default_total_marker")]
    pub total_marker: Option<TotalMarker>,
    /// Labels removed before mapping, matched exactly ignoring case
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum MappingRule {
    Exact { label: String, category: String },
    /// Case-insensitive substring containment
    Contains { needle: String, category: String },
    Pattern { regex: String, category: String },
}

impl MappingRule {
    pub fn category(&self) -> &str {
        match self {
            MappingRule::Exact { category, .. }
            | MappingRule::Contains { category, .. }
            | MappingRule::Pattern { category, .. } => category,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum UnmappedPolicy {
    Other {
        #[serde(default = "default_bucket")]
        bucket: String,
    },
    Drop,
}

impl Default for UnmappedPolicy {
    fn default() -> Self {
        UnmappedPolicy::Other {
            bucket: default_bucket(),
        }
    }
}

fn default_bucket() -> String {
    "Other".to_string()
}

/// Labels containing `marker` are summary rows and never reach the mapper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalMarker {
    pub marker: String,
    #[serde(default)]
    pub case_sensitive: bool,
}

fn default_total_marker() -> Option<TotalMarker> {
    Some(TotalMarker {
        marker: "Total".to_string(),
        case_sensitive: false,
    })
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationMode {
    /// Sum every sub-period value into the target period (generation, consumption)
    FlowSum,
    /// Keep the latest observed sub-period value of each label (capacity)
    SnapshotLast,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Annual,
    /// Keep the period exactly as parsed
    Native,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// No default: every dataset states whether it is a flow or a snapshot
    pub mode: AggregationMode,
    #[serde(default)]
    pub granularity: Granularity,
    /// Unit conversion applied after aggregation
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl AggregationConfig {
    pub fn new(mode: AggregationMode) -> Self {
        Self {
            mode,
            granularity: Granularity::Annual,
            scale: default_scale(),
        }
    }
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    #[serde(default)]
    pub start_year: Option<i32>,
    #[serde(default)]
    pub end_year: Option<i32>,
    /// Keep only the most recent period left after the year bounds
    #[serde(default)]
    pub latest_only: bool,
}
