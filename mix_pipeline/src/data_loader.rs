use crate::category_mapper::first_containing;
use crate::config::{
    ColumnRef, FacetSelection, RowFilter, SourceConfig, SourceFormat, SourceLayout, SourceSchema,
};
use crate::error::PipelineError;
use crate::models::{CellValue, Diagnostics, Period, RawRecord};
use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use encoding_rs::WINDOWS_1252;
use glob::glob;
use log::{debug, info, warn};
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

static EMPTY_CELL: CellValue = CellValue::Empty;

/// A fully materialized source table: trimmed headers plus rows of cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawTable {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<CellValue>>) -> Self {
        Self { headers, rows }
    }

    /// Build a table from string literals; handy for fixtures and small inline sources.
    pub fn from_strings(headers: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.trim().to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|cell| CellValue::from_text(cell)).collect())
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Short rows read as empty cells.
    pub fn cell(&self, row: usize, column: usize) -> &CellValue {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .unwrap_or(&EMPTY_CELL)
    }

    fn resolve(&self, column: &ColumnRef) -> Result<usize, PipelineError> {
        column
            .resolve(&self.headers)
            .ok_or_else(|| PipelineError::MissingColumn {
                column: column.to_string(),
                available: self.headers.join(", "),
            })
    }

    /// Append another table with an identical header.
    fn append(&mut self, other: RawTable, origin: &Path) -> Result<(), PipelineError> {
        if self.headers.is_empty() && self.rows.is_empty() {
            *self = other;
            return Ok(());
        }
        if self.headers != other.headers {
            return Err(PipelineError::SchemaMismatch(format!(
                "{} has columns [{}], expected [{}]",
                origin.display(),
                other.headers.join(", "),
                self.headers.join(", ")
            )));
        }
        self.rows.extend(other.rows);
        Ok(())
    }

    /// Append another table by column name. Unknown columns are added at
    /// the end and cells a row does not carry read as empty.
    fn merge_by_name(&mut self, other: RawTable) {
        if self.headers.is_empty() && self.rows.is_empty() {
            *self = other;
            return;
        }

        let mut positions = Vec::with_capacity(other.headers.len());
        for header in &other.headers {
            let idx = match self.headers.iter().position(|h| h == header) {
                Some(idx) => idx,
                None => {
                    debug!("New column '{}' in a later page", header);
                    self.headers.push(header.clone());
                    self.headers.len() - 1
                }
            };
            positions.push(idx);
        }

        let width = self.headers.len();
        for row in &mut self.rows {
            row.resize(width, CellValue::Empty);
        }
        for row in other.rows {
            let mut merged = vec![CellValue::Empty; width];
            for (cell, &idx) in row.into_iter().zip(&positions) {
                merged[idx] = cell;
            }
            self.rows.push(merged);
        }
    }
}

/// Anything that can hand the pipeline a complete raw table.
///
/// Fetching, retries and pagination live behind this trait; the pipeline
/// only sees the finished table or an error.
pub trait TableSource {
    fn describe(&self) -> String;
    fn fetch(&self) -> Result<RawTable>;
}

/// One CSV file, or every file matching a glob pattern (concatenated in path order).
pub struct CsvFileSource {
    pattern: String,
    skip_rows: usize,
}

impl CsvFileSource {
    pub fn new(pattern: impl Into<String>, skip_rows: usize) -> Self {
        Self {
            pattern: pattern.into(),
            skip_rows,
        }
    }
}

impl TableSource for CsvFileSource {
    fn describe(&self) -> String {
        format!("csv:{}", self.pattern)
    }

    fn fetch(&self) -> Result<RawTable> {
        let files = expand_pattern(&self.pattern)?;
        let mut table = RawTable::default();

        for file in &files {
            let part = read_csv_file(file, self.skip_rows)
                .with_context(|| format!("reading {}", file.display()))?;
            debug!("Loaded {} rows from {}", part.len(), file.display());
            table.append(part, file)?;
        }

        info!("Loaded {} rows from {} CSV file(s)", table.len(), files.len());
        Ok(table)
    }
}

/// A saved EIA API v2 response, or every response file matching a pattern.
///
/// Pages are merged by key name, since EIA omits keys a page has no values for.
pub struct EiaJsonSource {
    pattern: String,
    facets: Option<FacetFilter>,
}

impl EiaJsonSource {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            facets: None,
        }
    }

    /// Keep only rows whose facet id resolves from the listing at `listing`.
    pub fn with_facets(mut self, listing: impl Into<PathBuf>, selection: FacetSelection) -> Self {
        self.facets = Some(FacetFilter {
            listing: listing.into(),
            selection,
        });
        self
    }
}

struct FacetFilter {
    listing: PathBuf,
    selection: FacetSelection,
}

impl FacetFilter {
    /// Resolved ids; an unreadable listing falls back to the default ids.
    fn ids(&self) -> Vec<String> {
        let facets = fs::read_to_string(&self.listing)
            .map_err(anyhow::Error::from)
            .and_then(|text| parse_eia_facets(&text))
            .unwrap_or_else(|err| {
                warn!(
                    "Facet listing {} unusable ({:#}), using default ids",
                    self.listing.display(),
                    err
                );
                Vec::new()
            });

        let targets: Vec<&str> = self.selection.targets.iter().map(String::as_str).collect();
        let defaults: Vec<&str> = self.selection.defaults.iter().map(String::as_str).collect();
        resolve_facets(&targets, &facets, &defaults)
    }

    fn apply(&self, table: &mut RawTable) -> Result<(), PipelineError> {
        let ids = self.ids();
        let column = table.resolve(&ColumnRef::Name(self.selection.column.clone()))?;

        let before = table.len();
        table.rows.retain(|row| {
            row.get(column)
                .map_or(false, |cell| ids.iter().any(|id| *id == cell.as_text()))
        });
        info!(
            "Kept {} of {} rows with {} in [{}]",
            table.len(),
            before,
            self.selection.column,
            ids.join(", ")
        );
        Ok(())
    }
}

impl TableSource for EiaJsonSource {
    fn describe(&self) -> String {
        format!("eia_json:{}", self.pattern)
    }

    fn fetch(&self) -> Result<RawTable> {
        let files = expand_pattern(&self.pattern)?;
        let mut table = RawTable::default();

        // Paged downloads are saved one page per file
        for file in &files {
            let text = fs::read_to_string(file)
                .with_context(|| format!("reading {}", file.display()))?;
            let page = parse_eia_response(&text)
                .with_context(|| format!("parsing {}", file.display()))?;
            if page.is_empty() {
                debug!("{} holds an empty page", file.display());
                continue;
            }
            table.merge_by_name(page);
        }

        info!("Loaded {} EIA records from {} file(s)", table.len(), files.len());
        if let (Some(facets), false) = (&self.facets, table.is_empty()) {
            facets.apply(&mut table)?;
        }
        Ok(table)
    }
}

/// One worksheet of a workbook (`.xlsx`, `.xls`, `.xlsb`, `.ods`).
///
/// `sheets` are tried in order; when none exists the first sheet is read.
/// Cell positions are kept relative to the sheet's top-left corner, so
/// `skip_rows` and column indexes count blank leading rows and columns.
pub struct ExcelSource {
    pattern: String,
    sheets: Vec<String>,
    skip_rows: usize,
}

impl ExcelSource {
    pub fn new(pattern: impl Into<String>, sheets: Vec<String>, skip_rows: usize) -> Self {
        Self {
            pattern: pattern.into(),
            sheets,
            skip_rows,
        }
    }

    fn read_workbook(&self, path: &Path) -> Result<RawTable> {
        let mut workbook = open_workbook_auto(path)
            .with_context(|| format!("opening workbook {}", path.display()))?;

        let names = workbook.sheet_names().to_vec();
        let sheet = pick_sheet(&names, &self.sheets)
            .ok_or_else(|| anyhow!("{} has no sheets", path.display()))?
            .to_string();

        let range = workbook
            .worksheet_range(&sheet)
            .with_context(|| format!("reading sheet '{}'", sheet))?;
        debug!("Sheet '{}' of {} spans {:?}", sheet, path.display(), range.get_size());

        Ok(range_to_table(&range, self.skip_rows))
    }
}

impl TableSource for ExcelSource {
    fn describe(&self) -> String {
        format!("excel:{}", self.pattern)
    }

    fn fetch(&self) -> Result<RawTable> {
        let files = expand_pattern(&self.pattern)?;
        let mut table = RawTable::default();

        for file in &files {
            let part = self.read_workbook(file)?;
            table.append(part, file)?;
        }

        info!("Loaded {} rows from {} workbook(s)", table.len(), files.len());
        Ok(table)
    }
}

/// The first wanted sheet the workbook has, else its first sheet.
pub fn pick_sheet<'a>(available: &'a [String], wanted: &[String]) -> Option<&'a str> {
    if let Some(found) = wanted
        .iter()
        .find_map(|name| available.iter().find(|sheet| *sheet == name))
    {
        return Some(found.as_str());
    }

    let first = available.first()?;
    if !wanted.is_empty() {
        warn!("None of the sheets {:?} exist, reading '{}'", wanted, first);
    }
    Some(first.as_str())
}

/// Flatten a worksheet range into a table whose header is sheet row `skip_rows`.
pub fn range_to_table(range: &Range<Data>, skip_rows: usize) -> RawTable {
    let (first_row, first_col) = range
        .start()
        .map_or((0, 0), |(row, col)| (row as usize, col as usize));
    let padding = |cells: &[Data]| -> Vec<CellValue> {
        std::iter::repeat(CellValue::Empty)
            .take(first_col)
            .chain(cells.iter().map(excel_cell))
            .collect()
    };

    let mut rows = range.rows().skip(skip_rows.saturating_sub(first_row));
    let headers: Vec<String> = match rows.next() {
        Some(header) => padding(header)
            .iter()
            .map(|cell| cell.as_text().trim().to_string())
            .collect(),
        None => return RawTable::default(),
    };

    let rows = rows
        .map(padding)
        .filter(|row| !row.iter().all(CellValue::is_empty))
        .collect();
    RawTable::new(headers, rows)
}

fn excel_cell(cell: &Data) -> CellValue {
    match cell {
        Data::Empty => CellValue::Empty,
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Float(n) => CellValue::Number(*n),
        Data::String(text) => CellValue::from_text(text),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(dt) => CellValue::Text(dt.format("%Y-%m-%d").to_string()),
            None => CellValue::Number(dt.as_f64()),
        },
        Data::DateTimeIso(text) => CellValue::from_text(text.get(..10).unwrap_or(text)),
        other => CellValue::Text(other.to_string()),
    }
}

/// A table already materialized by an upstream client.
pub struct MemorySource {
    name: String,
    table: RawTable,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, table: RawTable) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }
}

impl TableSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn fetch(&self) -> Result<RawTable> {
        Ok(self.table.clone())
    }
}

/// Build the source a descriptor points at. Relative paths resolve against `base_dir`.
pub fn source_for(config: &SourceConfig, base_dir: &Path) -> Box<dyn TableSource + Send + Sync> {
    let resolve = |path: &str| {
        if Path::new(path).is_absolute() {
            path.to_string()
        } else {
            base_dir.join(path).to_string_lossy().into_owned()
        }
    };
    let path = resolve(&config.path);

    match config.format {
        SourceFormat::Csv => Box::new(CsvFileSource::new(path, config.skip_rows)),
        SourceFormat::EiaJson => {
            let source = EiaJsonSource::new(path);
            match &config.facets {
                Some(selection) => {
                    Box::new(source.with_facets(resolve(&selection.path), selection.clone()))
                }
                None => Box::new(source),
            }
        }
        SourceFormat::Excel => Box::new(ExcelSource::new(
            path,
            config.sheets.clone(),
            config.skip_rows,
        )),
    }
}

fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    if !pattern.contains(['*', '?', '[']) {
        let path = PathBuf::from(pattern);
        if !path.exists() {
            return Err(anyhow!("{} does not exist", path.display()));
        }
        return Ok(vec![path]);
    }

    let mut files: Vec<PathBuf> = glob(pattern)?.filter_map(Result::ok).collect();
    files.sort();
    if files.is_empty() {
        return Err(anyhow!("no files match {}", pattern));
    }
    Ok(files)
}

/// Read a CSV file, skipping `skip_rows` preamble lines before the header.
///
/// Files that are not valid UTF-8 are decoded as Windows-1252, the
/// encoding of the agency exports that are not UTF-8.
pub fn read_csv_file(path: &Path, skip_rows: usize) -> Result<RawTable> {
    let bytes = fs::read(path)?;
    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            warn!("{} is not UTF-8, decoding as Windows-1252", path.display());
            let (text, _, _) = WINDOWS_1252.decode(err.as_bytes());
            text.into_owned()
        }
    };
    parse_csv_text(&text, skip_rows)
}

pub fn parse_csv_text(text: &str, skip_rows: usize) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut records = reader.records().skip(skip_rows);
    let headers: Vec<String> = match records.next() {
        Some(header) => header?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect(),
        None => return Ok(RawTable::default()),
    };

    let mut rows = Vec::new();
    for record in records {
        let record = record?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        rows.push(record.iter().map(CellValue::from_text).collect());
    }

    Ok(RawTable::new(headers, rows))
}

/// Flatten the `response.data` array of an EIA API v2 payload into a table.
/// Columns appear in first-seen key order.
pub fn parse_eia_response(text: &str) -> Result<RawTable> {
    let payload: Value = serde_json::from_str(text)?;
    let data = payload
        .pointer("/response/data")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("EIA payload has no response.data array"))?;

    let mut headers: Vec<String> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for record in data {
        let Some(object) = record.as_object() else {
            continue;
        };
        for key in object.keys() {
            if !positions.contains_key(key) {
                positions.insert(key.clone(), headers.len());
                headers.push(key.clone());
            }
        }
    }

    let rows = data
        .iter()
        .filter_map(Value::as_object)
        .map(|object| {
            let mut row = vec![CellValue::Empty; headers.len()];
            for (key, value) in object {
                row[positions[key]] = json_cell(value);
            }
            row
        })
        .collect();

    Ok(RawTable::new(headers, rows))
}

fn json_cell(value: &Value) -> CellValue {
    match value {
        Value::Null => CellValue::Empty,
        Value::String(text) => CellValue::from_text(text),
        Value::Number(n) => n.as_f64().map(CellValue::Number).unwrap_or(CellValue::Empty),
        Value::Bool(b) => CellValue::Text(b.to_string()),
        other => CellValue::Text(other.to_string()),
    }
}

/// An entry of an EIA facet listing (`response.facets`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Facet {
    pub id: String,
    pub name: String,
}

pub fn parse_eia_facets(text: &str) -> Result<Vec<Facet>> {
    let payload: Value = serde_json::from_str(text)?;
    let facets = payload
        .pointer("/response/facets")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("EIA payload has no response.facets array"))?;

    Ok(facets
        .iter()
        .filter_map(|facet| {
            let id = match facet.get("id")? {
                Value::String(id) => id.clone(),
                other => other.to_string(),
            };
            let name = facet.get("name")?.as_str()?.to_string();
            Some(Facet { id, name })
        })
        .collect())
}

/// Pick one facet id per target name: the first facet (in listing order)
/// whose name contains the target, ignoring case. Targets without a match
/// take the id at the same position in `defaults`, if any.
pub fn resolve_facets(targets: &[&str], facets: &[Facet], defaults: &[&str]) -> Vec<String> {
    let mut selected = Vec::new();

    for (idx, target) in targets.iter().enumerate() {
        let found = first_containing(target, facets.iter().map(|f| f.name.as_str()))
            .and_then(|name| facets.iter().find(|f| f.name == name));

        match (found, defaults.get(idx)) {
            (Some(facet), _) => {
                debug!("Facet '{}' resolved to '{}' ({})", target, facet.name, facet.id);
                selected.push(facet.id.clone());
            }
            (None, Some(default)) => {
                warn!("No facet matches '{}', using default id {}", target, default);
                selected.push(default.to_string());
            }
            (None, None) => warn!("No facet matches '{}'", target),
        }
    }

    selected
}

// ---------------------------------------------------------------------------
// Schema application
// ---------------------------------------------------------------------------

/// Apply a schema's row filters and layout, producing one record per
/// (period, label, value) cell. Filtered rows are counted in `diagnostics`.
pub fn extract_records(
    table: &RawTable,
    schema: &SourceSchema,
    diagnostics: &mut Diagnostics,
) -> Result<Vec<RawRecord>, PipelineError> {
    let filters: Vec<(usize, &RowFilter)> = schema
        .filters
        .iter()
        .map(|filter| {
            table
                .resolve(&ColumnRef::Name(filter.column().to_string()))
                .map(|idx| (idx, filter))
        })
        .collect::<Result<_, _>>()?;

    let kept_rows: Vec<usize> = (0..table.len())
        .filter(|&row| {
            filters
                .iter()
                .all(|(col, filter)| filter.matches(&table.cell(row, *col).as_text()))
        })
        .collect();
    diagnostics.rows_filtered += table.len() - kept_rows.len();

    let mut records = Vec::new();
    match &schema.layout {
        SourceLayout::Long {
            period,
            label,
            value,
        } => {
            let (period, label, value) =
                (table.resolve(period)?, table.resolve(label)?, table.resolve(value)?);
            for row in kept_rows {
                records.push(RawRecord {
                    row,
                    period: table.cell(row, period).as_text().into_owned(),
                    label: table.cell(row, label).as_text().into_owned(),
                    value: table.cell(row, value).clone(),
                });
            }
        }
        SourceLayout::WideByPeriod { label, periods } => {
            let label = table.resolve(label)?;
            let period_columns = match periods {
                Some(names) => listed_columns(table, names, "period")?,
                None => table
                    .headers
                    .iter()
                    .enumerate()
                    .filter(|(idx, header)| *idx != label && Period::parse(header).is_some())
                    .map(|(idx, _)| idx)
                    .collect(),
            };
            if period_columns.is_empty() {
                return Err(PipelineError::MissingColumn {
                    column: "any period column".to_string(),
                    available: table.headers.join(", "),
                });
            }
            for row in kept_rows {
                let row_label = table.cell(row, label).as_text();
                for &col in &period_columns {
                    records.push(RawRecord {
                        row,
                        period: table.headers[col].clone(),
                        label: row_label.to_string(),
                        value: table.cell(row, col).clone(),
                    });
                }
            }
        }
        SourceLayout::WideByCategory { period, labels } => {
            let period = table.resolve(period)?;
            let label_columns = match labels {
                Some(names) => listed_columns(table, names, "label")?,
                None => (0..table.headers.len())
                    .filter(|idx| *idx != period && filters.iter().all(|(col, _)| col != idx))
                    .collect(),
            };
            for row in kept_rows {
                let row_period = table.cell(row, period).as_text();
                for &col in &label_columns {
                    records.push(RawRecord {
                        row,
                        period: row_period.to_string(),
                        label: table.headers[col].clone(),
                        value: table.cell(row, col).clone(),
                    });
                }
            }
        }
    }

    Ok(records)
}

/// Resolve an explicit column list. Absent columns are skipped with a
/// warning; an entirely absent list is an error.
fn listed_columns(
    table: &RawTable,
    columns: &[ColumnRef],
    role: &str,
) -> Result<Vec<usize>, PipelineError> {
    let mut resolved = Vec::new();
    for column in columns {
        match column.resolve(&table.headers) {
            Some(idx) => resolved.push(idx),
            None => warn!("Listed {} column {} is not in the source", role, column),
        }
    }
    if resolved.is_empty() {
        let listed: Vec<String> = columns.iter().map(ToString::to_string).collect();
        return Err(PipelineError::MissingColumn {
            column: format!("any of [{}]", listed.join(", ")),
            available: table.headers.join(", "),
        });
    }
    Ok(resolved)
}
