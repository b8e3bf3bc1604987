use crate::aggregator::Aggregator;
use crate::category_mapper::{CategoryMapper, LabelMapping};
use crate::cleaner::{CellCleaner, CleanedCell};
use crate::config::DatasetConfig;
use crate::data_loader::{extract_records, RawTable, TableSource};
use crate::error::PipelineError;
use crate::models::{Diagnostics, Observation, Period, RawRecord, TimeSeries};
use crate::normalizer::normalize_shares;
use anyhow::Result;
use log::{debug, info, warn};

/// Everything one dataset run produces.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub dataset: String,
    pub absolute: TimeSeries,
    pub shares: Option<TimeSeries>,
    pub diagnostics: Diagnostics,
}

/// A configured ingestion → cleaning → mapping → aggregation run for one dataset.
///
/// Construction validates the descriptor (taxonomy, rules, patterns) so a
/// bad descriptor fails before any data is read.
pub struct Pipeline {
    config: DatasetConfig,
    cleaner: CellCleaner,
    mapper: CategoryMapper,
    aggregator: Aggregator,
}

impl Pipeline {
    pub fn new(config: DatasetConfig) -> Result<Self> {
        let mapper = CategoryMapper::from_config(&config.mapping)?;
        let cleaner = CellCleaner::new(&config.cleaning);
        let aggregator = Aggregator::new(config.aggregation.clone());

        debug!(
            "Dataset '{}': {} categories, {:?} aggregation",
            config.name,
            mapper.taxonomy().len(),
            aggregator.mode()
        );

        Ok(Self {
            config,
            cleaner,
            mapper,
            aggregator,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn categories(&self) -> &[String] {
        self.mapper.taxonomy().names()
    }

    /// Fetch from `source` and run. Fetch failures surface as `SourceUnavailable`.
    pub fn run_source(&self, source: &dyn TableSource) -> Result<PipelineOutput> {
        info!("Fetching '{}' from {}", self.name(), source.describe());
        let table = source.fetch().map_err(|err| PipelineError::SourceUnavailable {
            dataset: self.config.name.clone(),
            reason: format!("{:#}", err),
        })?;
        self.run(&table)
    }

    pub fn run(&self, table: &RawTable) -> Result<PipelineOutput> {
        if table.is_empty() {
            return Err(PipelineError::EmptySource(self.config.name.clone()).into());
        }

        let mut diagnostics = Diagnostics {
            rows_read: table.len(),
            ..Diagnostics::default()
        };

        let records = extract_records(table, &self.config.source.schema, &mut diagnostics)?;
        let observations = self.observe(records, &mut diagnostics);
        if observations.is_empty() {
            return Err(PipelineError::NoUsableRecords(self.config.name.clone()).into());
        }

        let mut absolute = self.aggregator.aggregate(&observations, self.mapper.taxonomy());

        if let Some(range) = &self.config.period_range {
            diagnostics.periods_out_of_range = absolute.retain_years(range.start_year, range.end_year);
            if range.latest_only {
                diagnostics.periods_out_of_range += absolute.retain_latest();
            }
            if absolute.is_empty() {
                warn!(
                    "Dataset '{}' has no periods within {:?}..{:?}",
                    self.config.name, range.start_year, range.end_year
                );
                return Err(PipelineError::NoUsableRecords(self.config.name.clone()).into());
            }
        }

        let shares = if self.config.normalize {
            let normalized = normalize_shares(&absolute);
            diagnostics.zero_total_periods = normalized.excluded;
            Some(normalized.shares)
        } else {
            None
        };

        if !diagnostics.unmapped_labels.is_empty() {
            let labels: Vec<&str> = diagnostics.unmapped_labels.keys().map(String::as_str).collect();
            warn!("Dataset '{}' unmapped labels: {}", self.config.name, labels.join(", "));
        }
        info!(
            "Dataset '{}': {} periods ({}); {}",
            self.config.name,
            absolute.len(),
            span(&absolute),
            diagnostics.summary()
        );

        Ok(PipelineOutput {
            dataset: self.config.name.clone(),
            absolute,
            shares,
            diagnostics,
        })
    }

    /// Period parsing, total exclusion, cleaning and mapping, record by record.
    fn observe(
        &self,
        records: Vec<RawRecord>,
        diagnostics: &mut Diagnostics,
    ) -> Vec<Observation> {
        let mut observations = Vec::with_capacity(records.len());

        for record in records {
            let Some(period) = Period::parse(&record.period) else {
                diagnostics.unparseable_periods += 1;
                continue;
            };

            if self.mapper.is_total(&record.label) {
                diagnostics.total_rows_excluded += 1;
                continue;
            }
            if self.mapper.is_excluded(&record.label) {
                diagnostics.labels_excluded += 1;
                continue;
            }

            let cleaned = self.cleaner.clean(&record.value);
            match cleaned {
                CleanedCell::Parsed(_) => {}
                CleanedCell::Sentinel(_) => diagnostics.sentinel_cells += 1,
                CleanedCell::Invalid(_) => diagnostics.invalid_cells += 1,
            }
            let Some(value) = cleaned.value() else {
                diagnostics.missing_cells += 1;
                continue;
            };

            let category = match self.mapper.map_label(&record.label) {
                LabelMapping::Mapped(id) => id,
                LabelMapping::Bucketed(id) => {
                    diagnostics.record_unmapped(&record.label, true);
                    id
                }
                LabelMapping::Unmapped => {
                    diagnostics.record_unmapped(&record.label, false);
                    continue;
                }
                LabelMapping::Total => {
                    diagnostics.total_rows_excluded += 1;
                    continue;
                }
                LabelMapping::Excluded => {
                    diagnostics.labels_excluded += 1;
                    continue;
                }
            };

            observations.push(Observation {
                period,
                category,
                label: record.label,
                value,
            });
        }

        observations
    }
}

fn span(series: &TimeSeries) -> String {
    match (series.periods().next(), series.periods().last()) {
        (Some(first), Some(last)) => format!("{} to {}", first, last),
        _ => "empty".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AggregationConfig, AggregationMode, CleaningPolicy, ColumnRef, MappingConfig,
        PeriodRange, SourceConfig, SourceFormat, SourceLayout, SourceSchema, TotalMarker,
        UnmappedPolicy, ValuePolicy,
    };
    use crate::data_loader::MemorySource;
    use crate::normalizer::sums_to_one;
    use std::collections::BTreeMap;

    fn long_config(categories: &[&str], mode: AggregationMode) -> DatasetConfig {
        DatasetConfig {
            name: "test".to_string(),
            description: None,
            source: SourceConfig {
                format: SourceFormat::Csv,
                path: "unused.csv".to_string(),
                skip_rows: 0,
                sheets: vec![],
                facets: None,
                schema: SourceSchema {
                    filters: vec![],
                    layout: SourceLayout::Long {
                        period: ColumnRef::Name("period".into()),
                        label: ColumnRef::Name("fuel".into()),
                        value: ColumnRef::Name("value".into()),
                    },
                },
            },
            cleaning: CleaningPolicy::default(),
            mapping: MappingConfig {
                categories: categories.iter().map(|s| s.to_string()).collect(),
                labels: BTreeMap::new(),
                rules: vec![],
                unmapped: UnmappedPolicy::Drop,
                total_marker: Some(TotalMarker {
                    marker: "Total".into(),
                    case_sensitive: false,
                }),
                exclude: vec![],
            },
            aggregation: AggregationConfig::new(mode),
            period_range: None,
            normalize: true,
        }
    }

    fn table(rows: &[&[&str]]) -> RawTable {
        RawTable::from_strings(&["period", "fuel", "value"], rows)
    }

    #[test]
    fn test_coal_wind_scenario() {
        let pipeline = Pipeline::new(long_config(&["Coal", "Wind"], AggregationMode::FlowSum)).unwrap();
        let output = pipeline
            .run(&table(&[
                &["2012", "Coal", "1,000"],
                &["2012", "Coal Total", "1,000"],
                &["2012", "Wind", "500"],
            ]))
            .unwrap();

        let year = Period::annual(2012);
        assert_eq!(output.absolute.row(year), Some(&[1000.0, 500.0][..]));
        assert_eq!(output.diagnostics.total_rows_excluded, 1);

        let shares = output.shares.unwrap();
        let row = shares.row(year).unwrap();
        assert!((row[0] - 2.0 / 3.0).abs() < 1e-9);
        assert!((row[1] - 1.0 / 3.0).abs() < 1e-9);
        assert!(sums_to_one(row));
    }

    #[test]
    fn test_unmapped_labels_are_bucketed() {
        let mut config = long_config(&["Coal", "Wind"], AggregationMode::FlowSum);
        config.mapping.unmapped = UnmappedPolicy::Other {
            bucket: "Other".into(),
        };
        let pipeline = Pipeline::new(config).unwrap();
        let output = pipeline
            .run(&table(&[
                &["2012", "Coal", "10"],
                &["2012", "Tidal", "2"],
                &["2012", "Wave", "3"],
            ]))
            .unwrap();

        assert_eq!(output.absolute.categories(), &["Coal", "Wind", "Other"]);
        assert_eq!(output.absolute.value(Period::annual(2012), "Other"), Some(5.0));
        assert_eq!(output.diagnostics.unmapped_bucketed, 2);
        assert_eq!(output.diagnostics.unmapped_labels.get("Tidal"), Some(&1));
    }

    #[test]
    fn test_dropped_labels_are_counted() {
        let pipeline = Pipeline::new(long_config(&["Coal"], AggregationMode::FlowSum)).unwrap();
        let output = pipeline
            .run(&table(&[&["2012", "Coal", "10"], &["2012", "Tidal", "2"]]))
            .unwrap();

        assert_eq!(output.absolute.row(Period::annual(2012)), Some(&[10.0][..]));
        assert_eq!(output.diagnostics.unmapped_dropped, 1);
    }

    #[test]
    fn test_bad_cells_and_periods_are_recovered() {
        let mut config = long_config(&["Coal"], AggregationMode::FlowSum);
        config.cleaning.sentinel_policy = ValuePolicy::Missing;
        let pipeline = Pipeline::new(config).unwrap();
        let output = pipeline
            .run(&table(&[
                &["2012", "Coal", "10"],
                &["2012", "Coal", "Not Available"],
                &["2012", "Coal", "W"],
                &["202013", "Coal", "99"],
                &["2013", "Coal", "4"],
            ]))
            .unwrap();

        let d = &output.diagnostics;
        assert_eq!(d.rows_read, 5);
        assert_eq!(d.sentinel_cells, 1);
        assert_eq!(d.missing_cells, 1);
        assert_eq!(d.invalid_cells, 1);
        assert_eq!(d.unparseable_periods, 1);
        assert_eq!(output.absolute.column("Coal"), Some(vec![10.0, 4.0]));
    }

    #[test]
    fn test_snapshot_dataset_takes_year_end_capacity() {
        let pipeline =
            Pipeline::new(long_config(&["Coal"], AggregationMode::SnapshotLast)).unwrap();
        let output = pipeline
            .run(&table(&[
                &["202001", "Coal", "250"],
                &["202012", "Coal", "300"],
                &["202106", "Coal", "280"],
            ]))
            .unwrap();

        assert_eq!(output.absolute.column("Coal"), Some(vec![300.0, 280.0]));
    }

    #[test]
    fn test_period_range_and_zero_totals() {
        let mut config = long_config(&["Coal", "Wind"], AggregationMode::FlowSum);
        config.period_range = Some(PeriodRange {
            start_year: Some(2011),
            end_year: Some(2013),
            latest_only: false,
        });
        let pipeline = Pipeline::new(config).unwrap();
        let output = pipeline
            .run(&table(&[
                &["2010", "Coal", "1"],
                &["2011", "Coal", "0"],
                &["2012", "Wind", "5"],
                &["2014", "Wind", "5"],
            ]))
            .unwrap();

        assert_eq!(output.diagnostics.periods_out_of_range, 2);
        assert_eq!(output.absolute.len(), 2);
        assert_eq!(output.diagnostics.zero_total_periods, vec![Period::annual(2011)]);
        assert_eq!(output.shares.unwrap().len(), 1);
    }

    #[test]
    fn test_latest_period_mix_with_exclusions() {
        let mut config = long_config(&["Coal", "Natural gas", "Wind"], AggregationMode::FlowSum);
        config.mapping.unmapped = UnmappedPolicy::Other {
            bucket: "Other".into(),
        };
        config.mapping.exclude = vec!["Tide".into(), "Other sources".into()];
        config.period_range = Some(PeriodRange {
            latest_only: true,
            ..PeriodRange::default()
        });
        let pipeline = Pipeline::new(config).unwrap();
        let output = pipeline
            .run(&table(&[
                &["2021", "Coal", "100"],
                &["2022", "coal", "60"],
                &["2022", "Natural gas", "20"],
                &["2022", "Wind", "10"],
                &["2022", "Geothermal", "10"],
                &["2022", "Tide", "5"],
                &["2022", "Other sources", "7"],
            ]))
            .unwrap();

        assert_eq!(output.absolute.len(), 1);
        let year = Period::annual(2022);
        assert_eq!(output.absolute.row(year), Some(&[60.0, 20.0, 10.0, 10.0][..]));
        assert_eq!(output.diagnostics.labels_excluded, 2);
        assert_eq!(output.diagnostics.periods_out_of_range, 1);
        assert_eq!(output.diagnostics.unmapped_labels.get("Geothermal"), Some(&1));

        let shares = output.shares.unwrap();
        assert_eq!(shares.row(year), Some(&[0.6, 0.2, 0.1, 0.1][..]));
    }

    #[test]
    fn test_labels_map_regardless_of_case() {
        let pipeline = Pipeline::new(long_config(&["Coal", "Wind"], AggregationMode::FlowSum)).unwrap();
        let output = pipeline
            .run(&table(&[&["2020", "coal", "10"], &["2020", "WIND", "5"]]))
            .unwrap();

        assert_eq!(output.absolute.row(Period::annual(2020)), Some(&[10.0, 5.0][..]));
        assert_eq!(output.diagnostics.unmapped_dropped, 0);
    }

    #[test]
    fn test_repeated_runs_are_identical() {
        let pipeline = Pipeline::new(long_config(&["Coal", "Wind"], AggregationMode::FlowSum)).unwrap();
        let input = table(&[
            &["2012-03", "Wind", "0.1"],
            &["2012-01", "Coal", "0.7"],
            &["2012-02", "Wind", "0.2"],
            &["2013-01", "Coal", "1e3"],
        ]);

        let first = pipeline.run(&input).unwrap();
        let second = pipeline.run(&input).unwrap();
        assert_eq!(first.absolute, second.absolute);
        assert_eq!(first.shares, second.shares);
        assert_eq!(first.diagnostics, second.diagnostics);
    }

    #[test]
    fn test_terminal_errors() {
        let pipeline = Pipeline::new(long_config(&["Coal"], AggregationMode::FlowSum)).unwrap();

        let err = pipeline.run(&RawTable::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptySource(_))
        ));

        let err = pipeline.run(&table(&[&["2012", "Tidal", "1"]])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoUsableRecords(_))
        ));

        let bad_layout = RawTable::from_strings(&["year", "fuel"], &[&["2012", "Coal"]]);
        let err = pipeline.run(&bad_layout).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::MissingColumn { .. })
        ));
    }

    #[test]
    fn test_invalid_descriptor_fails_at_construction() {
        let mut config = long_config(&["Coal", "Coal"], AggregationMode::FlowSum);
        assert!(Pipeline::new(config.clone()).is_err());

        config.mapping.categories = vec!["Coal".into()];
        config.mapping.labels.insert("COW".into(), "Lignite".into());
        assert!(Pipeline::new(config).is_err());
    }

    #[test]
    fn test_run_source_wraps_fetch_errors() {
        let pipeline = Pipeline::new(long_config(&["Coal"], AggregationMode::FlowSum)).unwrap();

        let source = MemorySource::new("inline", table(&[&["2012", "Coal", "3"]]));
        let output = pipeline.run_source(&source).unwrap();
        assert_eq!(output.absolute.len(), 1);

        let missing = crate::data_loader::CsvFileSource::new("/nonexistent/energy.csv", 0);
        let err = pipeline.run_source(&missing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::SourceUnavailable { .. })
        ));
    }
}
