pub mod aggregator;
pub mod batch;
pub mod category_mapper;
pub mod cleaner;
pub mod config;
pub mod data_loader;
pub mod error;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod writer;

pub use aggregator::Aggregator;
pub use batch::{run_batch, run_batch_with, DatasetJob, DatasetReport};
pub use category_mapper::{CategoryMapper, LabelMapping};
pub use cleaner::{CellCleaner, CleanedCell};
pub use config::{
    AggregationConfig, AggregationMode, CleaningPolicy, ColumnRef, DatasetConfig, FacetSelection,
    Granularity, MappingConfig, MappingRule, PeriodRange, RowFilter, SourceConfig, SourceFormat,
    SourceLayout, SourceSchema, TotalMarker, UnmappedPolicy, ValuePolicy,
};
pub use data_loader::{
    CsvFileSource, EiaJsonSource, ExcelSource, MemorySource, RawTable, TableSource,
};
pub use error::PipelineError;
pub use models::{
    CategoryId, CellValue, Diagnostics, Observation, Period, RawRecord, Taxonomy, TimeSeries,
};
pub use normalizer::{normalize_shares, NormalizedShares};
pub use pipeline::{Pipeline, PipelineOutput};
