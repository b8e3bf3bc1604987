use anyhow::Result;
use mix_pipeline::TimeSeries;
use polars::prelude::*;
use std::fs;
use std::path::Path;

/// Pivoted series as a DataFrame: a `period` string column, then one
/// Float64 column per category in taxonomy order.
pub fn series_to_frame(series: &TimeSeries) -> Result<DataFrame> {
    let periods: Vec<String> = series.periods().map(|p| p.to_string()).collect();

    let mut columns = vec![Series::new("period", periods)];
    for (idx, category) in series.categories().iter().enumerate() {
        let values: Vec<f64> = series.rows().map(|(_, row)| row[idx]).collect();
        columns.push(Series::new(category.as_str(), values));
    }

    Ok(DataFrame::new(columns)?)
}

pub fn write_parquet(df: &DataFrame, path: &Path) -> Result<()> {
    ParquetWriter::new(fs::File::create(path)?).finish(&mut df.clone())?;
    Ok(())
}

pub fn write_ipc(df: &DataFrame, path: &Path) -> Result<()> {
    IpcWriter::new(fs::File::create(path)?).finish(&mut df.clone())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mix_pipeline::{DatasetConfig, Period, Pipeline, RawTable};

    fn sample() -> TimeSeries {
        let config = DatasetConfig::from_json_str(
            r#"{
                "name": "sample",
                "source": {
                    "format": "csv",
                    "path": "unused.csv",
                    "layout": {"kind": "long", "period": "year", "label": "fuel", "value": "twh"}
                },
                "mapping": {"categories": ["Coal", "Wind"], "unmapped": {"policy": "drop"}},
                "aggregation": {"mode": "FLOW_SUM"}
            }"#,
        )
        .unwrap();
        let table = RawTable::from_strings(
            &["year", "fuel", "twh"],
            &[&["2012", "Coal", "1000"], &["2012", "Wind", "500"], &["2013", "Wind", "7"]],
        );
        Pipeline::new(config).unwrap().run(&table).unwrap().absolute
    }

    #[test]
    fn test_frame_layout() {
        let df = series_to_frame(&sample()).unwrap();
        assert_eq!(df.get_column_names(), &["period", "Coal", "Wind"]);
        assert_eq!(df.height(), 2);
        assert_eq!(sample().value(Period::annual(2013), "Wind"), Some(7.0));
    }

    #[test]
    fn test_parquet_and_ipc_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let df = series_to_frame(&sample()).unwrap();

        let parquet = dir.path().join("mix.parquet");
        let ipc = dir.path().join("mix.arrow");
        write_parquet(&df, &parquet).unwrap();
        write_ipc(&df, &ipc).unwrap();

        assert!(fs::metadata(&parquet).unwrap().len() > 0);
        assert!(fs::metadata(&ipc).unwrap().len() > 0);
    }
}
