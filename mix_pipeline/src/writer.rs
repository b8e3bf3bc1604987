use crate::models::TimeSeries;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Write a series as CSV: a `period` column followed by one column per
/// category in taxonomy order, one row per period in ascending order.
pub fn write_series<W: Write>(series: &TimeSeries, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);

    let mut header = Vec::with_capacity(series.categories().len() + 1);
    header.push("period");
    header.extend(series.categories().iter().map(String::as_str));
    csv.write_record(&header)?;

    for (period, row) in series.rows() {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(period.to_string());
        record.extend(row.iter().map(|value| value.to_string()));
        csv.write_record(&record)?;
    }

    csv.flush()?;
    Ok(())
}

pub fn write_series_csv(series: &TimeSeries, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    write_series(series, file).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Period, Taxonomy};
    use std::collections::BTreeMap;

    #[test]
    fn test_csv_layout() {
        let taxonomy = Taxonomy::new(["Coal", "Wind"]).unwrap();
        let mut rows = BTreeMap::new();
        rows.insert(Period::annual(2013), vec![900.0, 0.25]);
        rows.insert(Period::annual(2012), vec![1000.0, 500.0]);
        let series = TimeSeries::from_rows(taxonomy, rows);

        let mut buffer = Vec::new();
        write_series(&series, &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert_eq!(text, "period,Coal,Wind\n2012,1000,500\n2013,900,0.25\n");
    }

    #[test]
    fn test_monthly_periods_and_file_output() {
        let taxonomy = Taxonomy::new(["Coal"]).unwrap();
        let mut rows = BTreeMap::new();
        rows.insert(Period::monthly(2020, 2).unwrap(), vec![1.5]);
        let series = TimeSeries::from_rows(taxonomy, rows);

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("coal.csv");
        write_series_csv(&series, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "period,Coal\n2020-02,1.5\n");
    }
}
