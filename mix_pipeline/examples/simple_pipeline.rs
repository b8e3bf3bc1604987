use mix_pipeline::{DatasetConfig, MemorySource, Pipeline, RawTable};

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // A wide table: one row per fuel, one column per year
    let table = RawTable::from_strings(
        &["Fuel Type", "2012", "2013"],
        &[
            &["Coal", "1,000", "900"],
            &["Coal Total", "1,000", "900"],
            &["Wind", "500", "650"],
            &["Tidal", "-", "12"],
        ],
    );

    let config = DatasetConfig::from_json_str(
        r#"{
            "name": "example_generation",
            "source": {
                "format": "csv",
                "path": "inline",
                "layout": {"kind": "wide_by_period", "label": "Fuel Type"}
            },
            "mapping": {"categories": ["Coal", "Wind"]},
            "aggregation": {"mode": "FLOW_SUM"},
            "normalize": true
        }"#,
    )?;

    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run_source(&MemorySource::new("inline", table))?;

    println!("Energy Mix Results");
    println!("==================");
    println!("Dataset: {}", output.dataset);
    println!("Categories: {}", output.absolute.categories().join(", "));
    println!();

    for (period, row) in output.absolute.rows() {
        let values: Vec<String> = row.iter().map(|v| format!("{:>8.1}", v)).collect();
        println!("{}  {}", period, values.join(" "));
    }

    if let Some(shares) = &output.shares {
        println!();
        println!("Shares:");
        for (period, row) in shares.rows() {
            let values: Vec<String> = row.iter().map(|v| format!("{:>7.1}%", v * 100.0)).collect();
            println!("{}  {}", period, values.join(" "));
        }
    }

    println!();
    println!("Diagnostics: {}", output.diagnostics.summary());
    Ok(())
}
