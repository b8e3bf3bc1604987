use anyhow::Result;
use std::path::PathBuf;

mod dataset_runner;
mod frame_export;

use dataset_runner::DatasetRunner;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Set Rayon to use all available cores
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()?;

    let args: Vec<String> = std::env::args().collect();
    let datasets_dir = PathBuf::from(args.get(1).map(String::as_str).unwrap_or("datasets"));
    let output_dir = PathBuf::from(args.get(2).map(String::as_str).unwrap_or("processed_energy_data"));

    println!("⚡ Energy Mix Processor");
    println!("{}", "=".repeat(60));
    println!("Using {} CPU cores", rayon::current_num_threads());
    println!("Datasets: {}", datasets_dir.display());
    println!("Output:   {}", output_dir.display());

    let runner = DatasetRunner::new(datasets_dir, output_dir);
    let summary = runner.run_all()?;

    println!("\n{}", "=".repeat(60));
    let failed = summary.datasets.len() - summary.succeeded();
    if failed == 0 {
        println!("✅ Processed {} datasets", summary.succeeded());
    } else {
        println!(
            "⚠️  Processed {} datasets, {} failed",
            summary.succeeded(),
            failed
        );
    }

    Ok(())
}
