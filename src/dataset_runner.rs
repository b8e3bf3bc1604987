use crate::frame_export::{series_to_frame, write_ipc, write_parquet};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use mix_pipeline::data_loader::source_for;
use mix_pipeline::writer::write_series_csv;
use mix_pipeline::{
    run_batch_with, DatasetConfig, DatasetJob, Diagnostics, Pipeline, PipelineOutput, TimeSeries,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub generated_at: DateTime<Utc>,
    pub datasets: Vec<DatasetSummary>,
}

impl RunSummary {
    pub fn succeeded(&self) -> usize {
        self.datasets.iter().filter(|d| d.status == "ok").count()
    }
}

#[derive(Debug, Serialize)]
pub struct DatasetSummary {
    pub dataset: String,
    pub status: String,
    pub error: Option<String>,
    pub periods: usize,
    pub outputs: Vec<String>,
    pub diagnostics: Option<Diagnostics>,
}

impl DatasetSummary {
    fn failed(dataset: String, error: &anyhow::Error) -> Self {
        Self {
            dataset,
            status: "failed".to_string(),
            error: Some(format!("{:#}", error)),
            periods: 0,
            outputs: vec![],
            diagnostics: None,
        }
    }
}

/// Runs every dataset descriptor found under `datasets_dir` and exports the results.
pub struct DatasetRunner {
    datasets_dir: PathBuf,
    output_dir: PathBuf,
}

impl DatasetRunner {
    pub fn new(datasets_dir: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            datasets_dir,
            output_dir,
        }
    }

    /// All `*.json` descriptors below the datasets directory, in path order.
    pub fn discover_descriptors(&self) -> Vec<PathBuf> {
        let mut descriptors: Vec<PathBuf> = WalkDir::new(&self.datasets_dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "json"))
            .map(|e| e.path().to_path_buf())
            .collect();
        descriptors.sort();
        descriptors
    }

    pub fn run_all(&self) -> Result<RunSummary> {
        fs::create_dir_all(&self.output_dir)?;

        let descriptors = self.discover_descriptors();
        println!("📁 Found {} dataset descriptors in {}", descriptors.len(), self.datasets_dir.display());

        // Descriptors that fail to load are reported, not fatal
        let mut summaries = Vec::new();
        let mut jobs = Vec::new();
        for path in &descriptors {
            match load_job(path) {
                Ok(job) => jobs.push(job),
                Err(e) => {
                    let name = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().into_owned())
                        .unwrap_or_else(|| path.display().to_string());
                    println!("  ❌ {}: {:#}", name, e);
                    summaries.push(DatasetSummary::failed(name, &e));
                }
            }
        }

        let pb = ProgressBar::new(jobs.len() as u64);
        pb.set_style(ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap());

        let reports = run_batch_with(&jobs, |report| {
            pb.set_message(report.dataset.clone());
            pb.inc(1);
        });
        pb.finish_with_message("done");

        for report in reports {
            let summary = match report.result {
                Ok(output) => match self.export(&output) {
                    Ok(outputs) => {
                        println!("  ✅ {}: {} periods", output.dataset, output.absolute.len());
                        DatasetSummary {
                            dataset: output.dataset,
                            status: "ok".to_string(),
                            error: None,
                            periods: output.absolute.len(),
                            outputs,
                            diagnostics: Some(output.diagnostics),
                        }
                    }
                    Err(e) => {
                        println!("  ❌ {}: export failed: {:#}", output.dataset, e);
                        DatasetSummary::failed(output.dataset, &e)
                    }
                },
                Err(e) => {
                    println!("  ❌ {}: {:#}", report.dataset, e);
                    DatasetSummary::failed(report.dataset, &e)
                }
            };
            summaries.push(summary);
        }

        summaries.sort_by(|a, b| a.dataset.cmp(&b.dataset));
        let summary = RunSummary {
            generated_at: Utc::now(),
            datasets: summaries,
        };

        let summary_path = self.output_dir.join("run_summary.json");
        fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("writing {}", summary_path.display()))?;
        println!("📝 Run summary: {}", summary_path.display());

        Ok(summary)
    }

    fn export(&self, output: &PipelineOutput) -> Result<Vec<String>> {
        let mut written = self.export_series(&output.absolute, &format!("{}_absolute", output.dataset))?;
        if let Some(shares) = &output.shares {
            written.extend(self.export_series(shares, &format!("{}_shares", output.dataset))?);
        }
        Ok(written)
    }

    fn export_series(&self, series: &TimeSeries, base_name: &str) -> Result<Vec<String>> {
        let csv_path = self.output_dir.join(format!("{}.csv", base_name));
        write_series_csv(series, &csv_path)?;

        let df = series_to_frame(series)?;
        let parquet_path = self.output_dir.join(format!("{}.parquet", base_name));
        write_parquet(&df, &parquet_path)?;
        let arrow_path = self.output_dir.join(format!("{}.arrow", base_name));
        write_ipc(&df, &arrow_path)?;

        Ok([csv_path, parquet_path, arrow_path]
            .iter()
            .map(|p| p.display().to_string())
            .collect())
    }
}

fn load_job(path: &Path) -> Result<DatasetJob> {
    let config = DatasetConfig::from_path(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let source = source_for(&config.source, base_dir);
    let pipeline = Pipeline::new(config)
        .with_context(|| format!("invalid dataset descriptor {}", path.display()))?;
    Ok(DatasetJob::new(pipeline, source))
}
