use crate::data_loader::TableSource;
use crate::pipeline::{Pipeline, PipelineOutput};
use anyhow::Result;
use log::error;
use rayon::prelude::*;

/// A configured pipeline paired with the source it reads.
pub struct DatasetJob {
    pub pipeline: Pipeline,
    pub source: Box<dyn TableSource + Send + Sync>,
}

impl DatasetJob {
    pub fn new(pipeline: Pipeline, source: Box<dyn TableSource + Send + Sync>) -> Self {
        Self { pipeline, source }
    }
}

pub struct DatasetReport {
    pub dataset: String,
    pub result: Result<PipelineOutput>,
}

impl DatasetReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Run every job; one dataset failing never stops the others.
pub fn run_batch(jobs: &[DatasetJob]) -> Vec<DatasetReport> {
    run_batch_with(jobs, |_| {})
}

/// Like `run_batch`, calling `on_complete` as each dataset finishes (from
/// worker threads). Reports come back in job order.
pub fn run_batch_with<F>(jobs: &[DatasetJob], on_complete: F) -> Vec<DatasetReport>
where
    F: Fn(&DatasetReport) + Sync,
{
    jobs.par_iter()
        .map(|job| {
            let report = DatasetReport {
                dataset: job.pipeline.name().to_string(),
                result: job.pipeline.run_source(job.source.as_ref()),
            };
            if let Err(err) = &report.result {
                error!("Dataset '{}' failed: {:#}", report.dataset, err);
            }
            on_complete(&report);
            report
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatasetConfig;
    use crate::data_loader::{MemorySource, RawTable};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pipeline(name: &str) -> Pipeline {
        let config = DatasetConfig::from_json_str(&format!(
            r#"{{
                "name": "{name}",
                "source": {{
                    "format": "csv",
                    "path": "unused.csv",
                    "layout": {{"kind": "long", "period": "year", "label": "fuel", "value": "twh"}}
                }},
                "mapping": {{"categories": ["Coal", "Wind"]}},
                "aggregation": {{"mode": "FLOW_SUM"}}
            }}"#
        ))
        .unwrap();
        Pipeline::new(config).unwrap()
    }

    #[test]
    fn test_failures_are_isolated() {
        let good = RawTable::from_strings(&["year", "fuel", "twh"], &[&["2020", "Coal", "3"]]);
        let jobs = vec![
            DatasetJob::new(pipeline("first"), Box::new(MemorySource::new("a", good.clone()))),
            DatasetJob::new(
                pipeline("broken"),
                Box::new(MemorySource::new("b", RawTable::default())),
            ),
            DatasetJob::new(pipeline("third"), Box::new(MemorySource::new("c", good))),
        ];

        let finished = AtomicUsize::new(0);
        let reports = run_batch_with(&jobs, |_| {
            finished.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(finished.load(Ordering::SeqCst), 3);
        let names: Vec<&str> = reports.iter().map(|r| r.dataset.as_str()).collect();
        assert_eq!(names, vec!["first", "broken", "third"]);
        assert!(reports[0].is_ok());
        assert!(!reports[1].is_ok());
        assert!(reports[2].is_ok());
    }
}
