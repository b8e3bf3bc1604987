use crate::config::{AggregationConfig, AggregationMode, Granularity};
use crate::models::{CategoryId, Observation, Period, Taxonomy, TimeSeries};
use std::cmp::Ordering;
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

pub struct Aggregator {
    config: AggregationConfig,
}

impl Aggregator {
    pub fn new(config: AggregationConfig) -> Self {
        Self { config }
    }

    pub fn mode(&self) -> AggregationMode {
        self.config.mode
    }

    /// Group observations by (period, category) and pivot them into a
    /// zero-filled series. Scaling happens once, on the aggregated values.
    pub fn aggregate(&self, observations: &[Observation], taxonomy: &Taxonomy) -> TimeSeries {
        let width = taxonomy.len();
        let mut rows = match self.config.mode {
            AggregationMode::FlowSum => self.flow_sum(observations, width),
            AggregationMode::SnapshotLast => self.snapshot_last(observations, width),
        };

        if self.config.scale != 1.0 {
            for row in rows.values_mut() {
                for value in row.iter_mut() {
                    *value *= self.config.scale;
                }
            }
        }

        TimeSeries::from_rows(taxonomy.clone(), rows)
    }

    fn target_period(&self, period: Period) -> Period {
        match self.config.granularity {
            Granularity::Annual => period.to_annual(),
            Granularity::Native => period,
        }
    }

    fn flow_sum(&self, observations: &[Observation], width: usize) -> BTreeMap<Period, Vec<f64>> {
        let mut rows: BTreeMap<Period, Vec<f64>> = BTreeMap::new();

        for obs in observations {
            let row = rows
                .entry(self.target_period(obs.period))
                .or_insert_with(|| vec![0.0; width]);
            row[obs.category.0] += obs.value;
        }

        rows
    }

    /// Per label, keep only the values observed at its latest sub-period
    /// (several rows at that sub-period are summed, e.g. one per generator),
    /// then add the labels of a category together.
    fn snapshot_last(
        &self,
        observations: &[Observation],
        width: usize,
    ) -> BTreeMap<Period, Vec<f64>> {
        let mut latest: BTreeMap<(Period, CategoryId, &str), (Period, f64)> = BTreeMap::new();

        for obs in observations {
            let key = (self.target_period(obs.period), obs.category, obs.label.as_str());
            match latest.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert((obs.period, obs.value));
                }
                Entry::Occupied(mut slot) => {
                    let (seen, total) = slot.get_mut();
                    match obs.period.cmp(seen) {
                        Ordering::Greater => {
                            *seen = obs.period;
                            *total = obs.value;
                        }
                        Ordering::Equal => *total += obs.value,
                        Ordering::Less => {}
                    }
                }
            }
        }

        let mut rows: BTreeMap<Period, Vec<f64>> = BTreeMap::new();
        for ((period, category, _label), (_, value)) in latest {
            let row = rows.entry(period).or_insert_with(|| vec![0.0; width]);
            row[category.0] += value;
        }

        rows
    }
}
