use chrono::{DateTime, Utc};

use crate::model::CloudwatchData;
use crate::scraper::window;

/// One `GetMetricData` request worth of queries, with its time window.
#[derive(Debug)]
pub struct Batch {
    pub entries: Vec<CloudwatchData>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Slices the flat query list into provider-sized requests. Every entry
/// gets an `id_<i>` query id local to its batch. The period is the job's
/// rounding period when set, else the smallest configured period, and
/// the window spans the largest length and delay across the whole job,
/// so splitting a job into batches never changes a query's window.
pub struct MetricDataBatcher {
    data: Vec<CloudwatchData>,
    metrics_per_query: usize,
    period: i64,
    length: i64,
    delay: i64,
    now: DateTime<Utc>,
}

impl MetricDataBatcher {
    pub fn new(
        data: Vec<CloudwatchData>,
        metrics_per_query: usize,
        rounding_period: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        let period = rounding_period
            .unwrap_or_else(|| data.iter().map(|e| e.period).min().unwrap_or(0));
        let length = data.iter().map(|e| e.length).max().unwrap_or(0);
        let delay = data.iter().map(|e| e.delay).max().unwrap_or(0);
        MetricDataBatcher {
            data,
            metrics_per_query: metrics_per_query.max(1),
            period,
            length,
            delay,
            now,
        }
    }
}

impl Iterator for MetricDataBatcher {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.data.is_empty() {
            return None;
        }
        let take = self.metrics_per_query.min(self.data.len());
        let mut entries: Vec<CloudwatchData> = self.data.drain(..take).collect();
        for (i, entry) in entries.iter_mut().enumerate() {
            entry.query_id = Some(format!("id_{i}"));
        }

        let (start, end) = window::calculate(self.period, self.length, self.delay, self.now);

        Some(Batch { entries, start, end })
    }
}

/// Write `GetMetricData` answers back into the batch they came from by
/// decoding the `id_<i>` index.
pub fn apply_outcomes(batch: &mut Batch, outcomes: &[crate::aws::MetricDataOutcome]) {
    for outcome in outcomes {
        let Some(index) = outcome.id.strip_prefix("id_") else {
            continue;
        };
        let Ok(index) = index.parse::<usize>() else {
            continue;
        };
        if let Some(entry) = batch.entries.get_mut(index) {
            entry.result = Some(outcome.point.clone());
        }
    }
}
