use std::sync::Arc;

use crate::aws::MetricSource;
use crate::config::StaticJob;
use crate::errors::{ApiError, JobErrorKind};
use crate::model::{select_datapoint, CloudwatchData, Metric};
use crate::scraper::expand_statistics;

/// A static job queries a fixed (namespace, dimensions) tuple through
/// `GetMetricStatistics` and demultiplexes each requested statistic out
/// of the raw datapoints, so the migrator sees the same single-result
/// records as the discovery path.
pub async fn run(
    job: &StaticJob,
    region: &str,
    account_id: &str,
    api: Arc<dyn MetricSource>,
) -> Result<Vec<CloudwatchData>, (JobErrorKind, ApiError)> {
    let mut data = Vec::new();
    for config in &job.metrics {
        let datapoints = api
            .metric_statistics(&job.dimensions, &job.namespace, config)
            .await
            .map_err(|e| (JobErrorKind::CloudwatchCollection, e))?;

        let metric = Metric {
            namespace: job.namespace.clone(),
            name: config.name.clone(),
            dimensions: job.dimensions.clone(),
        };
        let mut expanded = expand_statistics(
            &metric,
            config,
            &job.name,
            Vec::new(),
            &job.custom_tags,
            region,
            account_id,
        );
        for entry in &mut expanded {
            entry.result = Some(select_datapoint(&datapoints, &entry.statistic));
        }
        data.append(&mut expanded);
    }
    Ok(data)
}
