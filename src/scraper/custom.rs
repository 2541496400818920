use std::sync::Arc;

use crate::aws::MetricSource;
use crate::config::CustomNamespaceJob;
use crate::errors::{ApiError, JobErrorKind};
use crate::model::CloudwatchData;
use crate::scraper::{
    compile_value_filter, dispatch_metric_data, expand_statistics, passes_dimension_gates,
    ScrapeOptions,
};

/// A custom-namespace job is a discovery job without the tagging step:
/// there are no resources, and every sample is owned by the job name.
pub async fn run(
    job: &CustomNamespaceJob,
    region: &str,
    account_id: &str,
    api: Arc<dyn MetricSource>,
    options: ScrapeOptions,
) -> Result<Vec<CloudwatchData>, (JobErrorKind, ApiError)> {
    let value_filter = compile_value_filter(&job.dimension_value_filter);

    let mut data = Vec::new();
    for config in &job.metrics {
        let listed = api
            .list_metrics(&job.namespace, config, job.recently_active_only)
            .await
            .map_err(|e| (JobErrorKind::CloudwatchCollection, e))?;
        for metric in listed {
            if !passes_dimension_gates(&metric, &job.dimension_name_requirements, &value_filter)
            {
                continue;
            }
            data.extend(expand_statistics(
                &metric,
                config,
                &job.name,
                Vec::new(),
                &job.custom_tags,
                region,
                account_id,
            ));
        }
    }

    dispatch_metric_data(data, &job.namespace, job.rounding_period, options, api)
        .await
        .map_err(|e| (JobErrorKind::CloudwatchCollection, e))
}
