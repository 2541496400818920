use std::sync::{Arc, Mutex};

use log::debug;
use tokio::task::JoinSet;

use crate::aws::{MetricSource, TaggingSource};
use crate::config::DiscoveryJob;
use crate::errors::{ApiError, JobErrorKind};
use crate::model::{CloudwatchData, Metric, TaggedResource};
use crate::registry;
use crate::scraper::associator::{Association, MaxDimensionAssociator};
use crate::scraper::{
    compile_value_filter, dispatch_metric_data, expand_statistics, passes_dimension_gates,
    ScrapeOptions,
};

/// One discovery job on one (region, role): tag discovery, series
/// enumeration, association and the batched data queries.
pub async fn run(
    job: &DiscoveryJob,
    region: &str,
    account_id: &str,
    exported_tags: &[String],
    tagging: Arc<dyn TaggingSource>,
    api: Arc<dyn MetricSource>,
    options: ScrapeOptions,
) -> Result<(Vec<TaggedResource>, Vec<CloudwatchData>), (JobErrorKind, ApiError)> {
    let resources = tagging.resources(job, region).await.map_err(|e| match e {
        ApiError::ExpectedResourcesNotFound { .. } => {
            (JobErrorKind::ExpectedResourcesNotFound, e)
        }
        e => (JobErrorKind::ResourceMetadata, e),
    })?;
    if resources.is_empty() {
        return Ok((resources, Vec::new()));
    }

    let Some(service) = registry::service_for(&job.namespace) else {
        return Err((
            JobErrorKind::ResourceMetadata,
            ApiError::Transport(format!("unknown namespace {}", job.namespace).into()),
        ));
    };

    // Series enumeration fans out per configured metric; the collector
    // is shared under a mutex.
    let collected: Arc<Mutex<Vec<(usize, Vec<Metric>)>>> = Arc::new(Mutex::new(Vec::new()));
    let mut set = JoinSet::new();
    for (index, metric) in job.metrics.iter().enumerate() {
        let api = api.clone();
        let collected = collected.clone();
        let namespace = job.namespace.clone();
        let metric = metric.clone();
        let recently_active_only = job.recently_active_only;
        set.spawn(async move {
            let listed = api
                .list_metrics(&namespace, &metric, recently_active_only)
                .await?;
            collected
                .lock()
                .expect("list-metrics collector poisoned")
                .push((index, listed));
            Ok::<(), ApiError>(())
        });
    }
    while let Some(joined) = set.join_next().await {
        joined
            .map_err(|e| {
                (
                    JobErrorKind::CloudwatchCollection,
                    ApiError::Transport(Box::new(e)),
                )
            })?
            .map_err(|e| (JobErrorKind::CloudwatchCollection, e))?;
    }

    let associator = MaxDimensionAssociator::new(&service.dimension_regexps, &resources);
    let value_filter = compile_value_filter(&job.dimension_value_filter);

    let mut data = Vec::new();
    let collected = std::mem::take(
        &mut *collected.lock().expect("list-metrics collector poisoned"),
    );
    for (index, listed) in collected {
        let config = &job.metrics[index];
        for metric in listed {
            if !passes_dimension_gates(&metric, &job.dimension_name_requirements, &value_filter)
            {
                continue;
            }
            match associator.associate(&metric) {
                Association::Skip => continue,
                Association::Owned(resource) => data.extend(expand_statistics(
                    &metric,
                    config,
                    &resource.arn,
                    resource.metric_tags(exported_tags),
                    &job.custom_tags,
                    region,
                    account_id,
                )),
                Association::Unowned => data.extend(expand_statistics(
                    &metric,
                    config,
                    "global",
                    Vec::new(),
                    &job.custom_tags,
                    region,
                    account_id,
                )),
            }
        }
    }
    debug!(
        "{} {}: {} resources, {} metric queries",
        job.namespace,
        region,
        resources.len(),
        data.len()
    );

    let data = dispatch_metric_data(data, &job.namespace, job.rounding_period, options, api)
        .await
        .map_err(|e| (JobErrorKind::CloudwatchCollection, e))?;
    Ok((resources, data))
}
